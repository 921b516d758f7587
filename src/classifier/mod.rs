//! Classifier plug-in surface
//!
//! A classifier specification is an opaque command-line-style string: the
//! scheme name followed by its options (`"knn -K 3"`). The registry maps the
//! scheme to a factory producing a [`Learner`]; fitting a learner yields a
//! [`Model`].
//!
//! ## Dynamic measures
//!
//! A learner advertises the names of extra diagnostics it can report
//! ([`Learner::measure_names`]) and the fitted model answers them by name
//! ([`Model::measure`]). The name list belongs to the learner instance and is
//! handed to the evaluator as a value; nothing is shared between units.
//!
//! ```rust
//! use trueno_xval::classifier::ClassifierRegistry;
//!
//! let registry = ClassifierRegistry::with_builtins();
//! let learner = registry.create("knn -K 3").unwrap();
//! assert_eq!(learner.scheme(), "knn");
//! assert_eq!(learner.options(), vec!["-K".to_string(), "3".to_string()]);
//! ```

mod knn;
mod zero_r;

pub use knn::KNearest;
pub use zero_r::ZeroR;

use crate::dataset::{Instance, Instances};
use crate::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Output of a model for one row.
#[derive(Debug, Clone, PartialEq)]
pub enum Prediction {
    /// Class probability distribution (nominal target).
    Distribution(Vec<f64>),
    /// Predicted value (numeric target).
    Value(f64),
    /// The model declined to predict.
    Missing,
}

impl Prediction {
    /// Index of the most probable class, if any.
    #[must_use]
    pub fn class_index(&self) -> Option<usize> {
        match self {
            Self::Distribution(dist) => dist
                .iter()
                .enumerate()
                .filter(|(_, p)| p.is_finite())
                .max_by(|a, b| a.1.total_cmp(b.1))
                .filter(|(_, p)| **p > 0.0)
                .map(|(i, _)| i),
            _ => None,
        }
    }

    /// Predicted numeric value, if any.
    #[must_use]
    pub const fn value(&self) -> Option<f64> {
        match self {
            Self::Value(v) => Some(*v),
            _ => None,
        }
    }
}

/// An untrained, configured learning scheme.
pub trait Learner: Send + Sync {
    /// Scheme name (`Key_Scheme`).
    fn scheme(&self) -> &str;

    /// Options as parsed from the specification (`Key_Scheme_options`).
    fn options(&self) -> Vec<String>;

    /// Scheme version identifier (`Key_Scheme_version_ID`).
    fn version(&self) -> &str;

    /// Names of the additional measures fitted models can report.
    fn measure_names(&self) -> Vec<String> {
        Vec::new()
    }

    /// Fit a model on `train`.
    ///
    /// # Errors
    ///
    /// Returns error if the data is unsuitable for the scheme.
    fn fit(&self, train: &Instances) -> Result<Box<dyn Model>>;
}

/// A fitted model.
pub trait Model: Send {
    /// Predict one row.
    ///
    /// # Errors
    ///
    /// Returns error if the row does not match the training layout.
    fn predict(&self, instance: &Instance) -> Result<Prediction>;

    /// Value of a named additional measure; `None` if unavailable.
    fn measure(&self, _name: &str) -> Option<f64> {
        None
    }

    /// Byte length of the model's JSON serialization.
    ///
    /// # Errors
    ///
    /// Returns `Error::Json` if serialization fails.
    fn serialized_size(&self) -> Result<usize>;
}

/// A parsed classifier specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierSpec {
    scheme: String,
    options: Vec<String>,
}

impl ClassifierSpec {
    /// Split a specification into scheme and options.
    ///
    /// Tokens are whitespace-separated; single or double quotes group a
    /// token containing spaces.
    ///
    /// # Errors
    ///
    /// Returns `Error::Classifier` for an empty spec or an unbalanced quote.
    pub fn parse(spec: &str) -> Result<Self> {
        let mut tokens = tokenize(spec)?;
        if tokens.is_empty() {
            return Err(Error::Classifier("empty classifier specification".to_string()));
        }
        let scheme = tokens.remove(0);
        Ok(Self {
            scheme,
            options: tokens,
        })
    }

    /// Scheme name.
    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Option tokens.
    #[must_use]
    pub fn options(&self) -> &[String] {
        &self.options
    }
}

impl fmt::Display for ClassifierSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.scheme)?;
        if !self.options.is_empty() {
            write!(f, " {}", format_options(&self.options))?;
        }
        Ok(())
    }
}

/// Join option tokens so that [`ClassifierSpec::parse`] splits them back
/// into the same tokens: a token that is empty or contains whitespace or a
/// quote character is quoted, with single quotes if it holds a double quote.
#[must_use]
pub fn format_options(options: &[String]) -> String {
    options
        .iter()
        .map(|opt| {
            if opt.is_empty() || opt.contains(|c: char| c.is_whitespace() || c == '"' || c == '\'') {
                let quote = if opt.contains('"') { '\'' } else { '"' };
                format!("{quote}{opt}{quote}")
            } else {
                opt.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn tokenize(spec: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut in_token = false;

    for c in spec.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                in_token = true;
            }
            None if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            None => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if quote.is_some() {
        return Err(Error::Classifier(format!("unbalanced quote in '{spec}'")));
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}

/// Factory building a learner from option tokens
pub type LearnerFactory = Arc<dyn Fn(&[String]) -> Result<Box<dyn Learner>> + Send + Sync>;

/// Scheme name → learner factory.
#[derive(Clone, Default)]
pub struct ClassifierRegistry {
    factories: HashMap<String, LearnerFactory>,
}

impl fmt::Debug for ClassifierRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("ClassifierRegistry")
            .field("schemes", &names)
            .finish()
    }
}

impl ClassifierRegistry {
    /// Registry with no schemes.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the built-in `zero_r` and `knn` schemes and their
    /// Weka-style aliases.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(
            &["zero_r", "ZeroR", "weka.classifiers.rules.ZeroR"],
            Arc::new(|opts: &[String]| -> Result<Box<dyn Learner>> {
                Ok(Box::new(ZeroR::from_options(opts)?))
            }),
        );
        registry.register(
            &["knn", "IBk", "weka.classifiers.lazy.IBk"],
            Arc::new(|opts: &[String]| -> Result<Box<dyn Learner>> {
                Ok(Box::new(KNearest::from_options(opts)?))
            }),
        );
        registry
    }

    /// Register `factory` under every name in `names`.
    pub fn register(&mut self, names: &[&str], factory: LearnerFactory) {
        for name in names {
            self.factories
                .insert((*name).to_string(), Arc::clone(&factory));
        }
    }

    /// True if `scheme` is registered.
    #[must_use]
    pub fn contains(&self, scheme: &str) -> bool {
        self.factories.contains_key(scheme)
    }

    /// Instantiate the learner named by `spec`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Classifier` for an unknown scheme or bad options.
    pub fn create(&self, spec: &str) -> Result<Box<dyn Learner>> {
        let parsed = ClassifierSpec::parse(spec)?;
        let factory = self.factories.get(parsed.scheme()).ok_or_else(|| {
            Error::Classifier(format!("unknown classifier scheme '{}'", parsed.scheme()))
        })?;
        factory(parsed.options())
    }
}

/// Read `-X <value>` style options; returns the value for `flag`.
pub(crate) fn option_value<'a>(options: &'a [String], flag: &str) -> Option<&'a str> {
    options
        .iter()
        .position(|o| o == flag)
        .and_then(|i| options.get(i + 1))
        .map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_spec() {
        let spec = ClassifierSpec::parse("  knn   -K 5 ").unwrap();
        assert_eq!(spec.scheme(), "knn");
        assert_eq!(spec.options(), &["-K".to_string(), "5".to_string()]);
        assert_eq!(spec.to_string(), "knn -K 5");
    }

    #[test]
    fn test_parse_quoted_option() {
        let spec = ClassifierSpec::parse(r#"meta -W "knn -K 2""#).unwrap();
        assert_eq!(spec.options(), &["-W".to_string(), "knn -K 2".to_string()]);
        assert_eq!(spec.to_string(), r#"meta -W "knn -K 2""#);
    }

    #[test]
    fn test_format_options_quotes_nested_spec() {
        let spec = ClassifierSpec::parse(r#"bagging -I 10 -W "knn -K 2""#).unwrap();
        assert_eq!(format_options(spec.options()), r#"-I 10 -W "knn -K 2""#);
        assert_eq!(spec.to_string(), r#"bagging -I 10 -W "knn -K 2""#);

        let tricky = vec![String::new(), r#"say "hi" now"#.to_string()];
        let reparsed = ClassifierSpec::parse(&format!("x {}", format_options(&tricky))).unwrap();
        assert_eq!(reparsed.options(), tricky.as_slice());
    }

    #[test]
    fn test_parse_rejects_unbalanced_quote() {
        assert!(ClassifierSpec::parse("knn -K '3").is_err());
        assert!(ClassifierSpec::parse("   ").is_err());
    }

    #[test]
    fn test_registry_aliases() {
        let registry = ClassifierRegistry::with_builtins();
        assert_eq!(registry.create("IBk -K 2").unwrap().scheme(), "knn");
        assert_eq!(
            registry.create("weka.classifiers.rules.ZeroR").unwrap().scheme(),
            "zero_r"
        );
    }

    #[test]
    fn test_registry_unknown_scheme() {
        let err = ClassifierRegistry::with_builtins()
            .create("random_forest")
            .err()
            .unwrap();
        assert!(err.to_string().contains("unknown classifier scheme"));
    }

    #[test]
    fn test_prediction_class_index() {
        assert_eq!(
            Prediction::Distribution(vec![0.2, 0.7, 0.1]).class_index(),
            Some(1)
        );
        assert_eq!(Prediction::Distribution(vec![0.0, 0.0]).class_index(), None);
        assert_eq!(Prediction::Value(3.0).class_index(), None);
        assert_eq!(Prediction::Missing.value(), None);
    }

    #[test]
    fn test_option_value() {
        let opts = vec!["-K".to_string(), "4".to_string()];
        assert_eq!(option_value(&opts, "-K"), Some("4"));
        assert_eq!(option_value(&opts, "-X"), None);
    }
}
