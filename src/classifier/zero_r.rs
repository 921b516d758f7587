//! Majority class / mean baseline.

use super::{Learner, Model, Prediction};
use crate::dataset::{Instance, Instances};
use crate::{Error, Result};
use serde::Serialize;

/// Predicts the training class distribution (nominal target) or the training
/// mean (numeric target), ignoring inputs.
#[derive(Debug, Clone, Default)]
pub struct ZeroR;

impl ZeroR {
    /// Build from option tokens; `ZeroR` takes none.
    ///
    /// # Errors
    ///
    /// Returns `Error::Classifier` if any option is given.
    pub fn from_options(options: &[String]) -> Result<Self> {
        if let Some(opt) = options.first() {
            return Err(Error::Classifier(format!(
                "zero_r takes no options, got '{opt}'"
            )));
        }
        Ok(Self)
    }
}

impl Learner for ZeroR {
    fn scheme(&self) -> &str {
        "zero_r"
    }

    fn options(&self) -> Vec<String> {
        Vec::new()
    }

    fn version(&self) -> &str {
        "1"
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    fn fit(&self, train: &Instances) -> Result<Box<dyn Model>> {
        if train.is_empty() {
            return Err(Error::Evaluation("zero_r: empty training set".to_string()));
        }
        let model = if train.target().is_nominal() {
            // Laplace-smoothed class counts
            let mut counts = vec![1.0; train.num_classes()];
            for row in train.rows() {
                counts[row.target as usize] += 1.0;
            }
            let total: f64 = counts.iter().sum();
            ZeroRModel::Distribution(counts.into_iter().map(|c| c / total).collect())
        } else {
            let sum: f64 = train.rows().iter().map(|r| r.target).sum();
            ZeroRModel::Mean(sum / train.len() as f64)
        };
        Ok(Box::new(model))
    }
}

#[derive(Debug, Clone, Serialize)]
enum ZeroRModel {
    Distribution(Vec<f64>),
    Mean(f64),
}

impl Model for ZeroRModel {
    fn predict(&self, _instance: &Instance) -> Result<Prediction> {
        Ok(match self {
            Self::Distribution(dist) => Prediction::Distribution(dist.clone()),
            Self::Mean(mean) => Prediction::Value(*mean),
        })
    }

    fn serialized_size(&self) -> Result<usize> {
        Ok(serde_json::to_vec(self)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Attribute;

    fn instances(targets: &[f64], nominal: bool) -> Instances {
        let target = if nominal {
            Attribute::Nominal {
                name: "c".to_string(),
                values: vec!["a".to_string(), "b".to_string()],
            }
        } else {
            Attribute::Numeric {
                name: "y".to_string(),
            }
        };
        let rows = targets
            .iter()
            .map(|&t| Instance {
                features: vec![],
                target: t,
                id: None,
            })
            .collect();
        Instances::new("t", vec![], target, rows)
    }

    #[test]
    fn test_majority_class() {
        let model = ZeroR.fit(&instances(&[0.0, 1.0, 1.0, 1.0], true)).unwrap();
        let row = Instance {
            features: vec![],
            target: 0.0,
            id: None,
        };
        assert_eq!(model.predict(&row).unwrap().class_index(), Some(1));
        assert!(model.serialized_size().unwrap() > 0);
    }

    #[test]
    fn test_mean_value() {
        let model = ZeroR.fit(&instances(&[1.0, 2.0, 6.0], false)).unwrap();
        let row = Instance {
            features: vec![],
            target: 0.0,
            id: None,
        };
        let value = model.predict(&row).unwrap().value().unwrap();
        assert!((value - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_options() {
        assert!(ZeroR::from_options(&["-K".to_string()]).is_err());
    }

    #[test]
    fn test_no_measures() {
        assert!(ZeroR.measure_names().is_empty());
    }
}
