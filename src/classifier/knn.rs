//! k-nearest-neighbour learner.
//!
//! Numeric attributes are range-normalised using the training minima and
//! maxima; nominal attributes contribute 0 on a match and 1 otherwise. A
//! missing value on either side contributes the maximum distance of 1.

use super::{option_value, Learner, Model, Prediction};
use crate::dataset::{Attribute, Instance, Instances};
use crate::{Error, Result};
use serde::Serialize;

const MEASURE_K: &str = "measureK";
const MEASURE_TRAINING: &str = "measureNumTrainingInstances";

/// k-NN with `-K <k>` (default 1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KNearest {
    k: usize,
}

impl Default for KNearest {
    fn default() -> Self {
        Self { k: 1 }
    }
}

impl KNearest {
    /// Learner with the given neighbourhood size.
    #[must_use]
    pub const fn new(k: usize) -> Self {
        Self { k }
    }

    /// Build from option tokens.
    ///
    /// # Errors
    ///
    /// Returns `Error::Classifier` for unknown options or a non-positive `k`.
    pub fn from_options(options: &[String]) -> Result<Self> {
        let mut iter = options.iter();
        while let Some(opt) = iter.next() {
            match opt.as_str() {
                "-K" => {
                    iter.next();
                }
                other => {
                    return Err(Error::Classifier(format!("knn: unknown option '{other}'")));
                }
            }
        }
        let k = match option_value(options, "-K") {
            Some(raw) => raw
                .parse::<usize>()
                .ok()
                .filter(|k| *k >= 1)
                .ok_or_else(|| Error::Classifier(format!("knn: -K must be >= 1, got '{raw}'")))?,
            None if options.iter().any(|o| o == "-K") => {
                return Err(Error::Classifier("knn: -K needs a value".to_string()))
            }
            None => 1,
        };
        Ok(Self { k })
    }

    /// Neighbourhood size.
    #[must_use]
    pub const fn k(&self) -> usize {
        self.k
    }
}

impl Learner for KNearest {
    fn scheme(&self) -> &str {
        "knn"
    }

    fn options(&self) -> Vec<String> {
        vec!["-K".to_string(), self.k.to_string()]
    }

    fn version(&self) -> &str {
        "1"
    }

    fn measure_names(&self) -> Vec<String> {
        vec![MEASURE_TRAINING.to_string(), MEASURE_K.to_string()]
    }

    fn fit(&self, train: &Instances) -> Result<Box<dyn Model>> {
        if train.is_empty() {
            return Err(Error::Evaluation("knn: empty training set".to_string()));
        }
        let width = train.attributes().len();
        let mut mins = vec![f64::INFINITY; width];
        let mut maxs = vec![f64::NEG_INFINITY; width];
        for row in train.rows() {
            for (j, &v) in row.features.iter().enumerate() {
                if !v.is_nan() {
                    mins[j] = mins[j].min(v);
                    maxs[j] = maxs[j].max(v);
                }
            }
        }

        Ok(Box::new(KnnModel {
            k: self.k,
            nominal: train.attributes().iter().map(Attribute::is_nominal).collect(),
            mins,
            maxs,
            classes: train.num_classes(),
            points: train
                .rows()
                .iter()
                .map(|r| (r.features.clone(), r.target))
                .collect(),
        }))
    }
}

#[derive(Debug, Clone, Serialize)]
struct KnnModel {
    k: usize,
    nominal: Vec<bool>,
    mins: Vec<f64>,
    maxs: Vec<f64>,
    /// 0 for a numeric target
    classes: usize,
    points: Vec<(Vec<f64>, f64)>,
}

impl KnnModel {
    fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        a.iter()
            .zip(b)
            .enumerate()
            .map(|(j, (&x, &y))| {
                let d = if x.is_nan() || y.is_nan() {
                    1.0
                } else if self.nominal[j] {
                    if (x - y).abs() < f64::EPSILON {
                        0.0
                    } else {
                        1.0
                    }
                } else {
                    let range = self.maxs[j] - self.mins[j];
                    if range > 0.0 && range.is_finite() {
                        (x - y) / range
                    } else {
                        0.0
                    }
                };
                d * d
            })
            .sum::<f64>()
            .sqrt()
    }
}

impl Model for KnnModel {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    fn predict(&self, instance: &Instance) -> Result<Prediction> {
        if instance.features.len() != self.nominal.len() {
            return Err(Error::Evaluation(format!(
                "knn: row has {} features, model expects {}",
                instance.features.len(),
                self.nominal.len()
            )));
        }
        let mut scored: Vec<(f64, usize)> = self
            .points
            .iter()
            .enumerate()
            .map(|(i, (features, _))| (self.distance(&instance.features, features), i))
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        let neighbours = &scored[..self.k.min(scored.len())];

        if self.classes > 0 {
            let mut dist = vec![0.0; self.classes];
            for &(_, i) in neighbours {
                dist[self.points[i].1 as usize] += 1.0;
            }
            let total: f64 = dist.iter().sum();
            if total > 0.0 {
                dist.iter_mut().for_each(|p| *p /= total);
            }
            Ok(Prediction::Distribution(dist))
        } else {
            let sum: f64 = neighbours.iter().map(|&(_, i)| self.points[i].1).sum();
            Ok(Prediction::Value(sum / neighbours.len() as f64))
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn measure(&self, name: &str) -> Option<f64> {
        match name {
            MEASURE_K => Some(self.k as f64),
            MEASURE_TRAINING => Some(self.points.len() as f64),
            _ => None,
        }
    }

    fn serialized_size(&self) -> Result<usize> {
        Ok(serde_json::to_vec(self)?.len())
    }
}
