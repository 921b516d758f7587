//! Statistics blocks
//!
//! The fixed statistics block of a result record. Its column set depends only
//! on the evaluation mode, so every record of a job shares it. Undefined
//! figures (zero denominators, CPU time on platforms without per-thread
//! clocks) are `None` and render as the missing marker.
//!
//! Classification errors (MAE/RMSE) are computed on class probability
//! vectors against one-hot targets, averaged over classes, with the Laplace
//! prior from the training partition as the reference for relative errors.
//! IR figures without a `Weighted_avg_` prefix refer to the first class.

use crate::classifier::Prediction;
use crate::config::EvaluationMode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Classification statistics columns, in record order
pub const CLASSIFICATION_COLUMNS: [&str; 35] = [
    "Number_of_training_instances",
    "Number_of_testing_instances",
    "Number_correct",
    "Number_incorrect",
    "Number_unclassified",
    "Percent_correct",
    "Percent_incorrect",
    "Percent_unclassified",
    "Kappa_statistic",
    "Mean_absolute_error",
    "Root_mean_squared_error",
    "Relative_absolute_error",
    "Root_relative_squared_error",
    "True_positive_rate",
    "False_positive_rate",
    "IR_precision",
    "IR_recall",
    "F_measure",
    "Matthews_correlation",
    "Area_under_ROC",
    "Weighted_avg_true_positive_rate",
    "Weighted_avg_false_positive_rate",
    "Weighted_avg_IR_precision",
    "Weighted_avg_IR_recall",
    "Weighted_avg_F_measure",
    "Weighted_avg_area_under_ROC",
    "Unweighted_macro_avg_F_measure",
    "Unweighted_micro_avg_F_measure",
    "Elapsed_Time_training",
    "Elapsed_Time_testing",
    "UserCPU_Time_training",
    "UserCPU_Time_testing",
    "Serialized_Model_Size",
    "Serialized_Train_Set_Size",
    "Serialized_Test_Set_Size",
];

/// Regression statistics columns, in record order
pub const REGRESSION_COLUMNS: [&str; 22] = [
    "Number_of_training_instances",
    "Number_of_testing_instances",
    "Number_unpredicted",
    "Percent_unpredicted",
    "Mean_absolute_error",
    "Root_mean_squared_error",
    "Relative_absolute_error",
    "Root_relative_squared_error",
    "Correlation_coefficient",
    "Coefficient_of_determination",
    "Mean_prior_absolute_error",
    "Root_mean_prior_squared_error",
    "Mean_signed_error",
    "Max_absolute_error",
    "Median_absolute_error",
    "Elapsed_Time_training",
    "Elapsed_Time_testing",
    "UserCPU_Time_training",
    "UserCPU_Time_testing",
    "Serialized_Model_Size",
    "Serialized_Train_Set_Size",
    "Serialized_Test_Set_Size",
];

/// Statistics column names for `mode`.
#[must_use]
pub const fn columns(mode: EvaluationMode) -> &'static [&'static str] {
    match mode {
        EvaluationMode::Classification => &CLASSIFICATION_COLUMNS,
        EvaluationMode::Regression => &REGRESSION_COLUMNS,
    }
}

/// Timing and size figures measured around training and testing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Costs {
    /// Wall-clock training time.
    pub train_wall: Duration,
    /// Wall-clock testing time.
    pub test_wall: Duration,
    /// Thread CPU time spent training, where measurable.
    pub train_cpu: Option<Duration>,
    /// Thread CPU time spent testing, where measurable.
    pub test_cpu: Option<Duration>,
    /// Serialized model size in bytes.
    pub model_size: Option<usize>,
    /// Serialized training partition size in bytes.
    pub train_set_size: Option<usize>,
    /// Serialized test partition size in bytes.
    pub test_set_size: Option<usize>,
}

impl Costs {
    #[allow(clippy::cast_precision_loss)]
    fn values(&self) -> [Option<f64>; 7] {
        [
            Some(self.train_wall.as_secs_f64()),
            Some(self.test_wall.as_secs_f64()),
            self.train_cpu.map(|d| d.as_secs_f64()),
            self.test_cpu.map(|d| d.as_secs_f64()),
            self.model_size.map(|s| s as f64),
            self.train_set_size.map(|s| s as f64),
            self.test_set_size.map(|s| s as f64),
        ]
    }
}

/// The fixed statistics block of one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsBlock {
    mode: EvaluationMode,
    values: Vec<Option<f64>>,
}

impl StatsBlock {
    /// Wrap values aligned with [`columns`]`(mode)`; `None` if the length
    /// does not match.
    #[must_use]
    pub fn from_values(mode: EvaluationMode, values: Vec<Option<f64>>) -> Option<Self> {
        (values.len() == columns(mode).len()).then_some(Self { mode, values })
    }

    /// Evaluation mode this block belongs to.
    #[must_use]
    pub const fn mode(&self) -> EvaluationMode {
        self.mode
    }

    /// Column names, aligned with [`StatsBlock::values`].
    #[must_use]
    pub const fn columns(&self) -> &'static [&'static str] {
        columns(self.mode)
    }

    /// Values, aligned with [`StatsBlock::columns`].
    #[must_use]
    pub fn values(&self) -> &[Option<f64>] {
        &self.values
    }

    /// Look up one statistic by column name.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<f64> {
        self.columns()
            .iter()
            .position(|c| *c == column)
            .and_then(|i| self.values[i])
    }
}

fn ratio(num: f64, den: f64) -> Option<f64> {
    (den != 0.0).then(|| num / den)
}

fn ratio_or_zero(num: f64, den: f64) -> f64 {
    ratio(num, den).unwrap_or(0.0)
}

/// Accumulates classification predictions against actual labels.
#[derive(Debug, Clone)]
pub struct ClassificationEvaluation {
    num_classes: usize,
    num_training: usize,
    prior: Vec<f64>,
    /// `confusion[actual][predicted]`
    confusion: Vec<Vec<f64>>,
    unclassified: usize,
    abs_error: f64,
    sq_error: f64,
    prior_abs_error: f64,
    prior_sq_error: f64,
    /// (actual class, predicted distribution) per classified row
    scored: Vec<(usize, Vec<f64>)>,
}

impl ClassificationEvaluation {
    /// Start an evaluation; `train_labels` yields the training class indices
    /// used for the Laplace prior.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn new(num_classes: usize, train_labels: impl IntoIterator<Item = usize>) -> Self {
        let mut prior = vec![1.0; num_classes];
        let mut num_training = 0;
        for label in train_labels {
            if label < num_classes {
                prior[label] += 1.0;
            }
            num_training += 1;
        }
        let total: f64 = prior.iter().sum();
        if total > 0.0 {
            prior.iter_mut().for_each(|p| *p /= total);
        }
        Self {
            num_classes,
            num_training,
            prior,
            confusion: vec![vec![0.0; num_classes]; num_classes],
            unclassified: 0,
            abs_error: 0.0,
            sq_error: 0.0,
            prior_abs_error: 0.0,
            prior_sq_error: 0.0,
            scored: Vec::new(),
        }
    }

    /// Record one prediction for a row whose label is `actual`.
    pub fn add(&mut self, actual: usize, prediction: &Prediction) {
        let Some(predicted) = prediction.class_index() else {
            self.unclassified += 1;
            return;
        };
        let Prediction::Distribution(dist) = prediction else {
            self.unclassified += 1;
            return;
        };
        if actual >= self.num_classes || predicted >= self.num_classes {
            self.unclassified += 1;
            return;
        }
        self.confusion[actual][predicted] += 1.0;

        let (abs, sq) = distribution_error(dist, actual, self.num_classes);
        self.abs_error += abs;
        self.sq_error += sq;
        let (pabs, psq) = distribution_error(&self.prior, actual, self.num_classes);
        self.prior_abs_error += pabs;
        self.prior_sq_error += psq;

        self.scored.push((actual, dist.clone()));
    }

    fn class_counts(&self) -> (Vec<f64>, Vec<f64>) {
        let actual = self.confusion.iter().map(|row| row.iter().sum::<f64>()).collect();
        let predicted = (0..self.num_classes)
            .map(|j| self.confusion.iter().map(|row| row[j]).sum::<f64>())
            .collect();
        (actual, predicted)
    }

    fn per_class(&self, class: usize, total: f64) -> ClassFigures {
        let tp = self.confusion[class][class];
        let fn_ = self.confusion[class].iter().sum::<f64>() - tp;
        let fp = self.confusion.iter().map(|row| row[class]).sum::<f64>() - tp;
        let tn = total - tp - fn_ - fp;

        let precision = ratio_or_zero(tp, tp + fp);
        let recall = ratio_or_zero(tp, tp + fn_);
        let f_measure = ratio_or_zero(2.0 * precision * recall, precision + recall);
        let mcc_den = ((tp + fp) * (tp + fn_) * (tn + fp) * (tn + fn_)).sqrt();
        ClassFigures {
            tp,
            fp,
            fn_,
            tpr: recall,
            fpr: ratio_or_zero(fp, fp + tn),
            precision,
            recall,
            f_measure,
            mcc: ratio_or_zero(tp * tn - fp * fn_, mcc_den),
            auc: self.area_under_roc(class),
        }
    }

    /// Rank-sum AUC for `class` against the rest; ties count half.
    #[allow(clippy::cast_precision_loss)]
    fn area_under_roc(&self, class: usize) -> Option<f64> {
        let mut scores: Vec<(f64, bool)> = self
            .scored
            .iter()
            .map(|(actual, dist)| (dist.get(class).copied().unwrap_or(0.0), *actual == class))
            .collect();
        let positives = scores.iter().filter(|(_, p)| *p).count();
        let negatives = scores.len() - positives;
        if positives == 0 || negatives == 0 {
            return None;
        }
        scores.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut rank_sum = 0.0;
        let mut i = 0;
        while i < scores.len() {
            let mut j = i;
            while j + 1 < scores.len() && scores[j + 1].0.total_cmp(&scores[i].0).is_eq() {
                j += 1;
            }
            // average of 1-based ranks i+1..=j+1
            let avg_rank = (i + j + 2) as f64 / 2.0;
            let tied_positives = scores[i..=j].iter().filter(|(_, p)| *p).count();
            rank_sum += avg_rank * tied_positives as f64;
            i = j + 1;
        }
        let p = positives as f64;
        let n = negatives as f64;
        Some((rank_sum - p * (p + 1.0) / 2.0) / (p * n))
    }

    /// Finish into a statistics block.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn finish(&self, num_testing: usize, costs: &Costs) -> StatsBlock {
        let (actual_counts, predicted_counts) = self.class_counts();
        let classified: f64 = actual_counts.iter().sum();
        let correct: f64 = (0..self.num_classes).map(|c| self.confusion[c][c]).sum();
        let incorrect = classified - correct;
        let unclassified = self.unclassified as f64;
        let testing = num_testing as f64;

        let chance: f64 = actual_counts
            .iter()
            .zip(&predicted_counts)
            .map(|(a, p)| a * p)
            .sum::<f64>();
        let kappa = if classified > 0.0 {
            let po = correct / classified;
            let pe = chance / (classified * classified);
            ratio(po - pe, 1.0 - pe)
        } else {
            None
        };

        let k = self.num_classes as f64;
        let mae = ratio(self.abs_error, classified * k);
        let rmse = ratio(self.sq_error, classified * k).map(f64::sqrt);
        let rae = ratio(self.abs_error, self.prior_abs_error).map(|r| 100.0 * r);
        let rrse = ratio(self.sq_error, self.prior_sq_error).map(|r| 100.0 * r.sqrt());

        let figures: Vec<ClassFigures> = (0..self.num_classes)
            .map(|c| self.per_class(c, classified))
            .collect();
        let first = figures.first();

        let weighted = |f: fn(&ClassFigures) -> f64| -> Option<f64> {
            ratio(
                figures
                    .iter()
                    .zip(&actual_counts)
                    .map(|(fig, w)| f(fig) * w)
                    .sum(),
                classified,
            )
        };
        let weighted_auc = {
            let (sum, weight) = figures
                .iter()
                .zip(&actual_counts)
                .filter_map(|(fig, w)| fig.auc.map(|a| (a * w, *w)))
                .fold((0.0, 0.0), |acc, (a, w)| (acc.0 + a, acc.1 + w));
            ratio(sum, weight)
        };
        let macro_f = ratio(figures.iter().map(|f| f.f_measure).sum(), k);
        let micro_f = {
            let tp: f64 = figures.iter().map(|f| f.tp).sum();
            let fp: f64 = figures.iter().map(|f| f.fp).sum();
            let fn_: f64 = figures.iter().map(|f| f.fn_).sum();
            let p = ratio_or_zero(tp, tp + fp);
            let r = ratio_or_zero(tp, tp + fn_);
            (classified > 0.0).then(|| ratio_or_zero(2.0 * p * r, p + r))
        };

        let head: [Option<f64>; 28] = [
            Some(self.num_training as f64),
            Some(testing),
            Some(correct),
            Some(incorrect),
            Some(unclassified),
            ratio(100.0 * correct, testing),
            ratio(100.0 * incorrect, testing),
            ratio(100.0 * unclassified, testing),
            kappa,
            mae,
            rmse,
            rae,
            rrse,
            first.map(|f| f.tpr),
            first.map(|f| f.fpr),
            first.map(|f| f.precision),
            first.map(|f| f.recall),
            first.map(|f| f.f_measure),
            first.map(|f| f.mcc),
            first.and_then(|f| f.auc),
            weighted(|f| f.tpr),
            weighted(|f| f.fpr),
            weighted(|f| f.precision),
            weighted(|f| f.recall),
            weighted(|f| f.f_measure),
            weighted_auc,
            macro_f,
            micro_f,
        ];

        let values = head.into_iter().chain(costs.values()).collect();
        StatsBlock {
            mode: EvaluationMode::Classification,
            values,
        }
    }
}

#[allow(clippy::struct_field_names)]
struct ClassFigures {
    tp: f64,
    fp: f64,
    fn_: f64,
    tpr: f64,
    fpr: f64,
    precision: f64,
    recall: f64,
    f_measure: f64,
    mcc: f64,
    auc: Option<f64>,
}

fn distribution_error(dist: &[f64], actual: usize, num_classes: usize) -> (f64, f64) {
    (0..num_classes).fold((0.0, 0.0), |(abs, sq), c| {
        let target = if c == actual { 1.0 } else { 0.0 };
        let p = dist.get(c).copied().unwrap_or(0.0);
        let e = p - target;
        (abs + e.abs(), sq + e * e)
    })
}

/// Accumulates numeric predictions against actual values.
#[derive(Debug, Clone)]
pub struct RegressionEvaluation {
    num_training: usize,
    train_mean: f64,
    pairs: Vec<(f64, f64)>,
    unpredicted: usize,
}

impl RegressionEvaluation {
    /// Start an evaluation; `train_targets` supplies the prior mean.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn new(train_targets: impl IntoIterator<Item = f64>) -> Self {
        let (sum, n) = train_targets
            .into_iter()
            .fold((0.0, 0usize), |(s, n), t| (s + t, n + 1));
        Self {
            num_training: n,
            train_mean: if n > 0 { sum / n as f64 } else { 0.0 },
            pairs: Vec::new(),
            unpredicted: 0,
        }
    }

    /// Record one prediction for a row whose target is `actual`.
    pub fn add(&mut self, actual: f64, prediction: &Prediction) {
        match prediction.value() {
            Some(predicted) if predicted.is_finite() => self.pairs.push((actual, predicted)),
            _ => self.unpredicted += 1,
        }
    }

    /// Finish into a statistics block.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn finish(&self, num_testing: usize, costs: &Costs) -> StatsBlock {
        let n = self.pairs.len() as f64;
        let testing = num_testing as f64;

        let abs_errors: Vec<f64> = self.pairs.iter().map(|(a, p)| (p - a).abs()).collect();
        let sum_abs: f64 = abs_errors.iter().sum();
        let sum_sq: f64 = self.pairs.iter().map(|(a, p)| (p - a) * (p - a)).sum();
        let sum_signed: f64 = self.pairs.iter().map(|(a, p)| p - a).sum();
        let prior_abs: f64 = self.pairs.iter().map(|(a, _)| (a - self.train_mean).abs()).sum();
        let prior_sq: f64 = self
            .pairs
            .iter()
            .map(|(a, _)| (a - self.train_mean) * (a - self.train_mean))
            .sum();

        let mean_actual = ratio(self.pairs.iter().map(|(a, _)| a).sum(), n);
        let mean_pred = ratio(self.pairs.iter().map(|(_, p)| p).sum(), n);
        let (correlation, determination) = match (mean_actual, mean_pred) {
            (Some(ma), Some(mp)) => {
                let cov: f64 = self.pairs.iter().map(|(a, p)| (a - ma) * (p - mp)).sum();
                let var_a: f64 = self.pairs.iter().map(|(a, _)| (a - ma) * (a - ma)).sum();
                let var_p: f64 = self.pairs.iter().map(|(_, p)| (p - mp) * (p - mp)).sum();
                (
                    ratio(cov, (var_a * var_p).sqrt()),
                    ratio(sum_sq, var_a).map(|r| 1.0 - r),
                )
            }
            _ => (None, None),
        };

        let mut sorted = abs_errors.clone();
        sorted.sort_by(f64::total_cmp);
        let median = match sorted.len() {
            0 => None,
            len if len % 2 == 1 => Some(sorted[len / 2]),
            len => Some((sorted[len / 2 - 1] + sorted[len / 2]) / 2.0),
        };

        let head: [Option<f64>; 15] = [
            Some(self.num_training as f64),
            Some(testing),
            Some(self.unpredicted as f64),
            ratio(100.0 * self.unpredicted as f64, testing),
            ratio(sum_abs, n),
            ratio(sum_sq, n).map(f64::sqrt),
            ratio(sum_abs, prior_abs).map(|r| 100.0 * r),
            ratio(sum_sq, prior_sq).map(|r| 100.0 * r.sqrt()),
            correlation,
            determination,
            ratio(prior_abs, n),
            ratio(prior_sq, n).map(f64::sqrt),
            ratio(sum_signed, n),
            sorted.last().copied(),
            median,
        ];

        let values = head.into_iter().chain(costs.values()).collect();
        StatsBlock {
            mode: EvaluationMode::Regression,
            values,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Option<f64>, b: f64) -> bool {
        a.is_some_and(|a| (a - b).abs() < 1e-9)
    }

    fn dist(p: &[f64]) -> Prediction {
        Prediction::Distribution(p.to_vec())
    }

    #[test]
    fn test_column_counts() {
        assert_eq!(columns(EvaluationMode::Classification).len(), 35);
        assert_eq!(columns(EvaluationMode::Regression).len(), 22);
    }

    #[test]
    fn test_perfect_classifier() {
        let mut eval = ClassificationEvaluation::new(2, [0, 1, 0, 1]);
        eval.add(0, &dist(&[1.0, 0.0]));
        eval.add(1, &dist(&[0.0, 1.0]));
        eval.add(0, &dist(&[0.9, 0.1]));
        eval.add(1, &dist(&[0.2, 0.8]));
        let block = eval.finish(4, &Costs::default());

        assert_eq!(block.values().len(), 35);
        assert!(close(block.get("Number_correct"), 4.0));
        assert!(close(block.get("Percent_correct"), 100.0));
        assert!(close(block.get("Kappa_statistic"), 1.0));
        assert!(close(block.get("Area_under_ROC"), 1.0));
        assert!(close(block.get("Weighted_avg_F_measure"), 1.0));
        assert!(close(block.get("Matthews_correlation"), 1.0));
        assert!(close(block.get("Number_of_training_instances"), 4.0));
        assert_eq!(block.get("UserCPU_Time_training"), None);
    }

    #[test]
    fn test_unclassified_rows_counted() {
        let mut eval = ClassificationEvaluation::new(2, [0, 1]);
        eval.add(0, &dist(&[1.0, 0.0]));
        eval.add(1, &Prediction::Missing);
        eval.add(1, &dist(&[0.0, 0.0]));
        let block = eval.finish(3, &Costs::default());
        assert!(close(block.get("Number_unclassified"), 2.0));
        assert!(close(block.get("Number_correct"), 1.0));
        assert!(close(block.get("Percent_unclassified"), 200.0 / 3.0));
    }

    #[test]
    fn test_kappa_of_constant_predictor_is_zero() {
        let mut eval = ClassificationEvaluation::new(2, [0, 0, 1]);
        for actual in [0, 0, 1, 1] {
            eval.add(actual, &dist(&[0.6, 0.4]));
        }
        let block = eval.finish(4, &Costs::default());
        assert!(close(block.get("Kappa_statistic"), 0.0));
        assert!(close(block.get("Area_under_ROC"), 0.5));
        assert!(close(block.get("Percent_correct"), 50.0));
    }

    #[test]
    fn test_auc_undefined_with_single_class() {
        let mut eval = ClassificationEvaluation::new(2, [0]);
        eval.add(0, &dist(&[0.7, 0.3]));
        let block = eval.finish(1, &Costs::default());
        assert_eq!(block.get("Area_under_ROC"), None);
    }

    #[test]
    fn test_regression_figures() {
        let mut eval = RegressionEvaluation::new([1.0, 2.0, 3.0]);
        eval.add(1.0, &Prediction::Value(1.5));
        eval.add(2.0, &Prediction::Value(2.0));
        eval.add(4.0, &Prediction::Value(3.0));
        eval.add(5.0, &Prediction::Missing);
        let block = eval.finish(4, &Costs::default());

        assert_eq!(block.values().len(), 22);
        assert!(close(block.get("Number_unpredicted"), 1.0));
        assert!(close(block.get("Mean_absolute_error"), 0.5));
        assert!(close(block.get("Max_absolute_error"), 1.0));
        assert!(close(block.get("Median_absolute_error"), 0.5));
        assert!(close(block.get("Mean_signed_error"), -0.5 / 3.0));
        // prior mean 2.0: |1-2| + |2-2| + |4-2| = 3
        assert!(close(block.get("Mean_prior_absolute_error"), 1.0));
        assert!(close(block.get("Relative_absolute_error"), 50.0));
        assert!(block.get("Correlation_coefficient").unwrap() > 0.9);
    }

    #[test]
    fn test_regression_without_predictions() {
        let mut eval = RegressionEvaluation::new([1.0]);
        eval.add(1.0, &Prediction::Missing);
        let block = eval.finish(1, &Costs::default());
        assert_eq!(block.get("Mean_absolute_error"), None);
        assert_eq!(block.get("Correlation_coefficient"), None);
        assert!(close(block.get("Percent_unpredicted"), 100.0));
    }

    #[test]
    fn test_costs_fill_tail() {
        let costs = Costs {
            train_wall: Duration::from_millis(1500),
            model_size: Some(42),
            ..Costs::default()
        };
        let block = RegressionEvaluation::new([1.0]).finish(0, &costs);
        assert!(close(block.get("Elapsed_Time_training"), 1.5));
        assert!(close(block.get("Serialized_Model_Size"), 42.0));
        assert_eq!(block.get("Serialized_Test_Set_Size"), None);
    }

    #[test]
    fn test_from_values_checks_length() {
        assert!(StatsBlock::from_values(EvaluationMode::Regression, vec![None; 22]).is_some());
        assert!(StatsBlock::from_values(EvaluationMode::Regression, vec![None; 21]).is_none());
    }
}
