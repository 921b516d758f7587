//! Unit Evaluator (the map side)
//!
//! Evaluates one work unit end to end: instantiate the classifier, load and
//! split the dataset for the unit's repetition and fold, train, test, and
//! assemble a `ResultRecord`. Any failure, including a panic inside a
//! learner, is confined to the unit: it is logged with the unit key, written
//! to the shard's failure sidecar, and the unit produces no record.

use crate::classifier::{format_options, ClassifierRegistry, Prediction};
use crate::config::{ClusterConfig, EvaluationMode};
use crate::dataset::{DatasetCache, Instances};
use crate::record::{KeyBlock, Measures, Provenance, ResultRecord, PROVENANCE_SEPARATOR};
use crate::split::FoldPartition;
use crate::stats::{ClassificationEvaluation, Costs, RegressionEvaluation};
use crate::substrate::{ShardInput, ShardTask};
use crate::unit::{UnitKey, WorkUnit};
use crate::{Error, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn};

/// Job-level evaluation switches shared by every unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluatorOptions {
    /// 0-based identifier column for provenance.
    pub id_column: Option<usize>,
    /// Attach per-row predictions and targets.
    pub predictions: bool,
}

/// A unit that produced no record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitFailure {
    /// Identity of the failed unit.
    pub key: UnitKey,
    /// Error message.
    pub error: String,
}

/// Per-shard tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShardSummary {
    /// Units read from the shard.
    pub units: usize,
    /// Records written.
    pub records: usize,
    /// Units that failed.
    pub failures: usize,
}

/// Evaluates work units. Shareable across worker threads.
#[derive(Debug)]
pub struct UnitEvaluator {
    registry: ClassifierRegistry,
    options: EvaluatorOptions,
    datasets: DatasetCache,
    cluster: Arc<ClusterConfig>,
    clusters: DashMap<PathBuf, Arc<ClusterConfig>>,
}

impl UnitEvaluator {
    /// Evaluator with the given registry and options; units that name no
    /// cluster config resolve datasets against `ClusterConfig::default()`.
    #[must_use]
    pub fn new(registry: ClassifierRegistry, options: EvaluatorOptions) -> Self {
        Self {
            registry,
            options,
            datasets: DatasetCache::new(),
            cluster: Arc::new(ClusterConfig::default()),
            clusters: DashMap::new(),
        }
    }

    /// Use `cluster` for units that carry no cluster config path.
    #[must_use]
    pub fn with_cluster(mut self, cluster: ClusterConfig) -> Self {
        self.cluster = Arc::new(cluster);
        self
    }

    /// Job-level options.
    #[must_use]
    pub const fn options(&self) -> EvaluatorOptions {
        self.options
    }

    fn cluster_for(&self, unit: &WorkUnit) -> Result<Arc<ClusterConfig>> {
        let Some(path) = unit.cluster_config() else {
            return Ok(Arc::clone(&self.cluster));
        };
        if let Some(config) = self.clusters.get(path) {
            return Ok(Arc::clone(config.value()));
        }
        let loaded = Arc::new(ClusterConfig::load(path)?);
        let entry = self.clusters.entry(path.to_path_buf()).or_insert(loaded);
        Ok(Arc::clone(entry.value()))
    }

    /// Evaluate one unit.
    ///
    /// # Errors
    ///
    /// Returns the first error raised while instantiating the classifier,
    /// loading or splitting the dataset, training or testing.
    pub fn evaluate(&self, unit: &WorkUnit) -> Result<ResultRecord> {
        // The measure name list belongs to this learner instance only.
        let learner = self.registry.create(unit.classifier())?;
        let measure_names = learner.measure_names();

        let cluster = self.cluster_for(unit)?;
        let path = cluster.resolve_dataset(unit.dataset());
        let dataset = self.datasets.get_or_load(&path)?;
        let instances = dataset.instances(unit.target(), unit.mode(), self.options.id_column)?;

        let partition = FoldPartition::new(&instances, unit.repetition(), unit.folds())?;
        let (train, test) = partition.split(&instances, unit.fold() as usize)?;

        let train_clock = Stopwatch::start();
        let model = learner.fit(&train)?;
        let (train_wall, train_cpu) = train_clock.stop();

        let test_clock = Stopwatch::start();
        let predictions = test
            .rows()
            .iter()
            .map(|row| model.predict(row))
            .collect::<Result<Vec<_>>>()?;
        let (test_wall, test_cpu) = test_clock.stop();

        let costs = Costs {
            train_wall,
            test_wall,
            train_cpu,
            test_cpu,
            model_size: model.serialized_size().ok(),
            train_set_size: train.serialized_size().ok(),
            test_set_size: test.serialized_size().ok(),
        };
        let stats = score(unit.mode(), &train, &test, &predictions, &costs);

        let measures: Measures = measure_names
            .into_iter()
            .map(|name| {
                let value = model.measure(&name);
                if value.is_none() {
                    debug!(measure = %name, "measure unavailable");
                }
                (name, value)
            })
            .collect();

        let provenance = self.provenance(&test, &predictions);

        let key = KeyBlock {
            dataset: dataset.name().to_string(),
            run: unit.repetition(),
            fold: unit.fold(),
            scheme: learner.scheme().to_string(),
            scheme_options: format_options(&learner.options()),
            scheme_version: learner.version().to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        Ok(ResultRecord::new(key, stats, measures, provenance))
    }

    /// Evaluate one unit, turning errors and panics into a `UnitFailure`.
    ///
    /// # Errors
    ///
    /// Returns the failure for the caller to record; never propagates.
    pub fn evaluate_isolated(&self, unit: &WorkUnit) -> std::result::Result<ResultRecord, UnitFailure> {
        let key = unit.key();
        let span = info_span!("unit", key = %key);
        let _guard = span.enter();

        let outcome = catch_unwind(AssertUnwindSafe(|| self.evaluate(unit)))
            .unwrap_or_else(|panic| Err(Error::Evaluation(panic_message(&*panic))));
        match outcome {
            Ok(record) => {
                debug!("unit evaluated");
                Ok(record)
            }
            Err(e) => {
                warn!(error = %e, "unit failed; it contributes no record");
                Err(UnitFailure {
                    key,
                    error: e.to_string(),
                })
            }
        }
    }

    /// Evaluate every unit line of a shard, writing data/header pairs to
    /// `output` and one JSON failure per line to `failures`. `cancel` is
    /// checked before each unit.
    ///
    /// # Errors
    ///
    /// Returns `Error::WireFormat` for a malformed unit line, `Error::Io`
    /// if reading or writing fails and `Error::Cancelled` once `cancel`
    /// fires; all abort the shard.
    pub fn evaluate_shard<R, W, F>(
        &self,
        input: R,
        output: &mut W,
        failures: &mut F,
        cancel: &CancellationToken,
    ) -> Result<ShardSummary>
    where
        R: BufRead,
        W: Write,
        F: Write,
    {
        let mut summary = ShardSummary::default();
        for line in input.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if cancel.is_cancelled() {
                info!(evaluated = summary.units, "shard cancelled");
                return Err(Error::Cancelled);
            }
            let unit = WorkUnit::from_line(&line)?;
            summary.units += 1;
            match self.evaluate_isolated(&unit) {
                Ok(record) => {
                    record.write_pair(output)?;
                    summary.records += 1;
                }
                Err(failure) => {
                    serde_json::to_writer(&mut *failures, &failure)?;
                    writeln!(failures)?;
                    summary.failures += 1;
                }
            }
        }
        output.flush()?;
        failures.flush()?;
        Ok(summary)
    }

    fn provenance(&self, test: &Instances, predictions: &[Prediction]) -> Option<Provenance> {
        if self.options.id_column.is_none() && !self.options.predictions {
            return None;
        }
        let target = test.target();
        let join = |items: Vec<String>| items.join(PROVENANCE_SEPARATOR);

        let instance_ids = self.options.id_column.map(|_| {
            join(
                test.rows()
                    .iter()
                    .map(|r| r.id.clone().unwrap_or_else(|| "?".to_string()))
                    .collect(),
            )
        });
        let (predicted, targets) = if self.options.predictions {
            #[allow(clippy::cast_precision_loss)]
            let predicted = predictions
                .iter()
                .map(|p| match p {
                    Prediction::Distribution(_) => p
                        .class_index()
                        .map_or_else(|| "?".to_string(), |c| target.format(c as f64)),
                    Prediction::Value(v) => target.format(*v),
                    Prediction::Missing => "?".to_string(),
                })
                .collect();
            let actual = test.rows().iter().map(|r| target.format(r.target)).collect();
            (Some(join(predicted)), Some(join(actual)))
        } else {
            (None, None)
        };

        Some(Provenance {
            instance_ids,
            predictions: predicted,
            targets,
        })
    }
}

impl ShardTask for UnitEvaluator {
    fn run(&self, shard: &ShardInput, cancel: &CancellationToken) -> Result<ShardSummary> {
        let input = BufReader::new(File::open(&shard.units)?);
        let mut output = BufWriter::new(File::create(&shard.results)?);
        let mut failures = BufWriter::new(File::create(&shard.failures)?);
        self.evaluate_shard(input, &mut output, &mut failures, cancel)
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn score(
    mode: EvaluationMode,
    train: &Instances,
    test: &Instances,
    predictions: &[Prediction],
    costs: &Costs,
) -> crate::stats::StatsBlock {
    match mode {
        EvaluationMode::Classification => {
            let mut eval = ClassificationEvaluation::new(
                train.num_classes(),
                train.rows().iter().map(|r| r.target as usize),
            );
            for (row, prediction) in test.rows().iter().zip(predictions) {
                eval.add(row.target as usize, prediction);
            }
            eval.finish(test.len(), costs)
        }
        EvaluationMode::Regression => {
            let mut eval = RegressionEvaluation::new(train.rows().iter().map(|r| r.target));
            for (row, prediction) in test.rows().iter().zip(predictions) {
                eval.add(row.target, prediction);
            }
            eval.finish(test.len(), costs)
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .map_or_else(|| "learner panicked".to_string(), |m| format!("learner panicked: {m}"))
}

/// Wall clock plus, where the platform exposes it, thread CPU time.
struct Stopwatch {
    wall: Instant,
    cpu: Option<Duration>,
}

impl Stopwatch {
    fn start() -> Self {
        Self {
            wall: Instant::now(),
            cpu: thread_cpu_time(),
        }
    }

    fn stop(self) -> (Duration, Option<Duration>) {
        let wall = self.wall.elapsed();
        let cpu = match (self.cpu, thread_cpu_time()) {
            (Some(start), Some(end)) => Some(end.saturating_sub(start)),
            _ => None,
        };
        (wall, cpu)
    }
}

/// On-CPU time of the calling thread (Linux `schedstat`, nanoseconds).
#[cfg(target_os = "linux")]
fn thread_cpu_time() -> Option<Duration> {
    let stat = std::fs::read_to_string("/proc/thread-self/schedstat").ok()?;
    let nanos = stat.split_whitespace().next()?.parse::<u64>().ok()?;
    Some(Duration::from_nanos(nanos))
}

#[cfg(not(target_os = "linux"))]
fn thread_cpu_time() -> Option<Duration> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{Learner, Model, ZeroR};
    use crate::config::TargetSelector;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_dataset(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("blobs.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "id,x,y,label").unwrap();
        for i in 0..20 {
            let (x, label) = if i % 2 == 0 { (f64::from(i), "lo") } else { (100.0 + f64::from(i), "hi") };
            writeln!(file, "r{i},{x},{},{label}", x * 0.5).unwrap();
        }
        path
    }

    fn unit(path: &Path, classifier: &str, fold: u32) -> WorkUnit {
        WorkUnit::new(
            classifier,
            1,
            path,
            fold,
            5,
            TargetSelector::Last,
            EvaluationMode::Classification,
            None,
        )
        .unwrap()
    }

    struct Exploding;

    impl Learner for Exploding {
        fn scheme(&self) -> &str {
            "exploding"
        }
        fn options(&self) -> Vec<String> {
            Vec::new()
        }
        fn version(&self) -> &str {
            "0"
        }
        fn fit(&self, _train: &Instances) -> Result<Box<dyn Model>> {
            panic!("boom");
        }
    }

    #[test]
    fn test_evaluate_knn_record() {
        let dir = TempDir::new().unwrap();
        let path = write_dataset(&dir);
        let evaluator = UnitEvaluator::new(
            ClassifierRegistry::with_builtins(),
            EvaluatorOptions::default(),
        );
        let record = evaluator.evaluate(&unit(&path, "knn -K 1", 2)).unwrap();

        assert_eq!(record.key().dataset, "blobs");
        assert_eq!(record.key().run, 1);
        assert_eq!(record.key().fold, 2);
        assert_eq!(record.key().scheme_options, "-K 1");
        assert_eq!(record.stats().get("Number_of_testing_instances"), Some(4.0));
        assert_eq!(record.stats().get("Number_of_training_instances"), Some(16.0));
        assert_eq!(record.stats().get("Percent_correct"), Some(100.0));
        assert_eq!(
            record.measures().keys().collect::<Vec<_>>(),
            vec!["measureNumTrainingInstances", "measureK"]
        );
        assert!(record.provenance().is_none());
    }

    #[test]
    fn test_measures_are_per_instance() {
        let dir = TempDir::new().unwrap();
        let path = write_dataset(&dir);
        let evaluator = UnitEvaluator::new(
            ClassifierRegistry::with_builtins(),
            EvaluatorOptions::default(),
        );
        let knn = evaluator.evaluate(&unit(&path, "knn", 0)).unwrap();
        let zero = evaluator.evaluate(&unit(&path, "zero_r", 0)).unwrap();
        assert_eq!(knn.measures().len(), 2);
        assert!(zero.measures().is_empty());
    }

    #[test]
    fn test_provenance_attached() {
        let dir = TempDir::new().unwrap();
        let path = write_dataset(&dir);
        let evaluator = UnitEvaluator::new(
            ClassifierRegistry::with_builtins(),
            EvaluatorOptions {
                id_column: Some(0),
                predictions: true,
            },
        );
        let record = evaluator.evaluate(&unit(&path, "zero_r", 1)).unwrap();
        let provenance = record.provenance().unwrap();
        let ids = provenance.instance_ids.as_deref().unwrap();
        assert_eq!(ids.split(';').count(), 4);
        assert!(ids.split(';').all(|id| id.starts_with('r')));
        assert_eq!(provenance.targets.as_deref().unwrap().split(';').count(), 4);
    }

    #[test]
    fn test_panicking_learner_is_isolated() {
        let dir = TempDir::new().unwrap();
        let path = write_dataset(&dir);
        let mut registry = ClassifierRegistry::with_builtins();
        registry.register(
            &["exploding"],
            Arc::new(|_: &[String]| -> Result<Box<dyn Learner>> { Ok(Box::new(Exploding)) }),
        );
        let evaluator = UnitEvaluator::new(registry, EvaluatorOptions::default());

        let failure = evaluator.evaluate_isolated(&unit(&path, "exploding", 0)).unwrap_err();
        assert!(failure.error.contains("boom"));
        assert_eq!(failure.key.classifier, "exploding");
    }

    #[test]
    fn test_evaluate_shard_pairs_and_failures() {
        let dir = TempDir::new().unwrap();
        let path = write_dataset(&dir);
        let evaluator = UnitEvaluator::new(
            ClassifierRegistry::with_builtins(),
            EvaluatorOptions::default(),
        );
        let input = format!(
            "{}\n{}\n",
            unit(&path, "knn", 0).to_line(),
            unit(&path, "no_such_scheme", 1).to_line()
        );
        let mut output = Vec::new();
        let mut failures = Vec::new();
        let summary = evaluator
            .evaluate_shard(input.as_bytes(), &mut output, &mut failures, &CancellationToken::new())
            .unwrap();

        assert_eq!(summary.units, 2);
        assert_eq!(summary.records, 1);
        assert_eq!(summary.failures, 1);
        assert_eq!(String::from_utf8(output).unwrap().lines().count(), 2);
        let failure: UnitFailure =
            serde_json::from_str(String::from_utf8(failures).unwrap().trim()).unwrap();
        assert_eq!(failure.key.fold, 1);
    }

    #[test]
    fn test_malformed_unit_line_aborts_shard() {
        let evaluator = UnitEvaluator::new(
            ClassifierRegistry::with_builtins(),
            EvaluatorOptions::default(),
        );
        let result = evaluator.evaluate_shard(
            "not a unit line\n".as_bytes(),
            &mut Vec::<u8>::new(),
            &mut Vec::<u8>::new(),
            &CancellationToken::new(),
        );
        assert!(matches!(result, Err(Error::WireFormat(_))));
    }

    #[test]
    fn test_cancelled_shard_stops_between_units() {
        let dir = TempDir::new().unwrap();
        let path = write_dataset(&dir);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let mut registry = ClassifierRegistry::with_builtins();
        registry.register(
            &["stop"],
            Arc::new(move |_: &[String]| -> Result<Box<dyn Learner>> {
                trigger.cancel();
                Ok(Box::new(ZeroR))
            }),
        );
        let evaluator = UnitEvaluator::new(registry, EvaluatorOptions::default());
        let input = format!(
            "{}\n{}\n",
            unit(&path, "stop", 0).to_line(),
            unit(&path, "zero_r", 1).to_line()
        );
        let mut output = Vec::new();
        let result = evaluator.evaluate_shard(input.as_bytes(), &mut output, &mut Vec::<u8>::new(), &cancel);

        assert!(matches!(result, Err(Error::Cancelled)));
        // The unit in flight when the token fired still completes.
        assert_eq!(String::from_utf8(output).unwrap().lines().count(), 2);
    }

    struct Wrapper {
        options: Vec<String>,
    }

    impl Learner for Wrapper {
        fn scheme(&self) -> &str {
            "wrapper"
        }
        fn options(&self) -> Vec<String> {
            self.options.clone()
        }
        fn version(&self) -> &str {
            "1"
        }
        fn fit(&self, train: &Instances) -> Result<Box<dyn Model>> {
            ZeroR.fit(train)
        }
    }

    #[test]
    fn test_scheme_options_keep_nested_quoting() {
        let dir = TempDir::new().unwrap();
        let path = write_dataset(&dir);
        let mut registry = ClassifierRegistry::with_builtins();
        registry.register(
            &["wrapper"],
            Arc::new(|opts: &[String]| -> Result<Box<dyn Learner>> {
                Ok(Box::new(Wrapper {
                    options: opts.to_vec(),
                }))
            }),
        );
        let evaluator = UnitEvaluator::new(registry, EvaluatorOptions::default());
        let record = evaluator
            .evaluate(&unit(&path, r#"wrapper -W "knn -K 2""#, 0))
            .unwrap();
        assert_eq!(record.key().scheme_options, r#"-W "knn -K 2""#);
    }

    #[test]
    fn test_regression_unit() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("line.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "x,y").unwrap();
        for i in 0..12 {
            writeln!(file, "{i},{}", 2 * i + 1).unwrap();
        }
        let evaluator = UnitEvaluator::new(
            ClassifierRegistry::with_builtins(),
            EvaluatorOptions::default(),
        );
        let u = WorkUnit::new(
            "knn -K 2",
            3,
            &path,
            0,
            3,
            TargetSelector::Last,
            EvaluationMode::Regression,
            None,
        )
        .unwrap();
        let record = evaluator.evaluate(&u).unwrap();
        assert_eq!(record.mode(), EvaluationMode::Regression);
        assert_eq!(record.stats().get("Number_of_testing_instances"), Some(4.0));
        assert!(record.stats().get("Mean_absolute_error").is_some());
    }
}
