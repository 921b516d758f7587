//! Work-Unit Generator
//!
//! Expands an `ExperimentSpec` into a flat, deterministic sequence of
//! `WorkUnit`s. Nesting order is dataset → repetition → classifier → fold;
//! shards are cut from this sequence, so the order decides which units share
//! a map task.

use crate::config::{ClusterConfig, ExperimentSpec};
use crate::dataset;
use crate::unit::WorkUnit;
use crate::{Error, Result};
use tracing::{debug, info};

/// Validate the spec against the filesystem and enumerate its work units.
///
/// # Errors
///
/// Returns `Error::DatasetNotFound` for a dataset reference that does not
/// resolve to a file, and `Error::InvalidConfig` if an explicit target or
/// identifier column lies outside a dataset's header. Nothing is dispatched
/// when this fails.
pub fn generate(spec: &ExperimentSpec, cluster: &ClusterConfig) -> Result<Vec<WorkUnit>> {
    for reference in spec.datasets() {
        validate_dataset(spec, cluster, reference)?;
    }

    let mut units = Vec::with_capacity(spec.unit_count());
    for reference in spec.datasets() {
        for repetition in 1..=spec.repetitions() {
            for classifier in spec.classifiers() {
                for fold in 0..spec.folds() {
                    units.push(WorkUnit::new(
                        classifier.as_str(),
                        repetition,
                        reference.as_path(),
                        fold,
                        spec.folds(),
                        spec.target(),
                        spec.mode(),
                        spec.cluster_config().map(std::path::Path::to_path_buf),
                    )?);
                }
            }
        }
    }

    info!(
        units = units.len(),
        datasets = spec.datasets().len(),
        classifiers = spec.classifiers().len(),
        runs = spec.repetitions(),
        folds = spec.folds(),
        "generated work units"
    );
    Ok(units)
}

fn validate_dataset(
    spec: &ExperimentSpec,
    cluster: &ClusterConfig,
    reference: &std::path::Path,
) -> Result<()> {
    let path = cluster.resolve_dataset(reference);
    if !path.is_file() {
        return Err(Error::DatasetNotFound(path));
    }

    let columns = dataset::peek_columns(&path)?;
    let target = spec
        .target()
        .resolve(columns.len())
        .map_err(|e| Error::InvalidConfig(format!("{}: {e}", path.display())))?;
    if let Some(id) = spec.id_column() {
        if id >= columns.len() {
            return Err(Error::InvalidConfig(format!(
                "{}: identifier column {} out of range ({} columns)",
                path.display(),
                id + 1,
                columns.len()
            )));
        }
        if id == target {
            return Err(Error::InvalidConfig(format!(
                "{}: identifier column {} is also the target column",
                path.display(),
                id + 1
            )));
        }
    }
    debug!(dataset = %path.display(), columns = columns.len(), "dataset validated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EvaluationMode, TargetSelector};
    use std::io::Write;
    use tempfile::TempDir;

    fn write_csv(dir: &TempDir, name: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "a,b,class").unwrap();
        writeln!(file, "1.0,2.0,x").unwrap();
        writeln!(file, "3.0,4.0,y").unwrap();
        path
    }

    #[test]
    fn test_unit_count_and_nesting_order() {
        let dir = TempDir::new().unwrap();
        let d1 = write_csv(&dir, "d1.csv");
        let d2 = write_csv(&dir, "d2.csv");
        let spec = ExperimentSpec::builder()
            .classifiers(["zero_r", "knn"])
            .datasets([d1.clone(), d2.clone()])
            .repetitions(2)
            .folds(3)
            .build()
            .unwrap();

        let units = generate(&spec, &ClusterConfig::default()).unwrap();
        assert_eq!(units.len(), 2 * 2 * 2 * 3);

        // dataset outermost, fold innermost
        assert_eq!(units[0].dataset(), d1.as_path());
        assert_eq!(units[0].repetition(), 1);
        assert_eq!(units[0].classifier(), "zero_r");
        assert_eq!(units[0].fold(), 0);
        assert_eq!(units[1].fold(), 1);
        assert_eq!(units[3].classifier(), "knn");
        assert_eq!(units[6].repetition(), 2);
        assert_eq!(units[12].dataset(), d2.as_path());
    }

    #[test]
    fn test_missing_dataset_is_fatal() {
        let spec = ExperimentSpec::builder()
            .classifier("zero_r")
            .dataset("/definitely/not/here.csv")
            .build()
            .unwrap();
        let err = generate(&spec, &ClusterConfig::default()).unwrap_err();
        assert!(matches!(err, Error::DatasetNotFound(_)));
    }

    #[test]
    fn test_target_index_out_of_range_is_fatal() {
        let dir = TempDir::new().unwrap();
        let d1 = write_csv(&dir, "d1.csv");
        let spec = ExperimentSpec::builder()
            .classifier("zero_r")
            .dataset(d1)
            .target(TargetSelector::Index(7))
            .build()
            .unwrap();
        let err = generate(&spec, &ClusterConfig::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_id_column_cannot_be_target() {
        let dir = TempDir::new().unwrap();
        let d1 = write_csv(&dir, "d1.csv");
        let spec = ExperimentSpec::builder()
            .classifier("zero_r")
            .dataset(d1)
            .id_column(Some(2))
            .build()
            .unwrap();
        assert!(generate(&spec, &ClusterConfig::default()).is_err());
    }

    #[test]
    fn test_relative_dataset_resolved_against_data_root() {
        let dir = TempDir::new().unwrap();
        write_csv(&dir, "d1.csv");
        let cluster = ClusterConfig {
            data_root: Some(dir.path().to_path_buf()),
            ..ClusterConfig::default()
        };
        let spec = ExperimentSpec::builder()
            .classifier("zero_r")
            .dataset("d1.csv")
            .mode(EvaluationMode::Classification)
            .folds(2)
            .build()
            .unwrap();
        let units = generate(&spec, &cluster).unwrap();
        assert_eq!(units.len(), 2);
        // reference is kept as given; workers resolve it
        assert_eq!(units[0].dataset(), std::path::Path::new("d1.csv"));
    }

    #[test]
    fn test_generation_is_deterministic() {
        let dir = TempDir::new().unwrap();
        let d1 = write_csv(&dir, "d1.csv");
        let spec = ExperimentSpec::builder()
            .classifiers(["zero_r", "knn -K 2"])
            .dataset(d1)
            .repetitions(3)
            .folds(4)
            .build()
            .unwrap();
        let a = generate(&spec, &ClusterConfig::default()).unwrap();
        let b = generate(&spec, &ClusterConfig::default()).unwrap();
        assert_eq!(a, b);
    }
}
