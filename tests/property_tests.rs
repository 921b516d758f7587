//! Property-based tests for trueno-xval
//!
//! - Generator: unit count and determinism
//! - Planner: shard size bounds and exact division
//! - Split: k-fold coverage and disjointness, independent of fold index
//! - Reconciler: first-seen column order and rectangular rows

use proptest::prelude::*;
use std::collections::HashSet;
use std::io::Write;
use tempfile::TempDir;
use trueno_xval::config::{ClusterConfig, EvaluationMode, ExperimentSpec};
use trueno_xval::dataset::{Attribute, Instance, Instances};
use trueno_xval::generator::generate;
use trueno_xval::planner::{shard_size, ShardPlan, MAX_SHARD_SIZE};
use trueno_xval::reconcile::reconcile;
use trueno_xval::record::{KeyBlock, Measures, ResultRecord};
use trueno_xval::split::FoldPartition;
use trueno_xval::stats::{columns, StatsBlock};

// ============================================================================
// Strategies
// ============================================================================

/// Instances with a nominal target of `classes` values.
fn arb_instances() -> impl Strategy<Value = Instances> {
    (1usize..5, 1usize..80).prop_flat_map(|(classes, rows)| {
        prop::collection::vec(0..classes, rows).prop_map(move |labels| {
            let target = Attribute::Nominal {
                name: "class".to_string(),
                values: (0..classes).map(|c| format!("c{c}")).collect(),
            };
            let rows = labels
                .into_iter()
                .enumerate()
                .map(|(i, c)| Instance {
                    features: vec![i as f64],
                    target: c as f64,
                    id: None,
                })
                .collect();
            Instances::new(
                "p",
                vec![Attribute::Numeric {
                    name: "x".to_string(),
                }],
                target,
                rows,
            )
        })
    })
}

fn record(measures: &[String]) -> ResultRecord {
    let mode = EvaluationMode::Classification;
    let values: Measures = measures.iter().map(|m| (m.clone(), Some(1.0))).collect();
    ResultRecord::new(
        KeyBlock {
            dataset: "d".to_string(),
            run: 1,
            fold: 0,
            scheme: "s".to_string(),
            scheme_options: String::new(),
            scheme_version: "1".to_string(),
            timestamp: "t".to_string(),
        },
        StatsBlock::from_values(mode, vec![None; columns(mode).len()]).unwrap(),
        values,
        None,
    )
}

// ============================================================================
// Planner
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_shard_size_divides_and_is_bounded(n in 1usize..5000) {
        let s = shard_size(n);
        prop_assert!((1..=MAX_SHARD_SIZE).contains(&s));
        prop_assert_eq!(n % s, 0);
        // nothing larger within the bound divides n
        prop_assert!((s + 1..=MAX_SHARD_SIZE).all(|t| n % t != 0));
    }
}

#[test]
fn test_shard_size_examples() {
    assert_eq!(shard_size(90), 30);
    assert_eq!(shard_size(97), 1);
    assert_eq!(shard_size(100), 25);
    assert_eq!(shard_size(7), 7);
}

// ============================================================================
// Split
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_folds_partition_the_dataset(
        instances in arb_instances(),
        repetition in 1u32..50,
        folds in 1u32..12,
    ) {
        let partition = FoldPartition::new(&instances, repetition, folds).unwrap();
        let mut seen = HashSet::new();
        for fold in 0..folds as usize {
            for row in partition.test_indices(fold) {
                prop_assert!(seen.insert(row), "row {} in two test folds", row);
            }
            let test: HashSet<usize> = partition.test_indices(fold).into_iter().collect();
            prop_assert!(partition.train_indices(fold).iter().all(|r| !test.contains(r)));
        }
        prop_assert_eq!(seen.len(), instances.len());
    }

    #[test]
    fn prop_partition_depends_only_on_repetition(
        instances in arb_instances(),
        repetition in 1u32..50,
    ) {
        let a = FoldPartition::new(&instances, repetition, 5).unwrap();
        let b = FoldPartition::new(&instances, repetition, 5).unwrap();
        prop_assert_eq!(a.order(), b.order());
    }

    #[test]
    fn prop_stratified_folds_balance_classes(instances in arb_instances(), folds in 2u32..6) {
        let partition = FoldPartition::new(&instances, 1, folds).unwrap();
        let classes = instances.num_classes();
        let per_fold: Vec<Vec<usize>> = (0..folds as usize)
            .map(|fold| {
                let mut counts = vec![0usize; classes];
                for row in partition.test_indices(fold) {
                    let c = instances.rows()[row].target as usize;
                    counts[c] += 1;
                }
                counts
            })
            .collect();
        // Class counts differ by at most 2 between any two folds.
        for c in 0..classes {
            let min = per_fold.iter().map(|f| f[c]).min().unwrap_or(0);
            let max = per_fold.iter().map(|f| f[c]).max().unwrap_or(0);
            prop_assert!(max - min <= 2, "class {} spread {}..{}", c, min, max);
        }
    }
}

// ============================================================================
// Reconciler
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_schema_is_first_seen_union(
        sets in prop::collection::vec(prop::collection::vec(0usize..8, 0..5), 1..10)
    ) {
        let names: Vec<Vec<String>> = sets
            .iter()
            .map(|s| {
                let mut unique = Vec::new();
                for i in s {
                    let name = format!("m{i}");
                    if !unique.contains(&name) {
                        unique.push(name);
                    }
                }
                unique
            })
            .collect();
        let records: Vec<ResultRecord> = names.iter().map(|n| record(n)).collect();
        let table = reconcile(&records).unwrap();

        let mut expected: Vec<String> = Vec::new();
        for n in names.iter().flatten() {
            if !expected.contains(n) {
                expected.push(n.clone());
            }
        }
        prop_assert_eq!(table.schema().measures(), expected.as_slice());

        let fixed = table.schema().fixed_width();
        for (row, present) in table.rows().iter().zip(&names) {
            for (j, name) in expected.iter().enumerate() {
                prop_assert_eq!(row[fixed + j].is_missing(), !present.contains(name));
            }
        }
    }
}

// ============================================================================
// Generator
// ============================================================================

fn write_dataset(dir: &TempDir, name: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "a,class").unwrap();
    writeln!(file, "1,x").unwrap();
    writeln!(file, "2,y").unwrap();
    path
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(25))]

    #[test]
    fn prop_generator_count_and_determinism(
        classifiers in 1usize..4,
        datasets in 1usize..3,
        runs in 1u32..4,
        folds in 1u32..6,
    ) {
        let dir = TempDir::new().unwrap();
        let spec = ExperimentSpec::builder()
            .classifiers((0..classifiers).map(|i| format!("knn -K {}", i + 1)))
            .datasets((0..datasets).map(|i| write_dataset(&dir, &format!("d{i}.csv"))))
            .repetitions(runs)
            .folds(folds)
            .build()
            .unwrap();
        let cluster = ClusterConfig::default();

        let first = generate(&spec, &cluster).unwrap();
        let second = generate(&spec, &cluster).unwrap();
        prop_assert_eq!(first.len(), classifiers * datasets * runs as usize * folds as usize);
        prop_assert_eq!(&first, &second);

        let plan = ShardPlan::new(&first);
        prop_assert_eq!(plan.len() * plan.shard_size(), first.len());
    }
}
