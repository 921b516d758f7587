//! Result Collector
//!
//! Reads every completed shard's result part back into `ResultRecord`s, in
//! the order the shards completed, together with the failed units recorded
//! beside them.

use crate::evaluator::UnitFailure;
use crate::record::{read_pairs, ResultRecord};
use crate::workspace::JobWorkspace;
use crate::{Error, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::debug;

/// Everything the map phase produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Collected {
    /// Records in shard completion order, then within-shard order.
    pub records: Vec<ResultRecord>,
    /// Units that produced no record.
    pub failures: Vec<UnitFailure>,
}

/// Collect results from a mapped workspace.
///
/// # Errors
///
/// Returns `Error::Workspace` if a listed result part is missing, and
/// `Error::WireFormat` if one is malformed.
pub fn collect(workspace: &JobWorkspace) -> Result<Collected> {
    let mut collected = Collected::default();
    for shard in workspace.completed_shards()? {
        if !shard.results.is_file() {
            return Err(Error::Workspace(format!(
                "result part {} is missing",
                shard.results.display()
            )));
        }
        let records = read_pairs(BufReader::new(File::open(&shard.results)?))?;
        debug!(shard = shard.index, records = records.len(), "collected part");
        collected.records.extend(records);
        if shard.failures.is_file() {
            collected.failures.extend(read_failures(&shard.failures)?);
        }
    }
    Ok(collected)
}

fn read_failures(path: &Path) -> Result<Vec<UnitFailure>> {
    BufReader::new(File::open(path)?)
        .lines()
        .filter(|line| !matches!(line, Ok(l) if l.trim().is_empty()))
        .map(|line| Ok(serde_json::from_str(&line?)?))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvaluationMode;
    use crate::evaluator::ShardSummary;
    use crate::planner::ShardPlan;
    use crate::record::KeyBlock;
    use crate::stats::{columns, StatsBlock};
    use crate::substrate::ShardOutput;
    use crate::unit::UnitKey;
    use std::io::Write;
    use tempfile::TempDir;

    fn record(fold: u32) -> ResultRecord {
        let stats = StatsBlock::from_values(
            EvaluationMode::Regression,
            vec![Some(1.0); columns(EvaluationMode::Regression).len()],
        )
        .unwrap();
        ResultRecord::new(
            KeyBlock {
                dataset: "d".to_string(),
                run: 1,
                fold,
                scheme: "zero_r".to_string(),
                scheme_options: String::new(),
                scheme_version: "1".to_string(),
                timestamp: "t".to_string(),
            },
            stats,
            Default::default(),
            None,
        )
    }

    #[test]
    fn test_collects_in_completion_order() {
        let dir = TempDir::new().unwrap();
        let mut ws = JobWorkspace::create(dir.path(), "job").unwrap();
        let inputs = ws.write_shards(&ShardPlan::new(&[])).unwrap();
        assert!(inputs.is_empty());

        // Two hand-made shards completed in reverse order.
        let shards: Vec<_> = (0..2)
            .map(|i| crate::substrate::ShardInput {
                index: i,
                units: ws.root().join(format!("units/shard-{i:05}.tsv")),
                results: ws.root().join(format!("results/part-{i:05}.tsv")),
                failures: ws.root().join(format!("failures/part-{i:05}.jsonl")),
            })
            .collect();
        for (i, shard) in shards.iter().enumerate() {
            let mut out = File::create(&shard.results).unwrap();
            record(u32::try_from(i).unwrap()).write_pair(&mut out).unwrap();
        }
        let mut failures = File::create(&shards[1].failures).unwrap();
        let failure = UnitFailure {
            key: UnitKey {
                dataset: "d".to_string(),
                repetition: 1,
                fold: 9,
                classifier: "bad".to_string(),
            },
            error: "boom".to_string(),
        };
        writeln!(failures, "{}", serde_json::to_string(&failure).unwrap()).unwrap();

        let outputs: Vec<ShardOutput> = shards
            .iter()
            .rev()
            .map(|input| ShardOutput {
                input: input.clone(),
                summary: ShardSummary::default(),
            })
            .collect();
        ws.mark_mapped(&outputs).unwrap();

        let collected = collect(&ws).unwrap();
        let folds: Vec<u32> = collected.records.iter().map(|r| r.key().fold).collect();
        assert_eq!(folds, vec![1, 0]);
        assert_eq!(collected.failures, vec![failure]);
    }

    #[test]
    fn test_missing_part_is_an_error() {
        let dir = TempDir::new().unwrap();
        let mut ws = JobWorkspace::create(dir.path(), "job").unwrap();
        let output = ShardOutput {
            input: crate::substrate::ShardInput {
                index: 0,
                units: ws.root().join("units/shard-00000.tsv"),
                results: ws.root().join("results/part-00000.tsv"),
                failures: ws.root().join("failures/part-00000.jsonl"),
            },
            summary: ShardSummary::default(),
        };
        ws.mark_mapped(&[output]).unwrap();
        assert!(matches!(collect(&ws), Err(Error::Workspace(_))));
    }
}
