//! Job Workspace
//!
//! Every job owns one directory under the cluster `work_dir`:
//!
//! ```text
//! <work_dir>/<job_name>/
//!   units/shard-00000.tsv      unit lines, one shard per file
//!   results/part-00000.tsv     data/header line pairs
//!   failures/part-00000.jsonl  one failed unit per line
//!   _MAPPED                    shard indices in completion order
//! ```
//!
//! `_MAPPED` is written only once every shard has completed. Until then the
//! workspace deletes itself when dropped, so an aborted job leaves nothing
//! behind. Once mapped, the directory survives a failed finalization and can
//! be finalized again later.

use crate::planner::ShardPlan;
use crate::substrate::{ShardInput, ShardOutput};
use crate::{Error, Result};
use std::fmt::Write as _;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Manifest written when the map phase completes
pub const MAPPED_MARKER: &str = "_MAPPED";

const UNITS_DIR: &str = "units";
const RESULTS_DIR: &str = "results";
const FAILURES_DIR: &str = "failures";

/// Job name derived from the current time and process id.
#[must_use]
pub fn default_job_name() -> String {
    format!(
        "xval-{}-{}",
        chrono::Utc::now().format("%Y%m%dT%H%M%S%3f"),
        std::process::id()
    )
}

/// Directory owned by one job.
#[derive(Debug)]
pub struct JobWorkspace {
    root: PathBuf,
    mapped: bool,
    /// Delete the directory on drop.
    armed: bool,
}

impl JobWorkspace {
    /// Create `<work_dir>/<job_name>` and its subdirectories.
    ///
    /// # Errors
    ///
    /// Returns `Error::Workspace` if the directory already exists or cannot
    /// be created.
    pub fn create(work_dir: &Path, job_name: &str) -> Result<Self> {
        if job_name.is_empty() || job_name.contains(['/', '\\']) || job_name == ".." {
            return Err(Error::Workspace(format!("invalid job name '{job_name}'")));
        }
        fs::create_dir_all(work_dir).map_err(|e| {
            Error::Workspace(format!("cannot create {}: {e}", work_dir.display()))
        })?;
        let root = work_dir.join(job_name);
        fs::create_dir(&root).map_err(|e| {
            Error::Workspace(format!(
                "cannot create job directory {}: {e}",
                root.display()
            ))
        })?;
        // Armed from here on: a partial layout is removed on drop.
        let workspace = Self {
            root,
            mapped: false,
            armed: true,
        };
        for dir in [UNITS_DIR, RESULTS_DIR, FAILURES_DIR] {
            fs::create_dir(workspace.root.join(dir))?;
        }
        info!(dir = %workspace.root.display(), "job workspace created");
        Ok(workspace)
    }

    /// Open an existing, mapped workspace for finalization.
    ///
    /// # Errors
    ///
    /// Returns `Error::Workspace` if the directory or its `_MAPPED` manifest
    /// is missing.
    pub fn open(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            return Err(Error::Workspace(format!(
                "no job directory at {}",
                root.display()
            )));
        }
        if !root.join(MAPPED_MARKER).is_file() {
            return Err(Error::Workspace(format!(
                "{} has no {MAPPED_MARKER} manifest; the job never completed its map phase",
                root.display()
            )));
        }
        Ok(Self {
            root: root.to_path_buf(),
            mapped: true,
            armed: false,
        })
    }

    /// Job directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// True once the map phase has completed.
    #[must_use]
    pub const fn is_mapped(&self) -> bool {
        self.mapped
    }

    fn shard_input(&self, index: usize) -> ShardInput {
        ShardInput {
            index,
            units: self.root.join(UNITS_DIR).join(format!("shard-{index:05}.tsv")),
            results: self.root.join(RESULTS_DIR).join(format!("part-{index:05}.tsv")),
            failures: self.root.join(FAILURES_DIR).join(format!("part-{index:05}.jsonl")),
        }
    }

    /// Write one unit file per shard.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if a file cannot be written.
    pub fn write_shards(&self, plan: &ShardPlan) -> Result<Vec<ShardInput>> {
        plan.shards()
            .iter()
            .enumerate()
            .map(|(index, units)| {
                let input = self.shard_input(index);
                let mut out = BufWriter::new(fs::File::create(&input.units)?);
                for unit in units {
                    writeln!(out, "{}", unit.to_line())?;
                }
                out.flush()?;
                Ok(input)
            })
            .collect()
    }

    /// Record the completed shards, in completion order, and disarm the
    /// drop guard.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the manifest cannot be written.
    pub fn mark_mapped(&mut self, outputs: &[ShardOutput]) -> Result<()> {
        let mut manifest = String::new();
        for output in outputs {
            let _ = writeln!(manifest, "{}", output.input.index);
        }
        let staging = self.root.join(format!("{MAPPED_MARKER}.tmp"));
        fs::write(&staging, manifest)?;
        fs::rename(&staging, self.root.join(MAPPED_MARKER))?;
        self.mapped = true;
        self.armed = false;
        debug!(shards = outputs.len(), "map phase recorded");
        Ok(())
    }

    /// Shards listed in the manifest, in completion order.
    ///
    /// # Errors
    ///
    /// Returns `Error::Workspace` if the workspace is not mapped or the
    /// manifest is corrupt.
    pub fn completed_shards(&self) -> Result<Vec<ShardInput>> {
        if !self.mapped {
            return Err(Error::Workspace("map phase has not completed".to_string()));
        }
        let text = fs::read_to_string(self.root.join(MAPPED_MARKER))?;
        text.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| {
                l.trim()
                    .parse::<usize>()
                    .map(|index| self.shard_input(index))
                    .map_err(|_| Error::Workspace(format!("corrupt manifest line '{l}'")))
            })
            .collect()
    }

    /// Delete the job directory.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if removal fails.
    pub fn remove(mut self) -> Result<()> {
        self.armed = false;
        fs::remove_dir_all(&self.root)?;
        debug!(dir = %self.root.display(), "job workspace removed");
        Ok(())
    }
}

impl Drop for JobWorkspace {
    fn drop(&mut self) {
        if self.armed {
            match fs::remove_dir_all(&self.root) {
                Ok(()) => info!(dir = %self.root.display(), "discarded unfinished job workspace"),
                Err(e) => warn!(dir = %self.root.display(), error = %e, "cannot discard job workspace"),
            }
        }
    }
}
