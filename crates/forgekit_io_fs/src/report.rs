//! Copy work result and its mutable builder.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::spec::SpecCopyError;

/// Outcome of one copy execution.
#[derive(Debug, Default, Clone)]
pub struct WorkResult {
    /// Whether any destination file was created or overwritten.
    pub did_work: bool,
    /// Destination files created or overwritten, in plan order.
    pub paths_touched: Vec<PathBuf>,
    /// Destination files a dry run would have written.
    pub paths_pending: Vec<PathBuf>,
    /// Number of entries in the merged copy plan.
    pub cnt_planned: u64,
    /// Number of destination files written.
    pub cnt_written: u64,
    /// Number of entries whose destination already held identical content.
    pub cnt_unchanged: u64,
    /// Number of entries skipped by dry-run.
    pub cnt_skipped: u64,
    /// Non-fatal warnings collected during planning/copy.
    pub warnings: Vec<String>,
    /// Per-entry failures.
    pub errors: Vec<SpecCopyError>,
}

impl WorkResult {
    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    pub fn warning_count(&self) -> usize {
        self.warnings.len()
    }

    /// Machine-readable counters.
    pub fn to_dict(&self) -> BTreeMap<String, u64> {
        let mut dict_counts = BTreeMap::new();
        dict_counts.insert("cnt_planned".to_string(), self.cnt_planned);
        dict_counts.insert("cnt_written".to_string(), self.cnt_written);
        dict_counts.insert("cnt_unchanged".to_string(), self.cnt_unchanged);
        dict_counts.insert("cnt_skipped".to_string(), self.cnt_skipped);
        dict_counts.insert("cnt_errors".to_string(), self.error_count() as u64);
        dict_counts.insert("cnt_warnings".to_string(), self.warning_count() as u64);
        dict_counts
    }

    /// Human-readable one-line summary.
    pub fn format(&self, prefix: &str) -> String {
        let dict_counts = self.to_dict();
        format!(
            "{prefix} did_work={} planned={} written={} unchanged={} skipped={} errors={} warnings={}",
            self.did_work,
            dict_counts["cnt_planned"],
            dict_counts["cnt_written"],
            dict_counts["cnt_unchanged"],
            dict_counts["cnt_skipped"],
            dict_counts["cnt_errors"],
            dict_counts["cnt_warnings"]
        )
    }
}

impl fmt::Display for WorkResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format("[COPY]"))
    }
}

/// Mutable accumulator for a copy run.
#[derive(Debug, Default, Clone)]
pub struct WorkResultBuilder {
    paths_touched: Vec<PathBuf>,
    paths_pending: Vec<PathBuf>,
    cnt_planned: u64,
    cnt_unchanged: u64,
    cnt_skipped: u64,
    warnings: Vec<String>,
    errors: Vec<SpecCopyError>,
}

impl WorkResultBuilder {
    pub fn add_planned(&mut self, n_entries: u64) {
        self.cnt_planned += n_entries;
    }

    /// Record a destination file that was created or overwritten.
    pub fn add_written(&mut self, path: PathBuf) {
        self.paths_touched.push(path);
    }

    pub fn add_unchanged(&mut self) {
        self.cnt_unchanged += 1;
    }

    /// Record a write suppressed by dry-run.
    pub fn add_skipped(&mut self, path: PathBuf) {
        self.cnt_skipped += 1;
        self.paths_pending.push(path);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn add_error(&mut self, path: PathBuf, exception: String) {
        self.errors.push(SpecCopyError { path, exception });
    }

    pub fn build(self) -> WorkResult {
        WorkResult {
            did_work: !self.paths_touched.is_empty(),
            cnt_written: self.paths_touched.len() as u64,
            paths_touched: self.paths_touched,
            paths_pending: self.paths_pending,
            cnt_planned: self.cnt_planned,
            cnt_unchanged: self.cnt_unchanged,
            cnt_skipped: self.cnt_skipped,
            warnings: self.warnings,
            errors: self.errors,
        }
    }
}
