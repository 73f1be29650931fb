use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Running totals of one run. Counters only grow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    /// Pairs whose remediation went ahead (or would have).
    pub affected_count: usize,
    /// Bytes of the affected files.
    pub size_affected: u64,
    pub warning_count: usize,
    /// Work files already bearing the rename marker.
    pub ignored_count: usize,
    /// Work files given up after errors.
    pub failed: Vec<PathBuf>,
    /// Unmatched work files that had several candidates.
    pub having_multiple_candidates: BTreeMap<PathBuf, Vec<PathBuf>>,
}

impl RunStats {
    pub fn record_affected(&mut self, size: u64) {
        self.affected_count += 1;
        self.size_affected += size;
    }

    pub fn ambiguous_count(&self) -> usize {
        self.having_multiple_candidates.len()
    }
}
