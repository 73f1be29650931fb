use crate::key::KeyBuilder;
use std::collections::HashMap;
use std::path::PathBuf;

/// Originals grouped by normalized key. Built once per run and only read
/// afterwards.
#[derive(Debug, Default)]
pub struct CandidateIndex {
    buckets: HashMap<String, Vec<PathBuf>>,
}

impl CandidateIndex {
    pub fn build(originals: &[PathBuf], keys: &KeyBuilder) -> Self {
        let mut buckets: HashMap<String, Vec<PathBuf>> = HashMap::new();
        for path in originals {
            let bucket = buckets.entry(keys.original_key(path)).or_default();
            if !bucket.contains(path) {
                bucket.push(path.clone());
            }
        }
        Self { buckets }
    }

    /// Originals sharing `key`, in the order they were discovered.
    pub fn lookup(&self, key: &str) -> &[PathBuf] {
        self.buckets.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn key_count(&self) -> usize {
        self.buckets.len()
    }
}
