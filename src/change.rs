use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub path: PathBuf,
    pub notes: Vec<String>,
}

/// Annotations made for one compared pair. The first entry is the work file,
/// the second (if any) the file it was paired with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    entries: Vec<ChangeEntry>,
}

impl Change {
    pub fn new(work_file: &Path, other_file: Option<&Path>) -> Self {
        let entries = std::iter::once(work_file)
            .chain(other_file)
            .map(|path| ChangeEntry {
                path: path.to_path_buf(),
                notes: Vec::new(),
            })
            .collect();
        Self { entries }
    }

    /// Append a note to `path`, which must be one of the pair.
    pub fn note(&mut self, path: &Path, text: impl Into<String>) {
        match self.entries.iter_mut().find(|e| e.path == path) {
            Some(entry) => entry.notes.push(text.into()),
            None => log::error!("{} is not part of this change", path.display()),
        }
    }

    pub fn notes(&self, path: &Path) -> &[String] {
        self.entries
            .iter()
            .find(|e| e.path == path)
            .map(|e| e.notes.as_slice())
            .unwrap_or(&[])
    }

    pub fn work_file(&self) -> &Path {
        &self.entries[0].path
    }

    pub fn other_file(&self) -> Option<&Path> {
        self.entries.get(1).map(|e| e.path.as_path())
    }

    pub fn entries(&self) -> &[ChangeEntry] {
        &self.entries
    }
}
