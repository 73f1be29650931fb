use crate::config::Config;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use walkdir::WalkDir;

fn spinner(visible: bool, message: &'static str) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.green} {msg} {pos}") {
        spinner.set_style(style);
    }
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Regular files under `config.original_dir`; symlinks are left out and the
/// suffix filter applies.
pub fn collect_originals(config: &Config) -> Vec<PathBuf> {
    let spinner = spinner(config.progress, "Caching original files");
    let mut files = Vec::new();
    for entry in WalkDir::new(&config.original_dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        spinner.inc(1);
        if !entry.file_type().is_file() {
            continue;
        }
        if config.accepts_suffix(entry.path()) {
            files.push(entry.into_path());
        }
    }
    spinner.finish_and_clear();
    files
}

/// Every non-directory entry under `work_dir`, in traversal order. Symlinks
/// are kept here and rejected per file, so the resume offset counts them.
pub fn collect_work_files(work_dir: &Path, visible: bool) -> Vec<PathBuf> {
    let spinner = spinner(visible, "Caching working files");
    let files: Vec<PathBuf> = WalkDir::new(work_dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|entry| !entry.file_type().is_dir())
        .inspect(|_| spinner.inc(1))
        .map(|entry| entry.into_path())
        .collect();
    spinner.finish_and_clear();
    files
}
