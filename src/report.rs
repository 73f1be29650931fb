use crate::change::Change;
use crate::stats::RunStats;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Component, Path, PathBuf};

const WORK_ICON: &str = "🔨";
const ORIGINAL_ICON: &str = "📄";

/// Decimal, human readable size: `77.5 kB`.
pub fn natural_size(bytes: u64) -> String {
    const BASE: f64 = 1000.0;
    const UNITS: [&str; 8] = ["kB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"];
    match bytes {
        1 => "1 Byte".to_string(),
        b if b < 1000 => format!("{b} Bytes"),
        b => {
            let b = b as f64;
            let mut unit = BASE * BASE;
            for suffix in UNITS {
                if b < unit {
                    return format!("{:.1} {suffix}", BASE * b / unit);
                }
                unit *= BASE;
            }
            format!("{:.1} {}", BASE * b / (unit / BASE), UNITS[UNITS.len() - 1])
        }
    }
}

/// Rough human readable span: `29 seconds`, `an hour`, `3 days`.
pub fn natural_delta(seconds: f64) -> String {
    let secs = seconds.abs().floor() as u64;
    let minutes = secs / 60;
    let hours = secs / 3600;
    let days = secs / 86_400;
    match secs {
        0 => "a moment".to_string(),
        1 => "a second".to_string(),
        2..60 => format!("{secs} seconds"),
        60..120 => "a minute".to_string(),
        120..3600 => format!("{minutes} minutes"),
        3600..7200 => "an hour".to_string(),
        7200..86_400 => format!("{hours} hours"),
        _ => match days {
            1 => "a day".to_string(),
            2..30 => format!("{days} days"),
            30..60 => "a month".to_string(),
            60..365 => format!("{} months", days / 30),
            365..730 => "a year".to_string(),
            _ => format!("{} years", days / 365),
        },
    }
}

/// Short names of the two roots, used to tell the pair members apart.
#[derive(Debug, Clone)]
pub struct DirLabels {
    work: String,
    original: String,
    same_superdir: bool,
}

impl DirLabels {
    /// The labels are the first path components in which the roots differ,
    /// e.g. `disk1` and `disk2` for `/media/disk1/Photos` and
    /// `/media/disk2/Photos`.
    pub fn new(work_dir: &Path, original_dir: &Path) -> Self {
        let mut last = String::new();
        for (a, b) in work_dir.components().zip(original_dir.components()) {
            if a != b {
                return Self {
                    work: component_str(a),
                    original: component_str(b),
                    same_superdir: false,
                };
            }
            last = component_str(a);
        }
        Self {
            work: last.clone(),
            original: last,
            same_superdir: true,
        }
    }

    pub fn work(&self) -> &str {
        &self.work
    }

    pub fn original(&self) -> &str {
        &self.original
    }

    /// Labels for the two members of `change`. Inside a single root the
    /// differing part of the parents (or the file names) is more telling.
    fn for_change(&self, work_file: &Path, other_file: &Path) -> (String, String) {
        if !self.same_superdir {
            return (self.work.clone(), self.original.clone());
        }
        if work_file.file_name() == other_file.file_name() {
            let w = work_file.to_string_lossy();
            let o = other_file.to_string_lossy();
            let common = common_prefix_len(&w, &o);
            let rest = |p: &Path| {
                let parent = p.parent().map(|p| p.to_string_lossy().into_owned()).unwrap_or_default();
                match parent.get(common..) {
                    Some(s) if !s.is_empty() => s.to_string(),
                    _ => "(basedir)".to_string(),
                }
            };
            (rest(work_file), rest(other_file))
        } else {
            (file_name(work_file), file_name(other_file))
        }
    }
}

fn component_str(c: Component<'_>) -> String {
    c.as_os_str().to_string_lossy().into_owned()
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Byte length of the common prefix, on a char boundary.
fn common_prefix_len(a: &str, b: &str) -> usize {
    a.char_indices()
        .zip(b.chars())
        .find(|((_, ca), cb)| ca != cb)
        .map(|((i, _), _)| i)
        .unwrap_or_else(|| a.len().min(b.len()))
}

/// Multi-line rendering of a change, for the console and the report file.
pub fn format_change(change: &Change, labels: &DirLabels) -> String {
    let work_file = change.work_file();
    let mut out = format!("* {}\n", work_file.display());
    let (wn, on) = match change.other_file() {
        Some(other) => {
            out.push_str(&format!("  {}\n", other.display()));
            labels.for_change(work_file, other)
        }
        None => (labels.work.clone(), String::new()),
    };
    for (entry, (icon, name)) in change
        .entries()
        .iter()
        .zip([(WORK_ICON, wn), (ORIGINAL_ICON, on)])
    {
        if !entry.notes.is_empty() {
            out.push_str(&format!("  {icon}{name}: {}\n", entry.notes.join(" ")));
        }
    }
    out
}

/// Totals printed at the end of a run.
pub fn format_summary(stats: &RunStats, execute: bool, originals: usize) -> String {
    let mut out = format!(
        "{}: {}/{}",
        if execute { "Affected" } else { "Affectable" },
        stats.affected_count,
        originals.saturating_sub(stats.ignored_count)
    );
    if stats.ignored_count > 0 {
        out.push_str(&format!(" ({} ignored)", stats.ignored_count));
    }
    out.push_str(&format!("\nAffected size: {}", natural_size(stats.size_affected)));
    if stats.warning_count > 0 {
        out.push_str(&format!("\nWarnings: {}", stats.warning_count));
    }
    if stats.ambiguous_count() > 0 {
        out.push_str(&format!(
            "\nUnsuccessful files having multiple candidates length: {}",
            stats.ambiguous_count()
        ));
    }
    if !stats.failed.is_empty() {
        out.push_str(&format!("\nFailed files: {}", stats.failed.len()));
    }
    out
}

/// Create `<dir>/<name>.log`, or `<name> (n).log` when taken. An existing
/// report is never overwritten.
pub fn open_log_file(dir: &Path, name: &str) -> io::Result<(File, PathBuf)> {
    let name: String = name
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | ':' | '\0') { '_' } else { c })
        .take(150)
        .collect();
    let mut counter = 0;
    loop {
        let candidate = if counter == 0 {
            dir.join(format!("{name}.log"))
        } else {
            dir.join(format!("{name} ({counter}).log"))
        };
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(file) => return Ok((file, candidate)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => counter += 1,
            Err(e) => return Err(e),
        }
    }
}
