use crate::error::ConfigError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// How far apart the work file and original mtimes may be, in whole hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HourTolerance {
    #[default]
    Off,
    /// A bare flag: one hour either way.
    Flag,
    /// `N` hours either way.
    Hours(i64),
    /// Asymmetric `lo ..= hi` window of `work - original`.
    Range(i64, i64),
}

impl HourTolerance {
    pub fn window(self) -> Result<Option<(i64, i64)>, ConfigError> {
        match self {
            HourTolerance::Off => Ok(None),
            HourTolerance::Flag => Ok(Some((-1, 1))),
            HourTolerance::Hours(n) => Ok(Some((-n.abs(), n.abs()))),
            HourTolerance::Range(lo, hi) if lo > hi => Err(ConfigError::ReversedTolerance { lo, hi }),
            HourTolerance::Range(lo, hi) => Ok(Some((lo, hi))),
        }
    }
}

impl FromStr for HourTolerance {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidTolerance {
            value: s.to_string(),
        };
        let trimmed = s.trim().trim_start_matches('(').trim_end_matches(')');
        match trimmed.to_lowercase().as_str() {
            "" | "false" => return Ok(HourTolerance::Off),
            "true" => return Ok(HourTolerance::Flag),
            _ => {}
        }
        match trimmed.split_once(',') {
            Some((lo, hi)) => {
                let lo = lo.trim().parse().map_err(|_| invalid())?;
                let hi = hi.trim().parse().map_err(|_| invalid())?;
                Ok(HourTolerance::Range(lo, hi))
            }
            None => trimmed
                .parse()
                .map(HourTolerance::Hours)
                .map_err(|_| invalid()),
        }
    }
}

/// The single remediation applied to the affected file of a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    None,
    Rename,
    Delete,
    ReplaceWithOriginal,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::None => write!(f, "left untouched"),
            Action::Rename => write!(f, "renamed (prefixed with ✓)"),
            Action::Delete => write!(f, "deleted"),
            Action::ReplaceWithOriginal => write!(f, "replaced with the original"),
        }
    }
}

/// Raw option set as received from a front end. Turn it into a [`Config`]
/// before use; that is where the combinations get checked.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    pub work_dir: PathBuf,
    pub original_dir: Option<PathBuf>,

    // Action
    pub execute: bool,
    pub bashify: bool,
    pub rename: bool,
    pub delete: bool,
    pub replace_with_original: bool,
    pub set_both_to_older_date: bool,
    pub treat_bigger_as_original: bool,
    pub skip_bigger: bool,
    pub skip_empty: bool,
    pub neglect_warning: bool,

    // Match
    pub casefold: bool,
    pub checksum: bool,
    pub tolerate_hour: HourTolerance,
    pub ignore_name: bool,
    pub ignore_date: bool,
    pub ignore_size: bool,
    pub space2char: Option<char>,
    pub strip_end_counter: bool,
    pub strip_suffix: Option<String>,
    pub work_file_stem_shortened: Option<usize>,
    pub invert_selection: bool,

    // Media
    pub media_magic: bool,
    pub accepted_frame_delta: u64,
    pub accepted_img_hash_diff: u32,
    pub img_compare_date: bool,

    // Helper
    pub file_list: Option<Vec<PathBuf>>,
    pub suffixes: Vec<String>,
    pub skip: usize,
    pub fail_on_error: bool,
    pub output: Option<PathBuf>,
    pub progress: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::new(),
            original_dir: None,
            execute: false,
            bashify: false,
            rename: false,
            delete: false,
            replace_with_original: false,
            set_both_to_older_date: false,
            treat_bigger_as_original: false,
            skip_bigger: false,
            skip_empty: false,
            neglect_warning: false,
            casefold: false,
            checksum: false,
            tolerate_hour: HourTolerance::Off,
            ignore_name: false,
            ignore_date: false,
            ignore_size: false,
            space2char: None,
            strip_end_counter: false,
            strip_suffix: None,
            work_file_stem_shortened: None,
            invert_selection: false,
            media_magic: false,
            accepted_frame_delta: 1,
            accepted_img_hash_diff: 1,
            img_compare_date: false,
            file_list: None,
            suffixes: Vec::new(),
            skip: 0,
            fail_on_error: false,
            output: None,
            progress: false,
        }
    }
}

impl Options {
    pub fn new(work_dir: impl Into<PathBuf>, original_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            original_dir: Some(original_dir.into()),
            ..Self::default()
        }
    }
}

/// Validated configuration. Every field is final; the engine never
/// re-checks combinations.
#[derive(Debug, Clone)]
pub struct Config {
    pub work_dir: PathBuf,
    pub original_dir: PathBuf,

    pub execute: bool,
    pub bashify: bool,
    pub action: Action,
    pub set_both_to_older_date: bool,
    pub treat_bigger_as_original: bool,
    pub skip_bigger: bool,
    pub skip_empty: bool,
    pub neglect_warning: bool,

    pub casefold: bool,
    pub checksum: bool,
    pub tolerance: Option<(i64, i64)>,
    pub ignore_name: bool,
    pub ignore_date: bool,
    pub ignore_size: bool,
    pub space2char: Option<char>,
    pub strip_end_counter: bool,
    pub strip_suffix: Option<Regex>,
    pub work_file_stem_shortened: Option<usize>,
    pub invert_selection: bool,

    pub media_magic: bool,
    pub accepted_frame_delta: u64,
    pub accepted_img_hash_diff: u32,
    pub img_compare_date: bool,

    pub file_list: Option<Vec<PathBuf>>,
    pub suffixes: Vec<String>,
    pub skip: usize,
    pub fail_on_error: bool,
    pub output: Option<PathBuf>,
    pub progress: bool,
}

impl Config {
    pub fn new(options: Options) -> Result<Self, ConfigError> {
        if options.work_dir.as_os_str().is_empty() {
            return Err(ConfigError::MissingWorkDir);
        }
        let original_dir = options
            .original_dir
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| options.work_dir.clone());
        for dir in [&options.work_dir, &original_dir] {
            if !dir.is_dir() {
                return Err(ConfigError::NotADirectory {
                    path: dir.display().to_string(),
                });
            }
        }

        if options.skip_bigger && !options.media_magic {
            return Err(ConfigError::SkipBiggerWithoutMedia);
        }
        if options.invert_selection
            && (options.replace_with_original
                || options.treat_bigger_as_original
                || options.set_both_to_older_date)
        {
            return Err(ConfigError::InvertWithPairedAction);
        }

        let tolerance = options.tolerate_hour.window()?;

        if options.ignore_name && options.ignore_date && options.ignore_size {
            return Err(ConfigError::IgnoreEverything);
        }
        if options.ignore_size && options.checksum {
            return Err(ConfigError::ChecksumWithoutSize);
        }

        let action = match (
            options.rename,
            options.delete,
            options.replace_with_original,
        ) {
            (false, false, false) => Action::None,
            (true, false, false) => Action::Rename,
            (false, true, false) => Action::Delete,
            (false, false, true) => Action::ReplaceWithOriginal,
            _ => return Err(ConfigError::ConflictingActions),
        };

        let strip_suffix = match options.strip_suffix.filter(|p| !p.is_empty()) {
            Some(pattern) => Some(Regex::new(&format!("(?:{pattern})$")).map_err(|e| {
                ConfigError::InvalidSuffixPattern {
                    pattern: pattern.clone(),
                    message: e.to_string(),
                }
            })?),
            None => None,
        };

        if let Some(first) = options.file_list.as_ref().and_then(|list| list.first()) {
            if !first.starts_with(&original_dir) {
                return Err(ConfigError::ForeignFileList {
                    path: first.display().to_string(),
                });
            }
        }

        let suffixes = options
            .suffixes
            .iter()
            .map(|s| {
                let s = s.to_lowercase();
                if s.starts_with('.') { s } else { format!(".{s}") }
            })
            .collect();

        Ok(Self {
            work_dir: options.work_dir,
            original_dir,
            execute: options.execute,
            bashify: options.bashify,
            action,
            set_both_to_older_date: options.set_both_to_older_date,
            treat_bigger_as_original: options.treat_bigger_as_original,
            skip_bigger: options.skip_bigger,
            skip_empty: options.skip_empty,
            neglect_warning: options.neglect_warning,
            casefold: options.casefold,
            checksum: options.checksum,
            tolerance,
            ignore_name: options.ignore_name,
            ignore_date: options.ignore_date,
            ignore_size: options.ignore_size,
            space2char: options.space2char,
            strip_end_counter: options.strip_end_counter,
            strip_suffix,
            work_file_stem_shortened: options.work_file_stem_shortened,
            invert_selection: options.invert_selection,
            media_magic: options.media_magic,
            accepted_frame_delta: options.accepted_frame_delta,
            accepted_img_hash_diff: options.accepted_img_hash_diff,
            img_compare_date: options.img_compare_date,
            file_list: options.file_list,
            suffixes,
            skip: options.skip,
            fail_on_error: options.fail_on_error,
            output: options.output,
            progress: options.progress,
        })
    }

    /// Whether the suffix filter lets `path` through. No filter accepts all.
    pub fn accepts_suffix(&self, path: &Path) -> bool {
        if self.suffixes.is_empty() {
            return true;
        }
        let suffix = crate::media::suffix_of(path);
        self.suffixes.iter().any(|s| *s == suffix)
    }

    /// Names of the boolean switches turned on, in declaration order.
    pub fn enabled_flags(&self) -> Vec<&'static str> {
        [
            ("execute", self.execute),
            ("bashify", self.bashify),
            ("rename", self.action == Action::Rename),
            ("delete", self.action == Action::Delete),
            ("replace_with_original", self.action == Action::ReplaceWithOriginal),
            ("set_both_to_older_date", self.set_both_to_older_date),
            ("treat_bigger_as_original", self.treat_bigger_as_original),
            ("skip_bigger", self.skip_bigger),
            ("skip_empty", self.skip_empty),
            ("neglect_warning", self.neglect_warning),
            ("casefold", self.casefold),
            ("checksum", self.checksum),
            ("ignore_name", self.ignore_name),
            ("ignore_date", self.ignore_date),
            ("ignore_size", self.ignore_size),
            ("strip_end_counter", self.strip_end_counter),
            ("invert_selection", self.invert_selection),
            ("media_magic", self.media_magic),
            ("img_compare_date", self.img_compare_date),
        ]
        .into_iter()
        .filter_map(|(name, on)| on.then_some(name))
        .collect()
    }

    /// Human readable summary of what a run with this configuration does.
    pub fn describe(&self) -> String {
        let mut lines = Vec::new();
        if self.media_magic {
            lines.push(format!(
                "Only files with media suffixes are taken into consideration. Nor the size nor the date is compared.{}",
                if self.ignore_name { " Nor the name!" } else { "" }
            ));
        } else {
            let mut used = Vec::new();
            let mut ignored = Vec::new();
            for (name, skip) in [
                ("name", self.ignore_name),
                ("size", self.ignore_size),
                ("date", self.ignore_date),
            ] {
                if skip { ignored.push(name) } else { used.push(name) }
            }
            if self.checksum {
                used.push("crc32");
            } else {
                ignored.push("crc32");
            }
            let mut line = format!("Find files by {}", used.join(", "));
            if !ignored.is_empty() {
                line.push_str(&format!(", ignoring: {}", ignored.join(", ")));
            }
            if let Some((lo, hi)) = self.tolerance {
                line.push_str(&format!(" (tolerating {lo}..{hi} hours)"));
            }
            lines.push(line);
        }

        let which = if self.treat_bigger_as_original {
            "Either the file from the work dir or the original dir (whichever is bigger)".to_string()
        } else {
            format!("Duplicates from the work dir at '{}'", self.work_dir.display())
        };
        let small = if self.skip_bigger {
            " (only if smaller than the pair file)"
        } else {
            ""
        };
        let nonzero = if self.skip_empty { " with non-zero size" } else { "" };
        let verb = if self.execute {
            "will be"
        } else {
            "would be (if execute were True)"
        };
        let selection = if self.invert_selection {
            " Only the files without a pair are selected."
        } else {
            ""
        };
        lines.push(format!("{which}{small}{nonzero} {verb} {}.{selection}", self.action));
        if self.set_both_to_older_date {
            lines.push("Original file mtime date might be set backwards to the duplicate file.".to_string());
        }
        lines.join("\n")
    }
}
