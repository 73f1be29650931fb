use crate::config::Config;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

static ENDING_COUNTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\(\d+\)$").unwrap_or_else(|e| unreachable!("static pattern: {e}"))
});

/// Derives the bucketing key of a file name.
///
/// Work files go through the full cleanup; reference names are
/// authoritative and only get case-folded and shortened.
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    casefold: bool,
    space2char: Option<char>,
    strip_end_counter: bool,
    strip_suffix: Option<Regex>,
    shortened: Option<usize>,
}

impl KeyBuilder {
    pub fn new(config: &Config) -> Self {
        Self {
            casefold: config.casefold,
            space2char: config.space2char,
            strip_end_counter: config.strip_end_counter,
            strip_suffix: config.strip_suffix.clone(),
            shortened: config.work_file_stem_shortened,
        }
    }

    /// The order of the steps is significant: the counter is stripped
    /// before the custom suffix.
    pub fn work_key(&self, path: &Path) -> String {
        let mut stem = stem_of(path);
        if let Some(c) = self.space2char {
            stem = stem.replace(' ', &c.to_string());
        }
        if self.strip_end_counter {
            stem = ENDING_COUNTER.replace(&stem, "").into_owned();
        }
        if let Some(suffix) = &self.strip_suffix {
            stem = suffix.replace(&stem, "").into_owned();
        }
        self.finish(stem)
    }

    pub fn original_key(&self, path: &Path) -> String {
        self.finish(stem_of(path))
    }

    fn finish(&self, stem: String) -> String {
        let stem = if self.casefold {
            casefold(&stem)
        } else {
            stem
        };
        match self.shortened {
            Some(max) => stem.chars().take(max).collect(),
            None => stem,
        }
    }
}

/// Characters whose case folding differs from their lowercase form.
const FOLDS: &[(char, &str)] = &[
    ('ß', "ss"),
    ('ς', "σ"),
    ('ﬀ', "ff"),
    ('ﬁ', "fi"),
    ('ﬂ', "fl"),
    ('ﬃ', "ffi"),
    ('ﬄ', "ffl"),
    ('ﬅ', "st"),
    ('ﬆ', "st"),
];

/// Lowercase, then expand the folds `to_lowercase` leaves alone.
fn casefold(text: &str) -> String {
    let mut folded = String::with_capacity(text.len());
    for c in text.chars().flat_map(char::to_lowercase) {
        match FOLDS.iter().find(|(from, _)| *from == c) {
            Some((_, to)) => folded.push_str(to),
            None => folded.push(c),
        }
    }
    folded
}

fn stem_of(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}
