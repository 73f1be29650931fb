use crate::action::{self, ActionExecutor};
use crate::change::Change;
use crate::config::{Config, Options};
use crate::decision::{Decision, DecisionEngine, Resolution, SKIPPED_ON_WARNING};
use crate::discovery;
use crate::error::Result;
use crate::index::CandidateIndex;
use crate::key::KeyBuilder;
use crate::matcher::{MatchResult, SimilarityMatcher};
use crate::media::{MediaProbe, StdProbe};
use crate::metadata::MetadataCache;
use crate::report::{self, DirLabels};
use crate::retry::RetryPolicy;
use crate::stats::RunStats;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// Stopped on request. Restart with `skip = resume_at` to continue.
    Interrupted { resume_at: usize },
}

/// Where a single work file ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    /// Marked by an earlier run, or consumed earlier in this one.
    AlreadyProcessed,
    /// Symlink, unwanted suffix or empty file.
    Filtered,
    Unmatched,
    /// No match among two or more candidates.
    Ambiguous,
    /// Matched but nothing to do (selection inverted, or the pair is a
    /// single file).
    Matched,
    SkippedBigger,
    SkippedOnWarning,
    Remediated,
}

/// Finds the duplicates of the work dir among the originals and remediates
/// them. One instance performs one run.
pub struct Deduplicator {
    config: Config,
    probe: Box<dyn MediaProbe>,
    keys: KeyBuilder,
    labels: DirLabels,
    cache: MetadataCache,
    executor: ActionExecutor,
    retry: RetryPolicy,
    cancel: Arc<AtomicBool>,
    originals: Vec<PathBuf>,
    index: Option<CandidateIndex>,
    changes: Vec<Change>,
    stats: RunStats,
    dispositions: HashMap<Disposition, usize>,
    report: Option<(File, PathBuf)>,
}

impl Deduplicator {
    pub fn new(options: Options) -> Result<Self> {
        Self::with_probe(options, Box::new(StdProbe::new()))
    }

    pub fn with_probe(options: Options, probe: Box<dyn MediaProbe>) -> Result<Self> {
        let config = Config::new(options)?;
        Ok(Self {
            keys: KeyBuilder::new(&config),
            labels: DirLabels::new(&config.work_dir, &config.original_dir),
            executor: ActionExecutor::new(&config),
            config,
            probe,
            cache: MetadataCache::new(),
            retry: RetryPolicy::default(),
            cancel: Arc::new(AtomicBool::new(false)),
            originals: Vec::new(),
            index: None,
            changes: Vec::new(),
            stats: RunStats::default(),
            dispositions: HashMap::new(),
            report: None,
        })
    }

    pub fn set_retry_policy(&mut self, retry: RetryPolicy) {
        self.retry = retry;
    }

    /// Setting the token stops the run before the next phase or work file.
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn bash_commands(&self) -> &[String] {
        self.executor.bash_commands()
    }

    pub fn metadata(&self) -> &MetadataCache {
        &self.cache
    }

    pub fn originals_count(&self) -> usize {
        self.originals.len()
    }

    pub fn disposition_count(&self, disposition: Disposition) -> usize {
        self.dispositions.get(&disposition).copied().unwrap_or(0)
    }

    pub fn report_path(&self) -> Option<&Path> {
        self.report.as_ref().map(|(_, path)| path.as_path())
    }

    pub fn summary(&self) -> String {
        report::format_summary(&self.stats, self.config.execute, self.originals.len())
    }

    pub fn run(&mut self) -> Result<RunOutcome> {
        self.prepare()?;
        let outcome = if self.cancelled() {
            Ok(self.interrupted_before_loop())
        } else {
            let work_files = discovery::collect_work_files(&self.config.work_dir, self.config.progress);
            if self.cancelled() {
                Ok(self.interrupted_before_loop())
            } else {
                self.loop_files(&work_files)
            }
        };

        let summary = self.summary();
        log::info!("{summary}");
        if let Some((file, _)) = &mut self.report {
            if let Err(e) = writeln!(file, "{summary}") {
                log::error!("Cannot write the report: {e}");
            }
        }
        if let Ok(RunOutcome::Interrupted { resume_at }) = outcome {
            log::warn!("Interrupted. You may proceed where you left with the skip={resume_at} parameter.");
        }
        outcome
    }

    fn prepare(&mut self) -> Result<()> {
        self.originals = match &self.config.file_list {
            Some(list) => list.clone(),
            None => discovery::collect_originals(&self.config),
        };
        log::info!("Number of originals: {}", self.originals.len());

        if !self.config.ignore_name {
            self.index = Some(CandidateIndex::build(&self.originals, &self.keys));
        } else if self.config.media_magic && !self.cancelled() {
            // every work file would otherwise hash the whole reference set
            let bar = self.progress_bar(0, "Preloading media hashes");
            let cached = self.cache.preload(&self.originals, self.probe.as_ref(), &bar);
            log::info!("Cached {cached} images");
        }

        if let Some(dir) = &self.config.output {
            let name = [self.labels.original(), self.labels.work()]
                .into_iter()
                .chain(self.config.enabled_flags())
                .collect::<Vec<_>>()
                .join(",");
            let (file, path) = report::open_log_file(dir, &name)?;
            log::info!("Writing the report to {}", path.display());
            self.report = Some((file, path));
        }
        Ok(())
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn interrupted_before_loop(&self) -> RunOutcome {
        RunOutcome::Interrupted {
            resume_at: self.config.skip,
        }
    }

    fn progress_bar(&self, len: u64, message: &'static str) -> ProgressBar {
        if !self.config.progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len);
        if let Ok(style) =
            ProgressStyle::with_template("{msg} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
        {
            bar.set_style(style.progress_chars("=> "));
        }
        bar.set_message(message);
        bar
    }

    fn loop_files(&mut self, work_files: &[PathBuf]) -> Result<RunOutcome> {
        let skip = self.config.skip;
        if skip > 0 {
            log::info!("Skipped {skip}");
        }
        let bar = self.progress_bar(work_files.len() as u64, "Processing");
        bar.set_position(skip.min(work_files.len()) as u64);

        for (position, work_file) in work_files.iter().enumerate().skip(skip) {
            if self.cancelled() {
                bar.abandon();
                return Ok(RunOutcome::Interrupted {
                    resume_at: position,
                });
            }
            if let Err(e) = self.process_with_retry(work_file) {
                bar.abandon();
                return Err(e);
            }
            bar.inc(1);
        }
        bar.finish_and_clear();
        Ok(RunOutcome::Completed)
    }

    fn process_with_retry(&mut self, work_file: &Path) -> Result<()> {
        let mut attempt = 1;
        loop {
            match self.process_file(work_file) {
                Ok(disposition) => {
                    log::debug!("{}: {:?}", work_file.display(), disposition);
                    *self.dispositions.entry(disposition).or_default() += 1;
                    return Ok(());
                }
                Err(e) if e.is_corrupt_media() => {
                    log::warn!("Failing on exception {}: {}", work_file.display(), e);
                    self.stats.failed.push(work_file.to_path_buf());
                    return Ok(());
                }
                Err(e) if self.config.fail_on_error => return Err(e),
                Err(e) if !e.is_retryable() || self.retry.exhausted(attempt) => {
                    log::error!("Giving up on {}: {}", work_file.display(), e);
                    self.stats.failed.push(work_file.to_path_buf());
                    return Ok(());
                }
                Err(e) => {
                    log::warn!("Repeating on exception {} (attempt {attempt}): {e}", work_file.display());
                    thread::sleep(self.retry.delay(attempt));
                    attempt += 1;
                }
            }
        }
    }

    fn process_file(&mut self, work_file: &Path) -> Result<Disposition> {
        if action::is_marked(work_file) {
            self.stats.ignored_count += 1;
            return Ok(Disposition::AlreadyProcessed);
        }
        if self.executor.is_passed_away(work_file) {
            return Ok(Disposition::AlreadyProcessed);
        }
        let file_type = fs::symlink_metadata(work_file)?.file_type();
        if file_type.is_symlink() || !self.config.accepts_suffix(work_file) {
            log::debug!("Skipping symlink or a non-wanted suffix: {}", work_file.display());
            return Ok(Disposition::Filtered);
        }
        if self.config.skip_empty && self.cache.stat(work_file)?.size == 0 {
            log::debug!("Skipping zero size: {}", work_file.display());
            return Ok(Disposition::Filtered);
        }

        let pool = self.candidate_pool(work_file);
        let matcher = SimilarityMatcher::new(&self.config, self.probe.as_ref());
        let MatchResult {
            candidates,
            original,
        } = matcher.find(work_file, pool, &mut self.cache)?;

        match (original, self.config.invert_selection) {
            (Some(original), false) => self.affect(work_file, &original),
            (Some(_), true) => Ok(Disposition::Matched),
            (None, true) => self.affect_unpaired(work_file),
            (None, false) if candidates.len() > 1 => {
                log::debug!("Candidates {} {:?}", work_file.display(), candidates);
                self.stats
                    .having_multiple_candidates
                    .insert(work_file.to_path_buf(), candidates);
                Ok(Disposition::Ambiguous)
            }
            (None, false) => Ok(Disposition::Unmatched),
        }
    }

    /// Originals sharing the work file's key (all of them when names are
    /// ignored), minus the work file itself and anything already consumed.
    fn candidate_pool(&self, work_file: &Path) -> Vec<PathBuf> {
        let source = match &self.index {
            Some(index) => index.lookup(&self.keys.work_key(work_file)),
            None => self.originals.as_slice(),
        };
        source
            .iter()
            .filter(|p| p.as_path() != work_file && !self.executor.is_passed_away(p))
            .cloned()
            .collect()
    }

    fn affect(&mut self, work_file: &Path, original: &Path) -> Result<Disposition> {
        let decision = DecisionEngine::new(&self.config).resolve(work_file, original, &mut self.cache)?;
        let resolution = match decision {
            Decision::SamePath => return Ok(Disposition::Matched),
            Decision::SkippedBigger => return Ok(Disposition::SkippedBigger),
            Decision::Resolved(resolution) => resolution,
        };
        let gated = resolution.is_gated(self.config.neglect_warning);
        let Resolution {
            mut change,
            affected,
            kept,
            affected_size,
            warned,
            redate,
        } = resolution;

        if let Some(plan) = &redate {
            self.executor.redate(&mut change, plan, !gated, &mut self.cache)?;
        }
        let disposition = match &warned {
            Some(path) if gated => {
                change.note(path, SKIPPED_ON_WARNING);
                Disposition::SkippedOnWarning
            }
            _ => match self
                .executor
                .remediate(&mut change, &affected, Some(&kept), &mut self.cache)
            {
                Ok(()) => {
                    self.stats.record_affected(affected_size);
                    Disposition::Remediated
                }
                Err(e) => {
                    // the redate may already be on disk
                    change.note(&affected, format!("failed: {e}"));
                    self.record_change(change, true);
                    return Err(e);
                }
            },
        };
        if warned.is_some() {
            self.stats.warning_count += 1;
        }
        self.record_change(change, warned.is_some());
        Ok(disposition)
    }

    /// Inverted selection: the work file had no pair.
    fn affect_unpaired(&mut self, work_file: &Path) -> Result<Disposition> {
        let size = self.cache.stat(work_file)?.size;
        let mut change = Change::new(work_file, None);
        self.executor
            .remediate(&mut change, work_file, None, &mut self.cache)?;
        self.stats.record_affected(size);
        self.record_change(change, false);
        Ok(Disposition::Remediated)
    }

    fn record_change(&mut self, change: Change, warned: bool) {
        let text = report::format_change(&change, &self.labels);
        if warned {
            log::warn!("{}", text.trim_end());
        } else {
            log::info!("{}", text.trim_end());
        }
        if let Some((file, _)) = &mut self.report {
            if let Err(e) = file.write_all(text.as_bytes()) {
                log::error!("Cannot write the report: {e}");
            }
        }
        self.changes.push(change);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HourTolerance;
    use crate::error::{ConfigError, DedupError};
    use filetime::{FileTime, set_file_mtime};
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    const BASE: i64 = 1_600_000_000;

    struct Fixture {
        _temp: TempDir,
        work_dir: PathBuf,
        original_dir: PathBuf,
    }

    fn content(seed: usize) -> String {
        let letter = char::from(b'a' + seed as u8);
        letter.to_string().repeat(10 + seed * 10)
    }

    fn write(path: &Path, seed: usize, mtime: i64) {
        fs::write(path, content(seed)).unwrap();
        set_file_mtime(path, FileTime::from_unix_time(mtime, 0)).unwrap();
    }

    fn mtime(path: &Path) -> i64 {
        FileTime::from_last_modification_time(&fs::metadata(path).unwrap()).unix_seconds()
    }

    /// Twelve identical originals; work files differ by mtime offset or
    /// content.
    fn prepare() -> Fixture {
        let temp = TempDir::new().unwrap();
        let original_dir = temp.path().join("originals");
        let work_dir = temp.path().join("work_dir");
        fs::create_dir(&original_dir).unwrap();
        fs::create_dir(&work_dir).unwrap();

        for i in 0..12 {
            write(&original_dir.join(format!("file_{i}")), 1, BASE);
        }
        for (i, offset, seed) in [
            (1, 0, 2),
            (2, 0, 3),
            (4, 3600, 1),
            (5, 7200, 1),
            (6, 3601, 1),
            (7, 3599, 1),
            (8, -3600, 1),
            (9, -10, 1),
            (10, -3600 * 24 * 365, 1),
            (11, 0, 1),
        ] {
            write(&work_dir.join(format!("file_{i}")), seed, BASE + offset);
        }
        Fixture {
            _temp: temp,
            work_dir,
            original_dir,
        }
    }

    impl Fixture {
        fn options(&self, tweak: impl FnOnce(&mut Options)) -> Options {
            let mut opts = Options::new(&self.work_dir, &self.original_dir);
            opts.execute = true;
            opts.rename = true;
            tweak(&mut opts);
            opts
        }

        fn run(&self, tweak: impl FnOnce(&mut Options)) -> Deduplicator {
            let mut dedup = Deduplicator::new(self.options(tweak)).unwrap();
            dedup.set_retry_policy(RetryPolicy::immediate(5));
            assert_eq!(dedup.run().unwrap(), RunOutcome::Completed);
            dedup
        }

        /// Numbers of the work files bearing the marker.
        fn prefixed(&self) -> BTreeSet<usize> {
            fs::read_dir(&self.work_dir)
                .unwrap()
                .filter_map(|e| {
                    let name = e.unwrap().file_name().to_string_lossy().to_string();
                    name.strip_prefix("✓file_").map(|n| n.parse().unwrap())
                })
                .collect()
        }

        fn originals_untouched(&self) -> bool {
            (0..12).all(|i| {
                let path = self.original_dir.join(format!("file_{i}"));
                fs::read_to_string(&path).unwrap() == content(1) && mtime(&path) == BASE
            })
        }
    }

    fn set(items: &[usize]) -> BTreeSet<usize> {
        items.iter().copied().collect()
    }

    #[test]
    fn test_simple_prefix() {
        let fixture = prepare();
        let dedup = fixture.run(|_| {});
        assert_eq!(fixture.prefixed(), set(&[11]));
        assert!(fixture.originals_untouched());
        assert_eq!(dedup.stats().affected_count, 1);
        assert_eq!(dedup.stats().size_affected, 20);
        assert!(dedup.summary().starts_with("Affected: 1/12"));
    }

    #[test]
    fn test_date_scenarios() {
        let cases: [(fn(&mut Options), &[usize]); 6] = [
            (
                |o| {
                    o.ignore_date = true;
                    o.neglect_warning = true;
                },
                &[4, 5, 6, 7, 8, 9, 10, 11],
            ),
            (|o| o.ignore_date = true, &[4, 5, 6, 7, 11]),
            (
                |o| {
                    o.tolerate_hour = HourTolerance::Hours(1);
                    o.neglect_warning = true;
                },
                &[4, 7, 8, 9, 11],
            ),
            (|o| o.tolerate_hour = HourTolerance::Hours(1), &[4, 7, 11]),
            (
                |o| {
                    o.tolerate_hour = HourTolerance::Hours(2);
                    o.neglect_warning = true;
                },
                &[4, 5, 6, 7, 8, 9, 11],
            ),
            (|o| o.tolerate_hour = HourTolerance::Hours(2), &[4, 5, 6, 7, 11]),
        ];
        for (tweak, expected) in cases {
            let fixture = prepare();
            fixture.run(tweak);
            assert_eq!(fixture.prefixed(), set(expected));
            assert!(fixture.originals_untouched());
        }
    }

    #[test]
    fn test_warnings_hold_back_the_pair() {
        let fixture = prepare();
        let dedup = fixture.run(|o| o.tolerate_hour = HourTolerance::Hours(1));

        assert_eq!(dedup.stats().warning_count, 2);
        assert_eq!(dedup.stats().affected_count, 3);
        assert_eq!(dedup.disposition_count(Disposition::SkippedOnWarning), 2);

        let original_8 = fixture.original_dir.join("file_8");
        let change = dedup
            .changes()
            .iter()
            .find(|c| c.other_file() == Some(original_8.as_path()))
            .unwrap();
        assert_eq!(change.notes(&original_8), ["DATE WARNING + an hour", SKIPPED_ON_WARNING]);
        assert!(change.notes(change.work_file()).is_empty());
        assert!(fixture.work_dir.join("file_8").exists());
    }

    #[test]
    fn test_replace_with_original() {
        let fixture = prepare();
        fixture.run(|o| {
            o.rename = false;
            o.replace_with_original = true;
            o.neglect_warning = true;
        });
        assert_eq!(mtime(&fixture.work_dir.join("file_11")), BASE);
        assert_eq!(mtime(&fixture.work_dir.join("file_4")), BASE + 3600);

        let fixture = prepare();
        fixture.run(|o| {
            o.rename = false;
            o.replace_with_original = true;
            o.neglect_warning = true;
            o.tolerate_hour = HourTolerance::Hours(2);
        });
        for i in [4, 5, 6, 7, 8, 9, 11] {
            let path = fixture.work_dir.join(format!("file_{i}"));
            assert_eq!(fs::read_to_string(&path).unwrap(), content(1));
            assert_eq!(mtime(&path), BASE, "file_{i}");
        }
        assert_eq!(mtime(&fixture.work_dir.join("file_10")), BASE - 3600 * 24 * 365);
        assert!(fixture.prefixed().is_empty());
        assert!(fixture.originals_untouched());
    }

    #[test]
    fn test_invert_selection() {
        let fixture = prepare();
        let err = Deduplicator::new(fixture.options(|o| {
            o.rename = false;
            o.replace_with_original = true;
            o.tolerate_hour = HourTolerance::Hours(2);
            o.invert_selection = true;
        }))
        .err()
        .unwrap();
        assert!(matches!(
            err,
            DedupError::Config(ConfigError::InvertWithPairedAction)
        ));

        fixture.run(|o| {
            o.neglect_warning = true;
            o.tolerate_hour = HourTolerance::Hours(2);
        });
        assert_eq!(fixture.prefixed(), set(&[4, 5, 6, 7, 8, 9, 11]));

        let fixture = prepare();
        let dedup = fixture.run(|o| {
            o.neglect_warning = true;
            o.tolerate_hour = HourTolerance::Hours(2);
            o.invert_selection = true;
        });
        assert_eq!(fixture.prefixed(), set(&[1, 2, 10]));
        assert!(dedup.changes().iter().all(|c| c.other_file().is_none()));
        assert_eq!(dedup.disposition_count(Disposition::Matched), 7);
    }

    #[test]
    fn test_second_run_is_idempotent() {
        let fixture = prepare();
        fixture.run(|_| {});
        let dedup = fixture.run(|_| {});
        assert_eq!(fixture.prefixed(), set(&[11]));
        assert_eq!(dedup.stats().ignored_count, 1);
        assert_eq!(dedup.stats().affected_count, 0);
        assert!(dedup.summary().starts_with("Affected: 0/11 (1 ignored)"));
    }

    #[test]
    fn test_simulation_touches_nothing() {
        let fixture = prepare();
        let dedup = fixture.run(|o| {
            o.execute = false;
            o.bashify = true;
            o.ignore_date = true;
            o.neglect_warning = true;
        });
        assert!(fixture.prefixed().is_empty());
        assert_eq!(mtime(&fixture.work_dir.join("file_4")), BASE + 3600);
        assert_eq!(dedup.stats().affected_count, 8);
        assert_eq!(dedup.bash_commands().len(), 8);
        assert!(dedup.summary().starts_with("Affectable: 8/12"));
        let change = &dedup.changes()[0];
        assert_eq!(change.notes(change.work_file()).last().unwrap(), "renamable");
    }

    #[test]
    fn test_set_both_to_older_date() {
        let fixture = prepare();
        let dedup = fixture.run(|o| {
            o.rename = false;
            o.set_both_to_older_date = true;
            o.tolerate_hour = HourTolerance::Hours(1);
        });
        // the original is newer than work file 8 and gets dated back
        assert_eq!(mtime(&fixture.original_dir.join("file_8")), BASE - 3600);
        assert_eq!(mtime(&fixture.work_dir.join("file_4")), BASE);
        assert_eq!(dedup.stats().warning_count, 0);
        assert_eq!(dedup.stats().affected_count, 5);
    }

    #[test]
    fn test_redate_logged_when_rename_fails() {
        let temp = TempDir::new().unwrap();
        let (work_dir, original_dir) = (temp.path().join("w"), temp.path().join("o"));
        let output = temp.path().join("out");
        for dir in [&work_dir, &original_dir, &output] {
            fs::create_dir_all(dir).unwrap();
        }
        let work = work_dir.join("a.txt");
        let original = original_dir.join("a.txt");
        write(&work, 1, BASE);
        write(&original, 1, BASE + 60);
        write(&work_dir.join("✓a.txt"), 2, BASE);

        let mut opts = Options::new(&work_dir, &original_dir);
        opts.execute = true;
        opts.rename = true;
        opts.fail_on_error = true;
        opts.set_both_to_older_date = true;
        opts.tolerate_hour = HourTolerance::Hours(1);
        opts.output = Some(output);
        let mut dedup = Deduplicator::new(opts).unwrap();
        let err = dedup.run().unwrap_err();

        assert!(matches!(err, DedupError::RenameCollision { .. }));
        assert_eq!(mtime(&original), BASE);
        assert_eq!(dedup.changes().len(), 1);
        let change = &dedup.changes()[0];
        assert!(change.notes(&original)[0].starts_with("redating"));
        assert!(change.notes(&work)[0].starts_with("failed: Do not rename"));
        let report = fs::read_to_string(dedup.report_path().unwrap()).unwrap();
        assert!(report.contains("redating"));
    }

    #[test]
    fn test_rename_collision() {
        let fixture = prepare();
        write(&fixture.work_dir.join("✓file_11"), 2, BASE);

        let dedup = fixture.run(|_| {});
        assert!(fixture.work_dir.join("file_11").exists());
        assert_eq!(dedup.stats().ignored_count, 1);
        assert!(dedup.stats().failed.is_empty());

        let mut dedup = Deduplicator::new(fixture.options(|o| o.fail_on_error = true)).unwrap();
        let err = dedup.run().unwrap_err();
        assert!(matches!(err, DedupError::RenameCollision { .. }));
    }

    #[test]
    fn test_ambiguous_candidates() {
        let temp = TempDir::new().unwrap();
        let (work_dir, original_dir) = (temp.path().join("w"), temp.path().join("o"));
        fs::create_dir_all(original_dir.join("x")).unwrap();
        fs::create_dir_all(original_dir.join("y")).unwrap();
        fs::create_dir_all(&work_dir).unwrap();
        write(&work_dir.join("a.txt"), 1, BASE);
        write(&original_dir.join("x/a.txt"), 2, BASE);
        write(&original_dir.join("y/a.txt"), 3, BASE);
        write(&work_dir.join("b.txt"), 1, BASE);
        write(&original_dir.join("x/b.txt"), 2, BASE);

        let mut dedup = Deduplicator::new(Options::new(&work_dir, &original_dir)).unwrap();
        dedup.run().unwrap();
        assert_eq!(dedup.stats().ambiguous_count(), 1);
        assert_eq!(
            dedup.stats().having_multiple_candidates[&work_dir.join("a.txt")],
            vec![original_dir.join("x/a.txt"), original_dir.join("y/a.txt")]
        );
        assert_eq!(dedup.disposition_count(Disposition::Unmatched), 1);
        assert!(dedup.changes().is_empty());
    }

    #[test]
    fn test_single_folder_consumes_each_file_once() {
        let temp = TempDir::new().unwrap();
        write(&temp.path().join("a.txt"), 1, BASE);
        fs::create_dir(temp.path().join("copy")).unwrap();
        write(&temp.path().join("copy/a.txt"), 1, BASE);

        let mut opts = Options::new(temp.path(), temp.path());
        opts.original_dir = None;
        opts.delete = true;
        opts.execute = true;
        let mut dedup = Deduplicator::new(opts).unwrap();
        dedup.run().unwrap();

        // the first one found is deleted, its twin then has no candidate left
        assert_eq!(dedup.stats().affected_count, 1);
        assert!(!temp.path().join("a.txt").exists());
        assert!(temp.path().join("copy/a.txt").exists());
        assert_eq!(dedup.disposition_count(Disposition::Unmatched), 1);
    }

    #[test]
    fn test_cancel_reports_resume_offset() {
        let fixture = prepare();
        let mut dedup = Deduplicator::new(fixture.options(|o| o.skip = 3)).unwrap();
        dedup.cancel_token().store(true, Ordering::SeqCst);
        assert_eq!(dedup.run().unwrap(), RunOutcome::Interrupted { resume_at: 3 });
        assert!(fixture.prefixed().is_empty());

        // skipping past every file is a completed no-op
        let dedup = fixture.run(|o| o.skip = 100);
        assert!(dedup.changes().is_empty());
    }

    #[test]
    fn test_skip_and_filters() {
        let fixture = prepare();
        fs::write(fixture.work_dir.join("empty"), b"").unwrap();
        let dedup = fixture.run(|o| {
            o.execute = false;
            o.skip_empty = true;
            o.suffixes = vec![".jpg".to_string()];
        });
        assert_eq!(dedup.originals_count(), 0);
        assert_eq!(dedup.disposition_count(Disposition::Filtered), 11);
    }

    #[test]
    fn test_report_file() {
        let fixture = prepare();
        let output = TempDir::new().unwrap();
        let dedup = fixture.run(|o| o.output = Some(output.path().to_path_buf()));

        let path = dedup.report_path().unwrap().to_path_buf();
        assert!(path.starts_with(output.path()));
        assert!(path.to_string_lossy().contains("originals,work_dir,execute,rename"));
        let text = fs::read_to_string(path).unwrap();
        assert!(text.contains("renaming"));
        assert!(text.contains("Affected: 1/12"));
    }

    mod media {
        use super::*;
        use crate::matcher::tests::FrameProbe;
        use crate::media::tests::create_test_image;
        use image::DynamicImage;
        use image_hasher::ImageHash;
        use std::io;
        use std::sync::atomic::AtomicUsize;

        fn media_dirs() -> (TempDir, PathBuf, PathBuf) {
            let temp = TempDir::new().unwrap();
            let (work_dir, original_dir) = (temp.path().join("w"), temp.path().join("o"));
            fs::create_dir_all(&work_dir).unwrap();
            fs::create_dir_all(&original_dir).unwrap();
            (temp, work_dir, original_dir)
        }

        fn image(path: PathBuf, size: u32) -> PathBuf {
            let path = create_test_image(&path, size, false);
            set_file_mtime(&path, FileTime::from_unix_time(BASE, 0)).unwrap();
            path
        }

        fn run(work_dir: &Path, original_dir: &Path, tweak: impl FnOnce(&mut Options)) -> Deduplicator {
            let mut opts = Options::new(work_dir, original_dir);
            opts.media_magic = true;
            opts.rename = true;
            opts.execute = true;
            tweak(&mut opts);
            let mut dedup = Deduplicator::new(opts).unwrap();
            dedup.set_retry_policy(RetryPolicy::immediate(5));
            dedup.run().unwrap();
            dedup
        }

        #[test]
        fn test_smaller_duplicate_renamed() {
            let (_temp, work_dir, original_dir) = media_dirs();
            let work = image(work_dir.join("dog.bmp"), 32);
            image(original_dir.join("dog.bmp"), 64);

            let dedup = run(&work_dir, &original_dir, |_| {});
            assert!(!work.exists());
            assert!(work_dir.join("✓dog.bmp").exists());
            assert_eq!(dedup.stats().affected_count, 1);
        }

        #[test]
        fn test_bigger_work_file_warns() {
            let (_temp, work_dir, original_dir) = media_dirs();
            let work = image(work_dir.join("dog.bmp"), 64);
            image(original_dir.join("dog.bmp"), 32);

            let dedup = run(&work_dir, &original_dir, |_| {});
            assert!(work.exists());
            let notes = dedup.changes()[0].notes(&work);
            assert!(notes[0].starts_with("SIZE WARNING "));
            assert_eq!(notes[1], SKIPPED_ON_WARNING);
            assert_eq!(dedup.stats().warning_count, 1);
            assert_eq!(dedup.stats().affected_count, 0);
        }

        #[test]
        fn test_treat_bigger_as_original() {
            let (_temp, work_dir, original_dir) = media_dirs();
            let work = image(work_dir.join("dog.bmp"), 64);
            let original = image(original_dir.join("dog.bmp"), 32);

            run(&work_dir, &original_dir, |o| o.treat_bigger_as_original = true);
            assert!(work.exists());
            assert!(!original.exists());
            assert!(original_dir.join("✓dog.bmp").exists());
        }

        #[test]
        fn test_skip_bigger_records_nothing() {
            let (_temp, work_dir, original_dir) = media_dirs();
            let work = image(work_dir.join("dog.bmp"), 64);
            image(original_dir.join("dog.bmp"), 32);

            let dedup = run(&work_dir, &original_dir, |o| o.skip_bigger = true);
            assert!(work.exists());
            assert!(dedup.changes().is_empty());
            assert_eq!(dedup.stats().warning_count, 0);
            assert_eq!(dedup.disposition_count(Disposition::SkippedBigger), 1);
        }

        #[test]
        fn test_ignore_name_preloads_and_reclaims() {
            let (_temp, work_dir, original_dir) = media_dirs();
            let work = image(work_dir.join("IMG_0001.bmp"), 32);
            let twin = image(original_dir.join("holiday.bmp"), 32);
            let other = create_test_image(&original_dir.join("other.bmp"), 32, true);

            let dedup = run(&work_dir, &original_dir, |o| o.ignore_name = true);
            assert!(!work.exists());
            assert!(dedup.metadata().has_image_hash(&twin));
            assert!(dedup.metadata().has_image_hash(&other));
            assert!(!dedup.metadata().holds_decoded(&twin));
            assert!(!dedup.metadata().holds_decoded(&other));
        }

        #[test]
        fn test_cancel_skips_preload() {
            let (_temp, work_dir, original_dir) = media_dirs();
            let work = image(work_dir.join("IMG_0001.bmp"), 32);
            let twin = image(original_dir.join("holiday.bmp"), 32);

            let mut opts = Options::new(&work_dir, &original_dir);
            opts.media_magic = true;
            opts.ignore_name = true;
            opts.rename = true;
            opts.execute = true;
            let mut dedup = Deduplicator::new(opts).unwrap();
            dedup.cancel_token().store(true, Ordering::SeqCst);
            assert_eq!(dedup.run().unwrap(), RunOutcome::Interrupted { resume_at: 0 });
            assert!(!dedup.metadata().has_image_hash(&twin));
            assert!(work.exists());
        }

        #[test]
        fn test_corrupt_work_image_is_skipped() {
            let (_temp, work_dir, original_dir) = media_dirs();
            let broken = work_dir.join("dog.jpg");
            fs::write(&broken, b"not an image").unwrap();
            image(original_dir.join("dog.jpg"), 32);

            let dedup = run(&work_dir, &original_dir, |o| o.fail_on_error = true);
            assert_eq!(dedup.stats().failed, vec![broken.clone()]);
            assert!(broken.exists());
            assert!(dedup.changes().is_empty());
        }

        /// Decoding `name` fails with an I/O error, counting the attempts.
        struct FlakyProbe {
            name: &'static str,
            calls: Arc<AtomicUsize>,
            images: StdProbe,
        }

        impl MediaProbe for FlakyProbe {
            fn decode(&self, path: &Path) -> Result<DynamicImage> {
                if path.file_name().is_some_and(|n| n == self.name) {
                    self.calls.fetch_add(1, Ordering::SeqCst);
                    return Err(io::Error::other("device not ready").into());
                }
                self.images.decode(path)
            }

            fn perceptual_hash(&self, image: &DynamicImage) -> ImageHash {
                self.images.perceptual_hash(image)
            }

            fn exif_capture_times(&self, _path: &Path) -> Vec<i64> {
                Vec::new()
            }

            fn frame_count(&self, path: &Path) -> Result<u64> {
                self.images.frame_count(path)
            }
        }

        fn flaky(work_dir: &Path, original_dir: &Path, fail_on_error: bool) -> (Deduplicator, Arc<AtomicUsize>) {
            let mut opts = Options::new(work_dir, original_dir);
            opts.media_magic = true;
            opts.rename = true;
            opts.execute = true;
            opts.fail_on_error = fail_on_error;
            let calls = Arc::new(AtomicUsize::new(0));
            let probe = FlakyProbe {
                name: "bad.bmp",
                calls: Arc::clone(&calls),
                images: StdProbe::new(),
            };
            let mut dedup = Deduplicator::with_probe(opts, Box::new(probe)).unwrap();
            dedup.set_retry_policy(RetryPolicy::immediate(5));
            (dedup, calls)
        }

        #[test]
        fn test_io_error_retried_then_given_up() {
            let (_temp, work_dir, original_dir) = media_dirs();
            let bad = image(work_dir.join("bad.bmp"), 32);
            image(original_dir.join("bad.bmp"), 64);
            let dog = image(work_dir.join("dog.bmp"), 32);
            image(original_dir.join("dog.bmp"), 64);

            let (mut dedup, calls) = flaky(&work_dir, &original_dir, false);
            assert_eq!(dedup.run().unwrap(), RunOutcome::Completed);
            assert_eq!(calls.load(Ordering::SeqCst), 5);
            assert_eq!(dedup.stats().failed, vec![bad.clone()]);
            assert!(bad.exists());
            // the loop went on with the next file
            assert!(!dog.exists());
            assert!(work_dir.join("✓dog.bmp").exists());
        }

        #[test]
        fn test_io_error_aborts_on_fail_on_error() {
            let (_temp, work_dir, original_dir) = media_dirs();
            image(work_dir.join("bad.bmp"), 32);
            image(original_dir.join("bad.bmp"), 64);
            let dog = image(work_dir.join("dog.bmp"), 32);
            image(original_dir.join("dog.bmp"), 64);

            let (mut dedup, calls) = flaky(&work_dir, &original_dir, true);
            let err = dedup.run().unwrap_err();
            assert!(matches!(err, DedupError::Io(_)));
            assert_eq!(calls.load(Ordering::SeqCst), 1);
            assert!(dedup.stats().failed.is_empty());
            assert!(dog.exists());
        }

        #[test]
        fn test_videos_by_frame_count() {
            let (_temp, work_dir, original_dir) = media_dirs();
            let work = work_dir.join("holiday.mp4");
            write(&work, 1, BASE);
            write(&original_dir.join("clip.mov"), 1, BASE);
            write(&original_dir.join("long.avi"), 1, BASE);

            let mut opts = Options::new(&work_dir, &original_dir);
            opts.media_magic = true;
            opts.ignore_name = true;
            opts.rename = true;
            opts.execute = true;
            let probe = FrameProbe::new(&[("holiday.mp4", 300), ("clip.mov", 301), ("long.avi", 900)]);
            let mut dedup = Deduplicator::with_probe(opts, Box::new(probe)).unwrap();
            dedup.run().unwrap();

            assert!(work_dir.join("✓holiday.mp4").exists());
            assert_eq!(
                dedup.changes()[0].other_file(),
                Some(original_dir.join("clip.mov").as_path())
            );
        }
    }
}
