use crate::change::Change;
use crate::config::Config;
use crate::error::Result;
use crate::metadata::{MetadataCache, secs};
use crate::report::{natural_delta, natural_size};
use chrono::{Local, TimeZone};
use filetime::FileTime;
use std::path::{Path, PathBuf};

pub const SKIPPED_ON_WARNING: &str = "🛟skipped on warning";

/// Rewrite of the newer file's mtime to the older one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedatePlan {
    pub path: PathBuf,
    pub from: FileTime,
    pub to: FileTime,
}

impl RedatePlan {
    pub fn annotation(&self, performed: bool) -> String {
        format!(
            "{} {} -> {}",
            if performed { "redating" } else { "redatable" },
            local_time(self.from),
            local_time(self.to)
        )
    }
}

fn local_time(time: FileTime) -> String {
    Local
        .timestamp_opt(time.unix_seconds(), time.nanoseconds())
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| time.unix_seconds().to_string())
}

/// Roles and findings for a matched pair, before any remediation.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub change: Change,
    /// The file treated as the duplicate.
    pub affected: PathBuf,
    pub kept: PathBuf,
    pub affected_size: u64,
    /// The file carrying the last warning, if any.
    pub warned: Option<PathBuf>,
    pub redate: Option<RedatePlan>,
}

impl Resolution {
    /// Whether an unacknowledged warning blocks every mutation of the pair.
    pub fn is_gated(&self, neglect_warning: bool) -> bool {
        self.warned.is_some() && !neglect_warning
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    SamePath,
    /// The affected file is bigger than the kept one and `skip_bigger` is on.
    SkippedBigger,
    Resolved(Resolution),
}

/// Decides which file of a matched pair is the duplicate and what looks
/// suspicious about the pair. Touches nothing on disk.
pub struct DecisionEngine<'a> {
    config: &'a Config,
}

impl<'a> DecisionEngine<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    pub fn resolve(
        &self,
        work_file: &Path,
        other_file: &Path,
        cache: &mut MetadataCache,
    ) -> Result<Decision> {
        if work_file == other_file {
            log::error!("Error, the file is the same: {}", work_file.display());
            return Ok(Decision::SamePath);
        }
        let mut change = Change::new(work_file, Some(other_file));
        let (mut affected, mut kept) = (work_file, other_file);
        let mut warned: Option<&Path> = None;

        // Plain matches already agree on size unless it is ignored.
        if self.config.media_magic {
            let work_size = cache.stat(work_file)?.size;
            let other_size = cache.stat(other_file)?.size;
            if work_size > other_size {
                if self.config.treat_bigger_as_original {
                    (affected, kept) = (other_file, work_file);
                } else {
                    change.note(
                        work_file,
                        format!("SIZE WARNING {}", natural_size(work_size - other_size)),
                    );
                    warned = Some(work_file);
                }
            }
            if self.config.skip_bigger && cache.stat(affected)?.size > cache.stat(kept)?.size {
                log::debug!(
                    "Skipping {} as it is not smaller than {}",
                    affected.display(),
                    kept.display()
                );
                return Ok(Decision::SkippedBigger);
            }
        }

        let affected_stat = cache.stat(affected)?;
        let kept_stat = cache.stat(kept)?;
        let mut redate = None;
        if affected_stat.mtime != kept_stat.mtime {
            if self.config.set_both_to_older_date {
                let (path, from, to) = if kept_stat.mtime < affected_stat.mtime {
                    (affected, affected_stat.mtime, kept_stat.mtime)
                } else {
                    (kept, kept_stat.mtime, affected_stat.mtime)
                };
                redate = Some(RedatePlan {
                    path: path.to_path_buf(),
                    from,
                    to,
                });
            } else {
                let delta = secs(kept_stat.mtime) - secs(affected_stat.mtime);
                // sub-second differences are clock noise
                if delta >= 1.0 {
                    change.note(kept, format!("DATE WARNING + {}", natural_delta(delta)));
                    warned = Some(kept);
                }
            }
        }

        Ok(Decision::Resolved(Resolution {
            change,
            affected: affected.to_path_buf(),
            kept: kept.to_path_buf(),
            affected_size: affected_stat.size,
            warned: warned.map(Path::to_path_buf),
            redate,
        }))
    }
}
