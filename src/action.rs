use crate::change::Change;
use crate::config::{Action, Config};
use crate::decision::RedatePlan;
use crate::error::{DedupError, Result};
use crate::metadata::MetadataCache;
use filetime::{FileTime, set_file_times};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Prefix of renamed duplicates. Work files bearing it count as processed.
pub const RENAME_MARKER: char = '✓';

pub fn is_marked(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| name.to_string_lossy().starts_with(RENAME_MARKER))
}

/// Single-quoted for a POSIX shell.
fn quote(path: &Path) -> String {
    format!("'{}'", path.to_string_lossy().replace('\'', r"'\''"))
}

fn touch_stamp(time: FileTime) -> String {
    match time.nanoseconds() {
        0 => format!("@{}", time.unix_seconds()),
        nanos => format!("@{}.{:09}", time.unix_seconds(), nanos),
    }
}

/// Performs or simulates the remediation of affected files and keeps the
/// set of paths gone from further consideration.
pub struct ActionExecutor {
    action: Action,
    execute: bool,
    bashify: bool,
    fail_on_error: bool,
    passed_away: HashSet<PathBuf>,
    commands: Vec<String>,
}

impl ActionExecutor {
    pub fn new(config: &Config) -> Self {
        Self {
            action: config.action,
            execute: config.execute,
            bashify: config.bashify,
            fail_on_error: config.fail_on_error,
            passed_away: HashSet::new(),
            commands: Vec::new(),
        }
    }

    pub fn is_passed_away(&self, path: &Path) -> bool {
        self.passed_away.contains(path)
    }

    /// Shell equivalents of every action, recorded when bashify is on.
    pub fn bash_commands(&self) -> &[String] {
        &self.commands
    }

    fn record_command(&mut self, command: String) {
        if self.bashify {
            log::info!("{command}");
            self.commands.push(command);
        }
    }

    /// Apply the configured action to `affected`. `kept` is absent only for
    /// unpaired files, where replacing is not an option.
    pub fn remediate(
        &mut self,
        change: &mut Change,
        affected: &Path,
        kept: Option<&Path>,
        cache: &mut MetadataCache,
    ) -> Result<()> {
        match (self.action, kept) {
            (Action::None, _) => Ok(()),
            (Action::Rename, _) => self.rename(change, affected, cache),
            (Action::Delete, _) => self.delete(change, affected, cache),
            (Action::ReplaceWithOriginal, Some(kept)) => {
                self.replace_with_original(change, affected, kept, cache)
            }
            (Action::ReplaceWithOriginal, None) => {
                log::error!("Nothing to replace {} with", affected.display());
                Ok(())
            }
        }
    }

    fn rename(&mut self, change: &mut Change, affected: &Path, cache: &mut MetadataCache) -> Result<()> {
        let name = affected
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let target = affected.with_file_name(format!("{RENAME_MARKER}{name}"));
        let mut note = "renamable";

        if self.execute {
            if target.exists() {
                let err = DedupError::RenameCollision {
                    from: affected.to_path_buf(),
                    to: target,
                };
                if self.fail_on_error {
                    return Err(err);
                }
                log::warn!("{err}");
                change.note(affected, note);
                return Ok(());
            }
            fs::rename(affected, &target)?;
            note = "renaming";
        }
        self.record_command(format!("mv -n {} {}", quote(affected), quote(&target)));
        self.passed_away.insert(affected.to_path_buf());
        cache.evict(affected);
        change.note(affected, note);
        Ok(())
    }

    fn delete(&mut self, change: &mut Change, affected: &Path, cache: &mut MetadataCache) -> Result<()> {
        let mut note = "deletable";
        if self.execute {
            fs::remove_file(affected)?;
            note = "deleting";
        }
        self.record_command(format!("rm {}", quote(affected)));
        self.passed_away.insert(affected.to_path_buf());
        cache.evict(affected);
        change.note(affected, note);
        Ok(())
    }

    /// Same names: overwrite in place. Different names: the kept file lands
    /// next to the affected one, which is then removed.
    fn replace_with_original(
        &mut self,
        change: &mut Change,
        affected: &Path,
        kept: &Path,
        cache: &mut MetadataCache,
    ) -> Result<()> {
        let same_name = affected.file_name() == kept.file_name();
        let target = match (same_name, affected.parent(), kept.file_name()) {
            (false, Some(parent), Some(name)) => parent.join(name),
            _ => affected.to_path_buf(),
        };
        let mut note = "replaceable";

        if self.execute {
            copy_preserving_times(kept, &target)?;
            if target != affected {
                fs::remove_file(affected)?;
            }
            note = "replacing";
        }
        if target == affected {
            self.record_command(format!("cp --preserve=timestamps {} {}", quote(kept), quote(affected)));
        } else {
            self.record_command(format!(
                "cp --preserve=timestamps {} {} && rm {}",
                quote(kept),
                quote(&target),
                quote(affected)
            ));
            self.passed_away.insert(affected.to_path_buf());
            cache.evict(&target);
        }
        cache.evict(affected);
        change.note(affected, note);
        Ok(())
    }

    /// Annotate the planned redate; carry it out only when `allowed` (the
    /// pair is not held back by a warning) and executing.
    pub fn redate(
        &mut self,
        change: &mut Change,
        plan: &RedatePlan,
        allowed: bool,
        cache: &mut MetadataCache,
    ) -> Result<()> {
        let perform = allowed && self.execute;
        if perform {
            set_file_times(&plan.path, plan.to, plan.to)?;
            cache.evict(&plan.path);
        }
        change.note(&plan.path, plan.annotation(perform));
        if allowed {
            self.record_command(format!("touch -d {} {}", touch_stamp(plan.to), quote(&plan.path)));
        }
        Ok(())
    }
}

fn copy_preserving_times(from: &Path, to: &Path) -> Result<()> {
    let metadata = fs::metadata(from)?;
    fs::copy(from, to)?;
    set_file_times(
        to,
        FileTime::from_last_access_time(&metadata),
        FileTime::from_last_modification_time(&metadata),
    )?;
    Ok(())
}
