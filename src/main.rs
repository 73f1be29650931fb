use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use dialoguer::Confirm;
use dupmatch::{Change, Deduplicator, HourTolerance, Options, RunOutcome};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

#[derive(Serialize, Deserialize, Debug)]
struct ChangeRecord {
    timestamp: String,
    executed: bool,
    change: Change,
}

#[derive(Parser, Debug)]
#[command(name = "dupmatch", version, about = "Find and resolve duplicates of a work dir among originals")]
struct Cli {
    /// Log filter, e.g. `info` or `dupmatch=debug`
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Match the work dir against the originals and remediate duplicates
    Run(RunArgs),

    /// Work with exported change records
    Changes {
        #[command(subcommand)]
        command: ChangesCmd,
    },
}

#[derive(Subcommand, Debug)]
enum ChangesCmd {
    /// Print the records of a `--changes-json` export
    List {
        #[arg(short, long, value_name = "FILE")]
        file: PathBuf,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Folder of the files suspected to be duplicates
    #[arg(short, long, value_name = "DIR")]
    work_dir: PathBuf,
    /// Folder of the original files (default: the work dir)
    #[arg(short, long, value_name = "DIR")]
    original_dir: Option<PathBuf>,

    /// Perform the actions. Without it nothing changes on disk.
    #[arg(long)]
    execute: bool,
    /// Do not ask before executing
    #[arg(short, long)]
    yes: bool,
    /// Print shell commands equivalent to the actions
    #[arg(long)]
    bashify: bool,
    /// Prefix duplicates with ✓
    #[arg(long)]
    rename: bool,
    /// Delete duplicates
    #[arg(long)]
    delete: bool,
    /// Replace duplicates with their original
    #[arg(long)]
    replace_with_original: bool,
    /// Set the newer file of a pair back to the older date
    #[arg(long)]
    set_both_to_older_date: bool,
    /// If the work file is bigger, treat the original as the duplicate
    #[arg(long)]
    treat_bigger_as_original: bool,
    /// Leave pairs alone where the duplicate is bigger (media only)
    #[arg(long)]
    skip_bigger: bool,
    /// Skip empty work files
    #[arg(long)]
    skip_empty: bool,
    /// Act even on pairs that raised a warning
    #[arg(long)]
    neglect_warning: bool,

    /// Compare names case-insensitively
    #[arg(long)]
    casefold: bool,
    /// Compare CRC32 checksums too
    #[arg(long)]
    checksum: bool,
    /// Accepted mtime difference: `true` (±1 h), `N` (±N h) or `LO,HI`
    #[arg(long, value_name = "HOURS", default_value = "false")]
    tolerate_hour: HourTolerance,
    #[arg(long)]
    ignore_name: bool,
    #[arg(long)]
    ignore_date: bool,
    #[arg(long)]
    ignore_size: bool,
    /// Replace spaces in work file names with this character
    #[arg(long, value_name = "CHAR")]
    space2char: Option<char>,
    /// Strip a trailing `(N)` counter from work file names
    #[arg(long)]
    strip_end_counter: bool,
    /// Strip this trailing pattern from work file names
    #[arg(long, value_name = "REGEX")]
    strip_suffix: Option<String>,
    /// Compare only the first N characters of the names
    #[arg(long, value_name = "N")]
    work_file_stem_shortened: Option<usize>,
    /// Act on work files that have no original instead
    #[arg(long)]
    invert_selection: bool,

    /// Compare images by perceptual hash and videos by frame count
    #[arg(long)]
    media_magic: bool,
    #[arg(long, value_name = "FRAMES", default_value_t = 1)]
    accepted_frame_delta: u64,
    #[arg(long, value_name = "BITS", default_value_t = 1)]
    accepted_img_hash_diff: u32,
    /// Only compare images whose dates are within an hour
    #[arg(long)]
    img_compare_date: bool,

    /// Only consider these suffixes, e.g. `.jpg`
    #[arg(long = "suffix", value_name = "SUFFIX")]
    suffixes: Vec<String>,
    /// Skip the first N work files (resume an interrupted run)
    #[arg(long, default_value_t = 0)]
    skip: usize,
    /// Abort on the first error instead of retrying
    #[arg(long)]
    fail_on_error: bool,
    /// Write a report into this directory
    #[arg(long, value_name = "DIR")]
    output: Option<PathBuf>,
    /// Append the changes as JSON lines to this file
    #[arg(long, value_name = "FILE")]
    changes_json: Option<PathBuf>,
    /// Hide the progress bars
    #[arg(long)]
    no_progress: bool,
}

impl RunArgs {
    fn options(&self) -> Options {
        Options {
            work_dir: self.work_dir.clone(),
            original_dir: self.original_dir.clone(),
            execute: self.execute,
            bashify: self.bashify,
            rename: self.rename,
            delete: self.delete,
            replace_with_original: self.replace_with_original,
            set_both_to_older_date: self.set_both_to_older_date,
            treat_bigger_as_original: self.treat_bigger_as_original,
            skip_bigger: self.skip_bigger,
            skip_empty: self.skip_empty,
            neglect_warning: self.neglect_warning,
            casefold: self.casefold,
            checksum: self.checksum,
            tolerate_hour: self.tolerate_hour,
            ignore_name: self.ignore_name,
            ignore_date: self.ignore_date,
            ignore_size: self.ignore_size,
            space2char: self.space2char,
            strip_end_counter: self.strip_end_counter,
            strip_suffix: self.strip_suffix.clone(),
            work_file_stem_shortened: self.work_file_stem_shortened,
            invert_selection: self.invert_selection,
            media_magic: self.media_magic,
            accepted_frame_delta: self.accepted_frame_delta,
            accepted_img_hash_diff: self.accepted_img_hash_diff,
            img_compare_date: self.img_compare_date,
            file_list: None,
            suffixes: self.suffixes.clone(),
            skip: self.skip,
            fail_on_error: self.fail_on_error,
            output: self.output.clone(),
            progress: !self.no_progress,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    match cli.command {
        Commands::Run(args) => run(args),
        Commands::Changes {
            command: ChangesCmd::List { file },
        } => list_changes(&file),
    }
}

fn run(args: RunArgs) -> Result<()> {
    let mut dedup = Deduplicator::new(args.options()).context("Invalid configuration")?;
    println!("{}", dedup.config().describe());

    if args.execute && !args.yes {
        let proceed = Confirm::new()
            .with_prompt("Files will be modified. Continue?")
            .default(false)
            .interact()
            .context("Failed to read the confirmation")?;
        if !proceed {
            println!("Aborted.");
            return Ok(());
        }
    }

    let token = dedup.cancel_token();
    ctrlc::set_handler(move || token.store(true, Ordering::SeqCst))
        .context("Failed to install the Ctrl-C handler")?;

    let outcome = dedup.run().context("Run failed")?;

    for command in dedup.bash_commands() {
        println!("{command}");
    }
    println!("Number of originals: {}", dedup.originals_count());
    println!("{}", dedup.summary());
    if let Some(path) = dedup.report_path() {
        println!("Report written to {}", path.display());
    }
    if let RunOutcome::Interrupted { resume_at } = outcome {
        println!("Interrupted. You may proceed where you left with --skip {resume_at}");
    }

    if let Some(path) = &args.changes_json {
        let mut out = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open changes file {:?}", path))?;
        let timestamp = Utc::now().to_rfc3339();
        for change in dedup.changes() {
            let record = ChangeRecord {
                timestamp: timestamp.clone(),
                executed: args.execute,
                change: change.clone(),
            };
            writeln!(out, "{}", serde_json::to_string(&record)?)?;
        }
        println!(
            "✅ Recorded {} change(s) in {}",
            dedup.changes().len(),
            path.display()
        );
    }
    Ok(())
}

fn list_changes(path: &Path) -> Result<()> {
    let file = File::open(path).with_context(|| format!("Could not open changes file {:?}", path))?;
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: ChangeRecord = serde_json::from_str(&line)
            .with_context(|| format!("Malformed record on line {}", i + 1))?;
        println!(
            "[{}] {} ({})",
            i,
            record.timestamp,
            if record.executed { "executed" } else { "simulated" }
        );
        for entry in record.change.entries() {
            println!("   ▶ {}: {}", entry.path.display(), entry.notes.join(" "));
        }
    }
    Ok(())
}
