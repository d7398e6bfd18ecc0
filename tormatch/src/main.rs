use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::instrument;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "tormatch",
    version,
    about = "Match torrent files against content already on disk and relocate it",
    long_about = "`tormatch` finds .torrent files under a source tree and looks for the content they describe
under a lookup tree. A torrent matches the first lookup directory (in sorted, pre-order walk
order) under which every file it declares exists. Only existence is checked: file sizes and
content are NOT verified.

The report (matched, unmatched and failed torrents) is printed to stdout unless --quiet is given.

EXIT CODES:
    0 - Every torrent matched (or every directory was created)
    1 - Some torrents were left unmatched or failed
    2 - A fatal error occurred (unreadable tree, corrupt torrent, bad configuration)

EXAMPLES:
    # Create an empty directory named after each torrent
    tormatch folders /torrents /downloads

    # Show where the content of each torrent lives
    tormatch match /torrents /data

    # Copy matched content into /downloads/<torrent name>
    tormatch copy /torrents /data /downloads --summary"
)]
struct Args {
    #[command(subcommand)]
    command: Command,

    // Discovery & matching
    /// Maximum number of directories listed concurrently
    #[arg(
        long,
        global = true,
        default_value_t = common::walk::DEFAULT_MAX_WIDTH,
        value_name = "N",
        help_heading = "Discovery & matching"
    )]
    max_width: usize,

    /// Maximum number of torrents being matched concurrently
    #[arg(
        long,
        global = true,
        default_value_t = common::matcher::DEFAULT_MAX_TORRENTS,
        value_name = "N",
        help_heading = "Discovery & matching"
    )]
    match_torrents: usize,

    /// Maximum number of existence checks in flight for one torrent
    #[arg(
        long,
        global = true,
        default_value_t = common::matcher::DEFAULT_PROBE_WIDTH,
        value_name = "N",
        help_heading = "Discovery & matching"
    )]
    probe_width: usize,

    // Copy options
    /// Overwrite destination files that differ from the source (files of equal size are skipped)
    #[arg(short = 'o', long, global = true, help_heading = "Copy options")]
    overwrite: bool,

    /// Maximum number of torrents copied concurrently
    #[arg(
        long,
        global = true,
        default_value_t = common::copy::DEFAULT_MAX_TORRENTS,
        value_name = "N",
        help_heading = "Copy options"
    )]
    copy_torrents: usize,

    /// Maximum number of entries of one directory copied concurrently
    #[arg(
        long,
        global = true,
        default_value_t = common::copy::DEFAULT_MAX_WIDTH,
        value_name = "N",
        help_heading = "Copy options"
    )]
    copy_width: usize,

    // Progress & output
    /// Verbose level (implies "summary"): -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(short = 'v', long = "verbose", global = true, action = clap::ArgAction::Count, help_heading = "Progress & output")]
    verbose: u8,

    /// Print summary at the end
    #[arg(long, global = true, help_heading = "Progress & output")]
    summary: bool,

    /// Quiet mode, don't print the report or errors
    #[arg(short = 'q', long = "quiet", global = true, help_heading = "Progress & output")]
    quiet: bool,

    // Performance & throttling
    /// Maximum number of open files, 0 means no limit, leaving unspecified means using 80% of max open files system limit
    #[arg(
        long,
        global = true,
        value_name = "N",
        help_heading = "Performance & throttling"
    )]
    max_open_files: Option<usize>,

    /// Throttle the number of operations per second, 0 means no throttle
    #[arg(
        long,
        global = true,
        default_value = "0",
        value_name = "N",
        help_heading = "Performance & throttling"
    )]
    ops_throttle: usize,

    // Advanced settings
    /// Number of worker threads, 0 means number of cores
    #[arg(
        long,
        global = true,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_workers: usize,

    /// Number of blocking worker threads, 0 means Tokio runtime default (512)
    #[arg(
        long,
        global = true,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_blocking_threads: usize,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Create one empty directory per torrent, named after the torrent
    Folders {
        /// Directory searched recursively for .torrent files
        source: std::path::PathBuf,
        /// Directory the new directories are created in
        dest: std::path::PathBuf,
    },
    /// Report which lookup directory holds the content of each torrent
    Match {
        /// Directory searched recursively for .torrent files
        source: std::path::PathBuf,
        /// Directory searched recursively for torrent content
        lookup: std::path::PathBuf,
    },
    /// Match torrents and copy the matched content to a destination
    Copy {
        /// Directory searched recursively for .torrent files
        source: std::path::PathBuf,
        /// Directory searched recursively for torrent content
        lookup: std::path::PathBuf,
        /// Directory the matched content is copied to
        dest: std::path::PathBuf,
        /// Name each destination after the matched directory instead of the torrent
        #[arg(long)]
        by_dir_name: bool,
    },
}

/// What `async_main` hands back to `common::run`: the exit status and the counters.
struct Finished {
    complete: bool,
    stats: common::progress::Snapshot,
}

impl std::fmt::Display for Finished {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", &self.stats)
    }
}

fn settings(args: &Args) -> common::Settings {
    common::Settings {
        walk: common::walk::Settings {
            max_width: args.max_width,
        },
        matcher: common::matcher::Settings {
            max_torrents: args.match_torrents,
            probe_width: args.probe_width,
        },
        copy: common::copy::Settings {
            max_torrents: args.copy_torrents,
            max_width: args.copy_width,
            overwrite: args.overwrite,
        },
    }
}

#[instrument]
async fn async_main(args: Args) -> Result<Finished> {
    let batch = common::Batch::new(settings(&args));
    let (text, complete) = match &args.command {
        Command::Folders { source, dest } => {
            let (torrents, summary) = batch.create_folders(source, dest).await?;
            let text = format!(
                "torrents: {}\n\
                directories created: {}\n\
                directories already present: {}",
                torrents.len(),
                summary.directories_created,
                summary.directories_unchanged
            );
            (text, true)
        }
        Command::Match { source, lookup } => {
            let (torrents, summary) = batch.find_matches(source, lookup).await?;
            let mut report = common::Report::from_torrents(&torrents);
            report.add_match_failures(&summary.failures);
            let complete = report.is_complete();
            (report.to_string(), complete)
        }
        Command::Copy {
            source,
            lookup,
            dest,
            by_dir_name,
        } => {
            let (torrents, summary) = batch.find_matches(source, lookup).await?;
            let mut report = common::Report::from_torrents(&torrents);
            report.add_match_failures(&summary.failures);
            let outcome = if *by_dir_name {
                batch.copy_matched(dest, false, &torrents).await?
            } else {
                let (_, outcome) = batch.relocate(dest, true, &torrents).await?;
                outcome
            };
            report.add_copy_failures(&outcome.failures);
            let complete = report.is_complete();
            (format!("{report}\n{outcome}"), complete)
        }
    };
    if !args.quiet {
        println!("{text}");
    }
    Ok(Finished {
        complete,
        stats: batch.progress().snapshot(),
    })
}

fn main() -> Result<()> {
    let args = Args::parse();
    let func = {
        let args = args.clone();
        || async_main(args)
    };
    let output = common::OutputConfig {
        quiet: args.quiet,
        verbose: args.verbose,
        print_summary: args.summary,
    };
    let runtime = common::RuntimeConfig {
        max_workers: args.max_workers,
        max_blocking_threads: args.max_blocking_threads,
    };
    let throttle = common::ThrottleConfig {
        max_open_files: args.max_open_files,
        ops_throttle: args.ops_throttle,
    };
    match common::run(output, runtime, throttle, func) {
        Some(finished) => {
            if finished.complete {
                std::process::exit(0);
            }
            std::process::exit(1);
        }
        None => std::process::exit(2),
    }
}
