//! Common library for the `tormatch` tool
//!
//! `tormatch` finds `.torrent` files under a source tree, looks for the content they describe
//! under a lookup tree and relocates whatever it finds. This crate holds the engine; the binary
//! only parses arguments and prints the report.
//!
//! # Phases
//!
//! - [`read`] - recursive discovery of `.torrent` files and parsing of their metadata through
//!   a [`MetadataParser`] ([`BencodeParser`] by default)
//! - [`walk`] - recursive enumeration of every lookup directory
//! - [`matcher`] - resolution of each torrent to the first lookup directory that contains every
//!   file of its manifest (existence only, sizes are not verified)
//! - [`copy`] - creation of per-torrent destination directories and copying of matched content
//!
//! A [`Batch`] wires the phases together. Each phase reports its progress on an [`EventSink`]
//! and fires its completion event exactly once.
//!
//! # Concurrency
//!
//! All filesystem work runs on tokio. Fan-out is bounded everywhere: listings in flight during
//! discovery, torrents in the matching pipeline (16 by default), torrents and directory entries
//! during copy. On top of that the `throttle` crate caps the number of open files and,
//! optionally, the number of operations per second.
//!
//! # Error Handling
//!
//! Calls that cannot complete return [`Error`]. Failures limited to a single torrent (a probe
//! that errors out, a copy that fails) are collected in the phase summary and reported through
//! [`Event::Error`]; sibling torrents are unaffected.

use tracing_subscriber::EnvFilter;

pub mod batch;
pub mod config;
pub mod copy;
pub mod error;
pub mod events;
pub mod matcher;
pub mod progress;
pub mod read;
pub mod report;
pub mod torrent;
pub mod walk;

#[cfg(test)]
mod testutils;

pub use batch::{Batch, Settings};
pub use config::{OutputConfig, RuntimeConfig, ThrottleConfig};
pub use error::Error;
pub use events::{Event, EventSink};
pub use report::Report;
pub use torrent::{BencodeParser, MetadataParser, Torrent};

fn env_filter(output: &OutputConfig) -> EnvFilter {
    let default_filter = || EnvFilter::default().add_directive(output.level_filter().into());
    if output.quiet {
        return default_filter();
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter())
}

/// Runs `func` on a freshly built tokio runtime.
///
/// Installs a stderr `tracing` subscriber (`RUST_LOG` wins over the verbosity unless quiet),
/// applies the throttle configuration and prints the returned summary when requested. Returns
/// `None` if anything failed; the error has been logged by then.
pub fn run<Fut, Summary>(
    output: OutputConfig,
    runtime: RuntimeConfig,
    throttle_config: ThrottleConfig,
    func: impl FnOnce() -> Fut,
) -> Option<Summary>
where
    Summary: std::fmt::Display,
    Fut: std::future::Future<Output = anyhow::Result<Summary>>,
{
    if let Err(error) = tracing_subscriber::fmt()
        .with_env_filter(env_filter(&output))
        .with_writer(std::io::stderr)
        .try_init()
    {
        // a subscriber may already be installed, e.g. in tests
        tracing::debug!("tracing subscriber not installed: {}", error);
    }
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if runtime.max_workers > 0 {
        builder.worker_threads(runtime.max_workers);
    }
    if runtime.max_blocking_threads > 0 {
        builder.max_blocking_threads(runtime.max_blocking_threads);
    }
    let runtime = match builder.build() {
        Ok(runtime) => runtime,
        Err(error) => {
            tracing::error!("failed to build the tokio runtime: {:#}", &error);
            return None;
        }
    };
    let max_open_files = match throttle_config.resolve_max_open_files() {
        Ok(max_open_files) => max_open_files,
        Err(error) => {
            tracing::error!("failed to determine the open files limit: {:#}", &error);
            return None;
        }
    };
    throttle::set_max_open_files(max_open_files);
    let res = runtime.block_on(async move {
        if throttle_config.ops_throttle > 0 {
            throttle::init_ops_tokens(throttle_config.ops_throttle);
            tokio::spawn(throttle::run_ops_replenish_thread(
                throttle_config.ops_throttle,
                std::time::Duration::from_secs(1),
            ));
        }
        func().await
    });
    match res {
        Ok(summary) => {
            if output.print_summary || output.verbose > 0 {
                println!("{summary}");
            }
            Some(summary)
        }
        Err(error) => {
            tracing::error!("{:#}", &error);
            None
        }
    }
}
