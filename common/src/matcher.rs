//! Resolution of torrents to the lookup directory holding their content.
//!
//! For every torrent the lookup directories are tried in order and the first one under which
//! every manifest file exists wins. Only existence is checked: a file with the declared name
//! but a different size still counts as present.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Context;
use tracing::instrument;

use crate::error::Error;
use crate::events::{Event, EventSink};
use crate::progress;
use crate::torrent::{ManifestEntry, Torrent};

/// Number of torrents resolved concurrently unless configured otherwise.
pub const DEFAULT_MAX_TORRENTS: usize = 16;
pub const DEFAULT_PROBE_WIDTH: usize = 32;

#[derive(Debug, Clone, Copy)]
pub struct Settings {
    /// Maximum number of torrents in the matching pipeline at once
    pub max_torrents: usize,
    /// Maximum number of existence probes in flight for one torrent
    pub probe_width: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_torrents: DEFAULT_MAX_TORRENTS,
            probe_width: DEFAULT_PROBE_WIDTH,
        }
    }
}

/// A torrent whose matching stopped on an error other than a missing file.
#[derive(Debug)]
pub struct MatchFailure {
    /// Path of the torrent file
    pub torrent: PathBuf,
    pub error: anyhow::Error,
}

#[derive(Debug, Default)]
pub struct Summary {
    pub matched: usize,
    pub unmatched: usize,
    /// Torrents that arrived with a match and were not probed again
    pub already_matched: usize,
    /// Highest number of torrents observed in the pipeline at the same time
    pub peak_in_flight: usize,
    pub failures: Vec<MatchFailure>,
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "matched: {}\n\
            unmatched: {}\n\
            already matched: {}\n\
            failures: {}",
            self.matched,
            self.unmatched,
            self.already_matched,
            self.failures.len(),
        )
    }
}

#[derive(Debug, Default)]
struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

struct InFlightGuard<'a> {
    gauge: &'a InFlight,
}

impl InFlight {
    fn enter(&self) -> InFlightGuard<'_> {
        let current = self.current.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak.fetch_max(current, Ordering::AcqRel);
        InFlightGuard { gauge: self }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.gauge.current.fetch_sub(1, Ordering::AcqRel);
    }
}

/// `Ok(false)` when the path does not exist, errors only when existence cannot be determined.
async fn exists(prog_track: &progress::Progress, path: &Path) -> anyhow::Result<bool> {
    prog_track.probes.inc();
    match tokio::fs::metadata(path).await {
        Ok(_) => Ok(true),
        Err(error)
            if matches!(
                error.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::NotADirectory
            ) =>
        {
            Ok(false)
        }
        Err(error) => Err(error).with_context(|| format!("failed probing {path:?}")),
    }
}

/// Whether every manifest file exists under `dir`. An empty manifest never matches.
#[instrument(skip(prog_track, manifest))]
async fn contains_manifest(
    prog_track: &Arc<progress::Progress>,
    dir: &Path,
    manifest: &[ManifestEntry],
    probe_width: usize,
) -> anyhow::Result<bool> {
    if manifest.is_empty() {
        return Ok(false);
    }
    let probe_width = std::cmp::max(1, probe_width);
    let mut join_set = tokio::task::JoinSet::new();
    for entry in manifest {
        while join_set.len() >= probe_width {
            let Some(res) = join_set.join_next().await else {
                break;
            };
            if !res?? {
                // dropping the join set aborts the remaining probes
                return Ok(false);
            }
        }
        let path = dir.join(&entry.relative_path);
        let prog_track = prog_track.clone();
        join_set.spawn(async move { exists(&prog_track, &path).await });
    }
    while let Some(res) = join_set.join_next().await {
        if !res?? {
            return Ok(false);
        }
    }
    Ok(true)
}

async fn resolve(
    prog_track: &Arc<progress::Progress>,
    directories: &[PathBuf],
    torrent: &Torrent,
    probe_width: usize,
) -> anyhow::Result<Option<PathBuf>> {
    let manifest = torrent.manifest();
    for dir in directories {
        if contains_manifest(prog_track, dir, &manifest, probe_width).await? {
            return Ok(Some(dir.clone()));
        }
    }
    Ok(None)
}

type Resolved = (usize, Torrent, anyhow::Result<Option<PathBuf>>);

fn settle(
    prog_track: &progress::Progress,
    events: &EventSink,
    summary: &mut Summary,
    slots: &mut [Option<Torrent>],
    (idx, mut torrent, result): Resolved,
) {
    match result {
        Ok(Some(directory)) => {
            tracing::debug!("{:?} matched {:?}", &torrent.filename, &directory);
            prog_track.matches_found.inc();
            events.emit(Event::MatchFound {
                filename: torrent.filename.clone(),
                directory: directory.clone(),
            });
            torrent.set_match(directory);
            summary.matched += 1;
        }
        Ok(None) => {
            tracing::debug!("no match for {:?}", &torrent.filename);
            summary.unmatched += 1;
        }
        Err(error) => {
            let path = torrent.path();
            tracing::error!("matching {:?} failed: {:#}", &path, &error);
            events.error(path.display().to_string(), &error);
            summary.unmatched += 1;
            summary.failures.push(MatchFailure {
                torrent: path,
                error,
            });
        }
    }
    slots[idx] = Some(torrent);
}

/// Resolves each torrent against `directories`, tried in the given order.
///
/// At most `settings.max_torrents` torrents are resolved at once. Torrents come back in the
/// order they were passed in. Emits `Event::MatchFound` per match and `Event::MatchComplete`
/// once at the end. A probe error other than a missing file leaves that torrent unmatched and
/// is recorded in `Summary::failures`; the other torrents are unaffected.
#[instrument(skip(prog_track, events, directories, torrents))]
pub async fn match_torrents(
    prog_track: &Arc<progress::Progress>,
    events: &EventSink,
    directories: Vec<PathBuf>,
    torrents: Vec<Torrent>,
    settings: &Settings,
) -> Result<(Vec<Torrent>, Summary), Error> {
    let directories: Arc<[PathBuf]> = directories.into();
    let max_torrents = std::cmp::max(1, settings.max_torrents);
    let probe_width = settings.probe_width;
    let gauge = Arc::new(InFlight::default());
    let mut summary = Summary::default();
    let mut slots: Vec<Option<Torrent>> = Vec::with_capacity(torrents.len());
    let mut join_set = tokio::task::JoinSet::new();
    for (idx, torrent) in torrents.into_iter().enumerate() {
        if torrent.is_matched() {
            tracing::debug!("{:?} is already matched, skipping", &torrent.filename);
            summary.already_matched += 1;
            slots.push(Some(torrent));
            continue;
        }
        slots.push(None);
        while join_set.len() >= max_torrents {
            if let Some(res) = join_set.join_next().await {
                settle(prog_track, events, &mut summary, &mut slots, res?);
            }
        }
        let prog_track = prog_track.clone();
        let directories = directories.clone();
        let gauge = gauge.clone();
        join_set.spawn(async move {
            let _in_flight = gauge.enter();
            let result = resolve(&prog_track, &directories, &torrent, probe_width).await;
            (idx, torrent, result)
        });
    }
    while let Some(res) = join_set.join_next().await {
        settle(prog_track, events, &mut summary, &mut slots, res?);
    }
    summary.peak_in_flight = gauge.peak.load(Ordering::Acquire);
    let torrents: Vec<Torrent> = slots.into_iter().flatten().collect();
    tracing::info!(
        "matched {} of {} torrents against {} directories",
        summary.matched,
        torrents.len(),
        directories.len()
    );
    events.emit(Event::MatchComplete {
        matched: summary.matched + summary.already_matched,
        unmatched: summary.unmatched,
    });
    Ok((torrents, summary))
}
