//! Recursive directory enumeration with a bounded number of listings in flight.
//!
//! The walk is driven by a worklist: directories waiting to be listed sit in a queue and at
//! most `max_width` listings run concurrently in a `JoinSet`. The walk is finished when the
//! queue is empty and the join set has drained, so completion is observed exactly once by the
//! single future that owns both. Any error aborts the walk; dropping the `Walker` aborts the
//! listings still in flight.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context};
use tracing::instrument;

use crate::error::Error;
use crate::events::{Event, EventSink};
use crate::progress;

pub const DEFAULT_MAX_WIDTH: usize = 64;

#[derive(Debug, Clone, Copy)]
pub struct Settings {
    /// Maximum number of directories listed concurrently
    pub max_width: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_width: DEFAULT_MAX_WIDTH,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Subdirectory {
    pub path: PathBuf,
    // used to recognize a directory reached a second time through a symlink
    pub canonical: PathBuf,
    pub is_symlink: bool,
}

/// Contents of one directory, each list sorted by path.
#[derive(Debug, Default)]
pub(crate) struct Listing {
    pub subdirectories: Vec<Subdirectory>,
    /// Regular files, symlinks followed
    pub files: Vec<PathBuf>,
    /// Entries that are neither directories nor regular files
    pub other: usize,
}

#[instrument(skip(prog_track))]
async fn list_directory(
    prog_track: &progress::Progress,
    dir: &Path,
    canonical_dir: &Path,
) -> anyhow::Result<Listing> {
    let _ops_guard = prog_track.ops.guard();
    let mut entries = {
        let _open_file_guard = throttle::open_file_permit().await;
        let mut read_dir = tokio::fs::read_dir(dir)
            .await
            .with_context(|| format!("cannot open directory {dir:?} for reading"))?;
        let mut entries = Vec::new();
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .with_context(|| format!("failed traversing directory {dir:?}"))?
        {
            let entry_path = entry.path();
            let file_type = entry
                .file_type()
                .await
                .with_context(|| format!("failed reading file type of {entry_path:?}"))?;
            entries.push((entry_path, file_type));
        }
        entries
    };
    entries.sort_by(|(lhs, _), (rhs, _)| lhs.cmp(rhs));
    let mut listing = Listing::default();
    for (entry_path, file_type) in entries {
        let is_symlink = file_type.is_symlink();
        // symlinks are followed, so a dangling link is an error like any other failed probe
        let file_type = if is_symlink {
            tokio::fs::metadata(&entry_path)
                .await
                .with_context(|| format!("failed reading metadata from {entry_path:?}"))?
                .file_type()
        } else {
            file_type
        };
        if file_type.is_dir() {
            let canonical = if is_symlink {
                tokio::fs::canonicalize(&entry_path)
                    .await
                    .with_context(|| format!("failed resolving symlink {entry_path:?}"))?
            } else {
                let name = entry_path
                    .file_name()
                    .ok_or_else(|| anyhow!("directory entry {entry_path:?} has no name"))?;
                canonical_dir.join(name)
            };
            listing.subdirectories.push(Subdirectory {
                path: entry_path,
                canonical,
                is_symlink,
            });
        } else if file_type.is_file() {
            listing.files.push(entry_path);
        } else {
            tracing::debug!("skipping special file {:?}", &entry_path);
            listing.other += 1;
        }
    }
    prog_track.directories_listed.inc();
    Ok(listing)
}

/// Worklist-driven traversal yielding one `Listing` per directory.
///
/// Each physical directory is listed once. Symlinked directories are only followed after every
/// directory reachable without a symlink has been listed, so a directory is always reported
/// under its real path when it has one, and an alias of an already visited directory (e.g. a
/// symlink pointing back up the tree) is skipped.
pub(crate) struct Walker {
    prog_track: Arc<progress::Progress>,
    max_width: usize,
    visited: HashSet<PathBuf>,
    pending: VecDeque<(PathBuf, PathBuf)>,
    aliases: Vec<(PathBuf, PathBuf)>,
    join_set: tokio::task::JoinSet<anyhow::Result<(PathBuf, Listing)>>,
}

impl Walker {
    pub(crate) async fn new(
        prog_track: Arc<progress::Progress>,
        root: &Path,
        max_width: usize,
    ) -> anyhow::Result<Self> {
        let metadata = tokio::fs::metadata(root)
            .await
            .with_context(|| format!("failed reading metadata from {root:?}"))?;
        if !metadata.is_dir() {
            return Err(anyhow!("{root:?} is not a directory"));
        }
        let canonical = tokio::fs::canonicalize(root)
            .await
            .with_context(|| format!("failed resolving {root:?}"))?;
        let mut visited = HashSet::new();
        visited.insert(canonical.clone());
        Ok(Self {
            prog_track,
            max_width: std::cmp::max(1, max_width),
            visited,
            pending: VecDeque::from([(root.to_owned(), canonical)]),
            aliases: Vec::new(),
            join_set: tokio::task::JoinSet::new(),
        })
    }

    async fn fill(&mut self) {
        while self.join_set.len() < self.max_width {
            let Some((dir, canonical)) = self.pending.pop_front() else {
                break;
            };
            throttle::get_ops_token().await;
            let prog_track = self.prog_track.clone();
            self.join_set.spawn(async move {
                let listing = list_directory(&prog_track, &dir, &canonical).await?;
                Ok((dir, listing))
            });
        }
    }

    fn follow_aliases(&mut self) {
        let mut aliases = std::mem::take(&mut self.aliases);
        aliases.sort();
        for (path, canonical) in aliases {
            if !self.visited.insert(canonical.clone()) {
                tracing::debug!(
                    "{:?} resolves to an already visited directory, skipping",
                    &path
                );
                continue;
            }
            self.pending.push_back((path, canonical));
        }
    }

    /// Next finished listing; `None` once every directory has been listed.
    pub(crate) async fn next(&mut self) -> Result<Option<(PathBuf, Listing)>, Error> {
        self.fill().await;
        if self.join_set.is_empty() {
            self.follow_aliases();
            self.fill().await;
        }
        let Some(res) = self.join_set.join_next().await else {
            return Ok(None);
        };
        let (dir, listing) = res?.map_err(Error::Scan)?;
        for subdirectory in &listing.subdirectories {
            let entry = (subdirectory.path.clone(), subdirectory.canonical.clone());
            if subdirectory.is_symlink {
                self.aliases.push(entry);
            } else if self.visited.insert(subdirectory.canonical.clone()) {
                self.pending.push_back(entry);
            } else {
                tracing::debug!(
                    "{:?} was already reached through a symlink, skipping",
                    &subdirectory.path
                );
            }
        }
        Ok(Some((dir, listing)))
    }
}

/// Lists `root` and every directory beneath it.
///
/// The result starts with `root` and is sorted component-wise, i.e. a pre-order walk with
/// siblings in name order. Emits `Event::DirectoriesListed` once, after the walk completed.
#[instrument(skip(prog_track, events))]
pub async fn enumerate(
    prog_track: &Arc<progress::Progress>,
    events: &EventSink,
    root: &Path,
    settings: &Settings,
) -> Result<Vec<PathBuf>, Error> {
    let mut walker = Walker::new(prog_track.clone(), root, settings.max_width)
        .await
        .map_err(Error::Scan)?;
    let mut directories = Vec::new();
    while let Some((dir, _listing)) = walker.next().await? {
        directories.push(dir);
    }
    directories.sort();
    tracing::info!("found {} directories under {:?}", directories.len(), root);
    events.emit(Event::DirectoriesListed {
        count: directories.len(),
    });
    Ok(directories)
}
