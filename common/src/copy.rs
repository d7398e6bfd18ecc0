//! Creation of per-torrent destination directories and copying of matched content.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context};
use async_recursion::async_recursion;
use tracing::instrument;

use crate::events::{Event, EventSink};
use crate::progress;
use crate::torrent::Torrent;

/// Error type for copy operations that preserves operation summary even on failure.
///
/// # Logging Convention
/// The Display implementation shows the full error chain, so any format specifier works:
/// ```ignore
/// tracing::error!("copy failed: {}", &error);
/// tracing::error!("copy failed: {:#}", &error);
/// ```
#[derive(Debug, thiserror::Error)]
#[error("{source:#}")]
pub struct Error {
    #[source]
    pub source: anyhow::Error,
    pub summary: Summary,
}

impl Error {
    #[must_use]
    pub fn new(source: anyhow::Error, summary: Summary) -> Self {
        Error { source, summary }
    }
}

pub const DEFAULT_MAX_TORRENTS: usize = 4;
pub const DEFAULT_MAX_WIDTH: usize = 64;

#[derive(Debug, Copy, Clone)]
pub struct Settings {
    /// Maximum number of torrents copied concurrently
    pub max_torrents: usize,
    /// Maximum number of entries of one directory copied concurrently
    pub max_width: usize,
    /// Replace destination files and symlinks that differ from the source
    pub overwrite: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_torrents: DEFAULT_MAX_TORRENTS,
            max_width: DEFAULT_MAX_WIDTH,
            overwrite: false,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub bytes_copied: u64,
    pub files_copied: usize,
    pub symlinks_created: usize,
    pub directories_created: usize,
    pub files_unchanged: usize,
    pub symlinks_unchanged: usize,
    pub directories_unchanged: usize,
}

impl std::ops::Add for Summary {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            bytes_copied: self.bytes_copied + other.bytes_copied,
            files_copied: self.files_copied + other.files_copied,
            symlinks_created: self.symlinks_created + other.symlinks_created,
            directories_created: self.directories_created + other.directories_created,
            files_unchanged: self.files_unchanged + other.files_unchanged,
            symlinks_unchanged: self.symlinks_unchanged + other.symlinks_unchanged,
            directories_unchanged: self.directories_unchanged + other.directories_unchanged,
        }
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "bytes copied: {}\n\
            files copied: {}\n\
            symlinks created: {}\n\
            directories created: {}\n\
            files unchanged: {}\n\
            symlinks unchanged: {}\n\
            directories unchanged: {}",
            bytesize::ByteSize(self.bytes_copied),
            self.files_copied,
            self.symlinks_created,
            self.directories_created,
            self.files_unchanged,
            self.symlinks_unchanged,
            self.directories_unchanged,
        )
    }
}

/// A torrent whose content could not be copied; siblings are unaffected.
#[derive(Debug)]
pub struct TorrentFailure {
    /// Path of the torrent file
    pub torrent: PathBuf,
    pub destination: PathBuf,
    pub error: Error,
}

/// Result of copying a set of matched torrents.
#[derive(Debug, Default)]
pub struct Outcome {
    /// Totals over every torrent, including partial work of failed ones
    pub summary: Summary,
    pub torrents_copied: usize,
    pub failures: Vec<TorrentFailure>,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "torrents copied: {}\n\
            torrents failed: {}\n\
            {}",
            self.torrents_copied,
            self.failures.len(),
            &self.summary,
        )
    }
}

/// Directory a torrent's content lands in.
///
/// With `use_default_name` the torrent's declared name is used, otherwise the name of the
/// directory it was matched to.
pub fn destination(
    dest_root: &Path,
    use_default_name: bool,
    torrent: &Torrent,
) -> anyhow::Result<PathBuf> {
    if use_default_name {
        return Ok(dest_root.join(&torrent.metadata.name));
    }
    let matched = torrent
        .matched()
        .ok_or_else(|| anyhow!("{:?} has no matched directory", torrent.path()))?;
    let name = matched
        .file_name()
        .ok_or_else(|| anyhow!("matched directory {matched:?} has no name"))?;
    Ok(dest_root.join(name))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DirState {
    Created,
    Exists,
}

// an existing directory is not an error, an existing non-directory is
async fn make_dir(path: &Path) -> anyhow::Result<DirState> {
    match tokio::fs::create_dir(path).await {
        Ok(()) => Ok(DirState::Created),
        Err(error) if error.kind() == std::io::ErrorKind::AlreadyExists => {
            let metadata = tokio::fs::metadata(path)
                .await
                .with_context(|| format!("failed reading metadata from {path:?}"))?;
            if !metadata.is_dir() {
                return Err(anyhow!("{path:?} exists and is not a directory"));
            }
            Ok(DirState::Exists)
        }
        Err(error) => Err(error).with_context(|| format!("cannot create directory {path:?}")),
    }
}

async fn make_dest_root(dest_root: &Path) -> Result<(), crate::Error> {
    tokio::fs::create_dir_all(dest_root)
        .await
        .map_err(|error| crate::Error::CreateDirectory {
            path: dest_root.to_owned(),
            source: error.into(),
        })
}

/// Creates `dest_root/<name>` for every torrent, in order.
///
/// A directory that already exists is reported with `Event::DirectoryExists` and counted in
/// `Summary::directories_unchanged`. Naming directories after matched directories is not
/// supported here: `use_default_name = false` fails before the filesystem is touched.
#[instrument(skip(prog_track, events, torrents))]
pub async fn create_directories(
    prog_track: &Arc<progress::Progress>,
    events: &EventSink,
    dest_root: &Path,
    use_default_name: bool,
    torrents: &[Torrent],
) -> Result<Summary, crate::Error> {
    if !use_default_name {
        return Err(crate::Error::UnsupportedConfiguration(
            "destination directories can only be named after the torrent".to_string(),
        ));
    }
    make_dest_root(dest_root).await?;
    let mut summary = Summary::default();
    for torrent in torrents {
        throttle::get_ops_token().await;
        let path = dest_root.join(&torrent.metadata.name);
        let state = make_dir(&path)
            .await
            .map_err(|source| crate::Error::CreateDirectory {
                path: path.clone(),
                source,
            })?;
        match state {
            DirState::Created => {
                tracing::debug!("created {:?}", &path);
                prog_track.directories_created.inc();
                summary.directories_created += 1;
                events.emit(Event::DirectoryCreated { path });
            }
            DirState::Exists => {
                tracing::debug!("{:?} already exists", &path);
                prog_track.directories_unchanged.inc();
                summary.directories_unchanged += 1;
                events.emit(Event::DirectoryExists { path });
            }
        }
    }
    tracing::info!(
        "created {} directories under {:?}, {} already existed",
        summary.directories_created,
        dest_root,
        summary.directories_unchanged
    );
    Ok(summary)
}

#[instrument(skip(prog_track, events, src_metadata))]
async fn copy_file(
    prog_track: &progress::Progress,
    events: &EventSink,
    src: &Path,
    dst: &Path,
    src_metadata: &std::fs::Metadata,
    settings: &Settings,
) -> Result<Summary, Error> {
    let _open_file_guard = throttle::open_file_permit().await;
    if let Ok(dst_metadata) = tokio::fs::symlink_metadata(dst).await {
        if dst_metadata.is_file() && dst_metadata.len() == src_metadata.len() {
            tracing::debug!("file already present with the same size, skipping");
            prog_track.files_unchanged.inc();
            return Ok(Summary {
                files_unchanged: 1,
                ..Default::default()
            });
        }
        if !settings.overwrite {
            return Err(Error::new(
                anyhow!("destination {dst:?} already exists, did you intend to specify --overwrite?"),
                Default::default(),
            ));
        }
        if dst_metadata.is_dir() {
            return Err(Error::new(
                anyhow!("cannot overwrite directory {dst:?} with a file"),
                Default::default(),
            ));
        }
        tracing::info!("file is different, removing existing file");
        tokio::fs::remove_file(dst)
            .await
            .with_context(|| format!("failed removing {dst:?}"))
            .map_err(|err| Error::new(err, Default::default()))?;
    }
    tracing::debug!("copying data");
    let bytes = tokio::fs::copy(src, dst)
        .await
        .with_context(|| format!("failed copying {src:?} to {dst:?}"))
        .map_err(|err| Error::new(err, Default::default()))?;
    prog_track.files_copied.inc();
    prog_track.bytes_copied.add(bytes);
    events.emit(Event::FileCopied {
        src: src.to_owned(),
        dst: dst.to_owned(),
        bytes,
    });
    Ok(Summary {
        bytes_copied: bytes,
        files_copied: 1,
        ..Default::default()
    })
}

#[instrument(skip(prog_track))]
async fn copy_symlink(
    prog_track: &progress::Progress,
    src: &Path,
    dst: &Path,
    settings: &Settings,
) -> Result<Summary, Error> {
    let link = tokio::fs::read_link(src)
        .await
        .with_context(|| format!("failed reading symlink {src:?}"))
        .map_err(|err| Error::new(err, Default::default()))?;
    let Err(error) = tokio::fs::symlink(&link, dst).await else {
        prog_track.symlinks_created.inc();
        return Ok(Summary {
            symlinks_created: 1,
            ..Default::default()
        });
    };
    if error.kind() != std::io::ErrorKind::AlreadyExists {
        return Err(Error::new(
            anyhow::Error::from(error).context(format!("failed creating symlink {dst:?}")),
            Default::default(),
        ));
    }
    // a symlink pointing to the same target is left alone
    if tokio::fs::read_link(dst)
        .await
        .is_ok_and(|dst_link| dst_link == link)
    {
        tracing::debug!("symlink already exists, skipping");
        return Ok(Summary {
            symlinks_unchanged: 1,
            ..Default::default()
        });
    }
    let dst_metadata = tokio::fs::symlink_metadata(dst)
        .await
        .with_context(|| format!("failed reading metadata from {dst:?}"))
        .map_err(|err| Error::new(err, Default::default()))?;
    if !settings.overwrite || dst_metadata.is_dir() {
        return Err(Error::new(
            anyhow!("destination {dst:?} already exists and differs from symlink {src:?}"),
            Default::default(),
        ));
    }
    tracing::info!("'dst' differs from the source symlink, replacing it");
    tokio::fs::remove_file(dst)
        .await
        .with_context(|| format!("failed removing {dst:?}"))
        .map_err(|err| Error::new(err, Default::default()))?;
    tokio::fs::symlink(&link, dst)
        .await
        .with_context(|| format!("failed creating symlink {dst:?}"))
        .map_err(|err| Error::new(err, Default::default()))?;
    prog_track.symlinks_created.inc();
    Ok(Summary {
        symlinks_created: 1,
        ..Default::default()
    })
}

/// Copies `src` to `dst`, merging into directories that already exist.
///
/// Entries of a directory are copied concurrently, at most `settings.max_width` at a time. A
/// failing entry does not stop its siblings; the error returned carries everything that was
/// copied.
#[instrument(skip(prog_track, events))]
#[async_recursion]
pub async fn copy(
    prog_track: &Arc<progress::Progress>,
    events: &EventSink,
    src: &Path,
    dst: &Path,
    settings: &Settings,
) -> Result<Summary, Error> {
    let _ops_guard = prog_track.ops.guard();
    tracing::debug!("reading source metadata");
    let src_metadata = tokio::fs::symlink_metadata(src)
        .await
        .with_context(|| format!("failed reading metadata from src: {src:?}"))
        .map_err(|err| Error::new(err, Default::default()))?;
    if src_metadata.is_file() {
        return copy_file(prog_track, events, src, dst, &src_metadata, settings).await;
    }
    if src_metadata.is_symlink() {
        return copy_symlink(prog_track, src, dst, settings).await;
    }
    if !src_metadata.is_dir() {
        return Err(Error::new(
            anyhow!(
                "copy: {:?} -> {:?} failed, unsupported src file type: {:?}",
                src,
                dst,
                src_metadata.file_type()
            ),
            Default::default(),
        ));
    }
    let mut copy_summary = match make_dir(dst)
        .await
        .map_err(|err| Error::new(err, Default::default()))?
    {
        DirState::Created => {
            prog_track.directories_created.inc();
            Summary {
                directories_created: 1,
                ..Default::default()
            }
        }
        DirState::Exists => {
            tracing::debug!("'dst' is a directory, merging into it");
            prog_track.directories_unchanged.inc();
            Summary {
                directories_unchanged: 1,
                ..Default::default()
            }
        }
    };
    tracing::debug!("process contents of 'src' directory");
    let entries = {
        // released before recursing so nested copies never wait on a permit held by a parent
        let _open_file_guard = throttle::open_file_permit().await;
        let mut read_dir = tokio::fs::read_dir(src)
            .await
            .with_context(|| format!("cannot open directory {src:?} for reading"))
            .map_err(|err| Error::new(err, copy_summary))?;
        let mut entries = Vec::new();
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .with_context(|| format!("failed traversing src directory {src:?}"))
            .map_err(|err| Error::new(err, copy_summary))?
        {
            entries.push(entry.file_name());
        }
        entries.sort();
        entries
    };
    let max_width = std::cmp::max(1, settings.max_width);
    let mut join_set = tokio::task::JoinSet::new();
    let mut success = true;
    let mut collect = |res: Result<Result<Summary, Error>, tokio::task::JoinError>| match res {
        Ok(Ok(summary)) => copy_summary = copy_summary + summary,
        Ok(Err(error)) => {
            tracing::error!("copy: {:?} -> {:?} failed with: {:#}", src, dst, &error);
            copy_summary = copy_summary + error.summary;
            success = false;
        }
        Err(error) => {
            tracing::error!("copy task for {:?} failed: {}", src, &error);
            success = false;
        }
    };
    for name in entries {
        while join_set.len() >= max_width {
            if let Some(res) = join_set.join_next().await {
                collect(res);
            }
        }
        throttle::get_ops_token().await;
        let entry_src = src.join(&name);
        let entry_dst = dst.join(&name);
        let prog_track = prog_track.clone();
        let events = events.clone();
        let settings = *settings;
        join_set.spawn(async move {
            copy(&prog_track, &events, &entry_src, &entry_dst, &settings).await
        });
    }
    while let Some(res) = join_set.join_next().await {
        collect(res);
    }
    if !success {
        return Err(Error::new(
            anyhow!("copy: {:?} -> {:?} failed!", src, dst),
            copy_summary,
        ));
    }
    Ok(copy_summary)
}

/// Copies a matched directory; a matched path that is a symlink is copied as the directory it
/// points to.
async fn copy_matched_dir(
    prog_track: &Arc<progress::Progress>,
    events: &EventSink,
    src: &Path,
    dst: &Path,
    settings: &Settings,
) -> Result<Summary, Error> {
    let src = tokio::fs::canonicalize(src)
        .await
        .with_context(|| format!("failed resolving matched directory {src:?}"))
        .map_err(|err| Error::new(err, Default::default()))?;
    copy(prog_track, events, &src, dst, settings).await
}

// torrent path, destination, result
type Copied = (PathBuf, PathBuf, Result<Summary, Error>);

/// Copies the matched directory of every matched torrent to its destination.
///
/// Unmatched torrents are ignored. Torrents sharing a destination are copied one after another
/// by the same task; at most `settings.max_torrents` destinations are copied at once. A failing
/// torrent is recorded in `Outcome::failures` and reported with `Event::Error`; the others
/// continue. `Event::CopyComplete` fires once after every copy finished.
#[instrument(skip(prog_track, events, torrents))]
pub async fn copy_matched(
    prog_track: &Arc<progress::Progress>,
    events: &EventSink,
    dest_root: &Path,
    use_default_name: bool,
    torrents: &[Torrent],
    settings: &Settings,
) -> Result<Outcome, crate::Error> {
    let mut outcome = Outcome::default();
    let matched: Vec<&Torrent> = torrents.iter().filter(|t| t.is_matched()).collect();
    if !matched.is_empty() {
        make_dest_root(dest_root).await?;
    }
    let settle = |outcome: &mut Outcome, (torrent, destination, result): Copied| match result {
        Ok(summary) => {
            tracing::debug!("copied {:?} to {:?}", &torrent, &destination);
            outcome.summary = outcome.summary + summary;
            outcome.torrents_copied += 1;
        }
        Err(error) => {
            tracing::error!("copying {:?} failed: {}", &torrent, &error);
            events.error(torrent.display().to_string(), &error.source);
            outcome.summary = outcome.summary + error.summary;
            outcome.failures.push(TorrentFailure {
                torrent,
                destination,
                error,
            });
        }
    };
    // destinations in first-seen order, each with its torrents and their matched directories
    let mut groups: Vec<(PathBuf, Vec<(PathBuf, PathBuf)>)> = Vec::new();
    let mut group_of: HashMap<PathBuf, usize> = HashMap::new();
    for torrent in matched {
        let Some(src) = torrent.matched().map(Path::to_path_buf) else {
            continue;
        };
        let destination = match destination(dest_root, use_default_name, torrent) {
            Ok(destination) => destination,
            Err(error) => {
                let failure = Error::new(error, Default::default());
                settle(
                    &mut outcome,
                    (torrent.path(), dest_root.to_owned(), Err(failure)),
                );
                continue;
            }
        };
        let idx = *group_of.entry(destination.clone()).or_insert_with(|| {
            groups.push((destination, Vec::new()));
            groups.len() - 1
        });
        groups[idx].1.push((torrent.path(), src));
    }
    let max_torrents = std::cmp::max(1, settings.max_torrents);
    let mut join_set = tokio::task::JoinSet::new();
    for (destination, members) in groups {
        while join_set.len() >= max_torrents {
            if let Some(res) = join_set.join_next().await {
                for copied in res? {
                    settle(&mut outcome, copied);
                }
            }
        }
        let prog_track = prog_track.clone();
        let events = events.clone();
        let settings = *settings;
        join_set.spawn(async move {
            let mut results: Vec<Copied> = Vec::with_capacity(members.len());
            for (torrent, src) in members {
                let result =
                    copy_matched_dir(&prog_track, &events, &src, &destination, &settings).await;
                results.push((torrent, destination.clone(), result));
            }
            results
        });
    }
    while let Some(res) = join_set.join_next().await {
        for copied in res? {
            settle(&mut outcome, copied);
        }
    }
    tracing::info!(
        "copied {} torrents to {:?}, {} failed",
        outcome.torrents_copied,
        dest_root,
        outcome.failures.len()
    );
    events.emit(Event::CopyComplete {
        torrents_copied: outcome.torrents_copied,
        failures: outcome.failures.len(),
    });
    Ok(outcome)
}

/// Creates a destination directory for every matched torrent, then copies its content there.
///
/// Only `use_default_name = true` is supported; anything else fails before the filesystem is
/// touched.
#[instrument(skip(prog_track, events, torrents))]
pub async fn relocate(
    prog_track: &Arc<progress::Progress>,
    events: &EventSink,
    dest_root: &Path,
    use_default_name: bool,
    torrents: &[Torrent],
    settings: &Settings,
) -> Result<(Summary, Outcome), crate::Error> {
    if !use_default_name {
        return Err(crate::Error::UnsupportedConfiguration(
            "relocation can only name destinations after the torrent".to_string(),
        ));
    }
    let matched: Vec<Torrent> = torrents.iter().filter(|t| t.is_matched()).cloned().collect();
    let created = create_directories(prog_track, events, dest_root, true, &matched).await?;
    let outcome = copy_matched(prog_track, events, dest_root, true, &matched, settings).await?;
    Ok((created, outcome))
}
