//! Torrent records and the metadata parsing capability.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_bencode::value::Value;

/// Suffix identifying torrent description files.
pub const TORRENT_SUFFIX: &str = ".torrent";

/// One file declared by a torrent, as a list of path segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path_segments: Vec<String>,
    pub length: u64,
}

/// The parts of torrent metadata the engine consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub name: String,
    pub files: Vec<FileEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub relative_path: PathBuf,
    pub size: u64,
}

/// A parsed torrent file and, once matching ran, the directory holding its content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Torrent {
    /// Directory the torrent file was found in.
    pub source_path: PathBuf,
    pub filename: String,
    pub metadata: Metadata,
    matched: Option<PathBuf>,
}

impl Torrent {
    pub fn new(source_path: PathBuf, filename: String, metadata: Metadata) -> Self {
        Self {
            source_path,
            filename,
            metadata,
            matched: None,
        }
    }

    /// Full path of the torrent file.
    pub fn path(&self) -> PathBuf {
        self.source_path.join(&self.filename)
    }

    /// Relative paths and sizes of every declared file, in declaration order.
    ///
    /// Recomputed on each call.
    pub fn manifest(&self) -> Vec<ManifestEntry> {
        self.metadata
            .files
            .iter()
            .map(|file| ManifestEntry {
                relative_path: file.path_segments.iter().collect(),
                size: file.length,
            })
            .collect()
    }

    pub fn matched(&self) -> Option<&Path> {
        self.matched.as_deref()
    }

    pub fn is_matched(&self) -> bool {
        self.matched.is_some()
    }

    /// Records the match; a torrent is matched at most once, later calls are refused.
    pub(crate) fn set_match(&mut self, directory: PathBuf) -> bool {
        if self.matched.is_some() {
            return false;
        }
        self.matched = Some(directory);
        true
    }
}

/// Turns the raw contents of a torrent file into `Metadata`.
pub trait MetadataParser: std::fmt::Debug + Send + Sync {
    fn parse(&self, contents: &[u8]) -> Result<Metadata>;
}

/// Parser for the standard bencoded torrent format.
///
/// Multi-file torrents yield one entry per `info.files` item; single-file torrents yield one
/// entry named after `info.name`. The `.utf-8` variants of names and paths win when present.
#[derive(Debug, Clone, Copy, Default)]
pub struct BencodeParser;

#[derive(Debug, Deserialize)]
struct MetaInfo {
    info: Info,
}

// names and paths stay raw bytes here so a non UTF-8 legacy key does not fail the whole file
// when its `.utf-8` variant is usable
#[derive(Debug, Deserialize)]
struct Info {
    name: Option<Value>,
    #[serde(rename = "name.utf-8")]
    name_utf8: Option<Value>,
    length: Option<i64>,
    files: Option<Vec<InfoFile>>,
}

#[derive(Debug, Deserialize)]
struct InfoFile {
    length: Option<i64>,
    path: Option<Vec<Value>>,
    #[serde(rename = "path.utf-8")]
    path_utf8: Option<Vec<Value>>,
}

fn text(value: &Value, what: &str) -> Result<String> {
    let Value::Bytes(bytes) = value else {
        return Err(anyhow!("{what} is not a string"));
    };
    String::from_utf8(bytes.clone()).with_context(|| format!("{what} is not valid UTF-8"))
}

// a segment must name exactly one normal path component
fn checked_segment(segment: String, what: &str) -> Result<String> {
    if segment.is_empty()
        || segment == "."
        || segment == ".."
        || segment.contains('/')
        || segment.contains('\0')
    {
        return Err(anyhow!("{what} has an invalid path segment: {segment:?}"));
    }
    Ok(segment)
}

fn length(value: Option<i64>, what: &str) -> Result<u64> {
    let length = value.ok_or_else(|| anyhow!("{what} has no integer length"))?;
    u64::try_from(length).with_context(|| format!("{what} has a negative length: {length}"))
}

impl MetadataParser for BencodeParser {
    fn parse(&self, contents: &[u8]) -> Result<Metadata> {
        let meta_info: MetaInfo =
            serde_bencode::from_bytes(contents).context("invalid torrent metadata")?;
        let info = meta_info.info;
        let name = info
            .name_utf8
            .as_ref()
            .or(info.name.as_ref())
            .ok_or_else(|| anyhow!("missing info.name"))?;
        let name = checked_segment(text(name, "info.name")?, "info.name")?;
        let files = match info.files {
            Some(files) => files
                .into_iter()
                .enumerate()
                .map(|(idx, file)| {
                    let what = format!("info.files[{idx}]");
                    let segments = file
                        .path_utf8
                        .or(file.path)
                        .ok_or_else(|| anyhow!("{what} has no path list"))?;
                    if segments.is_empty() {
                        return Err(anyhow!("{what} has an empty path"));
                    }
                    let path_segments = segments
                        .iter()
                        .map(|segment| checked_segment(text(segment, &what)?, &what))
                        .collect::<Result<Vec<_>>>()?;
                    Ok(FileEntry {
                        path_segments,
                        length: length(file.length, &what)?,
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            None => vec![FileEntry {
                path_segments: vec![name.clone()],
                length: length(info.length, "info")?,
            }],
        };
        Ok(Metadata { name, files })
    }
}
