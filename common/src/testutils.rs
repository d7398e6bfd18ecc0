use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_bencode::value::Value;

use crate::events::{Event, EventSink};
use crate::progress::Progress;
use crate::torrent::{FileEntry, Metadata, Torrent};

pub async fn create_temp_dir() -> anyhow::Result<PathBuf> {
    let mut idx = 0;
    loop {
        let tmp_dir = std::env::temp_dir().join(format!("tormatch_test{}", &idx));
        if let Err(error) = tokio::fs::create_dir(&tmp_dir).await {
            match error.kind() {
                std::io::ErrorKind::AlreadyExists => {
                    idx += 1;
                }
                _ => return Err(error.into()),
            }
        } else {
            return Ok(tmp_dir);
        }
    }
}

/// Fresh progress counters and an event channel for one test.
pub fn context() -> (
    Arc<Progress>,
    EventSink,
    tokio::sync::mpsc::UnboundedReceiver<Event>,
) {
    let (events, rx) = EventSink::channel();
    (Arc::new(Progress::new()), events, rx)
}

/// Everything emitted so far.
pub fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn count(events: &[Event], kind: &str) -> usize {
    events.iter().filter(|event| event.kind() == kind).count()
}

/// Writes `size` bytes to `path`, creating missing parent directories.
pub async fn write_file(path: &Path, size: usize) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, vec![b'x'; size]).await?;
    Ok(())
}

pub fn bytes(text: &str) -> Value {
    Value::Bytes(text.as_bytes().to_vec())
}

pub fn dict<const N: usize>(entries: [(&str, Value); N]) -> Value {
    Value::Dict(
        entries
            .into_iter()
            .map(|(key, value)| (key.as_bytes().to_vec(), value))
            .collect(),
    )
}

pub fn encode(value: &Value) -> anyhow::Result<Vec<u8>> {
    Ok(serde_bencode::to_bytes(value)?)
}

fn file_entries(files: &[(&str, u64)]) -> Vec<FileEntry> {
    files
        .iter()
        .map(|(path, length)| FileEntry {
            path_segments: path.split('/').map(str::to_string).collect(),
            length: *length,
        })
        .collect()
}

/// Writes a bencoded multi-file torrent; file paths use '/' between segments.
pub async fn write_torrent(
    dir: &Path,
    filename: &str,
    name: &str,
    files: &[(&str, u64)],
) -> anyhow::Result<PathBuf> {
    let files = file_entries(files)
        .into_iter()
        .map(|entry| -> anyhow::Result<Value> {
            Ok(dict([
                ("length", Value::Int(i64::try_from(entry.length)?)),
                (
                    "path",
                    Value::List(
                        entry
                            .path_segments
                            .iter()
                            .map(|segment| bytes(segment.as_str()))
                            .collect(),
                    ),
                ),
            ]))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    let contents = encode(&dict([(
        "info",
        dict([
            ("name", bytes(name)),
            ("piece length", Value::Int(16384)),
            ("files", Value::List(files)),
        ]),
    )]))?;
    let path = dir.join(filename);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&path, contents).await?;
    Ok(path)
}

/// In-memory torrent that never touched the disk.
pub fn torrent(name: &str, files: &[(&str, u64)]) -> Torrent {
    Torrent::new(
        PathBuf::from("/torrents"),
        format!("{name}.torrent"),
        Metadata {
            name: name.to_string(),
            files: file_entries(files),
        },
    )
}

/// In-memory torrent already matched to `directory`.
pub fn matched_torrent(name: &str, files: &[(&str, u64)], directory: &Path) -> Torrent {
    let mut torrent = torrent(name, files);
    torrent.set_match(directory.to_owned());
    torrent
}
