//! Discovery and parsing of torrent files under a source tree.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context};
use tracing::instrument;

use crate::error::Error;
use crate::events::{Event, EventSink};
use crate::progress;
use crate::torrent::{MetadataParser, Torrent, TORRENT_SUFFIX};
use crate::walk;

#[derive(Copy, Clone, Debug, Default)]
pub struct Summary {
    pub torrents: usize,
    pub files_skipped: usize,
    pub directories_listed: usize,
}

pub fn is_torrent_file(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| name.as_encoded_bytes().ends_with(TORRENT_SUFFIX.as_bytes()))
}

#[instrument(skip(prog_track, parser))]
async fn read_torrent(
    prog_track: Arc<progress::Progress>,
    parser: Arc<dyn MetadataParser>,
    path: PathBuf,
) -> Result<Torrent, Error> {
    let _ops_guard = prog_track.ops.guard();
    let parse_error = |source: anyhow::Error| Error::Parse {
        path: path.clone(),
        source,
    };
    let contents = {
        let _open_file_guard = throttle::open_file_permit().await;
        tokio::fs::read(&path)
            .await
            .context("failed reading file")
            .map_err(parse_error)?
    };
    let metadata = tokio::task::spawn_blocking(move || parser.parse(&contents))
        .await?
        .map_err(parse_error)?;
    let (Some(source_path), Some(filename)) = (path.parent(), path.file_name()) else {
        return Err(parse_error(anyhow!("not a file path")));
    };
    let filename = filename
        .to_str()
        .ok_or_else(|| anyhow!("file name is not valid UTF-8"))
        .map_err(parse_error)?
        .to_string();
    prog_track.torrents_read.inc();
    Ok(Torrent::new(source_path.to_owned(), filename, metadata))
}

/// Finds every `*.torrent` file under `root` and parses it.
///
/// Each torrent is reported with `Event::TorrentRead` as soon as it is parsed and
/// `Event::ReadComplete` fires once after all listings and parses finished. Any filesystem or
/// parse error fails the whole scan. Torrents are returned sorted by their file path.
#[instrument(skip(prog_track, events, parser))]
pub async fn read_torrents(
    prog_track: &Arc<progress::Progress>,
    events: &EventSink,
    parser: &Arc<dyn MetadataParser>,
    root: &Path,
    settings: &walk::Settings,
) -> Result<(Vec<Torrent>, Summary), Error> {
    let max_width = std::cmp::max(1, settings.max_width);
    let mut walker = walk::Walker::new(prog_track.clone(), root, max_width)
        .await
        .map_err(Error::Scan)?;
    let mut parse_set = tokio::task::JoinSet::new();
    let mut torrents = Vec::new();
    let mut summary = Summary::default();
    let mut collect = |torrent: Torrent| {
        tracing::debug!("read {:?}", torrent.path());
        events.emit(Event::TorrentRead {
            source_path: torrent.source_path.clone(),
            filename: torrent.filename.clone(),
            name: torrent.metadata.name.clone(),
        });
        torrents.push(torrent);
    };
    while let Some((_dir, listing)) = walker.next().await? {
        summary.directories_listed += 1;
        for file in listing.files {
            if !is_torrent_file(&file) {
                prog_track.files_skipped.inc();
                summary.files_skipped += 1;
                continue;
            }
            while parse_set.len() >= max_width {
                if let Some(res) = parse_set.join_next().await {
                    collect(res??);
                }
            }
            throttle::get_ops_token().await;
            parse_set.spawn(read_torrent(prog_track.clone(), parser.clone(), file));
        }
        prog_track.files_skipped.add(listing.other as u64);
        summary.files_skipped += listing.other;
    }
    while let Some(res) = parse_set.join_next().await {
        collect(res??);
    }
    torrents.sort_by_key(Torrent::path);
    summary.torrents = torrents.len();
    tracing::info!(
        "read {} torrents under {:?}, skipped {} other files",
        summary.torrents,
        root,
        summary.files_skipped
    );
    events.emit(Event::ReadComplete {
        torrents: summary.torrents,
        files_skipped: summary.files_skipped,
    });
    Ok((torrents, summary))
}

#[cfg(test)]
mod read_tests {
    use crate::testutils;
    use crate::torrent::BencodeParser;
    use tracing_test::traced_test;

    use super::*;

    fn parser() -> Arc<dyn MetadataParser> {
        Arc::new(BencodeParser)
    }

    #[test]
    fn recognizes_torrent_suffix() {
        assert!(is_torrent_file(Path::new("/a/b.torrent")));
        assert!(is_torrent_file(Path::new(".torrent")));
        assert!(!is_torrent_file(Path::new("/a/b.torrent.txt")));
        assert!(!is_torrent_file(Path::new("/a/b.TORRENT")));
        assert!(!is_torrent_file(Path::new("/a/torrent")));
    }

    #[tokio::test]
    #[traced_test]
    async fn reads_torrents_recursively() -> anyhow::Result<()> {
        let tmp_dir = testutils::create_temp_dir().await?;
        testutils::write_torrent(&tmp_dir, "A.torrent", "A", &[("a.txt", 10)]).await?;
        testutils::write_torrent(
            &tmp_dir.join("nested").join("deeper"),
            "B.torrent",
            "B",
            &[("sub/b.txt", 20)],
        )
        .await?;
        testutils::write_file(&tmp_dir.join("notes.txt"), 3).await?;
        testutils::write_file(&tmp_dir.join("nested").join("cover.jpg"), 3).await?;
        let (prog_track, events, mut rx) = testutils::context();
        let (torrents, summary) =
            read_torrents(&prog_track, &events, &parser(), &tmp_dir, &Default::default()).await?;
        assert_eq!(torrents.len(), 2);
        assert_eq!(torrents[0].filename, "A.torrent");
        assert_eq!(torrents[0].source_path, tmp_dir);
        assert_eq!(torrents[0].metadata.name, "A");
        assert_eq!(torrents[1].filename, "B.torrent");
        assert_eq!(torrents[1].source_path, tmp_dir.join("nested").join("deeper"));
        assert!(torrents.iter().all(|torrent| !torrent.is_matched()));
        assert_eq!(summary.files_skipped, 2);
        assert_eq!(summary.directories_listed, 3);
        assert_eq!(prog_track.snapshot().torrents_read, 2);
        let events = testutils::drain(&mut rx);
        assert_eq!(testutils::count(&events, "torrent_read"), 2);
        assert_eq!(testutils::count(&events, "read_complete"), 1);
        assert_eq!(
            events.last(),
            Some(&Event::ReadComplete {
                torrents: 2,
                files_skipped: 2
            })
        );
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn empty_tree_completes_once() -> anyhow::Result<()> {
        let tmp_dir = testutils::create_temp_dir().await?;
        let (prog_track, events, mut rx) = testutils::context();
        let (torrents, _) =
            read_torrents(&prog_track, &events, &parser(), &tmp_dir, &Default::default()).await?;
        assert!(torrents.is_empty());
        let events = testutils::drain(&mut rx);
        assert_eq!(
            events,
            vec![Event::ReadComplete {
                torrents: 0,
                files_skipped: 0
            }]
        );
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn many_entries_complete_once() -> anyhow::Result<()> {
        let tmp_dir = testutils::create_temp_dir().await?;
        for i in 0..1000 {
            testutils::write_file(&tmp_dir.join(format!("file{i}.bin")), 1).await?;
        }
        for i in 0..50 {
            testutils::write_torrent(&tmp_dir, &format!("t{i}.torrent"), "x", &[("f", 1)])
                .await?;
        }
        let (prog_track, events, mut rx) = testutils::context();
        let (torrents, summary) = read_torrents(
            &prog_track,
            &events,
            &parser(),
            &tmp_dir,
            &walk::Settings { max_width: 4 },
        )
        .await?;
        assert_eq!(torrents.len(), 50);
        assert_eq!(summary.files_skipped, 1000);
        let events = testutils::drain(&mut rx);
        assert_eq!(testutils::count(&events, "torrent_read"), 50);
        assert_eq!(testutils::count(&events, "read_complete"), 1);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn parse_error_is_fatal() -> anyhow::Result<()> {
        let tmp_dir = testutils::create_temp_dir().await?;
        testutils::write_torrent(&tmp_dir, "good.torrent", "good", &[("a", 1)]).await?;
        tokio::fs::write(tmp_dir.join("bad.torrent"), b"garbage").await?;
        let (prog_track, events, mut rx) = testutils::context();
        match read_torrents(&prog_track, &events, &parser(), &tmp_dir, &Default::default()).await
        {
            Err(Error::Parse { path, .. }) => assert_eq!(path, tmp_dir.join("bad.torrent")),
            other => panic!("expected a parse error, got {other:?}"),
        }
        let events = testutils::drain(&mut rx);
        assert_eq!(testutils::count(&events, "read_complete"), 0);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn missing_root_is_a_scan_error() -> anyhow::Result<()> {
        let tmp_dir = testutils::create_temp_dir().await?;
        let (prog_track, events, _rx) = testutils::context();
        let result = read_torrents(
            &prog_track,
            &events,
            &parser(),
            &tmp_dir.join("missing"),
            &Default::default(),
        )
        .await;
        assert!(matches!(result, Err(Error::Scan(_))));
        Ok(())
    }
}
