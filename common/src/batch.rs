//! A batch ties the phases together for one run of the tool.
//!
//! Every call builds its phase state from scratch: the lookup directory list is enumerated anew
//! on each match, and nothing is cached between calls. The batch only holds the configuration,
//! the metadata parser, the event sink and the progress counters.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::copy;
use crate::error::Error;
use crate::events::EventSink;
use crate::matcher;
use crate::progress::Progress;
use crate::read;
use crate::torrent::{BencodeParser, MetadataParser, Torrent};
use crate::walk;

#[derive(Debug, Clone, Copy, Default)]
pub struct Settings {
    pub walk: walk::Settings,
    pub matcher: matcher::Settings,
    pub copy: copy::Settings,
}

#[derive(Debug)]
pub struct Batch {
    parser: Arc<dyn MetadataParser>,
    settings: Settings,
    events: EventSink,
    progress: Arc<Progress>,
}

impl Batch {
    /// Batch using the bencode parser and no event receiver.
    pub fn new(settings: Settings) -> Self {
        Self {
            parser: Arc::new(BencodeParser),
            settings,
            events: EventSink::disabled(),
            progress: Arc::new(Progress::new()),
        }
    }

    #[must_use]
    pub fn with_parser(mut self, parser: Arc<dyn MetadataParser>) -> Self {
        self.parser = parser;
        self
    }

    #[must_use]
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn progress(&self) -> &Arc<Progress> {
        &self.progress
    }

    pub async fn read_torrents(&self, root: &Path) -> Result<(Vec<Torrent>, read::Summary), Error> {
        read::read_torrents(
            &self.progress,
            &self.events,
            &self.parser,
            root,
            &self.settings.walk,
        )
        .await
    }

    pub async fn enumerate_directories(&self, root: &Path) -> Result<Vec<PathBuf>, Error> {
        walk::enumerate(&self.progress, &self.events, root, &self.settings.walk).await
    }

    /// Enumerates `lookup_root` and resolves every torrent against the result.
    pub async fn match_torrents(
        &self,
        lookup_root: &Path,
        torrents: Vec<Torrent>,
    ) -> Result<(Vec<Torrent>, matcher::Summary), Error> {
        let directories = self.enumerate_directories(lookup_root).await?;
        matcher::match_torrents(
            &self.progress,
            &self.events,
            directories,
            torrents,
            &self.settings.matcher,
        )
        .await
    }

    pub async fn create_directories(
        &self,
        dest_root: &Path,
        use_default_name: bool,
        torrents: &[Torrent],
    ) -> Result<copy::Summary, Error> {
        copy::create_directories(
            &self.progress,
            &self.events,
            dest_root,
            use_default_name,
            torrents,
        )
        .await
    }

    pub async fn copy_matched(
        &self,
        dest_root: &Path,
        use_default_name: bool,
        torrents: &[Torrent],
    ) -> Result<copy::Outcome, Error> {
        copy::copy_matched(
            &self.progress,
            &self.events,
            dest_root,
            use_default_name,
            torrents,
            &self.settings.copy,
        )
        .await
    }

    pub async fn relocate(
        &self,
        dest_root: &Path,
        use_default_name: bool,
        torrents: &[Torrent],
    ) -> Result<(copy::Summary, copy::Outcome), Error> {
        copy::relocate(
            &self.progress,
            &self.events,
            dest_root,
            use_default_name,
            torrents,
            &self.settings.copy,
        )
        .await
    }

    /// Reads every torrent under `source` and creates one directory per torrent under `dest`.
    pub async fn create_folders(
        &self,
        source: &Path,
        dest: &Path,
    ) -> Result<(Vec<Torrent>, copy::Summary), Error> {
        let (torrents, _) = self.read_torrents(source).await?;
        let summary = self.create_directories(dest, true, &torrents).await?;
        Ok((torrents, summary))
    }

    /// Reads every torrent under `source` and matches it against the directories under `lookup`.
    pub async fn find_matches(
        &self,
        source: &Path,
        lookup: &Path,
    ) -> Result<(Vec<Torrent>, matcher::Summary), Error> {
        let (torrents, _) = self.read_torrents(source).await?;
        self.match_torrents(lookup, torrents).await
    }
}

#[cfg(test)]
mod tests {
    use crate::events::Event;
    use crate::testutils;
    use crate::torrent::{FileEntry, Metadata};
    use tracing_test::traced_test;

    use super::*;

    // A needs a.txt found in dir1, B needs sub/b.txt found in dir2
    async fn setup(tmp_dir: &Path) -> anyhow::Result<(PathBuf, PathBuf)> {
        let source = tmp_dir.join("torrents");
        let lookup = tmp_dir.join("lookup");
        testutils::write_torrent(&source, "A.torrent", "A", &[("a.txt", 10)]).await?;
        testutils::write_torrent(&source, "B.torrent", "B", &[("sub/b.txt", 20)]).await?;
        testutils::write_file(&lookup.join("dir1").join("a.txt"), 10).await?;
        testutils::write_file(&lookup.join("dir2").join("sub").join("b.txt"), 20).await?;
        Ok((source, lookup))
    }

    #[tokio::test]
    #[traced_test]
    async fn finds_matches_end_to_end() -> anyhow::Result<()> {
        let tmp_dir = testutils::create_temp_dir().await?;
        let (source, lookup) = setup(&tmp_dir).await?;
        let (events, mut rx) = EventSink::channel();
        let batch = Batch::new(Default::default()).with_events(events);
        let (torrents, summary) = batch.find_matches(&source, &lookup).await?;
        assert_eq!(summary.matched, 2);
        assert_eq!(torrents[0].filename, "A.torrent");
        assert_eq!(torrents[0].matched(), Some(lookup.join("dir1").as_path()));
        assert_eq!(torrents[1].matched(), Some(lookup.join("dir2").as_path()));
        let events = testutils::drain(&mut rx);
        let kinds: Vec<&str> = events
            .iter()
            .map(Event::kind)
            .filter(|kind| kind.ends_with("complete") || *kind == "directories_listed")
            .collect();
        assert_eq!(kinds, vec!["read_complete", "directories_listed", "match_complete"]);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn each_call_starts_fresh() -> anyhow::Result<()> {
        let tmp_dir = testutils::create_temp_dir().await?;
        let (source, lookup) = setup(&tmp_dir).await?;
        let batch = Batch::new(Default::default());
        let (first, _) = batch.find_matches(&source, &lookup).await?;
        // content added between calls is seen by the next call
        testutils::write_torrent(&source, "C.torrent", "C", &[("c.txt", 1)]).await?;
        testutils::write_file(&lookup.join("dir3").join("c.txt"), 1).await?;
        let (second, summary) = batch.find_matches(&source, &lookup).await?;
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 3);
        assert_eq!(summary.matched, 3);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn creates_folders_for_every_torrent() -> anyhow::Result<()> {
        let tmp_dir = testutils::create_temp_dir().await?;
        let (source, _) = setup(&tmp_dir).await?;
        let dest = tmp_dir.join("dest");
        let batch = Batch::new(Default::default());
        let (torrents, summary) = batch.create_folders(&source, &dest).await?;
        assert_eq!(torrents.len(), 2);
        assert_eq!(summary.directories_created, 2);
        assert!(dest.join("A").is_dir());
        assert!(dest.join("B").is_dir());
        let (_, summary) = batch.create_folders(&source, &dest).await?;
        assert_eq!(summary.directories_unchanged, 2);
        assert_eq!(batch.progress().snapshot().directories_created, 2);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn relocates_matched_content() -> anyhow::Result<()> {
        let tmp_dir = testutils::create_temp_dir().await?;
        let (source, lookup) = setup(&tmp_dir).await?;
        testutils::write_torrent(&source, "U.torrent", "U", &[("nowhere.txt", 1)]).await?;
        let dest = tmp_dir.join("dest");
        let batch = Batch::new(Default::default());
        let (torrents, summary) = batch.find_matches(&source, &lookup).await?;
        assert_eq!(summary.unmatched, 1);
        let (created, outcome) = batch.relocate(&dest, true, &torrents).await?;
        assert_eq!(created.directories_created, 2);
        assert_eq!(outcome.torrents_copied, 2);
        assert!(dest.join("A").join("a.txt").is_file());
        assert!(dest.join("B").join("sub").join("b.txt").is_file());
        assert!(!dest.join("U").exists());
        Ok(())
    }

    #[derive(Debug)]
    struct FixedParser;

    impl MetadataParser for FixedParser {
        fn parse(&self, _contents: &[u8]) -> anyhow::Result<Metadata> {
            Ok(Metadata {
                name: "fixed".to_string(),
                files: vec![FileEntry {
                    path_segments: vec!["a.txt".to_string()],
                    length: 1,
                }],
            })
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn parser_is_pluggable() -> anyhow::Result<()> {
        let tmp_dir = testutils::create_temp_dir().await?;
        let (source, lookup) = setup(&tmp_dir).await?;
        tokio::fs::write(source.join("opaque.torrent"), b"not bencode at all").await?;
        let batch = Batch::new(Default::default()).with_parser(Arc::new(FixedParser));
        let (torrents, summary) = batch.find_matches(&source, &lookup).await?;
        assert_eq!(torrents.len(), 3);
        assert!(torrents.iter().all(|torrent| torrent.metadata.name == "fixed"));
        assert_eq!(summary.matched, 3);
        Ok(())
    }
}
