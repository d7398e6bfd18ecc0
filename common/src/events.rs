//! Event stream reporting progress of the scan, match and copy phases.
//!
//! Events are delivered over an unbounded tokio channel so that no event is ever dropped:
//! every completion event a phase emits is observed exactly once by the receiver.

use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    TorrentRead {
        source_path: PathBuf,
        filename: String,
        name: String,
    },
    ReadComplete {
        torrents: usize,
        files_skipped: usize,
    },
    DirectoriesListed {
        count: usize,
    },
    MatchFound {
        filename: String,
        directory: PathBuf,
    },
    MatchComplete {
        matched: usize,
        unmatched: usize,
    },
    DirectoryCreated {
        path: PathBuf,
    },
    DirectoryExists {
        path: PathBuf,
    },
    FileCopied {
        src: PathBuf,
        dst: PathBuf,
        bytes: u64,
    },
    CopyComplete {
        torrents_copied: usize,
        failures: usize,
    },
    Error {
        subject: String,
        message: String,
    },
}

impl Event {
    /// Machine-friendly discriminator.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Event::TorrentRead { .. } => "torrent_read",
            Event::ReadComplete { .. } => "read_complete",
            Event::DirectoriesListed { .. } => "directories_listed",
            Event::MatchFound { .. } => "match_found",
            Event::MatchComplete { .. } => "match_complete",
            Event::DirectoryCreated { .. } => "directory_created",
            Event::DirectoryExists { .. } => "directory_exists",
            Event::FileCopied { .. } => "file_copied",
            Event::CopyComplete { .. } => "copy_complete",
            Event::Error { .. } => "error",
        }
    }
}

/// Sending half of the event stream; cheap to clone into worker tasks.
///
/// A disabled sink discards every event.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<tokio::sync::mpsc::UnboundedSender<Event>>,
}

impl EventSink {
    #[must_use]
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    #[must_use]
    pub fn channel() -> (Self, tokio::sync::mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn emit(&self, event: Event) {
        let Some(tx) = &self.tx else {
            return;
        };
        if tx.send(event).is_err() {
            tracing::trace!("event receiver dropped, discarding event");
        }
    }

    pub fn error(&self, subject: impl Into<String>, error: &anyhow::Error) {
        self.emit(Event::Error {
            subject: subject.into(),
            message: format!("{error:#}"),
        });
    }
}
