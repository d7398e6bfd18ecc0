//! Final, human readable outcome of a batch: what matched, what did not, what failed.

use std::path::PathBuf;

use crate::copy;
use crate::matcher;
use crate::torrent::Torrent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedEntry {
    /// Path of the torrent file
    pub torrent: PathBuf,
    pub directory: PathBuf,
}

/// A per-item failure that did not abort the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEntry {
    pub subject: String,
    pub message: String,
}

/// Unmatched torrents are listed separately from errors: not finding content is a normal
/// outcome, not a failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    pub matched: Vec<MatchedEntry>,
    pub unmatched: Vec<PathBuf>,
    pub errors: Vec<ErrorEntry>,
}

impl Report {
    /// Sorts torrents into matched and unmatched, preserving their order.
    pub fn from_torrents(torrents: &[Torrent]) -> Self {
        let mut report = Self::default();
        for torrent in torrents {
            match torrent.matched() {
                Some(directory) => report.matched.push(MatchedEntry {
                    torrent: torrent.path(),
                    directory: directory.to_owned(),
                }),
                None => report.unmatched.push(torrent.path()),
            }
        }
        report
    }

    pub fn add_match_failures(&mut self, failures: &[matcher::MatchFailure]) {
        self.errors
            .extend(failures.iter().map(|failure| ErrorEntry {
                subject: failure.torrent.display().to_string(),
                message: format!("{:#}", &failure.error),
            }));
    }

    pub fn add_copy_failures(&mut self, failures: &[copy::TorrentFailure]) {
        self.errors
            .extend(failures.iter().map(|failure| ErrorEntry {
                subject: failure.torrent.display().to_string(),
                message: format!("{} -> {:?}", &failure.error, &failure.destination),
            }));
    }

    /// Whether every torrent matched and nothing failed.
    pub fn is_complete(&self) -> bool {
        self.unmatched.is_empty() && self.errors.is_empty()
    }
}

impl std::fmt::Display for Report {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "matched: {}", self.matched.len())?;
        for entry in &self.matched {
            writeln!(
                f,
                "  {} -> {}",
                entry.torrent.display(),
                entry.directory.display()
            )?;
        }
        writeln!(f, "unmatched: {}", self.unmatched.len())?;
        for torrent in &self.unmatched {
            writeln!(f, "  {}", torrent.display())?;
        }
        write!(f, "errors: {}", self.errors.len())?;
        for entry in &self.errors {
            write!(f, "\n  {}: {}", entry.subject, entry.message)?;
        }
        Ok(())
    }
}
