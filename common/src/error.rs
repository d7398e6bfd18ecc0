//! Errors returned by the scan, match and copy phases.
//!
//! Only conditions that abort a whole call are represented here. A directory that already
//! exists is a reported outcome, a torrent without a match is a normal result, and a failed
//! copy of one torrent is collected in `copy::Outcome::failures` without failing the call.

/// Error aborting a whole phase or call.
///
/// The Display implementation includes the full chain of the underlying error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unexpected filesystem error while discovering directories or torrents.
    #[error("scan failed: {0:#}")]
    Scan(#[source] anyhow::Error),
    /// A torrent file could not be read or parsed.
    #[error("failed reading torrent {path:?}: {source:#}")]
    Parse {
        path: std::path::PathBuf,
        #[source]
        source: anyhow::Error,
    },
    /// A destination directory could not be created.
    #[error("cannot create directory {path:?}: {source:#}")]
    CreateDirectory {
        path: std::path::PathBuf,
        #[source]
        source: anyhow::Error,
    },
    /// The call was made with settings it does not support; nothing was touched.
    #[error("unsupported configuration: {0}")]
    UnsupportedConfiguration(String),
    /// A worker task panicked or was cancelled.
    #[error("worker task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
