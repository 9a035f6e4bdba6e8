use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the scheduler and its runs.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] tally_core::ConfigError),

    #[error(transparent)]
    Sync(#[from] tally_sync::SyncError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{failed} of {total} datasets failed")]
    DatasetsFailed { failed: usize, total: usize },

    #[error("{0} task join failure")]
    Join(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
