//! Error types for tally-sync.

use thiserror::Error;

use tally_core::error::ConfigError;

/// All errors that can arise from a sync run.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Credential acquisition failed; fatal to the whole run.
    #[error("auth error: {0}")]
    Auth(String),

    /// Document retrieval or decode failed.
    #[error("fetch failed for {path}: {reason}")]
    Fetch { path: String, reason: String },

    /// Backing-store login or read failed.
    #[error("store read failed for '{collection}': {reason}")]
    Store { collection: String, reason: String },

    /// The remote refused the write, including a stale version token.
    #[error("commit rejected for {path}: {reason}")]
    Commit {
        path: String,
        status: Option<u16>,
        reason: String,
    },

    /// A configuration value could not be used.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SyncError {
    /// `true` when a commit was refused because the document moved on since fetch.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            SyncError::Commit {
                status: Some(409 | 422),
                ..
            }
        )
    }

    /// Short stage label for summaries.
    pub fn stage(&self) -> &'static str {
        match self {
            SyncError::Auth(_) => "auth",
            SyncError::Fetch { .. } => "fetch",
            SyncError::Store { .. } => "store",
            SyncError::Commit { .. } => "commit",
            SyncError::Config(_) => "config",
        }
    }
}
