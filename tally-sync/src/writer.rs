//! Commit writer: encode a reconciled document and submit it conditionally.
//!
//! 1. Encode the reconciled document (4-space indent, original key order).
//! 2. Compare with the fetched bytes and skip the write if identical.
//! 3. In dry-run mode, stop and report what would have been written.
//! 4. Otherwise overwrite, guarded by the version token observed at fetch.
//!
//! A rejected write is never retried here; the next run starts from a fresh
//! fetch.

use tally_core::{CatalogDocument, DatasetKind, VersionToken, VersionedDocument};

use crate::auth::Credential;
use crate::error::SyncError;
use crate::github::{CommitRequest, DocumentRemote};

// ---------------------------------------------------------------------------
// Commit outcome
// ---------------------------------------------------------------------------

/// Outcome of committing one reconciled document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The remote accepted the new revision.
    Committed {
        commit_sha: Option<String>,
        version: Option<VersionToken>,
    },
    /// Encoded content is byte-identical to the fetched document; nothing sent.
    Unchanged,
    /// `--dry-run` mode: the document *would* have been written.
    WouldCommit,
}

impl CommitOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            CommitOutcome::Committed { .. } => "committed",
            CommitOutcome::Unchanged => "unchanged",
            CommitOutcome::WouldCommit => "would commit",
        }
    }
}

// ---------------------------------------------------------------------------
// commit
// ---------------------------------------------------------------------------

/// Where and how to commit.
#[derive(Debug, Clone, Copy)]
pub struct CommitTarget<'a> {
    pub kind: DatasetKind,
    pub message: &'a str,
    pub dry_run: bool,
}

/// Encode `document` and write it over `fetched` on `remote`.
pub fn commit(
    remote: &dyn DocumentRemote,
    credential: &Credential,
    fetched: &VersionedDocument,
    document: &CatalogDocument,
    target: CommitTarget<'_>,
) -> Result<CommitOutcome, SyncError> {
    let encoded = document.encode().map_err(|e| SyncError::Commit {
        path: fetched.path.clone(),
        status: None,
        reason: format!("failed to encode document: {e}"),
    })?;

    if encoded == fetched.raw {
        tracing::info!(kind = %target.kind, path = %fetched.path, "document unchanged; skipping commit");
        return Ok(CommitOutcome::Unchanged);
    }
    if target.dry_run {
        tracing::info!(
            kind = %target.kind,
            path = %fetched.path,
            bytes = encoded.len(),
            "dry run; not committing"
        );
        return Ok(CommitOutcome::WouldCommit);
    }

    let request = CommitRequest {
        path: &fetched.path,
        content: &encoded,
        version: &fetched.version,
        message: target.message,
    };
    match remote.commit(credential, request) {
        Ok(receipt) => {
            tracing::info!(
                kind = %target.kind,
                path = %fetched.path,
                commit = receipt.commit_sha.as_deref().unwrap_or("-"),
                "committed updated counts"
            );
            Ok(CommitOutcome::Committed {
                commit_sha: receipt.commit_sha,
                version: receipt.version,
            })
        }
        Err(err) => {
            if err.is_conflict() {
                tracing::warn!(
                    kind = %target.kind,
                    path = %fetched.path,
                    version = %fetched.version,
                    "document changed since fetch; commit rejected"
                );
            }
            Err(err)
        }
    }
}
