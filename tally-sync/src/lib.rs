//! # tally-sync
//!
//! Download-count reconciliation against a remote catalog repository.
//!
//! Call [`pipeline::run`] with a loaded [`tally_core::Config`] to reconcile
//! every configured dataset, or [`pipeline::diff`] to preview one. The
//! building blocks ([`auth`], [`github`], [`store`], [`reconcile`],
//! [`writer`], [`sink`]) are public so they can be driven individually.

pub mod auth;
pub mod diff;
pub mod error;
pub mod github;
pub mod http;
pub mod pipeline;
pub mod reconcile;
pub mod sink;
pub mod store;
pub mod writer;

pub use auth::{Credential, CredentialSource};
pub use diff::DocumentDiff;
pub use error::SyncError;
pub use github::{ContentsApi, DocumentRemote};
pub use pipeline::{
    DatasetReport, DatasetStatus, Pipeline, RunOptions, RunReport, RunSummary, SyncScope,
};
pub use reconcile::{reconcile, ReconcileReport};
pub use sink::{ErrorSink, LogSink, SentrySink};
pub use store::{CountStore, FileCountStore};
pub use writer::CommitOutcome;
