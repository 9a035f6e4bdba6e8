//! tally core library: domain types, catalog document codec, configuration, errors.
//!
//! - [`types`]: newtypes, dataset kinds, [`CountIndex`]
//! - [`document`]: [`CatalogDocument`] decode / encode with big-integer fidelity
//! - [`config`]: YAML configuration, environment overrides, validation
//! - [`error`]: [`ConfigError`], [`DocumentError`]

pub mod config;
pub mod document;
pub mod error;
pub mod types;

pub use config::{Config, DatasetConfig, FailurePolicy};
pub use document::{CatalogDocument, Entry, Record};
pub use error::{ConfigError, DocumentError};
pub use types::{
    CountIndex, DatasetKind, DocumentLayout, DownloadCount, RecordId, VersionToken,
    VersionedDocument,
};
