//! Error types for tally-core.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure (file not found, permission denied, etc.).
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (template/write path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load; includes file path and line context from serde_yaml.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`, so `~/.tally/` cannot be located.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// The config file did not exist at the expected path.
    #[error("config not found at {path}; run `tally init` first")]
    NotFound { path: PathBuf },

    /// The file parsed, but its contents cannot drive a run.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Errors raised while decoding or encoding a catalog document.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("document is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("document root must be a JSON object")]
    RootNotObject,

    #[error("document has no '{field}' array")]
    MissingCollection { field: String },

    #[error("entry {index} is not an object with a '{field}' record")]
    MalformedEntry { index: usize, field: String },

    #[error("record in entry {index} is invalid: {source}")]
    MalformedRecord {
        index: usize,
        #[source]
        source: serde_json::Error,
    },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}
