//! YAML configuration.
//!
//! # Storage layout
//!
//! ```text
//! ~/.tally/
//!   config.yaml   (mode 0600, written by `tally init`)
//! ```
//!
//! # API pattern
//!
//! Every loader has two forms:
//! - `fn_at(home: &Path, …)`: explicit home, used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Secrets may be left out of the file and supplied through the environment
//! (see [`ENV_OVERRIDES`]).

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, ConfigError};
use crate::types::{DatasetKind, DocumentLayout};

pub const DEFAULT_API_BASE_URL: &str = "https://api.github.com";
pub const DEFAULT_API_VERSION: &str = "2022-11-28";
pub const DEFAULT_USER_AGENT: &str = "update-community-apps-themes-downloads";
pub const DEFAULT_COMMIT_MESSAGE: &str = "Update download numbers";
pub const DEFAULT_STORE_BASE_URL: &str = "https://realm.mongodb.com";
pub const DEFAULT_STORE_SERVICE: &str = "mongodb-atlas";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_INTERVAL_SECS: u64 = 60 * 60;

/// Environment variables consulted by [`Config::apply_env_overrides`].
pub const ENV_OVERRIDES: &[&str] = &[
    "TALLY_GITHUB_TOKEN",
    "TALLY_GITHUB_APP_ID",
    "TALLY_GITHUB_PRIVATE_KEY",
    "TALLY_STORE_APP_ID",
    "TALLY_STORE_API_KEY",
    "TALLY_SENTRY_DSN",
];

// ---------------------------------------------------------------------------
// Config model
// ---------------------------------------------------------------------------

/// Root of `config.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub github: GitHubConfig,
    pub store: StoreConfig,
    pub datasets: Vec<DatasetConfig>,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub reporting: ReportingConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

/// Remote repository and the credentials used against it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitHubConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// `owner/name`.
    pub repository: String,
    /// Branch to read and commit on; the repository default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_commit_message")]
    pub commit_message: String,
    /// GitHub App id; used with one of the private key fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_path: Option<PathBuf>,
    /// Inline PEM. Prefer `private_key_path` or `TALLY_GITHUB_PRIVATE_KEY`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    /// Static token; bypasses the App exchange when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// How the GitHub credential is minted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitHubAuth {
    Token(String),
    App { app_id: u64, key: PrivateKeySource },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrivateKeySource {
    Path(PathBuf),
    Inline(String),
}

impl GitHubConfig {
    /// Resolve the configured auth method. A static token wins over App credentials.
    pub fn auth(&self) -> Result<GitHubAuth, ConfigError> {
        if let Some(token) = self.token.as_ref().filter(|t| !t.trim().is_empty()) {
            return Ok(GitHubAuth::Token(token.clone()));
        }
        let Some(app_id) = self.app_id else {
            return Err(ConfigError::Invalid(
                "github: set either `token` or `app_id` with a private key".to_string(),
            ));
        };
        let key = match (&self.private_key, &self.private_key_path) {
            (Some(pem), _) if !pem.trim().is_empty() => PrivateKeySource::Inline(pem.clone()),
            (_, Some(path)) => PrivateKeySource::Path(path.clone()),
            _ => {
                return Err(ConfigError::Invalid(
                    "github: `app_id` requires `private_key_path` or `private_key`".to_string(),
                ))
            }
        };
        Ok(GitHubAuth::App { app_id, key })
    }

    /// `{api_base_url}/repos/{repository}/contents/`
    pub fn contents_url(&self) -> String {
        format!(
            "{}/repos/{}/contents/",
            self.api_base_url.trim_end_matches('/'),
            self.repository.trim_matches('/')
        )
    }
}

/// Which backing store supplies the authoritative counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Atlas App Services (API-key login + `find` function call).
    #[default]
    Atlas,
    /// `<directory>/<collection>.json` exports on local disk.
    File,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKind::Atlas => write!(f, "atlas"),
            StoreKind::File => write!(f, "file"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub kind: StoreKind,
    #[serde(default = "default_store_base_url")]
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_store_service")]
    pub service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Directory of JSON exports for `kind: file`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

/// One reconciled catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub kind: DatasetKind,
    /// Store collection holding `{uuid, downloads}` documents.
    pub collection: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_field: Option<String>,
}

impl DatasetConfig {
    pub fn new(kind: DatasetKind, collection: impl Into<String>) -> Self {
        Self {
            kind,
            collection: collection.into(),
            path: None,
            collection_field: None,
            record_field: None,
        }
    }

    /// Document path, falling back to the kind's default.
    pub fn document_path(&self) -> &str {
        self.path.as_deref().unwrap_or_else(|| self.kind.default_path())
    }

    /// Document layout, each field falling back to the kind's default.
    pub fn layout(&self) -> DocumentLayout {
        let default = self.kind.default_layout();
        DocumentLayout {
            collection_field: self
                .collection_field
                .clone()
                .unwrap_or(default.collection_field),
            record_field: self.record_field.clone().unwrap_or(default.record_field),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ReportingConfig {
    /// `https://<key>@<host>/<project>`; failures are only logged when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentry_dsn: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_INTERVAL_SECS,
        }
    }
}

/// What a failing dataset does to the rest of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Every dataset runs in its own failure scope.
    #[default]
    Isolate,
    /// The first failing dataset aborts the run; later ones are skipped.
    FailFast,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::Isolate => write!(f, "isolate"),
            FailurePolicy::FailFast => write!(f, "fail-fast"),
        }
    }
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}
fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}
fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}
fn default_commit_message() -> String {
    DEFAULT_COMMIT_MESSAGE.to_string()
}
fn default_store_base_url() -> String {
    DEFAULT_STORE_BASE_URL.to_string()
}
fn default_store_service() -> String {
    DEFAULT_STORE_SERVICE.to_string()
}
fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}
fn default_interval_secs() -> u64 {
    DEFAULT_INTERVAL_SECS
}

// ---------------------------------------------------------------------------
// Overrides, validation, redaction
// ---------------------------------------------------------------------------

impl Config {
    /// Fill secrets from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_with(|name| std::env::var(name).ok());
    }

    /// Fill secrets from `lookup`; empty values are ignored.
    pub fn apply_overrides_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(token) = get("TALLY_GITHUB_TOKEN") {
            self.github.token = Some(token);
        }
        if let Some(app_id) = get("TALLY_GITHUB_APP_ID").and_then(|v| v.trim().parse().ok()) {
            self.github.app_id = Some(app_id);
        }
        if let Some(pem) = get("TALLY_GITHUB_PRIVATE_KEY") {
            self.github.private_key = Some(pem);
        }
        if let Some(app_id) = get("TALLY_STORE_APP_ID") {
            self.store.app_id = Some(app_id);
        }
        if let Some(key) = get("TALLY_STORE_API_KEY") {
            self.store.api_key = Some(key);
        }
        if let Some(dsn) = get("TALLY_SENTRY_DSN") {
            self.reporting.sentry_dsn = Some(dsn);
        }
    }

    /// Check that the config can drive a run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.github.repository.split('/').filter(|s| !s.is_empty()).count() != 2 {
            return invalid(format!(
                "github.repository must be `owner/name`, got '{}'",
                self.github.repository
            ));
        }
        self.github.auth()?;

        match self.store.kind {
            StoreKind::Atlas => {
                for (field, value) in [
                    ("app_id", &self.store.app_id),
                    ("api_key", &self.store.api_key),
                    ("database", &self.store.database),
                ] {
                    if value.as_deref().map_or(true, |v| v.trim().is_empty()) {
                        return invalid(format!("store.{field} is required for kind: atlas"));
                    }
                }
            }
            StoreKind::File => {
                if self.store.directory.is_none() {
                    return invalid("store.directory is required for kind: file".to_string());
                }
            }
        }

        if self.datasets.is_empty() {
            return invalid("at least one dataset must be configured".to_string());
        }
        let mut seen = HashSet::new();
        for dataset in &self.datasets {
            if !seen.insert(dataset.kind) {
                return invalid(format!("dataset '{}' is configured twice", dataset.kind));
            }
            if dataset.collection.trim().is_empty() {
                return invalid(format!("dataset '{}' has an empty collection", dataset.kind));
            }
        }

        if self.http.timeout_secs == 0 {
            return invalid("http.timeout_secs must be greater than zero".to_string());
        }
        if self.schedule.interval_secs == 0 {
            return invalid("schedule.interval_secs must be greater than zero".to_string());
        }
        Ok(())
    }

    /// Dataset entry for `kind`, if configured.
    pub fn dataset(&self, kind: DatasetKind) -> Option<&DatasetConfig> {
        self.datasets.iter().find(|d| d.kind == kind)
    }

    /// Copy with every secret replaced by a marker, for display.
    pub fn redacted(&self) -> Config {
        const MASK: &str = "<redacted>";
        let mask = |v: &Option<String>| v.as_ref().map(|_| MASK.to_string());
        let mut copy = self.clone();
        copy.github.token = mask(&self.github.token);
        copy.github.private_key = mask(&self.github.private_key);
        copy.store.api_key = mask(&self.store.api_key);
        copy.reporting.sentry_dsn = mask(&self.reporting.sentry_dsn);
        copy
    }
}

// ---------------------------------------------------------------------------
// Paths, load, template
// ---------------------------------------------------------------------------

/// `<home>/.tally/`
pub fn tally_root(home: &Path) -> PathBuf {
    home.join(".tally")
}

/// `<home>/.tally/config.yaml`, without touching the filesystem.
pub fn config_path_at(home: &Path) -> PathBuf {
    tally_root(home).join("config.yaml")
}

/// Load, apply environment overrides, and validate `path`.
///
/// Returns `ConfigError::NotFound` if absent,
/// `ConfigError::Parse` (with path + line context) if malformed YAML.
pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
    let mut config = read_from(path)?;
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

/// Parse `path` without overrides or validation.
pub fn read_from(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Load `<home>/.tally/config.yaml`.
pub fn load_at(home: &Path) -> Result<Config, ConfigError> {
    load_from(&config_path_at(home))
}

/// Serialize `config` back to YAML, e.g. a [`Config::redacted`] copy for display.
pub fn to_yaml(config: &Config) -> Result<String, ConfigError> {
    Ok(serde_yaml::to_string(config)?)
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<Config, ConfigError> {
    load_at(&home()?)
}

/// Commented starter config written by `tally init`.
pub const TEMPLATE: &str = r#"# tally configuration
github:
  repository: Droptop-Four/GlobalData
  # branch: main
  # GitHub App credentials (preferred):
  app_id: 0
  private_key_path: /path/to/app-private-key.pem
  # ...or a static token (also TALLY_GITHUB_TOKEN):
  # token: ghp_xxx
  user_agent: update-community-apps-themes-downloads
  commit_message: Update download numbers

store:
  kind: atlas
  app_id: your-app-services-id    # or TALLY_STORE_APP_ID
  # api_key: set TALLY_STORE_API_KEY
  database: droptop
  # kind: file
  # directory: /path/to/exports

datasets:
  - kind: applications
    collection: app_downloads
  - kind: themes
    collection: theme_downloads

http:
  timeout_secs: 30

# reporting:
#   sentry_dsn: https://key@o0.ingest.sentry.io/0   # or TALLY_SENTRY_DSN

schedule:
  interval_secs: 3600

failure_policy: isolate
"#;

/// Write [`TEMPLATE`] to `<home>/.tally/config.yaml` atomically.
///
/// Refuses to overwrite an existing file unless `force` is set.
pub fn write_template_at(home: &Path, force: bool) -> Result<PathBuf, ConfigError> {
    let path = config_path_at(home);
    write_template(&path, force)?;
    Ok(path)
}

/// Write [`TEMPLATE`] to an explicit `path`, creating parent directories.
pub fn write_template(path: &Path, force: bool) -> Result<(), ConfigError> {
    if path.exists() && !force {
        return Err(ConfigError::Invalid(format!(
            "{} already exists; pass --force to overwrite",
            path.display()
        )));
    }
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }

    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, TEMPLATE).map_err(|e| io_err(&tmp, e))?;
    set_file_permissions(&tmp)?;
    std::fs::rename(&tmp, path).map_err(|e| io_err(path, e))?;
    Ok(())
}

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
