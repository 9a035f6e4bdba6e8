//! Count store: the authoritative source of download counts.
//!
//! Every run rebuilds a [`CountIndex`] per collection with a single bulk
//! read. Two backends:
//!
//! - [`AtlasStore`]: hosted document database reached through its Data API
//!   (`api-key` login, then the `find` function over `functions/call`).
//! - [`FileCountStore`]: `<directory>/<collection>.json`, an array of
//!   `{ "uuid": ..., "downloads": ... }` rows. Used for offline runs.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use tally_core::config::{StoreConfig, StoreKind};
use tally_core::{CountIndex, DownloadCount, RecordId};

use crate::error::SyncError;
use crate::http::{self, HttpClient};

/// Read access to per-record download counts.
pub trait CountStore {
    /// Load every `(uuid, downloads)` pair in `collection`.
    fn load_counts(&self, collection: &str) -> Result<CountIndex, SyncError>;
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

/// Extended-JSON wrappers a numeric field may arrive in.
const NUMBER_WRAPPERS: [&str; 4] = ["$numberLong", "$numberInt", "$numberDouble", "$numberDecimal"];

/// Read a count that may arrive as a plain number, a decimal string, or an
/// extended-JSON wrapper (`{"$numberLong": "123"}`).
///
/// Counts incremented from scripts are often stored as doubles, so any
/// integral value is accepted whatever its notation (`500.0`, `5e2`).
pub fn parse_stored_count(value: &Value) -> Option<DownloadCount> {
    match value {
        Value::Object(map) => NUMBER_WRAPPERS
            .iter()
            .find_map(|key| map.get(*key))
            .and_then(integral_count),
        other => integral_count(other),
    }
}

fn integral_count(value: &Value) -> Option<DownloadCount> {
    match value {
        Value::Number(n) => DownloadCount::parse_integral(&n.to_string()).ok(),
        Value::String(s) => DownloadCount::parse_integral(s).ok(),
        _ => None,
    }
}

/// Build the index for `collection` from raw rows.
///
/// Rows without a string `uuid` cannot be matched and are skipped. A row
/// whose count is not a non-negative integral value fails the whole load. When a
/// uuid repeats, the last row wins.
pub fn index_rows(collection: &str, rows: Vec<Value>) -> Result<CountIndex, SyncError> {
    let mut index = CountIndex::with_capacity(rows.len());
    for row in rows {
        let Some(uuid) = row.get("uuid").and_then(Value::as_str) else {
            tracing::debug!(collection, "skipping stored row without uuid");
            continue;
        };
        let raw = row.get("downloads").unwrap_or(&Value::Null);
        let count = parse_stored_count(raw).ok_or_else(|| SyncError::Store {
            collection: collection.to_string(),
            reason: format!("record '{uuid}' has invalid download count {raw}"),
        })?;
        if index.insert(RecordId::from(uuid), count).is_some() {
            tracing::debug!(collection, uuid, "duplicate uuid in store; keeping last");
        }
    }
    Ok(index)
}

// ---------------------------------------------------------------------------
// File store
// ---------------------------------------------------------------------------

/// Counts kept as JSON files on disk.
#[derive(Debug, Clone)]
pub struct FileCountStore {
    directory: PathBuf,
}

impl FileCountStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn collection_path(&self, collection: &str) -> PathBuf {
        self.directory.join(format!("{collection}.json"))
    }
}

impl CountStore for FileCountStore {
    fn load_counts(&self, collection: &str) -> Result<CountIndex, SyncError> {
        let path = self.collection_path(collection);
        let store_err = |reason: String| SyncError::Store {
            collection: collection.to_string(),
            reason: format!("{}: {reason}", path.display()),
        };
        let contents = std::fs::read_to_string(&path).map_err(|e| store_err(e.to_string()))?;
        let rows: Vec<Value> =
            serde_json::from_str(&contents).map_err(|e| store_err(e.to_string()))?;
        index_rows(collection, rows)
    }
}

// ---------------------------------------------------------------------------
// Hosted store
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    key: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    access_token: String,
}

/// Session against the hosted store's Data API.
///
/// Logs in once on [`AtlasStore::connect`]; the session token is reused for
/// every collection read in the run.
pub struct AtlasStore {
    http: HttpClient,
    app_url: String,
    access_token: String,
    service: String,
    database: String,
}

impl AtlasStore {
    pub fn connect(http: HttpClient, config: &StoreConfig) -> Result<Self, SyncError> {
        let database = config.database.clone().unwrap_or_default();
        let session_err = |reason: String| SyncError::Store {
            collection: database.clone(),
            reason: format!("login failed: {reason}"),
        };
        let app_id = config
            .app_id
            .as_deref()
            .ok_or_else(|| session_err("store.app_id is not set".into()))?;
        let api_key = config
            .api_key
            .as_deref()
            .ok_or_else(|| session_err("store.api_key is not set".into()))?;

        let app_url = format!(
            "{}/api/client/v2.0/app/{app_id}",
            config.base_url.trim_end_matches('/')
        );
        let login_url = format!("{app_url}/auth/providers/api-key/login");
        let response = http::send_json(http.post(&login_url), &LoginRequest { key: api_key })
            .map_err(|e| session_err(e.to_string()))?;
        let login: LoginResponse =
            http::read_json(response).map_err(|e| session_err(e.to_string()))?;

        tracing::info!(app_id, database = %database, "store session opened");
        Ok(Self {
            http,
            app_url,
            access_token: login.access_token,
            service: config.service.clone(),
            database,
        })
    }
}

impl CountStore for AtlasStore {
    fn load_counts(&self, collection: &str) -> Result<CountIndex, SyncError> {
        let store_err = |reason: String| SyncError::Store {
            collection: collection.to_string(),
            reason,
        };
        let body = json!({
            "name": "find",
            "service": self.service,
            "arguments": [{
                "database": self.database,
                "collection": collection,
                "query": {},
                "project": { "uuid": 1, "downloads": 1, "_id": 0 },
            }],
        });
        let request = self
            .http
            .post(&format!("{}/functions/call", self.app_url))
            .set("Authorization", &format!("Bearer {}", self.access_token));
        let response = http::send_json(request, &body).map_err(|e| store_err(e.to_string()))?;
        let rows: Vec<Value> = http::read_json(response).map_err(|e| store_err(e.to_string()))?;

        tracing::debug!(collection, rows = rows.len(), "loaded stored counts");
        index_rows(collection, rows)
    }
}

/// Open the store described by `config`. Opening a hosted store logs in.
pub fn open_store(http: &HttpClient, config: &StoreConfig) -> Result<Box<dyn CountStore>, SyncError> {
    match config.kind {
        StoreKind::Atlas => Ok(Box::new(AtlasStore::connect(http.clone(), config)?)),
        StoreKind::File => {
            let directory = config.directory.as_deref().unwrap_or(Path::new("."));
            Ok(Box::new(FileCountStore::new(directory)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn stored_count_accepts_every_wire_shape() {
        assert_eq!(parse_stored_count(&json!(7)), Some(DownloadCount::from(7)));
        assert_eq!(parse_stored_count(&json!("8")), Some(DownloadCount::from(8)));
        assert_eq!(
            parse_stored_count(&json!({"$numberLong": "9007199254740993"})).map(|c| c.to_string()),
            Some("9007199254740993".to_string())
        );
        assert_eq!(
            parse_stored_count(&json!({"$numberInt": "3"})),
            Some(DownloadCount::from(3))
        );
        assert_eq!(
            parse_stored_count(&json!({"$numberDouble": "500.0"})),
            Some(DownloadCount::from(500))
        );
        assert_eq!(
            parse_stored_count(&json!({"$numberDecimal": "42.00"})),
            Some(DownloadCount::from(42))
        );
        assert_eq!(parse_stored_count(&json!(500.0)), Some(DownloadCount::from(500)));
        assert_eq!(parse_stored_count(&json!(-1)), None);
        assert_eq!(parse_stored_count(&json!(1.5)), None);
        assert_eq!(parse_stored_count(&json!({"$numberDouble": "12.25"})), None);
        assert_eq!(parse_stored_count(&json!({"$numberDouble": "NaN"})), None);
        assert_eq!(parse_stored_count(&Value::Null), None);
    }

    #[test]
    fn double_counts_index_as_integers() {
        let rows: Vec<Value> = serde_json::from_str(
            r#"[{"uuid": "a1", "downloads": 500.0}, {"uuid": "a2", "downloads": {"$numberDouble": "7.0"}}]"#,
        )
        .unwrap();
        let index = index_rows("apps", rows).unwrap();
        assert_eq!(index[&RecordId::from("a1")].to_string(), "500");
        assert_eq!(index[&RecordId::from("a2")].to_string(), "7");
    }

    #[test]
    fn index_rows_keeps_last_duplicate_and_skips_rows_without_uuid() {
        let rows = vec![
            json!({"uuid": "a1", "downloads": 1}),
            json!({"downloads": 99}),
            json!({"uuid": "a1", "downloads": 2}),
            json!({"uuid": "a2", "downloads": {"$numberLong": "5"}}),
        ];
        let index = index_rows("apps", rows).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index[&RecordId::from("a1")], DownloadCount::from(2));
        assert_eq!(index[&RecordId::from("a2")], DownloadCount::from(5));
    }

    #[test]
    fn invalid_stored_count_fails_the_collection() {
        let rows = vec![json!({"uuid": "a1", "downloads": "lots"})];
        let err = index_rows("apps", rows).unwrap_err();
        assert!(matches!(err, SyncError::Store { ref collection, .. } if collection == "apps"));
        assert!(err.to_string().contains("a1"));
    }

    #[test]
    fn file_store_reads_collection_file() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("theme_downloads.json"),
            r#"[{"uuid": "t1", "downloads": 12345678901234567890}]"#,
        )
        .unwrap();
        let store = FileCountStore::new(tmp.path());
        let index = store.load_counts("theme_downloads").unwrap();
        assert_eq!(index[&RecordId::from("t1")].to_string(), "12345678901234567890");
    }

    #[test]
    fn file_store_missing_collection_is_store_error() {
        let tmp = TempDir::new().unwrap();
        let err = FileCountStore::new(tmp.path()).load_counts("nope").unwrap_err();
        assert!(matches!(err, SyncError::Store { .. }));
        assert!(err.to_string().contains("nope.json"));
    }
}
