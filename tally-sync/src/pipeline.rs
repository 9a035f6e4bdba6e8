//! Shared sync pipeline entrypoint used by CLI and daemon.
//!
//! One run:
//!
//! 1. Obtain a credential. Failure is fatal to the run.
//! 2. Open the count store. Failure is fatal to the run.
//! 3. For each selected dataset, in order: fetch → decode → load counts →
//!    reconcile → commit.
//!
//! Under [`FailurePolicy::Isolate`] a failing dataset does not stop the
//! others. Under [`FailurePolicy::FailFast`] the remaining datasets are
//! skipped. Every failure is handed to the [`ErrorSink`] exactly once.

use chrono::{DateTime, Utc};
use serde::Serialize;

use tally_core::{
    CatalogDocument, Config, ConfigError, DatasetConfig, DatasetKind, FailurePolicy,
    VersionedDocument,
};

use crate::auth::{self, Credential};
use crate::diff::{self, DocumentDiff};
use crate::error::SyncError;
use crate::github::{ContentsApi, DocumentRemote};
use crate::http::HttpClient;
use crate::reconcile::{self, ReconcileReport};
use crate::sink::ErrorSink;
use crate::store::{self, CountStore};
use crate::writer::{self, CommitOutcome, CommitTarget};

// ---------------------------------------------------------------------------
// Options and results
// ---------------------------------------------------------------------------

/// Scope for a sync pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncScope {
    /// Every configured dataset, in configuration order.
    All,
    /// A single dataset.
    Dataset(DatasetKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub scope: SyncScope,
    pub dry_run: bool,
    /// Overrides `failure_policy` from the config when set.
    pub policy: Option<FailurePolicy>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            scope: SyncScope::All,
            dry_run: false,
            policy: None,
        }
    }
}

/// Result of a dataset that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetReport {
    pub kind: DatasetKind,
    pub path: String,
    pub reconcile: ReconcileReport,
    pub outcome: CommitOutcome,
}

#[derive(Debug)]
pub enum DatasetStatus {
    Synced(DatasetReport),
    Failed(SyncError),
    /// Not attempted because an earlier dataset failed under fail-fast.
    Skipped,
}

#[derive(Debug)]
pub struct DatasetOutcome {
    pub kind: DatasetKind,
    pub status: DatasetStatus,
}

/// Everything that happened in one run.
#[derive(Debug)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub policy: FailurePolicy,
    pub outcomes: Vec<DatasetOutcome>,
}

impl RunReport {
    /// `true` when every selected dataset synced.
    pub fn is_success(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| matches!(o.status, DatasetStatus::Synced(_)))
    }

    pub fn failures(&self) -> impl Iterator<Item = (DatasetKind, &SyncError)> {
        self.outcomes.iter().filter_map(|o| match &o.status {
            DatasetStatus::Failed(err) => Some((o.kind, err)),
            _ => None,
        })
    }

    pub fn outcome(&self, kind: DatasetKind) -> Option<&DatasetStatus> {
        self.outcomes.iter().find(|o| o.kind == kind).map(|o| &o.status)
    }

    /// Serializable view for `--json` output and daemon logs.
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            started_at: self.started_at,
            finished_at: self.finished_at,
            dry_run: self.dry_run,
            policy: self.policy,
            success: self.is_success(),
            datasets: self.outcomes.iter().map(DatasetSummary::from).collect(),
        }
    }
}

/// JSON-friendly form of a [`RunReport`].
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub policy: FailurePolicy,
    pub success: bool,
    pub datasets: Vec<DatasetSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetSummary {
    pub kind: DatasetKind,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    pub entries: usize,
    pub matched: usize,
    pub changed: usize,
    pub unmatched: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&DatasetOutcome> for DatasetSummary {
    fn from(outcome: &DatasetOutcome) -> Self {
        let mut summary = DatasetSummary {
            kind: outcome.kind,
            status: "skipped",
            path: None,
            outcome: None,
            commit: None,
            entries: 0,
            matched: 0,
            changed: 0,
            unmatched: Vec::new(),
            stage: None,
            error: None,
        };
        match &outcome.status {
            DatasetStatus::Synced(report) => {
                summary.status = "synced";
                summary.path = Some(report.path.clone());
                summary.outcome = Some(report.outcome.label());
                if let CommitOutcome::Committed { commit_sha, .. } = &report.outcome {
                    summary.commit = commit_sha.clone();
                }
                summary.entries = report.reconcile.entries;
                summary.matched = report.reconcile.matched;
                summary.changed = report.reconcile.changed;
                summary.unmatched = report.reconcile.unmatched.iter().map(|u| u.0.clone()).collect();
            }
            DatasetStatus::Failed(err) => {
                summary.status = "failed";
                summary.stage = Some(err.stage());
                summary.error = Some(err.to_string());
            }
            DatasetStatus::Skipped => {}
        }
        summary
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// The per-dataset stages wired to concrete collaborators.
pub struct Pipeline<'a> {
    remote: &'a dyn DocumentRemote,
    store: &'a dyn CountStore,
    sink: &'a dyn ErrorSink,
    commit_message: &'a str,
}

struct Prepared {
    fetched: VersionedDocument,
    document: CatalogDocument,
    reconcile: ReconcileReport,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        remote: &'a dyn DocumentRemote,
        store: &'a dyn CountStore,
        sink: &'a dyn ErrorSink,
        commit_message: &'a str,
    ) -> Self {
        Self {
            remote,
            store,
            sink,
            commit_message,
        }
    }

    /// Fetch, decode, load counts and reconcile. Fetch failures stop the
    /// dataset before the store is touched.
    fn prepare(&self, credential: &Credential, dataset: &DatasetConfig) -> Result<Prepared, SyncError> {
        let fetched = self.remote.fetch(credential, dataset.document_path())?;
        let mut document = CatalogDocument::decode(&fetched.raw, &dataset.layout()).map_err(|e| {
            SyncError::Fetch {
                path: fetched.path.clone(),
                reason: e.to_string(),
            }
        })?;
        let index = self.store.load_counts(&dataset.collection)?;
        let reconcile = reconcile::reconcile(dataset.kind, &mut document, &index);
        Ok(Prepared {
            fetched,
            document,
            reconcile,
        })
    }

    /// Run one dataset end to end.
    pub fn sync_dataset(
        &self,
        credential: &Credential,
        dataset: &DatasetConfig,
        dry_run: bool,
    ) -> Result<DatasetReport, SyncError> {
        let prepared = self.prepare(credential, dataset)?;
        let outcome = writer::commit(
            self.remote,
            credential,
            &prepared.fetched,
            &prepared.document,
            CommitTarget {
                kind: dataset.kind,
                message: self.commit_message,
                dry_run,
            },
        )?;
        Ok(DatasetReport {
            kind: dataset.kind,
            path: prepared.fetched.path,
            reconcile: prepared.reconcile,
            outcome,
        })
    }

    /// Reconcile one dataset and diff the result against the remote copy.
    ///
    /// A failure is reported to the sink before it is returned.
    pub fn preview(&self, credential: &Credential, dataset: &DatasetConfig) -> Result<DocumentDiff, SyncError> {
        self.diff_dataset(credential, dataset).map_err(|err| {
            self.sink.capture(&err, Some(dataset.kind));
            err
        })
    }

    fn diff_dataset(&self, credential: &Credential, dataset: &DatasetConfig) -> Result<DocumentDiff, SyncError> {
        let prepared = self.prepare(credential, dataset)?;
        let encoded = prepared.document.encode().map_err(|e| SyncError::Fetch {
            path: prepared.fetched.path.clone(),
            reason: format!("failed to re-encode document: {e}"),
        })?;
        Ok(DocumentDiff {
            kind: dataset.kind,
            unified_diff: diff::unified_diff(&prepared.fetched.path, &prepared.fetched.raw, &encoded),
            path: prepared.fetched.path,
            report: prepared.reconcile,
        })
    }

    /// Run `datasets` in order under `policy`.
    pub fn run(
        &self,
        credential: &Credential,
        datasets: &[&DatasetConfig],
        dry_run: bool,
        policy: FailurePolicy,
    ) -> RunReport {
        let started_at = Utc::now();
        tracing::info!(datasets = datasets.len(), dry_run, policy = %policy, "sync run started");

        let mut outcomes = Vec::with_capacity(datasets.len());
        let mut aborted = false;
        for dataset in datasets {
            let kind = dataset.kind;
            if aborted {
                tracing::info!(kind = %kind, "skipped after earlier failure");
                outcomes.push(DatasetOutcome {
                    kind,
                    status: DatasetStatus::Skipped,
                });
                continue;
            }

            let span = tracing::info_span!("dataset", kind = %kind);
            let _guard = span.enter();
            let status = match self.sync_dataset(credential, dataset, dry_run) {
                Ok(report) => {
                    tracing::info!(
                        entries = report.reconcile.entries,
                        matched = report.reconcile.matched,
                        changed = report.reconcile.changed,
                        unmatched = report.reconcile.unmatched.len(),
                        outcome = report.outcome.label(),
                        "dataset synced"
                    );
                    DatasetStatus::Synced(report)
                }
                Err(err) => {
                    self.sink.capture(&err, Some(kind));
                    aborted = policy == FailurePolicy::FailFast;
                    DatasetStatus::Failed(err)
                }
            };
            outcomes.push(DatasetOutcome { kind, status });
        }

        let report = RunReport {
            started_at,
            finished_at: Utc::now(),
            dry_run,
            policy,
            outcomes,
        };
        tracing::info!(
            success = report.is_success(),
            failed = report.failures().count(),
            "sync run finished"
        );
        report
    }
}

// ---------------------------------------------------------------------------
// Configured entrypoints
// ---------------------------------------------------------------------------

/// Datasets selected by `scope`, in configuration order.
pub fn select_datasets(config: &Config, scope: SyncScope) -> Result<Vec<&DatasetConfig>, SyncError> {
    match scope {
        SyncScope::All => Ok(config.datasets.iter().collect()),
        SyncScope::Dataset(kind) => config.dataset(kind).map(|d| vec![d]).ok_or_else(|| {
            SyncError::Config(ConfigError::Invalid(format!("dataset '{kind}' is not configured")))
        }),
    }
}

/// Collaborators opened from config for one run.
struct Session {
    credential: Credential,
    store: Box<dyn CountStore>,
    remote: ContentsApi,
}

fn open_session(config: &Config, sink: &dyn ErrorSink) -> Result<Session, SyncError> {
    config.validate()?;
    let http = HttpClient::new(config.http.timeout(), &config.github.user_agent);

    let fatal = |err: SyncError| {
        sink.capture(&err, None);
        err
    };
    let credential = auth::credential_source(&http, &config.github)
        .and_then(|source| source.obtain())
        .map_err(fatal)?;
    let store = store::open_store(&http, &config.store).map_err(fatal)?;
    let remote = ContentsApi::new(http, &config.github);
    Ok(Session {
        credential,
        store,
        remote,
    })
}

/// Run the sync pipeline for `options.scope`.
///
/// This is the canonical entrypoint for both `tally run` and the daemon.
/// `Err` means the run could not start (config, auth, or store session);
/// per-dataset failures are inside the returned report.
pub fn run(config: &Config, options: RunOptions, sink: &dyn ErrorSink) -> Result<RunReport, SyncError> {
    let datasets = select_datasets(config, options.scope)?;
    let session = open_session(config, sink)?;
    let pipeline = Pipeline::new(
        &session.remote,
        session.store.as_ref(),
        sink,
        &config.github.commit_message,
    );
    Ok(pipeline.run(
        &session.credential,
        &datasets,
        options.dry_run,
        options.policy.unwrap_or(config.failure_policy),
    ))
}

/// Compute what a run would change in `kind`, without writing.
pub fn diff(config: &Config, kind: DatasetKind, sink: &dyn ErrorSink) -> Result<DocumentDiff, SyncError> {
    let datasets = select_datasets(config, SyncScope::Dataset(kind))?;
    let session = open_session(config, sink)?;
    let pipeline = Pipeline::new(
        &session.remote,
        session.store.as_ref(),
        sink,
        &config.github.commit_message,
    );
    pipeline.preview(&session.credential, datasets[0])
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;

    use tally_core::{CountIndex, DownloadCount, RecordId, VersionToken};

    use super::*;
    use crate::github::{CommitReceipt, CommitRequest};

    const APPS: &str = r#"{"apps": [{"app": {"uuid": "a1", "downloads": 0}}, {"app": {"uuid": "a2", "downloads": 0}}, {"app": {"uuid": "a3", "downloads": 0}}]}"#;
    const THEMES: &str = r#"{"themes": [{"theme": {"uuid": "t1", "downloads": 0}}]}"#;

    #[derive(Default)]
    struct MemoryRemote {
        files: HashMap<String, (String, String)>,
        fail_fetch: Vec<String>,
        reject_commit: Vec<String>,
        commits: RefCell<Vec<(String, String)>>,
    }

    impl MemoryRemote {
        fn with(mut self, path: &str, body: &str) -> Self {
            self.files.insert(path.into(), (body.into(), "v1".into()));
            self
        }
    }

    impl DocumentRemote for MemoryRemote {
        fn fetch(&self, _: &Credential, path: &str) -> Result<VersionedDocument, SyncError> {
            if self.fail_fetch.iter().any(|p| p == path) {
                return Err(SyncError::Fetch {
                    path: path.into(),
                    reason: "HTTP 500".into(),
                });
            }
            let (body, sha) = self.files.get(path).ok_or_else(|| SyncError::Fetch {
                path: path.into(),
                reason: "HTTP 404".into(),
            })?;
            Ok(VersionedDocument {
                path: path.into(),
                raw: body.as_bytes().to_vec(),
                version: VersionToken::from(sha.as_str()),
            })
        }

        fn commit(&self, _: &Credential, request: CommitRequest<'_>) -> Result<CommitReceipt, SyncError> {
            if self.reject_commit.iter().any(|p| p == request.path) {
                return Err(SyncError::Commit {
                    path: request.path.into(),
                    status: Some(409),
                    reason: "sha mismatch".into(),
                });
            }
            self.commits.borrow_mut().push((
                request.path.into(),
                String::from_utf8(request.content.to_vec()).unwrap(),
            ));
            Ok(CommitReceipt::default())
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        collections: HashMap<String, CountIndex>,
        reads: RefCell<Vec<String>>,
    }

    impl MemoryStore {
        fn with(mut self, collection: &str, pairs: &[(&str, u64)]) -> Self {
            let index = pairs
                .iter()
                .map(|(u, n)| (RecordId::from(*u), DownloadCount::from(*n)))
                .collect();
            self.collections.insert(collection.into(), index);
            self
        }
    }

    impl CountStore for MemoryStore {
        fn load_counts(&self, collection: &str) -> Result<CountIndex, SyncError> {
            self.reads.borrow_mut().push(collection.into());
            self.collections.get(collection).cloned().ok_or_else(|| SyncError::Store {
                collection: collection.into(),
                reason: "unreachable".into(),
            })
        }
    }

    #[derive(Default)]
    struct RecordingSink(RefCell<Vec<(Option<DatasetKind>, &'static str)>>);

    impl ErrorSink for RecordingSink {
        fn capture(&self, error: &SyncError, kind: Option<DatasetKind>) {
            self.0.borrow_mut().push((kind, error.stage()));
        }
    }

    fn datasets() -> Vec<DatasetConfig> {
        vec![
            DatasetConfig::new(DatasetKind::Applications, "app_downloads"),
            DatasetConfig::new(DatasetKind::Themes, "theme_downloads"),
        ]
    }

    fn apps_path() -> &'static str {
        DatasetKind::Applications.default_path()
    }

    fn themes_path() -> &'static str {
        DatasetKind::Themes.default_path()
    }

    fn run_with(
        remote: &MemoryRemote,
        store: &MemoryStore,
        sink: &RecordingSink,
        policy: FailurePolicy,
    ) -> RunReport {
        let configs = datasets();
        let refs: Vec<&DatasetConfig> = configs.iter().collect();
        Pipeline::new(remote, store, sink, "Update download numbers").run(
            &Credential::new("t", None),
            &refs,
            false,
            policy,
        )
    }

    #[test]
    fn both_datasets_sync_and_commit() {
        let remote = MemoryRemote::default()
            .with(apps_path(), APPS)
            .with(themes_path(), THEMES);
        let store = MemoryStore::default()
            .with("app_downloads", &[("a1", 10), ("a3", 4)])
            .with("theme_downloads", &[("t1", 2)]);
        let sink = RecordingSink::default();

        let report = run_with(&remote, &store, &sink, FailurePolicy::Isolate);

        assert!(report.is_success());
        assert!(sink.0.borrow().is_empty());
        let commits = remote.commits.borrow();
        assert_eq!(commits.len(), 2);
        assert!(commits[0].1.contains("\"downloads\": 10"));
        match report.outcome(DatasetKind::Applications) {
            Some(DatasetStatus::Synced(r)) => {
                assert_eq!(r.reconcile.unmatched, vec![RecordId::from("a2")]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn fetch_failure_skips_store_and_commit_for_that_dataset() {
        let mut remote = MemoryRemote::default()
            .with(apps_path(), APPS)
            .with(themes_path(), THEMES);
        remote.fail_fetch.push(apps_path().into());
        let store = MemoryStore::default()
            .with("app_downloads", &[])
            .with("theme_downloads", &[("t1", 2)]);
        let sink = RecordingSink::default();

        let report = run_with(&remote, &store, &sink, FailurePolicy::Isolate);

        assert!(matches!(
            report.outcome(DatasetKind::Applications),
            Some(DatasetStatus::Failed(SyncError::Fetch { .. }))
        ));
        assert!(matches!(report.outcome(DatasetKind::Themes), Some(DatasetStatus::Synced(_))));
        assert_eq!(*store.reads.borrow(), vec!["theme_downloads".to_string()]);
        assert_eq!(remote.commits.borrow().len(), 1);
        assert_eq!(*sink.0.borrow(), vec![(Some(DatasetKind::Applications), "fetch")]);
    }

    #[test]
    fn fail_fast_skips_remaining_datasets() {
        let mut remote = MemoryRemote::default()
            .with(apps_path(), APPS)
            .with(themes_path(), THEMES);
        remote.reject_commit.push(apps_path().into());
        let store = MemoryStore::default()
            .with("app_downloads", &[("a1", 1)])
            .with("theme_downloads", &[("t1", 2)]);
        let sink = RecordingSink::default();

        let report = run_with(&remote, &store, &sink, FailurePolicy::FailFast);

        assert!(!report.is_success());
        assert!(matches!(report.outcome(DatasetKind::Themes), Some(DatasetStatus::Skipped)));
        assert!(remote.commits.borrow().is_empty());
        assert_eq!(sink.0.borrow().len(), 1, "failure reported exactly once");
        assert_eq!(*store.reads.borrow(), vec!["app_downloads".to_string()]);
    }

    #[test]
    fn fail_fast_store_failure_skips_remaining_datasets() {
        let remote = MemoryRemote::default()
            .with(apps_path(), APPS)
            .with(themes_path(), THEMES);
        let store = MemoryStore::default().with("theme_downloads", &[("t1", 2)]);
        let sink = RecordingSink::default();

        let report = run_with(&remote, &store, &sink, FailurePolicy::FailFast);

        assert!(matches!(
            report.outcome(DatasetKind::Applications),
            Some(DatasetStatus::Failed(SyncError::Store { .. }))
        ));
        assert!(matches!(report.outcome(DatasetKind::Themes), Some(DatasetStatus::Skipped)));
        assert!(remote.commits.borrow().is_empty());
        assert_eq!(*store.reads.borrow(), vec!["app_downloads".to_string()]);
        assert_eq!(*sink.0.borrow(), vec![(Some(DatasetKind::Applications), "store")]);
    }

    #[test]
    fn unreadable_existing_counts_are_overwritten_and_committed() {
        let apps = r#"{"apps": [{"app": {"uuid": "a1", "downloads": "n/a"}}, {"app": {"uuid": "a2", "downloads": 2.0}}, {"app": {"uuid": "a3", "downloads": -1}}, {"app": {"uuid": "a4", "downloads": true}}]}"#;
        let remote = MemoryRemote::default()
            .with(apps_path(), apps)
            .with(themes_path(), THEMES);
        let store = MemoryStore::default()
            .with("app_downloads", &[("a1", 500), ("a2", 10), ("a4", 3)])
            .with("theme_downloads", &[("t1", 0)]);
        let sink = RecordingSink::default();

        let report = run_with(&remote, &store, &sink, FailurePolicy::Isolate);

        assert!(report.is_success(), "{:?}", report.failures().collect::<Vec<_>>());
        match report.outcome(DatasetKind::Applications) {
            Some(DatasetStatus::Synced(r)) => {
                assert_eq!(r.reconcile.changed, 4);
                assert_eq!(r.reconcile.unmatched, vec![RecordId::from("a3")]);
            }
            other => panic!("unexpected {other:?}"),
        }
        let commits = remote.commits.borrow();
        let committed: serde_json::Value = serde_json::from_str(&commits[0].1).unwrap();
        let counts: Vec<String> = committed["apps"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["app"]["downloads"].to_string())
            .collect();
        assert_eq!(counts, ["500", "10", "0", "3"]);
    }

    #[test]
    fn store_failure_is_isolated_to_its_dataset() {
        let remote = MemoryRemote::default()
            .with(apps_path(), APPS)
            .with(themes_path(), THEMES);
        let store = MemoryStore::default().with("theme_downloads", &[("t1", 2)]);
        let sink = RecordingSink::default();

        let report = run_with(&remote, &store, &sink, FailurePolicy::Isolate);

        let failures: Vec<_> = report.failures().map(|(k, e)| (k, e.stage())).collect();
        assert_eq!(failures, vec![(DatasetKind::Applications, "store")]);
        assert_eq!(remote.commits.borrow().len(), 1);
    }

    #[test]
    fn malformed_document_is_a_fetch_failure() {
        let remote = MemoryRemote::default()
            .with(apps_path(), "{not json")
            .with(themes_path(), THEMES);
        let store = MemoryStore::default()
            .with("app_downloads", &[])
            .with("theme_downloads", &[]);
        let sink = RecordingSink::default();

        let report = run_with(&remote, &store, &sink, FailurePolicy::Isolate);
        assert!(matches!(
            report.outcome(DatasetKind::Applications),
            Some(DatasetStatus::Failed(SyncError::Fetch { .. }))
        ));
    }

    #[test]
    fn preview_reports_diff_without_committing() {
        let remote = MemoryRemote::default().with(themes_path(), THEMES);
        let store = MemoryStore::default().with("theme_downloads", &[("t1", 7)]);
        let sink = RecordingSink::default();
        let dataset = DatasetConfig::new(DatasetKind::Themes, "theme_downloads");

        let diff = Pipeline::new(&remote, &store, &sink, "m")
            .preview(&Credential::new("t", None), &dataset)
            .expect("preview");
        assert!(!diff.is_empty());
        assert!(diff.unified_diff.contains("\"downloads\": 7"));
        assert!(remote.commits.borrow().is_empty());
        assert!(sink.0.borrow().is_empty());
    }

    #[test]
    fn preview_failure_reaches_the_sink() {
        let mut remote = MemoryRemote::default().with(themes_path(), THEMES);
        remote.fail_fetch.push(themes_path().into());
        let store = MemoryStore::default().with("theme_downloads", &[("t1", 7)]);
        let sink = RecordingSink::default();
        let dataset = DatasetConfig::new(DatasetKind::Themes, "theme_downloads");

        let err = Pipeline::new(&remote, &store, &sink, "m")
            .preview(&Credential::new("t", None), &dataset)
            .unwrap_err();
        assert!(matches!(err, SyncError::Fetch { .. }));
        assert_eq!(*sink.0.borrow(), vec![(Some(DatasetKind::Themes), "fetch")]);
        assert!(store.reads.borrow().is_empty());
    }

    #[test]
    fn summary_serializes_statuses() {
        let mut remote = MemoryRemote::default()
            .with(apps_path(), APPS)
            .with(themes_path(), THEMES);
        remote.fail_fetch.push(themes_path().into());
        let store = MemoryStore::default().with("app_downloads", &[("a1", 1)]);
        let sink = RecordingSink::default();

        let summary = run_with(&remote, &store, &sink, FailurePolicy::Isolate).summary();
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["datasets"][0]["status"], "synced");
        assert_eq!(json["datasets"][0]["outcome"], "committed");
        assert_eq!(json["datasets"][1]["status"], "failed");
        assert_eq!(json["datasets"][1]["stage"], "fetch");
    }

    #[test]
    fn unconfigured_scope_is_rejected() {
        let config: Config = serde_json::from_value(serde_json::json!({
            "github": { "repository": "o/r", "token": "t" },
            "store": { "kind": "file", "directory": "/tmp" },
            "datasets": [{ "kind": "applications", "collection": "app_downloads" }],
        }))
        .unwrap();
        let err = select_datasets(&config, SyncScope::Dataset(DatasetKind::Themes)).unwrap_err();
        assert!(err.to_string().contains("themes"), "got: {err}");
        assert_eq!(select_datasets(&config, SyncScope::All).unwrap().len(), 1);
    }
}
