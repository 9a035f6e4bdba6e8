//! Error sink: where run failures are reported besides the run report.
//!
//! Every failure is logged. With `reporting.sentry_dsn` set, it is also
//! posted to the error-tracking service. Delivery is best effort: a sink
//! failure is logged and never alters the run outcome.

use std::error::Error as _;

use serde::Serialize;

use tally_core::config::ReportingConfig;
use tally_core::{ConfigError, DatasetKind};

use crate::error::SyncError;
use crate::http::{self, HttpClient};

/// Receives each run failure exactly once.
pub trait ErrorSink {
    /// `kind` is `None` for failures that are not tied to one dataset.
    fn capture(&self, error: &SyncError, kind: Option<DatasetKind>);
}

/// `"outer: inner: innermost"` for an error and its sources.
pub fn error_chain(error: &SyncError) -> String {
    let mut chain = error.to_string();
    let mut source = error.source();
    while let Some(inner) = source {
        chain.push_str(": ");
        chain.push_str(&inner.to_string());
        source = inner.source();
    }
    chain
}

/// Logs failures through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl ErrorSink for LogSink {
    fn capture(&self, error: &SyncError, kind: Option<DatasetKind>) {
        let kind = kind.map(|k| k.to_string()).unwrap_or_else(|| "-".to_string());
        tracing::error!(kind = %kind, stage = error.stage(), "{}", error_chain(error));
    }
}

// ---------------------------------------------------------------------------
// Sentry
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct SentryEvent<'a> {
    level: &'static str,
    logger: &'static str,
    platform: &'static str,
    timestamp: String,
    message: String,
    exception: SentryExceptions<'a>,
    tags: SentryTags,
}

#[derive(Debug, Serialize)]
struct SentryExceptions<'a> {
    values: [SentryException<'a>; 1],
}

#[derive(Debug, Serialize)]
struct SentryException<'a> {
    #[serde(rename = "type")]
    ty: &'a str,
    value: String,
}

#[derive(Debug, Serialize)]
struct SentryTags {
    stage: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
}

/// Posts failures to a Sentry-compatible store endpoint, and logs them.
pub struct SentrySink {
    http: HttpClient,
    endpoint: String,
    auth: String,
}

impl SentrySink {
    /// Parse `{scheme}://{public_key}@{host}[/{path}]/{project_id}`.
    pub fn from_dsn(http: HttpClient, dsn: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::Invalid(format!("reporting.sentry_dsn is not a valid DSN: {dsn}"));

        let (scheme, rest) = dsn.split_once("://").ok_or_else(invalid)?;
        let (key, location) = rest.split_once('@').ok_or_else(invalid)?;
        let key = key.split(':').next().unwrap_or_default();
        let (prefix, project) = location
            .trim_end_matches('/')
            .rsplit_once('/')
            .ok_or_else(invalid)?;
        if key.is_empty() || prefix.is_empty() || project.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            http,
            endpoint: format!("{scheme}://{prefix}/api/{project}/store/"),
            auth: format!(
                "Sentry sentry_version=7, sentry_client=tally/{}, sentry_key={key}",
                env!("CARGO_PKG_VERSION")
            ),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl ErrorSink for SentrySink {
    fn capture(&self, error: &SyncError, kind: Option<DatasetKind>) {
        LogSink.capture(error, kind);

        let event = SentryEvent {
            level: "error",
            logger: "tally",
            platform: "other",
            timestamp: chrono::Utc::now().to_rfc3339(),
            message: error.to_string(),
            exception: SentryExceptions {
                values: [SentryException {
                    ty: error.stage(),
                    value: error_chain(error),
                }],
            },
            tags: SentryTags {
                stage: error.stage(),
                kind: kind.map(|k| k.to_string()),
            },
        };
        let request = self.http.post(&self.endpoint).set("X-Sentry-Auth", &self.auth);
        if let Err(e) = http::send_json(request, &event) {
            tracing::warn!(endpoint = %self.endpoint, "failed to report error: {e}");
        }
    }
}

/// Build the sink described by `reporting`.
pub fn error_sink(
    http: &HttpClient,
    reporting: &ReportingConfig,
) -> Result<Box<dyn ErrorSink + Send + Sync>, ConfigError> {
    match reporting.sentry_dsn.as_deref() {
        Some(dsn) => Ok(Box::new(SentrySink::from_dsn(http.clone(), dsn)?)),
        None => Ok(Box::new(LogSink)),
    }
}
