//! Remote repository contents API: versioned fetch and conditional overwrite.
//!
//! ```text
//! GET {contents_url}{path}[?ref=branch]  -> { content: base64, sha, encoding }
//! PUT {contents_url}{path}               <- { message, content: base64, sha, branch? }
//! ```
//!
//! The `sha` sent on `PUT` is the one observed at fetch time; the remote
//! rejects the write if the file has moved on since.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use tally_core::config::GitHubConfig;
use tally_core::{VersionToken, VersionedDocument};

use crate::auth::Credential;
use crate::error::SyncError;
use crate::http::{self, HttpClient};

const ACCEPT: &str = "application/vnd.github+json";

/// Attach the headers every GitHub API call needs.
pub(crate) fn with_headers(request: ureq::Request, bearer: &str, api_version: &str) -> ureq::Request {
    request
        .set("Authorization", &format!("Bearer {bearer}"))
        .set("Accept", ACCEPT)
        .set("X-GitHub-Api-Version", api_version)
}

/// A conditional overwrite of one document.
#[derive(Debug, Clone, Copy)]
pub struct CommitRequest<'a> {
    pub path: &'a str,
    pub content: &'a [u8],
    /// Token from the fetch that produced the content being replaced.
    pub version: &'a VersionToken,
    pub message: &'a str,
}

/// What the remote reported after accepting a write.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommitReceipt {
    pub commit_sha: Option<String>,
    /// Token of the newly written revision.
    pub version: Option<VersionToken>,
}

/// Versioned document storage on the remote side.
pub trait DocumentRemote {
    fn fetch(&self, credential: &Credential, path: &str) -> Result<VersionedDocument, SyncError>;

    fn commit(
        &self,
        credential: &Credential,
        request: CommitRequest<'_>,
    ) -> Result<CommitReceipt, SyncError>;
}

#[derive(Debug, Deserialize)]
struct ContentResponse {
    #[serde(default)]
    content: Option<String>,
    sha: String,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Debug, Serialize)]
struct UpdateRequest<'a> {
    message: &'a str,
    content: String,
    sha: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    branch: Option<&'a str>,
}

#[derive(Debug, Default, Deserialize)]
struct UpdateResponse {
    #[serde(default)]
    content: Option<ShaRef>,
    #[serde(default)]
    commit: Option<ShaRef>,
}

#[derive(Debug, Deserialize)]
struct ShaRef {
    sha: String,
}

/// [`DocumentRemote`] over the GitHub repository contents API.
#[derive(Debug, Clone)]
pub struct ContentsApi {
    http: HttpClient,
    contents_url: String,
    api_version: String,
    branch: Option<String>,
}

impl ContentsApi {
    pub fn new(http: HttpClient, github: &GitHubConfig) -> Self {
        Self {
            http,
            contents_url: github.contents_url(),
            api_version: github.api_version.clone(),
            branch: github.branch.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.contents_url, path.trim_start_matches('/'))
    }
}

impl DocumentRemote for ContentsApi {
    fn fetch(&self, credential: &Credential, path: &str) -> Result<VersionedDocument, SyncError> {
        let fetch_err = |reason: String| SyncError::Fetch {
            path: path.to_string(),
            reason,
        };

        let mut request = with_headers(
            self.http.get(&self.url(path)),
            credential.bearer(),
            &self.api_version,
        );
        if let Some(branch) = self.branch.as_deref() {
            request = request.query("ref", branch);
        }

        let response = http::call(request).map_err(|e| fetch_err(e.to_string()))?;
        let body: ContentResponse =
            http::read_json(response).map_err(|e| fetch_err(e.to_string()))?;

        let encoding = body.encoding.as_deref().unwrap_or("base64");
        if encoding != "base64" {
            return Err(fetch_err(format!(
                "unsupported content encoding '{encoding}' (file too large for the contents API?)"
            )));
        }
        let raw = decode_content(body.content.as_deref().unwrap_or_default())
            .map_err(|e| fetch_err(format!("content is not valid base64: {e}")))?;

        tracing::debug!(path, sha = %body.sha, bytes = raw.len(), "fetched document");
        Ok(VersionedDocument {
            path: path.to_string(),
            raw,
            version: VersionToken(body.sha),
        })
    }

    fn commit(
        &self,
        credential: &Credential,
        request: CommitRequest<'_>,
    ) -> Result<CommitReceipt, SyncError> {
        let body = UpdateRequest {
            message: request.message,
            content: B64.encode(request.content),
            sha: &request.version.0,
            branch: self.branch.as_deref(),
        };
        let put = with_headers(
            self.http.put(&self.url(request.path)),
            credential.bearer(),
            &self.api_version,
        );

        let response = http::send_json(put, &body).map_err(|e| SyncError::Commit {
            path: request.path.to_string(),
            status: e.status(),
            reason: e.to_string(),
        })?;
        // The write has landed; an unreadable receipt is not a failure.
        let receipt: UpdateResponse = http::read_json(response).unwrap_or_default();
        Ok(CommitReceipt {
            commit_sha: receipt.commit.map(|c| c.sha),
            version: receipt.content.map(|c| VersionToken(c.sha)),
        })
    }
}

/// Decode the contents API's base64, which arrives wrapped at 60 columns.
pub fn decode_content(content: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let compact: String = content.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    B64.decode(compact)
}
