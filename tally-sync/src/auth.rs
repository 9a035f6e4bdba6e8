//! Credential provider.
//!
//! A GitHub App mints a short-lived installation token in three steps:
//!
//! 1. Sign an RS256 assertion `{iat, exp = iat + 600, iss = app_id}`.
//! 2. `GET /app/installations` with the assertion; take the first installation.
//! 3. `POST /app/installations/{id}/access_tokens` for the scoped token.
//!
//! The identity provider refuses assertions living longer than ten minutes.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use tally_core::config::{GitHubAuth, GitHubConfig, PrivateKeySource};

use crate::error::SyncError;
use crate::github::with_headers;
use crate::http::{self, HttpClient};

/// Lifetime of the signed assertion, in seconds. Must stay ≤ 600.
pub const ASSERTION_LIFETIME_SECS: i64 = 600;

/// Bearer token for the remote repository API, valid for one run.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn new(token: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    pub fn bearer(&self) -> &str {
        &self.token
    }

    /// `None` for tokens whose lifetime is not known (static tokens).
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Anything that can mint a [`Credential`] for one run.
pub trait CredentialSource {
    fn obtain(&self) -> Result<Credential, SyncError>;
}

/// A pre-issued token used as-is.
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl CredentialSource for StaticToken {
    fn obtain(&self) -> Result<Credential, SyncError> {
        Ok(Credential::new(self.0.clone(), None))
    }
}

/// Claims of the App assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionClaims {
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

/// Sign the App assertion issued at `issued_at`.
pub fn sign_assertion(
    app_id: u64,
    key: &EncodingKey,
    issued_at: DateTime<Utc>,
) -> Result<String, SyncError> {
    let claims = AssertionClaims {
        iat: issued_at.timestamp(),
        exp: (issued_at + Duration::seconds(ASSERTION_LIFETIME_SECS)).timestamp(),
        iss: app_id.to_string(),
    };
    jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, key)
        .map_err(|e| SyncError::Auth(format!("failed to sign app assertion: {e}")))
}

#[derive(Debug, Deserialize)]
struct Installation {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct AccessToken {
    token: String,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

/// [`CredentialSource`] for a GitHub App installation.
pub struct GitHubAppAuth {
    http: HttpClient,
    api_base_url: String,
    api_version: String,
    app_id: u64,
    key: EncodingKey,
}

impl GitHubAppAuth {
    /// `pem` is the App's RSA private key (PKCS#1 or PKCS#8).
    pub fn new(
        http: HttpClient,
        github: &GitHubConfig,
        app_id: u64,
        pem: &[u8],
    ) -> Result<Self, SyncError> {
        let key = EncodingKey::from_rsa_pem(pem)
            .map_err(|e| SyncError::Auth(format!("invalid app private key: {e}")))?;
        Ok(Self {
            http,
            api_base_url: github.api_base_url.trim_end_matches('/').to_string(),
            api_version: github.api_version.clone(),
            app_id,
            key,
        })
    }

    fn installation_id(&self, assertion: &str) -> Result<u64, SyncError> {
        let url = format!("{}/app/installations", self.api_base_url);
        let request = with_headers(self.http.get(&url), assertion, &self.api_version);
        let response = http::call(request)
            .map_err(|e| SyncError::Auth(format!("listing app installations failed: {e}")))?;
        let installations: Vec<Installation> = http::read_json(response)
            .map_err(|e| SyncError::Auth(format!("listing app installations failed: {e}")))?;
        installations
            .first()
            .map(|i| i.id)
            .ok_or_else(|| SyncError::Auth(format!("app {} has no installations", self.app_id)))
    }

    fn access_token(&self, assertion: &str, installation: u64) -> Result<AccessToken, SyncError> {
        let url = format!(
            "{}/app/installations/{installation}/access_tokens",
            self.api_base_url
        );
        let request = with_headers(self.http.post(&url), assertion, &self.api_version);
        let response = http::call(request).map_err(|e| {
            SyncError::Auth(format!(
                "token exchange for installation {installation} failed: {e}"
            ))
        })?;
        http::read_json(response).map_err(|e| {
            SyncError::Auth(format!(
                "token exchange for installation {installation} failed: {e}"
            ))
        })
    }
}

impl CredentialSource for GitHubAppAuth {
    fn obtain(&self) -> Result<Credential, SyncError> {
        let assertion = sign_assertion(self.app_id, &self.key, Utc::now())?;
        let installation = self.installation_id(&assertion)?;
        let token = self.access_token(&assertion, installation)?;
        tracing::info!(
            app_id = self.app_id,
            installation,
            expires_at = ?token.expires_at,
            "obtained installation token"
        );
        Ok(Credential::new(token.token, token.expires_at))
    }
}

/// Build the credential source described by `github`.
pub fn credential_source(
    http: &HttpClient,
    github: &GitHubConfig,
) -> Result<Box<dyn CredentialSource>, SyncError> {
    match github.auth()? {
        GitHubAuth::Token(token) => Ok(Box::new(StaticToken::new(token))),
        GitHubAuth::App { app_id, key } => {
            let pem = match key {
                PrivateKeySource::Path(path) => std::fs::read(&path).map_err(|e| {
                    SyncError::Auth(format!("cannot read private key {}: {e}", path.display()))
                })?,
                // Keys passed through env vars often carry literal `\n`.
                PrivateKeySource::Inline(pem) => pem.replace("\\n", "\n").into_bytes(),
            };
            Ok(Box::new(GitHubAppAuth::new(
                http.clone(),
                github,
                app_id,
                &pem,
            )?))
        }
    }
}
