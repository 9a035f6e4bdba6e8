//! Blocking HTTP client shared by every remote call in a run.
//!
//! Every request goes through one [`ureq::Agent`] built with an explicit
//! timeout, so no call can hang past `http.timeout_secs`.

use std::fmt;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Upper bound on error bodies kept for diagnostics.
const ERROR_BODY_LIMIT: usize = 512;

#[derive(Clone)]
pub struct HttpClient {
    agent: ureq::Agent,
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient").finish_non_exhaustive()
    }
}

impl HttpClient {
    pub fn new(timeout: Duration, user_agent: &str) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(user_agent)
            .build();
        Self { agent }
    }

    pub fn get(&self, url: &str) -> ureq::Request {
        tracing::debug!(method = "GET", url, "http request");
        self.agent.get(url)
    }

    pub fn post(&self, url: &str) -> ureq::Request {
        tracing::debug!(method = "POST", url, "http request");
        self.agent.post(url)
    }

    pub fn put(&self, url: &str) -> ureq::Request {
        tracing::debug!(method = "PUT", url, "http request");
        self.agent.put(url)
    }
}

/// Why an HTTP exchange did not yield a usable response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HttpFailure {
    /// The server answered with a non-success status.
    #[error("HTTP {code}{}", detail(.body))]
    Status { code: u16, body: String },
    /// Connection, TLS, or timeout failure.
    #[error("transport error: {0}")]
    Transport(String),
    /// A success response whose body could not be decoded.
    #[error("invalid response body: {0}")]
    Decode(String),
}

fn detail(body: &str) -> String {
    if body.is_empty() {
        String::new()
    } else {
        format!(": {body}")
    }
}

impl HttpFailure {
    pub fn status(&self) -> Option<u16> {
        match self {
            HttpFailure::Status { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<ureq::Error> for HttpFailure {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(code, response) => {
                let mut body = response.into_string().unwrap_or_default();
                truncate_at_char_boundary(&mut body, ERROR_BODY_LIMIT);
                HttpFailure::Status {
                    code,
                    body: body.trim().to_string(),
                }
            }
            ureq::Error::Transport(transport) => HttpFailure::Transport(transport.to_string()),
        }
    }
}

/// Send `request` with no body.
pub fn call(request: ureq::Request) -> Result<ureq::Response, HttpFailure> {
    request.call().map_err(HttpFailure::from)
}

/// Send `request` with a JSON body.
pub fn send_json(
    request: ureq::Request,
    body: &impl Serialize,
) -> Result<ureq::Response, HttpFailure> {
    request.send_json(body).map_err(HttpFailure::from)
}

/// Decode a success response body as JSON.
pub fn read_json<T: DeserializeOwned>(response: ureq::Response) -> Result<T, HttpFailure> {
    response
        .into_json::<T>()
        .map_err(|e| HttpFailure::Decode(e.to_string()))
}

fn truncate_at_char_boundary(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s.truncate(cut);
}
