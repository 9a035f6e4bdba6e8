//! Contents API fetch/commit against a loopback stub server.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use serde_json::json;

use tally_core::config::GitHubConfig;
use tally_core::VersionToken;
use tally_sync::github::{CommitRequest, ContentsApi, DocumentRemote};
use tally_sync::http::HttpClient;
use tally_sync::{Credential, SyncError};
use tally_testkit::StubServer;

const PATH: &str = "data/community_apps/community_apps.json";
const BODY: &str = r#"{"apps": [{"app": {"uuid": "a1", "downloads": 3}}]}"#;

fn github(server: &StubServer, branch: Option<&str>) -> GitHubConfig {
    let mut value = json!({
        "api_base_url": server.base_url,
        "repository": "Droptop-Four/GlobalData",
        "token": "unused",
    });
    if let Some(branch) = branch {
        value["branch"] = json!(branch);
    }
    serde_json::from_value(value).expect("github config")
}

fn api(server: &StubServer, branch: Option<&str>) -> ContentsApi {
    let http = HttpClient::new(Duration::from_secs(5), "tally-test");
    ContentsApi::new(http, &github(server, branch))
}

/// Base64 wrapped at 60 columns the way the contents API returns it.
fn wrapped_base64(bytes: &[u8]) -> String {
    let encoded = B64.encode(bytes);
    encoded
        .as_bytes()
        .chunks(60)
        .map(|c| String::from_utf8_lossy(c).to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

fn credential() -> Credential {
    Credential::new("ghs_installation", None)
}

// ---------------------------------------------------------------------------
// Fetch
// ---------------------------------------------------------------------------

#[test]
fn fetch_decodes_wrapped_content_and_sends_api_headers() {
    let content = wrapped_base64(BODY.as_bytes());
    let server = StubServer::start(move |_| {
        (200, json!({ "content": content, "sha": "abc123", "encoding": "base64" }))
    });

    let doc = api(&server, Some("main")).fetch(&credential(), PATH).expect("fetch");

    assert_eq!(doc.raw, BODY.as_bytes());
    assert_eq!(doc.version, VersionToken::from("abc123"));
    assert_eq!(doc.path, PATH);

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    let req = &requests[0];
    assert_eq!(req.method, "GET");
    assert_eq!(
        req.path,
        format!("/repos/Droptop-Four/GlobalData/contents/{PATH}?ref=main")
    );
    assert_eq!(req.header("authorization"), Some("Bearer ghs_installation"));
    assert_eq!(req.header("accept"), Some("application/vnd.github+json"));
    assert_eq!(req.header("x-github-api-version"), Some("2022-11-28"));
    assert_eq!(req.header("user-agent"), Some("tally-test"));
}

#[test]
fn fetch_non_success_is_a_fetch_error() {
    let server = StubServer::start(|_| (404, json!({ "message": "Not Found" })));
    let err = api(&server, None).fetch(&credential(), PATH).unwrap_err();
    match err {
        SyncError::Fetch { path, reason } => {
            assert_eq!(path, PATH);
            assert!(reason.contains("404"), "got: {reason}");
        }
        other => panic!("expected fetch error, got {other:?}"),
    }
}

#[test]
fn fetch_of_oversized_file_is_a_fetch_error() {
    let server = StubServer::start(|_| {
        (200, json!({ "content": "", "sha": "abc", "encoding": "none" }))
    });
    let err = api(&server, None).fetch(&credential(), PATH).unwrap_err();
    assert!(matches!(err, SyncError::Fetch { .. }));
    assert!(err.to_string().contains("none"), "got: {err}");
}

// ---------------------------------------------------------------------------
// Commit
// ---------------------------------------------------------------------------

#[test]
fn commit_sends_content_sha_message_and_branch() {
    let server = StubServer::start(|_| {
        (
            200,
            json!({ "content": { "sha": "newsha" }, "commit": { "sha": "c0ffee" } }),
        )
    });
    let version = VersionToken::from("abc123");
    let receipt = api(&server, Some("main"))
        .commit(
            &credential(),
            CommitRequest {
                path: PATH,
                content: BODY.as_bytes(),
                version: &version,
                message: "Update download numbers",
            },
        )
        .expect("commit");

    assert_eq!(receipt.commit_sha.as_deref(), Some("c0ffee"));
    assert_eq!(receipt.version, Some(VersionToken::from("newsha")));

    let requests = server.requests_to("PUT", "/repos/Droptop-Four/GlobalData/contents/");
    assert_eq!(requests.len(), 1);
    let body = requests[0].json();
    assert_eq!(body["message"], "Update download numbers");
    assert_eq!(body["sha"], "abc123");
    assert_eq!(body["branch"], "main");
    let sent = B64.decode(body["content"].as_str().expect("content")).expect("base64");
    assert_eq!(sent, BODY.as_bytes());
}

#[test]
fn commit_with_stale_sha_is_a_conflict() {
    let server = StubServer::start(|_| {
        (409, json!({ "message": "data/x.json does not match abc123" }))
    });
    let version = VersionToken::from("abc123");
    let err = api(&server, None)
        .commit(
            &credential(),
            CommitRequest {
                path: PATH,
                content: b"{}",
                version: &version,
                message: "m",
            },
        )
        .unwrap_err();

    assert!(err.is_conflict(), "got: {err:?}");
    assert!(err.to_string().contains("does not match"), "got: {err}");
}
