// tests/http_clients.rs
// HTTP boundary clients against a local mock server.

use std::time::Duration;

use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use release_digest::error::{DeliveryError, FetchError, ParseError};
use release_digest::fetch::providers::github::GithubReleases;
use release_digest::fetch::providers::web::{content_digest, WebChangelog};
use release_digest::notify::{TelegramNotifier, Transport};
use release_digest::parse::claude::ClaudeParser;
use release_digest::parse::{ParseRequest, ReleaseParser};
use release_digest::retry::RetryPolicy;
use release_digest::{Category, FetchOutcome, VersionMarker};

const RELEASES_JSON: &str = include_str!("fixtures/github_releases.json");
const CHANGELOG_HTML: &str = include_str!("fixtures/changelog.html");

fn fast_retry() -> RetryPolicy {
    RetryPolicy::default()
        .with_attempts(3)
        .with_base_delay(Duration::from_millis(5))
}

fn github(server: &MockServer) -> GithubReleases {
    GithubReleases::new(reqwest::Client::new())
        .with_api_base(server.uri())
        .with_retry(fast_retry())
        .with_timeout(Duration::from_secs(5))
}

#[tokio::test]
async fn github_collects_releases_since_stored_tag() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/anthropics/claude-code/releases"))
        .and(query_param("per_page", "10"))
        .and(header("accept", "application/vnd.github+json"))
        .and(header("authorization", "Bearer gh-token"))
        .respond_with(ResponseTemplate::new(200).set_body_string(RELEASES_JSON))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = github(&server)
        .with_token(Some("gh-token".to_string()))
        .fetch("anthropics/claude-code", Some(&VersionMarker::from("v2.1.25")))
        .await
        .unwrap();

    let FetchOutcome::Changed { marker, delta } = outcome else {
        panic!("expected a change, got {outcome:?}");
    };
    assert_eq!(marker.as_str(), "v2.1.27");
    assert_eq!(delta.versions, vec!["v2.1.27", "v2.1.26"]);
    assert!(delta.text.starts_with("## v2.1.27\n"));
    assert!(delta.text.contains("## v2.1.26\n- Fixed a crash when resuming sessions"));
    assert!(!delta.text.contains("sandbox"));
    assert_eq!(delta.previous, Some(VersionMarker::from("v2.1.25")));
}

#[tokio::test]
async fn github_first_observation_is_a_baseline() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/o/r/releases"))
        .respond_with(ResponseTemplate::new(200).set_body_string(RELEASES_JSON))
        .mount(&server)
        .await;

    let outcome = github(&server).fetch("o/r", None).await.unwrap();
    assert_eq!(outcome, FetchOutcome::Baseline(VersionMarker::from("v2.1.27")));
}

#[tokio::test]
async fn github_retries_transient_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/o/r/releases"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/o/r/releases"))
        .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = github(&server).fetch("o/r", None).await.unwrap();
    assert_eq!(outcome, FetchOutcome::NoChange);
}

#[tokio::test]
async fn github_not_found_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/o/missing/releases"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let err = github(&server).fetch("o/missing", None).await.unwrap_err();
    assert!(matches!(err, FetchError::Status { status: 404 }));
}

#[tokio::test]
async fn web_page_digest_drives_change_detection() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/changelog"))
        .respond_with(ResponseTemplate::new(200).set_body_string(CHANGELOG_HTML))
        .mount(&server)
        .await;
    let url = format!("{}/changelog", server.uri());
    let web = WebChangelog::new(reqwest::Client::new()).with_retry(fast_retry());

    let FetchOutcome::Baseline(marker) = web.fetch(&url, None).await.unwrap() else {
        panic!("expected a baseline");
    };
    assert_eq!(
        marker,
        content_digest(
            "Changelog\nOctober 14, 2026\nAdded triage rules for <team> inboxes\n\
             Improved search ranking\nFixed duplicate notifications"
        )
    );

    assert_eq!(
        web.fetch(&url, Some(&marker)).await.unwrap(),
        FetchOutcome::NoChange
    );

    let stale = VersionMarker::from("0000");
    let FetchOutcome::Changed { delta, .. } = web.fetch(&url, Some(&stale)).await.unwrap() else {
        panic!("expected a change");
    };
    assert!(delta.versions.is_empty());
    assert!(delta.text.contains("Fixed duplicate notifications"));
    assert!(!delta.text.contains("Pricing"));
}

#[tokio::test]
async fn web_page_without_text_is_a_fetch_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/empty"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html><body><script>app()</script></body></html>"),
        )
        .mount(&server)
        .await;

    let err = WebChangelog::new(reqwest::Client::new())
        .fetch(&format!("{}/empty", server.uri()), None)
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Malformed(_)));
}

#[tokio::test]
async fn web_fetch_sends_the_configured_user_agent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/changelog"))
        .and(header("user-agent", "custom-agent/1.0"))
        .respond_with(ResponseTemplate::new(200).set_body_string(CHANGELOG_HTML))
        .expect(1)
        .mount(&server)
        .await;

    let client = reqwest::Client::builder()
        .user_agent("custom-agent/1.0")
        .build()
        .unwrap();
    let outcome = WebChangelog::new(client)
        .fetch(&format!("{}/changelog", server.uri()), None)
        .await
        .unwrap();
    assert!(matches!(outcome, FetchOutcome::Baseline(_)));
}

fn telegram(server: &MockServer) -> TelegramNotifier {
    TelegramNotifier::new(reqwest::Client::new(), "T0KEN".to_string(), "42".to_string())
        .with_api_base(server.uri())
        .with_retry(fast_retry())
}

#[tokio::test]
async fn telegram_sends_markdown_without_previews() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/botT0KEN/sendMessage"))
        .and(body_partial_json(serde_json::json!({
            "chat_id": "42",
            "text": "*hello*",
            "parse_mode": "Markdown",
            "disable_web_page_preview": true
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"ok": true, "result": {"message_id": 1}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    telegram(&server).send("*hello*").await.unwrap();
}

#[tokio::test]
async fn telegram_bad_request_is_rejected_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/botT0KEN/sendMessage"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "ok": false,
            "error_code": 400,
            "description": "Bad Request: can't parse entities"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = telegram(&server).send("*broken").await.unwrap_err();
    match err {
        DeliveryError::Rejected(d) => assert!(d.contains("can't parse entities")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn telegram_honours_rate_limit_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/botT0KEN/sendMessage"))
        .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
            "ok": false,
            "error_code": 429,
            "description": "Too Many Requests: retry after 0",
            "parameters": {"retry_after": 0}
        })))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/botT0KEN/sendMessage"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    telegram(&server).send("hi").await.unwrap();
}

#[tokio::test]
async fn telegram_ok_false_is_a_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/botT0KEN/sendMessage"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "ok": false,
            "description": "chat not found"
        })))
        .mount(&server)
        .await;

    let err = telegram(&server).send("hi").await.unwrap_err();
    assert!(err.to_string().contains("chat not found"));
}

fn claude(server: &MockServer) -> ClaudeParser {
    ClaudeParser::new(reqwest::Client::new(), "sk-test".to_string())
        .with_api_base(server.uri())
        .with_retry(fast_retry())
}

fn request() -> ParseRequest {
    ParseRequest {
        source_name: "Claude Code".to_string(),
        raw_text: "## v2.1.26\n- Fixed a crash when resuming sessions\n\n".to_string(),
        versions: vec!["v2.1.26".to_string()],
        previous: Some("v2.1.25".to_string()),
    }
}

#[tokio::test]
async fn claude_response_is_validated_into_a_record() {
    let server = MockServer::start().await;
    let answer = "```json\n{\"summary\":\"Claude Code v2.1.25 → v2.1.26\",\"try_this\":[],\
                  \"categories\":{\"Bug Fixes\":[\"Fixed a crash when resuming sessions\"]}}\n```";
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "sk-test"))
        .and(header("anthropic-version", "2023-06-01"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "msg_1",
            "type": "message",
            "content": [{"type": "text", "text": answer}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let record = claude(&server).parse(&request()).await.unwrap();
    assert!(record.summary.contains("v2.1.25") && record.summary.contains("v2.1.26"));
    assert!(record.try_this.is_empty());
    assert_eq!(record.categories.len(), 1);
    assert!(!record.categories[&Category::BugFixes].is_empty());
}

#[tokio::test]
async fn claude_prose_answer_is_a_parse_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "content": [{"type": "text", "text": "Here is your summary: all good!"}]
        })))
        .mount(&server)
        .await;

    let err = claude(&server).parse(&request()).await.unwrap_err();
    assert!(matches!(err, ParseError::NotJson(_)));
}

#[tokio::test]
async fn claude_auth_failure_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let err = claude(&server).parse(&request()).await.unwrap_err();
    assert!(matches!(err, ParseError::Status { status: 401 }));
}
