//! End-to-end flows through the full router: policy denials, caller auth,
//! confirmation via the web approval queue, and backend forwarding with
//! token refresh.

use serde_json::Value;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wardgate::approval::ConfirmationMode;
use wardgate::config::Config;
use wardgate::gateway::run_gateway_with_listener;
use wardgate::security::keys::ApiKeyStore;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct TestGateway {
    port: u16,
    api_key: String,
    handle: tokio::task::JoinHandle<anyhow::Result<()>>,
    _workspace: TempDir,
}

impl TestGateway {
    async fn start(
        mail_base_url: String,
        calendar_base_url: String,
        confirmation_mode: ConfirmationMode,
        confirmation_timeout: Option<Duration>,
    ) -> Self {
        let workspace = TempDir::new().expect("temp workspace should be created");

        let api_keys_file = workspace.path().join("api_keys.json");
        let api_key = ApiKeyStore::new(api_keys_file.clone())
            .create("test-agent")
            .expect("test key should be created");

        let mail_token_file = workspace.path().join("mail_token.json");
        fs::write(&mail_token_file, r#"{"token": "mail-token"}"#).unwrap();
        let calendar_token_file = workspace.path().join("calendar_token.json");
        fs::write(&calendar_token_file, r#"{"token": "calendar-token"}"#).unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("ephemeral gateway listener should bind");
        let port = listener.local_addr().unwrap().port();

        let config = Config {
            port,
            api_keys_file,
            mail_token_file,
            calendar_token_file,
            confirmation_mode,
            confirmation_timeout,
            web_confirmation: true,
            mail_base_url,
            calendar_base_url,
            ..Config::default()
        };
        let handle =
            tokio::spawn(async move { run_gateway_with_listener(listener, Arc::new(config)).await });

        wait_until_ready(port).await;
        Self {
            port,
            api_key,
            handle,
            _workspace: workspace,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{path}", self.port)
    }

    fn client(&self) -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap()
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn wait_until_ready(port: u16) {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    for _ in 0..80 {
        if let Ok(response) = client
            .get(format!("http://127.0.0.1:{port}/health"))
            .send()
            .await
            && response.status().is_success()
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("gateway did not become ready on port {port}");
}

async fn start_default() -> (MockServer, MockServer, TestGateway) {
    let mail = MockServer::start().await;
    let calendar = MockServer::start().await;
    let gateway = TestGateway::start(
        mail.uri(),
        calendar.uri(),
        ConfirmationMode::MutatingOnly,
        Some(Duration::from_secs(30)),
    )
    .await;
    (mail, calendar, gateway)
}

#[tokio::test]
async fn health_and_docs_need_no_auth() {
    let (_mail, _calendar, gateway) = start_default().await;
    let client = gateway.client();

    let health: Value = client
        .get(gateway.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let docs: Value = client
        .get(gateway.url("/docs"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let operations = docs["allowed_operations"].as_array().unwrap();
    assert!(operations.iter().any(|op| {
        op["method"] == "DELETE"
            && op["path"] == "/calendar/calendars/{calendar_id}/events/{event_id}"
    }));
}

#[tokio::test]
async fn send_is_blocked_even_with_a_valid_key() {
    let (_mail, _calendar, gateway) = start_default().await;
    let response = gateway
        .client()
        .post(gateway.url("/mail/users/me/messages/send"))
        .bearer_auth(&gateway.api_key)
        .json(&serde_json::json!({"raw": "..."}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::FORBIDDEN);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "forbidden");
    assert_eq!(body["message"], "This operation is not allowed");
}

#[tokio::test]
async fn uncataloged_operations_are_denied_not_404() {
    let (_mail, _calendar, gateway) = start_default().await;
    let response = gateway
        .client()
        .delete(gateway.url("/mail/users/me/messages/abc123"))
        .bearer_auth(&gateway.api_key)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::FORBIDDEN);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "forbidden");
}

#[tokio::test]
async fn allowed_routes_require_a_key() {
    let (_mail, _calendar, gateway) = start_default().await;
    let response = gateway
        .client()
        .get(gateway.url("/mail/users/me/messages"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "auth_error");

    let response = gateway
        .client()
        .get(gateway.url("/mail/users/me/messages"))
        .bearer_auth("wg_definitelynotarealkey0000000000")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_ids_fail_before_forwarding() {
    let (mail, _calendar, gateway) = start_default().await;
    // No mock mounted: a forwarded request would 404 against wiremock, so a
    // 400 here proves nothing left the gateway.
    let response = gateway
        .client()
        .get(gateway.url("/mail/users/not-an-email/messages"))
        .bearer_auth(&gateway.api_key)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "proxy_error");
    assert_eq!(mail.received_requests().await.unwrap().len(), 0);
}

#[tokio::test]
async fn read_only_listing_forwards_without_confirmation() {
    let (mail, _calendar, gateway) = start_default().await;
    Mock::given(method("GET"))
        .and(path("/users/me/messages"))
        .and(header("authorization", "Bearer mail-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "messages": [{"id": "m1"}],
            "resultSizeEstimate": 1,
        })))
        .expect(1)
        .mount(&mail)
        .await;

    let response = gateway
        .client()
        .get(gateway.url("/mail/users/me/messages?maxResults=5"))
        .bearer_auth(&gateway.api_key)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["messages"][0]["id"], "m1");

    // Reads never touch the approval queue in mutating-only mode.
    let queue: Value = gateway
        .client()
        .get(gateway.url("/approval/api/queue"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(queue["pending"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn repeated_query_keys_reach_the_backend_intact() {
    let (mail, _calendar, gateway) = start_default().await;
    Mock::given(method("GET"))
        .and(path("/users/me/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "messages": [],
        })))
        .expect(1)
        .mount(&mail)
        .await;

    let response = gateway
        .client()
        .get(gateway.url(
            "/mail/users/me/messages?labelIds=INBOX&labelIds=UNREAD&maxResults=5",
        ))
        .bearer_auth(&gateway.api_key)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let requests = mail.received_requests().await.unwrap();
    let query = requests[0].url.query().unwrap();
    assert!(query.contains("labelIds=INBOX"));
    assert!(query.contains("labelIds=UNREAD"));
    assert!(query.contains("maxResults=5"));
}

#[tokio::test]
async fn trash_waits_for_web_approval_and_then_forwards() {
    let (mail, _calendar, gateway) = start_default().await;
    // Context fetch for the operator prompt.
    Mock::given(method("GET"))
        .and(path("/users/me/messages/abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "snippet": "Lunch on Friday?",
            "payload": {"headers": [
                {"name": "Subject", "value": "Lunch"},
                {"name": "From", "value": "friend@example.com"},
            ]},
        })))
        .mount(&mail)
        .await;
    Mock::given(method("POST"))
        .and(path("/users/me/messages/abc123/trash"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "abc123",
            "labelIds": ["TRASH"],
        })))
        .expect(1)
        .mount(&mail)
        .await;

    let client = gateway.client();
    let trash_url = gateway.url("/mail/users/me/messages/abc123/trash");
    let api_key = gateway.api_key.clone();
    let request = tokio::spawn(async move {
        client
            .post(trash_url)
            .bearer_auth(api_key)
            .send()
            .await
            .unwrap()
    });

    // The request is parked in the queue with its fetched context.
    let pending_id = loop {
        let queue: Value = gateway
            .client()
            .get(gateway.url("/approval/api/queue"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let pending = queue["pending"].as_array().unwrap().clone();
        if let Some(entry) = pending.first() {
            assert_eq!(entry["method"], "POST");
            assert_eq!(entry["path"], "/mail/users/me/messages/abc123/trash");
            assert_eq!(entry["message_subject"], "Lunch");
            assert_eq!(entry["message_from"], "friend@example.com");
            break entry["id"].as_str().unwrap().to_owned();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    };

    let approve: Value = gateway
        .client()
        .post(gateway.url(&format!("/approval/api/{pending_id}/approve")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(approve["success"], true);

    let response = request.await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["labelIds"][0], "TRASH");
}

#[tokio::test]
async fn rejected_event_delete_never_reaches_the_backend() {
    let (_mail, calendar, gateway) = start_default().await;
    // No DELETE mock: reaching the backend would be visible as a 404 body.

    let client = gateway.client();
    let delete_url = gateway.url("/calendar/calendars/primary/events/evt1");
    let api_key = gateway.api_key.clone();
    let request = tokio::spawn(async move {
        client
            .delete(delete_url)
            .bearer_auth(api_key)
            .send()
            .await
            .unwrap()
    });

    let pending_id = loop {
        let queue: Value = gateway
            .client()
            .get(gateway.url("/approval/api/queue"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if let Some(entry) = queue["pending"].as_array().unwrap().first() {
            break entry["id"].as_str().unwrap().to_owned();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    };

    gateway
        .client()
        .post(gateway.url(&format!("/approval/api/{pending_id}/reject")))
        .send()
        .await
        .unwrap();

    let response = request.await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::FORBIDDEN);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "forbidden");
    assert_eq!(body["message"], "Request rejected by operator");
    assert_eq!(calendar.received_requests().await.unwrap().len(), 0);
}

#[tokio::test]
async fn unanswered_confirmation_times_out_as_rejection() {
    let mail = MockServer::start().await;
    let calendar = MockServer::start().await;
    let gateway = TestGateway::start(
        mail.uri(),
        calendar.uri(),
        ConfirmationMode::MutatingOnly,
        Some(Duration::from_millis(300)),
    )
    .await;

    let response = gateway
        .client()
        .delete(gateway.url("/calendar/calendars/primary/events/evt1"))
        .bearer_auth(&gateway.api_key)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::FORBIDDEN);

    // The timed-out entry is gone from the queue.
    let queue: Value = gateway
        .client()
        .get(gateway.url("/approval/api/queue"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(queue["pending"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn settling_an_unknown_approval_id_is_a_404() {
    let (_mail, _calendar, gateway) = start_default().await;
    let response = gateway
        .client()
        .post(gateway.url("/approval/api/not-a-real-id/approve"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "proxy_error");
}

#[tokio::test]
async fn stale_backend_token_is_refreshed_transparently() {
    let mail = MockServer::start().await;
    let calendar = MockServer::start().await;
    let oauth = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users/me/labels"))
        .and(header("authorization", "Bearer stale-token"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&mail)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/me/labels"))
        .and(header("authorization", "Bearer fresh-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "labels": [{"id": "INBOX"}],
        })))
        .expect(1)
        .mount(&mail)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "fresh-token",
            "expires_in": 3600,
        })))
        .expect(1)
        .mount(&oauth)
        .await;

    let gateway = TestGateway::start(
        mail.uri(),
        calendar.uri(),
        ConfirmationMode::None,
        Some(Duration::from_secs(30)),
    )
    .await;
    fs::write(
        gateway._workspace.path().join("mail_token.json"),
        serde_json::to_string(&serde_json::json!({
            "token": "stale-token",
            "refresh_token": "r1",
            "token_uri": oauth.uri(),
        }))
        .unwrap(),
    )
    .unwrap();

    let response = gateway
        .client()
        .get(gateway.url("/mail/users/me/labels"))
        .bearer_auth(&gateway.api_key)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["labels"][0]["id"], "INBOX");
}

#[tokio::test]
async fn backend_errors_come_back_in_the_envelope() {
    let (mail, _calendar, gateway) = start_default().await;
    Mock::given(method("GET"))
        .and(path("/users/me/messages/zzz999"))
        .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
            "error": {"code": 404, "message": "Requested entity was not found."},
        })))
        .mount(&mail)
        .await;

    let response = gateway
        .client()
        .get(gateway.url("/mail/users/me/messages/zzz999"))
        .bearer_auth(&gateway.api_key)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "backend_error");
    assert_eq!(body["message"], "Requested entity was not found.");
    assert_eq!(body["details"]["error"]["code"], 404);
}
