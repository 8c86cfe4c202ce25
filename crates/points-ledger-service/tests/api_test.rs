//! HTTP 入口集成测试
//!
//! 通过 `tower::ServiceExt::oneshot` 直接驱动路由，存储使用内存实现。

use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use points_ledger::{App, LedgerSettings, Repositories};
use points_shared::test_utils::test_bus_config;
use serde_json::{Value, json};
use tokio::sync::watch;
use tower::ServiceExt;

struct TestServer {
    app: App,
    router: Router,
    _shutdown: watch::Sender<bool>,
}

impl TestServer {
    fn start() -> Self {
        let mut settings = LedgerSettings::default();
        settings.app.event_bus = test_bus_config();
        let app = App::build(settings, Repositories::in_memory());
        let (shutdown, rx) = watch::channel(false);
        app.start_bus(rx).unwrap();
        let router = app.router();
        Self {
            app,
            router,
            _shutdown: shutdown,
        }
    }

    async fn call(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    async fn idle(&self) {
        assert!(self.app.bus.wait_idle(Duration::from_secs(5)).await);
    }
}

#[tokio::test]
async fn test_pass_and_attendance_endpoints() {
    let server = TestServer::start();

    let (status, body) = server
        .call("POST", "/api/passes", Some(json!({ "participantId": "P-100" })))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    let pass_id = body["data"]["id"].as_i64().unwrap();

    let uri = format!("/api/passes/{pass_id}/attendance");
    let (status, body) = server
        .call("POST", &uri, Some(json!({ "sessionId": "keynote" })))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["status"], "PENDING");

    let (status, body) = server
        .call("POST", &uri, Some(json!({ "sessionId": "keynote" })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "DUPLICATE_ATTENDANCE");

    server.idle().await;
    let (status, body) = server
        .call("GET", &format!("/api/passes/{pass_id}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["balance"], 5);

    let (_, body) = server
        .call("GET", &format!("/api/passes/{pass_id}/movements?limit=10"), None)
        .await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"][0]["sourceRef"], "attendance:1");

    // 余额不为零时不能关闭
    let (status, body) = server
        .call("POST", &format!("/api/passes/{pass_id}/close"), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "BALANCE_NOT_ZERO");
}

#[tokio::test]
async fn test_validation_and_not_found() {
    let server = TestServer::start();

    let (status, body) = server
        .call("POST", "/api/passes", Some(json!({ "participantId": "" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let (status, body) = server.call("GET", "/api/passes/404", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "PASS_NOT_FOUND");
    assert!(body["data"].is_null());

    let (status, _) = server
        .call(
            "GET",
            "/api/exchanges/0190c0de-0000-7000-8000-000000000000",
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_exchange_is_accepted_and_completes() {
    let server = TestServer::start();

    let (_, body) = server
        .call(
            "POST",
            "/api/admin/items",
            Some(json!({ "name": "Hoodie", "cost": 10, "stock": 3 })),
        )
        .await;
    let item_id = body["data"]["id"].as_i64().unwrap();

    let (_, body) = server
        .call("POST", "/api/passes", Some(json!({ "participantId": "P-200" })))
        .await;
    let pass_id = body["data"]["id"].as_i64().unwrap();
    for session in ["a", "b", "c"] {
        server
            .call(
                "POST",
                &format!("/api/passes/{pass_id}/attendance"),
                Some(json!({ "sessionId": session })),
            )
            .await;
    }
    server.idle().await;

    let (status, body) = server
        .call(
            "POST",
            "/api/exchanges",
            Some(json!({ "passId": pass_id, "itemId": item_id })),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["data"]["state"], "REQUESTED");
    let attempt_id = body["data"]["attemptId"].as_str().unwrap().to_string();

    server.idle().await;
    let (status, body) = server
        .call("GET", &format!("/api/exchanges/{attempt_id}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["state"], "COMPLETED");
    assert_eq!(body["data"]["record"]["cost"], 10);

    let (_, body) = server
        .call("GET", &format!("/api/passes/{pass_id}"), None)
        .await;
    assert_eq!(body["data"]["balance"], 5);
    let (status, body) = server
        .call("GET", &format!("/api/passes/{pass_id}/exchanges"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let records = body["data"].as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["attemptId"], attempt_id.as_str());
    assert_eq!(records[0]["state"], "COMPLETED");
}

#[tokio::test]
async fn test_admin_reconcile_and_dead_letters() {
    let server = TestServer::start();

    let (status, body) = server.call("POST", "/api/admin/reconcile", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["processed"], 0);

    let (status, body) = server.call("GET", "/api/admin/dead-letters", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([]));

    let (status, body) = server
        .call("POST", "/api/admin/dead-letters/replay", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["replayed"], 0);
}
