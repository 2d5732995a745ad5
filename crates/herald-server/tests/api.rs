#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, StatusCode, header};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio_stream::StreamExt;
use tower::ServiceExt;

use herald_core::ServerConfig;
use herald_server::api::{AppState, build_router};
use herald_server::attachments::{AttachmentStore, FilesystemAttachmentStore};
use herald_server::dispatcher::NotificationDispatcher;
use herald_server::hub::BroadcastHub;
use herald_server::storage::HeraldDatabase;
use herald_server::versions::VersionStore;

struct TestApp {
    router: Router,
    hub: Arc<BroadcastHub>,
    dir: TempDir,
}

async fn test_app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        upload_dir: dir.path().join("uploads"),
        ..ServerConfig::default()
    };

    let db = HeraldDatabase::open_in_memory().await.unwrap();
    let hub = BroadcastHub::new(16);
    let attachments: Arc<dyn AttachmentStore> = Arc::new(FilesystemAttachmentStore::new(
        &config.upload_dir,
        &config.public_upload_prefix,
    ));

    let state = AppState {
        versions: VersionStore::new(db.clone(), Arc::clone(&attachments)),
        dispatcher: NotificationDispatcher::new(db, Arc::clone(&hub), attachments, 200),
        keep_alive: Duration::from_secs(15),
    };

    TestApp {
        router: build_router(state, &config),
        hub,
        dir,
    }
}

/// Send a request and return (status, headers, JSON body or `Null`).
async fn send(
    app: &TestApp,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, HeaderMap, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string())),
        None => builder.body(Body::empty()),
    }
    .unwrap();

    let resp = app.router.clone().oneshot(request).await.unwrap();
    let status = resp.status();
    let headers = resp.headers().clone();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, headers, json)
}

const BOUNDARY: &str = "herald-test-boundary";

/// A `multipart/form-data` part: (name, optional file name, content).
type Part<'a> = (&'a str, Option<&'a str>, &'a str);

async fn send_form(app: &TestApp, parts: &[Part<'_>]) -> (StatusCode, Value) {
    let mut body = Vec::new();
    for (name, file_name, content) in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        let disposition = match file_name {
            Some(file) => format!("form-data; name=\"{name}\"; filename=\"{file}\""),
            None => format!("form-data; name=\"{name}\""),
        };
        body.extend_from_slice(format!("Content-Disposition: {disposition}\r\n").as_bytes());
        if file_name.is_some() {
            body.extend_from_slice(b"Content-Type: application/octet-stream\r\n");
        }
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(content.as_bytes());
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    let request = Request::post("/api/notifications/form")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap();

    let resp = app.router.clone().oneshot(request).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

fn stored_uploads(app: &TestApp) -> usize {
    std::fs::read_dir(app.dir.path().join("uploads")).map_or(0, Iterator::count)
}

async fn register(app: &TestApp, key: &str) {
    let (status, _, _) = send(
        app,
        Method::POST,
        "/api/applications",
        Some(json!({ "appKey": key, "displayName": key.to_uppercase() })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

async fn publish(app: &TestApp, body: Value) -> (StatusCode, Value) {
    let (status, _, json) = send(app, Method::POST, "/api/notifications", Some(body)).await;
    (status, json)
}

#[tokio::test]
async fn health_is_ok() {
    let app = test_app().await;
    let resp = app
        .router
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn register_and_list_applications() {
    let app = test_app().await;

    let (status, _, created) = send(
        &app,
        Method::POST,
        "/api/applications",
        Some(json!({ "appKey": "  Acme ", "displayName": "Acme Mobile" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["appKey"], "acme");
    assert_eq!(created["isActive"], true);

    let (status, _, list) = send(&app, Method::GET, "/api/applications", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);
    assert_eq!(list[0]["versionCount"], 0);
    assert_eq!(list[0]["notificationCount"], 0);

    let (status, _, body) = send(
        &app,
        Method::POST,
        "/api/applications",
        Some(json!({ "appKey": "acme", "displayName": "Again" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");

    let (status, _, _) = send(&app, Method::GET, "/api/applications/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn publish_fetch_and_mark_read() {
    let app = test_app().await;
    register(&app, "acme").await;

    let (status, receipt) = publish(
        &app,
        json!({
            "title": "Maintenance",
            "message": "Back at noon",
            "targets": [{ "appKey": "acme" }]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(receipt["status"], "sent");
    let notification_id = receipt["results"][0]["notificationId"].as_i64().unwrap();

    let (status, _, inbox) =
        send(&app, Method::GET, "/api/devices/dev-1/notifications", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(inbox["deviceId"], "dev-1");
    let entries = inbox["notifications"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["notificationId"], notification_id);
    assert_eq!(entries[0]["status"], "delivered");
    assert_eq!(entries[0]["notification"]["title"], "Maintenance");
    assert_eq!(entries[0]["notification"]["appKey"], "acme");

    let (status, _, read) = send(
        &app,
        Method::POST,
        &format!("/api/devices/dev-1/notifications/{notification_id}/read"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(read["status"], "read");
    assert!(read["readAt"].is_i64());

    let (_, _, unread) = send(&app, Method::GET, "/api/devices/dev-1/notifications", None).await;
    assert!(unread["notifications"].as_array().unwrap().is_empty());

    let (_, _, all) = send(
        &app,
        Method::GET,
        "/api/devices/dev-1/notifications?includeRead=true",
        None,
    )
    .await;
    assert_eq!(all["notifications"][0]["status"], "read");
}

#[tokio::test]
async fn unknown_target_rejects_the_whole_publish() {
    let app = test_app().await;
    register(&app, "acme").await;

    let (status, body) = publish(
        &app,
        json!({
            "title": "Hello",
            "message": "World",
            "targets": [{ "appKey": "acme" }, { "appKey": "ghost" }]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert_eq!(body["missingAppKeys"], json!(["ghost"]));
    assert!(body["errors"]["targets[1].appKey"].is_array());

    let (_, _, page) = send(&app, Method::GET, "/api/notifications?appKey=acme", None).await;
    assert_eq!(page["total"], 0);
}

#[tokio::test]
async fn blank_fields_are_reported_per_field() {
    let app = test_app().await;

    let (status, body) = publish(&app, json!({ "title": " ", "targets": [] })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["errors"]["title"].is_array());
    assert!(body["errors"]["message"].is_array());
    assert!(body["errors"]["targets"].is_array());
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() {
    let app = test_app().await;
    let request = Request::post("/api/notifications")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{"))
        .unwrap();

    let resp = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn api_responses_disable_caching() {
    let app = test_app().await;
    let (_, headers, _) = send(&app, Method::GET, "/api/applications", None).await;

    assert_eq!(
        headers[header::CACHE_CONTROL],
        "no-cache, no-store, must-revalidate"
    );
    assert_eq!(headers[header::PRAGMA], "no-cache");
    assert_eq!(headers[header::EXPIRES], "0");
}

#[tokio::test]
async fn mark_read_for_unknown_notification_is_not_found() {
    let app = test_app().await;
    let (status, _, body) = send(
        &app,
        Method::POST,
        "/api/devices/dev-1/notifications/4242/read",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn blank_device_ids_are_rejected() {
    let app = test_app().await;
    register(&app, "acme").await;
    let (_, receipt) = publish(
        &app,
        json!({ "title": "t", "message": "m", "targets": [{ "appKey": "acme" }] }),
    )
    .await;
    let notification_id = receipt["results"][0]["notificationId"].as_i64().unwrap();

    let (status, _, body) = send(&app, Method::GET, "/api/devices/%20/notifications", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert!(body["errors"]["deviceId"].is_array());
    assert!(body.get("missingAppKeys").is_none());

    let (status, _, body) = send(
        &app,
        Method::POST,
        &format!("/api/devices/%20%20/notifications/{notification_id}/read"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert!(body["errors"]["deviceId"].is_array());
}

#[tokio::test]
async fn form_publish_streams_the_attachment() {
    let app = test_app().await;
    register(&app, "acme").await;
    register(&app, "beta").await;

    let (status, receipt) = send_form(
        &app,
        &[
            ("title", None, "Release"),
            ("body", None, "Build attached"),
            ("appKey", None, "acme"),
            ("targets", None, r#"[{"appKey":"beta"}]"#),
            ("file", Some("build.apk"), "apk bytes"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "body: {receipt}");
    assert_eq!(receipt["status"], "sent");
    assert_eq!(receipt["results"].as_array().unwrap().len(), 2);
    let file_url = receipt["fileUrl"].as_str().unwrap().to_string();
    assert!(file_url.starts_with("/uploads/") && file_url.ends_with(".apk"));

    let resp = app
        .router
        .clone()
        .oneshot(Request::get(&file_url).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"apk bytes");

    let (_, _, inbox) = send(&app, Method::GET, "/api/devices/dev-1/notifications", None).await;
    assert_eq!(inbox["notifications"][0]["notification"]["fileUrl"], file_url);
}

#[tokio::test]
async fn form_publish_without_file_or_with_empty_file() {
    let app = test_app().await;
    register(&app, "acme").await;

    let (status, receipt) = send_form(
        &app,
        &[
            ("title", None, "Plain"),
            ("message", None, "No file"),
            ("appKey", None, "acme"),
            ("file", Some(""), ""),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "body: {receipt}");
    assert!(receipt["fileUrl"].is_null());
    assert_eq!(stored_uploads(&app), 0);
}

#[tokio::test]
async fn rejected_form_publish_keeps_no_upload() {
    let app = test_app().await;
    register(&app, "acme").await;

    let (status, body) = send_form(
        &app,
        &[
            ("title", None, "Release"),
            ("message", None, "m"),
            ("appKey", None, "ghost"),
            ("file", Some("build.apk"), "apk bytes"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["missingAppKeys"], json!(["ghost"]));
    assert_eq!(stored_uploads(&app), 0);

    let (status, body) = send_form(
        &app,
        &[
            ("title", None, "Release"),
            ("message", None, "m"),
            ("targets", None, "not json"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["errors"]["targets"].is_array());
}

#[tokio::test]
async fn form_publish_requires_multipart() {
    let app = test_app().await;
    let (status, _, body) = send(
        &app,
        Method::POST,
        "/api/notifications/form",
        Some(json!({ "title": "t" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn release_check_and_device_report() {
    let app = test_app().await;
    register(&app, "acme").await;

    let (status, _, version) = send(
        &app,
        Method::POST,
        "/api/app-versions",
        Some(json!({
            "appKey": "acme",
            "versionName": "1.2.0",
            "fileUrl": "https://downloads.example.com/acme-1.2.0.apk"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let version_id = version["appVersionId"].as_i64().unwrap();
    assert_eq!(version["appKey"], "acme");

    let (status, _, fetched) = send(
        &app,
        Method::GET,
        &format!("/api/app-versions/{version_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["versionName"], "1.2.0");

    let (status, _, check) = send(
        &app,
        Method::GET,
        "/api/app-versions/check?appKey=acme&currentVersion=1.1.9",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(check["serverVersion"], "1.2.0");
    assert_eq!(check["updateAvailable"], true);

    let (status, _) = publish(
        &app,
        json!({
            "title": "Update",
            "message": "1.2.0 is out",
            "targets": [{ "appKey": "acme", "appVersionId": version_id }]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _, report) = send(
        &app,
        Method::POST,
        "/api/devices/dev-9/version",
        Some(json!({ "version": "1.0.0", "cardCode": "CARD-1", "appKey": "acme" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["deviceId"], "dev-9");
    assert_eq!(report["cardCode"], "CARD-1");
    assert_eq!(report["latestVersion"], "1.2.0");
    assert_eq!(report["updateRequired"], true);
}

#[tokio::test]
async fn uploaded_attachment_is_served_back() {
    let app = test_app().await;
    register(&app, "acme").await;

    let (status, receipt) = publish(
        &app,
        json!({
            "title": "Docs",
            "message": "See attachment",
            "targets": [{ "appKey": "acme" }],
            "fileBase64": "aGVsbG8=",
            "fileName": "hello.txt"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let file_url = receipt["fileUrl"].as_str().unwrap().to_string();
    assert!(file_url.starts_with("/uploads/"));

    let resp = app
        .router
        .clone()
        .oneshot(Request::get(&file_url).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"hello");
}

#[tokio::test]
async fn deactivate_and_clear_notifications() {
    let app = test_app().await;
    register(&app, "acme").await;

    for title in ["one", "two"] {
        let (status, _) = publish(
            &app,
            json!({ "title": title, "message": "m", "targets": [{ "appKey": "acme" }] }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (_, _, page) = send(&app, Method::GET, "/api/notifications?appKey=acme", None).await;
    assert_eq!(page["total"], 2);
    assert_eq!(page["pageSize"], 50);
    assert_eq!(page["items"][0]["title"], "two");
    let newest = page["items"][0]["notificationId"].as_i64().unwrap();

    let (status, _, _) = send(
        &app,
        Method::DELETE,
        &format!("/api/notifications/{newest}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, _, page) = send(&app, Method::GET, "/api/notifications?appKey=acme", None).await;
    assert_eq!(page["total"], 1);

    let (status, _, cleared) = send(
        &app,
        Method::POST,
        "/api/notifications/clear?appKey=acme",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cleared["status"], "cleared");
    assert_eq!(cleared["removed"], 2);

    let (status, _, _) = send(
        &app,
        Method::POST,
        "/api/notifications/clear?appKey=ghost",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn live_stream_receives_published_notifications() {
    let app = test_app().await;
    register(&app, "acme").await;

    let resp = app
        .router
        .clone()
        .oneshot(
            Request::get("/api/notifications/stream?appKey=acme")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(app.hub.subscriber_count(), 1);

    let mut frames = resp.into_body().into_data_stream();
    let connected = tokio::time::timeout(Duration::from_secs(5), frames.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let connected = String::from_utf8_lossy(&connected);
    assert!(connected.contains("event: connected"), "frame: {connected}");
    assert!(connected.contains(r#"data: {"subscriberId":"#), "frame: {connected}");

    let (status, _) = publish(
        &app,
        json!({ "title": "Live", "message": "now", "targets": [{ "appKey": "acme" }] }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let frame = tokio::time::timeout(Duration::from_secs(5), frames.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let text = String::from_utf8_lossy(&frame);
    assert!(text.contains("event: notification"), "frame: {text}");
    assert!(text.contains(r#""title":"Live""#), "frame: {text}");

    drop(frames);
    assert_eq!(app.hub.subscriber_count(), 0);
}

#[tokio::test]
async fn deactivated_application_stops_receiving_publishes() {
    let app = test_app().await;
    register(&app, "acme").await;

    let (status, _, body) =
        send(&app, Method::POST, "/api/applications/acme/deactivate", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["isActive"], false);

    let (status, body) = publish(
        &app,
        json!({ "title": "t", "message": "m", "targets": [{ "appKey": "acme" }] }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["missingAppKeys"], json!(["acme"]));

    let (status, _, body) =
        send(&app, Method::POST, "/api/applications/acme/activate", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["isActive"], true);
}
