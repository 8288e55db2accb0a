//! HTTP tests for hds-server, driven in-process through the router.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use tower::ServiceExt;

use hds_core::{Collector, CollectorConfig, CollectorEvent, ProcMetrics, SamplerConfig};
use hds_server::build_router;

fn collector(dir: &Path) -> Arc<Collector> {
    let config = CollectorConfig {
        sampler: SamplerConfig {
            sample_count: 2,
            interval: Duration::from_millis(1),
        },
        delete_backoff: Duration::from_millis(1),
        ..CollectorConfig::with_output_dir(dir)
    };
    Arc::new(Collector::new(
        config,
        Arc::new(ProcMetrics::with_root("/nonexistent")),
    ))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let req = Request::get(uri).body(Body::empty()).unwrap();
    let (status, body) = send(app, req).await;
    (status, serde_json::from_slice(&body).unwrap())
}

async fn post_json(app: &Router, uri: &str, body: &str) -> (StatusCode, Value) {
    let req = Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let (status, body) = send(app, req).await;
    (status, serde_json::from_slice(&body).unwrap())
}

fn fault_body(app: &str, code: &str, ty: &str) -> String {
    fault_body_at(app, code, ty, "2026-02-15T01:30:00Z")
}

fn fault_body_at(app: &str, code: &str, ty: &str, timestamp: &str) -> String {
    json!({
        "ApplicationName": app,
        "FaultCode": code,
        "Type": ty,
        "Severity": "Critical",
        "Description": "renderer crashed",
        "Timestamp": timestamp,
        "CaptureRequest": {
            "LogFileLocation": "/var/log/x.log",
            "Capture": ["PCAP", "DLTLogs"],
            "Environment": ["CPU", "RAM"]
        }
    })
    .to_string()
}

#[tokio::test]
async fn index_lists_endpoints() {
    let tmp = tempfile::tempdir().unwrap();
    let app = build_router(collector(tmp.path()));
    let (status, body) = get_json(&app, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "HDS Collector");
    assert!(body["endpoints"]["/api/v1/faults/report"].is_object());
}

#[tokio::test]
async fn register_and_list_apps() {
    let tmp = tempfile::tempdir().unwrap();
    let app = build_router(collector(tmp.path()));

    let (status, body) = post_json(
        &app,
        "/api/v1/apps/register",
        r#"{"application":"Application B","version":"1.0.0"}"#,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "registered");
    assert_eq!(body["application"], "Application B");
    assert!(body["registered"].is_string());
    assert!(body["last_seen"].is_string());

    let (status, body) = get_json(&app, "/api/v1/apps").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    let first = &body["applications"][0];
    assert_eq!(first["application"], "Application B");
    assert_eq!(first["version"], "1.0.0");
    assert!(first["registration_id"].is_string());
}

#[tokio::test]
async fn register_rejects_blank_fields() {
    let tmp = tempfile::tempdir().unwrap();
    let app = build_router(collector(tmp.path()));

    let (status, body) = post_json(&app, "/api/v1/apps/register", r#"{"application":"A"}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("version"));

    let (status, _) = post_json(
        &app,
        "/api/v1/apps/register",
        r#"{"application":"  ","version":"1"}"#,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unparsable_report_is_bad_request() {
    let tmp = tempfile::tempdir().unwrap();
    let app = build_router(collector(tmp.path()));

    let (status, body) = post_json(&app, "/api/v1/faults/report", "{ not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, _) = post_json(
        &app,
        "/api/v1/faults/report",
        r#"{"ApplicationName":"X","FaultCode":"F1","Timestamp":"yesterday"}"#,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn report_dedups_and_lists() {
    let tmp = tempfile::tempdir().unwrap();
    let app = build_router(collector(tmp.path()));

    let body = fault_body("X", "F018", "F0");
    let (status, first) = post_json(&app, "/api/v1/faults/report", &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["status"], "fault_recorded");
    let (_, second) = post_json(&app, "/api/v1/faults/report", &body).await;
    assert_eq!(second["fault_id"], first["fault_id"]);
    assert_eq!(second["occurrence_count"], 2);
    post_json(&app, "/api/v1/faults/report", &fault_body("Y", "F204", "F4")).await;

    let (status, list) = get_json(&app, "/api/v1/faults").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["count"], 2);
    let item = &list["faults"][0];
    for field in ["id", "code", "description", "severity", "type", "typeDescription", "timestamp"] {
        assert!(!item[field].is_null(), "missing {field}");
    }

    let (_, for_x) = get_json(&app, "/api/v1/faults/app/x").await;
    assert_eq!(for_x["count"], 1);
    assert_eq!(for_x["faults"][0]["typeDescription"], "Software runtime exception");
    assert_eq!(for_x["faults"][0]["count"], 2);

    let id = first["fault_id"].as_str().unwrap();
    let (status, detail) = get_json(&app, &format!("/api/v1/faults/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["code"], "F018");
    assert_eq!(detail["package"], "");
    assert!(detail["timeseries"]["Cpu"].is_array());
}

#[tokio::test]
async fn unknown_fault_and_package_are_not_found() {
    let tmp = tempfile::tempdir().unwrap();
    let app = build_router(collector(tmp.path()));

    let (status, body) = get_json(&app, &format!("/api/v1/faults/{}", uuid::Uuid::new_v4())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());

    let (status, _) = get_json(&app, "/api/v1/faults/not-a-uuid").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = get_json(&app, "/api/v1/faults/package/pkg_missing.zip").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = get_json(&app, "/api/v1/faults/package/..%2Ffault_index.json").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Files beside the archives are not downloadable.
    std::fs::write(tmp.path().join("fault_index.json"), r#"{"packages":[]}"#).unwrap();
    let (status, body) = get_json(&app, "/api/v1/faults/package/fault_index.json").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());

    std::fs::write(tmp.path().join("pkg_unindexed.zip"), b"PK").unwrap();
    let (status, _) = get_json(&app, "/api/v1/faults/package/pkg_unindexed.zip").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn repeat_report_returns_first_timestamp() {
    let tmp = tempfile::tempdir().unwrap();
    let app = build_router(collector(tmp.path()));
    let uri = "/api/v1/faults/report";

    let early = fault_body_at("X", "F1", "F1", "2026-02-15T01:30:00Z");
    let late = fault_body_at("X", "F1", "F1", "2026-02-15T02:45:00Z");
    let (_, first) = post_json(&app, uri, &early).await;
    let (_, second) = post_json(&app, uri, &late).await;

    assert_eq!(second["occurrence_count"], 2);
    assert_eq!(second["timestamp"], first["timestamp"]);
    let id = first["fault_id"].as_str().unwrap();
    let (_, detail) = get_json(&app, &format!("/api/v1/faults/{id}")).await;
    assert_eq!(detail["timestamp"], first["timestamp"]);
    assert_ne!(detail["lastTimestamp"], first["timestamp"]);
}

#[tokio::test]
async fn clear_empties_registry() {
    let tmp = tempfile::tempdir().unwrap();
    let app = build_router(collector(tmp.path()));
    post_json(&app, "/api/v1/faults/report", &fault_body("X", "F1", "F1")).await;

    let req = Request::delete("/api/v1/faults").body(Body::empty()).unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["removed"], 1);

    let (_, list) = get_json(&app, "/api/v1/faults").await;
    assert_eq!(list["count"], 0);
}

#[tokio::test]
async fn packaged_archive_is_downloadable() {
    let tmp = tempfile::tempdir().unwrap();
    let collector = collector(tmp.path());
    let mut events = collector.events().subscribe();
    collector.start();
    let app = build_router(Arc::clone(&collector));

    let body = fault_body("X", "F018", "F0");
    let (_, reported) = post_json(&app, "/api/v1/faults/report", &body).await;

    let file = loop {
        let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            CollectorEvent::PackageSaved { package_file, .. } => break package_file,
            CollectorEvent::PackagingFailed { reason, .. } => panic!("packaging failed: {reason}"),
            _ => {}
        }
    };
    assert!(file.starts_with("pkg_X_F018_"));

    let id = reported["fault_id"].as_str().unwrap();
    let (_, detail) = get_json(&app, &format!("/api/v1/faults/{id}")).await;
    assert_eq!(detail["package"], file);
    assert_eq!(detail["timeseries"]["Cpu"].as_array().unwrap().len(), 2);

    let req = Request::get(format!("/api/v1/faults/package/{file}"))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/zip"
    );
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert!(bytes.starts_with(b"PK"));

    let (status, index) = get_json(&app, "/api/v1/packages").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(index["count"], 1);
    assert_eq!(index["packages"][0]["file"], file);
    assert_eq!(index["packages"][0]["fault"], "F018");
    assert_eq!(index["packages"][0]["app"], "X");

    collector.shutdown();
}
