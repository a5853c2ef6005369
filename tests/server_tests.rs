use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower::ServiceExt;

use ghostscan::config::EngineConfig;
use async_trait::async_trait;
use ghostscan::harvest::{StaticSource, TargetSource};
use ghostscan::server::{router, AppState, StatusResponse};
use ghostscan::store::MemoryStore;
use ghostscan::types::{DeviceRecord, IntelRecord, Provenance, ReconPhase};

fn test_state() -> AppState {
    AppState::new(EngineConfig::default(), Arc::new(MemoryStore::new()))
        .unwrap()
        .with_source(Arc::new(StaticSource::default()))
}

async fn call(state: &AppState, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
    let req = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(v) => req
            .header("content-type", "application/json")
            .body(Body::from(v.to_string()))
            .unwrap(),
        None => req.body(Body::empty()).unwrap(),
    };
    let resp = router(state.clone()).oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

#[tokio::test]
async fn status_starts_idle() {
    let state = test_state();
    let (code, body) = call(&state, "GET", "/api/status", None).await;
    assert_eq!(code, StatusCode::OK);
    let status: StatusResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(status.device_count, 0);
    assert_eq!(status.scans_started, 0);
    assert_eq!(status.recon.phase, ReconPhase::Idle);
    assert!(!status.recon.stopping);
}

#[tokio::test]
async fn bad_scan_requests_rejected() {
    let state = test_state();
    for body in [
        json!({"targets": ["10.0.0.0/40"]}),
        json!({"targets": []}),
        json!({"targets": ["127.0.0.1"], "proxy": "http://proxy:8080"}),
        json!({"targets": ["127.0.0.1"], "ports": [0]}),
        json!({"targets": ["127.0.0.1"], "ports": []}),
        json!({"targets": ["127.0.0.1"], "ports": [70000]}),
    ] {
        let (code, _) = call(&state, "POST", "/api/scan", Some(body.clone())).await;
        assert_eq!(code, StatusCode::BAD_REQUEST, "body {body}");
    }
}

#[tokio::test]
async fn scan_runs_in_background_and_records_devices() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let state = test_state();

    let (code, body) = call(
        &state,
        "POST",
        "/api/scan",
        Some(json!({"targets": ["127.0.0.1"], "ports": [port]})),
    )
    .await;
    assert_eq!(code, StatusCode::ACCEPTED);
    let accepted: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(accepted["target_count"], 1);

    let mut devices: Vec<DeviceRecord> = Vec::new();
    for _ in 0..50 {
        let (_, body) = call(&state, "GET", "/api/devices", None).await;
        devices = serde_json::from_slice(&body).unwrap();
        if devices.first().is_some_and(|d| !d.services.is_empty()) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].address, "127.0.0.1");
    assert_eq!(devices[0].ports, vec![port]);
    assert_eq!(devices[0].source, "scanner");

    let (_, body) = call(&state, "GET", "/api/status", None).await;
    let status: StatusResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(status.scans_started, 1);
    assert_eq!(status.device_count, 1);
}

#[tokio::test]
async fn intel_endpoint_serves_mock_offline() {
    let state = test_state();
    let (code, body) = call(&state, "GET", "/api/intel/203.0.113.4", None).await;
    assert_eq!(code, StatusCode::OK);
    let rec: IntelRecord = serde_json::from_slice(&body).unwrap();
    assert_eq!(rec.address, "203.0.113.4");
    assert_eq!(rec.provenance, Provenance::Mock);
}

#[tokio::test]
async fn recon_start_stop_lifecycle() {
    let state = test_state();

    let (code, _) = call(&state, "POST", "/api/recon/stop", None).await;
    assert_eq!(code, StatusCode::CONFLICT);

    let (code, _) = call(&state, "POST", "/api/recon/start", None).await;
    assert_eq!(code, StatusCode::ACCEPTED);

    let (code, _) = call(&state, "POST", "/api/recon/start", None).await;
    assert_eq!(code, StatusCode::CONFLICT);

    let (code, body) = call(&state, "POST", "/api/recon/stop", None).await;
    assert_eq!(code, StatusCode::OK);
    let recon: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(recon["stopping"], true);

    let mut phase = ReconPhase::Running;
    for _ in 0..50 {
        let (_, body) = call(&state, "GET", "/api/status", None).await;
        let status: StatusResponse = serde_json::from_slice(&body).unwrap();
        phase = status.recon.phase;
        if phase == ReconPhase::Idle && !status.recon.stopping {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(phase, ReconPhase::Idle);

    let (code, _) = call(&state, "POST", "/api/recon/start", None).await;
    assert_eq!(code, StatusCode::ACCEPTED);
}

#[tokio::test]
async fn omitted_ports_use_configured_defaults() {
    let state = test_state();
    let (code, body) = call(&state, "POST", "/api/scan", Some(json!({"targets": ["127.0.0.1"]}))).await;
    assert_eq!(code, StatusCode::ACCEPTED);
    let accepted: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(accepted["target_count"], 1);
}

/// Holds each harvest long enough to observe a wave in flight.
struct SlowHarvest;

#[async_trait]
impl TargetSource for SlowHarvest {
    async fn harvest(&self, _topic: &str) -> anyhow::Result<Vec<String>> {
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn repeated_stop_while_wave_finishes_reports_stopping() {
    let state = AppState::new(EngineConfig::default(), Arc::new(MemoryStore::new()))
        .unwrap()
        .with_source(Arc::new(SlowHarvest));

    let (code, _) = call(&state, "POST", "/api/recon/start", None).await;
    assert_eq!(code, StatusCode::ACCEPTED);
    let (code, _) = call(&state, "POST", "/api/recon/stop", None).await;
    assert_eq!(code, StatusCode::OK);

    let (code, body) = call(&state, "POST", "/api/recon/stop", None).await;
    assert_eq!(code, StatusCode::OK);
    let recon: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(recon["stopping"], true);
}
