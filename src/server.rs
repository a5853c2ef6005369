use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::harvest::TargetSource;
use crate::intel::IntelResolver;
use crate::pipeline::Pipeline;
use crate::proxy::ProxyConfig;
use crate::recon::{ReconHandle, ReconLoop};
use crate::scanner::ScanCoordinator;
use crate::store::DeviceStore;
use crate::targets::parse_targets;
use crate::types::{DeviceRecord, IntelRecord, ReconPhase, ReconSnapshot, Target};

const DEVICE_LIST_LIMIT: usize = 100;

#[derive(Clone)]
pub struct AppState {
    config: Arc<EngineConfig>,
    pipeline: Pipeline,
    source: Arc<dyn TargetSource>,
    inner: Arc<RwLock<ServerState>>, // recon handle and counters
}

#[derive(Default)]
struct ServerState {
    scans_started: u64,
    recon: Option<ReconHandle>,
}

impl AppState {
    pub fn new(config: EngineConfig, store: Arc<dyn DeviceStore>) -> crate::error::Result<Self> {
        let resolver = IntelResolver::new(&config.intel_settings()?)?;
        let source = Arc::new(config.harvest_source());
        Ok(Self {
            config: Arc::new(config),
            pipeline: Pipeline::new(store, Arc::new(resolver)),
            source,
            inner: Arc::new(RwLock::new(ServerState::default())),
        })
    }

    /// Harvest recon targets from `source` instead of the simulated generator.
    pub fn with_source(mut self, source: Arc<dyn TargetSource>) -> Self {
        self.source = source;
        self
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }
}

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    pub targets: Vec<String>,
    /// Omitted means the configured scan ports; an explicit empty list is rejected.
    #[serde(default)]
    pub ports: Option<Vec<u16>>,
    /// Overrides the configured proxy for this scan only.
    #[serde(default)]
    pub proxy: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScanAccepted {
    pub status: String,
    pub target_count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub device_count: usize,
    pub engine: String,
    pub scans_started: u64,
    pub recon: ReconStatus,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReconStatus {
    pub phase: ReconPhase,
    pub wave: u64,
    pub topic: Option<String>,
    pub stopping: bool,
}

impl ReconStatus {
    fn from_handle(handle: Option<&ReconHandle>) -> Self {
        let snap = handle.map(ReconHandle::snapshot).unwrap_or_default();
        Self::from_snapshot(&snap, handle.is_some_and(|h| h.is_stopping() && !h.is_finished()))
    }

    fn from_snapshot(snap: &ReconSnapshot, stopping: bool) -> Self {
        Self {
            phase: snap.phase,
            wave: snap.wave,
            topic: snap.topic.clone(),
            stopping,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/status", get(get_status))
        .route("/scan", post(post_scan))
        .route("/devices", get(get_devices))
        .route("/intel/{address}", get(get_intel))
        .route("/recon/start", post(post_recon_start))
        .route("/recon/stop", post(post_recon_stop))
        .with_state(state);

    Router::new()
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
}

pub async fn spawn_server(bind: &str, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(bind, "serving API");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn get_status(State(app): State<AppState>) -> impl IntoResponse {
    let device_count = app.pipeline.store().device_count().await;
    let s = app.inner.read().await;
    let out = StatusResponse {
        device_count,
        engine: format!("ghostscan {}", env!("CARGO_PKG_VERSION")),
        scans_started: s.scans_started,
        recon: ReconStatus::from_handle(s.recon.as_ref()),
    };
    (StatusCode::OK, Json(out))
}

async fn get_devices(State(app): State<AppState>) -> Json<Vec<DeviceRecord>> {
    Json(app.pipeline.store().devices(DEVICE_LIST_LIMIT).await)
}

async fn get_intel(State(app): State<AppState>, Path(address): Path<String>) -> Json<IntelRecord> {
    Json(app.pipeline.enrich(&address).await)
}

async fn post_scan(
    State(app): State<AppState>,
    payload: Result<Json<ScanRequest>, JsonRejection>,
) -> impl IntoResponse {
    // out-of-range ports fail here, before any handler logic
    let req = match payload {
        Ok(Json(req)) => req,
        Err(e) => return (StatusCode::BAD_REQUEST, e.body_text()).into_response(),
    };
    let mut targets: Vec<Target> = Vec::new();
    for t in &req.targets {
        match parse_targets(t) {
            Ok(mut parsed) => targets.append(&mut parsed),
            Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        }
    }
    if targets.is_empty() {
        return (StatusCode::BAD_REQUEST, "no targets given").into_response();
    }

    let ports = match req.ports {
        Some(p) if p.is_empty() => {
            return (StatusCode::BAD_REQUEST, "port list is empty").into_response()
        }
        Some(p) => p,
        None => match app.config.scan_ports() {
            Ok(p) => p,
            Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
        },
    };
    if ports.contains(&0) {
        return (StatusCode::BAD_REQUEST, "port 0 is not scannable").into_response();
    }

    let proxy = match req.proxy.as_deref() {
        Some(endpoint) => ProxyConfig::parse_optional(Some(endpoint)),
        None => app.config.proxy(),
    };
    let coordinator = match proxy.and_then(|p| ScanCoordinator::new(&app.config.scan_options(p))) {
        Ok(c) => c,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    let target_count = targets.len();
    app.inner.write().await.scans_started += 1;

    let pipeline = app.pipeline.clone();
    tokio::spawn(async move {
        let (tx, rx) = mpsc::unbounded_channel();
        let recorder = {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.drain(rx, "scanner").await })
        };
        let findings = coordinator.scan_with_events(&targets, &ports, &tx).await;
        drop(tx);
        if let Err(e) = recorder.await {
            warn!(error = %e, "discovery recorder ended abnormally");
        }
        pipeline.ingest(&findings, "scanner").await;
    });

    (
        StatusCode::ACCEPTED,
        Json(ScanAccepted {
            status: "Scan started in background".into(),
            target_count,
        }),
    )
        .into_response()
}

async fn post_recon_start(State(app): State<AppState>) -> impl IntoResponse {
    let mut s = app.inner.write().await;
    if s.recon.as_ref().is_some_and(|h| !h.is_finished()) {
        return (StatusCode::CONFLICT, "recon already running").into_response();
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let recon = match app
        .config
        .recon_settings()
        .and_then(|settings| ReconLoop::new(settings, app.source.clone(), tx))
    {
        Ok(r) => r,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    let pipeline = app.pipeline.clone();
    tokio::spawn(async move { pipeline.drain(rx, "recon").await });

    let handle = recon.spawn();
    info!("recon loop started via API");
    s.recon = Some(handle);
    let status = ReconStatus::from_handle(s.recon.as_ref());
    (StatusCode::ACCEPTED, Json(status)).into_response()
}

async fn post_recon_stop(State(app): State<AppState>) -> impl IntoResponse {
    let s = app.inner.read().await;
    match s.recon.as_ref() {
        Some(h) if !h.is_finished() => {
            if !h.is_stopping() {
                h.stop();
                info!("recon stop requested via API");
            }
            (StatusCode::OK, Json(ReconStatus::from_handle(Some(h)))).into_response()
        }
        _ => (StatusCode::CONFLICT, "recon is not running").into_response(),
    }
}
