//! Axum HTTP + WebSocket front door: bearer-token auth, CORS, and a
//! broadcast-channel fan-out of `PushMessage`s to WS clients (§6).

use crate::auth::{ResolvedAuth, TokenScope};
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::rpc;
use crate::ws::{handle_connection, relay_push_messages};
use axum::{
    extract::{Path, State, WebSocketUpgrade},
    middleware::{self, Next},
    response::{Html, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use taskforge_core::engine::{PushMessage, RuntimeEngine};
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

pub struct GatewayState {
    pub auth: ResolvedAuth,
    pub engine: Arc<RuntimeEngine>,
    pub push_tx: broadcast::Sender<PushMessage>,
    pub started_at: std::time::Instant,
}

pub fn build_router(state: Arc<GatewayState>) -> Router {
    let reads = Router::new()
        .route("/tasks/:task_id", get(get_task_status_handler))
        .route("/trees/:tree_id", get(get_task_tree_handler))
        .route("/active", get(list_active_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_read_auth));

    let writes = Router::new()
        .route("/tasks", post(submit_task_handler))
        .route("/tasks/:task_id/step", post(step_handler))
        .route("/trees/:tree_id/cancel", post(cancel_tree_handler))
        .route("/settings", post(update_settings_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_write_auth));

    Router::new()
        .route("/", get(index_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .merge(reads)
        .merge(writes)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
        .with_state(state)
}

pub async fn start_gateway(config: GatewayConfig, engine: Arc<RuntimeEngine>, push_rx: tokio::sync::mpsc::UnboundedReceiver<PushMessage>) -> anyhow::Result<()> {
    let env_token = std::env::var("TASKFORGE_GATEWAY_TOKEN").ok();
    let auth = ResolvedAuth::from_config(&config.auth, env_token);

    let (push_tx, _) = broadcast::channel::<PushMessage>(1024);
    tokio::spawn(relay_push_messages(push_rx, push_tx.clone()));

    let state = Arc::new(GatewayState {
        auth,
        engine,
        push_tx,
        started_at: std::time::Instant::now(),
    });

    let app = build_router(state);

    let bind_addr: SocketAddr = format!("{}:{}", config.bind.to_addr(), config.port).parse().expect("invalid bind address");

    info!("taskforge gateway v{} starting", env!("CARGO_PKG_VERSION"));
    info!("  listening on: {bind_addr}");
    info!("  websocket:    ws://{bind_addr}/ws");
    info!("  auth mode:    {:?}", config.auth.mode);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn bearer_token(request: &axum::extract::Request) -> Option<&str> {
    request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

async fn require_read_auth(
    State(state): State<Arc<GatewayState>>,
    request: axum::extract::Request,
    next: Next,
) -> Result<axum::response::Response, GatewayError> {
    state.auth.verify_token(bearer_token(&request), TokenScope::Read)?;
    Ok(next.run(request).await)
}

async fn require_write_auth(
    State(state): State<Arc<GatewayState>>,
    request: axum::extract::Request,
    next: Next,
) -> Result<axum::response::Response, GatewayError> {
    state.auth.verify_token(bearer_token(&request), TokenScope::Write)?;
    Ok(next.run(request).await)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}

async fn submit_task_handler(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<rpc::SubmitTaskRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    let resp = rpc::submit_task(&state.engine, req).await?;
    Ok(Json(resp))
}

async fn get_task_status_handler(
    State(state): State<Arc<GatewayState>>,
    Path(task_id): Path<u64>,
) -> Result<impl IntoResponse, GatewayError> {
    Ok(Json(rpc::get_task_status(&state.engine, task_id).await?))
}

async fn step_handler(
    State(state): State<Arc<GatewayState>>,
    Path(task_id): Path<u64>,
    Json(req): Json<rpc::StepRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    Ok(Json(rpc::step(&state.engine, task_id, req).await?))
}

async fn get_task_tree_handler(
    State(state): State<Arc<GatewayState>>,
    Path(tree_id): Path<u64>,
) -> Result<impl IntoResponse, GatewayError> {
    Ok(Json(rpc::get_task_tree(&state.engine, tree_id).await?))
}

async fn cancel_tree_handler(
    State(state): State<Arc<GatewayState>>,
    Path(tree_id): Path<u64>,
) -> Result<impl IntoResponse, GatewayError> {
    rpc::cancel_tree(&state.engine, tree_id).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

async fn update_settings_handler(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<rpc::UpdateRuntimeSettingsRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    Ok(Json(rpc::update_runtime_settings(&state.engine, req).await?))
}

async fn list_active_handler(State(state): State<Arc<GatewayState>>) -> Result<impl IntoResponse, GatewayError> {
    Ok(Json(rpc::list_active(&state.engine).await?))
}

async fn index_handler(State(state): State<Arc<GatewayState>>) -> Html<String> {
    Html(format!(
        r#"<!DOCTYPE html><html><head><title>taskforge gateway</title>
<style>body {{ font-family: monospace; background: #1a1a2e; color: #eee; padding: 20px; max-width: 900px; margin: 0 auto; }}
h1 {{ color: #f39c12; }} code {{ background: #0f3460; padding: 2px 6px; border-radius: 4px; }}</style></head>
<body>
<h1>taskforge gateway v{version}</h1>
<p>WebSocket push stream: <code>ws://localhost/ws</code></p>
<p>Submit a task: <code>POST /tasks {{"instruction": "..."}}</code></p>
<p>Uptime: {uptime}s</p>
</body></html>"#,
        version = env!("CARGO_PKG_VERSION"),
        uptime = state.started_at.elapsed().as_secs(),
    ))
}
