use anyhow::Context;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State as AxumState,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use noclip_execution::{Arbiter, EntityStatus, TagStyle};
use noclip_types::{EntityId, Event, Reason};
use prometheus_client::{encoding::text::encode, registry::Registry};
use serde::Serialize;
use std::{fmt, sync::Arc};
use tokio::sync::{broadcast::error::RecvError, mpsc};
use tracing::{debug, info, warn};

use crate::{bridge::BridgeHost, ValidatedConfig};

const OPENMETRICS_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

#[derive(Clone)]
pub struct AppState {
    pub arbiter: Arc<Arbiter>,
    pub bridge: Arc<BridgeHost>,
    pub display: TagStyle,
    pub registry: Arc<Registry>,
}

impl AppState {
    pub fn new(config: &ValidatedConfig) -> Self {
        let bridge = Arc::new(BridgeHost::new(config.outbound_buffer.get()));
        let arbiter = Arc::new(Arbiter::new(
            config.arbiter.clone(),
            bridge.clone(),
            bridge.clone(),
        ));
        let mut registry = Registry::with_prefix("noclip");
        arbiter.metrics().register(&mut registry);
        Self {
            arbiter,
            bridge,
            display: config.display,
            registry: Arc::new(registry),
        }
    }
}

/// One row of `GET /state`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StatusView {
    pub entity: EntityId,
    pub reasons: Vec<Reason>,
    pub collisions_enabled: bool,
    pub stack: u8,
    pub penalty_remaining_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grace_remaining_secs: Option<u64>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub tag: String,
}

impl From<EntityStatus> for StatusView {
    fn from(status: EntityStatus) -> Self {
        Self {
            entity: status.entity,
            reasons: status.reasons,
            collisions_enabled: status.collisions_enabled,
            stack: status.stack,
            penalty_remaining_secs: status.penalty_remaining_secs,
            grace_remaining_secs: status.grace_remaining_secs,
            tag: status.tag,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/healthz", get(healthz))
        .route("/state", get(state_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Bind the listener and serve until ctrl-c.
pub async fn serve(config: ValidatedConfig) -> anyhow::Result<()> {
    let state = AppState::new(&config);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("Could not bind {}", config.listen))?;
    info!(addr = %config.listen, "noclip bridge listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(?err, "failed to listen for shutdown signal");
            }
        })
        .await
        .context("server failed")?;
    info!("noclip bridge stopped");
    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn state_handler(AxumState(state): AxumState<AppState>) -> Json<Vec<StatusView>> {
    Json(snapshot(&state))
}

async fn metrics_handler(AxumState(state): AxumState<AppState>) -> Response {
    match render_metrics(&state) {
        Ok(body) => ([(header::CONTENT_TYPE, OPENMETRICS_CONTENT_TYPE)], body).into_response(),
        Err(err) => {
            warn!(?err, "failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub(crate) fn render_metrics(state: &AppState) -> Result<String, fmt::Error> {
    let mut body = String::new();
    encode(&mut body, &state.registry)?;
    Ok(body)
}

pub(crate) fn snapshot(state: &AppState) -> Vec<StatusView> {
    state
        .arbiter
        .status(state.display)
        .into_iter()
        .map(StatusView::from)
        .collect()
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    AxumState(state): AxumState<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let mut outbound = state.bridge.subscribe();
    info!("plugin connected");

    let write_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let outbound_task = {
        let tx = tx.clone();
        tokio::spawn(async move {
            loop {
                match outbound.recv().await {
                    Ok(event) => match serde_json::to_string(&event) {
                        Ok(payload) => {
                            if tx.send(Message::Text(payload)).is_err() {
                                break;
                            }
                        }
                        Err(err) => warn!(?err, "failed to encode outbound frame"),
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "plugin connection lagging, frames dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    };

    while let Some(Ok(message)) = receiver.next().await {
        match message {
            Message::Text(text) => match serde_json::from_str::<Event>(&text) {
                Ok(event) => handle_inbound(&state, event),
                Err(err) => warn!(?err, "invalid inbound message"),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    write_task.abort();
    outbound_task.abort();
    info!("plugin disconnected");
}

pub(crate) fn handle_inbound(state: &AppState, event: Event) {
    debug!(?event, "inbound event");
    if let Event::Connect(connect) = &event {
        state.bridge.track(connect.entity);
    }
    state.arbiter.handle(&event);
    if let Event::Disconnect(disconnect) = &event {
        state.bridge.forget(disconnect.entity);
    }
}
