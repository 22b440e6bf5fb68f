//! # huddle-gateway
//!
//! Real-time WebSocket gateway for Huddle. Handles:
//! - Authenticated client connections and presence
//! - Chat message fan-out (channels, groups, DMs, reactions)
//! - Voice room membership and call lifecycle announcements
//! - Call invitations and WebRTC signaling relay
//!
//! Media never passes through the gateway; peers negotiate directly and the
//! gateway only forwards their signaling.

pub mod events;
pub mod fanout;
mod handler;
pub mod lifecycle;
pub mod registry;
pub mod router;

#[cfg(test)]
mod testing;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use futures_util::{SinkExt, StreamExt};
use huddle_common::auth::{validate_token, Claims};
use huddle_common::config::AppConfig;
use huddle_common::models::{ConnectionId, Profile};
use huddle_common::store::ChatStore;
use huddle_common::{HuddleError, HuddleResult};
use huddle_voice::{CallCoordinator, Clock, LifecycleEvent};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub use events::{ClientEvent, ServerEvent};
use fanout::MessageFanout;
use registry::{outbound_channel, ConnectionRegistry, Outbound, OutboundRx, OUTBOUND_BUFFER};
use router::SignalingRouter;

/// Gateway tunables, usually taken from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub jwt_secret: String,
    /// How long an unanswered invitation keeps ringing.
    pub invite_ttl: Duration,
    pub sweep_interval: Duration,
    pub max_message_length: usize,
}

impl GatewayConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            jwt_secret: config.auth.jwt_secret.clone(),
            invite_ttl: config.calls.invite_ttl(),
            sweep_interval: config.calls.sweep_interval(),
            max_message_length: config.limits.max_message_length,
        }
    }
}

/// Gateway state shared by every connection.
#[derive(Clone)]
pub struct GatewayState<S> {
    pub store: S,
    pub registry: ConnectionRegistry,
    pub calls: CallCoordinator,
    pub router: SignalingRouter,
    pub fanout: MessageFanout<S>,
    pub config: Arc<GatewayConfig>,
}

impl<S: ChatStore> GatewayState<S> {
    /// Build the gateway. The returned receiver carries call lifecycle events
    /// in transition order; hand it to [`GatewayState::spawn_background`].
    pub fn new(
        store: S,
        config: GatewayConfig,
        clock: Arc<dyn Clock>,
    ) -> (Self, mpsc::UnboundedReceiver<LifecycleEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let registry = ConnectionRegistry::new();
        let calls = CallCoordinator::new(clock, events_tx);
        let state = Self {
            router: SignalingRouter::new(registry.clone(), calls.clone()),
            fanout: MessageFanout::new(store.clone(), registry.clone(), config.max_message_length),
            store,
            registry,
            calls,
            config: Arc::new(config),
        };
        (state, events_rx)
    }

    /// Verify a token and load the profile it names.
    pub async fn authenticate(&self, token: &str) -> HuddleResult<(Claims, Profile)> {
        let claims = validate_token(token, &self.config.jwt_secret)?;
        let user_id = claims.user_id()?;
        let profile = self
            .store
            .find_user(user_id)
            .await?
            .ok_or_else(|| HuddleError::not_found(format!("User {user_id}")))?;
        Ok((claims, profile))
    }
}

/// Build the gateway WebSocket router.
pub fn build_router<S: ChatStore>(state: GatewayState<S>) -> Router {
    Router::new()
        .route("/gateway", get(ws_handler::<S>))
        .route("/gateway/stats", get(stats::<S>))
        .with_state(Arc::new(state))
}

#[derive(Debug, Deserialize)]
struct ConnectParams {
    token: Option<String>,
}

/// WebSocket upgrade handler. Browsers cannot set headers on WebSocket
/// requests, so the token may also arrive as `?token=`.
async fn ws_handler<S: ChatStore>(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState<S>>>,
    Query(params): Query<ConnectParams>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
) -> Response {
    let token = bearer
        .map(|TypedHeader(Authorization(bearer))| bearer.token().to_string())
        .or(params.token);
    let auth = match token {
        Some(token) => state.authenticate(&token).await,
        None => Err(HuddleError::Unauthorized),
    };

    ws.on_upgrade(move |socket| async move {
        match auth {
            Ok((claims, profile)) => handle_connection(socket, state, claims, profile).await,
            Err(err) => reject(socket, &err).await,
        }
    })
}

async fn stats<S: ChatStore>(State(state): State<Arc<GatewayState<S>>>) -> impl IntoResponse {
    let voice = state.calls.stats().await;
    Json(serde_json::json!({
        "connections": state.registry.connection_count().await,
        "online_users": state.registry.list_all().await.len(),
        "voice": voice,
    }))
}

/// Refuse an upgraded socket with a close frame naming the reason.
async fn reject(mut socket: WebSocket, err: &HuddleError) {
    tracing::info!(code = err.close_code(), "Rejecting gateway connection: {err}");
    let frame = CloseFrame {
        code: err.close_code(),
        reason: err.client_message().into(),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}

/// Handle a single authenticated WebSocket connection.
async fn handle_connection<S: ChatStore>(
    socket: WebSocket,
    state: Arc<GatewayState<S>>,
    claims: Claims,
    profile: Profile,
) {
    let (mut sender, mut receiver) = socket.split();
    let connection_id = ConnectionId::new();

    // Everything addressed to this socket goes through one queue so that
    // events leave in the order they were produced.
    let (tx, outbound) = outbound_channel(OUTBOUND_BUFFER);
    let OutboundRx { mut rx, stalled } = outbound;

    if let Err(err) = state.connect(connection_id, claims, profile, tx).await {
        tracing::warn!(connection = %connection_id, "Gateway registration failed: {err}");
        let frame = CloseFrame {
            code: err.close_code(),
            reason: err.client_message().into(),
        };
        let _ = sender.send(Message::Close(Some(frame))).await;
        return;
    }

    // ── Sender task ──────────────────────────────────────────────────────────
    let mut send_task = tokio::spawn(async move {
        while let Some(out) = rx.recv().await {
            match out {
                Outbound::Event(event) => {
                    let json = match serde_json::to_string(&event) {
                        Ok(json) => json,
                        Err(e) => {
                            tracing::error!("Failed to encode gateway event: {e}");
                            continue;
                        }
                    };
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Outbound::Close { code, reason } => {
                    let frame = CloseFrame {
                        code,
                        reason: reason.into(),
                    };
                    let _ = sender.send(Message::Close(Some(frame))).await;
                    break;
                }
            }
        }
    });

    // ── Receive loop ─────────────────────────────────────────────────────────
    let receive = async {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => state.handle_text(connection_id, &text).await,
                Message::Close(_) => break,
                _ => {}
            }
        }
    };

    tokio::select! {
        _ = receive => {}
        _ = &mut send_task => {}
        _ = stalled.notified() => {
            tracing::warn!(connection = %connection_id, "Outbound queue full; dropping slow connection");
        }
    }

    state.disconnect(connection_id).await;
    send_task.abort();
}
