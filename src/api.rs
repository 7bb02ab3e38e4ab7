//! Illustrative HTTP/WebSocket surface for the `exchange-demo` binary.
//!
//! None of `exchange_core`'s library modules know about axum — this module
//! is the only place HTTP concepts (status codes, `Json`, `WebSocketUpgrade`)
//! appear, mirroring the teacher's `api::routes`/`websocket::routes` split
//! of "thin handler, real work lives in a service". There is no auth layer
//! here (the teacher's JWT/EIP-712 stack is out of scope for this core —
//! see DESIGN.md); the caller supplies its identity via `X-Team-Id` /
//! `X-Team-Role` headers, which a real deployment would replace with its
//! own authentication middleware same as the teacher's `auth_middleware`.

use crate::coordinator::ApiResponse;
use crate::model::{Order, OrderType, Price, Side};
use crate::pipeline::{OrderQueueMessage, Pipeline, TeamInfo};
use crate::ws::{ConnectionSink, OutboundMessage, WebSocketFanout};
use crate::AppConfig;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

pub struct AppState {
    pub config: AppConfig,
    pub pipeline: Pipeline,
    pub coordinator: Arc<crate::coordinator::ResponseCoordinator>,
    pub venue: Arc<crate::venue::ExchangeVenue>,
    pub websocket: Arc<WebSocketFanout>,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/orders", post(submit_order))
        .route("/orders/:order_id", delete(cancel_order))
        .route("/instruments/:instrument_id/depth", get(depth_snapshot))
        .route("/ws", get(websocket_upgrade))
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

fn team_from_headers(headers: &HeaderMap) -> Result<TeamInfo, (StatusCode, Json<ApiResponse>)> {
    let team_id = headers
        .get("x-team-id")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(missing_identity)?
        .to_string();
    let role = headers
        .get("x-team-role")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("retail")
        .to_string();
    Ok(TeamInfo { team_id, role })
}

fn missing_identity() -> (StatusCode, Json<ApiResponse>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(ApiResponse::failure(crate::error::ApiError::new(
            crate::error::ErrorKind::Validation,
            "MISSING_IDENTITY",
            "X-Team-Id header is required",
        ))),
    )
}

#[derive(Debug, Deserialize)]
pub struct NewOrderRequest {
    pub instrument_id: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: u64,
    pub price: Option<rust_decimal::Decimal>,
    pub client_order_id: Option<String>,
}

async fn submit_order(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<NewOrderRequest>,
) -> Result<Json<ApiResponse>, (StatusCode, Json<ApiResponse>)> {
    let team = team_from_headers(&headers)?;

    let price = match req.price {
        Some(decimal) => Some(Price::from_decimal(decimal).map_err(|message| bad_request("INVALID_PRICE", message))?),
        None => None,
    };

    let order = Order::new(
        Uuid::new_v4(),
        req.instrument_id,
        req.side,
        req.order_type,
        req.quantity,
        price,
        team.team_id.clone(),
        req.client_order_id,
        chrono::Utc::now().timestamp_millis(),
    )
    .map_err(|message| bad_request("INVALID_ORDER", message))?;

    let (registration, receiver) = state
        .coordinator
        .register_request(team.team_id.clone(), Some(state.config.coordinator_timeout()))
        .map_err(coordinator_error)?;

    state
        .pipeline
        .order_queue()
        .send(OrderQueueMessage::NewOrder {
            order,
            team,
            request_id: registration.request_id.clone(),
        })
        .map_err(|_| service_unavailable())?;

    let result = state
        .coordinator
        .wait_for_completion(registration.request_id, receiver, registration.timeout_at)
        .await;

    if result.api_response.success {
        Ok(Json(result.api_response))
    } else {
        Err((StatusCode::UNPROCESSABLE_ENTITY, Json(result.api_response)))
    }
}

async fn cancel_order(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ApiResponse>, (StatusCode, Json<ApiResponse>)> {
    let team = team_from_headers(&headers)?;

    let (registration, receiver) = state
        .coordinator
        .register_request(team.team_id.clone(), Some(state.config.coordinator_timeout()))
        .map_err(coordinator_error)?;

    state
        .pipeline
        .order_queue()
        .send(OrderQueueMessage::CancelOrder {
            order_id,
            team,
            request_id: registration.request_id.clone(),
        })
        .map_err(|_| service_unavailable())?;

    let result = state
        .coordinator
        .wait_for_completion(registration.request_id, receiver, registration.timeout_at)
        .await;

    if result.api_response.success {
        Ok(Json(result.api_response))
    } else {
        Err((StatusCode::UNPROCESSABLE_ENTITY, Json(result.api_response)))
    }
}

#[derive(Debug, Deserialize)]
pub struct DepthQuery {
    #[serde(default = "default_depth_levels")]
    pub levels: usize,
}

fn default_depth_levels() -> usize {
    10
}

async fn depth_snapshot(
    State(state): State<Arc<AppState>>,
    Path(instrument_id): Path<String>,
    Query(query): Query<DepthQuery>,
) -> Result<Json<crate::orderbook::DepthSnapshot>, StatusCode> {
    state
        .venue
        .depth_snapshot(&instrument_id, query.levels)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

#[derive(Debug, Deserialize)]
pub struct WebSocketQuery {
    team_id: String,
}

async fn websocket_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<WebSocketQuery>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.team_id))
}

/// Adapts an axum WebSocket's outbound half to [`ConnectionSink`]. Sending
/// blocks the pipeline's WebSocket-publisher thread for the duration of one
/// `send` call, matching the fanout's documented best-effort/single-threaded
/// delivery model — a slow client affects only its own messages.
struct AxumSink {
    handle: tokio::runtime::Handle,
    sender: std::sync::Mutex<futures::stream::SplitSink<WebSocket, Message>>,
}

impl ConnectionSink for AxumSink {
    // `block_on` is safe here: this runs on the pipeline's plain
    // `std::thread` WebSocket-publisher worker (see `pipeline.rs`), never on
    // a tokio task, so there is no nested-runtime panic to worry about.
    fn send(&self, message: &OutboundMessage) -> Result<(), String> {
        let payload = serde_json::to_string(message).map_err(|e| e.to_string())?;
        let mut sender = self.sender.lock().map_err(|_| "sink poisoned".to_string())?;
        self.handle
            .block_on(sender.send(Message::Text(payload)))
            .map_err(|e| e.to_string())
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, team_id: String) {
    let (sender, mut receiver) = socket.split();
    let sink = AxumSink {
        handle: tokio::runtime::Handle::current(),
        sender: std::sync::Mutex::new(sender),
    };
    state.websocket.connect(team_id.clone(), Box::new(sink));
    tracing::info!(%team_id, "websocket connected");

    // The connection only carries outbound pushes today; drain inbound
    // frames so the socket's keepalive pings/closes are observed.
    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }

    state.websocket.disconnect(&team_id);
    tracing::info!(%team_id, "websocket disconnected");
}

fn bad_request(code: &'static str, message: impl Into<String>) -> (StatusCode, Json<ApiResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiResponse::failure(crate::error::ApiError::new(
            crate::error::ErrorKind::Validation,
            code,
            message,
        ))),
    )
}

fn service_unavailable() -> (StatusCode, Json<ApiResponse>) {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ApiResponse::failure(crate::error::ApiError::overload(
            "order queue is full or the pipeline has shut down",
        ))),
    )
}

fn coordinator_error(err: crate::error::CoordinatorError) -> (StatusCode, Json<ApiResponse>) {
    use crate::error::CoordinatorError;
    match err {
        CoordinatorError::ShuttingDown => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse::failure(crate::error::ApiError::service_shutdown())),
        ),
        CoordinatorError::Overloaded { pending, capacity } => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse::failure(crate::error::ApiError::overload(format!(
                "{pending}/{capacity} requests already pending"
            )))),
        ),
        CoordinatorError::UnknownRequest(id) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::failure(crate::error::ApiError::new(
                crate::error::ErrorKind::Internal,
                "UNKNOWN_REQUEST",
                format!("unknown request id {id}"),
            ))),
        ),
    }
}
