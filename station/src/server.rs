//! HTTP surface: live WebSocket stream, history queries and health.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use station_shared::{HealthInfo, Timestamp};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::broadcast::{SubscriberRegistry, Subscription};
use crate::downsampler::{Downsampler, QueryError};

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SubscriberRegistry>,
    pub downsampler: Downsampler,
}

/// Query string of `GET /query`.
#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub start: String,
    pub end: String,
    pub buckets: Option<i64>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(stream_handler))
        .route("/query", get(history_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Serve on `listener` until `shutdown` becomes true or its sender is
/// dropped, then finish in-flight requests.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
            info!("HTTP server shutting down");
        })
        .await
}

async fn health_handler() -> Json<HealthInfo> {
    Json(HealthInfo {
        status: "ok".to_string(),
        service: "station".to_string(),
        timestamp: Timestamp::now().seconds,
    })
}

async fn history_handler(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Response {
    let (start, end) = match (
        Timestamp::parse_param(&params.start),
        Timestamp::parse_param(&params.end),
    ) {
        (Ok(start), Ok(end)) => (start, end),
        (Err(e), _) | (_, Err(e)) => {
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    match state.downsampler.query(start, end, params.buckets).await {
        Ok(buckets) => Json(buckets).into_response(),
        Err(e @ (QueryError::InvalidRange { .. } | QueryError::TooManyBuckets { .. })) => {
            debug!("Rejected history query: {e}");
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
        Err(e) => {
            error!("History query failed: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn stream_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| stream_to_subscriber(socket, state.registry))
}

/// Forward registry messages to one WebSocket client until either side
/// closes.
async fn stream_to_subscriber(mut socket: WebSocket, registry: Arc<SubscriberRegistry>) {
    let Some(Subscription { id, mut receiver }) = registry.register() else {
        let _ = socket.send(Message::Close(None)).await;
        return;
    };
    info!("Stream subscriber {id} connected");

    let (mut sink, mut incoming) = socket.split();
    loop {
        tokio::select! {
            message = receiver.recv() => match message {
                Some(text) => {
                    if sink.send(Message::Text(text.to_string())).await.is_err() {
                        break;
                    }
                }
                None => {
                    // Registry closed or this subscriber was dropped
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            frame = incoming.next() => match frame {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    registry.deregister(id);
    info!("Stream subscriber {id} disconnected");
}
