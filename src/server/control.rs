//! Engine control endpoint
//!
//! Requests are forwarded into the tick loop over a channel and applied
//! between ticks; the handler only waits for the reply.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tokio::sync::{mpsc, oneshot};

use super::ApiResponse;
use crate::paper_trading::{CloseError, EngineStats, ManualCloseRequest};
use crate::recorder::TradeRecord;

/// Work for the engine loop
#[derive(Debug)]
pub enum ControlCommand {
    Close {
        request: ManualCloseRequest,
        reply: oneshot::Sender<Result<TradeRecord, CloseError>>,
    },
    Stats {
        reply: oneshot::Sender<EngineStats>,
    },
}

pub fn control_router(commands: mpsc::Sender<ControlCommand>) -> Router {
    Router::new()
        .route("/close", post(close_position))
        .route("/stats", get(get_stats))
        .with_state(commands)
}

fn engine_unavailable() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ApiResponse::<()>::error("engine loop is not running")),
    )
        .into_response()
}

/// POST /close - manual close of an asset's active position
async fn close_position(
    State(commands): State<mpsc::Sender<ControlCommand>>,
    body: Result<Json<ManualCloseRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            tracing::warn!(error = %rejection.body_text(), "[ENGINE] Rejected manual close payload");
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::<()>::error(rejection.body_text())),
            )
                .into_response();
        }
    };

    let (reply, response) = oneshot::channel();
    if commands
        .send(ControlCommand::Close { request, reply })
        .await
        .is_err()
    {
        return engine_unavailable();
    }

    match response.await {
        Ok(Ok(record)) => Json(ApiResponse::success(record)).into_response(),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "[ENGINE] Manual close refused");
            let status = match e {
                CloseError::NoActivePosition(_) => StatusCode::NOT_FOUND,
                CloseError::Skipped(_) => StatusCode::CONFLICT,
                _ => StatusCode::BAD_REQUEST,
            };
            (status, Json(ApiResponse::<()>::error(e.to_string()))).into_response()
        }
        Err(_) => engine_unavailable(),
    }
}

/// GET /stats - performance, active slots and regimes
async fn get_stats(State(commands): State<mpsc::Sender<ControlCommand>>) -> Response {
    let (reply, response) = oneshot::channel();
    if commands.send(ControlCommand::Stats { reply }).await.is_err() {
        return engine_unavailable();
    }
    match response.await {
        Ok(stats) => Json(ApiResponse::success(stats)).into_response(),
        Err(_) => engine_unavailable(),
    }
}
