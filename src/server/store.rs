//! Shared store server
//!
//! Holds the single state blob in memory, persists it atomically on every
//! accepted write and rejects writes whose `version` is stale.

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tower_http::cors::{Any, CorsLayer};

use crate::persistence::{render_trades_csv, SnapshotFile};
use crate::store::{HealthSnapshot, SaveAck, StoreState};

/// Trade history grows without bound; allow bodies well past axum's 2 MB default
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

pub struct StoreService {
    state: RwLock<StoreState>,
    /// Serializes writers; readers only wait for the in-memory swap
    writes: Mutex<()>,
    file: SnapshotFile,
    started_at: Instant,
}

impl StoreService {
    /// Open `data_dir`, loading `state.json` when present
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let file = SnapshotFile::new(data_dir)?;
        let state = file.load()?.unwrap_or_default();
        tracing::info!(
            path = %file.path().display(),
            version = state.version,
            trades = state.trades.len(),
            active = state.active_count(),
            "💾 [STORE] Snapshot loaded"
        );
        Ok(Self {
            state: RwLock::new(state),
            writes: Mutex::new(()),
            file,
            started_at: Instant::now(),
        })
    }

    pub async fn current(&self) -> StoreState {
        self.state.read().await.clone()
    }

    /// Accept `incoming` if it was based on the current version.
    ///
    /// Returns the new version, or the current one as `Err` on a stale write.
    /// Memory is only updated after the file write succeeds.
    async fn apply(&self, mut incoming: StoreState) -> Result<u64, WriteRejection> {
        let _writer = self.writes.lock().await;
        let current = self.state.read().await.version;
        if incoming.version != current {
            return Err(WriteRejection::Stale { current });
        }

        incoming.normalize();
        incoming.version = current + 1;
        incoming.updated_at = Some(Utc::now());

        let file = self.file.clone();
        let snapshot = incoming.clone();
        tokio::task::spawn_blocking(move || file.write_atomic(&snapshot))
            .await
            .map_err(|e| WriteRejection::Io(e.to_string()))?
            .map_err(|e| WriteRejection::Io(e.to_string()))?;

        let version = incoming.version;
        *self.state.write().await = incoming;
        Ok(version)
    }
}

enum WriteRejection {
    Stale { current: u64 },
    Io(String),
}

/// Create the store router
pub fn store_router(service: Arc<StoreService>) -> Router {
    Router::new()
        .route("/state", get(get_state).put(put_state).post(put_state))
        .route("/health", get(get_health))
        .route("/trades.csv", get(get_trades_csv))
        .with_state(service)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

/// GET /state - full blob
async fn get_state(State(service): State<Arc<StoreService>>) -> impl IntoResponse {
    Json(service.current().await)
}

/// PUT|POST /state - replace the blob
async fn put_state(
    State(service): State<Arc<StoreService>>,
    body: Result<Json<StoreState>, JsonRejection>,
) -> Response {
    let incoming = match body {
        Ok(Json(state)) => state,
        Err(rejection) => {
            tracing::warn!(error = %rejection.body_text(), "[STORE] Rejected malformed state body");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "success": false, "error": rejection.body_text() })),
            )
                .into_response();
        }
    };

    let sent_version = incoming.version;
    match service.apply(incoming).await {
        Ok(version) => {
            tracing::debug!(version, "💾 [STORE] State persisted");
            Json(SaveAck {
                success: true,
                timestamp: Utc::now().timestamp_millis(),
                version,
            })
            .into_response()
        }
        Err(WriteRejection::Stale { current }) => {
            tracing::warn!(
                sent_version,
                current_version = current,
                "[STORE] Stale write rejected"
            );
            (
                StatusCode::CONFLICT,
                Json(json!({
                    "success": false,
                    "error": format!("stale version {}, current is {}", sent_version, current),
                    "version": current,
                })),
            )
                .into_response()
        }
        Err(WriteRejection::Io(e)) => {
            tracing::error!(error = %e, "[STORE] Failed to persist snapshot, previous one kept");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "error": e })),
            )
                .into_response()
        }
    }
}

/// GET /health
async fn get_health(State(service): State<Arc<StoreService>>) -> impl IntoResponse {
    let state = service.state.read().await;
    Json(HealthSnapshot {
        status: "ok".to_string(),
        active_trade_count: state.active_count(),
        total_trades: state.trades.len(),
        uptime: service.started_at.elapsed().as_secs(),
        version: state.version,
    })
}

/// GET /trades.csv
async fn get_trades_csv(State(service): State<Arc<StoreService>>) -> Response {
    let state = service.state.read().await;
    match render_trades_csv(&state.trades) {
        Ok(csv) => (
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=\"trades.csv\"",
                ),
            ],
            csv,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "[STORE] CSV export failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use std::path::PathBuf;
    use tower::ServiceExt;

    fn temp_data_dir(test_name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "papertrail_store_{}_{}",
            test_name,
            uuid::Uuid::new_v4()
        ))
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn put(body: &str) -> Request<Body> {
        Request::builder()
            .method("PUT")
            .uri("/state")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn missing_keys_are_filled_and_version_bumps() {
        let dir = temp_data_dir("defaults");
        let service = Arc::new(StoreService::open(&dir).unwrap());
        let app = store_router(service.clone());

        let response = app.clone().oneshot(put(r#"{"trades": []}"#)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let ack = body_json(response).await;
        assert_eq!(ack["success"], true);
        assert_eq!(ack["version"], 1);

        let response = app
            .oneshot(Request::get("/state").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let state = body_json(response).await;
        assert!(state["activeTrades"].as_object().unwrap().is_empty());
        assert_eq!(state["performance"]["totalTrades"], 0);
        assert_eq!(state["version"], 1);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn stale_version_gets_conflict_and_leaves_state() {
        let dir = temp_data_dir("conflict");
        let service = Arc::new(StoreService::open(&dir).unwrap());
        let app = store_router(service.clone());

        let first = app.clone().oneshot(put(r#"{"version": 0}"#)).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let stale = app.clone().oneshot(put(r#"{"version": 0}"#)).await.unwrap();
        assert_eq!(stale.status(), StatusCode::CONFLICT);
        let body = body_json(stale).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["version"], 1);
        assert_eq!(service.current().await.version, 1);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn concurrent_writes_on_same_version_accept_exactly_one() {
        let dir = temp_data_dir("concurrent");
        let service = Arc::new(StoreService::open(&dir).unwrap());
        let app = store_router(service.clone());

        let (a, b) = tokio::join!(
            app.clone().oneshot(put(r#"{"version": 0}"#)),
            app.clone().oneshot(put(r#"{"version": 0}"#)),
        );
        let mut statuses = vec![a.unwrap().status(), b.unwrap().status()];
        statuses.sort();
        assert_eq!(statuses, vec![StatusCode::OK, StatusCode::CONFLICT]);
        assert_eq!(service.current().await.version, 1);

        let health = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(health).await["version"], 1);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn snapshot_survives_restart() {
        let dir = temp_data_dir("restart");
        {
            let service = Arc::new(StoreService::open(&dir).unwrap());
            let app = store_router(service);
            let response = app.oneshot(put(r#"{"version": 0}"#)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        let reopened = StoreService::open(&dir).unwrap();
        assert_eq!(reopened.current().await.version, 1);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn health_and_csv_endpoints() {
        let dir = temp_data_dir("health");
        let app = store_router(Arc::new(StoreService::open(&dir).unwrap()));

        let health = app
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(health).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["activeTradeCount"], 0);
        assert_eq!(body["totalTrades"], 0);

        let csv = app
            .oneshot(Request::get("/trades.csv").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(
            csv.headers()[header::CONTENT_TYPE],
            "text/csv; charset=utf-8"
        );
        let bytes = axum::body::to_bytes(csv.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(String::from_utf8_lossy(&bytes).starts_with("timestamp,asset,direction"));

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let dir = temp_data_dir("malformed");
        let app = store_router(Arc::new(StoreService::open(&dir).unwrap()));
        let response = app.oneshot(put(r#"{"trades": 5}"#)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let _ = std::fs::remove_dir_all(dir);
    }
}
