//! HTTP surfaces
//!
//! The shared store process (`/state`, `/health`, `/trades.csv`) and the
//! engine's control endpoint (`/close`, `/stats`). Only compiled with the
//! `server` feature.

mod control;
mod store;

pub use control::{control_router, ControlCommand};
pub use store::{store_router, StoreService};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Envelope for JSON responses that are not part of the store contract
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Start the shared store server
pub async fn start_store_server(port: u16, data_dir: PathBuf) -> anyhow::Result<()> {
    let service = Arc::new(StoreService::open(&data_dir)?);
    let app = store_router(service);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(data_dir = %data_dir.display(), "🗄️ [STORE] Server starting on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Start the engine control endpoint
pub async fn start_control_server(
    port: u16,
    commands: mpsc::Sender<ControlCommand>,
) -> anyhow::Result<()> {
    let app = control_router(commands);
    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], port));

    tracing::info!("🕹️ [ENGINE] Control endpoint on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
