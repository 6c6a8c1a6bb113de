//! Background store writer
//!
//! Pushes the most recent snapshot published on a `watch` channel. Snapshots
//! published while a push is in flight collapse into the latest one, so a
//! failed push is never retried on its own: the next push carries the newer
//! state. The tick loop never waits on this task.

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::{StoreState, StoreSynchronizer, SyncError};

/// Raised when the store rejected a stale write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConflict {
    pub local: u64,
    pub remote: u64,
}

pub fn spawn_writer(
    sync: StoreSynchronizer,
    mut snapshots: watch::Receiver<StoreState>,
    conflicts: mpsc::Sender<SyncConflict>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while snapshots.changed().await.is_ok() {
            let state = snapshots.borrow_and_update().clone();
            match sync.save(&state).await {
                Ok(ack) => {
                    tracing::debug!(version = ack.version, "[STORE] Snapshot pushed");
                }
                Err(SyncError::Conflict { local, remote }) => {
                    tracing::error!(
                        local_version = local,
                        remote_version = remote,
                        "[STORE] Stale write rejected, requesting reload"
                    );
                    let _ = conflicts.send(SyncConflict { local, remote }).await;
                }
                Err(SyncError::ReadOnly) => {
                    tracing::debug!("[STORE] Read-only synchronizer, snapshot not pushed");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "[STORE] Snapshot push failed, keeping local state");
                }
            }
        }
        tracing::debug!("[STORE] Writer stopped");
    })
}
