use marksync_core::ValidationError;
use thiserror::Error;

/// Errors surfaced by the sync service
#[derive(Debug, Error)]
pub enum SyncError {
    /// Malformed input; the caller's request is at fault
    #[error("invalid sync event: {0}")]
    Validation(#[from] ValidationError),

    /// Durable store failure; the caller should retry
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Cross-instance bridge failure; event is stored but fan-out is degraded
    #[error("bridge error: {0}")]
    Bridge(#[from] crate::sync::BridgeError),
}

impl SyncError {
    /// Transient errors are reported to the client as retryable, never as a
    /// reason to drop the connection.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Storage(_) | SyncError::Bridge(_))
    }
}
