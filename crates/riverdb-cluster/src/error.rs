//! Cluster error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("Not the leader for shard {shard_id}")]
    NotLeader { shard_id: u64 },

    #[error("Cluster unavailable: {0}")]
    Unavailable(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Invalid write batch: {0}")]
    InvalidBatch(String),

    #[error("Notification handling failed: {0}")]
    NotificationFailed(String),

    #[error(transparent)]
    Core(#[from] riverdb_core::CoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ClusterError>;
