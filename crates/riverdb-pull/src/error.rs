//! Pull engine error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PullError {
    #[error("Remote execution failed on shard {shard_id}: {reason}")]
    RemoteExecution { shard_id: u64, reason: String },

    #[error("Unsupported query: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Sql(#[from] riverdb_sql::SqlError),

    #[error(transparent)]
    Cluster(#[from] riverdb_cluster::ClusterError),

    #[error(transparent)]
    Core(#[from] riverdb_core::CoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, PullError>;
