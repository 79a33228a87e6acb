//! Push engine error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PushError {
    #[error("Type mismatch parsing message at offset {offset}: {reason}")]
    MessageTypeMismatch { offset: i64, reason: String },

    #[error("Invalid column selector {selector:?}: {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("No protobuf descriptor registry for message type {0}")]
    MissingDescriptorRegistry(String),

    #[error("Source {0} is not in a state that accepts messages")]
    SourceNotStarted(String),

    #[error("Unknown source id {0}")]
    UnknownSource(u64),

    #[error("Unknown materialized view id {0}")]
    UnknownMaterializedView(u64),

    #[error("Unsupported materialized view query: {0}")]
    UnsupportedQuery(String),

    #[error(transparent)]
    Sql(#[from] riverdb_sql::SqlError),

    #[error(transparent)]
    Cluster(#[from] riverdb_cluster::ClusterError),

    #[error(transparent)]
    Core(#[from] riverdb_core::CoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, PushError>;
