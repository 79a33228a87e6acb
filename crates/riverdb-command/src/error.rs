//! Command error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Session is in use by another caller")]
    SessionInUse,

    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error("Unknown prepared statement: {0}")]
    UnknownPreparedStatement(i64),

    #[error("Only SELECT statements can be prepared: {0}")]
    NotPreparable(String),

    #[error("{schema_name}.{name} is consumed by materialized views and cannot be dropped")]
    SourceInUse { schema_name: String, name: String },

    #[error("DDL phase timed out: {0}")]
    DdlTimeout(String),

    #[error(transparent)]
    Sql(#[from] riverdb_sql::SqlError),

    #[error(transparent)]
    Meta(#[from] riverdb_meta::MetaError),

    #[error(transparent)]
    Push(#[from] riverdb_push::PushError),

    #[error(transparent)]
    Pull(#[from] riverdb_pull::PullError),

    #[error(transparent)]
    Cluster(#[from] riverdb_cluster::ClusterError),

    #[error(transparent)]
    Core(#[from] riverdb_core::CoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, CommandError>;
