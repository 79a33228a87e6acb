//! Meta error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetaError {
    #[error("Source already exists: {schema_name}.{name}")]
    SourceAlreadyExists { schema_name: String, name: String },

    #[error("Materialized view already exists: {schema_name}.{name}")]
    MaterializedViewAlreadyExists { schema_name: String, name: String },

    #[error("Unknown source: {schema_name}.{name}")]
    UnknownSource { schema_name: String, name: String },

    #[error("Unknown materialized view: {schema_name}.{name}")]
    UnknownMaterializedView { schema_name: String, name: String },

    #[error("Catalog row corrupt: {0}")]
    CorruptCatalog(String),

    #[error(transparent)]
    Cluster(#[from] riverdb_cluster::ClusterError),

    #[error(transparent)]
    Core(#[from] riverdb_core::CoreError),
}

pub type Result<T> = std::result::Result<T, MetaError>;
