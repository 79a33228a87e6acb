//! SQL error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("Invalid statement: {0}")]
    InvalidStatement(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Unknown table: {schema_name}.{name}")]
    UnknownTable { schema_name: String, name: String },

    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    #[error("Wrong number of column selectors: {selectors} selectors for {columns} columns")]
    WrongNumberColumnSelectors { selectors: usize, columns: usize },

    #[error(transparent)]
    Core(#[from] riverdb_core::CoreError),
}

pub type Result<T> = std::result::Result<T, SqlError>;
