//! Statement-level AST

use std::collections::BTreeMap;

use riverdb_core::{BusEncoding, ColumnType};

/// One column definition inside `CREATE SOURCE`.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
    pub not_null: bool,
}

/// Parsed `CREATE SOURCE` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateSource {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    /// Primary key columns by name, in declaration order of the
    /// `PRIMARY KEY` options.
    pub primary_key: Vec<String>,
    pub broker_name: String,
    pub topic_name: String,
    pub header_encoding: BusEncoding,
    pub key_encoding: BusEncoding,
    pub value_encoding: BusEncoding,
    pub col_selectors: Vec<String>,
    pub properties: BTreeMap<String, String>,
}

/// Parsed `CREATE MATERIALIZED VIEW` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateMaterializedView {
    pub name: String,
    /// The defining SELECT, verbatim.
    pub query: String,
}

/// A top-level statement, classified.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Raw SELECT text; handed to the translator with the session schema.
    Select(String),
    CreateSource(CreateSource),
    CreateMaterializedView(CreateMaterializedView),
    DropSource(String),
    DropMaterializedView(String),
    /// `PREPARE <sql>`: the inner statement text.
    Prepare(String),
    /// `EXECUTE <id> <args…>`.
    Execute { ps_id: i64, args: Vec<String> },
}
