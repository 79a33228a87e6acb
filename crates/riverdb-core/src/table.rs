//! Table, source, and materialized view descriptors
//!
//! These are the durable shapes persisted (serde-encoded) into the `tables`
//! system catalog and broadcast between nodes, so everything here derives
//! `Serialize`/`Deserialize`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::types::{BusEncoding, ColumnType};

/// A secondary index over a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub id: u64,
    pub name: String,
    /// Column offsets of the indexed columns, in index order.
    pub index_cols: Vec<usize>,
}

/// Descriptor shared by sources and materialized views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub id: u64,
    pub schema_name: String,
    pub name: String,
    pub column_names: Vec<String>,
    pub column_types: Vec<ColumnType>,
    /// Column offsets of the primary key, in key order. Never empty.
    pub primary_key_cols: Vec<usize>,
    pub index_infos: Vec<IndexInfo>,
}

impl TableInfo {
    /// Check the structural invariants: non-empty PK, consistent column
    /// lists, index columns in range.
    pub fn validate(&self) -> Result<()> {
        if self.column_names.len() != self.column_types.len() {
            return Err(CoreError::Internal(format!(
                "table {}: {} column names, {} column types",
                self.name,
                self.column_names.len(),
                self.column_types.len()
            )));
        }
        if self.primary_key_cols.is_empty() {
            return Err(CoreError::Internal(format!(
                "table {} has no primary key",
                self.name
            )));
        }
        let ncols = self.column_types.len();
        if let Some(&bad) = self.primary_key_cols.iter().find(|&&c| c >= ncols) {
            return Err(CoreError::Internal(format!(
                "table {}: primary key column {bad} out of range",
                self.name
            )));
        }
        for index in &self.index_infos {
            if let Some(&bad) = index.index_cols.iter().find(|&&c| c >= ncols) {
                return Err(CoreError::Internal(format!(
                    "index {}: column {bad} out of range",
                    index.name
                )));
            }
        }
        Ok(())
    }

    /// `schema.name`, as shown to users.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema_name, self.name)
    }
}

/// Where a source's messages come from and how to turn them into rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicInfo {
    pub broker_name: String,
    pub topic_name: String,
    pub header_encoding: BusEncoding,
    pub key_encoding: BusEncoding,
    pub value_encoding: BusEncoding,
    /// One selector per column; empty means "whole message value by column
    /// position" is not supported and ingestion requires selectors.
    pub col_selectors: Vec<String>,
    pub properties: BTreeMap<String, String>,
}

/// A table fed by a message-bus topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub table_info: TableInfo,
    pub topic_info: TopicInfo,
}

impl SourceInfo {
    pub fn validate(&self) -> Result<()> {
        self.table_info.validate()?;
        let selectors = self.topic_info.col_selectors.len();
        if selectors != 0 && selectors != self.table_info.column_types.len() {
            return Err(CoreError::Internal(format!(
                "source {}: {selectors} column selectors for {} columns",
                self.table_info.name,
                self.table_info.column_types.len()
            )));
        }
        Ok(())
    }

    pub fn id(&self) -> u64 {
        self.table_info.id
    }

    pub fn name(&self) -> &str {
        &self.table_info.name
    }
}

/// A query whose result is continuously maintained as a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterializedViewInfo {
    pub table_info: TableInfo,
    /// The defining SELECT, as written by the user.
    pub query: String,
    /// Table ids this view consumes rows from.
    pub upstream_table_ids: Vec<u64>,
}

impl MaterializedViewInfo {
    pub fn id(&self) -> u64 {
        self.table_info.id
    }

    pub fn name(&self) -> &str {
        &self.table_info.name
    }
}
