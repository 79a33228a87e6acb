//! The durable `tables` catalog
//!
//! One row per source or materialized view, written through the shard KV
//! like any other table: key `be(SYSTEM_SHARD_ID) ‖ be(TABLES_TABLE_ID) ‖
//! be(entity id)`, value a serde-encoded [`CatalogRow`]. Only the DDL
//! coordinator writes here.

use serde::{Deserialize, Serialize};

use riverdb_cluster::{Cluster, WriteBatch};
use riverdb_core::{
    append_u64_be, encode_table_key_prefix, MaterializedViewInfo, SourceInfo, DATA_SHARD_ID_BASE,
    TABLES_TABLE_ID,
};

use crate::error::{MetaError, Result};

/// Shard the catalog lives on. The first data shard; catalog keys are
/// disjoint from user data by table id.
pub const SYSTEM_SHARD_ID: u64 = DATA_SHARD_ID_BASE;

/// DDL progress marker persisted with each catalog row.
///
/// `Add → Committed` at create-commit, `Committed → Delete` at drop-prepare,
/// row removed at drop-after-commit. Restart reconciliation re-drives any
/// row found in `Add` or `Delete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrepareState {
    Add,
    Committed,
    Delete,
}

/// The entity a catalog row describes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CatalogEntity {
    Source(SourceInfo),
    MaterializedView(MaterializedViewInfo),
}

impl CatalogEntity {
    pub fn id(&self) -> u64 {
        match self {
            CatalogEntity::Source(s) => s.table_info.id,
            CatalogEntity::MaterializedView(mv) => mv.table_info.id,
        }
    }

    pub fn schema_name(&self) -> &str {
        match self {
            CatalogEntity::Source(s) => &s.table_info.schema_name,
            CatalogEntity::MaterializedView(mv) => &mv.table_info.schema_name,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            CatalogEntity::Source(s) => &s.table_info.name,
            CatalogEntity::MaterializedView(mv) => &mv.table_info.name,
        }
    }
}

/// One durable catalog row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogRow {
    pub prepare_state: PrepareState,
    pub entity: CatalogEntity,
}

fn catalog_key(id: u64) -> Vec<u8> {
    let mut key = encode_table_key_prefix(TABLES_TABLE_ID, SYSTEM_SHARD_ID, 24);
    append_u64_be(&mut key, id);
    key
}

/// Insert or overwrite the catalog row for `entity`.
pub async fn persist_catalog_row(
    cluster: &dyn Cluster,
    entity: CatalogEntity,
    prepare_state: PrepareState,
) -> Result<()> {
    let id = entity.id();
    let row = CatalogRow {
        prepare_state,
        entity,
    };
    let value = serde_json::to_vec(&row)
        .map_err(|e| MetaError::CorruptCatalog(format!("encode failed: {e}")))?;
    let mut batch = WriteBatch::new(SYSTEM_SHARD_ID, false);
    batch.add_put(catalog_key(id), value)?;
    cluster.write_batch(batch).await?;
    Ok(())
}

/// Remove the catalog row for `id`.
pub async fn delete_catalog_row(cluster: &dyn Cluster, id: u64) -> Result<()> {
    let mut batch = WriteBatch::new(SYSTEM_SHARD_ID, false);
    batch.add_delete(catalog_key(id))?;
    cluster.write_batch(batch).await?;
    Ok(())
}

/// Read every catalog row, in table-id order.
pub async fn load_catalog(cluster: &dyn Cluster) -> Result<Vec<CatalogRow>> {
    let start = encode_table_key_prefix(TABLES_TABLE_ID, SYSTEM_SHARD_ID, 16);
    let end = encode_table_key_prefix(TABLES_TABLE_ID + 1, SYSTEM_SHARD_ID, 16);
    let pairs = cluster.local_scan(&start, Some(&end), -1).await?;
    pairs
        .into_iter()
        .map(|pair| {
            serde_json::from_slice(&pair.value)
                .map_err(|e| MetaError::CorruptCatalog(format!("decode failed: {e}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use riverdb_core::{BusEncoding, ColumnType, TableInfo, TopicInfo};
    use std::collections::BTreeMap;

    pub(crate) fn source_info(id: u64, name: &str) -> SourceInfo {
        SourceInfo {
            table_info: TableInfo {
                id,
                schema_name: "test".to_string(),
                name: name.to_string(),
                column_names: vec!["id".to_string()],
                column_types: vec![ColumnType::BigInt],
                primary_key_cols: vec![0],
                index_infos: vec![],
            },
            topic_info: TopicInfo {
                broker_name: "default".to_string(),
                topic_name: name.to_string(),
                header_encoding: BusEncoding::Json,
                key_encoding: BusEncoding::Json,
                value_encoding: BusEncoding::Json,
                col_selectors: vec!["v.id".to_string()],
                properties: BTreeMap::new(),
            },
        }
    }

    #[test]
    fn test_row_serde_roundtrip() {
        let row = CatalogRow {
            prepare_state: PrepareState::Add,
            entity: CatalogEntity::Source(source_info(101, "readings")),
        };
        let bytes = serde_json::to_vec(&row).unwrap();
        let back: CatalogRow = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(row, back);
    }

    #[test]
    fn test_catalog_keys_are_ordered_by_id() {
        assert!(catalog_key(100) < catalog_key(101));
        assert!(catalog_key(101) < catalog_key(u64::MAX));
    }
}
