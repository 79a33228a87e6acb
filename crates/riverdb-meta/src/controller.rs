//! In-memory schema registry

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::info;

use riverdb_core::{MaterializedViewInfo, SourceInfo, TableInfo};

use crate::catalog::{CatalogEntity, CatalogRow, PrepareState};
use crate::error::{MetaError, Result};

/// A table found by name: either a source or a materialized view.
#[derive(Debug, Clone)]
pub enum TableRef {
    Source(SourceInfo),
    MaterializedView(MaterializedViewInfo),
}

impl TableRef {
    pub fn table_info(&self) -> &TableInfo {
        match self {
            TableRef::Source(s) => &s.table_info,
            TableRef::MaterializedView(mv) => &mv.table_info,
        }
    }
}

#[derive(Default)]
struct SchemaData {
    sources: HashMap<String, SourceInfo>,
    materialized_views: HashMap<String, MaterializedViewInfo>,
}

impl SchemaData {
    fn name_taken(&self, name: &str) -> bool {
        self.sources.contains_key(name) || self.materialized_views.contains_key(name)
    }
}

/// Authoritative registry of schemas and their tables.
///
/// Read-mostly behind a reader/writer lock; every mutation happens under the
/// DDL coordinator, never directly from query paths.
#[derive(Default)]
pub struct MetaController {
    schemas: RwLock<HashMap<String, SchemaData>>,
}

impl MetaController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure `name` exists as a schema. Schemas are created lazily on first
    /// reference; there is no `CREATE SCHEMA`.
    pub fn get_or_create_schema(&self, name: &str) {
        let mut schemas = self.schemas.write().unwrap_or_else(|e| e.into_inner());
        schemas.entry(name.to_string()).or_default();
    }

    pub fn schema_names(&self) -> Vec<String> {
        let schemas = self.schemas.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = schemas.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn register_source(&self, source: SourceInfo) -> Result<()> {
        source.validate()?;
        let mut schemas = self.schemas.write().unwrap_or_else(|e| e.into_inner());
        let schema = schemas
            .entry(source.table_info.schema_name.clone())
            .or_default();
        if schema.name_taken(&source.table_info.name) {
            return Err(MetaError::SourceAlreadyExists {
                schema_name: source.table_info.schema_name.clone(),
                name: source.table_info.name.clone(),
            });
        }
        info!(table = %source.table_info.qualified_name(), id = source.id(), "registering source");
        schema.sources.insert(source.table_info.name.clone(), source);
        Ok(())
    }

    pub fn unregister_source(&self, schema_name: &str, name: &str) -> Result<SourceInfo> {
        let mut schemas = self.schemas.write().unwrap_or_else(|e| e.into_inner());
        schemas
            .get_mut(schema_name)
            .and_then(|schema| schema.sources.remove(name))
            .ok_or_else(|| MetaError::UnknownSource {
                schema_name: schema_name.to_string(),
                name: name.to_string(),
            })
    }

    pub fn register_materialized_view(&self, mv: MaterializedViewInfo) -> Result<()> {
        mv.table_info.validate()?;
        let mut schemas = self.schemas.write().unwrap_or_else(|e| e.into_inner());
        let schema = schemas
            .entry(mv.table_info.schema_name.clone())
            .or_default();
        if schema.name_taken(&mv.table_info.name) {
            return Err(MetaError::MaterializedViewAlreadyExists {
                schema_name: mv.table_info.schema_name.clone(),
                name: mv.table_info.name.clone(),
            });
        }
        info!(table = %mv.table_info.qualified_name(), id = mv.id(), "registering materialized view");
        schema
            .materialized_views
            .insert(mv.table_info.name.clone(), mv);
        Ok(())
    }

    pub fn unregister_materialized_view(
        &self,
        schema_name: &str,
        name: &str,
    ) -> Result<MaterializedViewInfo> {
        let mut schemas = self.schemas.write().unwrap_or_else(|e| e.into_inner());
        schemas
            .get_mut(schema_name)
            .and_then(|schema| schema.materialized_views.remove(name))
            .ok_or_else(|| MetaError::UnknownMaterializedView {
                schema_name: schema_name.to_string(),
                name: name.to_string(),
            })
    }

    pub fn get_source(&self, schema_name: &str, name: &str) -> Option<SourceInfo> {
        let schemas = self.schemas.read().unwrap_or_else(|e| e.into_inner());
        schemas.get(schema_name)?.sources.get(name).cloned()
    }

    pub fn get_materialized_view(
        &self,
        schema_name: &str,
        name: &str,
    ) -> Option<MaterializedViewInfo> {
        let schemas = self.schemas.read().unwrap_or_else(|e| e.into_inner());
        schemas
            .get(schema_name)?
            .materialized_views
            .get(name)
            .cloned()
    }

    /// Look a table up by name, whatever kind it is.
    pub fn get_table(&self, schema_name: &str, name: &str) -> Option<TableRef> {
        let schemas = self.schemas.read().unwrap_or_else(|e| e.into_inner());
        let schema = schemas.get(schema_name)?;
        if let Some(source) = schema.sources.get(name) {
            return Some(TableRef::Source(source.clone()));
        }
        schema
            .materialized_views
            .get(name)
            .map(|mv| TableRef::MaterializedView(mv.clone()))
    }

    /// Materialized views that consume rows from `table_id`.
    pub fn downstream_materialized_views(&self, table_id: u64) -> Vec<MaterializedViewInfo> {
        let schemas = self.schemas.read().unwrap_or_else(|e| e.into_inner());
        schemas
            .values()
            .flat_map(|schema| schema.materialized_views.values())
            .filter(|mv| mv.upstream_table_ids.contains(&table_id))
            .cloned()
            .collect()
    }

    /// Register every `Committed` catalog row and hand back the rest, which
    /// the DDL reconciler re-drives.
    pub fn apply_catalog(&self, rows: Vec<CatalogRow>) -> Result<Vec<CatalogRow>> {
        let mut pending = Vec::new();
        for row in rows {
            if row.prepare_state != PrepareState::Committed {
                pending.push(row);
                continue;
            }
            match row.entity {
                CatalogEntity::Source(source) => self.register_source(source)?,
                CatalogEntity::MaterializedView(mv) => self.register_materialized_view(mv)?,
            }
        }
        Ok(pending)
    }
}
