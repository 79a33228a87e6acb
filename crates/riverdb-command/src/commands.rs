//! The DDL commands
//!
//! Each command implements the four phases over the shared context.
//! Participants rebuild the command from the broadcast SQL; the originator
//! keeps its parsed state so nothing is parsed twice on that node.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use riverdb_core::{SourceInfo, TableInfo, TopicInfo};
use riverdb_meta::{persist_catalog_row, CatalogEntity, PrepareState};
use riverdb_push::engine::derive_mv_info;
use riverdb_sql::{parse_statement, CreateSource, Statement};

use crate::ddl::{
    register_mv_idempotent, register_source_idempotent, wipe_entity_data, DdlCommand,
    DdlCommandType, DdlContext,
};
use crate::error::{CommandError, Result};

/// Build the command a broadcast statement describes.
pub fn command_from_sql(
    ctx: Arc<DdlContext>,
    schema_name: &str,
    sql: &str,
    table_sequences: Vec<u64>,
) -> Result<Arc<dyn DdlCommand>> {
    match parse_statement(sql)? {
        Statement::CreateSource(ast) => Ok(Arc::new(CreateSourceCommand::new(
            ctx,
            schema_name.to_string(),
            sql.to_string(),
            table_sequences,
            Some(ast),
        ))),
        Statement::CreateMaterializedView(ast) => Ok(Arc::new(
            CreateMaterializedViewCommand::new(
                ctx,
                schema_name.to_string(),
                sql.to_string(),
                table_sequences,
                ast.name,
                ast.query,
            ),
        )),
        Statement::DropSource(name) => Ok(Arc::new(DropSourceCommand::new(
            ctx,
            schema_name.to_string(),
            sql.to_string(),
            name,
        ))),
        Statement::DropMaterializedView(name) => Ok(Arc::new(DropMaterializedViewCommand::new(
            ctx,
            schema_name.to_string(),
            sql.to_string(),
            name,
        ))),
        other => Err(CommandError::Internal(format!(
            "not a ddl statement: {other:?}"
        ))),
    }
}

// ---------------------------------------------------------------------
// CREATE SOURCE
// ---------------------------------------------------------------------

pub struct CreateSourceCommand {
    ctx: Arc<DdlContext>,
    schema_name: String,
    sql: String,
    table_sequences: Vec<u64>,
    ast: Mutex<Option<CreateSource>>,
    source_info: Mutex<Option<SourceInfo>>,
}

impl CreateSourceCommand {
    pub fn new(
        ctx: Arc<DdlContext>,
        schema_name: String,
        sql: String,
        table_sequences: Vec<u64>,
        ast: Option<CreateSource>,
    ) -> Self {
        Self {
            ctx,
            schema_name,
            sql,
            table_sequences,
            ast: Mutex::new(ast),
            source_info: Mutex::new(None),
        }
    }

    /// Resolve (and cache) the source descriptor, parsing the SQL only if
    /// this node has not already.
    async fn source_info(&self) -> Result<SourceInfo> {
        if let Some(info) = self.source_info.lock().await.clone() {
            return Ok(info);
        }
        let ast = {
            let mut slot = self.ast.lock().await;
            match slot.take() {
                Some(ast) => ast,
                None => match parse_statement(&self.sql)? {
                    Statement::CreateSource(ast) => ast,
                    _ => {
                        return Err(CommandError::Internal(format!(
                            "not a create source: {}",
                            self.sql
                        )))
                    }
                },
            }
        };
        let info = self.build_source_info(ast)?;
        *self.source_info.lock().await = Some(info.clone());
        Ok(info)
    }

    fn build_source_info(&self, ast: CreateSource) -> Result<SourceInfo> {
        let table_id = *self.table_sequences.first().ok_or_else(|| {
            CommandError::Internal("create source needs one table sequence".to_string())
        })?;
        let column_names: Vec<String> = ast.columns.iter().map(|c| c.name.clone()).collect();
        let column_types = ast.columns.iter().map(|c| c.column_type).collect();
        let mut primary_key_cols = Vec::with_capacity(ast.primary_key.len());
        for pk in &ast.primary_key {
            let offset = column_names.iter().position(|c| c == pk).ok_or_else(|| {
                CommandError::Sql(riverdb_sql::SqlError::UnknownColumn(pk.clone()))
            })?;
            primary_key_cols.push(offset);
        }
        let info = SourceInfo {
            table_info: TableInfo {
                id: table_id,
                schema_name: self.schema_name.clone(),
                name: ast.name,
                column_names,
                column_types,
                primary_key_cols,
                index_infos: vec![],
            },
            topic_info: TopicInfo {
                broker_name: ast.broker_name,
                topic_name: ast.topic_name,
                header_encoding: ast.header_encoding,
                key_encoding: ast.key_encoding,
                value_encoding: ast.value_encoding,
                col_selectors: ast.col_selectors,
                properties: ast.properties,
            },
        };
        info.validate()?;
        Ok(info)
    }
}

#[async_trait]
impl DdlCommand for CreateSourceCommand {
    fn command_type(&self) -> DdlCommandType {
        DdlCommandType::CreateSource
    }

    fn schema_name(&self) -> &str {
        &self.schema_name
    }

    fn sql(&self) -> &str {
        &self.sql
    }

    fn table_sequences(&self) -> Vec<u64> {
        self.table_sequences.clone()
    }

    async fn before_prepare(&self) -> Result<()> {
        let info = self.source_info().await?;
        if self.ctx.meta.get_table(&self.schema_name, info.name()).is_some() {
            return Err(CommandError::Meta(
                riverdb_meta::MetaError::SourceAlreadyExists {
                    schema_name: self.schema_name.clone(),
                    name: info.name().to_string(),
                },
            ));
        }
        persist_catalog_row(
            self.ctx.cluster.as_ref(),
            CatalogEntity::Source(info),
            PrepareState::Add,
        )
        .await?;
        Ok(())
    }

    async fn on_prepare(&self) -> Result<()> {
        let info = self.source_info().await?;
        self.ctx.push.create_source(&info).await?;
        Ok(())
    }

    async fn on_commit(&self) -> Result<()> {
        let info = self.source_info().await?;
        self.ctx.push.start_source(info.id()).await?;
        register_source_idempotent(&self.ctx.meta, &info)?;
        info!(source = %info.table_info.qualified_name(), "source created");
        Ok(())
    }

    async fn after_commit(&self) -> Result<()> {
        let info = self.source_info().await?;
        persist_catalog_row(
            self.ctx.cluster.as_ref(),
            CatalogEntity::Source(info),
            PrepareState::Committed,
        )
        .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------
// CREATE MATERIALIZED VIEW
// ---------------------------------------------------------------------

pub struct CreateMaterializedViewCommand {
    ctx: Arc<DdlContext>,
    schema_name: String,
    sql: String,
    table_sequences: Vec<u64>,
    name: String,
    query: String,
}

impl CreateMaterializedViewCommand {
    pub fn new(
        ctx: Arc<DdlContext>,
        schema_name: String,
        sql: String,
        table_sequences: Vec<u64>,
        name: String,
        query: String,
    ) -> Self {
        Self {
            ctx,
            schema_name,
            sql,
            table_sequences,
            name,
            query,
        }
    }

    fn mv_info(&self) -> Result<riverdb_core::MaterializedViewInfo> {
        let table_id = *self.table_sequences.first().ok_or_else(|| {
            CommandError::Internal("create materialized view needs a table sequence".to_string())
        })?;
        Ok(derive_mv_info(
            &self.ctx.meta,
            &self.schema_name,
            &self.name,
            &self.query,
            table_id,
        )?)
    }
}

#[async_trait]
impl DdlCommand for CreateMaterializedViewCommand {
    fn command_type(&self) -> DdlCommandType {
        DdlCommandType::CreateMaterializedView
    }

    fn schema_name(&self) -> &str {
        &self.schema_name
    }

    fn sql(&self) -> &str {
        &self.sql
    }

    fn table_sequences(&self) -> Vec<u64> {
        self.table_sequences.clone()
    }

    async fn before_prepare(&self) -> Result<()> {
        if self.ctx.meta.get_table(&self.schema_name, &self.name).is_some() {
            return Err(CommandError::Meta(
                riverdb_meta::MetaError::MaterializedViewAlreadyExists {
                    schema_name: self.schema_name.clone(),
                    name: self.name.clone(),
                },
            ));
        }
        let info = self.mv_info()?;
        persist_catalog_row(
            self.ctx.cluster.as_ref(),
            CatalogEntity::MaterializedView(info),
            PrepareState::Add,
        )
        .await?;
        Ok(())
    }

    async fn on_prepare(&self) -> Result<()> {
        let info = self.mv_info()?;
        self.ctx.push.create_materialized_view(&info).await?;
        Ok(())
    }

    async fn on_commit(&self) -> Result<()> {
        let info = self.mv_info()?;
        register_mv_idempotent(&self.ctx.meta, &info)?;
        info!(view = %info.table_info.qualified_name(), "materialized view created");
        Ok(())
    }

    async fn after_commit(&self) -> Result<()> {
        let info = self.mv_info()?;
        persist_catalog_row(
            self.ctx.cluster.as_ref(),
            CatalogEntity::MaterializedView(info),
            PrepareState::Committed,
        )
        .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------
// DROP SOURCE
// ---------------------------------------------------------------------

pub struct DropSourceCommand {
    ctx: Arc<DdlContext>,
    schema_name: String,
    sql: String,
    name: String,
}

impl DropSourceCommand {
    pub fn new(ctx: Arc<DdlContext>, schema_name: String, sql: String, name: String) -> Self {
        Self {
            ctx,
            schema_name,
            sql,
            name,
        }
    }

    fn resolve(&self) -> Result<SourceInfo> {
        self.ctx
            .meta
            .get_source(&self.schema_name, &self.name)
            .ok_or_else(|| {
                CommandError::Meta(riverdb_meta::MetaError::UnknownSource {
                    schema_name: self.schema_name.clone(),
                    name: self.name.clone(),
                })
            })
    }
}

#[async_trait]
impl DdlCommand for DropSourceCommand {
    fn command_type(&self) -> DdlCommandType {
        DdlCommandType::DropSource
    }

    fn schema_name(&self) -> &str {
        &self.schema_name
    }

    fn sql(&self) -> &str {
        &self.sql
    }

    fn table_sequences(&self) -> Vec<u64> {
        Vec::new()
    }

    async fn before_prepare(&self) -> Result<()> {
        let info = self.resolve()?;
        if !self
            .ctx
            .meta
            .downstream_materialized_views(info.id())
            .is_empty()
        {
            return Err(CommandError::SourceInUse {
                schema_name: self.schema_name.clone(),
                name: self.name.clone(),
            });
        }
        persist_catalog_row(
            self.ctx.cluster.as_ref(),
            CatalogEntity::Source(info),
            PrepareState::Delete,
        )
        .await?;
        Ok(())
    }

    /// Quiesce ingestion on every node before any data is wiped.
    async fn on_prepare(&self) -> Result<()> {
        if let Ok(info) = self.resolve() {
            self.ctx.push.stop_source(info.id()).await?;
        }
        Ok(())
    }

    async fn on_commit(&self) -> Result<()> {
        let Ok(info) = self.resolve() else {
            // Redelivered commit after this node already unregistered.
            return Ok(());
        };
        self.ctx.push.remove_source(info.id()).await?;
        self.ctx.meta.unregister_source(&self.schema_name, &self.name)?;
        info!(source = %info.table_info.qualified_name(), "source dropped");
        Ok(())
    }

    async fn after_commit(&self) -> Result<()> {
        // Meta no longer knows the source; read the catalog row to find the
        // table (and index) ids to wipe.
        let rows = riverdb_meta::load_catalog(self.ctx.cluster.as_ref()).await?;
        for row in rows {
            if row.prepare_state == PrepareState::Delete
                && row.entity.schema_name() == self.schema_name
                && row.entity.name() == self.name
            {
                if let CatalogEntity::Source(source) = &row.entity {
                    wipe_entity_data(self.ctx.cluster.as_ref(), &source.table_info).await?;
                }
                riverdb_meta::delete_catalog_row(self.ctx.cluster.as_ref(), row.entity.id())
                    .await?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------
// DROP MATERIALIZED VIEW
// ---------------------------------------------------------------------

pub struct DropMaterializedViewCommand {
    ctx: Arc<DdlContext>,
    schema_name: String,
    sql: String,
    name: String,
}

impl DropMaterializedViewCommand {
    pub fn new(ctx: Arc<DdlContext>, schema_name: String, sql: String, name: String) -> Self {
        Self {
            ctx,
            schema_name,
            sql,
            name,
        }
    }

    fn resolve(&self) -> Result<riverdb_core::MaterializedViewInfo> {
        self.ctx
            .meta
            .get_materialized_view(&self.schema_name, &self.name)
            .ok_or_else(|| {
                CommandError::Meta(riverdb_meta::MetaError::UnknownMaterializedView {
                    schema_name: self.schema_name.clone(),
                    name: self.name.clone(),
                })
            })
    }
}

#[async_trait]
impl DdlCommand for DropMaterializedViewCommand {
    fn command_type(&self) -> DdlCommandType {
        DdlCommandType::DropMaterializedView
    }

    fn schema_name(&self) -> &str {
        &self.schema_name
    }

    fn sql(&self) -> &str {
        &self.sql
    }

    fn table_sequences(&self) -> Vec<u64> {
        Vec::new()
    }

    async fn before_prepare(&self) -> Result<()> {
        let info = self.resolve()?;
        if !self
            .ctx
            .meta
            .downstream_materialized_views(info.id())
            .is_empty()
        {
            return Err(CommandError::SourceInUse {
                schema_name: self.schema_name.clone(),
                name: self.name.clone(),
            });
        }
        persist_catalog_row(
            self.ctx.cluster.as_ref(),
            CatalogEntity::MaterializedView(info),
            PrepareState::Delete,
        )
        .await?;
        Ok(())
    }

    async fn on_prepare(&self) -> Result<()> {
        // Nothing consumes a bus for a view; detachment happens at commit.
        Ok(())
    }

    async fn on_commit(&self) -> Result<()> {
        let Ok(info) = self.resolve() else {
            return Ok(());
        };
        self.ctx.push.remove_materialized_view(info.id()).await?;
        self.ctx
            .meta
            .unregister_materialized_view(&self.schema_name, &self.name)?;
        info!(view = %info.table_info.qualified_name(), "materialized view dropped");
        Ok(())
    }

    async fn after_commit(&self) -> Result<()> {
        let rows = riverdb_meta::load_catalog(self.ctx.cluster.as_ref()).await?;
        for row in rows {
            if row.prepare_state == PrepareState::Delete
                && row.entity.schema_name() == self.schema_name
                && row.entity.name() == self.name
            {
                if let CatalogEntity::MaterializedView(mv) = &row.entity {
                    wipe_entity_data(self.ctx.cluster.as_ref(), &mv.table_info).await?;
                }
                riverdb_meta::delete_catalog_row(self.ctx.cluster.as_ref(), row.entity.id())
                    .await?;
            }
        }
        Ok(())
    }
}
