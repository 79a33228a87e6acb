//! The multi-phase DDL coordinator

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use riverdb_cluster::{
    Cluster, DdlPhase, DdlStatementInfo, Notification, NotificationListener,
};
use riverdb_core::{append_u64_be, MaterializedViewInfo, SourceInfo, TableInfo};
use riverdb_meta::{delete_catalog_row, CatalogEntity, CatalogRow, MetaController, PrepareState};
use riverdb_pull::PullEngine;
use riverdb_push::PushEngine;

use crate::commands::command_from_sql;
use crate::error::{CommandError, Result};

/// Shared handles every command needs.
pub struct DdlContext {
    pub cluster: Arc<dyn Cluster>,
    pub meta: Arc<MetaController>,
    pub push: Arc<PushEngine>,
    pub pull: Arc<PullEngine>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DdlCommandType {
    CreateSource,
    CreateMaterializedView,
    DropSource,
    DropMaterializedView,
}

/// One DDL statement, executed in four idempotent phases.
#[async_trait]
pub trait DdlCommand: Send + Sync {
    fn command_type(&self) -> DdlCommandType;
    fn schema_name(&self) -> &str;
    fn sql(&self) -> &str;
    fn table_sequences(&self) -> Vec<u64>;

    /// Serializes DDL within a schema.
    fn lock_name(&self) -> String {
        format!("{}/", self.schema_name())
    }

    /// Originator only: persist the catalog row, reject collisions.
    async fn before_prepare(&self) -> Result<()>;

    /// Every node: build in-memory state, do not activate consumers.
    async fn on_prepare(&self) -> Result<()>;

    /// Every node: activate and register.
    async fn on_commit(&self) -> Result<()>;

    /// Originator only: settle the catalog row.
    async fn after_commit(&self) -> Result<()>;
}

const PHASE_RETRIES: usize = 3;

pub struct DdlCoordinator {
    ctx: Arc<DdlContext>,
    phase_timeout: Duration,
    /// Per-lock-name mutexes serializing DDL within a schema on this node.
    schema_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    /// Commands currently between prepare and commit on this node, keyed by
    /// (originating node, lock name) so a redelivered phase reuses the same
    /// instance and concurrent origins do not collide.
    active: Mutex<HashMap<(usize, String), Arc<dyn DdlCommand>>>,
}

impl DdlCoordinator {
    pub fn new(ctx: Arc<DdlContext>) -> Arc<DdlCoordinator> {
        Arc::new(DdlCoordinator {
            ctx,
            phase_timeout: Duration::from_secs(10),
            schema_locks: Mutex::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
        })
    }

    pub fn context(&self) -> &Arc<DdlContext> {
        &self.ctx
    }

    /// The listener to register for `NotificationType::DdlStatement`.
    pub fn notification_listener(self: &Arc<Self>) -> Arc<dyn NotificationListener> {
        Arc::new(DdlNotificationListener {
            coordinator: Arc::downgrade(self),
        })
    }

    /// Drive a command as the originating node.
    pub async fn run(&self, command: Arc<dyn DdlCommand>) -> Result<()> {
        let lock = self.schema_lock(&command.lock_name());
        let _serialize = lock.lock().await;

        let key = (self.ctx.cluster.node_id(), command.lock_name());
        self.set_active(key.clone(), Arc::clone(&command));
        let result = self.run_locked(&command).await;
        self.clear_active(&key);
        result
    }

    async fn run_locked(&self, command: &Arc<dyn DdlCommand>) -> Result<()> {
        command.before_prepare().await?;
        self.broadcast_phase(command, DdlPhase::Prepare).await?;
        self.broadcast_phase(command, DdlPhase::Commit).await?;
        command.after_commit().await?;
        debug!(sql = command.sql(), "ddl committed");
        Ok(())
    }

    async fn broadcast_phase(&self, command: &Arc<dyn DdlCommand>, phase: DdlPhase) -> Result<()> {
        let notification = Notification::DdlStatement(DdlStatementInfo {
            originating_node_id: self.ctx.cluster.node_id(),
            schema_name: command.schema_name().to_string(),
            sql: command.sql().to_string(),
            table_sequences: command.table_sequences(),
            phase,
        });
        let mut last_error = None;
        for attempt in 0..PHASE_RETRIES {
            let send = tokio::time::timeout(
                self.phase_timeout,
                self.ctx.cluster.broadcast_notification(notification.clone()),
            )
            .await;
            match send {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(e)) => {
                    warn!(?phase, attempt, error = %e, "ddl phase broadcast failed");
                    last_error = Some(CommandError::Cluster(e));
                }
                Err(_) => {
                    warn!(?phase, attempt, "ddl phase broadcast timed out");
                    last_error = Some(CommandError::DdlTimeout(format!(
                        "{phase:?} did not complete within {:?}",
                        self.phase_timeout
                    )));
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| CommandError::Internal("phase failed without error".to_string())))
    }

    /// Handle one phase of a broadcast statement on this node.
    async fn handle_ddl_notification(&self, info: DdlStatementInfo) -> Result<()> {
        let key = (
            info.originating_node_id,
            format!("{}/", info.schema_name),
        );
        let command = {
            let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            active.get(&key).cloned()
        };
        let command = match command {
            Some(command) => command,
            None => {
                let command = command_from_sql(
                    Arc::clone(&self.ctx),
                    &info.schema_name,
                    &info.sql,
                    info.table_sequences.clone(),
                )?;
                self.set_active(key.clone(), Arc::clone(&command));
                command
            }
        };
        match info.phase {
            DdlPhase::Prepare => command.on_prepare().await,
            DdlPhase::Commit => {
                let result = command.on_commit().await;
                // The participant's work is done at commit; the originator
                // clears its own entry when `run` returns.
                if info.originating_node_id != self.ctx.cluster.node_id() {
                    self.clear_active(&key);
                }
                result
            }
        }
    }

    /// Resolve catalog rows a crash left in a non-committed state: rows in
    /// `Add` never committed cluster-wide, so the create rolls back; rows
    /// in `Delete` finish the drop. Either way the entity's data is wiped
    /// and the row removed.
    pub async fn reconcile_on_start(&self, pending: Vec<CatalogRow>) -> Result<()> {
        for row in pending {
            match row.prepare_state {
                PrepareState::Committed => continue,
                PrepareState::Add | PrepareState::Delete => {
                    warn!(
                        entity = row.entity.name(),
                        state = ?row.prepare_state,
                        "reconciling interrupted ddl"
                    );
                    match &row.entity {
                        CatalogEntity::Source(source) => {
                            wipe_entity_data(self.ctx.cluster.as_ref(), &source.table_info)
                                .await?;
                        }
                        CatalogEntity::MaterializedView(mv) => {
                            wipe_entity_data(self.ctx.cluster.as_ref(), &mv.table_info).await?;
                        }
                    }
                    delete_catalog_row(self.ctx.cluster.as_ref(), row.entity.id()).await?;
                }
            }
        }
        Ok(())
    }

    fn schema_lock(&self, lock_name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.schema_locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            locks
                .entry(lock_name.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    fn set_active(&self, key: (usize, String), command: Arc<dyn DdlCommand>) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.insert(key, command);
    }

    fn clear_active(&self, key: &(usize, String)) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.remove(key);
    }
}

/// Delete every key of a table (and its indexes) on every shard.
pub async fn wipe_entity_data(cluster: &dyn Cluster, table: &TableInfo) -> Result<()> {
    let mut table_ids = vec![table.id];
    table_ids.extend(table.index_infos.iter().map(|index| index.id));
    for table_id in table_ids {
        let mut start = Vec::with_capacity(8);
        append_u64_be(&mut start, table_id);
        let mut end = Vec::with_capacity(8);
        append_u64_be(&mut end, table_id + 1);
        cluster.delete_all_data_in_range(&start, &end).await?;
    }
    Ok(())
}

/// Idempotency helper: registering an entity that is already registered
/// with the same id is a redelivered notification, not a conflict.
pub fn register_source_idempotent(meta: &MetaController, info: &SourceInfo) -> Result<()> {
    if let Some(existing) = meta.get_source(&info.table_info.schema_name, info.name()) {
        if existing.id() == info.id() {
            return Ok(());
        }
    }
    meta.register_source(info.clone())?;
    Ok(())
}

pub fn register_mv_idempotent(meta: &MetaController, info: &MaterializedViewInfo) -> Result<()> {
    if let Some(existing) =
        meta.get_materialized_view(&info.table_info.schema_name, info.name())
    {
        if existing.id() == info.id() {
            return Ok(());
        }
    }
    meta.register_materialized_view(info.clone())?;
    Ok(())
}

struct DdlNotificationListener {
    coordinator: Weak<DdlCoordinator>,
}

#[async_trait]
impl NotificationListener for DdlNotificationListener {
    async fn handle_notification(
        &self,
        notification: Notification,
    ) -> riverdb_cluster::Result<()> {
        let Notification::DdlStatement(info) = notification else {
            return Ok(());
        };
        let coordinator = self.coordinator.upgrade().ok_or_else(|| {
            riverdb_cluster::ClusterError::Unavailable("ddl coordinator stopped".to_string())
        })?;
        coordinator
            .handle_ddl_notification(info)
            .await
            .map_err(|e| riverdb_cluster::ClusterError::NotificationFailed(e.to_string()))
    }
}
