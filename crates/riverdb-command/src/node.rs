//! Node assembly
//!
//! Wires one node's components in dependency order, starts them, and
//! replays the catalog: committed entities are re-registered and re-wired
//! into the push engine; interrupted DDL is reconciled.

use std::sync::Arc;

use tracing::info;

use riverdb_cluster::{Cluster, ClusterBus, LocalCluster, NotificationType};
use riverdb_core::Sharder;
use riverdb_meta::{load_catalog, CatalogEntity, MetaController, PrepareState};
use riverdb_pull::PullEngine;
use riverdb_push::PushEngine;

use crate::ddl::{DdlContext, DdlCoordinator};
use crate::error::Result;
use crate::executor::Executor;

pub struct Node {
    cluster: Arc<LocalCluster>,
    meta: Arc<MetaController>,
    push: Arc<PushEngine>,
    pull: Arc<PullEngine>,
    executor: Arc<Executor>,
}

impl Node {
    /// Build, wire, and start one node against `bus`.
    pub async fn start(node_id: usize, bus: Arc<ClusterBus>) -> Result<Arc<Node>> {
        let num_shards = bus.num_shards();
        let cluster = LocalCluster::new(node_id, bus);
        let meta = Arc::new(MetaController::new());
        let sharder = Sharder::new(num_shards);

        let push = PushEngine::new(
            Arc::clone(&cluster) as Arc<dyn Cluster>,
            Arc::clone(&meta),
            sharder.clone(),
            None,
        );
        let pull = PullEngine::new(
            Arc::clone(&cluster) as Arc<dyn Cluster>,
            Arc::clone(&meta),
            sharder,
        );
        let ctx = Arc::new(DdlContext {
            cluster: Arc::clone(&cluster) as Arc<dyn Cluster>,
            meta: Arc::clone(&meta),
            push: Arc::clone(&push),
            pull: Arc::clone(&pull),
        });
        let coordinator = DdlCoordinator::new(Arc::clone(&ctx));
        let executor = Executor::new(Arc::clone(&ctx), Arc::clone(&coordinator));

        cluster.register_shard_listener_factory(push.listener_factory());
        cluster.register_notification_listener(
            NotificationType::DdlStatement,
            coordinator.notification_listener(),
        );
        cluster.register_notification_listener(
            NotificationType::SessionClosed,
            executor.session_closed_listener(),
        );
        cluster.set_remote_query_executor(pull.remote_query_executor());

        push.start();
        cluster.start().await?;

        // Catalog replay: committed entities come back, interrupted DDL is
        // resolved. Rows arrive in id order, so upstreams precede views.
        let rows = load_catalog(cluster.as_ref()).await?;
        let committed: Vec<_> = rows
            .iter()
            .filter(|row| row.prepare_state == PrepareState::Committed)
            .cloned()
            .collect();
        let pending = meta.apply_catalog(rows)?;
        for row in &committed {
            match &row.entity {
                CatalogEntity::Source(source) => {
                    push.create_source(source).await?;
                    push.start_source(source.id()).await?;
                }
                CatalogEntity::MaterializedView(mv) => {
                    push.create_materialized_view(mv).await?;
                }
            }
        }
        coordinator.reconcile_on_start(pending).await?;
        info!(node_id, replayed = committed.len(), "node started");

        Ok(Arc::new(Node {
            cluster,
            meta,
            push,
            pull,
            executor,
        }))
    }

    /// Stop push workers, drain, and detach from the bus.
    pub async fn stop(&self) -> Result<()> {
        self.push.stop().await;
        self.cluster.stop().await?;
        Ok(())
    }

    pub fn cluster(&self) -> &Arc<LocalCluster> {
        &self.cluster
    }

    pub fn meta(&self) -> &Arc<MetaController> {
        &self.meta
    }

    pub fn push(&self) -> &Arc<PushEngine> {
        &self.push
    }

    pub fn pull(&self) -> &Arc<PullEngine> {
        &self.pull
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }
}
