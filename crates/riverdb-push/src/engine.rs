//! The push engine
//!
//! One engine per node. It owns:
//!
//! - the operator arena shared by every source and materialized view,
//! - one worker task per locally-led shard, woken by the shard listener,
//!   which moves the shard's forward queue and drains its inbox,
//! - the source and view registries mutated by the DDL coordinator.
//!
//! Batch discipline: each shard wake is handled with a single write batch —
//! drain the inbox, write every derived update, advance the applied
//! watermarks, commit. A failed commit discards the batch; redelivery of the
//! wake retries from the durable queue/inbox state.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, warn};

use riverdb_cluster::{Cluster, ShardListener, ShardListenerFactory, WriteBatch};
use riverdb_core::{
    decode_row, MaterializedViewInfo, Row, Sharder, SourceInfo, TableInfo,
};
use riverdb_meta::MetaController;
use riverdb_sql::{translate_select, AggregateItem, Expr, PhysicalPlan};

use crate::aggregate::{AggregatePartial, AggregateSink};
use crate::error::{PushError, Result};
use crate::exec::{ExecContext, OpId, OperatorDag};
use crate::forwarder::{
    forward_queue_prefix, inbox_key, inbox_prefix, parse_forward_queue_key, parse_inbox_key,
    read_receiver_sequence, receiver_sequence_key, ShardForwarder,
};
use crate::message_parser::{BusMessage, DescriptorRegistry};
use crate::operators::{Projection, Selection, TableWriter};
use crate::source::Source;
use crate::table;

struct SourceRuntime {
    source: Arc<Source>,
    writer: OpId,
}

struct MvRuntime {
    info: MaterializedViewInfo,
    /// First operator of the chain hanging off the upstream table's writer.
    chain_root: OpId,
    /// The view's own table writer (the chain's sink).
    sink_writer: OpId,
}

#[derive(Default)]
struct EngineState {
    dag: OperatorDag,
    sources: HashMap<u64, SourceRuntime>,
    materialized_views: HashMap<u64, MvRuntime>,
    /// Table id → writer node, for wiring consumers under any table.
    table_writers: HashMap<u64, OpId>,
    /// Entity id → aggregate sink fed by the inbox drain.
    receivers: HashMap<u64, Arc<AggregateSink>>,
}

struct ShardWorker {
    wake: mpsc::Sender<()>,
    stop: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

pub struct PushEngine {
    cluster: Arc<dyn Cluster>,
    meta: Arc<MetaController>,
    forwarder: ShardForwarder,
    descriptor_registry: Option<Arc<dyn DescriptorRegistry>>,
    state: RwLock<EngineState>,
    workers: Mutex<HashMap<u64, ShardWorker>>,
    started: AtomicBool,
}

impl PushEngine {
    pub fn new(
        cluster: Arc<dyn Cluster>,
        meta: Arc<MetaController>,
        sharder: Sharder,
        descriptor_registry: Option<Arc<dyn DescriptorRegistry>>,
    ) -> Arc<PushEngine> {
        Arc::new(PushEngine {
            cluster,
            meta,
            forwarder: ShardForwarder::new(sharder),
            descriptor_registry,
            state: RwLock::new(EngineState::default()),
            workers: Mutex::new(HashMap::new()),
            started: AtomicBool::new(false),
        })
    }

    /// The shard-listener factory to register with the cluster before
    /// starting it.
    pub fn listener_factory(self: &Arc<Self>) -> Arc<dyn ShardListenerFactory> {
        Arc::new(PushListenerFactory {
            engine: Arc::downgrade(self),
        })
    }

    /// Spawn a worker per locally-led shard. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        for shard_id in self.cluster.get_local_shard_ids() {
            let (wake_tx, mut wake_rx) = mpsc::channel::<()>(1);
            let (stop_tx, mut stop_rx) = watch::channel(false);
            let engine = Arc::clone(self);
            let handle = tokio::spawn(async move {
                loop {
                    tokio::select! {
                        changed = stop_rx.changed() => {
                            if changed.is_err() || *stop_rx.borrow() {
                                break;
                            }
                        }
                        received = wake_rx.recv() => {
                            match received {
                                Some(()) => {
                                    if let Err(e) = engine.process_shard(shard_id).await {
                                        warn!(shard_id, error = %e, "shard processing failed, awaiting redelivery");
                                    }
                                }
                                None => break,
                            }
                        }
                    }
                }
                debug!(shard_id, "shard worker stopped");
            });
            workers.insert(
                shard_id,
                ShardWorker {
                    wake: wake_tx,
                    stop: stop_tx,
                    handle,
                },
            );
        }
        // Initial sweep: drain whatever a previous process left in the
        // queues and inboxes of locally-led shards.
        for worker in workers.values() {
            let _ = worker.wake.try_send(());
        }
    }

    /// Stop workers, draining the in-flight wake first. Idempotent.
    pub async fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        let workers: Vec<(u64, ShardWorker)> = {
            let mut guard = self.workers.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain().collect()
        };
        for (_, worker) in workers {
            let _ = worker.stop.send(true);
            let _ = worker.handle.await;
        }
    }

    /// Hint from the shard listener: replicated writes landed on `shard_id`.
    /// Wakes may coalesce; the worker re-reads durable state anyway.
    pub fn wake_shard(&self, shard_id: u64) {
        let workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(worker) = workers.get(&shard_id) {
            let _ = worker.wake.try_send(());
        }
    }

    // -----------------------------------------------------------------
    // Ingestion
    // -----------------------------------------------------------------

    /// Parse and ingest a batch of bus messages for `source_id`. A parse
    /// error fails the whole batch without consuming it.
    pub async fn ingest_messages(&self, source_id: u64, messages: &[BusMessage]) -> Result<()> {
        let rows = {
            let state = self.state.read().await;
            let runtime = state
                .sources
                .get(&source_id)
                .ok_or(PushError::UnknownSource(source_id))?;
            runtime.source.parse_messages(messages)?
        };
        self.ingest_rows(source_id, rows).await
    }

    /// Ingest already-typed rows for `source_id` (the test and replay
    /// path). Rows are routed to their shards by hashed primary key; each
    /// shard's rows run through the operator graph in one batch.
    pub async fn ingest_rows(&self, source_id: u64, rows: Vec<Row>) -> Result<()> {
        let state = self.state.read().await;
        let runtime = state
            .sources
            .get(&source_id)
            .ok_or(PushError::UnknownSource(source_id))?;
        if !runtime.source.accepts_rows() {
            return Err(PushError::SourceNotStarted(
                runtime.source.info().name().to_string(),
            ));
        }
        let table_info = &runtime.source.info().table_info;

        let mut by_shard: BTreeMap<u64, Vec<Row>> = BTreeMap::new();
        for row in rows {
            let key = table::encode_sharding_key(table_info, &row)?;
            by_shard
                .entry(self.forwarder.shard_for_key(&key))
                .or_default()
                .push(row);
        }

        for (shard_id, shard_rows) in by_shard {
            let mut batch = WriteBatch::new(shard_id, false);
            let mut ctx = ExecContext::new(&mut batch, &self.forwarder, self.cluster.as_ref());
            state
                .dag
                .execute_from(runtime.writer, shard_rows, &mut ctx)
                .await?;
            let forwarded = ctx.forwarded;
            batch.set_notify_remote(forwarded);
            self.cluster.write_batch(batch).await?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Shard processing (listener-driven)
    // -----------------------------------------------------------------

    async fn process_shard(&self, shard_id: u64) -> Result<()> {
        self.move_forward_queue(shard_id).await?;
        self.drain_inbox(shard_id).await?;
        Ok(())
    }

    /// Copy this shard's queued forwards into their destination inboxes,
    /// then delete them from the queue. A crash between the two commits
    /// re-sends; the inbox sequence dedups the replay.
    async fn move_forward_queue(&self, shard_id: u64) -> Result<()> {
        let prefix = forward_queue_prefix(shard_id);
        let mut end = prefix.clone();
        end.push(0xFF);
        let entries = self.cluster.local_scan(&prefix, Some(&end), -1).await?;
        if entries.is_empty() {
            return Ok(());
        }

        let mut by_dest: BTreeMap<u64, Vec<(u64, u64, Vec<u8>)>> = BTreeMap::new();
        for pair in &entries {
            let (dest_shard, entity_id, seq) = parse_forward_queue_key(&pair.key)?;
            by_dest
                .entry(dest_shard)
                .or_default()
                .push((entity_id, seq, pair.value.clone()));
        }
        for (dest_shard, dest_entries) in by_dest {
            let mut batch = WriteBatch::new(dest_shard, true);
            for (entity_id, seq, value) in dest_entries {
                batch.add_put(inbox_key(dest_shard, shard_id, entity_id, seq), value)?;
            }
            self.cluster.write_batch(batch).await?;
        }

        let mut cleanup = WriteBatch::new(shard_id, false);
        for pair in entries {
            cleanup.add_delete(pair.key)?;
        }
        self.cluster.write_batch(cleanup).await?;
        Ok(())
    }

    /// Apply this shard's pending inbox entries: fold forwarded rows into
    /// their receivers, write derived updates, advance per-sender
    /// watermarks, delete the entries — one batch, all or nothing.
    async fn drain_inbox(&self, shard_id: u64) -> Result<()> {
        let prefix = inbox_prefix(shard_id);
        let mut end = prefix.clone();
        end.push(0xFF);
        let entries = self.cluster.local_scan(&prefix, Some(&end), -1).await?;
        if entries.is_empty() {
            return Ok(());
        }

        let state = self.state.read().await;
        let mut batch = WriteBatch::new(shard_id, false);
        // (sender, entity) → applied watermark, fetched once.
        let mut applied: HashMap<(u64, u64), u64> = HashMap::new();
        // entity → fresh rows (inbox order preserves per-sender FIFO).
        let mut fresh: BTreeMap<u64, Vec<Row>> = BTreeMap::new();
        // (sender, entity) → highest sequence seen this drain.
        let mut high_water: HashMap<(u64, u64), u64> = HashMap::new();

        for pair in &entries {
            let (sender_shard, entity_id, seq) = parse_inbox_key(&pair.key)?;
            batch.add_delete(pair.key.clone())?;

            let slot = (sender_shard, entity_id);
            let watermark = match applied.get(&slot) {
                Some(&w) => w,
                None => {
                    let w = read_receiver_sequence(
                        self.cluster.as_ref(),
                        shard_id,
                        sender_shard,
                        entity_id,
                    )
                    .await?;
                    applied.insert(slot, w);
                    w
                }
            };
            if seq <= watermark {
                // Replayed by the queue mover; already applied.
                continue;
            }
            let Some(receiver) = state.receivers.get(&entity_id) else {
                // Entity dropped while rows were in flight; the entries are
                // already queued for deletion above.
                debug!(entity_id, "dropping inbox entries for removed entity");
                continue;
            };
            let row = decode_row(&pair.value, receiver.upstream_col_types())?;
            fresh.entry(entity_id).or_default().push(row);
            let entry = high_water.entry(slot).or_insert(seq);
            *entry = (*entry).max(seq);
        }

        let mut forwarded = false;
        for (entity_id, rows) in fresh {
            let receiver = state
                .receivers
                .get(&entity_id)
                .ok_or(PushError::UnknownMaterializedView(entity_id))?;
            let sink_writer = state
                .materialized_views
                .get(&entity_id)
                .map(|mv| mv.sink_writer)
                .ok_or(PushError::UnknownMaterializedView(entity_id))?;
            let mut ctx = ExecContext::new(&mut batch, &self.forwarder, self.cluster.as_ref());
            let updated = receiver.apply_forwarded(rows, &mut ctx).await?;
            state.dag.execute_from(sink_writer, updated, &mut ctx).await?;
            forwarded |= ctx.forwarded;
        }

        for ((sender_shard, entity_id), seq) in high_water {
            batch.add_put(
                receiver_sequence_key(shard_id, sender_shard, entity_id),
                seq.to_le_bytes().to_vec(),
            )?;
        }
        batch.set_notify_remote(forwarded);
        self.cluster.write_batch(batch).await?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // DDL-driven wiring
    // -----------------------------------------------------------------

    /// Create the source's runtime and its table-writer node. Does not
    /// activate consumption. Idempotent (notifications redeliver).
    pub async fn create_source(&self, info: &SourceInfo) -> Result<()> {
        let mut state = self.state.write().await;
        if state.sources.contains_key(&info.id()) {
            return Ok(());
        }
        let source = Arc::new(Source::new(
            info.clone(),
            self.descriptor_registry.clone(),
        )?);
        source.prepare()?;
        let writer = state
            .dag
            .add_node(Arc::new(TableWriter::new(info.table_info.clone())));
        state.table_writers.insert(info.id(), writer);
        state.sources.insert(info.id(), SourceRuntime { source, writer });
        debug!(source = info.name(), id = info.id(), "source created");
        Ok(())
    }

    /// Activate message consumption (`OnCommit`).
    pub async fn start_source(&self, source_id: u64) -> Result<()> {
        let state = self.state.read().await;
        let runtime = state
            .sources
            .get(&source_id)
            .ok_or(PushError::UnknownSource(source_id))?;
        runtime.source.start()
    }

    /// Deactivate message consumption (drop-prepare; quiesces ingestion
    /// before any data wipe).
    pub async fn stop_source(&self, source_id: u64) -> Result<()> {
        let state = self.state.read().await;
        let runtime = state
            .sources
            .get(&source_id)
            .ok_or(PushError::UnknownSource(source_id))?;
        runtime.source.stop()
    }

    /// Remove the source's runtime and operator node entirely.
    pub async fn remove_source(&self, source_id: u64) -> Result<()> {
        let mut state = self.state.write().await;
        let Some(runtime) = state.sources.remove(&source_id) else {
            return Ok(());
        };
        runtime.source.mark_dropped();
        state.table_writers.remove(&source_id);
        state.dag.remove_subtree(runtime.writer)?;
        Ok(())
    }

    pub async fn source_state(&self, source_id: u64) -> Option<crate::source::SourceState> {
        let state = self.state.read().await;
        state.sources.get(&source_id).map(|r| r.source.state())
    }

    /// Build a view's operator chain and hang it off its upstream table's
    /// writer. Idempotent.
    pub async fn create_materialized_view(&self, info: &MaterializedViewInfo) -> Result<()> {
        let mut state = self.state.write().await;
        if state.materialized_views.contains_key(&info.id()) {
            return Ok(());
        }
        let plan = translate_select(
            &self.meta,
            &info.table_info.schema_name,
            &info.query,
        )?;
        let parts = decompose_mv_plan(plan)?;
        let upstream_id = parts.upstream.id;
        let upstream_writer =
            *state
                .table_writers
                .get(&upstream_id)
                .ok_or_else(|| PushError::UnsupportedQuery(format!(
                    "upstream table {upstream_id} is not wired into this engine"
                )))?;

        let sink_writer = state
            .dag
            .add_node(Arc::new(TableWriter::new(info.table_info.clone())));
        state.table_writers.insert(info.id(), sink_writer);

        // Build the upstream-side chain, in flow order.
        let mut chain: Vec<OpId> = Vec::new();
        if let Some(predicates) = parts.selection.clone() {
            chain.push(state.dag.add_node(Arc::new(Selection::new(
                predicates,
                parts.upstream.column_names.clone(),
                parts.upstream.column_types.clone(),
                parts.upstream.primary_key_cols.clone(),
            ))));
        }
        match &parts.shape {
            MvShape::Aggregate { group_by_cols, items } => {
                chain.push(state.dag.add_node(Arc::new(AggregatePartial::new(
                    group_by_cols.clone(),
                    parts.upstream.column_names.clone(),
                    parts.upstream.column_types.clone(),
                    info.id(),
                ))));
                state.receivers.insert(
                    info.id(),
                    Arc::new(AggregateSink::new(
                        info.table_info.clone(),
                        items.clone(),
                        group_by_cols.clone(),
                        parts.upstream.column_types.clone(),
                    )),
                );
            }
            MvShape::Projection { exprs } => {
                chain.push(state.dag.add_node(Arc::new(Projection::new(
                    exprs.clone(),
                    info.table_info.column_names.clone(),
                    info.table_info.column_types.clone(),
                    info.table_info.primary_key_cols.clone(),
                ))));
                chain.push(sink_writer);
            }
            MvShape::Passthrough => {
                chain.push(sink_writer);
            }
        }

        let chain_root = chain[0];
        for pair in chain.windows(2) {
            state.dag.connect(pair[0], pair[1])?;
        }
        state.dag.connect(upstream_writer, chain_root)?;
        state.materialized_views.insert(
            info.id(),
            MvRuntime {
                info: info.clone(),
                chain_root,
                sink_writer,
            },
        );
        debug!(view = info.name(), id = info.id(), "materialized view created");
        Ok(())
    }

    /// Detach and dismantle a view's operators.
    pub async fn remove_materialized_view(&self, mv_id: u64) -> Result<()> {
        let mut state = self.state.write().await;
        let Some(runtime) = state.materialized_views.remove(&mv_id) else {
            return Ok(());
        };
        state.receivers.remove(&mv_id);
        state.table_writers.remove(&mv_id);
        // The sink writer may sit inside the chain subtree (projection
        // case); remove the chain first, then the writer if still present.
        state.dag.remove_subtree(runtime.chain_root)?;
        let _ = state.dag.remove_subtree(runtime.sink_writer);
        debug!(view = runtime.info.name(), id = mv_id, "materialized view removed");
        Ok(())
    }
}

struct PushListenerFactory {
    engine: Weak<PushEngine>,
}

impl ShardListenerFactory for PushListenerFactory {
    fn create_shard_listener(&self, shard_id: u64) -> Arc<dyn ShardListener> {
        Arc::new(PushShardListener {
            engine: self.engine.clone(),
            shard_id,
        })
    }
}

struct PushShardListener {
    engine: Weak<PushEngine>,
    shard_id: u64,
}

impl ShardListener for PushShardListener {
    fn remote_write_occurred(&self) {
        if let Some(engine) = self.engine.upgrade() {
            engine.wake_shard(self.shard_id);
        }
    }
}

// ---------------------------------------------------------------------
// Plan decomposition and sink-table derivation
// ---------------------------------------------------------------------

enum MvShape {
    Passthrough,
    Projection { exprs: Vec<Expr> },
    Aggregate {
        group_by_cols: Vec<usize>,
        items: Vec<AggregateItem>,
    },
}

struct MvPlanParts {
    upstream: TableInfo,
    selection: Option<Vec<Expr>>,
    shape: MvShape,
    out_col_names: Vec<String>,
    out_col_types: Vec<riverdb_core::ColumnType>,
}

fn decompose_mv_plan(plan: PhysicalPlan) -> Result<MvPlanParts> {
    let out_col_names = plan.col_names();
    let out_col_types = plan.col_types();
    let (shape, rest) = match plan {
        PhysicalPlan::Sort { .. } | PhysicalPlan::Limit { .. } | PhysicalPlan::TopN { .. } => {
            return Err(PushError::UnsupportedQuery(
                "materialized views cannot use ORDER BY or LIMIT".to_string(),
            ))
        }
        PhysicalPlan::Aggregate {
            group_by_cols,
            items,
            child,
            ..
        } => (
            MvShape::Aggregate {
                group_by_cols,
                items,
            },
            *child,
        ),
        PhysicalPlan::Projection { exprs, child, .. } => {
            (MvShape::Projection { exprs }, *child)
        }
        other => (MvShape::Passthrough, other),
    };
    let (selection, scan) = match rest {
        PhysicalPlan::Selection { predicates, child } => (Some(predicates), *child),
        other => (None, other),
    };
    let upstream = match scan {
        PhysicalPlan::TableScan { table, .. } => table,
        other => {
            return Err(PushError::UnsupportedQuery(format!(
                "materialized view query has an unsupported shape near {other:?}"
            )))
        }
    };
    Ok(MvPlanParts {
        upstream,
        selection,
        shape,
        out_col_names,
        out_col_types,
    })
}

/// Derive the sink [`TableInfo`] (and upstream ids) for a materialized view
/// from its defining query. Used by the DDL coordinator before the engine
/// builds any operators, so every node derives the identical descriptor.
pub fn derive_mv_info(
    meta: &MetaController,
    schema_name: &str,
    name: &str,
    query: &str,
    table_id: u64,
) -> Result<MaterializedViewInfo> {
    let plan = translate_select(meta, schema_name, query)?;
    let parts = decompose_mv_plan(plan)?;

    let primary_key_cols = match &parts.shape {
        MvShape::Aggregate {
            group_by_cols,
            items,
        } => {
            // The grouping columns are the sink's primary key, in GROUP BY
            // order — the same order the forwarder rekeys by, so lookups
            // and shard routing agree with the inbox path.
            let mut pk = Vec::with_capacity(group_by_cols.len());
            for &group_col in group_by_cols {
                let position = items
                    .iter()
                    .position(|item| *item == AggregateItem::GroupColumn(group_col))
                    .ok_or_else(|| {
                        PushError::UnsupportedQuery(format!(
                            "grouping column {} must be selected",
                            parts.upstream.column_names[group_col]
                        ))
                    })?;
                pk.push(position);
            }
            if pk.is_empty() {
                return Err(PushError::UnsupportedQuery(
                    "aggregate views need at least one grouping column".to_string(),
                ));
            }
            pk
        }
        MvShape::Projection { exprs } => {
            // Every upstream pk column must survive projection; the sink
            // key is where they landed.
            let mut pk = Vec::new();
            for &upstream_pk in &parts.upstream.primary_key_cols {
                let position = exprs
                    .iter()
                    .position(|e| *e == Expr::ColumnRef(upstream_pk));
                match position {
                    Some(p) => pk.push(p),
                    None => {
                        return Err(PushError::UnsupportedQuery(format!(
                            "projection must keep primary key column {}",
                            parts.upstream.column_names[upstream_pk]
                        )))
                    }
                }
            }
            pk
        }
        MvShape::Passthrough => parts.upstream.primary_key_cols.clone(),
    };

    let table_info = TableInfo {
        id: table_id,
        schema_name: schema_name.to_string(),
        name: name.to_string(),
        column_names: parts.out_col_names,
        column_types: parts.out_col_types,
        primary_key_cols,
        index_infos: vec![],
    };
    table_info.validate()?;
    Ok(MaterializedViewInfo {
        table_info,
        query: query.to_string(),
        upstream_table_ids: vec![parts.upstream.id],
    })
}
