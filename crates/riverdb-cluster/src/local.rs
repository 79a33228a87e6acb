//! In-process cluster implementation
//!
//! [`ClusterBus`] is the shared state of an in-process cluster: the ordered
//! store, per-shard write serialization, the table-id allocator, and the
//! registration table of every node. [`LocalCluster`] is one node's handle
//! onto a bus.
//!
//! Replication model: every node serves reads of every shard (the bus store
//! plays the role of each node's replica, kept trivially in sync because
//! writes apply synchronously under the shard's write lock), while each
//! shard has exactly one leader, assigned round-robin, where the remote
//! write listener fires and push work runs. Production swaps this for a
//! Raft-backed implementation behind the same trait.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use riverdb_core::{append_u64_be, Row, DATA_SHARD_ID_BASE, USER_TABLE_ID_BASE};

use crate::cluster::{
    Cluster, KvPair, QueryExecutionInfo, RemoteQueryExecutor, ShardListener, ShardListenerFactory,
};
use crate::error::{ClusterError, Result};
use crate::notification::{Notification, NotificationListener, NotificationType};
use crate::write_batch::WriteBatch;

/// What one started node has registered on the bus.
#[derive(Default)]
struct NodeRegistration {
    shard_listeners: HashMap<u64, Arc<dyn ShardListener>>,
    notification_listeners: HashMap<NotificationType, Arc<dyn NotificationListener>>,
    remote_query_executor: Option<Arc<dyn RemoteQueryExecutor>>,
}

/// Shared state of an in-process cluster.
pub struct ClusterBus {
    num_nodes: usize,
    num_shards: usize,
    table_id_seq: AtomicU64,
    store: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    shard_write_locks: HashMap<u64, tokio::sync::Mutex<()>>,
    nodes: RwLock<HashMap<usize, NodeRegistration>>,
    /// Shard-listener pokes still running; `stop` waits for this to drain.
    in_flight_notifies: AtomicUsize,
}

impl ClusterBus {
    pub fn new(num_nodes: usize, num_shards: usize) -> Arc<Self> {
        assert!(num_nodes > 0 && num_shards > 0);
        let shard_write_locks = Self::all_shard_ids(num_shards)
            .into_iter()
            .map(|shard| (shard, tokio::sync::Mutex::new(())))
            .collect();
        Arc::new(Self {
            num_nodes,
            num_shards,
            // First ids are reserved for system tables.
            table_id_seq: AtomicU64::new(USER_TABLE_ID_BASE),
            store: RwLock::new(BTreeMap::new()),
            shard_write_locks,
            nodes: RwLock::new(HashMap::new()),
            in_flight_notifies: AtomicUsize::new(0),
        })
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn num_shards(&self) -> usize {
        self.num_shards
    }

    fn all_shard_ids(num_shards: usize) -> Vec<u64> {
        (0..num_shards as u64)
            .map(|i| i + DATA_SHARD_ID_BASE)
            .collect()
    }

    /// Round-robin leader assignment, fixed for the cluster's lifetime.
    fn leader_of(&self, shard_id: u64) -> usize {
        ((shard_id - DATA_SHARD_ID_BASE) % self.num_nodes as u64) as usize
    }

    fn notification_listener(
        &self,
        node_id: usize,
        notification_type: NotificationType,
    ) -> Option<Arc<dyn NotificationListener>> {
        let nodes = self.nodes.read().unwrap_or_else(|e| e.into_inner());
        nodes
            .get(&node_id)?
            .notification_listeners
            .get(&notification_type)
            .cloned()
    }

    /// Poke the listener of `shard_id` on its leader, off the caller's
    /// stack, mirroring the asynchronous post-commit callback of a
    /// replicated log.
    fn notify_shard(self: &Arc<Self>, shard_id: u64) {
        let leader = self.leader_of(shard_id);
        let listener = {
            let nodes = self.nodes.read().unwrap_or_else(|e| e.into_inner());
            nodes
                .get(&leader)
                .and_then(|reg| reg.shard_listeners.get(&shard_id).cloned())
        };
        let Some(listener) = listener else {
            // Leader not started (yet); the listener re-reads pending state
            // on its next wake, so dropping the hint is safe.
            debug!(shard_id, leader, "no shard listener registered, dropping write hint");
            return;
        };
        self.in_flight_notifies.fetch_add(1, Ordering::SeqCst);
        let bus = Arc::clone(self);
        tokio::spawn(async move {
            listener.remote_write_occurred();
            bus.in_flight_notifies.fetch_sub(1, Ordering::SeqCst);
        });
    }

    async fn drain_notifies(&self) {
        let mut waited = 0u64;
        while self.in_flight_notifies.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            waited += 5;
            if waited > 5_000 {
                warn!("timed out draining in-flight shard notifications");
                return;
            }
        }
    }
}

/// One node's handle onto a [`ClusterBus`].
pub struct LocalCluster {
    node_id: usize,
    bus: Arc<ClusterBus>,
    started: AtomicBool,
    shard_listener_factory: Mutex<Option<Arc<dyn ShardListenerFactory>>>,
    notification_listeners: Mutex<HashMap<NotificationType, Arc<dyn NotificationListener>>>,
    remote_query_executor: Mutex<Option<Arc<dyn RemoteQueryExecutor>>>,
}

impl LocalCluster {
    pub fn new(node_id: usize, bus: Arc<ClusterBus>) -> Arc<Self> {
        assert!(node_id < bus.num_nodes(), "node id {node_id} out of range");
        Arc::new(Self {
            node_id,
            bus,
            started: AtomicBool::new(false),
            shard_listener_factory: Mutex::new(None),
            notification_listeners: Mutex::new(HashMap::new()),
            remote_query_executor: Mutex::new(None),
        })
    }

    fn check_shard(&self, shard_id: u64) -> Result<()> {
        let max = DATA_SHARD_ID_BASE + self.bus.num_shards() as u64;
        if shard_id < DATA_SHARD_ID_BASE || shard_id >= max {
            return Err(ClusterError::Internal(format!(
                "shard {shard_id} outside [{DATA_SHARD_ID_BASE}, {max})"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Cluster for LocalCluster {
    fn node_id(&self) -> usize {
        self.node_id
    }

    fn get_all_node_ids(&self) -> Vec<usize> {
        (0..self.bus.num_nodes()).collect()
    }

    fn get_all_shard_ids(&self) -> Vec<u64> {
        ClusterBus::all_shard_ids(self.bus.num_shards())
    }

    fn get_local_shard_ids(&self) -> Vec<u64> {
        self.get_all_shard_ids()
            .into_iter()
            .filter(|&shard| self.bus.leader_of(shard) == self.node_id)
            .collect()
    }

    async fn generate_table_id(&self) -> Result<u64> {
        Ok(self.bus.table_id_seq.fetch_add(1, Ordering::SeqCst))
    }

    async fn write_batch(&self, batch: WriteBatch) -> Result<()> {
        let shard_id = batch.shard_id();
        self.check_shard(shard_id)?;
        let notify = batch.notify_remote();
        debug!(
            shard_id,
            puts = batch.put_count(),
            deletes = batch.delete_count(),
            "writing batch"
        );
        let lock = self
            .bus
            .shard_write_locks
            .get(&shard_id)
            .ok_or_else(|| ClusterError::Internal(format!("no write lock for shard {shard_id}")))?;
        let _serialize = lock.lock().await;
        {
            let mut store = self.bus.store.write().unwrap_or_else(|e| e.into_inner());
            let (puts, deletes) = batch.into_parts();
            for (key, value) in puts {
                store.insert(key, value);
            }
            for key in deletes {
                store.remove(&key);
            }
        }
        if notify {
            self.bus.notify_shard(shard_id);
        }
        Ok(())
    }

    async fn local_get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let store = self.bus.store.read().unwrap_or_else(|e| e.into_inner());
        Ok(store.get(key).cloned())
    }

    async fn local_scan(
        &self,
        start_prefix: &[u8],
        end_prefix: Option<&[u8]>,
        limit: i64,
    ) -> Result<Vec<KvPair>> {
        if limit < -1 {
            return Err(ClusterError::Internal(format!("invalid scan limit {limit}")));
        }
        let store = self.bus.store.read().unwrap_or_else(|e| e.into_inner());
        let mut result = Vec::new();
        for (key, value) in store.range(start_prefix.to_vec()..) {
            if let Some(end) = end_prefix {
                if key.as_slice() >= end {
                    break;
                }
            }
            result.push(KvPair {
                key: key.clone(),
                value: value.clone(),
            });
            if limit != -1 && result.len() as i64 >= limit {
                break;
            }
        }
        Ok(result)
    }

    async fn delete_all_data_in_range(
        &self,
        start_suffix: &[u8],
        end_suffix: &[u8],
    ) -> Result<()> {
        for shard_id in self.get_all_shard_ids() {
            let mut start = Vec::with_capacity(8 + start_suffix.len());
            append_u64_be(&mut start, shard_id);
            start.extend_from_slice(start_suffix);

            let mut end = Vec::with_capacity(8 + end_suffix.len());
            append_u64_be(&mut end, shard_id);
            end.extend_from_slice(end_suffix);

            let pairs = self.local_scan(&start, Some(&end), -1).await?;
            if pairs.is_empty() {
                continue;
            }
            let lock = self.bus.shard_write_locks.get(&shard_id).ok_or_else(|| {
                ClusterError::Internal(format!("no write lock for shard {shard_id}"))
            })?;
            let _serialize = lock.lock().await;
            let mut store = self.bus.store.write().unwrap_or_else(|e| e.into_inner());
            for pair in pairs {
                store.remove(&pair.key);
            }
        }
        Ok(())
    }

    async fn broadcast_notification(&self, notification: Notification) -> Result<()> {
        let notification_type = notification.notification_type();
        for node_id in self.get_all_node_ids() {
            let listener = self
                .bus
                .notification_listener(node_id, notification_type)
                .ok_or_else(|| {
                    ClusterError::NotificationFailed(format!(
                        "node {node_id} has no listener for {notification_type:?}"
                    ))
                })?;
            listener
                .handle_notification(notification.clone())
                .await
                .map_err(|e| {
                    ClusterError::NotificationFailed(format!(
                        "node {node_id} failed to handle {notification_type:?}: {e}"
                    ))
                })?;
        }
        Ok(())
    }

    fn register_shard_listener_factory(&self, factory: Arc<dyn ShardListenerFactory>) {
        *self
            .shard_listener_factory
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(factory);
    }

    fn register_notification_listener(
        &self,
        notification_type: NotificationType,
        listener: Arc<dyn NotificationListener>,
    ) {
        let mut listeners = self
            .notification_listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        listeners.insert(notification_type, listener);
    }

    fn set_remote_query_executor(&self, executor: Arc<dyn RemoteQueryExecutor>) {
        *self
            .remote_query_executor
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(executor);
    }

    async fn execute_remote_pull_query(&self, query_info: QueryExecutionInfo) -> Result<Vec<Row>> {
        self.check_shard(query_info.shard_id)?;
        let leader = self.bus.leader_of(query_info.shard_id);
        let executor = {
            let nodes = self.bus.nodes.read().unwrap_or_else(|e| e.into_inner());
            nodes
                .get(&leader)
                .and_then(|reg| reg.remote_query_executor.clone())
        }
        .ok_or_else(|| {
            ClusterError::Unavailable(format!("node {leader} has no remote query executor"))
        })?;
        executor.execute_remote_pull_query(query_info).await
    }

    async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let factory = self
            .shard_listener_factory
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| {
                ClusterError::Internal(
                    "shard listener factory must be registered before start".to_string(),
                )
            })?;

        let mut registration = NodeRegistration {
            notification_listeners: self
                .notification_listeners
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
            remote_query_executor: self
                .remote_query_executor
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
            ..Default::default()
        };
        for shard_id in self.get_local_shard_ids() {
            registration
                .shard_listeners
                .insert(shard_id, factory.create_shard_listener(shard_id));
        }
        let mut nodes = self.bus.nodes.write().unwrap_or_else(|e| e.into_inner());
        nodes.insert(self.node_id, registration);
        debug!(node_id = self.node_id, "local cluster node started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if !self.started.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.bus.drain_notifies().await;
        {
            let mut nodes = self.bus.nodes.write().unwrap_or_else(|e| e.into_inner());
            nodes.remove(&self.node_id);
        }
        // Reset ephemeral registrations; persisted data stays on the bus so
        // a restarted node handle can reconcile against it.
        *self
            .shard_listener_factory
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = None;
        self.notification_listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        *self
            .remote_query_executor
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = None;
        debug!(node_id = self.node_id, "local cluster node stopped");
        Ok(())
    }
}
