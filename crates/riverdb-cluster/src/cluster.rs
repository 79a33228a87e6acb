//! The cluster contract

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use riverdb_core::Row;

use crate::error::Result;
use crate::notification::{Notification, NotificationListener, NotificationType};
use crate::write_batch::WriteBatch;

/// One key/value pair returned by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvPair {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Everything a pull query needs to execute its remote fragment on one
/// shard of another node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryExecutionInfo {
    pub session_id: String,
    pub schema_name: String,
    pub sql: String,
    pub shard_id: u64,
}

/// Per-shard callback registered by the push engine. `remote_write_occurred`
/// is a hint that replicated writes landed on the shard — no payload, may
/// coalesce, may fire spuriously. The listener reads pending state back via
/// `local_scan`.
pub trait ShardListener: Send + Sync {
    fn remote_write_occurred(&self);
}

/// Yields one listener per shard this node leads. Bound before `start`.
pub trait ShardListenerFactory: Send + Sync {
    fn create_shard_listener(&self, shard_id: u64) -> Arc<dyn ShardListener>;
}

/// Executes the remote fragment of a pull query on the receiving node.
#[async_trait]
pub trait RemoteQueryExecutor: Send + Sync {
    async fn execute_remote_pull_query(&self, query_info: QueryExecutionInfo) -> Result<Vec<Row>>;
}

/// The replicated ordered-KV and membership contract the engines run on.
///
/// Writes to one shard are totally ordered and a [`WriteBatch`] is
/// all-or-nothing. `local_*` reads serve from this node's replica.
#[async_trait]
pub trait Cluster: Send + Sync {
    fn node_id(&self) -> usize;

    fn get_all_node_ids(&self) -> Vec<usize>;

    fn get_all_shard_ids(&self) -> Vec<u64>;

    /// Shards whose listener fires on this node (the shards this node
    /// leads).
    fn get_local_shard_ids(&self) -> Vec<u64>;

    /// Cluster-wide monotone table id allocator. Never cached: every call
    /// goes to the consensus-backed counter.
    async fn generate_table_id(&self) -> Result<u64>;

    /// Atomically apply `batch` to its shard. After durable commit, if the
    /// batch requested it, the shard's listener is poked asynchronously.
    async fn write_batch(&self, batch: WriteBatch) -> Result<()>;

    /// Point read from the local replica; `None` if absent.
    async fn local_get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Ascending scan of `start_prefix ≤ key < end_prefix` (end unbounded
    /// when `None`) over a consistent snapshot. `limit == -1` means
    /// unbounded.
    async fn local_scan(
        &self,
        start_prefix: &[u8],
        end_prefix: Option<&[u8]>,
        limit: i64,
    ) -> Result<Vec<KvPair>>;

    /// For every locally hosted shard, delete all keys in
    /// `be(shard) ‖ start_suffix ≤ key < be(shard) ‖ end_suffix`.
    async fn delete_all_data_in_range(&self, start_suffix: &[u8], end_suffix: &[u8])
        -> Result<()>;

    /// Deliver `notification` to every node, the local one included,
    /// at least once. Returns once every node has acknowledged.
    async fn broadcast_notification(&self, notification: Notification) -> Result<()>;

    fn register_shard_listener_factory(&self, factory: Arc<dyn ShardListenerFactory>);

    fn register_notification_listener(
        &self,
        notification_type: NotificationType,
        listener: Arc<dyn NotificationListener>,
    );

    fn set_remote_query_executor(&self, executor: Arc<dyn RemoteQueryExecutor>);

    /// Run a pull-query fragment on the node leading `query_info.shard_id`.
    async fn execute_remote_pull_query(&self, query_info: QueryExecutionInfo) -> Result<Vec<Row>>;

    /// Idempotent. Listener factories must be registered beforehand.
    async fn start(&self) -> Result<()>;

    /// Idempotent. Drains in-flight notifications before returning.
    async fn stop(&self) -> Result<()>;
}
