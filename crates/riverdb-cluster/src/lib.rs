//! Sharded Storage and Cluster Membership for RiverDB
//!
//! The [`Cluster`] trait is the boundary between the engines and whatever
//! provides replicated, linearizable per-shard storage. Production
//! deployments put a Raft group behind every shard; this crate ships
//! [`LocalCluster`], an in-process implementation over a shared
//! [`ClusterBus`] that gives the same contract to tests and single-process
//! deployments (including multi-node-in-one-process clusters).
//!
//! ## The contract, in one paragraph
//!
//! Keys are ordered bytes prefixed with `be(shard_id)`. A [`WriteBatch`]
//! applies atomically to exactly one shard; writes to one shard are totally
//! ordered. If a batch asks for remote notification, the shard's registered
//! [`ShardListener`] is poked (`remote_write_occurred`) after commit — a
//! hint with no payload, possibly coalesced, possibly spurious; the listener
//! re-reads pending state via `local_scan`. Notifications broadcast to every
//! node (the local one included) at least once and must be handled
//! idempotently.

mod cluster;
mod error;
mod local;
mod notification;
mod write_batch;

pub use cluster::{
    Cluster, KvPair, QueryExecutionInfo, RemoteQueryExecutor, ShardListener, ShardListenerFactory,
};
pub use error::{ClusterError, Result};
pub use local::{ClusterBus, LocalCluster};
pub use notification::{
    DdlPhase, DdlStatementInfo, Notification, NotificationListener, NotificationType,
    SessionClosedMessage,
};
pub use write_batch::WriteBatch;
