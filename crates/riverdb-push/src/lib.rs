//! Push Engine for RiverDB
//!
//! The push engine is the half of the system that runs *towards* storage:
//! bus messages become source-table rows, flow through each materialized
//! view's operator chain, and land in sink tables, all inside per-shard
//! write batches.
//!
//! ## Shape of the machinery
//!
//! - [`engine::PushEngine`] owns one worker task per locally-led shard. The
//!   shard KV pokes the worker (via the shard listener) whenever replicated
//!   writes land; the worker then moves the shard's forward queue and
//!   drains its inbox in a single batch.
//! - Operators live in one engine-wide arena ([`exec::OperatorDag`]) keyed
//!   by integer id, with parent/child edges by id — which is what lets a
//!   materialized view hang off a source's table writer (or another view's)
//!   without cyclic ownership.
//! - Rekeying (group-by) splits an aggregate in two: the upstream half
//!   filters and forwards rows keyed by the grouping columns
//!   ([`aggregate::AggregatePartial`]); the downstream half folds deltas
//!   into the aggregate table on the destination shard
//!   ([`aggregate::AggregateSink`]), exactly once per forwarded row.

pub mod aggregate;
pub mod engine;
mod error;
pub mod exec;
pub mod forwarder;
pub mod message_parser;
pub mod operators;
pub mod source;
pub mod table;

pub use engine::PushEngine;
pub use error::{PushError, Result};
pub use message_parser::{BusMessage, DescriptorRegistry, MessageParser};
pub use source::SourceState;
