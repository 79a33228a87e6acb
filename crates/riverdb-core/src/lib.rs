//! Core Data Types and Codecs for RiverDB
//!
//! This crate is the leaf of the workspace: the column/value model shared by
//! every other crate, plus the two binary codecs the storage layer is built
//! on.
//!
//! ## The two codecs
//!
//! - **Key codec** ([`key_codec`]): order-preserving. The byte-wise
//!   (lexicographic) order of two encoded keys equals the logical order of
//!   the values they encode, including `NULL` (which sorts before
//!   everything). This is what lets an ordered KV store answer range scans
//!   over typed primary keys.
//! - **Row codec** ([`row_codec`]): compact, *not* order-preserving. Rows
//!   are stored as a null bitmap followed by per-column payloads and are
//!   only ever decoded with the table's column types at hand.
//!
//! Keys always start with `be(shard_id) ‖ be(table_id)` so that all data for
//! one shard, then one table, is contiguous in the keyspace.
//!
//! ## Shard hashing
//!
//! [`sharder::Sharder`] maps an encoded key to its owning shard. The hash is
//! xxh64 and must produce identical results on every node — changing it (or
//! the shard count) is a cluster-breaking change.

mod buffer;
mod error;
pub mod key_codec;
pub mod row_codec;
pub mod sharder;
mod table;
mod types;

pub use buffer::{
    append_u32_be, append_u32_le, append_u64_be, append_u64_le, read_f32_be, read_f64_be,
    read_u16_be, read_u32_be, read_u32_le, read_u64_be, read_u64_le, IS_LITTLE_ENDIAN,
};
pub use error::{CoreError, Result};
pub use key_codec::{encode_key_cols, encode_key_values, encode_table_key_prefix};
pub use row_codec::{decode_row, decode_row_into, encode_row};
pub use sharder::{ShardType, Sharder};
pub use table::{IndexInfo, MaterializedViewInfo, SourceInfo, TableInfo, TopicInfo};
pub use types::{BusEncoding, ColumnType, Row, Value};

/// First shard id used for data shards. Ids below this are reserved for
/// internal raft groups in production deployments.
pub const DATA_SHARD_ID_BASE: u64 = 1000;

/// Table ids below this are reserved for system tables.
pub const USER_TABLE_ID_BASE: u64 = 100;

/// System table: the durable `tables` catalog.
pub const TABLES_TABLE_ID: u64 = 0;

/// System table: outbound forward queue, written on the sending shard.
pub const FORWARD_QUEUE_TABLE_ID: u64 = 1;

/// System table: inbound forwarded-row inbox, written on the receiving shard.
pub const RECEIVER_TABLE_ID: u64 = 2;

/// System table: highest applied inbox sequence per (sender shard, entity).
pub const RECEIVER_SEQUENCE_TABLE_ID: u64 = 3;
