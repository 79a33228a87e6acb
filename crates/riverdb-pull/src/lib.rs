//! Pull Engine for RiverDB
//!
//! Answers ad-hoc queries against the tables the push engine maintains.
//! A query plans once on the receiving node, then executes in two layers:
//!
//! - a **remote fragment** (scan → selection → projection, plus per-shard
//!   sort/limit where safe) runs on the node leading each shard;
//! - the **local merge** re-applies ordering and limits over the merged
//!   shard results.
//!
//! A single-point primary-key lookup skips the fan-out entirely: the key
//! routes through the sharder to exactly one shard ([`engine::PullEngine`]
//! point-get routing, decimal keys excluded).

pub mod engine;
mod error;
pub mod exec;

pub use engine::{PullEngine, PullQuery};
pub use error::{PullError, Result};
pub use exec::PullExecutor;
