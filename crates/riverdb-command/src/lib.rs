//! Statement Execution and DDL Coordination for RiverDB
//!
//! [`Executor`] is the front door: it owns sessions, classifies statements,
//! hands SELECTs to the pull engine, and drives DDL through the multi-phase
//! coordinator.
//!
//! ## The DDL protocol
//!
//! Every DDL statement is a [`ddl::DdlCommand`] with four idempotent
//! phases. The originating node runs `before_prepare` (persist the catalog
//! row in `Add` state, reject collisions), then broadcasts prepare and
//! commit over the notification bus — every node, originator included, runs
//! `on_prepare` (build state, don't activate) and `on_commit` (activate,
//! register) — and finally runs `after_commit` (flip the catalog row to
//! `Committed`). A per-schema lock serializes DDL within a schema; a crash
//! between phases leaves a non-`Committed` catalog row that restart
//! reconciliation resolves.

pub mod commands;
pub mod ddl;
mod error;
pub mod executor;
pub mod node;
pub mod session;

pub use ddl::{DdlCommand, DdlCommandType, DdlCoordinator};
pub use error::{CommandError, Result};
pub use executor::{Executor, StatementResult};
pub use node::Node;
pub use session::Session;
