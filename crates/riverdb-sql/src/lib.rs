//! SQL Surface for RiverDB
//!
//! Three pieces live here:
//!
//! - [`parser`]: the statement-level grammar. `SELECT` bodies go through
//!   `sqlparser`; the `CREATE SOURCE` / `CREATE MATERIALIZED VIEW` / `DROP`
//!   / `PREPARE` / `EXECUTE` surface is a hand-rolled option grammar (those
//!   statements are not standard SQL).
//! - [`plan`] and [`expr`]: the typed physical plan tree and scalar
//!   expressions both engines consume. The tree is a tagged sum so the
//!   executor builders can walk it with a plain `match`.
//! - [`translate`]: a deliberately straight-line SELECT-to-plan translator
//!   (scan → selection → aggregate → projection → sort/limit). It stands in
//!   for a full planner without pretending to be one: no join ordering, no
//!   cost model, just the shapes the engines support.

mod ast;
mod error;
pub mod expr;
pub mod parser;
pub mod plan;
pub mod translate;

pub use ast::{ColumnDef, CreateMaterializedView, CreateSource, Statement};
pub use error::{Result, SqlError};
pub use expr::{BinaryOp, Expr};
pub use parser::parse_statement;
pub use plan::{AggFunction, AggregateItem, PhysicalPlan, ScanRange};
pub use translate::translate_select;
