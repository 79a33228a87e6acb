//! Schema Registry and Catalog for RiverDB
//!
//! [`MetaController`] is the authoritative in-memory registry of schemas,
//! sources, and materialized views. It is read-mostly: lookups happen on
//! every query and every ingested batch; mutations happen only under the
//! DDL coordinator.
//!
//! Durability comes from the `tables` system catalog ([`catalog`]): one row
//! per entity, keyed by table id on the system shard, carrying a
//! [`PrepareState`] so that a node restart can tell a committed entity from
//! one caught mid-DDL and re-drive the right phase.

mod catalog;
mod controller;
mod error;

pub use catalog::{
    delete_catalog_row, load_catalog, persist_catalog_row, CatalogEntity, CatalogRow,
    PrepareState, SYSTEM_SHARD_ID,
};
pub use controller::{MetaController, TableRef};
pub use error::{MetaError, Result};
