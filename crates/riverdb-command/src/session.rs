//! Per-connection sessions
//!
//! A session is single-consumer: the executor takes its lock for the
//! duration of each statement and rejects overlapping use with
//! `SessionInUse` rather than queueing, so a misbehaving client cannot
//! interleave statements.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use crate::error::{CommandError, Result};

pub struct Session {
    id: String,
    schema_name: String,
    lock: tokio::sync::Mutex<()>,
    prepared_statements: Mutex<HashMap<i64, String>>,
    ps_sequence: AtomicI64,
}

impl Session {
    pub fn new(id: String, schema_name: String) -> Session {
        Session {
            id,
            schema_name,
            lock: tokio::sync::Mutex::new(()),
            prepared_statements: Mutex::new(HashMap::new()),
            ps_sequence: AtomicI64::new(0),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn schema_name(&self) -> &str {
        &self.schema_name
    }

    /// Claim exclusive use for one statement.
    pub fn enter(&self) -> Result<tokio::sync::MutexGuard<'_, ()>> {
        self.lock.try_lock().map_err(|_| CommandError::SessionInUse)
    }

    /// Store a prepared statement, returning its id.
    pub fn add_prepared_statement(&self, sql: String) -> i64 {
        let id = self.ps_sequence.fetch_add(1, Ordering::SeqCst);
        self.prepared_statements
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, sql);
        id
    }

    pub fn prepared_statement(&self, ps_id: i64) -> Result<String> {
        self.prepared_statements
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&ps_id)
            .cloned()
            .ok_or(CommandError::UnknownPreparedStatement(ps_id))
    }

    pub fn clear_prepared_statements(&self) {
        self.prepared_statements
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}
