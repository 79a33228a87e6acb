//! Cluster-wide notifications
//!
//! Notifications are the low-bandwidth control channel: DDL phase fan-out
//! and session lifecycle. Delivery is at-least-once and includes the
//! originating node, so every listener must be idempotent.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Which phase of a DDL command a [`DdlStatementInfo`] drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DdlPhase {
    /// Create in-memory state and sink tables; do not activate consumers.
    Prepare,
    /// Activate consumers and register in the in-memory meta.
    Commit,
}

/// Broadcast for each phase of a DDL statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DdlStatementInfo {
    pub originating_node_id: usize,
    pub schema_name: String,
    pub sql: String,
    /// Table ids pre-allocated by the originating node, so every node
    /// assigns identical ids without consulting the allocator again.
    pub table_sequences: Vec<u64>,
    pub phase: DdlPhase,
}

/// Broadcast when a session closes, so each node drops its shard-local
/// session state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClosedMessage {
    pub session_id: String,
}

/// All notification payloads that cross the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Notification {
    DdlStatement(DdlStatementInfo),
    SessionClosed(SessionClosedMessage),
}

impl Notification {
    pub fn notification_type(&self) -> NotificationType {
        match self {
            Notification::DdlStatement(_) => NotificationType::DdlStatement,
            Notification::SessionClosed(_) => NotificationType::SessionClosed,
        }
    }
}

/// Listener registration key, one per payload kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationType {
    DdlStatement,
    SessionClosed,
}

/// Receives one kind of notification on one node.
///
/// An error return is reported back to the broadcaster as a failed ack; the
/// broadcaster may redeliver.
#[async_trait]
pub trait NotificationListener: Send + Sync {
    async fn handle_notification(&self, notification: Notification) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_type_mapping() {
        let ddl = Notification::DdlStatement(DdlStatementInfo {
            originating_node_id: 0,
            schema_name: "test".to_string(),
            sql: "create source s ...".to_string(),
            table_sequences: vec![100],
            phase: DdlPhase::Prepare,
        });
        assert_eq!(ddl.notification_type(), NotificationType::DdlStatement);

        let closed = Notification::SessionClosed(SessionClosedMessage {
            session_id: "0-1".to_string(),
        });
        assert_eq!(closed.notification_type(), NotificationType::SessionClosed);
    }

    #[test]
    fn test_serde_roundtrip() {
        let n = Notification::DdlStatement(DdlStatementInfo {
            originating_node_id: 2,
            schema_name: "s".to_string(),
            sql: "drop source x".to_string(),
            table_sequences: vec![],
            phase: DdlPhase::Commit,
        });
        let json = serde_json::to_string(&n).unwrap();
        let back: Notification = serde_json::from_str(&json).unwrap();
        assert_eq!(n, back);
    }
}
