//! Push operator contract and the operator arena
//!
//! Operators form a DAG: a source's table writer fans out to the chains of
//! every materialized view consuming it, and a view's own table writer fans
//! out to views consuming *it*. Nodes live in one arena keyed by integer
//! [`OpId`]; edges are ids in both directions, so there is no cyclic
//! ownership and the graph can be rewired by DDL while the engine runs.

use std::collections::HashMap;

use async_trait::async_trait;

use riverdb_cluster::{Cluster, WriteBatch};
use riverdb_core::{ColumnType, Row};

use crate::error::{PushError, Result};
use crate::forwarder::ShardForwarder;

/// Arena index of an operator node.
pub type OpId = usize;

/// Everything an operator may touch while handling rows: the open batch for
/// the shard being processed, the forwarder for rekeyed emission, and the
/// cluster for reads.
pub struct ExecContext<'a> {
    pub batch: &'a mut WriteBatch,
    pub forwarder: &'a ShardForwarder,
    pub cluster: &'a dyn Cluster,
    /// Set when an operator queued rows for another shard; the engine then
    /// commits the batch with the remote-write hint so the queue mover runs.
    pub forwarded: bool,
}

impl<'a> ExecContext<'a> {
    pub fn new(
        batch: &'a mut WriteBatch,
        forwarder: &'a ShardForwarder,
        cluster: &'a dyn Cluster,
    ) -> Self {
        Self {
            batch,
            forwarder,
            cluster,
            forwarded: false,
        }
    }
}

/// A push operator: consumes a batch of rows, optionally emits rows for its
/// children. `None` means the rows left this shard (forwarded) or were
/// absorbed.
#[async_trait]
pub trait PushOperator: Send + Sync {
    async fn handle_rows(
        &self,
        rows: Vec<Row>,
        ctx: &mut ExecContext<'_>,
    ) -> Result<Option<Vec<Row>>>;

    fn col_names(&self) -> &[String];
    fn col_types(&self) -> &[ColumnType];
    /// Offsets of the output's key columns.
    fn key_cols(&self) -> &[usize];
}

struct OperatorNode {
    operator: std::sync::Arc<dyn PushOperator>,
    parent: Option<OpId>,
    children: Vec<OpId>,
}

/// Arena of operator nodes with id-based edges.
#[derive(Default)]
pub struct OperatorDag {
    nodes: HashMap<OpId, OperatorNode>,
    next_id: OpId,
}

impl OperatorDag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, operator: std::sync::Arc<dyn PushOperator>) -> OpId {
        let id = self.next_id;
        self.next_id += 1;
        self.nodes.insert(
            id,
            OperatorNode {
                operator,
                parent: None,
                children: Vec::new(),
            },
        );
        id
    }

    /// Wire `child` under `parent` (both directions).
    pub fn connect(&mut self, parent: OpId, child: OpId) -> Result<()> {
        self.node_mut(parent)?.children.push(child);
        self.node_mut(child)?.parent = Some(parent);
        Ok(())
    }

    /// Detach `child` from its parent, leaving the child's subtree intact.
    pub fn disconnect(&mut self, child: OpId) -> Result<()> {
        let parent = self.node_mut(child)?.parent.take();
        if let Some(parent) = parent {
            self.node_mut(parent)?.children.retain(|&c| c != child);
        }
        Ok(())
    }

    /// Remove `root` and every node reachable below it.
    pub fn remove_subtree(&mut self, root: OpId) -> Result<()> {
        self.disconnect(root)?;
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if let Some(node) = self.nodes.remove(&id) {
                stack.extend(node.children);
            }
        }
        Ok(())
    }

    pub fn operator(&self, id: OpId) -> Result<&std::sync::Arc<dyn PushOperator>> {
        Ok(&self.node(id)?.operator)
    }

    pub fn children(&self, id: OpId) -> Result<&[OpId]> {
        Ok(&self.node(id)?.children)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn node(&self, id: OpId) -> Result<&OperatorNode> {
        self.nodes
            .get(&id)
            .ok_or_else(|| PushError::Internal(format!("operator {id} not in dag")))
    }

    fn node_mut(&mut self, id: OpId) -> Result<&mut OperatorNode> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| PushError::Internal(format!("operator {id} not in dag")))
    }

    /// Run `rows` through the subtree rooted at `root`: each operator's
    /// output is handed to each of its children, depth-first.
    pub async fn execute_from(
        &self,
        root: OpId,
        rows: Vec<Row>,
        ctx: &mut ExecContext<'_>,
    ) -> Result<()> {
        let mut stack = vec![(root, rows)];
        while let Some((id, rows)) = stack.pop() {
            if rows.is_empty() {
                continue;
            }
            let node = self.node(id)?;
            if let Some(output) = node.operator.handle_rows(rows, ctx).await? {
                for &child in node.children.iter().rev() {
                    stack.push((child, output.clone()));
                }
            }
        }
        Ok(())
    }
}
