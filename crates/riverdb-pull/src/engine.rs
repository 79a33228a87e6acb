//! Pull query building and remote fragments
//!
//! The node receiving a query builds: `local post-ops → RemoteExecutor`.
//! The remote fragment re-plans the same SQL on the executing node, pinned
//! to one shard, with offsets folded into counts (an offset may only be
//! applied after the merge — dropping rows per shard would drop the wrong
//! ones).

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tracing::debug;

use riverdb_cluster::{
    Cluster, ClusterError, QueryExecutionInfo, RemoteQueryExecutor,
};
use riverdb_core::{encode_key_values, ColumnType, Row, ShardType, Sharder};
use riverdb_meta::MetaController;
use riverdb_sql::{translate_select, Expr, PhysicalPlan, ScanRange};

use crate::error::{PullError, Result};
use crate::exec::{
    collect_all, IndexScan, PullExecutor, PullLimit, PullProjection, PullSelect, PullSort,
    RemoteExecutor, TableScan,
};

/// A built query: the executor DAG plus its output schema.
pub struct PullQuery {
    executor: Box<dyn PullExecutor>,
    col_names: Vec<String>,
    col_types: Vec<ColumnType>,
}

impl PullQuery {
    pub fn col_names(&self) -> &[String] {
        &self.col_names
    }

    pub fn col_types(&self) -> &[ColumnType] {
        &self.col_types
    }

    pub async fn get_rows(&mut self, max_rows: usize) -> Result<(Vec<Row>, bool)> {
        self.executor.get_rows(max_rows).await
    }

    pub async fn collect(&mut self) -> Result<Vec<Row>> {
        collect_all(self.executor.as_mut()).await
    }
}

/// Ordering/limiting applied at the merge point.
enum PostOp {
    Sort {
        sort_exprs: Vec<Expr>,
        descending: Vec<bool>,
    },
    Limit {
        count: u64,
        offset: u64,
    },
    TopN {
        count: u64,
        offset: u64,
        sort_exprs: Vec<Expr>,
        descending: Vec<bool>,
    },
}

pub struct PullEngine {
    cluster: Arc<dyn Cluster>,
    meta: Arc<MetaController>,
    sharder: Sharder,
}

impl PullEngine {
    pub fn new(
        cluster: Arc<dyn Cluster>,
        meta: Arc<MetaController>,
        sharder: Sharder,
    ) -> Arc<PullEngine> {
        Arc::new(PullEngine {
            cluster,
            meta,
            sharder,
        })
    }

    /// The executor to register with the cluster so this node can serve
    /// other nodes' remote fragments.
    pub fn remote_query_executor(self: &Arc<Self>) -> Arc<dyn RemoteQueryExecutor> {
        Arc::new(PullRemoteQueryExecutor {
            engine: Arc::downgrade(self),
        })
    }

    /// Build the local (merging) side of a query.
    pub fn build_pull_query(
        &self,
        session_id: &str,
        schema_name: &str,
        sql: &str,
    ) -> Result<PullQuery> {
        let plan = translate_select(&self.meta, schema_name, sql)?;
        let col_names = plan.col_names();
        let col_types = plan.col_types();

        let (post_ops, fragment) = split_post_ops(plan);
        let point_get_shard = self.point_get_shard(&fragment)?;
        if let Some(shard_id) = point_get_shard {
            debug!(shard_id, "point get routed to a single shard");
        }

        let query_info = QueryExecutionInfo {
            session_id: session_id.to_string(),
            schema_name: schema_name.to_string(),
            sql: sql.to_string(),
            shard_id: 0,
        };
        let mut executor: Box<dyn PullExecutor> = Box::new(RemoteExecutor::new(
            query_info,
            point_get_shard,
            Arc::clone(&self.cluster),
        ));
        // Innermost post-op first.
        for post in post_ops.into_iter().rev() {
            executor = match post {
                PostOp::Sort {
                    sort_exprs,
                    descending,
                } => Box::new(PullSort::new(sort_exprs, descending, executor)),
                PostOp::Limit { count, offset } => {
                    Box::new(PullLimit::new(count, offset, executor))
                }
                PostOp::TopN {
                    count,
                    offset,
                    sort_exprs,
                    descending,
                } => Box::new(PullLimit::new(
                    count,
                    offset,
                    Box::new(PullSort::new(sort_exprs, descending, executor)),
                )),
            };
        }
        Ok(PullQuery {
            executor,
            col_names,
            col_types,
        })
    }

    /// Execute a remote fragment: re-plan the SQL, build the executor DAG
    /// pinned to `query_info.shard_id`, drain it.
    pub async fn execute_remote_fragment(
        &self,
        query_info: QueryExecutionInfo,
    ) -> Result<Vec<Row>> {
        let plan = translate_select(&self.meta, &query_info.schema_name, &query_info.sql)?;
        let mut executor = self.build_remote_dag(plan, query_info.shard_id)?;
        collect_all(executor.as_mut()).await
    }

    fn build_remote_dag(
        &self,
        plan: PhysicalPlan,
        shard_id: u64,
    ) -> Result<Box<dyn PullExecutor>> {
        Ok(match plan {
            PhysicalPlan::TableScan { table, ranges } => Box::new(TableScan::new(
                table,
                ranges,
                shard_id,
                Arc::clone(&self.cluster),
            )),
            PhysicalPlan::IndexScan {
                table,
                index,
                ranges,
            } => Box::new(IndexScan::new(
                table,
                index,
                ranges,
                shard_id,
                Arc::clone(&self.cluster),
            )),
            PhysicalPlan::Selection { predicates, child } => Box::new(PullSelect::new(
                predicates,
                self.build_remote_dag(*child, shard_id)?,
            )),
            PhysicalPlan::Projection { exprs, child, .. } => Box::new(PullProjection::new(
                exprs,
                self.build_remote_dag(*child, shard_id)?,
            )),
            PhysicalPlan::Sort {
                sort_exprs,
                descending,
                child,
            } => Box::new(PullSort::new(
                sort_exprs,
                descending,
                self.build_remote_dag(*child, shard_id)?,
            )),
            // Offsets are merge-time concerns; remotely we only bound the
            // row count.
            PhysicalPlan::Limit {
                count,
                offset,
                child,
            } => Box::new(PullLimit::new(
                count + offset,
                0,
                self.build_remote_dag(*child, shard_id)?,
            )),
            PhysicalPlan::TopN {
                count,
                offset,
                sort_exprs,
                descending,
                child,
            } => Box::new(PullLimit::new(
                count + offset,
                0,
                Box::new(PullSort::new(
                    sort_exprs,
                    descending,
                    self.build_remote_dag(*child, shard_id)?,
                )),
            )),
            PhysicalPlan::Aggregate { .. } => {
                return Err(PullError::Unsupported(
                    "pull queries do not aggregate; query the materialized view".to_string(),
                ))
            }
        })
    }

    /// Resolve a single-point single-column primary-key range to its owning
    /// shard. Decimal keys fall back to fan-out until their encoding is
    /// settled cross-platform.
    fn point_get_shard(&self, fragment: &PhysicalPlan) -> Result<Option<u64>> {
        let Some(table) = fragment.scanned_table() else {
            return Ok(None);
        };
        let range = match scan_ranges_of(fragment) {
            Some([range]) => range,
            _ => return Ok(None),
        };
        if !range.is_point() || range.low.len() != 1 {
            return Ok(None);
        }
        let [pk_col] = table.primary_key_cols.as_slice() else {
            return Ok(None);
        };
        if matches!(
            table.column_types[*pk_col],
            riverdb_core::ColumnType::Decimal { .. }
        ) {
            return Ok(None);
        }
        let mut key = Vec::with_capacity(16);
        encode_key_values(
            &range.low,
            &table.column_types,
            &table.primary_key_cols,
            &mut key,
        )?;
        Ok(Some(self.sharder.calculate_shard(ShardType::Hash, &key)))
    }
}

fn split_post_ops(plan: PhysicalPlan) -> (Vec<PostOp>, PhysicalPlan) {
    let mut post_ops = Vec::new();
    let mut current = plan;
    loop {
        current = match current {
            PhysicalPlan::Sort {
                sort_exprs,
                descending,
                child,
            } => {
                post_ops.push(PostOp::Sort {
                    sort_exprs,
                    descending,
                });
                *child
            }
            PhysicalPlan::Limit {
                count,
                offset,
                child,
            } => {
                post_ops.push(PostOp::Limit { count, offset });
                *child
            }
            PhysicalPlan::TopN {
                count,
                offset,
                sort_exprs,
                descending,
                child,
            } => {
                post_ops.push(PostOp::TopN {
                    count,
                    offset,
                    sort_exprs,
                    descending,
                });
                *child
            }
            other => return (post_ops, other),
        };
    }
}

fn scan_ranges_of(plan: &PhysicalPlan) -> Option<&[ScanRange]> {
    match plan {
        PhysicalPlan::TableScan { ranges, .. } | PhysicalPlan::IndexScan { ranges, .. } => {
            Some(ranges)
        }
        PhysicalPlan::Selection { child, .. }
        | PhysicalPlan::Projection { child, .. }
        | PhysicalPlan::Aggregate { child, .. }
        | PhysicalPlan::Sort { child, .. }
        | PhysicalPlan::Limit { child, .. }
        | PhysicalPlan::TopN { child, .. } => scan_ranges_of(child),
    }
}

struct PullRemoteQueryExecutor {
    engine: Weak<PullEngine>,
}

#[async_trait]
impl RemoteQueryExecutor for PullRemoteQueryExecutor {
    async fn execute_remote_pull_query(
        &self,
        query_info: QueryExecutionInfo,
    ) -> riverdb_cluster::Result<Vec<Row>> {
        let engine = self
            .engine
            .upgrade()
            .ok_or_else(|| ClusterError::Unavailable("pull engine stopped".to_string()))?;
        engine
            .execute_remote_fragment(query_info)
            .await
            .map_err(|e| ClusterError::Internal(e.to_string()))
    }
}
