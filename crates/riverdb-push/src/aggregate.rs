//! The split aggregate
//!
//! A group-by rekeys the stream, so the aggregate runs in two halves on two
//! shards:
//!
//! - [`AggregatePartial`] runs where the upstream rows land. It encodes the
//!   grouping columns as an order-preserving key, hands the row to the
//!   forwarder, and emits nothing downstream — the rows leave this shard.
//! - [`AggregateSink`] runs on the destination shard's inbox drain. It folds
//!   each forwarded row into the current aggregate row (read through the
//!   same batch-local cache, so several deltas to one group collapse into
//!   one write) and returns the updated rows for the view's table writer.

use std::collections::HashMap;

use async_trait::async_trait;

use riverdb_core::{encode_key_cols, ColumnType, Row, TableInfo, Value};
use riverdb_sql::{AggFunction, AggregateItem};

use crate::error::{PushError, Result};
use crate::exec::{ExecContext, PushOperator};
use crate::forwarder::forward_row;
use crate::table;

/// Upstream half: rekey by the grouping columns and forward.
pub struct AggregatePartial {
    group_by_cols: Vec<usize>,
    upstream_col_types: Vec<ColumnType>,
    upstream_col_names: Vec<String>,
    /// The aggregate's sink table id; routes inbox entries to the right
    /// receiver on the destination shard.
    entity_id: u64,
}

impl AggregatePartial {
    pub fn new(
        group_by_cols: Vec<usize>,
        upstream_col_names: Vec<String>,
        upstream_col_types: Vec<ColumnType>,
        entity_id: u64,
    ) -> Self {
        Self {
            group_by_cols,
            upstream_col_types,
            upstream_col_names,
            entity_id,
        }
    }
}

#[async_trait]
impl PushOperator for AggregatePartial {
    async fn handle_rows(
        &self,
        rows: Vec<Row>,
        ctx: &mut ExecContext<'_>,
    ) -> Result<Option<Vec<Row>>> {
        let local_shard = ctx.batch.shard_id();
        for row in &rows {
            let mut key = Vec::with_capacity(16);
            encode_key_cols(row, &self.group_by_cols, &self.upstream_col_types, &mut key)?;
            forward_row(
                ctx,
                &key,
                row,
                local_shard,
                self.entity_id,
                &self.upstream_col_types,
            )
            .await?;
        }
        Ok(None)
    }

    fn col_names(&self) -> &[String] {
        &self.upstream_col_names
    }

    fn col_types(&self) -> &[ColumnType] {
        &self.upstream_col_types
    }

    fn key_cols(&self) -> &[usize] {
        &self.group_by_cols
    }
}

/// Downstream half: fold forwarded rows into the aggregate table.
pub struct AggregateSink {
    sink_table: TableInfo,
    items: Vec<AggregateItem>,
    group_by_cols: Vec<usize>,
    upstream_col_types: Vec<ColumnType>,
}

impl AggregateSink {
    pub fn new(
        sink_table: TableInfo,
        items: Vec<AggregateItem>,
        group_by_cols: Vec<usize>,
        upstream_col_types: Vec<ColumnType>,
    ) -> Self {
        Self {
            sink_table,
            items,
            group_by_cols,
            upstream_col_types,
        }
    }

    pub fn upstream_col_types(&self) -> &[ColumnType] {
        &self.upstream_col_types
    }

    /// Apply one drain's worth of forwarded rows; returns the updated
    /// aggregate rows, one per touched group, for the sink's table writer.
    pub async fn apply_forwarded(
        &self,
        rows: Vec<Row>,
        ctx: &mut ExecContext<'_>,
    ) -> Result<Vec<Row>> {
        let shard_id = ctx.batch.shard_id();
        // Group key bytes → current aggregate row, read once per group.
        let mut current: HashMap<Vec<u8>, Row> = HashMap::new();
        let mut touched: Vec<Vec<u8>> = Vec::new();

        for row in &rows {
            let group_values: Vec<Value> = self
                .group_by_cols
                .iter()
                .map(|&col| row.get(col).clone())
                .collect();
            let mut group_key = Vec::with_capacity(16);
            encode_key_cols(row, &self.group_by_cols, &self.upstream_col_types, &mut group_key)?;

            let existing = match current.get(&group_key) {
                Some(row) => Some(row.clone()),
                None => {
                    table::lookup_in_pk(&self.sink_table, &group_values, shard_id, ctx.cluster)
                        .await?
                }
            };
            let updated = self.fold(existing.as_ref(), row, &group_values)?;
            if !current.contains_key(&group_key) {
                touched.push(group_key.clone());
            }
            current.insert(group_key, updated);
        }

        Ok(touched
            .into_iter()
            .filter_map(|key| current.remove(&key))
            .collect())
    }

    /// Fold one upstream row into the aggregate row for its group.
    fn fold(&self, existing: Option<&Row>, row: &Row, group_values: &[Value]) -> Result<Row> {
        let mut values = Vec::with_capacity(self.items.len());
        for (out_col, item) in self.items.iter().enumerate() {
            let old = existing.map(|r| r.get(out_col));
            let value = match item {
                AggregateItem::GroupColumn(upstream_col) => {
                    let position = self
                        .group_by_cols
                        .iter()
                        .position(|c| c == upstream_col)
                        .ok_or_else(|| {
                            PushError::Internal("group column not in group-by list".to_string())
                        })?;
                    group_values
                        .get(position)
                        .cloned()
                        .ok_or_else(|| PushError::Internal("group value missing".to_string()))?
                }
                AggregateItem::Aggregate { function, arg } => {
                    let input = arg.map(|col| row.get(col));
                    fold_aggregate(*function, old, input)?
                }
            };
            values.push(value);
        }
        Ok(Row::new(values))
    }
}

fn fold_aggregate(
    function: AggFunction,
    old: Option<&Value>,
    input: Option<&Value>,
) -> Result<Value> {
    match function {
        AggFunction::Count => {
            // count(*) counts every row; count(col) counts non-nulls.
            let increment = match input {
                Some(Value::Null) => 0,
                _ => 1,
            };
            let base = match old {
                Some(Value::BigInt(n)) => *n,
                _ => 0,
            };
            Ok(Value::BigInt(base + increment))
        }
        AggFunction::Sum => {
            let input = input
                .ok_or_else(|| PushError::Internal("sum requires an argument".to_string()))?;
            match (old, input) {
                (_, Value::Null) => Ok(old.cloned().unwrap_or(Value::Null)),
                (None | Some(Value::Null), v) => Ok(v.clone()),
                (Some(a), b) => add_values(a, b),
            }
        }
        AggFunction::Min | AggFunction::Max => {
            let input = input
                .ok_or_else(|| PushError::Internal("min/max require an argument".to_string()))?;
            match (old, input) {
                (_, Value::Null) => Ok(old.cloned().unwrap_or(Value::Null)),
                (None | Some(Value::Null), v) => Ok(v.clone()),
                (Some(a), b) => {
                    let keep_old = match function {
                        AggFunction::Min => a.sql_cmp(b).is_le(),
                        _ => a.sql_cmp(b).is_ge(),
                    };
                    Ok(if keep_old { a.clone() } else { b.clone() })
                }
            }
        }
    }
}

fn add_values(a: &Value, b: &Value) -> Result<Value> {
    match (a, b) {
        (Value::BigInt(x), Value::BigInt(y)) => Ok(Value::BigInt(x + y)),
        (Value::Decimal(x), Value::Decimal(y)) => Ok(Value::Decimal(x + y)),
        (a, b) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => Ok(Value::Double(x + y)),
            _ => Err(PushError::Internal(format!(
                "cannot sum {} and {}",
                a.kind(),
                b.kind()
            ))),
        },
    }
}
