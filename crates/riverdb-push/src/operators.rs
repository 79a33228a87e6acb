//! Stateless push operators and the table writer

use async_trait::async_trait;

use riverdb_core::{ColumnType, Row, TableInfo};
use riverdb_sql::Expr;

use crate::error::Result;
use crate::exec::{ExecContext, PushOperator};
use crate::table;

/// Writes incoming rows into its table (plus index entries) and passes them
/// on to consumers. Sits at the root of every source and under every
/// materialized view's chain as the sink.
pub struct TableWriter {
    table: TableInfo,
}

impl TableWriter {
    pub fn new(table: TableInfo) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &TableInfo {
        &self.table
    }
}

#[async_trait]
impl PushOperator for TableWriter {
    async fn handle_rows(
        &self,
        rows: Vec<Row>,
        ctx: &mut ExecContext<'_>,
    ) -> Result<Option<Vec<Row>>> {
        for row in &rows {
            table::upsert(&self.table, row, ctx.batch)?;
            for index in &self.table.index_infos {
                let (key, pk_suffix) =
                    table::encode_index_entry(&self.table, index, row, ctx.batch.shard_id())?;
                ctx.batch.add_put(key, pk_suffix)?;
            }
        }
        Ok(Some(rows))
    }

    fn col_names(&self) -> &[String] {
        &self.table.column_names
    }

    fn col_types(&self) -> &[ColumnType] {
        &self.table.column_types
    }

    fn key_cols(&self) -> &[usize] {
        &self.table.primary_key_cols
    }
}

/// Row-at-a-time projection.
pub struct Projection {
    exprs: Vec<Expr>,
    col_names: Vec<String>,
    col_types: Vec<ColumnType>,
    key_cols: Vec<usize>,
}

impl Projection {
    pub fn new(
        exprs: Vec<Expr>,
        col_names: Vec<String>,
        col_types: Vec<ColumnType>,
        key_cols: Vec<usize>,
    ) -> Self {
        Self {
            exprs,
            col_names,
            col_types,
            key_cols,
        }
    }
}

#[async_trait]
impl PushOperator for Projection {
    async fn handle_rows(
        &self,
        rows: Vec<Row>,
        _ctx: &mut ExecContext<'_>,
    ) -> Result<Option<Vec<Row>>> {
        let mut output = Vec::with_capacity(rows.len());
        for row in rows {
            let values = self
                .exprs
                .iter()
                .map(|expr| expr.eval(&row))
                .collect::<riverdb_sql::Result<Vec<_>>>()?;
            output.push(Row::new(values));
        }
        Ok(Some(output))
    }

    fn col_names(&self) -> &[String] {
        &self.col_names
    }

    fn col_types(&self) -> &[ColumnType] {
        &self.col_types
    }

    fn key_cols(&self) -> &[usize] {
        &self.key_cols
    }
}

/// Predicate filter; passes schema through unchanged.
pub struct Selection {
    predicates: Vec<Expr>,
    col_names: Vec<String>,
    col_types: Vec<ColumnType>,
    key_cols: Vec<usize>,
}

impl Selection {
    pub fn new(
        predicates: Vec<Expr>,
        col_names: Vec<String>,
        col_types: Vec<ColumnType>,
        key_cols: Vec<usize>,
    ) -> Self {
        Self {
            predicates,
            col_names,
            col_types,
            key_cols,
        }
    }
}

#[async_trait]
impl PushOperator for Selection {
    async fn handle_rows(
        &self,
        rows: Vec<Row>,
        _ctx: &mut ExecContext<'_>,
    ) -> Result<Option<Vec<Row>>> {
        let mut output = Vec::with_capacity(rows.len());
        for row in rows {
            let mut keep = true;
            for predicate in &self.predicates {
                if !predicate.eval_bool(&row)? {
                    keep = false;
                    break;
                }
            }
            if keep {
                output.push(row);
            }
        }
        Ok(Some(output))
    }

    fn col_names(&self) -> &[String] {
        &self.col_names
    }

    fn col_types(&self) -> &[ColumnType] {
        &self.col_types
    }

    fn key_cols(&self) -> &[usize] {
        &self.key_cols
    }
}
