//! Pull executors
//!
//! Executors produce rows in pages: `get_rows(max_rows)` returns a batch
//! and whether the executor is exhausted. Scans buffer one shard-local
//! range read; everything above them is a straightforward pull pipeline.

use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;

use riverdb_cluster::{Cluster, KvPair, QueryExecutionInfo};
use riverdb_core::{
    decode_row, encode_key_values, encode_table_key_prefix, IndexInfo, Row, TableInfo,
};
use riverdb_sql::{Expr, ScanRange};

use crate::error::{PullError, Result};

/// Upper bound used by `collect_all`.
const DRAIN_PAGE: usize = 1024;

#[async_trait]
pub trait PullExecutor: Send {
    /// Produce up to `max_rows` rows; the bool is true when exhausted.
    async fn get_rows(&mut self, max_rows: usize) -> Result<(Vec<Row>, bool)>;
}

/// Drain an executor completely.
pub async fn collect_all(executor: &mut dyn PullExecutor) -> Result<Vec<Row>> {
    let mut rows = Vec::new();
    loop {
        let (page, done) = executor.get_rows(DRAIN_PAGE).await?;
        rows.extend(page);
        if done {
            return Ok(rows);
        }
    }
}

/// Yields nothing; the result of statements that return no rows.
pub struct Empty;

#[async_trait]
impl PullExecutor for Empty {
    async fn get_rows(&mut self, _max_rows: usize) -> Result<(Vec<Row>, bool)> {
        Ok((Vec::new(), true))
    }
}

// ---------------------------------------------------------------------
// Scans
// ---------------------------------------------------------------------

/// `(start, end-exclusive)` byte bounds of one scan range within a table's
/// keyspace on one shard.
fn range_bounds(
    prefix: &[u8],
    end_prefix: &[u8],
    range: &ScanRange,
    table: &TableInfo,
    key_cols: &[usize],
) -> Result<(Vec<u8>, Vec<u8>)> {
    let mut start = prefix.to_vec();
    if !range.low.is_empty() {
        encode_key_values(
            &range.low,
            &table.column_types,
            &key_cols[..range.low.len()],
            &mut start,
        )?;
        if range.low_exclusive {
            start.push(0xFF);
        }
    }
    let end = if range.high.is_empty() {
        end_prefix.to_vec()
    } else {
        let mut end = prefix.to_vec();
        encode_key_values(
            &range.high,
            &table.column_types,
            &key_cols[..range.high.len()],
            &mut end,
        )?;
        if !range.high_exclusive {
            end.push(0xFF);
        }
        end
    };
    Ok((start, end))
}

async fn scan_ranges(
    cluster: &dyn Cluster,
    table: &TableInfo,
    key_cols: &[usize],
    table_id: u64,
    shard_id: u64,
    ranges: &[ScanRange],
) -> Result<Vec<KvPair>> {
    let prefix = encode_table_key_prefix(table_id, shard_id, 16);
    let end_prefix = encode_table_key_prefix(table_id + 1, shard_id, 16);
    if ranges.is_empty() {
        return Ok(cluster.local_scan(&prefix, Some(&end_prefix), -1).await?);
    }
    let mut pairs = Vec::new();
    for range in ranges {
        let (start, end) = range_bounds(&prefix, &end_prefix, range, table, key_cols)?;
        pairs.extend(cluster.local_scan(&start, Some(&end), -1).await?);
    }
    Ok(pairs)
}

/// Scans a table's primary keyspace on one shard.
pub struct TableScan {
    table: TableInfo,
    ranges: Vec<ScanRange>,
    shard_id: u64,
    cluster: Arc<dyn Cluster>,
    buffered: Option<Vec<Row>>,
    cursor: usize,
}

impl TableScan {
    pub fn new(
        table: TableInfo,
        ranges: Vec<ScanRange>,
        shard_id: u64,
        cluster: Arc<dyn Cluster>,
    ) -> Self {
        Self {
            table,
            ranges,
            shard_id,
            cluster,
            buffered: None,
            cursor: 0,
        }
    }
}

#[async_trait]
impl PullExecutor for TableScan {
    async fn get_rows(&mut self, max_rows: usize) -> Result<(Vec<Row>, bool)> {
        if self.buffered.is_none() {
            let pairs = scan_ranges(
                self.cluster.as_ref(),
                &self.table,
                &self.table.primary_key_cols,
                self.table.id,
                self.shard_id,
                &self.ranges,
            )
            .await?;
            let mut rows = Vec::with_capacity(pairs.len());
            for pair in pairs {
                rows.push(decode_row(&pair.value, &self.table.column_types)?);
            }
            self.buffered = Some(rows);
        }
        let rows = self.buffered.as_deref().unwrap_or(&[]);
        Ok(serve_page(rows, &mut self.cursor, max_rows))
    }
}

/// Scans a secondary index on one shard, then fetches the base rows by
/// primary key.
pub struct IndexScan {
    table: TableInfo,
    index: IndexInfo,
    ranges: Vec<ScanRange>,
    shard_id: u64,
    cluster: Arc<dyn Cluster>,
    buffered: Option<Vec<Row>>,
    cursor: usize,
}

impl IndexScan {
    pub fn new(
        table: TableInfo,
        index: IndexInfo,
        ranges: Vec<ScanRange>,
        shard_id: u64,
        cluster: Arc<dyn Cluster>,
    ) -> Self {
        Self {
            table,
            index,
            ranges,
            shard_id,
            cluster,
            buffered: None,
            cursor: 0,
        }
    }
}

#[async_trait]
impl PullExecutor for IndexScan {
    async fn get_rows(&mut self, max_rows: usize) -> Result<(Vec<Row>, bool)> {
        if self.buffered.is_none() {
            let pairs = scan_ranges(
                self.cluster.as_ref(),
                &self.table,
                &self.index.index_cols,
                self.index.id,
                self.shard_id,
                &self.ranges,
            )
            .await?;
            let mut rows = Vec::with_capacity(pairs.len());
            for pair in pairs {
                // Index entry value is the bare pk-cols encoding.
                let mut key = encode_table_key_prefix(self.table.id, self.shard_id, 32);
                key.extend_from_slice(&pair.value);
                let Some(value) = self.cluster.local_get(&key).await? else {
                    // Base row vanished between the two reads.
                    continue;
                };
                rows.push(decode_row(&value, &self.table.column_types)?);
            }
            self.buffered = Some(rows);
        }
        let rows = self.buffered.as_deref().unwrap_or(&[]);
        Ok(serve_page(rows, &mut self.cursor, max_rows))
    }
}

fn serve_page(rows: &[Row], cursor: &mut usize, max_rows: usize) -> (Vec<Row>, bool) {
    let end = (*cursor + max_rows).min(rows.len());
    let page = rows[*cursor..end].to_vec();
    *cursor = end;
    (page, *cursor >= rows.len())
}

// ---------------------------------------------------------------------
// Row transforms
// ---------------------------------------------------------------------

pub struct PullSelect {
    predicates: Vec<Expr>,
    child: Box<dyn PullExecutor>,
}

impl PullSelect {
    pub fn new(predicates: Vec<Expr>, child: Box<dyn PullExecutor>) -> Self {
        Self { predicates, child }
    }
}

#[async_trait]
impl PullExecutor for PullSelect {
    async fn get_rows(&mut self, max_rows: usize) -> Result<(Vec<Row>, bool)> {
        let (rows, done) = self.child.get_rows(max_rows).await?;
        let mut output = Vec::with_capacity(rows.len());
        for row in rows {
            let mut keep = true;
            for predicate in &self.predicates {
                if !predicate.eval_bool(&row).map_err(PullError::Sql)? {
                    keep = false;
                    break;
                }
            }
            if keep {
                output.push(row);
            }
        }
        Ok((output, done))
    }
}

pub struct PullProjection {
    exprs: Vec<Expr>,
    child: Box<dyn PullExecutor>,
}

impl PullProjection {
    pub fn new(exprs: Vec<Expr>, child: Box<dyn PullExecutor>) -> Self {
        Self { exprs, child }
    }
}

#[async_trait]
impl PullExecutor for PullProjection {
    async fn get_rows(&mut self, max_rows: usize) -> Result<(Vec<Row>, bool)> {
        let (rows, done) = self.child.get_rows(max_rows).await?;
        let mut output = Vec::with_capacity(rows.len());
        for row in rows {
            let values = self
                .exprs
                .iter()
                .map(|e| e.eval(&row))
                .collect::<riverdb_sql::Result<Vec<_>>>()
                .map_err(PullError::Sql)?;
            output.push(Row::new(values));
        }
        Ok((output, done))
    }
}

/// Fully materializes its child, sorts, then pages out.
pub struct PullSort {
    sort_exprs: Vec<Expr>,
    descending: Vec<bool>,
    child: Box<dyn PullExecutor>,
    sorted: Option<Vec<Row>>,
    cursor: usize,
}

impl PullSort {
    pub fn new(
        sort_exprs: Vec<Expr>,
        descending: Vec<bool>,
        child: Box<dyn PullExecutor>,
    ) -> Self {
        Self {
            sort_exprs,
            descending,
            child,
            sorted: None,
            cursor: 0,
        }
    }
}

#[async_trait]
impl PullExecutor for PullSort {
    async fn get_rows(&mut self, max_rows: usize) -> Result<(Vec<Row>, bool)> {
        if self.sorted.is_none() {
            let mut rows = collect_all(self.child.as_mut()).await?;
            // Evaluate sort keys once per row.
            let mut keyed: Vec<(Vec<riverdb_core::Value>, Row)> = Vec::with_capacity(rows.len());
            for row in rows.drain(..) {
                let keys = self
                    .sort_exprs
                    .iter()
                    .map(|e| e.eval(&row))
                    .collect::<riverdb_sql::Result<Vec<_>>>()
                    .map_err(PullError::Sql)?;
                keyed.push((keys, row));
            }
            let descending = self.descending.clone();
            keyed.sort_by(|(a, _), (b, _)| {
                for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
                    let mut ordering = x.sql_cmp(y);
                    if descending.get(i).copied().unwrap_or(false) {
                        ordering = ordering.reverse();
                    }
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
            self.sorted = Some(keyed.into_iter().map(|(_, row)| row).collect());
        }
        let rows = self.sorted.as_deref().unwrap_or(&[]);
        Ok(serve_page(rows, &mut self.cursor, max_rows))
    }
}

pub struct PullLimit {
    count: u64,
    offset: u64,
    child: Box<dyn PullExecutor>,
    skipped: u64,
    produced: u64,
}

impl PullLimit {
    pub fn new(count: u64, offset: u64, child: Box<dyn PullExecutor>) -> Self {
        Self {
            count,
            offset,
            child,
            skipped: 0,
            produced: 0,
        }
    }
}

#[async_trait]
impl PullExecutor for PullLimit {
    async fn get_rows(&mut self, max_rows: usize) -> Result<(Vec<Row>, bool)> {
        let mut output = Vec::new();
        loop {
            if self.produced >= self.count {
                return Ok((output, true));
            }
            let (rows, done) = self.child.get_rows(max_rows).await?;
            for row in rows {
                if self.skipped < self.offset {
                    self.skipped += 1;
                    continue;
                }
                if self.produced < self.count {
                    output.push(row);
                    self.produced += 1;
                }
            }
            if done || self.produced >= self.count {
                return Ok((output, done || self.produced >= self.count));
            }
            if output.len() >= max_rows {
                return Ok((output, false));
            }
        }
    }
}

// ---------------------------------------------------------------------
// Remote dispatch
// ---------------------------------------------------------------------

/// Runs the query's remote fragment on its target shards and merges the
/// results. A point get goes to exactly one shard; everything else fans
/// out across the cluster.
pub struct RemoteExecutor {
    query_info: QueryExecutionInfo,
    /// `Some` when point-get routing resolved a single shard.
    point_get_shard: Option<u64>,
    cluster: Arc<dyn Cluster>,
    buffered: Option<Vec<Row>>,
    cursor: usize,
}

impl RemoteExecutor {
    pub fn new(
        query_info: QueryExecutionInfo,
        point_get_shard: Option<u64>,
        cluster: Arc<dyn Cluster>,
    ) -> Self {
        Self {
            query_info,
            point_get_shard,
            cluster,
            buffered: None,
            cursor: 0,
        }
    }

    async fn fetch(&self) -> Result<Vec<Row>> {
        let shards = match self.point_get_shard {
            Some(shard) => vec![shard],
            None => self.cluster.get_all_shard_ids(),
        };
        let mut rows = Vec::new();
        for shard_id in shards {
            let mut info = self.query_info.clone();
            info.shard_id = shard_id;
            let shard_rows = self
                .cluster
                .execute_remote_pull_query(info)
                .await
                .map_err(|e| PullError::RemoteExecution {
                    shard_id,
                    reason: e.to_string(),
                })?;
            rows.extend(shard_rows);
        }
        Ok(rows)
    }
}

#[async_trait]
impl PullExecutor for RemoteExecutor {
    async fn get_rows(&mut self, max_rows: usize) -> Result<(Vec<Row>, bool)> {
        if self.buffered.is_none() {
            self.buffered = Some(self.fetch().await?);
        }
        let rows = self.buffered.as_deref().unwrap_or(&[]);
        Ok(serve_page(rows, &mut self.cursor, max_rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use riverdb_core::Value;
    use riverdb_sql::BinaryOp;

    struct Fixed {
        rows: Vec<Row>,
        served: bool,
    }

    impl Fixed {
        fn new(rows: Vec<Row>) -> Box<Self> {
            Box::new(Self { rows, served: false })
        }
    }

    #[async_trait]
    impl PullExecutor for Fixed {
        async fn get_rows(&mut self, _max_rows: usize) -> Result<(Vec<Row>, bool)> {
            if self.served {
                return Ok((Vec::new(), true));
            }
            self.served = true;
            Ok((self.rows.clone(), true))
        }
    }

    fn int_rows(values: &[i64]) -> Vec<Row> {
        values
            .iter()
            .map(|&v| Row::new(vec![Value::BigInt(v)]))
            .collect()
    }

    #[tokio::test]
    async fn test_select_filters() {
        let mut select = PullSelect::new(
            vec![Expr::binary(
                BinaryOp::Gt,
                Expr::column(0),
                Expr::literal(Value::BigInt(2)),
            )],
            Fixed::new(int_rows(&[1, 2, 3, 4])),
        );
        let rows = collect_all(&mut select).await.unwrap();
        assert_eq!(rows, int_rows(&[3, 4]));
    }

    #[tokio::test]
    async fn test_projection_maps() {
        let mut projection = PullProjection::new(
            vec![Expr::binary(
                BinaryOp::Multiply,
                Expr::column(0),
                Expr::literal(Value::BigInt(10)),
            )],
            Fixed::new(int_rows(&[1, 2])),
        );
        let rows = collect_all(&mut projection).await.unwrap();
        assert_eq!(rows, int_rows(&[10, 20]));
    }

    #[tokio::test]
    async fn test_sort_descending() {
        let mut sort = PullSort::new(
            vec![Expr::column(0)],
            vec![true],
            Fixed::new(int_rows(&[2, 9, 4])),
        );
        let rows = collect_all(&mut sort).await.unwrap();
        assert_eq!(rows, int_rows(&[9, 4, 2]));
    }

    #[tokio::test]
    async fn test_limit_and_offset() {
        let mut limit = PullLimit::new(2, 1, Fixed::new(int_rows(&[1, 2, 3, 4])));
        let rows = collect_all(&mut limit).await.unwrap();
        assert_eq!(rows, int_rows(&[2, 3]));
    }

    #[tokio::test]
    async fn test_limit_zero() {
        let mut limit = PullLimit::new(0, 0, Fixed::new(int_rows(&[1, 2])));
        let rows = collect_all(&mut limit).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_empty_executor() {
        let rows = collect_all(&mut Empty).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_paging_respects_max_rows() {
        let mut sort = PullSort::new(
            vec![Expr::column(0)],
            vec![false],
            Fixed::new(int_rows(&[3, 1, 2])),
        );
        let (page, done) = sort.get_rows(2).await.unwrap();
        assert_eq!(page, int_rows(&[1, 2]));
        assert!(!done);
        let (page, done) = sort.get_rows(2).await.unwrap();
        assert_eq!(page, int_rows(&[3]));
        assert!(done);
    }
}
