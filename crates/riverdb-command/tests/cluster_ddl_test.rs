//! Three-node cluster tests: DDL broadcast, view maintenance across nodes,
//! drops, restart recovery, and sessions.

use std::sync::Arc;
use std::time::Duration;

use riverdb_cluster::{Cluster, ClusterBus};
use riverdb_command::{CommandError, Node, StatementResult};
use riverdb_core::{Row, Value};

const NUM_NODES: usize = 3;
const NUM_SHARDS: usize = 6;

const CREATE_SOURCE: &str = "create source sensor_readings (
    column sensor_id bigint,
    column location varchar,
    column temperature double,
    primary key sensor_id,
    broker default,
    topic sensor.readings,
    header encoding json,
    key encoding json,
    value encoding json,
    column selector [v.sensor_id, v.location, v.temperature]
)";

const CREATE_MAX_READINGS: &str = "create materialized view max_readings as \
    select sensor_id, max(temperature) as max_temp from sensor_readings \
    where location = 'wincanton' group by sensor_id";

async fn start_cluster() -> (Arc<ClusterBus>, Vec<Arc<Node>>) {
    let bus = ClusterBus::new(NUM_NODES, NUM_SHARDS);
    let mut nodes = Vec::new();
    for node_id in 0..NUM_NODES {
        nodes.push(Node::start(node_id, Arc::clone(&bus)).await.unwrap());
    }
    (bus, nodes)
}

fn reading(sensor_id: i64, location: &str, temperature: f64) -> Row {
    Row::new(vec![
        Value::BigInt(sensor_id),
        Value::Varchar(location.to_string()),
        Value::Double(temperature),
    ])
}

async fn exec(node: &Arc<Node>, sql: &str) -> riverdb_command::Result<StatementResult> {
    let session = node.executor().create_session("test");
    node.executor().execute_statement(&session, sql).await
}

/// Poll a query on `node` until it yields rows or the deadline passes.
async fn query_until_rows(node: &Arc<Node>, sql: &str) -> Vec<Row> {
    for _ in 0..300 {
        let result = exec(node, sql).await.unwrap();
        if !result.rows.is_empty() {
            return result.rows;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Vec::new()
}

#[tokio::test]
async fn test_ddl_broadcast_and_cross_node_view_maintenance() {
    let (_bus, nodes) = start_cluster().await;

    exec(&nodes[0], CREATE_SOURCE).await.unwrap();
    exec(&nodes[0], CREATE_MAX_READINGS).await.unwrap();

    // Every node sees identical descriptors after commit.
    let source_id = nodes[0]
        .meta()
        .get_source("test", "sensor_readings")
        .unwrap()
        .id();
    for node in &nodes {
        let mv = node
            .meta()
            .get_materialized_view("test", "max_readings")
            .unwrap();
        assert_eq!(
            mv.table_info,
            nodes[0]
                .meta()
                .get_materialized_view("test", "max_readings")
                .unwrap()
                .table_info
        );
        assert_eq!(mv.upstream_table_ids, vec![source_id]);
    }

    nodes[0]
        .push()
        .ingest_rows(
            source_id,
            vec![
                reading(1, "wincanton", 25.5),
                reading(2, "london", 28.1),
                reading(3, "los angeles", 35.6),
            ],
        )
        .await
        .unwrap();

    // Query from a node other than the one that ingested.
    let rows = query_until_rows(
        &nodes[1],
        "select * from max_readings where sensor_id = 1",
    )
    .await;
    assert_eq!(
        rows,
        vec![Row::new(vec![Value::BigInt(1), Value::Double(25.5)])]
    );

    // The filtered-out locations produced no groups.
    let all = exec(&nodes[2], "select * from max_readings").await.unwrap();
    assert_eq!(all.rows.len(), 1);
}

#[tokio::test]
async fn test_source_rows_queryable_from_any_node() {
    let (_bus, nodes) = start_cluster().await;
    exec(&nodes[0], CREATE_SOURCE).await.unwrap();
    let source_id = nodes[1]
        .meta()
        .get_source("test", "sensor_readings")
        .unwrap()
        .id();

    nodes[1]
        .push()
        .ingest_rows(
            source_id,
            vec![reading(1, "wincanton", 25.5), reading(2, "london", 28.1)],
        )
        .await
        .unwrap();

    let mut rows = exec(&nodes[2], "select * from sensor_readings")
        .await
        .unwrap()
        .rows;
    rows.sort_by_key(|r| r.get(0).as_i64());
    assert_eq!(
        rows,
        vec![reading(1, "wincanton", 25.5), reading(2, "london", 28.1)]
    );
}

#[tokio::test]
async fn test_duplicate_source_rejected() {
    let (_bus, nodes) = start_cluster().await;
    exec(&nodes[0], CREATE_SOURCE).await.unwrap();
    let err = exec(&nodes[1], CREATE_SOURCE).await.unwrap_err();
    assert!(matches!(
        err,
        CommandError::Meta(riverdb_meta::MetaError::SourceAlreadyExists { .. })
    ));
}

#[tokio::test]
async fn test_drop_source_refused_while_consumed() {
    let (_bus, nodes) = start_cluster().await;
    exec(&nodes[0], CREATE_SOURCE).await.unwrap();
    exec(&nodes[0], CREATE_MAX_READINGS).await.unwrap();

    let err = exec(&nodes[0], "drop source sensor_readings")
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::SourceInUse { .. }));
}

#[tokio::test]
async fn test_drop_wipes_all_data() {
    let (_bus, nodes) = start_cluster().await;
    exec(&nodes[0], CREATE_SOURCE).await.unwrap();
    exec(&nodes[0], CREATE_MAX_READINGS).await.unwrap();

    let source_id = nodes[0]
        .meta()
        .get_source("test", "sensor_readings")
        .unwrap()
        .id();
    let mv_id = nodes[0]
        .meta()
        .get_materialized_view("test", "max_readings")
        .unwrap()
        .id();
    nodes[0]
        .push()
        .ingest_rows(source_id, vec![reading(1, "wincanton", 25.5)])
        .await
        .unwrap();
    assert!(!query_until_rows(&nodes[1], "select * from max_readings")
        .await
        .is_empty());

    exec(&nodes[2], "drop materialized view max_readings")
        .await
        .unwrap();
    exec(&nodes[2], "drop source sensor_readings").await.unwrap();

    // No key with either table id survives on any shard.
    for table_id in [source_id, mv_id] {
        for shard_id in nodes[0].cluster().get_all_shard_ids() {
            let prefix = riverdb_core::encode_table_key_prefix(table_id, shard_id, 16);
            let end = riverdb_core::encode_table_key_prefix(table_id + 1, shard_id, 16);
            let pairs = nodes[0]
                .cluster()
                .local_scan(&prefix, Some(&end), -1)
                .await
                .unwrap();
            assert!(pairs.is_empty(), "table {table_id} left keys on {shard_id}");
        }
    }

    // Names are free again.
    for node in &nodes {
        assert!(node.meta().get_source("test", "sensor_readings").is_none());
        assert!(node
            .meta()
            .get_materialized_view("test", "max_readings")
            .is_none());
    }
}

#[tokio::test]
async fn test_restart_replays_catalog() {
    let (bus, nodes) = start_cluster().await;
    exec(&nodes[0], CREATE_SOURCE).await.unwrap();
    exec(&nodes[0], CREATE_MAX_READINGS).await.unwrap();

    let source_id = nodes[0]
        .meta()
        .get_source("test", "sensor_readings")
        .unwrap()
        .id();
    nodes[0]
        .push()
        .ingest_rows(source_id, vec![reading(1, "wincanton", 25.5)])
        .await
        .unwrap();
    assert!(!query_until_rows(&nodes[0], "select * from max_readings")
        .await
        .is_empty());

    nodes[0].stop().await.unwrap();
    let restarted = Node::start(0, bus).await.unwrap();

    // Catalog replay brings the schema and the data back.
    let source = restarted.meta().get_source("test", "sensor_readings").unwrap();
    assert_eq!(source.id(), source_id);
    assert!(restarted
        .meta()
        .get_materialized_view("test", "max_readings")
        .is_some());
    let rows = exec(&restarted, "select * from max_readings where sensor_id = 1")
        .await
        .unwrap()
        .rows;
    assert_eq!(
        rows,
        vec![Row::new(vec![Value::BigInt(1), Value::Double(25.5)])]
    );

    // Ingestion resumes on the restarted node.
    restarted
        .push()
        .ingest_rows(source_id, vec![reading(1, "wincanton", 30.5)])
        .await
        .unwrap();
    for _ in 0..300 {
        let rows = exec(&restarted, "select * from max_readings where sensor_id = 1")
            .await
            .unwrap()
            .rows;
        if rows == vec![Row::new(vec![Value::BigInt(1), Value::Double(30.5)])] {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("max was not maintained after restart");
}

#[tokio::test]
async fn test_prepare_and_execute() {
    let (_bus, nodes) = start_cluster().await;
    exec(&nodes[0], CREATE_SOURCE).await.unwrap();
    let source_id = nodes[0]
        .meta()
        .get_source("test", "sensor_readings")
        .unwrap()
        .id();
    nodes[0]
        .push()
        .ingest_rows(
            source_id,
            vec![reading(1, "wincanton", 25.5), reading(2, "london", 28.1)],
        )
        .await
        .unwrap();

    let session = nodes[0].executor().create_session("test");
    let prepared = nodes[0]
        .executor()
        .execute_statement(
            &session,
            "prepare select * from sensor_readings where sensor_id = ?",
        )
        .await
        .unwrap();
    let ps_id = prepared.rows[0].get(0).as_i64().unwrap();

    let result = nodes[0]
        .executor()
        .execute_statement(&session, &format!("execute {ps_id} 2"))
        .await
        .unwrap();
    assert_eq!(result.rows, vec![reading(2, "london", 28.1)]);

    // Unknown prepared statement id.
    let err = nodes[0]
        .executor()
        .execute_statement(&session, "execute 99 1")
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::UnknownPreparedStatement(99)));
}

#[tokio::test]
async fn test_session_close_broadcast_discards_state() {
    let (_bus, nodes) = start_cluster().await;
    let session = nodes[0].executor().create_session("test");
    let session_id = session.id().to_string();
    assert!(nodes[0].executor().get_session(&session_id).is_ok());

    nodes[0].executor().close_session(&session_id).await.unwrap();
    assert!(nodes[0].executor().get_session(&session_id).is_err());

    // Redelivery is harmless.
    nodes[0].executor().close_session(&session_id).await.unwrap();
}

#[tokio::test]
async fn test_ddl_serialized_within_schema() {
    let (_bus, nodes) = start_cluster().await;
    // Two concurrent creates of the same source: exactly one wins.
    let a = exec(&nodes[0], CREATE_SOURCE);
    let b = exec(&nodes[1], CREATE_SOURCE);
    let (ra, rb) = tokio::join!(a, b);
    assert!(
        ra.is_ok() ^ rb.is_ok(),
        "exactly one concurrent create may succeed: {ra:?} {rb:?}"
    );
    assert!(nodes[2].meta().get_source("test", "sensor_readings").is_some());
}
