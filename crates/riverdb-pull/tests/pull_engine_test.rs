//! Pull queries over push-maintained tables.

use std::collections::BTreeMap;
use std::sync::Arc;

use riverdb_cluster::{Cluster, ClusterBus, LocalCluster};
use riverdb_core::{
    BusEncoding, ColumnType, Row, Sharder, SourceInfo, TableInfo, TopicInfo, Value,
};
use riverdb_meta::MetaController;
use riverdb_pull::PullEngine;
use riverdb_push::PushEngine;

const NUM_SHARDS: usize = 4;

fn sensor_source(id: u64) -> SourceInfo {
    SourceInfo {
        table_info: TableInfo {
            id,
            schema_name: "test".to_string(),
            name: "sensor_readings".to_string(),
            column_names: vec![
                "sensor_id".to_string(),
                "location".to_string(),
                "temperature".to_string(),
            ],
            column_types: vec![ColumnType::BigInt, ColumnType::Varchar, ColumnType::Double],
            primary_key_cols: vec![0],
            index_infos: vec![],
        },
        topic_info: TopicInfo {
            broker_name: "default".to_string(),
            topic_name: "sensor.readings".to_string(),
            header_encoding: BusEncoding::Json,
            key_encoding: BusEncoding::Json,
            value_encoding: BusEncoding::Json,
            col_selectors: vec![
                "v.sensor_id".to_string(),
                "v.location".to_string(),
                "v.temperature".to_string(),
            ],
            properties: BTreeMap::new(),
        },
    }
}

struct Fixture {
    #[allow(dead_code)]
    cluster: Arc<LocalCluster>,
    push: Arc<PushEngine>,
    pull: Arc<PullEngine>,
}

async fn fixture_with_rows(rows: Vec<Row>) -> Fixture {
    let bus = ClusterBus::new(1, NUM_SHARDS);
    let cluster = LocalCluster::new(0, bus);
    let meta = Arc::new(MetaController::new());
    let push = PushEngine::new(
        cluster.clone() as Arc<dyn Cluster>,
        Arc::clone(&meta),
        Sharder::new(NUM_SHARDS),
        None,
    );
    let pull = PullEngine::new(
        cluster.clone() as Arc<dyn Cluster>,
        Arc::clone(&meta),
        Sharder::new(NUM_SHARDS),
    );
    cluster.register_shard_listener_factory(push.listener_factory());
    cluster.set_remote_query_executor(pull.remote_query_executor());
    push.start();
    cluster.start().await.unwrap();

    let source = sensor_source(100);
    meta.register_source(source.clone()).unwrap();
    push.create_source(&source).await.unwrap();
    push.start_source(100).await.unwrap();
    push.ingest_rows(100, rows).await.unwrap();

    Fixture {
        cluster,
        push,
        pull,
    }
}

fn reading(sensor_id: i64, location: &str, temperature: f64) -> Row {
    Row::new(vec![
        Value::BigInt(sensor_id),
        Value::Varchar(location.to_string()),
        Value::Double(temperature),
    ])
}

fn sample_rows() -> Vec<Row> {
    vec![
        reading(1, "wincanton", 25.5),
        reading(2, "london", 28.1),
        reading(3, "los angeles", 35.6),
        reading(4, "london", 17.2),
    ]
}

#[tokio::test]
async fn test_full_scan_returns_all_rows() {
    let fx = fixture_with_rows(sample_rows()).await;
    let mut query = fx
        .pull
        .build_pull_query("0-0", "test", "select * from sensor_readings")
        .unwrap();
    assert_eq!(
        query.col_names(),
        &["sensor_id", "location", "temperature"]
    );
    let mut rows = query.collect().await.unwrap();
    rows.sort_by_key(|r| r.get(0).as_i64());
    assert_eq!(rows, sample_rows());
    fx.push.stop().await;
}

#[tokio::test]
async fn test_point_get_by_primary_key() {
    let fx = fixture_with_rows(sample_rows()).await;
    let mut query = fx
        .pull
        .build_pull_query(
            "0-0",
            "test",
            "select * from sensor_readings where sensor_id = 3",
        )
        .unwrap();
    let rows = query.collect().await.unwrap();
    assert_eq!(rows, vec![reading(3, "los angeles", 35.6)]);
}

#[tokio::test]
async fn test_point_get_missing_key() {
    let fx = fixture_with_rows(sample_rows()).await;
    let mut query = fx
        .pull
        .build_pull_query(
            "0-0",
            "test",
            "select * from sensor_readings where sensor_id = 99",
        )
        .unwrap();
    let rows = query.collect().await.unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_filter_and_projection() {
    let fx = fixture_with_rows(sample_rows()).await;
    let mut query = fx
        .pull
        .build_pull_query(
            "0-0",
            "test",
            "select sensor_id from sensor_readings where location = 'london'",
        )
        .unwrap();
    let mut rows = query.collect().await.unwrap();
    rows.sort_by_key(|r| r.get(0).as_i64());
    assert_eq!(
        rows,
        vec![
            Row::new(vec![Value::BigInt(2)]),
            Row::new(vec![Value::BigInt(4)])
        ]
    );
}

#[tokio::test]
async fn test_order_by_with_limit_and_offset() {
    let fx = fixture_with_rows(sample_rows()).await;
    let mut query = fx
        .pull
        .build_pull_query(
            "0-0",
            "test",
            "select sensor_id, temperature from sensor_readings \
             order by temperature desc limit 2 offset 1",
        )
        .unwrap();
    let rows = query.collect().await.unwrap();
    // Temperatures ordered desc: 35.6, 28.1, 25.5, 17.2 → offset 1, take 2.
    assert_eq!(
        rows,
        vec![
            Row::new(vec![Value::BigInt(2), Value::Double(28.1)]),
            Row::new(vec![Value::BigInt(1), Value::Double(25.5)]),
        ]
    );
}

#[tokio::test]
async fn test_unknown_table_errors() {
    let fx = fixture_with_rows(vec![]).await;
    assert!(fx
        .pull
        .build_pull_query("0-0", "test", "select * from nope")
        .is_err());
}

#[tokio::test]
async fn test_aggregate_pull_is_rejected() {
    let fx = fixture_with_rows(sample_rows()).await;
    let mut query = fx
        .pull
        .build_pull_query(
            "0-0",
            "test",
            "select location, count(*) from sensor_readings group by location",
        )
        .unwrap();
    assert!(query.collect().await.is_err());
}
