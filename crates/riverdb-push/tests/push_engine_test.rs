//! End-to-end push tests: source ingest through aggregate maintenance.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use riverdb_cluster::{Cluster, ClusterBus, LocalCluster};
use riverdb_core::{
    encode_key_values, BusEncoding, ColumnType, Row, ShardType, Sharder, SourceInfo, TableInfo,
    TopicInfo, Value,
};
use riverdb_meta::MetaController;
use riverdb_push::engine::derive_mv_info;
use riverdb_push::{table, BusMessage, PushEngine};

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
    cluster: Arc<LocalCluster>,
    meta: Arc<MetaController>,
    engine: Arc<PushEngine>,
}

async fn fixture() -> Fixture {
    let bus = ClusterBus::new(1, NUM_SHARDS);
    let cluster = LocalCluster::new(0, bus);
    let meta = Arc::new(MetaController::new());
    let engine = PushEngine::new(
        cluster.clone() as Arc<dyn Cluster>,
        Arc::clone(&meta),
        Sharder::new(NUM_SHARDS),
        None,
    );
    cluster.register_shard_listener_factory(engine.listener_factory());
    engine.start();
    cluster.start().await.unwrap();
    Fixture {
        cluster,
        meta,
        engine,
    }
}

fn reading(sensor_id: i64, location: &str, temperature: f64) -> Row {
    Row::new(vec![
        Value::BigInt(sensor_id),
        Value::Varchar(location.to_string()),
        Value::Double(temperature),
    ])
}

fn shard_of_key(key_values: &[Value], table: &TableInfo) -> u64 {
    let mut key = Vec::new();
    encode_key_values(key_values, &table.column_types, &table.primary_key_cols, &mut key)
        .unwrap();
    Sharder::new(NUM_SHARDS).calculate_shard(ShardType::Hash, &key)
}

async fn wait_for_row(
    cluster: &Arc<LocalCluster>,
    table: &TableInfo,
    key: &[Value],
) -> Option<Row> {
    let shard = shard_of_key(key, table);
    for _ in 0..200 {
        if let Some(row) = table::lookup_in_pk(table, key, shard, cluster.as_ref())
            .await
            .unwrap()
        {
            return Some(row);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    None
}

#[tokio::test]
async fn test_source_rows_land_in_source_table() {
    let fx = fixture().await;
    let source = sensor_source(100);
    fx.meta.register_source(source.clone()).unwrap();
    fx.engine.create_source(&source).await.unwrap();
    fx.engine.start_source(100).await.unwrap();

    fx.engine
        .ingest_rows(100, vec![reading(1, "wincanton", 25.5)])
        .await
        .unwrap();

    let table_info = &source.table_info;
    let row = wait_for_row(&fx.cluster, table_info, &[Value::BigInt(1)]).await;
    assert_eq!(row, Some(reading(1, "wincanton", 25.5)));
}

#[tokio::test]
async fn test_message_ingestion_via_selectors() {
    let fx = fixture().await;
    let source = sensor_source(100);
    fx.meta.register_source(source.clone()).unwrap();
    fx.engine.create_source(&source).await.unwrap();
    fx.engine.start_source(100).await.unwrap();

    fx.engine
        .ingest_messages(
            100,
            &[BusMessage {
                value: Some(
                    br#"{"sensor_id": 7, "location": "london", "temperature": 17.25}"#.to_vec(),
                ),
                timestamp: 1,
                offset: 0,
                ..Default::default()
            }],
        )
        .await
        .unwrap();

    let row = wait_for_row(&fx.cluster, &source.table_info, &[Value::BigInt(7)]).await;
    assert_eq!(row, Some(reading(7, "london", 17.25)));
}

#[tokio::test]
async fn test_max_aggregate_view_maintains_filtered_groups() {
    let fx = fixture().await;
    let source = sensor_source(100);
    fx.meta.register_source(source.clone()).unwrap();
    fx.engine.create_source(&source).await.unwrap();

    let mv = derive_mv_info(
        &fx.meta,
        "test",
        "max_readings",
        "select sensor_id, max(temperature) from test.sensor_readings \
         where location = 'wincanton' group by sensor_id",
        101,
    )
    .unwrap();
    assert_eq!(mv.table_info.primary_key_cols, vec![0]);
    assert_eq!(mv.upstream_table_ids, vec![100]);
    fx.engine.create_materialized_view(&mv).await.unwrap();
    fx.meta.register_materialized_view(mv.clone()).unwrap();
    fx.engine.start_source(100).await.unwrap();

    fx.engine
        .ingest_rows(
            100,
            vec![
                reading(1, "wincanton", 25.5),
                reading(2, "london", 28.1),
                reading(3, "los angeles", 35.6),
            ],
        )
        .await
        .unwrap();

    let row = wait_for_row(&fx.cluster, &mv.table_info, &[Value::BigInt(1)]).await;
    assert_eq!(
        row,
        Some(Row::new(vec![Value::BigInt(1), Value::Double(25.5)]))
    );

    // Filtered-out locations never reach the aggregate.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let shard = shard_of_key(&[Value::BigInt(2)], &mv.table_info);
    let absent = table::lookup_in_pk(
        &mv.table_info,
        &[Value::BigInt(2)],
        shard,
        fx.cluster.as_ref(),
    )
    .await
    .unwrap();
    assert_eq!(absent, None);
}

#[tokio::test]
async fn test_max_folds_across_batches() {
    let fx = fixture().await;
    let source = sensor_source(100);
    fx.meta.register_source(source.clone()).unwrap();
    fx.engine.create_source(&source).await.unwrap();

    let mv = derive_mv_info(
        &fx.meta,
        "test",
        "max_readings",
        "select sensor_id, max(temperature) from test.sensor_readings group by sensor_id",
        101,
    )
    .unwrap();
    fx.engine.create_materialized_view(&mv).await.unwrap();
    fx.meta.register_materialized_view(mv.clone()).unwrap();
    fx.engine.start_source(100).await.unwrap();

    fx.engine
        .ingest_rows(100, vec![reading(1, "wincanton", 25.5)])
        .await
        .unwrap();
    fx.engine
        .ingest_rows(100, vec![reading(1, "wincanton", 31.0)])
        .await
        .unwrap();
    fx.engine
        .ingest_rows(100, vec![reading(1, "wincanton", 28.4)])
        .await
        .unwrap();

    // The max should settle at 31.0 regardless of batch boundaries.
    let mut latest = None;
    for _ in 0..200 {
        let shard = shard_of_key(&[Value::BigInt(1)], &mv.table_info);
        latest = table::lookup_in_pk(
            &mv.table_info,
            &[Value::BigInt(1)],
            shard,
            fx.cluster.as_ref(),
        )
        .await
        .unwrap();
        if latest
            .as_ref()
            .map(|r| r.get(1) == &Value::Double(31.0))
            .unwrap_or(false)
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(
        latest,
        Some(Row::new(vec![Value::BigInt(1), Value::Double(31.0)]))
    );
}

#[tokio::test]
async fn test_spurious_wakes_are_harmless() {
    let fx = fixture().await;
    let source = sensor_source(100);
    fx.meta.register_source(source.clone()).unwrap();
    fx.engine.create_source(&source).await.unwrap();
    fx.engine.start_source(100).await.unwrap();

    fx.engine
        .ingest_rows(100, vec![reading(1, "wincanton", 25.5)])
        .await
        .unwrap();
    for shard in fx.cluster.get_all_shard_ids() {
        fx.engine.wake_shard(shard);
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    let row = wait_for_row(&fx.cluster, &source.table_info, &[Value::BigInt(1)]).await;
    assert!(row.is_some());
}

#[tokio::test]
async fn test_projection_view_with_filter() {
    let fx = fixture().await;
    let source = sensor_source(100);
    fx.meta.register_source(source.clone()).unwrap();
    fx.engine.create_source(&source).await.unwrap();

    let mv = derive_mv_info(
        &fx.meta,
        "test",
        "hot_readings",
        "select sensor_id, temperature from test.sensor_readings where temperature > 30",
        101,
    )
    .unwrap();
    assert_eq!(mv.table_info.column_names, vec!["sensor_id", "temperature"]);
    fx.engine.create_materialized_view(&mv).await.unwrap();
    fx.meta.register_materialized_view(mv.clone()).unwrap();
    fx.engine.start_source(100).await.unwrap();

    fx.engine
        .ingest_rows(
            100,
            vec![reading(1, "wincanton", 25.5), reading(3, "los angeles", 35.6)],
        )
        .await
        .unwrap();

    let hot = wait_for_row(&fx.cluster, &mv.table_info, &[Value::BigInt(3)]).await;
    assert_eq!(
        hot,
        Some(Row::new(vec![Value::BigInt(3), Value::Double(35.6)]))
    );
    let cold_shard = shard_of_key(&[Value::BigInt(1)], &mv.table_info);
    let cold = table::lookup_in_pk(
        &mv.table_info,
        &[Value::BigInt(1)],
        cold_shard,
        fx.cluster.as_ref(),
    )
    .await
    .unwrap();
    assert_eq!(cold, None);
}

#[tokio::test]
async fn test_dropping_view_detaches_it() {
    let fx = fixture().await;
    let source = sensor_source(100);
    fx.meta.register_source(source.clone()).unwrap();
    fx.engine.create_source(&source).await.unwrap();

    let mv = derive_mv_info(
        &fx.meta,
        "test",
        "max_readings",
        "select sensor_id, max(temperature) from test.sensor_readings group by sensor_id",
        101,
    )
    .unwrap();
    fx.engine.create_materialized_view(&mv).await.unwrap();
    fx.meta.register_materialized_view(mv.clone()).unwrap();
    fx.engine.start_source(100).await.unwrap();

    fx.engine
        .ingest_rows(100, vec![reading(1, "wincanton", 25.5)])
        .await
        .unwrap();
    assert!(wait_for_row(&fx.cluster, &mv.table_info, &[Value::BigInt(1)])
        .await
        .is_some());

    fx.engine.remove_materialized_view(101).await.unwrap();
    fx.meta.unregister_materialized_view("test", "max_readings").unwrap();

    // New rows no longer flow into the dropped view.
    fx.engine
        .ingest_rows(100, vec![reading(9, "wincanton", 99.0)])
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let shard = shard_of_key(&[Value::BigInt(9)], &mv.table_info);
    let row = table::lookup_in_pk(
        &mv.table_info,
        &[Value::BigInt(9)],
        shard,
        fx.cluster.as_ref(),
    )
    .await
    .unwrap();
    assert_eq!(row, None);

    fx.engine.stop().await;
}
