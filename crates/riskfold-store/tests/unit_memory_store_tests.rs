//! Unit tests for MemoryStore snapshots and table replacement

use chrono::NaiveDate;
use riskfold_core::{Filter, FilterOp, Value};
use riskfold_store::{Column, ColumnType, EventQuery, MemoryStore, Store, StoreError, Table, TableRef};
use std::io::Write;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

const SNAPSHOT: &str = r#"{
  "semantic": {
    "client_events": {
      "columns": [
        {"name": "joid", "type": "integer"},
        {"name": "event_date", "type": "date"},
        {"name": "source_table", "type": "text"}
      ],
      "rows": [
        [1, "2018-06-01", "jocomedactemsruns"],
        [2, "2018-11-15", "docolmhcservices"],
        [3, null, "jocomedactemsruns"]
      ]
    }
  }
}"#;

#[tokio::test]
async fn test_load_snapshot() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(SNAPSHOT.as_bytes()).unwrap();

    let store = MemoryStore::from_json_file(file.path()).await.unwrap();
    assert_eq!(
        store.list_tables("semantic").await.unwrap(),
        vec!["client_events"]
    );

    let query = EventQuery::new(
        TableRef::new("semantic", "client_events"),
        vec!["joid".to_string(), "event_date".to_string()],
        "event_date",
    )
    .on_or_before(date(2018, 12, 31));
    let events = store.fetch_events(&query).await.unwrap();

    assert_eq!(events.len(), 2);
    assert_eq!(events.rows[0][1], Value::Date(date(2018, 6, 1)));
}

#[tokio::test]
async fn test_snapshot_round_trip_through_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapshot.json");

    let store = MemoryStore::new();
    let mut table = Table::new(vec![
        Column::new("person_id", ColumnType::Integer),
        Column::new("as_of_date", ColumnType::Date),
    ]);
    table
        .push_row(vec![Value::from(1i64), Value::from(date(2019, 1, 1))])
        .unwrap();
    store
        .insert_table(&TableRef::new("modeling", "cohort"), table.clone())
        .await
        .unwrap();
    store.to_json_file(&path).await.unwrap();

    let loaded = MemoryStore::from_json_file(&path).await.unwrap();
    let read = loaded
        .read_table(&TableRef::new("modeling", "cohort"), &[])
        .await
        .unwrap();
    assert_eq!(read, table);
}

#[tokio::test]
async fn test_replace_table_rejects_duplicate_keys() {
    let store = MemoryStore::new();
    store.create_namespace("modeling").await.unwrap();

    let mut table = Table::new(vec![
        Column::new("person_id", ColumnType::Integer),
        Column::new("as_of_date", ColumnType::Date),
    ])
    .with_unique_key(&["person_id", "as_of_date"]);
    table
        .push_row(vec![Value::from(1i64), Value::from(date(2019, 1, 1))])
        .unwrap();
    table
        .push_row(vec![Value::from(1i64), Value::from(date(2019, 1, 1))])
        .unwrap();

    let result = store
        .replace_table(&TableRef::new("modeling", "cohort"), table)
        .await;
    assert!(matches!(result, Err(StoreError::DuplicateKey { .. })));
    assert!(store.list_tables("modeling").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_read_table_with_filters() {
    let store = MemoryStore::new();
    let mut table = Table::new(vec![
        Column::new("person_id", ColumnType::Integer),
        Column::new("as_of_date", ColumnType::Date),
    ]);
    for (id, d) in [(1i64, date(2019, 1, 1)), (2, date(2019, 7, 1)), (3, date(2020, 1, 1))] {
        table.push_row(vec![Value::from(id), Value::from(d)]).unwrap();
    }
    store
        .insert_table(&TableRef::new("modeling", "cohort"), table)
        .await
        .unwrap();

    let filters = vec![Filter::any_of(
        "as_of_date",
        vec![Value::from(date(2019, 1, 1)), Value::from(date(2020, 1, 1))],
    )];
    let read = store
        .read_table(&TableRef::new("modeling", "cohort"), &filters)
        .await
        .unwrap();
    assert_eq!(read.len(), 2);

    let filters = vec![Filter::new("person_id", FilterOp::Gt, 1.0)];
    let read = store
        .read_table(&TableRef::new("modeling", "cohort"), &filters)
        .await
        .unwrap();
    assert_eq!(read.len(), 2);
}

#[tokio::test]
async fn test_invalid_identifiers_are_rejected() {
    let store = MemoryStore::new();
    assert!(matches!(
        store.create_namespace("Modeling; --").await,
        Err(StoreError::InvalidIdentifier(_))
    ));

    store.create_namespace("modeling").await.unwrap();
    let table = Table::new(vec![Column::new("Person Id", ColumnType::Integer)]);
    assert!(matches!(
        store
            .replace_table(&TableRef::new("modeling", "cohort"), table)
            .await,
        Err(StoreError::InvalidIdentifier(_))
    ));
}
