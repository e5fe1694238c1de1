//! Common fixtures for pipeline integration tests
#![allow(dead_code)]

use chrono::{Days, NaiveDate};
use riskfold_core::{PipelineConfig, Value};
use riskfold_store::{Column, ColumnType, MemoryStore, Table, TableRef};
use std::path::Path;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Five-month history cap with six-month sampling: two folds of one train date each
pub const SCENARIO_YAML: &str = r#"
temporal:
  max_train_history_months: 5
  min_train_history_months: 0
  absolute_train_start: 2019-01-01
  latest_validation_date: 2020-01-01
  train_sampling_freq_months: 6
  multiple_folds: 1
  fold_shift_months: 6

cohort:
  interval_back: 1 year
  jurisdictions:
    joco: [jocomedactemsruns]
    doco: [docolmhcservices]

labels:
  months_future: 6
  selected_labels: [ems_overdose]
  group_name: overdose
  definitions:
    - label_name: ems_overdose
      source_table: ems_runs
      date_column: run_date
      filters:
        - column: primary_impression
          op: eq
          value: OVERDOSE

features:
  demographics:
    from_table: client_demographics
    knowledge_date: known_date
    table_prefix: dem
    county: both
    features:
      categorical:
        sex:
          arg: sex
          impute_val: UNKNOWN
      numerical:
        age:
          arg: age
  ems:
    from_table: ems_runs
    knowledge_date: run_date
    table_prefix: ems
    county: joco
    features:
      agg:
        runs:
          agg_func: [COUNT]
          intervals: [1 year, 9999 months]

county: joco

models:
  - type: feature_ranker
    features: [ems_runs_count_1y]

parallel: true
nr_cores: 2
"#;

pub fn scenario_config(cache_dir: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::from_yaml(SCENARIO_YAML).unwrap();
    config.matrix.cache_dir = cache_dir.to_path_buf();
    config
}

fn table(columns: &[(&str, ColumnType)], rows: Vec<Vec<Value>>) -> Table {
    let mut table = Table::new(columns.iter().map(|(n, t)| Column::new(*n, *t)).collect());
    for row in rows {
        table.push_row(row).unwrap();
    }
    table
}

/// Source tables of the scenario.
///
/// People 1-7 are seen in Johnson county before every as-of date, person 8 in Douglas
/// county. Person `p` has `p` routine ambulance runs in mid 2018; overdose runs follow
/// for 6 and 7 in March 2019, 5 and 7 in September 2019, 6 and 7 in March 2020.
/// Person 7 has no demographics row.
pub async fn scenario_store() -> MemoryStore {
    let store = MemoryStore::new();

    let mut events = Vec::new();
    for person in 1..=8i64 {
        let source = if person == 8 { "docolmhcservices" } else { "jocomedactemsruns" };
        for day in [date(2018, 12, 1), date(2019, 6, 1), date(2019, 12, 1)] {
            events.push(vec![Value::from(person), Value::from(day), Value::from(source)]);
        }
    }
    store
        .insert_table(
            &TableRef::new("semantic", "client_events"),
            table(
                &[
                    ("joid", ColumnType::Integer),
                    ("event_date", ColumnType::Date),
                    ("source_table", ColumnType::Text),
                ],
                events,
            ),
        )
        .await
        .unwrap();

    let mut runs = Vec::new();
    for person in 1..=7i64 {
        for i in 0..person as u64 {
            let day = date(2018, 6, 1).checked_add_days(Days::new(20 * i)).unwrap();
            runs.push(vec![Value::from(person), Value::from(day), Value::from("FALL")]);
        }
    }
    for (person, day) in [
        (6, date(2019, 3, 1)),
        (7, date(2019, 3, 1)),
        (5, date(2019, 9, 1)),
        (7, date(2019, 9, 1)),
        (6, date(2020, 3, 1)),
        (7, date(2020, 3, 1)),
    ] {
        runs.push(vec![Value::from(person as i64), Value::from(day), Value::from("OVERDOSE")]);
    }
    store
        .insert_table(
            &TableRef::new("semantic", "ems_runs"),
            table(
                &[
                    ("joid", ColumnType::Integer),
                    ("run_date", ColumnType::Date),
                    ("primary_impression", ColumnType::Text),
                ],
                runs,
            ),
        )
        .await
        .unwrap();

    let demographics = (1..=6i64)
        .map(|person| {
            vec![
                Value::from(person),
                Value::from(date(2018, 1, 1)),
                Value::from(if person % 2 == 0 { "F" } else { "M" }),
                Value::from((20 + person) as f64),
            ]
        })
        .collect();
    store
        .insert_table(
            &TableRef::new("semantic", "client_demographics"),
            table(
                &[
                    ("joid", ColumnType::Integer),
                    ("known_date", ColumnType::Date),
                    ("sex", ColumnType::Text),
                    ("age", ColumnType::Float),
                ],
                demographics,
            ),
        )
        .await
        .unwrap();

    store
}
