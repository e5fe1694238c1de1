//! Unit tests for point-in-time feature computation
//!
//! Features at as-of date D must not change when source rows known after D change.

use chrono::{Days, NaiveDate};
use proptest::prelude::*;
use riskfold_core::{
    AggFeature, AggFunc, FeatureTableConfig, Interval, PersonDate, PipelineConfig, Value,
};
use riskfold_pipeline::features::compute_features;
use riskfold_store::{Column, ColumnType, Table};

const CONFIG: &str = r#"
temporal:
  max_train_history_months: 12
  absolute_train_start: 2019-01-01
  latest_validation_date: 2019-07-01
cohort:
  interval_back: 1 year
  jurisdictions:
    joco: [jocomedactemsruns]
labels:
  months_future: 6
  selected_labels: [ems_overdose]
  group_name: overdose
  definitions:
    - label_name: ems_overdose
      source_table: ems_runs
features:
  ems:
    from_table: ems_runs
    knowledge_date: run_date
    knowledge_lag: 7 days
    table_prefix: ems
    features:
      categorical:
        impression:
          arg: primary_impression
          impute_val: NONE
      numerical:
        minutes:
          arg: response_minutes
          impute_val: -1
      agg:
        runs:
          agg_func: [COUNT]
          intervals: [1 month, 1 year, 9999 months]
        minutes:
          agg_func: [SUM, MAX]
          agg_arg: response_minutes
          intervals: [6 months]
"#;

fn feature_config() -> FeatureTableConfig {
    PipelineConfig::from_yaml(CONFIG)
        .unwrap()
        .features
        .remove("ems")
        .unwrap()
}

fn base_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2018, 1, 1).unwrap()
}

fn as_of() -> NaiveDate {
    NaiveDate::from_ymd_opt(2019, 1, 1).unwrap()
}

/// (person, day offset from 2018-01-01, impression, minutes)
type Run = (i64, u64, usize, f64);

const IMPRESSIONS: [&str; 3] = ["FALL", "OVERDOSE", "CHEST PAIN"];

fn source(runs: &[Run]) -> Table {
    let mut table = Table::new(vec![
        Column::new("joid", ColumnType::Integer),
        Column::new("run_date", ColumnType::Date),
        Column::new("primary_impression", ColumnType::Text),
        Column::new("response_minutes", ColumnType::Float),
    ]);
    for &(person, offset, impression, minutes) in runs {
        table
            .push_row(vec![
                Value::from(person),
                Value::from(base_date().checked_add_days(Days::new(offset)).unwrap()),
                Value::from(IMPRESSIONS[impression]),
                Value::from(minutes),
            ])
            .unwrap();
    }
    table
}

fn run_strategy() -> impl Strategy<Value = Run> {
    (1i64..4, 0u64..730, 0usize..3, 1.0f64..60.0)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_features_ignore_rows_after_as_of_date(
        runs in prop::collection::vec(run_strategy(), 0..40),
        replacements in prop::collection::vec(run_strategy(), 40),
    ) {
        let config = feature_config();
        let cohort: Vec<PersonDate> = (1..4).map(|p| PersonDate::new(p, as_of())).collect();
        let as_of_offset = (as_of() - base_date()).num_days() as u64;

        // rewrite every row dated after D: new person, date (still after D), values
        let mutated: Vec<Run> = runs
            .iter()
            .zip(&replacements)
            .map(|(run, replacement)| {
                if run.1 > as_of_offset {
                    let offset = as_of_offset + 1 + replacement.1 % 365;
                    (replacement.0, offset, replacement.2, replacement.3)
                } else {
                    *run
                }
            })
            .collect();

        let original = compute_features("ems", &config, &source(&runs), &cohort).unwrap();
        let changed = compute_features("ems", &config, &source(&mutated), &cohort).unwrap();
        prop_assert_eq!(original, changed);
    }

    #[test]
    fn prop_rows_inside_knowledge_lag_are_invisible(
        runs in prop::collection::vec(run_strategy(), 0..40),
        lagged in prop::collection::vec((1i64..4, 0u64..7, 0usize..3, 1.0f64..60.0), 1..5),
    ) {
        let config = feature_config();
        let cohort: Vec<PersonDate> = (1..4).map(|p| PersonDate::new(p, as_of())).collect();
        let cutoff_offset = (as_of() - base_date()).num_days() as u64 - 7;

        // keep only rows known by the cutoff, then add rows known in (cutoff, D]
        let visible: Vec<Run> = runs.into_iter().filter(|r| r.1 <= cutoff_offset).collect();
        let mut with_lagged = visible.clone();
        with_lagged.extend(lagged.iter().map(|&(p, d, i, m)| (p, cutoff_offset + 1 + d, i, m)));

        let original = compute_features("ems", &config, &source(&visible), &cohort).unwrap();
        let changed = compute_features("ems", &config, &source(&with_lagged), &cohort).unwrap();
        prop_assert_eq!(original, changed);
    }
}

#[test]
fn test_impute_values_without_rows() {
    let config = feature_config();
    let cohort = vec![PersonDate::new(9, as_of())];
    let computed = compute_features("ems", &config, &source(&[]), &cohort).unwrap();

    let categorical = computed.categorical.unwrap();
    assert_eq!(categorical.rows[0][2], Value::from("NONE"));

    let numerical = computed.numerical.unwrap();
    let minutes = numerical.column_index("ems_minutes").unwrap();
    assert_eq!(numerical.rows[0][minutes].as_f64(), Some(-1.0));
    let runs = numerical.column_index("ems_runs_count_1y").unwrap();
    assert_eq!(numerical.rows[0][runs].as_f64(), Some(0.0));
}

#[test]
fn test_count_of_text_column_skips_nulls() {
    let mut config = feature_config();
    config.features.agg.insert(
        "impressions",
        AggFeature {
            agg_func: vec![AggFunc::Count],
            agg_arg: Some("primary_impression".to_string()),
            intervals: vec![Interval::years(1)],
            add_filter: Vec::new(),
        },
    );

    let mut table = source(&[(1, 200, 0, 10.0), (1, 300, 1, 12.0), (2, 250, 2, 8.0)]);
    table
        .push_row(vec![
            Value::from(1i64),
            Value::from(base_date().checked_add_days(Days::new(320)).unwrap()),
            Value::Null,
            Value::from(5.0),
        ])
        .unwrap();

    let cohort = vec![PersonDate::new(1, as_of()), PersonDate::new(2, as_of())];
    let numerical = compute_features("ems", &config, &table, &cohort)
        .unwrap()
        .numerical
        .unwrap();
    let count = numerical.column_index("ems_impressions_count_1y").unwrap();
    assert_eq!(numerical.rows[0][count].as_f64(), Some(2.0));
    assert_eq!(numerical.rows[1][count].as_f64(), Some(1.0));
}
