//! Unit tests for PipelineConfig parsing and validation

use chrono::NaiveDate;
use riskfold_core::{
    label_tablename, Error, FilterOp, Interval, Jurisdiction, ModelKind, PipelineConfig,
};

const BASE: &str = r#"
temporal:
  max_train_history_months: 12
  absolute_train_start: 2019-01-01
  latest_validation_date: 2020-01-01
  multiple_folds: 1
  fold_shift_months: 6
cohort:
  interval_back: 5 years
  jurisdictions:
    joco: [jocomedactemsruns]
labels:
  months_future: 6
  selected_labels: [DEATH BY SUICIDE, DEATH BY OVERDOSE]
  definitions:
    - label_name: DEATH BY SUICIDE
      source_table: me_deaths
      filters:
        - column: manner
          op: eq
          value: SUICIDE
    - label_name: DEATH BY OVERDOSE
      source_table: me_deaths
county: joco
"#;

fn with_features(features: &str) -> String {
    format!("{}features:\n{}", BASE, features)
}

#[test]
fn test_parse_minimal_config_with_defaults() -> anyhow::Result<()> {
    let config = PipelineConfig::from_yaml(BASE)?;
    config.validate()?;

    assert_eq!(
        config.temporal.absolute_train_start,
        NaiveDate::from_ymd_opt(2019, 1, 1).unwrap()
    );
    assert!(config.temporal.multiple_folds);
    assert_eq!(config.cohort.interval_back, Interval::years(5));
    assert_eq!(config.cohort.events_table, "client_events");
    assert_eq!(config.cohort.person_column, "joid");
    assert_eq!(config.county, Jurisdiction::Joco);
    assert_eq!(config.matrix.mean_impute_column, "dem_age");
    assert_eq!(config.evaluation.k, 115);
    assert_eq!(config.evaluation.joco_k, 75);
    assert_eq!(config.evaluation.doco_k, 40);
    assert_eq!(config.labels.definitions[0].filters[0].op, FilterOp::Eq);
    assert!(config.features.is_empty());
    Ok(())
}

#[test]
fn test_label_tablename_from_group() -> anyhow::Result<()> {
    let config = PipelineConfig::from_yaml(BASE)?;
    assert_eq!(label_tablename(&config)?, "label_death_only_joco");
    Ok(())
}

#[test]
fn test_unknown_label_group_is_rejected() {
    let yaml = BASE.replace(
        "selected_labels: [DEATH BY SUICIDE, DEATH BY OVERDOSE]",
        "selected_labels: [DEATH BY SUICIDE]",
    );
    let config = PipelineConfig::from_yaml(&yaml).unwrap();
    assert!(matches!(config.validate(), Err(Error::UnknownLabelGroup(_))));
}

#[test]
fn test_explicit_group_name_wins() {
    let yaml = BASE.replace(
        "selected_labels: [DEATH BY SUICIDE, DEATH BY OVERDOSE]",
        "selected_labels: [DEATH BY SUICIDE]\n  group_name: Suicide deaths",
    );
    let config = PipelineConfig::from_yaml(&yaml).unwrap();
    config.validate().unwrap();
    assert_eq!(label_tablename(&config).unwrap(), "label_suicide_deaths_joco");
}

#[test]
fn test_undefined_selected_label() {
    let yaml = BASE.replace("    - label_name: DEATH BY OVERDOSE\n      source_table: me_deaths\n", "");
    let config = PipelineConfig::from_yaml(&yaml).unwrap();
    assert!(matches!(config.validate(), Err(Error::Config(_))));
}

#[test]
fn test_invalid_date_order() {
    let yaml = BASE.replace("latest_validation_date: 2020-01-01", "latest_validation_date: 2018-01-01");
    let config = PipelineConfig::from_yaml(&yaml).unwrap();
    assert!(matches!(
        config.validate(),
        Err(Error::InvalidDateOrder { .. })
    ));
}

#[test]
fn test_ambiguous_columns() {
    let yaml = with_features(
        r#"
  demographics:
    knowledge_date: known_date
    table_prefix: dem
    features:
      categorical:
        age:
          arg: age_bucket
      numerical:
        age:
          arg: age
"#,
    );
    let config = PipelineConfig::from_yaml(&yaml).unwrap();
    match config.validate() {
        Err(Error::AmbiguousColumns(columns)) => assert_eq!(columns, vec!["dem_age"]),
        other => panic!("expected AmbiguousColumns, got {:?}", other),
    }
}

#[test]
fn test_identifier_injection_is_rejected() {
    let yaml = with_features(
        r#"
  ems:
    from_table: "ems_runs; drop table modeling.cohort"
    knowledge_date: run_date
    table_prefix: ems
"#,
    );
    let config = PipelineConfig::from_yaml(&yaml).unwrap();
    assert!(matches!(config.validate(), Err(Error::Config(_))));
}

#[test]
fn test_feature_column_names() {
    let yaml = with_features(
        r#"
  ems:
    from_table: ems_runs
    knowledge_date: run_date
    knowledge_lag: 7 days
    table_prefix: ems
    features:
      categorical:
        disposition:
          arg: disposition
          impute_val: NONE
      agg:
        runs:
          agg_func: [COUNT, SUM]
          agg_arg: patients
          intervals: [7 days, 9999 months]
"#,
    );
    let config = PipelineConfig::from_yaml(&yaml).unwrap();
    config.validate().unwrap();

    let ems = config.features.get("ems").unwrap();
    assert_eq!(ems.source_table("ems"), "ems_runs");
    assert_eq!(ems.knowledge_lag, Some(Interval::days(7)));
    assert_eq!(ems.categorical_columns(), vec!["ems_disposition"]);
    assert_eq!(
        ems.numerical_columns(),
        vec![
            "ems_runs_count_7d",
            "ems_runs_count_9999m",
            "ems_runs_sum_7d",
            "ems_runs_sum_9999m"
        ]
    );
}

#[test]
fn test_feature_order_follows_document() {
    let yaml = with_features(
        r#"
  ems:
    knowledge_date: run_date
    table_prefix: ems
    features:
      numerical:
        zone:
          arg: zone
        age:
          arg: age
  demographics:
    knowledge_date: known_date
    table_prefix: dem
    features:
      categorical:
        sex:
          arg: sex
        race:
          arg: race
"#,
    );
    let config = PipelineConfig::from_yaml(&yaml).unwrap();
    config.validate().unwrap();

    let tables: Vec<&str> = config.features.keys().map(String::as_str).collect();
    assert_eq!(tables, vec!["ems", "demographics"]);
    let ems = config.features.get("ems").unwrap();
    assert_eq!(ems.numerical_columns(), vec!["ems_zone", "ems_age"]);
    let demographics = config.features.get("demographics").unwrap();
    assert_eq!(demographics.categorical_columns(), vec!["dem_sex", "dem_race"]);
}

#[test]
fn test_agg_without_argument_needs_count() {
    let yaml = with_features(
        r#"
  ems:
    knowledge_date: run_date
    table_prefix: ems
    features:
      agg:
        runs:
          agg_func: [SUM]
          intervals: [7 days]
"#,
    );
    let config = PipelineConfig::from_yaml(&yaml).unwrap();
    assert!(matches!(config.validate(), Err(Error::Config(_))));
}

#[test]
fn test_model_kinds() {
    let yaml = format!(
        "{}models:\n  - type: feature_ranker\n    features: [a, __flip__b]\n  - type: linear_ranker\n    features: [a, b]\n    weights: [1.0]\n",
        BASE
    );
    let config = PipelineConfig::from_yaml(&yaml).unwrap();
    assert_eq!(
        config.models[0],
        ModelKind::FeatureRanker {
            features: vec!["a".to_string(), "__flip__b".to_string()]
        }
    );
    assert!(matches!(config.validate(), Err(Error::Config(_))));
}

#[test]
fn test_schema_source_tracks_upstream_definitions() {
    let a = PipelineConfig::from_yaml(BASE).unwrap();
    let b = PipelineConfig::from_yaml(&BASE.replace("value: SUICIDE", "value: HOMICIDE")).unwrap();
    let c = PipelineConfig::from_yaml(&BASE.replace("county: joco", "county: both")).unwrap();

    assert_ne!(a.schema_source().unwrap(), b.schema_source().unwrap());
    assert_eq!(a.schema_source().unwrap(), c.schema_source().unwrap());
}

#[test]
fn test_sample_config_is_valid() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../configs/sample.yaml");
    let config = PipelineConfig::load(path).unwrap();
    assert_eq!(config.models.len(), 2);
    assert_eq!(config.feature_tables().count(), 2);
}
