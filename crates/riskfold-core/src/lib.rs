//! riskfold core - types shared by every pipeline stage
//!
//! This crate holds the pieces of the pipeline that do no I/O: the value and key
//! types, jurisdictions, calendar intervals, the typed YAML configuration and the
//! time splitter that turns temporal configuration into train/validation folds.

pub mod config;
pub mod error;
pub mod filter;
pub mod interval;
pub mod jurisdiction;
pub mod label_groups;
pub mod ordered_map;
pub mod time_splitter;
pub mod value;

// Re-export main types
pub use config::{
    AggFeature, AggFunc, CohortConfig, ColumnFeature, EvaluationConfig, FeatureSpecs,
    FeatureTableConfig, LabelDefinition, LabelsConfig, MatrixConfig, ModelKind, PipelineConfig,
    TemporalConfig,
};
pub use error::{Error, Result};
pub use filter::{Filter, FilterOp, FilterValue};
pub use interval::{Interval, IntervalUnit};
pub use jurisdiction::{County, Jurisdiction};
pub use ordered_map::OrderedMap;
pub use label_groups::{label_tablename, resolve_label_group, LABEL_GROUPS};
pub use time_splitter::{all_dates, compute_folds, train_and_validation_dates, Fold};
pub use value::{is_valid_identifier, PersonDate, Value};
