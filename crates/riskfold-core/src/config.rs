//! Pipeline configuration
//!
//! A run is described by one YAML document. Parsing only checks shapes; every
//! cross-field rule lives in [`PipelineConfig::validate`], which must succeed before
//! any stage touches the store.

use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::interval::Interval;
use crate::jurisdiction::{County, Jurisdiction};
use crate::label_groups::label_tablename;
use crate::ordered_map::OrderedMap;
use crate::value::{is_valid_identifier, Value};
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Root configuration document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Fold generation
    pub temporal: TemporalConfig,

    /// Namespace holding the cleaned source tables
    #[serde(default = "default_source_namespace")]
    pub source_namespace: String,

    /// Cohort eligibility
    pub cohort: CohortConfig,

    /// Outcome labels
    pub labels: LabelsConfig,

    /// Feature tables, keyed by output table name, in document order
    #[serde(default)]
    pub features: OrderedMap<FeatureTableConfig>,

    /// Matrix assembly and caching
    #[serde(default)]
    pub matrix: MatrixConfig,

    /// Jurisdiction the run models
    #[serde(default)]
    pub county: Jurisdiction,

    /// Models trained on every fold
    #[serde(default)]
    pub models: Vec<ModelKind>,

    /// Run model units on a worker pool
    #[serde(default)]
    pub parallel: bool,

    /// Worker pool size
    #[serde(default = "default_nr_cores")]
    pub nr_cores: usize,

    /// Top-k evaluation thresholds
    #[serde(default)]
    pub evaluation: EvaluationConfig,
}

/// Rolling-window fold parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporalConfig {
    pub max_train_history_months: u32,

    #[serde(default)]
    pub min_train_history_months: u32,

    pub absolute_train_start: NaiveDate,

    pub latest_validation_date: NaiveDate,

    #[serde(default = "default_sampling_freq")]
    pub train_sampling_freq_months: u32,

    /// Accepts `0`/`1` as well as booleans
    #[serde(default, deserialize_with = "bool_or_int")]
    pub multiple_folds: bool,

    #[serde(default)]
    pub fold_shift_months: u32,
}

/// Cohort eligibility
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CohortConfig {
    /// Lookback window for qualifying activity, e.g. `"5 years"`
    pub interval_back: Interval,

    /// Event table scanned for activity
    #[serde(default = "default_events_table")]
    pub events_table: String,

    #[serde(default = "default_person_column")]
    pub person_column: String,

    #[serde(default = "default_date_column")]
    pub date_column: String,

    /// Column naming the source table each event came from
    #[serde(default = "default_source_column")]
    pub source_column: String,

    /// Column holding the county of each event. When absent the county is
    /// derived from which jurisdiction lists the event's source table; when present
    /// an event only counts if that county's list also holds its source table.
    #[serde(default)]
    pub county_column: Option<String>,

    /// Source tables that never qualify a person
    #[serde(default)]
    pub excluded_tables: Vec<String>,

    /// Qualifying source tables per county
    #[serde(default)]
    pub jurisdictions: BTreeMap<County, Vec<String>>,
}

impl CohortConfig {
    /// County whose qualifying list contains `source_table`, if any.
    /// Excluded tables never qualify.
    pub fn county_of_source(&self, source_table: &str) -> Option<County> {
        if self.excluded_tables.iter().any(|t| t == source_table) {
            return None;
        }
        self.jurisdictions
            .iter()
            .find(|(_, tables)| tables.iter().any(|t| t == source_table))
            .map(|(county, _)| *county)
    }

    /// Whether `source_table` qualifies a person for `county`
    pub fn qualifies(&self, source_table: &str, county: County) -> bool {
        !self.excluded_tables.iter().any(|t| t == source_table)
            && self
                .jurisdictions
                .get(&county)
                .map_or(false, |tables| tables.iter().any(|t| t == source_table))
    }
}

/// Outcome labels
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelsConfig {
    /// Width of the label window after each as-of date
    pub months_future: u32,

    /// Label names unioned into the training label
    pub selected_labels: Vec<String>,

    /// Explicit group name; otherwise resolved from the built-in label groups
    #[serde(default)]
    pub group_name: Option<String>,

    #[serde(default)]
    pub definitions: Vec<LabelDefinition>,
}

impl LabelsConfig {
    pub fn definition(&self, label_name: &str) -> Option<&LabelDefinition> {
        self.definitions.iter().find(|d| d.label_name == label_name)
    }

    /// Definitions of the selected labels, in selection order
    pub fn selected_definitions(&self) -> Result<Vec<&LabelDefinition>> {
        self.selected_labels
            .iter()
            .map(|name| {
                self.definition(name)
                    .ok_or_else(|| Error::Config(format!("Label '{}' is not defined", name)))
            })
            .collect()
    }
}

/// One event-type label: the qualifying rows of a source table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelDefinition {
    pub label_name: String,

    pub source_table: String,

    #[serde(default = "default_person_column")]
    pub person_column: String,

    #[serde(default = "default_date_column")]
    pub date_column: String,

    /// When set, an event only counts for cohort entries of the same county
    #[serde(default)]
    pub county_column: Option<String>,

    #[serde(default)]
    pub filters: Vec<Filter>,
}

/// Feature source table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureTableConfig {
    /// Source table; defaults to the feature table's own name
    #[serde(default)]
    pub from_table: Option<String>,

    #[serde(default = "default_person_column")]
    pub person_column: String,

    /// Column recording when each fact became known
    pub knowledge_date: String,

    /// Extra reporting delay subtracted from the as-of date
    #[serde(default)]
    pub knowledge_lag: Option<Interval>,

    /// Prefix of every derived column name
    pub table_prefix: String,

    /// Jurisdiction this source covers
    #[serde(default)]
    pub county: Jurisdiction,

    /// Value of aggregates over windows without rows
    #[serde(default)]
    pub impute_agg: f64,

    #[serde(default)]
    pub features: FeatureSpecs,
}

impl FeatureTableConfig {
    pub fn source_table<'a>(&'a self, name: &'a str) -> &'a str {
        self.from_table.as_deref().unwrap_or(name)
    }

    pub fn categorical_columns(&self) -> Vec<String> {
        self.features
            .categorical
            .keys()
            .map(|prefix| format!("{}_{}", self.table_prefix, prefix))
            .collect()
    }

    /// Numerical columns followed by aggregate columns
    pub fn numerical_columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = self
            .features
            .numerical
            .keys()
            .map(|prefix| format!("{}_{}", self.table_prefix, prefix))
            .collect();
        for (prefix, agg) in &self.features.agg {
            for name in agg.column_names(&self.table_prefix, prefix) {
                columns.push(name);
            }
        }
        columns
    }

    /// Every source column the definitions read
    pub fn source_columns(&self) -> BTreeSet<String> {
        let mut columns = BTreeSet::new();
        columns.insert(self.person_column.clone());
        columns.insert(self.knowledge_date.clone());
        for feature in self
            .features
            .categorical
            .values()
            .chain(self.features.numerical.values())
        {
            columns.insert(feature.arg.clone());
            columns.extend(feature.filter.iter().map(|f| f.column.clone()));
        }
        for agg in self.features.agg.values() {
            columns.extend(agg.agg_arg.iter().cloned());
            columns.extend(agg.add_filter.iter().map(|f| f.column.clone()));
        }
        columns
    }
}

/// Feature definitions of one source table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureSpecs {
    #[serde(default)]
    pub categorical: OrderedMap<ColumnFeature>,

    #[serde(default)]
    pub numerical: OrderedMap<ColumnFeature>,

    #[serde(default)]
    pub agg: OrderedMap<AggFeature>,
}

/// Latest known value of a source column
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnFeature {
    /// Source column
    pub arg: String,

    #[serde(default)]
    pub filter: Vec<Filter>,

    /// Value used when no row is known
    #[serde(default)]
    pub impute_val: Value,
}

/// Statistics of a source column over trailing windows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggFeature {
    pub agg_func: Vec<AggFunc>,

    /// Aggregated column; `None` counts rows
    #[serde(default)]
    pub agg_arg: Option<String>,

    pub intervals: Vec<Interval>,

    #[serde(default)]
    pub add_filter: Vec<Filter>,
}

impl AggFeature {
    /// `<table_prefix>_<prefix>_<func>_<interval>` for every function and interval
    pub fn column_names(&self, table_prefix: &str, prefix: &str) -> Vec<String> {
        let mut names = Vec::with_capacity(self.agg_func.len() * self.intervals.len());
        for func in &self.agg_func {
            for interval in &self.intervals {
                names.push(func.column_name(table_prefix, prefix, interval));
            }
        }
        names
    }
}

/// Aggregate functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggFunc {
    #[serde(alias = "SUM")]
    Sum,
    #[serde(alias = "AVG", alias = "mean")]
    Avg,
    #[serde(alias = "COUNT")]
    Count,
    #[serde(alias = "MIN")]
    Min,
    #[serde(alias = "MAX")]
    Max,
}

impl AggFunc {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggFunc::Sum => "sum",
            AggFunc::Avg => "avg",
            AggFunc::Count => "count",
            AggFunc::Min => "min",
            AggFunc::Max => "max",
        }
    }

    pub fn column_name(&self, table_prefix: &str, prefix: &str, interval: &Interval) -> String {
        format!(
            "{}_{}_{}_{}",
            table_prefix,
            prefix,
            self.as_str(),
            interval.short_name()
        )
    }
}

/// Matrix assembly
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixConfig {
    /// Directory of cached master and fold artifacts
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// The one numerical column allowed to hold nulls; imputed with the train mean
    #[serde(default = "default_mean_impute_column")]
    pub mean_impute_column: String,
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            mean_impute_column: default_mean_impute_column(),
        }
    }
}

/// Supported model kinds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelKind {
    /// Ranks by a lexicographic ordering of features; a `__flip__` prefix reverses one
    FeatureRanker { features: Vec<String> },

    /// Ranks by a weighted sum of features
    LinearRanker {
        features: Vec<String>,
        weights: Vec<f64>,
    },
}

impl ModelKind {
    pub fn name(&self) -> &'static str {
        match self {
            ModelKind::FeatureRanker { .. } => "FeatureRanker",
            ModelKind::LinearRanker { .. } => "LinearRanker",
        }
    }
}

/// Top-k evaluation thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationConfig {
    #[serde(default = "default_k")]
    pub k: usize,

    #[serde(default = "default_joco_k")]
    pub joco_k: usize,

    #[serde(default = "default_doco_k")]
    pub doco_k: usize,
}

impl EvaluationConfig {
    pub fn county_k(&self, county: County) -> usize {
        match county {
            County::Joco => self.joco_k,
            County::Doco => self.doco_k,
        }
    }
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            joco_k: default_joco_k(),
            doco_k: default_doco_k(),
        }
    }
}

fn default_source_namespace() -> String {
    "semantic".to_string()
}

fn default_nr_cores() -> usize {
    4
}

fn default_sampling_freq() -> u32 {
    6
}

fn default_events_table() -> String {
    "client_events".to_string()
}

fn default_person_column() -> String {
    "joid".to_string()
}

fn default_date_column() -> String {
    "event_date".to_string()
}

fn default_source_column() -> String {
    "source_table".to_string()
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("matrices")
}

fn default_mean_impute_column() -> String {
    "dem_age".to_string()
}

fn default_k() -> usize {
    115
}

fn default_joco_k() -> usize {
    75
}

fn default_doco_k() -> usize {
    40
}

fn bool_or_int<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => Ok(b),
        Flag::Int(0) => Ok(false),
        Flag::Int(1) => Ok(true),
        Flag::Int(n) => Err(serde::de::Error::custom(format!(
            "expected 0, 1 or a boolean, got {}",
            n
        ))),
    }
}

impl PipelineConfig {
    /// Parse a YAML document without validating it
    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Read, parse and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_yaml(&content)?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "Loaded pipeline configuration");
        Ok(config)
    }

    pub fn months_future(&self) -> u32 {
        self.labels.months_future
    }

    /// Feature tables relevant to the modeled jurisdiction
    pub fn feature_tables(&self) -> impl Iterator<Item = (&String, &FeatureTableConfig)> {
        self.features
            .iter()
            .filter(move |(_, table)| self.county.admits(table.county))
    }

    /// Check every cross-field rule. Errors here are fatal for the run.
    pub fn validate(&self) -> Result<()> {
        self.validate_temporal()?;
        self.validate_cohort()?;
        self.validate_labels()?;
        self.validate_features()?;
        self.validate_models()?;
        Ok(())
    }

    fn validate_temporal(&self) -> Result<()> {
        let t = &self.temporal;
        if t.latest_validation_date < t.absolute_train_start {
            return Err(Error::InvalidDateOrder {
                absolute_train_start: t.absolute_train_start,
                latest_validation_date: t.latest_validation_date,
            });
        }
        if t.train_sampling_freq_months == 0 {
            return Err(Error::Config(
                "train_sampling_freq_months must be positive".to_string(),
            ));
        }
        if t.multiple_folds && t.fold_shift_months == 0 {
            return Err(Error::Config(
                "fold_shift_months must be positive when multiple_folds is set".to_string(),
            ));
        }
        Ok(())
    }

    fn validate_cohort(&self) -> Result<()> {
        let c = &self.cohort;
        check_identifier("source_namespace", &self.source_namespace)?;
        check_identifier("cohort.events_table", &c.events_table)?;
        check_identifier("cohort.person_column", &c.person_column)?;
        check_identifier("cohort.date_column", &c.date_column)?;
        check_identifier("cohort.source_column", &c.source_column)?;
        if let Some(column) = &c.county_column {
            check_identifier("cohort.county_column", column)?;
        }
        if c.jurisdictions.values().all(|tables| tables.is_empty()) {
            return Err(Error::Config(
                "cohort.jurisdictions lists no qualifying source tables".to_string(),
            ));
        }
        Ok(())
    }

    fn validate_labels(&self) -> Result<()> {
        let l = &self.labels;
        if l.selected_labels.is_empty() {
            return Err(Error::Config("labels.selected_labels is empty".to_string()));
        }
        let mut seen = BTreeSet::new();
        for definition in &l.definitions {
            if !seen.insert(definition.label_name.as_str()) {
                return Err(Error::Config(format!(
                    "Label '{}' is defined more than once",
                    definition.label_name
                )));
            }
            check_identifier("labels.source_table", &definition.source_table)?;
            check_identifier("labels.person_column", &definition.person_column)?;
            check_identifier("labels.date_column", &definition.date_column)?;
            if let Some(column) = &definition.county_column {
                check_identifier("labels.county_column", column)?;
            }
            for filter in &definition.filters {
                check_identifier("labels.filters.column", &filter.column)?;
            }
        }
        l.selected_definitions()?;
        label_tablename(self)?;
        Ok(())
    }

    fn validate_features(&self) -> Result<()> {
        let mut categorical = BTreeSet::new();
        let mut numerical = BTreeSet::new();

        for (name, table) in &self.features {
            check_identifier("features table name", name)?;
            check_identifier("features.from_table", table.source_table(name))?;
            check_identifier("features.table_prefix", &table.table_prefix)?;
            for column in table.source_columns() {
                check_identifier("features column", &column)?;
            }
            for (prefix, agg) in &table.features.agg {
                if agg.agg_func.is_empty() || agg.intervals.is_empty() {
                    return Err(Error::Config(format!(
                        "Aggregate feature '{}' in '{}' needs at least one function and interval",
                        prefix, name
                    )));
                }
                let sums_rows = agg
                    .agg_func
                    .iter()
                    .any(|f| !matches!(f, AggFunc::Count));
                if sums_rows && agg.agg_arg.is_none() {
                    return Err(Error::Config(format!(
                        "Aggregate feature '{}' in '{}' needs agg_arg",
                        prefix, name
                    )));
                }
            }

            for column in table.categorical_columns() {
                check_identifier("feature column", &column)?;
                if !categorical.insert(column.clone()) {
                    return Err(Error::Config(format!(
                        "Feature column '{}' is produced by more than one definition",
                        column
                    )));
                }
            }
            for column in table.numerical_columns() {
                check_identifier("feature column", &column)?;
                if !numerical.insert(column.clone()) {
                    return Err(Error::Config(format!(
                        "Feature column '{}' is produced by more than one definition",
                        column
                    )));
                }
            }
        }

        let ambiguous: Vec<String> = categorical.intersection(&numerical).cloned().collect();
        if !ambiguous.is_empty() {
            return Err(Error::AmbiguousColumns(ambiguous));
        }
        Ok(())
    }

    fn validate_models(&self) -> Result<()> {
        for model in &self.models {
            match model {
                ModelKind::FeatureRanker { features } if features.is_empty() => {
                    return Err(Error::Config("FeatureRanker needs features".to_string()));
                }
                ModelKind::LinearRanker { features, weights } if features.len() != weights.len() => {
                    return Err(Error::Config(format!(
                        "LinearRanker has {} features but {} weights",
                        features.len(),
                        weights.len()
                    )));
                }
                _ => {}
            }
        }
        if self.parallel && self.nr_cores == 0 {
            return Err(Error::Config("nr_cores must be positive".to_string()));
        }
        Ok(())
    }

    /// Serialized upstream definitions; any change yields new cache keys
    pub fn schema_source(&self) -> Result<String> {
        #[derive(Serialize)]
        struct Upstream<'a> {
            source_namespace: &'a str,
            cohort: &'a CohortConfig,
            labels: &'a LabelsConfig,
            features: &'a OrderedMap<FeatureTableConfig>,
            mean_impute_column: &'a str,
        }

        Ok(serde_json::to_string(&Upstream {
            source_namespace: &self.source_namespace,
            cohort: &self.cohort,
            labels: &self.labels,
            features: &self.features,
            mean_impute_column: &self.matrix.mean_impute_column,
        })?)
    }
}

fn check_identifier(what: &str, name: &str) -> Result<()> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(Error::Config(format!("Invalid identifier for {}: '{}'", what, name)))
    }
}
