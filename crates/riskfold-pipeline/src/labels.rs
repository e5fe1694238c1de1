//! Label builder
//!
//! The training label of a cohort entry `(person, D)` is true iff any selected label
//! definition has an event for that person in `(D, D + months_future]`. Labels are
//! only built for cohort entries whose county lies in the modeled jurisdiction.
//!
//! Split labels evaluate every definition on its own, either over the same window or
//! over an open window ending at an explicit observation date. The open window sees
//! past the label horizon, so split labels come back as [`EvaluationLabels`], which
//! no training entry point accepts.

use crate::cohort::Cohort;
use crate::MODELING_NAMESPACE;
use chrono::{Months, NaiveDate};
use riskfold_core::{
    label_tablename, County, Error, Filter, FilterOp, Fold, LabelDefinition, PersonDate,
    PipelineConfig, Result, Value,
};
use riskfold_store::{Column, ColumnType, EventQuery, Store, Table, TableRef};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Table of split labels over the validation window
pub const SPLIT_LABELS_TABLE: &str = "split_labels";

/// Table of split labels over the open window
pub const SPLIT_LABELS_ALL_TIME_TABLE: &str = "split_labels_all_time";

/// Label events of one definition per person, sorted by date
type EventIndex = HashMap<i64, Vec<(NaiveDate, Option<County>)>>;

/// Training labels of one label group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSet {
    /// Selected label names joined with `", "`
    pub label_name: String,

    pub labels: BTreeMap<PersonDate, (County, bool)>,
}

impl LabelSet {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn positives(&self) -> usize {
        self.labels.values().filter(|(_, label)| *label).count()
    }

    fn to_table(&self) -> Table {
        let mut table = label_table_layout().with_unique_key(&["person_id", "as_of_date", "county"]);
        table.rows = self
            .labels
            .iter()
            .map(|(key, (county, label))| {
                vec![
                    Value::from(key.person_id),
                    Value::from(key.as_of_date),
                    Value::from(county.as_str()),
                    Value::from(self.label_name.as_str()),
                    Value::from(*label),
                ]
            })
            .collect();
        table
    }
}

/// Training and validation labels of one fold
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FoldLabels {
    pub train: BTreeMap<PersonDate, bool>,
    pub validation: BTreeMap<PersonDate, bool>,
}

/// Window of a split label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "window", rename_all = "snake_case")]
pub enum SplitLabelWindow {
    /// `(D, D + months_future]`, as for training labels
    ValidationPeriod,

    /// `(D, observed_until)`; sees beyond the label horizon
    AnyFuture { observed_until: NaiveDate },
}

impl SplitLabelWindow {
    pub fn table_name(&self) -> &'static str {
        match self {
            SplitLabelWindow::ValidationPeriod => SPLIT_LABELS_TABLE,
            SplitLabelWindow::AnyFuture { .. } => SPLIT_LABELS_ALL_TIME_TABLE,
        }
    }
}

/// One definition evaluated for one cohort entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitLabel {
    pub key: PersonDate,
    pub county: County,
    pub label_name: String,
    pub label: bool,
}

/// Per-definition labels for offline analysis only
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationLabels {
    pub window: SplitLabelWindow,
    labels: Vec<SplitLabel>,
}

impl EvaluationLabels {
    pub fn labels(&self) -> &[SplitLabel] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    fn to_table(&self) -> Table {
        let mut table =
            label_table_layout().with_unique_key(&["person_id", "as_of_date", "label_name"]);
        table.rows = self
            .labels
            .iter()
            .map(|l| {
                vec![
                    Value::from(l.key.person_id),
                    Value::from(l.key.as_of_date),
                    Value::from(l.county.as_str()),
                    Value::from(l.label_name.as_str()),
                    Value::from(l.label),
                ]
            })
            .collect();
        table
    }
}

fn label_table_layout() -> Table {
    Table::new(vec![
        Column::new("person_id", ColumnType::Integer),
        Column::new("as_of_date", ColumnType::Date),
        Column::new("county", ColumnType::Text),
        Column::new("label_name", ColumnType::Text),
        Column::new("label", ColumnType::Bool),
    ])
}

/// Builds and persists label tables
pub struct LabelBuilder<'a> {
    store: &'a dyn Store,
    config: &'a PipelineConfig,
}

impl<'a> LabelBuilder<'a> {
    pub fn new(store: &'a dyn Store, config: &'a PipelineConfig) -> Self {
        Self { store, config }
    }

    /// Compute training labels for the in-scope cohort entries and overwrite
    /// `modeling.<label table>`
    pub async fn build(&self, cohort: &Cohort) -> Result<LabelSet> {
        let tablename = label_tablename(self.config)?;
        let definitions = self.config.labels.selected_definitions()?;
        let months_future = self.config.months_future();

        let entries: Vec<_> = cohort
            .iter()
            .filter(|e| self.config.county.includes(e.county))
            .collect();
        let dates = distinct_dates(entries.iter().map(|e| e.key.as_of_date));

        let latest_end = match dates.last() {
            Some(&latest) => Some(window_end(latest, months_future)?),
            None => None,
        };

        let mut indexes = Vec::with_capacity(definitions.len());
        for definition in &definitions {
            indexes.push(self.fetch_definition_events(definition, &dates, latest_end).await?);
        }

        let mut labels = BTreeMap::new();
        for entry in &entries {
            let upper = window_end(entry.key.as_of_date, months_future)?;
            let label = indexes.iter().any(|index| {
                has_event(index, entry.key.person_id, entry.county, entry.key.as_of_date, upper, true)
            });
            labels.insert(entry.key, (entry.county, label));
        }

        let set = LabelSet {
            label_name: self.config.labels.selected_labels.join(", "),
            labels,
        };

        self.store.create_namespace(MODELING_NAMESPACE).await?;
        self.store
            .replace_table(&TableRef::new(MODELING_NAMESPACE, tablename.as_str()), set.to_table())
            .await?;

        tracing::info!(
            table = %tablename,
            rows = set.len(),
            positives = set.positives(),
            "Built labels"
        );
        Ok(set)
    }

    /// Evaluate every label definition separately and overwrite the split label table
    /// of `window`
    pub async fn build_split_labels(
        &self,
        cohort: &Cohort,
        window: SplitLabelWindow,
    ) -> Result<EvaluationLabels> {
        let months_future = self.config.months_future();
        let entries: Vec<_> = cohort
            .iter()
            .filter(|e| self.config.county.includes(e.county))
            .collect();
        let dates = distinct_dates(entries.iter().map(|e| e.key.as_of_date));

        // (upper bound, whether it is inclusive)
        let bound = |date: NaiveDate| -> Result<(NaiveDate, bool)> {
            match window {
                SplitLabelWindow::ValidationPeriod => Ok((window_end(date, months_future)?, true)),
                SplitLabelWindow::AnyFuture { observed_until } => Ok((observed_until, false)),
            }
        };
        let latest_end = match dates.last() {
            Some(&latest) => match bound(latest)? {
                (upper, true) => Some(upper),
                (upper, false) => Some(upper.pred_opt().ok_or_else(|| {
                    Error::Config(format!("Observation date {} is out of range", upper))
                })?),
            },
            None => None,
        };

        let mut labels = Vec::new();
        for definition in &self.config.labels.definitions {
            let index = self
                .fetch_definition_events(definition, &dates, latest_end)
                .await?;
            for entry in &entries {
                let (upper, inclusive) = bound(entry.key.as_of_date)?;
                labels.push(SplitLabel {
                    key: entry.key,
                    county: entry.county,
                    label_name: definition.label_name.clone(),
                    label: has_event(
                        &index,
                        entry.key.person_id,
                        entry.county,
                        entry.key.as_of_date,
                        upper,
                        inclusive,
                    ),
                });
            }
        }

        let split = EvaluationLabels { window, labels };
        let table = TableRef::new(MODELING_NAMESPACE, window.table_name());
        self.store.create_namespace(MODELING_NAMESPACE).await?;
        self.store.replace_table(&table, split.to_table()).await?;

        tracing::info!(table = %table, rows = split.len(), "Built split labels");
        Ok(split)
    }

    /// Events of one definition after the earliest date and on or before `latest_end`
    async fn fetch_definition_events(
        &self,
        definition: &LabelDefinition,
        dates: &[NaiveDate],
        latest_end: Option<NaiveDate>,
    ) -> Result<EventIndex> {
        let mut index = EventIndex::new();
        let Some(&earliest) = dates.first() else {
            return Ok(index);
        };

        let mut columns = vec![definition.person_column.clone(), definition.date_column.clone()];
        if let Some(county_column) = &definition.county_column {
            columns.push(county_column.clone());
        }
        let mut query = EventQuery::new(
            TableRef::new(
                self.config.source_namespace.as_str(),
                definition.source_table.as_str(),
            ),
            columns,
            definition.date_column.as_str(),
        )
        .after(earliest)
        .with_filters(definition.filters.clone());
        if let Some(upper) = latest_end {
            query = query.on_or_before(upper);
        }

        let events = self.store.fetch_events(&query).await?;
        for row in &events.rows {
            let (Some(person), Some(date)) = (row[0].as_i64(), row[1].as_date()) else {
                continue;
            };
            let county = match definition.county_column {
                Some(_) => match row.get(2).and_then(Value::as_str).map(str::parse::<County>) {
                    Some(Ok(county)) => Some(county),
                    _ => continue,
                },
                None => None,
            };
            index.entry(person).or_default().push((date, county));
        }
        for events in index.values_mut() {
            events.sort();
        }

        tracing::debug!(
            label = %definition.label_name,
            events = events.len(),
            "Fetched label events"
        );
        Ok(index)
    }
}

fn distinct_dates(dates: impl Iterator<Item = NaiveDate>) -> Vec<NaiveDate> {
    let dates: BTreeSet<NaiveDate> = dates.collect();
    dates.into_iter().collect()
}

/// Last day of the label window of `as_of_date`
fn window_end(as_of_date: NaiveDate, months_future: u32) -> Result<NaiveDate> {
    as_of_date
        .checked_add_months(Months::new(months_future))
        .ok_or_else(|| {
            Error::Config(format!(
                "Label window of {} months after {} is out of range",
                months_future, as_of_date
            ))
        })
}

/// Whether `person` has an event after `as_of_date` and before `upper` (inclusive or
/// not). Events tagged with a county only count for entries of that county.
fn has_event(
    index: &EventIndex,
    person: i64,
    county: County,
    as_of_date: NaiveDate,
    upper: NaiveDate,
    inclusive: bool,
) -> bool {
    let Some(events) = index.get(&person) else {
        return false;
    };
    let start = events.partition_point(|(date, _)| *date <= as_of_date);
    events[start..]
        .iter()
        .take_while(|(date, _)| if inclusive { *date <= upper } else { *date < upper })
        .any(|(_, event_county)| event_county.map_or(true, |c| c == county))
}

/// Labels of one fold, split by the fold's train and validation dates.
///
/// Only rows of the modeled jurisdiction are read.
pub async fn load_labels(store: &dyn Store, config: &PipelineConfig, fold: &Fold) -> Result<FoldLabels> {
    let tablename = label_tablename(config)?;
    let counties: Vec<Value> = config
        .county
        .counties()
        .into_iter()
        .map(|c| Value::from(c.as_str()))
        .collect();
    let mut dates: Vec<Value> = fold.train_dates.iter().map(|d| Value::from(*d)).collect();
    dates.push(Value::from(fold.validation_date));

    let table = store
        .read_table(
            &TableRef::new(MODELING_NAMESPACE, tablename.as_str()),
            &[
                Filter::any_of("county", counties),
                Filter::any_of("as_of_date", dates),
            ],
        )
        .await?;

    let name = format!("{}.{}", MODELING_NAMESPACE, tablename);
    let person_idx = table.require_column(&name, "person_id")?;
    let date_idx = table.require_column(&name, "as_of_date")?;
    let label_idx = table.require_column(&name, "label")?;

    let train_dates: BTreeSet<NaiveDate> = fold.train_dates.iter().copied().collect();
    let mut labels = FoldLabels::default();
    for row in &table.rows {
        let Some(key) = Table::person_date(row, person_idx, date_idx) else {
            continue;
        };
        let label = row[label_idx]
            .as_bool()
            .ok_or_else(|| Error::MissingValues(format!("{}.label", name)))?;
        let target = if key.as_of_date == fold.validation_date {
            &mut labels.validation
        } else if train_dates.contains(&key.as_of_date) {
            &mut labels.train
        } else {
            continue;
        };
        if target.insert(key, label).is_some() {
            return Err(Error::DuplicateKey(key));
        }
    }

    tracing::debug!(
        validation_date = %fold.validation_date,
        train = labels.train.len(),
        validation = labels.validation.len(),
        "Loaded fold labels"
    );
    Ok(labels)
}

/// Positive split labels per as-of date for `label_names` in `county`.
///
/// With `distinct` a person counts once per date however many labels are positive.
pub async fn label_counts(
    store: &dyn Store,
    label_names: &[String],
    county: County,
    distinct: bool,
) -> Result<BTreeMap<NaiveDate, usize>> {
    let table = store
        .read_table(
            &TableRef::new(MODELING_NAMESPACE, SPLIT_LABELS_TABLE),
            &[
                Filter::any_of(
                    "label_name",
                    label_names.iter().map(|n| Value::from(n.as_str())).collect(),
                ),
                Filter::new("county", FilterOp::Eq, county.as_str()),
                Filter::new("label", FilterOp::Eq, true),
            ],
        )
        .await?;

    let name = format!("{}.{}", MODELING_NAMESPACE, SPLIT_LABELS_TABLE);
    let person_idx = table.require_column(&name, "person_id")?;
    let date_idx = table.require_column(&name, "as_of_date")?;

    let mut counts: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    let mut seen = BTreeSet::new();
    for row in &table.rows {
        let Some(key) = Table::person_date(row, person_idx, date_idx) else {
            continue;
        };
        if distinct && !seen.insert(key) {
            continue;
        }
        *counts.entry(key.as_of_date).or_default() += 1;
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn index(events: &[(i64, NaiveDate, Option<County>)]) -> EventIndex {
        let mut index = EventIndex::new();
        for (person, day, county) in events {
            index.entry(*person).or_default().push((*day, *county));
        }
        for events in index.values_mut() {
            events.sort();
        }
        index
    }

    #[test]
    fn test_window_bounds() {
        let index = index(&[
            (1, date(2019, 1, 1), None),
            (2, date(2019, 7, 1), None),
            (3, date(2019, 7, 2), None),
        ]);
        let as_of = date(2019, 1, 1);
        let upper = window_end(as_of, 6).unwrap();

        // an event on the as-of date is not in the future
        assert!(!has_event(&index, 1, County::Joco, as_of, upper, true));
        assert!(has_event(&index, 2, County::Joco, as_of, upper, true));
        assert!(!has_event(&index, 2, County::Joco, as_of, upper, false));
        assert!(!has_event(&index, 3, County::Joco, as_of, upper, true));
        assert!(has_event(&index, 3, County::Joco, as_of, date(2021, 1, 1), false));
    }

    #[test]
    fn test_county_tagged_events() {
        let index = index(&[(1, date(2019, 3, 1), Some(County::Doco))]);
        let as_of = date(2019, 1, 1);
        let upper = window_end(as_of, 6).unwrap();
        assert!(has_event(&index, 1, County::Doco, as_of, upper, true));
        assert!(!has_event(&index, 1, County::Joco, as_of, upper, true));
    }

    #[test]
    fn test_window_end_out_of_range_is_an_error() {
        assert_eq!(window_end(date(2019, 8, 31), 6).unwrap(), date(2020, 2, 29));
        assert!(matches!(window_end(NaiveDate::MAX, 6), Err(Error::Config(_))));
    }

    #[test]
    fn test_split_label_tables() {
        assert_eq!(SplitLabelWindow::ValidationPeriod.table_name(), "split_labels");
        let window = SplitLabelWindow::AnyFuture {
            observed_until: date(2021, 1, 1),
        };
        assert_eq!(window.table_name(), "split_labels_all_time");
    }
}
