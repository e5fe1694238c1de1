//! Cohort builder
//!
//! A person enters the cohort on an as-of date D when they have at least one event in
//! a qualifying source table within `(D - interval_back, D]`. Source tables qualify per
//! county; excluded tables never qualify. The entry's county is the county of the most
//! recent qualifying event (ties resolve to the first county in [`County::ALL`]).

use crate::MODELING_NAMESPACE;
use chrono::NaiveDate;
use riskfold_core::{County, PersonDate, PipelineConfig, Result, Value};
use riskfold_store::{Column, ColumnType, EventQuery, Store, Table, TableRef};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Name of the persisted cohort table
pub const COHORT_TABLE: &str = "cohort";

/// One training or scoring instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CohortEntry {
    pub key: PersonDate,
    pub county: County,
}

/// Set of cohort entries, unique per `(person_id, as_of_date)`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cohort {
    entries: BTreeMap<PersonDate, County>,
}

impl Cohort {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn county(&self, key: &PersonDate) -> Option<County> {
        self.entries.get(key).copied()
    }

    pub fn contains(&self, key: &PersonDate) -> bool {
        self.entries.contains_key(key)
    }

    /// Entries in key order
    pub fn iter(&self) -> impl Iterator<Item = CohortEntry> + '_ {
        self.entries
            .iter()
            .map(|(key, county)| CohortEntry { key: *key, county: *county })
    }

    pub fn keys(&self) -> impl Iterator<Item = &PersonDate> {
        self.entries.keys()
    }

    /// Distinct as-of dates, ascending
    pub fn dates(&self) -> Vec<NaiveDate> {
        let dates: BTreeSet<NaiveDate> = self.entries.keys().map(|k| k.as_of_date).collect();
        dates.into_iter().collect()
    }

    /// Entries whose as-of date is one of `dates`
    pub fn restrict_to_dates(&self, dates: &BTreeSet<NaiveDate>) -> Cohort {
        Cohort {
            entries: self
                .entries
                .iter()
                .filter(|(key, _)| dates.contains(&key.as_of_date))
                .map(|(key, county)| (*key, *county))
                .collect(),
        }
    }

    fn to_table(&self) -> Table {
        let mut table = Table::new(vec![
            Column::new("person_id", ColumnType::Integer),
            Column::new("as_of_date", ColumnType::Date),
            Column::new("county", ColumnType::Text),
        ])
        .with_unique_key(&["person_id", "as_of_date"]);
        table.rows = self
            .iter()
            .map(|entry| {
                vec![
                    Value::from(entry.key.person_id),
                    Value::from(entry.key.as_of_date),
                    Value::from(entry.county.as_str()),
                ]
            })
            .collect();
        table
    }

    fn from_table(table: &Table) -> Result<Self> {
        let name = format!("{}.{}", MODELING_NAMESPACE, COHORT_TABLE);
        let person_idx = table.require_column(&name, "person_id")?;
        let date_idx = table.require_column(&name, "as_of_date")?;
        let county_idx = table.require_column(&name, "county")?;

        let mut entries = BTreeMap::new();
        for row in &table.rows {
            let key = Table::person_date(row, person_idx, date_idx).ok_or_else(|| {
                riskfold_core::Error::MissingValues(format!("{} key", name))
            })?;
            let county = row[county_idx]
                .as_str()
                .and_then(|s| s.parse::<County>().ok())
                .ok_or_else(|| riskfold_core::Error::MissingValues(format!("{}.county", name)))?;
            if entries.insert(key, county).is_some() {
                return Err(riskfold_core::Error::DuplicateKey(key));
            }
        }
        Ok(Self { entries })
    }
}

impl FromIterator<CohortEntry> for Cohort {
    fn from_iter<I: IntoIterator<Item = CohortEntry>>(iter: I) -> Self {
        Cohort {
            entries: iter.into_iter().map(|e| (e.key, e.county)).collect(),
        }
    }
}

/// Builds and persists the cohort table
pub struct CohortBuilder<'a> {
    store: &'a dyn Store,
    config: &'a PipelineConfig,
}

impl<'a> CohortBuilder<'a> {
    pub fn new(store: &'a dyn Store, config: &'a PipelineConfig) -> Self {
        Self { store, config }
    }

    /// Compute the cohort for `as_of_dates` and overwrite `modeling.cohort`
    pub async fn build(&self, as_of_dates: &[NaiveDate]) -> Result<Cohort> {
        let cohort = self.compute(as_of_dates).await?;

        self.store.create_namespace(MODELING_NAMESPACE).await?;
        self.store
            .replace_table(&TableRef::new(MODELING_NAMESPACE, COHORT_TABLE), cohort.to_table())
            .await?;

        tracing::info!(
            entries = cohort.len(),
            dates = as_of_dates.len(),
            "Built cohort"
        );
        Ok(cohort)
    }

    /// Compute the cohort without persisting it
    pub async fn compute(&self, as_of_dates: &[NaiveDate]) -> Result<Cohort> {
        let (Some(&earliest), Some(&latest)) =
            (as_of_dates.iter().min(), as_of_dates.iter().max())
        else {
            return Ok(Cohort::default());
        };

        let c = &self.config.cohort;
        let mut columns = vec![
            c.person_column.clone(),
            c.date_column.clone(),
            c.source_column.clone(),
        ];
        if let Some(county_column) = &c.county_column {
            columns.push(county_column.clone());
        }

        let mut query = EventQuery::new(
            TableRef::new(self.config.source_namespace.as_str(), c.events_table.as_str()),
            columns,
            c.date_column.as_str(),
        )
        .on_or_before(latest);
        if let Some(lower) = c.interval_back.before(earliest) {
            query = query.after(lower);
        }

        let events = self.store.fetch_events(&query).await?;
        tracing::debug!(events = events.len(), "Fetched cohort events");
        Ok(compute_cohort(self.config, &events, as_of_dates))
    }
}

/// Qualifying events per person, sorted by date
fn qualifying_events(config: &PipelineConfig, events: &Table) -> HashMap<i64, Vec<(NaiveDate, County)>> {
    let c = &config.cohort;
    let mut by_person: HashMap<i64, Vec<(NaiveDate, County)>> = HashMap::new();
    for row in &events.rows {
        let (Some(person), Some(date), Some(source)) =
            (row[0].as_i64(), row[1].as_date(), row[2].as_str())
        else {
            continue;
        };
        let Some(mut county) = c.county_of_source(source) else {
            continue;
        };
        if c.county_column.is_some() {
            match row.get(3).and_then(Value::as_str).map(str::parse::<County>) {
                Some(Ok(parsed)) if c.qualifies(source, parsed) => county = parsed,
                _ => continue,
            }
        }
        by_person.entry(person).or_default().push((date, county));
    }
    for events in by_person.values_mut() {
        events.sort();
    }
    by_person
}

/// Rows of `events` are `(person, date, source[, county])`
fn compute_cohort(config: &PipelineConfig, events: &Table, as_of_dates: &[NaiveDate]) -> Cohort {
    let by_person = qualifying_events(config, events);
    let interval = &config.cohort.interval_back;

    let mut entries = BTreeMap::new();
    for (&person, events) in &by_person {
        for &as_of_date in as_of_dates {
            let end = events.partition_point(|(date, _)| *date <= as_of_date);
            let start = match interval.before(as_of_date) {
                Some(lower) => events.partition_point(|(date, _)| *date <= lower),
                None => 0,
            };
            if start >= end {
                continue;
            }
            // events are sorted by (date, county), so the first event on the latest date
            // carries the lowest county
            let latest = events[end - 1].0;
            let first_on_latest = start + events[start..end].partition_point(|(date, _)| *date < latest);
            entries.insert(PersonDate::new(person, as_of_date), events[first_on_latest].1);
        }
    }
    Cohort { entries }
}

/// Read the persisted cohort
pub async fn load_cohort(store: &dyn Store) -> Result<Cohort> {
    let table = store
        .read_table(&TableRef::new(MODELING_NAMESPACE, COHORT_TABLE), &[])
        .await?;
    Cohort::from_table(&table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use riskfold_core::{CohortConfig, Interval};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn config() -> PipelineConfig {
        let yaml = r#"
temporal:
  max_train_history_months: 60
  absolute_train_start: 2019-01-01
  latest_validation_date: 2020-01-01
cohort:
  interval_back: 1 year
  excluded_tables: [jocojcmexoverdosessuicides]
  jurisdictions:
    joco: [jocomedactemsruns, jocojcmexoverdosessuicides]
    doco: [docolmhcdemographics]
labels:
  months_future: 6
  selected_labels: [me_death]
  group_name: deaths
  definitions:
    - label_name: me_death
      source_table: me_deaths
"#;
        PipelineConfig::from_yaml(yaml).unwrap()
    }

    fn events(rows: &[(i64, NaiveDate, &str)]) -> Table {
        let mut table = Table::new(vec![
            Column::new("joid", ColumnType::Integer),
            Column::new("event_date", ColumnType::Date),
            Column::new("source_table", ColumnType::Text),
        ]);
        for (person, day, source) in rows {
            table
                .push_row(vec![Value::from(*person), Value::from(*day), Value::from(*source)])
                .unwrap();
        }
        table
    }

    #[test]
    fn test_lookback_window_is_half_open() {
        let config = config();
        let table = events(&[
            (1, date(2019, 1, 1), "jocomedactemsruns"),
            (2, date(2018, 1, 1), "jocomedactemsruns"),
            (3, date(2019, 1, 2), "jocomedactemsruns"),
        ]);
        let cohort = compute_cohort(&config, &table, &[date(2019, 1, 1)]);

        // person 2 sits exactly on the lower bound, person 3 is in the future
        assert_eq!(cohort.len(), 1);
        assert_eq!(
            cohort.county(&PersonDate::new(1, date(2019, 1, 1))),
            Some(County::Joco)
        );
    }

    #[test]
    fn test_excluded_and_unlisted_tables_do_not_qualify() {
        let config = config();
        let table = events(&[
            (1, date(2018, 12, 1), "jocojcmexoverdosessuicides"),
            (2, date(2018, 12, 1), "some_other_table"),
        ]);
        assert!(compute_cohort(&config, &table, &[date(2019, 1, 1)]).is_empty());
    }

    #[test]
    fn test_county_from_most_recent_event() {
        let config = config();
        let table = events(&[
            (1, date(2018, 6, 1), "jocomedactemsruns"),
            (1, date(2018, 11, 1), "docolmhcdemographics"),
            (2, date(2018, 11, 1), "docolmhcdemographics"),
            (2, date(2018, 11, 1), "jocomedactemsruns"),
        ]);
        let cohort = compute_cohort(&config, &table, &[date(2019, 1, 1)]);
        assert_eq!(
            cohort.county(&PersonDate::new(1, date(2019, 1, 1))),
            Some(County::Doco)
        );
        assert_eq!(
            cohort.county(&PersonDate::new(2, date(2019, 1, 1))),
            Some(County::Joco)
        );
    }

    #[test]
    fn test_county_column_must_match_qualifying_list() {
        let mut config = config();
        config.cohort.county_column = Some("county".to_string());
        config
            .cohort
            .jurisdictions
            .get_mut(&County::Doco)
            .unwrap()
            .push("sharedcourtcases".to_string());
        config
            .cohort
            .jurisdictions
            .get_mut(&County::Joco)
            .unwrap()
            .push("sharedcourtcases".to_string());

        let mut table = Table::new(vec![
            Column::new("joid", ColumnType::Integer),
            Column::new("event_date", ColumnType::Date),
            Column::new("source_table", ColumnType::Text),
            Column::new("county", ColumnType::Text),
        ]);
        for (person, source, county) in [
            (1, "jocomedactemsruns", "doco"),
            (2, "jocomedactemsruns", "joco"),
            (3, "sharedcourtcases", "doco"),
        ] {
            table
                .push_row(vec![
                    Value::from(person as i64),
                    Value::from(date(2018, 12, 1)),
                    Value::from(source),
                    Value::from(county),
                ])
                .unwrap();
        }

        let cohort = compute_cohort(&config, &table, &[date(2019, 1, 1)]);
        // a joco-only table cannot seed a doco entry
        assert_eq!(cohort.county(&PersonDate::new(1, date(2019, 1, 1))), None);
        assert_eq!(
            cohort.county(&PersonDate::new(2, date(2019, 1, 1))),
            Some(County::Joco)
        );
        assert_eq!(
            cohort.county(&PersonDate::new(3, date(2019, 1, 1))),
            Some(County::Doco)
        );
    }

    #[test]
    fn test_table_round_trip() {
        let cohort: Cohort = vec![
            CohortEntry {
                key: PersonDate::new(2, date(2019, 1, 1)),
                county: County::Doco,
            },
            CohortEntry {
                key: PersonDate::new(1, date(2019, 7, 1)),
                county: County::Joco,
            },
        ]
        .into_iter()
        .collect();
        let restored = Cohort::from_table(&cohort.to_table()).unwrap();
        assert_eq!(restored, cohort);
        assert_eq!(restored.dates(), vec![date(2019, 1, 1), date(2019, 7, 1)]);
    }

    #[test]
    fn test_interval_back_default_config() {
        let cohort: CohortConfig = config().cohort;
        assert_eq!(cohort.interval_back, Interval::years(1));
    }
}
