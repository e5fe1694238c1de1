//! Master feature matrix
//!
//! The cohort restricted to every as-of date any fold needs, inner-joined with every
//! categorical and every numerical feature table on `(person_id, as_of_date)`.

use crate::cohort::Cohort;
use riskfold_core::{County, Error, PersonDate, Result, Value};
use riskfold_store::{Table, TableRef};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// One cohort entry with all of its feature values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterRow {
    pub key: PersonDate,
    pub county: County,
    pub categorical: Vec<String>,

    /// `None` only in the mean-imputed column
    pub numerical: Vec<Option<f64>>,
}

/// Wide table of every feature for every needed cohort entry, sorted by key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterMatrix {
    pub categorical_columns: Vec<String>,
    pub numerical_columns: Vec<String>,
    pub rows: Vec<MasterRow>,
}

/// A feature table read back from the store
struct Partition<'a> {
    /// value columns as (name, index)
    columns: Vec<(String, usize)>,
    rows: HashMap<PersonDate, &'a [Value]>,
}

impl<'a> Partition<'a> {
    fn index(table: &TableRef, data: &'a Table) -> Result<Self> {
        let name = table.to_string();
        let person_idx = data.require_column(&name, "person_id")?;
        let date_idx = data.require_column(&name, "as_of_date")?;
        let columns = data
            .columns
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != person_idx && *i != date_idx)
            .map(|(i, c)| (c.name.clone(), i))
            .collect();

        let mut rows = HashMap::with_capacity(data.len());
        for row in &data.rows {
            let key = Table::person_date(row, person_idx, date_idx)
                .ok_or_else(|| Error::MissingValues(format!("{} key", name)))?;
            if rows.insert(key, row.as_slice()).is_some() {
                return Err(Error::DuplicateKey(key));
            }
        }
        Ok(Self { columns, rows })
    }
}

/// Check that no column name is produced twice. Overlap between the categorical and
/// numerical partitions (or within one) makes the join ambiguous.
fn check_columns(categorical: &[Partition<'_>], numerical: &[Partition<'_>]) -> Result<()> {
    let mut seen = BTreeSet::new();
    let mut ambiguous = BTreeSet::new();
    for partition in categorical.iter().chain(numerical) {
        for (column, _) in &partition.columns {
            if !seen.insert(column.as_str()) {
                ambiguous.insert(column.clone());
            }
        }
    }
    if ambiguous.is_empty() {
        Ok(())
    } else {
        Err(Error::AmbiguousColumns(ambiguous.into_iter().collect()))
    }
}

impl MasterMatrix {
    /// Inner-join `cohort` with every feature table.
    ///
    /// Only `mean_impute_column` may hold missing values; any other missing cell is a
    /// `MissingValues` error.
    pub fn join(
        cohort: &Cohort,
        categorical: &[(TableRef, Table)],
        numerical: &[(TableRef, Table)],
        mean_impute_column: &str,
    ) -> Result<Self> {
        let cat = categorical
            .iter()
            .map(|(name, data)| Partition::index(name, data))
            .collect::<Result<Vec<_>>>()?;
        let num = numerical
            .iter()
            .map(|(name, data)| Partition::index(name, data))
            .collect::<Result<Vec<_>>>()?;
        check_columns(&cat, &num)?;

        let categorical_columns: Vec<String> = cat
            .iter()
            .flat_map(|p| p.columns.iter().map(|(c, _)| c.clone()))
            .collect();
        let numerical_columns: Vec<String> = num
            .iter()
            .flat_map(|p| p.columns.iter().map(|(c, _)| c.clone()))
            .collect();

        let mut rows = Vec::with_capacity(cohort.len());
        let mut dropped = 0usize;
        'entries: for entry in cohort.iter() {
            let mut row = MasterRow {
                key: entry.key,
                county: entry.county,
                categorical: Vec::with_capacity(categorical_columns.len()),
                numerical: Vec::with_capacity(numerical_columns.len()),
            };

            for partition in &cat {
                let Some(values) = partition.rows.get(&entry.key) else {
                    dropped += 1;
                    continue 'entries;
                };
                for (column, i) in &partition.columns {
                    let value = values[*i]
                        .to_category()
                        .ok_or_else(|| Error::MissingValues(column.clone()))?;
                    row.categorical.push(value);
                }
            }
            for partition in &num {
                let Some(values) = partition.rows.get(&entry.key) else {
                    dropped += 1;
                    continue 'entries;
                };
                for (column, i) in &partition.columns {
                    let value = values[*i].as_f64().filter(|v| v.is_finite());
                    if value.is_none() && column != mean_impute_column {
                        return Err(Error::MissingValues(column.clone()));
                    }
                    row.numerical.push(value);
                }
            }
            rows.push(row);
        }

        if dropped > 0 {
            tracing::debug!(dropped, "Cohort entries without a row in every feature table");
        }
        tracing::info!(
            rows = rows.len(),
            categorical = categorical_columns.len(),
            numerical = numerical_columns.len(),
            tables = cat.len() + num.len(),
            "Joined master matrix"
        );
        Ok(Self {
            categorical_columns,
            numerical_columns,
            rows,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row count per as-of date
    pub fn date_counts(&self) -> BTreeMap<chrono::NaiveDate, usize> {
        let mut counts = BTreeMap::new();
        for row in &self.rows {
            *counts.entry(row.key.as_of_date).or_default() += 1;
        }
        counts
    }
}
