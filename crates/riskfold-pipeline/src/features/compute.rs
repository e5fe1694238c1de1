//! Per-table feature computation
//!
//! Everything here is pure: source rows and cohort keys in, `_cat`/`_num` tables out.
//! A source row is visible at as-of date D when its knowledge date is on or before
//! `D - knowledge_lag`. Invisible rows never influence a value at D.

use chrono::NaiveDate;
use riskfold_core::{
    AggFeature, AggFunc, ColumnFeature, Error, FeatureTableConfig, Filter, PersonDate, Result,
    Value,
};
use riskfold_store::{Column, ColumnType, Table};
use std::collections::HashMap;

/// Source rows of one person, sorted by knowledge date
struct PersonRows<'a> {
    rows: Vec<(NaiveDate, &'a [Value])>,
}

impl<'a> PersonRows<'a> {
    /// Rows with knowledge date in `(after, cutoff]`
    fn window(&self, after: Option<NaiveDate>, cutoff: NaiveDate) -> &[(NaiveDate, &'a [Value])] {
        let end = self.rows.partition_point(|(date, _)| *date <= cutoff);
        let start = match after {
            Some(after) => self.rows.partition_point(|(date, _)| *date <= after),
            None => 0,
        };
        &self.rows[start.min(end)..end]
    }
}

/// Column positions in the fetched source table
struct SourceLayout {
    columns: HashMap<String, usize>,
    table: String,
}

impl SourceLayout {
    fn new(source: &Table, table: &str) -> Self {
        Self {
            columns: source
                .columns
                .iter()
                .enumerate()
                .map(|(i, c)| (c.name.clone(), i))
                .collect(),
            table: table.to_string(),
        }
    }

    fn index(&self, column: &str) -> Result<usize> {
        self.columns
            .get(column)
            .copied()
            .ok_or_else(|| Error::UnknownColumn {
                table: self.table.clone(),
                column: column.to_string(),
            })
    }

    fn filters(&self, filters: &[Filter]) -> Result<Vec<(usize, Filter)>> {
        filters
            .iter()
            .map(|f| Ok((self.index(&f.column)?, f.clone())))
            .collect()
    }
}

fn passes(row: &[Value], filters: &[(usize, Filter)]) -> bool {
    filters.iter().all(|(i, filter)| filter.matches(&row[*i]))
}

/// Latest visible value of a column
struct LatestValue {
    arg: usize,
    filters: Vec<(usize, Filter)>,
    impute: Value,
}

impl LatestValue {
    fn new(layout: &SourceLayout, feature: &ColumnFeature) -> Result<Self> {
        Ok(Self {
            arg: layout.index(&feature.arg)?,
            filters: layout.filters(&feature.filter)?,
            impute: feature.impute_val.clone(),
        })
    }

    fn compute(&self, visible: &[(NaiveDate, &[Value])]) -> Value {
        visible
            .iter()
            .rev()
            .map(|(_, row)| *row)
            .find(|row| !row[self.arg].is_null() && passes(row, &self.filters))
            .map(|row| row[self.arg].clone())
            .unwrap_or_else(|| self.impute.clone())
    }
}

/// One aggregate function over one trailing interval
struct WindowAggregate {
    func: AggFunc,
    arg: Option<usize>,
    interval: riskfold_core::Interval,
    filters: Vec<(usize, Filter)>,
    impute: f64,
}

impl WindowAggregate {
    fn expand(layout: &SourceLayout, agg: &AggFeature, impute: f64) -> Result<Vec<Self>> {
        let arg = agg.agg_arg.as_deref().map(|a| layout.index(a)).transpose()?;
        let filters = layout.filters(&agg.add_filter)?;
        let mut aggregates = Vec::with_capacity(agg.agg_func.len() * agg.intervals.len());
        for func in &agg.agg_func {
            for interval in &agg.intervals {
                aggregates.push(Self {
                    func: *func,
                    arg,
                    interval: interval.clone(),
                    filters: filters.clone(),
                    impute,
                });
            }
        }
        Ok(aggregates)
    }

    fn compute(&self, rows: &PersonRows<'_>, cutoff: NaiveDate) -> f64 {
        let window = rows.window(self.interval.before(cutoff), cutoff);
        let matching = window
            .iter()
            .map(|(_, row)| *row)
            .filter(|row| passes(row, &self.filters));

        let values: Vec<f64> = match (self.func, self.arg) {
            // count(col) counts non-null cells of any type
            (AggFunc::Count, Some(arg)) => matching
                .filter(|row| !row[arg].is_null())
                .map(|_| 1.0)
                .collect(),
            (_, Some(arg)) => matching.filter_map(|row| row[arg].as_f64()).collect(),
            // count(*)
            (_, None) => matching.map(|_| 1.0).collect(),
        };
        if values.is_empty() {
            return self.impute;
        }

        match self.func {
            AggFunc::Count => values.len() as f64,
            AggFunc::Sum => values.iter().sum(),
            AggFunc::Avg => values.iter().sum::<f64>() / values.len() as f64,
            AggFunc::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            AggFunc::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

/// Categorical and numerical tables computed for one source
#[derive(Debug, Clone, PartialEq)]
pub struct ComputedFeatures {
    pub categorical: Option<Table>,
    pub numerical: Option<Table>,
}

fn key_columns() -> Vec<Column> {
    vec![
        Column::new("person_id", ColumnType::Integer),
        Column::new("as_of_date", ColumnType::Date),
    ]
}

/// Compute every feature of `config` for every key in `cohort`.
///
/// `source` must contain the person column, the knowledge date column and every
/// column the definitions read; `name` only labels errors.
pub fn compute_features(
    name: &str,
    config: &FeatureTableConfig,
    source: &Table,
    cohort: &[PersonDate],
) -> Result<ComputedFeatures> {
    let layout = SourceLayout::new(source, name);
    let person_idx = layout.index(&config.person_column)?;
    let date_idx = layout.index(&config.knowledge_date)?;

    let categorical = config
        .features
        .categorical
        .values()
        .map(|f| LatestValue::new(&layout, f))
        .collect::<Result<Vec<_>>>()?;
    let numerical = config
        .features
        .numerical
        .values()
        .map(|f| LatestValue::new(&layout, f))
        .collect::<Result<Vec<_>>>()?;
    let mut aggregates = Vec::new();
    for agg in config.features.agg.values() {
        aggregates.extend(WindowAggregate::expand(&layout, agg, config.impute_agg)?);
    }

    let mut by_person: HashMap<i64, PersonRows<'_>> = HashMap::new();
    for row in &source.rows {
        let (Some(person), Some(known)) = (row[person_idx].as_i64(), row[date_idx].as_date())
        else {
            continue;
        };
        by_person
            .entry(person)
            .or_insert_with(|| PersonRows { rows: Vec::new() })
            .rows
            .push((known, row.as_slice()));
    }
    for rows in by_person.values_mut() {
        // stable: rows known on the same day keep source order
        rows.rows.sort_by_key(|(date, _)| *date);
    }

    let mut cat_table = (!categorical.is_empty()).then(|| {
        let mut columns = key_columns();
        columns.extend(
            config
                .categorical_columns()
                .into_iter()
                .map(|c| Column::new(c, ColumnType::Text)),
        );
        Table::new(columns).with_unique_key(&["person_id", "as_of_date"])
    });
    let mut num_table = (!numerical.is_empty() || !aggregates.is_empty()).then(|| {
        let mut columns = key_columns();
        columns.extend(
            config
                .numerical_columns()
                .into_iter()
                .map(|c| Column::new(c, ColumnType::Float)),
        );
        Table::new(columns).with_unique_key(&["person_id", "as_of_date"])
    });

    let empty = PersonRows { rows: Vec::new() };
    for key in cohort {
        let rows = by_person.get(&key.person_id).unwrap_or(&empty);
        let cutoff = knowledge_cutoff(config, key.as_of_date);
        let visible: &[(NaiveDate, &[Value])] = match cutoff {
            Some(cutoff) => rows.window(None, cutoff),
            None => &[],
        };
        let prefix = [Value::from(key.person_id), Value::from(key.as_of_date)];

        if let Some(table) = cat_table.as_mut() {
            let mut row = prefix.to_vec();
            row.extend(
                categorical
                    .iter()
                    .map(|f| f.compute(visible).to_category().map_or(Value::Null, Value::Text)),
            );
            table.rows.push(row);
        }
        if let Some(table) = num_table.as_mut() {
            let mut row = prefix.to_vec();
            row.extend(numerical.iter().map(|f| match f.compute(visible).as_f64() {
                Some(n) => Value::Number(n),
                None => Value::Null,
            }));
            row.extend(aggregates.iter().map(|a| {
                Value::Number(match cutoff {
                    Some(cutoff) => a.compute(rows, cutoff),
                    None => a.impute,
                })
            }));
            table.rows.push(row);
        }
    }

    Ok(ComputedFeatures {
        categorical: cat_table,
        numerical: num_table,
    })
}

/// Latest knowledge date visible at `as_of_date`
pub fn knowledge_cutoff(config: &FeatureTableConfig, as_of_date: NaiveDate) -> Option<NaiveDate> {
    match &config.knowledge_lag {
        Some(lag) => lag.before(as_of_date),
        None => Some(as_of_date),
    }
}
