//! Per-fold slicing
//!
//! Slices the master matrix into the train and validation rows of one fold, restricts
//! columns to the fold's jurisdiction, imputes the mean-impute column with the train
//! mean, one-hot encodes and scales. Every learned parameter comes from the train
//! slice only.

use super::encoding::{OneHotEncoder, StandardScaler};
use super::master::{MasterMatrix, MasterRow};
use chrono::NaiveDate;
use ndarray::{concatenate, Array2, Axis};
use riskfold_core::{County, Error, Fold, Jurisdiction, PersonDate, PipelineConfig, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Encoded and scaled feature rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    pub keys: Vec<PersonDate>,
    pub counties: Vec<County>,
    pub columns: Vec<String>,
    pub values: Array2<f32>,
}

impl FeatureMatrix {
    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Keep the rows that have a label, in row order
    pub fn join_labels(&self, labels: &BTreeMap<PersonDate, bool>) -> LabeledMatrix {
        let matched: Vec<(usize, bool)> = self
            .keys
            .iter()
            .enumerate()
            .filter_map(|(i, key)| labels.get(key).map(|label| (i, *label)))
            .collect();
        let rows: Vec<usize> = matched.iter().map(|(i, _)| *i).collect();

        LabeledMatrix {
            features: FeatureMatrix {
                keys: rows.iter().map(|&i| self.keys[i]).collect(),
                counties: rows.iter().map(|&i| self.counties[i]).collect(),
                columns: self.columns.clone(),
                values: self.values.select(Axis(0), &rows),
            },
            labels: matched.into_iter().map(|(_, label)| label).collect(),
        }
    }
}

/// Feature rows with aligned labels
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledMatrix {
    pub features: FeatureMatrix,
    pub labels: Vec<bool>,
}

impl LabeledMatrix {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Fail when any feature value is NaN or infinite
    pub fn ensure_complete(&self) -> Result<()> {
        for (j, column) in self.features.values.axis_iter(Axis(1)).enumerate() {
            if column.iter().any(|v| !v.is_finite()) {
                return Err(Error::MissingValues(self.features.columns[j].clone()));
            }
        }
        Ok(())
    }
}

/// The train and validation matrices of one (fold, jurisdiction) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldMatrices {
    pub fold: Fold,
    pub jurisdiction: Jurisdiction,
    pub train: FeatureMatrix,
    pub validation: FeatureMatrix,
    pub encoder: OneHotEncoder,
    pub scaler: StandardScaler,
}

/// Columns produced by feature tables relevant to `jurisdiction`, or `None` when every
/// column is
pub fn jurisdiction_columns(config: &PipelineConfig, jurisdiction: Jurisdiction) -> Option<BTreeSet<String>> {
    if jurisdiction == Jurisdiction::Both {
        return None;
    }
    Some(
        config
            .features
            .values()
            .filter(|table| jurisdiction.admits(table.county))
            .flat_map(|table| {
                let mut columns = table.categorical_columns();
                columns.extend(table.numerical_columns());
                columns
            })
            .collect(),
    )
}

/// Slice one fold out of the master matrix
pub fn slice_fold(
    master: &MasterMatrix,
    fold: &Fold,
    jurisdiction: Jurisdiction,
    allowed_columns: Option<&BTreeSet<String>>,
    mean_impute_column: &str,
) -> Result<FoldMatrices> {
    let train_dates: BTreeSet<NaiveDate> = fold.train_dates.iter().copied().collect();
    let train: Vec<&MasterRow> = master
        .rows
        .iter()
        .filter(|r| train_dates.contains(&r.key.as_of_date))
        .collect();
    let validation: Vec<&MasterRow> = master
        .rows
        .iter()
        .filter(|r| r.key.as_of_date == fold.validation_date)
        .collect();
    if train.is_empty() {
        return Err(Error::EmptySlice {
            slice: "train",
            validation_date: fold.validation_date,
        });
    }
    if validation.is_empty() {
        return Err(Error::EmptySlice {
            slice: "validation",
            validation_date: fold.validation_date,
        });
    }

    let keep = |column: &String| allowed_columns.map_or(true, |allowed| allowed.contains(column));
    let cat_idx: Vec<usize> = (0..master.categorical_columns.len())
        .filter(|&i| keep(&master.categorical_columns[i]))
        .collect();
    let num_idx: Vec<usize> = (0..master.numerical_columns.len())
        .filter(|&i| keep(&master.numerical_columns[i]))
        .collect();
    let cat_columns: Vec<String> = cat_idx
        .iter()
        .map(|&i| master.categorical_columns[i].clone())
        .collect();
    let num_columns: Vec<String> = num_idx
        .iter()
        .map(|&i| master.numerical_columns[i].clone())
        .collect();

    let impute = num_columns
        .iter()
        .position(|c| c == mean_impute_column)
        .map(|j| train_mean(&train, num_idx[j], mean_impute_column).map(|mean| (j, mean)))
        .transpose()?;

    let categories = |rows: &[&MasterRow]| -> Vec<Vec<String>> {
        rows.iter()
            .map(|r| cat_idx.iter().map(|&i| r.categorical[i].clone()).collect())
            .collect()
    };
    let numbers = |rows: &[&MasterRow]| -> Result<Array2<f64>> {
        let mut out = Array2::zeros((rows.len(), num_idx.len()));
        for (r, row) in rows.iter().enumerate() {
            for (j, &i) in num_idx.iter().enumerate() {
                out[[r, j]] = match (row.numerical[i], impute) {
                    (Some(value), _) => value,
                    (None, Some((column, mean))) if column == j => mean,
                    (None, _) => return Err(Error::MissingValues(num_columns[j].clone())),
                };
            }
        }
        Ok(out)
    };

    let train_cat = categories(&train);
    let validation_cat = categories(&validation);
    let encoder = OneHotEncoder::fit(&cat_columns, &train_cat);

    let train_combined = concatenate![Axis(1), encoder.transform(&train_cat), numbers(&train)?];
    let validation_combined = concatenate![
        Axis(1),
        encoder.transform(&validation_cat),
        numbers(&validation)?
    ];
    let scaler = StandardScaler::fit(&train_combined);

    let mut columns = encoder.feature_names();
    columns.extend(num_columns.iter().cloned());

    let matrix = |rows: &[&MasterRow], values: &Array2<f64>| FeatureMatrix {
        keys: rows.iter().map(|r| r.key).collect(),
        counties: rows.iter().map(|r| r.county).collect(),
        columns: columns.clone(),
        values: scaler.transform(values),
    };

    tracing::debug!(
        validation_date = %fold.validation_date,
        jurisdiction = %jurisdiction,
        train_rows = train.len(),
        validation_rows = validation.len(),
        columns = columns.len(),
        "Sliced fold"
    );
    Ok(FoldMatrices {
        fold: fold.clone(),
        jurisdiction,
        train: matrix(&train, &train_combined),
        validation: matrix(&validation, &validation_combined),
        encoder,
        scaler,
    })
}

fn train_mean(train: &[&MasterRow], index: usize, column: &str) -> Result<f64> {
    let values: Vec<f64> = train.iter().filter_map(|r| r.numerical[index]).collect();
    if values.is_empty() {
        return Err(Error::MissingValues(column.to_string()));
    }
    Ok(values.iter().sum::<f64>() / values.len() as f64)
}
