//! Baseline ranking models

use crate::matrix::{FeatureMatrix, LabeledMatrix};
use riskfold_core::{Error, ModelKind, Result};
use std::cmp::Ordering;

/// Prefix that reverses a feature's ranking direction
pub const FLIP_PREFIX: &str = "__flip__";

/// Train and score capability shared by every model kind
pub trait Model: Send {
    fn name(&self) -> &str;

    fn fit(&mut self, train: &LabeledMatrix) -> Result<()>;

    /// One score in `[0, 1]` per row; higher means higher risk
    fn predict_scores(&self, data: &FeatureMatrix) -> Result<Vec<f64>>;

    /// Importance per matrix column, summing to 1; `None` before fitting
    fn feature_importances(&self) -> Option<&[f64]>;
}

/// Instantiate the model described by `kind`
pub fn build_model(kind: &ModelKind) -> Box<dyn Model> {
    match kind {
        ModelKind::FeatureRanker { features } => Box::new(FeatureRanker::new(features)),
        ModelKind::LinearRanker { features, weights } => {
            Box::new(LinearRanker::new(features, weights))
        }
    }
}

fn column_indices(data: &FeatureMatrix, features: &[String], model: &str) -> Result<Vec<usize>> {
    features
        .iter()
        .map(|f| {
            data.column_index(f)
                .ok_or_else(|| Error::Model(format!("{}: unknown feature '{}'", model, f)))
        })
        .collect()
}

fn normalized(values: Vec<f64>, model: &str) -> Result<Vec<f64>> {
    let total: f64 = values.iter().sum();
    if total == 0.0 || !total.is_finite() {
        return Err(Error::Model(format!("{}: weights sum to {}", model, total)));
    }
    Ok(values.into_iter().map(|v| v / total).collect())
}

/// Sorts rows lexicographically by a list of features, most significant first.
///
/// Scores are average-method percentile ranks, so tied rows share a score and the
/// highest-ranked row scores 1.
#[derive(Debug, Clone)]
pub struct FeatureRanker {
    features: Vec<String>,
    /// `1.0`, or `-1.0` for flipped features
    signs: Vec<f64>,
    importances: Option<Vec<f64>>,
}

impl FeatureRanker {
    pub fn new(features: &[String]) -> Self {
        let (features, signs) = features
            .iter()
            .map(|f| match f.strip_prefix(FLIP_PREFIX) {
                Some(stripped) => (stripped.to_string(), -1.0),
                None => (f.clone(), 1.0),
            })
            .unzip();
        Self {
            features,
            signs,
            importances: None,
        }
    }

    pub fn features(&self) -> &[String] {
        &self.features
    }
}

impl Model for FeatureRanker {
    fn name(&self) -> &str {
        "FeatureRanker"
    }

    fn fit(&mut self, train: &LabeledMatrix) -> Result<()> {
        let indices = column_indices(&train.features, &self.features, self.name())?;
        let n = self.features.len();
        let mut importances = vec![0.0; train.features.columns.len()];
        for (rank, &column) in indices.iter().enumerate() {
            importances[column] = (n - rank) as f64;
        }
        self.importances = Some(normalized(importances, self.name())?);
        Ok(())
    }

    fn predict_scores(&self, data: &FeatureMatrix) -> Result<Vec<f64>> {
        let indices = column_indices(data, &self.features, self.name())?;
        let keys: Vec<Vec<f64>> = data
            .values
            .rows()
            .into_iter()
            .map(|row| {
                indices
                    .iter()
                    .zip(&self.signs)
                    .map(|(&j, sign)| f64::from(row[j]) * sign)
                    .collect()
            })
            .collect();
        Ok(percentile_ranks(&keys))
    }

    fn feature_importances(&self) -> Option<&[f64]> {
        self.importances.as_deref()
    }
}

fn compare_keys(a: &[f64], b: &[f64]) -> Ordering {
    a.iter()
        .zip(b)
        .map(|(x, y)| x.total_cmp(y))
        .find(|o| *o != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}

/// Ascending percentile ranks with ties averaged
fn percentile_ranks(keys: &[Vec<f64>]) -> Vec<f64> {
    let n = keys.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| compare_keys(&keys[a], &keys[b]));

    let mut ranks = vec![0.0; n];
    let mut start = 0;
    while start < n {
        let mut end = start + 1;
        while end < n && compare_keys(&keys[order[start]], &keys[order[end]]) == Ordering::Equal {
            end += 1;
        }
        // 1-based ranks start+1..=end share their average
        let average = (start + 1 + end) as f64 / 2.0;
        for &i in &order[start..end] {
            ranks[i] = average / n as f64;
        }
        start = end;
    }
    ranks
}

/// Weighted sum of features, min-max scaled to `[0, 1]`
#[derive(Debug, Clone)]
pub struct LinearRanker {
    features: Vec<String>,
    weights: Vec<f64>,
    importances: Option<Vec<f64>>,
}

impl LinearRanker {
    pub fn new(features: &[String], weights: &[f64]) -> Self {
        Self {
            features: features.to_vec(),
            weights: weights.to_vec(),
            importances: None,
        }
    }

    fn normalized_weights(&self) -> Result<Vec<f64>> {
        if self.features.len() != self.weights.len() {
            return Err(Error::Model(format!(
                "{}: {} features but {} weights",
                self.name(),
                self.features.len(),
                self.weights.len()
            )));
        }
        normalized(self.weights.clone(), self.name())
    }
}

impl Model for LinearRanker {
    fn name(&self) -> &str {
        "LinearRanker"
    }

    fn fit(&mut self, train: &LabeledMatrix) -> Result<()> {
        let indices = column_indices(&train.features, &self.features, self.name())?;
        let weights = self.normalized_weights()?;
        let mut importances = vec![0.0; train.features.columns.len()];
        for (&column, weight) in indices.iter().zip(weights) {
            importances[column] = weight;
        }
        self.importances = Some(normalized(importances, self.name())?);
        Ok(())
    }

    fn predict_scores(&self, data: &FeatureMatrix) -> Result<Vec<f64>> {
        let indices = column_indices(data, &self.features, self.name())?;
        let weights = self.normalized_weights()?;
        let raw: Vec<f64> = data
            .values
            .rows()
            .into_iter()
            .map(|row| {
                indices
                    .iter()
                    .zip(&weights)
                    .map(|(&j, w)| f64::from(row[j]) * w)
                    .sum()
            })
            .collect();

        let min = raw.iter().copied().fold(f64::INFINITY, f64::min);
        let max = raw.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let span = max - min;
        if span.is_nan() || span <= 0.0 {
            return Ok(vec![0.0; raw.len()]);
        }
        Ok(raw.into_iter().map(|s| (s - min) / span).collect())
    }

    fn feature_importances(&self) -> Option<&[f64]> {
        self.importances.as_deref()
    }
}
