//! Train-fitted transforms
//!
//! Both transforms are fit on the training slice of a fold and applied unchanged to
//! its validation slice.

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One-hot encoder over string categories.
///
/// Categories are sorted per column. A category not seen during fitting encodes to
/// all zeros for that column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneHotEncoder {
    columns: Vec<String>,
    categories: Vec<Vec<String>>,
}

impl OneHotEncoder {
    /// Learn the categories of each column from `rows`
    pub fn fit(columns: &[String], rows: &[Vec<String>]) -> Self {
        let mut seen: Vec<BTreeSet<&str>> = vec![BTreeSet::new(); columns.len()];
        for row in rows {
            for (categories, value) in seen.iter_mut().zip(row) {
                categories.insert(value.as_str());
            }
        }
        Self {
            columns: columns.to_vec(),
            categories: seen
                .into_iter()
                .map(|set| set.into_iter().map(str::to_string).collect())
                .collect(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Categories learned for each column
    pub fn categories(&self) -> &[Vec<String>] {
        &self.categories
    }

    /// Output column names, `<column>_<category>`
    pub fn feature_names(&self) -> Vec<String> {
        self.columns
            .iter()
            .zip(&self.categories)
            .flat_map(|(column, categories)| {
                categories.iter().map(move |c| format!("{}_{}", column, c))
            })
            .collect()
    }

    pub fn width(&self) -> usize {
        self.categories.iter().map(Vec::len).sum()
    }

    /// Indicator matrix of `rows`
    pub fn transform(&self, rows: &[Vec<String>]) -> Array2<f64> {
        let mut out = Array2::zeros((rows.len(), self.width()));
        for (r, row) in rows.iter().enumerate() {
            let mut offset = 0;
            for (categories, value) in self.categories.iter().zip(row) {
                if let Ok(position) = categories.binary_search(value) {
                    out[[r, offset + position]] = 1.0;
                }
                offset += categories.len();
            }
        }
        out
    }
}

/// Zero-mean, unit-variance scaler (population standard deviation).
///
/// Constant columns keep a scale of 1 so they map to zero instead of NaN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl StandardScaler {
    pub fn fit(data: &Array2<f64>) -> Self {
        let n = data.nrows();
        if n == 0 {
            return Self {
                mean: Array1::zeros(data.ncols()),
                scale: Array1::ones(data.ncols()),
            };
        }
        let mean = data.sum_axis(Axis(0)) / n as f64;
        let mut variance = Array1::<f64>::zeros(data.ncols());
        for row in data.rows() {
            for (j, value) in row.iter().enumerate() {
                let d = value - mean[j];
                variance[j] += d * d;
            }
        }
        let scale = variance.mapv(|v| {
            let std = (v / n as f64).sqrt();
            if std > 0.0 && std.is_finite() {
                std
            } else {
                1.0
            }
        });
        Self { mean, scale }
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn scale(&self) -> &Array1<f64> {
        &self.scale
    }

    /// Scaled copy of `data` in single precision
    pub fn transform(&self, data: &Array2<f64>) -> Array2<f32> {
        let mut out = Array2::<f32>::zeros(data.raw_dim());
        for (mut out_row, row) in out.rows_mut().into_iter().zip(data.rows()) {
            for (j, value) in row.iter().enumerate() {
                out_row[j] = ((value - self.mean[j]) / self.scale[j]) as f32;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn rows(values: &[&[&str]]) -> Vec<Vec<String>> {
        values
            .iter()
            .map(|r| r.iter().map(|s| s.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_one_hot_names_and_order() {
        let columns = vec!["dem_race".to_string(), "dem_sex".to_string()];
        let encoder = OneHotEncoder::fit(&columns, &rows(&[&["W", "M"], &["B", "F"], &["W", "F"]]));
        assert_eq!(
            encoder.feature_names(),
            vec!["dem_race_B", "dem_race_W", "dem_sex_F", "dem_sex_M"]
        );
        let encoded = encoder.transform(&rows(&[&["B", "M"]]));
        assert_eq!(encoded, array![[1.0, 0.0, 0.0, 1.0]]);
    }

    #[test]
    fn test_unknown_category_encodes_to_zeros() {
        let columns = vec!["dem_race".to_string()];
        let encoder = OneHotEncoder::fit(&columns, &rows(&[&["W"], &["B"]]));
        let encoded = encoder.transform(&rows(&[&["A"]]));
        assert_eq!(encoded, array![[0.0, 0.0]]);
    }

    #[test]
    fn test_scaler_population_std() {
        let data = array![[1.0, 5.0], [3.0, 5.0]];
        let scaler = StandardScaler::fit(&data);
        assert_eq!(scaler.mean(), &array![2.0, 5.0]);
        assert_eq!(scaler.scale(), &array![1.0, 1.0]);
        assert_eq!(scaler.transform(&data), array![[-1.0f32, 0.0], [1.0, 0.0]]);
    }
}
