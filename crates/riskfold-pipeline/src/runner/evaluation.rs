//! Top-k evaluation of validation predictions

use riskfold_core::{County, EvaluationConfig, Jurisdiction, PersonDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Scored validation row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub key: PersonDate,
    pub county: County,
    pub score: f64,
    pub label: bool,

    /// 1-based rank by descending score over all rows
    pub rank: usize,

    /// 1-based rank by descending score within the row's county
    pub county_rank: usize,
}

/// One metric value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// `None` for metrics over both counties
    pub county: Option<County>,
    pub metric: String,
    pub k: usize,
    pub value: f64,
}

/// Rank scored rows. Ties keep input order, so equal scores get consecutive ranks.
pub fn rank_predictions(rows: Vec<(PersonDate, County, f64, bool)>) -> Vec<Prediction> {
    let mut order: Vec<usize> = (0..rows.len()).collect();
    order.sort_by(|&a, &b| rows[b].2.total_cmp(&rows[a].2));

    let mut ranks = vec![(0, 0); rows.len()];
    let mut county_counts: BTreeMap<County, usize> = BTreeMap::new();
    for (position, &i) in order.iter().enumerate() {
        let county_rank = county_counts.entry(rows[i].1).or_default();
        *county_rank += 1;
        ranks[i] = (position + 1, *county_rank);
    }

    rows.into_iter()
        .zip(ranks)
        .map(|((key, county, score, label), (rank, county_rank))| Prediction {
            key,
            county,
            score,
            label,
            rank,
            county_rank,
        })
        .collect()
}

fn top_k<'a>(
    predictions: &'a [Prediction],
    k: usize,
    county: Option<County>,
) -> impl Iterator<Item = &'a Prediction> {
    predictions.iter().filter(move |p| match county {
        Some(county) => p.county == county && p.county_rank <= k,
        None => p.rank <= k,
    })
}

/// Positives among the top `k`, divided by `k`
pub fn precision_at_k(predictions: &[Prediction], k: usize, county: Option<County>) -> f64 {
    if k == 0 {
        return 0.0;
    }
    let hits = top_k(predictions, k, county).filter(|p| p.label).count();
    hits as f64 / k as f64
}

/// Positives among the top `k`, divided by all positives; 0 when there are none
pub fn recall_at_k(predictions: &[Prediction], k: usize, county: Option<County>) -> f64 {
    let positives = predictions
        .iter()
        .filter(|p| p.label && county.map_or(true, |c| p.county == c))
        .count();
    if positives == 0 {
        return 0.0;
    }
    let hits = top_k(predictions, k, county).filter(|p| p.label).count();
    hits as f64 / positives as f64
}

/// Precision and recall at the configured thresholds, plus precision over every
/// ranked row ("last k")
pub fn evaluate(
    predictions: &[Prediction],
    jurisdiction: Jurisdiction,
    config: &EvaluationConfig,
) -> Vec<Evaluation> {
    let metric = |county: Option<County>, name: &str, k: usize, value: f64| Evaluation {
        county,
        metric: name.to_string(),
        k,
        value,
    };

    let mut evaluations = Vec::new();
    for county in jurisdiction.counties() {
        let k = config.county_k(county);
        evaluations.push(metric(Some(county), "precision", k, precision_at_k(predictions, k, Some(county))));
        evaluations.push(metric(Some(county), "recall", k, recall_at_k(predictions, k, Some(county))));
    }

    match jurisdiction {
        Jurisdiction::Both => {
            let k = config.k;
            evaluations.push(metric(None, "precision", k, precision_at_k(predictions, k, None)));
            evaluations.push(metric(None, "recall", k, recall_at_k(predictions, k, None)));
            let last_k = predictions.len();
            evaluations.push(metric(None, "precision", last_k, precision_at_k(predictions, last_k, None)));
        }
        Jurisdiction::Joco | Jurisdiction::Doco => {
            for county in jurisdiction.counties() {
                let last_k = predictions.iter().filter(|p| p.county == county).count();
                evaluations.push(metric(
                    Some(county),
                    "precision",
                    last_k,
                    precision_at_k(predictions, last_k, Some(county)),
                ));
            }
        }
    }
    evaluations
}
