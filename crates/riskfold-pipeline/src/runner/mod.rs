//! Model runner
//!
//! Every configured model is fitted on every assembled fold. Work units run on the
//! blocking pool, bounded by a semaphore of `nr_cores` permits (one permit when
//! `parallel` is off). A failed unit is reported and the others still run.

mod evaluation;
mod model;

pub use evaluation::{evaluate, precision_at_k, rank_predictions, recall_at_k, Evaluation, Prediction};
pub use model::{build_model, FeatureRanker, LinearRanker, Model, FLIP_PREFIX};

use crate::matrix::LabeledFold;
use chrono::NaiveDate;
use riskfold_core::{Error, EvaluationConfig, Jurisdiction, ModelKind, PipelineConfig, Result};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Result of one (model, fold) unit
#[derive(Debug)]
pub enum UnitOutcome {
    Completed {
        predictions: Vec<Prediction>,
        evaluations: Vec<Evaluation>,
        /// (matrix column, importance), nonzero entries only
        feature_importances: Vec<(String, f64)>,
    },
    Failed(Error),
}

#[derive(Debug)]
pub struct UnitReport {
    pub model_index: usize,
    pub model_name: &'static str,
    pub fold_index: usize,
    pub validation_date: NaiveDate,
    pub jurisdiction: Jurisdiction,
    pub outcome: UnitOutcome,
}

impl UnitReport {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, UnitOutcome::Completed { .. })
    }
}

/// Runs the (model x fold) grid
#[derive(Debug, Clone)]
pub struct ModelRunner {
    models: Vec<ModelKind>,
    evaluation: EvaluationConfig,
    permits: usize,
}

impl ModelRunner {
    pub fn new(models: Vec<ModelKind>, evaluation: EvaluationConfig, parallel: bool, nr_cores: usize) -> Self {
        let permits = if parallel { nr_cores.max(1) } else { 1 };
        Self {
            models,
            evaluation,
            permits,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            config.models.clone(),
            config.evaluation,
            config.parallel,
            config.nr_cores,
        )
    }

    pub fn models(&self) -> &[ModelKind] {
        &self.models
    }

    /// Fit and evaluate every model on every fold; reports come back in
    /// (model, fold) order
    pub async fn run(&self, folds: Vec<LabeledFold>) -> Vec<UnitReport> {
        let semaphore = Arc::new(Semaphore::new(self.permits));
        let folds: Vec<Arc<LabeledFold>> = folds.into_iter().map(Arc::new).collect();
        tracing::info!(
            models = self.models.len(),
            folds = folds.len(),
            permits = self.permits,
            "Running model grid"
        );

        let mut units = Vec::new();
        for (model_index, kind) in self.models.iter().enumerate() {
            for fold in &folds {
                let semaphore = Arc::clone(&semaphore);
                let fold = Arc::clone(fold);
                let kind = kind.clone();
                let evaluation = self.evaluation;
                units.push(async move {
                    let model_name = kind.name();
                    let fold_index = fold.index;
                    let validation_date = fold.fold.validation_date;
                    let jurisdiction = fold.jurisdiction;

                    let result = match semaphore.acquire_owned().await {
                        Ok(permit) => tokio::task::spawn_blocking(move || {
                            let _permit = permit;
                            run_unit(&kind, &fold, &evaluation)
                        })
                        .await
                        .map_err(|e| Error::Model(format!("Model task failed: {}", e)))
                        .and_then(|result| result),
                        Err(e) => Err(Error::Model(format!("Worker pool closed: {}", e))),
                    };

                    let outcome = match result {
                        Ok(outcome) => {
                            tracing::info!(
                                model = model_name,
                                fold = fold_index,
                                validation_date = %validation_date,
                                "Model unit completed"
                            );
                            outcome
                        }
                        Err(err) => {
                            tracing::error!(
                                model = model_name,
                                fold = fold_index,
                                validation_date = %validation_date,
                                error = %err,
                                "Model unit failed"
                            );
                            UnitOutcome::Failed(err)
                        }
                    };
                    UnitReport {
                        model_index,
                        model_name,
                        fold_index,
                        validation_date,
                        jurisdiction,
                        outcome,
                    }
                });
            }
        }

        let mut reports = futures::future::join_all(units).await;
        reports.sort_by_key(|r| (r.model_index, r.fold_index));
        reports
    }
}

fn run_unit(kind: &ModelKind, fold: &LabeledFold, evaluation: &EvaluationConfig) -> Result<UnitOutcome> {
    let mut model = build_model(kind);
    model.fit(&fold.train)?;

    let validation = &fold.validation;
    let scores = model.predict_scores(&validation.features)?;
    if scores.len() != validation.len() {
        return Err(Error::Model(format!(
            "{} returned {} scores for {} rows",
            model.name(),
            scores.len(),
            validation.len()
        )));
    }

    let rows = validation
        .features
        .keys
        .iter()
        .zip(&validation.features.counties)
        .zip(scores)
        .zip(&validation.labels)
        .map(|(((key, county), score), label)| (*key, *county, score, *label))
        .collect();
    let predictions = rank_predictions(rows);
    let evaluations = evaluate(&predictions, fold.jurisdiction, evaluation);

    let feature_importances = model
        .feature_importances()
        .map(|importances| {
            fold.train
                .features
                .columns
                .iter()
                .zip(importances)
                .filter(|(_, importance)| **importance != 0.0)
                .map(|(column, importance)| (column.clone(), *importance))
                .collect()
        })
        .unwrap_or_default();

    Ok(UnitOutcome::Completed {
        predictions,
        evaluations,
        feature_importances,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::{FeatureMatrix, LabeledMatrix};
    use ndarray::array;
    use riskfold_core::{County, Fold, PersonDate};

    fn date(y: i32, m: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, 1).unwrap()
    }

    fn labeled(values: ndarray::Array2<f32>, labels: Vec<bool>, as_of: NaiveDate) -> LabeledMatrix {
        let n = values.nrows();
        LabeledMatrix {
            features: FeatureMatrix {
                keys: (0..n as i64).map(|p| PersonDate::new(p, as_of)).collect(),
                counties: vec![County::Joco; n],
                columns: vec!["risk".to_string(), "age".to_string()],
                values,
            },
            labels,
        }
    }

    fn fold() -> LabeledFold {
        LabeledFold {
            index: 0,
            fold: Fold {
                train_dates: vec![date(2019, 1)],
                validation_date: date(2019, 7),
            },
            jurisdiction: Jurisdiction::Joco,
            train: labeled(array![[1.0, 0.0], [0.0, 1.0]], vec![true, false], date(2019, 1)),
            validation: labeled(
                array![[0.2, 0.0], [0.9, 0.0], [0.5, 0.0]],
                vec![false, true, false],
                date(2019, 7),
            ),
        }
    }

    #[tokio::test]
    async fn test_grid_reports_each_unit() {
        let models = vec![
            ModelKind::FeatureRanker {
                features: vec!["risk".to_string()],
            },
            ModelKind::FeatureRanker {
                features: vec!["missing".to_string()],
            },
        ];
        let runner = ModelRunner::new(models, EvaluationConfig::default(), true, 2);
        let reports = runner.run(vec![fold()]).await;

        assert_eq!(reports.len(), 2);
        match &reports[0].outcome {
            UnitOutcome::Completed {
                predictions,
                feature_importances,
                ..
            } => {
                let top = predictions.iter().find(|p| p.rank == 1).unwrap();
                assert_eq!(top.key.person_id, 1);
                assert_eq!(feature_importances, &vec![("risk".to_string(), 1.0)]);
            }
            UnitOutcome::Failed(err) => panic!("unexpected failure: {}", err),
        }
        assert!(matches!(reports[1].outcome, UnitOutcome::Failed(Error::Model(_))));
    }

    #[tokio::test]
    async fn test_sequential_grid() {
        let models = vec![ModelKind::LinearRanker {
            features: vec!["risk".to_string()],
            weights: vec![1.0],
        }];
        let runner = ModelRunner::new(models, EvaluationConfig::default(), false, 8);
        let reports = runner.run(vec![fold(), fold()]).await;
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(UnitReport::is_success));
    }
}
