//! End-to-end pipeline driver

use crate::cohort::{load_cohort, CohortBuilder};
use crate::features::FeatureBuilder;
use crate::labels::{EvaluationLabels, LabelBuilder, SplitLabelWindow};
use crate::matrix::{ArtifactCache, BatchReport, MatrixAssembler};
use crate::runner::{ModelRunner, UnitOutcome, UnitReport};
use crate::RESULTS_NAMESPACE;
use riskfold_core::{all_dates, compute_folds, Fold, PipelineConfig, Result, Value};
use riskfold_store::{Column, ColumnType, Store, Table, TableRef};
use std::sync::Arc;
use uuid::Uuid;

/// Table of validation scores
pub const PREDICTIONS_TABLE: &str = "predictions";

/// Table of top-k metrics
pub const EVALUATIONS_TABLE: &str = "evaluations";

/// Table of nonzero feature importances
pub const FEATURE_IMPORTANCES_TABLE: &str = "feature_importances";

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Rebuild cohort, labels and features before assembling matrices
    pub recreate_sources: bool,
}

/// What one run produced
#[derive(Debug)]
pub struct RunSummary {
    pub experiment_id: Uuid,
    pub folds: Vec<Fold>,
    pub matrices: BatchReport,
    pub units: Vec<UnitReport>,
}

impl RunSummary {
    /// Folds that reached the model runner
    pub fn assembled_folds(&self) -> usize {
        self.matrices.available().len()
    }

    pub fn failed_units(&self) -> impl Iterator<Item = &UnitReport> {
        self.units.iter().filter(|u| !u.is_success())
    }

    pub fn is_success(&self) -> bool {
        self.matrices.is_success() && self.failed_units().next().is_none()
    }
}

pub struct Pipeline {
    store: Arc<dyn Store>,
    config: Arc<PipelineConfig>,
    cache: ArtifactCache,
}

impl Pipeline {
    /// Validates `config` and uses its `matrix.cache_dir`
    pub fn new(store: Arc<dyn Store>, config: PipelineConfig) -> Result<Self> {
        let cache = ArtifactCache::new(config.matrix.cache_dir.clone());
        Self::with_cache(store, config, cache)
    }

    pub fn with_cache(store: Arc<dyn Store>, config: PipelineConfig, cache: ArtifactCache) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            config: Arc::new(config),
            cache,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    pub fn folds(&self) -> Result<Vec<Fold>> {
        compute_folds(&self.config.temporal, self.config.months_future())
    }

    /// Rebuild cohort, labels and features for every as-of date of `folds`, then
    /// drop cached matrices built from the previous tables
    pub async fn recreate_sources(&self, folds: &[Fold]) -> Result<()> {
        let store = self.store.as_ref();
        let dates = all_dates(folds);

        let cohort = CohortBuilder::new(store, &self.config).build(&dates).await?;
        LabelBuilder::new(store, &self.config).build(&cohort).await?;
        FeatureBuilder::new(store, &self.config).build(&cohort).await?;

        let removed = self.cache.clear_all()?;
        tracing::info!(removed, "Invalidated matrix cache after source rebuild");
        Ok(())
    }

    /// Build per-definition split labels from the stored cohort
    pub async fn build_split_labels(&self, window: SplitLabelWindow) -> Result<EvaluationLabels> {
        let cohort = load_cohort(self.store.as_ref()).await?;
        LabelBuilder::new(self.store.as_ref(), &self.config)
            .build_split_labels(&cohort, window)
            .await
    }

    pub async fn run(&self, options: RunOptions) -> Result<RunSummary> {
        let experiment_id = Uuid::new_v4();
        let folds = self.folds()?;
        tracing::info!(
            experiment_id = %experiment_id,
            folds = folds.len(),
            jurisdiction = %self.config.county,
            "Starting pipeline run"
        );

        if options.recreate_sources {
            self.recreate_sources(&folds).await?;
        }

        let assembler = MatrixAssembler::new(
            Arc::clone(&self.store),
            Arc::clone(&self.config),
            self.cache.clone(),
        )?;
        let (labeled, matrices) = assembler.assemble(&folds).await?;
        for (index, err) in matrices.failures() {
            tracing::warn!(fold = index, error = %err, "Fold skipped");
        }

        let units = ModelRunner::from_config(&self.config).run(labeled).await;
        self.write_results(experiment_id, &units).await?;

        let summary = RunSummary {
            experiment_id,
            folds,
            matrices,
            units,
        };
        tracing::info!(
            experiment_id = %experiment_id,
            units = summary.units.len(),
            failed_units = summary.failed_units().count(),
            "Pipeline run finished"
        );
        Ok(summary)
    }

    async fn write_results(&self, experiment_id: Uuid, units: &[UnitReport]) -> Result<()> {
        let experiment = experiment_id.to_string();
        let mut predictions = results_layout(&[
            Column::new("person_id", ColumnType::Integer),
            Column::new("as_of_date", ColumnType::Date),
            Column::new("county", ColumnType::Text),
            Column::new("score", ColumnType::Float),
            Column::new("label", ColumnType::Bool),
            Column::new("rank_k", ColumnType::Integer),
            Column::new("county_rank_k", ColumnType::Integer),
        ]);
        let mut evaluations = results_layout(&[
            Column::new("county", ColumnType::Text),
            Column::new("metric", ColumnType::Text),
            Column::new("k", ColumnType::Integer),
            Column::new("value", ColumnType::Float),
        ]);
        let mut importances = results_layout(&[
            Column::new("feature", ColumnType::Text),
            Column::new("importance", ColumnType::Float),
        ]);

        for unit in units {
            let UnitOutcome::Completed {
                predictions: unit_predictions,
                evaluations: unit_evaluations,
                feature_importances,
            } = &unit.outcome
            else {
                continue;
            };
            let prefix = || {
                vec![
                    Value::from(experiment.as_str()),
                    Value::from(unit.model_name),
                    Value::from(unit.fold_index as i64),
                    Value::from(unit.validation_date),
                    Value::from(unit.jurisdiction.to_string()),
                ]
            };

            for p in unit_predictions {
                let mut row = prefix();
                row.extend([
                    Value::from(p.key.person_id),
                    Value::from(p.key.as_of_date),
                    Value::from(p.county.as_str()),
                    Value::from(p.score),
                    Value::from(p.label),
                    Value::from(p.rank as i64),
                    Value::from(p.county_rank as i64),
                ]);
                predictions.push_row(row)?;
            }
            for e in unit_evaluations {
                let mut row = prefix();
                row.extend([
                    e.county.map_or(Value::from("both"), |c| Value::from(c.as_str())),
                    Value::from(e.metric.as_str()),
                    Value::from(e.k as i64),
                    Value::from(e.value),
                ]);
                evaluations.push_row(row)?;
            }
            for (feature, importance) in feature_importances {
                let mut row = prefix();
                row.extend([Value::from(feature.as_str()), Value::from(*importance)]);
                importances.push_row(row)?;
            }
        }

        self.store.create_namespace(RESULTS_NAMESPACE).await?;
        for (name, table) in [
            (PREDICTIONS_TABLE, predictions),
            (EVALUATIONS_TABLE, evaluations),
            (FEATURE_IMPORTANCES_TABLE, importances),
        ] {
            let rows = table.len();
            self.store
                .replace_table(&TableRef::new(RESULTS_NAMESPACE, name), table)
                .await?;
            tracing::info!(table = name, rows, "Wrote results");
        }
        Ok(())
    }
}

/// Unit columns shared by every results table, followed by `columns`
fn results_layout(columns: &[Column]) -> Table {
    let mut layout = vec![
        Column::new("experiment_id", ColumnType::Text),
        Column::new("model", ColumnType::Text),
        Column::new("fold", ColumnType::Integer),
        Column::new("validation_date", ColumnType::Date),
        Column::new("jurisdiction", ColumnType::Text),
    ];
    layout.extend_from_slice(columns);
    Table::new(layout)
}
