//! Matrix assembler
//!
//! Builds (or loads) the master matrix, then one artifact per (fold, jurisdiction).
//! Fold builds run on the blocking pool and are independent of each other: a failed
//! fold is recorded in the [`BatchReport`] and the remaining folds still build.
//! Configuration errors abort the batch.

use super::cache::{cache_key, sha256_hex, ArtifactCache, ArtifactKind, CacheState};
use super::fold::{jurisdiction_columns, slice_fold, FoldMatrices, LabeledMatrix};
use super::master::MasterMatrix;
use crate::cohort::load_cohort;
use crate::features::list_feature_tables;
use crate::labels::load_labels;
use chrono::NaiveDate;
use riskfold_core::{all_dates, Error, Fold, Jurisdiction, PipelineConfig, Result};
use riskfold_store::{Store, Table, TableRef};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Outcome of one fold in a batch
#[derive(Debug)]
pub enum FoldOutcome {
    Built,
    Cached,
    Failed(Error),
}

/// Per-fold results of a batch build, in fold order
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<(usize, FoldOutcome)>,
}

impl BatchReport {
    pub fn failures(&self) -> impl Iterator<Item = (usize, &Error)> {
        self.outcomes.iter().filter_map(|(i, outcome)| match outcome {
            FoldOutcome::Failed(err) => Some((*i, err)),
            _ => None,
        })
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    /// Indices of folds whose artifact is available
    pub fn available(&self) -> Vec<usize> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| !matches!(outcome, FoldOutcome::Failed(_)))
            .map(|(i, _)| *i)
            .collect()
    }
}

/// Labeled train and validation matrices of one fold
#[derive(Debug, Clone)]
pub struct LabeledFold {
    pub index: usize,
    pub fold: Fold,
    pub jurisdiction: Jurisdiction,
    pub train: LabeledMatrix,
    pub validation: LabeledMatrix,
}

#[derive(Serialize)]
struct MasterSpec<'a> {
    dates: &'a [NaiveDate],
    schema_version: &'a str,
}

#[derive(Serialize)]
struct FoldSpec<'a> {
    fold: &'a Fold,
    jurisdiction: Jurisdiction,
    schema_version: &'a str,
}

/// Assembles master and fold matrices for one configuration
pub struct MatrixAssembler {
    store: Arc<dyn Store>,
    config: Arc<PipelineConfig>,
    cache: ArtifactCache,
    schema_version: String,
}

impl MatrixAssembler {
    pub fn new(store: Arc<dyn Store>, config: Arc<PipelineConfig>, cache: ArtifactCache) -> Result<Self> {
        let schema_version = sha256_hex(config.schema_source()?.as_bytes());
        Ok(Self {
            store,
            config,
            cache,
            schema_version,
        })
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    /// Digest of the upstream definitions baked into every key
    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    pub fn master_key(&self, folds: &[Fold]) -> Result<String> {
        cache_key(&MasterSpec {
            dates: &all_dates(folds),
            schema_version: &self.schema_version,
        })
    }

    pub fn fold_key(&self, fold: &Fold) -> Result<String> {
        cache_key(&FoldSpec {
            fold,
            jurisdiction: self.config.county,
            schema_version: &self.schema_version,
        })
    }

    /// Load the master matrix for `folds`, building and caching it when needed
    pub async fn master(&self, folds: &[Fold]) -> Result<Arc<MasterMatrix>> {
        let key = self.master_key(folds)?;
        if let Some(master) = self.cache.load::<MasterMatrix>(ArtifactKind::Master, &key)? {
            tracing::info!(key = %key, rows = master.len(), "Loaded cached master matrix");
            return Ok(Arc::new(master));
        }

        let dates: BTreeSet<NaiveDate> = all_dates(folds).into_iter().collect();
        let cohort = load_cohort(self.store.as_ref()).await?.restrict_to_dates(&dates);
        let tables = list_feature_tables(self.store.as_ref()).await?;
        let categorical = self.read_tables(&tables.categorical).await?;
        let numerical = self.read_tables(&tables.numerical).await?;

        let master = MasterMatrix::join(
            &cohort,
            &categorical,
            &numerical,
            &self.config.matrix.mean_impute_column,
        )?;
        self.cache.store(ArtifactKind::Master, &key, &master)?;
        tracing::info!(key = %key, rows = master.len(), dates = dates.len(), "Built master matrix");
        Ok(Arc::new(master))
    }

    async fn read_tables(&self, tables: &[TableRef]) -> Result<Vec<(TableRef, Table)>> {
        let mut out = Vec::with_capacity(tables.len());
        for table in tables {
            let data = self.store.read_table(table, &[]).await?;
            out.push((table.clone(), data));
        }
        Ok(out)
    }

    /// Build every fold artifact that is not cached yet. `only` restricts the batch to
    /// the given fold indices.
    pub async fn write_matrices(&self, folds: &[Fold], only: Option<&[usize]>) -> Result<BatchReport> {
        let master = self.master(folds).await?;
        let jurisdiction = self.config.county;
        let allowed = Arc::new(jurisdiction_columns(&self.config, jurisdiction));
        let mean_impute_column = self.config.matrix.mean_impute_column.clone();

        let mut report = BatchReport::default();
        let mut handles = Vec::new();
        for (index, fold) in folds.iter().enumerate() {
            if only.map_or(false, |only| !only.contains(&index)) {
                continue;
            }
            let key = match self.fold_key(fold) {
                Ok(key) => key,
                Err(err) => {
                    report.outcomes.push((index, FoldOutcome::Failed(err)));
                    continue;
                }
            };
            match self.cache.verify(ArtifactKind::Fold, &key) {
                Ok(true) => {
                    tracing::debug!(fold = index, key = %key, "Fold matrices already cached");
                    report.outcomes.push((index, FoldOutcome::Cached));
                    continue;
                }
                Ok(false) => {}
                Err(err) => {
                    report.outcomes.push((index, FoldOutcome::Failed(err)));
                    continue;
                }
            }

            let master = Arc::clone(&master);
            let allowed = Arc::clone(&allowed);
            let cache = self.cache.clone();
            let fold = fold.clone();
            let mean_impute_column = mean_impute_column.clone();
            handles.push(async move {
                let built = tokio::task::spawn_blocking(move || {
                    let matrices = slice_fold(
                        &master,
                        &fold,
                        jurisdiction,
                        (*allowed).as_ref(),
                        &mean_impute_column,
                    )?;
                    cache.store(ArtifactKind::Fold, &key, &matrices)
                })
                .await
                .map_err(|e| Error::Cache(format!("Fold build task failed: {}", e)))
                .and_then(|result| result);
                (index, built)
            });
        }

        for (index, built) in futures::future::join_all(handles).await {
            match built {
                Ok(()) => {
                    tracing::info!(fold = index, "Built fold matrices");
                    report.outcomes.push((index, FoldOutcome::Built));
                }
                Err(err) => {
                    tracing::error!(fold = index, error = %err, "Fold matrices failed");
                    report.outcomes.push((index, FoldOutcome::Failed(err)));
                }
            }
        }
        report.outcomes.sort_by_key(|(index, _)| *index);

        let config_failure = report.outcomes.iter().position(|(_, outcome)| {
            matches!(outcome, FoldOutcome::Failed(err) if err.is_config())
        });
        if let Some(position) = config_failure {
            if let (_, FoldOutcome::Failed(err)) = report.outcomes.swap_remove(position) {
                return Err(err);
            }
        }
        Ok(report)
    }

    /// Cache state of every fold artifact, in fold order
    pub fn check_all_fold_matrices(&self, folds: &[Fold]) -> Result<Vec<CacheState>> {
        folds
            .iter()
            .map(|fold| Ok(self.cache.state(ArtifactKind::Fold, &self.fold_key(fold)?)))
            .collect()
    }

    /// Load one fold artifact; fails when it is absent or corrupt
    pub fn load_fold_matrices(&self, fold: &Fold) -> Result<FoldMatrices> {
        let key = self.fold_key(fold)?;
        self.cache
            .load::<FoldMatrices>(ArtifactKind::Fold, &key)?
            .ok_or_else(|| {
                Error::Cache(format!(
                    "Fold matrices for validation date {} are not cached",
                    fold.validation_date
                ))
            })
    }

    /// Build the fold artifacts and join labels to each available fold.
    ///
    /// Rows without a label are dropped (inner join). Folds that failed to build or to
    /// join stay in the report as failures.
    pub async fn assemble(&self, folds: &[Fold]) -> Result<(Vec<LabeledFold>, BatchReport)> {
        let mut report = self.write_matrices(folds, None).await?;
        let mut assembled = Vec::new();

        for index in report.available() {
            let fold = &folds[index];
            match self.label_fold(index, fold).await {
                Ok(labeled) => assembled.push(labeled),
                Err(err) if err.is_fold_local() => {
                    tracing::error!(fold = index, error = %err, "Fold labels failed");
                    if let Some((_, outcome)) = report.outcomes.iter_mut().find(|(i, _)| *i == index) {
                        *outcome = FoldOutcome::Failed(err);
                    }
                }
                Err(err) => return Err(err),
            }
        }
        Ok((assembled, report))
    }

    async fn label_fold(&self, index: usize, fold: &Fold) -> Result<LabeledFold> {
        let matrices = self.load_fold_matrices(fold)?;
        let labels = load_labels(self.store.as_ref(), &self.config, fold).await?;

        let train = matrices.train.join_labels(&labels.train);
        let validation = matrices.validation.join_labels(&labels.validation);
        train.ensure_complete()?;
        validation.ensure_complete()?;
        if train.is_empty() {
            return Err(Error::EmptySlice {
                slice: "labeled train",
                validation_date: fold.validation_date,
            });
        }
        if validation.is_empty() {
            return Err(Error::EmptySlice {
                slice: "labeled validation",
                validation_date: fold.validation_date,
            });
        }

        tracing::debug!(
            fold = index,
            train = train.len(),
            validation = validation.len(),
            "Joined fold labels"
        );
        Ok(LabeledFold {
            index,
            fold: matrices.fold,
            jurisdiction: matrices.jurisdiction,
            train,
            validation,
        })
    }
}
