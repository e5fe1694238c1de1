//! Feature builder
//!
//! Each configured source table yields up to two tables in the `features` namespace:
//! `<name>_cat` with categorical columns and `<name>_num` with numerical and aggregate
//! columns. Both carry one row per cohort entry, keyed by `(person_id, as_of_date)`.
//! The namespace is dropped and rebuilt on every run.

mod compute;

pub use compute::{compute_features, knowledge_cutoff, ComputedFeatures};

use crate::cohort::Cohort;
use crate::FEATURES_NAMESPACE;
use riskfold_core::{Error, PersonDate, PipelineConfig, Result};
use riskfold_store::{EventQuery, Store, TableRef};

/// Suffix of categorical feature tables
pub const CATEGORICAL_SUFFIX: &str = "_cat";

/// Suffix of numerical feature tables
pub const NUMERICAL_SUFFIX: &str = "_num";

/// Feature tables present in the store, partitioned by suffix
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureTableNames {
    pub categorical: Vec<TableRef>,
    pub numerical: Vec<TableRef>,
}

impl FeatureTableNames {
    pub fn is_empty(&self) -> bool {
        self.categorical.is_empty() && self.numerical.is_empty()
    }
}

/// Rebuilds the `features` namespace
pub struct FeatureBuilder<'a> {
    store: &'a dyn Store,
    config: &'a PipelineConfig,
}

impl<'a> FeatureBuilder<'a> {
    pub fn new(store: &'a dyn Store, config: &'a PipelineConfig) -> Self {
        Self { store, config }
    }

    /// Drop the namespace and write every feature table for every cohort entry
    pub async fn build(&self, cohort: &Cohort) -> Result<FeatureTableNames> {
        self.store.drop_namespace(FEATURES_NAMESPACE).await?;
        self.store.create_namespace(FEATURES_NAMESPACE).await?;

        let keys: Vec<PersonDate> = cohort.keys().copied().collect();
        let mut written = FeatureTableNames::default();

        for (name, table) in &self.config.features {
            let Some(latest) = keys
                .iter()
                .filter_map(|k| knowledge_cutoff(table, k.as_of_date))
                .max()
            else {
                tracing::warn!(table = %name, "No cohort entries; skipping feature table");
                continue;
            };

            let query = EventQuery::new(
                TableRef::new(self.config.source_namespace.as_str(), table.source_table(name)),
                table.source_columns().into_iter().collect(),
                table.knowledge_date.as_str(),
            )
            .on_or_before(latest);
            let source = self.store.fetch_events(&query).await?;

            let computed = compute_features(name, table, &source, &keys)?;
            if let Some(data) = computed.categorical {
                let target = TableRef::new(FEATURES_NAMESPACE, format!("{}{}", name, CATEGORICAL_SUFFIX));
                self.store.replace_table(&target, data).await?;
                written.categorical.push(target);
            }
            if let Some(data) = computed.numerical {
                let target = TableRef::new(FEATURES_NAMESPACE, format!("{}{}", name, NUMERICAL_SUFFIX));
                self.store.replace_table(&target, data).await?;
                written.numerical.push(target);
            }

            tracing::info!(
                table = %name,
                source_rows = source.len(),
                entries = keys.len(),
                "Built feature table"
            );
        }
        Ok(written)
    }
}

/// List the feature tables present in the store.
///
/// A table without a `_cat` or `_num` suffix means the namespace holds something the
/// builder did not write.
pub async fn list_feature_tables(store: &dyn Store) -> Result<FeatureTableNames> {
    let mut names = FeatureTableNames::default();
    for table in store.list_tables(FEATURES_NAMESPACE).await? {
        let target = TableRef::new(FEATURES_NAMESPACE, table.as_str());
        if table.ends_with(CATEGORICAL_SUFFIX) {
            names.categorical.push(target);
        } else if table.ends_with(NUMERICAL_SUFFIX) {
            names.numerical.push(target);
        } else {
            return Err(Error::Config(format!(
                "Feature table '{}' has neither a '{}' nor a '{}' suffix",
                target, CATEGORICAL_SUFFIX, NUMERICAL_SUFFIX
            )));
        }
    }
    Ok(names)
}
