//! riskfold pipeline - cohort, labels, features, matrices and model runs
//!
//! Stages run in dependency order. The cohort, label and feature builders mutate the
//! store; matrix assembly only reads from it and writes content-addressed artifacts
//! to disk; the model runner consumes the assembled fold matrices.
//!
//! ```text
//! compute_folds -> CohortBuilder -> LabelBuilder -> FeatureBuilder
//!                                                        |
//!                 ModelRunner <- join_labels <- MatrixAssembler
//! ```

pub mod cohort;
pub mod features;
pub mod labels;
pub mod matrix;
pub mod pipeline;
pub mod runner;

pub use cohort::{load_cohort, Cohort, CohortBuilder, CohortEntry};
pub use features::{list_feature_tables, FeatureBuilder, FeatureTableNames};
pub use labels::{
    label_counts, load_labels, EvaluationLabels, FoldLabels, LabelBuilder, LabelSet,
    SplitLabel, SplitLabelWindow,
};
pub use matrix::{
    ArtifactCache, ArtifactKind, BatchReport, CacheState, FeatureMatrix, FoldMatrices,
    FoldOutcome, LabeledFold, LabeledMatrix, MasterMatrix, MatrixAssembler, OneHotEncoder,
    StandardScaler,
};
pub use pipeline::{Pipeline, RunOptions, RunSummary};
pub use runner::{
    build_model, evaluate, precision_at_k, rank_predictions, recall_at_k, Evaluation, FeatureRanker,
    LinearRanker, Model, ModelRunner, Prediction, UnitOutcome, UnitReport,
};

/// Namespace of the cohort and label tables
pub const MODELING_NAMESPACE: &str = "modeling";

/// Namespace rebuilt by the feature builder
pub const FEATURES_NAMESPACE: &str = "features";

/// Namespace of predictions and evaluations
pub const RESULTS_NAMESPACE: &str = "results";
