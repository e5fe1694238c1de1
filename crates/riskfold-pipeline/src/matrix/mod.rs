//! Matrix assembly: master matrix, fold slicing, train-fitted transforms and the
//! on-disk artifact cache

mod cache;
mod driver;
mod encoding;
mod fold;
mod master;

pub use cache::{cache_key, sha256_hex, ArtifactCache, ArtifactKind, CacheState};
pub use driver::{BatchReport, FoldOutcome, LabeledFold, MatrixAssembler};
pub use encoding::{OneHotEncoder, StandardScaler};
pub use fold::{jurisdiction_columns, slice_fold, FeatureMatrix, FoldMatrices, LabeledMatrix};
pub use master::{MasterMatrix, MasterRow};
