//! connectome-inference - Group-level permutation inference for connectivity matrices
//!
//! Compares per-subject connectivity matrices between groups (independent or
//! paired) or against a covariate (regression), and derives uncorrected, FDR
//! and permutation-based family-wise error thresholds. Null distributions of
//! the max/min statistic are persisted so they can be resumed and extended.
//!
//! # Example
//! ```
//! use connectome_inference::{
//!     ComparisonContext, ConnectivityMatrix, DesignSpecification, Entities, Group,
//!     GroupComparison, InMemoryStorage, InferenceConfig, MemoryCacheStore,
//! };
//!
//! let mut storage = InMemoryStorage::new();
//! for (k, subject) in ["01", "02", "03", "04", "05", "06"].iter().enumerate() {
//!     let shift = if k < 3 { 0.0 } else { 1.0 };
//!     let v = 0.1 * k as f64;
//!     let matrix = ConnectivityMatrix::from_upper_triangle(3, &[shift + v, v * v, 0.5 - v]).unwrap();
//!     storage.insert(*subject, Entities::new(), "correlation", matrix);
//! }
//!
//! let spec = DesignSpecification::independent(
//!     Group::new("patients", ["01", "02", "03"]),
//!     Group::new("controls", ["04", "05", "06"]),
//! );
//! let cache = MemoryCacheStore::new();
//! let comparison = GroupComparison::new(InferenceConfig::quick(), &storage, &cache);
//! let result = comparison
//!     .run(&spec, &ComparisonContext::new("patientsVersusControls", "correlation"))
//!     .unwrap();
//! assert_eq!(result.thresholds.n_permutations_used, 20);
//! ```

pub mod config;
pub mod correction;
pub mod design;
pub mod diagnostics;
pub mod error;
pub mod matrix;
pub mod permutation;
pub mod pipeline;
pub mod sample;
pub mod statistics;

pub use config::InferenceConfig;
pub use correction::{MultipleComparisonCorrector, ThresholdSet};
pub use design::{ComparisonContext, DesignKind, DesignSpecification, Entities, Group, SubjectId};
pub use diagnostics::{Diagnostic, Severity};
pub use error::{
    ArtifactError, CacheCorruptionError, CollectionError, DesignError, InferenceError,
    NumericalError, Result, TableError,
};
pub use matrix::{ConnectivityMatrix, Mask, StatMatrix};
pub use permutation::{
    CacheKey, CacheStore, EngineStatus, FileCacheStore, MemoryCacheStore, NullDistributionCache,
    PermutationEngine, StopFlag,
};
pub use pipeline::{GroupComparison, GroupResult};
pub use sample::{
    DesignMatrix, InMemoryStorage, ParticipantTableProvider, Sample, SampleCollector,
    StorageProvider, TsvParticipantTable,
};
pub use statistics::{ObservedStatistic, TestStatisticComputer};
