//! Error taxonomy for group-level inference
//!
//! Every fatal error aborts the current comparison only. Cache corruption is the one
//! recoverable case: the engine reseeds and reports a diagnostic instead of failing.

use thiserror::Error;

/// Failure of an injected storage provider for a single artifact lookup
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ArtifactError {
    #[error("no artifact found")]
    NotFound,

    #[error("multiple artifacts match: {}", .0.join(", "))]
    Ambiguous(Vec<String>),

    #[error("artifact is not a valid connectivity matrix: {0}")]
    Invalid(String),
}

/// Failure of a participant table provider
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TableError {
    #[error("column '{0}' not found in participant table")]
    MissingColumn(String),

    #[error("subject '{0}' not found in participant table")]
    MissingSubject(String),

    #[error("invalid value '{value}' for subject '{subject}' in column '{column}'")]
    InvalidValue {
        subject: String,
        column: String,
        value: String,
    },

    #[error("failed to read participant table: {0}")]
    Read(String),
}

/// Missing or ambiguous per-subject data
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollectionError {
    #[error("artifact for subject '{subject}' ({descriptor}): {source}")]
    Artifact {
        subject: String,
        descriptor: String,
        #[source]
        source: ArtifactError,
    },

    #[error("subject '{subject}' has {found} nodes, expected {expected}")]
    NodeCountMismatch {
        subject: String,
        expected: usize,
        found: usize,
    },

    #[error("participant table: {0}")]
    Table(#[source] TableError),

    #[error("participant table row {position} is subject '{found}', expected '{expected}'")]
    TableOrder {
        position: usize,
        expected: String,
        found: String,
    },
}

/// Invalid experimental design or configuration, detected before any permutation work
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DesignError {
    #[error("group '{group}' has {size} subject(s), at least 2 are required")]
    GroupTooSmall { group: String, size: usize },

    #[error("paired design requires equal counts, got {condition_a} and {condition_b}")]
    PairedCountMismatch {
        condition_a: usize,
        condition_b: usize,
    },

    #[error("paired design requires at least 2 pairs, got {0}")]
    TooFewPairs(usize),

    #[error("subject '{subject}' listed more than once in {list}")]
    DuplicateSubject { subject: String, list: String },

    #[error("regression column '{0}' is missing from the participant table")]
    MissingColumn(String),

    #[error("regression needs more subjects than parameters: {subjects} subjects, {parameters} parameters")]
    InsufficientDegreesOfFreedom { subjects: usize, parameters: usize },

    #[error("design matrix has {rows} rows but {subjects} subjects were collected")]
    DesignRowMismatch { rows: usize, subjects: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Fatal numerical failure of the statistical model
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NumericalError {
    #[error("design matrix is rank deficient: rank {rank} < {columns} columns")]
    RankDeficient { rank: usize, columns: usize },

    #[error("connection ({row}, {col}) has a non-finite statistic (zero variance or perfect fit)")]
    DegenerateConnection { row: usize, col: usize },

    #[error("statistic is NaN for every connection")]
    UndefinedStatistic,
}

/// The persisted null distribution could not be parsed
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheCorruptionError {
    #[error("line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("missing header")]
    MissingHeader,

    #[error("unsupported schema version {found}, expected {expected}")]
    SchemaVersion { expected: u32, found: u32 },
}

/// Top-level error for one comparison
#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("collection failed: {0}")]
    Collection(#[from] CollectionError),

    #[error("invalid design: {0}")]
    Design(#[from] DesignError),

    #[error("numerical failure: {0}")]
    Numerical(#[from] NumericalError),

    #[error("null distribution cache is corrupt: {0}")]
    CacheCorruption(#[from] CacheCorruptionError),

    #[error("null distribution cache file belongs to key {found}, expected {expected}")]
    CacheKeyConflict { expected: String, found: String },

    #[error("null distribution cache IO error: {0}")]
    CacheIo(#[from] std::io::Error),
}

/// Result type for inference operations
pub type Result<T> = std::result::Result<T, InferenceError>;
