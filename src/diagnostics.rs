//! Structured diagnostic events
//!
//! Non-fatal conditions are returned to the caller as [`Diagnostic`] values and
//! also logged through `tracing`, so an orchestration layer can surface them in a
//! report without scraping logs.

use serde::Serialize;
use std::fmt;

/// How much attention a diagnostic deserves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
}

/// A non-fatal event raised during a comparison
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Diagnostic {
    /// Fewer permutations than needed for stable tail percentiles
    LowPermutationCount { requested: usize, threshold: usize },

    /// Existing null distribution rows were reused
    CacheResumed { key: String, rows: usize },

    /// The persisted cache was unreadable and was reseeded from the observed statistic
    CacheRecovered { key: String, reason: String },

    /// A half-written final row was dropped; earlier rows were kept
    TornTailDropped { key: String, rows_kept: usize },

    /// The cache was written with a different base seed
    SeedMismatch {
        key: String,
        cached_seed: u64,
        requested_seed: u64,
    },

    /// Another writer appended the row this worker computed
    ConcurrentAppend { key: String, row: usize },

    /// The run stopped early at the caller's request
    Interrupted { rows: usize, target_rows: usize },

    /// Group guessing did not find exactly two groups
    UnexpectedGroupCount { found: usize },

    /// The participant table has no `group` column
    NoGroupColumn,
}

impl Diagnostic {
    pub fn severity(&self) -> Severity {
        match self {
            Diagnostic::CacheResumed { .. } | Diagnostic::ConcurrentAppend { .. } => {
                Severity::Info
            }
            _ => Severity::Warning,
        }
    }

    /// Log through `tracing` at a level matching the severity
    pub fn emit(&self) {
        match self.severity() {
            Severity::Info => tracing::info!("{}", self),
            Severity::Warning => tracing::warn!("{}", self),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::LowPermutationCount {
                requested,
                threshold,
            } => write!(
                f,
                "running permutation analysis with {} permutations; fewer than {} gives unstable FWE thresholds",
                requested, threshold
            ),
            Diagnostic::CacheResumed { key, rows } => {
                write!(f, "loaded {} existing null distribution rows for {}", rows, key)
            }
            Diagnostic::CacheRecovered { key, reason } => write!(
                f,
                "discarded corrupt null distribution for {} ({}); recomputing from the observed statistic",
                key, reason
            ),
            Diagnostic::TornTailDropped { key, rows_kept } => write!(
                f,
                "dropped a partially written row from {}; kept {} rows",
                key, rows_kept
            ),
            Diagnostic::SeedMismatch {
                key,
                cached_seed,
                requested_seed,
            } => write!(
                f,
                "null distribution for {} was started with seed {}, continuing with seed {}",
                key, cached_seed, requested_seed
            ),
            Diagnostic::ConcurrentAppend { key, row } => write!(
                f,
                "row {} of {} was appended by another writer; reloading",
                row, key
            ),
            Diagnostic::Interrupted { rows, target_rows } => write!(
                f,
                "stopped after {} of {} null distribution rows",
                rows, target_rows
            ),
            Diagnostic::UnexpectedGroupCount { found } => {
                write!(f, "expected exactly two groups, but found {}", found)
            }
            Diagnostic::NoGroupColumn => {
                f.write_str("no group column in the participant table, cannot guess groups")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_low_permutation_message() {
        let d = Diagnostic::LowPermutationCount {
            requested: 20,
            threshold: 5000,
        };
        assert_eq!(d.severity(), Severity::Warning);
        assert!(d.to_string().contains("20 permutations"));
    }

    #[test]
    fn test_resume_is_info() {
        let d = Diagnostic::CacheResumed {
            key: "k".to_string(),
            rows: 3,
        };
        assert_eq!(d.severity(), Severity::Info);
    }

    #[test]
    fn test_serializes_with_event_tag() {
        let d = Diagnostic::NoGroupColumn;
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, r#"{"event":"no_group_column"}"#);
    }
}
