// Configuration for group-level permutation inference
//
// Thresholds are plain significance levels; the permutation count controls how
// well the tails of the max/min null distributions are estimated.

use crate::error::DesignError;
use serde::{Deserialize, Serialize};

/// Permutation count below which tail percentiles are considered unreliable
pub const DEFAULT_RELIABILITY_THRESHOLD: usize = 5000;

/// Configuration for one group-level comparison
///
/// # Example
/// ```
/// use connectome_inference::InferenceConfig;
///
/// let config = InferenceConfig::default();
/// assert_eq!(config.fdr_alpha, 0.05);
/// assert_eq!(config.n_permutations, 20);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Per-connection significance level, no correction
    ///
    /// Default: 0.001
    pub uncorrected_alpha: f64,

    /// Benjamini-Hochberg false discovery rate level
    ///
    /// Default: 0.05
    pub fdr_alpha: f64,

    /// Family-wise error level for the max-statistic permutation threshold
    ///
    /// Split evenly between the positive and negative tails.
    ///
    /// Default: 0.05
    pub fwe_alpha: f64,

    /// Number of permutations beyond the observed statistic
    ///
    /// Small values (e.g. 20) are fine for testing a pipeline. Reliable FWE
    /// thresholds need thousands.
    ///
    /// Default: 20
    pub n_permutations: usize,

    /// Base seed; permutation k draws from a generator derived from (seed, k)
    pub seed: u64,

    /// Below this permutation count a reliability diagnostic is emitted
    ///
    /// Default: 5000
    pub reliability_threshold: usize,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            uncorrected_alpha: 0.001,
            fdr_alpha: 0.05,
            fwe_alpha: 0.05,
            n_permutations: 20,
            seed: 0,
            reliability_threshold: DEFAULT_RELIABILITY_THRESHOLD,
        }
    }
}

impl InferenceConfig {
    /// Fast configuration for smoke-testing a pipeline
    pub fn quick() -> Self {
        Self::default()
    }

    /// Configuration with enough permutations for reportable FWE thresholds
    pub fn publication() -> Self {
        Self {
            n_permutations: 10_000,
            ..Self::default()
        }
    }

    pub fn with_permutations(mut self, n_permutations: usize) -> Self {
        self.n_permutations = n_permutations;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_uncorrected_alpha(mut self, alpha: f64) -> Self {
        self.uncorrected_alpha = alpha;
        self
    }

    pub fn with_fdr_alpha(mut self, alpha: f64) -> Self {
        self.fdr_alpha = alpha;
        self
    }

    pub fn with_fwe_alpha(mut self, alpha: f64) -> Self {
        self.fwe_alpha = alpha;
        self
    }

    /// Whether the permutation count is below the reliability threshold
    pub fn is_low_permutation_count(&self) -> bool {
        self.n_permutations < self.reliability_threshold
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), DesignError> {
        for (name, alpha) in [
            ("uncorrected_alpha", self.uncorrected_alpha),
            ("fdr_alpha", self.fdr_alpha),
            ("fwe_alpha", self.fwe_alpha),
        ] {
            if !(alpha > 0.0 && alpha < 1.0) {
                return Err(DesignError::InvalidConfig(format!(
                    "{} must be in (0, 1), got {}",
                    name, alpha
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = InferenceConfig::default();
        assert_eq!(config.uncorrected_alpha, 0.001);
        assert_eq!(config.fdr_alpha, 0.05);
        assert_eq!(config.fwe_alpha, 0.05);
        assert_eq!(config.n_permutations, 20);
        assert!(config.is_low_permutation_count());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_publication_config() {
        let config = InferenceConfig::publication();
        assert_eq!(config.n_permutations, 10_000);
        assert!(!config.is_low_permutation_count());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_fwe_alpha() {
        let config = InferenceConfig::default().with_fwe_alpha(1.5);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("fwe_alpha"));
    }

    #[test]
    fn test_zero_alpha_rejected() {
        let config = InferenceConfig::default().with_fdr_alpha(0.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_nan_alpha_rejected() {
        let config = InferenceConfig::default().with_uncorrected_alpha(f64::NAN);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: InferenceConfig =
            serde_json::from_str(r#"{"n_permutations": 5000, "seed": 7}"#).unwrap();
        assert_eq!(config.n_permutations, 5000);
        assert_eq!(config.seed, 7);
        assert_eq!(config.fdr_alpha, 0.05);
        assert!(!config.is_low_permutation_count());
    }
}
