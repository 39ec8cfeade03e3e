//! Multiple comparison correction
//!
//! Three masks are derived from one observed statistic:
//!
//! - uncorrected: `p < uncorrected_alpha`
//! - FDR: Benjamini-Hochberg step-up over the M unique upper-triangle tests
//! - FWE: two-tailed max-statistic threshold from the permutation null
//!   distribution, split evenly between the max and min tails
//!
//! All masks are symmetric and false on the diagonal.

use crate::config::InferenceConfig;
use crate::matrix::{Mask, StatMatrix};
use crate::permutation::NullDistributionCache;
use crate::statistics::ObservedStatistic;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Percentile with linear interpolation between order statistics
///
/// `q` is in percent. Position `q/100 · (n − 1)` in the sorted values is
/// interpolated between its neighbours; an infinite neighbour absorbs the
/// interpolation. `None` for an empty slice.
pub fn percentile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let position = (q / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    let (lo, hi) = (sorted[lower], sorted[upper]);
    if fraction == 0.0 || lo == hi {
        return Some(lo);
    }
    Some(match (lo.is_infinite(), hi.is_infinite()) {
        (false, false) => lo + (hi - lo) * fraction,
        (true, false) => lo,
        (false, true) => hi,
        (true, true) if fraction < 0.5 => lo,
        (true, true) => hi,
    })
}

/// Benjamini-Hochberg rejections at level `alpha`
///
/// Rejects every hypothesis ranked at or below the largest rank k with
/// `p(k) ≤ k/m · alpha`. NaN p-values are never rejected.
pub fn benjamini_hochberg(p_values: &[f64], alpha: f64) -> Vec<bool> {
    let m = p_values.len();
    let mut order: Vec<usize> = (0..m).collect();
    order.sort_by(|&a, &b| p_values[a].total_cmp(&p_values[b]));

    let cutoff = order
        .iter()
        .enumerate()
        .filter(|(rank, &i)| p_values[i] <= (rank + 1) as f64 / m as f64 * alpha)
        .map(|(rank, _)| rank + 1)
        .last()
        .unwrap_or(0);

    let mut rejected = vec![false; m];
    for &i in &order[..cutoff] {
        rejected[i] = true;
    }
    rejected
}

fn off_diagonal(n: usize, f: impl Fn(usize, usize) -> bool) -> Mask {
    Mask::from_fn(n, |i, j| i != j && f(i, j))
}

pub fn uncorrected_mask(p_values: &StatMatrix, alpha: f64) -> Mask {
    off_diagonal(p_values.n(), |i, j| *p_values.get(i, j) < alpha)
}

pub fn fdr_mask(p_values: &StatMatrix, alpha: f64) -> Mask {
    let n = p_values.n();
    let rejected = benjamini_hochberg(&p_values.upper_triangle(), alpha);
    Mask::from_upper_triangle(n, &rejected, false).unwrap_or_else(|| Mask::filled(n, false))
}

pub fn fwe_mask(t_stats: &StatMatrix, t_max: f64, t_min: f64) -> Mask {
    off_diagonal(t_stats.n(), |i, j| {
        let t = *t_stats.get(i, j);
        t > t_max || t < t_min
    })
}

/// Thresholds and masks for one comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSet {
    pub uncorrected_alpha: f64,
    pub fdr_alpha: f64,
    pub fwe_alpha: f64,
    /// Upper FWE threshold on t
    pub fwe_max_stat: f64,
    /// Lower FWE threshold on t
    pub fwe_min_stat: f64,
    /// Permuted rows the FWE thresholds were estimated from
    pub n_permutations_used: usize,
    pub uncorrected_mask: Mask,
    pub fdr_mask: Mask,
    pub fwe_mask: Mask,
}

impl ThresholdSet {
    /// Scalar thresholds in the `thresholds.json` provenance layout
    pub fn to_thresholds_json(&self) -> serde_json::Value {
        serde_json::json!({
            "uncorrected_alpha": self.uncorrected_alpha,
            "fdr_alpha": self.fdr_alpha,
            "fwe_alpha": self.fwe_alpha,
            "fwe_permutations_results": {
                "max_t": self.fwe_max_stat,
                "min_t": self.fwe_min_stat,
                "n_permutations": self.n_permutations_used,
            },
        })
    }

    /// Write the provenance JSON, creating parent directories
    pub fn write_thresholds_json(&self, path: impl AsRef<Path>) -> crate::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text =
            serde_json::to_string_pretty(&self.to_thresholds_json()).map_err(std::io::Error::from)?;
        std::fs::write(path, text)?;
        Ok(())
    }
}

/// Applies the three corrections at configured levels
#[derive(Debug, Clone, PartialEq)]
pub struct MultipleComparisonCorrector {
    uncorrected_alpha: f64,
    fdr_alpha: f64,
    fwe_alpha: f64,
}

impl MultipleComparisonCorrector {
    pub fn new(config: &InferenceConfig) -> Self {
        Self {
            uncorrected_alpha: config.uncorrected_alpha,
            fdr_alpha: config.fdr_alpha,
            fwe_alpha: config.fwe_alpha,
        }
    }

    pub fn correct(
        &self,
        observed: &ObservedStatistic,
        null: &NullDistributionCache,
    ) -> ThresholdSet {
        let fwe_max_stat =
            percentile(&null.max_values(), (1.0 - self.fwe_alpha / 2.0) * 100.0).unwrap_or(f64::INFINITY);
        let fwe_min_stat =
            percentile(&null.min_values(), self.fwe_alpha / 2.0 * 100.0).unwrap_or(f64::NEG_INFINITY);

        tracing::info!(
            fwe_max_stat,
            fwe_min_stat,
            n_permutations = null.n_permutations(),
            "thresholds for max and min stat from the permutation null distribution"
        );

        ThresholdSet {
            uncorrected_alpha: self.uncorrected_alpha,
            fdr_alpha: self.fdr_alpha,
            fwe_alpha: self.fwe_alpha,
            fwe_max_stat,
            fwe_min_stat,
            n_permutations_used: null.n_permutations(),
            uncorrected_mask: uncorrected_mask(&observed.p_values, self.uncorrected_alpha),
            fdr_mask: fdr_mask(&observed.p_values, self.fdr_alpha),
            fwe_mask: fwe_mask(&observed.t_stats, fwe_max_stat, fwe_min_stat),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permutation::NullRow;
    use tempfile::TempDir;

    #[test]
    fn test_percentile_linear_interpolation() {
        let values = [4.0, 1.0, 3.0, 2.0];
        assert!((percentile(&values, 97.5).unwrap() - 3.925).abs() < 1e-12);
        assert!((percentile(&values, 2.5).unwrap() - 1.075).abs() < 1e-12);
        assert_eq!(percentile(&values, 50.0), Some(2.5));
        assert_eq!(percentile(&values, 100.0), Some(4.0));
        assert_eq!(percentile(&[7.0], 97.5), Some(7.0));
        assert_eq!(percentile(&[], 50.0), None);
    }

    #[test]
    fn test_percentile_with_infinite_values() {
        let values = [1.0, 2.0, f64::INFINITY, f64::INFINITY];
        assert_eq!(percentile(&values, 97.5), Some(f64::INFINITY));
        assert_eq!(percentile(&values, 50.0), Some(f64::INFINITY));
        assert!((percentile(&values, 25.0).unwrap() - 1.75).abs() < 1e-12);

        let low = [f64::NEG_INFINITY, -3.0, -1.0];
        assert_eq!(percentile(&low, 2.5), Some(f64::NEG_INFINITY));
        assert_eq!(percentile(&low, 100.0), Some(-1.0));
    }

    #[test]
    fn test_fwe_mask_with_infinite_null_is_empty() {
        let config = InferenceConfig::default();
        let observed = ObservedStatistic {
            t_stats: StatMatrix::from_upper_triangle(2, &[12.0], 0.0).unwrap(),
            p_values: StatMatrix::from_upper_triangle(2, &[1e-6], 1.0).unwrap(),
        };
        let null = NullDistributionCache::from_rows(
            0,
            vec![
                NullRow::new(12.0, 12.0),
                NullRow::new(f64::INFINITY, f64::INFINITY),
                NullRow::new(f64::NEG_INFINITY, f64::NEG_INFINITY),
            ],
        );
        let thresholds = MultipleComparisonCorrector::new(&config).correct(&observed, &null);
        assert_eq!(thresholds.fwe_max_stat, f64::INFINITY);
        assert_eq!(thresholds.fwe_min_stat, f64::NEG_INFINITY);
        assert_eq!(thresholds.fwe_mask.connection_count(), 0);
    }

    #[test]
    fn test_benjamini_hochberg_step_up() {
        // thresholds 0.01, 0.02, 0.03, 0.04, 0.05: rank 3 fails on its own but
        // is rejected because rank 4 passes
        let p = [0.04, 0.6, 0.01, 0.035, 0.02];
        assert_eq!(
            benjamini_hochberg(&p, 0.05),
            vec![true, false, true, true, true]
        );
    }

    #[test]
    fn test_benjamini_hochberg_no_rejection() {
        let p = [0.2, 0.5, 0.03];
        assert_eq!(benjamini_hochberg(&p, 0.05), vec![false, false, false]);
        assert!(benjamini_hochberg(&[], 0.05).is_empty());
    }

    fn observed() -> ObservedStatistic {
        ObservedStatistic {
            t_stats: StatMatrix::from_upper_triangle(3, &[5.0, -4.0, 0.5], 0.0).unwrap(),
            p_values: StatMatrix::from_upper_triangle(3, &[0.0001, 0.004, 0.7], 1.0).unwrap(),
        }
    }

    #[test]
    fn test_masks_symmetric_and_off_diagonal() {
        let null = NullDistributionCache::from_rows(
            0,
            vec![NullRow::new(5.0, -4.0), NullRow::new(3.0, -3.5), NullRow::new(2.0, -2.0)],
        );
        let thresholds =
            MultipleComparisonCorrector::new(&InferenceConfig::default()).correct(&observed(), &null);

        assert_eq!(thresholds.n_permutations_used, 2);
        assert!(thresholds.uncorrected_mask.get(0, 1) & thresholds.uncorrected_mask.get(1, 0));
        assert_eq!(thresholds.uncorrected_mask.connection_count(), 1);
        assert_eq!(thresholds.fdr_mask.connection_count(), 2);
        for mask in [&thresholds.uncorrected_mask, &thresholds.fdr_mask, &thresholds.fwe_mask] {
            assert!((0..3).all(|i| !mask.get(i, i)));
        }
        // t_max = percentile([2, 3, 5], 97.5) = 4.9, t_min = percentile([-4, -3.5, -2], 2.5) = -3.975
        assert!((thresholds.fwe_max_stat - 4.9).abs() < 1e-12);
        assert!((thresholds.fwe_min_stat + 3.975).abs() < 1e-12);
        assert!(*thresholds.fwe_mask.get(1, 0));
        assert!(*thresholds.fwe_mask.get(2, 0));
        assert!(!thresholds.fwe_mask.get(1, 2));
    }

    #[test]
    fn test_single_row_null_yields_empty_fwe_mask() {
        let null = NullDistributionCache::seeded(0, NullRow::new(5.0, -4.0));
        let thresholds =
            MultipleComparisonCorrector::new(&InferenceConfig::default()).correct(&observed(), &null);
        assert_eq!(thresholds.fwe_max_stat, 5.0);
        assert_eq!(thresholds.fwe_min_stat, -4.0);
        assert_eq!(thresholds.n_permutations_used, 0);
        assert_eq!(thresholds.fwe_mask.count(), 0);
    }

    #[test]
    fn test_thresholds_json_layout() {
        let null = NullDistributionCache::seeded(0, NullRow::new(5.0, -4.0));
        let thresholds =
            MultipleComparisonCorrector::new(&InferenceConfig::default()).correct(&observed(), &null);
        let json = thresholds.to_thresholds_json();
        assert_eq!(json["uncorrected_alpha"], 0.001);
        assert_eq!(json["fwe_permutations_results"]["max_t"], 5.0);
        assert_eq!(json["fwe_permutations_results"]["n_permutations"], 0);

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("group").join("cmp_thresholds.json");
        thresholds.write_thresholds_json(&path).unwrap();
        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, json);
    }
}
