//! Property-based tests for statistic symmetry, masks and null distributions
//!
//! Random subject matrices are generated per design; every statistic and mask
//! must be symmetric with an untested diagonal.

use connectome_inference::correction::{benjamini_hochberg, percentile};
use connectome_inference::permutation::{permutation_rng, PermutationEngine};
use connectome_inference::sample::{DesignMatrix, GroupSample, PairedSample, RegressionSample};
use connectome_inference::statistics::PermutedStatistic;
use connectome_inference::{
    CacheKey, ComparisonContext, ConnectivityMatrix, DesignSpecification, Group, InferenceConfig,
    MemoryCacheStore, MultipleComparisonCorrector, Sample, TestStatisticComputer,
};
use proptest::prelude::*;

const N: usize = 4;
const M: usize = N * (N - 1) / 2;

fn matrices(count: usize) -> impl Strategy<Value = Vec<ConnectivityMatrix>> {
    prop::collection::vec(prop::collection::vec(-1.0f64..1.0, M), count).prop_map(|subjects| {
        subjects
            .iter()
            .map(|values| ConnectivityMatrix::from_upper_triangle(N, values).unwrap())
            .collect()
    })
}

fn group(name: &str, offset: usize, matrices: Vec<ConnectivityMatrix>) -> GroupSample {
    GroupSample {
        name: name.to_string(),
        subjects: (0..matrices.len()).map(|k| format!("{:02}", offset + k)).collect(),
        matrices,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_independent_statistics_symmetric(a in matrices(3), b in matrices(4), seed in any::<u64>()) {
        let sample = Sample::independent(group("a", 0, a), group("b", 10, b)).unwrap();
        let computer = TestStatisticComputer::new(&sample).unwrap();
        let observed = computer.observed().unwrap();

        prop_assert!(observed.t_stats.is_symmetric());
        prop_assert!(observed.p_values.is_symmetric());
        for i in 0..N {
            prop_assert_eq!(*observed.t_stats.get(i, i), 0.0);
            prop_assert_eq!(*observed.p_values.get(i, i), 1.0);
        }
        for p in observed.p_values.upper_triangle() {
            prop_assert!((0.0..=1.0).contains(&p));
        }

        let permuted = computer.permuted_statistic(&mut permutation_rng(seed, 1)).unwrap();
        prop_assert!(permuted.is_symmetric());
    }

    #[test]
    fn prop_paired_statistics_symmetric(a in matrices(5), b in matrices(5)) {
        let pairs = (0..5).map(|k| (k.to_string(), k.to_string())).collect();
        let sample = Sample::Paired(PairedSample::new(pairs, a, b).unwrap());
        let observed = TestStatisticComputer::new(&sample).unwrap().observed().unwrap();
        prop_assert!(observed.t_stats.is_symmetric());
        prop_assert!(observed.p_values.is_symmetric());
    }

    #[test]
    fn prop_regression_statistics_symmetric(
        subjects in matrices(7),
        covariate in prop::collection::vec(0.0f64..100.0, 7),
    ) {
        let spread = covariate.iter().cloned().fold(f64::NEG_INFINITY, f64::max)
            - covariate.iter().cloned().fold(f64::INFINITY, f64::min);
        prop_assume!(spread > 1.0);

        let ids = (0..7).map(|k| k.to_string()).collect();
        let design = DesignMatrix::new(
            ids,
            vec!["age".to_string()],
            covariate.iter().map(|c| vec![*c]).collect(),
        ).unwrap();
        let sample = Sample::Regression(RegressionSample::new(subjects, design).unwrap());
        let observed = TestStatisticComputer::new(&sample).unwrap().observed().unwrap();
        prop_assert!(observed.t_stats.is_symmetric());
        prop_assert!(observed.p_values.is_symmetric());
    }

    #[test]
    fn prop_masks_symmetric_with_false_diagonal(a in matrices(3), b in matrices(3), n_permutations in 0usize..15) {
        let sample = Sample::independent(group("a", 0, a), group("b", 10, b)).unwrap();
        let computer = TestStatisticComputer::new(&sample).unwrap();
        let observed = computer.observed().unwrap();

        let store = MemoryCacheStore::new();
        let config = InferenceConfig::default().with_permutations(n_permutations);
        let key = CacheKey::derive(
            &ComparisonContext::new("prop", "correlation"),
            &DesignSpecification::independent(
                Group::new("a", ["00", "01", "02"]),
                Group::new("b", ["10", "11", "12"]),
            ),
        );
        let run = PermutationEngine::new(&store, &config).run(&key, &computer, &observed).unwrap();
        prop_assert_eq!(run.cache.len(), n_permutations + 1);

        let thresholds = MultipleComparisonCorrector::new(&config).correct(&observed, &run.cache);
        prop_assert!(thresholds.fwe_min_stat <= thresholds.fwe_max_stat);
        for mask in [&thresholds.uncorrected_mask, &thresholds.fdr_mask, &thresholds.fwe_mask] {
            for i in 0..N {
                prop_assert!(!*mask.get(i, i));
                for j in 0..N {
                    prop_assert_eq!(mask.get(i, j), mask.get(j, i));
                }
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_percentile_within_range(values in prop::collection::vec(-10.0f64..10.0, 1..50), q in 0.0f64..=100.0) {
        let p = percentile(&values, q).unwrap();
        let lo = values.iter().cloned().fold(f64::INFINITY, f64::min);
        let hi = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        prop_assert!(p >= lo && p <= hi);
    }

    #[test]
    fn prop_fdr_rejects_no_more_than_uncorrected_at_alpha(p in prop::collection::vec(0.0f64..1.0, 1..60)) {
        let rejected = benjamini_hochberg(&p, 0.05);
        let rejected_count = rejected.iter().filter(|r| **r).count();
        let uncorrected = p.iter().filter(|v| **v <= 0.05).count();
        prop_assert!(rejected_count <= uncorrected);
        // rejections are a prefix of the sorted p-values
        let max_rejected = p.iter().zip(&rejected).filter(|(_, r)| **r).map(|(v, _)| *v).fold(0.0, f64::max);
        for (v, r) in p.iter().zip(&rejected) {
            if *v < max_rejected {
                prop_assert!(*r);
            }
        }
    }
}
