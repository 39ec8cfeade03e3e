// Test statistics for group-level connectivity comparisons
//
// Every design reduces to a per-connection t-statistic:
// - Independent: Welch's t-test between two groups
// - Paired: one-sample t-test on within-pair differences
// - Regression: t-value of the covariate coefficient under OLS
//
// The computer produces the observed statistic once and, for the permutation
// engine, one relabeled statistic per call.

mod computer;
pub mod ols;
pub mod ttest;

pub use computer::{ObservedStatistic, PermutedStatistic, TestStatisticComputer};
pub use ttest::{paired, two_sided_pvalue, welch, TTest};
