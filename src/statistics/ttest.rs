// Student t-tests on per-connection samples
//
// - Welch's independent t-test: unequal variances, Welch-Satterthwaite df
// - Paired t-test: one-sample t-test on the within-pair differences
// - Two-sided p-values from the Student t distribution (statrs)

use statrs::distribution::{ContinuousCDF, StudentsT};

/// Result of a single t-test
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TTest {
    /// t-statistic value
    pub statistic: f64,

    /// Two-sided p-value
    pub pvalue: f64,

    /// Degrees of freedom
    pub df: f64,
}

/// Mean and unbiased (n - 1) variance
fn mean_variance(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let ss = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>();
    (mean, ss / (n - 1.0))
}

/// Two-sided p-value of `t` under Student's t with `df` degrees of freedom
///
/// NaN when `t` is NaN or `df` is not a valid parameter.
pub fn two_sided_pvalue(t: f64, df: f64) -> f64 {
    if t.is_nan() {
        return f64::NAN;
    }
    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => (2.0 * dist.cdf(-t.abs())).min(1.0),
        Err(_) => f64::NAN,
    }
}

/// Welch's two-sample t-test of `a` against `b`
///
/// Requires at least 2 values per sample; callers validate group sizes. Zero
/// variance in both samples yields a non-finite statistic.
pub fn welch(a: &[f64], b: &[f64]) -> TTest {
    let (mean_a, var_a) = mean_variance(a);
    let (mean_b, var_b) = mean_variance(b);
    let na = a.len() as f64;
    let nb = b.len() as f64;

    let se_a = var_a / na;
    let se_b = var_b / nb;
    let statistic = (mean_a - mean_b) / (se_a + se_b).sqrt();
    let df = (se_a + se_b).powi(2) / (se_a.powi(2) / (na - 1.0) + se_b.powi(2) / (nb - 1.0));

    TTest {
        statistic,
        pvalue: two_sided_pvalue(statistic, df),
        df,
    }
}

/// Paired t-test on within-pair differences `a - b`
pub fn paired(differences: &[f64]) -> TTest {
    let n = differences.len() as f64;
    let (mean, var) = mean_variance(differences);
    let statistic = mean / (var / n).sqrt();
    let df = n - 1.0;

    TTest {
        statistic,
        pvalue: two_sided_pvalue(statistic, df),
        df,
    }
}
