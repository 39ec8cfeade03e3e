// Ordinary least squares for many responses sharing one design
//
// All connections are fitted at once: with X (subjects × p) and Y (subjects × M),
// B = (XᵀX)⁻¹ XᵀY. The t-value of coefficient 0 (the covariate) is reported per
// connection with n − p residual degrees of freedom.

use super::ttest::two_sided_pvalue;
use crate::error::NumericalError;
use nalgebra::DMatrix;

/// Residual energy, relative to the response energy, below which a fit is exact
const EXACT_FIT_TOLERANCE: f64 = 1e-24;

/// Numerical rank of `x`, using the same tolerance as LAPACK-based `matrix_rank`
pub fn rank(x: &DMatrix<f64>) -> usize {
    let singular_values = x.clone().svd(false, false).singular_values;
    let largest = singular_values.max();
    if largest <= 0.0 {
        return 0;
    }
    let tolerance = largest * x.nrows().max(x.ncols()) as f64 * f64::EPSILON;
    singular_values.iter().filter(|&&s| s > tolerance).count()
}

/// Fail unless `x` has full column rank
pub fn check_full_rank(x: &DMatrix<f64>) -> Result<(), NumericalError> {
    let rank = rank(x);
    if rank < x.ncols() {
        return Err(NumericalError::RankDeficient {
            rank,
            columns: x.ncols(),
        });
    }
    Ok(())
}

/// Covariate t-values and two-sided p-values, one per column of `y`
pub fn covariate_statistics(
    x: &DMatrix<f64>,
    y: &DMatrix<f64>,
) -> Result<(Vec<f64>, Vec<f64>), NumericalError> {
    check_full_rank(x)?;
    let columns = x.ncols();
    let xt = x.transpose();
    let xtx_inv = (&xt * x)
        .try_inverse()
        .ok_or(NumericalError::RankDeficient {
            rank: columns - 1,
            columns,
        })?;

    let beta = &xtx_inv * (&xt * y);
    let residuals = y - x * &beta;
    let df = (x.nrows() - columns) as f64;
    let c00 = xtx_inv[(0, 0)];

    let mut t_values = Vec::with_capacity(y.ncols());
    let mut p_values = Vec::with_capacity(y.ncols());
    for (m, residual) in residuals.column_iter().enumerate() {
        let rss = residual.norm_squared();
        if rss <= y.column(m).norm_squared() * EXACT_FIT_TOLERANCE {
            t_values.push(f64::NAN);
            p_values.push(f64::NAN);
            continue;
        }
        let sigma2 = rss / df;
        let t = beta[(0, m)] / (sigma2 * c00).sqrt();
        t_values.push(t);
        p_values.push(two_sided_pvalue(t, df));
    }
    Ok((t_values, p_values))
}
