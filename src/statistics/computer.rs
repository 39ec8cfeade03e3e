// Observed and permuted statistic matrices per design
//
// Each subject's matrix is vectorized once to its upper triangle. Every pass then
// works on connection columns and reassembles symmetric N×N matrices.

use super::ols::{check_full_rank, covariate_statistics};
use super::ttest::{paired, welch};
use crate::design::DesignKind;
use crate::error::NumericalError;
use crate::matrix::{ConnectivityMatrix, StatMatrix};
use crate::sample::Sample;
use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;

/// Observed t-statistics and two-sided p-values
///
/// Both are symmetric; the diagonal holds t = 0 and p = 1 and is never tested.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedStatistic {
    pub t_stats: StatMatrix,
    pub p_values: StatMatrix,
}

impl ObservedStatistic {
    /// (max, min) of the off-diagonal t-statistics, the seed row of the null distribution
    pub fn extrema(&self) -> Option<(f64, f64)> {
        self.t_stats.off_diagonal_extrema()
    }
}

/// Produces one permuted statistic matrix per call
///
/// This is the seam the permutation engine drives; the rng is the only source of
/// randomness.
pub trait PermutedStatistic {
    fn permuted_statistic(&self, rng: &mut StdRng) -> Result<StatMatrix, NumericalError>;
}

enum Prepared {
    /// Rows: group 1 subjects then group 2 subjects
    Independent { rows: Vec<Vec<f64>>, n1: usize },
    /// Rows: per-pair differences a − b
    Paired { differences: Vec<Vec<f64>> },
    /// Y: subjects × connections, X: centered regressors with intercept last
    Regression { y: DMatrix<f64>, x: DMatrix<f64> },
}

/// Test statistic computation for one sample
pub struct TestStatisticComputer {
    n_nodes: usize,
    prepared: Prepared,
}

fn vectorize(matrices: &[ConnectivityMatrix]) -> Vec<Vec<f64>> {
    matrices.iter().map(ConnectivityMatrix::upper_triangle).collect()
}

fn column(rows: &[Vec<f64>], m: usize) -> impl Iterator<Item = f64> + '_ {
    rows.iter().map(move |row| row[m])
}

/// First connection whose values are identical across all subjects
fn first_constant_connection(rows: &[Vec<f64>]) -> Option<usize> {
    let first = rows.first()?;
    (0..first.len()).find(|&m| column(rows, m).all(|v| v == first[m]))
}

impl TestStatisticComputer {
    /// Prepare the sample for repeated passes
    ///
    /// Regression designs are rank-checked here so a singular design fails before
    /// any permutation work.
    pub fn new(sample: &Sample) -> Result<Self, NumericalError> {
        let n_nodes = sample.n_nodes();
        let prepared = match sample {
            Sample::Independent { group1, group2 } => {
                let mut rows = vectorize(&group1.matrices);
                rows.extend(vectorize(&group2.matrices));
                Prepared::Independent {
                    rows,
                    n1: group1.matrices.len(),
                }
            }
            Sample::Paired(pairs) => {
                let differences = vectorize(pairs.condition_a())
                    .into_iter()
                    .zip(vectorize(pairs.condition_b()))
                    .map(|(a, b)| a.iter().zip(&b).map(|(x, y)| x - y).collect())
                    .collect();
                Prepared::Paired { differences }
            }
            Sample::Regression(regression) => {
                let rows = vectorize(regression.matrices());
                let n_connections = rows.first().map_or(0, Vec::len);
                let y = DMatrix::from_fn(rows.len(), n_connections, |r, m| rows[r][m]);
                let x = regression.design().regressors();
                check_full_rank(&x)?;
                Prepared::Regression { y, x }
            }
        };
        Ok(Self { n_nodes, prepared })
    }

    pub fn n_nodes(&self) -> usize {
        self.n_nodes
    }

    pub fn kind(&self) -> DesignKind {
        match self.prepared {
            Prepared::Independent { .. } => DesignKind::Independent,
            Prepared::Paired { .. } => DesignKind::Paired,
            Prepared::Regression { .. } => DesignKind::Regression,
        }
    }

    /// Observed statistic; any degenerate connection is fatal
    pub fn observed(&self) -> Result<ObservedStatistic, NumericalError> {
        let constant = match &self.prepared {
            Prepared::Independent { rows, .. } => first_constant_connection(rows),
            Prepared::Paired { differences } => first_constant_connection(differences),
            Prepared::Regression { .. } => None,
        };
        if let Some(m) = constant {
            let (row, col) = crate::matrix::upper_triangle_indices(self.n_nodes)
                .nth(m)
                .unwrap_or((0, 0));
            return Err(NumericalError::DegenerateConnection { row, col });
        }

        let (t, p) = self.compute(None)?;
        let t_stats = self.reassemble(&t, 0.0);
        if let Some((row, col)) = t_stats.first_non_finite() {
            return Err(NumericalError::DegenerateConnection { row, col });
        }
        Ok(ObservedStatistic {
            t_stats,
            p_values: self.reassemble(&p, 1.0),
        })
    }

    fn reassemble(&self, values: &[f64], diagonal: f64) -> StatMatrix {
        StatMatrix::from_upper_triangle(self.n_nodes, values, diagonal)
            .unwrap_or_else(|| StatMatrix::filled(self.n_nodes, f64::NAN))
    }

    /// Upper-triangle t and p vectors, optionally under a relabeling
    fn compute(&self, rng: Option<&mut StdRng>) -> Result<(Vec<f64>, Vec<f64>), NumericalError> {
        match &self.prepared {
            Prepared::Independent { rows, n1 } => {
                let mut order: Vec<usize> = (0..rows.len()).collect();
                if let Some(rng) = rng {
                    order.shuffle(rng);
                }
                let (first, second) = order.split_at(*n1);
                let n_connections = rows.first().map_or(0, Vec::len);
                let mut a = Vec::with_capacity(first.len());
                let mut b = Vec::with_capacity(second.len());
                let mut t = Vec::with_capacity(n_connections);
                let mut p = Vec::with_capacity(n_connections);
                for m in 0..n_connections {
                    a.clear();
                    b.clear();
                    a.extend(first.iter().map(|&s| rows[s][m]));
                    b.extend(second.iter().map(|&s| rows[s][m]));
                    let test = welch(&a, &b);
                    t.push(test.statistic);
                    p.push(test.pvalue);
                }
                Ok((t, p))
            }
            Prepared::Paired { differences } => {
                let signs: Vec<f64> = match rng {
                    Some(rng) => (0..differences.len())
                        .map(|_| if rng.gen::<bool>() { -1.0 } else { 1.0 })
                        .collect(),
                    None => vec![1.0; differences.len()],
                };
                let n_connections = differences.first().map_or(0, Vec::len);
                let mut d = Vec::with_capacity(differences.len());
                let mut t = Vec::with_capacity(n_connections);
                let mut p = Vec::with_capacity(n_connections);
                for m in 0..n_connections {
                    d.clear();
                    d.extend(differences.iter().zip(&signs).map(|(row, s)| s * row[m]));
                    let test = paired(&d);
                    t.push(test.statistic);
                    p.push(test.pvalue);
                }
                Ok((t, p))
            }
            Prepared::Regression { y, x } => match rng {
                None => covariate_statistics(x, y),
                Some(rng) => {
                    let mut covariate: Vec<f64> = x.column(0).iter().copied().collect();
                    covariate.shuffle(rng);
                    let mut permuted = x.clone();
                    for (r, value) in covariate.into_iter().enumerate() {
                        permuted[(r, 0)] = value;
                    }
                    covariate_statistics(&permuted, y)
                }
            },
        }
    }
}

impl PermutedStatistic for TestStatisticComputer {
    fn permuted_statistic(&self, rng: &mut StdRng) -> Result<StatMatrix, NumericalError> {
        let (t, _) = self.compute(Some(rng))?;
        let t_stats = self.reassemble(&t, 0.0);
        if t_stats.off_diagonal_extrema().is_none() {
            return Err(NumericalError::UndefinedStatistic);
        }
        Ok(t_stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::{DesignMatrix, GroupSample, PairedSample, RegressionSample};
    use rand::SeedableRng;

    fn m(values: &[f64]) -> ConnectivityMatrix {
        ConnectivityMatrix::from_upper_triangle(3, values).unwrap()
    }

    fn independent_sample() -> Sample {
        Sample::independent(
            GroupSample {
                name: "a".into(),
                subjects: vec!["01".into(), "02".into(), "03".into()],
                matrices: vec![m(&[1.0, 0.2, 0.5]), m(&[2.0, 0.1, 0.4]), m(&[3.0, 0.3, 0.6])],
            },
            GroupSample {
                name: "b".into(),
                subjects: vec!["04".into(), "05".into(), "06".into()],
                matrices: vec![m(&[4.0, 0.2, 0.1]), m(&[5.0, 0.4, 0.3]), m(&[6.0, 0.3, 0.2])],
            },
        )
        .unwrap()
    }

    #[test]
    fn test_independent_observed_symmetric() {
        let computer = TestStatisticComputer::new(&independent_sample()).unwrap();
        let observed = computer.observed().unwrap();
        assert!(observed.t_stats.is_symmetric());
        assert!(observed.p_values.is_symmetric());
        assert_eq!(*observed.t_stats.get(1, 1), 0.0);
        assert_eq!(*observed.p_values.get(2, 2), 1.0);
        let expected = -3.0 / (2.0_f64 / 3.0).sqrt();
        assert!((observed.t_stats.get(0, 1) - expected).abs() < 1e-12);
        assert!((observed.t_stats.get(1, 0) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_independent_permutation_preserves_group_sizes() {
        let computer = TestStatisticComputer::new(&independent_sample()).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let permuted = computer.permuted_statistic(&mut rng).unwrap();
        assert!(permuted.is_symmetric());
        // |t| of a 3 vs 3 split of the values 1..6 is bounded by the fully separated split
        let bound = 3.0 / (2.0_f64 / 3.0).sqrt() + 1e-9;
        assert!(permuted.get(0, 1).abs() <= bound);
    }

    #[test]
    fn test_constant_connection_is_degenerate() {
        let constant = Sample::independent(
            GroupSample {
                name: "a".into(),
                subjects: vec!["01".into(), "02".into()],
                matrices: vec![m(&[1.0, 0.5, 0.2]), m(&[2.0, 0.5, 0.3])],
            },
            GroupSample {
                name: "b".into(),
                subjects: vec!["03".into(), "04".into()],
                matrices: vec![m(&[3.0, 0.5, 0.1]), m(&[4.0, 0.5, 0.4])],
            },
        )
        .unwrap();
        let computer = TestStatisticComputer::new(&constant).unwrap();
        assert_eq!(
            computer.observed(),
            Err(NumericalError::DegenerateConnection { row: 0, col: 2 })
        );
    }

    #[test]
    fn test_paired_observed_and_sign_flip() {
        let a = vec![m(&[2.0, 1.0, 0.5]), m(&[3.0, 1.5, 0.1]), m(&[4.0, 0.7, 0.9])];
        let b = vec![m(&[1.0, 0.8, 0.4]), m(&[1.0, 1.0, 0.3]), m(&[1.0, 0.1, 0.2])];
        let pairs = (1..=3).map(|k| (k.to_string(), k.to_string())).collect();
        let sample = Sample::Paired(PairedSample::new(pairs, a, b).unwrap());
        let computer = TestStatisticComputer::new(&sample).unwrap();

        let observed = computer.observed().unwrap();
        // differences 1, 2, 3
        assert!((observed.t_stats.get(0, 1) - 2.0 * 3.0_f64.sqrt()).abs() < 1e-12);

        let mut rng = StdRng::seed_from_u64(11);
        let permuted = computer.permuted_statistic(&mut rng).unwrap();
        assert!(permuted.get(0, 1).abs() <= 2.0 * 3.0_f64.sqrt() + 1e-9);
    }

    #[test]
    fn test_paired_sign_flip_to_constant_differences_is_infinite() {
        let two = |v: f64| ConnectivityMatrix::from_upper_triangle(2, &[v]).unwrap();
        let a = vec![two(1.0), two(0.0), two(1.0)];
        let b = vec![two(0.0), two(1.0), two(0.0)];
        let pairs = (1..=3).map(|k| (k.to_string(), k.to_string())).collect();
        let sample = Sample::Paired(PairedSample::new(pairs, a, b).unwrap());
        let computer = TestStatisticComputer::new(&sample).unwrap();

        // differences +1, -1, +1
        let observed = computer.observed().unwrap();
        assert!((observed.t_stats.get(0, 1) - 0.5).abs() < 1e-12);

        let draws: Vec<f64> = (0..64)
            .map(|seed| {
                let mut rng = StdRng::seed_from_u64(seed);
                *computer.permuted_statistic(&mut rng).unwrap().get(0, 1)
            })
            .collect();
        assert!(draws.iter().any(|t| t.is_infinite()));
        assert!(draws.iter().all(|t| t.is_infinite() || (t.abs() - 0.5).abs() < 1e-12));
    }

    fn regression_sample(covariate: &[f64]) -> Sample {
        let subjects: Vec<String> = (0..covariate.len()).map(|k| format!("{:02}", k)).collect();
        let matrices = covariate
            .iter()
            .enumerate()
            .map(|(k, c)| {
                m(&[
                    0.5 * c + 0.1 * (k % 2) as f64,
                    0.3 + 0.01 * ((k * 7) % 5) as f64,
                    0.2 - 0.02 * (k * k) as f64,
                ])
            })
            .collect();
        let design = DesignMatrix::new(
            subjects,
            vec!["age".into()],
            covariate.iter().map(|c| vec![*c]).collect(),
        )
        .unwrap();
        Sample::Regression(RegressionSample::new(matrices, design).unwrap())
    }

    #[test]
    fn test_regression_detects_covariate_effect() {
        let sample = regression_sample(&[20.0, 25.0, 30.0, 35.0, 40.0, 45.0]);
        let computer = TestStatisticComputer::new(&sample).unwrap();
        let observed = computer.observed().unwrap();
        assert!(*observed.t_stats.get(0, 1) > 10.0);
        assert!(*observed.p_values.get(1, 0) < 1e-3);
        assert!(observed.t_stats.is_symmetric());
    }

    #[test]
    fn test_regression_collinear_covariate_rejected() {
        let sample = regression_sample(&[1.0, 1.0, 1.0, 1.0]);
        assert!(matches!(
            TestStatisticComputer::new(&sample),
            Err(NumericalError::RankDeficient { rank: 1, columns: 2 })
        ));
    }

    #[test]
    fn test_same_seed_same_permutation() {
        let sample = regression_sample(&[20.0, 25.0, 30.0, 35.0, 40.0, 45.0]);
        let computer = TestStatisticComputer::new(&sample).unwrap();
        let a = computer.permuted_statistic(&mut StdRng::seed_from_u64(5)).unwrap();
        let b = computer.permuted_statistic(&mut StdRng::seed_from_u64(5)).unwrap();
        assert_eq!(a, b);
    }
}
