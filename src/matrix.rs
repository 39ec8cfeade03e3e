//! Square matrices over brain nodes
//!
//! Connectivity data, statistics and significance masks are all N×N and stored
//! row-major. Symmetric matrices are vectorized through the canonical upper
//! triangle: row-major over pairs (i, j) with i < j, giving N·(N−1)/2 entries.

use crate::error::ArtifactError;
use serde::{Deserialize, Serialize};

/// Relative tolerance for the symmetry check on loaded matrices
const SYMMETRY_TOLERANCE: f64 = 1e-8;

/// Dense N×N matrix, row-major
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SquareMatrix<T> {
    n: usize,
    data: Vec<T>,
}

/// Statistic or p-value matrix
pub type StatMatrix = SquareMatrix<f64>;

/// Significance mask
pub type Mask = SquareMatrix<bool>;

impl<T: Clone> SquareMatrix<T> {
    /// Matrix with every entry set to `value`
    pub fn filled(n: usize, value: T) -> Self {
        Self {
            n,
            data: vec![value; n * n],
        }
    }

    /// Build a matrix from a function of (row, col)
    pub fn from_fn(n: usize, mut f: impl FnMut(usize, usize) -> T) -> Self {
        let mut data = Vec::with_capacity(n * n);
        for i in 0..n {
            for j in 0..n {
                data.push(f(i, j));
            }
        }
        Self { n, data }
    }

    /// Rebuild a symmetric matrix from its upper-triangle vector
    ///
    /// Returns `None` if `values.len()` is not N·(N−1)/2.
    pub fn from_upper_triangle(n: usize, values: &[T], diagonal: T) -> Option<Self> {
        if values.len() != connection_count(n) {
            return None;
        }
        let mut matrix = Self::filled(n, diagonal);
        for (k, (i, j)) in upper_triangle_indices(n).enumerate() {
            matrix.data[i * n + j] = values[k].clone();
            matrix.data[j * n + i] = values[k].clone();
        }
        Some(matrix)
    }

    /// Upper-triangle entries in canonical order
    pub fn upper_triangle(&self) -> Vec<T> {
        upper_triangle_indices(self.n)
            .map(|(i, j)| self.data[i * self.n + j].clone())
            .collect()
    }

    /// Elementwise map into a new matrix
    pub fn map<U>(&self, f: impl FnMut(&T) -> U) -> SquareMatrix<U> {
        SquareMatrix {
            n: self.n,
            data: self.data.iter().map(f).collect(),
        }
    }
}

impl<T> SquareMatrix<T> {
    /// Number of nodes
    pub fn n(&self) -> usize {
        self.n
    }

    pub fn get(&self, row: usize, col: usize) -> &T {
        &self.data[row * self.n + col]
    }

    pub fn set(&mut self, row: usize, col: usize, value: T) {
        self.data[row * self.n + col] = value;
    }

    /// Row-major backing slice
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Iterate over the matrix rows
    pub fn rows(&self) -> impl Iterator<Item = &[T]> {
        self.data.chunks(self.n.max(1))
    }
}

impl Mask {
    /// Number of set entries (each undirected connection counts twice)
    pub fn count(&self) -> usize {
        self.data.iter().filter(|&&b| b).count()
    }

    /// Number of significant connections, counted once per node pair
    pub fn connection_count(&self) -> usize {
        upper_triangle_indices(self.n)
            .filter(|&(i, j)| self.data[i * self.n + j])
            .count()
    }
}

impl StatMatrix {
    /// Whether the matrix is symmetric within a relative tolerance
    pub fn is_symmetric(&self) -> bool {
        upper_triangle_indices(self.n).all(|(i, j)| {
            let a = self.data[i * self.n + j];
            let b = self.data[j * self.n + i];
            let scale = a.abs().max(b.abs()).max(1.0);
            (a - b).abs() <= SYMMETRY_TOLERANCE * scale || (a.is_nan() && b.is_nan())
        })
    }

    /// (max, min) over off-diagonal entries, skipping NaN
    ///
    /// Infinite entries take part. `None` when every entry is NaN.
    pub fn off_diagonal_extrema(&self) -> Option<(f64, f64)> {
        upper_triangle_indices(self.n)
            .map(|(i, j)| self.data[i * self.n + j])
            .filter(|v| !v.is_nan())
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((max, min)) => Some((max.max(v), min.min(v))),
            })
    }

    /// First off-diagonal entry that is not finite, as (row, col) with row < col
    pub fn first_non_finite(&self) -> Option<(usize, usize)> {
        upper_triangle_indices(self.n).find(|&(i, j)| !self.data[i * self.n + j].is_finite())
    }
}

/// Number of unique connections among `n` nodes
pub fn connection_count(n: usize) -> usize {
    n * n.saturating_sub(1) / 2
}

/// Canonical (i, j) pairs with i < j, row-major
pub fn upper_triangle_indices(n: usize) -> impl Iterator<Item = (usize, usize)> {
    (0..n).flat_map(move |i| (i + 1..n).map(move |j| (i, j)))
}

/// Per-subject symmetric connectivity matrix with a zero diagonal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectivityMatrix(StatMatrix);

impl ConnectivityMatrix {
    /// Validate and wrap a row-major N×N buffer
    ///
    /// The diagonal is forced to zero. Off-diagonal entries must be finite and
    /// symmetric.
    pub fn new(n: usize, data: Vec<f64>) -> Result<Self, ArtifactError> {
        if n < 2 {
            return Err(ArtifactError::Invalid(format!(
                "need at least 2 nodes, got {}",
                n
            )));
        }
        if data.len() != n * n {
            return Err(ArtifactError::Invalid(format!(
                "expected {} values for {}x{} matrix, got {}",
                n * n,
                n,
                n,
                data.len()
            )));
        }
        let mut matrix = SquareMatrix { n, data };
        for i in 0..n {
            matrix.set(i, i, 0.0);
        }
        if let Some((i, j)) = matrix.first_non_finite() {
            return Err(ArtifactError::Invalid(format!(
                "non-finite value at ({}, {})",
                i, j
            )));
        }
        if !matrix.is_symmetric() {
            return Err(ArtifactError::Invalid("matrix is not symmetric".to_string()));
        }
        Ok(Self(matrix))
    }

    /// Build from nested rows
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self, ArtifactError> {
        let n = rows.len();
        if let Some(bad) = rows.iter().position(|r| r.len() != n) {
            return Err(ArtifactError::Invalid(format!(
                "row {} has {} columns, expected {}",
                bad,
                rows[bad].len(),
                n
            )));
        }
        Self::new(n, rows.into_iter().flatten().collect())
    }

    /// Build a symmetric matrix from its upper-triangle vector
    pub fn from_upper_triangle(n: usize, values: &[f64]) -> Result<Self, ArtifactError> {
        let matrix = StatMatrix::from_upper_triangle(n, values, 0.0).ok_or_else(|| {
            ArtifactError::Invalid(format!(
                "expected {} upper-triangle values for {} nodes, got {}",
                connection_count(n),
                n,
                values.len()
            ))
        })?;
        Self::new(n, matrix.data)
    }

    pub fn n(&self) -> usize {
        self.0.n()
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        *self.0.get(row, col)
    }

    /// Upper-triangle entries in canonical order
    pub fn upper_triangle(&self) -> Vec<f64> {
        self.0.upper_triangle()
    }

    pub fn as_matrix(&self) -> &StatMatrix {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_count() {
        assert_eq!(connection_count(0), 0);
        assert_eq!(connection_count(1), 0);
        assert_eq!(connection_count(5), 10);
    }

    #[test]
    fn test_upper_triangle_order_is_row_major() {
        let pairs: Vec<_> = upper_triangle_indices(4).collect();
        assert_eq!(pairs, vec![(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)]);
    }

    #[test]
    fn test_upper_triangle_reassembles_symmetric() {
        let values = [1.0, 2.0, 3.0];
        let m = StatMatrix::from_upper_triangle(3, &values, 0.0).unwrap();
        assert_eq!(*m.get(0, 1), 1.0);
        assert_eq!(*m.get(1, 0), 1.0);
        assert_eq!(*m.get(0, 2), 2.0);
        assert_eq!(*m.get(2, 1), 3.0);
        assert_eq!(*m.get(1, 1), 0.0);
        assert_eq!(m.upper_triangle(), values.to_vec());
    }

    #[test]
    fn test_upper_triangle_wrong_length() {
        assert!(StatMatrix::from_upper_triangle(3, &[1.0, 2.0], 0.0).is_none());
    }

    #[test]
    fn test_connectivity_zeroes_diagonal() {
        let m = ConnectivityMatrix::from_rows(vec![vec![1.0, 0.5], vec![0.5, 1.0]]).unwrap();
        assert_eq!(m.get(0, 0), 0.0);
        assert_eq!(m.get(1, 1), 0.0);
        assert_eq!(m.get(0, 1), 0.5);
    }

    #[test]
    fn test_connectivity_rejects_asymmetric() {
        let err = ConnectivityMatrix::from_rows(vec![vec![0.0, 0.5], vec![0.4, 0.0]]).unwrap_err();
        assert!(err.to_string().contains("symmetric"));
    }

    #[test]
    fn test_connectivity_rejects_nan_off_diagonal() {
        let err =
            ConnectivityMatrix::from_rows(vec![vec![0.0, f64::NAN], vec![f64::NAN, 0.0]])
                .unwrap_err();
        assert!(err.to_string().contains("non-finite"));
    }

    #[test]
    fn test_connectivity_accepts_nan_diagonal() {
        let m = ConnectivityMatrix::from_rows(vec![vec![f64::NAN, 0.2], vec![0.2, f64::INFINITY]])
            .unwrap();
        assert_eq!(m.get(0, 0), 0.0);
    }

    #[test]
    fn test_connectivity_rejects_ragged_rows() {
        assert!(ConnectivityMatrix::from_rows(vec![vec![0.0, 1.0], vec![1.0]]).is_err());
    }

    #[test]
    fn test_off_diagonal_extrema_ignores_nan() {
        let m = StatMatrix::from_upper_triangle(3, &[f64::NAN, 2.0, -1.5], 0.0).unwrap();
        assert_eq!(m.off_diagonal_extrema(), Some((2.0, -1.5)));
        assert_eq!(m.first_non_finite(), Some((0, 1)));
    }

    #[test]
    fn test_off_diagonal_extrema_keeps_infinities() {
        let m = StatMatrix::from_upper_triangle(3, &[f64::INFINITY, f64::NAN, -1.5], 0.0).unwrap();
        assert_eq!(m.off_diagonal_extrema(), Some((f64::INFINITY, -1.5)));

        let one_sided = StatMatrix::from_upper_triangle(2, &[f64::NEG_INFINITY], 0.0).unwrap();
        assert_eq!(
            one_sided.off_diagonal_extrema(),
            Some((f64::NEG_INFINITY, f64::NEG_INFINITY))
        );

        let undefined = StatMatrix::from_upper_triangle(3, &[f64::NAN; 3], 0.0).unwrap();
        assert_eq!(undefined.off_diagonal_extrema(), None);
    }

    #[test]
    fn test_off_diagonal_extrema_ignores_diagonal() {
        let mut m = StatMatrix::from_upper_triangle(2, &[-3.0], 0.0).unwrap();
        m.set(0, 0, 100.0);
        assert_eq!(m.off_diagonal_extrema(), Some((-3.0, -3.0)));
    }

    #[test]
    fn test_mask_connection_count() {
        let mask = Mask::from_upper_triangle(3, &[true, false, true], false).unwrap();
        assert_eq!(mask.count(), 4);
        assert_eq!(mask.connection_count(), 2);
    }
}
