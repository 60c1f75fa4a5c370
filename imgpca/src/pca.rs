use std::{error::Error, fmt::Display};

use anyhow::{Context, Result};
use tracing::debug;

use crate::linalg::{matrix_rows, Matrix, SquareMatrix};

pub const MIN_COMPONENTS: usize = 1;
pub const MAX_COMPONENTS: usize = 2000;

const EIGEN_EPS: f64 = f64::EPSILON;
// QR iterations allowed per eigenvalue before the solver gives up.
const EIGEN_ITERATIONS_PER_AXIS: usize = 30;

/// Number of principal components to keep per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentCount(usize);

impl ComponentCount {
    pub fn new(k: usize) -> Result<Self, ComponentError> {
        if !(MIN_COMPONENTS..=MAX_COMPONENTS).contains(&k) {
            return Err(ComponentError::OutOfRange(k));
        }
        Ok(Self(k))
    }

    pub fn get(&self) -> usize {
        self.0
    }
}

impl TryFrom<usize> for ComponentCount {
    type Error = ComponentError;
    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ComponentError {
    OutOfRange(usize),
}

impl Display for ComponentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComponentError::OutOfRange(k) => write!(
                f,
                "k must be between {} and {}, got {}",
                MIN_COMPONENTS, MAX_COMPONENTS, k
            ),
        }
    }
}

impl Error for ComponentError {}

/// The eigenvectors kept for a projection, as columns, with their
/// eigenvalues in descending order.
#[derive(Debug, Clone)]
pub struct PrincipalAxes {
    pub vectors: Matrix,
    pub values: Vec<f64>,
    /// Share of the total variance carried by the kept axes, 1.0 when the
    /// data has no variance at all.
    pub retained_variance: f64,
}

/// Covariance of an already centered matrix, treating rows as samples and
/// columns as variables. Normalised by `height - 1`.
pub fn covariance(centered: &Matrix) -> Result<SquareMatrix> {
    let n = centered.width();
    let samples = centered.height().saturating_sub(1).max(1) as f64;
    let mut cov = vec![0.0; n * n];
    if n > 0 {
        // Upper triangle of Xc^T * Xc, one sample row at a time.
        for row in centered.elements().chunks_exact(n) {
            for i in 0..n {
                let xi = row[i];
                if xi == 0.0 {
                    continue;
                }
                let out = &mut cov[i * n + i..(i + 1) * n];
                for (value, xj) in out.iter_mut().zip(row[i..].iter()) {
                    *value += xi * xj;
                }
            }
        }
    }
    for i in 0..n {
        for j in i..n {
            let value = cov[i * n + j] / samples;
            cov[i * n + j] = value;
            cov[j * n + i] = value;
        }
    }
    Ok(Matrix::new(cov, n, n)?.try_into()?)
}

/// Select the `k` eigenvectors of `cov` with the largest eigenvalues.
/// Asking for more axes than exist returns all of them.
pub fn principal_axes(cov: SquareMatrix, k: usize) -> Result<PrincipalAxes> {
    let n = cov.n();
    let eigen = cov.symmetric_eigen(EIGEN_EPS, EIGEN_ITERATIONS_PER_AXIS * n.max(1))?;
    let k = k.min(n);
    let order = eigen.descending_order();
    let selected = &order[..k];

    let vectors = eigen.select_vectors(selected)?;
    let values: Vec<f64> = selected.iter().map(|i| eigen.values[*i]).collect();

    let total: f64 = eigen.values.iter().map(|v| v.max(0.0)).sum();
    let kept: f64 = values.iter().map(|v| v.max(0.0)).sum();
    let retained_variance = if total > 0.0 { kept / total } else { 1.0 };

    Ok(PrincipalAxes {
        vectors,
        values,
        retained_variance,
    })
}

/// Reduce a channel to its top `k` principal components and map it back
/// into the original space. The result has the same shape as `channel`.
pub fn reduce(channel: &Matrix, k: usize) -> Result<Matrix> {
    let context = "Reducing channel";

    let mean = matrix_rows(&channel.mean_row(), channel.height());
    let centered = channel.sub(mean.clone()).context(context)?;
    let cov = covariance(&centered).context(context)?;
    let axes = principal_axes(cov, k).context(context)?;
    debug!(
        requested = k,
        kept = axes.values.len(),
        retained_variance = axes.retained_variance,
        "selected principal axes"
    );

    let projected = centered.mul(&axes.vectors).context(context)?;
    let reconstructed = projected
        .mul(&axes.vectors.transpose())
        .context(context)?
        .add(mean)
        .context(context)?;
    Ok(reconstructed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::MatrixError;

    fn mean_squared_error(a: &Matrix, b: &Matrix) -> Result<f64> {
        if a.height() != b.height() || a.width() != b.width() {
            return Err(MatrixError::SizeMismatch.into());
        }
        let len = a.elements().len().max(1) as f64;
        let sum: f64 = a.elements()
            .iter()
            .zip(b.elements().iter())
            .map(|(x, y)| (x - y) * (x - y))
            .sum();
        Ok(sum / len)
    }

    fn sample_channel() -> Matrix {
        Matrix::new(vec![
            0.10, 0.80, 0.35, 0.55, 0.20,
            0.90, 0.15, 0.60, 0.05, 0.70,
            0.40, 0.45, 0.95, 0.30, 0.25,
            0.65, 0.50, 0.10, 0.85, 0.75,
            0.20, 0.30, 0.70, 0.60, 0.05,
            0.55, 0.95, 0.25, 0.15, 0.40,
            0.75, 0.05, 0.45, 0.90, 0.60,
        ], 7, 5).unwrap()
    }

    #[test]
    fn test_component_count_bounds() {
        assert_eq!(ComponentCount::new(0), Err(ComponentError::OutOfRange(0)));
        assert_eq!(ComponentCount::new(2001), Err(ComponentError::OutOfRange(2001)));
        assert_eq!(ComponentCount::new(1).unwrap().get(), 1);
        assert_eq!(ComponentCount::try_from(2000).unwrap().get(), 2000);
    }

    #[test]
    fn test_covariance() {
        let data = Matrix::new(vec![
            1.0, 2.0,
            3.0, 6.0,
            5.0, 10.0,
        ], 3, 2).unwrap();
        let mean = matrix_rows(&data.mean_row(), 3);
        let centered = data.sub(mean).unwrap();

        let cov: Matrix = covariance(&centered).unwrap().into();

        let expected = Matrix::new(vec![
            4.0, 8.0,
            8.0, 16.0,
        ], 2, 2).unwrap();
        assert_eq!(cov, expected);
    }

    #[test]
    fn test_covariance_single_row() {
        let centered = Matrix::zeros(1, 3);

        let cov: Matrix = covariance(&centered).unwrap().into();

        assert_eq!(cov, Matrix::zeros(3, 3));
    }

    #[test]
    fn test_principal_axes_sorted_descending() {
        let cov: SquareMatrix = Matrix::new(vec![
            1.0, 0.0, 0.0,
            0.0, 5.0, 0.0,
            0.0, 0.0, 3.0,
        ], 3, 3).unwrap().try_into().unwrap();

        let axes = principal_axes(cov, 2).unwrap();

        assert_eq!(axes.values.len(), 2);
        assert!((axes.values[0] - 5.0).abs() < 1e-12);
        assert!((axes.values[1] - 3.0).abs() < 1e-12);
        assert_eq!((axes.vectors.height(), axes.vectors.width()), (3, 2));
        // Eigenvectors are only defined up to sign.
        let expected = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]];
        for (row, cols) in expected.iter().enumerate() {
            for (col, value) in cols.iter().enumerate() {
                let actual = axes.vectors.get_unchecked(row, col).abs();
                assert!((actual - value).abs() < 1e-12, "({}, {}) = {}", row, col, actual);
            }
        }
        assert!((axes.retained_variance - 8.0 / 9.0).abs() < 1e-12);
    }

    #[test]
    fn test_reduce_keeps_shape() {
        let channel = sample_channel();

        for k in [1, 2, 5, 9] {
            let result = reduce(&channel, k).unwrap();
            assert_eq!(result.height(), channel.height());
            assert_eq!(result.width(), channel.width());
        }
    }

    #[test]
    fn test_reduce_full_rank_is_identity() {
        let channel = sample_channel();

        let result = reduce(&channel, channel.width()).unwrap();

        assert!(mean_squared_error(&channel, &result).unwrap() < 1e-20);
    }

    #[test]
    fn test_reduce_error_non_increasing_in_k() {
        let channel = sample_channel();

        let mut previous = f64::MAX;
        for k in 1..=channel.width() {
            let result = reduce(&channel, k).unwrap();
            let error = mean_squared_error(&channel, &result).unwrap();
            assert!(error <= previous + 1e-12, "k={} error={} previous={}", k, error, previous);
            previous = error;
        }
    }

    #[test]
    fn test_reduce_k_larger_than_width() {
        let channel = Matrix::new(
            (0..64).map(|i| ((i * 37) % 11) as f64 / 10.0).collect(),
            8,
            8,
        ).unwrap();

        let clamped = reduce(&channel, 8).unwrap();
        let result = reduce(&channel, 50).unwrap();

        assert_eq!(result, clamped);
    }

    #[test]
    fn test_reduce_constant_channel() {
        let channel = Matrix::new(vec![0.5; 12], 3, 4).unwrap();

        let result = reduce(&channel, 2).unwrap();

        for (actual, expected) in result.elements().iter().zip(channel.elements()) {
            assert!((actual - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn test_reduce_non_finite_channel() {
        let mut elements: Vec<f64> = sample_channel().elements().to_vec();
        elements[6] = f64::NAN;
        let channel = Matrix::new(elements, 7, 5).unwrap();

        let err = reduce(&channel, 2).unwrap_err();

        assert_eq!(err.to_string(), "Reducing channel");
        assert_eq!(err.downcast_ref::<MatrixError>(), Some(&MatrixError::NoConvergence));
    }

    #[test]
    fn test_reduce_checkerboard_moves_towards_mean() {
        // A strong checkerboard plus a weaker 2x2 block pattern. One
        // component keeps the checkerboard and drops the blocks.
        let mut elements = Vec::with_capacity(64);
        for row in 0..8 {
            for col in 0..8 {
                let checker = if (row + col) % 2 == 0 { 1.0 } else { -1.0 };
                let blocks = if (row / 2 + col / 2) % 2 == 0 { 1.0 } else { -1.0 };
                elements.push(0.5 + 0.4 * checker + 0.1 * blocks);
            }
        }
        let channel = Matrix::new(elements, 8, 8).unwrap();
        let mean = matrix_rows(&channel.mean_row(), 8);

        let result = reduce(&channel, 1).unwrap();

        let original_spread = mean_squared_error(&channel, &mean).unwrap();
        let reduced_spread = mean_squared_error(&result, &mean).unwrap();
        assert!(reduced_spread < original_spread);
        for row in 0..8 {
            for col in 0..8 {
                let checker = if (row + col) % 2 == 0 { 1.0 } else { -1.0 };
                let value = result.get_unchecked(row, col);
                assert!((value - (0.5 + 0.4 * checker)).abs() < 1e-9);
            }
        }
    }
}
