use std::{error::Error, fmt::Display};

use anyhow::Result;
use nalgebra::DMatrix;

#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    // Pixel planes and covariance matrices are all f64, so there is no
    // point being generic over the element type.
    elements: Vec<f64>,
    width: usize,
    height: usize,
}

impl Matrix {
    pub fn new(elements: Vec<f64>, height: usize, width: usize) -> Result<Self> {
        if elements.len() != width * height {
            return Err(MatrixError::SizeMismatch.into());
        }

        Ok(Self {
            elements,
            height,
            width,
        })
    }

    pub fn zeros(height: usize, width: usize) -> Self {
        Self {
            elements: vec![0.0; width * height],
            height,
            width,
        }
    }

    pub fn mul(&self, matrix: &Matrix) -> Result<Matrix> {
        if self.width != matrix.height {
            return Err(MatrixError::SizeMismatch.into());
        }

        // Row-by-row accumulation keeps both operands walking memory in order.
        let mut elements = vec![0.0; self.height * matrix.width];
        for row in 0..self.height {
            let out = &mut elements[row * matrix.width..(row + 1) * matrix.width];
            for i in 0..self.width {
                let a = self.get_unchecked(row, i);
                if a == 0.0 {
                    continue;
                }
                let b_row = &matrix.elements[i * matrix.width..(i + 1) * matrix.width];
                for (value, b) in out.iter_mut().zip(b_row.iter()) {
                    *value += a * b;
                }
            }
        }
        Ok(Matrix {
            elements,
            width: matrix.width,
            height: self.height,
        })
    }

    pub fn sub(&self, matrix: Self) -> Result<Self> {
        if self.width != matrix.width || self.height != matrix.height {
            return Err(MatrixError::SizeMismatch.into());
        }
        let elements = self.elements.iter()
            .zip(matrix.elements.iter())
            .map(|(a, b)| a - b)
            .collect();
        Ok(Self {
            elements,
            width: self.width,
            height: self.height,
        })
    }

    pub fn add(&self, matrix: Self) -> Result<Self> {
        if self.width != matrix.width || self.height != matrix.height {
            return Err(MatrixError::SizeMismatch.into());
        }
        let elements = self.elements.iter()
            .zip(matrix.elements.iter())
            .map(|(a, b)| a + b)
            .collect();
        Ok(Self {
            elements,
            width: self.width,
            height: self.height,
        })
    }

    pub fn get_unchecked(&self, row: usize, col: usize) -> f64 {
        self.elements[row * self.width + col]
    }

    pub fn transpose(&self) -> Matrix {
        let mut elements: Vec<f64> = Vec::with_capacity(self.elements.len());
        for i in 0..self.width {
            for j in 0..self.height {
                elements.push(self.get_unchecked(j, i));
            }
        }
        Matrix {
            elements,
            width: self.height,
            height: self.width,
        }
    }

    pub fn mean_row(&self) -> Vec<f64> {
        let mut elements = vec![0.0; self.width];
        if self.height == 0 {
            return elements;
        }
        for i in 0..self.height {
            for j in 0..self.width {
                elements[j] += self.get_unchecked(i, j);
            }
        }
        for e in elements.iter_mut() {
            *e /= self.height as f64;
        }
        elements
    }

    pub fn elements(&self) -> &[f64] {
        &self.elements
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SquareMatrix {
    matrix: Matrix,
    n: usize,
}

/// Eigenvalues with their eigenvectors stored as the matching columns of
/// `vectors`.
#[derive(Debug, Clone)]
pub struct Eigen {
    pub values: Vec<f64>,
    vectors: DMatrix<f64>,
}

impl Eigen {
    /// Indices of the eigenvalues from largest to smallest. Ties keep the
    /// solver's order so the selection is deterministic.
    pub fn descending_order(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.values.len()).collect();
        indices.sort_by(|a, b| {
            self.values[*b]
                .partial_cmp(&self.values[*a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        indices
    }

    /// The eigenvectors at `indices`, in that order, as the columns of an
    /// n x indices.len() matrix.
    pub fn select_vectors(&self, indices: &[usize]) -> Result<Matrix, MatrixError> {
        if indices.iter().any(|i| *i >= self.vectors.ncols()) {
            return Err(MatrixError::OutOfBounds);
        }
        let n = self.vectors.nrows();
        let mut elements = Vec::with_capacity(n * indices.len());
        for row in 0..n {
            for col in indices {
                elements.push(self.vectors[(row, *col)]);
            }
        }
        Ok(Matrix {
            elements,
            height: n,
            width: indices.len(),
        })
    }
}

impl SquareMatrix {
    pub fn n(&self) -> usize {
        self.n
    }

    pub fn is_symmetric(&self, tolerance: f64) -> bool {
        for i in 0..self.n {
            for j in i+1..self.n {
                let a = self.matrix.get_unchecked(i, j);
                let b = self.matrix.get_unchecked(j, i);
                if (a - b).abs() > tolerance * a.abs().max(b.abs()).max(1.0) {
                    return false;
                }
            }
        }
        true
    }

    /// Eigen decomposition of a symmetric matrix: Householder
    /// tridiagonalisation followed by implicit QR. Eigenvalues are real and
    /// the eigenvectors orthonormal.
    ///
    /// `eps`: convergence tolerance on the off diagonal.
    /// `max_iter`: total QR iterations allowed before giving up.
    pub fn symmetric_eigen(self, eps: f64, max_iter: usize) -> Result<Eigen> {
        if !self.is_symmetric(1e-9) {
            return Err(MatrixError::NotSymmetric.into());
        }
        if self.matrix.elements.iter().any(|a| !a.is_finite()) {
            return Err(MatrixError::NoConvergence.into());
        }
        let n = self.n;
        if n == 0 {
            return Ok(Eigen {
                values: Vec::new(),
                vectors: DMatrix::zeros(0, 0),
            });
        }

        // Symmetric, so the row-major buffer reads the same column-major.
        let a = DMatrix::from_vec(n, n, self.matrix.elements);
        let eigen = a
            .try_symmetric_eigen(eps, max_iter)
            .ok_or(MatrixError::NoConvergence)?;
        Ok(Eigen {
            values: eigen.eigenvalues.iter().copied().collect(),
            vectors: eigen.eigenvectors,
        })
    }
}

impl TryFrom<Matrix> for SquareMatrix {
    type Error = MatrixError;
    fn try_from(value: Matrix) -> std::result::Result<Self, Self::Error> {
        if value.height != value.width {
            Err(MatrixError::NotSquare)
        } else {
            Ok(SquareMatrix {
                n: value.width,
                matrix: value,
            })
        }
    }
}

impl From<SquareMatrix> for Matrix {
    fn from(value: SquareMatrix) -> Self {
        value.matrix
    }
}

/// Stack `u` as every row of a `height` x `u.len()` matrix.
pub fn matrix_rows(u: &[f64], height: usize) -> Matrix {
    Matrix {
        elements: u.repeat(height),
        height,
        width: u.len(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatrixError {
    SizeMismatch,
    OutOfBounds,
    NotSquare,
    NotSymmetric,
    NoConvergence,
}

impl Display for MatrixError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Error for MatrixError {}
