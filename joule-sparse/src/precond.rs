//! Preconditioners for the conjugate gradient solver.
use crate::cg::{ApplyError, LinearOperator};
use crate::ops::diagonal;
use crate::Real;
use nalgebra::{DVector, DVectorView, DVectorViewMut, Scalar};
use nalgebra_sparse::CsrMatrix;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreconditionerError {
    /// The matrix has a zero (or missing) diagonal entry in the given row.
    ZeroDiagonal { row: usize },
    NotSquare { nrows: usize, ncols: usize },
}

impl fmt::Display for PreconditionerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroDiagonal { row } => write!(f, "zero diagonal entry in row {}", row),
            Self::NotSquare { nrows, ncols } => {
                write!(f, "preconditioner requires a square matrix, got {}x{}", nrows, ncols)
            }
        }
    }
}

impl Error for PreconditionerError {}

fn checked_diagonal<T: Real>(a: &CsrMatrix<T>) -> Result<DVector<T>, PreconditionerError> {
    if a.nrows() != a.ncols() {
        return Err(PreconditionerError::NotSquare {
            nrows: a.nrows(),
            ncols: a.ncols(),
        });
    }
    let d = diagonal(a);
    if let Some(row) = d.iter().position(|d_ii| *d_ii == T::zero()) {
        return Err(PreconditionerError::ZeroDiagonal { row });
    }
    Ok(DVector::from_vec(d))
}

/// Diagonal scaling `y = D^{-1} x`.
#[derive(Debug, Clone)]
pub struct JacobiPreconditioner<T: Scalar> {
    inverse_diagonal: DVector<T>,
}

impl<T: Real> JacobiPreconditioner<T> {
    pub fn from_csr(a: &CsrMatrix<T>) -> Result<Self, PreconditionerError> {
        let inverse_diagonal = checked_diagonal(a)?.map(|d_ii| T::one() / d_ii);
        Ok(Self { inverse_diagonal })
    }

    pub fn inverse_diagonal(&self) -> &DVector<T> {
        &self.inverse_diagonal
    }
}

impl<T: Real> LinearOperator<T> for JacobiPreconditioner<T> {
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), ApplyError> {
        assert_eq!(y.len(), self.inverse_diagonal.len());
        y.copy_from(&x);
        y.component_mul_assign(&self.inverse_diagonal);
        Ok(())
    }
}

/// Symmetric Gauss-Seidel sweep, i.e. the action of `M^{-1}` with `M = (D + L) D^{-1} (D + U)`.
///
/// The matrix is assumed to be symmetric, so that `M` is symmetric positive definite
/// whenever the matrix is.
#[derive(Debug, Clone)]
pub struct SymmetricGaussSeidel<T: Scalar> {
    matrix: Arc<CsrMatrix<T>>,
    diagonal: DVector<T>,
}

impl<T: Real> SymmetricGaussSeidel<T> {
    pub fn new(matrix: Arc<CsrMatrix<T>>) -> Result<Self, PreconditionerError> {
        let diagonal = checked_diagonal(&matrix)?;
        Ok(Self { matrix, diagonal })
    }
}

impl<T: Real> LinearOperator<T> for SymmetricGaussSeidel<T> {
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), ApplyError> {
        let n = self.diagonal.len();
        assert_eq!(y.len(), n);
        assert_eq!(x.len(), n);

        // Forward sweep: (D + L) z = x
        for i in 0..n {
            let row = self.matrix.row(i);
            let mut sum = x[i];
            for (&j, &a_ij) in row.col_indices().iter().zip(row.values()) {
                if j < i {
                    sum -= a_ij * y[j];
                }
            }
            y[i] = sum / self.diagonal[i];
        }

        // w = D z
        y.component_mul_assign(&self.diagonal);

        // Backward sweep: (D + U) y = w
        for i in (0..n).rev() {
            let row = self.matrix.row(i);
            let mut sum = y[i];
            for (&j, &a_ij) in row.col_indices().iter().zip(row.values()) {
                if j > i {
                    sum -= a_ij * y[j];
                }
            }
            y[i] = sum / self.diagonal[i];
        }
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PreconditionerKind {
    Identity,
    Jacobi,
    SymmetricGaussSeidel,
}

/// A preconditioner selected at run time.
#[derive(Debug, Clone)]
pub enum Preconditioner<T: Scalar> {
    Identity,
    Jacobi(JacobiPreconditioner<T>),
    SymmetricGaussSeidel(SymmetricGaussSeidel<T>),
}

impl<T: Real> Preconditioner<T> {
    pub fn build(kind: PreconditionerKind, matrix: Arc<CsrMatrix<T>>) -> Result<Self, PreconditionerError> {
        match kind {
            PreconditionerKind::Identity => Ok(Self::Identity),
            PreconditionerKind::Jacobi => Ok(Self::Jacobi(JacobiPreconditioner::from_csr(&matrix)?)),
            PreconditionerKind::SymmetricGaussSeidel => {
                Ok(Self::SymmetricGaussSeidel(SymmetricGaussSeidel::new(matrix)?))
            }
        }
    }

    pub fn kind(&self) -> PreconditionerKind {
        match self {
            Self::Identity => PreconditionerKind::Identity,
            Self::Jacobi(_) => PreconditionerKind::Jacobi,
            Self::SymmetricGaussSeidel(_) => PreconditionerKind::SymmetricGaussSeidel,
        }
    }
}

impl<T: Real> LinearOperator<T> for Preconditioner<T> {
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), ApplyError> {
        match self {
            Self::Identity => {
                y.copy_from(&x);
                Ok(())
            }
            Self::Jacobi(jacobi) => jacobi.apply(y, x),
            Self::SymmetricGaussSeidel(sgs) => sgs.apply(y, x),
        }
    }
}
