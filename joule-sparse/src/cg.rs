//! Preconditioned conjugate gradient for symmetric positive definite systems.
use crate::ops::spmv;
use crate::Real;
use core::fmt;
use nalgebra::{DMatrix, DVector, DVectorView, DVectorViewMut, Scalar};
use nalgebra_sparse::CsrMatrix;
use std::error::Error;

pub type ApplyError = Box<dyn Error + Send + Sync>;

/// A linear map `y = A x`, applied without exposing the matrix.
pub trait LinearOperator<T: Scalar> {
    fn apply(&self, y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), ApplyError>;
}

impl<'a, T, A> LinearOperator<T> for &'a A
where
    T: Scalar,
    A: ?Sized + LinearOperator<T>,
{
    fn apply(&self, y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), ApplyError> {
        A::apply(self, y, x)
    }
}

impl<T: Real> LinearOperator<T> for DMatrix<T> {
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), ApplyError> {
        y.gemv(T::one(), self, &x, T::zero());
        Ok(())
    }
}

impl<T: Real> LinearOperator<T> for CsrMatrix<T> {
    fn apply(&self, y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), ApplyError> {
        spmv(y, self, x);
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, Default)]
pub struct IdentityOperator;

impl<T: Scalar> LinearOperator<T> for IdentityOperator {
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), ApplyError> {
        y.copy_from(&x);
        Ok(())
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum SolveErrorKind {
    OperatorError(ApplyError),
    PreconditionerError(ApplyError),
    IndefiniteOperator,
    IndefinitePreconditioner,
    MaxIterationsReached { max_iter: usize },
}

impl fmt::Display for SolveErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OperatorError(err) => write!(f, "error applying operator: {}", err),
            Self::PreconditionerError(err) => write!(f, "error applying preconditioner: {}", err),
            Self::IndefiniteOperator => write!(f, "operator appears to be indefinite or singular"),
            Self::IndefinitePreconditioner => write!(f, "preconditioner is not positive definite"),
            Self::MaxIterationsReached { max_iter } => {
                write!(f, "no convergence within {} iterations", max_iter)
            }
        }
    }
}

#[derive(Debug)]
pub struct SolveError<T> {
    pub output: CgOutput<T>,
    pub kind: SolveErrorKind,
}

impl<T> fmt::Display for SolveError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CG failed after {} iterations: {}",
            self.output.num_iterations, self.kind
        )
    }
}

impl<T: fmt::Debug> Error for SolveError<T> {}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CgOutput<T> {
    /// Number of updates made to the solution vector.
    pub num_iterations: usize,
    /// Norm of the recursively updated residual at termination.
    ///
    /// For ill-conditioned systems this may differ noticeably from the true residual `b - A x`.
    pub residual_norm: T,
}

/// Vectors reused between solves with the same solver.
#[derive(Debug, Clone)]
struct CgWorkspace<T: Scalar> {
    r: DVector<T>,
    z: DVector<T>,
    p: DVector<T>,
    q: DVector<T>,
}

/// Preconditioned conjugate gradient.
///
/// Iterates until `||r|| <= tol * ||b||`, with `r` the recursively updated residual. A zero
/// right-hand side immediately yields the zero solution.
#[derive(Debug, Clone)]
pub struct ConjugateGradient<T: Scalar, A, P> {
    operator: A,
    preconditioner: P,
    relative_tolerance: T,
    max_iter: Option<usize>,
    workspace: CgWorkspace<T>,
}

impl<T: Real> ConjugateGradient<T, (), IdentityOperator> {
    pub fn new() -> Self {
        Self {
            operator: (),
            preconditioner: IdentityOperator,
            relative_tolerance: nalgebra::convert(1e-10),
            max_iter: None,
            workspace: CgWorkspace {
                r: DVector::zeros(0),
                z: DVector::zeros(0),
                p: DVector::zeros(0),
                q: DVector::zeros(0),
            },
        }
    }
}

impl<T: Real> Default for ConjugateGradient<T, (), IdentityOperator> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Scalar, A, P> ConjugateGradient<T, A, P> {
    pub fn with_operator<A2>(self, operator: A2) -> ConjugateGradient<T, A2, P> {
        ConjugateGradient {
            operator,
            preconditioner: self.preconditioner,
            relative_tolerance: self.relative_tolerance,
            max_iter: self.max_iter,
            workspace: self.workspace,
        }
    }

    pub fn with_preconditioner<P2>(self, preconditioner: P2) -> ConjugateGradient<T, A, P2> {
        ConjugateGradient {
            operator: self.operator,
            preconditioner,
            relative_tolerance: self.relative_tolerance,
            max_iter: self.max_iter,
            workspace: self.workspace,
        }
    }

    pub fn with_relative_tolerance(self, relative_tolerance: T) -> Self {
        Self {
            relative_tolerance,
            ..self
        }
    }

    pub fn with_max_iter(self, max_iter: usize) -> Self {
        Self {
            max_iter: Some(max_iter),
            ..self
        }
    }
}

impl<T, A, P> ConjugateGradient<T, A, P>
where
    T: Real,
    A: LinearOperator<T>,
    P: LinearOperator<T>,
{
    /// Solves `A x = b`, using the incoming `x` as the initial guess.
    pub fn solve_with_guess<'b>(
        &mut self,
        b: impl Into<DVectorView<'b, T>>,
        x: impl Into<DVectorViewMut<'b, T>>,
    ) -> Result<CgOutput<T>, SolveError<T>> {
        let mut output = CgOutput {
            num_iterations: 0,
            residual_norm: T::zero(),
        };
        match self.iterate(b.into(), x.into(), &mut output) {
            Ok(()) => Ok(output),
            Err(kind) => Err(SolveError { output, kind }),
        }
    }

    fn iterate(
        &mut self,
        b: DVectorView<T>,
        mut x: DVectorViewMut<T>,
        output: &mut CgOutput<T>,
    ) -> Result<(), SolveErrorKind> {
        use SolveErrorKind::*;
        assert_eq!(b.len(), x.len(), "Right-hand side and solution must have the same length.");
        let n = b.len();

        let b_norm = b.norm();
        if b_norm == T::zero() {
            x.fill(T::zero());
            return Ok(());
        }
        let tolerance = self.relative_tolerance * b_norm;

        let CgWorkspace { r, z, p, q } = &mut self.workspace;
        for v in [&mut *r, &mut *z, &mut *p, &mut *q] {
            v.resize_vertically_mut(n, T::zero());
        }
        let preconditioner = &self.preconditioner;
        let precondition = |r: &DVector<T>, z: &mut DVector<T>| {
            preconditioner
                .apply(z.rows_mut(0, n), r.rows(0, n))
                .map_err(PreconditionerError)
        };

        // r = b - A x
        self.operator
            .apply(r.rows_mut(0, n), x.rows(0, n))
            .map_err(OperatorError)?;
        r.axpy(T::one(), &b, -T::one());

        precondition(&*r, &mut *z)?;
        p.copy_from(&*z);
        let mut rho = z.dot(&*r);

        loop {
            output.residual_norm = r.norm();
            if output.residual_norm <= tolerance {
                return Ok(());
            }
            if let Some(max_iter) = self.max_iter.filter(|&max| output.num_iterations >= max) {
                return Err(MaxIterationsReached { max_iter });
            }

            // q = A p
            self.operator
                .apply(q.rows_mut(0, n), p.rows(0, n))
                .map_err(OperatorError)?;
            let curvature = p.dot(&*q);
            if curvature <= T::zero() {
                return Err(IndefiniteOperator);
            }
            if rho <= T::zero() {
                return Err(IndefinitePreconditioner);
            }

            let alpha = rho / curvature;
            x.axpy(alpha, &*p, T::one());
            r.axpy(-alpha, &*q, T::one());
            output.num_iterations += 1;

            precondition(&*r, &mut *z)?;
            let rho_next = z.dot(&*r);
            p.axpy(T::one(), &*z, rho_next / rho);
            rho = rho_next;
        }
    }
}
