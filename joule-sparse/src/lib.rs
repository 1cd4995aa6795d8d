//! Sparse linear algebra for `joule`.
//!
//! Contains the CSR kernels, preconditioners and the preconditioned conjugate gradient method
//! used to solve the eliminated field systems of every implicit stage.
use nalgebra::RealField;

pub mod cg;
pub mod ops;
pub mod precond;

pub use nalgebra_sparse::{CooMatrix, CsrMatrix};

/// Scalar type accepted by the solvers in this crate.
pub trait Real: RealField + Copy {}

impl<T: RealField + Copy> Real for T {}
