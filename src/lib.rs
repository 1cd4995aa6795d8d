//! Transient coupled electromagnetic and thermal diffusion on two-dimensional quad meshes.
//!
//! The crate discretizes the potential, electric field, magnetic flux, temperature and
//! thermal flux of a Joule heating problem with a lowest-order mimetic scheme, and advances
//! them in time with a family of diagonally implicit Runge-Kutta methods.
pub mod assembly;
pub mod boundary;
pub mod comm;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod io;
pub mod material;
pub mod mesh;
pub mod ode;
pub mod operator;
pub mod space;
pub mod state;
pub mod transient;

pub extern crate nalgebra;
pub extern crate nalgebra_sparse;
pub extern crate vtkio;
