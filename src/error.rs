//! Error types shared by the whole crate.
//!
//! Configuration problems are reported at setup through [`ConfigurationError`], numerical
//! failures inside a stage are reported as [`SolveDivergence`] together with the iteration
//! count and residual so that callers can decide on their own failure policy.
use crate::state::Field;
use std::error::Error as StdError;
use std::fmt;
use std::fmt::Display;

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    /// A boundary role was requested that was never registered.
    UnknownRole(String),
    /// A property was requested for a region that has no registered value.
    UnknownRegion { property: String, region: usize },
    /// A property name was requested that was never registered.
    UnknownProperty(String),
    /// The coefficient depends on position, but no position was supplied.
    PositionRequired { property: String, region: usize },
    /// The ODE scheme selector does not correspond to a known scheme.
    UnknownScheme(i32),
    /// Two roles on the same field claim the same boundary attribute, and at least one of
    /// them is essential.
    ConflictingBoundary {
        field: Field,
        attribute: usize,
        existing: String,
        new: String,
    },
    DuplicateRole(String),
    DuplicateProperty { property: String, region: usize },
    DuplicateField(Field),
    AttributeOutOfRange { role: String, attribute: usize, count: usize },
    /// A role was registered for a different field than the one it is used with.
    RoleFieldMismatch { role: String, expected: Field, actual: Field },
    InvalidProperty { property: String, region: usize, reason: String },
    InvalidTimeStep { dt: f64, t_final: f64 },
    InvalidMesh(String),
    /// An initial condition does not fit the space of its field.
    IncompatibleInitialCondition(Field),
}

impl Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ConfigurationError::*;
        match self {
            UnknownRole(role) => write!(f, "unknown boundary role \"{}\"", role),
            UnknownRegion { property, region } => {
                write!(f, "property \"{}\" has no value for region {}", property, region)
            }
            UnknownProperty(property) => write!(f, "unknown property \"{}\"", property),
            PositionRequired { property, region } => write!(
                f,
                "property \"{}\" in region {} depends on position, but no position was given",
                property, region
            ),
            UnknownScheme(selector) => write!(f, "unknown ODE solver type: {}", selector),
            ConflictingBoundary {
                field,
                attribute,
                existing,
                new,
            } => write!(
                f,
                "boundary role \"{}\" conflicts with \"{}\" on attribute {} of field {}",
                new, existing, attribute, field
            ),
            DuplicateRole(role) => write!(f, "boundary role \"{}\" is registered twice", role),
            DuplicateProperty { property, region } => write!(
                f,
                "property \"{}\" is registered twice for region {}",
                property, region
            ),
            DuplicateField(field) => write!(f, "field {} appears twice in the block layout", field),
            AttributeOutOfRange { role, attribute, count } => write!(
                f,
                "boundary role \"{}\" refers to attribute {}, but the mesh only has attributes 1..={}",
                role, attribute, count
            ),
            RoleFieldMismatch { role, expected, actual } => write!(
                f,
                "boundary role \"{}\" acts on field {}, expected field {}",
                role, actual, expected
            ),
            InvalidProperty {
                property,
                region,
                reason,
            } => write!(f, "invalid value of \"{}\" in region {}: {}", property, region, reason),
            InvalidTimeStep { dt, t_final } => {
                write!(f, "invalid time stepping parameters (dt = {}, t_final = {})", dt, t_final)
            }
            InvalidMesh(reason) => write!(f, "invalid mesh: {}", reason),
            IncompatibleInitialCondition(field) => {
                write!(f, "initial condition does not fit the space of the {}", field)
            }
        }
    }
}

impl StdError for ConfigurationError {}

/// Diagnostics for a linear solve that did not converge.
#[derive(Debug, Clone, PartialEq)]
pub struct SolveDivergence {
    pub field: Field,
    pub iterations: usize,
    pub residual: f64,
    pub reason: String,
}

impl Display for SolveDivergence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "solve for {} diverged after {} iterations (residual {:e}): {}",
            self.field, self.iterations, self.residual, self.reason
        )
    }
}

impl StdError for SolveDivergence {}

#[derive(Debug)]
pub enum Error {
    Configuration(ConfigurationError),
    SolveDivergence(SolveDivergence),
    /// The sizes of a supplied state do not match the current function spaces.
    StateLayoutMismatch { expected: Vec<usize>, actual: Vec<usize> },
    /// The operator was evaluated before `init` was called.
    NotInitialized,
    /// `init` was called more than once.
    AlreadyInitialized,
    /// Assembling a system matrix failed.
    Assembly(eyre::Report),
    /// Writing diagnostics or snapshots failed.
    Output(eyre::Report),
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Configuration(err) => write!(f, "configuration error: {}", err),
            Error::SolveDivergence(err) => err.fmt(f),
            Error::StateLayoutMismatch { expected, actual } => write!(
                f,
                "state layout mismatch: expected block sizes {:?}, got {:?}",
                expected, actual
            ),
            Error::NotInitialized => write!(f, "operator evaluated before initialization"),
            Error::AlreadyInitialized => write!(f, "operator initialized more than once"),
            Error::Assembly(err) => write!(f, "assembly failed: {}", err),
            Error::Output(err) => write!(f, "output failed: {}", err),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Configuration(err) => Some(err),
            Error::SolveDivergence(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ConfigurationError> for Error {
    fn from(err: ConfigurationError) -> Self {
        Error::Configuration(err)
    }
}

impl From<SolveDivergence> for Error {
    fn from(err: SolveDivergence) -> Self {
        Error::SolveDivergence(err)
    }
}
