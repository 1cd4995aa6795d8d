//! Named boundary conditions and boundary attribute markers.
use crate::error::ConfigurationError;
use crate::state::Field;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Essential condition on the electric potential.
pub const ELECTRIC_POTENTIAL: &str = "electric_potential";
/// Essential condition on the time derivative of the tangential electric field.
pub const TANGENTIAL_DEDT: &str = "tangential_dEdt";
/// Essential condition on the outward normal thermal flux.
pub const THERMAL_FLUX: &str = "thermal_flux";
/// Natural condition on the normal current density entering through the boundary.
pub const CURRENT_DENSITY: &str = "current_density";
/// Natural condition prescribing the boundary temperature seen by the thermal flux.
pub const BOUNDARY_TEMPERATURE: &str = "boundary_temperature";

/// Physical constants handed to boundary value functions.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundaryParameters {
    pub permeability: f64,
    pub conductivity: f64,
    pub frequency: f64,
}

impl Default for BoundaryParameters {
    fn default() -> Self {
        Self {
            permeability: 1.0,
            conductivity: 1.0,
            frequency: 0.0,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoundaryKind {
    Essential,
    Natural,
}

pub type TimeFunction = dyn Fn(f64, &BoundaryParameters) -> f64 + Send + Sync;
pub type SpaceTimeFunction = dyn Fn(&Point2<f64>, f64, &BoundaryParameters) -> f64 + Send + Sync;

/// The value generator of a boundary condition.
#[derive(Clone)]
pub enum BoundaryFunction {
    Constant(f64),
    FunctionOfTime(Arc<TimeFunction>),
    FunctionOfPositionAndTime(Arc<SpaceTimeFunction>),
}

impl fmt::Debug for BoundaryFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundaryFunction::Constant(value) => f.debug_tuple("Constant").field(value).finish(),
            BoundaryFunction::FunctionOfTime(_) => write!(f, "FunctionOfTime(..)"),
            BoundaryFunction::FunctionOfPositionAndTime(_) => write!(f, "FunctionOfPositionAndTime(..)"),
        }
    }
}

impl BoundaryFunction {
    pub fn function_of_time(f: impl Fn(f64, &BoundaryParameters) -> f64 + Send + Sync + 'static) -> Self {
        BoundaryFunction::FunctionOfTime(Arc::new(f))
    }

    pub fn function_of_position_and_time(
        f: impl Fn(&Point2<f64>, f64, &BoundaryParameters) -> f64 + Send + Sync + 'static,
    ) -> Self {
        BoundaryFunction::FunctionOfPositionAndTime(Arc::new(f))
    }

    pub fn evaluate(&self, position: &Point2<f64>, time: f64, parameters: &BoundaryParameters) -> f64 {
        match self {
            BoundaryFunction::Constant(value) => *value,
            BoundaryFunction::FunctionOfTime(f) => f(time, parameters),
            BoundaryFunction::FunctionOfPositionAndTime(f) => f(position, time, parameters),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BoundaryCondition {
    pub role: String,
    pub field: Field,
    pub kind: BoundaryKind,
    pub attributes: BTreeSet<usize>,
    pub function: BoundaryFunction,
}

impl BoundaryCondition {
    pub fn essential(
        role: impl Into<String>,
        field: Field,
        attributes: impl IntoIterator<Item = usize>,
        function: BoundaryFunction,
    ) -> Self {
        Self {
            role: role.into(),
            field,
            kind: BoundaryKind::Essential,
            attributes: attributes.into_iter().collect(),
            function,
        }
    }

    pub fn natural(
        role: impl Into<String>,
        field: Field,
        attributes: impl IntoIterator<Item = usize>,
        function: BoundaryFunction,
    ) -> Self {
        Self {
            kind: BoundaryKind::Natural,
            ..Self::essential(role, field, attributes, function)
        }
    }
}

/// One flag per boundary attribute `1..=count`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundaryMarkers(Vec<bool>);

impl BoundaryMarkers {
    pub fn none(count: usize) -> Self {
        Self(vec![false; count])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether the given (1-based) attribute is marked. Attributes out of range are unmarked.
    pub fn is_marked(&self, attribute: usize) -> bool {
        attribute >= 1 && self.0.get(attribute - 1).copied().unwrap_or(false)
    }

    /// Marker array with 1 where the role applies and 0 elsewhere.
    pub fn to_array(&self) -> Vec<i32> {
        self.0.iter().map(|&marked| i32::from(marked)).collect()
    }

    pub fn marked_attributes(&self) -> Vec<usize> {
        self.0
            .iter()
            .enumerate()
            .filter_map(|(i, &marked)| marked.then_some(i + 1))
            .collect()
    }
}

/// Registry of named boundary conditions.
///
/// The registry is built once during setup. Registration rejects a role whose attributes
/// overlap another role on the same field when either of the two is essential, so that a later
/// registration can never silently override an earlier one.
#[derive(Debug, Clone, Default)]
pub struct BoundaryRegistry {
    conditions: Vec<BoundaryCondition>,
    parameters: BoundaryParameters,
}

impl BoundaryRegistry {
    pub fn new(parameters: BoundaryParameters) -> Self {
        Self {
            conditions: Vec::new(),
            parameters,
        }
    }

    pub fn parameters(&self) -> &BoundaryParameters {
        &self.parameters
    }

    pub fn register(&mut self, condition: BoundaryCondition) -> Result<(), ConfigurationError> {
        if self.contains(&condition.role) {
            return Err(ConfigurationError::DuplicateRole(condition.role));
        }
        for existing in self.conditions.iter().filter(|c| c.field == condition.field) {
            let either_essential =
                existing.kind == BoundaryKind::Essential || condition.kind == BoundaryKind::Essential;
            if !either_essential {
                continue;
            }
            if let Some(&attribute) = existing.attributes.intersection(&condition.attributes).next() {
                return Err(ConfigurationError::ConflictingBoundary {
                    field: condition.field,
                    attribute,
                    existing: existing.role.clone(),
                    new: condition.role,
                });
            }
        }
        log::debug!(
            "Registered boundary role \"{}\" on {} attributes {:?}",
            condition.role,
            condition.field,
            condition.attributes
        );
        self.conditions.push(condition);
        Ok(())
    }

    /// Builder-style variant of [`register`](Self::register).
    pub fn with(mut self, condition: BoundaryCondition) -> Result<Self, ConfigurationError> {
        self.register(condition)?;
        Ok(self)
    }

    pub fn contains(&self, role: &str) -> bool {
        self.conditions.iter().any(|c| c.role == role)
    }

    pub fn get(&self, role: &str) -> Result<&BoundaryCondition, ConfigurationError> {
        self.conditions
            .iter()
            .find(|c| c.role == role)
            .ok_or_else(|| ConfigurationError::UnknownRole(role.to_string()))
    }

    /// Looks up a role and checks that it acts on the expected field.
    pub fn require(&self, role: &str, field: Field) -> Result<&BoundaryCondition, ConfigurationError> {
        let condition = self.get(role)?;
        if condition.field != field {
            return Err(ConfigurationError::RoleFieldMismatch {
                role: role.to_string(),
                expected: field,
                actual: condition.field,
            });
        }
        Ok(condition)
    }

    pub fn conditions(&self) -> &[BoundaryCondition] {
        &self.conditions
    }

    /// Converts a role into markers over the boundary attributes `1..=attribute_count`.
    pub fn resolve_markers(&self, role: &str, attribute_count: usize) -> Result<BoundaryMarkers, ConfigurationError> {
        let condition = self.get(role)?;
        let mut markers = BoundaryMarkers::none(attribute_count);
        for &attribute in &condition.attributes {
            if attribute == 0 || attribute > attribute_count {
                return Err(ConfigurationError::AttributeOutOfRange {
                    role: role.to_string(),
                    attribute,
                    count: attribute_count,
                });
            }
            markers.0[attribute - 1] = true;
        }
        Ok(markers)
    }

    /// Evaluates the value generator of a role. Pure function of its inputs.
    pub fn current_boundary_value(&self, role: &str, position: &Point2<f64>, time: f64) -> Result<f64, ConfigurationError> {
        let condition = self.get(role)?;
        Ok(condition.function.evaluate(position, time, &self.parameters))
    }
}
