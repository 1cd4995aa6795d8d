//! Per-region material coefficients.
use crate::error::ConfigurationError;
use crate::mesh::topology::MeshTopology;
use nalgebra::{Matrix2, Point2, Vector2};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Debug;
use std::sync::Arc;

pub const ELECTRICAL_CONDUCTIVITY: &str = "electrical_conductivity";
pub const MAGNETIC_PERMEABILITY: &str = "magnetic_permeability";
pub const HEAT_CAPACITY: &str = "heat_capacity";
pub const THERMAL_CONDUCTIVITY: &str = "thermal_conductivity";

/// The properties every region of the mesh must provide.
pub const REQUIRED_PROPERTIES: [&str; 4] = [
    ELECTRICAL_CONDUCTIVITY,
    MAGNETIC_PERMEABILITY,
    HEAT_CAPACITY,
    THERMAL_CONDUCTIVITY,
];

/// The value of a coefficient at a given point in space and time.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum PropertyValue {
    Scalar(f64),
    Tensor(Matrix2<f64>),
}

impl PropertyValue {
    /// The value in the direction of the given unit vector, `d^T K d`.
    pub fn directional(&self, direction: &Vector2<f64>) -> f64 {
        match self {
            PropertyValue::Scalar(s) => *s,
            PropertyValue::Tensor(k) => direction.dot(&(k * direction)),
        }
    }

    /// Scalar value, or the mean of the diagonal for tensors.
    pub fn isotropic(&self) -> f64 {
        match self {
            PropertyValue::Scalar(s) => *s,
            PropertyValue::Tensor(k) => 0.5 * k.trace(),
        }
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            PropertyValue::Scalar(s) => Some(*s),
            PropertyValue::Tensor(_) => None,
        }
    }

    fn is_nonnegative(&self) -> bool {
        match self {
            PropertyValue::Scalar(s) => *s >= 0.0,
            PropertyValue::Tensor(k) => {
                k[(0, 1)] == k[(1, 0)] && k[(0, 0)] >= 0.0 && k[(1, 1)] >= 0.0 && k.determinant() >= 0.0
            }
        }
    }

    fn is_positive(&self) -> bool {
        match self {
            PropertyValue::Scalar(s) => *s > 0.0,
            PropertyValue::Tensor(k) => k[(0, 1)] == k[(1, 0)] && k[(0, 0)] > 0.0 && k.determinant() > 0.0,
        }
    }
}

/// A material coefficient, either constant or given as a function.
#[derive(Clone)]
pub enum Coefficient {
    Constant(f64),
    Anisotropic(Matrix2<f64>),
    FunctionOfTime(Arc<dyn Fn(f64) -> f64 + Send + Sync>),
    FunctionOfPositionAndTime(Arc<dyn Fn(&Point2<f64>, f64) -> f64 + Send + Sync>),
}

impl Debug for Coefficient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Coefficient::Constant(value) => f.debug_tuple("Constant").field(value).finish(),
            Coefficient::Anisotropic(value) => f.debug_tuple("Anisotropic").field(value).finish(),
            Coefficient::FunctionOfTime(_) => write!(f, "FunctionOfTime(..)"),
            Coefficient::FunctionOfPositionAndTime(_) => write!(f, "FunctionOfPositionAndTime(..)"),
        }
    }
}

impl From<f64> for Coefficient {
    fn from(value: f64) -> Self {
        Coefficient::Constant(value)
    }
}

impl Coefficient {
    pub fn function_of_time(f: impl Fn(f64) -> f64 + Send + Sync + 'static) -> Self {
        Coefficient::FunctionOfTime(Arc::new(f))
    }

    pub fn function_of_position_and_time(f: impl Fn(&Point2<f64>, f64) -> f64 + Send + Sync + 'static) -> Self {
        Coefficient::FunctionOfPositionAndTime(Arc::new(f))
    }

    pub fn is_time_dependent(&self) -> bool {
        matches!(
            self,
            Coefficient::FunctionOfTime(_) | Coefficient::FunctionOfPositionAndTime(_)
        )
    }

    pub fn is_position_dependent(&self) -> bool {
        matches!(self, Coefficient::FunctionOfPositionAndTime(_))
    }

    /// Evaluates the coefficient. Returns `None` if the coefficient depends on position and no
    /// position was given.
    pub fn evaluate(&self, position: Option<&Point2<f64>>, time: f64) -> Option<PropertyValue> {
        match self {
            Coefficient::Constant(value) => Some(PropertyValue::Scalar(*value)),
            Coefficient::Anisotropic(value) => Some(PropertyValue::Tensor(*value)),
            Coefficient::FunctionOfTime(f) => Some(PropertyValue::Scalar(f(time))),
            Coefficient::FunctionOfPositionAndTime(f) => position.map(|x| PropertyValue::Scalar(f(x, time))),
        }
    }
}

/// Maps property names and region ids to coefficients.
///
/// Lookups never fall back to a default: a region without a registered value is an error.
#[derive(Debug, Clone, Default)]
pub struct PropertyMap {
    properties: BTreeMap<String, BTreeMap<usize, Coefficient>>,
}

impl PropertyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        name: impl Into<String>,
        region: usize,
        coefficient: impl Into<Coefficient>,
    ) -> Result<(), ConfigurationError> {
        let name = name.into();
        let regions = self.properties.entry(name.clone()).or_default();
        if regions.contains_key(&region) {
            return Err(ConfigurationError::DuplicateProperty { property: name, region });
        }
        regions.insert(region, coefficient.into());
        Ok(())
    }

    /// Builder-style variant of [`insert`](Self::insert).
    pub fn with(
        mut self,
        name: impl Into<String>,
        region: usize,
        coefficient: impl Into<Coefficient>,
    ) -> Result<Self, ConfigurationError> {
        self.insert(name, region, coefficient)?;
        Ok(self)
    }

    pub fn coefficient(&self, name: &str, region: usize) -> Result<&Coefficient, ConfigurationError> {
        let regions = self
            .properties
            .get(name)
            .ok_or_else(|| ConfigurationError::UnknownProperty(name.to_string()))?;
        regions
            .get(&region)
            .ok_or_else(|| ConfigurationError::UnknownRegion {
                property: name.to_string(),
                region,
            })
    }

    /// Looks up a property that does not depend on position.
    pub fn get_property(&self, name: &str, region: usize, time: f64) -> Result<PropertyValue, ConfigurationError> {
        self.coefficient(name, region)?
            .evaluate(None, time)
            .ok_or_else(|| ConfigurationError::PositionRequired {
                property: name.to_string(),
                region,
            })
    }

    /// Looks up a property at the given position.
    pub fn get_property_at(
        &self,
        name: &str,
        region: usize,
        position: &Point2<f64>,
        time: f64,
    ) -> Result<PropertyValue, ConfigurationError> {
        self.coefficient(name, region)?
            .evaluate(Some(position), time)
            .ok_or_else(|| ConfigurationError::PositionRequired {
                property: name.to_string(),
                region,
            })
    }

    pub fn property_names(&self) -> impl '_ + Iterator<Item = &str> {
        self.properties.keys().map(String::as_str)
    }

    /// Regions for which the given property has a registered value.
    pub fn regions(&self, name: &str) -> Vec<usize> {
        self.properties
            .get(name)
            .map(|regions| regions.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Whether any registered coefficient depends on time.
    pub fn is_time_dependent(&self) -> bool {
        self.properties
            .values()
            .flat_map(|regions| regions.values())
            .any(Coefficient::is_time_dependent)
    }

    /// Checks that every given region resolves every required property.
    pub fn validate(&self, regions: &[usize], required: &[&str]) -> Result<(), ConfigurationError> {
        for name in required {
            for &region in regions {
                self.coefficient(name, region)?;
            }
        }
        Ok(())
    }
}

/// Material properties evaluated at the centroid of every cell.
#[derive(Debug, Clone, PartialEq)]
pub struct CellProperties {
    pub electrical_conductivity: Vec<PropertyValue>,
    pub magnetic_permeability: Vec<f64>,
    pub heat_capacity: Vec<f64>,
    pub thermal_conductivity: Vec<PropertyValue>,
}

impl CellProperties {
    /// Evaluates and validates all properties at the given time.
    ///
    /// Conductivity must be non-negative (zero marks an insulator), all other properties must
    /// be strictly positive.
    pub fn evaluate(properties: &PropertyMap, topology: &MeshTopology, time: f64) -> Result<Self, ConfigurationError> {
        let evaluate = |name: &str, cell: usize| {
            let region = topology.cell_region(cell);
            properties.get_property_at(name, region, topology.cell_centroid(cell), time)
        };
        let invalid = |name: &str, cell: usize, reason: &str| ConfigurationError::InvalidProperty {
            property: name.to_string(),
            region: topology.cell_region(cell),
            reason: reason.to_string(),
        };

        let per_cell: Vec<_> = (0..topology.num_cells())
            .into_par_iter()
            .map(|cell| {
                let sigma = evaluate(ELECTRICAL_CONDUCTIVITY, cell)?;
                if !sigma.is_nonnegative() {
                    return Err(invalid(ELECTRICAL_CONDUCTIVITY, cell, "must be non-negative"));
                }
                let mu = evaluate(MAGNETIC_PERMEABILITY, cell)?;
                if !mu.is_positive() {
                    return Err(invalid(MAGNETIC_PERMEABILITY, cell, "must be positive"));
                }
                let c = evaluate(HEAT_CAPACITY, cell)?;
                if !c.is_positive() {
                    return Err(invalid(HEAT_CAPACITY, cell, "must be positive"));
                }
                let k = evaluate(THERMAL_CONDUCTIVITY, cell)?;
                if !k.is_positive() {
                    return Err(invalid(THERMAL_CONDUCTIVITY, cell, "must be positive definite"));
                }
                Ok((sigma, mu.isotropic(), c.isotropic(), k))
            })
            .collect::<Result<_, _>>()?;

        let mut result = Self {
            electrical_conductivity: Vec::with_capacity(per_cell.len()),
            magnetic_permeability: Vec::with_capacity(per_cell.len()),
            heat_capacity: Vec::with_capacity(per_cell.len()),
            thermal_conductivity: Vec::with_capacity(per_cell.len()),
        };
        for (sigma, mu, c, k) in per_cell {
            result.electrical_conductivity.push(sigma);
            result.magnetic_permeability.push(mu);
            result.heat_capacity.push(c);
            result.thermal_conductivity.push(k);
        }
        Ok(result)
    }
}
