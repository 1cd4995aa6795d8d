//! Deserializable setup of a Joule heating simulation.
//!
//! The configuration is plain data. It is turned into a [`PropertyMap`], a
//! [`BoundaryRegistry`], execution settings and an ODE solver, and all validation happens in
//! that conversion.
use crate::boundary::{BoundaryCondition, BoundaryFunction, BoundaryKind, BoundaryParameters, BoundaryRegistry};
use crate::error::ConfigurationError;
use crate::material::{
    Coefficient, PropertyMap, ELECTRICAL_CONDUCTIVITY, HEAT_CAPACITY, MAGNETIC_PERMEABILITY, THERMAL_CONDUCTIVITY,
};
use crate::mesh::topology::MeshTopology;
use crate::ode::{build_ode_solver, OdeSolver};
use crate::operator::{CouplingCoefficients, CoupledDiffusionOperator, LinearSolverSettings};
use crate::state::Field;
use crate::transient::ExecutionSettings;
use nalgebra::Matrix2;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::sync::Arc;

/// A constant coefficient, either isotropic or a full 2x2 tensor given row by row.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CoefficientConfig {
    Scalar(f64),
    Tensor([[f64; 2]; 2]),
}

impl CoefficientConfig {
    pub fn to_coefficient(&self) -> Coefficient {
        match self {
            CoefficientConfig::Scalar(value) => Coefficient::Constant(*value),
            CoefficientConfig::Tensor([[a, b], [c, d]]) => Coefficient::Anisotropic(Matrix2::new(*a, *b, *c, *d)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialConfig {
    pub region: usize,
    pub electrical_conductivity: CoefficientConfig,
    pub magnetic_permeability: CoefficientConfig,
    pub heat_capacity: CoefficientConfig,
    pub thermal_conductivity: CoefficientConfig,
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BoundaryValueConfig {
    Constant { value: f64 },
    /// `amplitude * cos(2 pi f t)`, with the frequency `f` taken from the boundary parameters.
    TimeHarmonic { amplitude: f64 },
}

impl BoundaryValueConfig {
    pub fn to_function(&self) -> BoundaryFunction {
        match *self {
            BoundaryValueConfig::Constant { value } => BoundaryFunction::Constant(value),
            BoundaryValueConfig::TimeHarmonic { amplitude } => {
                BoundaryFunction::function_of_time(move |t, parameters| {
                    amplitude * (2.0 * PI * parameters.frequency * t).cos()
                })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundaryConfig {
    pub role: String,
    pub field: Field,
    pub kind: BoundaryKind,
    pub attributes: Vec<usize>,
    pub value: BoundaryValueConfig,
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionerConfig {
    pub t_initial: f64,
    pub t_final: f64,
    pub dt: f64,
    /// 1 Backward Euler, 2 SDIRK23 (L-stable), 3 SDIRK33, 22 implicit midpoint,
    /// 23 SDIRK23 (A-stable), 34 SDIRK34.
    pub scheme: i32,
    pub output_every: usize,
    pub debug: bool,
}

impl Default for ExecutionerConfig {
    fn default() -> Self {
        let settings = ExecutionSettings::default();
        Self {
            t_initial: settings.t_initial,
            t_final: settings.t_final,
            dt: settings.dt,
            scheme: 1,
            output_every: settings.output_every,
            debug: settings.debug,
        }
    }
}

impl ExecutionerConfig {
    pub fn settings(&self) -> ExecutionSettings {
        ExecutionSettings {
            t_initial: self.t_initial,
            t_final: self.t_final,
            dt: self.dt,
            output_every: self.output_every,
            debug: self.debug,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JouleConfig {
    pub materials: Vec<MaterialConfig>,
    #[serde(default)]
    pub boundary_parameters: BoundaryParameters,
    pub boundaries: Vec<BoundaryConfig>,
    #[serde(default)]
    pub executioner: ExecutionerConfig,
    #[serde(default)]
    pub solver: LinearSolverSettings,
    #[serde(default)]
    pub coupling: CouplingCoefficients,
}

impl JouleConfig {
    pub fn property_map(&self) -> Result<PropertyMap, ConfigurationError> {
        let mut properties = PropertyMap::new();
        for material in &self.materials {
            let region = material.region;
            properties.insert(
                ELECTRICAL_CONDUCTIVITY,
                region,
                material.electrical_conductivity.to_coefficient(),
            )?;
            properties.insert(
                MAGNETIC_PERMEABILITY,
                region,
                material.magnetic_permeability.to_coefficient(),
            )?;
            properties.insert(HEAT_CAPACITY, region, material.heat_capacity.to_coefficient())?;
            properties.insert(
                THERMAL_CONDUCTIVITY,
                region,
                material.thermal_conductivity.to_coefficient(),
            )?;
        }
        Ok(properties)
    }

    pub fn boundary_registry(&self) -> Result<BoundaryRegistry, ConfigurationError> {
        let mut registry = BoundaryRegistry::new(self.boundary_parameters);
        for boundary in &self.boundaries {
            registry.register(BoundaryCondition {
                role: boundary.role.clone(),
                field: boundary.field,
                kind: boundary.kind,
                attributes: boundary.attributes.iter().copied().collect(),
                function: boundary.value.to_function(),
            })?;
        }
        Ok(registry)
    }

    pub fn execution_settings(&self) -> Result<ExecutionSettings, ConfigurationError> {
        let settings = self.executioner.settings();
        settings.validate()?;
        Ok(settings)
    }

    pub fn ode_solver(&self) -> Result<Box<dyn OdeSolver>, ConfigurationError> {
        build_ode_solver(self.executioner.scheme)
    }

    /// Builds the operator on the given mesh topology.
    pub fn build_operator(&self, topology: Arc<MeshTopology>) -> Result<CoupledDiffusionOperator, ConfigurationError> {
        let operator = CoupledDiffusionOperator::new(topology, self.property_map()?, self.boundary_registry()?)?
            .with_coupling(self.coupling)
            .with_solver_settings(self.solver);
        Ok(operator)
    }
}
