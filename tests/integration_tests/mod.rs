use joule::boundary::{
    BoundaryCondition, BoundaryFunction, BoundaryParameters, BoundaryRegistry, ELECTRIC_POTENTIAL, TANGENTIAL_DEDT,
    THERMAL_FLUX,
};
use joule::material::{
    PropertyMap, ELECTRICAL_CONDUCTIVITY, HEAT_CAPACITY, MAGNETIC_PERMEABILITY, THERMAL_CONDUCTIVITY,
};
use joule::mesh::procedural::{create_rectangle_quad_mesh_2d, LATERAL_ATTRIBUTE, LEFT_ATTRIBUTE, RIGHT_ATTRIBUTE};
use joule::mesh::topology::MeshTopology;
use joule::nalgebra::Point2;
use joule::ode::OdeSchemeKind;
use joule::operator::{CoupledDiffusionOperator, InitialConditions, LinearSolverSettings};
use joule::state::Field;
use joule::transient::{ExecutionSettings, TimeIntegrationLoop};
use std::path::PathBuf;
use std::sync::Arc;

mod joule_heating;
mod vtk;

fn data_output_path() -> PathBuf {
    std::env::temp_dir().join("joule_integration_tests")
}

/// A `2 x 1` conductor driven by a potential difference of 2 between its ends, insulated
/// everywhere. The steady electric field is `(1, 0)` and the heating is uniform.
fn driven_conductor(scheme: OdeSchemeKind, settings: ExecutionSettings) -> TimeIntegrationLoop {
    let mesh = create_rectangle_quad_mesh_2d(&Point2::origin(), 2.0, 1.0, 8, 4);
    let topology = Arc::new(MeshTopology::from_mesh(&mesh).unwrap());

    let properties = PropertyMap::new()
        .with(ELECTRICAL_CONDUCTIVITY, 1, 1.0)
        .unwrap()
        .with(MAGNETIC_PERMEABILITY, 1, 1.0)
        .unwrap()
        .with(HEAT_CAPACITY, 1, 1.0)
        .unwrap()
        .with(THERMAL_CONDUCTIVITY, 1, 1.0)
        .unwrap();
    let boundaries = BoundaryRegistry::new(BoundaryParameters::default())
        .with(BoundaryCondition::essential(
            ELECTRIC_POTENTIAL,
            Field::Potential,
            [LEFT_ATTRIBUTE, RIGHT_ATTRIBUTE],
            BoundaryFunction::function_of_position_and_time(|x, _, _| 1.0 - x.x),
        ))
        .unwrap()
        .with(BoundaryCondition::essential(
            TANGENTIAL_DEDT,
            Field::ElectricField,
            [LEFT_ATTRIBUTE, RIGHT_ATTRIBUTE],
            BoundaryFunction::Constant(0.0),
        ))
        .unwrap()
        .with(BoundaryCondition::essential(
            THERMAL_FLUX,
            Field::ThermalFlux,
            [LEFT_ATTRIBUTE, RIGHT_ATTRIBUTE, LATERAL_ATTRIBUTE],
            BoundaryFunction::Constant(0.0),
        ))
        .unwrap();

    let mut operator = CoupledDiffusionOperator::new(topology, properties, boundaries)
        .unwrap()
        .with_solver_settings(LinearSolverSettings {
            relative_tolerance: 1e-10,
            ..LinearSolverSettings::default()
        });
    let mut state = operator.create_state();
    operator.init(&mut state, &InitialConditions::new()).unwrap();

    TimeIntegrationLoop::new(mesh, operator, scheme.build(), state, settings).unwrap()
}
