use super::driven_conductor;
use joule::boundary::{
    BoundaryCondition, BoundaryFunction, BoundaryParameters, BoundaryRegistry, ELECTRIC_POTENTIAL, TANGENTIAL_DEDT,
    THERMAL_FLUX,
};
use joule::error::Error;
use joule::material::{
    PropertyMap, ELECTRICAL_CONDUCTIVITY, HEAT_CAPACITY, MAGNETIC_PERMEABILITY, THERMAL_CONDUCTIVITY,
};
use joule::mesh::procedural::{create_rectangle_quad_mesh_2d, LATERAL_ATTRIBUTE, LEFT_ATTRIBUTE, RIGHT_ATTRIBUTE};
use joule::mesh::topology::MeshTopology;
use joule::nalgebra::Point2;
use joule::ode::OdeSchemeKind;
use joule::operator::{CoupledDiffusionOperator, InitialConditions, LinearSolverSettings};
use joule::state::Field;
use joule::transient::{ExecutionSettings, OutputSink, Snapshot, TimeIntegrationLoop};
use matrixcompare::assert_scalar_eq;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
struct Recorded {
    cycle: usize,
    time: f64,
    is_final: bool,
    electric_losses: f64,
}

#[derive(Default)]
struct RecordingSink {
    snapshots: Rc<RefCell<Vec<Recorded>>>,
}

impl OutputSink for RecordingSink {
    fn write(&mut self, snapshot: &Snapshot) -> eyre::Result<()> {
        self.snapshots.borrow_mut().push(Recorded {
            cycle: snapshot.cycle,
            time: snapshot.time,
            is_final: snapshot.is_final,
            electric_losses: snapshot.electric_losses,
        });
        Ok(())
    }
}

struct FailingSink;

impl OutputSink for FailingSink {
    fn write(&mut self, _snapshot: &Snapshot) -> eyre::Result<()> {
        Err(eyre::eyre!("disk full"))
    }
}

fn settings(dt: f64, t_final: f64, output_every: usize) -> ExecutionSettings {
    ExecutionSettings {
        t_initial: 0.0,
        t_final,
        dt,
        output_every,
        debug: false,
    }
}

#[test]
fn backward_euler_heats_the_conductor_uniformly() {
    let mut simulation = driven_conductor(OdeSchemeKind::BackwardEuler, settings(0.25, 1.0, 1));
    let summary = simulation.run().unwrap();

    assert_eq!(summary.cycles, 4);
    assert_eq!(summary.final_time, 1.0);
    assert_eq!(summary.assembly_count, 1);
    // sigma |E|^2 = 1 over an area of 2
    assert_scalar_eq!(summary.electric_losses.unwrap(), 2.0, comp = abs, tol = 1e-7);

    let state = simulation.state();
    let operator = simulation.operator();
    for &t in state.view(Field::Temperature).iter() {
        assert_scalar_eq!(t, 1.0, comp = abs, tol = 1e-8);
    }
    for &w in state.view(Field::DerivedHeating).iter() {
        assert_scalar_eq!(w, 1.0, comp = abs, tol = 1e-8);
    }
    for e in operator
        .space(Field::ElectricField)
        .reconstruct_cell_vectors(state.view(Field::ElectricField))
    {
        assert_scalar_eq!(e.x, 1.0, comp = abs, tol = 1e-8);
        assert_scalar_eq!(e.y, 0.0, comp = abs, tol = 1e-8);
    }
    assert!(state.view(Field::MagneticFlux).amax() < 1e-8);
    assert!(state.view(Field::ThermalFlux).amax() < 1e-8);
}

#[test]
fn every_scheme_accumulates_the_same_heat() {
    for scheme in [
        OdeSchemeKind::BackwardEuler,
        OdeSchemeKind::Sdirk23LStable,
        OdeSchemeKind::Sdirk33,
        OdeSchemeKind::ImplicitMidpoint,
        OdeSchemeKind::Sdirk23AStable,
        OdeSchemeKind::Sdirk34,
    ] {
        let mut simulation = driven_conductor(scheme, settings(0.5, 1.0, 0));
        simulation.run().unwrap();
        for &t in simulation.state().view(Field::Temperature).iter() {
            assert_scalar_eq!(t, 1.0, comp = abs, tol = 1e-7);
        }
    }
}

#[test]
fn last_step_is_shortened_to_hit_the_final_time() {
    let mut simulation = driven_conductor(OdeSchemeKind::BackwardEuler, settings(0.5, 1.2, 1));
    let mut reports = Vec::new();
    while let Some(report) = simulation.advance().unwrap() {
        reports.push(report);
    }

    let dts: Vec<_> = reports.iter().map(|r| r.dt).collect();
    assert_eq!(reports.len(), 3);
    assert_eq!(dts[0], 0.5);
    assert_eq!(dts[1], 0.5);
    assert_scalar_eq!(dts[2], 0.2, comp = abs, tol = 1e-12);
    assert!(reports[2].is_final);
    assert!(!reports[1].is_final);
    assert_eq!(simulation.time(), 1.2);
    assert!(simulation.is_done());

    // A new step size requires new systems
    assert_eq!(simulation.operator().assembly_count(), 2);
    for &t in simulation.state().view(Field::Temperature).iter() {
        assert_scalar_eq!(t, 1.2, comp = abs, tol = 1e-8);
    }
}

#[test]
fn output_is_produced_periodically_and_at_the_end() {
    let sink = RecordingSink::default();
    let snapshots = Rc::clone(&sink.snapshots);
    let mut simulation = driven_conductor(OdeSchemeKind::BackwardEuler, settings(0.25, 1.25, 2))
        .with_sink(Box::new(sink));
    simulation.run().unwrap();

    let snapshots = snapshots.borrow();
    let cycles: Vec<_> = snapshots.iter().map(|s| s.cycle).collect();
    assert_eq!(cycles, vec![0, 2, 4, 5]);
    assert_eq!(snapshots[0].time, 0.0);
    assert_eq!(snapshots[0].electric_losses, 0.0);
    assert!(snapshots.last().unwrap().is_final);
    assert_eq!(snapshots.last().unwrap().time, 1.25);
    assert!(snapshots[..3].iter().all(|s| !s.is_final));
    for snapshot in &snapshots[1..] {
        assert_scalar_eq!(snapshot.electric_losses, 2.0, comp = abs, tol = 1e-7);
    }
}

#[test]
fn empty_interval_only_writes_the_initial_state() {
    let sink = RecordingSink::default();
    let snapshots = Rc::clone(&sink.snapshots);
    let mut simulation =
        driven_conductor(OdeSchemeKind::Sdirk33, settings(0.1, 0.0, 1)).with_sink(Box::new(sink));
    let summary = simulation.run().unwrap();
    assert_eq!(summary.cycles, 0);
    assert_eq!(summary.final_time, 0.0);
    assert_eq!(summary.assembly_count, 0);
    assert_eq!(snapshots.borrow().len(), 1);
}

#[test]
fn output_failure_aborts_the_run() {
    let mut simulation =
        driven_conductor(OdeSchemeKind::BackwardEuler, settings(0.25, 1.0, 1)).with_sink(Box::new(FailingSink));
    assert!(matches!(simulation.run(), Err(Error::Output(_))));
    assert_eq!(simulation.cycle(), 0);
}

#[test]
fn debug_dumps_do_not_change_the_result() {
    let mut plain = driven_conductor(OdeSchemeKind::Sdirk23LStable, settings(0.25, 0.5, 1));
    let mut debugged = driven_conductor(
        OdeSchemeKind::Sdirk23LStable,
        ExecutionSettings {
            debug: true,
            ..settings(0.25, 0.5, 1)
        },
    );
    plain.run().unwrap();
    debugged.run().unwrap();
    assert_eq!(plain.state().as_vector(), debugged.state().as_vector());
}

/// A conductor in the lower half of a `2 x 1` box, with non-conducting air above it.
fn conductor_below_air(settings: ExecutionSettings) -> TimeIntegrationLoop {
    let mut mesh = create_rectangle_quad_mesh_2d(&Point2::origin(), 2.0, 1.0, 8, 4);
    mesh.assign_cell_regions(|center| if center.y < 0.5 { CONDUCTOR } else { AIR });
    let topology = Arc::new(MeshTopology::from_mesh(&mesh).unwrap());

    let mut properties = PropertyMap::new();
    for (region, sigma) in [(CONDUCTOR, 1.0), (AIR, 0.0)] {
        properties.insert(ELECTRICAL_CONDUCTIVITY, region, sigma).unwrap();
        properties.insert(MAGNETIC_PERMEABILITY, region, 1.0).unwrap();
        properties.insert(HEAT_CAPACITY, region, 1.0).unwrap();
        properties.insert(THERMAL_CONDUCTIVITY, region, 1.0).unwrap();
    }
    let boundaries = BoundaryRegistry::new(BoundaryParameters::default())
        .with(BoundaryCondition::essential(
            ELECTRIC_POTENTIAL,
            Field::Potential,
            [LEFT_ATTRIBUTE, RIGHT_ATTRIBUTE],
            BoundaryFunction::function_of_position_and_time(|x, _, _| if x.x < 1.0 { 1.0 } else { -1.0 }),
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
            relative_tolerance: 1e-9,
            ..LinearSolverSettings::default()
        });
    let mut state = operator.create_state();
    operator.init(&mut state, &InitialConditions::new()).unwrap();
    TimeIntegrationLoop::new(mesh, operator, OdeSchemeKind::BackwardEuler.build(), state, settings).unwrap()
}

const CONDUCTOR: usize = 1;
const AIR: usize = 2;

#[test]
fn conductor_embedded_in_air_heats_only_the_conductor() {
    let mut simulation = conductor_below_air(settings(0.5, 1.2, 1));
    let summary = simulation.run().unwrap();
    assert_eq!(summary.cycles, 3);
    assert_eq!(summary.final_time, 1.2);
    // Potential difference of 2 over a conductor of length 2 and cross section 0.5
    assert_scalar_eq!(summary.electric_losses.unwrap(), 1.0, comp = abs, tol = 1e-6);

    let state = simulation.state();
    let operator = simulation.operator();
    let topology = operator.topology();
    let heating = state.view(Field::DerivedHeating);
    let e = operator
        .space(Field::ElectricField)
        .reconstruct_cell_vectors(state.view(Field::ElectricField));
    for cell in 0..topology.num_cells() {
        assert!(heating[cell] >= 0.0);
        if topology.cell_region(cell) == CONDUCTOR {
            assert_scalar_eq!(heating[cell], 1.0, comp = abs, tol = 1e-6);
            assert_scalar_eq!(e[cell].x, 1.0, comp = abs, tol = 1e-6);
            assert_scalar_eq!(e[cell].y, 0.0, comp = abs, tol = 1e-6);
        } else {
            assert_eq!(heating[cell], 0.0);
            // Only cells touching the interface see the conductor's field
            if topology.cell_centroid(cell).y > 0.75 {
                assert_scalar_eq!(e[cell].norm(), 0.0, comp = abs, tol = 1e-12);
            }
        }
    }

    // Edges away from the conductor carry no field
    let circulation = state.view(Field::ElectricField);
    for edge in 0..topology.num_edges() {
        if topology.edge_midpoint(edge).y > 0.5 {
            assert_scalar_eq!(circulation[edge], 0.0, comp = abs, tol = 1e-12);
        }
    }

    // The box is insulated, so all dissipated energy stays inside
    let energy: f64 = state
        .view(Field::Temperature)
        .iter()
        .zip(topology.cell_areas())
        .map(|(t, area)| t * area)
        .sum();
    assert_scalar_eq!(energy, 1.2, comp = abs, tol = 1e-6);
}
