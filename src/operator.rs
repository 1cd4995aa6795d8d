//! The transient coupled electromagnetic-thermal operator.
//!
//! The operator advances the block state
//!
//! ```text
//! [T, F, Phi, E, B, w]
//! ```
//!
//! through implicit stages of the form `x_new = x + dt k`. Every stage solves, in order,
//!
//! 1. the potential `div(sigma grad Phi) = 0`,
//! 2. the electric field `sigma E = curl(B / mu) - sigma grad Phi` with `dB/dt = -curl E`,
//! 3. the Joule heating `w = sigma E.E`,
//! 4. the mixed heat equation `F = -k grad T`, `c dT/dt = -div F + w`.
//!
//! Each linear system is assembled once per distinct step size and material revision, has its
//! essential degrees of freedom eliminated and is solved with preconditioned conjugate
//! gradients.
use crate::assembly::global::{CsrAssembler, EliminatedSystem};
use crate::assembly::local::{EdgeSystemAssembler, NodalStiffnessAssembler};
use crate::assembly::{
    cell_edge_incidence, gradient_matrix, inverse_normal_edge_weights, lumped_edge_mass, tangential_edge_weights,
};
use crate::boundary::{
    BoundaryMarkers, BoundaryRegistry, BOUNDARY_TEMPERATURE, CURRENT_DENSITY, ELECTRIC_POTENTIAL, TANGENTIAL_DEDT,
    THERMAL_FLUX,
};
use crate::comm::Communicator;
use crate::error::{ConfigurationError, Error, SolveDivergence};
use crate::material::{CellProperties, PropertyMap, REQUIRED_PROPERTIES};
use crate::mesh::topology::MeshTopology;
use crate::ode::TimeDependentOperator;
use crate::space::{FunctionSpace, InitialCondition, SpaceKind};
use crate::state::{BlockLayout, BlockState, Field};
use itertools::{izip, Itertools};
use joule_sparse::cg::ConjugateGradient;
use joule_sparse::ops::{spmv, spmv_transpose};
use joule_sparse::precond::{Preconditioner, PreconditionerKind};
use joule_sparse::CsrMatrix;
use nalgebra::{DVector, DVectorView};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::sync::Arc;

/// Scaling factors of the terms that couple the electric and thermal blocks.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CouplingCoefficients {
    /// Factor of the Joule heating source in the heat equation.
    pub joule_heating: f64,
    /// Factor of the potential gradient in the electric field equation.
    pub potential_source: f64,
}

impl Default for CouplingCoefficients {
    fn default() -> Self {
        Self {
            joule_heating: 1.0,
            potential_source: 1.0,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinearSolverSettings {
    pub relative_tolerance: f64,
    pub max_iterations: usize,
    pub potential_preconditioner: PreconditionerKind,
    pub electric_preconditioner: PreconditionerKind,
    pub thermal_preconditioner: PreconditionerKind,
}

impl Default for LinearSolverSettings {
    fn default() -> Self {
        Self {
            relative_tolerance: 1e-12,
            max_iterations: 5000,
            potential_preconditioner: PreconditionerKind::Jacobi,
            electric_preconditioner: PreconditionerKind::SymmetricGaussSeidel,
            thermal_preconditioner: PreconditionerKind::Jacobi,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
pub struct LinearSolveStats {
    pub iterations: usize,
    pub residual: f64,
}

/// Diagnostics of the most recent implicit stage.
#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
pub struct ImplicitSolveReport {
    /// The time the stage was evaluated at, `time + dt`.
    pub time: f64,
    pub dt: f64,
    /// Whether the systems had to be assembled for this stage.
    pub reassembled: bool,
    pub potential: LinearSolveStats,
    pub electric: LinearSolveStats,
    pub thermal: LinearSolveStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemSummary {
    pub field: Field,
    pub num_dofs: usize,
    pub num_essential: usize,
    pub num_inactive: usize,
    pub nnz: usize,
    pub preconditioner: PreconditionerKind,
}

/// A snapshot of the assembled operators, produced by [`CoupledDiffusionOperator::debug`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperatorDump {
    pub tag: String,
    pub time: f64,
    pub revision: u64,
    pub assembly_count: usize,
    pub cached_dt: Option<f64>,
    pub systems: Vec<SystemSummary>,
    pub last_report: Option<ImplicitSolveReport>,
}

/// Initial values for a subset of the fields. Fields without a condition start at zero.
#[derive(Default)]
pub struct InitialConditions<'a> {
    conditions: Vec<(Field, InitialCondition<'a>)>,
}

impl<'a> InitialConditions<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: Field, condition: InitialCondition<'a>) -> Self {
        self.conditions.push((field, condition));
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Field, InitialCondition<'a>)> {
        self.conditions.iter()
    }
}

/// The kind of space each field is discretized with.
pub fn space_kind(field: Field) -> SpaceKind {
    match field {
        Field::Temperature => SpaceKind::L2,
        Field::ThermalFlux => SpaceKind::HDiv,
        Field::Potential => SpaceKind::H1,
        Field::ElectricField => SpaceKind::HCurl,
        Field::MagneticFlux => SpaceKind::L2,
        Field::DerivedHeating => SpaceKind::L2,
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct MaterialKey {
    revision: u64,
    time_bits: Option<u64>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct SystemKey {
    dt_bits: u64,
    material: MaterialKey,
}

/// Material coefficients turned into lumped Hodge weights.
#[derive(Debug, Clone)]
struct MaterialData {
    /// `sigma_t h / |e|` per cell and local edge.
    conductivity_weights: Vec<[f64; 4]>,
    /// Diagonal of `M1(sigma)`.
    conductivity_mass: DVector<f64>,
    /// Diagonal of `M2(1/mu)`, i.e. `1 / (mu |K|)`.
    inverse_permeability: DVector<f64>,
    /// `h / (k_n |e|)` per cell and local edge.
    resistivity_weights: Vec<[f64; 4]>,
    /// `c |K|` per cell.
    heat_capacity: DVector<f64>,
}

impl MaterialData {
    fn evaluate(properties: &PropertyMap, topology: &MeshTopology, time: f64) -> Result<Self, ConfigurationError> {
        let cell_properties = CellProperties::evaluate(properties, topology, time)?;
        let conductivity_weights = tangential_edge_weights(topology, &cell_properties.electrical_conductivity);
        let conductivity_mass = lumped_edge_mass(topology, &conductivity_weights);
        let inverse_permeability = DVector::from_fn(topology.num_cells(), |k, _| {
            1.0 / (cell_properties.magnetic_permeability[k] * topology.cell_area(k))
        });
        let resistivity_weights = inverse_normal_edge_weights(topology, &cell_properties.thermal_conductivity);
        let heat_capacity = DVector::from_fn(topology.num_cells(), |k, _| {
            cell_properties.heat_capacity[k] * topology.cell_area(k)
        });
        Ok(Self {
            conductivity_weights,
            conductivity_mass,
            inverse_permeability,
            resistivity_weights,
            heat_capacity,
        })
    }

    /// Edges whose neighbouring cells all have zero conductivity, in increasing order.
    fn insulated_edges(&self) -> impl Iterator<Item = usize> + '_ {
        self.conductivity_mass.iter().positions(|&mass| mass == 0.0)
    }

    /// Joule power density `sigma E.E` per cell.
    fn joule_heating(&self, topology: &MeshTopology, e: DVectorView<f64>) -> DVector<f64> {
        let heating: Vec<f64> = (0..topology.num_cells())
            .into_par_iter()
            .map(|k| {
                let power: f64 = topology
                    .cell_edges(k)
                    .iter()
                    .zip(&self.conductivity_weights[k])
                    .map(|(&edge, &weight)| weight * e[edge] * e[edge])
                    .sum();
                power / topology.cell_area(k)
            })
            .collect();
        DVector::from_vec(heating)
    }
}

/// An eliminated system together with its preconditioner.
#[derive(Debug)]
struct FieldSystem {
    field: Field,
    system: EliminatedSystem,
    preconditioner: Preconditioner<f64>,
}

impl FieldSystem {
    fn new(
        field: Field,
        matrix: &CsrMatrix<f64>,
        essential_dofs: &[usize],
        kind: PreconditionerKind,
    ) -> Result<Self, SolveDivergence> {
        let system = EliminatedSystem::new(matrix, essential_dofs);
        let preconditioner =
            Preconditioner::build(kind, Arc::clone(system.matrix())).map_err(|err| SolveDivergence {
                field,
                iterations: 0,
                residual: f64::NAN,
                reason: err.to_string(),
            })?;
        Ok(Self {
            field,
            system,
            preconditioner,
        })
    }

    fn essential_dofs(&self) -> &[usize] {
        self.system.essential_dofs()
    }

    /// Solves the system for the given full right-hand side and essential values, using the
    /// active entries of `current` as the initial guess.
    fn solve(
        &self,
        rhs: &DVector<f64>,
        essential_values: &DVector<f64>,
        current: DVectorView<f64>,
        settings: &LinearSolverSettings,
    ) -> Result<(DVector<f64>, LinearSolveStats), SolveDivergence> {
        let field = self.field;
        let inactive_load: f64 = self
            .system
            .inactive_dofs()
            .iter()
            .map(|&dof| rhs[dof] * rhs[dof])
            .sum::<f64>()
            .sqrt();
        if inactive_load > 0.0 {
            return Err(SolveDivergence {
                field,
                iterations: 0,
                residual: inactive_load,
                reason: "non-zero load on degrees of freedom without coupling".to_string(),
            });
        }

        let b = self.system.reduced_rhs(rhs.into(), essential_values);
        let mut x = self.system.restrict(current);
        let output = ConjugateGradient::new()
            .with_operator(&**self.system.matrix())
            .with_preconditioner(&self.preconditioner)
            .with_relative_tolerance(settings.relative_tolerance)
            .with_max_iter(settings.max_iterations)
            .solve_with_guess(&b, &mut x)
            .map_err(|err| SolveDivergence {
                field,
                iterations: err.output.num_iterations,
                residual: err.output.residual_norm,
                reason: err.kind.to_string(),
            })?;

        let mut full = DVector::zeros(self.system.num_dofs());
        self.system.expand_into(&x, essential_values, (&mut full).into());
        let stats = LinearSolveStats {
            iterations: output.num_iterations,
            residual: output.residual_norm,
        };
        log::debug!(
            "Solved {} system: {} iterations, residual {:e}",
            field,
            stats.iterations,
            stats.residual
        );
        Ok((full, stats))
    }

    fn summary(&self) -> SystemSummary {
        SystemSummary {
            field: self.field,
            num_dofs: self.system.num_dofs(),
            num_essential: self.system.essential_dofs().len(),
            num_inactive: self.system.inactive_dofs().len(),
            nnz: self.system.matrix().nnz(),
            preconditioner: self.preconditioner.kind(),
        }
    }
}

#[derive(Debug)]
struct SystemCache {
    key: SystemKey,
    materials: MaterialData,
    potential: FieldSystem,
    electric: FieldSystem,
    thermal: FieldSystem,
}

/// The coupled operator handed to the implicit time integrators.
#[derive(Debug)]
pub struct CoupledDiffusionOperator {
    topology: Arc<MeshTopology>,
    spaces: Vec<FunctionSpace>,
    layout: BlockLayout,
    properties: PropertyMap,
    boundaries: BoundaryRegistry,
    coupling: CouplingCoefficients,
    settings: LinearSolverSettings,
    regions: Vec<usize>,
    potential_dofs: Vec<usize>,
    electric_dofs: Vec<usize>,
    thermal_dofs: Vec<usize>,
    current_density_markers: Option<BoundaryMarkers>,
    boundary_temperature_markers: Option<BoundaryMarkers>,
    gradient: CsrMatrix<f64>,
    incidence: CsrMatrix<f64>,
    areas: DVector<f64>,
    revision: u64,
    time_dependent: bool,
    cache: Option<SystemCache>,
    assembly_count: usize,
    initialized: bool,
    last_report: Option<ImplicitSolveReport>,
}

impl CoupledDiffusionOperator {
    /// Sets up the operator on the given mesh.
    ///
    /// Every region of the mesh must provide every required material property, and the roles
    /// `electric_potential`, `tangential_dEdt` and `thermal_flux` must be registered for the
    /// potential, the electric field and the thermal flux respectively.
    pub fn new(
        topology: Arc<MeshTopology>,
        properties: PropertyMap,
        boundaries: BoundaryRegistry,
    ) -> Result<Self, ConfigurationError> {
        let regions: Vec<usize> = topology
            .cell_regions()
            .iter()
            .copied()
            .sorted_unstable()
            .dedup()
            .collect();
        properties.validate(&regions, &REQUIRED_PROPERTIES)?;
        // Rejects invalid constant values at setup rather than at the first stage
        CellProperties::evaluate(&properties, &topology, 0.0)?;

        let spaces: Vec<_> = Field::ALL
            .iter()
            .map(|&field| FunctionSpace::new(space_kind(field), Arc::clone(&topology)))
            .collect();
        let layout = BlockLayout::new(Field::ALL.iter().copied().zip(spaces.iter().map(|s| s.num_dofs())))?;

        let attribute_count = topology.boundary_attribute_count();
        let essential_dofs = |role: &str, field: Field| -> Result<Vec<usize>, ConfigurationError> {
            boundaries.require(role, field)?;
            let markers = boundaries.resolve_markers(role, attribute_count)?;
            Ok(FunctionSpace::new(space_kind(field), Arc::clone(&topology)).essential_dofs(&markers))
        };
        let potential_dofs = essential_dofs(ELECTRIC_POTENTIAL, Field::Potential)?;
        let electric_dofs = essential_dofs(TANGENTIAL_DEDT, Field::ElectricField)?;
        let thermal_dofs = essential_dofs(THERMAL_FLUX, Field::ThermalFlux)?;

        let current_density_markers = if boundaries.contains(CURRENT_DENSITY) {
            boundaries.require(CURRENT_DENSITY, Field::Potential)?;
            Some(boundaries.resolve_markers(CURRENT_DENSITY, attribute_count)?)
        } else {
            None
        };
        let boundary_temperature_markers = if boundaries.contains(BOUNDARY_TEMPERATURE) {
            let condition = boundaries.get(BOUNDARY_TEMPERATURE)?;
            if condition.field != Field::Temperature {
                boundaries.require(BOUNDARY_TEMPERATURE, Field::ThermalFlux)?;
            }
            Some(boundaries.resolve_markers(BOUNDARY_TEMPERATURE, attribute_count)?)
        } else {
            None
        };

        let gradient = gradient_matrix(&topology);
        let incidence = cell_edge_incidence(&topology);
        let areas = DVector::from_column_slice(topology.cell_areas());
        let time_dependent = properties.is_time_dependent();

        log::info!(
            "Set up coupled operator: {} cells, {} edges, {} vertices, {} regions",
            topology.num_cells(),
            topology.num_edges(),
            topology.num_vertices(),
            regions.len()
        );
        log::info!(
            "Essential dofs: {} potential, {} electric, {} thermal",
            potential_dofs.len(),
            electric_dofs.len(),
            thermal_dofs.len()
        );

        Ok(Self {
            topology,
            spaces,
            layout,
            properties,
            boundaries,
            coupling: CouplingCoefficients::default(),
            settings: LinearSolverSettings::default(),
            regions,
            potential_dofs,
            electric_dofs,
            thermal_dofs,
            current_density_markers,
            boundary_temperature_markers,
            gradient,
            incidence,
            areas,
            revision: 0,
            time_dependent,
            cache: None,
            assembly_count: 0,
            initialized: false,
            last_report: None,
        })
    }

    pub fn with_coupling(self, coupling: CouplingCoefficients) -> Self {
        Self {
            coupling,
            revision: self.revision + 1,
            ..self
        }
    }

    pub fn with_solver_settings(self, settings: LinearSolverSettings) -> Self {
        Self {
            settings,
            revision: self.revision + 1,
            ..self
        }
    }

    pub fn topology(&self) -> &MeshTopology {
        &self.topology
    }

    pub fn space(&self, field: Field) -> &FunctionSpace {
        let index = Field::ALL
            .iter()
            .position(|f| *f == field)
            .unwrap_or_default();
        &self.spaces[index]
    }

    pub fn layout(&self) -> &BlockLayout {
        &self.layout
    }

    /// A zero state with the block layout of this operator.
    pub fn create_state(&self) -> BlockState {
        BlockState::zeros(self.layout.clone())
    }

    pub fn properties(&self) -> &PropertyMap {
        &self.properties
    }

    pub fn boundaries(&self) -> &BoundaryRegistry {
        &self.boundaries
    }

    pub fn coupling(&self) -> &CouplingCoefficients {
        &self.coupling
    }

    pub fn solver_settings(&self) -> &LinearSolverSettings {
        &self.settings
    }

    /// Revision counter of the material data. Incremented whenever the data changes.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// How many times the stage systems have been assembled.
    pub fn assembly_count(&self) -> usize {
        self.assembly_count
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn last_report(&self) -> Option<&ImplicitSolveReport> {
        self.last_report.as_ref()
    }

    /// Replaces the material data. Cached systems are rebuilt at the next stage.
    pub fn update_properties(&mut self, properties: PropertyMap) -> Result<(), ConfigurationError> {
        properties.validate(&self.regions, &REQUIRED_PROPERTIES)?;
        CellProperties::evaluate(&properties, &self.topology, 0.0)?;
        self.time_dependent = properties.is_time_dependent();
        self.properties = properties;
        self.revision += 1;
        log::debug!("Material data updated to revision {}", self.revision);
        Ok(())
    }

    /// Sets every block to zero, then applies the given initial conditions.
    ///
    /// Must be called exactly once, before any evaluation.
    pub fn init(&mut self, state: &mut BlockState, initial: &InitialConditions) -> Result<(), Error> {
        if self.initialized {
            return Err(Error::AlreadyInitialized);
        }
        self.check_state(state)?;
        state.fill(0.0);
        for (field, condition) in initial.iter() {
            let values = self
                .space(*field)
                .project(condition)
                .ok_or(ConfigurationError::IncompatibleInitialCondition(*field))?;
            state.view_mut(*field).copy_from(&values);
        }
        self.initialized = true;
        log::info!("Initialized state with {} unknowns", state.len());
        Ok(())
    }

    /// Explicit rates of the coupled system.
    ///
    /// Only the magnetic flux and the temperature evolve explicitly. The remaining blocks are
    /// determined by constraints and have zero explicit rate.
    pub fn mult(&self, x: &BlockState, time: f64, k: &mut BlockState) -> Result<(), Error> {
        self.check_ready(x, k)?;
        let materials = self.materials_at(time)?;
        k.fill(0.0);

        spmv(k.view_mut(Field::MagneticFlux), &self.incidence, x.view(Field::ElectricField));
        k.view_mut(Field::MagneticFlux).neg_mut();

        let mut div_f = DVector::zeros(self.topology.num_cells());
        spmv((&mut div_f).into(), &self.incidence, x.view(Field::ThermalFlux));
        let w = x.view(Field::DerivedHeating);
        let mut k_t = k.view_mut(Field::Temperature);
        for (rate, w, area, div, capacity) in izip!(
            k_t.iter_mut(),
            w.iter(),
            self.areas.iter(),
            div_f.iter(),
            materials.heat_capacity.iter()
        ) {
            *rate = (self.coupling.joule_heating * w * area - div) / capacity;
        }
        Ok(())
    }

    /// Solves the backward Euler stage `x_new = x + dt k` at time `time + dt` and writes `k`.
    pub fn implicit_solve(&mut self, dt: f64, x: &BlockState, time: f64, k: &mut BlockState) -> Result<(), Error> {
        self.check_ready(x, k)?;
        if !(dt > 0.0 && dt.is_finite()) {
            return Err(ConfigurationError::InvalidTimeStep { dt, t_final: time }.into());
        }
        let t1 = time + dt;
        let (cache, reassembled) = self.prepare_systems(dt, t1)?;
        let result = self.solve_stage(&cache, dt, x, t1, k);
        self.cache = Some(cache);
        let (potential, electric, thermal) = result?;
        self.last_report = Some(ImplicitSolveReport {
            time: t1,
            dt,
            reassembled,
            potential,
            electric,
            thermal,
        });
        Ok(())
    }

    /// The dissipated power `sum sigma E.E` over the whole (distributed) domain.
    pub fn electric_losses(&self, x: &BlockState, time: f64, comm: &dyn Communicator) -> Result<f64, Error> {
        self.check_state(x)?;
        let materials = self.materials_at(time)?;
        let e = x.view(Field::ElectricField);
        let heating = materials.joule_heating(&self.topology, e);
        let local: f64 = izip!(heating.iter(), self.areas.iter())
            .map(|(w, area)| w * area)
            .sum();
        Ok(comm.all_reduce_sum(local))
    }

    /// Summarizes the currently assembled operators without touching any state.
    pub fn debug(&self, tag: &str, time: f64) -> OperatorDump {
        let (cached_dt, systems) = match &self.cache {
            Some(cache) => (
                Some(f64::from_bits(cache.key.dt_bits)),
                vec![
                    cache.potential.summary(),
                    cache.electric.summary(),
                    cache.thermal.summary(),
                ],
            ),
            None => (None, Vec::new()),
        };
        let dump = OperatorDump {
            tag: tag.to_string(),
            time,
            revision: self.revision,
            assembly_count: self.assembly_count,
            cached_dt,
            systems,
            last_report: self.last_report,
        };
        log::debug!("{:?}", dump);
        dump
    }

    fn material_key(&self, time: f64) -> MaterialKey {
        MaterialKey {
            revision: self.revision,
            time_bits: self.time_dependent.then(|| time.to_bits()),
        }
    }

    fn materials_at(&self, time: f64) -> Result<Cow<'_, MaterialData>, ConfigurationError> {
        let key = self.material_key(time);
        match &self.cache {
            Some(cache) if cache.key.material == key => Ok(Cow::Borrowed(&cache.materials)),
            _ => Ok(Cow::Owned(MaterialData::evaluate(&self.properties, &self.topology, time)?)),
        }
    }

    /// Takes the cached systems if they match the step size and material data, otherwise
    /// assembles new ones.
    fn prepare_systems(&mut self, dt: f64, time: f64) -> Result<(SystemCache, bool), Error> {
        let key = SystemKey {
            dt_bits: dt.to_bits(),
            material: self.material_key(time),
        };
        match self.cache.take() {
            Some(cache) if cache.key == key => Ok((cache, false)),
            _ => {
                let cache = self.assemble_systems(key, dt, time)?;
                self.assembly_count += 1;
                log::debug!(
                    "Assembled stage systems for dt = {} (revision {}, assembly #{})",
                    dt,
                    self.revision,
                    self.assembly_count
                );
                Ok((cache, true))
            }
        }
    }

    fn assemble_systems(&self, key: SystemKey, dt: f64, time: f64) -> Result<SystemCache, Error> {
        let topology = &*self.topology;
        let materials = MaterialData::evaluate(&self.properties, topology, time)?;
        let assembler = CsrAssembler::default();

        let potential_matrix = assembler
            .assemble(&NodalStiffnessAssembler::new(topology, &materials.conductivity_weights))
            .map_err(Error::Assembly)?;

        let curl_weights: Vec<f64> = materials.inverse_permeability.iter().map(|w| dt * w).collect();
        let electric_matrix = assembler
            .assemble(&EdgeSystemAssembler::new(
                topology,
                &materials.conductivity_weights,
                &curl_weights,
            ))
            .map_err(Error::Assembly)?;

        let div_weights: Vec<f64> = materials.heat_capacity.iter().map(|c| dt / c).collect();
        let thermal_matrix = assembler
            .assemble(&EdgeSystemAssembler::new(
                topology,
                &materials.resistivity_weights,
                &div_weights,
            ))
            .map_err(Error::Assembly)?;

        // Insulated edges carry no electric field
        let electric_dofs: Vec<usize> = self
            .electric_dofs
            .iter()
            .copied()
            .merge(materials.insulated_edges())
            .dedup()
            .collect();

        let settings = &self.settings;
        Ok(SystemCache {
            key,
            potential: FieldSystem::new(
                Field::Potential,
                &potential_matrix,
                &self.potential_dofs,
                settings.potential_preconditioner,
            )?,
            electric: FieldSystem::new(
                Field::ElectricField,
                &electric_matrix,
                &electric_dofs,
                settings.electric_preconditioner,
            )?,
            thermal: FieldSystem::new(
                Field::ThermalFlux,
                &thermal_matrix,
                &self.thermal_dofs,
                settings.thermal_preconditioner,
            )?,
            materials,
        })
    }

    fn solve_stage(
        &self,
        cache: &SystemCache,
        dt: f64,
        x: &BlockState,
        t1: f64,
        k: &mut BlockState,
    ) -> Result<(LinearSolveStats, LinearSolveStats, LinearSolveStats), Error> {
        let topology = &*self.topology;
        let parameters = self.boundaries.parameters();
        let materials = &cache.materials;

        // Potential
        let phi = x.view(Field::Potential);
        let mut potential_rhs = DVector::zeros(topology.num_vertices());
        if let Some(markers) = &self.current_density_markers {
            let condition = self.boundaries.get(CURRENT_DENSITY)?;
            for boundary_edge in topology.boundary_edges() {
                if !markers.is_marked(boundary_edge.attribute) {
                    continue;
                }
                let edge = boundary_edge.edge;
                let j = condition
                    .function
                    .evaluate(&topology.edge_midpoint(edge), t1, parameters);
                let share = 0.5 * j * topology.edge_length(edge);
                for vertex in topology.edges()[edge] {
                    potential_rhs[vertex] += share;
                }
            }
        }
        let potential_bc = self.boundaries.get(ELECTRIC_POTENTIAL)?;
        let potential_values = DVector::from_iterator(
            self.potential_dofs.len(),
            self.potential_dofs
                .iter()
                .map(|&v| potential_bc.function.evaluate(&topology.vertices()[v], t1, parameters)),
        );
        let (phi_new, potential_stats) =
            cache
                .potential
                .solve(&potential_rhs, &potential_values, phi, &self.settings)?;

        // Electric field and magnetic flux
        let e = x.view(Field::ElectricField);
        let b = x.view(Field::MagneticFlux);
        let scaled_b = b.component_mul(&materials.inverse_permeability);
        let mut electric_rhs = DVector::zeros(topology.num_edges());
        spmv_transpose((&mut electric_rhs).into(), &self.incidence, (&scaled_b).into());
        let mut grad_phi = DVector::zeros(topology.num_edges());
        spmv((&mut grad_phi).into(), &self.gradient, (&phi_new).into());
        electric_rhs -= grad_phi.component_mul(&materials.conductivity_mass) * self.coupling.potential_source;

        let dedt_bc = self.boundaries.get(TANGENTIAL_DEDT)?;
        let electric_dofs = cache.electric.essential_dofs();
        let electric_values = DVector::from_iterator(
            electric_dofs.len(),
            electric_dofs.iter().map(|&edge| {
                if self.electric_dofs.binary_search(&edge).is_err() {
                    return 0.0;
                }
                let sign = topology
                    .boundary_edge(edge)
                    .map_or(1.0, |boundary_edge| boundary_edge.outward_sign);
                let g = dedt_bc
                    .function
                    .evaluate(&topology.edge_midpoint(edge), t1, parameters);
                e[edge] + dt * g * topology.edge_length(edge) * sign
            }),
        );
        let (e_new, electric_stats) = cache
            .electric
            .solve(&electric_rhs, &electric_values, e, &self.settings)?;

        let mut curl_e = DVector::zeros(topology.num_cells());
        spmv((&mut curl_e).into(), &self.incidence, (&e_new).into());

        // Joule heating
        let w = x.view(Field::DerivedHeating);
        let w_new = materials.joule_heating(topology, (&e_new).into());

        // Thermal flux and temperature
        let temperature = x.view(Field::Temperature);
        let f = x.view(Field::ThermalFlux);
        let source = w_new.component_mul(&self.areas) * self.coupling.joule_heating;
        let predicted = DVector::from_fn(topology.num_cells(), |cell, _| {
            temperature[cell] + dt * source[cell] / materials.heat_capacity[cell]
        });
        let mut thermal_rhs = DVector::zeros(topology.num_edges());
        spmv_transpose((&mut thermal_rhs).into(), &self.incidence, (&predicted).into());
        if let Some(markers) = &self.boundary_temperature_markers {
            let condition = self.boundaries.get(BOUNDARY_TEMPERATURE)?;
            for boundary_edge in topology.boundary_edges() {
                if markers.is_marked(boundary_edge.attribute) {
                    let edge = boundary_edge.edge;
                    let t_b = condition
                        .function
                        .evaluate(&topology.edge_midpoint(edge), t1, parameters);
                    thermal_rhs[edge] -= t_b * boundary_edge.outward_sign;
                }
            }
        }
        let flux_bc = self.boundaries.get(THERMAL_FLUX)?;
        let thermal_values = DVector::from_iterator(
            self.thermal_dofs.len(),
            self.thermal_dofs.iter().map(|&edge| {
                let sign = topology
                    .boundary_edge(edge)
                    .map_or(1.0, |boundary_edge| boundary_edge.outward_sign);
                let q = flux_bc
                    .function
                    .evaluate(&topology.edge_midpoint(edge), t1, parameters);
                q * topology.edge_length(edge) * sign
            }),
        );
        let (f_new, thermal_stats) = cache
            .thermal
            .solve(&thermal_rhs, &thermal_values, f, &self.settings)?;

        let mut div_f = DVector::zeros(topology.num_cells());
        spmv((&mut div_f).into(), &self.incidence, (&f_new).into());
        let temperature_new = DVector::from_fn(topology.num_cells(), |cell, _| {
            temperature[cell] + dt * (source[cell] - div_f[cell]) / materials.heat_capacity[cell]
        });

        write_rate(k, Field::Potential, &phi_new, phi, dt);
        write_rate(k, Field::ElectricField, &e_new, e, dt);
        write_rate(k, Field::DerivedHeating, &w_new, w, dt);
        write_rate(k, Field::ThermalFlux, &f_new, f, dt);
        write_rate(k, Field::Temperature, &temperature_new, temperature, dt);
        let mut k_b = k.view_mut(Field::MagneticFlux);
        k_b.copy_from(&curl_e);
        k_b.neg_mut();

        Ok((potential_stats, electric_stats, thermal_stats))
    }

    fn check_state(&self, state: &BlockState) -> Result<(), Error> {
        if state.layout() != &self.layout {
            return Err(Error::StateLayoutMismatch {
                expected: self.layout.sizes(),
                actual: state.layout().sizes(),
            });
        }
        Ok(())
    }

    fn check_ready(&self, x: &BlockState, k: &BlockState) -> Result<(), Error> {
        if !self.initialized {
            return Err(Error::NotInitialized);
        }
        self.check_state(x)?;
        self.check_state(k)
    }
}

/// `k[field] = (new - old) / dt`
fn write_rate(k: &mut BlockState, field: Field, new: &DVector<f64>, old: DVectorView<f64>, dt: f64) {
    let mut rate = k.view_mut(field);
    rate.copy_from(new);
    rate.axpy(-1.0 / dt, &old, 1.0 / dt);
}

impl TimeDependentOperator for CoupledDiffusionOperator {
    fn layout(&self) -> &BlockLayout {
        &self.layout
    }

    fn mult(&self, x: &BlockState, time: f64, k: &mut BlockState) -> Result<(), Error> {
        CoupledDiffusionOperator::mult(self, x, time, k)
    }

    fn implicit_solve(&mut self, dt: f64, x: &BlockState, time: f64, k: &mut BlockState) -> Result<(), Error> {
        CoupledDiffusionOperator::implicit_solve(self, dt, x, time, k)
    }
}
