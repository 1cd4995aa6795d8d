//! Fixed-step time integration with periodic output.
use crate::comm::{Communicator, SerialCommunicator};
use crate::error::{ConfigurationError, Error};
use crate::mesh::QuadMesh2d;
use crate::ode::OdeSolver;
use crate::operator::{CoupledDiffusionOperator, ImplicitSolveReport};
use crate::state::BlockState;
use serde::{Deserialize, Serialize};

/// Relative tolerance for taking the remaining time as the last step.
const FINAL_STEP_SLACK: f64 = 1e-10;

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    pub t_initial: f64,
    pub t_final: f64,
    pub dt: f64,
    /// Output is produced every `output_every` cycles and after the last step. Zero disables
    /// periodic output.
    pub output_every: usize,
    /// Dump a summary of the assembled operators after every step.
    pub debug: bool,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            t_initial: 0.0,
            t_final: 1.0,
            dt: 0.5,
            output_every: 1,
            debug: false,
        }
    }
}

impl ExecutionSettings {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let valid = self.dt > 0.0
            && self.dt.is_finite()
            && self.t_initial.is_finite()
            && self.t_final.is_finite()
            && self.t_final >= self.t_initial;
        if valid {
            Ok(())
        } else {
            Err(ConfigurationError::InvalidTimeStep {
                dt: self.dt,
                t_final: self.t_final,
            })
        }
    }
}

/// The data handed to output sinks.
pub struct Snapshot<'a> {
    pub cycle: usize,
    pub time: f64,
    pub is_final: bool,
    pub electric_losses: f64,
    pub state: &'a BlockState,
    pub mesh: &'a QuadMesh2d,
    pub operator: &'a CoupledDiffusionOperator,
}

/// Receives snapshots of the state, e.g. to persist them or push them to a visualization.
pub trait OutputSink {
    fn write(&mut self, snapshot: &Snapshot) -> eyre::Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub cycle: usize,
    pub time: f64,
    pub dt: f64,
    pub is_final: bool,
    /// Electric losses, if output was produced in this step.
    pub electric_losses: Option<f64>,
    pub solve: Option<ImplicitSolveReport>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub cycles: usize,
    pub final_time: f64,
    pub electric_losses: Option<f64>,
    pub assembly_count: usize,
}

/// Drives an ODE solver over `[t_initial, t_final]` with a fixed step size.
///
/// The loop owns the mesh, the operator and the solver for its whole lifetime. The final step
/// is shortened so that the simulation ends exactly at `t_final`.
pub struct TimeIntegrationLoop {
    mesh: QuadMesh2d,
    operator: CoupledDiffusionOperator,
    solver: Box<dyn OdeSolver>,
    state: BlockState,
    comm: Box<dyn Communicator>,
    sinks: Vec<Box<dyn OutputSink>>,
    settings: ExecutionSettings,
    time: f64,
    cycle: usize,
    started: bool,
    done: bool,
    last_losses: Option<f64>,
}

impl TimeIntegrationLoop {
    /// Takes ownership of an initialized operator and its state.
    pub fn new(
        mesh: QuadMesh2d,
        operator: CoupledDiffusionOperator,
        mut solver: Box<dyn OdeSolver>,
        state: BlockState,
        settings: ExecutionSettings,
    ) -> Result<Self, Error> {
        settings.validate()?;
        if !operator.is_initialized() {
            return Err(Error::NotInitialized);
        }
        if state.layout() != operator.layout() {
            return Err(Error::StateLayoutMismatch {
                expected: operator.layout().sizes(),
                actual: state.layout().sizes(),
            });
        }
        solver.init(state.layout());
        Ok(Self {
            mesh,
            operator,
            solver,
            state,
            comm: Box::new(SerialCommunicator),
            sinks: Vec::new(),
            time: settings.t_initial,
            settings,
            cycle: 0,
            started: false,
            done: settings.t_final <= settings.t_initial,
            last_losses: None,
        })
    }

    pub fn with_communicator(self, comm: Box<dyn Communicator>) -> Self {
        Self { comm, ..self }
    }

    pub fn with_sink(mut self, sink: Box<dyn OutputSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn mesh(&self) -> &QuadMesh2d {
        &self.mesh
    }

    pub fn operator(&self) -> &CoupledDiffusionOperator {
        &self.operator
    }

    pub fn state(&self) -> &BlockState {
        &self.state
    }

    pub fn settings(&self) -> &ExecutionSettings {
        &self.settings
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn cycle(&self) -> usize {
        self.cycle
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn into_parts(self) -> (QuadMesh2d, CoupledDiffusionOperator, BlockState) {
        (self.mesh, self.operator, self.state)
    }

    /// Performs a single step. The first call also writes the initial snapshot.
    ///
    /// Returns `None` once `t_final` has been reached.
    pub fn advance(&mut self) -> Result<Option<StepReport>, Error> {
        if !self.started {
            self.started = true;
            self.output(false)?;
        }
        if self.done {
            return Ok(None);
        }

        let remaining = self.settings.t_final - self.time;
        let is_final = remaining <= self.settings.dt * (1.0 + FINAL_STEP_SLACK);
        let dt = if is_final { remaining } else { self.settings.dt };

        let new_time = self
            .solver
            .step(&mut self.operator, &mut self.state, self.time, dt)?;
        self.time = if is_final { self.settings.t_final } else { new_time };
        self.cycle += 1;
        self.done = is_final;
        log::debug!("Completed step {} with dt = {}, t = {}", self.cycle, dt, self.time);

        if self.settings.debug {
            self.operator
                .debug(&format!("step {}", self.cycle), self.time);
        }

        let output_due = self.settings.output_every > 0 && self.cycle % self.settings.output_every == 0;
        let electric_losses = if output_due || is_final {
            Some(self.output(is_final)?)
        } else {
            None
        };

        Ok(Some(StepReport {
            cycle: self.cycle,
            time: self.time,
            dt,
            is_final,
            electric_losses,
            solve: self.operator.last_report().copied(),
        }))
    }

    /// Steps until `t_final`, aborting on the first error.
    pub fn run(&mut self) -> Result<RunSummary, Error> {
        log::info!(
            "Running from t = {} to t = {} with dt = {}",
            self.time,
            self.settings.t_final,
            self.settings.dt
        );
        while self.advance()?.is_some() {}
        Ok(RunSummary {
            cycles: self.cycle,
            final_time: self.time,
            electric_losses: self.last_losses,
            assembly_count: self.operator.assembly_count(),
        })
    }

    fn output(&mut self, is_final: bool) -> Result<f64, Error> {
        let losses = self
            .operator
            .electric_losses(&self.state, self.time, &*self.comm)?;
        if self.comm.rank() == 0 {
            log::info!("step {}, t = {}, dot(E, J) = {}", self.cycle, self.time, losses);
        }
        self.comm.barrier();

        let snapshot = Snapshot {
            cycle: self.cycle,
            time: self.time,
            is_final,
            electric_losses: losses,
            state: &self.state,
            mesh: &self.mesh,
            operator: &self.operator,
        };
        for sink in &mut self.sinks {
            sink.write(&snapshot).map_err(Error::Output)?;
        }
        self.last_losses = Some(losses);
        Ok(losses)
    }
}
