//! Singly diagonally implicit time integrators.
//!
//! All schemes only ever ask the operator for implicit stages: given `dt` and a state `y`,
//! the operator returns `k` such that `y + dt k` satisfies the equations at the stage time.
//! The stage time is passed as `time + dt`, i.e. each stage calls
//! `implicit_solve(stage_dt, y, stage_time - stage_dt, k)`.
use crate::error::{ConfigurationError, Error};
use crate::state::{BlockLayout, BlockState};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// A time-dependent operator `dx/dt = f(x, t)` that supports implicit stages.
pub trait TimeDependentOperator {
    /// The block layout of the states the operator acts on.
    fn layout(&self) -> &BlockLayout;

    /// Explicit rate `k = f(x, time)`.
    fn mult(&self, x: &BlockState, time: f64, k: &mut BlockState) -> Result<(), Error>;

    /// Finds `k` such that `x + dt k` satisfies the equations at `time + dt`.
    fn implicit_solve(&mut self, dt: f64, x: &BlockState, time: f64, k: &mut BlockState) -> Result<(), Error>;
}

pub trait OdeSolver: Debug + Send {
    /// Allocates the stage buffers for the given layout.
    fn init(&mut self, layout: &BlockLayout);

    /// Advances `x` from `t` by `dt` and returns the new time.
    fn step(
        &mut self,
        operator: &mut dyn TimeDependentOperator,
        x: &mut BlockState,
        t: f64,
        dt: f64,
    ) -> Result<f64, Error>;
}

/// The available schemes, numbered like the integer selector of the configuration.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum OdeSchemeKind {
    BackwardEuler,
    /// SDIRK23 with the L-stable coefficient.
    Sdirk23LStable,
    Sdirk33,
    ImplicitMidpoint,
    /// SDIRK23 with the A-stable coefficient.
    Sdirk23AStable,
    Sdirk34,
}

impl OdeSchemeKind {
    pub fn selector(&self) -> i32 {
        match self {
            OdeSchemeKind::BackwardEuler => 1,
            OdeSchemeKind::Sdirk23LStable => 2,
            OdeSchemeKind::Sdirk33 => 3,
            OdeSchemeKind::ImplicitMidpoint => 22,
            OdeSchemeKind::Sdirk23AStable => 23,
            OdeSchemeKind::Sdirk34 => 34,
        }
    }

    pub fn build(&self) -> Box<dyn OdeSolver> {
        match self {
            OdeSchemeKind::BackwardEuler => Box::new(BackwardEuler::default()),
            OdeSchemeKind::Sdirk23LStable => Box::new(Sdirk23::l_stable()),
            OdeSchemeKind::Sdirk33 => Box::new(Sdirk33::default()),
            OdeSchemeKind::ImplicitMidpoint => Box::new(ImplicitMidpoint::default()),
            OdeSchemeKind::Sdirk23AStable => Box::new(Sdirk23::a_stable()),
            OdeSchemeKind::Sdirk34 => Box::new(Sdirk34::default()),
        }
    }
}

impl TryFrom<i32> for OdeSchemeKind {
    type Error = ConfigurationError;

    fn try_from(selector: i32) -> Result<Self, Self::Error> {
        match selector {
            1 => Ok(OdeSchemeKind::BackwardEuler),
            2 => Ok(OdeSchemeKind::Sdirk23LStable),
            3 => Ok(OdeSchemeKind::Sdirk33),
            22 => Ok(OdeSchemeKind::ImplicitMidpoint),
            23 => Ok(OdeSchemeKind::Sdirk23AStable),
            34 => Ok(OdeSchemeKind::Sdirk34),
            other => Err(ConfigurationError::UnknownScheme(other)),
        }
    }
}

impl From<OdeSchemeKind> for i32 {
    fn from(kind: OdeSchemeKind) -> Self {
        kind.selector()
    }
}

/// Builds the scheme for an integer selector.
pub fn build_ode_solver(selector: i32) -> Result<Box<dyn OdeSolver>, ConfigurationError> {
    Ok(OdeSchemeKind::try_from(selector)?.build())
}

/// Stage buffers, allocated by `init` or lazily on the first step.
///
/// Multi-stage schemes build the new state in `next` and only copy it into the
/// caller's state once every stage has succeeded.
#[derive(Debug, Clone, Default)]
struct Stages {
    k: Option<BlockState>,
    y: Option<BlockState>,
    z: Option<BlockState>,
    next: Option<BlockState>,
}

impl Stages {
    fn init(&mut self, layout: &BlockLayout, count: usize) {
        let make = || Some(BlockState::zeros(layout.clone()));
        self.k = make();
        self.y = if count > 1 { make() } else { None };
        self.z = if count > 2 { make() } else { None };
        self.next = if count > 1 { make() } else { None };
    }

    fn ensure(&mut self, layout: &BlockLayout, count: usize) {
        let matches = |state: &Option<BlockState>| state.as_ref().map_or(false, |s| s.layout() == layout);
        let ready = matches(&self.k)
            && (count < 2 || (matches(&self.y) && matches(&self.next)))
            && (count < 3 || matches(&self.z));
        if !ready {
            self.init(layout, count);
        }
    }
}

/// Moves the buffer out of its slot. Only called after `Stages::ensure`.
fn take(slot: &mut Option<BlockState>, layout: &BlockLayout) -> BlockState {
    slot.take()
        .unwrap_or_else(|| BlockState::zeros(layout.clone()))
}

#[derive(Debug, Clone, Default)]
pub struct BackwardEuler {
    stages: Stages,
}

impl OdeSolver for BackwardEuler {
    fn init(&mut self, layout: &BlockLayout) {
        self.stages.init(layout, 1);
    }

    fn step(
        &mut self,
        operator: &mut dyn TimeDependentOperator,
        x: &mut BlockState,
        t: f64,
        dt: f64,
    ) -> Result<f64, Error> {
        self.stages.ensure(x.layout(), 1);
        let mut k = take(&mut self.stages.k, x.layout());
        let result = operator.implicit_solve(dt, x, t, &mut k);
        if result.is_ok() {
            x.axpy(dt, &k);
        }
        self.stages.k = Some(k);
        result.map(|_| t + dt)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ImplicitMidpoint {
    stages: Stages,
}

impl OdeSolver for ImplicitMidpoint {
    fn init(&mut self, layout: &BlockLayout) {
        self.stages.init(layout, 1);
    }

    fn step(
        &mut self,
        operator: &mut dyn TimeDependentOperator,
        x: &mut BlockState,
        t: f64,
        dt: f64,
    ) -> Result<f64, Error> {
        self.stages.ensure(x.layout(), 1);
        let mut k = take(&mut self.stages.k, x.layout());
        let result = operator.implicit_solve(dt / 2.0, x, t, &mut k);
        if result.is_ok() {
            x.axpy(dt, &k);
        }
        self.stages.k = Some(k);
        result.map(|_| t + dt)
    }
}

/// Two-stage, third-order SDIRK scheme.
///
/// With `gamma = (3 + sqrt(3)) / 6` the scheme is A-stable and third order, with
/// `gamma = (2 - sqrt(2)) / 2` it is L-stable and second order.
#[derive(Debug, Clone)]
pub struct Sdirk23 {
    gamma: f64,
    stages: Stages,
}

impl Sdirk23 {
    pub fn new(gamma: f64) -> Self {
        Self {
            gamma,
            stages: Stages::default(),
        }
    }

    pub fn a_stable() -> Self {
        Self::new((3.0 + 3.0f64.sqrt()) / 6.0)
    }

    pub fn l_stable() -> Self {
        Self::new((2.0 - 2.0f64.sqrt()) / 2.0)
    }

    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    fn run_stages(
        &self,
        operator: &mut dyn TimeDependentOperator,
        x: &BlockState,
        k: &mut BlockState,
        y: &mut BlockState,
        next: &mut BlockState,
        t: f64,
        dt: f64,
    ) -> Result<(), Error> {
        let gamma = self.gamma;
        operator.implicit_solve(gamma * dt, x, t, k)?;
        y.assign_sum(x, (1.0 - 2.0 * gamma) * dt, k);
        next.assign_sum(x, dt / 2.0, k);
        operator.implicit_solve(gamma * dt, y, t + (1.0 - 2.0 * gamma) * dt, k)?;
        next.axpy(dt / 2.0, k);
        Ok(())
    }
}

impl OdeSolver for Sdirk23 {
    fn init(&mut self, layout: &BlockLayout) {
        self.stages.init(layout, 2);
    }

    fn step(
        &mut self,
        operator: &mut dyn TimeDependentOperator,
        x: &mut BlockState,
        t: f64,
        dt: f64,
    ) -> Result<f64, Error> {
        self.stages.ensure(x.layout(), 2);
        let mut k = take(&mut self.stages.k, x.layout());
        let mut y = take(&mut self.stages.y, x.layout());
        let mut next = take(&mut self.stages.next, x.layout());
        let result = self.run_stages(operator, x, &mut k, &mut y, &mut next, t, dt);
        if result.is_ok() {
            x.copy_from(&next);
        }
        self.stages.k = Some(k);
        self.stages.y = Some(y);
        self.stages.next = Some(next);
        result.map(|_| t + dt)
    }
}

/// Three-stage, third-order L-stable SDIRK scheme.
#[derive(Debug, Clone, Default)]
pub struct Sdirk33 {
    stages: Stages,
}

impl Sdirk33 {
    const A: f64 = 0.435866521508458999416019;
    const B: f64 = 1.20849664917601007033648;
    const C: f64 = 0.717933260754229499708010;

    fn run_stages(
        operator: &mut dyn TimeDependentOperator,
        x: &BlockState,
        k: &mut BlockState,
        y: &mut BlockState,
        next: &mut BlockState,
        t: f64,
        dt: f64,
    ) -> Result<(), Error> {
        let (a, b, c) = (Self::A, Self::B, Self::C);
        operator.implicit_solve(a * dt, x, t, k)?;
        y.assign_sum(x, (c - a) * dt, k);
        next.assign_sum(x, b * dt, k);
        operator.implicit_solve(a * dt, y, t + (c - a) * dt, k)?;
        next.axpy((1.0 - a - b) * dt, k);
        operator.implicit_solve(a * dt, next, t + (1.0 - a) * dt, k)?;
        next.axpy(a * dt, k);
        Ok(())
    }
}

impl OdeSolver for Sdirk33 {
    fn init(&mut self, layout: &BlockLayout) {
        self.stages.init(layout, 2);
    }

    fn step(
        &mut self,
        operator: &mut dyn TimeDependentOperator,
        x: &mut BlockState,
        t: f64,
        dt: f64,
    ) -> Result<f64, Error> {
        self.stages.ensure(x.layout(), 2);
        let mut k = take(&mut self.stages.k, x.layout());
        let mut y = take(&mut self.stages.y, x.layout());
        let mut next = take(&mut self.stages.next, x.layout());
        let result = Self::run_stages(operator, x, &mut k, &mut y, &mut next, t, dt);
        if result.is_ok() {
            x.copy_from(&next);
        }
        self.stages.k = Some(k);
        self.stages.y = Some(y);
        self.stages.next = Some(next);
        result.map(|_| t + dt)
    }
}

/// Three-stage, fourth-order A-stable SDIRK scheme.
#[derive(Debug, Clone, Default)]
pub struct Sdirk34 {
    stages: Stages,
}

impl Sdirk34 {
    fn coefficients() -> (f64, f64) {
        let a = (std::f64::consts::PI / 18.0).cos() / 3.0f64.sqrt() + 0.5;
        let b = 1.0 / (6.0 * (2.0 * a - 1.0) * (2.0 * a - 1.0));
        (a, b)
    }

    fn run_stages(
        operator: &mut dyn TimeDependentOperator,
        x: &BlockState,
        k: &mut BlockState,
        y: &mut BlockState,
        z: &mut BlockState,
        next: &mut BlockState,
        t: f64,
        dt: f64,
    ) -> Result<(), Error> {
        let (a, b) = Self::coefficients();
        operator.implicit_solve(a * dt, x, t, k)?;
        y.assign_sum(x, (0.5 - a) * dt, k);
        z.assign_sum(x, 2.0 * a * dt, k);
        next.assign_sum(x, b * dt, k);
        operator.implicit_solve(a * dt, y, t + (0.5 - a) * dt, k)?;
        z.axpy((1.0 - 4.0 * a) * dt, k);
        next.axpy((1.0 - 2.0 * b) * dt, k);
        operator.implicit_solve(a * dt, z, t + (1.0 - 2.0 * a) * dt, k)?;
        next.axpy(b * dt, k);
        Ok(())
    }
}

impl OdeSolver for Sdirk34 {
    fn init(&mut self, layout: &BlockLayout) {
        self.stages.init(layout, 3);
    }

    fn step(
        &mut self,
        operator: &mut dyn TimeDependentOperator,
        x: &mut BlockState,
        t: f64,
        dt: f64,
    ) -> Result<f64, Error> {
        self.stages.ensure(x.layout(), 3);
        let mut k = take(&mut self.stages.k, x.layout());
        let mut y = take(&mut self.stages.y, x.layout());
        let mut z = take(&mut self.stages.z, x.layout());
        let mut next = take(&mut self.stages.next, x.layout());
        let result = Self::run_stages(operator, x, &mut k, &mut y, &mut z, &mut next, t, dt);
        if result.is_ok() {
            x.copy_from(&next);
        }
        self.stages.k = Some(k);
        self.stages.y = Some(y);
        self.stages.z = Some(z);
        self.stages.next = Some(next);
        result.map(|_| t + dt)
    }
}
