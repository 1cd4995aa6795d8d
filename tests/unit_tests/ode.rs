use joule::error::{ConfigurationError, Error};
use joule::ode::{build_ode_solver, OdeSchemeKind, OdeSolver, Sdirk23, TimeDependentOperator};
use joule::state::{BlockLayout, BlockState, Field};

/// `x' = -x + cos(t)`, solved exactly by the implicit stages.
struct ForcedDecay {
    layout: BlockLayout,
    implicit_solves: usize,
}

impl ForcedDecay {
    fn new() -> Self {
        Self {
            layout: BlockLayout::new([(Field::Temperature, 1)]).unwrap(),
            implicit_solves: 0,
        }
    }

    fn exact(x0: f64, t: f64) -> f64 {
        (x0 - 0.5) * (-t).exp() + 0.5 * (t.cos() + t.sin())
    }
}

impl TimeDependentOperator for ForcedDecay {
    fn layout(&self) -> &BlockLayout {
        &self.layout
    }

    fn mult(&self, x: &BlockState, time: f64, k: &mut BlockState) -> Result<(), Error> {
        let x = x.view(Field::Temperature)[0];
        k.view_mut(Field::Temperature)[0] = -x + time.cos();
        Ok(())
    }

    fn implicit_solve(&mut self, dt: f64, x: &BlockState, time: f64, k: &mut BlockState) -> Result<(), Error> {
        self.implicit_solves += 1;
        let x = x.view(Field::Temperature)[0];
        k.view_mut(Field::Temperature)[0] = (-x + (time + dt).cos()) / (1.0 + dt);
        Ok(())
    }
}

fn integrate(kind: OdeSchemeKind, dt: f64, t_final: f64) -> (f64, usize) {
    let x0 = 2.0;
    let mut operator = ForcedDecay::new();
    let mut solver = kind.build();
    solver.init(operator.layout());
    let mut x = BlockState::zeros(operator.layout().clone());
    x.view_mut(Field::Temperature)[0] = x0;

    let steps = (t_final / dt).round() as usize;
    let mut t = 0.0;
    for _ in 0..steps {
        t = solver.step(&mut operator, &mut x, t, dt).unwrap();
    }
    let error = (x.view(Field::Temperature)[0] - ForcedDecay::exact(x0, t)).abs();
    (error, operator.implicit_solves)
}

fn convergence_ratio(kind: OdeSchemeKind) -> f64 {
    let (coarse, _) = integrate(kind, 0.1, 1.0);
    let (fine, _) = integrate(kind, 0.05, 1.0);
    coarse / fine
}

#[test]
fn schemes_converge_with_their_order() {
    // Halving the step divides the error by roughly 2^order
    let expected_minimum = [
        (OdeSchemeKind::BackwardEuler, 1.7),
        (OdeSchemeKind::ImplicitMidpoint, 3.2),
        (OdeSchemeKind::Sdirk23LStable, 3.2),
        (OdeSchemeKind::Sdirk23AStable, 5.5),
        (OdeSchemeKind::Sdirk33, 5.5),
        (OdeSchemeKind::Sdirk34, 9.0),
    ];
    for (kind, minimum) in expected_minimum {
        let ratio = convergence_ratio(kind);
        assert!(ratio > minimum, "{:?}: error ratio {} <= {}", kind, ratio, minimum);
    }
}

#[test]
fn schemes_are_accurate() {
    for kind in [
        OdeSchemeKind::BackwardEuler,
        OdeSchemeKind::ImplicitMidpoint,
        OdeSchemeKind::Sdirk23LStable,
        OdeSchemeKind::Sdirk23AStable,
        OdeSchemeKind::Sdirk33,
        OdeSchemeKind::Sdirk34,
    ] {
        let (error, _) = integrate(kind, 0.01, 1.0);
        assert!(error < 1e-2, "{:?}: error {}", kind, error);
    }
}

#[test]
fn schemes_request_one_solve_per_stage() {
    let stages = [
        (OdeSchemeKind::BackwardEuler, 1),
        (OdeSchemeKind::ImplicitMidpoint, 1),
        (OdeSchemeKind::Sdirk23LStable, 2),
        (OdeSchemeKind::Sdirk23AStable, 2),
        (OdeSchemeKind::Sdirk33, 3),
        (OdeSchemeKind::Sdirk34, 3),
    ];
    for (kind, count) in stages {
        let (_, solves) = integrate(kind, 0.25, 1.0);
        assert_eq!(solves, 4 * count, "{:?}", kind);
    }
}

#[test]
fn step_returns_the_advanced_time() {
    let mut operator = ForcedDecay::new();
    let mut solver = OdeSchemeKind::Sdirk34.build();
    // Buffers are allocated lazily without init
    let mut x = BlockState::zeros(operator.layout().clone());
    let t = solver.step(&mut operator, &mut x, 0.5, 0.125).unwrap();
    assert_eq!(t, 0.625);
}

#[test]
fn selectors_round_trip() {
    for selector in [1, 2, 3, 22, 23, 34] {
        let kind = OdeSchemeKind::try_from(selector).unwrap();
        assert_eq!(kind.selector(), selector);
        assert_eq!(i32::from(kind), selector);
        assert!(build_ode_solver(selector).is_ok());
    }
    assert_eq!(
        OdeSchemeKind::try_from(4),
        Err(ConfigurationError::UnknownScheme(4))
    );
    assert!(matches!(
        build_ode_solver(0),
        Err(ConfigurationError::UnknownScheme(0))
    ));
}

#[test]
fn selectors_deserialize_as_integers() {
    let kind: OdeSchemeKind = serde_json::from_str("23").unwrap();
    assert_eq!(kind, OdeSchemeKind::Sdirk23AStable);
    assert!(serde_json::from_str::<OdeSchemeKind>("5").is_err());
    assert_eq!(serde_json::to_string(&OdeSchemeKind::Sdirk34).unwrap(), "34");
}

#[test]
fn sdirk23_coefficients() {
    let a_stable = Sdirk23::a_stable();
    let l_stable = Sdirk23::l_stable();
    assert!((a_stable.gamma() - (3.0 + 3.0f64.sqrt()) / 6.0).abs() < 1e-15);
    assert!((l_stable.gamma() - (1.0 - 0.5 * 2.0f64.sqrt())).abs() < 1e-15);
}

/// Returns `k = 1` from every implicit stage until the given solve, which fails.
struct FailingStage {
    layout: BlockLayout,
    fail_at: usize,
    implicit_solves: usize,
}

impl TimeDependentOperator for FailingStage {
    fn layout(&self) -> &BlockLayout {
        &self.layout
    }

    fn mult(&self, _x: &BlockState, _time: f64, k: &mut BlockState) -> Result<(), Error> {
        k.fill(1.0);
        Ok(())
    }

    fn implicit_solve(&mut self, _dt: f64, _x: &BlockState, _time: f64, k: &mut BlockState) -> Result<(), Error> {
        self.implicit_solves += 1;
        if self.implicit_solves == self.fail_at {
            return Err(Error::NotInitialized);
        }
        k.fill(1.0);
        Ok(())
    }
}

#[test]
fn failed_stage_leaves_state_untouched() {
    let schemes = [
        (OdeSchemeKind::Sdirk23LStable, 2),
        (OdeSchemeKind::Sdirk23AStable, 2),
        (OdeSchemeKind::Sdirk33, 3),
        (OdeSchemeKind::Sdirk34, 3),
    ];
    for (kind, stage_count) in schemes {
        for fail_at in 2..=stage_count {
            let mut operator = FailingStage {
                layout: BlockLayout::new([(Field::Temperature, 2), (Field::Potential, 1)]).unwrap(),
                fail_at,
                implicit_solves: 0,
            };
            let mut solver = kind.build();
            solver.init(operator.layout());
            let mut x = BlockState::zeros(operator.layout().clone());

            let result = solver.step(&mut operator, &mut x, 0.0, 1.0);
            assert!(matches!(result, Err(Error::NotInitialized)), "{:?}", kind);
            assert_eq!(operator.implicit_solves, fail_at, "{:?}", kind);
            assert!(x.as_vector().iter().all(|&v| v == 0.0), "{:?} failing at stage {}", kind, fail_at);

            // The solver stays usable after the failure
            operator.fail_at = 0;
            let t = solver.step(&mut operator, &mut x, 0.0, 1.0).unwrap();
            assert_eq!(t, 1.0);
            assert!(x.as_vector().iter().all(|&v| (v - 1.0).abs() < 1e-12), "{:?}", kind);
        }
    }
}
