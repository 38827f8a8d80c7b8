use crate::centered_square_mesh;
use galerkin::config::{ProblemOptions, TimeSettings};
use galerkin::equations::{Equation, TermInstance};
use galerkin::error::Error;
use galerkin::field::Field;
use galerkin::materials::Material;
use galerkin::optimize::newton::NewtonStatus;
use galerkin::problem::{Problem, ProblemBuilder};
use galerkin::quadrature::Integral;
use galerkin::terms::{MassTimeDerivativeTerm, VolumeSourceTerm};
use galerkin::timestepper::{TimeStep, TimeStepper, TimeSteppingSolver};
use galerkin::variables::Variable;
use nalgebra::{DMatrix, DVector};

/// `∫ s (t - t_prev) / dt - ∫ f s = 0` without boundary conditions, so `t = t_prev + dt f`.
fn heat_problem(options: ProblemOptions, material: Material, history: usize) -> galerkin::Result<Problem> {
    let terms = vec![
        TermInstance::new(MassTimeDerivativeTerm, "i", "Omega")
            .with_material("m", "c")
            .with_virtual("s")
            .with_state("t"),
        TermInstance::new(VolumeSourceTerm, "i", "Omega")
            .with_material("m", "f")
            .with_virtual("s")
            .with_coefficient(-1.0),
    ];
    ProblemBuilder::new("heat", centered_square_mesh(3))
        .with_field(Field::new("temperature", 1, "Omega", 1)?)
        .with_variable(Variable::unknown("t", "temperature").with_order(1).with_history(history))
        .with_variable(Variable::test("s", "temperature", "t"))
        .with_material(material.with_scalar("c", 1.0))
        .with_integral(Integral::new("i", 2))
        .with_equation(Equation::new("heat", terms)?)
        .with_options(options)
        .build()
}

fn five_steps() -> ProblemOptions {
    let mut options = ProblemOptions::default();
    options.time = TimeSettings {
        t0: 0.0,
        t1: 1.0,
        n_step: 5,
    };
    options
}

#[test]
fn stepper_arithmetic() {
    let mut stepper = TimeStepper::new(0.0, 1.0, 5).unwrap();
    assert_eq!(stepper.dt(), 0.25);
    assert_eq!(stepper.time(), 0.0);
    assert!(!stepper.is_last_step());

    let times: Vec<_> = stepper.iter_from_current().map(|ts| ts.time).collect();
    assert_eq!(times, vec![0.0, 0.25, 0.5, 0.75, 1.0]);

    for _ in 0..4 {
        assert!(stepper.advance());
    }
    assert!(stepper.is_last_step());
    assert!(!stepper.advance());
    assert_eq!(stepper.step(), 4);
    assert_eq!(stepper.time(), 1.0);

    stepper.set_step(2).unwrap();
    assert_eq!(stepper.time_step(), TimeStep {
        step: 2,
        time: 0.5,
        dt: 0.25,
        n_step: 5
    });
    assert!(stepper.set_step(5).is_err());
}

#[test]
fn last_step_lands_on_final_time() {
    let mut stepper = TimeStepper::new(0.0, 0.3, 4).unwrap();
    while stepper.advance() {}
    assert_eq!(stepper.time(), 0.3);
    assert_eq!(stepper.time_step().step, 3);
}

#[test]
fn single_step_spans_interval() {
    let stepper = TimeStepper::new(1.0, 3.0, 1).unwrap();
    assert_eq!(stepper.dt(), 2.0);
    assert!(stepper.is_last_step());
    assert_eq!(stepper.iter_from_current().count(), 1);
}

#[test]
fn invalid_steppers_are_rejected() {
    assert!(TimeStepper::new(0.0, 1.0, 0).is_err());
    assert!(TimeStepper::new(1.0, 0.0, 3).is_err());
    assert!(TimeStepper::new(0.0, f64::NAN, 3).is_err());
}

#[test]
fn stationary_step_defaults() {
    let ts = TimeStep::default();
    assert_eq!(ts.step, 0);
    assert_eq!(ts.dt, 1.0);
    assert_eq!(ts.n_step, 1);
    assert_eq!(TimeStepper::default().time_step(), ts);
}

#[test]
fn heat_equation_accumulates_source() {
    let mut problem = heat_problem(five_steps(), Material::new("m").with_scalar("f", 2.0), 1).unwrap();
    let mut solver = TimeSteppingSolver::for_problem(&problem).unwrap();
    assert_eq!(solver.stepper().n_step(), 5);

    let mut visited = Vec::new();
    let state0 = problem.create_state_vector();
    let last = solver
        .run(&mut problem, &state0, |ts, state, report| {
            assert_eq!(report.status, NewtonStatus::Converged);
            let expected = (ts.step + 1) as f64 * ts.dt * 2.0;
            assert!(state.iter().all(|&t| (t - expected).abs() < 1e-10), "step {}", ts.step);
            visited.push(ts.time);
        })
        .unwrap();

    assert_eq!(visited, vec![0.0, 0.25, 0.5, 0.75, 1.0]);
    assert!(last.iter().all(|&t| (t - 2.5).abs() < 1e-10));
    assert_eq!(problem.variables().previous_state(1), Some(&last));
}

#[test]
fn initial_state_seeds_history() {
    let mut problem = heat_problem(five_steps(), Material::new("m").with_scalar("f", 2.0), 1).unwrap();
    let state0 = DVector::from_element(problem.n_dofs(), 1.0);
    let mut first_step = None;
    let last = TimeSteppingSolver::for_problem(&problem)
        .unwrap()
        .run(&mut problem, &state0, |ts, state, _| {
            if ts.step == 0 {
                first_step = Some(state.clone());
            }
        })
        .unwrap();
    // 1 + dt * f
    let first_step = first_step.unwrap();
    assert!(first_step.iter().all(|&t| (t - 1.5).abs() < 1e-10));
    assert!(last.iter().all(|&t| (t - 3.5).abs() < 1e-10));

    // A second run starts from its own initial state, not from the end of the first run
    let rerun = TimeSteppingSolver::for_problem(&problem)
        .unwrap()
        .run(&mut problem, &state0, |_, _, _| {})
        .unwrap();
    assert_eq!(rerun, last);
}

#[test]
fn time_dependent_source_is_reevaluated() {
    let source = Material::new("m").with_function("f", |ts: &TimeStep, _| DMatrix::from_element(1, 1, ts.time));
    let mut problem = heat_problem(five_steps(), source, 1).unwrap();
    let state0 = problem.create_state_vector();
    let last = TimeSteppingSolver::for_problem(&problem)
        .unwrap()
        .run(&mut problem, &state0, |_, _, _| {})
        .unwrap();
    // dt * (0 + 0.25 + 0.5 + 0.75 + 1)
    assert!(last.iter().all(|&t| (t - 0.625).abs() < 1e-10));
}

#[test]
fn unconverged_step_fails_unless_accepted() {
    let mut options = five_steps();
    options.newton.i_max = Some(0);
    let mut problem = heat_problem(options.clone(), Material::new("m").with_scalar("f", 1.0), 1).unwrap();
    let state0 = problem.create_state_vector();

    let err = TimeSteppingSolver::for_problem(&problem)
        .unwrap()
        .run(&mut problem, &state0, |_, _, _| {})
        .unwrap_err();
    match err {
        Error::NotConverged { step, report } => {
            assert_eq!(step, 0);
            assert_eq!(report.status, NewtonStatus::MaximumIterationsReached);
        }
        other => panic!("expected NotConverged, got {}", other),
    }

    options.accept_unconverged = true;
    let mut problem = heat_problem(options, Material::new("m").with_scalar("f", 1.0), 1).unwrap();
    let mut n_steps = 0;
    let last = TimeSteppingSolver::for_problem(&problem)
        .unwrap()
        .run(&mut problem, &state0, |_, _, report| {
            assert_eq!(report.status, NewtonStatus::MaximumIterationsReached);
            n_steps += 1;
        })
        .unwrap();
    assert_eq!(n_steps, 5);
    assert_eq!(last, state0);
}

#[test]
fn solver_resumes_from_given_step() {
    let mut problem = heat_problem(five_steps(), Material::new("m").with_scalar("f", 1.0), 1).unwrap();
    let stepper = problem.default_time_stepper(Some(3)).unwrap();
    let mut solver = TimeSteppingSolver::new(stepper).with_accept_unconverged(false);
    let mut steps = Vec::new();
    let state0 = problem.create_state_vector();
    let last = solver
        .run(&mut problem, &state0, |ts, _, _| steps.push(ts.step))
        .unwrap();
    assert_eq!(steps, vec![3, 4]);
    assert!(last.iter().all(|&t| (t - 0.5).abs() < 1e-10));
}

#[test]
fn missing_history_is_rejected() {
    let err = heat_problem(five_steps(), Material::new("m").with_scalar("f", 1.0), 0).unwrap_err();
    assert!(matches!(err, Error::InvalidDefinition(_)));
}
