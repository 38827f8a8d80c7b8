use crate::{laplace_builder, laplace_equation_builder};
use galerkin::config::{LineSearchKind, LinearSolverKind, ProblemOptions};
use galerkin::constraints::EssentialBc;
use galerkin::equations::{Equation, TermInstance};
use galerkin::error::Error;
use galerkin::field::Field;
use galerkin::linear_solver::DirectLuSolver;
use galerkin::optimize::newton::NewtonStatus;
use galerkin::problem::Problem;
use galerkin::region::{Region, RegionKind};
use galerkin::terms::{LaplaceTerm, SurfaceFluxTerm};
use galerkin::variables::Variable;
use nalgebra::{DVector, DVectorView, Point3, Rotation2, Vector2};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

fn exact_temperature(x: &Point3<f64>) -> f64 {
    -5.0 * (x.x - 0.5)
}

fn flux_term(region: &str, variable: &str) -> TermInstance {
    TermInstance::new(SurfaceFluxTerm, "i", region)
        .with_material("m", "K")
        .with_parameter(variable)
}

/// Solves and checks the solution against the exact one, at the given reference coordinates.
fn solve_and_check(problem: &mut Problem, reference_vertices: &[Point3<f64>]) -> DVector<f64> {
    let mut state = problem.create_state_vector();
    problem.apply_ebc(&mut state).unwrap();
    let (solution, report) = problem.solve(&state).unwrap();
    assert_eq!(report.status, NewtonStatus::Converged);
    assert_eq!(report.iterations, 1);

    let dofs = problem.variables().dofs_of("t").unwrap();
    for (v, x) in reference_vertices.iter().enumerate() {
        let t = solution[dofs.dof(v, 0).unwrap()];
        assert!((t - exact_temperature(x)).abs() < 1e-8, "vertex {}: {} vs {}", v, t, exact_temperature(x));
    }
    solution
}

fn reaction(problem: &Problem, solution: &DVector<f64>, region: &str) -> f64 {
    let residual = problem.assemble_residual(solution).unwrap();
    problem
        .region_dofs("t", region)
        .unwrap()
        .into_iter()
        .map(|dof| residual[dof])
        .sum()
}

fn check_fluxes_and_reactions(problem: &mut Problem, solution: &DVector<f64>) {
    for (region, expected) in [("Left", 5.0), ("Right", -5.0), ("Gamma", 0.0)] {
        let flux = problem
            .evaluate(&flux_term(region, "t"), solution)
            .unwrap();
        assert!((flux - expected).abs() < 1e-10, "flux through {}: {}", region, flux);
        let reaction = reaction(problem, solution, region);
        assert!((reaction - expected).abs() < 1e-10, "reaction on {}: {}", region, reaction);
    }
}

#[test]
fn laplace_solution_is_exact_in_one_iteration() {
    let mut problem = laplace_builder(6, ProblemOptions::default())
        .build()
        .unwrap();
    let vertices = problem.mesh().vertices().to_vec();
    let solution = solve_and_check(&mut problem, &vertices);
    check_fluxes_and_reactions(&mut problem, &solution);
}

#[test]
fn fluxes_are_invariant_under_mesh_rotation() {
    let mut problem = laplace_builder(5, ProblemOptions::default())
        .build()
        .unwrap();
    let reference = problem.mesh().vertices().to_vec();

    for degrees in [0.0, 30.0, 45.0] {
        let rotation = Rotation2::new(f64::to_radians(degrees));
        let rotated = reference
            .iter()
            .map(|x| {
                let y = rotation * Vector2::new(x.x, x.y);
                Point3::new(y.x, y.y, 0.0)
            })
            .collect();
        problem.set_mesh_coordinates(rotated).unwrap();

        let solution = solve_and_check(&mut problem, &reference);
        check_fluxes_and_reactions(&mut problem, &solution);
    }
}

#[test]
fn flux_of_parameter_variable() {
    let mut problem = laplace_builder(4, ProblemOptions::default())
        .with_variable(Variable::parameter("p", "temperature"))
        .build()
        .unwrap();
    // Parameters do not add unknowns
    assert_eq!(problem.n_dofs(), 25);

    let layout = problem.variables().parameter_layout().get("p").unwrap().clone();
    let mut data = DVector::zeros(layout.n_dofs());
    for (v, x) in problem.mesh().vertices().iter().enumerate() {
        data[layout.dof(v, 0).unwrap() - layout.range().start] = exact_temperature(x);
    }
    problem
        .variables_mut()
        .set_parameter_data("p", DVectorView::from(&data))
        .unwrap();

    let state = problem.create_state_vector();
    let flux = problem.evaluate(&flux_term("Right", "p"), &state).unwrap();
    assert!((flux + 5.0).abs() < 1e-10);
}

#[test]
fn linear_mode_and_iterative_solver_give_same_solution() {
    let mut options = ProblemOptions::default();
    options.newton.linear = true;
    options.linear_solver = LinearSolverKind::ConjugateGradient {
        max_iterations: 500,
        tolerance: 1e-12,
    };
    let mut problem = laplace_builder(4, options).build().unwrap();
    assert!(problem.is_linear());
    let vertices = problem.mesh().vertices().to_vec();
    solve_and_check(&mut problem, &vertices);

    problem.set_linear(false);
    problem.set_linear_solver(Arc::new(DirectLuSolver));
    solve_and_check(&mut problem, &vertices);
}

#[test]
fn backtracking_line_search_accepts_full_newton_step() {
    let mut options = ProblemOptions::default();
    options.newton.i_max = Some(5);
    options.newton.line_search = LineSearchKind::Backtracking { c: 1e-4, alpha_min: 1e-6 };
    let mut problem = laplace_builder(3, options).build().unwrap();
    let mut state = problem.create_state_vector();
    problem.apply_ebc(&mut state).unwrap();
    let (_, report) = problem.solve(&state).unwrap();
    assert_eq!(report.status, NewtonStatus::Converged);
    assert_eq!(report.step_lengths, vec![1.0]);
}

#[test]
fn iteration_limit_is_reported_in_status() {
    let mut options = ProblemOptions::default();
    options.newton.i_max = Some(0);
    let mut problem = laplace_builder(3, options).build().unwrap();
    let mut state = problem.create_state_vector();
    problem.apply_ebc(&mut state).unwrap();
    let (solution, report) = problem.solve(&state).unwrap();
    assert_eq!(report.status, NewtonStatus::MaximumIterationsReached);
    assert_eq!(solution, state);
}

#[test]
fn cancelled_solve_returns_initial_state() {
    let mut problem = laplace_builder(3, ProblemOptions::default())
        .build()
        .unwrap();
    let mut state = problem.create_state_vector();
    problem.apply_ebc(&mut state).unwrap();
    let (solution, report) = problem
        .solve_cancellable(&state, &AtomicBool::new(true))
        .unwrap();
    assert_eq!(report.status, NewtonStatus::Cancelled);
    assert_eq!(report.iterations, 0);
    assert_eq!(solution, state);
}

#[test]
fn selecting_constraints_changes_reduced_system() {
    let mut problem = laplace_builder(2, ProblemOptions::default())
        .build()
        .unwrap();
    assert_eq!(problem.constraint_map().unwrap().n_reduced(), 3);

    problem.select_bcs(Some(&["left"])).unwrap();
    assert_eq!(problem.constraint_map().unwrap().n_reduced(), 6);

    // With only the left condition the solution is constant
    let mut state = problem.create_state_vector();
    problem.apply_ebc(&mut state).unwrap();
    let (solution, _) = problem.solve(&state).unwrap();
    assert!(solution.iter().all(|&t| (t - 5.0).abs() < 1e-10));

    problem.select_bcs(None).unwrap();
    assert_eq!(problem.constraint_map().unwrap().n_reduced(), 3);

    let err = problem.select_bcs(Some(&["front"])).unwrap_err();
    assert!(matches!(err, Error::UnknownName { kind: "constraint", .. }));
}

#[test]
fn update_vec_adds_constrained_increment() {
    let problem = laplace_builder(2, ProblemOptions::default())
        .build()
        .unwrap();
    let mut state = problem.create_state_vector();
    problem.apply_ebc(&mut state).unwrap();
    let before = state.clone();

    let delta = DVector::from_element(3, 1.0);
    problem
        .update_vec(&mut state, DVectorView::from(&delta))
        .unwrap();
    let map = problem.constraint_map().unwrap();
    for dof in 0..problem.n_dofs() {
        let is_essential = map
            .constraints()
            .essential
            .iter()
            .any(|&(d, _)| d == dof);
        let expected = if is_essential { before[dof] } else { before[dof] + 1.0 };
        assert_eq!(state[dof], expected);
    }
}

#[test]
fn unknown_names_are_reported() {
    let unknown_region = laplace_equation_builder(2, ProblemOptions::default())
        .with_essential_bc(EssentialBc::new("bc", "Top", "t.all", 0.0).unwrap())
        .build()
        .unwrap_err();
    assert!(matches!(unknown_region, Error::UnknownName { kind: "region", .. }));

    let unknown_integral = laplace_equation_builder(2, ProblemOptions::default())
        .with_equation(
            Equation::new(
                "other",
                vec![TermInstance::new(LaplaceTerm, "j", "Omega")
                    .with_material("m", "c")
                    .with_virtual("s")
                    .with_state("t")],
            )
            .unwrap(),
        )
        .build()
        .unwrap_err();
    assert!(matches!(unknown_integral, Error::UnknownName { kind: "integral", .. }));

    let unknown_material = laplace_equation_builder(2, ProblemOptions::default())
        .with_equation(
            Equation::new(
                "other",
                vec![TermInstance::new(LaplaceTerm, "i", "Omega")
                    .with_material("q", "c")
                    .with_virtual("s")
                    .with_state("t")],
            )
            .unwrap(),
        )
        .build()
        .unwrap_err();
    assert!(matches!(unknown_material, Error::UnknownName { kind: "material", .. }));

    let unknown_parameter = laplace_equation_builder(2, ProblemOptions::default())
        .with_equation(
            Equation::new(
                "other",
                vec![TermInstance::new(LaplaceTerm, "i", "Omega")
                    .with_material("m", "d")
                    .with_virtual("s")
                    .with_state("t")],
            )
            .unwrap(),
        )
        .build()
        .unwrap_err();
    assert!(matches!(unknown_parameter, Error::UnknownName { kind: "material parameter", .. }));
}

#[test]
fn state_variable_must_be_unknown() {
    let err = laplace_equation_builder(2, ProblemOptions::default())
        .with_equation(
            Equation::new(
                "other",
                vec![TermInstance::new(LaplaceTerm, "i", "Omega")
                    .with_material("m", "c")
                    .with_virtual("s")
                    .with_state("s")],
            )
            .unwrap(),
        )
        .build()
        .unwrap_err();
    assert!(matches!(err, Error::InvalidDefinition(_)));
}

#[test]
fn output_of_field_on_subdomain_is_filled() {
    let builder = laplace_equation_builder(2, ProblemOptions::default());
    let lower = Region::from_vertex_predicate("Lower", builder.mesh(), RegionKind::Cell, |x| x.y < 0.01);
    let problem = builder
        .with_region(lower)
        .with_field(Field::new("pressure", 1, "Lower", 1).unwrap())
        .with_variable(Variable::unknown("q", "pressure"))
        .build()
        .unwrap();
    // 9 temperature DOFs followed by 6 pressure DOFs on the two lower rows of vertices
    assert_eq!(problem.n_dofs(), 15);

    let state = DVector::from_fn(15, |i, _| i as f64);
    let output = problem.state_to_output(&state, f64::NAN).unwrap();
    assert_eq!(output.len(), 2);
    assert_eq!(output[0].name, "t");
    assert_eq!(output[1].name, "q");
    assert_eq!(output[1].dofs, 9..15);
    assert_eq!(output[1].values[(0, 0)], 9.0);
    assert!(output[1].values[(8, 0)].is_nan());
    assert_eq!(output[0].values[(8, 0)], 8.0);
}
