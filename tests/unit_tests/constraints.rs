use crate::{centered_square_mesh, laplace_builder, laplace_equation_builder, with_boundary_regions};
use galerkin::config::ProblemOptions;
use galerkin::constraints::{match_x_line, match_y_line, DofSelector, EssentialBc, LcbcKind, LinearCombinationBc, PeriodicBc};
use galerkin::equations::{Equation, TermInstance};
use galerkin::error::Error;
use galerkin::field::Field;
use galerkin::materials::Material;
use galerkin::problem::{Problem, ProblemBuilder};
use galerkin::quadrature::Integral;
use galerkin::region::{Region, RegionKind};
use galerkin::terms::LaplaceTerm;
use galerkin::timestepper::TimeStep;
use galerkin::variables::Variable;
use matrixcompare::assert_matrix_eq;
use nalgebra::{DMatrix, DVector, DVectorView};
use proptest::prelude::*;

/// A two-component Laplace problem, clamped on `Left`, with `Right` constrained by `lcbc`.
fn vector_problem(lcbc: LcbcKind) -> galerkin::Result<Problem> {
    let laplace = TermInstance::new(LaplaceTerm, "i", "Omega")
        .with_material("m", "c")
        .with_virtual("v")
        .with_state("u");
    with_boundary_regions(ProblemBuilder::new("vector", centered_square_mesh(2)))
        .with_field(Field::new("displacement", 2, "Omega", 1)?)
        .with_variable(Variable::unknown("u", "displacement"))
        .with_variable(Variable::test("v", "displacement", "u"))
        .with_material(Material::new("m").with_scalar("c", 1.0))
        .with_integral(Integral::new("i", 1))
        .with_equation(Equation::new("balance", vec![laplace])?)
        .with_essential_bc(EssentialBc::new("clamp", "Left", "u.all", 0.0)?)
        .with_linear_combination_bc(LinearCombinationBc::new("rigid", "Right", "u.all", lcbc)?)
        .build()
}

#[test]
fn dof_selector_parse() {
    let all = DofSelector::parse("u.all").unwrap();
    assert_eq!(all.variable(), "u");
    assert_eq!(all.components(3).unwrap(), vec![0, 1, 2]);

    let single = DofSelector::parse("u.1").unwrap();
    assert_eq!(single.components(2).unwrap(), vec![1]);
    assert!(single.components(1).is_err());

    let list = DofSelector::parse("displacement.[0, 2]").unwrap();
    assert_eq!(list.variable(), "displacement");
    assert_eq!(list.components(3).unwrap(), vec![0, 2]);

    assert!(DofSelector::parse("u").is_err());
    assert!(DofSelector::parse(".all").is_err());
    assert!(DofSelector::parse("u.x").is_err());
    assert!(DofSelector::parse("u.[0, y]").is_err());
}

#[test]
fn essential_values_and_reduced_size() {
    let problem = laplace_builder(2, ProblemOptions::default())
        .build()
        .unwrap();
    let map = problem.constraint_map().unwrap();
    assert_eq!(map.n_full(), 9);
    // Three vertices on each side are fixed
    assert_eq!(map.n_reduced(), 3);
    assert!(!map.has_linear_combinations());

    let left = problem.region_dofs("t", "Left").unwrap();
    let right = problem.region_dofs("t", "Right").unwrap();
    for &dof in &left {
        assert_eq!(map.offset()[dof], 5.0);
    }
    for &dof in &right {
        assert_eq!(map.offset()[dof], 0.0);
    }
    let essential_dofs: Vec<_> = map
        .constraints()
        .essential
        .iter()
        .map(|&(dof, _)| dof)
        .collect();
    let mut expected: Vec<_> = left.iter().chain(&right).copied().collect();
    expected.sort_unstable();
    assert_eq!(essential_dofs, expected);
}

#[test]
fn later_essential_condition_wins() {
    let problem = laplace_equation_builder(2, ProblemOptions::default())
        .with_essential_bc(EssentialBc::new("boundary", "Gamma", "t.all", 1.0).unwrap())
        .with_essential_bc(EssentialBc::new("left", "Left", "t.all", 5.0).unwrap())
        .build()
        .unwrap();
    let map = problem.constraint_map().unwrap();
    // Only the center vertex is free
    assert_eq!(map.n_reduced(), 1);

    let left = problem.region_dofs("t", "Left").unwrap();
    for dof in problem.region_dofs("t", "Gamma").unwrap() {
        let expected = if left.contains(&dof) { 5.0 } else { 1.0 };
        assert_eq!(map.offset()[dof], expected);
    }
}

#[test]
fn time_dependent_essential_values_are_updated_in_place() {
    let mut options = ProblemOptions::default();
    options.time.n_step = 3;
    let mut problem = laplace_equation_builder(2, options)
        .with_essential_bc(
            EssentialBc::with_function("ramp", "Left", "t.all", |ts: &TimeStep, x, _| ts.time + x.y).unwrap(),
        )
        .build()
        .unwrap();
    let left = problem.region_dofs("t", "Left").unwrap();
    let n_reduced = problem.constraint_map().unwrap().n_reduced();

    let mut stepper = problem.default_time_stepper(Some(2)).unwrap();
    assert!(!stepper.advance());
    problem.time_update(stepper.time_step(), false).unwrap();

    let map = problem.constraint_map().unwrap();
    assert_eq!(map.n_reduced(), n_reduced);
    for &dof in &left {
        let vertex = (0..problem.mesh().num_vertices())
            .find(|&v| problem.variables().dofs_of("t").unwrap().dof(v, 0) == Some(dof))
            .unwrap();
        assert_eq!(map.offset()[dof], 1.0 + problem.mesh().vertex(vertex).y);
    }
}

#[test]
fn periodic_pairs_point_to_smallest_dof() {
    let problem = laplace_equation_builder(2, ProblemOptions::default())
        .with_periodic_bc(PeriodicBc::new("periodic", "Left", "Right", "t.all", match_x_line(1e-9)).unwrap())
        .build()
        .unwrap();
    let map = problem.constraint_map().unwrap();
    // Vertices are numbered row by row, three per row
    assert_eq!(map.constraints().periodic, vec![(2, 0), (5, 3), (8, 6)]);
    assert_eq!(map.n_reduced(), 6);

    let reduced = DVector::from_fn(6, |i, _| i as f64 + 1.0);
    let full = map.make_full_vec(DVectorView::from(&reduced));
    for &(slave, master) in &map.constraints().periodic {
        assert_eq!(full[slave], full[master]);
    }
    let stripped = map.strip_state_vector(DVectorView::from(&full)).unwrap();
    assert_eq!(stripped, reduced);
}

#[test]
fn periodic_and_essential_on_same_dof_conflict() {
    let err = laplace_builder(2, ProblemOptions::default())
        .with_periodic_bc(PeriodicBc::new("periodic", "Left", "Right", "t.all", match_x_line(1e-9)).unwrap())
        .build()
        .unwrap_err();
    match err {
        Error::ConstraintConflict { first, second, .. } => {
            assert_eq!(first, "right");
            assert_eq!(second, "periodic");
        }
        other => panic!("expected a constraint conflict, got {}", other),
    }
}

#[test]
fn unknown_variable_in_constraint_is_reported() {
    let err = laplace_equation_builder(2, ProblemOptions::default())
        .with_essential_bc(EssentialBc::new("bad", "Left", "q.all", 0.0).unwrap())
        .build()
        .unwrap_err();
    assert!(matches!(err, Error::UnknownName { kind: "variable", .. }));
}

#[test]
fn rigid_combination_moves_region_rigidly() {
    let problem = vector_problem(LcbcKind::Rigid).unwrap();
    let map = problem.constraint_map().unwrap();
    assert!(map.has_linear_combinations());
    assert!(map.equation_map().is_none());
    assert_eq!(map.n_full(), 18);
    // 9 vertices minus 3 clamped minus 3 rigid, plus the three rigid body DOFs
    assert_eq!(map.n_reduced(), 9);

    let (tx, ty, theta) = (0.1, -0.2, 0.3);
    let mut reduced = DVector::zeros(9);
    reduced[6] = tx;
    reduced[7] = ty;
    reduced[8] = theta;
    let full = map.make_full_vec(DVectorView::from(&reduced));

    let dofs = problem.variables().dofs_of("u").unwrap();
    let right = problem.regions().get("Right").unwrap();
    for &v in right.vertices() {
        let x = problem.mesh().vertex(v);
        assert!((full[dofs.dof(v, 0).unwrap()] - (tx - theta * x.y)).abs() < 1e-14);
        assert!((full[dofs.dof(v, 1).unwrap()] - (ty + theta * x.x)).abs() < 1e-14);
    }
}

#[test]
fn explicit_combination_with_wrong_row_count_is_rejected() {
    let err = vector_problem(LcbcKind::Explicit(DMatrix::zeros(4, 1))).unwrap_err();
    assert!(matches!(err, Error::InvalidDefinition(_)));
}

#[test]
fn reduced_matrix_is_projection_of_full_matrix() {
    let problem = vector_problem(LcbcKind::Rigid).unwrap();
    let map = problem.constraint_map().unwrap();
    let mut tangent = problem.create_matrix().unwrap();
    problem
        .assemble_tangent(&problem.create_state_vector(), &mut tangent)
        .unwrap();

    let e = DMatrix::from(map.matrix());
    let expected = e.transpose() * DMatrix::from(&tangent) * &e;
    let reduced = DMatrix::from(&map.reduce_matrix(&tangent));
    assert_matrix_eq!(reduced, expected, comp = abs, tol = 1e-12);
}

/// A two-component problem on a 4x4 vertex grid with any combination of a clamp on `Left`,
/// periodicity between the inner vertices of `Bottom` and `Top`, and a rigid `Right` side.
///
/// The three constraints never share DOFs.
fn constrained_problem(essential: bool, periodic: bool, rigid: bool) -> Problem {
    let laplace = TermInstance::new(LaplaceTerm, "i", "Omega")
        .with_material("m", "c")
        .with_virtual("v")
        .with_state("u");
    let builder = with_boundary_regions(ProblemBuilder::new("constrained", centered_square_mesh(3)));
    let bottom = Region::from_vertex_predicate("Bottom", builder.mesh(), RegionKind::Vertex, |x| {
        x.y < -0.499 && x.x.abs() < 0.4
    });
    let top = Region::from_vertex_predicate("Top", builder.mesh(), RegionKind::Vertex, |x| {
        x.y > 0.499 && x.x.abs() < 0.4
    });
    let mut builder = builder
        .with_region(bottom)
        .with_region(top)
        .with_field(Field::new("displacement", 2, "Omega", 1).unwrap())
        .with_variable(Variable::unknown("u", "displacement"))
        .with_variable(Variable::test("v", "displacement", "u"))
        .with_material(Material::new("m").with_scalar("c", 1.0))
        .with_integral(Integral::new("i", 1))
        .with_equation(Equation::new("balance", vec![laplace]).unwrap());
    if essential {
        builder = builder.with_essential_bc(EssentialBc::new("clamp", "Left", "u.all", 0.25).unwrap());
    }
    if periodic {
        builder = builder.with_periodic_bc(PeriodicBc::new("periodic", "Bottom", "Top", "u.all", match_y_line(1e-9)).unwrap());
    }
    if rigid {
        builder = builder.with_linear_combination_bc(LinearCombinationBc::new("rigid", "Right", "u.all", LcbcKind::Rigid).unwrap());
    }
    builder.build().unwrap()
}

fn constraint_configurations() -> Vec<(Problem, usize)> {
    vec![
        // 32 DOFs minus 8 clamped
        (constrained_problem(true, false, false), 24),
        // minus 4 periodic slaves
        (constrained_problem(false, true, false), 28),
        // minus 8 clamped, 4 slaves and 8 rigid, plus 3 rigid body DOFs
        (constrained_problem(true, true, true), 15),
    ]
}

#[test]
fn constraint_configurations_have_expected_sizes() {
    for (problem, n_reduced) in constraint_configurations() {
        let map = problem.constraint_map().unwrap();
        assert_eq!(map.n_full(), 32);
        assert_eq!(map.n_reduced(), n_reduced);
    }
}

proptest! {
    #[test]
    fn strip_inverts_make_full_vec(values in proptest::collection::vec(-10.0..10.0f64, 9)) {
        let problem = vector_problem(LcbcKind::Rigid).unwrap();
        let map = problem.constraint_map().unwrap();
        let reduced = DVector::from_vec(values);
        let full = map.make_full_vec(DVectorView::from(&reduced));
        let stripped = map.strip_state_vector(DVectorView::from(&full)).unwrap();
        prop_assert!((stripped - reduced).amax() < 1e-9);
    }

    #[test]
    fn round_trips_respect_constraints(
        configuration in 0..3usize,
        values in proptest::collection::vec(-10.0..10.0f64, 32),
    ) {
        let (problem, _) = constraint_configurations().swap_remove(configuration);
        let map = problem.constraint_map().unwrap();
        let constraints = map.constraints();

        let reduced = DVector::from_iterator(map.n_reduced(), values.iter().copied());
        let full = map.make_full_vec(DVectorView::from(&reduced));
        let stripped = map.strip_state_vector(DVectorView::from(&full)).unwrap();
        prop_assert!((&stripped - &reduced).amax() < 1e-9);

        let arbitrary = DVector::from_vec(values);
        let stripped = map.strip_state_vector(DVectorView::from(&arbitrary)).unwrap();
        let restored = map.make_full_vec(DVectorView::from(&stripped));

        let mut constrained = vec![false; map.n_full()];
        for &(dof, value) in &constraints.essential {
            prop_assert_eq!(restored[dof], value);
            constrained[dof] = true;
        }
        for &(slave, master) in &constraints.periodic {
            prop_assert_eq!(restored[slave], arbitrary[master]);
            constrained[slave] = true;
        }
        for block in &constraints.linear_combination {
            for &dof in &block.dofs {
                constrained[dof] = true;
            }
        }
        for dof in (0..map.n_full()).filter(|&dof| !constrained[dof]) {
            prop_assert_eq!(restored[dof], arbitrary[dof]);
        }

        // The restored vector satisfies all constraints, so another round trip keeps it
        let again = map.make_full_vec(DVectorView::from(&map.strip_state_vector(DVectorView::from(&restored)).unwrap()));
        prop_assert!((again - &restored).amax() < 1e-9);
    }
}
