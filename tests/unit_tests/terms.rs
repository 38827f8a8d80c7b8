use crate::{laplace_builder, laplace_equation_builder};
use galerkin::config::ProblemOptions;
use galerkin::equations::{Equation, TermInstance};
use galerkin::error::{Error, TermErrorKind};
use galerkin::mapping::VolumeMapping;
use galerkin::materials::{Material, QpArray};
use galerkin::problem::{Problem, ProblemBuilder};
use galerkin::quadrature::Integral;
use galerkin::term::{ElementBlocks, ElementChunk, ElementChunks, EvaluationMode, StateArgument, Term, TermContext};
use galerkin::terms::{DiffusionTerm, LaplaceTerm, SurfaceFluxTerm, VolumeSourceTerm};
use galerkin::timestepper::TimeStep;
use matrixcompare::assert_matrix_eq;
use nalgebra::{DMatrix, DVector, DVectorView};
use std::sync::Arc;

fn dense_tangent(problem: &Problem, state: &DVector<f64>) -> DMatrix<f64> {
    let mut matrix = problem.create_matrix().unwrap();
    problem.assemble_tangent(state, &mut matrix).unwrap();
    DMatrix::from(&matrix)
}

fn single_equation(builder: ProblemBuilder, term: TermInstance) -> galerkin::Result<Problem> {
    builder
        .with_equation(Equation::new("extra", vec![term]).unwrap())
        .build()
}

/// Evaluates a term directly on the cells of the Laplace problem, bypassing the assembler.
fn evaluate_directly(term: &dyn Term, mode: EvaluationMode, materials: Vec<Arc<QpArray>>) -> Result<(), galerkin::error::TermError> {
    let problem = laplace_builder(2, ProblemOptions::default())
        .build()
        .unwrap();
    let region = problem.regions().get("Omega").unwrap();
    let mapping = VolumeMapping::new(problem.mesh(), region, &Integral::new("i", 2)).unwrap();
    let dofs = problem.equations().connectivity("t", "Omega", false).unwrap();
    let state = problem.create_state_vector();
    let context = TermContext {
        mesh: problem.mesh(),
        region,
        volume: Some(&mapping),
        surface: None,
        materials,
        virtual_dofs: Some(dofs),
        state: Some(StateArgument {
            name: "t",
            n_components: 1,
            dofs,
            values: DVectorView::from(&state),
        }),
        parameter: None,
        previous: None,
        time_step: TimeStep::stationary(),
    };
    let chunk = ElementChunk { start: 0, len: 2 };
    let mut blocks = ElementBlocks::new();
    blocks.reset(chunk.len, 3, 3);
    term.evaluate(mode, &context, chunk, &mut blocks)
}

#[test]
fn source_term_cannot_be_differentiated() {
    let f = Arc::new(QpArray::from_scalar(1.0));
    let err = evaluate_directly(&VolumeSourceTerm, EvaluationMode::Tangent { wrt: "t" }, vec![f]).unwrap_err();
    assert_eq!(err.kind, TermErrorKind::UnsupportedDifferentiation);
}

#[test]
fn laplace_term_rejects_foreign_variable() {
    let c = Arc::new(QpArray::from_scalar(1.0));
    let err = evaluate_directly(&LaplaceTerm, EvaluationMode::Tangent { wrt: "q" }, vec![c.clone()]).unwrap_err();
    assert_eq!(err.kind, TermErrorKind::UnsupportedDifferentiation);

    evaluate_directly(&LaplaceTerm, EvaluationMode::Tangent { wrt: "t" }, vec![c]).unwrap();
}

#[test]
fn flux_term_only_evaluates() {
    let k = Arc::new(QpArray::constant(&DMatrix::identity(2, 2)));
    let err = evaluate_directly(&SurfaceFluxTerm, EvaluationMode::Residual, vec![k]).unwrap_err();
    assert_eq!(err.kind, TermErrorKind::UnsupportedMode);
}

#[test]
fn weak_form_term_cannot_be_evaluated_to_scalar() {
    let mut problem = laplace_builder(2, ProblemOptions::default())
        .build()
        .unwrap();
    let term = TermInstance::new(LaplaceTerm, "i", "Omega")
        .with_material("m", "c")
        .with_virtual("s")
        .with_state("t");
    let state = problem.create_state_vector();
    let err = problem.evaluate(&term, &state).unwrap_err();
    let term_error = err.term_error().unwrap();
    assert_eq!(term_error.kind, TermErrorKind::UnsupportedMode);
    assert_eq!(term_error.term.as_deref(), Some("dw_laplace"));
}

#[test]
fn material_of_wrong_shape_is_reported_with_context() {
    let problem = single_equation(
        laplace_equation_builder(2, ProblemOptions::default()),
        TermInstance::new(DiffusionTerm, "i", "Omega")
            .with_material("m", "c")
            .with_virtual("s")
            .with_state("t"),
    )
    .unwrap();
    let err = problem
        .assemble_residual(&problem.create_state_vector())
        .unwrap_err();
    match err {
        Error::Term(err) => {
            assert_eq!(err.kind, TermErrorKind::ShapeMismatch);
            assert_eq!(err.term.as_deref(), Some("dw_diffusion"));
            assert_eq!(err.region.as_deref(), Some("Omega"));
        }
        other => panic!("expected a term error, got {}", other),
    }
}

#[test]
fn material_function_of_wrong_shape_is_rejected() {
    let err = laplace_equation_builder(2, ProblemOptions::default())
        .with_material(Material::new("bad").with_function("c", |_: &TimeStep, x| {
            // Varying shape across quadrature points
            if x.x < 0.0 {
                DMatrix::zeros(1, 1)
            } else {
                DMatrix::zeros(2, 2)
            }
        }))
        .with_equation(
            Equation::new(
                "extra",
                vec![TermInstance::new(LaplaceTerm, "i", "Omega")
                    .with_material("bad", "c")
                    .with_virtual("s")
                    .with_state("t")],
            )
            .unwrap(),
        )
        .build()
        .unwrap_err();
    assert_eq!(err.term_error().map(|e| e.kind), Some(TermErrorKind::ShapeMismatch));
}

#[test]
fn arguments_are_validated_against_term_slots() {
    let missing_state = TermInstance::new(LaplaceTerm, "i", "Omega")
        .with_material("m", "c")
        .with_virtual("s");
    assert!(Equation::new("e", vec![missing_state]).is_err());

    let extra_state = TermInstance::new(VolumeSourceTerm, "i", "Omega")
        .with_material("m", "f")
        .with_virtual("s")
        .with_state("t");
    assert!(Equation::new("e", vec![extra_state]).is_err());

    let missing_material = TermInstance::new(LaplaceTerm, "i", "Omega")
        .with_virtual("s")
        .with_state("t");
    assert!(Equation::new("e", vec![missing_material]).is_err());

    assert!(Equation::new("e", vec![]).is_err());
}

#[test]
fn mixed_virtual_variables_are_rejected() {
    let a = TermInstance::new(LaplaceTerm, "i", "Omega")
        .with_material("m", "c")
        .with_virtual("s")
        .with_state("t");
    let b = TermInstance::new(LaplaceTerm, "i", "Omega")
        .with_material("m", "c")
        .with_virtual("w")
        .with_state("t");
    assert!(Equation::new("e", vec![a, b]).is_err());
}

#[test]
fn isotropic_diffusion_matches_laplace() {
    let laplace = laplace_builder(3, ProblemOptions::default())
        .build()
        .unwrap();
    let diffusion = single_equation(
        laplace_equation_builder(3, ProblemOptions::default()),
        TermInstance::new(DiffusionTerm, "i", "Omega")
            .with_material("m", "K")
            .with_virtual("s")
            .with_state("t")
            .with_coefficient(-1.0),
    )
    .unwrap();
    let state = DVector::from_fn(laplace.n_dofs(), |i, _| (i as f64).sqrt());

    // The diffusion term cancels the Laplace term of the equation built by the helper
    let residual = diffusion.assemble_residual(&state).unwrap();
    assert!(residual.amax() < 1e-12);
    let tangent = dense_tangent(&diffusion, &state);
    assert_matrix_eq!(tangent, DMatrix::zeros(16, 16), comp = abs, tol = 1e-12);

    assert!(dense_tangent(&laplace, &state).amax() > 0.0);
}

#[test]
fn coefficient_scales_contributions() {
    let scaled = single_equation(
        laplace_equation_builder(2, ProblemOptions::default()),
        TermInstance::new(LaplaceTerm, "i", "Omega")
            .with_material("m", "c")
            .with_virtual("s")
            .with_state("t")
            .with_coefficient(2.0),
    )
    .unwrap();
    let single = laplace_builder(2, ProblemOptions::default())
        .build()
        .unwrap();
    let state = DVector::from_fn(9, |i, _| i as f64);
    let expected = 3.0 * single.assemble_residual(&state).unwrap();
    assert_matrix_eq!(scaled.assemble_residual(&state).unwrap(), expected, comp = abs, tol = 1e-12);
}

#[test]
fn source_term_integrates_constant() {
    let problem = single_equation(
        laplace_equation_builder(4, ProblemOptions::default())
            .with_material(Material::new("load").with_scalar("f", 3.0)),
        TermInstance::new(VolumeSourceTerm, "i", "Omega")
            .with_material("load", "f")
            .with_virtual("s"),
    )
    .unwrap();
    let residual = problem
        .assemble_residual(&problem.create_state_vector())
        .unwrap();
    // f times the area of the unit square
    assert!((residual.sum() - 3.0).abs() < 1e-12);
}

#[test]
fn element_chunks_cover_all_elements_in_order() {
    let chunks: Vec<_> = ElementChunks::new(10, 4).collect();
    assert_eq!(
        chunks,
        vec![
            ElementChunk { start: 0, len: 4 },
            ElementChunk { start: 4, len: 4 },
            ElementChunk { start: 8, len: 2 }
        ]
    );
    assert_eq!(ElementChunks::new(0, 4).count(), 0);
    // A chunk size of zero is treated as one
    assert_eq!(ElementChunks::new(3, 0).count(), 3);
}
