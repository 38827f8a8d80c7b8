//! Residual and Jacobian evaluation in terms of the reduced (constrained) DOFs.
use crate::assembly::global::pattern_from_entries;
use crate::constraints::{ConstraintMap, EquationMapEntry};
use crate::error::{Error, Result};
use crate::linear_solver::LinearSolver;
use crate::problem::Problem;
use eyre::eyre;
use galerkin_optimize::calculus::{DifferentiableVectorFunction, FunctionError, VectorFunction};
use log::info;
use nalgebra::{DVector, DVectorView, DVectorViewMut};
use nalgebra_sparse::pattern::SparsityPattern;
use nalgebra_sparse::CsrMatrix;
use std::fmt::Debug;

/// Computes the reduced residual `E^T r(E x + e0)` and the reduced Jacobian `E^T J E`.
pub trait Evaluator: Send + Debug {
    fn residual(&mut self, problem: &Problem, reduced: DVectorView<f64>) -> Result<DVector<f64>>;

    fn jacobian(&mut self, problem: &Problem, reduced: DVectorView<f64>) -> Result<&CsrMatrix<f64>>;
}

fn zero_matrix(pattern: SparsityPattern) -> Result<CsrMatrix<f64>> {
    let nnz = pattern.nnz();
    CsrMatrix::try_from_pattern_and_values(pattern, vec![0.0; nnz])
        .map_err(|err| eyre!("failed to create matrix from graph: {}", err).into())
}

/// Evaluator for essential and periodic constraints only, where `E` selects (and sums) DOFs.
///
/// The reduced Jacobian pattern is computed once, together with the position of every full
/// matrix entry in it, so that reducing a Jacobian is a single pass over the full values.
#[derive(Debug, Clone)]
pub struct BasicEvaluator {
    full_jacobian: CsrMatrix<f64>,
    reduced_jacobian: CsrMatrix<f64>,
    /// For each full non-zero, its position among the reduced non-zeros.
    reduced_entry: Vec<Option<usize>>,
}

impl BasicEvaluator {
    pub fn new(map: &ConstraintMap, matrix_graph: &SparsityPattern) -> Result<Self> {
        let equation_map = map
            .equation_map()
            .ok_or_else(|| eyre!("the basic evaluator does not support linear-combination constraints"))?;
        let free = |dof: usize| match equation_map[dof] {
            EquationMapEntry::Free(r) => Some(r),
            EquationMapEntry::Essential(_) => None,
        };

        let full_jacobian = zero_matrix(matrix_graph.clone())?;
        let mut entries = Vec::new();
        for (i, row) in full_jacobian.row_iter().enumerate() {
            if let Some(r_i) = free(i) {
                entries.extend(row.col_indices().iter().filter_map(|&j| free(j).map(|r_j| (r_i, r_j))));
            }
        }
        let reduced_pattern = pattern_from_entries(map.n_reduced(), map.n_reduced(), entries)?;

        let mut reduced_entry = Vec::with_capacity(full_jacobian.nnz());
        for (i, row) in full_jacobian.row_iter().enumerate() {
            for &j in row.col_indices() {
                let position = match (free(i), free(j)) {
                    (Some(r_i), Some(r_j)) => {
                        let offset = reduced_pattern.major_offsets()[r_i];
                        let lane = reduced_pattern
                            .lane(r_i)
                            .binary_search(&r_j)
                            .map_err(|_| eyre!("reduced matrix graph is missing entry ({}, {})", r_i, r_j))?;
                        Some(offset + lane)
                    }
                    _ => None,
                };
                reduced_entry.push(position);
            }
        }

        info!(
            "Basic evaluator: {} full and {} reduced non-zeros",
            full_jacobian.nnz(),
            reduced_pattern.nnz()
        );
        Ok(Self {
            full_jacobian,
            reduced_jacobian: zero_matrix(reduced_pattern)?,
            reduced_entry,
        })
    }
}

impl Evaluator for BasicEvaluator {
    fn residual(&mut self, problem: &Problem, reduced: DVectorView<f64>) -> Result<DVector<f64>> {
        let map = problem.constraint_map()?;
        let full = map.make_full_vec(reduced);
        let residual = problem.assemble_residual(&full)?;
        Ok(map.reduce_vector(DVectorView::from(&residual)))
    }

    fn jacobian(&mut self, problem: &Problem, reduced: DVectorView<f64>) -> Result<&CsrMatrix<f64>> {
        let map = problem.constraint_map()?;
        let full = map.make_full_vec(reduced);
        problem.assemble_tangent(&full, &mut self.full_jacobian)?;

        let reduced_values = self.reduced_jacobian.values_mut();
        reduced_values.fill(0.0);
        for (value, position) in self.full_jacobian.values().iter().zip(&self.reduced_entry) {
            if let Some(k) = position {
                reduced_values[*k] += value;
            }
        }
        Ok(&self.reduced_jacobian)
    }
}

/// Evaluator for arbitrary constraints, reducing the Jacobian by sparse products `E^T J E`.
#[derive(Debug, Clone)]
pub struct LcbcEvaluator {
    full_jacobian: CsrMatrix<f64>,
    reduced_jacobian: CsrMatrix<f64>,
}

impl LcbcEvaluator {
    pub fn new(map: &ConstraintMap, matrix_graph: &SparsityPattern) -> Result<Self> {
        Ok(Self {
            full_jacobian: zero_matrix(matrix_graph.clone())?,
            reduced_jacobian: CsrMatrix::zeros(map.n_reduced(), map.n_reduced()),
        })
    }
}

impl Evaluator for LcbcEvaluator {
    fn residual(&mut self, problem: &Problem, reduced: DVectorView<f64>) -> Result<DVector<f64>> {
        let map = problem.constraint_map()?;
        let full = map.make_full_vec(reduced);
        let residual = problem.assemble_residual(&full)?;
        Ok(map.reduce_vector(DVectorView::from(&residual)))
    }

    fn jacobian(&mut self, problem: &Problem, reduced: DVectorView<f64>) -> Result<&CsrMatrix<f64>> {
        let map = problem.constraint_map()?;
        let full = map.make_full_vec(reduced);
        problem.assemble_tangent(&full, &mut self.full_jacobian)?;
        self.reduced_jacobian = map.reduce_matrix(&self.full_jacobian);
        Ok(&self.reduced_jacobian)
    }
}

/// Creates the evaluator suited to the constraints of `map`.
pub fn create_evaluator(map: &ConstraintMap, matrix_graph: &SparsityPattern) -> Result<Box<dyn Evaluator>> {
    if map.has_linear_combinations() {
        Ok(Box::new(LcbcEvaluator::new(map, matrix_graph)?))
    } else {
        Ok(Box::new(BasicEvaluator::new(map, matrix_graph)?))
    }
}

/// The reduced nonlinear system of a problem, as seen by the Newton driver.
#[derive(Debug)]
pub struct EvaluatorSystem<'a> {
    problem: &'a Problem,
    n_reduced: usize,
    evaluator: &'a mut dyn Evaluator,
    linear_solver: &'a dyn LinearSolver,
}

impl<'a> EvaluatorSystem<'a> {
    /// Fails if the constraints of the problem have not been resolved.
    pub fn new(problem: &'a Problem, evaluator: &'a mut dyn Evaluator, linear_solver: &'a dyn LinearSolver) -> Result<Self> {
        let n_reduced = problem.constraint_map()?.n_reduced();
        Ok(Self {
            problem,
            n_reduced,
            evaluator,
            linear_solver,
        })
    }
}

impl<'a> VectorFunction<f64> for EvaluatorSystem<'a> {
    fn dimension(&self) -> usize {
        self.n_reduced
    }

    fn eval_into(&mut self, f: &mut DVectorViewMut<f64>, x: &DVectorView<f64>) -> std::result::Result<(), FunctionError> {
        let residual = self.evaluator.residual(self.problem, *x)?;
        f.copy_from(&residual);
        Ok(())
    }
}

impl<'a> DifferentiableVectorFunction<f64> for EvaluatorSystem<'a> {
    fn solve_jacobian_system(
        &mut self,
        sol: &mut DVectorViewMut<f64>,
        x: &DVectorView<f64>,
        rhs: &DVectorView<f64>,
    ) -> std::result::Result<(), FunctionError> {
        let jacobian = self.evaluator.jacobian(self.problem, *x)?;
        let solution = self
            .linear_solver
            .solve(jacobian, *rhs)
            .map_err(Error::from)?;
        sol.copy_from(&solution);
        Ok(())
    }
}
