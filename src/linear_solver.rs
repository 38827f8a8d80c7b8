//! Linear solvers for the (reduced) Jacobian systems.
use nalgebra::{DMatrix, DVector, DVectorView};
use nalgebra_sparse::factorization::CscCholesky;
use nalgebra_sparse::ops::serial::spmm_csr_dense;
use nalgebra_sparse::ops::Op;
use nalgebra_sparse::{CscMatrix, CsrMatrix};
use std::error::Error;
use std::fmt;
use std::fmt::{Debug, Display};

#[derive(Debug, Clone, PartialEq)]
pub enum LinearSolverError {
    /// The matrix could not be factorized.
    SingularMatrix,
    /// An iterative solver did not reach its tolerance.
    Diverged { iterations: usize, residual_norm: f64 },
    DimensionMismatch { rows: usize, cols: usize, rhs: usize },
}

impl Display for LinearSolverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SingularMatrix => write!(f, "matrix is singular or not positive definite"),
            Self::Diverged {
                iterations,
                residual_norm,
            } => write!(
                f,
                "iterative solver stopped after {} iterations with residual norm {}",
                iterations, residual_norm
            ),
            Self::DimensionMismatch { rows, cols, rhs } => write!(
                f,
                "cannot solve {}x{} system with right-hand side of length {}",
                rows, cols, rhs
            ),
        }
    }
}

impl Error for LinearSolverError {}

/// Solves `A x = b` for a sparse matrix `A`.
pub trait LinearSolver: Send + Sync + Debug {
    fn solve(&self, matrix: &CsrMatrix<f64>, rhs: DVectorView<f64>) -> Result<DVector<f64>, LinearSolverError>;
}

fn check_dimensions(matrix: &CsrMatrix<f64>, rhs: &DVectorView<f64>) -> Result<(), LinearSolverError> {
    if matrix.nrows() != matrix.ncols() || matrix.nrows() != rhs.len() {
        Err(LinearSolverError::DimensionMismatch {
            rows: matrix.nrows(),
            cols: matrix.ncols(),
            rhs: rhs.len(),
        })
    } else {
        Ok(())
    }
}

/// Dense LU factorization with partial pivoting. Intended for small systems and testing.
#[derive(Debug, Copy, Clone, Default)]
pub struct DirectLuSolver;

impl LinearSolver for DirectLuSolver {
    fn solve(&self, matrix: &CsrMatrix<f64>, rhs: DVectorView<f64>) -> Result<DVector<f64>, LinearSolverError> {
        check_dimensions(matrix, &rhs)?;
        let dense = DMatrix::from(matrix);
        dense
            .lu()
            .solve(&rhs.clone_owned())
            .ok_or(LinearSolverError::SingularMatrix)
    }
}

/// Sparse Cholesky factorization. Requires a symmetric positive definite matrix.
#[derive(Debug, Copy, Clone, Default)]
pub struct CholeskySolver;

impl LinearSolver for CholeskySolver {
    fn solve(&self, matrix: &CsrMatrix<f64>, rhs: DVectorView<f64>) -> Result<DVector<f64>, LinearSolverError> {
        check_dimensions(matrix, &rhs)?;
        let csc = CscMatrix::from(matrix);
        let cholesky = CscCholesky::factor(&csc).map_err(|_| LinearSolverError::SingularMatrix)?;
        let b = DMatrix::from_column_slice(rhs.len(), 1, rhs.clone_owned().as_slice());
        let x = cholesky.solve(&b);
        Ok(DVector::from_column_slice(x.as_slice()))
    }
}

/// Jacobi-preconditioned conjugate gradient for symmetric positive definite systems.
#[derive(Debug, Copy, Clone)]
pub struct ConjugateGradientSolver {
    pub max_iterations: usize,
    /// Relative tolerance on the approximate residual, `|r| <= tol * |b|`.
    pub tolerance: f64,
}

impl Default for ConjugateGradientSolver {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            tolerance: 1e-10,
        }
    }
}

#[allow(non_snake_case)]
impl LinearSolver for ConjugateGradientSolver {
    fn solve(&self, matrix: &CsrMatrix<f64>, rhs: DVectorView<f64>) -> Result<DVector<f64>, LinearSolverError> {
        check_dimensions(matrix, &rhs)?;
        let n = rhs.len();
        let b = rhs.clone_owned();
        let b_norm = b.norm();
        let mut x = DVector::zeros(n);
        if b_norm == 0.0 {
            return Ok(x);
        }

        let mut inv_diag = DVector::repeat(n, 1.0);
        for (i, row) in matrix.row_iter().enumerate() {
            for (&j, &a_ij) in row.col_indices().iter().zip(row.values()) {
                if i == j && a_ij != 0.0 {
                    inv_diag[i] = 1.0 / a_ij;
                }
            }
        }

        // x0 = 0, so r0 = b
        let mut r = b;
        let mut z = r.component_mul(&inv_diag);
        let mut p = z.clone();
        let mut Ap = DVector::zeros(n);
        let mut zTr = z.dot(&r);

        for iteration in 0..self.max_iterations {
            if r.norm() <= self.tolerance * b_norm {
                return Ok(x);
            }

            spmm_csr_dense(0.0, &mut Ap, 1.0, Op::NoOp(matrix), Op::NoOp(&p));
            let pAp = p.dot(&Ap);
            if !(pAp > 0.0) {
                return Err(LinearSolverError::Diverged {
                    iterations: iteration,
                    residual_norm: r.norm(),
                });
            }

            let alpha = zTr / pAp;
            x.axpy(alpha, &p, 1.0);
            r.axpy(-alpha, &Ap, 1.0);
            z.copy_from(&r.component_mul(&inv_diag));

            let zTr_next = z.dot(&r);
            let beta = zTr_next / zTr;
            zTr = zTr_next;
            // p <- z + beta * p
            p.zip_apply(&z, |p_i, z_i| *p_i = z_i + beta * *p_i);
        }

        let residual_norm = r.norm();
        if residual_norm <= self.tolerance * b_norm {
            Ok(x)
        } else {
            Err(LinearSolverError::Diverged {
                iterations: self.max_iterations,
                residual_norm,
            })
        }
    }
}
