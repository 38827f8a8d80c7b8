//! Serializable solver options.
use crate::linear_solver::{CholeskySolver, ConjugateGradientSolver, DirectLuSolver, LinearSolver};
use galerkin_optimize::newton::NewtonSettings;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewtonConfig {
    /// Maximum number of iterations, `None` for no limit.
    pub i_max: Option<usize>,
    pub eps_a: f64,
    /// Relative tolerance with respect to the initial residual norm. Disabled by default.
    pub eps_r: Option<f64>,
    pub divergence_factor: f64,
    pub line_search: LineSearchKind,
    /// Skip the convergence check after the first (exact) step of a linear problem.
    pub linear: bool,
}

impl Default for NewtonConfig {
    fn default() -> Self {
        Self {
            i_max: Some(1),
            eps_a: 1e-10,
            eps_r: None,
            divergence_factor: 1e10,
            line_search: LineSearchKind::None,
            linear: false,
        }
    }
}

impl From<&NewtonConfig> for NewtonSettings<f64> {
    fn from(config: &NewtonConfig) -> Self {
        NewtonSettings {
            max_iterations: config.i_max,
            eps_a: config.eps_a,
            eps_r: config.eps_r,
            divergence_factor: config.divergence_factor,
            linear: config.linear,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub enum LineSearchKind {
    None,
    Backtracking { c: f64, alpha_min: f64 },
}

impl Default for LineSearchKind {
    fn default() -> Self {
        Self::None
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub enum LinearSolverKind {
    DirectLu,
    Cholesky,
    ConjugateGradient { max_iterations: usize, tolerance: f64 },
}

impl Default for LinearSolverKind {
    fn default() -> Self {
        Self::DirectLu
    }
}

impl LinearSolverKind {
    pub fn build(&self) -> Arc<dyn LinearSolver> {
        match *self {
            Self::DirectLu => Arc::new(DirectLuSolver),
            Self::Cholesky => Arc::new(CholeskySolver),
            Self::ConjugateGradient {
                max_iterations,
                tolerance,
            } => Arc::new(ConjugateGradientSolver {
                max_iterations,
                tolerance,
            }),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeSettings {
    pub t0: f64,
    pub t1: f64,
    pub n_step: usize,
}

impl Default for TimeSettings {
    fn default() -> Self {
        Self {
            t0: 0.0,
            t1: 1.0,
            n_step: 1,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblySettings {
    /// Compute element contributions in parallel. The scatter into global storage is always serial.
    pub parallel: bool,
    pub chunk_size: usize,
}

impl Default for AssemblySettings {
    fn default() -> Self {
        Self {
            parallel: true,
            chunk_size: 256,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProblemOptions {
    pub newton: NewtonConfig,
    pub linear_solver: LinearSolverKind,
    pub time: TimeSettings,
    pub assembly: AssemblySettings,
    /// Accept time steps that stop at the iteration limit instead of failing.
    pub accept_unconverged: bool,
}
