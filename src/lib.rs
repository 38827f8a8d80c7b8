//! Nonlinear finite element assembly and solution.
//!
//! A [`Problem`](problem::Problem) collects a mesh, named regions, fields and variables, materials,
//! constraints and equations made of [`Term`](term::Term)s. It assembles residuals and tangents
//! over the constrained (reduced) DOFs and solves the resulting nonlinear system with the Newton
//! driver of [`optimize`], optionally over a sequence of time steps.

pub mod assembly;
pub mod config;
pub mod constraints;
pub mod equations;
pub mod error;
pub mod evaluator;
pub mod field;
pub mod linear_solver;
pub mod mapping;
pub mod materials;
pub mod mesh;
pub mod problem;
pub mod quadrature;
pub mod region;
pub mod term;
pub mod terms;
pub mod timestepper;
pub mod variables;

pub mod optimize {
    pub use galerkin_optimize::*;
}

pub extern crate nalgebra;
pub extern crate nalgebra_sparse;

pub use error::{Error, Result};
