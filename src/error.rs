//! Error types shared by the assembly and solve pipeline.
use crate::linear_solver::LinearSolverError;
use galerkin_optimize::newton::{NewtonError, NewtonErrorKind, NewtonReport};
use std::error::Error as StdError;
use std::fmt;
use std::fmt::Display;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TermErrorKind {
    /// Material or state arrays do not match the element/quadrature point layout.
    ShapeMismatch,
    /// The element geometry is degenerate (collinear or coincident nodes, inverted metric).
    DegenerateElement,
    /// Material data makes the constitutive law ill-defined.
    DegenerateMaterial,
    /// The term was asked to differentiate with respect to a variable it does not depend on.
    UnsupportedDifferentiation,
    /// The term does not support the requested evaluation mode.
    UnsupportedMode,
}

/// An error raised while computing element contributions.
///
/// Carries the term, region and element in which it occurred, whenever they are known.
#[derive(Debug, Clone, PartialEq)]
pub struct TermError {
    pub kind: TermErrorKind,
    pub term: Option<String>,
    pub region: Option<String>,
    /// Mesh cell, or mesh facet for surface regions.
    pub element: Option<usize>,
    pub details: String,
}

impl TermError {
    pub fn new(kind: TermErrorKind, details: impl Into<String>) -> Self {
        Self {
            kind,
            term: None,
            region: None,
            element: None,
            details: details.into(),
        }
    }

    pub fn shape_mismatch(details: impl Into<String>) -> Self {
        Self::new(TermErrorKind::ShapeMismatch, details)
    }

    pub fn degenerate_element(element: usize, details: impl Into<String>) -> Self {
        Self::new(TermErrorKind::DegenerateElement, details).at_element(element)
    }

    pub fn degenerate_material(element: usize, details: impl Into<String>) -> Self {
        Self::new(TermErrorKind::DegenerateMaterial, details).at_element(element)
    }

    pub fn unsupported_differentiation(variable: &str) -> Self {
        Self::new(
            TermErrorKind::UnsupportedDifferentiation,
            format!("term does not depend on variable '{}'", variable),
        )
    }

    pub fn at_element(mut self, element: usize) -> Self {
        self.element = Some(element);
        self
    }

    /// Attaches term and region names, keeping any context that is already present.
    pub fn in_context(mut self, term: &str, region: &str) -> Self {
        self.term.get_or_insert_with(|| term.to_string());
        self.region.get_or_insert_with(|| region.to_string());
        self
    }
}

impl Display for TermError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(term) = &self.term {
            write!(f, " in term '{}'", term)?;
        }
        if let Some(region) = &self.region {
            write!(f, " on region '{}'", region)?;
        }
        if let Some(element) = self.element {
            write!(f, " at element {}", element)?;
        }
        write!(f, ": {}", self.details)
    }
}

impl StdError for TermError {}

/// The crate-level error type.
#[derive(Debug)]
pub enum Error {
    Term(TermError),
    LinearSolver(LinearSolverError),
    Newton(NewtonError<f64>),
    /// A time step stopped at the iteration limit and unconverged steps are not accepted.
    NotConverged { step: usize, report: NewtonReport<f64> },
    /// Two constraints of different kinds act on the same DOF.
    ConstraintConflict { dof: usize, first: String, second: String },
    /// An element contribution targets a matrix entry outside of the precomputed matrix graph.
    MissingMatrixEntry { row: usize, col: usize },
    UnknownName { kind: &'static str, name: String },
    InvalidDefinition(eyre::Report),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn unknown(kind: &'static str, name: impl Into<String>) -> Self {
        Self::UnknownName {
            kind,
            name: name.into(),
        }
    }

    /// Returns the term error at the root of this error, if any.
    ///
    /// Term errors raised while the Newton driver evaluates the residual or the Jacobian are
    /// wrapped by the driver, so this also looks through the Newton error.
    pub fn term_error(&self) -> Option<&TermError> {
        match self {
            Error::Term(err) => Some(err),
            Error::Newton(newton_err) => {
                let inner = match &newton_err.kind {
                    NewtonErrorKind::Residual(err)
                    | NewtonErrorKind::JacobianSystem(err)
                    | NewtonErrorKind::LineSearch(err) => err,
                    NewtonErrorKind::Diverged => return None,
                };
                inner
                    .downcast_ref::<Error>()
                    .and_then(Error::term_error)
                    .or_else(|| inner.downcast_ref::<TermError>())
            }
            _ => None,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Term(err) => write!(f, "Term evaluation failed. {}", err),
            Error::LinearSolver(err) => write!(f, "Linear solve failed. {}", err),
            Error::Newton(err) => write!(f, "{}", err),
            Error::NotConverged { step, report } => write!(
                f,
                "Newton solve of time step {} did not converge within {} iterations (residual norms: {:?})",
                step, report.iterations, report.residual_norms
            ),
            Error::ConstraintConflict { dof, first, second } => write!(
                f,
                "DOF {} is constrained by both '{}' and '{}'",
                dof, first, second
            ),
            Error::MissingMatrixEntry { row, col } => write!(
                f,
                "Entry ({}, {}) is not part of the matrix graph",
                row, col
            ),
            Error::UnknownName { kind, name } => write!(f, "Unknown {} '{}'", kind, name),
            Error::InvalidDefinition(report) => write!(f, "Invalid problem definition: {}", report),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Term(err) => Some(err),
            Error::LinearSolver(err) => Some(err),
            Error::Newton(err) => Some(err),
            Error::InvalidDefinition(report) => {
                let err: &(dyn StdError + 'static) = report.as_ref();
                Some(err)
            }
            _ => None,
        }
    }
}

impl From<TermError> for Error {
    fn from(err: TermError) -> Self {
        Error::Term(err)
    }
}

impl From<LinearSolverError> for Error {
    fn from(err: LinearSolverError) -> Self {
        Error::LinearSolver(err)
    }
}

impl From<NewtonError<f64>> for Error {
    fn from(err: NewtonError<f64>) -> Self {
        Error::Newton(err)
    }
}

impl From<eyre::Report> for Error {
    fn from(report: eyre::Report) -> Self {
        Error::InvalidDefinition(report)
    }
}
