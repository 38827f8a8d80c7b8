//! Built-in terms for scalar and vector diffusion-type problems.
use crate::error::{TermError, TermErrorKind};
use crate::term::{EvaluationMode, StateArgument};

mod diffusion;
mod flux;
mod mass;
mod source;

pub use diffusion::*;
pub use flux::*;
pub use mass::*;
pub use source::*;

/// Checks that a tangent is requested with respect to the state variable of the term.
fn check_tangent_variable(wrt: &str, state: &StateArgument) -> Result<(), TermError> {
    if wrt == state.name {
        Ok(())
    } else {
        Err(TermError::unsupported_differentiation(wrt))
    }
}

fn unsupported_mode(term: &str, mode: EvaluationMode) -> TermError {
    TermError::new(
        TermErrorKind::UnsupportedMode,
        format!("term '{}' does not support evaluation mode {:?}", term, mode),
    )
}

fn check_components(virtual_components: usize, state_components: usize) -> Result<(), TermError> {
    if virtual_components == state_components {
        Ok(())
    } else {
        Err(TermError::shape_mismatch(format!(
            "virtual variable has {} components, state variable has {}",
            virtual_components, state_components
        )))
    }
}
