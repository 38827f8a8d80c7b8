use crate::error::TermError;
use crate::term::{ArgType, ElementBlocks, ElementChunk, EvaluationMode, Integration, Term, TermContext};
use crate::terms::unsupported_mode;
use nalgebra::Vector3;

const FLUX_ARGS: [ArgType; 2] = [ArgType::Material, ArgType::Parameter];

/// The boundary flux `∫ n · K ∇u` of a scalar variable over a facet region.
///
/// Gradients are taken from the cell owning each facet and `n` is its outward unit normal.
/// Evaluation only: one scalar per facet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SurfaceFluxTerm;

impl Term for SurfaceFluxTerm {
    fn name(&self) -> &str {
        "ev_surface_flux"
    }

    fn arg_types(&self) -> &[ArgType] {
        &FLUX_ARGS
    }

    fn integration(&self) -> Integration {
        Integration::Surface
    }

    fn evaluate(
        &self,
        mode: EvaluationMode,
        context: &TermContext,
        chunk: ElementChunk,
        output: &mut ElementBlocks,
    ) -> Result<(), TermError> {
        match mode {
            EvaluationMode::Evaluate => {}
            EvaluationMode::Tangent { wrt } => return Err(TermError::unsupported_differentiation(wrt)),
            EvaluationMode::Residual => return Err(unsupported_mode(self.name(), mode)),
        }

        let mapping = context.surface()?;
        let parameter = context.parameter()?;
        if parameter.n_components != 1 {
            return Err(TermError::shape_mismatch("surface flux requires a scalar variable"));
        }
        let dim = context.mesh.dim();
        let k = context.material_checked(0, dim, dim)?;

        let mut u = [0.0; 3];
        for (i, element) in chunk.range().enumerate() {
            parameter.gather(element, &mut u);
            let grad_u = mapping.cell_gradients(element) * Vector3::from(u);
            let grad_u = grad_u.rows(0, dim);
            let normal = mapping.normal(element).rows(0, dim);
            let mut flux = 0.0;
            for qp in 0..mapping.num_quadrature_points() {
                let k_grad_u = k.get(element, qp) * grad_u;
                flux += mapping.integration_factor(element, qp) * normal.dot(&k_grad_u);
            }
            *output.scalar_mut(i) = flux;
        }
        Ok(())
    }
}
