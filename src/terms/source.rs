use crate::error::TermError;
use crate::term::{ArgType, ElementBlocks, ElementChunk, EvaluationMode, Term, TermContext};
use crate::terms::unsupported_mode;

const SOURCE_ARGS: [ArgType; 2] = [ArgType::Material, ArgType::Virtual];

/// The volume source `∫ f · v` with `f` given per component as an `n_components x 1` material parameter.
///
/// Independent of the state, so it contributes to the residual only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VolumeSourceTerm;

impl Term for VolumeSourceTerm {
    fn name(&self) -> &str {
        "dw_volume_lvf"
    }

    fn arg_types(&self) -> &[ArgType] {
        &SOURCE_ARGS
    }

    fn evaluate(
        &self,
        mode: EvaluationMode,
        context: &TermContext,
        chunk: ElementChunk,
        output: &mut ElementBlocks,
    ) -> Result<(), TermError> {
        match mode {
            EvaluationMode::Residual => {
                let mapping = context.volume()?;
                let nc = context.virtual_components()?;
                let f = context.material_checked(0, nc, 1)?;
                for (i, element) in chunk.range().enumerate() {
                    let mut residual = output.vector_mut(i);
                    for qp in 0..mapping.num_quadrature_points() {
                        let w = mapping.integration_factor(element, qp);
                        let phi = mapping.basis_values(qp);
                        let f_qp = f.get(element, qp);
                        for n in 0..3 {
                            for comp in 0..nc {
                                residual[nc * n + comp] += w * phi[n] * f_qp[comp];
                            }
                        }
                    }
                }
                Ok(())
            }
            EvaluationMode::Tangent { wrt } => Err(TermError::unsupported_differentiation(wrt)),
            EvaluationMode::Evaluate => Err(unsupported_mode(self.name(), mode)),
        }
    }
}
