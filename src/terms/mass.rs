use crate::error::TermError;
use crate::term::{ArgType, ElementBlocks, ElementChunk, EvaluationMode, Term, TermContext};
use crate::terms::{check_components, check_tangent_variable, unsupported_mode};

const MASS_ARGS: [ArgType; 3] = [ArgType::Material, ArgType::Virtual, ArgType::State];

/// Backward Euler time derivative `∫ c v (u - u_prev) / dt` with a scalar coefficient `c`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MassTimeDerivativeTerm;

impl Term for MassTimeDerivativeTerm {
    fn name(&self) -> &str {
        "dw_dot"
    }

    fn arg_types(&self) -> &[ArgType] {
        &MASS_ARGS
    }

    fn required_history(&self) -> usize {
        1
    }

    fn evaluate(
        &self,
        mode: EvaluationMode,
        context: &TermContext,
        chunk: ElementChunk,
        output: &mut ElementBlocks,
    ) -> Result<(), TermError> {
        let mapping = context.volume()?;
        let state = context.state()?;
        let nc = state.n_components;
        check_components(context.virtual_components()?, nc)?;
        let c = context.material_checked(0, 1, 1)?;
        let dt = context.time_step.dt;
        if !(dt > 0.0) {
            return Err(TermError::shape_mismatch(format!("time step size must be positive, got {}", dt)));
        }
        let n_qp = mapping.num_quadrature_points();

        match mode {
            EvaluationMode::Residual => {
                let previous = context.previous()?;
                let mut u = vec![0.0; 3 * nc];
                let mut u_prev = vec![0.0; 3 * nc];
                for (i, element) in chunk.range().enumerate() {
                    state.gather(element, &mut u);
                    previous.gather(element, &mut u_prev);
                    let mut residual = output.vector_mut(i);
                    for qp in 0..n_qp {
                        let w = mapping.integration_factor(element, qp) * c.scalar(element, qp) / dt;
                        let phi = mapping.basis_values(qp);
                        for comp in 0..nc {
                            let du: f64 = (0..3)
                                .map(|m| phi[m] * (u[nc * m + comp] - u_prev[nc * m + comp]))
                                .sum();
                            for n in 0..3 {
                                residual[nc * n + comp] += w * phi[n] * du;
                            }
                        }
                    }
                }
                Ok(())
            }
            EvaluationMode::Tangent { wrt } => {
                check_tangent_variable(wrt, state)?;
                for (i, element) in chunk.range().enumerate() {
                    let mut tangent = output.matrix_mut(i);
                    for qp in 0..n_qp {
                        let w = mapping.integration_factor(element, qp) * c.scalar(element, qp) / dt;
                        let phi = mapping.basis_values(qp);
                        for n in 0..3 {
                            for m in 0..3 {
                                for comp in 0..nc {
                                    tangent[(nc * n + comp, nc * m + comp)] += w * phi[n] * phi[m];
                                }
                            }
                        }
                    }
                }
                Ok(())
            }
            EvaluationMode::Evaluate => Err(unsupported_mode(self.name(), mode)),
        }
    }
}
