use crate::error::TermError;
use crate::term::{ArgType, ElementBlocks, ElementChunk, EvaluationMode, Term, TermContext};
use crate::terms::{check_components, check_tangent_variable, unsupported_mode};
use nalgebra::{Matrix3, Vector3};

const DIFFUSION_ARGS: [ArgType; 3] = [ArgType::Material, ArgType::Virtual, ArgType::State];

/// The weak Laplacian `∫ c ∇v · ∇u` with a scalar coefficient `c`.
///
/// Vector-valued variables are treated component by component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LaplaceTerm;

impl Term for LaplaceTerm {
    fn name(&self) -> &str {
        "dw_laplace"
    }

    fn arg_types(&self) -> &[ArgType] {
        &DIFFUSION_ARGS
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
        let n_qp = mapping.num_quadrature_points();

        match mode {
            EvaluationMode::Residual => {
                let mut u = vec![0.0; 3 * nc];
                for (i, element) in chunk.range().enumerate() {
                    state.gather(element, &mut u);
                    let g = mapping.gradients(element);
                    let mut residual = output.vector_mut(i);
                    for comp in 0..nc {
                        let u_comp = Vector3::new(u[comp], u[nc + comp], u[2 * nc + comp]);
                        let r = g.transpose() * (g * u_comp);
                        for qp in 0..n_qp {
                            let w = mapping.integration_factor(element, qp) * c.scalar(element, qp);
                            for n in 0..3 {
                                residual[nc * n + comp] += w * r[n];
                            }
                        }
                    }
                }
                Ok(())
            }
            EvaluationMode::Tangent { wrt } => {
                check_tangent_variable(wrt, state)?;
                for (i, element) in chunk.range().enumerate() {
                    let g = mapping.gradients(element);
                    let gtg = g.transpose() * g;
                    let mut tangent = output.matrix_mut(i);
                    for qp in 0..n_qp {
                        let w = mapping.integration_factor(element, qp) * c.scalar(element, qp);
                        for n in 0..3 {
                            for m in 0..3 {
                                for comp in 0..nc {
                                    tangent[(nc * n + comp, nc * m + comp)] += w * gtg[(n, m)];
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

/// Anisotropic diffusion `∫ ∇v · K ∇u` with a `dim x dim` conductivity tensor `K`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiffusionTerm;

impl DiffusionTerm {
    /// `∫ Gᵀ K G` restricted to the spatial dimension of the mesh.
    fn element_stiffness(context: &TermContext, element: usize) -> Result<Matrix3<f64>, TermError> {
        let mapping = context.volume()?;
        let dim = context.mesh.dim();
        let k = context.material_checked(0, dim, dim)?;
        let g = mapping.gradients(element).rows(0, dim).clone_owned();
        let mut stiffness = Matrix3::zeros();
        for qp in 0..mapping.num_quadrature_points() {
            let w = mapping.integration_factor(element, qp);
            let k_qp = k.get(element, qp);
            stiffness += (g.transpose() * k_qp * &g) * w;
        }
        Ok(stiffness)
    }
}

impl Term for DiffusionTerm {
    fn name(&self) -> &str {
        "dw_diffusion"
    }

    fn arg_types(&self) -> &[ArgType] {
        &DIFFUSION_ARGS
    }

    fn evaluate(
        &self,
        mode: EvaluationMode,
        context: &TermContext,
        chunk: ElementChunk,
        output: &mut ElementBlocks,
    ) -> Result<(), TermError> {
        let state = context.state()?;
        if state.n_components != 1 || context.virtual_components()? != 1 {
            return Err(TermError::shape_mismatch("diffusion term requires scalar variables"));
        }

        match mode {
            EvaluationMode::Residual => {
                let mut u = [0.0; 3];
                for (i, element) in chunk.range().enumerate() {
                    state.gather(element, &mut u);
                    let stiffness = Self::element_stiffness(context, element)?;
                    let r = stiffness * Vector3::from(u);
                    output.vector_mut(i).copy_from(&r);
                }
                Ok(())
            }
            EvaluationMode::Tangent { wrt } => {
                check_tangent_variable(wrt, state)?;
                for (i, element) in chunk.range().enumerate() {
                    let stiffness = Self::element_stiffness(context, element)?;
                    output.matrix_mut(i).copy_from(&stiffness);
                }
                Ok(())
            }
            EvaluationMode::Evaluate => Err(unsupported_mode(self.name(), mode)),
        }
    }
}
