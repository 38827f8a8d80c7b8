use crate::materials::{MembraneMetric, MooneyRivlinMembrane, MooneyRivlinParameters};
use galerkin::error::{TermError, TermErrorKind};
use galerkin::mesh::Mesh;
use galerkin::nalgebra::{Matrix2, Matrix2x3, Matrix3, Matrix3x2, SMatrix, SVector, Vector3};
use galerkin::quadrature::p1_triangle_basis_gradients;
use galerkin::term::{ArgType, ElementBlocks, ElementChunk, EvaluationMode, Term, TermContext};

type ElementVector = SVector<f64, 9>;
type ElementMatrix = SMatrix<f64, 9, 9>;
type StrainDisplacement = SMatrix<f64, 3, 9>;

const MEMBRANE_ARGS: [ArgType; 4] = [ArgType::Material, ArgType::Material, ArgType::Virtual, ArgType::State];

/// Reference geometry of a membrane element in its own orthonormal frame.
#[derive(Debug, Clone, PartialEq)]
pub struct MembraneElement {
    /// Rows are the in-plane axes `e1`, `e2` and the unit normal.
    pub frame: Matrix3<f64>,
    /// Gradients of the P1 basis functions in the in-plane coordinates, column `n` for node `n`.
    pub gradients: Matrix2x3<f64>,
}

impl MembraneElement {
    /// Builds the frame of a triangle from its reference vertices.
    ///
    /// `e1` points from vertex 0 to vertex 1 and the normal follows the vertex ordering.
    /// Errors are reported against mesh cell `cell`.
    pub fn from_vertices(mesh: &Mesh, vertices: [usize; 3], cell: usize) -> Result<Self, TermError> {
        let [x0, x1, x2] = vertices.map(|v| *mesh.vertex(v));
        let d1 = x1 - x0;
        let d2 = x2 - x0;
        let scale = d1.norm().max(d2.norm());

        let e1 = d1
            .try_normalize(1e-12 * scale)
            .ok_or_else(|| TermError::degenerate_element(cell, "coincident vertices"))?;
        let normal = e1
            .cross(&d2)
            .try_normalize(1e-12 * scale)
            .ok_or_else(|| TermError::degenerate_element(cell, "collinear vertices"))?;
        let e2 = normal.cross(&e1);
        let frame = Matrix3::from_rows(&[e1.transpose(), e2.transpose(), normal.transpose()]);

        let p1 = (frame * d1).xy();
        let p2 = (frame * d2).xy();
        let jacobian = Matrix2::from_columns(&[p1, p2]);
        let det = jacobian.determinant();
        let jacobian_inv = match jacobian.try_inverse() {
            Some(inv) if det > 0.0 => inv,
            _ => {
                return Err(TermError::degenerate_element(
                    cell,
                    format!("non-positive in-plane Jacobian determinant {}", det),
                ))
            }
        };

        Ok(Self {
            frame,
            gradients: jacobian_inv.transpose() * p1_triangle_basis_gradients(),
        })
    }

    /// Transforms nodal vectors between the global frame and the element frame (`to_local = true`).
    fn rotate_nodal(&self, values: &ElementVector, to_local: bool) -> ElementVector {
        let mut rotated = ElementVector::zeros();
        for n in 0..3 {
            let v = values.fixed_rows::<3>(3 * n);
            let r = if to_local {
                self.frame * v
            } else {
                self.frame.transpose() * v
            };
            rotated.fixed_rows_mut::<3>(3 * n).copy_from(&r);
        }
        rotated
    }

    /// `Rᵀ K R` with `R = diag(T, T, T)`.
    fn rotate_to_global(&self, local: &ElementMatrix) -> ElementMatrix {
        let mut rotation = ElementMatrix::zeros();
        for n in 0..3 {
            rotation
                .fixed_view_mut::<3, 3>(3 * n, 3 * n)
                .copy_from(&self.frame);
        }
        rotation.transpose() * local * rotation
    }

    /// The deformation gradient `F = [I; 0] + Σ ũ_n ⊗ ∇φ_n` of local nodal displacements.
    pub fn deformation_gradient(&self, u_local: &ElementVector) -> Matrix3x2<f64> {
        let mut f = Matrix3x2::identity();
        for n in 0..3 {
            let u_n = u_local.fixed_rows::<3>(3 * n);
            f += u_n * self.gradients.column(n).transpose();
        }
        f
    }

    /// The strain-displacement operator mapping local nodal displacements to `[δE11, δE22, 2 δE12]`.
    #[allow(non_snake_case)]
    fn strain_displacement(&self, F: &Matrix3x2<f64>) -> StrainDisplacement {
        let G = &self.gradients;
        let mut b = StrainDisplacement::zeros();
        for n in 0..3 {
            for i in 0..3 {
                let col = 3 * n + i;
                b[(0, col)] = F[(i, 0)] * G[(0, n)];
                b[(1, col)] = F[(i, 1)] * G[(1, n)];
                b[(2, col)] = F[(i, 0)] * G[(1, n)] + F[(i, 1)] * G[(0, n)];
            }
        }
        b
    }
}

/// Total Lagrangian Mooney–Rivlin membrane `∫ δE : S` on triangles embedded in 3D.
///
/// Material arguments are the scalars `a1` and `a2`, with the membrane thickness folded in. Both the
/// virtual and the state variable must have three components. Residuals and tangents are computed
/// in the frame of each element and rotated back to the global frame before they are returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MembraneTerm {
    material: MooneyRivlinMembrane,
}

impl MembraneTerm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parameters at quadrature point `qp` of the `element`-th element of the region, which is mesh cell `cell`.
    fn parameters(
        context: &TermContext,
        element: usize,
        cell: usize,
        qp: usize,
    ) -> Result<MooneyRivlinParameters<f64>, TermError> {
        let parameters = MooneyRivlinParameters {
            a1: context.material_checked(0, 1, 1)?.scalar(element, qp),
            a2: context.material_checked(1, 1, 1)?.scalar(element, qp),
        };
        if parameters.a2 == 0.0 || !parameters.a2.is_finite() || !parameters.a1.is_finite() {
            return Err(TermError::degenerate_material(
                cell,
                format!("invalid membrane parameters a1 = {}, a2 = {}", parameters.a1, parameters.a2),
            ));
        }
        Ok(parameters)
    }
}

impl Term for MembraneTerm {
    fn name(&self) -> &str {
        "dw_tl_membrane"
    }

    fn arg_types(&self) -> &[ArgType] {
        &MEMBRANE_ARGS
    }

    #[allow(non_snake_case)]
    fn evaluate(
        &self,
        mode: EvaluationMode,
        context: &TermContext,
        chunk: ElementChunk,
        output: &mut ElementBlocks,
    ) -> Result<(), TermError> {
        let mapping = context.volume()?;
        let state = context.state()?;
        if state.n_components != 3 || context.virtual_components()? != 3 {
            return Err(TermError::shape_mismatch(format!(
                "membrane term requires 3-component variables, got {}",
                state.n_components
            )));
        }
        let tangent = match mode {
            EvaluationMode::Residual => false,
            EvaluationMode::Tangent { wrt } if wrt == state.name => true,
            EvaluationMode::Tangent { wrt } => return Err(TermError::unsupported_differentiation(wrt)),
            EvaluationMode::Evaluate => {
                return Err(TermError::new(
                    TermErrorKind::UnsupportedMode,
                    format!("term '{}' does not support evaluation mode {:?}", self.name(), mode),
                ))
            }
        };

        let cells = context.region.cells();
        let mut u = ElementVector::zeros();
        for (i, element) in chunk.range().enumerate() {
            let cell = cells[element];
            let geometry = MembraneElement::from_vertices(context.mesh, context.mesh.cells()[cell], cell)?;
            state.gather(element, u.as_mut_slice());
            let u_local = geometry.rotate_nodal(&u, true);

            let F = geometry.deformation_gradient(&u_local);
            let metric = MembraneMetric::from_deformation_gradient(&F);
            if metric.determinant() <= 0.0 {
                return Err(TermError::degenerate_element(
                    cell,
                    format!("non-positive membrane metric determinant {}", metric.determinant()),
                ));
            }
            let B = geometry.strain_displacement(&F);
            let G = &geometry.gradients;

            let mut residual_local = ElementVector::zeros();
            let mut tangent_local = ElementMatrix::zeros();
            for qp in 0..mapping.num_quadrature_points() {
                let w = mapping.integration_factor(element, qp);
                let parameters = Self::parameters(context, element, cell, qp)?;
                let S = self.material.compute_stress(&metric, &parameters);

                if tangent {
                    let D = self.material.compute_tangent(&metric, &parameters);
                    tangent_local += B.transpose() * D * B * w;

                    // Initial stress stiffness, identical for all three displacement components
                    let S_matrix = Matrix2::new(S[0], S[2], S[2], S[1]);
                    let geometric = G.transpose() * S_matrix * G;
                    for n in 0..3 {
                        for m in 0..3 {
                            for c in 0..3 {
                                tangent_local[(3 * n + c, 3 * m + c)] += w * geometric[(n, m)];
                            }
                        }
                    }
                } else {
                    residual_local += B.transpose() * S * w;
                }
            }

            if tangent {
                output.matrix_mut(i).copy_from(&geometry.rotate_to_global(&tangent_local));
            } else {
                output.vector_mut(i).copy_from(&geometry.rotate_nodal(&residual_local, false));
            }
        }
        Ok(())
    }
}

/// The in-plane stress `[S11, S22, S12]` of a membrane element at given global nodal displacements.
pub fn compute_membrane_stress(
    mesh: &Mesh,
    vertices: [usize; 3],
    displacements: &[Vector3<f64>; 3],
    parameters: &MooneyRivlinParameters<f64>,
) -> Result<Vector3<f64>, TermError> {
    let geometry = MembraneElement::from_vertices(mesh, vertices, 0)?;
    let mut u = ElementVector::zeros();
    for (n, d) in displacements.iter().enumerate() {
        u.fixed_rows_mut::<3>(3 * n).copy_from(d);
    }
    let metric = MembraneMetric::from_deformation_gradient(&geometry.deformation_gradient(&geometry.rotate_nodal(&u, true)));
    if metric.determinant() <= 0.0 {
        return Err(TermError::degenerate_element(0, "non-positive membrane metric determinant"));
    }
    Ok(MooneyRivlinMembrane.compute_stress(&metric, parameters))
}
