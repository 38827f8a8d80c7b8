//! Reference-to-physical mappings of cells and facets at quadrature points.
use crate::error::{Error, TermError};
use crate::mesh::Mesh;
use crate::quadrature::{p1_triangle_basis, p1_triangle_basis_gradients, Integral};
use crate::region::Region;
use eyre::eyre;
use nalgebra::{Matrix2, Matrix3, Matrix3x2, Point3, Vector3};

/// Geometry of the cells of a region for a given integral.
///
/// Works for planar triangles as well as triangles embedded in 3D: physical gradients are
/// computed as `J (J^T J)^{-1} ∇ξ`, which reduces to `J^{-T} ∇ξ` for square `J`.
#[derive(Debug, Clone)]
pub struct VolumeMapping {
    n_qp: usize,
    basis_values: Vec<[f64; 3]>,
    /// Physical basis gradients per cell, column `n` belonging to basis function `n`.
    gradients: Vec<Matrix3<f64>>,
    /// Quadrature weight times area scaling, per cell and quadrature point.
    integration_factors: Vec<f64>,
    qp_points: Vec<Point3<f64>>,
}

impl VolumeMapping {
    pub fn new(mesh: &Mesh, region: &Region, integral: &Integral) -> Result<Self, Error> {
        let (weights, points) = integral.triangle_rule()?;
        let n_qp = weights.len();
        let n_cells = region.cells().len();
        let basis_values: Vec<_> = points.iter().map(p1_triangle_basis).collect();
        let grad_ref = p1_triangle_basis_gradients();

        let mut gradients = Vec::with_capacity(n_cells);
        let mut integration_factors = Vec::with_capacity(n_cells * n_qp);
        let mut qp_points = Vec::with_capacity(n_cells * n_qp);

        for &cell_idx in region.cells() {
            let [x0, x1, x2] = mesh.cells()[cell_idx].map(|v| *mesh.vertex(v));
            let j = Matrix3x2::from_columns(&[x1 - x0, x2 - x0]);
            let metric: Matrix2<f64> = j.transpose() * j;
            let det = metric.determinant();
            let scale = j.norm_squared() * j.norm_squared();
            let metric_inv = match metric.try_inverse() {
                Some(inv) if det > 1e-12 * scale => inv,
                _ => {
                    return Err(TermError::degenerate_element(
                        cell_idx,
                        format!("cell {} has (nearly) collinear vertices", cell_idx),
                    )
                    .in_context("geometry", region.name())
                    .into())
                }
            };

            gradients.push(j * metric_inv * grad_ref);
            let area_scale = det.sqrt();
            for (w, phi) in weights.iter().zip(&basis_values) {
                integration_factors.push(w * area_scale);
                let x = x0.coords * phi[0] + x1.coords * phi[1] + x2.coords * phi[2];
                qp_points.push(Point3::from(x));
            }
        }

        Ok(Self {
            n_qp,
            basis_values,
            gradients,
            integration_factors,
            qp_points,
        })
    }

    pub fn num_elements(&self) -> usize {
        self.gradients.len()
    }

    pub fn num_quadrature_points(&self) -> usize {
        self.n_qp
    }

    pub fn basis_values(&self, qp: usize) -> &[f64; 3] {
        &self.basis_values[qp]
    }

    pub fn gradients(&self, element: usize) -> &Matrix3<f64> {
        &self.gradients[element]
    }

    pub fn integration_factor(&self, element: usize, qp: usize) -> f64 {
        self.integration_factors[self.n_qp * element + qp]
    }

    /// Quadrature points of all elements, element-major.
    pub fn quadrature_points(&self) -> &[Point3<f64>] {
        &self.qp_points
    }

    /// The integral of one over each element.
    pub fn element_volume(&self, element: usize) -> f64 {
        (0..self.n_qp)
            .map(|qp| self.integration_factor(element, qp))
            .sum()
    }
}

/// Geometry of the facets of a facet region of a 2D mesh for a given integral.
///
/// Volume quantities (gradients) are those of the cell owning each facet.
#[derive(Debug, Clone)]
pub struct SurfaceMapping {
    n_qp: usize,
    basis_values: Vec<[f64; 2]>,
    normals: Vec<Vector3<f64>>,
    cell_gradients: Vec<Matrix3<f64>>,
    integration_factors: Vec<f64>,
    qp_points: Vec<Point3<f64>>,
}

impl SurfaceMapping {
    pub fn new(mesh: &Mesh, region: &Region, integral: &Integral) -> Result<Self, Error> {
        if mesh.dim() != 2 {
            return Err(eyre!("surface integrals are only supported on 2D meshes").into());
        }
        let (weights, points) = integral.segment_rule()?;
        let n_qp = weights.len();
        let basis_values: Vec<_> = points.iter().map(|p| [1.0 - p.x, p.x]).collect();
        let grad_ref = p1_triangle_basis_gradients();

        let n_facets = region.facets().len();
        let mut normals = Vec::with_capacity(n_facets);
        let mut cell_gradients = Vec::with_capacity(n_facets);
        let mut integration_factors = Vec::with_capacity(n_facets * n_qp);
        let mut qp_points = Vec::with_capacity(n_facets * n_qp);

        for &facet_idx in region.facets() {
            let facet = &mesh.facets()[facet_idx];
            let cell = mesh.cells()[facet.cell];
            let a = mesh.vertex(facet.vertices[0]);
            let b = mesh.vertex(facet.vertices[1]);
            let opposite = mesh.vertex(cell[(facet.local_index + 2) % 3]);

            let degenerate = |details: String| -> Error {
                TermError::degenerate_element(facet_idx, details)
                    .in_context("geometry", region.name())
                    .into()
            };

            let tangent = b - a;
            let length = tangent.norm();
            if !(length > 0.0) {
                return Err(degenerate(format!("facet {} has zero length", facet_idx)));
            }
            let mut normal = Vector3::new(tangent.y, -tangent.x, 0.0) / length;
            if normal.dot(&(opposite - a)) > 0.0 {
                normal = -normal;
            }

            let [x0, x1, x2] = cell.map(|v| *mesh.vertex(v));
            let j = Matrix3x2::from_columns(&[x1 - x0, x2 - x0]);
            let metric: Matrix2<f64> = j.transpose() * j;
            let det = metric.determinant();
            let scale = j.norm_squared() * j.norm_squared();
            let metric_inv = match metric.try_inverse() {
                Some(inv) if det > 1e-12 * scale => inv,
                _ => return Err(degenerate(format!("owner cell {} is degenerate", facet.cell))),
            };

            normals.push(normal);
            cell_gradients.push(j * metric_inv * grad_ref);
            for (w, phi) in weights.iter().zip(&basis_values) {
                integration_factors.push(w * length);
                qp_points.push(Point3::from(a.coords * phi[0] + b.coords * phi[1]));
            }
        }

        Ok(Self {
            n_qp,
            basis_values,
            normals,
            cell_gradients,
            integration_factors,
            qp_points,
        })
    }

    pub fn num_elements(&self) -> usize {
        self.normals.len()
    }

    pub fn num_quadrature_points(&self) -> usize {
        self.n_qp
    }

    pub fn basis_values(&self, qp: usize) -> &[f64; 2] {
        &self.basis_values[qp]
    }

    /// Unit normal pointing out of the owner cell.
    pub fn normal(&self, element: usize) -> &Vector3<f64> {
        &self.normals[element]
    }

    /// Physical basis gradients of the owner cell.
    pub fn cell_gradients(&self, element: usize) -> &Matrix3<f64> {
        &self.cell_gradients[element]
    }

    pub fn integration_factor(&self, element: usize, qp: usize) -> f64 {
        self.integration_factors[self.n_qp * element + qp]
    }

    pub fn quadrature_points(&self) -> &[Point3<f64>] {
        &self.qp_points
    }
}

/// Either kind of mapping, as stored in the geometry cache.
#[derive(Debug, Clone)]
pub enum Mapping {
    Volume(VolumeMapping),
    Surface(SurfaceMapping),
}

impl Mapping {
    pub fn quadrature_points(&self) -> &[Point3<f64>] {
        match self {
            Mapping::Volume(mapping) => mapping.quadrature_points(),
            Mapping::Surface(mapping) => mapping.quadrature_points(),
        }
    }

    pub fn num_elements(&self) -> usize {
        match self {
            Mapping::Volume(mapping) => mapping.num_elements(),
            Mapping::Surface(mapping) => mapping.num_elements(),
        }
    }

    pub fn num_quadrature_points(&self) -> usize {
        match self {
            Mapping::Volume(mapping) => mapping.num_quadrature_points(),
            Mapping::Surface(mapping) => mapping.num_quadrature_points(),
        }
    }

    pub fn as_volume(&self) -> Option<&VolumeMapping> {
        match self {
            Mapping::Volume(mapping) => Some(mapping),
            Mapping::Surface(_) => None,
        }
    }

    pub fn as_surface(&self) -> Option<&SurfaceMapping> {
        match self {
            Mapping::Volume(_) => None,
            Mapping::Surface(mapping) => Some(mapping),
        }
    }
}
