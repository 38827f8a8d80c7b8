//! Conforming triangle meshes embedded in 2D or 3D.
use eyre::eyre;
use nalgebra::{DMatrix, Point2, Point3};
use rustc_hash::FxHashMap;

pub mod procedural;

/// An edge of the mesh, shared by one or two triangles.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Facet {
    /// Vertex indices, oriented as in the owner cell.
    pub vertices: [usize; 2],
    /// The first cell found to contain this facet.
    pub cell: usize,
    /// Local edge index in the owner cell. Edge `k` connects local vertices `k` and `(k + 1) % 3`.
    pub local_index: usize,
    pub neighbor: Option<usize>,
}

impl Facet {
    pub fn is_boundary(&self) -> bool {
        self.neighbor.is_none()
    }
}

/// Index-based triangle mesh.
///
/// Vertices are always stored as 3D points. For meshes with `dim == 2` the `z` coordinate is zero.
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    dim: usize,
    vertices: Vec<Point3<f64>>,
    cells: Vec<[usize; 3]>,
    facets: Vec<Facet>,
}

impl Mesh {
    pub fn from_vertices_and_cells(dim: usize, vertices: Vec<Point3<f64>>, cells: Vec<[usize; 3]>) -> eyre::Result<Self> {
        if dim != 2 && dim != 3 {
            return Err(eyre!("mesh dimension must be 2 or 3, got {}", dim));
        }
        if dim == 2 && vertices.iter().any(|v| v.z != 0.0) {
            return Err(eyre!("vertices of a 2D mesh must have zero z coordinate"));
        }
        for (cell_idx, cell) in cells.iter().enumerate() {
            if let Some(v) = cell.iter().find(|&&v| v >= vertices.len()) {
                return Err(eyre!(
                    "cell {} references vertex {}, but the mesh only has {} vertices",
                    cell_idx,
                    v,
                    vertices.len()
                ));
            }
        }

        let facets = compute_facets(&cells);
        Ok(Self {
            dim,
            vertices,
            cells,
            facets,
        })
    }

    pub fn from_vertices_and_cells_2d(vertices: Vec<Point2<f64>>, cells: Vec<[usize; 3]>) -> eyre::Result<Self> {
        let vertices = vertices
            .into_iter()
            .map(|p| Point3::new(p.x, p.y, 0.0))
            .collect();
        Self::from_vertices_and_cells(2, vertices, cells)
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn vertices(&self) -> &[Point3<f64>] {
        &self.vertices
    }

    pub fn vertex(&self, index: usize) -> &Point3<f64> {
        &self.vertices[index]
    }

    pub fn cells(&self) -> &[[usize; 3]] {
        &self.cells
    }

    pub fn facets(&self) -> &[Facet] {
        &self.facets
    }

    /// Indices of facets that belong to exactly one cell, in ascending order.
    pub fn boundary_facets(&self) -> impl '_ + Iterator<Item = usize> {
        self.facets
            .iter()
            .enumerate()
            .filter(|(_, facet)| facet.is_boundary())
            .map(|(idx, _)| idx)
    }

    /// Returns the coordinates as a `dim x num_vertices` matrix.
    pub fn coordinates(&self) -> DMatrix<f64> {
        DMatrix::from_fn(self.dim, self.vertices.len(), |i, j| self.vertices[j][i])
    }

    /// Replaces the vertex coordinates, keeping the topology.
    ///
    /// Anything computed from coordinates (geometry mappings, material values) is stale afterwards.
    /// Prefer `Problem::set_mesh_coordinates`, which also invalidates those.
    pub fn set_vertices(&mut self, vertices: Vec<Point3<f64>>) -> eyre::Result<()> {
        if vertices.len() != self.vertices.len() {
            return Err(eyre!(
                "expected {} vertices, got {}",
                self.vertices.len(),
                vertices.len()
            ));
        }
        if self.dim == 2 && vertices.iter().any(|v| v.z != 0.0) {
            return Err(eyre!("vertices of a 2D mesh must have zero z coordinate"));
        }
        self.vertices = vertices;
        Ok(())
    }

    /// Transform all vertices of the mesh by the given transformation function.
    pub fn transform_vertices<F>(&mut self, mut transformation: F)
    where
        F: FnMut(&mut Point3<f64>),
    {
        for p in &mut self.vertices {
            transformation(p);
        }
    }
}

fn compute_facets(cells: &[[usize; 3]]) -> Vec<Facet> {
    let mut facets: Vec<Facet> = Vec::new();
    let mut facet_lookup = FxHashMap::default();

    for (cell_idx, cell) in cells.iter().enumerate() {
        for local_index in 0..3 {
            let a = cell[local_index];
            let b = cell[(local_index + 1) % 3];
            let key = (a.min(b), a.max(b));
            match facet_lookup.get(&key) {
                Some(&facet_idx) => {
                    let facet: &mut Facet = &mut facets[facet_idx];
                    facet.neighbor = Some(cell_idx);
                }
                None => {
                    facet_lookup.insert(key, facets.len());
                    facets.push(Facet {
                        vertices: [a, b],
                        cell: cell_idx,
                        local_index,
                        neighbor: None,
                    });
                }
            }
        }
    }

    facets
}
