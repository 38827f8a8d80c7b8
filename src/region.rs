//! Named subsets of mesh entities.
use crate::error::{Error, Result};
use crate::mesh::Mesh;
use nalgebra::Point3;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RegionKind {
    Cell,
    Facet,
    Vertex,
}

/// A named set of vertices, cells and facets of a mesh.
///
/// All index lists are sorted and free of duplicates. Regions only refer to mesh entities by index,
/// so they stay valid when mesh coordinates change.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    name: String,
    kind: RegionKind,
    vertices: Vec<usize>,
    cells: Vec<usize>,
    facets: Vec<usize>,
}

impl Region {
    /// The region covering the whole mesh, named `Omega`.
    pub fn all(mesh: &Mesh) -> Self {
        Self {
            name: "Omega".to_string(),
            kind: RegionKind::Cell,
            vertices: (0..mesh.num_vertices()).collect(),
            cells: (0..mesh.cells().len()).collect(),
            facets: Vec::new(),
        }
    }

    /// Selects the vertices for which `predicate` holds.
    ///
    /// Cell regions contain the cells whose vertices all satisfy the predicate, facet regions
    /// contain such facets.
    pub fn from_vertex_predicate(
        name: impl Into<String>,
        mesh: &Mesh,
        kind: RegionKind,
        predicate: impl Fn(&Point3<f64>) -> bool,
    ) -> Self {
        let vertices = mesh
            .vertices()
            .iter()
            .enumerate()
            .filter(|(_, v)| predicate(v))
            .map(|(idx, _)| idx)
            .collect();
        Self::from_vertices(name, mesh, kind, vertices)
    }

    pub fn from_vertices(name: impl Into<String>, mesh: &Mesh, kind: RegionKind, mut vertices: Vec<usize>) -> Self {
        vertices.sort_unstable();
        vertices.dedup();

        let mut membership = vec![false; mesh.num_vertices()];
        for &v in &vertices {
            membership[v] = true;
        }

        let cells = match kind {
            RegionKind::Cell => mesh
                .cells()
                .iter()
                .enumerate()
                .filter(|(_, cell)| cell.iter().all(|&v| membership[v]))
                .map(|(idx, _)| idx)
                .collect(),
            _ => Vec::new(),
        };
        let facets = match kind {
            RegionKind::Facet => mesh
                .facets()
                .iter()
                .enumerate()
                .filter(|(_, facet)| facet.vertices.iter().all(|&v| membership[v]))
                .map(|(idx, _)| idx)
                .collect(),
            _ => Vec::new(),
        };

        Self {
            name: name.into(),
            kind,
            vertices,
            cells,
            facets,
        }
    }

    /// The facet region made up of all boundary facets.
    pub fn surface(name: impl Into<String>, mesh: &Mesh) -> Self {
        let facets: Vec<_> = mesh.boundary_facets().collect();
        let mut vertices: Vec<_> = facets
            .iter()
            .flat_map(|&f| mesh.facets()[f].vertices)
            .collect();
        vertices.sort_unstable();
        vertices.dedup();
        Self {
            name: name.into(),
            kind: RegionKind::Facet,
            vertices,
            cells: Vec::new(),
            facets,
        }
    }

    pub fn from_cells(name: impl Into<String>, mesh: &Mesh, mut cells: Vec<usize>) -> Self {
        cells.sort_unstable();
        cells.dedup();
        let mut vertices: Vec<_> = cells.iter().flat_map(|&c| mesh.cells()[c]).collect();
        vertices.sort_unstable();
        vertices.dedup();
        Self {
            name: name.into(),
            kind: RegionKind::Cell,
            vertices,
            cells,
            facets: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> RegionKind {
        self.kind
    }

    pub fn vertices(&self) -> &[usize] {
        &self.vertices
    }

    pub fn cells(&self) -> &[usize] {
        &self.cells
    }

    pub fn facets(&self) -> &[usize] {
        &self.facets
    }

    pub fn has_cells(&self) -> bool {
        !self.cells.is_empty()
    }

    pub fn spans_whole_domain(&self, mesh: &Mesh) -> bool {
        self.has_cells() && self.cells.len() == mesh.cells().len()
    }
}

/// Regions of a problem, looked up by name.
#[derive(Debug, Clone, Default)]
pub struct Regions {
    regions: Vec<Region>,
}

impl Regions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a region, replacing any region with the same name.
    pub fn insert(&mut self, region: Region) {
        match self.regions.iter_mut().find(|r| r.name == region.name) {
            Some(existing) => *existing = region,
            None => self.regions.push(region),
        }
    }

    pub fn get(&self, name: &str) -> Result<&Region> {
        self.regions
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| Error::unknown("region", name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter()
    }
}
