//! Discrete fields: a basis of a given order over a cell region.
use crate::mesh::Mesh;
use crate::region::Region;
use eyre::eyre;

/// A vector field of `n_components` components approximated by Lagrange polynomials over a region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    name: String,
    n_components: usize,
    region: String,
    approx_order: usize,
}

impl Field {
    /// Only first-order (P1) approximations are available.
    pub fn new(
        name: impl Into<String>,
        n_components: usize,
        region: impl Into<String>,
        approx_order: usize,
    ) -> eyre::Result<Self> {
        let name = name.into();
        if approx_order != 1 {
            return Err(eyre!(
                "field '{}': approximation order {} is not supported, only order 1 is",
                name,
                approx_order
            ));
        }
        if n_components == 0 {
            return Err(eyre!("field '{}' must have at least one component", name));
        }
        Ok(Self {
            name,
            n_components,
            region: region.into(),
            approx_order,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn n_components(&self) -> usize {
        self.n_components
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn approx_order(&self) -> usize {
        self.approx_order
    }
}

/// The nodes of a field: the vertices of its region's cells, numbered by ascending vertex index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldNodes {
    node_vertices: Vec<usize>,
    vertex_to_node: Vec<Option<usize>>,
}

impl FieldNodes {
    pub fn new(field: &Field, region: &Region, mesh: &Mesh) -> eyre::Result<Self> {
        if !region.has_cells() {
            return Err(eyre!(
                "field '{}' is defined on region '{}', which has no cells",
                field.name(),
                region.name()
            ));
        }

        let mut node_vertices: Vec<_> = region
            .cells()
            .iter()
            .flat_map(|&c| mesh.cells()[c])
            .collect();
        node_vertices.sort_unstable();
        node_vertices.dedup();

        let mut vertex_to_node = vec![None; mesh.num_vertices()];
        for (node, &v) in node_vertices.iter().enumerate() {
            vertex_to_node[v] = Some(node);
        }

        Ok(Self {
            node_vertices,
            vertex_to_node,
        })
    }

    pub fn num_nodes(&self) -> usize {
        self.node_vertices.len()
    }

    pub fn node_vertices(&self) -> &[usize] {
        &self.node_vertices
    }

    pub fn node_of_vertex(&self, vertex: usize) -> Option<usize> {
        self.vertex_to_node.get(vertex).copied().flatten()
    }
}
