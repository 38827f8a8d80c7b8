//! Variables, their DOF layout and per-element connectivity tables.
use crate::error::{Error, Result};
use crate::field::{Field, FieldNodes};
use crate::mesh::Mesh;
use crate::region::{Region, Regions};
use eyre::eyre;
use nalgebra::{DMatrix, DVector, DVectorView};
use std::collections::VecDeque;
use std::ops::Range;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariableKind {
    /// An unknown of the problem. `order` is the time-derivative order, `history` the number of
    /// previous states retained.
    Unknown { order: usize, history: usize },
    /// A test (virtual) variable paired with an unknown.
    Test { dual: String },
    /// A variable with externally given data.
    Parameter,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    name: String,
    kind: VariableKind,
    field: String,
}

impl Variable {
    pub fn unknown(name: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: VariableKind::Unknown { order: 0, history: 0 },
            field: field.into(),
        }
    }

    pub fn test(name: impl Into<String>, field: impl Into<String>, dual: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: VariableKind::Test { dual: dual.into() },
            field: field.into(),
        }
    }

    pub fn parameter(name: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: VariableKind::Parameter,
            field: field.into(),
        }
    }

    /// Sets the time-derivative order. Has no effect on test and parameter variables.
    pub fn with_order(mut self, new_order: usize) -> Self {
        if let VariableKind::Unknown { order, .. } = &mut self.kind {
            *order = new_order;
        }
        self
    }

    /// Sets the number of previous states to retain. Has no effect on test and parameter variables.
    pub fn with_history(mut self, depth: usize) -> Self {
        if let VariableKind::Unknown { history, .. } = &mut self.kind {
            *history = depth;
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &VariableKind {
        &self.kind
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self.kind, VariableKind::Unknown { .. })
    }

    pub fn history(&self) -> usize {
        match self.kind {
            VariableKind::Unknown { history, .. } => history,
            _ => 0,
        }
    }
}

/// The contiguous DOF range of one variable.
///
/// Within the range, DOFs are numbered node-major: `offset + n_components * node + component`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableDofs {
    name: String,
    field: String,
    n_components: usize,
    offset: usize,
    nodes: Arc<FieldNodes>,
}

impl VariableDofs {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn n_components(&self) -> usize {
        self.n_components
    }

    pub fn n_dofs(&self) -> usize {
        self.n_components * self.nodes.num_nodes()
    }

    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.n_dofs()
    }

    pub fn nodes(&self) -> &FieldNodes {
        &self.nodes
    }

    /// The global DOF of the given component at the given mesh vertex.
    pub fn dof(&self, vertex: usize, component: usize) -> Option<usize> {
        debug_assert!(component < self.n_components);
        self.nodes
            .node_of_vertex(vertex)
            .map(|node| self.offset + self.n_components * node + component)
    }
}

/// Maps variables to non-overlapping, contiguous global DOF ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DofLayout {
    variables: Vec<VariableDofs>,
    n_dofs: usize,
}

impl DofLayout {
    fn push(&mut self, name: &str, field: &Field, nodes: Arc<FieldNodes>) {
        let entry = VariableDofs {
            name: name.to_string(),
            field: field.name().to_string(),
            n_components: field.n_components(),
            offset: self.n_dofs,
            nodes,
        };
        self.n_dofs += entry.n_dofs();
        self.variables.push(entry);
    }

    pub fn n_dofs(&self) -> usize {
        self.n_dofs
    }

    pub fn variables(&self) -> &[VariableDofs] {
        &self.variables
    }

    pub fn get(&self, name: &str) -> Option<&VariableDofs> {
        self.variables.iter().find(|v| v.name == name)
    }

    pub fn range(&self, name: &str) -> Result<Range<usize>> {
        self.get(name)
            .map(VariableDofs::range)
            .ok_or_else(|| Error::unknown("variable", name))
    }

    pub fn variable_of_dof(&self, dof: usize) -> Option<&VariableDofs> {
        self.variables.iter().find(|v| v.range().contains(&dof))
    }
}

/// Local-to-global DOF tables for the elements of a region.
///
/// Local DOFs are node-major over the element's three vertices. Facet elements use the
/// vertices of their owner cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementDofs {
    n_local: usize,
    dofs: Vec<usize>,
}

impl ElementDofs {
    pub fn from_cells(variable: &VariableDofs, mesh: &Mesh, cells: &[usize]) -> eyre::Result<Self> {
        Self::from_vertex_triples(variable, cells.iter().map(|&c| mesh.cells()[c]))
    }

    pub fn from_facets(variable: &VariableDofs, mesh: &Mesh, facets: &[usize]) -> eyre::Result<Self> {
        Self::from_vertex_triples(
            variable,
            facets
                .iter()
                .map(|&f| mesh.cells()[mesh.facets()[f].cell]),
        )
    }

    pub fn for_region(variable: &VariableDofs, mesh: &Mesh, region: &Region, surface: bool) -> eyre::Result<Self> {
        if surface {
            Self::from_facets(variable, mesh, region.facets())
        } else {
            Self::from_cells(variable, mesh, region.cells())
        }
    }

    fn from_vertex_triples(variable: &VariableDofs, triples: impl Iterator<Item = [usize; 3]>) -> eyre::Result<Self> {
        let nc = variable.n_components();
        let n_local = 3 * nc;
        let mut dofs = Vec::new();
        for triple in triples {
            for v in triple {
                for c in 0..nc {
                    let dof = variable.dof(v, c).ok_or_else(|| {
                        eyre!(
                            "vertex {} is not part of the field '{}' of variable '{}'",
                            v,
                            variable.field(),
                            variable.name()
                        )
                    })?;
                    dofs.push(dof);
                }
            }
        }
        Ok(Self { n_local, dofs })
    }

    pub fn n_local(&self) -> usize {
        self.n_local
    }

    pub fn num_elements(&self) -> usize {
        if self.n_local == 0 {
            0
        } else {
            self.dofs.len() / self.n_local
        }
    }

    pub fn element(&self, element: usize) -> &[usize] {
        &self.dofs[self.n_local * element..self.n_local * (element + 1)]
    }
}

fn find_field<'a>(fields: &'a [Field], name: &str) -> Result<&'a Field> {
    fields
        .iter()
        .find(|f| f.name() == name)
        .ok_or_else(|| Error::unknown("field", name))
}

/// Values of a variable reshaped per mesh vertex, for output writers.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableOutput {
    pub name: String,
    pub field: String,
    pub dofs: Range<usize>,
    /// `num_vertices x n_components`; vertices outside the field hold the fill value.
    pub values: DMatrix<f64>,
}

/// All variables of a problem together with the global DOF layout and state history.
#[derive(Debug, Clone)]
pub struct Variables {
    variables: Vec<Variable>,
    layout: DofLayout,
    parameter_layout: DofLayout,
    parameter_data: DVector<f64>,
    history: VecDeque<DVector<f64>>,
    history_depth: usize,
}

impl Variables {
    pub fn new(variables: Vec<Variable>, fields: &[Field], regions: &Regions, mesh: &Mesh) -> Result<Self> {
        for (i, var) in variables.iter().enumerate() {
            if variables[..i].iter().any(|other| other.name == var.name) {
                return Err(eyre!("variable '{}' is defined more than once", var.name).into());
            }
        }

        let mut field_nodes: Vec<(String, Arc<FieldNodes>)> = Vec::new();
        let mut nodes_for = |field: &Field| -> Result<Arc<FieldNodes>> {
            if let Some((_, nodes)) = field_nodes.iter().find(|(name, _)| name == field.name()) {
                return Ok(nodes.clone());
            }
            let region = regions.get(field.region())?;
            let nodes = Arc::new(FieldNodes::new(field, region, mesh)?);
            field_nodes.push((field.name().to_string(), nodes.clone()));
            Ok(nodes)
        };

        let mut layout = DofLayout::default();
        let mut parameter_layout = DofLayout::default();
        for var in &variables {
            let field = find_field(fields, &var.field)?;
            match &var.kind {
                VariableKind::Unknown { .. } => layout.push(&var.name, field, nodes_for(field)?),
                VariableKind::Parameter => parameter_layout.push(&var.name, field, nodes_for(field)?),
                VariableKind::Test { dual } => {
                    let dual_var = variables
                        .iter()
                        .find(|v| &v.name == dual)
                        .ok_or_else(|| Error::unknown("variable", dual.clone()))?;
                    if !dual_var.is_unknown() {
                        return Err(eyre!(
                            "test variable '{}' must be paired with an unknown, but '{}' is not one",
                            var.name,
                            dual
                        )
                        .into());
                    }
                    if dual_var.field != var.field {
                        return Err(eyre!(
                            "test variable '{}' and its dual '{}' must share the same field",
                            var.name,
                            dual
                        )
                        .into());
                    }
                }
            }
        }

        let history_depth = variables.iter().map(Variable::history).max().unwrap_or(0);
        let parameter_data = DVector::zeros(parameter_layout.n_dofs());
        Ok(Self {
            variables,
            layout,
            parameter_layout,
            parameter_data,
            history: VecDeque::new(),
            history_depth,
        })
    }

    pub fn get(&self, name: &str) -> Result<&Variable> {
        self.variables
            .iter()
            .find(|v| v.name == name)
            .ok_or_else(|| Error::unknown("variable", name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.variables.iter()
    }

    /// Layout of the unknowns, i.e. of the full state vector.
    pub fn layout(&self) -> &DofLayout {
        &self.layout
    }

    pub fn parameter_layout(&self) -> &DofLayout {
        &self.parameter_layout
    }

    pub fn n_dofs(&self) -> usize {
        self.layout.n_dofs()
    }

    /// The DOFs a variable refers to. Test variables share the DOFs of their dual unknown.
    pub fn dofs_of(&self, name: &str) -> Result<&VariableDofs> {
        let var = self.get(name)?;
        let entry = match &var.kind {
            VariableKind::Unknown { .. } => self.layout.get(name),
            VariableKind::Test { dual } => self.layout.get(dual),
            VariableKind::Parameter => self.parameter_layout.get(name),
        };
        entry.ok_or_else(|| Error::unknown("variable", name))
    }

    pub fn create_state_vector(&self) -> DVector<f64> {
        DVector::zeros(self.n_dofs())
    }

    pub fn get_vec_part<'a>(&self, vec: &'a DVector<f64>, name: &str) -> Result<DVectorView<'a, f64>> {
        let range = self.layout.range(name)?;
        self.check_state_len(vec)?;
        Ok(vec.rows(range.start, range.len()))
    }

    pub fn set_vec_part(&self, vec: &mut DVector<f64>, name: &str, part: DVectorView<f64>) -> Result<()> {
        let range = self.layout.range(name)?;
        self.check_state_len(vec)?;
        if part.len() != range.len() {
            return Err(eyre!(
                "part for variable '{}' has length {}, expected {}",
                name,
                part.len(),
                range.len()
            )
            .into());
        }
        vec.rows_mut(range.start, range.len()).copy_from(&part);
        Ok(())
    }

    fn check_state_len(&self, vec: &DVector<f64>) -> Result<()> {
        if vec.len() != self.n_dofs() {
            return Err(eyre!(
                "state vector has length {}, expected {}",
                vec.len(),
                self.n_dofs()
            )
            .into());
        }
        Ok(())
    }

    pub fn set_parameter_data(&mut self, name: &str, data: DVectorView<f64>) -> Result<()> {
        let range = self.parameter_layout.range(name)?;
        if data.len() != range.len() {
            return Err(eyre!(
                "data for parameter '{}' has length {}, expected {}",
                name,
                data.len(),
                range.len()
            )
            .into());
        }
        self.parameter_data
            .rows_mut(range.start, range.len())
            .copy_from(&data);
        Ok(())
    }

    pub fn parameter_data(&self) -> &DVector<f64> {
        &self.parameter_data
    }

    /// The number of previous states kept, i.e. the largest history depth of any unknown.
    pub fn history_depth(&self) -> usize {
        self.history_depth
    }

    /// Fills the history with copies of `state`.
    pub fn init_history(&mut self, state: &DVector<f64>) {
        self.history.clear();
        for _ in 0..self.history_depth {
            self.history.push_back(state.clone());
        }
    }

    /// Rotates the history: `state` becomes the most recent previous state.
    pub fn advance(&mut self, state: &DVector<f64>) {
        if self.history_depth == 0 {
            return;
        }
        self.history.push_front(state.clone());
        self.history.truncate(self.history_depth);
    }

    /// The state `steps_back` steps before the current one (`1` is the previous step).
    pub fn previous_state(&self, steps_back: usize) -> Option<&DVector<f64>> {
        steps_back
            .checked_sub(1)
            .and_then(|idx| self.history.get(idx))
    }

    /// The global DOFs of a variable at the vertices of a region, in ascending order.
    pub fn region_dofs(&self, variable: &str, region: &Region) -> Result<Vec<usize>> {
        let dofs = self.dofs_of(variable)?;
        let mut result: Vec<_> = region
            .vertices()
            .iter()
            .flat_map(|&v| (0..dofs.n_components()).filter_map(move |c| dofs.dof(v, c)))
            .collect();
        result.sort_unstable();
        Ok(result)
    }

    /// Splits a full state vector into per-vertex arrays for each unknown.
    pub fn state_to_output(&self, state: &DVector<f64>, mesh: &Mesh, fill_value: f64) -> Result<Vec<VariableOutput>> {
        self.check_state_len(state)?;
        Ok(self
            .layout
            .variables()
            .iter()
            .map(|var| {
                let nc = var.n_components();
                let mut values = DMatrix::repeat(mesh.num_vertices(), nc, fill_value);
                for (node, &vertex) in var.nodes().node_vertices().iter().enumerate() {
                    for c in 0..nc {
                        values[(vertex, c)] = state[var.offset + nc * node + c];
                    }
                }
                VariableOutput {
                    name: var.name().to_string(),
                    field: var.field().to_string(),
                    dofs: var.range(),
                    values,
                }
            })
            .collect())
    }
}
