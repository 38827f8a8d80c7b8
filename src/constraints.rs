//! Essential, periodic and linear-combination constraints and the map between full and reduced DOF vectors.
//!
//! All constraints are composed into the affine relation `full = E * reduced + e0`, where `E` is a
//! sparse `n_full x n_reduced` matrix and `e0` holds the prescribed essential values. The reduced
//! vector holds the free DOFs in ascending order of their full index, followed by the new DOFs of the
//! linear-combination constraints in definition order.
use crate::error::{Error, Result};
use crate::mesh::Mesh;
use crate::region::Regions;
use crate::timestepper::TimeStep;
use crate::variables::Variables;
use eyre::eyre;
use log::info;
use nalgebra::{DMatrix, DVector, DVectorView, Point3};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use std::fmt;
use std::fmt::Debug;
use std::sync::Arc;

/// Components of a variable, parsed from `"u.all"`, `"u.1"` or `"u.[0,1]"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DofSelector {
    variable: String,
    components: Option<Vec<usize>>,
}

impl DofSelector {
    pub fn parse(selector: &str) -> eyre::Result<Self> {
        let (variable, components) = selector
            .split_once('.')
            .ok_or_else(|| eyre!("DOF selector '{}' is not of the form 'variable.components'", selector))?;
        if variable.is_empty() {
            return Err(eyre!("DOF selector '{}' has no variable name", selector));
        }
        let components = match components.trim() {
            "all" => None,
            list if list.starts_with('[') && list.ends_with(']') => Some(
                list[1..list.len() - 1]
                    .split(',')
                    .map(|c| c.trim().parse::<usize>())
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|err| eyre!("invalid component list in DOF selector '{}': {}", selector, err))?,
            ),
            single => Some(vec![single
                .parse::<usize>()
                .map_err(|err| eyre!("invalid component in DOF selector '{}': {}", selector, err))?]),
        };
        Ok(Self {
            variable: variable.to_string(),
            components,
        })
    }

    pub fn variable(&self) -> &str {
        &self.variable
    }

    pub fn components(&self, n_components: usize) -> eyre::Result<Vec<usize>> {
        match &self.components {
            None => Ok((0..n_components).collect()),
            Some(components) => {
                if let Some(c) = components.iter().find(|&&c| c >= n_components) {
                    Err(eyre!(
                        "component {} of variable '{}' is out of range ({} components)",
                        c,
                        self.variable,
                        n_components
                    ))
                } else {
                    Ok(components.clone())
                }
            }
        }
    }
}

pub type BcFunction = Arc<dyn Fn(&TimeStep, &Point3<f64>, usize) -> f64 + Send + Sync>;

#[derive(Clone)]
pub enum BcValue {
    Constant(f64),
    /// A function of the time step, the vertex coordinates and the component.
    Function(BcFunction),
}

impl Debug for BcValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BcValue::Constant(value) => write!(f, "Constant({})", value),
            BcValue::Function(_) => write!(f, "Function"),
        }
    }
}

/// Prescribes the values of the selected DOFs at the vertices of a region.
#[derive(Debug, Clone)]
pub struct EssentialBc {
    name: String,
    region: String,
    selector: DofSelector,
    value: BcValue,
}

impl EssentialBc {
    pub fn new(name: impl Into<String>, region: impl Into<String>, dofs: &str, value: f64) -> eyre::Result<Self> {
        Ok(Self {
            name: name.into(),
            region: region.into(),
            selector: DofSelector::parse(dofs)?,
            value: BcValue::Constant(value),
        })
    }

    pub fn with_function<F>(name: impl Into<String>, region: impl Into<String>, dofs: &str, function: F) -> eyre::Result<Self>
    where
        F: Fn(&TimeStep, &Point3<f64>, usize) -> f64 + Send + Sync + 'static,
    {
        Ok(Self {
            name: name.into(),
            region: region.into(),
            selector: DofSelector::parse(dofs)?,
            value: BcValue::Function(Arc::new(function)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

pub type VertexMatcher = Arc<dyn Fn(&Point3<f64>, &Point3<f64>) -> bool + Send + Sync>;

/// Matches vertices on lines `x = const`, i.e. vertices with equal `y` coordinates.
pub fn match_x_line(tolerance: f64) -> VertexMatcher {
    Arc::new(move |a, b| (a.y - b.y).abs() <= tolerance && (a.z - b.z).abs() <= tolerance)
}

/// Matches vertices on lines `y = const`, i.e. vertices with equal `x` coordinates.
pub fn match_y_line(tolerance: f64) -> VertexMatcher {
    Arc::new(move |a, b| (a.x - b.x).abs() <= tolerance && (a.z - b.z).abs() <= tolerance)
}

/// Ties the selected DOFs on the slave region to the matching vertices of the master region.
#[derive(Clone)]
pub struct PeriodicBc {
    name: String,
    master: String,
    slave: String,
    selector: DofSelector,
    matcher: VertexMatcher,
}

impl Debug for PeriodicBc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeriodicBc")
            .field("name", &self.name)
            .field("master", &self.master)
            .field("slave", &self.slave)
            .field("selector", &self.selector)
            .finish()
    }
}

impl PeriodicBc {
    pub fn new(
        name: impl Into<String>,
        master: impl Into<String>,
        slave: impl Into<String>,
        dofs: &str,
        matcher: VertexMatcher,
    ) -> eyre::Result<Self> {
        Ok(Self {
            name: name.into(),
            master: master.into(),
            slave: slave.into(),
            selector: DofSelector::parse(dofs)?,
            matcher,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LcbcKind {
    /// 2D rigid body motion `u = (t_x - theta y, t_y + theta x)` with new DOFs `(t_x, t_y, theta)`.
    Rigid,
    /// `dependent = matrix * new`, rows following the region DOFs in ascending order.
    Explicit(DMatrix<f64>),
}

/// Expresses the selected DOFs of a region through a small set of new, independent DOFs.
#[derive(Debug, Clone)]
pub struct LinearCombinationBc {
    name: String,
    region: String,
    selector: DofSelector,
    kind: LcbcKind,
}

impl LinearCombinationBc {
    pub fn new(name: impl Into<String>, region: impl Into<String>, dofs: &str, kind: LcbcKind) -> eyre::Result<Self> {
        Ok(Self {
            name: name.into(),
            region: region.into(),
            selector: DofSelector::parse(dofs)?,
            kind,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// All constraint definitions of a problem.
#[derive(Debug, Clone, Default)]
pub struct ConstraintSet {
    pub essential: Vec<EssentialBc>,
    pub periodic: Vec<PeriodicBc>,
    pub linear_combination: Vec<LinearCombinationBc>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum ConstraintKind {
    Essential,
    Periodic,
    LinearCombination,
}

/// Tracks which constraint owns each DOF.
struct Ownership<'a> {
    owners: Vec<Option<(ConstraintKind, &'a str)>>,
}

impl<'a> Ownership<'a> {
    fn claim(&mut self, dof: usize, kind: ConstraintKind, name: &'a str) -> Result<()> {
        match self.owners[dof] {
            Some((other_kind, other_name)) if other_kind != kind || (kind == ConstraintKind::LinearCombination && other_name != name) => {
                Err(Error::ConstraintConflict {
                    dof,
                    first: other_name.to_string(),
                    second: name.to_string(),
                })
            }
            _ => {
                self.owners[dof] = Some((kind, name));
                Ok(())
            }
        }
    }
}

/// A linear-combination block: `full[dofs] = operator * reduced[new DOFs]`.
#[derive(Debug, Clone, PartialEq)]
pub struct LcbcBlock {
    pub dofs: Vec<usize>,
    pub operator: DMatrix<f64>,
}

/// Constraints evaluated for one time step, in terms of global DOFs.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConstraints {
    pub n_dofs: usize,
    /// `(dof, value)` sorted by DOF.
    pub essential: Vec<(usize, f64)>,
    /// `(slave, master)` sorted by slave. Masters are never slaves themselves.
    pub periodic: Vec<(usize, usize)>,
    pub linear_combination: Vec<LcbcBlock>,
}

impl ConstraintSet {
    pub fn is_empty(&self) -> bool {
        self.essential.is_empty() && self.periodic.is_empty() && self.linear_combination.is_empty()
    }

    /// Names of all constraints, in definition order within each kind.
    pub fn names(&self) -> Vec<&str> {
        self.essential
            .iter()
            .map(EssentialBc::name)
            .chain(self.periodic.iter().map(PeriodicBc::name))
            .chain(self.linear_combination.iter().map(LinearCombinationBc::name))
            .collect()
    }

    /// Evaluates the active constraints (all when `active` is `None`) at the given time step.
    pub fn resolve(
        &self,
        active: Option<&[String]>,
        variables: &Variables,
        regions: &Regions,
        mesh: &Mesh,
        time_step: &TimeStep,
    ) -> Result<ResolvedConstraints> {
        let is_active = |name: &str| active.map(|names| names.iter().any(|n| n == name)).unwrap_or(true);
        let n_dofs = variables.n_dofs();
        let mut ownership = Ownership {
            owners: vec![None; n_dofs],
        };

        // Selected (vertex, component, dof) triples of a region
        let select = |region_name: &str, selector: &DofSelector| -> Result<Vec<(usize, usize, usize)>> {
            let region = regions.get(region_name)?;
            let dofs = variables.layout().get(selector.variable()).ok_or_else(|| {
                Error::unknown("variable", selector.variable())
            })?;
            let components = selector.components(dofs.n_components())?;
            let mut selected = Vec::new();
            for &v in region.vertices() {
                for &c in &components {
                    if let Some(dof) = dofs.dof(v, c) {
                        selected.push((v, c, dof));
                    }
                }
            }
            Ok(selected)
        };

        let mut essential_values: Vec<Option<f64>> = vec![None; n_dofs];
        for bc in self.essential.iter().filter(|bc| is_active(&bc.name)) {
            for (v, c, dof) in select(&bc.region, &bc.selector)? {
                ownership.claim(dof, ConstraintKind::Essential, &bc.name)?;
                let value = match &bc.value {
                    BcValue::Constant(value) => *value,
                    BcValue::Function(function) => function(time_step, mesh.vertex(v), c),
                };
                // Later definitions override earlier ones
                essential_values[dof] = Some(value);
            }
        }

        // Union-find over periodic pairs, rooted at the smallest DOF, resolves chains
        let mut parent: Vec<usize> = (0..n_dofs).collect();
        fn find(parent: &mut [usize], mut dof: usize) -> usize {
            while parent[dof] != dof {
                parent[dof] = parent[parent[dof]];
                dof = parent[dof];
            }
            dof
        }
        let mut periodic_dofs = Vec::new();
        for bc in self.periodic.iter().filter(|bc| is_active(&bc.name)) {
            let masters = select(&bc.master, &bc.selector)?;
            let slaves = select(&bc.slave, &bc.selector)?;
            for &(v_slave, c, slave) in &slaves {
                let x_slave = mesh.vertex(v_slave);
                let master = masters
                    .iter()
                    .find(|&&(v_master, c_master, _)| c_master == c && (bc.matcher)(mesh.vertex(v_master), x_slave))
                    .map(|&(_, _, dof)| dof)
                    .ok_or_else(|| {
                        eyre!(
                            "periodic condition '{}': no vertex of region '{}' matches vertex {} of region '{}'",
                            bc.name,
                            bc.master,
                            v_slave,
                            bc.slave
                        )
                    })?;
                if master == slave {
                    continue;
                }
                ownership.claim(slave, ConstraintKind::Periodic, &bc.name)?;
                ownership.claim(master, ConstraintKind::Periodic, &bc.name)?;
                let (root_a, root_b) = (find(&mut parent, slave), find(&mut parent, master));
                if root_a != root_b {
                    let (root, child) = (root_a.min(root_b), root_a.max(root_b));
                    parent[child] = root;
                }
                periodic_dofs.push(slave);
                periodic_dofs.push(master);
            }
        }
        periodic_dofs.sort_unstable();
        periodic_dofs.dedup();
        let mut periodic = Vec::new();
        for dof in periodic_dofs {
            let root = find(&mut parent, dof);
            if root != dof {
                periodic.push((dof, root));
            }
        }

        let mut linear_combination = Vec::new();
        for bc in self.linear_combination.iter().filter(|bc| is_active(&bc.name)) {
            let mut selected = select(&bc.region, &bc.selector)?;
            selected.sort_unstable_by_key(|&(_, _, dof)| dof);
            for &(_, _, dof) in &selected {
                ownership.claim(dof, ConstraintKind::LinearCombination, &bc.name)?;
            }
            let operator = match &bc.kind {
                LcbcKind::Rigid => {
                    if mesh.dim() != 2 {
                        return Err(eyre!("rigid constraint '{}' requires a 2D mesh", bc.name).into());
                    }
                    let mut operator = DMatrix::zeros(selected.len(), 3);
                    for (row, &(v, c, _)) in selected.iter().enumerate() {
                        let x = mesh.vertex(v);
                        match c {
                            0 => {
                                operator[(row, 0)] = 1.0;
                                operator[(row, 2)] = -x.y;
                            }
                            1 => {
                                operator[(row, 1)] = 1.0;
                                operator[(row, 2)] = x.x;
                            }
                            _ => {
                                return Err(eyre!(
                                    "rigid constraint '{}' applies to two displacement components only",
                                    bc.name
                                )
                                .into())
                            }
                        }
                    }
                    operator
                }
                LcbcKind::Explicit(matrix) => {
                    if matrix.nrows() != selected.len() {
                        return Err(eyre!(
                            "constraint '{}': operator has {} rows, but the region has {} selected DOFs",
                            bc.name,
                            matrix.nrows(),
                            selected.len()
                        )
                        .into());
                    }
                    matrix.clone()
                }
            };
            linear_combination.push(LcbcBlock {
                dofs: selected.iter().map(|&(_, _, dof)| dof).collect(),
                operator,
            });
        }

        let essential = essential_values
            .iter()
            .enumerate()
            .filter_map(|(dof, value)| value.map(|value| (dof, value)))
            .collect();

        Ok(ResolvedConstraints {
            n_dofs,
            essential,
            periodic,
            linear_combination,
        })
    }
}

/// Where a full DOF ends up when only essential and periodic constraints are present.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum EquationMapEntry {
    Free(usize),
    Essential(f64),
}

/// The affine map `full = E * reduced + e0` together with its transpose.
#[derive(Debug, Clone)]
pub struct ConstraintMap {
    n_full: usize,
    n_reduced: usize,
    e: CsrMatrix<f64>,
    e_t: CsrMatrix<f64>,
    e0: DVector<f64>,
    /// Only available without linear-combination constraints.
    equation_map: Option<Vec<EquationMapEntry>>,
    /// For each reduced index below the number of free DOFs, the full DOF it was taken from.
    free_dofs: Vec<usize>,
    lcbc: Vec<(LcbcBlock, usize)>,
    structure: ResolvedConstraints,
}

impl ConstraintMap {
    pub fn new(constraints: ResolvedConstraints) -> Self {
        let n_full = constraints.n_dofs;
        let mut fixed = vec![false; n_full];
        for &(dof, _) in &constraints.essential {
            fixed[dof] = true;
        }
        for &(slave, _) in &constraints.periodic {
            fixed[slave] = true;
        }
        for block in &constraints.linear_combination {
            for &dof in &block.dofs {
                fixed[dof] = true;
            }
        }

        let mut reduced_index = vec![None; n_full];
        let mut free_dofs = Vec::new();
        for dof in 0..n_full {
            if !fixed[dof] {
                reduced_index[dof] = Some(free_dofs.len());
                free_dofs.push(dof);
            }
        }

        let mut lcbc = Vec::new();
        let mut offset = free_dofs.len();
        for block in &constraints.linear_combination {
            lcbc.push((block.clone(), offset));
            offset += block.operator.ncols();
        }
        let n_reduced = offset;

        let mut coo = CooMatrix::new(n_full, n_reduced);
        for (r, &dof) in free_dofs.iter().enumerate() {
            coo.push(dof, r, 1.0);
        }
        for &(slave, master) in &constraints.periodic {
            if let Some(r) = reduced_index[master] {
                coo.push(slave, r, 1.0);
            }
        }
        for (block, offset) in &lcbc {
            for (row, &dof) in block.dofs.iter().enumerate() {
                for col in 0..block.operator.ncols() {
                    let value = block.operator[(row, col)];
                    if value != 0.0 {
                        coo.push(dof, offset + col, value);
                    }
                }
            }
        }
        let e = CsrMatrix::from(&coo);
        let e_t = e.transpose();

        let mut e0 = DVector::zeros(n_full);
        for &(dof, value) in &constraints.essential {
            e0[dof] = value;
        }

        let equation_map = if constraints.linear_combination.is_empty() {
            let mut map: Vec<_> = reduced_index
                .iter()
                .map(|r| r.map(EquationMapEntry::Free).unwrap_or(EquationMapEntry::Essential(0.0)))
                .collect();
            for &(dof, value) in &constraints.essential {
                map[dof] = EquationMapEntry::Essential(value);
            }
            for &(slave, master) in &constraints.periodic {
                if let Some(r) = reduced_index[master] {
                    map[slave] = EquationMapEntry::Free(r);
                }
            }
            Some(map)
        } else {
            None
        };

        info!(
            "Built constraint map: {} full DOFs, {} reduced DOFs ({} essential, {} periodic, {} combination blocks)",
            n_full,
            n_reduced,
            constraints.essential.len(),
            constraints.periodic.len(),
            constraints.linear_combination.len()
        );

        Self {
            n_full,
            n_reduced,
            e,
            e_t,
            e0,
            equation_map,
            free_dofs,
            lcbc,
            structure: constraints,
        }
    }

    pub fn n_full(&self) -> usize {
        self.n_full
    }

    pub fn n_reduced(&self) -> usize {
        self.n_reduced
    }

    pub fn matrix(&self) -> &CsrMatrix<f64> {
        &self.e
    }

    pub fn offset(&self) -> &DVector<f64> {
        &self.e0
    }

    pub fn equation_map(&self) -> Option<&[EquationMapEntry]> {
        self.equation_map.as_deref()
    }

    pub fn has_linear_combinations(&self) -> bool {
        !self.lcbc.is_empty()
    }

    pub fn constraints(&self) -> &ResolvedConstraints {
        &self.structure
    }

    /// Whether `constraints` constrain the same DOFs in the same way, possibly with other values.
    pub fn has_same_structure(&self, constraints: &ResolvedConstraints) -> bool {
        let essential_dofs = |c: &ResolvedConstraints| c.essential.iter().map(|&(dof, _)| dof).collect::<Vec<_>>();
        self.structure.n_dofs == constraints.n_dofs
            && essential_dofs(&self.structure) == essential_dofs(constraints)
            && self.structure.periodic == constraints.periodic
            && self.structure.linear_combination == constraints.linear_combination
    }

    /// Replaces the essential values, keeping `E`. The structure must be unchanged.
    pub fn update_values(&mut self, constraints: ResolvedConstraints) {
        debug_assert!(self.has_same_structure(&constraints));
        self.e0.fill(0.0);
        for &(dof, value) in &constraints.essential {
            self.e0[dof] = value;
        }
        if let Some(map) = &mut self.equation_map {
            for &(dof, value) in &constraints.essential {
                map[dof] = EquationMapEntry::Essential(value);
            }
        }
        self.structure = constraints;
    }

    /// `E * reduced`, i.e. a full increment without the essential values.
    pub fn expand(&self, reduced: DVectorView<f64>) -> DVector<f64> {
        assert_eq!(reduced.len(), self.n_reduced, "reduced vector has wrong length");
        let mut full = DVector::zeros(self.n_full);
        for (i, row) in self.e.row_iter().enumerate() {
            for (&j, &e_ij) in row.col_indices().iter().zip(row.values()) {
                full[i] += e_ij * reduced[j];
            }
        }
        full
    }

    /// `E * reduced + e0`.
    pub fn make_full_vec(&self, reduced: DVectorView<f64>) -> DVector<f64> {
        self.expand(reduced) + &self.e0
    }

    /// Extracts the reduced vector from a full one.
    ///
    /// Free DOFs are copied. The new DOFs of linear-combination blocks are recovered in the
    /// least-squares sense, which is exact when `full` satisfies the constraints.
    pub fn strip_state_vector(&self, full: DVectorView<f64>) -> Result<DVector<f64>> {
        assert_eq!(full.len(), self.n_full, "full vector has wrong length");
        let mut reduced = DVector::zeros(self.n_reduced);
        for (r, &dof) in self.free_dofs.iter().enumerate() {
            reduced[r] = full[dof];
        }
        for (block, offset) in &self.lcbc {
            let values = DVector::from_iterator(block.dofs.len(), block.dofs.iter().map(|&dof| full[dof]));
            let new_dofs = block
                .operator
                .clone()
                .svd(true, true)
                .solve(&values, 1e-14)
                .map_err(|err| eyre!("failed to recover combination DOFs: {}", err))?;
            reduced
                .rows_mut(*offset, new_dofs.len())
                .copy_from(&new_dofs);
        }
        Ok(reduced)
    }

    /// `E^T * full`.
    pub fn reduce_vector(&self, full: DVectorView<f64>) -> DVector<f64> {
        assert_eq!(full.len(), self.n_full, "full vector has wrong length");
        let mut reduced = DVector::zeros(self.n_reduced);
        for (i, row) in self.e.row_iter().enumerate() {
            for (&j, &e_ij) in row.col_indices().iter().zip(row.values()) {
                reduced[j] += e_ij * full[i];
            }
        }
        reduced
    }

    /// `E^T * matrix * E`.
    pub fn reduce_matrix(&self, matrix: &CsrMatrix<f64>) -> CsrMatrix<f64> {
        let tmp = &self.e_t * matrix;
        &tmp * &self.e
    }

    /// Sets the essential DOFs of a full vector to their prescribed values.
    pub fn apply_essential(&self, full: &mut DVector<f64>) {
        for &(dof, value) in &self.structure.essential {
            full[dof] = value;
        }
    }
}
