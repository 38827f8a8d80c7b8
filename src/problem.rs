//! The problem context: definitions, cached derived data and the solve entry points.
//!
//! Cached data (geometries, material values, element connectivity, the matrix graph, the
//! constraint map and the evaluator) are explicit fields that are rebuilt on demand and can be
//! invalidated independently.
use crate::assembly::{Assembler, BoundTerm};
use crate::config::{LineSearchKind, ProblemOptions};
use crate::constraints::{ConstraintMap, ConstraintSet, EssentialBc, LinearCombinationBc, PeriodicBc};
use crate::equations::{Equation, Equations, TermInstance};
use crate::error::{Error, Result};
use crate::evaluator::{create_evaluator, Evaluator, EvaluatorSystem};
use crate::field::Field;
use crate::linear_solver::LinearSolver;
use crate::mapping::{Mapping, SurfaceMapping, VolumeMapping};
use crate::materials::{Material, MaterialKey, Materials};
use crate::mesh::Mesh;
use crate::quadrature::Integral;
use crate::region::{Region, Regions};
use crate::term::{StateArgument, TermContext};
use crate::timestepper::{TimeStep, TimeStepper};
use crate::variables::{Variable, VariableKind, VariableOutput, Variables};
use eyre::eyre;
use galerkin_optimize::newton::{
    newton_cancellable, BacktrackingLineSearch, NewtonReport, NewtonSettings, NoLineSearch,
};
use log::{debug, info};
use nalgebra::{DVector, DVectorView, Point3};
use nalgebra_sparse::pattern::SparsityPattern;
use nalgebra_sparse::CsrMatrix;
use rustc_hash::FxHashMap;
use std::fmt;
use std::fmt::Debug;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct GeometryKey {
    region: String,
    integral: String,
    surface: bool,
}

impl GeometryKey {
    fn of(term: &TermInstance) -> Self {
        Self {
            region: term.region().to_string(),
            integral: term.integral().to_string(),
            surface: term.is_surface(),
        }
    }
}

fn material_key(term: &TermInstance, material: &str, parameter: &str) -> MaterialKey {
    MaterialKey {
        material: material.to_string(),
        parameter: parameter.to_string(),
        region: term.region().to_string(),
        integral: term.integral().to_string(),
        surface: term.is_surface(),
    }
}

/// Collects the definitions of a problem.
#[derive(Debug)]
pub struct ProblemBuilder {
    name: String,
    mesh: Mesh,
    regions: Vec<Region>,
    fields: Vec<Field>,
    variables: Vec<Variable>,
    materials: Vec<Material>,
    integrals: Vec<Integral>,
    equations: Vec<Equation>,
    constraints: ConstraintSet,
    options: ProblemOptions,
    linear_solver: Option<Arc<dyn LinearSolver>>,
}

impl ProblemBuilder {
    pub fn new(name: impl Into<String>, mesh: Mesh) -> Self {
        Self {
            name: name.into(),
            mesh,
            regions: Vec::new(),
            fields: Vec::new(),
            variables: Vec::new(),
            materials: Vec::new(),
            integrals: Vec::new(),
            equations: Vec::new(),
            constraints: ConstraintSet::default(),
            options: ProblemOptions::default(),
            linear_solver: None,
        }
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    /// Adds a region. The whole domain is always available as `Omega`.
    pub fn with_region(mut self, region: Region) -> Self {
        self.regions.push(region);
        self
    }

    pub fn with_field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_variable(mut self, variable: Variable) -> Self {
        self.variables.push(variable);
        self
    }

    pub fn with_material(mut self, material: Material) -> Self {
        self.materials.push(material);
        self
    }

    pub fn with_integral(mut self, integral: Integral) -> Self {
        self.integrals.push(integral);
        self
    }

    pub fn with_equation(mut self, equation: Equation) -> Self {
        self.equations.push(equation);
        self
    }

    pub fn with_essential_bc(mut self, bc: EssentialBc) -> Self {
        self.constraints.essential.push(bc);
        self
    }

    pub fn with_periodic_bc(mut self, bc: PeriodicBc) -> Self {
        self.constraints.periodic.push(bc);
        self
    }

    pub fn with_linear_combination_bc(mut self, bc: LinearCombinationBc) -> Self {
        self.constraints.linear_combination.push(bc);
        self
    }

    pub fn with_options(mut self, options: ProblemOptions) -> Self {
        self.options = options;
        self
    }

    /// Overrides the linear solver configured in the options.
    pub fn with_linear_solver(mut self, solver: Arc<dyn LinearSolver>) -> Self {
        self.linear_solver = Some(solver);
        self
    }

    /// Validates the definitions and performs the initial time update.
    pub fn build(self) -> Result<Problem> {
        let mut regions = Regions::new();
        regions.insert(Region::all(&self.mesh));
        for region in self.regions {
            regions.insert(region);
        }

        for field in &self.fields {
            regions.get(field.region())?;
        }
        let variables = Variables::new(self.variables, &self.fields, &regions, &self.mesh)?;
        let materials = Materials::new(self.materials)?;
        let equations = Equations::new(self.equations);
        equations.check_references(&variables, &regions)?;

        for term in equations.term_instances() {
            if !self.integrals.iter().any(|i| i.name() == term.integral()) {
                return Err(Error::unknown("integral", term.integral()));
            }
            let required = term.term().required_history();
            if let Some(state) = term.state() {
                let available = variables.get(state)?.history();
                if available < required {
                    return Err(eyre!(
                        "term '{}' requires {} previous states of '{}', but only {} are kept",
                        term.term().name(),
                        required,
                        state,
                        available
                    )
                    .into());
                }
            }
        }

        let time_step = TimeStepper::from_settings(&self.options.time)?.time_step();
        let linear_solver = self
            .linear_solver
            .unwrap_or_else(|| self.options.linear_solver.build());

        let mut problem = Problem {
            name: self.name,
            mesh: self.mesh,
            regions,
            fields: self.fields,
            variables,
            materials,
            equations,
            integrals: self.integrals,
            constraints: self.constraints,
            active_bcs: None,
            assembler: Assembler::new(self.options.assembly),
            options: self.options,
            linear_solver,
            time_step,
            geometries: FxHashMap::default(),
            matrix_graph: None,
            constraint_map: None,
            evaluator: None,
        };
        let zero = problem.create_state_vector();
        problem.variables.init_history(&zero);
        problem.time_update(time_step, true)?;
        Ok(problem)
    }
}

/// A problem definition together with all data derived from it.
pub struct Problem {
    name: String,
    mesh: Mesh,
    regions: Regions,
    fields: Vec<Field>,
    variables: Variables,
    materials: Materials,
    equations: Equations,
    integrals: Vec<Integral>,
    constraints: ConstraintSet,
    /// Names of the active constraints, `None` for all.
    active_bcs: Option<Vec<String>>,
    options: ProblemOptions,
    linear_solver: Arc<dyn LinearSolver>,
    assembler: Assembler,
    time_step: TimeStep,
    geometries: FxHashMap<GeometryKey, Arc<Mapping>>,
    matrix_graph: Option<Arc<SparsityPattern>>,
    constraint_map: Option<Arc<ConstraintMap>>,
    evaluator: Option<Box<dyn Evaluator>>,
}

impl Debug for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Problem")
            .field("name", &self.name)
            .field("n_vertices", &self.mesh.num_vertices())
            .field("n_dofs", &self.variables.n_dofs())
            .field("time_step", &self.time_step)
            .field("has_matrix_graph", &self.matrix_graph.is_some())
            .field("has_constraint_map", &self.constraint_map.is_some())
            .field("has_evaluator", &self.evaluator.is_some())
            .finish()
    }
}

impl Problem {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    pub fn regions(&self) -> &Regions {
        &self.regions
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    pub fn variables_mut(&mut self) -> &mut Variables {
        &mut self.variables
    }

    pub fn materials(&self) -> &Materials {
        &self.materials
    }

    pub fn equations(&self) -> &Equations {
        &self.equations
    }

    pub fn options(&self) -> &ProblemOptions {
        &self.options
    }

    pub fn time_step(&self) -> TimeStep {
        self.time_step
    }

    pub fn n_dofs(&self) -> usize {
        self.variables.n_dofs()
    }

    pub fn constraint_map(&self) -> Result<&ConstraintMap> {
        self.constraint_map
            .as_deref()
            .ok_or_else(|| eyre!("constraints have not been resolved; call time_update first").into())
    }

    pub fn matrix_graph(&self) -> Result<&SparsityPattern> {
        self.matrix_graph
            .as_deref()
            .ok_or_else(|| eyre!("the matrix graph has not been built; call time_update first").into())
    }

    pub fn is_linear(&self) -> bool {
        self.options.newton.linear
    }

    pub fn set_linear(&mut self, linear: bool) {
        self.options.newton.linear = linear;
    }

    pub fn set_linear_solver(&mut self, solver: Arc<dyn LinearSolver>) {
        self.linear_solver = solver;
    }

    fn integral(&self, name: &str) -> Result<&Integral> {
        self.integrals
            .iter()
            .find(|i| i.name() == name)
            .ok_or_else(|| Error::unknown("integral", name))
    }

    /// Brings all time-dependent data to the given time step.
    ///
    /// Constraints are updated first, then materials, then the equations. With `create_matrix`
    /// the constraint map and the matrix graph are rebuilt even if they are still valid.
    pub fn time_update(&mut self, time_step: TimeStep, create_matrix: bool) -> Result<()> {
        self.time_step = time_step;
        self.update_constraints(create_matrix)?;
        self.update_materials()?;
        self.update_equations(create_matrix)?;
        Ok(())
    }

    fn update_constraints(&mut self, force: bool) -> Result<()> {
        let resolved = self.constraints.resolve(
            self.active_bcs.as_deref(),
            &self.variables,
            &self.regions,
            &self.mesh,
            &self.time_step,
        )?;
        match &mut self.constraint_map {
            Some(map) if !force && map.has_same_structure(&resolved) => {
                Arc::make_mut(map).update_values(resolved);
            }
            _ => {
                self.constraint_map = Some(Arc::new(ConstraintMap::new(resolved)));
                self.evaluator = None;
            }
        }
        Ok(())
    }

    /// Activates only the named constraints, or all of them with `None`.
    pub fn select_bcs(&mut self, names: Option<&[&str]>) -> Result<()> {
        if let Some(names) = names {
            let known = self.constraints.names();
            if let Some(unknown) = names.iter().find(|name| !known.contains(name)) {
                return Err(Error::unknown("constraint", *unknown));
            }
        }
        self.active_bcs = names.map(|names| names.iter().map(|name| name.to_string()).collect());
        self.update_constraints(false)
    }

    fn ensure_geometry(&mut self, key: &GeometryKey) -> Result<()> {
        if self.geometries.contains_key(key) {
            return Ok(());
        }
        let region = self.regions.get(&key.region)?;
        let integral = self.integral(&key.integral)?;
        let mapping = if key.surface {
            Mapping::Surface(SurfaceMapping::new(&self.mesh, region, integral)?)
        } else {
            Mapping::Volume(VolumeMapping::new(&self.mesh, region, integral)?)
        };
        debug!(
            "Computed geometry of region '{}' for integral '{}'",
            key.region, key.integral
        );
        self.geometries.insert(key.clone(), Arc::new(mapping));
        Ok(())
    }

    fn update_term_materials<'a>(&mut self, terms: impl IntoIterator<Item = &'a TermInstance>) -> Result<()> {
        let mut requests = Vec::new();
        for term in terms {
            let geometry = GeometryKey::of(term);
            for (material, parameter) in term.materials() {
                requests.push((material_key(term, material, parameter), geometry.clone()));
            }
        }
        for (_, geometry) in &requests {
            self.ensure_geometry(geometry)?;
        }
        let geometries = &self.geometries;
        let requests = requests
            .into_iter()
            .map(|(key, geometry)| (key, geometries[&geometry].as_ref()));
        self.materials.time_update(&self.time_step, requests)
    }

    /// Evaluates the materials of all equations at the current time step.
    pub fn update_materials(&mut self) -> Result<()> {
        let terms: Vec<_> = self.equations.term_instances().cloned().collect();
        self.update_term_materials(&terms)
    }

    /// Clears all cached material values.
    pub fn reset_materials(&mut self) {
        self.materials.reset();
    }

    fn update_equations(&mut self, create_matrix: bool) -> Result<()> {
        self.equations
            .collect_connectivity(&self.variables, &self.regions, &self.mesh)?;
        if create_matrix || self.matrix_graph.is_none() {
            let state = self.create_state_vector();
            let terms = self.bind_terms(&state)?;
            let pattern = self.assembler.assemble_pattern(&terms, self.n_dofs())?;
            info!(
                "Built matrix graph: {} DOFs, {} non-zeros",
                self.n_dofs(),
                pattern.nnz()
            );
            self.matrix_graph = Some(Arc::new(pattern));
            self.evaluator = None;
        }
        Ok(())
    }

    /// Replaces the mesh vertex coordinates and invalidates everything that depends on them.
    pub fn set_mesh_coordinates(&mut self, vertices: Vec<Point3<f64>>) -> Result<()> {
        self.mesh.set_vertices(vertices)?;
        self.geometries.clear();
        self.materials.reset();
        self.time_update(self.time_step, false)
    }

    fn bind_term<'a>(&'a self, term: &'a TermInstance, state: &'a DVector<f64>) -> Result<BoundTerm<'a>> {
        let geometry = self
            .geometries
            .get(&GeometryKey::of(term))
            .ok_or_else(|| {
                eyre!(
                    "geometry of region '{}' for integral '{}' has not been computed",
                    term.region(),
                    term.integral()
                )
            })?;
        let region = self.regions.get(term.region())?;
        let surface = term.is_surface();

        let materials = term
            .materials()
            .iter()
            .map(|(material, parameter)| self.materials.values(&material_key(term, material, parameter)))
            .collect::<Result<Vec<_>>>()?;

        let virtual_dofs = term
            .virtual_variable()
            .map(|name| self.equations.connectivity(name, term.region(), surface))
            .transpose()?;

        let argument = |name: &'a str, values: &'a DVector<f64>| -> Result<StateArgument<'a>> {
            Ok(StateArgument {
                name,
                n_components: self.variables.dofs_of(name)?.n_components(),
                dofs: self.equations.connectivity(name, term.region(), surface)?,
                values: DVectorView::from(values),
            })
        };

        let state_argument = term.state().map(|name| argument(name, state)).transpose()?;
        let previous = match term.state() {
            Some(name) if term.term().required_history() > 0 => self
                .variables
                .previous_state(1)
                .map(|previous| argument(name, previous))
                .transpose()?,
            _ => None,
        };
        let parameter = match term.parameter() {
            Some(name) => {
                let values = match self.variables.get(name)?.kind() {
                    VariableKind::Parameter => self.variables.parameter_data(),
                    _ => state,
                };
                Some(argument(name, values)?)
            }
            None => None,
        };

        Ok(BoundTerm {
            instance: term,
            context: TermContext {
                mesh: &self.mesh,
                region,
                volume: geometry.as_volume(),
                surface: geometry.as_surface(),
                materials,
                virtual_dofs,
                state: state_argument,
                parameter,
                previous,
                time_step: self.time_step,
            },
        })
    }

    fn bind_terms<'a>(&'a self, state: &'a DVector<f64>) -> Result<Vec<BoundTerm<'a>>> {
        if state.len() != self.n_dofs() {
            return Err(eyre!(
                "state vector has length {}, expected {}",
                state.len(),
                self.n_dofs()
            )
            .into());
        }
        self.equations
            .term_instances()
            .map(|term| self.bind_term(term, state))
            .collect()
    }

    /// Assembles the full residual at a full state, without applying any constraints.
    ///
    /// Summing the result over the DOFs of a region yields the reaction at that region.
    pub fn assemble_residual(&self, state: &DVector<f64>) -> Result<DVector<f64>> {
        let terms = self.bind_terms(state)?;
        self.assembler.assemble_residual(&terms, self.n_dofs())
    }

    /// Assembles the full tangent at a full state into a matrix with the problem's matrix graph.
    pub fn assemble_tangent(&self, state: &DVector<f64>, matrix: &mut CsrMatrix<f64>) -> Result<()> {
        let terms = self.bind_terms(state)?;
        self.assembler.assemble_tangent(&terms, matrix)
    }

    /// Creates a zero matrix with the problem's matrix graph.
    pub fn create_matrix(&self) -> Result<CsrMatrix<f64>> {
        let pattern = self.matrix_graph()?.clone();
        let nnz = pattern.nnz();
        CsrMatrix::try_from_pattern_and_values(pattern, vec![0.0; nnz])
            .map_err(|err| eyre!("failed to create matrix from graph: {}", err).into())
    }

    /// Evaluates a term instance, which need not be part of any equation, at a full state.
    pub fn evaluate(&mut self, term: &TermInstance, state: &DVector<f64>) -> Result<f64> {
        term.validate()?;
        self.regions.get(term.region())?;
        self.equations
            .collect_term_connectivity(term, &self.variables, &self.regions, &self.mesh)?;
        self.ensure_geometry(&GeometryKey::of(term))?;
        self.update_term_materials(std::iter::once(term))?;
        let bound = self.bind_term(term, state)?;
        self.assembler.evaluate(&bound)
    }

    /// Returns the evaluator, creating a new one unless `reuse` is set and one exists.
    pub fn evaluator(&mut self, reuse: bool) -> Result<&mut dyn Evaluator> {
        if !reuse || self.evaluator.is_none() {
            self.evaluator = Some(self.create_evaluator()?);
        }
        match self.evaluator.as_deref_mut() {
            Some(evaluator) => Ok(evaluator),
            None => Err(eyre!("evaluator is not available").into()),
        }
    }

    fn create_evaluator(&self) -> Result<Box<dyn Evaluator>> {
        create_evaluator(self.constraint_map()?, self.matrix_graph()?)
    }

    /// Solves the nonlinear system at the current time step, starting from the full state `state0`.
    ///
    /// Returns the full solution and the Newton report. Stopping at the iteration limit is not an
    /// error; check the report status.
    pub fn solve(&mut self, state0: &DVector<f64>) -> Result<(DVector<f64>, NewtonReport<f64>)> {
        self.solve_impl(state0, &AtomicBool::new(false))
    }

    /// Same as [`Problem::solve`], but stops at the next iteration once `cancel` is set.
    pub fn solve_cancellable(
        &mut self,
        state0: &DVector<f64>,
        cancel: &AtomicBool,
    ) -> Result<(DVector<f64>, NewtonReport<f64>)> {
        self.solve_impl(state0, cancel)
    }

    fn solve_impl(
        &mut self,
        state0: &DVector<f64>,
        cancel: &AtomicBool,
    ) -> Result<(DVector<f64>, NewtonReport<f64>)> {
        let map = self
            .constraint_map
            .clone()
            .ok_or_else(|| Error::from(eyre!("constraints have not been resolved")))?;
        if state0.len() != map.n_full() {
            return Err(eyre!(
                "initial state has length {}, expected {}",
                state0.len(),
                map.n_full()
            )
            .into());
        }

        let mut evaluator = match self.evaluator.take() {
            Some(evaluator) => evaluator,
            None => self.create_evaluator()?,
        };

        let mut x = map.strip_state_vector(DVectorView::from(state0))?;
        let n = x.len();
        let mut f = DVector::zeros(n);
        let mut dx = DVector::zeros(n);
        let settings = NewtonSettings::from(&self.options.newton);

        let result = {
            let system = EvaluatorSystem::new(&*self, evaluator.as_mut(), self.linear_solver.as_ref())?;
            match self.options.newton.line_search {
                LineSearchKind::None => {
                    newton_cancellable(system, &mut x, &mut f, &mut dx, settings, &mut NoLineSearch, cancel)
                }
                LineSearchKind::Backtracking { c, alpha_min } => {
                    let mut line_search = BacktrackingLineSearch { c, alpha_min };
                    newton_cancellable(system, &mut x, &mut f, &mut dx, settings, &mut line_search, cancel)
                }
            }
        };
        self.evaluator = Some(evaluator);

        let report = result?;
        Ok((map.make_full_vec(DVectorView::from(&x)), report))
    }

    pub fn create_state_vector(&self) -> DVector<f64> {
        self.variables.create_state_vector()
    }

    /// Sets the essential DOFs to their prescribed values and copies master values to periodic slaves.
    pub fn apply_ebc(&self, state: &mut DVector<f64>) -> Result<()> {
        let map = self.constraint_map()?;
        map.apply_essential(state);
        for &(slave, master) in &map.constraints().periodic {
            state[slave] = state[master];
        }
        Ok(())
    }

    /// Adds a reduced increment to a full state: `state += E * delta`.
    pub fn update_vec(&self, state: &mut DVector<f64>, delta: DVectorView<f64>) -> Result<()> {
        let increment = self.constraint_map()?.expand(delta);
        *state += increment;
        Ok(())
    }

    /// The global DOFs of a variable at the vertices of a region.
    pub fn region_dofs(&self, variable: &str, region: &str) -> Result<Vec<usize>> {
        self.variables
            .region_dofs(variable, self.regions.get(region)?)
    }

    /// Fills the state history with copies of `state`.
    pub fn init_history(&mut self, state: &DVector<f64>) {
        self.variables.init_history(state);
    }

    /// Makes `state` the most recent previous state.
    pub fn advance(&mut self, state: &DVector<f64>) {
        self.variables.advance(state);
    }

    pub fn state_to_output(&self, state: &DVector<f64>, fill_value: f64) -> Result<Vec<VariableOutput>> {
        self.variables.state_to_output(state, &self.mesh, fill_value)
    }

    /// A time stepper for the configured time interval, optionally positioned at `step`.
    pub fn default_time_stepper(&self, step: Option<usize>) -> Result<TimeStepper> {
        let mut stepper = TimeStepper::from_settings(&self.options.time)?;
        if let Some(step) = step {
            stepper.set_step(step)?;
        }
        Ok(stepper)
    }
}
