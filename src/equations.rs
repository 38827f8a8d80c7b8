//! Term instances, equations and their cached connectivity.
use crate::error::{Error, Result};
use crate::mesh::Mesh;
use crate::region::Regions;
use crate::term::{ArgType, Integration, Term};
use crate::variables::{ElementDofs, VariableKind, Variables};
use eyre::eyre;
use log::info;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// A term bound to a region, an integral and its arguments.
#[derive(Debug, Clone)]
pub struct TermInstance {
    term: Arc<dyn Term>,
    integral: String,
    region: String,
    coefficient: f64,
    /// `(material, parameter)` for each material slot.
    materials: Vec<(String, String)>,
    virtual_variable: Option<String>,
    state: Option<String>,
    parameter: Option<String>,
}

impl TermInstance {
    pub fn new(term: impl Term + 'static, integral: impl Into<String>, region: impl Into<String>) -> Self {
        Self::from_arc(Arc::new(term), integral, region)
    }

    pub fn from_arc(term: Arc<dyn Term>, integral: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            term,
            integral: integral.into(),
            region: region.into(),
            coefficient: 1.0,
            materials: Vec::new(),
            virtual_variable: None,
            state: None,
            parameter: None,
        }
    }

    pub fn with_coefficient(mut self, coefficient: f64) -> Self {
        self.coefficient = coefficient;
        self
    }

    /// Binds the next material slot to `material.parameter`.
    pub fn with_material(mut self, material: impl Into<String>, parameter: impl Into<String>) -> Self {
        self.materials.push((material.into(), parameter.into()));
        self
    }

    pub fn with_virtual(mut self, variable: impl Into<String>) -> Self {
        self.virtual_variable = Some(variable.into());
        self
    }

    pub fn with_state(mut self, variable: impl Into<String>) -> Self {
        self.state = Some(variable.into());
        self
    }

    pub fn with_parameter(mut self, variable: impl Into<String>) -> Self {
        self.parameter = Some(variable.into());
        self
    }

    pub fn term(&self) -> &dyn Term {
        self.term.as_ref()
    }

    pub fn integral(&self) -> &str {
        &self.integral
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn coefficient(&self) -> f64 {
        self.coefficient
    }

    pub fn materials(&self) -> &[(String, String)] {
        &self.materials
    }

    pub fn virtual_variable(&self) -> Option<&str> {
        self.virtual_variable.as_deref()
    }

    pub fn state(&self) -> Option<&str> {
        self.state.as_deref()
    }

    pub fn parameter(&self) -> Option<&str> {
        self.parameter.as_deref()
    }

    pub fn is_surface(&self) -> bool {
        self.term.integration() == Integration::Surface
    }

    /// Checks the bound arguments against the argument slots of the term.
    pub fn validate(&self) -> eyre::Result<()> {
        let args = self.term.arg_types();
        let count = |kind: ArgType| args.iter().filter(|&&arg| arg == kind).count();
        let name = self.term.name();
        if count(ArgType::Material) != self.materials.len() {
            return Err(eyre!(
                "term '{}' takes {} material arguments, but {} were given",
                name,
                count(ArgType::Material),
                self.materials.len()
            ));
        }
        let check_slot = |kind: ArgType, bound: bool| {
            let expected = count(kind) > 0;
            if expected != bound {
                Err(eyre!(
                    "term '{}': {:?} argument {}",
                    name,
                    kind,
                    if expected { "is missing" } else { "is not accepted" }
                ))
            } else {
                Ok(())
            }
        };
        check_slot(ArgType::Virtual, self.virtual_variable.is_some())?;
        check_slot(ArgType::State, self.state.is_some())?;
        check_slot(ArgType::Parameter, self.parameter.is_some())?;
        Ok(())
    }
}

/// A weak-form equation: the sum of its term instances, all tested with the same variable.
#[derive(Debug, Clone)]
pub struct Equation {
    name: String,
    terms: Vec<TermInstance>,
}

impl Equation {
    pub fn new(name: impl Into<String>, terms: Vec<TermInstance>) -> eyre::Result<Self> {
        let name = name.into();
        if terms.is_empty() {
            return Err(eyre!("equation '{}' has no terms", name));
        }
        for term in &terms {
            term.validate()?;
        }
        let virtuals: Vec<_> = terms.iter().map(TermInstance::virtual_variable).collect();
        if virtuals.iter().any(Option::is_none) || virtuals.windows(2).any(|pair| pair[0] != pair[1]) {
            return Err(eyre!(
                "all terms of equation '{}' must be tested with the same virtual variable",
                name
            ));
        }
        Ok(Self { name, terms })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn terms(&self) -> &[TermInstance] {
        &self.terms
    }

    pub fn virtual_variable(&self) -> &str {
        self.terms[0].virtual_variable().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ConnectivityKey {
    variable: String,
    region: String,
    surface: bool,
}

/// The equations of a problem, in definition order, with cached element connectivity.
#[derive(Debug, Clone, Default)]
pub struct Equations {
    equations: Vec<Equation>,
    connectivity: FxHashMap<ConnectivityKey, Arc<ElementDofs>>,
}

impl Equations {
    pub fn new(equations: Vec<Equation>) -> Self {
        Self {
            equations,
            connectivity: FxHashMap::default(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Equation> {
        self.equations.iter()
    }

    pub fn len(&self) -> usize {
        self.equations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.equations.is_empty()
    }

    /// All term instances in summation order.
    pub fn term_instances(&self) -> impl Iterator<Item = &TermInstance> {
        self.equations.iter().flat_map(|eq| eq.terms.iter())
    }

    /// Checks that all referenced variables and regions exist and that the variable kinds fit their slots.
    pub fn check_references(&self, variables: &Variables, regions: &Regions) -> Result<()> {
        for term in self.term_instances() {
            regions.get(term.region())?;
            if let Some(name) = term.virtual_variable() {
                if !matches!(variables.get(name)?.kind(), VariableKind::Test { .. }) {
                    return Err(eyre!("variable '{}' is used as virtual argument but is not a test variable", name).into());
                }
            }
            if let Some(name) = term.state() {
                if !variables.get(name)?.is_unknown() {
                    return Err(eyre!("variable '{}' is used as state argument but is not an unknown", name).into());
                }
            }
            if let Some(name) = term.parameter() {
                variables.get(name)?;
            }
        }
        Ok(())
    }

    /// Builds the element DOF tables of every (variable, region) pair used by the terms.
    ///
    /// Tables that are already cached are reused. The DOF layout is fixed once the problem is built.
    pub fn collect_connectivity(&mut self, variables: &Variables, regions: &Regions, mesh: &Mesh) -> Result<()> {
        let keys: Vec<_> = self.term_instances().flat_map(connectivity_keys).collect();
        let n_built = self.build_connectivity(keys, variables, regions, mesh)?;
        if n_built > 0 {
            info!("Built {} element connectivity tables", n_built);
        }
        Ok(())
    }

    /// Builds the element DOF tables of a single term instance, which need not be part of any equation.
    pub fn collect_term_connectivity(
        &mut self,
        term: &TermInstance,
        variables: &Variables,
        regions: &Regions,
        mesh: &Mesh,
    ) -> Result<()> {
        self.build_connectivity(connectivity_keys(term), variables, regions, mesh)?;
        Ok(())
    }

    fn build_connectivity(
        &mut self,
        keys: impl IntoIterator<Item = ConnectivityKey>,
        variables: &Variables,
        regions: &Regions,
        mesh: &Mesh,
    ) -> Result<usize> {
        let mut n_built = 0;
        for key in keys {
            if self.connectivity.contains_key(&key) {
                continue;
            }
            let dofs = variables.dofs_of(&key.variable)?;
            let region = regions.get(&key.region)?;
            let table = ElementDofs::for_region(dofs, mesh, region, key.surface)?;
            self.connectivity.insert(key, Arc::new(table));
            n_built += 1;
        }
        Ok(n_built)
    }

    pub fn connectivity(&self, variable: &str, region: &str, surface: bool) -> Result<&ElementDofs> {
        let key = ConnectivityKey {
            variable: variable.to_string(),
            region: region.to_string(),
            surface,
        };
        self.connectivity
            .get(&key)
            .map(|table| table.as_ref())
            .ok_or_else(|| {
                Error::from(eyre!(
                    "no connectivity for variable '{}' on region '{}'; it must be collected first",
                    variable,
                    region
                ))
            })
    }

    pub fn num_connectivity_tables(&self) -> usize {
        self.connectivity.len()
    }
}

fn connectivity_keys(term: &TermInstance) -> Vec<ConnectivityKey> {
    [term.virtual_variable(), term.state(), term.parameter()]
        .into_iter()
        .flatten()
        .map(|variable| ConnectivityKey {
            variable: variable.to_string(),
            region: term.region().to_string(),
            surface: term.is_surface(),
        })
        .collect()
}
