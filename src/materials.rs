//! Material parameters and their values at quadrature points.
use crate::error::{Error, Result, TermError};
use crate::mapping::Mapping;
use crate::timestepper::TimeStep;
use eyre::eyre;
use log::debug;
use nalgebra::{DMatrix, DMatrixView, Point3};
use rustc_hash::FxHashMap;
use std::fmt;
use std::fmt::Debug;
use std::sync::Arc;

/// A parameter given as a function of the time step and the quadrature point coordinates.
pub type MaterialFunction = Arc<dyn Fn(&TimeStep, &Point3<f64>) -> DMatrix<f64> + Send + Sync>;

/// Matrix-valued data per element and quadrature point.
///
/// A leading dimension of size one broadcasts over elements (or quadrature points), so a constant
/// is stored as a single `1 x 1` array of matrices.
#[derive(Debug, Clone, PartialEq)]
pub struct QpArray {
    n_elements: usize,
    n_qp: usize,
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl QpArray {
    pub fn constant(value: &DMatrix<f64>) -> Self {
        Self {
            n_elements: 1,
            n_qp: 1,
            rows: value.nrows(),
            cols: value.ncols(),
            data: value.as_slice().to_vec(),
        }
    }

    pub fn from_scalar(value: f64) -> Self {
        Self::constant(&DMatrix::from_element(1, 1, value))
    }

    /// Stores `values` given element-major (all quadrature points of element 0 first).
    pub fn from_matrices(n_elements: usize, n_qp: usize, values: &[DMatrix<f64>]) -> eyre::Result<Self> {
        if values.len() != n_elements * n_qp {
            return Err(eyre!(
                "expected {} values ({} elements x {} quadrature points), got {}",
                n_elements * n_qp,
                n_elements,
                n_qp,
                values.len()
            ));
        }
        let (rows, cols) = values.first().map(|m| m.shape()).unwrap_or((1, 1));
        let mut data = Vec::with_capacity(values.len() * rows * cols);
        for value in values {
            if value.shape() != (rows, cols) {
                return Err(eyre!(
                    "inconsistent value shapes: {:?} and {:?}",
                    (rows, cols),
                    value.shape()
                ));
            }
            data.extend_from_slice(value.as_slice());
        }
        Ok(Self {
            n_elements,
            n_qp,
            rows,
            cols,
            data,
        })
    }

    pub fn n_elements(&self) -> usize {
        self.n_elements
    }

    pub fn n_qp(&self) -> usize {
        self.n_qp
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    fn offset(&self, element: usize, qp: usize) -> usize {
        let e = if self.n_elements == 1 { 0 } else { element };
        let q = if self.n_qp == 1 { 0 } else { qp };
        (e * self.n_qp + q) * self.rows * self.cols
    }

    pub fn get(&self, element: usize, qp: usize) -> DMatrixView<f64> {
        let offset = self.offset(element, qp);
        let len = self.rows * self.cols;
        DMatrixView::from_slice(&self.data[offset..offset + len], self.rows, self.cols)
    }

    /// The first entry of the value at the given point, for scalar parameters.
    pub fn scalar(&self, element: usize, qp: usize) -> f64 {
        self.data[self.offset(element, qp)]
    }

    /// Checks that the array broadcasts against `n_elements x n_qp` values of shape `rows x cols`.
    pub fn check_broadcast(&self, n_elements: usize, n_qp: usize, rows: usize, cols: usize) -> std::result::Result<(), TermError> {
        let elements_ok = self.n_elements == 1 || self.n_elements == n_elements;
        let qp_ok = self.n_qp == 1 || self.n_qp == n_qp;
        if elements_ok && qp_ok && (self.rows, self.cols) == (rows, cols) {
            Ok(())
        } else {
            Err(TermError::shape_mismatch(format!(
                "material array of shape ({}, {}, {}, {}) does not broadcast against ({}, {}, {}, {})",
                self.n_elements, self.n_qp, self.rows, self.cols, n_elements, n_qp, rows, cols
            )))
        }
    }
}

/// A named collection of parameters.
#[derive(Clone)]
pub struct Material {
    name: String,
    constants: Vec<(String, DMatrix<f64>)>,
    functions: Vec<(String, MaterialFunction)>,
}

impl Debug for Material {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let functions: Vec<_> = self.functions.iter().map(|(name, _)| name).collect();
        f.debug_struct("Material")
            .field("name", &self.name)
            .field("constants", &self.constants)
            .field("functions", &functions)
            .finish()
    }
}

impl Material {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constants: Vec::new(),
            functions: Vec::new(),
        }
    }

    pub fn with_scalar(self, parameter: impl Into<String>, value: f64) -> Self {
        self.with_constant(parameter, DMatrix::from_element(1, 1, value))
    }

    pub fn with_constant(mut self, parameter: impl Into<String>, value: DMatrix<f64>) -> Self {
        let parameter = parameter.into();
        self.remove(&parameter);
        self.constants.push((parameter, value));
        self
    }

    pub fn with_function<F>(mut self, parameter: impl Into<String>, function: F) -> Self
    where
        F: Fn(&TimeStep, &Point3<f64>) -> DMatrix<f64> + Send + Sync + 'static,
    {
        let parameter = parameter.into();
        self.remove(&parameter);
        self.functions.push((parameter, Arc::new(function)));
        self
    }

    fn remove(&mut self, parameter: &str) {
        self.constants.retain(|(name, _)| name != parameter);
        self.functions.retain(|(name, _)| name != parameter);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// A material without function-valued parameters never changes.
    pub fn is_stationary(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn has_parameter(&self, parameter: &str) -> bool {
        self.constants.iter().any(|(name, _)| name == parameter)
            || self.functions.iter().any(|(name, _)| name == parameter)
    }

    /// Evaluates a parameter at the quadrature points of a mapping.
    pub fn evaluate(&self, parameter: &str, time_step: &TimeStep, mapping: &Mapping) -> Result<QpArray> {
        if let Some((_, value)) = self.constants.iter().find(|(name, _)| name == parameter) {
            return Ok(QpArray::constant(value));
        }
        let (_, function) = self
            .functions
            .iter()
            .find(|(name, _)| name == parameter)
            .ok_or_else(|| Error::unknown("material parameter", format!("{}.{}", self.name, parameter)))?;
        let values: Vec<_> = mapping
            .quadrature_points()
            .iter()
            .map(|x| function(time_step, x))
            .collect();
        let array = QpArray::from_matrices(mapping.num_elements(), mapping.num_quadrature_points(), &values)
            .map_err(|err| {
                TermError::shape_mismatch(format!(
                    "parameter '{}' of material '{}': {}",
                    parameter, self.name, err
                ))
            })?;
        Ok(array)
    }
}

/// Identifies the values of one material parameter on a region for an integral.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MaterialKey {
    pub material: String,
    pub parameter: String,
    pub region: String,
    pub integral: String,
    pub surface: bool,
}

/// All materials of a problem and the cache of their quadrature point values.
#[derive(Debug, Clone, Default)]
pub struct Materials {
    materials: Vec<Material>,
    cache: FxHashMap<MaterialKey, Arc<QpArray>>,
}

impl Materials {
    pub fn new(materials: Vec<Material>) -> Result<Self> {
        for (i, material) in materials.iter().enumerate() {
            if materials[..i].iter().any(|m| m.name == material.name) {
                return Err(eyre!("material '{}' is defined more than once", material.name).into());
            }
        }
        Ok(Self {
            materials,
            cache: FxHashMap::default(),
        })
    }

    pub fn get(&self, name: &str) -> Result<&Material> {
        self.materials
            .iter()
            .find(|m| m.name == name)
            .ok_or_else(|| Error::unknown("material", name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Material> {
        self.materials.iter()
    }

    /// Recomputes the requested values. Values of stationary materials that are already cached are kept.
    pub fn time_update<'a>(
        &mut self,
        time_step: &TimeStep,
        requests: impl IntoIterator<Item = (MaterialKey, &'a Mapping)>,
    ) -> Result<()> {
        let mut n_updated = 0;
        for (key, mapping) in requests {
            let material = self.get(&key.material)?;
            if material.is_stationary() && self.cache.contains_key(&key) {
                continue;
            }
            let values = material.evaluate(&key.parameter, time_step, mapping)?;
            self.cache.insert(key, Arc::new(values));
            n_updated += 1;
        }
        debug!("Updated {} material parameter arrays", n_updated);
        Ok(())
    }

    /// The cached values for a key, which must have been part of a previous update.
    pub fn values(&self, key: &MaterialKey) -> Result<Arc<QpArray>> {
        self.cache.get(key).cloned().ok_or_else(|| {
            eyre!(
                "parameter '{}.{}' has not been evaluated on region '{}' with integral '{}'",
                key.material,
                key.parameter,
                key.region,
                key.integral
            )
            .into()
        })
    }

    pub fn num_cached(&self) -> usize {
        self.cache.len()
    }

    /// Drops all cached values, forcing re-evaluation on the next update.
    pub fn reset(&mut self) {
        self.cache.clear();
    }
}
