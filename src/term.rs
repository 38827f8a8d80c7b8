//! The element-level contract between the assembler and the physics.
//!
//! A [`Term`] computes, for a chunk of consecutive elements of a region, either the local residual
//! vectors, the local tangent blocks with respect to one state variable, or one scalar per element.
//! It only reads from its [`TermContext`] and writes into caller-supplied [`ElementBlocks`].
use crate::error::TermError;
use crate::mapping::{SurfaceMapping, VolumeMapping};
use crate::materials::QpArray;
use crate::mesh::Mesh;
use crate::region::Region;
use crate::timestepper::TimeStep;
use crate::variables::ElementDofs;
use nalgebra::{DMatrixViewMut, DVectorView, DVectorViewMut};
use std::fmt::Debug;
use std::ops::Range;
use std::sync::Arc;

/// The kind of an argument slot of a term.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ArgType {
    Material,
    /// The test variable the term is tested against.
    Virtual,
    /// The unknown the term depends on.
    State,
    /// A variable whose values enter the term but which is not differentiated.
    Parameter,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Integration {
    Volume,
    Surface,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EvaluationMode<'a> {
    /// Local residual vectors, one per element, of length `n_virtual_local`.
    Residual,
    /// Local tangent blocks `n_virtual_local x n_state_local` with respect to the named variable.
    Tangent { wrt: &'a str },
    /// One scalar per element.
    Evaluate,
}

/// A range of consecutive element positions within a region.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ElementChunk {
    pub start: usize,
    pub len: usize,
}

impl ElementChunk {
    pub fn range(&self) -> Range<usize> {
        self.start..self.start + self.len
    }
}

/// Splits `0..n_elements` into chunks of at most `chunk_size` elements, in ascending order.
#[derive(Debug, Clone)]
pub struct ElementChunks {
    n_elements: usize,
    chunk_size: usize,
    next: usize,
}

impl ElementChunks {
    pub fn new(n_elements: usize, chunk_size: usize) -> Self {
        Self {
            n_elements,
            chunk_size: chunk_size.max(1),
            next: 0,
        }
    }
}

impl Iterator for ElementChunks {
    type Item = ElementChunk;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.n_elements {
            return None;
        }
        let start = self.next;
        let len = self.chunk_size.min(self.n_elements - start);
        self.next += len;
        Some(ElementChunk { start, len })
    }
}

/// Values of a variable together with its element connectivity.
#[derive(Debug, Clone)]
pub struct StateArgument<'a> {
    pub name: &'a str,
    pub n_components: usize,
    pub dofs: &'a ElementDofs,
    /// The vector the connectivity indexes into, e.g. the full state vector.
    pub values: DVectorView<'a, f64>,
}

impl<'a> StateArgument<'a> {
    /// Copies the local values of an element into `local`, which must have length `n_local`.
    pub fn gather(&self, element: usize, local: &mut [f64]) {
        let dofs = self.dofs.element(element);
        assert_eq!(local.len(), dofs.len());
        for (local_value, &dof) in local.iter_mut().zip(dofs) {
            *local_value = self.values[dof];
        }
    }
}

/// Everything a term may read while computing element contributions.
#[derive(Debug, Clone)]
pub struct TermContext<'a> {
    pub mesh: &'a Mesh,
    pub region: &'a Region,
    pub volume: Option<&'a VolumeMapping>,
    pub surface: Option<&'a SurfaceMapping>,
    /// Values of the material slots, in the order of the term's material arguments.
    pub materials: Vec<Arc<QpArray>>,
    pub virtual_dofs: Option<&'a ElementDofs>,
    pub state: Option<StateArgument<'a>>,
    pub parameter: Option<StateArgument<'a>>,
    /// The state variable at the previous time step.
    pub previous: Option<StateArgument<'a>>,
    pub time_step: TimeStep,
}

impl<'a> TermContext<'a> {
    pub fn volume(&self) -> Result<&'a VolumeMapping, TermError> {
        self.volume
            .ok_or_else(|| TermError::shape_mismatch("term requires a volume (cell) integral"))
    }

    pub fn surface(&self) -> Result<&'a SurfaceMapping, TermError> {
        self.surface
            .ok_or_else(|| TermError::shape_mismatch("term requires a surface (facet) integral"))
    }

    pub fn state(&self) -> Result<&StateArgument<'a>, TermError> {
        self.state
            .as_ref()
            .ok_or_else(|| TermError::shape_mismatch("term requires a state argument"))
    }

    pub fn parameter(&self) -> Result<&StateArgument<'a>, TermError> {
        self.parameter
            .as_ref()
            .ok_or_else(|| TermError::shape_mismatch("term requires a parameter argument"))
    }

    pub fn previous(&self) -> Result<&StateArgument<'a>, TermError> {
        self.previous
            .as_ref()
            .ok_or_else(|| TermError::shape_mismatch("term requires the state of the previous time step"))
    }

    pub fn material(&self, slot: usize) -> Result<&QpArray, TermError> {
        self.materials
            .get(slot)
            .map(|array| array.as_ref())
            .ok_or_else(|| TermError::shape_mismatch(format!("missing material argument {}", slot)))
    }

    /// A material slot, checked to broadcast against the volume or surface mapping.
    pub fn material_checked(&self, slot: usize, rows: usize, cols: usize) -> Result<&QpArray, TermError> {
        let array = self.material(slot)?;
        let (n_elements, n_qp) = match (self.volume, self.surface) {
            (Some(mapping), _) => (mapping.num_elements(), mapping.num_quadrature_points()),
            (None, Some(mapping)) => (mapping.num_elements(), mapping.num_quadrature_points()),
            (None, None) => return Err(TermError::shape_mismatch("no geometry available")),
        };
        array.check_broadcast(n_elements, n_qp, rows, cols)?;
        Ok(array)
    }

    /// Number of components of the virtual variable, given the element layout of three nodes.
    pub fn virtual_components(&self) -> Result<usize, TermError> {
        self.virtual_dofs
            .map(|dofs| dofs.n_local() / 3)
            .ok_or_else(|| TermError::shape_mismatch("term requires a virtual argument"))
    }
}

/// Output storage for the element contributions of one chunk.
///
/// Holds `len` column-major blocks of `rows x cols` entries and is reused between chunks.
#[derive(Debug, Clone, Default)]
pub struct ElementBlocks {
    rows: usize,
    cols: usize,
    len: usize,
    data: Vec<f64>,
}

impl ElementBlocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resizes to `len` zeroed blocks of shape `rows x cols`.
    pub fn reset(&mut self, len: usize, rows: usize, cols: usize) {
        self.rows = rows;
        self.cols = cols;
        self.len = len;
        self.data.clear();
        self.data.resize(len * rows * cols, 0.0);
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    fn block_range(&self, index: usize) -> Range<usize> {
        let size = self.rows * self.cols;
        size * index..size * (index + 1)
    }

    pub fn block(&self, index: usize) -> &[f64] {
        &self.data[self.block_range(index)]
    }

    pub fn matrix_mut(&mut self, index: usize) -> DMatrixViewMut<f64> {
        let range = self.block_range(index);
        let (rows, cols) = (self.rows, self.cols);
        DMatrixViewMut::from_slice(&mut self.data[range], rows, cols)
    }

    pub fn vector_mut(&mut self, index: usize) -> DVectorViewMut<f64> {
        let range = self.block_range(index);
        DVectorViewMut::from_slice(&mut self.data[range.clone()], range.len())
    }

    pub fn scalar_mut(&mut self, index: usize) -> &mut f64 {
        let range = self.block_range(index);
        &mut self.data[range.start]
    }

    pub fn scale(&mut self, factor: f64) {
        self.data.iter_mut().for_each(|value| *value *= factor);
    }
}

/// An element-level contribution to a weak form.
pub trait Term: Send + Sync + Debug {
    fn name(&self) -> &str;

    /// The argument slots of the term, in order.
    fn arg_types(&self) -> &[ArgType];

    fn integration(&self) -> Integration {
        Integration::Volume
    }

    /// Number of previous states of the state variable the term reads.
    fn required_history(&self) -> usize {
        0
    }

    /// Computes the contributions of the elements in `chunk` into `output`.
    ///
    /// `output` has been reset to `chunk.len` zeroed blocks of the shape implied by `mode`.
    fn evaluate(
        &self,
        mode: EvaluationMode,
        context: &TermContext,
        chunk: ElementChunk,
        output: &mut ElementBlocks,
    ) -> Result<(), TermError>;
}
