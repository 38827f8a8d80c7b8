//! Global assembly of residual vectors, tangent matrices and scalar evaluations.
//!
//! Contributions are summed in a fixed order: term instances in the given order (equations in
//! definition order, terms in definition order), element chunks by ascending element position in
//! the region, and local rows in ascending order within each element. Element kernels of a term may
//! run in parallel, one task per chunk, but their results are always scattered serially in this
//! order, so the assembled values do not depend on the number of threads.
use crate::config::AssemblySettings;
use crate::equations::TermInstance;
use crate::error::{Error, Result, TermError};
use crate::term::{ElementBlocks, ElementChunk, ElementChunks, EvaluationMode, TermContext};
use crate::variables::ElementDofs;
use log::debug;
use nalgebra::DVector;
use nalgebra_sparse::pattern::SparsityPattern;
use nalgebra_sparse::CsrMatrix;
use rayon::prelude::*;

pub mod global;
pub mod local;

use global::{add_element_row_to_csr_row, add_element_vector, assemble_pattern};
use local::{BlockConnectivity, ElementConnectivityAssembler};

/// A term instance together with the data it is evaluated on.
#[derive(Debug, Clone)]
pub struct BoundTerm<'a> {
    pub instance: &'a TermInstance,
    pub context: TermContext<'a>,
}

impl<'a> BoundTerm<'a> {
    fn num_elements(&self) -> usize {
        match (self.context.volume, self.context.surface) {
            (Some(mapping), _) => mapping.num_elements(),
            (None, Some(mapping)) => mapping.num_elements(),
            (None, None) => 0,
        }
    }

    fn virtual_dofs(&self) -> Result<&'a ElementDofs> {
        self.context.virtual_dofs.ok_or_else(|| {
            self.in_context(TermError::shape_mismatch("term has no virtual argument"))
                .into()
        })
    }

    fn in_context(&self, err: TermError) -> TermError {
        err.in_context(self.instance.term().name(), self.instance.region())
    }
}

/// Row/column connectivity of the tangent blocks of a bound term, if the term has a state argument.
fn tangent_connectivity<'a>(term: &BoundTerm<'a>) -> Result<Option<BlockConnectivity<'a>>> {
    match &term.context.state {
        Some(state) => Ok(Some(BlockConnectivity {
            rows: term.virtual_dofs()?,
            cols: state.dofs,
        })),
        None => Ok(None),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assembler {
    settings: AssemblySettings,
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new(AssemblySettings::default())
    }
}

impl Assembler {
    pub fn new(settings: AssemblySettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &AssemblySettings {
        &self.settings
    }

    /// Computes the coefficient-scaled element blocks of one term, chunk by chunk, in ascending order.
    fn compute_blocks(
        &self,
        term: &BoundTerm,
        mode: EvaluationMode,
        rows: usize,
        cols: usize,
    ) -> Result<Vec<(ElementChunk, ElementBlocks)>> {
        let chunks: Vec<_> = ElementChunks::new(term.num_elements(), self.settings.chunk_size).collect();
        let coefficient = term.instance.coefficient();
        let kernel = |chunk: ElementChunk| -> std::result::Result<(ElementChunk, ElementBlocks), TermError> {
            let mut blocks = ElementBlocks::new();
            blocks.reset(chunk.len, rows, cols);
            term.instance
                .term()
                .evaluate(mode, &term.context, chunk, &mut blocks)
                .map_err(|err| term.in_context(err))?;
            if coefficient != 1.0 {
                blocks.scale(coefficient);
            }
            Ok((chunk, blocks))
        };

        // Collecting in chunk order makes the first error (in element order) the reported one
        let results: Vec<_> = if self.settings.parallel {
            chunks.into_par_iter().map(kernel).collect()
        } else {
            chunks.into_iter().map(kernel).collect()
        };
        results
            .into_iter()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    /// Builds the matrix graph of the tangent: the union of all (test DOF, state DOF) element couplings.
    pub fn assemble_pattern(&self, terms: &[BoundTerm], n_dofs: usize) -> Result<SparsityPattern> {
        let connectivity: Vec<_> = terms
            .iter()
            .map(tangent_connectivity)
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .flatten()
            .collect();
        let assemblers: Vec<&dyn ElementConnectivityAssembler> = connectivity
            .iter()
            .map(|c| c as &dyn ElementConnectivityAssembler)
            .collect();
        let pattern = assemble_pattern(n_dofs, n_dofs, &assemblers)?;
        debug!("Assembled matrix graph with {} non-zeros for {} DOFs", pattern.nnz(), n_dofs);
        Ok(pattern)
    }

    /// Assembles the full residual vector of length `n_dofs`.
    pub fn assemble_residual(&self, terms: &[BoundTerm], n_dofs: usize) -> Result<DVector<f64>> {
        let mut residual = DVector::zeros(n_dofs);
        for term in terms {
            let virtual_dofs = term.virtual_dofs()?;
            let blocks = self.compute_blocks(term, EvaluationMode::Residual, virtual_dofs.n_local(), 1)?;
            for (chunk, blocks) in &blocks {
                for (i, element) in chunk.range().enumerate() {
                    add_element_vector(&mut residual, virtual_dofs.element(element), blocks.block(i));
                }
            }
        }
        Ok(residual)
    }

    /// Assembles the tangent into `matrix`, whose pattern must contain all element couplings.
    ///
    /// Every term with a state argument is differentiated with respect to its state variable.
    pub fn assemble_tangent(&self, terms: &[BoundTerm], matrix: &mut CsrMatrix<f64>) -> Result<()> {
        matrix.values_mut().fill(0.0);
        let mut permutation = Vec::new();
        for term in terms {
            let (connectivity, state_name) = match (tangent_connectivity(term)?, &term.context.state) {
                (Some(connectivity), Some(state)) => (connectivity, state.name),
                _ => continue,
            };
            let rows = connectivity.rows.n_local();
            let cols = connectivity.cols.n_local();
            let mode = EvaluationMode::Tangent { wrt: state_name };
            let blocks = self.compute_blocks(term, mode, rows, cols)?;
            for (chunk, blocks) in &blocks {
                for (i, element) in chunk.range().enumerate() {
                    let row_dofs = connectivity.row_dofs(element);
                    let col_dofs = connectivity.col_dofs(element);
                    permutation.clear();
                    permutation.extend(0..col_dofs.len());
                    permutation.sort_unstable_by_key(|&local| col_dofs[local]);

                    // Column-major block
                    let block = blocks.block(i);
                    for (local_row, &global_row) in row_dofs.iter().enumerate() {
                        let mut csr_row = matrix.row_mut(global_row);
                        add_element_row_to_csr_row(&mut csr_row, global_row, col_dofs, &permutation, |local_col| {
                            block[local_col * rows + local_row]
                        })?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Sums the element scalars of an evaluation term.
    pub fn evaluate(&self, term: &BoundTerm) -> Result<f64> {
        let blocks = self.compute_blocks(term, EvaluationMode::Evaluate, 1, 1)?;
        Ok(blocks
            .iter()
            .flat_map(|(chunk, blocks)| (0..chunk.len).map(move |i| blocks.block(i)[0]))
            .sum())
    }
}
