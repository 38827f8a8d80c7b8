use crate::assembly::local::ElementConnectivityAssembler;
use crate::error::{Error, Result};
use eyre::eyre;
use nalgebra::DVector;
use nalgebra_sparse::csr::CsrRowMut;
use nalgebra_sparse::pattern::SparsityPattern;
use rayon::slice::ParallelSliceMut;

/// Builds the sparsity pattern (matrix graph) of the union of the element blocks of all assemblers.
pub fn assemble_pattern(
    n_rows: usize,
    n_cols: usize,
    element_assemblers: &[&dyn ElementConnectivityAssembler],
) -> Result<SparsityPattern> {
    let mut matrix_entries = Vec::new();
    for assembler in element_assemblers {
        for element in 0..assembler.num_elements() {
            for &i in assembler.row_dofs(element) {
                for &j in assembler.col_dofs(element) {
                    matrix_entries.push((i, j));
                }
            }
        }
    }

    pattern_from_entries(n_rows, n_cols, matrix_entries)
}

/// Builds a sparsity pattern from (row, column) entries in arbitrary order, possibly with duplicates.
pub fn pattern_from_entries(n_rows: usize, n_cols: usize, mut matrix_entries: Vec<(usize, usize)>) -> Result<SparsityPattern> {
    // Duplicates are common, since neighboring elements share DOFs
    matrix_entries.par_sort_unstable();
    matrix_entries.dedup();

    let mut offsets = Vec::with_capacity(n_rows + 1);
    let mut column_indices = Vec::with_capacity(matrix_entries.len());
    offsets.push(0);
    for (i, j) in matrix_entries {
        while i + 1 > offsets.len() {
            // Loop to correctly handle consecutive empty rows
            offsets.push(column_indices.len());
        }
        column_indices.push(j);
    }
    while offsets.len() < n_rows + 1 {
        offsets.push(column_indices.len());
    }

    SparsityPattern::try_from_offsets_and_indices(n_rows, n_cols, offsets, column_indices)
        .map_err(|err| Error::from(eyre!("invalid matrix graph: {}", err)))
}

/// Adds a row of a local element block to the corresponding row of a CSR matrix.
///
/// `col_dofs`: The global column indices of the block columns.
/// `sorted_permutation`: Local column indices ordered such that the corresponding global indices are sorted.
/// `local_entry`: Value of the block at a local column index in this row.
pub fn add_element_row_to_csr_row(
    row: &mut CsrRowMut<f64>,
    row_index: usize,
    col_dofs: &[usize],
    sorted_permutation: &[usize],
    local_entry: impl Fn(usize) -> f64,
) -> Result<()> {
    assert_eq!(col_dofs.len(), sorted_permutation.len());

    let (column_indices, values) = row.cols_and_values_mut();
    let mut csr_col_idx_iter = column_indices.iter().copied().enumerate();

    for &local_col in sorted_permutation {
        let global_col = col_dofs[local_col];
        let (csr_idx, _) = csr_col_idx_iter
            .find(|&(_, csr_col)| csr_col == global_col)
            .ok_or(Error::MissingMatrixEntry {
                row: row_index,
                col: global_col,
            })?;
        values[csr_idx] += local_entry(local_col);
    }
    Ok(())
}

/// Adds a local element vector to the entries of a global vector.
pub fn add_element_vector(global: &mut DVector<f64>, dofs: &[usize], local: &[f64]) {
    assert_eq!(dofs.len(), local.len());
    for (&dof, &value) in dofs.iter().zip(local) {
        global[dof] += value;
    }
}
