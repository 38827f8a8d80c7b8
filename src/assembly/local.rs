use crate::variables::ElementDofs;

/// Row and column DOFs of the element blocks produced by one term.
pub trait ElementConnectivityAssembler {
    fn num_elements(&self) -> usize;

    fn row_dofs(&self, element: usize) -> &[usize];

    fn col_dofs(&self, element: usize) -> &[usize];
}

impl ElementConnectivityAssembler for ElementDofs {
    fn num_elements(&self) -> usize {
        ElementDofs::num_elements(self)
    }

    fn row_dofs(&self, element: usize) -> &[usize] {
        self.element(element)
    }

    fn col_dofs(&self, element: usize) -> &[usize] {
        self.element(element)
    }
}

/// Couples the test DOFs of a term (rows) with the DOFs of its state variable (columns).
#[derive(Debug, Clone, Copy)]
pub struct BlockConnectivity<'a> {
    pub rows: &'a ElementDofs,
    pub cols: &'a ElementDofs,
}

impl<'a> ElementConnectivityAssembler for BlockConnectivity<'a> {
    fn num_elements(&self) -> usize {
        debug_assert_eq!(self.rows.num_elements(), self.cols.num_elements());
        self.rows.num_elements()
    }

    fn row_dofs(&self, element: usize) -> &[usize] {
        self.rows.element(element)
    }

    fn col_dofs(&self, element: usize) -> &[usize] {
        self.cols.element(element)
    }
}
