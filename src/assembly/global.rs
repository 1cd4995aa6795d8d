use crate::assembly::local::{ElementConnectivityAssembler, ElementMatrixAssembler};
use eyre::eyre;
use joule_sparse::ops::{diagonal, extract_submatrix, spmv};
use joule_sparse::CsrMatrix;
use nalgebra::{DMatrix, DMatrixViewMut, DVector, DVectorView, DVectorViewMut};
use nalgebra_sparse::pattern::SparsityPattern;
use rayon::slice::ParallelSliceMut;
use std::cell::RefCell;
use std::sync::Arc;

/// An assembler for CSR matrices.
#[derive(Debug, Clone, Default)]
pub struct CsrAssembler {
    // All members are buffers that help prevent unnecessary allocations
    // when assembling multiple matrices with the same assembler
    workspace: RefCell<CsrAssemblerWorkspace>,
}

#[derive(Debug, Clone)]
struct CsrAssemblerWorkspace {
    connectivity_permutation: Vec<usize>,
    element_global_nodes: Vec<usize>,
    element_matrix: DMatrix<f64>,
}

impl Default for CsrAssemblerWorkspace {
    fn default() -> Self {
        Self {
            connectivity_permutation: Vec::new(),
            element_global_nodes: Vec::new(),
            element_matrix: DMatrix::zeros(0, 0),
        }
    }
}

impl CsrAssembler {
    pub fn assemble_pattern(&self, element_assembler: &dyn ElementConnectivityAssembler) -> eyre::Result<SparsityPattern> {
        let mut coordinates = Vec::new();
        let mut index_workspace = Vec::new();
        for element_idx in 0..element_assembler.num_elements() {
            let node_count = element_assembler.element_node_count(element_idx);
            index_workspace.resize(node_count, 0);
            element_assembler.populate_element_nodes(&mut index_workspace, element_idx);

            for &node_i in &index_workspace {
                for &node_j in &index_workspace {
                    coordinates.push((node_i, node_j));
                }
            }
        }

        coordinates.par_sort_unstable();
        coordinates.dedup();

        let num_rows = element_assembler.num_nodes();
        let mut row_offsets = Vec::with_capacity(num_rows + 1);
        let mut column_indices = Vec::with_capacity(coordinates.len());
        row_offsets.push(0);

        let mut current_row = 0;
        for (i, j) in coordinates {
            if i >= num_rows {
                return Err(eyre!("element node {} out of bounds ({} nodes)", i, num_rows));
            }
            while i > current_row {
                row_offsets.push(column_indices.len());
                current_row += 1;
            }
            column_indices.push(j);
        }

        // Fill out offsets for remaining empty rows
        while row_offsets.len() < num_rows + 1 {
            row_offsets.push(column_indices.len());
        }

        SparsityPattern::try_from_offsets_and_indices(num_rows, num_rows, row_offsets, column_indices)
            .map_err(|err| eyre!("invalid sparsity pattern: {}", err))
    }

    pub fn assemble(&self, element_assembler: &dyn ElementMatrixAssembler) -> eyre::Result<CsrMatrix<f64>> {
        let pattern = self.assemble_pattern(element_assembler.as_connectivity_assembler())?;
        let initial_matrix_values = vec![0.0; pattern.nnz()];
        let mut matrix = CsrMatrix::try_from_pattern_and_values(pattern, initial_matrix_values)
            .map_err(|err| eyre!("invalid CSR matrix: {}", err))?;
        self.assemble_into_csr(&mut matrix, element_assembler)?;
        Ok(matrix)
    }

    pub fn assemble_into_csr(
        &self,
        csr: &mut CsrMatrix<f64>,
        element_assembler: &dyn ElementMatrixAssembler,
    ) -> eyre::Result<()> {
        // Reuse previously allocated buffers
        let ws = &mut *self.workspace.borrow_mut();
        let connectivity_permutation = &mut ws.connectivity_permutation;
        let element_global_nodes = &mut ws.element_global_nodes;
        let element_matrix = &mut ws.element_matrix;

        for i in 0..element_assembler.num_elements() {
            let element_node_count = element_assembler.element_node_count(i);

            element_global_nodes.resize(element_node_count, 0);
            element_matrix.resize_mut(element_node_count, element_node_count, 0.0);
            element_matrix.fill(0.0);

            let matrix_view = DMatrixViewMut::from(&mut *element_matrix);
            element_assembler.assemble_element_matrix_into(i, matrix_view)?;
            element_assembler.populate_element_nodes(element_global_nodes, i);

            connectivity_permutation.clear();
            connectivity_permutation.extend(0..element_node_count);
            connectivity_permutation.sort_unstable_by_key(|i| element_global_nodes[*i]);

            for (local_row_index, &global_row_index) in element_global_nodes.iter().enumerate() {
                let mut csr_row = csr.row_mut(global_row_index);
                let (column_indices, values) = csr_row.cols_and_values_mut();
                let mut csr_col_idx_iter = column_indices.iter().copied().enumerate();

                for &local_col_index in connectivity_permutation.iter() {
                    let global_col_index = element_global_nodes[local_col_index];
                    // Columns are visited in increasing order, so a single forward scan suffices
                    let (local_csr_col_idx, _) = csr_col_idx_iter
                        .find(|(_, csr_col_idx)| *csr_col_idx == global_col_index)
                        .ok_or_else(|| eyre!("column {} missing from CSR row {}", global_col_index, global_row_index))?;
                    values[local_csr_col_idx] += element_matrix[(local_row_index, local_col_index)];
                }
            }
        }

        Ok(())
    }
}

/// A symmetric system with essential degrees of freedom removed.
///
/// Free degrees of freedom whose diagonal entry is zero are *inactive*: for a positive
/// semi-definite matrix their entire row and column vanish, so they are removed from the
/// system as well and set to zero on expansion. This happens for the potential in regions of
/// zero conductivity.
#[derive(Debug, Clone)]
pub struct EliminatedSystem {
    num_dofs: usize,
    essential_dofs: Vec<usize>,
    inactive_dofs: Vec<usize>,
    active_dofs: Vec<usize>,
    matrix: Arc<CsrMatrix<f64>>,
    coupling: CsrMatrix<f64>,
}

impl EliminatedSystem {
    /// Eliminates the given (sorted, unique) essential degrees of freedom.
    pub fn new(matrix: &CsrMatrix<f64>, essential_dofs: &[usize]) -> Self {
        assert_eq!(matrix.nrows(), matrix.ncols(), "System matrix must be square.");
        let n = matrix.nrows();
        let mut is_essential = vec![false; n];
        for &dof in essential_dofs {
            is_essential[dof] = true;
        }

        let diag = diagonal(matrix);
        let mut active_dofs = Vec::new();
        let mut inactive_dofs = Vec::new();
        for i in 0..n {
            if is_essential[i] {
                continue;
            }
            if diag[i] == 0.0 {
                inactive_dofs.push(i);
            } else {
                active_dofs.push(i);
            }
        }

        let mut active_map = vec![None; n];
        let mut essential_map = vec![None; n];
        for (new_idx, &dof) in active_dofs.iter().enumerate() {
            active_map[dof] = Some(new_idx);
        }
        for (new_idx, &dof) in essential_dofs.iter().enumerate() {
            essential_map[dof] = Some(new_idx);
        }

        let reduced = extract_submatrix(matrix, &active_dofs, &active_map, active_dofs.len());
        let coupling = extract_submatrix(matrix, &active_dofs, &essential_map, essential_dofs.len());

        Self {
            num_dofs: n,
            essential_dofs: essential_dofs.to_vec(),
            inactive_dofs,
            active_dofs,
            matrix: Arc::new(reduced),
            coupling,
        }
    }

    pub fn num_dofs(&self) -> usize {
        self.num_dofs
    }

    /// The reduced matrix acting on the active degrees of freedom.
    pub fn matrix(&self) -> &Arc<CsrMatrix<f64>> {
        &self.matrix
    }

    pub fn essential_dofs(&self) -> &[usize] {
        &self.essential_dofs
    }

    pub fn inactive_dofs(&self) -> &[usize] {
        &self.inactive_dofs
    }

    pub fn active_dofs(&self) -> &[usize] {
        &self.active_dofs
    }

    /// Gathers the active entries of a full vector.
    pub fn restrict(&self, full: DVectorView<f64>) -> DVector<f64> {
        assert_eq!(full.len(), self.num_dofs);
        DVector::from_iterator(self.active_dofs.len(), self.active_dofs.iter().map(|&i| full[i]))
    }

    /// Computes `b_a - A_ae x_e`, where `essential_values` holds one value per essential degree
    /// of freedom.
    pub fn reduced_rhs(&self, rhs: DVectorView<f64>, essential_values: &DVector<f64>) -> DVector<f64> {
        assert_eq!(essential_values.len(), self.essential_dofs.len());
        let mut reduced = self.restrict(rhs);
        let mut correction = DVector::zeros(self.active_dofs.len());
        spmv((&mut correction).into(), &self.coupling, essential_values.into());
        reduced -= correction;
        reduced
    }

    /// Writes the reduced solution, the essential values and zeros for inactive degrees of
    /// freedom into the full vector.
    pub fn expand_into(&self, reduced: &DVector<f64>, essential_values: &DVector<f64>, mut full: DVectorViewMut<f64>) {
        assert_eq!(full.len(), self.num_dofs);
        assert_eq!(reduced.len(), self.active_dofs.len());
        assert_eq!(essential_values.len(), self.essential_dofs.len());
        for (&dof, &value) in self.active_dofs.iter().zip(reduced.iter()) {
            full[dof] = value;
        }
        for (&dof, &value) in self.essential_dofs.iter().zip(essential_values.iter()) {
            full[dof] = value;
        }
        for &dof in &self.inactive_dofs {
            full[dof] = 0.0;
        }
    }
}
