//! Matrix-vector kernels and structural helpers for CSR matrices.
use crate::Real;
use nalgebra::{DVectorView, DVectorViewMut};
use nalgebra_sparse::CsrMatrix;
use rayon::prelude::*;

/// y = A x
pub fn spmv<T: Real>(mut y: DVectorViewMut<T>, a: &CsrMatrix<T>, x: DVectorView<T>) {
    assert_eq!(a.nrows(), y.len(), "Output dimension must match number of rows.");
    assert_eq!(a.ncols(), x.len(), "Input dimension must match number of columns.");
    for (i, row) in a.row_iter().enumerate() {
        let mut sum = T::zero();
        for (&j, &a_ij) in row.col_indices().iter().zip(row.values()) {
            sum += a_ij * x[j];
        }
        y[i] = sum;
    }
}

/// y = A^T x
pub fn spmv_transpose<T: Real>(mut y: DVectorViewMut<T>, a: &CsrMatrix<T>, x: DVectorView<T>) {
    assert_eq!(a.ncols(), y.len(), "Output dimension must match number of columns.");
    assert_eq!(a.nrows(), x.len(), "Input dimension must match number of rows.");
    y.fill(T::zero());
    for (i, row) in a.row_iter().enumerate() {
        let x_i = x[i];
        for (&j, &a_ij) in row.col_indices().iter().zip(row.values()) {
            y[j] += a_ij * x_i;
        }
    }
}

/// Row-parallel y = A x on contiguous buffers.
pub fn par_spmv<T>(y: &mut [T], a: &CsrMatrix<T>, x: &[T])
where
    T: Real + Send + Sync,
{
    assert_eq!(a.nrows(), y.len(), "Output dimension must match number of rows.");
    assert_eq!(a.ncols(), x.len(), "Input dimension must match number of columns.");
    y.par_iter_mut().enumerate().for_each(|(i, y_i)| {
        let row = a.row(i);
        let mut sum = T::zero();
        for (&j, &a_ij) in row.col_indices().iter().zip(row.values()) {
            sum += a_ij * x[j];
        }
        *y_i = sum;
    });
}

/// Returns the diagonal of a square matrix. Entries missing from the sparsity pattern are zero.
pub fn diagonal<T: Real>(a: &CsrMatrix<T>) -> Vec<T> {
    assert_eq!(a.nrows(), a.ncols(), "Diagonal is only defined for square matrices.");
    a.row_iter()
        .enumerate()
        .map(|(i, row)| {
            let mut a_ii = T::zero();
            for (&j, &a_ij) in row.col_indices().iter().zip(row.values()) {
                if j == i {
                    a_ii += a_ij;
                }
            }
            a_ii
        })
        .collect()
}

/// Extracts the submatrix with the given rows, keeping only the columns for which `column_map`
/// yields a new column index.
///
/// The column map must be monotone on the columns it keeps, so that column indices remain
/// sorted in every row of the result.
pub fn extract_submatrix<T: Real>(
    a: &CsrMatrix<T>,
    rows: &[usize],
    column_map: &[Option<usize>],
    num_cols: usize,
) -> CsrMatrix<T> {
    assert_eq!(column_map.len(), a.ncols(), "Column map must cover every column.");
    let mut offsets = Vec::with_capacity(rows.len() + 1);
    let mut indices = Vec::new();
    let mut values = Vec::new();
    offsets.push(0);
    for &i in rows {
        let row = a.row(i);
        for (&j, &a_ij) in row.col_indices().iter().zip(row.values()) {
            if let Some(new_j) = column_map[j] {
                indices.push(new_j);
                values.push(a_ij);
            }
        }
        offsets.push(indices.len());
    }
    CsrMatrix::try_from_csr_data(rows.len(), num_cols, offsets, indices, values)
        .expect("Monotone column map always produces a valid CSR matrix")
}
