//! Discrete differential operators and lumped Hodge matrices.
//!
//! All operators are built from the [`MeshTopology`] alone. The incidence matrices are exact
//! and satisfy `curl * grad = 0`, and the Hodge matrices are lumped so that every material
//! enters as a per-cell, per-edge weight.
use crate::material::PropertyValue;
use crate::mesh::topology::MeshTopology;
use joule_sparse::{CooMatrix, CsrMatrix};
use nalgebra::DVector;

pub mod global;
pub mod local;

/// The edge-vertex incidence matrix, mapping vertex values to edge differences `head - tail`.
pub fn gradient_matrix(topology: &MeshTopology) -> CsrMatrix<f64> {
    let mut coo = CooMatrix::new(topology.num_edges(), topology.num_vertices());
    for (e, &[tail, head]) in topology.edges().iter().enumerate() {
        coo.push(e, tail, -1.0);
        coo.push(e, head, 1.0);
    }
    CsrMatrix::from(&coo)
}

/// The signed cell-edge incidence matrix.
///
/// Applied to edge circulations it computes the counter-clockwise circulation around each
/// cell (the discrete curl). Applied to edge fluxes it computes the net outward flux of each
/// cell (the discrete divergence).
pub fn cell_edge_incidence(topology: &MeshTopology) -> CsrMatrix<f64> {
    let mut coo = CooMatrix::new(topology.num_cells(), topology.num_edges());
    for cell in 0..topology.num_cells() {
        let edges = topology.cell_edges(cell);
        let signs = topology.cell_edge_signs(cell);
        for (&e, &sign) in edges.iter().zip(signs) {
            coo.push(cell, e, sign);
        }
    }
    CsrMatrix::from(&coo)
}

/// Per-cell edge weights `alpha_K h_{K,e} / |e|` of the lumped Hodge matrix acting on edge
/// circulations, with `alpha_K` the tangential component of the given coefficient.
pub fn tangential_edge_weights(topology: &MeshTopology, coefficient: &[PropertyValue]) -> Vec<[f64; 4]> {
    assert_eq!(coefficient.len(), topology.num_cells());
    (0..topology.num_cells())
        .map(|cell| {
            let distances = topology.cell_edge_distances(cell);
            let mut weights = [0.0; 4];
            for (local, &e) in topology.cell_edges(cell).iter().enumerate() {
                let alpha = coefficient[cell].directional(&topology.edge_tangent(e));
                weights[local] = alpha * distances[local] / topology.edge_length(e);
            }
            weights
        })
        .collect()
}

/// Per-cell edge weights of the lumped Hodge matrix acting on edge fluxes, using the inverse
/// of the normal component of the given coefficient.
pub fn inverse_normal_edge_weights(topology: &MeshTopology, coefficient: &[PropertyValue]) -> Vec<[f64; 4]> {
    assert_eq!(coefficient.len(), topology.num_cells());
    (0..topology.num_cells())
        .map(|cell| {
            let distances = topology.cell_edge_distances(cell);
            let mut weights = [0.0; 4];
            for (local, &e) in topology.cell_edges(cell).iter().enumerate() {
                let alpha = coefficient[cell].directional(&topology.edge_normal(e));
                weights[local] = distances[local] / (alpha * topology.edge_length(e));
            }
            weights
        })
        .collect()
}

/// Sums per-cell edge weights into a global diagonal.
pub fn lumped_edge_mass(topology: &MeshTopology, cell_edge_weights: &[[f64; 4]]) -> DVector<f64> {
    let mut diagonal = DVector::zeros(topology.num_edges());
    for (cell, weights) in cell_edge_weights.iter().enumerate() {
        for (&e, &w) in topology.cell_edges(cell).iter().zip(weights) {
            diagonal[e] += w;
        }
    }
    diagonal
}
