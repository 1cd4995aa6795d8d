//! Cell-local matrices of the lowest-order discrete operators.
use crate::mesh::topology::MeshTopology;
use nalgebra::{DMatrixViewMut, Vector4};

pub trait ElementConnectivityAssembler {
    fn num_elements(&self) -> usize;

    fn num_nodes(&self) -> usize;

    fn element_node_count(&self, element_index: usize) -> usize;

    fn populate_element_nodes(&self, output: &mut [usize], element_index: usize);
}

pub trait ElementMatrixAssembler: ElementConnectivityAssembler {
    fn assemble_element_matrix_into(&self, element_index: usize, output: DMatrixViewMut<f64>) -> eyre::Result<()>;

    fn as_connectivity_assembler(&self) -> &dyn ElementConnectivityAssembler;
}

/// Assembles the vertex-based stiffness matrix `G^T M G`, where `G` is the edge-vertex
/// incidence and `M` a lumped edge mass given by per-cell edge weights.
///
/// Each cell contributes `w (d_a - d_b)(d_a - d_b)^T` for every local edge `(a, b)`.
pub struct NodalStiffnessAssembler<'a> {
    topology: &'a MeshTopology,
    cell_edge_weights: &'a [[f64; 4]],
}

impl<'a> NodalStiffnessAssembler<'a> {
    pub fn new(topology: &'a MeshTopology, cell_edge_weights: &'a [[f64; 4]]) -> Self {
        assert_eq!(cell_edge_weights.len(), topology.num_cells());
        Self {
            topology,
            cell_edge_weights,
        }
    }
}

impl<'a> ElementConnectivityAssembler for NodalStiffnessAssembler<'a> {
    fn num_elements(&self) -> usize {
        self.topology.num_cells()
    }

    fn num_nodes(&self) -> usize {
        self.topology.num_vertices()
    }

    fn element_node_count(&self, _element_index: usize) -> usize {
        4
    }

    fn populate_element_nodes(&self, output: &mut [usize], element_index: usize) {
        output.copy_from_slice(self.topology.cell_vertices(element_index));
    }
}

impl<'a> ElementMatrixAssembler for NodalStiffnessAssembler<'a> {
    fn assemble_element_matrix_into(&self, element_index: usize, mut output: DMatrixViewMut<f64>) -> eyre::Result<()> {
        output.fill(0.0);
        for (local, &w) in self.cell_edge_weights[element_index].iter().enumerate() {
            let a = local;
            let b = (local + 1) % 4;
            output[(a, a)] += w;
            output[(b, b)] += w;
            output[(a, b)] -= w;
            output[(b, a)] -= w;
        }
        Ok(())
    }

    fn as_connectivity_assembler(&self) -> &dyn ElementConnectivityAssembler {
        self
    }
}

/// Assembles edge-based systems of the form `M + D^T C D`, where `M` is a lumped edge mass
/// given by per-cell edge weights, `D` the signed cell-edge incidence (discrete curl or
/// divergence) and `C` a diagonal cell weight.
///
/// This covers both the electric system `M1(sigma) + dt curl^T M2(1/mu) curl` and the thermal
/// flux system `M(1/k) + dt div^T C^{-1} div`.
pub struct EdgeSystemAssembler<'a> {
    topology: &'a MeshTopology,
    cell_edge_weights: &'a [[f64; 4]],
    cell_weights: &'a [f64],
}

impl<'a> EdgeSystemAssembler<'a> {
    pub fn new(topology: &'a MeshTopology, cell_edge_weights: &'a [[f64; 4]], cell_weights: &'a [f64]) -> Self {
        assert_eq!(cell_edge_weights.len(), topology.num_cells());
        assert_eq!(cell_weights.len(), topology.num_cells());
        Self {
            topology,
            cell_edge_weights,
            cell_weights,
        }
    }
}

impl<'a> ElementConnectivityAssembler for EdgeSystemAssembler<'a> {
    fn num_elements(&self) -> usize {
        self.topology.num_cells()
    }

    fn num_nodes(&self) -> usize {
        self.topology.num_edges()
    }

    fn element_node_count(&self, _element_index: usize) -> usize {
        4
    }

    fn populate_element_nodes(&self, output: &mut [usize], element_index: usize) {
        output.copy_from_slice(self.topology.cell_edges(element_index));
    }
}

impl<'a> ElementMatrixAssembler for EdgeSystemAssembler<'a> {
    fn assemble_element_matrix_into(&self, element_index: usize, mut output: DMatrixViewMut<f64>) -> eyre::Result<()> {
        let o = Vector4::from(*self.topology.cell_edge_signs(element_index));
        let c = self.cell_weights[element_index];
        output.copy_from(&(o * o.transpose() * c));
        for (local, &w) in self.cell_edge_weights[element_index].iter().enumerate() {
            output[(local, local)] += w;
        }
        Ok(())
    }

    fn as_connectivity_assembler(&self) -> &dyn ElementConnectivityAssembler {
        self
    }
}
