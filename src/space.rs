//! Lowest-order function spaces on a quadrilateral mesh.
use crate::boundary::BoundaryMarkers;
use crate::mesh::topology::MeshTopology;
use nalgebra::{DVector, DVectorView, Matrix2, Point2, Vector2};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The kind of a lowest-order space, determining where its degrees of freedom live.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpaceKind {
    /// Continuous nodal values (one per vertex).
    H1,
    /// Tangential circulation along each edge.
    HCurl,
    /// Normal flux through each edge.
    HDiv,
    /// Integrated or averaged cell values (one per cell).
    L2,
}

/// Initial values for a field, given as a function of position.
pub enum InitialCondition<'a> {
    /// Point values for H1, cell averages for L2.
    Scalar(&'a dyn Fn(&Point2<f64>) -> f64),
    /// A vector field, converted to edge circulations (HCurl) or edge fluxes (HDiv).
    Vector(&'a dyn Fn(&Point2<f64>) -> Vector2<f64>),
}

#[derive(Debug, Clone)]
pub struct FunctionSpace {
    kind: SpaceKind,
    topology: Arc<MeshTopology>,
}

impl FunctionSpace {
    pub fn new(kind: SpaceKind, topology: Arc<MeshTopology>) -> Self {
        Self { kind, topology }
    }

    pub fn kind(&self) -> SpaceKind {
        self.kind
    }

    pub fn topology(&self) -> &MeshTopology {
        &self.topology
    }

    /// The number of unique degrees of freedom.
    pub fn num_dofs(&self) -> usize {
        match self.kind {
            SpaceKind::H1 => self.topology.num_vertices(),
            SpaceKind::HCurl | SpaceKind::HDiv => self.topology.num_edges(),
            SpaceKind::L2 => self.topology.num_cells(),
        }
    }

    /// The point each degree of freedom is associated with.
    pub fn dof_position(&self, dof: usize) -> Point2<f64> {
        match self.kind {
            SpaceKind::H1 => self.topology.vertices()[dof],
            SpaceKind::HCurl | SpaceKind::HDiv => self.topology.edge_midpoint(dof),
            SpaceKind::L2 => *self.topology.cell_centroid(dof),
        }
    }

    /// Sorted degrees of freedom on the boundary faces selected by the markers.
    ///
    /// L2 spaces have no boundary degrees of freedom.
    pub fn essential_dofs(&self, markers: &BoundaryMarkers) -> Vec<usize> {
        let mut dofs = Vec::new();
        for boundary_edge in self.topology.boundary_edges() {
            if !markers.is_marked(boundary_edge.attribute) {
                continue;
            }
            match self.kind {
                SpaceKind::H1 => dofs.extend(self.topology.edges()[boundary_edge.edge]),
                SpaceKind::HCurl | SpaceKind::HDiv => dofs.push(boundary_edge.edge),
                SpaceKind::L2 => {}
            }
        }
        dofs.sort_unstable();
        dofs.dedup();
        dofs
    }

    /// Interpolates an initial condition into the space.
    ///
    /// Returns `None` if the kind of the condition does not fit the space.
    pub fn project(&self, condition: &InitialCondition) -> Option<DVector<f64>> {
        let topology = &self.topology;
        match (self.kind, condition) {
            (SpaceKind::H1, InitialCondition::Scalar(f)) => {
                Some(DVector::from_iterator(topology.num_vertices(), topology.vertices().iter().map(|v| f(v))))
            }
            (SpaceKind::L2, InitialCondition::Scalar(f)) => Some(DVector::from_fn(topology.num_cells(), |k, _| {
                f(topology.cell_centroid(k))
            })),
            (SpaceKind::HCurl, InitialCondition::Vector(f)) => Some(DVector::from_fn(topology.num_edges(), |e, _| {
                f(&topology.edge_midpoint(e)).dot(&topology.edge_tangent(e)) * topology.edge_length(e)
            })),
            (SpaceKind::HDiv, InitialCondition::Vector(f)) => Some(DVector::from_fn(topology.num_edges(), |e, _| {
                f(&topology.edge_midpoint(e)).dot(&topology.edge_normal(e)) * topology.edge_length(e)
            })),
            _ => None,
        }
    }

    /// Reconstructs one constant vector per cell from edge degrees of freedom.
    ///
    /// For HCurl the edge values are circulations, for HDiv they are normal fluxes. The
    /// reconstruction is the least-squares fit over the four edges of each cell, which is exact
    /// for constant fields. Returns an empty vector for H1 and L2 spaces.
    pub fn reconstruct_cell_vectors(&self, dofs: DVectorView<f64>) -> Vec<Vector2<f64>> {
        let topology = &self.topology;
        let directions = |e: usize| match self.kind {
            SpaceKind::HCurl => topology.edge_tangent(e),
            _ => topology.edge_normal(e),
        };
        match self.kind {
            SpaceKind::HCurl | SpaceKind::HDiv => (0..topology.num_cells())
                .map(|k| {
                    let mut normal_matrix = Matrix2::zeros();
                    let mut rhs = Vector2::zeros();
                    for &e in topology.cell_edges(k) {
                        let d = directions(e);
                        let value = dofs[e] / topology.edge_length(e);
                        normal_matrix += d * d.transpose();
                        rhs += d * value;
                    }
                    normal_matrix
                        .try_inverse()
                        .map(|inv| inv * rhs)
                        .unwrap_or_else(Vector2::zeros)
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}
