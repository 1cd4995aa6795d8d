//! Edge topology and geometric factors of a quadrilateral mesh.
//!
//! The lowest-order discretization stores temperature, magnetic flux and heating per cell,
//! the potential per vertex, and the electric field and thermal flux per edge. This module
//! extracts the edges of a [`QuadMesh2d`] and computes everything the discrete operators
//! need: orientation signs, cell areas, edge lengths and the distances from cell centroids
//! to edges that weight the lumped Hodge matrices.
//!
//! Every edge is stored as `[tail, head]` with `tail < head`. Its tangent points from tail
//! to head, and its normal is the tangent rotated clockwise. The orientation sign of an edge
//! relative to a cell is `+1` if the counter-clockwise traversal of the cell follows the
//! edge tangent, which is exactly when the edge normal points out of the cell.
use crate::connectivity::Segment2d2Connectivity;
use crate::error::ConfigurationError;
use crate::mesh::QuadMesh2d;
use fxhash::FxHashMap;
use nalgebra::{Point2, Vector2};

/// A boundary edge together with its single adjacent cell.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct BoundaryEdge {
    pub edge: usize,
    pub cell: usize,
    pub local_index: usize,
    /// `+1` if the edge normal points out of the domain, `-1` otherwise. This is also the sign
    /// that aligns the edge tangent with the counter-clockwise boundary traversal.
    pub outward_sign: f64,
    pub attribute: usize,
}

#[derive(Debug, Clone)]
pub struct MeshTopology {
    vertices: Vec<Point2<f64>>,
    cell_vertices: Vec<[usize; 4]>,
    cell_regions: Vec<usize>,
    edges: Vec<[usize; 2]>,
    cell_edges: Vec<[usize; 4]>,
    cell_edge_signs: Vec<[f64; 4]>,
    cell_areas: Vec<f64>,
    cell_centroids: Vec<Point2<f64>>,
    cell_edge_distances: Vec<[f64; 4]>,
    edge_lengths: Vec<f64>,
    boundary_edges: Vec<BoundaryEdge>,
    edge_boundary_index: Vec<Option<usize>>,
    boundary_attribute_count: usize,
}

impl MeshTopology {
    pub fn from_mesh(mesh: &QuadMesh2d) -> Result<Self, ConfigurationError> {
        let vertices = mesh.vertices().to_vec();
        let num_cells = mesh.num_cells();

        let mut edge_lookup = FxHashMap::default();
        let mut edges = Vec::new();
        let mut edge_cell_count = Vec::new();
        let mut cell_vertices = Vec::with_capacity(num_cells);
        let mut cell_edges = Vec::with_capacity(num_cells);
        let mut cell_edge_signs = Vec::with_capacity(num_cells);
        let mut cell_areas = Vec::with_capacity(num_cells);
        let mut cell_centroids = Vec::with_capacity(num_cells);
        let mut cell_edge_distances = Vec::with_capacity(num_cells);

        for (cell_idx, conn) in mesh.connectivity().iter().enumerate() {
            let signed_area = conn
                .signed_area(&vertices)
                .ok_or_else(|| ConfigurationError::InvalidMesh(format!("cell {} is out of bounds", cell_idx)))?;
            let centroid = conn.centroid(&vertices).ok_or_else(|| {
                ConfigurationError::InvalidMesh(format!("cell {} has zero area", cell_idx))
            })?;
            let orientation = signed_area.signum();

            let mut local_edges = [0; 4];
            let mut local_signs = [0.0; 4];
            let mut local_distances = [0.0; 4];
            for local in 0..4 {
                let a = conn[local];
                let b = conn[(local + 1) % 4];
                if a == b {
                    return Err(ConfigurationError::InvalidMesh(format!(
                        "cell {} has a degenerate edge",
                        cell_idx
                    )));
                }
                let key = Segment2d2Connectivity([a, b]).sorted();
                let edge_idx = *edge_lookup.entry(key).or_insert_with(|| {
                    edges.push(key.0);
                    edge_cell_count.push(0usize);
                    edges.len() - 1
                });
                edge_cell_count[edge_idx] += 1;
                local_edges[local] = edge_idx;
                let along = if a < b { 1.0 } else { -1.0 };
                local_signs[local] = along * orientation;

                let distance = distance_to_line(&centroid, &vertices[a], &vertices[b]);
                if distance <= 0.0 {
                    return Err(ConfigurationError::InvalidMesh(format!(
                        "centroid of cell {} lies on one of its edges",
                        cell_idx
                    )));
                }
                local_distances[local] = distance;
            }

            cell_vertices.push(conn.0);
            cell_edges.push(local_edges);
            cell_edge_signs.push(local_signs);
            cell_areas.push(signed_area.abs());
            cell_centroids.push(centroid);
            cell_edge_distances.push(local_distances);
        }

        if let Some(edge) = edge_cell_count.iter().position(|&count| count > 2) {
            return Err(ConfigurationError::InvalidMesh(format!(
                "edge {:?} is shared by more than two cells",
                edges[edge]
            )));
        }

        let edge_lengths = edges
            .iter()
            .map(|[a, b]| (vertices[*b] - vertices[*a]).norm())
            .collect();

        let mut boundary_edges = Vec::new();
        let mut edge_boundary_index = vec![None; edges.len()];
        for (cell, local_edges) in cell_edges.iter().enumerate() {
            for (local_index, &edge) in local_edges.iter().enumerate() {
                if edge_cell_count[edge] == 1 {
                    let face = Segment2d2Connectivity(edges[edge]);
                    let attribute = mesh.boundary_attribute(&face).ok_or_else(|| {
                        ConfigurationError::InvalidMesh(format!("boundary edge {:?} has no attribute", face.0))
                    })?;
                    edge_boundary_index[edge] = Some(boundary_edges.len());
                    boundary_edges.push(BoundaryEdge {
                        edge,
                        cell,
                        local_index,
                        outward_sign: cell_edge_signs[cell][local_index],
                        attribute,
                    });
                }
            }
        }

        Ok(Self {
            vertices,
            cell_vertices,
            cell_regions: mesh.cell_regions().to_vec(),
            edges,
            cell_edges,
            cell_edge_signs,
            cell_areas,
            cell_centroids,
            cell_edge_distances,
            edge_lengths,
            boundary_edges,
            edge_boundary_index,
            boundary_attribute_count: mesh.boundary_attribute_count(),
        })
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn num_cells(&self) -> usize {
        self.cell_edges.len()
    }

    pub fn vertices(&self) -> &[Point2<f64>] {
        &self.vertices
    }

    pub fn edges(&self) -> &[[usize; 2]] {
        &self.edges
    }

    pub fn cell_vertices(&self, cell: usize) -> &[usize; 4] {
        &self.cell_vertices[cell]
    }

    pub fn cell_edges(&self, cell: usize) -> &[usize; 4] {
        &self.cell_edges[cell]
    }

    /// Orientation signs of the cell's edges, in local edge order.
    pub fn cell_edge_signs(&self, cell: usize) -> &[f64; 4] {
        &self.cell_edge_signs[cell]
    }

    pub fn cell_region(&self, cell: usize) -> usize {
        self.cell_regions[cell]
    }

    pub fn cell_regions(&self) -> &[usize] {
        &self.cell_regions
    }

    pub fn cell_area(&self, cell: usize) -> f64 {
        self.cell_areas[cell]
    }

    pub fn cell_areas(&self) -> &[f64] {
        &self.cell_areas
    }

    pub fn cell_centroid(&self, cell: usize) -> &Point2<f64> {
        &self.cell_centroids[cell]
    }

    /// Perpendicular distances from the cell centroid to the lines through its edges.
    pub fn cell_edge_distances(&self, cell: usize) -> &[f64; 4] {
        &self.cell_edge_distances[cell]
    }

    pub fn edge_length(&self, edge: usize) -> f64 {
        self.edge_lengths[edge]
    }

    pub fn edge_midpoint(&self, edge: usize) -> Point2<f64> {
        let [a, b] = self.edges[edge];
        nalgebra::center(&self.vertices[a], &self.vertices[b])
    }

    /// Unit tangent pointing from tail to head.
    pub fn edge_tangent(&self, edge: usize) -> Vector2<f64> {
        let [a, b] = self.edges[edge];
        (self.vertices[b] - self.vertices[a]) / self.edge_lengths[edge]
    }

    /// Unit normal, i.e. the tangent rotated clockwise.
    pub fn edge_normal(&self, edge: usize) -> Vector2<f64> {
        let t = self.edge_tangent(edge);
        Vector2::new(t.y, -t.x)
    }

    pub fn boundary_edges(&self) -> &[BoundaryEdge] {
        &self.boundary_edges
    }

    pub fn boundary_edge(&self, edge: usize) -> Option<&BoundaryEdge> {
        self.edge_boundary_index[edge].map(|i| &self.boundary_edges[i])
    }

    pub fn boundary_attribute_count(&self) -> usize {
        self.boundary_attribute_count
    }
}

fn distance_to_line(p: &Point2<f64>, a: &Point2<f64>, b: &Point2<f64>) -> f64 {
    let ab = b - a;
    let ap = p - a;
    (ab.x * ap.y - ab.y * ap.x).abs() / ab.norm()
}
