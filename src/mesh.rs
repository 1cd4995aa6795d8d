use crate::connectivity::{Quad4d2Connectivity, Segment2d2Connectivity};
use crate::error::ConfigurationError;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod procedural;
pub mod topology;

/// Index-based data structure for conforming quadrilateral meshes (i.e. no hanging nodes).
///
/// Every cell carries a region id (material subdomain) and every boundary face carries a
/// boundary attribute. Attributes are numbered from 1, and the mesh reports the largest
/// attribute in use as its boundary attribute count.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct QuadMesh2d {
    vertices: Vec<Point2<f64>>,
    connectivity: Vec<Quad4d2Connectivity>,
    cell_regions: Vec<usize>,
    // Keyed by the sorted face connectivity
    boundary_attributes: BTreeMap<Segment2d2Connectivity, usize>,
}

impl QuadMesh2d {
    /// Construct a mesh in which every cell belongs to region 1 and every boundary face
    /// has attribute 1.
    ///
    /// Panics if the connectivity references vertices out of bounds.
    pub fn from_vertices_and_connectivity(
        vertices: Vec<Point2<f64>>,
        connectivity: Vec<Quad4d2Connectivity>,
    ) -> Self {
        for conn in &connectivity {
            assert!(
                conn.iter().all(|&v| v < vertices.len()),
                "Connectivity references vertex out of bounds."
            );
        }
        let cell_regions = vec![1; connectivity.len()];
        let mut mesh = Self {
            vertices,
            connectivity,
            cell_regions,
            boundary_attributes: BTreeMap::new(),
        };
        mesh.boundary_attributes = mesh
            .find_boundary_faces()
            .into_iter()
            .map(|(face, _, _)| (face.sorted(), 1))
            .collect();
        mesh
    }

    /// Construct a mesh from all of its parts, validating them against each other.
    ///
    /// Every boundary face of the mesh must be assigned an attribute, and only boundary
    /// faces may be assigned one.
    pub fn from_parts(
        vertices: Vec<Point2<f64>>,
        connectivity: Vec<Quad4d2Connectivity>,
        cell_regions: Vec<usize>,
        boundary_faces: Vec<(Segment2d2Connectivity, usize)>,
    ) -> Result<Self, ConfigurationError> {
        if cell_regions.len() != connectivity.len() {
            return Err(ConfigurationError::InvalidMesh(format!(
                "{} region ids given for {} cells",
                cell_regions.len(),
                connectivity.len()
            )));
        }
        if let Some(conn) = connectivity
            .iter()
            .find(|conn| conn.iter().any(|&v| v >= vertices.len()))
        {
            return Err(ConfigurationError::InvalidMesh(format!(
                "cell {:?} references a vertex out of bounds",
                conn.0
            )));
        }

        let mut mesh = Self {
            vertices,
            connectivity,
            cell_regions,
            boundary_attributes: BTreeMap::new(),
        };

        let actual_boundary: Vec<_> = mesh
            .find_boundary_faces()
            .into_iter()
            .map(|(face, _, _)| face.sorted())
            .collect();
        for (face, attribute) in boundary_faces {
            if attribute == 0 {
                return Err(ConfigurationError::InvalidMesh(
                    "boundary attributes are numbered from 1".to_string(),
                ));
            }
            let face = face.sorted();
            if actual_boundary.binary_search(&face).is_err() {
                return Err(ConfigurationError::InvalidMesh(format!(
                    "face {:?} is not a boundary face",
                    face.0
                )));
            }
            mesh.boundary_attributes.insert(face, attribute);
        }
        if let Some(face) = actual_boundary
            .iter()
            .find(|face| !mesh.boundary_attributes.contains_key(face))
        {
            return Err(ConfigurationError::InvalidMesh(format!(
                "boundary face {:?} has no attribute",
                face.0
            )));
        }
        Ok(mesh)
    }

    pub fn vertices(&self) -> &[Point2<f64>] {
        &self.vertices
    }

    pub fn connectivity(&self) -> &[Quad4d2Connectivity] {
        &self.connectivity
    }

    pub fn num_cells(&self) -> usize {
        self.connectivity.len()
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn cell_regions(&self) -> &[usize] {
        &self.cell_regions
    }

    /// Sorted list of distinct region ids present in the mesh.
    pub fn regions(&self) -> Vec<usize> {
        let mut regions = self.cell_regions.clone();
        regions.sort_unstable();
        regions.dedup();
        regions
    }

    /// The boundary attribute of the given face, if it is a boundary face.
    pub fn boundary_attribute(&self, face: &Segment2d2Connectivity) -> Option<usize> {
        self.boundary_attributes.get(&face.sorted()).copied()
    }

    /// Iterates over boundary faces (with sorted vertex indices) and their attributes.
    pub fn boundary_faces(&self) -> impl '_ + Iterator<Item = (Segment2d2Connectivity, usize)> {
        self.boundary_attributes
            .iter()
            .map(|(face, attribute)| (*face, *attribute))
    }

    /// The largest boundary attribute in use. Attributes are numbered `1..=count`.
    pub fn boundary_attribute_count(&self) -> usize {
        self.boundary_attributes.values().copied().max().unwrap_or(0)
    }

    /// Assigns the region of every cell from the cell's vertex average.
    pub fn assign_cell_regions(&mut self, mut region: impl FnMut(&Point2<f64>) -> usize) {
        for (conn, cell_region) in self.connectivity.iter().zip(&mut self.cell_regions) {
            let mut center = Point2::origin();
            for &v in conn.iter() {
                center.coords += self.vertices[v].coords * 0.25;
            }
            *cell_region = region(&center);
        }
    }

    /// Assigns the attribute of every boundary face from the midpoint of the face.
    pub fn assign_boundary_attributes(&mut self, mut attribute: impl FnMut(&Point2<f64>) -> usize) {
        for (face, face_attribute) in self.boundary_attributes.iter_mut() {
            let a = &self.vertices[face.0[0]];
            let b = &self.vertices[face.0[1]];
            *face_attribute = attribute(&nalgebra::center(a, b));
        }
    }

    /// Finds faces which are only connected to exactly one cell, along with the connected cell
    /// index and the local index of the face within that cell.
    pub fn find_boundary_faces(&self) -> Vec<(Segment2d2Connectivity, usize, usize)> {
        // Count the number of occurrences of "equivalent" faces (in the sense that they refer
        // to the same vertex indices). Use a BTreeMap to avoid non-determinism due to
        // HashMap's internal randomization.
        let mut face_counts = BTreeMap::new();
        for (cell_idx, cell_conn) in self.connectivity.iter().enumerate() {
            for (local_idx, face) in cell_conn.faces().enumerate() {
                face_counts
                    .entry(face.sorted())
                    .and_modify(|(_, count)| *count += 1)
                    .or_insert(((face, cell_idx, local_idx), 1));
            }
        }

        // Take only the faces which have a count of 1, which correspond to boundary faces
        face_counts
            .into_values()
            .filter(|&(_, count)| count == 1)
            .map(|(info, _)| info)
            .collect()
    }

    /// Returns a sorted list of vertices that are determined to be on the boundary.
    pub fn find_boundary_vertices(&self) -> Vec<usize> {
        let mut indices = Vec::new();
        for (connectivity, _, _) in self.find_boundary_faces() {
            indices.extend(connectivity.vertex_indices());
        }
        indices.sort_unstable();
        indices.dedup();
        indices
    }
}
