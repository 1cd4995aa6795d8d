//! Cell and face connectivity of quadrilateral meshes.
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::ops::Deref;

/// A mesh face given by its two vertex indices.
///
/// The order of the indices carries the orientation of the face. Two faces with the same
/// vertices in opposite order describe the same geometric edge, see [`sorted`](Self::sorted).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Segment2d2Connectivity(pub [usize; 2]);

impl Segment2d2Connectivity {
    /// The same face with its vertex indices in increasing order.
    pub fn sorted(&self) -> Self {
        let [a, b] = self.0;
        Self([a.min(b), a.max(b)])
    }

    pub fn vertex_indices(&self) -> &[usize] {
        &self.0
    }
}

/// A quadrilateral cell given by its four vertex indices in counter-clockwise order.
///
/// Local face `i` runs from vertex `i` to vertex `(i + 1) % 4`.
///
/// ```text
/// 3_________2
/// |         |
/// |         |
/// |         |
/// 0_________1
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Quad4d2Connectivity(pub [usize; 4]);

impl Quad4d2Connectivity {
    pub fn vertex_indices(&self) -> &[usize] {
        &self.0
    }

    /// The local face with the given index, oriented counter-clockwise around the cell.
    pub fn face(&self, local: usize) -> Option<Segment2d2Connectivity> {
        (local < 4).then(|| Segment2d2Connectivity([self.0[local], self.0[(local + 1) % 4]]))
    }

    pub fn faces(&self) -> impl Iterator<Item = Segment2d2Connectivity> + '_ {
        (0..4).filter_map(move |local| self.face(local))
    }

    /// Signed area (shoelace formula), positive for counter-clockwise vertex order.
    ///
    /// Returns `None` if an index is out of bounds.
    pub fn signed_area(&self, vertices: &[Point2<f64>]) -> Option<f64> {
        let mut twice_area = 0.0;
        for face in self.faces() {
            let [a, b] = face.0;
            let (a, b) = (vertices.get(a)?, vertices.get(b)?);
            twice_area += a.x * b.y - b.x * a.y;
        }
        Some(0.5 * twice_area)
    }

    /// Area centroid of the cell.
    ///
    /// Returns `None` if an index is out of bounds or the cell has zero area.
    pub fn centroid(&self, vertices: &[Point2<f64>]) -> Option<Point2<f64>> {
        let area = self.signed_area(vertices)?;
        if area == 0.0 {
            return None;
        }
        let mut moment = nalgebra::Vector2::zeros();
        for face in self.faces() {
            let [a, b] = face.0;
            let (a, b) = (vertices.get(a)?, vertices.get(b)?);
            moment += (a.coords + b.coords) * (a.x * b.y - b.x * a.y);
        }
        Some(Point2::from(moment / (6.0 * area)))
    }
}

impl Deref for Quad4d2Connectivity {
    type Target = [usize; 4];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
