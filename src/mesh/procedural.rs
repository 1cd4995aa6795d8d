//! Basic procedural mesh generation routines.
use crate::connectivity::Quad4d2Connectivity;
use crate::mesh::QuadMesh2d;
use nalgebra::{Point2, Vector2};

/// Boundary attribute assigned to the left side by the rectangular generators.
pub const LEFT_ATTRIBUTE: usize = 1;
/// Boundary attribute assigned to the right side by the rectangular generators.
pub const RIGHT_ATTRIBUTE: usize = 2;
/// Boundary attribute assigned to the top and bottom sides by the rectangular generators.
pub const LATERAL_ATTRIBUTE: usize = 3;

pub fn create_unit_square_uniform_quad_mesh_2d(cells_per_dim: usize) -> QuadMesh2d {
    create_rectangular_uniform_quad_mesh_2d(1.0, 1, 1, cells_per_dim, &Vector2::new(0.0, 1.0))
}

/// Generates an axis-aligned rectangular uniform mesh given a unit length,
/// dimensions as multipliers of the unit length and the number of cells per unit length.
///
/// All cells belong to region 1. The left side gets boundary attribute 1, the right side
/// attribute 2 and the top and bottom sides attribute 3, which is the layout of a conductor
/// driven from two opposite ends.
pub fn create_rectangular_uniform_quad_mesh_2d(
    unit_length: f64,
    units_x: usize,
    units_y: usize,
    cells_per_unit: usize,
    top_left: &Vector2<f64>,
) -> QuadMesh2d {
    if cells_per_unit == 0 || units_x == 0 || units_y == 0 {
        return QuadMesh2d::from_vertices_and_connectivity(Vec::new(), Vec::new());
    }

    let cell_size = unit_length / cells_per_unit as f64;
    let num_cells_x = units_x * cells_per_unit;
    let num_cells_y = units_y * cells_per_unit;
    let mut mesh = create_structured_quad_mesh(top_left, num_cells_x, num_cells_y, cell_size, cell_size);

    let x_min = top_left.x;
    let x_max = top_left.x + num_cells_x as f64 * cell_size;
    let tol = 0.25 * cell_size;
    mesh.assign_boundary_attributes(|midpoint| {
        if (midpoint.x - x_min).abs() < tol {
            LEFT_ATTRIBUTE
        } else if (midpoint.x - x_max).abs() < tol {
            RIGHT_ATTRIBUTE
        } else {
            LATERAL_ATTRIBUTE
        }
    });
    mesh
}

/// Generates a rectangle `[x0, x0 + width] x [y0, y0 + height]` with `nx * ny` cells, using the
/// same region and boundary attribute conventions as
/// [`create_rectangular_uniform_quad_mesh_2d`].
pub fn create_rectangle_quad_mesh_2d(
    origin: &Point2<f64>,
    width: f64,
    height: f64,
    nx: usize,
    ny: usize,
) -> QuadMesh2d {
    if nx == 0 || ny == 0 {
        return QuadMesh2d::from_vertices_and_connectivity(Vec::new(), Vec::new());
    }
    let hx = width / nx as f64;
    let hy = height / ny as f64;
    let top_left = Vector2::new(origin.x, origin.y + height);
    let mut mesh = create_structured_quad_mesh(&top_left, nx, ny, hx, hy);

    let tol = 0.25 * hx;
    mesh.assign_boundary_attributes(|midpoint| {
        if (midpoint.x - origin.x).abs() < tol {
            LEFT_ATTRIBUTE
        } else if (midpoint.x - origin.x - width).abs() < tol {
            RIGHT_ATTRIBUTE
        } else {
            LATERAL_ATTRIBUTE
        }
    });
    mesh
}

fn create_structured_quad_mesh(
    top_left: &Vector2<f64>,
    num_cells_x: usize,
    num_cells_y: usize,
    hx: f64,
    hy: f64,
) -> QuadMesh2d {
    let mut vertices = Vec::new();
    let mut cells = Vec::new();

    let num_vertices_x = num_cells_x + 1;
    let num_vertices_y = num_cells_y + 1;

    let to_global_vertex_index = |i, j| (num_cells_x + 1) * j + i;

    for j in 0..num_vertices_y {
        for i in 0..num_vertices_x {
            let v = top_left + Vector2::new(i as f64 * hx, -(j as f64) * hy);
            vertices.push(Point2::from(v));
        }
    }

    for j in 0..num_cells_y {
        for i in 0..num_cells_x {
            let quad = Quad4d2Connectivity([
                to_global_vertex_index(i, j + 1),
                to_global_vertex_index(i + 1, j + 1),
                to_global_vertex_index(i + 1, j),
                to_global_vertex_index(i, j),
            ]);
            cells.push(quad);
        }
    }

    QuadMesh2d::from_vertices_and_connectivity(vertices, cells)
}
