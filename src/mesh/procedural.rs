//! Basic procedural mesh generation routines.
use crate::mesh::Mesh;
use nalgebra::{Point2, Point3};

pub fn create_unit_square_uniform_tri_mesh_2d(cells_per_dim: usize) -> Mesh {
    create_rectangular_uniform_tri_mesh_2d(
        &Point2::new(0.0, 0.0),
        &Point2::new(1.0, 1.0),
        cells_per_dim,
        cells_per_dim,
    )
}

/// Generates an axis-aligned rectangular triangle mesh spanning `[min, max]`.
///
/// Each of the `cells_x * cells_y` quads is split into two counter-clockwise triangles.
pub fn create_rectangular_uniform_tri_mesh_2d(
    min: &Point2<f64>,
    max: &Point2<f64>,
    cells_x: usize,
    cells_y: usize,
) -> Mesh {
    let (vertices, cells) = uniform_grid(min, max, cells_x, cells_y, |x, y| Point3::new(x, y, 0.0));
    Mesh::from_vertices_and_cells(2, vertices, cells).expect("Generated grid is always a valid 2D mesh")
}

/// Generates a flat rectangular sheet of triangles in the `z = 0` plane of 3D space.
///
/// Used as reference configuration for membranes.
pub fn create_flat_sheet_tri_mesh_3d(width: f64, height: f64, cells_x: usize, cells_y: usize) -> Mesh {
    let (vertices, cells) = uniform_grid(
        &Point2::new(0.0, 0.0),
        &Point2::new(width, height),
        cells_x,
        cells_y,
        |x, y| Point3::new(x, y, 0.0),
    );
    Mesh::from_vertices_and_cells(3, vertices, cells).expect("Generated grid is always a valid 3D mesh")
}

fn uniform_grid(
    min: &Point2<f64>,
    max: &Point2<f64>,
    cells_x: usize,
    cells_y: usize,
    make_vertex: impl Fn(f64, f64) -> Point3<f64>,
) -> (Vec<Point3<f64>>, Vec<[usize; 3]>) {
    if cells_x == 0 || cells_y == 0 {
        return (Vec::new(), Vec::new());
    }

    let hx = (max.x - min.x) / cells_x as f64;
    let hy = (max.y - min.y) / cells_y as f64;
    let to_global_vertex_index = |i, j| (cells_x + 1) * j + i;

    let mut vertices = Vec::with_capacity((cells_x + 1) * (cells_y + 1));
    for j in 0..=cells_y {
        for i in 0..=cells_x {
            // Snap the last row/column to the bounds to avoid round-off in region predicates
            let x = if i == cells_x { max.x } else { min.x + i as f64 * hx };
            let y = if j == cells_y { max.y } else { min.y + j as f64 * hy };
            vertices.push(make_vertex(x, y));
        }
    }

    let mut cells = Vec::with_capacity(2 * cells_x * cells_y);
    for j in 0..cells_y {
        for i in 0..cells_x {
            let v00 = to_global_vertex_index(i, j);
            let v10 = to_global_vertex_index(i + 1, j);
            let v11 = to_global_vertex_index(i + 1, j + 1);
            let v01 = to_global_vertex_index(i, j + 1);
            cells.push([v00, v10, v11]);
            cells.push([v00, v11, v01]);
        }
    }

    (vertices, cells)
}
