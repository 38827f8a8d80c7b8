use crate::centered_square_mesh;
use galerkin::mesh::procedural::{create_flat_sheet_tri_mesh_3d, create_unit_square_uniform_tri_mesh_2d};
use galerkin::mesh::Mesh;
use galerkin::region::{Region, RegionKind, Regions};
use nalgebra::{Point2, Point3};

fn two_triangles() -> Mesh {
    Mesh::from_vertices_and_cells_2d(
        vec![
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(1.0, 1.0),
            Point2::new(0.0, 1.0),
        ],
        vec![[0, 1, 2], [0, 2, 3]],
    )
    .unwrap()
}

#[test]
fn facets_of_two_triangles() {
    let mesh = two_triangles();
    assert_eq!(mesh.dim(), 2);
    assert_eq!(mesh.num_vertices(), 4);
    assert_eq!(mesh.facets().len(), 5);

    let interior: Vec<_> = mesh
        .facets()
        .iter()
        .filter(|facet| !facet.is_boundary())
        .collect();
    assert_eq!(interior.len(), 1);
    let mut shared = interior[0].vertices;
    shared.sort_unstable();
    assert_eq!(shared, [0, 2]);

    assert_eq!(mesh.boundary_facets().count(), 4);
}

#[test]
fn facet_vertices_follow_owner_cell() {
    let mesh = two_triangles();
    for facet in mesh.facets() {
        let cell = mesh.cells()[facet.cell];
        let k = facet.local_index;
        assert_eq!(facet.vertices, [cell[k], cell[(k + 1) % 3]]);
    }
}

#[test]
fn uniform_mesh_sizes() {
    let mesh = create_unit_square_uniform_tri_mesh_2d(4);
    assert_eq!(mesh.num_vertices(), 25);
    assert_eq!(mesh.cells().len(), 32);
    // 4 edges of 4 facets each on the boundary
    assert_eq!(mesh.boundary_facets().count(), 16);

    let sheet = create_flat_sheet_tri_mesh_3d(2.0, 1.0, 2, 3);
    assert_eq!(sheet.dim(), 3);
    assert_eq!(sheet.num_vertices(), 12);
    assert!(sheet.vertices().iter().all(|v| v.z == 0.0));
}

#[test]
fn invalid_meshes_are_rejected() {
    let vertices = vec![Point3::origin(), Point3::new(1.0, 0.0, 0.0), Point3::new(0.0, 1.0, 0.0)];
    assert!(Mesh::from_vertices_and_cells(2, vertices.clone(), vec![[0, 1, 3]]).is_err());
    assert!(Mesh::from_vertices_and_cells(1, vertices.clone(), vec![[0, 1, 2]]).is_err());

    let lifted = vec![Point3::origin(), Point3::new(1.0, 0.0, 0.5), Point3::new(0.0, 1.0, 0.0)];
    assert!(Mesh::from_vertices_and_cells(2, lifted.clone(), vec![[0, 1, 2]]).is_err());
    assert!(Mesh::from_vertices_and_cells(3, lifted, vec![[0, 1, 2]]).is_ok());
}

#[test]
fn set_vertices_checks_count_and_plane() {
    let mut mesh = two_triangles();
    assert!(mesh.set_vertices(vec![Point3::origin(); 3]).is_err());
    assert!(mesh
        .set_vertices(vec![Point3::new(0.0, 0.0, 1.0); 4])
        .is_err());

    let shifted: Vec<_> = mesh
        .vertices()
        .iter()
        .map(|v| Point3::new(v.x + 1.0, v.y, 0.0))
        .collect();
    mesh.set_vertices(shifted).unwrap();
    assert_eq!(mesh.vertex(0), &Point3::new(1.0, 0.0, 0.0));

    mesh.transform_vertices(|v| v.y *= 2.0);
    assert_eq!(mesh.vertex(2), &Point3::new(2.0, 2.0, 0.0));
}

#[test]
fn coordinates_matrix_has_mesh_dimension() {
    let mesh = two_triangles();
    let coordinates = mesh.coordinates();
    assert_eq!(coordinates.shape(), (2, 4));
    assert_eq!(coordinates[(0, 2)], 1.0);
    assert_eq!(coordinates[(1, 3)], 1.0);
}

#[test]
fn facet_region_from_predicate() {
    let mesh = centered_square_mesh(4);
    let left = Region::from_vertex_predicate("Left", &mesh, RegionKind::Facet, |x| x.x < -0.499);
    assert_eq!(left.kind(), RegionKind::Facet);
    assert_eq!(left.vertices().len(), 5);
    assert_eq!(left.facets().len(), 4);
    assert!(left.cells().is_empty());
    assert!(left
        .facets()
        .iter()
        .all(|&f| mesh.facets()[f].is_boundary()));
}

#[test]
fn cell_region_from_predicate() {
    let mesh = centered_square_mesh(4);
    let lower = Region::from_vertex_predicate("Lower", &mesh, RegionKind::Cell, |x| x.y < 0.01);
    // The bottom two rows of quads
    assert_eq!(lower.cells().len(), 16);
    assert!(lower.has_cells());
    assert!(!lower.spans_whole_domain(&mesh));

    let all = Region::all(&mesh);
    assert_eq!(all.name(), "Omega");
    assert!(all.spans_whole_domain(&mesh));
    assert_eq!(all.cells().len(), mesh.cells().len());
}

#[test]
fn surface_region_contains_all_boundary_facets() {
    let mesh = centered_square_mesh(3);
    let gamma = Region::surface("Gamma", &mesh);
    assert_eq!(gamma.facets().len(), 12);
    assert_eq!(gamma.vertices().len(), 12);
}

#[test]
fn region_from_cells_collects_vertices() {
    let mesh = two_triangles();
    let region = Region::from_cells("first", &mesh, vec![0, 0]);
    assert_eq!(region.cells(), &[0]);
    assert_eq!(region.vertices(), &[0, 1, 2]);
}

#[test]
fn regions_lookup_by_name() {
    let mesh = two_triangles();
    let mut regions = Regions::new();
    regions.insert(Region::all(&mesh));
    regions.insert(Region::from_cells("first", &mesh, vec![0]));
    // Inserting under an existing name replaces the region
    regions.insert(Region::from_cells("first", &mesh, vec![1]));

    assert_eq!(regions.get("first").unwrap().cells(), &[1]);
    assert_eq!(regions.iter().count(), 2);
    assert!(regions.get("second").is_err());
}
