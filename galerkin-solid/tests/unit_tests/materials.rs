use galerkin_solid::materials::{MembraneMetric, MooneyRivlinMembrane, MooneyRivlinParameters};
use matrixcompare::assert_matrix_eq;
use nalgebra::{Matrix3, Matrix3x2, Vector3};

fn parameters() -> MooneyRivlinParameters<f64> {
    MooneyRivlinParameters { a1: 0.7, a2: 0.3 }
}

/// Metric from Voigt strain `[E11, E22, 2 E12]`.
fn metric_from_strain(strain: &Vector3<f64>) -> MembraneMetric<f64> {
    MembraneMetric {
        c11: 1.0 + 2.0 * strain[0],
        c22: 1.0 + 2.0 * strain[1],
        c12: strain[2],
    }
}

#[test]
fn undeformed_membrane_is_stress_free() {
    let metric = metric_from_strain(&Vector3::zeros());
    assert_eq!(metric.c33(), 1.0);
    let stress = MooneyRivlinMembrane.compute_stress(&metric, &parameters());
    assert_matrix_eq!(stress, Vector3::zeros(), comp = abs, tol = 1e-14);
}

#[test]
fn metric_from_deformation_gradient() {
    #[rustfmt::skip]
    let f = Matrix3x2::new(
        1.2, 0.1,
        0.0, 0.9,
        0.3, 0.0);
    let metric = MembraneMetric::from_deformation_gradient(&f);
    assert!((metric.c11 - (1.44 + 0.09)).abs() < 1e-14);
    assert!((metric.c22 - (0.01 + 0.81)).abs() < 1e-14);
    assert!((metric.c12 - 0.12).abs() < 1e-14);
    assert!((metric.c33() * metric.determinant() - 1.0).abs() < 1e-14);
}

#[test]
fn uniaxial_stretch_gives_tensile_stress() {
    let metric = metric_from_strain(&Vector3::new(0.1, 0.0, 0.0));
    let stress = MooneyRivlinMembrane.compute_stress(&metric, &parameters());
    assert!(stress[0] > 0.0);
    assert!(stress[2].abs() < 1e-14);
}

#[test]
fn tangent_is_symmetric() {
    let metric = metric_from_strain(&Vector3::new(0.15, -0.05, 0.2));
    let d = MooneyRivlinMembrane.compute_tangent(&metric, &parameters());
    assert_matrix_eq!(d, d.transpose(), comp = abs, tol = 1e-12);
}

#[test]
fn tangent_matches_finite_differences_of_stress() {
    let material = MooneyRivlinMembrane;
    let params = parameters();
    let h = 1e-6;
    for strain in [
        Vector3::new(0.0, 0.0, 0.0),
        Vector3::new(0.15, -0.05, 0.2),
        Vector3::new(-0.1, 0.3, -0.1),
    ] {
        let mut fd = Matrix3::zeros();
        for j in 0..3 {
            let mut plus = strain;
            let mut minus = strain;
            plus[j] += h;
            minus[j] -= h;
            let s_plus = material.compute_stress(&metric_from_strain(&plus), &params);
            let s_minus = material.compute_stress(&metric_from_strain(&minus), &params);
            fd.set_column(j, &((s_plus - s_minus) / (2.0 * h)));
        }
        let d = material.compute_tangent(&metric_from_strain(&strain), &params);
        assert_matrix_eq!(d, fd, comp = abs, tol = 1e-6);
    }
}
