use galerkin::nalgebra::{Matrix2, Matrix3, Matrix3x2, RealField, Vector3};
use numeric_literals::replace_float_literals;
use serde::{Deserialize, Serialize};

/// Parameters of the Mooney–Rivlin membrane, with the membrane thickness folded in.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MooneyRivlinParameters<T> {
    pub a1: T,
    pub a2: T,
}

impl<T> Default for MooneyRivlinParameters<T>
where
    T: RealField,
{
    #[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
    fn default() -> Self {
        Self { a1: 0.0, a2: 0.0 }
    }
}

/// In-plane components of the right Cauchy–Green tensor of a membrane.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MembraneMetric<T> {
    pub c11: T,
    pub c22: T,
    pub c12: T,
}

impl<T> MembraneMetric<T>
where
    T: RealField + Copy,
{
    /// `C = Fᵀ F` for the `3 x 2` deformation gradient of the membrane mid-surface.
    #[allow(non_snake_case)]
    pub fn from_deformation_gradient(deformation_gradient: &Matrix3x2<T>) -> Self {
        let F = deformation_gradient;
        let C: Matrix2<T> = F.transpose() * F;
        Self {
            c11: C[(0, 0)],
            c22: C[(1, 1)],
            c12: C[(0, 1)],
        }
    }

    pub fn determinant(&self) -> T {
        self.c11 * self.c22 - self.c12 * self.c12
    }

    /// The thickness stretch component, determined by incompressibility: `C33 det(C_2x2) = 1`.
    pub fn c33(&self) -> T {
        T::one() / self.determinant()
    }
}

/// The incompressible Mooney–Rivlin law under the plane stress assumption.
///
/// With the strain energy density
/// $$
/// \psi = a_1 (I_1 - 3) + a_2 (I_2 - 3),
/// $$
/// the thickness stretch is eliminated through $C_{33} = 1 / (C_{11} C_{22} - C_{12}^2)$ and a
/// pressure-like multiplier $p$ chosen such that $S_{33} = 0$.
///
/// Stresses and strains use Voigt notation `[11, 22, 12]`, where the shear strain component is
/// `2 E12`. All functions assume `det(C_2x2) > 0`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MooneyRivlinMembrane;

impl MooneyRivlinMembrane {
    #[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
    pub fn compute_pressure<T>(&self, metric: &MembraneMetric<T>, parameters: &MooneyRivlinParameters<T>) -> T
    where
        T: RealField + Copy,
    {
        let a12 = 2.0 * parameters.a1;
        let a22 = 2.0 * parameters.a2;
        metric.c33() * (a12 + a22 * (metric.c11 + metric.c22))
    }

    /// The second Piola–Kirchhoff stress `[S11, S22, S12]`.
    #[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
    pub fn compute_stress<T>(&self, metric: &MembraneMetric<T>, parameters: &MooneyRivlinParameters<T>) -> Vector3<T>
    where
        T: RealField + Copy,
    {
        let MembraneMetric { c11, c22, c12 } = *metric;
        let c33 = metric.c33();
        let a12 = 2.0 * parameters.a1;
        let a22 = 2.0 * parameters.a2;
        let p = self.compute_pressure(metric, parameters);

        Vector3::new(
            a12 + a22 * (c22 + c33) - p * c22 * c33,
            a12 + a22 * (c11 + c33) - p * c11 * c33,
            -a22 * c12 + p * c12 * c33,
        )
    }

    /// The tangent modulus `D = ∂S/∂E` in Voigt notation. `D` is symmetric.
    #[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
    pub fn compute_tangent<T>(&self, metric: &MembraneMetric<T>, parameters: &MooneyRivlinParameters<T>) -> Matrix3<T>
    where
        T: RealField + Copy,
    {
        let MembraneMetric { c11, c22, c12 } = *metric;
        let c33 = metric.c33();
        let c33_2 = c33 * c33;
        let a22 = 2.0 * parameters.a2;
        let p = self.compute_pressure(metric, parameters);

        // Derivatives of the pressure with respect to C11, C22 and 2 C12, up to a factor
        let dp11 = a22 * c33 - p * c22 * c33;
        let dp22 = a22 * c33 - p * c11 * c33;
        let dp12 = 2.0 * p * c12 * c33;

        let d11 = -2.0 * ((a22 - p * c22) * c22 * c33_2 + c22 * c33 * dp11);
        let d22 = -2.0 * ((a22 - p * c11) * c11 * c33_2 + c11 * c33 * dp22);
        let d33 = -a22 + p * (c33 + 2.0 * c12 * c12 * c33_2) + c12 * c33 * dp12;

        let d12 = 2.0 * ((a22 - p * c33) - (a22 - p * c22) * c11 * c33_2 - c22 * c33 * dp22);
        let d21 = 2.0 * ((a22 - p * c33) - (a22 - p * c11) * c22 * c33_2 - c11 * c33 * dp11);
        let d13 = 2.0 * (a22 - p * c22) * c12 * c33_2 - c22 * c33 * dp12;
        let d23 = 2.0 * (a22 - p * c11) * c12 * c33_2 - c11 * c33 * dp12;
        let d31 = 2.0 * (-p * c12 * c22 * c33_2 + c12 * c33 * dp11);
        let d32 = 2.0 * (-p * c12 * c11 * c33_2 + c12 * c33 * dp22);

        #[rustfmt::skip]
        let tangent = Matrix3::new(
            d11, d12, d13,
            d21, d22, d23,
            d31, d32, d33,
        );
        tangent
    }
}
