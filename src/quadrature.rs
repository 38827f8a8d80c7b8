//! Quadrature rules and linear Lagrange bases on the reference triangle and segment.
//!
//! The reference triangle has vertices `(0, 0)`, `(1, 0)` and `(0, 1)`; the reference segment is `[0, 1]`.
use eyre::eyre;
use nalgebra::{Matrix2x3, OPoint, Point1, Point2, U1, U2};

pub type QuadraturePair<D> = (Vec<f64>, Vec<OPoint<f64, D>>);
pub type QuadraturePair1d = QuadraturePair<U1>;
pub type QuadraturePair2d = QuadraturePair<U2>;

/// A named integral, determining the quadrature rule used by the terms that refer to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Integral {
    name: String,
    order: usize,
}

impl Integral {
    pub fn new(name: impl Into<String>, order: usize) -> Self {
        Self {
            name: name.into(),
            order,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn triangle_rule(&self) -> eyre::Result<QuadraturePair2d> {
        triangle_quadrature(self.order)
    }

    pub fn segment_rule(&self) -> eyre::Result<QuadraturePair1d> {
        segment_quadrature(self.order)
    }
}

/// Returns a rule on the reference triangle that integrates polynomials of the given
/// total order exactly. The weights sum to the reference area `1/2`.
pub fn triangle_quadrature(order: usize) -> eyre::Result<QuadraturePair2d> {
    match order {
        0 | 1 => Ok((vec![0.5], vec![Point2::new(1.0 / 3.0, 1.0 / 3.0)])),
        2 => {
            let w = 1.0 / 6.0;
            Ok((
                vec![w, w, w],
                vec![
                    Point2::new(1.0 / 6.0, 1.0 / 6.0),
                    Point2::new(2.0 / 3.0, 1.0 / 6.0),
                    Point2::new(1.0 / 6.0, 2.0 / 3.0),
                ],
            ))
        }
        3 | 4 => {
            // Strang-Fix/Dunavant degree 4 rule
            let a = 0.445948490915965;
            let b = 0.091576213509771;
            let wa = 0.223381589678011 / 2.0;
            let wb = 0.109951743655322 / 2.0;
            Ok((
                vec![wa, wa, wa, wb, wb, wb],
                vec![
                    Point2::new(a, a),
                    Point2::new(1.0 - 2.0 * a, a),
                    Point2::new(a, 1.0 - 2.0 * a),
                    Point2::new(b, b),
                    Point2::new(1.0 - 2.0 * b, b),
                    Point2::new(b, 1.0 - 2.0 * b),
                ],
            ))
        }
        _ => Err(eyre!("no triangle quadrature of order {} is available (max 4)", order)),
    }
}

/// Gauss-Legendre rule on `[0, 1]` exact for polynomials of the given order.
pub fn segment_quadrature(order: usize) -> eyre::Result<QuadraturePair1d> {
    match order {
        0 | 1 => Ok((vec![1.0], vec![Point1::new(0.5)])),
        2 | 3 => {
            let d = 0.5 / 3.0_f64.sqrt();
            Ok((vec![0.5, 0.5], vec![Point1::new(0.5 - d), Point1::new(0.5 + d)]))
        }
        4 | 5 => {
            let d = 0.5 * (3.0_f64 / 5.0).sqrt();
            Ok((
                vec![4.0 / 9.0, 5.0 / 18.0, 5.0 / 18.0],
                vec![Point1::new(0.5), Point1::new(0.5 - d), Point1::new(0.5 + d)],
            ))
        }
        _ => Err(eyre!("no segment quadrature of order {} is available (max 5)", order)),
    }
}

/// Values of the linear Lagrange basis functions of the reference triangle.
pub fn p1_triangle_basis(xi: &Point2<f64>) -> [f64; 3] {
    [1.0 - xi.x - xi.y, xi.x, xi.y]
}

/// Gradients of the linear Lagrange basis functions with respect to reference coordinates.
///
/// Column `n` holds the gradient of basis function `n`.
pub fn p1_triangle_basis_gradients() -> Matrix2x3<f64> {
    Matrix2x3::new(-1.0, 1.0, 0.0,
                   -1.0, 0.0, 1.0)
}

pub fn p1_segment_basis(xi: &Point1<f64>) -> [f64; 2] {
    [1.0 - xi.x, xi.x]
}
