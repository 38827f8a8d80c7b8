use nalgebra::RealField;

/// Calculus helper traits and numerical differentiation
pub mod calculus;
/// Newton-Raphson driver with different line search strategies
pub mod newton;

pub use nalgebra;

pub trait Real: RealField + Copy {}

impl<T: RealField + Copy> Real for T {}
