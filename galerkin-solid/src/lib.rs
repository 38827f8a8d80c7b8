//! Solid mechanics terms for `galerkin`.
//!
//! Currently provides the incompressible Mooney–Rivlin membrane: the plane stress law in
//! [`materials`] and the nonlinear [`MembraneTerm`] for triangle meshes embedded in 3D.
use galerkin::equations::TermInstance;

pub mod materials;
pub mod membrane;

pub use membrane::{compute_membrane_stress, MembraneElement, MembraneTerm};

/// A membrane term instance with material parameters `material.a1` and `material.a2`.
pub fn membrane_term_instance(
    integral: &str,
    region: &str,
    material: &str,
    virtual_variable: &str,
    state: &str,
) -> TermInstance {
    TermInstance::new(MembraneTerm::new(), integral, region)
        .with_material(material, "a1")
        .with_material(material, "a2")
        .with_virtual(virtual_variable)
        .with_state(state)
}
