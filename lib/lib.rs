#![allow(dead_code, non_snake_case, non_upper_case_globals)]

//! Optical Bloch equations for laser-cooled particles with block-structured
//! internal Hamiltonians.

pub mod error;
pub mod config;
pub mod spin;
pub mod states;
pub mod spherical;
pub mod hamiltonian;
pub mod sparse;
pub mod density;
pub mod liouville;
pub mod fields;
pub mod ode;
pub mod obe;
