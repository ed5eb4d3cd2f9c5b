//! The `veristep_core` crate is a self-validating Taylor-method integrator
//! for ODE initial value problems: every step produces interval enclosures
//! that provably contain the true solution, its Jacobian with respect to
//! the initial condition and, in the higher-regularity solvers, second
//! derivatives or full degree-n jets.
//!
//! Key components:
//! - **Interval**: outward-rounded interval arithmetic, the scalar the
//!   whole crate instantiates its `nalgebra` containers with.
//! - **Traits**: `Scalar` (numeric seam), the `VectorField` regularity
//!   ladder consumed through per-field Taylor recurrences.
//! - **Curve**: the Taylor coefficient tables (value, variational, Hessian,
//!   jet) with their remainder rows.
//! - **Enclosure**: the first-order Picard search and the high-order
//!   self-validating remainder certificate.
//! - **Solver**: step orchestrators in C0/C1, C2 and Cn flavors, driven by
//!   pluggable step-size policies.
//! - **Dispatch**: construction-time pairing of set representations with a
//!   sufficiently regular solver.

pub mod curve;
pub mod dispatch;
pub mod enclosure;
pub mod error;
pub mod fields;
pub mod hessian;
pub mod interval;
pub mod jet;
pub mod norms;
pub mod solver;
pub mod step_control;
pub mod traits;

#[cfg(test)]
pub(crate) mod test_fields;

#[cfg(test)]
mod integration_tests;
