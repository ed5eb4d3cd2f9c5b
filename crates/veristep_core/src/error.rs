use crate::dispatch::Regularity;
use crate::interval::Interval;
use thiserror::Error;

/// Typed failure taxonomy of the rigorous solver core. Nothing here is
/// retried internally; the bounded retry loops of the enclosure search are
/// algorithm, not error recovery, and what escapes them is final for the
/// current integration attempt.
#[derive(Debug, Clone, Error)]
pub enum SolverError {
    /// Evaluation offset outside the curve's validity interval.
    #[error("evaluation argument {argument} outside curve domain [{left}, {right}]")]
    Domain {
        argument: f64,
        left: f64,
        right: f64,
    },

    /// Container size mismatch; a programming error at the call site.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The enclosure search exhausted its retry budget or hit the minimal
    /// time step. Carries the offending time, initial condition and step
    /// for diagnostics. Recommended recovery: increase the order, relax the
    /// tolerance, or restart from the last validated state with a smaller
    /// initial step.
    #[error("cannot find enclosure guaranteeing bounds at t={time}, step={step}: {reason}")]
    EnclosureNotFound {
        time: f64,
        initial_condition: Vec<Interval>,
        step: f64,
        reason: &'static str,
    },

    /// A set/solver regularity mismatch detected at dispatch construction.
    #[error("incompatible capability: set requires {set}, solver provides {solver}")]
    IncompatibleCapability { set: Regularity, solver: Regularity },
}

impl SolverError {
    pub(crate) fn enclosure_not_found(
        time: f64,
        initial_condition: &nalgebra::DVector<Interval>,
        step: f64,
        reason: &'static str,
    ) -> SolverError {
        SolverError::EnclosureNotFound {
            time,
            initial_condition: initial_condition.iter().copied().collect(),
            step,
            reason,
        }
    }
}
