use crate::error::SolverError;
use crate::interval::Interval;
use crate::solver::Solver;
use crate::traits::C1VectorField;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How much derivative information a set representation demands, or a
/// solver tracks. The closed ladder of the crate: anything higher can stand
/// in for anything lower.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Regularity {
    C0,
    C1,
    C2,
    Cn(usize),
}

impl Regularity {
    pub fn degree(self) -> usize {
        match self {
            Regularity::C0 => 0,
            Regularity::C1 => 1,
            Regularity::C2 => 2,
            Regularity::Cn(d) => d,
        }
    }

    /// Whether a solver of this regularity can drive a set demanding
    /// `demand`.
    pub fn supports(self, demand: Regularity) -> bool {
        self.degree() >= demand.degree()
    }
}

impl fmt::Display for Regularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Regularity::C0 => write!(f, "C0"),
            Regularity::C1 => write!(f, "C1"),
            Regularity::C2 => write!(f, "C2"),
            Regularity::Cn(d) => write!(f, "C{d}"),
        }
    }
}

/// Capability check between a set representation and a solver, resolved
/// once at construction; an incompatible pairing never reaches a step.
#[derive(Debug, Clone, Copy)]
pub struct StepDispatch {
    set: Regularity,
    solver: Regularity,
}

impl StepDispatch {
    pub fn new(set: Regularity, solver: Regularity) -> Result<StepDispatch, SolverError> {
        if !solver.supports(set) {
            return Err(SolverError::IncompatibleCapability { set, solver });
        }
        Ok(StepDispatch { set, solver })
    }

    pub fn set(&self) -> Regularity {
        self.set
    }

    pub fn solver(&self) -> Regularity {
        self.solver
    }
}

/// A set representation a solver can advance step by step.
pub trait SetRepresentation {
    /// The regularity the representation demands of its solver.
    fn regularity(&self) -> Regularity;

    /// Interval hull of the represented set.
    fn hull(&self) -> DVector<Interval>;
}

/// Plain interval box, moved in mean-value form and re-centered after every
/// step.
#[derive(Debug, Clone)]
pub struct C0Box {
    x: DVector<Interval>,
}

impl C0Box {
    pub fn new(x: DVector<Interval>) -> C0Box {
        C0Box { x }
    }

    /// Advances the box one validated step; `time` is moved by the step the
    /// solver actually took.
    pub fn move_set<F: C1VectorField<Interval>>(
        &mut self,
        solver: &mut Solver<F>,
        time: &mut f64,
    ) -> Result<(), SolverError> {
        let data = solver.enclose_c0_map(*time, &self.x)?;
        self.x = mean_value_image(&data.phi, &data.jac_phi, &self.x);
        *time += data.step;
        Ok(())
    }
}

impl SetRepresentation for C0Box {
    fn regularity(&self) -> Regularity {
        Regularity::C0
    }

    fn hull(&self) -> DVector<Interval> {
        self.x.clone()
    }
}

/// Interval box with an accumulated Jacobian of the flow since the initial
/// time; demands a C1-capable solver.
#[derive(Debug, Clone)]
pub struct C1Box {
    x: DVector<Interval>,
    jacobian: DMatrix<Interval>,
}

impl C1Box {
    pub fn new(x: DVector<Interval>) -> C1Box {
        let dim = x.len();
        C1Box {
            x,
            jacobian: DMatrix::identity(dim, dim),
        }
    }

    pub fn jacobian(&self) -> &DMatrix<Interval> {
        &self.jacobian
    }

    pub fn move_set<F: C1VectorField<Interval>>(
        &mut self,
        solver: &mut Solver<F>,
        time: &mut f64,
    ) -> Result<(), SolverError> {
        let data = solver.enclose_c1_map(*time, &self.x)?;
        self.x = mean_value_image(&data.phi, &data.jac_phi, &self.x);
        self.jacobian = interval_mat_mul(&data.jac_phi, &self.jacobian);
        *time += data.step;
        Ok(())
    }
}

impl SetRepresentation for C1Box {
    fn regularity(&self) -> Regularity {
        Regularity::C1
    }

    fn hull(&self) -> DVector<Interval> {
        self.x.clone()
    }
}

/// phi + jac * (x - mid(x)), the mean-value image of the box.
fn mean_value_image(
    phi: &DVector<Interval>,
    jac: &DMatrix<Interval>,
    x: &DVector<Interval>,
) -> DVector<Interval> {
    let dim = x.len();
    let mut out = phi.clone();
    for i in 0..dim {
        for j in 0..dim {
            out[i] += jac[(i, j)] * (x[j] - Interval::point(x[j].mid()));
        }
    }
    out
}

fn interval_mat_mul(a: &DMatrix<Interval>, b: &DMatrix<Interval>) -> DMatrix<Interval> {
    let (n, _) = a.shape();
    let (_, m) = b.shape();
    let mut out = DMatrix::from_element(n, m, Interval::ZERO);
    for i in 0..n {
        for j in 0..m {
            let mut s = Interval::ZERO;
            for k in 0..a.ncols() {
                s += a[(i, k)] * b[(k, j)];
            }
            out[(i, j)] = s;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_accepts_matching_and_higher_regularity() {
        assert!(StepDispatch::new(Regularity::C0, Regularity::C0).is_ok());
        assert!(StepDispatch::new(Regularity::C1, Regularity::Cn(3)).is_ok());
        assert!(StepDispatch::new(Regularity::C2, Regularity::C2).is_ok());
    }

    #[test]
    fn dispatch_rejects_underpowered_solver() {
        let err = StepDispatch::new(Regularity::C1, Regularity::C0).unwrap_err();
        match err {
            SolverError::IncompatibleCapability { set, solver } => {
                assert_eq!(set, Regularity::C1);
                assert_eq!(solver, Regularity::C0);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn cn_degrees_order_by_degree() {
        assert!(StepDispatch::new(Regularity::Cn(2), Regularity::Cn(2)).is_ok());
        assert!(StepDispatch::new(Regularity::Cn(3), Regularity::Cn(2)).is_err());
        assert!(Regularity::Cn(2).supports(Regularity::C2));
    }

    #[test]
    fn regularity_displays_by_degree() {
        assert_eq!(Regularity::C0.to_string(), "C0");
        assert_eq!(Regularity::Cn(4).to_string(), "C4");
    }
}
