pub mod c2;
pub mod cn;

use crate::curve::{horner, Curve};
use crate::enclosure::{
    compute_enclosure_and_remainder, enclosure, jac_enclosure, HighOrderTarget, ValidationOutcome,
};
use crate::error::SolverError;
use crate::interval::Interval;
use crate::norms::SupLogNorm;
use crate::step_control::{FixedStepControl, StepControlPolicy, StepControllable};
use crate::traits::{C1VectorField, ColumnMask};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Tuning surface of a solver, independent of the field and the policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Order of the Taylor expansion (the remainder is of order + 1).
    pub order: usize,
    /// Hard cap on the time step; proposed steps are silently clamped.
    pub max_step: f64,
    pub absolute_tolerance: f64,
    pub relative_tolerance: f64,
    /// When false the step is never changed, not even by validation
    /// failures; a failed validation then enlarges the trial enclosure
    /// instead.
    pub adaptive: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            order: 20,
            max_step: f64::INFINITY,
            absolute_tolerance: 1e-14,
            relative_tolerance: 1e-14,
            adaptive: true,
        }
    }
}

/// One validated step of the flow in mean-value form. `phi` is the Taylor
/// sum at the expansion center with the value remainder added; `jac_phi`
/// the summed variational series with its remainder added, so
/// `phi + jac_phi * (x - center)` encloses the time-`step` image of every
/// point of the initial box. Masked Jacobian columns are zero filled and
/// carry no meaning.
#[derive(Debug, Clone)]
pub struct FlowStep {
    pub step: f64,
    pub phi: DVector<Interval>,
    pub jac_phi: DMatrix<Interval>,
    /// The Lagrange term alone, already included in `phi`.
    pub remainder: DVector<Interval>,
    /// Enclosure of the solution over the whole step interval.
    pub value_enclosure: DVector<Interval>,
    /// Enclosure of the variational solution over the whole step interval.
    pub jac_enclosure: DMatrix<Interval>,
}

/// Taylor-method solver for the C0 and C1 surfaces of the flow. Owns one
/// coefficient table, the field and one step policy; deliberately neither
/// `Clone` nor `Copy`, a live table is not a value.
pub struct Solver<F> {
    field: F,
    curve: Curve<Interval>,
    policy: Box<dyn StepControlPolicy>,
    config: SolverConfig,
    step: f64,
    mask: Option<ColumnMask>,
    // columns the variational tables actually track
    active_columns: Vec<usize>,
    // whether the validation loop covers the variational entries too
    validate_matrix: bool,
    initialized: bool,
}

impl<F: C1VectorField<Interval>> Solver<F> {
    pub fn new(
        field: F,
        config: SolverConfig,
        policy: Box<dyn StepControlPolicy>,
    ) -> Result<Solver<F>, SolverError> {
        let dim = field.dimension();
        if dim == 0 {
            return Err(SolverError::DimensionMismatch {
                expected: 1,
                actual: 0,
            });
        }
        let curve = Curve::new(0.0, 0.0, dim, config.order);
        Ok(Solver {
            field,
            curve,
            policy,
            config,
            step: config.max_step.min(0.015625),
            mask: None,
            active_columns: (0..dim).collect(),
            validate_matrix: false,
            initialized: false,
        })
    }

    pub fn dimension(&self) -> usize {
        self.curve.dimension()
    }

    pub fn field(&self) -> &F {
        &self.field
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    pub fn curve(&self) -> &Curve<Interval> {
        &self.curve
    }

    pub fn set_order(&mut self, order: usize) {
        self.curve.set_order(order);
        self.config.order = order;
    }

    /// Fixes the step and turns adaptation off.
    pub fn set_step(&mut self, step: f64) {
        self.config.adaptive = false;
        self.step = step.min(self.config.max_step);
        self.initialized = true;
    }

    /// Changes the current step without touching the adaptation mode.
    pub fn adjust_time_step(&mut self, step: f64) {
        self.step = step.min(self.config.max_step);
    }

    pub fn current_step(&self) -> f64 {
        self.step
    }

    /// Restricts the variational tables to the given columns. Masked
    /// columns are never computed, never validated and are returned zeroed.
    pub fn set_mask(&mut self, mask: Option<ColumnMask>) -> Result<(), SolverError> {
        if let Some(m) = &mask {
            if m.dimension() != self.dimension() {
                return Err(SolverError::DimensionMismatch {
                    expected: self.dimension(),
                    actual: m.dimension(),
                });
            }
        }
        self.active_columns = match &mask {
            Some(m) => m.active_columns().collect(),
            None => (0..self.dimension()).collect(),
        };
        self.mask = mask;
        self.curve.clear_coefficients();
        Ok(())
    }

    pub fn mask(&self) -> Option<&ColumnMask> {
        self.mask.as_ref()
    }

    /// First-order a-priori enclosure at the current step.
    pub fn enclosure(
        &self,
        t: f64,
        x: &DVector<Interval>,
    ) -> Result<DVector<Interval>, SolverError> {
        enclosure(&self.field, t, x, self.step)
    }

    /// Fills the center table (value rows only) from the midpoint of `x`.
    pub fn compute_coefficients_at_center(&mut self, t: f64, center: &DVector<Interval>) {
        let order = self.config.order;
        let rows = self.curve.center_rows_mut();
        rows[0].copy_from(center);
        self.field.ode_coefficients(Interval::point(t), rows, order);
    }

    /// Fills the full-argument value and variational tables from `x`, with
    /// the variational row 0 seeded to the identity (active columns only).
    pub fn compute_coefficients(&mut self, t: f64, x: &DVector<Interval>) {
        let order = self.config.order;
        let (rows, matrix_rows) = self.curve.value_and_matrix_rows_mut();
        rows[0].copy_from(x);
        matrix_rows[0].fill(Interval::ZERO);
        for &j in &self.active_columns {
            matrix_rows[0][(j, j)] = Interval::ONE;
        }
        self.field
            .ode_coefficients_c1(Interval::point(t), rows, matrix_rows, order, self.mask.as_ref());
    }

    /// Taylor sum of the center table at `h`.
    pub fn phi(&self, h: f64) -> Result<DVector<Interval>, SolverError> {
        self.curve.evaluate(h)
    }

    /// Taylor sum of the variational table at `h` (no remainder).
    pub fn jac_phi(&self, h: f64) -> DMatrix<Interval> {
        let dim = self.dimension();
        let order = self.config.order;
        let hi = Interval::point(h);
        let mut out = DMatrix::from_element(dim, dim, Interval::ZERO);
        for &j in &self.active_columns {
            for i in 0..dim {
                out[(i, j)] = horner(|r| self.curve.matrix_coefficient(i, j, r), order, hi);
            }
        }
        out
    }

    /// Computes coefficients at `x` (center = midpoints of `x`), proposes
    /// a step, validates the value enclosure and derives the variational
    /// data from a logarithmic-norm bound. The cheaper of the two rigorous
    /// step surfaces; use [`Solver::enclose_c1_map`] when the variational
    /// part must be as tight as the value part.
    pub fn enclose_c0_map(
        &mut self,
        t: f64,
        x: &DVector<Interval>,
    ) -> Result<FlowStep, SolverError> {
        self.check_dimension(x)?;
        self.prepare_step(t, x);
        self.validate_matrix = false;
        let (enc, rem) = self.compute_and_approve_remainder(t)?;
        let dim = self.dimension();
        let value_enclosure = DVector::from_vec(enc[..dim].to_vec());
        let value_remainder = DVector::from_vec(rem[..dim].to_vec());

        // variational part from the growth bound over the value enclosure;
        // masked columns are zeroed to honor the masking contract
        let mut jac_enc =
            jac_enclosure(&self.field, t, self.step, &value_enclosure, &SupLogNorm, None);
        if let Some(mask) = &self.mask {
            for j in 0..dim {
                if !mask.is_active(j) {
                    for i in 0..dim {
                        jac_enc[(i, j)] = Interval::ZERO;
                    }
                }
            }
        }
        let jac_remainder = self.jac_remainder_from(t, &value_enclosure, &jac_enc);

        self.assemble(value_enclosure, value_remainder, jac_enc, jac_remainder)
    }

    /// Like [`Solver::enclose_c0_map`], but the variational entries go
    /// through the same high-order validation as the values, which gives a
    /// tight Jacobian enclosure at the cost of a larger validated set.
    pub fn enclose_c1_map(
        &mut self,
        t: f64,
        x: &DVector<Interval>,
    ) -> Result<FlowStep, SolverError> {
        self.check_dimension(x)?;
        self.prepare_step(t, x);
        self.validate_matrix = true;
        let (enc, rem) = self.compute_and_approve_remainder(t)?;
        let dim = self.dimension();
        let value_enclosure = DVector::from_vec(enc[..dim].to_vec());
        let value_remainder = DVector::from_vec(rem[..dim].to_vec());
        let mut jac_enc = DMatrix::from_element(dim, dim, Interval::ZERO);
        let mut jac_remainder = DMatrix::from_element(dim, dim, Interval::ZERO);
        for (c, &j) in self.active_columns.iter().enumerate() {
            for i in 0..dim {
                let k = dim + c * dim + i;
                jac_enc[(i, j)] = enc[k];
                jac_remainder[(i, j)] = rem[k];
            }
        }
        self.assemble(value_enclosure, value_remainder, jac_enc, jac_remainder)
    }

    fn check_dimension(&self, x: &DVector<Interval>) -> Result<(), SolverError> {
        if x.len() != self.dimension() {
            return Err(SolverError::DimensionMismatch {
                expected: self.dimension(),
                actual: x.len(),
            });
        }
        Ok(())
    }

    /// Coefficients plus step proposal; shared head of both map variants.
    fn prepare_step(&mut self, t: f64, x: &DVector<Interval>) {
        let center = DVector::from_iterator(x.len(), x.iter().map(|v| Interval::point(v.mid())));
        self.compute_coefficients_at_center(t, &center);
        self.compute_coefficients(t, x);
        if self.config.adaptive {
            let policy = std::mem::replace(
                &mut self.policy,
                Box::new(FixedStepControl::new(self.step)),
            );
            if !self.initialized {
                policy.init(self, t);
                self.initialized = true;
            }
            let h = policy.compute_next_time_step(self, t);
            self.policy = policy;
            self.step = h.min(self.config.max_step);
            // init and seeding may have dirtied the tables
            self.compute_coefficients_at_center(t, &center);
            self.compute_coefficients(t, x);
        } else {
            self.step = self.step.min(self.config.max_step);
        }
        self.curve.set_domain(0.0, self.step);
    }

    /// Runs the self-validating loop until the certificate holds or the
    /// step floor makes failure fatal.
    fn compute_and_approve_remainder(
        &mut self,
        t: f64,
    ) -> Result<(Vec<Interval>, Vec<Interval>), SolverError> {
        loop {
            match compute_enclosure_and_remainder(self, t)? {
                ValidationOutcome::Accepted {
                    enclosure,
                    remainder,
                } => return Ok((enclosure, remainder)),
                ValidationOutcome::StepShrunk => {
                    self.curve.set_domain(0.0, self.step);
                }
            }
        }
    }

    /// Lagrange remainder of the variational series, evaluated by seeding
    /// the remainder recurrence with the log-norm Jacobian enclosure.
    fn jac_remainder_from(
        &mut self,
        t: f64,
        value_enclosure: &DVector<Interval>,
        jac_enc: &DMatrix<Interval>,
    ) -> DMatrix<Interval> {
        let dim = self.dimension();
        let order = self.config.order;
        let time_range = Interval::point(t) + Interval::new(0.0, 1.0).mul_f64(self.step);
        {
            let (rows, matrix_rows) = self.curve.value_and_matrix_remainder_rows_mut();
            rows[0].copy_from(value_enclosure);
            matrix_rows[0].copy_from(jac_enc);
            self.field
                .ode_coefficients_c1(time_range, rows, matrix_rows, order + 1, self.mask.as_ref());
        }
        let h_pow = Interval::new(0.0, 1.0).mul_f64(self.step).powi(order + 1);
        let mut out = DMatrix::from_element(dim, dim, Interval::ZERO);
        for &j in &self.active_columns {
            for i in 0..dim {
                out[(i, j)] = self.curve.matrix_remainder_coefficient(i, j, order + 1) * h_pow;
            }
        }
        out
    }

    fn assemble(
        &self,
        value_enclosure: DVector<Interval>,
        value_remainder: DVector<Interval>,
        jac_enclosure: DMatrix<Interval>,
        jac_remainder: DMatrix<Interval>,
    ) -> Result<FlowStep, SolverError> {
        let mut phi = self.phi(self.step)?;
        phi += &value_remainder;
        let mut jac_phi = self.jac_phi(self.step);
        // only active columns; masked storage must stay exactly zero
        for &j in &self.active_columns {
            for i in 0..jac_phi.nrows() {
                jac_phi[(i, j)] += jac_remainder[(i, j)];
            }
        }
        Ok(FlowStep {
            step: self.step,
            phi,
            jac_phi,
            remainder: value_remainder,
            value_enclosure,
            jac_enclosure,
        })
    }
}

impl<F: C1VectorField<Interval>> StepControllable for Solver<F> {
    fn order(&self) -> usize {
        self.config.order
    }

    fn coeff_norm(&self, row: usize) -> f64 {
        let dim = self.dimension();
        let mut n = 0.0f64;
        for i in 0..dim {
            n = n.max(self.curve.coefficient(i, row).mag());
        }
        for &j in &self.active_columns {
            for i in 0..dim {
                n = n.max(self.curve.matrix_coefficient(i, j, row).mag());
            }
        }
        n
    }

    fn max_step(&self) -> f64 {
        self.config.max_step
    }

    fn current_step(&self) -> f64 {
        self.step
    }

    fn adjust_step(&mut self, step: f64) {
        self.step = step.min(self.config.max_step);
        self.curve.set_domain(0.0, self.step);
    }

    fn effective_tolerance(&self) -> f64 {
        let mut n = 0.0f64;
        for i in 0..self.dimension() {
            n = n.max(self.curve.coefficient(i, 0).mag());
        }
        self.config
            .absolute_tolerance
            .max(self.config.relative_tolerance * n)
    }

    fn lipschitz_estimate(&self, t: f64) -> f64 {
        let x = DVector::from_vec(
            (0..self.dimension())
                .map(|i| self.curve.coefficient(i, 0))
                .collect(),
        );
        crate::norms::frobenius_mag(&self.field.derivative(Interval::point(t), &x))
    }

    fn probe_first_order(&mut self, t: f64) -> bool {
        let x = DVector::from_vec(
            (0..self.dimension())
                .map(|i| self.curve.coefficient(i, 0))
                .collect(),
        );
        enclosure(&self.field, t, &x, self.step).is_ok()
    }

    fn seed_remainder(&mut self, t: f64, h: f64) -> bool {
        let dim = self.dimension();
        let x = DVector::from_vec((0..dim).map(|i| self.curve.coefficient(i, 0)).collect());
        let f = self
            .field
            .eval(Interval::point(t) + Interval::new(0.0, 1.0).mul_f64(h), &x);
        let mut crude: Vec<Interval> = Vec::with_capacity(self.jet_len());
        for i in 0..dim {
            crude.push((x[i] + Interval::new(0.0, 1.0).mul_f64(h) * f[i]).inflated(f64::EPSILON));
        }
        if self.validate_matrix {
            for _ in dim..self.jet_len() {
                crude.push(Interval::new(-2.0, 2.0));
            }
        }
        self.recompute_remainder(t, &crude);
        let last = self.config.order + 1;
        (0..self.jet_len()).all(|k| self.remainder_entry(last, k).is_finite())
    }
}

impl<F: C1VectorField<Interval>> HighOrderTarget for Solver<F> {
    fn jet_len(&self) -> usize {
        let dim = self.dimension();
        if self.validate_matrix {
            dim + dim * self.active_columns.len()
        } else {
            dim
        }
    }

    fn order(&self) -> usize {
        self.config.order
    }

    fn step(&self) -> f64 {
        self.step
    }

    fn coefficient_entry(&self, row: usize, k: usize) -> Interval {
        let dim = self.dimension();
        if k < dim {
            self.curve.coefficient(k, row)
        } else {
            let c = (k - dim) / dim;
            let i = (k - dim) % dim;
            self.curve.matrix_coefficient(i, self.active_columns[c], row)
        }
    }

    fn remainder_entry(&self, row: usize, k: usize) -> Interval {
        let dim = self.dimension();
        if k < dim {
            self.curve.remainder_coefficient(k, row)
        } else {
            let c = (k - dim) / dim;
            let i = (k - dim) % dim;
            self.curve
                .matrix_remainder_coefficient(i, self.active_columns[c], row)
        }
    }

    fn recompute_remainder(&mut self, t: f64, enc: &[Interval]) {
        let dim = self.dimension();
        let order = self.config.order;
        let time_range = Interval::point(t) + Interval::new(0.0, 1.0).mul_f64(self.step);
        let (rows, matrix_rows) = self.curve.value_and_matrix_remainder_rows_mut();
        for i in 0..dim {
            rows[0][i] = enc[i];
        }
        if self.validate_matrix {
            for (c, &j) in self.active_columns.iter().enumerate() {
                for i in 0..dim {
                    matrix_rows[0][(i, j)] = enc[dim + c * dim + i];
                }
            }
        }
        self.field
            .ode_coefficients_c1(time_range, rows, matrix_rows, order + 1, self.mask.as_ref());
    }

    fn step_change_allowed(&self) -> bool {
        self.config.adaptive
    }

    fn adjust_step(&mut self, step: f64) {
        StepControllable::adjust_step(self, step);
    }

    fn min_step_allowed(&self) -> f64 {
        self.policy.min_step_allowed()
    }

    fn initial_condition(&self) -> DVector<Interval> {
        DVector::from_vec(
            (0..self.dimension())
                .map(|i| self.curve.coefficient(i, 0))
                .collect(),
        )
    }
}
