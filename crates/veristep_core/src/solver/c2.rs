use crate::curve::{horner, C2Curve};
use crate::enclosure::{
    c2_enclosure, compute_enclosure_and_remainder, enclosure, HighOrderTarget, ValidationOutcome,
};
use crate::error::SolverError;
use crate::hessian::HessianTensor;
use crate::interval::Interval;
use crate::solver::SolverConfig;
use crate::step_control::{FixedStepControl, StepControlPolicy, StepControllable};
use crate::traits::{C2VectorField, ColumnMask};
use nalgebra::{DMatrix, DVector};

/// One validated step carrying the flow, its Jacobian and its Hessian, all
/// with remainders added. Hessian entries are the second partials of the
/// flow contracted against the initial-condition directions `(j, c)`,
/// `j <= c`.
#[derive(Debug, Clone)]
pub struct C2FlowStep {
    pub step: f64,
    pub phi: DVector<Interval>,
    pub jac_phi: DMatrix<Interval>,
    pub hessian_phi: HessianTensor<Interval>,
    pub value_enclosure: DVector<Interval>,
    pub jac_enclosure: DMatrix<Interval>,
    pub hessian_enclosure: HessianTensor<Interval>,
}

/// Solver tracking the second variational equations alongside the flow.
/// The value, Jacobian and Hessian tables go through one joint high-order
/// validation.
pub struct C2Solver<F> {
    field: F,
    curve: C2Curve<Interval>,
    policy: Box<dyn StepControlPolicy>,
    config: SolverConfig,
    step: f64,
    mask: Option<ColumnMask>,
    active_columns: Vec<usize>,
    // pairs (j, c), j <= c, with both columns active
    active_pairs: Vec<(usize, usize)>,
    initialized: bool,
}

fn pairs_of(dim: usize, columns: &[usize]) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    for j in 0..dim {
        for c in j..dim {
            if columns.contains(&j) && columns.contains(&c) {
                out.push((j, c));
            }
        }
    }
    out
}

impl<F: C2VectorField<Interval>> C2Solver<F> {
    pub fn new(
        field: F,
        config: SolverConfig,
        policy: Box<dyn StepControlPolicy>,
    ) -> Result<C2Solver<F>, SolverError> {
        let dim = field.dimension();
        if dim == 0 {
            return Err(SolverError::DimensionMismatch {
                expected: 1,
                actual: 0,
            });
        }
        let columns: Vec<usize> = (0..dim).collect();
        let active_pairs = pairs_of(dim, &columns);
        Ok(C2Solver {
            field,
            curve: C2Curve::new(0.0, 0.0, dim, config.order),
            policy,
            config,
            step: config.max_step.min(0.015625),
            mask: None,
            active_columns: columns,
            active_pairs,
            initialized: false,
        })
    }

    pub fn dimension(&self) -> usize {
        self.curve.base().dimension()
    }

    pub fn curve(&self) -> &C2Curve<Interval> {
        &self.curve
    }

    pub fn set_step(&mut self, step: f64) {
        self.config.adaptive = false;
        self.step = step.min(self.config.max_step);
        self.initialized = true;
    }

    pub fn current_step(&self) -> f64 {
        self.step
    }

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
        self.active_pairs = pairs_of(self.dimension(), &self.active_columns);
        self.mask = mask;
        self.curve.clear_coefficients();
        Ok(())
    }

    /// Computes coefficients, proposes a step and validates the joint
    /// value + Jacobian + Hessian enclosure.
    pub fn enclose_c2_map(
        &mut self,
        t: f64,
        x: &DVector<Interval>,
    ) -> Result<C2FlowStep, SolverError> {
        let dim = self.dimension();
        if x.len() != dim {
            return Err(SolverError::DimensionMismatch {
                expected: dim,
                actual: x.len(),
            });
        }
        let center = DVector::from_iterator(dim, x.iter().map(|v| Interval::point(v.mid())));
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
            self.compute_coefficients_at_center(t, &center);
            self.compute_coefficients(t, x);
        } else {
            self.step = self.step.min(self.config.max_step);
        }
        self.curve.base_mut().set_domain(0.0, self.step);

        let (enc, rem) = loop {
            match compute_enclosure_and_remainder(self, t)? {
                ValidationOutcome::Accepted {
                    enclosure,
                    remainder,
                } => break (enclosure, remainder),
                ValidationOutcome::StepShrunk => {
                    self.curve.base_mut().set_domain(0.0, self.step);
                }
            }
        };

        let order = self.config.order;
        let hi = Interval::point(self.step);
        let mut phi = self.curve.base().evaluate(self.step)?;
        let mut jac_phi = DMatrix::from_element(dim, dim, Interval::ZERO);
        let mut hessian_phi = HessianTensor::zeros(dim);
        let mut value_enclosure = DVector::from_vec(enc[..dim].to_vec());
        let mut jac_enclosure = DMatrix::from_element(dim, dim, Interval::ZERO);
        let mut hessian_enclosure = HessianTensor::zeros(dim);

        for i in 0..dim {
            phi[i] += rem[i];
            value_enclosure[i] = enc[i];
        }
        let a = self.active_columns.len();
        for (c, &j) in self.active_columns.iter().enumerate() {
            for i in 0..dim {
                let k = dim + c * dim + i;
                jac_phi[(i, j)] =
                    horner(|r| self.curve.base().matrix_coefficient(i, j, r), order, hi) + rem[k];
                jac_enclosure[(i, j)] = enc[k];
            }
        }
        let hbase = dim + a * dim;
        for (p, &(j, c)) in self.active_pairs.iter().enumerate() {
            for i in 0..dim {
                let k = hbase + p * dim + i;
                let sum = horner(|r| self.curve.hessian_coefficient(i, j, c, r), order, hi);
                hessian_phi.set(i, j, c, sum + rem[k]);
                hessian_enclosure.set(i, j, c, enc[k]);
            }
        }

        Ok(C2FlowStep {
            step: self.step,
            phi,
            jac_phi,
            hessian_phi,
            value_enclosure,
            jac_enclosure,
            hessian_enclosure,
        })
    }

    fn compute_coefficients_at_center(&mut self, t: f64, center: &DVector<Interval>) {
        let order = self.config.order;
        let rows = self.curve.base_mut().center_rows_mut();
        rows[0].copy_from(center);
        self.field.ode_coefficients(Interval::point(t), rows, order);
    }

    fn compute_coefficients(&mut self, t: f64, x: &DVector<Interval>) {
        let order = self.config.order;
        let (rows, matrix_rows, hessian_rows) = self.curve.full_rows_mut();
        rows[0].copy_from(x);
        matrix_rows[0].fill(Interval::ZERO);
        for &j in &self.active_columns {
            matrix_rows[0][(j, j)] = Interval::ONE;
        }
        hessian_rows[0].fill_zero();
        self.field.ode_coefficients_c2(
            Interval::point(t),
            rows,
            matrix_rows,
            hessian_rows,
            order,
            self.mask.as_ref(),
        );
    }
}

impl<F: C2VectorField<Interval>> StepControllable for C2Solver<F> {
    fn order(&self) -> usize {
        self.config.order
    }

    fn coeff_norm(&self, row: usize) -> f64 {
        let dim = self.dimension();
        let mut n = 0.0f64;
        for i in 0..dim {
            n = n.max(self.curve.base().coefficient(i, row).mag());
        }
        for &j in &self.active_columns {
            for i in 0..dim {
                n = n.max(self.curve.base().matrix_coefficient(i, j, row).mag());
            }
        }
        for &(j, c) in &self.active_pairs {
            for i in 0..dim {
                n = n.max(self.curve.hessian_coefficient(i, j, c, row).mag());
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
        self.curve.base_mut().set_domain(0.0, self.step);
    }

    fn effective_tolerance(&self) -> f64 {
        let mut n = 0.0f64;
        for i in 0..self.dimension() {
            n = n.max(self.curve.base().coefficient(i, 0).mag());
        }
        self.config
            .absolute_tolerance
            .max(self.config.relative_tolerance * n)
    }

    fn lipschitz_estimate(&self, t: f64) -> f64 {
        let x = self.initial_condition();
        crate::norms::frobenius_mag(&self.field.derivative(Interval::point(t), &x))
    }

    fn probe_first_order(&mut self, t: f64) -> bool {
        let x = self.initial_condition();
        enclosure(&self.field, t, &x, self.step).is_ok()
    }

    fn seed_remainder(&mut self, t: f64, h: f64) -> bool {
        let x = self.initial_condition();
        let enc = match enclosure(&self.field, t, &x, h) {
            Ok(enc) => enc,
            Err(_) => return false,
        };
        let (jac, hess, _) = c2_enclosure(&self.field, t, h, &enc);
        let dim = self.dimension();
        let mut crude: Vec<Interval> = Vec::with_capacity(self.jet_len());
        crude.extend(enc.iter().copied());
        for &j in &self.active_columns {
            for i in 0..dim {
                crude.push(jac[(i, j)]);
            }
        }
        for &(j, c) in &self.active_pairs {
            for i in 0..dim {
                crude.push(hess.get(i, j, c));
            }
        }
        self.recompute_remainder(t, &crude);
        let last = self.config.order + 1;
        (0..self.jet_len()).all(|k| self.remainder_entry(last, k).is_finite())
    }
}

impl<F: C2VectorField<Interval>> HighOrderTarget for C2Solver<F> {
    fn jet_len(&self) -> usize {
        let dim = self.dimension();
        dim + dim * self.active_columns.len() + dim * self.active_pairs.len()
    }

    fn order(&self) -> usize {
        self.config.order
    }

    fn step(&self) -> f64 {
        self.step
    }

    fn coefficient_entry(&self, row: usize, k: usize) -> Interval {
        let dim = self.dimension();
        let a = self.active_columns.len();
        if k < dim {
            self.curve.base().coefficient(k, row)
        } else if k < dim + a * dim {
            let c = (k - dim) / dim;
            let i = (k - dim) % dim;
            self.curve
                .base()
                .matrix_coefficient(i, self.active_columns[c], row)
        } else {
            let k = k - dim - a * dim;
            let (j, c) = self.active_pairs[k / dim];
            self.curve.hessian_coefficient(k % dim, j, c, row)
        }
    }

    fn remainder_entry(&self, row: usize, k: usize) -> Interval {
        let dim = self.dimension();
        let a = self.active_columns.len();
        if k < dim {
            self.curve.base().remainder_coefficient(k, row)
        } else if k < dim + a * dim {
            let c = (k - dim) / dim;
            let i = (k - dim) % dim;
            self.curve
                .base()
                .matrix_remainder_coefficient(i, self.active_columns[c], row)
        } else {
            let k = k - dim - a * dim;
            let (j, c) = self.active_pairs[k / dim];
            self.curve.hessian_remainder_coefficient(k % dim, j, c, row)
        }
    }

    fn recompute_remainder(&mut self, t: f64, enc: &[Interval]) {
        let dim = self.dimension();
        let order = self.config.order;
        let a = self.active_columns.len();
        let time_range = Interval::point(t) + Interval::new(0.0, 1.0).mul_f64(self.step);
        let (rows, matrix_rows, hessian_rows) = self.curve.full_remainder_rows_mut();
        for i in 0..dim {
            rows[0][i] = enc[i];
        }
        for (c, &j) in self.active_columns.iter().enumerate() {
            for i in 0..dim {
                matrix_rows[0][(i, j)] = enc[dim + c * dim + i];
            }
        }
        for (p, &(j, c)) in self.active_pairs.iter().enumerate() {
            for i in 0..dim {
                hessian_rows[0].set(i, j, c, enc[dim + a * dim + p * dim + i]);
            }
        }
        self.field.ode_coefficients_c2(
            time_range,
            rows,
            matrix_rows,
            hessian_rows,
            order + 1,
            self.mask.as_ref(),
        );
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
                .map(|i| self.curve.base().coefficient(i, 0))
                .collect(),
        )
    }
}
