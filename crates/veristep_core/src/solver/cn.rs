use crate::curve::{horner, JetCurve};
use crate::dispatch::Regularity;
use crate::enclosure::{
    compute_enclosure_and_remainder, enclosure, HighOrderTarget, ValidationOutcome,
};
use crate::error::SolverError;
use crate::interval::Interval;
use crate::jet::JetTensor;
use crate::solver::SolverConfig;
use crate::step_control::{FixedStepControl, StepControlPolicy, StepControllable};
use crate::traits::CnVectorField;
use nalgebra::DVector;

/// One validated step of the degree-n jet of the flow. Position 0 of the
/// jet tensors is the value itself; masked positions are zero filled and
/// carry no meaning.
#[derive(Debug, Clone)]
pub struct CnFlowStep {
    pub step: f64,
    /// Value series summed at the expansion center, remainder added.
    pub phi: DVector<Interval>,
    pub jet_phi: JetTensor<Interval>,
    pub jet_enclosure: JetTensor<Interval>,
}

/// Solver propagating the full jet of partials of the flow with respect to
/// the initial condition, up to a degree fixed at construction.
pub struct CnSolver<F> {
    field: F,
    curve: JetCurve<Interval>,
    policy: Box<dyn StepControlPolicy>,
    config: SolverConfig,
    step: f64,
    // dependency-closed position mask; position 0 is always kept
    mask: Option<Vec<bool>>,
    active_positions: Vec<usize>,
    initialized: bool,
}

impl<F: CnVectorField<Interval>> CnSolver<F> {
    pub fn new(
        field: F,
        degree: usize,
        config: SolverConfig,
        policy: Box<dyn StepControlPolicy>,
    ) -> Result<CnSolver<F>, SolverError> {
        let dim = field.dimension();
        if dim == 0 {
            return Err(SolverError::DimensionMismatch {
                expected: 1,
                actual: 0,
            });
        }
        if degree > field.degree() {
            return Err(SolverError::IncompatibleCapability {
                set: Regularity::Cn(degree),
                solver: Regularity::Cn(field.degree()),
            });
        }
        let curve = JetCurve::new(0.0, 0.0, dim, config.order, degree);
        let active_positions = (0..curve.indexer().len()).collect();
        Ok(CnSolver {
            field,
            curve,
            policy,
            config,
            step: config.max_step.min(0.015625),
            mask: None,
            active_positions,
            initialized: false,
        })
    }

    pub fn dimension(&self) -> usize {
        self.curve.dimension()
    }

    pub fn degree(&self) -> usize {
        self.curve.degree()
    }

    pub fn curve(&self) -> &JetCurve<Interval> {
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

    /// Restricts the tracked jet positions to the dependency closure of the
    /// listed multiindices (plus the value row, which is always tracked).
    pub fn set_jet_mask(&mut self, kept: &[&[usize]]) -> Result<(), SolverError> {
        for mi in kept {
            if mi.len() != self.dimension() {
                return Err(SolverError::DimensionMismatch {
                    expected: self.dimension(),
                    actual: mi.len(),
                });
            }
        }
        let mut mask = self.curve.indexer().closure_mask(kept);
        // the value row is always tracked
        mask[0] = true;
        self.active_positions = mask
            .iter()
            .enumerate()
            .filter_map(|(p, &a)| a.then_some(p))
            .collect();
        self.mask = Some(mask);
        self.curve.clear_coefficients();
        Ok(())
    }

    pub fn clear_jet_mask(&mut self) {
        self.mask = None;
        self.active_positions = (0..self.curve.indexer().len()).collect();
        self.curve.clear_coefficients();
    }

    /// Computes coefficients, proposes a step and validates the joint jet
    /// enclosure to the solver's degree.
    pub fn enclose_cn_map(
        &mut self,
        t: f64,
        x: &DVector<Interval>,
    ) -> Result<CnFlowStep, SolverError> {
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
        self.curve.set_domain(0.0, self.step);

        let (enc, rem) = loop {
            match compute_enclosure_and_remainder(self, t)? {
                ValidationOutcome::Accepted {
                    enclosure,
                    remainder,
                } => break (enclosure, remainder),
                ValidationOutcome::StepShrunk => {
                    self.curve.set_domain(0.0, self.step);
                }
            }
        };

        let order = self.config.order;
        let hi = Interval::point(self.step);
        let mut phi = self.curve.evaluate(self.step)?;
        let mut jet_phi = JetTensor::zeros(self.curve.indexer());
        let mut jet_enclosure = JetTensor::zeros(self.curve.indexer());
        for (slot, &p) in self.active_positions.iter().enumerate() {
            for i in 0..dim {
                let k = slot * dim + i;
                let sum = horner(|r| self.curve.jet_coefficient(i, p, r), order, hi);
                jet_phi.set(i, p, sum + rem[k]);
                jet_enclosure.set(i, p, enc[k]);
                if p == 0 {
                    phi[i] += rem[k];
                }
            }
        }

        Ok(CnFlowStep {
            step: self.step,
            phi,
            jet_phi,
            jet_enclosure,
        })
    }

    fn compute_coefficients_at_center(&mut self, t: f64, center: &DVector<Interval>) {
        let order = self.config.order;
        let rows = self.curve.center_rows_mut();
        rows[0].copy_from(center);
        self.field.ode_coefficients(Interval::point(t), rows, order);
    }

    fn compute_coefficients(&mut self, t: f64, x: &DVector<Interval>) {
        let dim = self.dimension();
        let order = self.config.order;
        // identity seeds: the value row from x, first-order positions from
        // the unit directions, everything higher zero
        let mut units = vec![0usize; dim];
        let mut first_order = Vec::with_capacity(dim);
        for j in 0..dim {
            units[j] = 1;
            first_order.push(self.curve.indexer().position(&units));
            units[j] = 0;
        }
        let rows = self.curve.jet_rows_mut();
        rows[0].fill_zero();
        for i in 0..dim {
            rows[0].set(i, 0, x[i]);
        }
        for (j, pos) in first_order.iter().enumerate() {
            if let Some(p) = pos {
                rows[0].set(j, *p, Interval::ONE);
            }
        }
        self.field
            .ode_coefficients_cn(Interval::point(t), rows, order, self.mask.as_deref());
    }
}

impl<F: CnVectorField<Interval>> StepControllable for CnSolver<F> {
    fn order(&self) -> usize {
        self.config.order
    }

    fn coeff_norm(&self, row: usize) -> f64 {
        let dim = self.dimension();
        let mut n = 0.0f64;
        for &p in &self.active_positions {
            for i in 0..dim {
                n = n.max(self.curve.jet_coefficient(i, p, row).mag());
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
            n = n.max(self.curve.jet_coefficient(i, 0, 0).mag());
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
        let dim = self.dimension();
        let mut crude: Vec<Interval> = Vec::with_capacity(self.jet_len());
        for &p in &self.active_positions {
            for i in 0..dim {
                if p == 0 {
                    crude.push(enc[i]);
                } else {
                    crude.push(Interval::new(-2.0, 2.0));
                }
            }
        }
        self.recompute_remainder(t, &crude);
        let last = self.config.order + 1;
        (0..self.jet_len()).all(|k| self.remainder_entry(last, k).is_finite())
    }
}

impl<F: CnVectorField<Interval>> HighOrderTarget for CnSolver<F> {
    fn jet_len(&self) -> usize {
        self.dimension() * self.active_positions.len()
    }

    fn order(&self) -> usize {
        self.config.order
    }

    fn step(&self) -> f64 {
        self.step
    }

    fn coefficient_entry(&self, row: usize, k: usize) -> Interval {
        let dim = self.dimension();
        let p = self.active_positions[k / dim];
        self.curve.jet_coefficient(k % dim, p, row)
    }

    fn remainder_entry(&self, row: usize, k: usize) -> Interval {
        let dim = self.dimension();
        let p = self.active_positions[k / dim];
        self.curve.jet_remainder_coefficient(k % dim, p, row)
    }

    fn recompute_remainder(&mut self, t: f64, enc: &[Interval]) {
        let dim = self.dimension();
        let order = self.config.order;
        let time_range = Interval::point(t) + Interval::new(0.0, 1.0).mul_f64(self.step);
        let rows = self.curve.jet_remainder_rows_mut();
        for (slot, &p) in self.active_positions.iter().enumerate() {
            for i in 0..dim {
                rows[0].set(i, p, enc[slot * dim + i]);
            }
        }
        self.field
            .ode_coefficients_cn(time_range, rows, order + 1, self.mask.as_deref());
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
                .map(|i| self.curve.jet_coefficient(i, 0, 0))
                .collect(),
        )
    }
}
