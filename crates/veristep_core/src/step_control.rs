//! Step-size selection policies. A policy talks to the solver through the
//! narrow [`StepControllable`] view: enough to read coefficient norms and
//! tolerances, adjust the trial step, and probe feasibility, without seeing
//! the solver's concrete type.

fn frexp(x: f64) -> (f64, i32) {
    if x == 0.0 || x.is_nan() || x.is_infinite() {
        return (x, 0);
    }
    let bits = x.to_bits();
    let exp_field = ((bits >> 52) & 0x7ff) as i32;
    if exp_field == 0 {
        // subnormal: renormalize first
        let (m, e) = frexp(x * 2f64.powi(64));
        return (m, e - 64);
    }
    let e = exp_field - 1022;
    let m = f64::from_bits((bits & !(0x7ffu64 << 52)) | (1022u64 << 52));
    (m, e)
}

fn ldexp(m: f64, e: i32) -> f64 {
    m * 2f64.powi(e)
}

/// Rounds `step` down to a coarse mantissa grid (32 representable values
/// per binade). Successive step proposals that differ only in low mantissa
/// bits then collapse to the same value, which keeps the step stable
/// between calls.
pub fn clear_mantissa_bits(step: f64) -> f64 {
    const GRID: f64 = 32.0;
    let (m, e) = frexp(step);
    if !m.is_finite() {
        return step;
    }
    ldexp((m * GRID).trunc() / GRID, e)
}

/// The view of a solver that step-control policies operate on.
pub trait StepControllable {
    fn order(&self) -> usize;

    /// Max magnitude over all tracked coefficient and remainder entries of
    /// Taylor row `row`.
    fn coeff_norm(&self, row: usize) -> f64;

    fn max_step(&self) -> f64;

    fn current_step(&self) -> f64;

    /// Sets the trial step without touching the step-control settings.
    fn adjust_step(&mut self, step: f64);

    /// max(absolute tolerance, relative tolerance * ||value coefficient 0||).
    fn effective_tolerance(&self) -> f64;

    /// Upper bound on ||Df(t, x0)||; a local Lipschitz estimate for
    /// bootstrapping the very first step.
    fn lipschitz_estimate(&self, t: f64) -> f64;

    /// Runs the first-order enclosure search at the current trial step and
    /// reports whether it succeeded.
    fn probe_first_order(&mut self, t: f64) -> bool;

    /// Seeds the remainder tables from a crude one-step Euler box at trial
    /// step `h`; reports whether the resulting coefficients stayed finite.
    fn seed_remainder(&mut self, t: f64, h: f64) -> bool;
}

/// A step-size selection policy.
pub trait StepControlPolicy {
    /// Proposes the next step from the coefficients already computed for
    /// the current step. The result is capped at the solver's max step.
    fn compute_next_time_step(&self, solver: &mut dyn StepControllable, t: f64) -> f64;

    /// Bootstraps the very first step, before any coefficients exist.
    fn init(&self, solver: &mut dyn StepControllable, t: f64);

    /// Hard floor: a validated step below this is a fatal condition at the
    /// solver, never a silent clamp.
    fn min_step_allowed(&self) -> f64;
}

/// Keeps a fixed step (capped at the solver's max step); never adapts.
#[derive(Debug, Clone, Copy)]
pub struct FixedStepControl {
    step: f64,
}

impl FixedStepControl {
    pub fn new(step: f64) -> FixedStepControl {
        FixedStepControl { step }
    }
}

impl Default for FixedStepControl {
    fn default() -> Self {
        FixedStepControl::new(1.0 / 1024.0)
    }
}

impl StepControlPolicy for FixedStepControl {
    fn compute_next_time_step(&self, solver: &mut dyn StepControllable, _t: f64) -> f64 {
        self.step.min(solver.max_step())
    }

    fn init(&self, _solver: &mut dyn StepControllable, _t: f64) {}

    fn min_step_allowed(&self) -> f64 {
        // the floor is irrelevant when the step never adapts
        1e-20
    }
}

/// Chooses the step from the norms of the last few Taylor terms: for each
/// trailing term i, step_i = (tolerance / ||coeff_i||)^(1/i); the minimum
/// over the examined terms wins. Taking more than one term guards against a
/// single term happening to be close to zero.
#[derive(Debug, Clone, Copy)]
pub struct LastTermsStepControl {
    pub terms: usize,
    pub min_step: f64,
}

impl LastTermsStepControl {
    pub fn new(terms: usize, min_step: f64) -> LastTermsStepControl {
        LastTermsStepControl { terms, min_step }
    }
}

impl Default for LastTermsStepControl {
    fn default() -> Self {
        LastTermsStepControl::new(1, 1.0 / 1048576.0)
    }
}

impl StepControlPolicy for LastTermsStepControl {
    fn compute_next_time_step(&self, solver: &mut dyn StepControllable, _t: f64) -> f64 {
        let order = solver.order();
        let tolerance = solver.effective_tolerance();
        let mut opt = 1.5 * solver.max_step();
        let lowest = order.saturating_sub(self.terms);
        for i in (lowest + 1..=order.max(1)).rev() {
            let norm = solver.coeff_norm(i);
            if norm == 0.0 {
                continue;
            }
            let step_i = ((tolerance / norm).ln() / i as f64).exp();
            opt = opt.min(step_i);
        }
        opt = opt.max(self.min_step);
        opt = clear_mantissa_bits(opt);
        opt.min(solver.max_step())
    }

    fn init(&self, solver: &mut dyn StepControllable, t: f64) {
        let lip = solver.lipschitz_estimate(t);
        let scale = if lip == 0.0 || !lip.is_finite() {
            1.0
        } else {
            1.0 / lip
        };
        let mut h = scale.min(1.0).min(solver.max_step());
        while h > self.min_step {
            if solver.seed_remainder(t, h) {
                break;
            }
            h *= 0.5;
        }
        solver.adjust_step(h);
    }

    fn min_step_allowed(&self) -> f64 {
        self.min_step
    }
}

/// Probes the first-order enclosure search directly: shrinks a generous
/// guess until the search succeeds and reports a fraction of the largest
/// feasible step. Used when the series-based estimate is unreliable.
#[derive(Debug, Clone, Copy)]
pub struct EnclosureProbingStepControl {
    pub min_step: f64,
    pub step_factor: f64,
}

impl EnclosureProbingStepControl {
    pub fn new(min_step: f64, step_factor: f64) -> EnclosureProbingStepControl {
        EnclosureProbingStepControl {
            min_step,
            step_factor,
        }
    }
}

impl Default for EnclosureProbingStepControl {
    fn default() -> Self {
        EnclosureProbingStepControl::new(1.0 / 1048576.0, 0.25)
    }
}

impl StepControlPolicy for EnclosureProbingStepControl {
    fn compute_next_time_step(&self, solver: &mut dyn StepControllable, t: f64) -> f64 {
        let tolerance = solver.effective_tolerance();
        let factor = (solver.order() as f64 / -tolerance.ln()).min(1.0).max(self.step_factor);
        let mut probe = solver.current_step() / factor * 1.5;
        solver.adjust_step(probe);
        while probe >= self.min_step {
            if solver.probe_first_order(t) {
                break;
            }
            probe *= 0.8;
            solver.adjust_step(probe);
        }
        let mut result = probe * factor;
        result = clear_mantissa_bits(result);
        result = result.max(self.min_step);
        result.min(solver.max_step())
    }

    fn init(&self, solver: &mut dyn StepControllable, t: f64) {
        let lip = solver.lipschitz_estimate(t);
        let scale = if lip == 0.0 || !lip.is_finite() {
            1.0
        } else {
            1.0 / lip
        };
        let h = scale.min(1.0).min(solver.max_step());
        solver.adjust_step(h);
    }

    fn min_step_allowed(&self) -> f64 {
        self.min_step
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockSolver {
        order: usize,
        norms: Vec<f64>,
        max_step: f64,
        step: f64,
        tolerance: f64,
        feasible_below: f64,
    }

    impl StepControllable for MockSolver {
        fn order(&self) -> usize {
            self.order
        }
        fn coeff_norm(&self, row: usize) -> f64 {
            self.norms[row]
        }
        fn max_step(&self) -> f64 {
            self.max_step
        }
        fn current_step(&self) -> f64 {
            self.step
        }
        fn adjust_step(&mut self, step: f64) {
            self.step = step;
        }
        fn effective_tolerance(&self) -> f64 {
            self.tolerance
        }
        fn lipschitz_estimate(&self, _t: f64) -> f64 {
            2.0
        }
        fn probe_first_order(&mut self, _t: f64) -> bool {
            self.step < self.feasible_below
        }
        fn seed_remainder(&mut self, _t: f64, h: f64) -> bool {
            h < self.feasible_below
        }
    }

    fn mock(order: usize) -> MockSolver {
        MockSolver {
            order,
            norms: vec![1.0; order + 2],
            max_step: 1.0,
            step: 0.5,
            tolerance: 1e-10,
            feasible_below: 0.25,
        }
    }

    #[test]
    fn clear_mantissa_is_monotone_and_idempotent() {
        for &x in &[0.3, 1.0 / 3.0, 0.7182818, 1024.125, 3.5e-9] {
            let c = clear_mantissa_bits(x);
            assert!(c <= x);
            assert!(c > 0.5 * x);
            assert_eq!(clear_mantissa_bits(c), c);
        }
    }

    #[test]
    fn last_terms_step_obeys_max_step_cap() {
        let mut s = mock(6);
        // tiny norms mean a huge suggested step, which must be capped
        s.norms = vec![1e-20; 8];
        let policy = LastTermsStepControl::default();
        let h = policy.compute_next_time_step(&mut s, 0.0);
        assert!(h <= s.max_step);
    }

    #[test]
    fn last_terms_step_scales_with_tolerance() {
        let policy = LastTermsStepControl::new(1, 1e-10);
        let mut tight = mock(6);
        tight.tolerance = 1e-14;
        let mut loose = mock(6);
        loose.tolerance = 1e-6;
        let h_tight = policy.compute_next_time_step(&mut tight, 0.0);
        let h_loose = policy.compute_next_time_step(&mut loose, 0.0);
        assert!(h_tight < h_loose);
    }

    #[test]
    fn last_terms_init_halves_until_seeding_succeeds() {
        let mut s = mock(4);
        let policy = LastTermsStepControl::default();
        policy.init(&mut s, 0.0);
        assert!(s.step < 0.25);
        assert!(s.step >= policy.min_step);
    }

    #[test]
    fn probing_policy_finds_a_feasible_step() {
        let mut s = mock(4);
        let policy = EnclosureProbingStepControl::default();
        let h = policy.compute_next_time_step(&mut s, 0.0);
        assert!(h > 0.0);
        assert!(h <= s.max_step);
    }

    #[test]
    fn fixed_policy_never_exceeds_max_step() {
        let mut s = mock(4);
        s.max_step = 0.01;
        let policy = FixedStepControl::new(0.5);
        assert_eq!(policy.compute_next_time_step(&mut s, 0.0), 0.01);
    }
}
