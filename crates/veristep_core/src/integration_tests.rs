//! End-to-end properties of the validated integrator, exercised on fields
//! with closed-form solutions.

use crate::dispatch::{C0Box, C1Box, SetRepresentation};
use crate::error::SolverError;
use crate::interval::Interval;
use crate::solver::c2::C2Solver;
use crate::solver::cn::CnSolver;
use crate::solver::{Solver, SolverConfig};
use crate::step_control::{FixedStepControl, LastTermsStepControl};
use crate::test_fields::{Quadratic, Reversing, Rotation};
use crate::traits::ColumnMask;
use approx::assert_abs_diff_eq;
use nalgebra::{DMatrix, DVector};
use std::f64::consts::PI;

fn box_around(vals: &[f64], radius: f64) -> DVector<Interval> {
    DVector::from_vec(
        vals.iter()
            .map(|&v| Interval::new(v - radius, v + radius))
            .collect(),
    )
}

fn config(order: usize) -> SolverConfig {
    SolverConfig {
        order,
        ..SolverConfig::default()
    }
}

#[test]
fn oscillator_returns_to_its_initial_box_after_one_period() {
    let steps = 64usize;
    let h = 2.0 * PI / steps as f64;
    let mut solver = Solver::new(Rotation, config(8), Box::new(FixedStepControl::new(h)))
        .expect("solver");
    solver.set_step(h);

    let x0 = box_around(&[1.0, 0.0], 1e-10);
    let mut set = C1Box::new(x0.clone());
    let mut t = 0.0;
    for _ in 0..steps {
        set.move_set(&mut solver, &mut t).expect("validated step");
    }
    assert_abs_diff_eq!(t, 2.0 * PI, epsilon = 1e-12);

    let hull = set.hull();
    for i in 0..2 {
        assert!(
            x0[i].subset(&hull[i]),
            "coordinate {i}: {} not inside {}",
            x0[i],
            hull[i]
        );
    }
    // rotation by a full period: the accumulated Jacobian contains Id
    let jac = set.jacobian();
    for i in 0..2 {
        for j in 0..2 {
            let expected = if i == j { 1.0 } else { 0.0 };
            assert!(jac[(i, j)].contains(expected));
        }
    }
}

#[test]
fn remainder_shrinks_by_two_to_the_order_per_halving() {
    let order = 4;
    let mut solver = Solver::new(Rotation, config(order), Box::new(FixedStepControl::new(0.1)))
        .expect("solver");
    let x = box_around(&[1.0, 0.0], 0.0);

    let mut widths = Vec::new();
    let mut h = 0.1;
    for _ in 0..4 {
        solver.set_step(h);
        let data = solver.enclose_c0_map(0.0, &x).expect("validated step");
        let w = (0..2).map(|i| data.remainder[i].mag()).fold(0.0, f64::max);
        assert!(w > 0.0);
        widths.push(w);
        h *= 0.5;
    }
    for pair in widths.windows(2) {
        assert!(
            pair[0] / pair[1] >= (1u64 << order) as f64,
            "ratio {} below 2^{order}",
            pair[0] / pair[1]
        );
    }
}

fn reverse(v: &DVector<Interval>) -> DVector<Interval> {
    DVector::from_vec(vec![-v[0], v[1], -v[2]])
}

#[test]
fn reversing_symmetry_round_trip_re_encloses_the_start() {
    // the field anti-commutes with R(x,y,z) = (-x,y,-z), so
    // R . phi_T . R . phi_T = identity
    let steps = 8usize;
    let h = 0.5 / steps as f64;
    let x0 = box_around(&[0.0, 1.0, 0.0], 0.0);

    let run = |start: DVector<Interval>| -> (DVector<Interval>, DMatrix<Interval>) {
        let mut solver =
            Solver::new(Reversing, config(10), Box::new(FixedStepControl::new(h)))
                .expect("solver");
        solver.set_step(h);
        let mut set = C1Box::new(start);
        let mut t = 0.0;
        for _ in 0..steps {
            set.move_set(&mut solver, &mut t).expect("validated step");
        }
        (set.hull(), set.jacobian().clone())
    };

    let (y, j1) = run(x0.clone());
    let (z, j2) = run(reverse(&y));
    let back = reverse(&z);
    for i in 0..3 {
        assert!(
            back[i].contains(x0[i].mid()),
            "coordinate {i}: {} lost {}",
            back[i],
            x0[i]
        );
    }

    // chain rule across the round trip: R J2 R J1 contains Id
    let r = DMatrix::from_diagonal(&DVector::from_vec(vec![
        -Interval::ONE,
        Interval::ONE,
        -Interval::ONE,
    ]));
    let m = (&r * &j2) * (&r * &j1);
    for i in 0..3 {
        for j in 0..3 {
            let expected = if i == j { 1.0 } else { 0.0 };
            assert!(m[(i, j)].contains(expected), "entry ({i},{j}) = {}", m[(i, j)]);
        }
    }
}

#[test]
fn blow_up_past_the_horizon_fails_instead_of_lying() {
    // x' = x^2 from 1 blows up at t = 1; a fixed step of 2 cannot validate
    let mut solver = Solver::new(Quadratic, config(12), Box::new(FixedStepControl::new(2.0)))
        .expect("solver");
    solver.set_step(2.0);
    let x = box_around(&[1.0], 0.0);
    let err = solver.enclose_c0_map(0.0, &x).unwrap_err();
    assert!(matches!(err, SolverError::EnclosureNotFound { .. }));
}

#[test]
fn adaptive_step_floor_is_fatal_near_a_blow_up() {
    // from x = 100 the blow-up is at t = 0.01, below the policy floor
    let mut solver = Solver::new(
        Quadratic,
        config(8),
        Box::new(LastTermsStepControl::new(1, 0.05)),
    )
    .expect("solver");
    let x = box_around(&[100.0], 0.0);
    let mut t = 0.0;
    let mut set = C0Box::new(x);
    let mut failed = false;
    for _ in 0..100 {
        match set.move_set(&mut solver, &mut t) {
            Ok(()) => {}
            Err(SolverError::EnclosureNotFound { .. }) => {
                failed = true;
                break;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert!(failed, "integration silently crossed the blow-up at t = 0.01");
    assert!(t < 0.01);
}

#[test]
fn max_step_caps_every_proposal() {
    let cfg = SolverConfig {
        order: 6,
        max_step: 0.01,
        ..SolverConfig::default()
    };
    // fixed policy asking for far more than the cap
    let mut solver =
        Solver::new(Rotation, cfg, Box::new(FixedStepControl::new(1.0))).expect("solver");
    let x = box_around(&[1.0, 0.0], 0.0);
    let data = solver.enclose_c0_map(0.0, &x).expect("validated step");
    assert!(data.step <= 0.01);

    // adaptive proposal on a slow field is capped as well
    let mut solver =
        Solver::new(Rotation, cfg, Box::new(LastTermsStepControl::default())).expect("solver");
    let data = solver.enclose_c0_map(0.0, &x).expect("validated step");
    assert!(data.step <= 0.01);
}

#[test]
fn coefficient_computation_is_idempotent() {
    let mut solver = Solver::new(Rotation, config(10), Box::new(FixedStepControl::new(0.1)))
        .expect("solver");
    let x = box_around(&[0.3, -0.4], 1e-6);
    solver.compute_coefficients(0.0, &x);
    let first: Vec<Interval> = (0..=10)
        .flat_map(|r| (0..2).map(move |i| (i, r)))
        .map(|(i, r)| solver.curve().coefficient(i, r))
        .collect();
    solver.compute_coefficients(0.0, &x);
    let second: Vec<Interval> = (0..=10)
        .flat_map(|r| (0..2).map(move |i| (i, r)))
        .map(|(i, r)| solver.curve().coefficient(i, r))
        .collect();
    assert_eq!(first, second);
}

#[test]
fn masked_columns_are_never_written_and_others_are_unchanged() {
    let x = box_around(&[1.0, 0.0], 1e-8);
    let h = 0.05;

    let mut unmasked = Solver::new(Rotation, config(8), Box::new(FixedStepControl::new(h)))
        .expect("solver");
    unmasked.set_step(h);
    let full = unmasked.enclose_c1_map(0.0, &x).expect("validated step");

    let mut masked = Solver::new(Rotation, config(8), Box::new(FixedStepControl::new(h)))
        .expect("solver");
    masked.set_step(h);
    masked
        .set_mask(Some(ColumnMask::keep(2, &[0])))
        .expect("mask");
    let partial = masked.enclose_c1_map(0.0, &x).expect("validated step");

    for i in 0..2 {
        // masked column: untouched storage reads back as zero
        assert_eq!(partial.jac_phi[(i, 1)], Interval::ZERO);
        for r in 0..=8 {
            assert_eq!(masked.curve().matrix_coefficient(i, 1, r), Interval::ZERO);
        }
        // kept column agrees with the unmasked run
        assert_eq!(partial.jac_phi[(i, 0)], full.jac_phi[(i, 0)]);
    }
}

#[test]
fn c0_map_honors_the_column_mask() {
    let x = box_around(&[1.0, 0.0], 1e-8);
    let h = 0.05;
    let mut solver =
        Solver::new(Rotation, config(8), Box::new(FixedStepControl::new(h))).expect("solver");
    solver.set_step(h);
    solver
        .set_mask(Some(ColumnMask::keep(2, &[0])))
        .expect("mask");
    let data = solver.enclose_c0_map(0.0, &x).expect("validated step");
    for i in 0..2 {
        assert_eq!(data.jac_phi[(i, 1)], Interval::ZERO);
        assert_eq!(data.jac_enclosure[(i, 1)], Interval::ZERO);
    }
    // the kept column still encloses the true variational solution
    assert!(data.jac_enclosure[(0, 0)].contains(1.0));
    assert!(data.jac_phi[(1, 0)].contains(h.sin()));
}

#[test]
fn c2_solver_tracks_zero_hessian_on_a_linear_field() {
    let h = 0.05;
    let mut solver = C2Solver::new(Rotation, config(8), Box::new(FixedStepControl::new(h)))
        .expect("solver");
    solver.set_step(h);
    let x = box_around(&[1.0, 0.0], 1e-9);
    let data = solver.enclose_c2_map(0.0, &x).expect("validated step");
    // the flow is linear, so second partials vanish identically
    for i in 0..2 {
        for j in 0..2 {
            for c in j..2 {
                assert!(data.hessian_phi.get(i, j, c).contains(0.0));
            }
        }
    }
    assert!(data.phi[0].contains(h.cos()));
    assert!(data.phi[1].contains(h.sin()));
    assert!(data.jac_phi[(0, 0)].contains(h.cos()));
}

#[test]
fn cn_solver_jet_matches_the_rotation_flow() {
    let h = 0.1;
    let mut solver = CnSolver::new(Rotation, 2, config(10), Box::new(FixedStepControl::new(h)))
        .expect("solver");
    solver.set_step(h);
    let x = box_around(&[1.0, 0.0], 0.0);
    let data = solver.enclose_cn_map(0.0, &x).expect("validated step");

    let indexer = solver.curve().indexer();
    let p_x = indexer.position(&[1, 0]).expect("position of d/dx0");
    let p_y = indexer.position(&[0, 1]).expect("position of d/dy0");
    // first-order jet = the rotation matrix columns
    assert!(data.jet_phi.get(0, p_x).contains(h.cos()));
    assert!(data.jet_phi.get(1, p_x).contains(h.sin()));
    assert!(data.jet_phi.get(0, p_y).contains(-h.sin()));
    assert!(data.jet_phi.get(1, p_y).contains(h.cos()));
    // the flow is linear: second-order jet entries vanish
    let p_xx = indexer.position(&[2, 0]).expect("position of d2/dx0^2");
    assert!(data.jet_phi.get(0, p_xx).contains(0.0));
    // the value itself sits at position 0
    assert!(data.jet_phi.get(0, 0).contains(h.cos()));
    assert!(data.jet_phi.get(1, 0).contains(h.sin()));
}

#[test]
fn cn_mask_keeps_the_dependency_closure() {
    let h = 0.1;
    let mut solver = CnSolver::new(Rotation, 2, config(8), Box::new(FixedStepControl::new(h)))
        .expect("solver");
    solver.set_step(h);
    let kept: &[usize] = &[1, 0];
    solver.set_jet_mask(&[kept]).expect("mask");
    let x = box_around(&[1.0, 0.0], 0.0);
    let data = solver.enclose_cn_map(0.0, &x).expect("validated step");

    let indexer = solver.curve().indexer();
    let p_x = indexer.position(&[1, 0]).expect("kept position");
    let p_xx = indexer.position(&[2, 0]).expect("masked position");
    assert!(data.jet_phi.get(0, p_x).contains(h.cos()));
    // masked position: untouched storage reads back as zero
    assert_eq!(data.jet_phi.get(0, p_xx), Interval::ZERO);
}
