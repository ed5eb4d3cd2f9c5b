use crate::error::SolverError;
use crate::hessian::HessianTensor;
use crate::interval::Interval;
use crate::jet::{JetIndexer, JetTensor};
use crate::traits::Scalar;
use nalgebra::{DMatrix, DVector};
use num_traits::Zero;

/// Horner evaluation of the polynomial whose row-r coefficient is
/// `rows(r)`, at argument `h`.
pub(crate) fn horner<T: Scalar>(rows: impl Fn(usize) -> T, order: usize, h: T) -> T {
    let mut v = rows(order);
    for r in (0..order).rev() {
        v = v * h + rows(r);
    }
    v
}

/// Encloses the range of a scalar Taylor polynomial over the interval `h`.
///
/// If the derivative of the polynomial is sign-definite on `h`, the
/// polynomial is monotone there and the hull of the two endpoint values is a
/// tight enclosure. Otherwise the full Horner scheme with the interval
/// argument is used, which is always sound but wider. Evaluating every
/// entry with the interval argument would be correct too, but measurably
/// worse; this shortcut exists purely to control enclosure growth.
pub(crate) fn polynomial_range(
    rows: impl Fn(usize) -> Interval,
    order: usize,
    h: Interval,
) -> Interval {
    if order == 0 {
        return rows(0);
    }
    let mut der = rows(order).mul_f64(order as f64);
    for r in (1..order).rev() {
        der = der * h + rows(r).mul_f64(r as f64);
    }
    if der.contains_zero() {
        return horner(&rows, order, h);
    }
    let at_left = horner(&rows, order, Interval::point(h.left()));
    let at_right = horner(&rows, order, Interval::point(h.right()));
    Interval::hull(at_left, at_right)
}

/// Coefficient store for one solution curve: Taylor coefficients of the
/// value at the expansion center and at the full argument, first variational
/// (Jacobian) coefficients, and one extra remainder row computed an order
/// past the main table. Storage is allocated for `allocated_order + 2` rows
/// and grows only when the requested order exceeds the capacity.
#[derive(Debug)]
pub struct Curve<T> {
    dimension: usize,
    order: usize,
    allocated_order: usize,
    left: f64,
    right: f64,
    center: Vec<DVector<T>>,
    coefficients: Vec<DVector<T>>,
    remainder: Vec<DVector<T>>,
    matrix_coefficients: Vec<DMatrix<T>>,
    matrix_remainder: Vec<DMatrix<T>>,
}

impl<T: Scalar> Curve<T> {
    /// A curve valid for evaluation offsets in `[left, right]`.
    pub fn new(left: f64, right: f64, dimension: usize, order: usize) -> Curve<T> {
        let rows = order + 2;
        Curve {
            dimension,
            order,
            allocated_order: order,
            left,
            right,
            center: vec![DVector::zeros(dimension); rows],
            coefficients: vec![DVector::zeros(dimension); rows],
            remainder: vec![DVector::zeros(dimension); rows],
            matrix_coefficients: vec![DMatrix::zeros(dimension, dimension); rows],
            matrix_remainder: vec![DMatrix::zeros(dimension, dimension); rows],
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn order(&self) -> usize {
        self.order
    }

    /// Maximal order the current allocation can hold without reallocating.
    pub fn allocated_order(&self) -> usize {
        self.allocated_order
    }

    pub fn domain(&self) -> (f64, f64) {
        (self.left, self.right)
    }

    pub(crate) fn set_domain(&mut self, left: f64, right: f64) {
        self.left = left;
        self.right = right;
    }

    /// Changes the order. Grows the tables only when the new order exceeds
    /// the allocated capacity; otherwise this is O(1).
    pub fn set_order(&mut self, order: usize) {
        if order > self.allocated_order {
            let rows = order + 2;
            self.center.resize(rows, DVector::zeros(self.dimension));
            self.coefficients
                .resize(rows, DVector::zeros(self.dimension));
            self.remainder.resize(rows, DVector::zeros(self.dimension));
            self.matrix_coefficients
                .resize(rows, DMatrix::zeros(self.dimension, self.dimension));
            self.matrix_remainder
                .resize(rows, DMatrix::zeros(self.dimension, self.dimension));
            self.allocated_order = order;
        }
        self.order = order;
    }

    /// Zeroes every table; called when integration restarts from a new
    /// initial condition so no stale row can be consumed.
    pub fn clear_coefficients(&mut self) {
        for v in self.center.iter_mut().chain(self.coefficients.iter_mut()) {
            v.fill(T::zero());
        }
        for v in self.remainder.iter_mut() {
            v.fill(T::zero());
        }
        for m in self
            .matrix_coefficients
            .iter_mut()
            .chain(self.matrix_remainder.iter_mut())
        {
            m.fill(T::zero());
        }
    }

    pub fn center_coefficient(&self, i: usize, r: usize) -> T {
        self.center[r][i]
    }

    pub fn coefficient(&self, i: usize, r: usize) -> T {
        self.coefficients[r][i]
    }

    pub fn remainder_coefficient(&self, i: usize, r: usize) -> T {
        self.remainder[r][i]
    }

    pub fn matrix_coefficient(&self, i: usize, j: usize, r: usize) -> T {
        self.matrix_coefficients[r][(i, j)]
    }

    pub fn matrix_remainder_coefficient(&self, i: usize, j: usize, r: usize) -> T {
        self.matrix_remainder[r][(i, j)]
    }

    pub(crate) fn center_rows_mut(&mut self) -> &mut [DVector<T>] {
        &mut self.center
    }

    /// Split borrow for running the variational recurrence in place.
    pub(crate) fn value_and_matrix_rows_mut(
        &mut self,
    ) -> (&mut [DVector<T>], &mut [DMatrix<T>]) {
        (&mut self.coefficients, &mut self.matrix_coefficients)
    }

    pub(crate) fn value_and_matrix_remainder_rows_mut(
        &mut self,
    ) -> (&mut [DVector<T>], &mut [DMatrix<T>]) {
        (&mut self.remainder, &mut self.matrix_remainder)
    }

    /// Evaluates the truncated series at the center by Horner's scheme.
    /// `h` must lie in the validity domain recorded at construction.
    pub fn evaluate(&self, h: f64) -> Result<DVector<T>, SolverError> {
        if h < self.left || h > self.right {
            return Err(SolverError::Domain {
                argument: h,
                left: self.left,
                right: self.right,
            });
        }
        let arg = T::from_f64(h);
        let mut out = DVector::zeros(self.dimension);
        for i in 0..self.dimension {
            out[i] = horner(|r| self.center[r][i], self.order, arg);
        }
        Ok(out)
    }
}

impl Curve<Interval> {
    /// Encloses the range of the degree-`order` value polynomial (at the
    /// full argument) over `h`, coordinatewise, using the monotonicity
    /// shortcut of [`polynomial_range`].
    pub fn evaluate_range(&self, h: Interval) -> Result<DVector<Interval>, SolverError> {
        if h.left() < self.left || h.right() > self.right {
            return Err(SolverError::Domain {
                argument: h.right(),
                left: self.left,
                right: self.right,
            });
        }
        let mut out = DVector::zeros(self.dimension);
        for i in 0..self.dimension {
            out[i] = polynomial_range(|r| self.coefficients[r][i], self.order, h);
        }
        Ok(out)
    }
}

/// [`Curve`] extended with second variational (Hessian) tables.
#[derive(Debug)]
pub struct C2Curve<T> {
    base: Curve<T>,
    hessian: Vec<HessianTensor<T>>,
    hessian_remainder: Vec<HessianTensor<T>>,
}

impl<T: Scalar> C2Curve<T> {
    pub fn new(left: f64, right: f64, dimension: usize, order: usize) -> C2Curve<T> {
        let rows = order + 2;
        C2Curve {
            base: Curve::new(left, right, dimension, order),
            hessian: vec![HessianTensor::zeros(dimension); rows],
            hessian_remainder: vec![HessianTensor::zeros(dimension); rows],
        }
    }

    pub fn base(&self) -> &Curve<T> {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut Curve<T> {
        &mut self.base
    }

    pub fn set_order(&mut self, order: usize) {
        if order > self.base.allocated_order() {
            let rows = order + 2;
            let dim = self.base.dimension();
            self.hessian.resize(rows, HessianTensor::zeros(dim));
            self.hessian_remainder
                .resize(rows, HessianTensor::zeros(dim));
        }
        self.base.set_order(order);
    }

    pub fn clear_coefficients(&mut self) {
        self.base.clear_coefficients();
        for h in self
            .hessian
            .iter_mut()
            .chain(self.hessian_remainder.iter_mut())
        {
            h.fill_zero();
        }
    }

    pub fn hessian_coefficient(&self, i: usize, j: usize, c: usize, r: usize) -> T {
        self.hessian[r].get(i, j, c)
    }

    pub fn hessian_remainder_coefficient(&self, i: usize, j: usize, c: usize, r: usize) -> T {
        self.hessian_remainder[r].get(i, j, c)
    }

    /// Split borrow over the three full-argument tables for the in-place
    /// second-variational recurrence.
    pub(crate) fn full_rows_mut(
        &mut self,
    ) -> (&mut [DVector<T>], &mut [DMatrix<T>], &mut [HessianTensor<T>]) {
        let (values, matrices) = self.base.value_and_matrix_rows_mut();
        (values, matrices, &mut self.hessian)
    }

    pub(crate) fn full_remainder_rows_mut(
        &mut self,
    ) -> (&mut [DVector<T>], &mut [DMatrix<T>], &mut [HessianTensor<T>]) {
        let (values, matrices) = self.base.value_and_matrix_remainder_rows_mut();
        (values, matrices, &mut self.hessian_remainder)
    }
}

/// Coefficient store for the full-jet solver: the value and every partial
/// derivative up to the jet degree live in one [`JetTensor`] per Taylor row
/// (position 0 of the jet is the value itself). The center table is kept as
/// plain vectors, as only the value is sharpened at the center.
#[derive(Debug)]
pub struct JetCurve<T> {
    dimension: usize,
    order: usize,
    allocated_order: usize,
    left: f64,
    right: f64,
    indexer: JetIndexer,
    center: Vec<DVector<T>>,
    jets: Vec<JetTensor<T>>,
    jet_remainder: Vec<JetTensor<T>>,
}

impl<T: Scalar> JetCurve<T> {
    pub fn new(left: f64, right: f64, dimension: usize, order: usize, degree: usize) -> JetCurve<T> {
        let indexer = JetIndexer::new(dimension, degree);
        let rows = order + 2;
        JetCurve {
            dimension,
            order,
            allocated_order: order,
            left,
            right,
            center: vec![DVector::zeros(dimension); rows],
            jets: vec![JetTensor::zeros(&indexer); rows],
            jet_remainder: vec![JetTensor::zeros(&indexer); rows],
            indexer,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn allocated_order(&self) -> usize {
        self.allocated_order
    }

    pub fn degree(&self) -> usize {
        self.indexer.degree()
    }

    pub fn indexer(&self) -> &JetIndexer {
        &self.indexer
    }

    pub(crate) fn set_domain(&mut self, left: f64, right: f64) {
        self.left = left;
        self.right = right;
    }

    pub fn set_order(&mut self, order: usize) {
        if order > self.allocated_order {
            let rows = order + 2;
            self.center.resize(rows, DVector::zeros(self.dimension));
            self.jets.resize(rows, JetTensor::zeros(&self.indexer));
            self.jet_remainder
                .resize(rows, JetTensor::zeros(&self.indexer));
            self.allocated_order = order;
        }
        self.order = order;
    }

    pub fn clear_coefficients(&mut self) {
        for v in self.center.iter_mut() {
            v.fill(T::zero());
        }
        for j in self.jets.iter_mut().chain(self.jet_remainder.iter_mut()) {
            j.fill_zero();
        }
    }

    pub fn center_coefficient(&self, i: usize, r: usize) -> T {
        self.center[r][i]
    }

    pub fn jet_coefficient(&self, component: usize, position: usize, r: usize) -> T {
        self.jets[r].get(component, position)
    }

    pub fn jet_remainder_coefficient(&self, component: usize, position: usize, r: usize) -> T {
        self.jet_remainder[r].get(component, position)
    }

    pub(crate) fn center_rows_mut(&mut self) -> &mut [DVector<T>] {
        &mut self.center
    }

    pub(crate) fn jet_rows_mut(&mut self) -> &mut [JetTensor<T>] {
        &mut self.jets
    }

    pub(crate) fn jet_remainder_rows_mut(&mut self) -> &mut [JetTensor<T>] {
        &mut self.jet_remainder
    }

    pub fn evaluate(&self, h: f64) -> Result<DVector<T>, SolverError> {
        if h < self.left || h > self.right {
            return Err(SolverError::Domain {
                argument: h,
                left: self.left,
                right: self.right,
            });
        }
        let arg = T::from_f64(h);
        let mut out = DVector::zeros(self.dimension);
        for i in 0..self.dimension {
            out[i] = horner(|r| self.center[r][i], self.order, arg);
        }
        Ok(out)
    }
}
