use crate::hessian::HessianTensor;
use crate::interval::Interval;
use crate::jet::JetTensor;
use nalgebra::{DMatrix, DVector};
use num_traits::{One, Zero};
use std::fmt::Debug;
use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Sub, SubAssign};

/// Ring interface shared by the point scalar (`f64`) and the interval
/// scalar. Coefficient storage and Horner summation are generic over this;
/// algorithms that only make sense for intervals (enclosure search, range
/// evaluation) are inherent to the `Interval` instantiations, so the
/// point/interval distinction is resolved at the type level.
pub trait Scalar:
    Copy
    + PartialEq
    + Debug
    + 'static
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + AddAssign
    + SubAssign
    + MulAssign
    + DivAssign
    + Zero
    + One
{
    fn from_f64(v: f64) -> Self;
}

impl Scalar for f64 {
    fn from_f64(v: f64) -> f64 {
        v
    }
}

impl Scalar for Interval {
    fn from_f64(v: f64) -> Interval {
        Interval::point(v)
    }
}

/// Restricts which columns of the variational (Jacobian) tables are
/// computed. Masked-out columns are never written by the field recurrence,
/// never validated by the enclosure algorithm and must not be read back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMask {
    active: Vec<bool>,
}

impl ColumnMask {
    /// Mask keeping exactly the listed columns.
    pub fn keep(dimension: usize, columns: &[usize]) -> ColumnMask {
        let mut active = vec![false; dimension];
        for &c in columns {
            active[c] = true;
        }
        ColumnMask { active }
    }

    pub fn dimension(&self) -> usize {
        self.active.len()
    }

    pub fn is_active(&self, column: usize) -> bool {
        self.active[column]
    }

    pub fn active_columns(&self) -> impl Iterator<Item = usize> + '_ {
        self.active
            .iter()
            .enumerate()
            .filter_map(|(i, &a)| a.then_some(i))
    }
}

/// The vector field of an ODE x' = f(t, x), consumed through its own
/// Taylor-coefficient recurrence: given row 0 of `rows` (the expansion
/// point), the field fills rows `1..=order` with the time-derivative
/// coefficients of the local solution. Rows beyond `order` are left
/// untouched. Errors of the field itself (e.g. an interval division that
/// widened to the entire line) surface as diverging coefficients and are
/// caught downstream by the enclosure validation.
pub trait VectorField<T: Scalar> {
    fn dimension(&self) -> usize;

    /// f(t, x).
    fn eval(&self, t: T, x: &DVector<T>) -> DVector<T>;

    /// Fills `rows[1..=order]` from the seed in `rows[0]`.
    fn ode_coefficients(&self, t: T, rows: &mut [DVector<T>], order: usize);
}

/// A field that can additionally propagate the first variational equations
/// V' = Df(t, x) V.
pub trait C1VectorField<T: Scalar>: VectorField<T> {
    /// Df(t, x).
    fn derivative(&self, t: T, x: &DVector<T>) -> DMatrix<T>;

    /// Fills value rows `1..=order` and matrix rows `1..=order` from the
    /// seeds in row 0. Masked columns of the matrix rows are not written.
    fn ode_coefficients_c1(
        &self,
        t: T,
        rows: &mut [DVector<T>],
        matrix_rows: &mut [DMatrix<T>],
        order: usize,
        mask: Option<&ColumnMask>,
    );
}

/// A field that can propagate the second variational equations
/// H' = Df(t, x) H + D2f(t, x)(V, V).
pub trait C2VectorField<T: Scalar>: C1VectorField<T> {
    /// D2f(t, x) as a symmetric second-derivative form.
    fn hessian(&self, t: T, x: &DVector<T>) -> HessianTensor<T>;

    fn ode_coefficients_c2(
        &self,
        t: T,
        rows: &mut [DVector<T>],
        matrix_rows: &mut [DMatrix<T>],
        hessian_rows: &mut [HessianTensor<T>],
        order: usize,
        mask: Option<&ColumnMask>,
    );
}

/// A field that can propagate the full jet of partial derivatives of the
/// flow with respect to the initial condition, up to the degree of the
/// supplied jet rows.
pub trait CnVectorField<T: Scalar>: C1VectorField<T> {
    /// Maximal jet degree this field supports.
    fn degree(&self) -> usize;

    /// Fills jet rows `1..=order` from the seed in row 0. Entries whose
    /// multiindex is masked out are not written.
    fn ode_coefficients_cn(
        &self,
        t: T,
        jet_rows: &mut [JetTensor<T>],
        order: usize,
        mask: Option<&[bool]>,
    );
}
