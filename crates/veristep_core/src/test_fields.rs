//! Small hand-coded vector fields with explicit Taylor recurrences, used
//! across the crate's tests so that the solver machinery is exercised
//! against closed-form solutions.

use crate::hessian::HessianTensor;
use crate::jet::JetTensor;
use crate::traits::{C1VectorField, C2VectorField, CnVectorField, ColumnMask, Scalar, VectorField};
use nalgebra::{DMatrix, DVector};

fn recip<T: Scalar>(k: usize) -> T {
    T::one() / T::from_f64(k as f64)
}

/// Harmonic oscillator x' = -y, y' = x; solution rotates with period 2*pi.
pub(crate) struct Rotation;

impl<T: Scalar> VectorField<T> for Rotation {
    fn dimension(&self) -> usize {
        2
    }

    fn eval(&self, _t: T, x: &DVector<T>) -> DVector<T> {
        DVector::from_vec(vec![-x[1], x[0]])
    }

    fn ode_coefficients(&self, _t: T, rows: &mut [DVector<T>], order: usize) {
        for k in 0..order {
            let r = recip::<T>(k + 1);
            rows[k + 1][0] = -rows[k][1] * r;
            rows[k + 1][1] = rows[k][0] * r;
        }
    }
}

impl<T: Scalar> C1VectorField<T> for Rotation {
    fn derivative(&self, _t: T, _x: &DVector<T>) -> DMatrix<T> {
        DMatrix::from_row_slice(2, 2, &[T::zero(), -T::one(), T::one(), T::zero()])
    }

    fn ode_coefficients_c1(
        &self,
        t: T,
        rows: &mut [DVector<T>],
        matrix_rows: &mut [DMatrix<T>],
        order: usize,
        mask: Option<&ColumnMask>,
    ) {
        self.ode_coefficients(t, rows, order);
        for k in 0..order {
            let r = recip::<T>(k + 1);
            for m in 0..2 {
                if mask.map_or(false, |mk| !mk.is_active(m)) {
                    continue;
                }
                matrix_rows[k + 1][(0, m)] = -matrix_rows[k][(1, m)] * r;
                matrix_rows[k + 1][(1, m)] = matrix_rows[k][(0, m)] * r;
            }
        }
    }
}

impl<T: Scalar> C2VectorField<T> for Rotation {
    fn hessian(&self, _t: T, _x: &DVector<T>) -> HessianTensor<T> {
        HessianTensor::zeros(2)
    }

    fn ode_coefficients_c2(
        &self,
        t: T,
        rows: &mut [DVector<T>],
        matrix_rows: &mut [DMatrix<T>],
        hessian_rows: &mut [HessianTensor<T>],
        order: usize,
        mask: Option<&ColumnMask>,
    ) {
        self.ode_coefficients_c1(t, rows, matrix_rows, order, mask);
        // linear field: second variations propagate linearly with no source
        for k in 0..order {
            let r = recip::<T>(k + 1);
            for j in 0..2 {
                for c in j..2 {
                    let a = hessian_rows[k].get(0, j, c);
                    let b = hessian_rows[k].get(1, j, c);
                    hessian_rows[k + 1].set(0, j, c, -b * r);
                    hessian_rows[k + 1].set(1, j, c, a * r);
                }
            }
        }
    }
}

impl<T: Scalar> CnVectorField<T> for Rotation {
    fn degree(&self) -> usize {
        // linear flow: jets of any degree are exact
        usize::MAX
    }

    fn ode_coefficients_cn(
        &self,
        _t: T,
        jet_rows: &mut [JetTensor<T>],
        order: usize,
        mask: Option<&[bool]>,
    ) {
        let positions = jet_rows[0].positions();
        for k in 0..order {
            let r = recip::<T>(k + 1);
            for p in 0..positions {
                if mask.map_or(false, |mk| !mk[p]) {
                    continue;
                }
                let a = jet_rows[k].get(0, p);
                let b = jet_rows[k].get(1, p);
                jet_rows[k + 1].set(0, p, -b * r);
                jet_rows[k + 1].set(1, p, a * r);
            }
        }
    }
}

/// One-dimensional x' = x^2; from x(0) = 1 the solution 1/(1-t) blows up at
/// t = 1, which makes it the canonical step-floor stressor.
pub(crate) struct Quadratic;

impl<T: Scalar> VectorField<T> for Quadratic {
    fn dimension(&self) -> usize {
        1
    }

    fn eval(&self, _t: T, x: &DVector<T>) -> DVector<T> {
        DVector::from_vec(vec![x[0] * x[0]])
    }

    fn ode_coefficients(&self, _t: T, rows: &mut [DVector<T>], order: usize) {
        // a_{k+1} = (1/(k+1)) * sum_{i<=k} a_i a_{k-i}
        for k in 0..order {
            let mut s = T::zero();
            for i in 0..=k {
                s += rows[i][0] * rows[k - i][0];
            }
            rows[k + 1][0] = s * recip::<T>(k + 1);
        }
    }
}

impl<T: Scalar> C1VectorField<T> for Quadratic {
    fn derivative(&self, _t: T, x: &DVector<T>) -> DMatrix<T> {
        DMatrix::from_row_slice(1, 1, &[T::from_f64(2.0) * x[0]])
    }

    fn ode_coefficients_c1(
        &self,
        t: T,
        rows: &mut [DVector<T>],
        matrix_rows: &mut [DMatrix<T>],
        order: usize,
        mask: Option<&ColumnMask>,
    ) {
        self.ode_coefficients(t, rows, order);
        if mask.map_or(false, |mk| !mk.is_active(0)) {
            return;
        }
        let two = T::from_f64(2.0);
        for k in 0..order {
            let mut s = T::zero();
            for i in 0..=k {
                s += rows[i][0] * matrix_rows[k - i][(0, 0)];
            }
            matrix_rows[k + 1][(0, 0)] = two * s * recip::<T>(k + 1);
        }
    }
}

/// Three-dimensional x' = y, y' = z, z' = 1 - y - x^2/2, which commutes
/// with the reversing symmetry R(x, y, z) = (-x, y, -z) composed with time
/// reversal.
pub(crate) struct Reversing;

impl<T: Scalar> VectorField<T> for Reversing {
    fn dimension(&self) -> usize {
        3
    }

    fn eval(&self, _t: T, x: &DVector<T>) -> DVector<T> {
        let half = T::from_f64(0.5);
        DVector::from_vec(vec![x[1], x[2], T::one() - x[1] - half * x[0] * x[0]])
    }

    fn ode_coefficients(&self, _t: T, rows: &mut [DVector<T>], order: usize) {
        let half = T::from_f64(0.5);
        for k in 0..order {
            let r = recip::<T>(k + 1);
            let mut conv = T::zero();
            for i in 0..=k {
                conv += rows[i][0] * rows[k - i][0];
            }
            let constant = if k == 0 { T::one() } else { T::zero() };
            rows[k + 1][0] = rows[k][1] * r;
            rows[k + 1][1] = rows[k][2] * r;
            rows[k + 1][2] = (constant - rows[k][1] - half * conv) * r;
        }
    }
}

impl<T: Scalar> C1VectorField<T> for Reversing {
    fn derivative(&self, _t: T, x: &DVector<T>) -> DMatrix<T> {
        let z = T::zero();
        let o = T::one();
        DMatrix::from_row_slice(3, 3, &[z, o, z, z, z, o, -x[0], -o, z])
    }

    fn ode_coefficients_c1(
        &self,
        t: T,
        rows: &mut [DVector<T>],
        matrix_rows: &mut [DMatrix<T>],
        order: usize,
        mask: Option<&ColumnMask>,
    ) {
        self.ode_coefficients(t, rows, order);
        for k in 0..order {
            let r = recip::<T>(k + 1);
            for m in 0..3 {
                if mask.map_or(false, |mk| !mk.is_active(m)) {
                    continue;
                }
                let mut conv = T::zero();
                for i in 0..=k {
                    conv += rows[i][0] * matrix_rows[k - i][(0, m)];
                }
                matrix_rows[k + 1][(0, m)] = matrix_rows[k][(1, m)] * r;
                matrix_rows[k + 1][(1, m)] = matrix_rows[k][(2, m)] * r;
                matrix_rows[k + 1][(2, m)] = (-conv - matrix_rows[k][(1, m)]) * r;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quadratic_recurrence_matches_geometric_series() {
        // 1/(1-t) = sum t^k, so all coefficients from x(0)=1 are 1
        let field = Quadratic;
        let mut rows: Vec<DVector<f64>> = (0..6).map(|_| DVector::zeros(1)).collect();
        rows[0][0] = 1.0;
        field.ode_coefficients(0.0, &mut rows, 5);
        for row in &rows {
            assert_eq!(row[0], 1.0);
        }
    }

    #[test]
    fn rotation_recurrence_matches_cosine_series() {
        let field = Rotation;
        let mut rows: Vec<DVector<f64>> = (0..5).map(|_| DVector::zeros(2)).collect();
        rows[0][0] = 1.0;
        field.ode_coefficients(0.0, &mut rows, 4);
        // x(t) = cos t: 1, 0, -1/2, 0, 1/24
        let expected = [1.0, 0.0, -0.5, 0.0, 1.0 / 24.0];
        for (row, e) in rows.iter().zip(expected) {
            assert_eq!(row[0], e);
        }
    }

    #[test]
    fn reversing_field_anti_commutes_with_symmetry() {
        // f(R x) = -R f(x) with R(x, y, z) = (-x, y, -z)
        let field = Reversing;
        let x = DVector::from_vec(vec![0.3, -0.7, 1.1]);
        let rx = DVector::from_vec(vec![-x[0], x[1], -x[2]]);
        let f = field.eval(0.0, &x);
        let frx = field.eval(0.0, &rx);
        assert_eq!(frx[0], f[0]);
        assert_eq!(frx[1], -f[1]);
        assert_eq!(frx[2], f[2]);
    }
}
