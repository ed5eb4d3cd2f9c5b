use crate::error::SolverError;
use crate::hessian::HessianTensor;
use crate::jet::JetTensor;
use crate::traits::{C1VectorField, C2VectorField, CnVectorField, ColumnMask, Scalar, VectorField};
use nalgebra::{DMatrix, DVector};

/// Affine vector field x' = A*x + b. Its flow is affine in the initial
/// condition, so the whole regularity ladder is exact: the Hessian is zero
/// and every jet position propagates through the same linear recurrence.
#[derive(Debug, Clone)]
pub struct LinearField<T> {
    a: DMatrix<T>,
    b: DVector<T>,
}

impl<T: Scalar> LinearField<T> {
    pub fn new(a: DMatrix<T>, b: DVector<T>) -> Result<LinearField<T>, SolverError> {
        if a.nrows() != a.ncols() || a.nrows() != b.len() {
            return Err(SolverError::DimensionMismatch {
                expected: b.len(),
                actual: a.nrows(),
            });
        }
        Ok(LinearField { a, b })
    }

    /// Pure linear part, x' = A*x.
    pub fn homogeneous(a: DMatrix<T>) -> Result<LinearField<T>, SolverError> {
        let dim = a.nrows();
        LinearField::new(a, DVector::zeros(dim))
    }

    pub fn matrix(&self) -> &DMatrix<T> {
        &self.a
    }

    pub fn offset(&self) -> &DVector<T> {
        &self.b
    }

    fn apply(&self, x: &DVector<T>) -> DVector<T> {
        let dim = self.b.len();
        let mut out = DVector::zeros(dim);
        for i in 0..dim {
            let mut s = T::zero();
            for j in 0..dim {
                s += self.a[(i, j)] * x[j];
            }
            out[i] = s;
        }
        out
    }
}

impl<T: Scalar> VectorField<T> for LinearField<T> {
    fn dimension(&self) -> usize {
        self.b.len()
    }

    fn eval(&self, _t: T, x: &DVector<T>) -> DVector<T> {
        self.apply(x) + &self.b
    }

    fn ode_coefficients(&self, _t: T, rows: &mut [DVector<T>], order: usize) {
        let dim = self.b.len();
        for k in 0..order {
            let r = T::one() / T::from_f64((k + 1) as f64);
            let next = self.apply(&rows[k]);
            for i in 0..dim {
                let src = if k == 0 { next[i] + self.b[i] } else { next[i] };
                rows[k + 1][i] = src * r;
            }
        }
    }
}

impl<T: Scalar> C1VectorField<T> for LinearField<T> {
    fn derivative(&self, _t: T, _x: &DVector<T>) -> DMatrix<T> {
        self.a.clone()
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
        let dim = self.b.len();
        for k in 0..order {
            let r = T::one() / T::from_f64((k + 1) as f64);
            for m in 0..dim {
                if mask.map_or(false, |mk| !mk.is_active(m)) {
                    continue;
                }
                for i in 0..dim {
                    let mut s = T::zero();
                    for j in 0..dim {
                        s += self.a[(i, j)] * matrix_rows[k][(j, m)];
                    }
                    matrix_rows[k + 1][(i, m)] = s * r;
                }
            }
        }
    }
}

impl<T: Scalar> C2VectorField<T> for LinearField<T> {
    fn hessian(&self, _t: T, _x: &DVector<T>) -> HessianTensor<T> {
        HessianTensor::zeros(self.b.len())
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
        let dim = self.b.len();
        for k in 0..order {
            let r = T::one() / T::from_f64((k + 1) as f64);
            for j in 0..dim {
                for c in j..dim {
                    for i in 0..dim {
                        let mut s = T::zero();
                        for p in 0..dim {
                            s += self.a[(i, p)] * hessian_rows[k].get(p, j, c);
                        }
                        hessian_rows[k + 1].set(i, j, c, s * r);
                    }
                }
            }
        }
    }
}

impl<T: Scalar> CnVectorField<T> for LinearField<T> {
    fn degree(&self) -> usize {
        // the flow is affine: jets of every degree are exact
        usize::MAX
    }

    fn ode_coefficients_cn(
        &self,
        _t: T,
        jet_rows: &mut [JetTensor<T>],
        order: usize,
        mask: Option<&[bool]>,
    ) {
        let dim = self.b.len();
        let positions = jet_rows[0].positions();
        for k in 0..order {
            let r = T::one() / T::from_f64((k + 1) as f64);
            for p in 0..positions {
                if mask.map_or(false, |mk| !mk[p]) {
                    continue;
                }
                for i in 0..dim {
                    let mut s = T::zero();
                    for j in 0..dim {
                        s += self.a[(i, j)] * jet_rows[k].get(j, p);
                    }
                    if p == 0 && k == 0 {
                        s += self.b[i];
                    }
                    jet_rows[k + 1].set(i, p, s * r);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interval::Interval;

    fn rotation() -> LinearField<f64> {
        let a = DMatrix::from_row_slice(2, 2, &[0.0, -1.0, 1.0, 0.0]);
        LinearField::homogeneous(a).unwrap()
    }

    #[test]
    fn rejects_mismatched_shapes() {
        let a = DMatrix::from_row_slice(2, 2, &[0.0, 1.0, 1.0, 0.0]);
        let b = DVector::from_vec(vec![0.0; 3]);
        assert!(LinearField::new(a, b).is_err());
    }

    #[test]
    fn affine_part_enters_only_the_first_coefficient() {
        // x' = 1 from x(0) = 0: coefficients 0, 1, 0, 0, ...
        let a = DMatrix::from_row_slice(1, 1, &[0.0]);
        let b = DVector::from_vec(vec![1.0]);
        let field = LinearField::new(a, b).unwrap();
        let mut rows: Vec<DVector<f64>> = (0..4).map(|_| DVector::zeros(1)).collect();
        field.ode_coefficients(0.0, &mut rows, 3);
        assert_eq!(rows[1][0], 1.0);
        assert_eq!(rows[2][0], 0.0);
        assert_eq!(rows[3][0], 0.0);
    }

    #[test]
    fn variational_coefficients_match_value_recurrence() {
        let field = rotation();
        let mut rows: Vec<DVector<f64>> = (0..4).map(|_| DVector::zeros(2)).collect();
        let mut mrows: Vec<DMatrix<f64>> = (0..4).map(|_| DMatrix::zeros(2, 2)).collect();
        rows[0][0] = 1.0;
        mrows[0] = DMatrix::identity(2, 2);
        field.ode_coefficients_c1(0.0, &mut rows, &mut mrows, 3, None);
        // columns of the variational series are the value series of the
        // unit initial conditions
        assert_eq!(mrows[1][(1, 0)], 1.0);
        assert_eq!(mrows[2][(0, 0)], -0.5);
        assert_eq!(mrows[1][(0, 1)], -1.0);
    }

    #[test]
    fn interval_instantiation_stays_exact_on_representable_data() {
        let a = DMatrix::from_row_slice(1, 1, &[Interval::point(2.0)]);
        let field = LinearField::homogeneous(a).unwrap();
        let mut rows: Vec<DVector<Interval>> = (0..3).map(|_| DVector::zeros(1)).collect();
        rows[0][0] = Interval::point(1.0);
        field.ode_coefficients(Interval::ZERO, &mut rows, 2);
        // e^{2t}: coefficients 1, 2, 2
        assert!(rows[1][0].is_point());
        assert_eq!(rows[1][0].left(), 2.0);
        assert_eq!(rows[2][0].left(), 2.0);
    }
}
