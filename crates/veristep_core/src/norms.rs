use crate::interval::Interval;
use nalgebra::{DMatrix, DVector};

/// A rigorous upper bound on the logarithmic norm of an interval matrix,
/// used to bound the growth of solutions to the variational equations over
/// one step (the Lohner bound).
pub trait LogNorm {
    fn log_norm(&self, m: &DMatrix<Interval>) -> f64;
}

/// Logarithmic norm induced by the sup norm:
/// mu(A) = max_i ( sup a_ii + sum_{j != i} |a_ij| ).
#[derive(Debug, Clone, Copy, Default)]
pub struct SupLogNorm;

impl LogNorm for SupLogNorm {
    fn log_norm(&self, m: &DMatrix<Interval>) -> f64 {
        let n = m.nrows();
        let mut result = f64::NEG_INFINITY;
        for i in 0..n {
            let mut row = m[(i, i)].right();
            for j in 0..n {
                if j != i {
                    row += m[(i, j)].mag();
                }
            }
            result = result.max(row);
        }
        result
    }
}

/// Upper bound on the Euclidean logarithmic norm, i.e. on the largest
/// eigenvalue of (A + A^T)/2, via the Gershgorin circles of the symmetrized
/// matrix. Looser than an eigensolve but rigorous and branch-free.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanLogNorm;

impl LogNorm for EuclideanLogNorm {
    fn log_norm(&self, m: &DMatrix<Interval>) -> f64 {
        let n = m.nrows();
        let mut result = f64::NEG_INFINITY;
        for i in 0..n {
            let mut row = m[(i, i)].right();
            for j in 0..n {
                if j != i {
                    let sym = (m[(i, j)] + m[(j, i)]).mul_f64(0.5);
                    row += sym.mag();
                }
            }
            result = result.max(row);
        }
        result
    }
}

/// Upper bound on the Euclidean norm magnitude of an interval vector.
pub fn eucl_norm_mag(v: &DVector<Interval>) -> f64 {
    v.iter().map(|x| x.mag() * x.mag()).sum::<f64>().sqrt()
}

/// Upper bound on the spectral norm of an interval matrix via the Frobenius
/// norm of entry magnitudes. Used for cheap Lipschitz estimates when
/// bootstrapping the first time step.
pub fn frobenius_mag(m: &DMatrix<Interval>) -> f64 {
    m.iter().map(|x| x.mag() * x.mag()).sum::<f64>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn imat(rows: usize, cols: usize, vals: &[f64]) -> DMatrix<Interval> {
        DMatrix::from_row_slice(
            rows,
            cols,
            &vals.iter().map(|&v| Interval::point(v)).collect::<Vec<_>>(),
        )
    }

    #[test]
    fn sup_log_norm_of_rotation_is_off_diagonal() {
        // x' = -y, y' = x has skew-symmetric derivative; mu_sup = 1.
        let m = imat(2, 2, &[0.0, -1.0, 1.0, 0.0]);
        assert!((SupLogNorm.log_norm(&m) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn euclidean_log_norm_of_rotation_is_zero() {
        // symmetrized part vanishes, so the Euclidean bound is 0
        let m = imat(2, 2, &[0.0, -1.0, 1.0, 0.0]);
        assert!(EuclideanLogNorm.log_norm(&m).abs() < 1e-12);
    }

    #[test]
    fn log_norm_can_be_negative() {
        let m = imat(2, 2, &[-3.0, 0.5, 0.5, -2.0]);
        assert!(EuclideanLogNorm.log_norm(&m) < 0.0);
        assert!(SupLogNorm.log_norm(&m) < 0.0);
    }

    #[test]
    fn vector_and_matrix_magnitudes() {
        let v = DVector::from_vec(vec![Interval::new(-3.0, 1.0), Interval::point(4.0)]);
        assert!((eucl_norm_mag(&v) - 5.0).abs() < 1e-12);
        let m = imat(2, 2, &[3.0, 0.0, 0.0, 4.0]);
        assert!((frobenius_mag(&m) - 5.0).abs() < 1e-12);
    }
}
