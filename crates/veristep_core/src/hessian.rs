use crate::traits::Scalar;
use num_traits::Zero;

/// Symmetric second-derivative tensor H(i, j, c) = d^2 phi_i / dx_j dx_c,
/// stored with j <= c only. Flat storage, component-major: all (j, c) pairs
/// of component 0, then component 1, and so on.
#[derive(Debug, Clone, PartialEq)]
pub struct HessianTensor<T> {
    dimension: usize,
    data: Vec<T>,
}

impl<T: Scalar> HessianTensor<T> {
    pub fn zeros(dimension: usize) -> HessianTensor<T> {
        let pairs = dimension * (dimension + 1) / 2;
        HessianTensor {
            dimension,
            data: vec![T::zero(); dimension * pairs],
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn pair_index(&self, j: usize, c: usize) -> usize {
        let (j, c) = if j <= c { (j, c) } else { (c, j) };
        // offset of the (j, c) pair within the upper triangle, row-major
        j * self.dimension - j * (j + 1) / 2 + c
    }

    fn index(&self, i: usize, j: usize, c: usize) -> usize {
        let pairs = self.dimension * (self.dimension + 1) / 2;
        i * pairs + self.pair_index(j, c)
    }

    pub fn get(&self, i: usize, j: usize, c: usize) -> T {
        self.data[self.index(i, j, c)]
    }

    pub fn set(&mut self, i: usize, j: usize, c: usize, value: T) {
        let k = self.index(i, j, c);
        self.data[k] = value;
    }

    pub fn fill_zero(&mut self) {
        for v in &mut self.data {
            *v = T::zero();
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.data.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.data.iter_mut()
    }

    pub fn entry(&self, flat: usize) -> T {
        self.data[flat]
    }

    pub fn entry_mut(&mut self, flat: usize) -> &mut T {
        &mut self.data[flat]
    }
}
