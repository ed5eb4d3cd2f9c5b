use crate::traits::Scalar;
use num_traits::Zero;
use std::cmp::Ordering;

/// Enumerates the multiindices of a fixed dimension up to a fixed degree in
/// graded lexicographic order, and ranks them. Position 0 is the zero
/// multiindex (the value itself), positions 1..=dim are the unit
/// multiindices (first-order partials), and so on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JetIndexer {
    dimension: usize,
    degree: usize,
    indices: Vec<Vec<usize>>,
}

fn graded_lex(a: &[usize], b: &[usize]) -> Ordering {
    let da: usize = a.iter().sum();
    let db: usize = b.iter().sum();
    da.cmp(&db).then_with(|| a.cmp(b))
}

impl JetIndexer {
    pub fn new(dimension: usize, degree: usize) -> JetIndexer {
        assert!(dimension > 0, "zero-dimensional jet");
        let mut indices = Vec::new();
        let mut current = vec![0usize; dimension];
        for deg in 0..=degree {
            compositions(deg, 0, &mut current, &mut indices);
        }
        JetIndexer {
            dimension,
            degree,
            indices,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    /// Number of multiindices, i.e. C(dimension + degree, degree).
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn multiindex(&self, position: usize) -> &[usize] {
        &self.indices[position]
    }

    pub fn position(&self, multiindex: &[usize]) -> Option<usize> {
        self.indices
            .binary_search_by(|probe| graded_lex(probe, multiindex))
            .ok()
    }

    /// Builds a dependency-closed mask: keeping a multiindex keeps every
    /// multiindex pointwise below it (its recurrence inputs).
    pub fn closure_mask(&self, kept: &[&[usize]]) -> Vec<bool> {
        let mut mask = vec![false; self.len()];
        for (pos, mi) in self.indices.iter().enumerate() {
            if kept
                .iter()
                .any(|k| mi.iter().zip(k.iter()).all(|(m, kk)| m <= kk))
            {
                mask[pos] = true;
            }
        }
        mask
    }
}

fn compositions(remaining: usize, slot: usize, current: &mut Vec<usize>, out: &mut Vec<Vec<usize>>) {
    if slot == current.len() - 1 {
        current[slot] = remaining;
        out.push(current.clone());
        current[slot] = 0;
        return;
    }
    // Ascending first-slot values keep each degree block in lexicographic
    // order, which position() relies on for its binary search.
    for v in 0..=remaining {
        current[slot] = v;
        compositions(remaining - v, slot + 1, current, out);
        current[slot] = 0;
    }
}

/// One Taylor row of the full jet: for every component of the flow and every
/// multiindex up to the degree, the coefficient of t^k of that partial
/// derivative. Flat storage, component-major.
#[derive(Debug, Clone, PartialEq)]
pub struct JetTensor<T> {
    dimension: usize,
    positions: usize,
    data: Vec<T>,
}

impl<T: Scalar> JetTensor<T> {
    pub fn zeros(indexer: &JetIndexer) -> JetTensor<T> {
        JetTensor {
            dimension: indexer.dimension(),
            positions: indexer.len(),
            data: vec![T::zero(); indexer.dimension() * indexer.len()],
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn positions(&self) -> usize {
        self.positions
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, component: usize, position: usize) -> T {
        self.data[component * self.positions + position]
    }

    pub fn set(&mut self, component: usize, position: usize, value: T) {
        self.data[component * self.positions + position] = value;
    }

    pub fn fill_zero(&mut self) {
        for v in &mut self.data {
            *v = T::zero();
        }
    }

    pub fn entry(&self, flat: usize) -> T {
        self.data[flat]
    }

    pub fn entry_mut(&mut self, flat: usize) -> &mut T {
        &mut self.data[flat]
    }

    /// Flat index of (component, position); the flattened layout the
    /// enclosure validation iterates.
    pub fn flat_index(&self, component: usize, position: usize) -> usize {
        component * self.positions + position
    }
}
