// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{Bitvector, GROUP_BITS};

/// Uncompressed scratch buffer for dense results
///
/// Groups are stored as raw 31-bit payloads, so setting a bit is one OR.
/// Used when the candidate set is dense and run compression during the
/// scan would thrash.
pub struct DenseScratch {
    groups: Vec<u32>,
    universe: usize,
}

impl DenseScratch {
    /// Creates a zeroed scratch covering `universe` rows.
    #[must_use]
    pub fn new(universe: usize) -> Self {
        Self {
            groups: vec![0; universe.div_ceil(GROUP_BITS)],
            universe,
        }
    }

    /// Sets row `idx`.
    pub fn set(&mut self, idx: usize) {
        debug_assert!(idx < self.universe);

        if let Some(g) = self.groups.get_mut(idx / GROUP_BITS) {
            *g |= 1 << (idx % GROUP_BITS);
        }
    }

    /// Compresses into the canonical representation.
    #[must_use]
    pub fn finalize(self) -> Bitvector {
        Bitvector::from_dense_groups(&self.groups, self.universe)
    }
}

/// Run-compressing builder for sparse results
///
/// Rows must be pushed in strictly increasing order; gaps become zero
/// fills immediately, so memory stays proportional to the hit count.
pub struct SparseBuilder {
    inner: Bitvector,
    universe: usize,
}

impl SparseBuilder {
    /// Creates a builder covering `universe` rows.
    #[must_use]
    pub fn new(universe: usize) -> Self {
        Self {
            inner: Bitvector::new(),
            universe,
        }
    }

    /// Sets row `idx`; positions must strictly increase across calls.
    pub fn push(&mut self, idx: usize) {
        debug_assert!(idx >= self.inner.len(), "indices must strictly increase");
        debug_assert!(idx < self.universe);

        self.inner.append_run(false, idx - self.inner.len());
        self.inner.push(true);
    }

    /// Pads the remainder with zeros and returns the result.
    #[must_use]
    pub fn finalize(mut self) -> Bitvector {
        let rest = self.universe - self.inner.len();
        self.inner.append_run(false, rest);
        self.inner
    }
}

/// Result builder selected by candidate density
///
/// Scan kernels build their hit vector in an uncompressed scratch when the
/// candidate mask is dense (`universe >> 8 < candidates`) and in a
/// run-compressing builder otherwise. Both finalize to the same canonical
/// compressed representation.
pub enum HitBuilder {
    /// Uncompressed scratch
    Dense(DenseScratch),

    /// Run-compressing builder
    Sparse(SparseBuilder),
}

impl HitBuilder {
    /// Picks a builder for `universe` rows of which `candidates` are eligible.
    #[must_use]
    pub fn for_density(universe: usize, candidates: usize) -> Self {
        if universe >> 8 < candidates {
            Self::Dense(DenseScratch::new(universe))
        } else {
            Self::Sparse(SparseBuilder::new(universe))
        }
    }

    /// Sets row `idx`; positions must strictly increase across calls.
    pub fn set(&mut self, idx: usize) {
        match self {
            Self::Dense(b) => b.set(idx),
            Self::Sparse(b) => b.push(idx),
        }
    }

    /// Finalizes into the canonical compressed representation.
    #[must_use]
    pub fn finalize(self) -> Bitvector {
        match self {
            Self::Dense(b) => b.finalize(),
            Self::Sparse(b) => b.finalize(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn dense_and_sparse_agree() {
        let universe = 10_000;
        let hits: Vec<usize> = (0..universe).filter(|i| i % 37 == 0).collect();

        let mut dense = DenseScratch::new(universe);
        let mut sparse = SparseBuilder::new(universe);

        for &i in &hits {
            dense.set(i);
            sparse.push(i);
        }

        let a = dense.finalize();
        let b = sparse.finalize();

        assert_eq!(a, b);
        assert_eq!(hits.len(), a.count_ones());
        assert_eq!(universe, a.len());
    }

    #[test]
    fn density_heuristic() {
        // 10_000 >> 8 == 39
        assert!(matches!(
            HitBuilder::for_density(10_000, 40),
            HitBuilder::Dense(_)
        ));
        assert!(matches!(
            HitBuilder::for_density(10_000, 39),
            HitBuilder::Sparse(_)
        ));
    }

    #[test]
    fn empty_result() {
        let b = SparseBuilder::new(1_234);
        let v = b.finalize();

        assert_eq!(1_234, v.len());
        assert_eq!(0, v.count_ones());
    }
}
