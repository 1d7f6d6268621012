// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{decode_bitmaps, decode_f64s, encode_bitmaps, encode_f64s, Estimate, IndexOps};
use crate::{
    bitvector::SparseBuilder,
    coding::{Decode, DecodeError, Encode, EncodeError},
    predicate::Interval,
    Bitvector,
};
use std::io::{Read, Write};
use varint_rs::{VarintReader, VarintWriter};

/// Range-binned bitmap index
///
/// The column's `[min, max]` range is cut into equal-width bins, one
/// compressed bitmap per bin. Bins fully inside a query interval
/// contribute sure hits; the (at most two) edge bins contribute possible
/// hits that a candidate scan confirms.
#[derive(Clone, Debug)]
pub struct BinnedIndex {
    /// Bin edges, ascending; bin `i` covers `[edges[i], edges[i+1])`,
    /// the last bin is inclusive on both sides
    edges: Vec<f64>,

    /// One bitmap per bin
    bitmaps: Vec<Bitvector>,

    nrows: usize,
}

impl BinnedIndex {
    /// Builds the index over a full-length value array.
    ///
    /// Non-finite values fall outside every bin.
    #[must_use]
    pub fn build(values: &[f64], nrows: usize, nbins: usize) -> Self {
        debug_assert_eq!(values.len(), nrows);

        let finite = values.iter().copied().filter(|v| v.is_finite());
        let Some(min) = finite.clone().min_by(f64::total_cmp) else {
            return Self {
                edges: vec![],
                bitmaps: vec![],
                nrows,
            };
        };

        #[allow(clippy::expect_used)]
        let max = finite.max_by(f64::total_cmp).expect("min exists");

        let nbins = if min == max { 1 } else { nbins.max(1) };
        let width = (max - min) / nbins as f64;

        let edges: Vec<f64> = (0..=nbins)
            .map(|i| {
                if i == nbins {
                    max
                } else {
                    (i as f64).mul_add(width, min)
                }
            })
            .collect();

        let mut builders: Vec<SparseBuilder> =
            (0..nbins).map(|_| SparseBuilder::new(nrows)).collect();

        // assignment must agree exactly with the stored edges, so it
        // searches them instead of dividing by the width
        for (row, &v) in values.iter().enumerate() {
            if !v.is_finite() {
                continue;
            }

            let bin = edges
                .partition_point(|&e| e <= v)
                .saturating_sub(1)
                .min(nbins - 1);

            if let Some(b) = builders.get_mut(bin) {
                b.push(row);
            }
        }

        Self {
            edges,
            bitmaps: builders.into_iter().map(SparseBuilder::finalize).collect(),
            nrows,
        }
    }

    fn union(&self, bins: impl Iterator<Item = usize>) -> Bitvector {
        let mut out = Bitvector::with_len(self.nrows, false);
        for i in bins {
            if let Some(b) = self.bitmaps.get(i) {
                out = out.or(b);
            }
        }
        out
    }
}

/// Classifies one bin against the interval sides.
///
/// `full` must never include a value outside the interval (sure hits are a
/// lower bound); `any` may overshoot (possible hits are an upper bound).
fn classify(
    lo: Option<(f64, bool)>,
    hi: Option<(f64, bool)>,
    a: f64,
    b: f64,
    last: bool,
) -> (bool, bool) {
    let all_above = lo.is_none_or(|(l, strict)| if strict { a > l } else { a >= l });
    let any_above = lo.is_none_or(|(l, _)| if last { b >= l } else { b > l });

    let all_below = hi.is_none_or(|(h, strict)| {
        if last {
            if strict {
                b < h
            } else {
                b <= h
            }
        } else {
            b <= h
        }
    });
    let any_below = hi.is_none_or(|(h, strict)| if strict { a < h } else { a <= h });

    (all_above && all_below, any_above && any_below)
}

impl IndexOps for BinnedIndex {
    fn row_count(&self) -> usize {
        self.nrows
    }

    fn estimate(&self, interval: &Interval<f64>) -> Estimate {
        let (lo, hi) = match interval {
            Interval::Empty => return Estimate::empty(self.nrows),
            Interval::All => {
                let all = self.union(0..self.bitmaps.len());
                return Estimate {
                    sure: all.clone(),
                    possible: all,
                };
            }
            Interval::Eq(v) => (Some((*v, false)), Some((*v, false))),
            Interval::Range { lo, hi } => (*lo, *hi),
        };

        let mut sure = Bitvector::with_len(self.nrows, false);
        let mut possible = Bitvector::with_len(self.nrows, false);

        for (i, bitmap) in self.bitmaps.iter().enumerate() {
            let Some((&a, &b)) = self.edges.get(i).zip(self.edges.get(i + 1)) else {
                continue;
            };

            let last = i + 1 == self.bitmaps.len();
            let (full, any) = classify(lo, hi, a, b, last);

            if full {
                sure = sure.or(bitmap);
                possible = possible.or(bitmap);
            } else if any {
                possible = possible.or(bitmap);
            }
        }

        Estimate { sure, possible }
    }

    fn bitmap_count(&self) -> usize {
        self.bitmaps.len()
    }
}

impl Encode for BinnedIndex {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u64_varint(self.nrows as u64)?;
        encode_f64s(writer, &self.edges)?;
        encode_bitmaps(writer, &self.bitmaps)?;
        Ok(())
    }
}

impl Decode for BinnedIndex {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let nrows = reader.read_u64_varint()? as usize;
        let edges = decode_f64s(reader)?;
        let bitmaps = decode_bitmaps(reader)?;

        if bitmaps.len() != edges.len().saturating_sub(1)
            || bitmaps.iter().any(|b| b.len() != nrows)
        {
            return Err(DecodeError::InvalidLength("BinnedIndex"));
        }

        Ok(Self {
            edges,
            bitmaps,
            nrows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn naive(values: &[f64], lo: Option<(f64, bool)>, hi: Option<(f64, bool)>) -> Vec<usize> {
        values
            .iter()
            .enumerate()
            .filter(|(_, &v)| {
                let lo_ok = lo.is_none_or(|(l, s)| if s { v > l } else { v >= l });
                let hi_ok = hi.is_none_or(|(h, s)| if s { v < h } else { v <= h });
                lo_ok && hi_ok
            })
            .map(|(i, _)| i)
            .collect()
    }

    #[test]
    fn estimate_brackets_the_answer() {
        use rand::{Rng, SeedableRng};

        let mut rng = rand::rngs::StdRng::seed_from_u64(0x1DEA);
        let values: Vec<f64> = (0..2_000).map(|_| rng.random_range(-500.0..500.0)).collect();

        let idx = BinnedIndex::build(&values, values.len(), 32);

        for _ in 0..50 {
            let a = rng.random_range(-600.0..600.0);
            let b = rng.random_range(-600.0..600.0);
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };

            let lo = Some((lo, rng.random_bool(0.5)));
            let hi = Some((hi, rng.random_bool(0.5)));

            let est = idx.estimate(&Interval::Range { lo, hi });
            let actual = naive(&values, lo, hi);

            for &row in &actual {
                assert!(est.possible.get(row), "actual row {row} not in possible");
            }

            for row in est.sure.ones() {
                assert!(actual.contains(&row), "sure row {row} not actual");
            }
        }
    }

    #[test]
    fn interior_bins_are_sure() {
        let values: Vec<f64> = (0..100).map(f64::from).collect();
        let idx = BinnedIndex::build(&values, 100, 10);

        // [0,99] in 10 bins of width 9.9; [20, 70] spans several whole bins
        let est = idx.estimate(&Interval::Range {
            lo: Some((20.0, false)),
            hi: Some((70.0, false)),
        });

        assert!(est.sure.count_ones() > 0);
        assert!(est.sure.count_ones() <= 51);
        assert!(est.possible.count_ones() >= 51);
    }

    #[test]
    fn equality_interval_touches_one_bin() {
        let values: Vec<f64> = (0..100).map(f64::from).collect();
        let idx = BinnedIndex::build(&values, 100, 10);

        let est = idx.estimate(&Interval::Eq(42.0));

        assert!(est.possible.get(42));
        assert!(est.possible.count_ones() <= 11);
        assert!(est.undecided().get(42));
    }

    #[test]
    fn constant_column_single_bin() {
        let values = vec![7.0; 50];
        let idx = BinnedIndex::build(&values, 50, 16);

        assert_eq!(1, idx.bitmap_count());

        let est = idx.estimate(&Interval::Eq(7.0));
        assert_eq!(50, est.possible.count_ones());
    }

    #[test]
    fn nan_rows_never_match() {
        let values = vec![1.0, f64::NAN, 3.0];
        let idx = BinnedIndex::build(&values, 3, 4);

        let est = idx.estimate(&Interval::All);
        assert!(!est.possible.get(1));
        assert_eq!(2, est.possible.count_ones());
    }
}
