// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{decode_bitmaps, decode_f64s, encode_bitmaps, encode_f64s, Estimate, IndexOps};
use crate::{
    bitvector::SparseBuilder,
    coding::{Decode, DecodeError, Encode, EncodeError},
    predicate::Interval,
    Bitvector, HashMap,
};
use std::io::{Read, Write};
use varint_rs::{VarintReader, VarintWriter};

/// Equality-encoded bitmap index: one bitmap per distinct value
///
/// Exact by construction, so `estimate` always returns `sure == possible`
/// and no candidate scan is needed. The natural choice for CATEGORY codes
/// and other low-cardinality columns.
#[derive(Clone, Debug)]
pub struct EqualityIndex {
    /// Distinct values, ascending
    keys: Vec<f64>,

    /// One bitmap per key
    bitmaps: Vec<Bitvector>,

    nrows: usize,
}

impl EqualityIndex {
    /// Builds the index over a full-length value array.
    #[must_use]
    pub fn build(values: &[f64], nrows: usize) -> Self {
        debug_assert_eq!(values.len(), nrows);

        let mut keys: Vec<f64> = values
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .map(|v| if v == 0.0 { 0.0 } else { v })
            .collect();
        keys.sort_by(f64::total_cmp);
        keys.dedup_by(|a, b| a.to_bits() == b.to_bits());

        let slots: HashMap<u64, usize> = keys
            .iter()
            .enumerate()
            .map(|(i, v)| (v.to_bits(), i))
            .collect();

        let mut builders: Vec<SparseBuilder> =
            keys.iter().map(|_| SparseBuilder::new(nrows)).collect();

        for (row, &v) in values.iter().enumerate() {
            if !v.is_finite() {
                continue;
            }

            let v = if v == 0.0 { 0.0 } else { v };
            if let Some(b) = slots.get(&v.to_bits()).and_then(|&i| builders.get_mut(i)) {
                b.push(row);
            }
        }

        Self {
            keys,
            bitmaps: builders.into_iter().map(SparseBuilder::finalize).collect(),
            nrows,
        }
    }

    /// Number of distinct values.
    #[must_use]
    pub fn cardinality(&self) -> usize {
        self.keys.len()
    }

    fn matching(&self, interval: &Interval<f64>) -> Bitvector {
        let mut out = Bitvector::with_len(self.nrows, false);

        for (key, bitmap) in self.keys.iter().zip(&self.bitmaps) {
            let hit = match interval {
                Interval::Empty => false,
                Interval::All => true,
                Interval::Eq(v) => key == v,
                Interval::Range { lo, hi } => {
                    let lo_ok =
                        lo.is_none_or(|(l, strict)| if strict { *key > l } else { *key >= l });
                    let hi_ok =
                        hi.is_none_or(|(h, strict)| if strict { *key < h } else { *key <= h });
                    lo_ok && hi_ok
                }
            };

            if hit {
                out = out.or(bitmap);
            }
        }

        out
    }
}

impl IndexOps for EqualityIndex {
    fn row_count(&self) -> usize {
        self.nrows
    }

    fn estimate(&self, interval: &Interval<f64>) -> Estimate {
        let exact = self.matching(interval);

        Estimate {
            sure: exact.clone(),
            possible: exact,
        }
    }

    fn bitmap_count(&self) -> usize {
        self.bitmaps.len()
    }
}

impl Encode for EqualityIndex {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u64_varint(self.nrows as u64)?;
        encode_f64s(writer, &self.keys)?;
        encode_bitmaps(writer, &self.bitmaps)?;
        Ok(())
    }
}

impl Decode for EqualityIndex {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let nrows = reader.read_u64_varint()? as usize;
        let keys = decode_f64s(reader)?;
        let bitmaps = decode_bitmaps(reader)?;

        if bitmaps.len() != keys.len() || bitmaps.iter().any(|b| b.len() != nrows) {
            return Err(DecodeError::InvalidLength("EqualityIndex"));
        }

        Ok(Self {
            keys,
            bitmaps,
            nrows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn exact_estimates() {
        let values = vec![1.0, 2.0, 3.0, 1.0, 2.0];
        let idx = EqualityIndex::build(&values, 5);

        assert_eq!(3, idx.cardinality());

        let est = idx.estimate(&Interval::Eq(2.0));
        assert_eq!(est.sure, est.possible);
        assert_eq!(vec![1, 4], est.sure.ones().collect::<Vec<_>>());
        assert_eq!(0, est.undecided().count_ones());
    }

    #[test]
    fn range_over_keys() {
        let values = vec![10.0, 20.0, 30.0, 40.0];
        let idx = EqualityIndex::build(&values, 4);

        let est = idx.estimate(&Interval::Range {
            lo: Some((15.0, false)),
            hi: Some((35.0, false)),
        });

        assert_eq!(vec![1, 2], est.sure.ones().collect::<Vec<_>>());
    }

    #[test]
    fn missing_value_is_empty() {
        let values = vec![1.0, 2.0];
        let idx = EqualityIndex::build(&values, 2);

        assert_eq!(0, idx.estimate(&Interval::Eq(9.0)).possible.count_ones());
    }

    #[test]
    fn zero_sign_is_normalized() {
        let values = vec![0.0, -0.0];
        let idx = EqualityIndex::build(&values, 2);

        assert_eq!(1, idx.cardinality());
        assert_eq!(2, idx.estimate(&Interval::Eq(0.0)).sure.count_ones());
    }
}
