// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Word-aligned hybrid (WAH) compressed bitvector.
//!
//! Rows are grouped into 31-bit groups. Each 32-bit word is either a
//! *literal* (MSB clear, 31 payload bits) or a *fill* (MSB set, bit 30 is
//! the fill bit, low 30 bits count how many consecutive groups the fill
//! covers). A trailing partial group lives in a separate active word.
//!
//! The encoding is kept canonical: literals are never all-zero or all-one,
//! and adjacent fills of the same bit are merged. Canonical form makes
//! equality comparison structural and keeps run iteration maximal.

mod builder;
mod index_set;

pub use builder::{DenseScratch, HitBuilder, SparseBuilder};
pub use index_set::{IndexSet, IndexSets, Ones};

use crate::{
    checksum::Checksum,
    coding::{Decode, DecodeError, Encode, EncodeError},
    file::MAGIC_BYTES,
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::{
    io::{Read, Write},
    path::Path,
};
use varint_rs::{VarintReader, VarintWriter};

/// Rows per encoded group
pub const GROUP_BITS: usize = 31;

const FILL_FLAG: u32 = 1 << 31;
const FILL_ONE: u32 = 1 << 30;
const COUNT_MASK: u32 = FILL_ONE - 1;

/// All 31 payload bits set
pub(crate) const GROUP_MASK: u32 = (1 << 31) - 1;

fn active_mask(bits: u32) -> u32 {
    debug_assert!(bits < GROUP_BITS as u32);
    (1 << bits) - 1
}

/// A run of identical groups, as decoded from one word
#[derive(Clone, Copy)]
struct Run {
    /// Group payload; fills decode to `0` or `GROUP_MASK`
    payload: u32,

    /// Number of groups this run covers (1 for literals)
    ngroups: u32,
}

impl Run {
    fn is_homogeneous(self) -> bool {
        self.payload == 0 || self.payload == GROUP_MASK
    }
}

fn decode_word(word: u32) -> Run {
    if word & FILL_FLAG == 0 {
        Run {
            payload: word,
            ngroups: 1,
        }
    } else {
        Run {
            payload: if word & FILL_ONE == 0 { 0 } else { GROUP_MASK },
            ngroups: word & COUNT_MASK,
        }
    }
}

/// A compressed bitvector over row positions
///
/// Used for the partition's active-row mask, per-column null masks, the
/// bitmaps inside bitmap indexes, and every query result.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Bitvector {
    pub(crate) words: Vec<u32>,
    pub(crate) active_word: u32,
    pub(crate) active_bits: u32,
    pub(crate) len: usize,
}

impl Bitvector {
    /// Creates an empty bitvector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bitvector of `len` identical bits.
    #[must_use]
    pub fn with_len(len: usize, bit: bool) -> Self {
        let mut v = Self::default();
        v.append_run(bit, len);
        v
    }

    /// Creates a bitvector of `len` bits from strictly increasing set positions.
    #[must_use]
    pub fn from_indices<I: IntoIterator<Item = usize>>(len: usize, indices: I) -> Self {
        let mut b = SparseBuilder::new(len);
        for i in indices {
            b.push(i);
        }
        b.finalize()
    }

    /// Number of bits.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the bitvector holds no bits.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends a single bit.
    pub fn push(&mut self, bit: bool) {
        if bit {
            self.active_word |= 1 << self.active_bits;
        }
        self.active_bits += 1;
        self.len += 1;

        if self.active_bits as usize == GROUP_BITS {
            let w = self.active_word;
            self.active_word = 0;
            self.active_bits = 0;
            self.emit_group(w);
        }
    }

    /// Appends `count` identical bits.
    pub fn append_run(&mut self, bit: bool, mut count: usize) {
        while self.active_bits != 0 && count > 0 {
            self.push(bit);
            count -= 1;
        }

        let groups = count / GROUP_BITS;
        if groups > 0 {
            self.emit_fill(bit, groups);
            self.len += groups * GROUP_BITS;
        }

        for _ in 0..(count % GROUP_BITS) {
            self.push(bit);
        }
    }

    /// Reads the bit at `idx`.
    ///
    /// # Panics
    ///
    /// Panics if `idx` is out of bounds.
    #[must_use]
    pub fn get(&self, idx: usize) -> bool {
        assert!(idx < self.len, "bit index out of bounds");

        let mut group = idx / GROUP_BITS;
        let bit = 1 << (idx % GROUP_BITS);

        for run in self.words.iter().copied().map(decode_word) {
            let n = run.ngroups as usize;
            if group < n {
                return run.payload & bit != 0;
            }
            group -= n;
        }

        debug_assert_eq!(0, group);
        self.active_word & bit != 0
    }

    /// Number of set bits (cardinality).
    #[must_use]
    pub fn count_ones(&self) -> usize {
        let mut n = self.active_word.count_ones() as usize;

        for run in self.words.iter().copied().map(decode_word) {
            n += run.payload.count_ones() as usize * run.ngroups as usize;
        }

        n
    }

    /// Returns `true` if every bit is set.
    #[must_use]
    pub fn is_all_ones(&self) -> bool {
        self.count_ones() == self.len
    }

    /// Bitwise AND.
    #[must_use]
    pub fn and(&self, other: &Self) -> Self {
        self.binary_op(other, |a, b| a & b)
    }

    /// Bitwise OR.
    #[must_use]
    pub fn or(&self, other: &Self) -> Self {
        self.binary_op(other, |a, b| a | b)
    }

    /// Bitwise XOR.
    #[must_use]
    pub fn xor(&self, other: &Self) -> Self {
        self.binary_op(other, |a, b| a ^ b)
    }

    /// Bitwise AND-NOT (`self & !other`).
    #[must_use]
    pub fn and_not(&self, other: &Self) -> Self {
        self.binary_op(other, |a, b| a & !b)
    }

    /// Complement within the vector's length.
    #[must_use]
    pub fn flip(&self) -> Self {
        let mut out = Self::default();

        for run in self.words.iter().copied().map(decode_word) {
            if run.is_homogeneous() {
                out.emit_fill(run.payload == 0, run.ngroups as usize);
            } else {
                out.emit_group(!run.payload & GROUP_MASK);
            }
        }

        out.active_word = !self.active_word & active_mask(self.active_bits);
        out.active_bits = self.active_bits;
        out.len = self.len;
        out
    }

    /// Truncates or extends to exactly `nbits`, padding with `fill`.
    pub fn adjust_size(&mut self, nbits: usize, fill: bool) {
        use std::cmp::Ordering::{Equal, Greater, Less};

        match nbits.cmp(&self.len) {
            Equal => {}
            Greater => self.append_run(fill, nbits - self.len),
            Less => {
                let mut out = Self::default();
                let mut pos = 0;

                for i in self.ones() {
                    if i >= nbits {
                        break;
                    }
                    out.append_run(false, i - pos);
                    out.push(true);
                    pos = i + 1;
                }

                out.append_run(false, nbits - pos);
                *self = out;
            }
        }
    }

    /// Iterates over set bit positions in increasing order.
    #[must_use]
    pub fn ones(&self) -> Ones<'_> {
        Ones::new(self)
    }

    /// Iterates over the set positions as maximal range runs and scattered
    /// groups.
    ///
    /// Range runs come from one-fills and allow a consumer to do one seek
    /// plus a bulk read; scattered groups carry at most [`GROUP_BITS`]
    /// individual positions.
    #[must_use]
    pub fn index_sets(&self) -> IndexSets<'_> {
        IndexSets::new(self)
    }

    /// Number of encoded words (compression diagnostics).
    #[must_use]
    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    fn binary_op(&self, other: &Self, f: impl Fn(u32, u32) -> u32) -> Self {
        assert_eq!(self.len, other.len, "bitvector length mismatch");

        let mut out = Self::default();
        let mut a = self.words.iter().copied().map(decode_word);
        let mut b = other.words.iter().copied().map(decode_word);
        let mut ra = a.next();
        let mut rb = b.next();

        while let (Some(mut x), Some(mut y)) = (ra, rb) {
            if x.is_homogeneous() && y.is_homogeneous() {
                let n = x.ngroups.min(y.ngroups);
                let w = f(x.payload, y.payload) & GROUP_MASK;
                out.emit_fill(w == GROUP_MASK, n as usize);
                x.ngroups -= n;
                y.ngroups -= n;
            } else {
                out.emit_group(f(x.payload, y.payload) & GROUP_MASK);
                x.ngroups -= 1;
                y.ngroups -= 1;
            }

            ra = if x.ngroups == 0 { a.next() } else { Some(x) };
            rb = if y.ngroups == 0 { b.next() } else { Some(y) };
        }

        debug_assert!(
            ra.is_none() && rb.is_none(),
            "equal-length bitvectors must decode to equal group counts",
        );

        out.active_word = f(self.active_word, other.active_word) & active_mask(self.active_bits);
        out.active_bits = self.active_bits;
        out.len = self.len;
        out
    }

    /// Builds from pre-assembled 31-bit groups (dense scratch finalization).
    pub(crate) fn from_dense_groups(groups: &[u32], len: usize) -> Self {
        debug_assert_eq!(groups.len(), len.div_ceil(GROUP_BITS));

        let full = len / GROUP_BITS;
        let mut out = Self::default();

        for &g in groups.iter().take(full) {
            out.emit_group(g & GROUP_MASK);
        }
        out.len = full * GROUP_BITS;

        let rest = (len % GROUP_BITS) as u32;
        if rest != 0 {
            out.active_word = groups.get(full).copied().unwrap_or(0) & active_mask(rest);
            out.active_bits = rest;
            out.len = len;
        }

        out
    }

    fn emit_group(&mut self, payload: u32) {
        debug_assert_eq!(0, payload & FILL_FLAG);

        if payload == 0 {
            self.emit_fill(false, 1);
        } else if payload == GROUP_MASK {
            self.emit_fill(true, 1);
        } else {
            self.words.push(payload);
        }
    }

    fn emit_fill(&mut self, bit: bool, mut ngroups: usize) {
        if ngroups == 0 {
            return;
        }

        let flag = FILL_FLAG | if bit { FILL_ONE } else { 0 };

        if let Some(last) = self.words.last_mut() {
            if *last & (FILL_FLAG | FILL_ONE) == flag && *last & FILL_FLAG != 0 {
                let count = *last & COUNT_MASK;
                let room = (COUNT_MASK - count) as usize;
                let add = room.min(ngroups);
                *last += add as u32;
                ngroups -= add;
            }
        }

        while ngroups > 0 {
            let chunk = ngroups.min(COUNT_MASK as usize);
            self.words.push(flag | chunk as u32);
            ngroups -= chunk;
        }
    }

    /// Writes the bitvector to `path` with magic and checksum trailer,
    /// atomically.
    pub fn write_to_file(&self, path: &Path) -> crate::Result<()> {
        let payload = self.encode_into_vec();

        let mut content = Vec::with_capacity(MAGIC_BYTES.len() + payload.len() + 8);
        content.extend_from_slice(&MAGIC_BYTES);
        content.extend_from_slice(&payload);
        content
            .write_u64::<LittleEndian>(Checksum::of(&payload).into_u64())
            .map_err(EncodeError::from)?;

        crate::file::rewrite_atomic(path, &content)?;
        Ok(())
    }

    /// Reads a bitvector written by [`Bitvector::write_to_file`].
    pub fn read_from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read(path)?;

        let Some((magic, rest)) = content.split_at_checked(MAGIC_BYTES.len()) else {
            return Err(DecodeError::InvalidHeader("Bitvector").into());
        };
        if magic != MAGIC_BYTES {
            return Err(DecodeError::InvalidHeader("Bitvector").into());
        }

        let Some((payload, trailer)) = rest.split_at_checked(rest.len().saturating_sub(8)) else {
            return Err(DecodeError::InvalidLength("Bitvector").into());
        };

        let mut trailer_reader = trailer;
        let expected = trailer_reader
            .read_u64::<LittleEndian>()
            .map_err(DecodeError::from)?;

        if Checksum::of(payload).into_u64() != expected {
            return Err(DecodeError::ChecksumMismatch.into());
        }

        let mut reader = payload;
        Ok(Self::decode_from(&mut reader)?)
    }
}

impl Encode for Bitvector {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u64_varint(self.len as u64)?;
        writer.write_u64_varint(self.words.len() as u64)?;

        for w in &self.words {
            writer.write_u32::<LittleEndian>(*w)?;
        }

        writer.write_u32::<LittleEndian>(self.active_word)?;
        writer.write_u8(self.active_bits as u8)?;

        Ok(())
    }
}

impl Decode for Bitvector {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let len = reader.read_u64_varint()? as usize;
        let nwords = reader.read_u64_varint()? as usize;

        let mut words = Vec::with_capacity(nwords.min(1 << 20));
        let mut groups = 0usize;

        for _ in 0..nwords {
            let w = reader.read_u32::<LittleEndian>()?;

            if w & FILL_FLAG != 0 && w & COUNT_MASK == 0 {
                return Err(DecodeError::InvalidLength("Bitvector"));
            }

            groups += decode_word(w).ngroups as usize;
            words.push(w);
        }

        let active_word = reader.read_u32::<LittleEndian>()?;
        let active_bits = u32::from(reader.read_u8()?);

        if active_bits as usize >= GROUP_BITS
            || groups * GROUP_BITS + active_bits as usize != len
            || active_word & !active_mask(active_bits) != 0
        {
            return Err(DecodeError::InvalidLength("Bitvector"));
        }

        Ok(Self {
            words,
            active_word,
            active_bits,
            len,
        })
    }
}

#[cfg(test)]
#[allow(clippy::indexing_slicing)]
mod tests {
    use super::*;
    use test_log::test;

    fn from_bools(bits: &[bool]) -> Bitvector {
        let mut v = Bitvector::new();
        for &b in bits {
            v.push(b);
        }
        v
    }

    #[test]
    fn push_and_get() {
        let v = from_bools(&[true, false, true, true, false]);

        assert_eq!(5, v.len());
        assert!(v.get(0));
        assert!(!v.get(1));
        assert!(v.get(2));
        assert!(v.get(3));
        assert!(!v.get(4));
        assert_eq!(3, v.count_ones());
    }

    #[test]
    fn long_runs_compress() {
        let v = Bitvector::with_len(1_000_000, true);

        assert_eq!(1_000_000, v.len());
        assert_eq!(1_000_000, v.count_ones());
        assert_eq!(1, v.word_count());
        assert!(v.is_all_ones());
    }

    #[test]
    fn canonical_form_is_structural() {
        // 62 ones appended bit-by-bit and as a run must compare equal
        let mut a = Bitvector::new();
        for _ in 0..62 {
            a.push(true);
        }

        let b = Bitvector::with_len(62, true);

        assert_eq!(a, b);
    }

    #[test]
    fn append_run_mixed() {
        let mut v = Bitvector::new();
        v.append_run(false, 100);
        v.append_run(true, 50);
        v.append_run(false, 7);

        assert_eq!(157, v.len());
        assert_eq!(50, v.count_ones());

        for i in 0..157 {
            assert_eq!((100..150).contains(&i), v.get(i), "bit {i}");
        }
    }

    #[test]
    fn binary_ops_against_model() {
        use rand::{Rng, SeedableRng};

        let mut rng = rand::rngs::StdRng::seed_from_u64(0xB17_9A57);

        for len in [0, 1, 30, 31, 32, 62, 100, 1_000, 4_096] {
            let ma: Vec<bool> = (0..len).map(|_| rng.random_bool(0.1)).collect();
            let mb: Vec<bool> = (0..len).map(|_| rng.random_bool(0.9)).collect();

            let a = from_bools(&ma);
            let b = from_bools(&mb);

            let and = a.and(&b);
            let or = a.or(&b);
            let xor = a.xor(&b);
            let diff = a.and_not(&b);
            let flip = a.flip();

            for i in 0..len {
                assert_eq!(ma[i] & mb[i], and.get(i));
                assert_eq!(ma[i] | mb[i], or.get(i));
                assert_eq!(ma[i] ^ mb[i], xor.get(i));
                assert_eq!(ma[i] & !mb[i], diff.get(i));
                assert_eq!(!ma[i], flip.get(i));
            }

            assert_eq!(len, and.len());
            assert_eq!(len, flip.len());
        }
    }

    #[test]
    fn complement_partitions_universe() {
        let v = Bitvector::from_indices(500, [3, 77, 140, 141, 142, 499]);
        let not_v = v.flip();

        assert_eq!(0, v.and(&not_v).count_ones());
        assert_eq!(500, v.or(&not_v).count_ones());
    }

    #[test]
    fn adjust_size_extends_and_truncates() {
        let mut v = Bitvector::from_indices(10, [2, 9]);

        v.adjust_size(100, true);
        assert_eq!(100, v.len());
        assert_eq!(92, v.count_ones());
        assert!(v.get(99));

        v.adjust_size(5, false);
        assert_eq!(5, v.len());
        assert_eq!(1, v.count_ones());
        assert!(v.get(2));
    }

    #[test]
    fn ones_iterator() {
        let idx = [0, 5, 31, 62, 100, 1_000, 1_001];
        let v = Bitvector::from_indices(2_000, idx);

        assert_eq!(idx.to_vec(), v.ones().collect::<Vec<_>>());
    }

    #[test]
    fn encode_decode_roundtrip() -> crate::Result<()> {
        use rand::{Rng, SeedableRng};

        let mut rng = rand::rngs::StdRng::seed_from_u64(99);

        for len in [0, 1, 31, 1_000, 10_000] {
            let bits: Vec<bool> = (0..len).map(|_| rng.random_bool(0.02)).collect();
            let v = from_bools(&bits);

            let bytes = v.encode_into_vec();
            let mut reader = &bytes[..];
            let back = Bitvector::decode_from(&mut reader)?;

            assert_eq!(v, back);
        }

        Ok(())
    }

    #[test]
    fn file_roundtrip_detects_corruption() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("mask");

        let v = Bitvector::from_indices(1_000, [1, 2, 3, 500]);
        v.write_to_file(&path)?;

        assert_eq!(v, Bitvector::read_from_file(&path)?);

        // flip one payload byte
        let mut raw = std::fs::read(&path)?;
        let mid = raw.len() / 2;
        raw[mid] ^= 0xFF;
        std::fs::write(&path, &raw)?;

        assert!(matches!(
            Bitvector::read_from_file(&path),
            Err(crate::Error::Decode(
                DecodeError::ChecksumMismatch | DecodeError::InvalidLength(_)
            ))
        ));

        Ok(())
    }
}
