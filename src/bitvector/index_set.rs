// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{decode_word, Bitvector, GROUP_BITS, GROUP_MASK};

/// One chunk of set positions produced by [`IndexSets`]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IndexSet {
    /// A contiguous run of set rows (`start..start + count`)
    ///
    /// Consumers doing file I/O translate this into one seek plus a bulk
    /// read.
    Range {
        /// First row of the run
        start: usize,

        /// Number of rows in the run
        count: usize,
    },

    /// Up to [`GROUP_BITS`] scattered rows
    ///
    /// Bit `i` of `word` set means row `base + i` is set.
    Bits {
        /// Row of payload bit 0
        base: usize,

        /// Group payload
        word: u32,
    },
}

impl IndexSet {
    /// Iterates the individual row positions of this chunk.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        let (range, mut word, base) = match *self {
            Self::Range { start, count } => (start..start + count, 0, 0),
            #[allow(clippy::range_plus_one)]
            Self::Bits { base, word } => (0..0, word, base),
        };

        range.chain(std::iter::from_fn(move || {
            if word == 0 {
                return None;
            }
            let t = word.trailing_zeros() as usize;
            word &= word - 1;
            Some(base + t)
        }))
    }

    /// Number of rows in this chunk.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Range { count, .. } => *count,
            Self::Bits { word, .. } => word.count_ones() as usize,
        }
    }

    /// Returns `true` if the chunk carries no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Iterator over the set positions of a [`Bitvector`], chunked into range
/// runs and scattered groups
pub struct IndexSets<'a> {
    words: &'a [u32],
    widx: usize,
    row: usize,
    active_word: u32,
    active_done: bool,
}

impl<'a> IndexSets<'a> {
    pub(super) fn new(v: &'a Bitvector) -> Self {
        Self {
            words: &v.words,
            widx: 0,
            row: 0,
            active_word: v.active_word,
            active_done: v.active_bits == 0,
        }
    }
}

impl Iterator for IndexSets<'_> {
    type Item = IndexSet;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(&word) = self.words.get(self.widx) {
            self.widx += 1;

            let run = decode_word(word);
            let rows = run.ngroups as usize * GROUP_BITS;
            let base = self.row;
            self.row += rows;

            if run.payload == GROUP_MASK {
                return Some(IndexSet::Range {
                    start: base,
                    count: rows,
                });
            }

            if run.payload != 0 {
                return Some(IndexSet::Bits {
                    base,
                    word: run.payload,
                });
            }
        }

        if !self.active_done {
            self.active_done = true;

            if self.active_word != 0 {
                return Some(IndexSet::Bits {
                    base: self.row,
                    word: self.active_word,
                });
            }
        }

        None
    }
}

/// Iterator over individual set positions in increasing order
pub struct Ones<'a> {
    sets: IndexSets<'a>,
    range: std::ops::Range<usize>,
    word: u32,
    base: usize,
}

impl<'a> Ones<'a> {
    pub(super) fn new(v: &'a Bitvector) -> Self {
        Self {
            sets: IndexSets::new(v),
            range: 0..0,
            word: 0,
            base: 0,
        }
    }
}

impl Iterator for Ones<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(i) = self.range.next() {
                return Some(i);
            }

            if self.word != 0 {
                let t = self.word.trailing_zeros() as usize;
                self.word &= self.word - 1;
                return Some(self.base + t);
            }

            match self.sets.next()? {
                IndexSet::Range { start, count } => self.range = start..start + count,
                IndexSet::Bits { base, word } => {
                    self.base = base;
                    self.word = word;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn runs_and_scattered_are_distinguished() {
        let mut v = Bitvector::new();
        v.append_run(false, 10);
        v.append_run(true, 93); // 3 full groups beginning mid-group
        v.append_run(false, 50);
        v.push(true);
        v.append_run(false, 100);

        let sets: Vec<_> = v.index_sets().collect();

        // the run is split into a leading partial group, a fill range and a
        // trailing partial group
        let total: usize = sets.iter().map(IndexSet::len).sum();
        assert_eq!(94, total);

        assert!(sets
            .iter()
            .any(|s| matches!(s, IndexSet::Range { count, .. } if *count >= 31)));

        assert_eq!(v.ones().count(), total);
    }

    #[test]
    fn long_fill_is_one_range() {
        let v = Bitvector::with_len(31 * 1_000, true);
        let sets: Vec<_> = v.index_sets().collect();

        assert_eq!(
            vec![IndexSet::Range {
                start: 0,
                count: 31_000
            }],
            sets
        );
    }

    #[test]
    fn chunk_iter_matches_ones() {
        let idx = [1, 2, 3, 40, 41, 42, 43, 44, 45, 46, 500, 900];
        let v = Bitvector::from_indices(1_000, idx);

        let via_sets: Vec<usize> = v.index_sets().flat_map(|s| s.iter().collect::<Vec<_>>()).collect();

        assert_eq!(idx.to_vec(), via_sets);
    }
}
