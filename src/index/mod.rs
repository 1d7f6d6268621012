// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Column-level bitmap indexes.
//!
//! An index maps value ranges to compressed bitvectors of matching rows.
//! It never answers a query alone; it produces a *sure* set (rows known to
//! match) and a *possible* set (rows that may match), and the partition
//! closes the gap with a scan over `possible \ sure`. An exact index
//! (equality-encoded) always returns `sure == possible`.

mod binned;
mod equality;

pub use binned::BinnedIndex;
pub use equality::EqualityIndex;

use crate::{
    checksum::Checksum,
    coding::{Decode, DecodeError, Encode, EncodeError},
    file::MAGIC_BYTES,
    predicate::Interval,
    Bitvector,
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use enum_dispatch::enum_dispatch;
use std::{
    io::{Read, Write},
    path::Path,
};

const KIND_BINNED: u8 = 0;
const KIND_EQUALITY: u8 = 1;

/// Index-only answer bounds: `sure ⊆ actual ⊆ possible`
#[derive(Clone, Debug)]
pub struct Estimate {
    /// Rows certain to match
    pub sure: Bitvector,

    /// Rows that may match
    pub possible: Bitvector,
}

impl Estimate {
    /// Both sets empty (nothing can match).
    #[must_use]
    pub fn empty(nrows: usize) -> Self {
        Self {
            sure: Bitvector::with_len(nrows, false),
            possible: Bitvector::with_len(nrows, false),
        }
    }

    /// Rows needing a scan to decide.
    #[must_use]
    pub fn undecided(&self) -> Bitvector {
        self.possible.and_not(&self.sure)
    }
}

/// Operations the partition invokes on any index variant
#[enum_dispatch]
pub(crate) trait IndexOps {
    /// Number of rows the index was built over.
    fn row_count(&self) -> usize;

    /// Index-only bounds for a normalized interval.
    fn estimate(&self, interval: &Interval<f64>) -> Estimate;

    /// Number of bitmaps held (diagnostics).
    fn bitmap_count(&self) -> usize;
}

/// A concrete bitmap index over one column
#[enum_dispatch(IndexOps)]
#[derive(Clone, Debug)]
pub enum ColumnIndex {
    /// Range-binned index; edge bins need scan confirmation
    Binned(BinnedIndex),

    /// One bitmap per distinct value; always exact
    Equality(EqualityIndex),
}

impl ColumnIndex {
    /// Builds an index over the column's values per `spec`.
    ///
    /// NaN values fall outside every bin and never match.
    #[must_use]
    pub fn build(values: &[f64], nrows: usize, spec: &IndexSpec) -> Option<Self> {
        match spec {
            IndexSpec::NoIndex => None,
            IndexSpec::Binned { nbins } => {
                Some(Self::Binned(BinnedIndex::build(values, nrows, *nbins)))
            }
            IndexSpec::Equality => Some(Self::Equality(EqualityIndex::build(values, nrows))),
        }
    }

    /// Writes the index to `path` with magic and checksum trailer.
    pub fn write_to_file(&self, path: &Path) -> crate::Result<()> {
        let mut payload = vec![];

        match self {
            Self::Binned(idx) => {
                payload.write_u8(KIND_BINNED).map_err(EncodeError::from)?;
                idx.encode_into(&mut payload)?;
            }
            Self::Equality(idx) => {
                payload.write_u8(KIND_EQUALITY).map_err(EncodeError::from)?;
                idx.encode_into(&mut payload)?;
            }
        }

        let mut content = Vec::with_capacity(MAGIC_BYTES.len() + payload.len() + 8);
        content.extend_from_slice(&MAGIC_BYTES);
        content.extend_from_slice(&payload);
        content
            .write_u64::<LittleEndian>(Checksum::of(&payload).into_u64())
            .map_err(EncodeError::from)?;

        crate::file::rewrite_atomic(path, &content)?;
        Ok(())
    }

    /// Reads an index written by [`ColumnIndex::write_to_file`].
    pub fn read_from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read(path)?;

        let Some((magic, rest)) = content.split_at_checked(MAGIC_BYTES.len()) else {
            return Err(DecodeError::InvalidHeader("ColumnIndex").into());
        };
        if magic != MAGIC_BYTES {
            return Err(DecodeError::InvalidHeader("ColumnIndex").into());
        }

        let Some((payload, trailer)) = rest.split_at_checked(rest.len().saturating_sub(8)) else {
            return Err(DecodeError::InvalidLength("ColumnIndex").into());
        };

        let mut trailer_reader = trailer;
        let expected = trailer_reader
            .read_u64::<LittleEndian>()
            .map_err(DecodeError::from)?;

        if Checksum::of(payload).into_u64() != expected {
            return Err(DecodeError::ChecksumMismatch.into());
        }

        let mut reader = payload;
        let kind = reader.read_u8().map_err(DecodeError::from)?;

        Ok(match kind {
            KIND_BINNED => Self::Binned(BinnedIndex::decode_from(&mut reader)?),
            KIND_EQUALITY => Self::Equality(EqualityIndex::decode_from(&mut reader)?),
            tag => return Err(DecodeError::InvalidTag(("ColumnIndex", tag)).into()),
        })
    }
}

/// How (and whether) a column should be indexed
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum IndexSpec {
    /// Do not build an index
    NoIndex,

    /// Range-binned bitmaps
    Binned {
        /// Number of bins
        nbins: usize,
    },

    /// One bitmap per distinct value
    Equality,
}

impl Default for IndexSpec {
    fn default() -> Self {
        Self::Binned { nbins: 64 }
    }
}

impl IndexSpec {
    /// Parses a header index specification.
    ///
    /// Recognized forms: `none`, `equality`, `<binning nbins=N/>` (and the
    /// bare word `binning`). Anything else falls back to the default.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        let lower = s.to_ascii_lowercase();

        if lower.contains("none") {
            return Self::NoIndex;
        }

        if lower.contains("equality") {
            return Self::Equality;
        }

        let nbins = lower
            .split_once("nbins=")
            .and_then(|(_, rest)| {
                let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
                digits.parse().ok()
            })
            .unwrap_or(64);

        Self::Binned {
            nbins: nbins.clamp(1, 1 << 20),
        }
    }
}

/// Index options applied across a partition's columns
///
/// A list of `(name pattern, spec)` rules tried in order (first match
/// wins; `*` is a wildcard) with an optional trailing default.
#[derive(Clone, Debug, Default)]
pub struct IndexOptions {
    rules: Vec<(String, IndexSpec)>,
    default: Option<IndexSpec>,
}

impl IndexOptions {
    /// No rules: every column keeps its own specification.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// One specification for every column.
    #[must_use]
    pub fn single(spec: IndexSpec) -> Self {
        Self {
            rules: vec![],
            default: Some(spec),
        }
    }

    /// Appends a `(pattern, spec)` rule.
    #[must_use]
    pub fn rule(mut self, pattern: impl Into<String>, spec: IndexSpec) -> Self {
        self.rules.push((pattern.into(), spec));
        self
    }

    /// Sets the trailing default applied when no pattern matches.
    #[must_use]
    pub fn default_spec(mut self, spec: IndexSpec) -> Self {
        self.default = Some(spec);
        self
    }

    /// Resolves the specification for a column name.
    #[must_use]
    pub fn spec_for(&self, name: &str) -> Option<&IndexSpec> {
        self.rules
            .iter()
            .find(|(pattern, _)| {
                let translated: String = pattern
                    .chars()
                    .map(|c| if c == '*' { '%' } else { c })
                    .collect();
                crate::predicate::like_match(&translated, name)
            })
            .map(|(_, spec)| spec)
            .or(self.default.as_ref())
    }
}

/// Writes a `f64` list with a varint length prefix.
pub(crate) fn encode_f64s<W: Write>(writer: &mut W, values: &[f64]) -> Result<(), EncodeError> {
    use varint_rs::VarintWriter;

    writer.write_u64_varint(values.len() as u64)?;
    for v in values {
        writer.write_f64::<LittleEndian>(*v)?;
    }
    Ok(())
}

/// Reads a `f64` list written by [`encode_f64s`].
pub(crate) fn decode_f64s<R: Read>(reader: &mut R) -> Result<Vec<f64>, DecodeError> {
    use varint_rs::VarintReader;

    let n = reader.read_u64_varint()? as usize;
    let mut values = Vec::with_capacity(n.min(1 << 20));
    for _ in 0..n {
        values.push(reader.read_f64::<LittleEndian>()?);
    }
    Ok(values)
}

/// Writes a bitmap list with a varint length prefix.
pub(crate) fn encode_bitmaps<W: Write>(
    writer: &mut W,
    bitmaps: &[Bitvector],
) -> Result<(), EncodeError> {
    use varint_rs::VarintWriter;

    writer.write_u64_varint(bitmaps.len() as u64)?;
    for b in bitmaps {
        b.encode_into(writer)?;
    }
    Ok(())
}

/// Reads a bitmap list written by [`encode_bitmaps`].
pub(crate) fn decode_bitmaps<R: Read>(reader: &mut R) -> Result<Vec<Bitvector>, DecodeError> {
    use varint_rs::VarintReader;

    let n = reader.read_u64_varint()? as usize;
    let mut bitmaps = Vec::with_capacity(n.min(1 << 20));
    for _ in 0..n {
        bitmaps.push(Bitvector::decode_from(reader)?);
    }
    Ok(bitmaps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn spec_parsing() {
        assert_eq!(IndexSpec::NoIndex, IndexSpec::parse("none"));
        assert_eq!(IndexSpec::Equality, IndexSpec::parse("equality"));
        assert_eq!(
            IndexSpec::Binned { nbins: 32 },
            IndexSpec::parse("<binning nbins=32/>"),
        );
        assert_eq!(
            IndexSpec::Binned { nbins: 64 },
            IndexSpec::parse("binning"),
        );
        assert_eq!(IndexSpec::default(), IndexSpec::parse("gibberish"));
    }

    #[test]
    fn options_first_pattern_wins() {
        let opts = IndexOptions::new()
            .rule("evt_*", IndexSpec::Equality)
            .rule("*", IndexSpec::NoIndex)
            .default_spec(IndexSpec::Binned { nbins: 8 });

        assert_eq!(Some(&IndexSpec::Equality), opts.spec_for("evt_id"));
        assert_eq!(Some(&IndexSpec::NoIndex), opts.spec_for("other"));

        let empty = IndexOptions::new();
        assert_eq!(None, empty.spec_for("anything"));

        let single = IndexOptions::single(IndexSpec::Equality);
        assert_eq!(Some(&IndexSpec::Equality), single.spec_for("x"));
    }

    #[test]
    fn file_roundtrip() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("col.idx");

        let values: Vec<f64> = (0..500).map(f64::from).collect();
        let idx = ColumnIndex::build(&values, 500, &IndexSpec::Binned { nbins: 16 })
            .ok_or(crate::Error::MetadataMissing)?;

        idx.write_to_file(&path)?;
        let back = ColumnIndex::read_from_file(&path)?;

        assert_eq!(500, crate::index::IndexOps::row_count(&back));

        let interval = Interval::Range {
            lo: Some((100.0, false)),
            hi: Some((200.0, true)),
        };

        let a = idx.estimate(&interval);
        let b = back.estimate(&interval);

        assert_eq!(a.sure, b.sure);
        assert_eq!(a.possible, b.possible);

        Ok(())
    }

    #[test]
    fn corrupt_index_is_rejected() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("col.idx");

        let values: Vec<f64> = vec![1.0, 2.0, 3.0];
        let idx = ColumnIndex::build(&values, 3, &IndexSpec::Equality)
            .ok_or(crate::Error::MetadataMissing)?;
        idx.write_to_file(&path)?;

        let mut raw = std::fs::read(&path)?;
        let len = raw.len();
        if let Some(byte) = raw.get_mut(len / 2) {
            *byte ^= 0x55;
        }
        std::fs::write(&path, &raw)?;

        assert!(ColumnIndex::read_from_file(&path).is_err());

        Ok(())
    }
}
