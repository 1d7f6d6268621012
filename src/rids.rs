// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Optional row-identifier map.
//!
//! RIDs are 64-bit opaque identifiers external to row ordering, loaded on
//! demand from `-rids`. A sorted companion (`-rids.srt`) is built lazily so
//! `row_from_rid` can binary-search; without it, lookup degrades to a
//! linear scan. When no RID file exists at all, the row number is the
//! implicit RID.

use crate::{
    checksum::Checksum,
    coding::{DecodeError, EncodeError},
    file::MAGIC_BYTES,
    Bitvector, RowId,
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::path::Path;
use varint_rs::{VarintReader, VarintWriter};

/// A 64-bit row identifier, split into run and event halves
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Rid(pub u64);

impl Rid {
    /// Composes a RID from its halves.
    #[must_use]
    pub fn new(run: u32, event: u32) -> Self {
        Self((u64::from(run) << 32) | u64::from(event))
    }

    /// Run half (upper 32 bits).
    #[must_use]
    pub fn run(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Event half (lower 32 bits).
    #[must_use]
    pub fn event(self) -> u32 {
        self.0 as u32
    }
}

impl From<u64> for Rid {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for Rid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.run(), self.event())
    }
}

/// In-memory RID map with its lazily built sorted companion
#[derive(Clone, Debug, Default)]
pub(crate) struct RidMap {
    rids: Vec<Rid>,

    /// `(rid, row)` ascending by rid; empty until built or loaded
    sorted: Vec<(Rid, RowId)>,
}

impl RidMap {
    /// Wraps explicit RID values.
    pub fn new(rids: Vec<Rid>) -> Self {
        Self {
            rids,
            sorted: vec![],
        }
    }

    /// Reads the raw `-rids` file, padding or truncating to `nrows`.
    pub fn load(path: &Path, nrows: usize) -> crate::Result<Self> {
        let bytes = std::fs::read(path)?;
        let mut reader = &bytes[..];

        let mut rids = Vec::with_capacity(nrows);
        while let Ok(raw) = reader.read_u64::<LittleEndian>() {
            rids.push(Rid(raw));
        }

        if rids.len() != nrows {
            log::warn!(
                "RID file {path:?} holds {} entries, expected {nrows}; adjusting",
                rids.len(),
            );
            rids.truncate(nrows);
            while rids.len() < nrows {
                rids.push(Rid(rids.len() as u64));
            }
        }

        Ok(Self::new(rids))
    }

    pub fn len(&self) -> usize {
        self.rids.len()
    }

    pub fn get(&self, row: usize) -> Option<Rid> {
        self.rids.get(row).copied()
    }

    pub fn has_sorted(&self) -> bool {
        !self.sorted.is_empty()
    }

    /// Builds the sorted companion in memory and persists it to `path`.
    pub fn build_sorted(&mut self, path: &Path) -> crate::Result<()> {
        let mut sorted: Vec<(Rid, RowId)> = self
            .rids
            .iter()
            .enumerate()
            .map(|(row, &rid)| (rid, row as RowId))
            .collect();
        sorted.sort_unstable();

        let mut payload = vec![];
        payload
            .write_u64_varint(sorted.len() as u64)
            .map_err(EncodeError::from)?;
        for (rid, row) in &sorted {
            payload
                .write_u64::<LittleEndian>(rid.0)
                .map_err(EncodeError::from)?;
            payload
                .write_u32::<LittleEndian>(*row)
                .map_err(EncodeError::from)?;
        }

        let mut content = Vec::with_capacity(MAGIC_BYTES.len() + payload.len() + 8);
        content.extend_from_slice(&MAGIC_BYTES);
        content.extend_from_slice(&payload);
        content
            .write_u64::<LittleEndian>(Checksum::of(&payload).into_u64())
            .map_err(EncodeError::from)?;

        crate::file::rewrite_atomic(path, &content)?;

        self.sorted = sorted;
        Ok(())
    }

    /// Loads the sorted companion; any mismatch triggers a rebuild.
    pub fn load_or_build_sorted(&mut self, path: &Path) -> crate::Result<()> {
        if self.has_sorted() {
            return Ok(());
        }

        match Self::read_sorted_file(path) {
            Ok(sorted) if sorted.len() == self.rids.len() => {
                self.sorted = sorted;
                Ok(())
            }
            Ok(sorted) => {
                log::warn!(
                    "sorted RID file {path:?} holds {} entries, expected {}; rebuilding",
                    sorted.len(),
                    self.rids.len(),
                );
                self.build_sorted(path)
            }
            Err(e) => {
                log::debug!("building sorted RID file {path:?} ({e})");
                self.build_sorted(path)
            }
        }
    }

    fn read_sorted_file(path: &Path) -> crate::Result<Vec<(Rid, RowId)>> {
        let content = std::fs::read(path)?;

        let Some((magic, rest)) = content.split_at_checked(MAGIC_BYTES.len()) else {
            return Err(DecodeError::InvalidHeader("SortedRids").into());
        };
        if magic != MAGIC_BYTES {
            return Err(DecodeError::InvalidHeader("SortedRids").into());
        }

        let Some((payload, trailer)) = rest.split_at_checked(rest.len().saturating_sub(8)) else {
            return Err(DecodeError::InvalidLength("SortedRids").into());
        };

        let mut trailer_reader = trailer;
        let expected = trailer_reader
            .read_u64::<LittleEndian>()
            .map_err(DecodeError::from)?;

        if Checksum::of(payload).into_u64() != expected {
            return Err(DecodeError::ChecksumMismatch.into());
        }

        let mut reader = payload;
        let n = reader.read_u64_varint().map_err(DecodeError::from)? as usize;
        let mut sorted = Vec::with_capacity(n.min(1 << 24));

        for _ in 0..n {
            let rid = reader.read_u64::<LittleEndian>().map_err(DecodeError::from)?;
            let row = reader.read_u32::<LittleEndian>().map_err(DecodeError::from)?;
            sorted.push((Rid(rid), row));
        }

        Ok(sorted)
    }

    /// Resolves a RID to its row number.
    ///
    /// Binary-searches the sorted companion when available, otherwise
    /// falls back to a linear scan.
    pub fn row_from_rid(&self, rid: Rid) -> Option<RowId> {
        if self.has_sorted() {
            return self
                .sorted
                .binary_search_by_key(&rid, |&(r, _)| r)
                .ok()
                .and_then(|i| self.sorted.get(i))
                .map(|&(_, row)| row);
        }

        self.rids
            .iter()
            .position(|&r| r == rid)
            .map(|row| row as RowId)
    }

    /// Evaluates a RID set into a row bitvector via merge join.
    pub fn evaluate_rid_set(&self, set: &[Rid], nrows: usize) -> Bitvector {
        let mut wanted: Vec<Rid> = set.to_vec();
        wanted.sort_unstable();
        wanted.dedup();

        let mut rows: Vec<usize> = if self.has_sorted() {
            let mut rows = vec![];
            let mut i = 0;

            for &(rid, row) in &self.sorted {
                while wanted.get(i).is_some_and(|&w| w < rid) {
                    i += 1;
                }
                if wanted.get(i) == Some(&rid) {
                    rows.push(row as usize);
                }
            }

            rows
        } else {
            self.rids
                .iter()
                .enumerate()
                .filter(|(_, rid)| wanted.binary_search(rid).is_ok())
                .map(|(row, _)| row)
                .collect()
        };

        rows.sort_unstable();
        rows.dedup();
        rows.retain(|&r| r < nrows);

        Bitvector::from_indices(nrows, rows)
    }
}

/// Evaluates a RID set when no RID file exists: values are row numbers.
pub(crate) fn rid_set_as_rows(set: &[Rid], nrows: usize) -> Bitvector {
    let mut rows: Vec<usize> = set
        .iter()
        .map(|r| r.0 as usize)
        .filter(|&r| r < nrows)
        .collect();
    rows.sort_unstable();
    rows.dedup();

    Bitvector::from_indices(nrows, rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn rid_halves() {
        let rid = Rid::new(7, 42);

        assert_eq!(7, rid.run());
        assert_eq!(42, rid.event());
        assert_eq!("7.42", rid.to_string());
    }

    #[test]
    fn lookup_linear_and_sorted_agree() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("-rids.srt");

        let mut map = RidMap::new(vec![Rid(100), Rid(200), Rid(300), Rid(400)]);

        assert_eq!(Some(2), map.row_from_rid(Rid(300)));
        assert_eq!(None, map.row_from_rid(Rid(999)));

        map.build_sorted(&path)?;

        assert_eq!(Some(2), map.row_from_rid(Rid(300)));
        assert_eq!(Some(0), map.row_from_rid(Rid(100)));
        assert_eq!(None, map.row_from_rid(Rid(999)));

        Ok(())
    }

    #[test]
    fn sorted_file_roundtrip_and_rebuild() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("-rids.srt");

        let mut map = RidMap::new(vec![Rid(5), Rid(1), Rid(9)]);
        map.build_sorted(&path)?;

        // fresh map, loads from file
        let mut fresh = RidMap::new(vec![Rid(5), Rid(1), Rid(9)]);
        fresh.load_or_build_sorted(&path)?;
        assert_eq!(Some(1), fresh.row_from_rid(Rid(1)));

        // entry-count mismatch rebuilds
        let mut grown = RidMap::new(vec![Rid(5), Rid(1), Rid(9), Rid(7)]);
        grown.load_or_build_sorted(&path)?;
        assert_eq!(Some(3), grown.row_from_rid(Rid(7)));

        Ok(())
    }

    #[test]
    fn roundtrip_is_identity() {
        let rids: Vec<Rid> = (0..100).map(|i| Rid(1_000 - i)).collect();
        let map = RidMap::new(rids.clone());

        for (row, &rid) in rids.iter().enumerate() {
            assert_eq!(Some(row as RowId), map.row_from_rid(rid));
        }
    }

    #[test]
    fn rid_set_evaluation() {
        let map = RidMap::new(vec![Rid(10), Rid(20), Rid(30), Rid(40), Rid(50)]);

        let hits = map.evaluate_rid_set(&[Rid(20), Rid(50), Rid(99)], 5);
        assert_eq!(vec![1, 4], hits.ones().collect::<Vec<_>>());
    }

    #[test]
    fn implicit_rids_are_row_numbers() {
        let hits = rid_set_as_rows(&[Rid(3), Rid(0), Rid(100)], 5);
        assert_eq!(vec![0, 3], hits.ones().collect::<Vec<_>>());
    }

    #[test]
    fn load_pads_short_file() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("-rids");

        let mut bytes = vec![];
        for rid in [11u64, 22] {
            bytes.extend_from_slice(&rid.to_le_bytes());
        }
        std::fs::write(&path, bytes)?;

        let map = RidMap::load(&path, 4)?;

        assert_eq!(4, map.len());
        assert_eq!(Some(Rid(22)), map.get(1));
        assert_eq!(Some(Rid(2)), map.get(2));

        Ok(())
    }
}
