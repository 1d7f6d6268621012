// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{Decode, DecodeError, Encode, EncodeError},
    file::{
        CATEGORY_SUFFIX, DICTIONARY_SUFFIX, INDEX_SUFFIX, NULL_MASK_SUFFIX, OFFSETS_SUFFIX,
    },
    index::{ColumnIndex, IndexSpec},
    types::ColumnType,
    Bitvector, HashMap,
};
use std::{
    io::{Read, Write},
    path::{Path, PathBuf},
};
use varint_rs::{VarintReader, VarintWriter};

/// CATEGORY dictionary: code → string, persisted as a `.dic` side file
#[derive(Clone, Debug, Default)]
pub struct Dictionary {
    entries: Vec<String>,
    codes: HashMap<String, u32>,
}

impl Dictionary {
    /// Builds a dictionary from entries; code `i` maps to `entries[i]`.
    #[must_use]
    pub fn new(entries: Vec<String>) -> Self {
        let codes = entries
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), i as u32))
            .collect();

        Self { entries, codes }
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the dictionary holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolves a code to its string.
    #[must_use]
    pub fn value(&self, code: u32) -> Option<&str> {
        self.entries.get(code as usize).map(String::as_str)
    }

    /// Resolves a string to its code.
    #[must_use]
    pub fn code(&self, value: &str) -> Option<u32> {
        self.codes.get(value).copied()
    }
}

impl Encode for Dictionary {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u64_varint(self.entries.len() as u64)?;

        for entry in &self.entries {
            writer.write_u64_varint(entry.len() as u64)?;
            writer.write_all(entry.as_bytes())?;
        }

        Ok(())
    }
}

impl Decode for Dictionary {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let n = reader.read_u64_varint()? as usize;
        let mut entries = Vec::with_capacity(n.min(1 << 20));

        for _ in 0..n {
            let len = reader.read_u64_varint()? as usize;
            let mut buf = vec![0; len];
            reader.read_exact(&mut buf)?;
            entries.push(std::str::from_utf8(&buf)?.to_owned());
        }

        Ok(Self::new(entries))
    }
}

/// Per-column descriptor
///
/// Owned by the partition; all mutation happens under the partition's
/// structural write lock. The value file on disk is named exactly after
/// the column (with a `.int` suffix for CATEGORY codes); side files carry
/// fixed suffixes.
#[derive(Clone, Debug)]
pub struct Column {
    pub(crate) name: String,
    pub(crate) kind: ColumnType,

    /// `[lower, upper]`, lazily computed from the values
    pub(crate) bounds: Option<(f64, f64)>,

    /// Independent null mask; `None` means no nulls
    pub(crate) null_mask: Option<Bitvector>,

    /// Loaded bitmap index, if any
    pub(crate) index: Option<ColumnIndex>,

    /// How this column wants to be indexed
    pub(crate) index_spec: IndexSpec,

    /// CATEGORY dictionary, lazily loaded
    pub(crate) dictionary: Option<Dictionary>,
}

impl Column {
    pub(crate) fn new(name: String, kind: ColumnType, index_spec: IndexSpec) -> Self {
        Self {
            name,
            kind,
            bounds: None,
            null_mask: None,
            index: None,
            index_spec,
            dictionary: None,
        }
    }

    /// Column name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Element type.
    #[must_use]
    pub fn kind(&self) -> ColumnType {
        self.kind
    }

    /// `[lower, upper]` bounds, if they have been computed.
    #[must_use]
    pub fn bounds(&self) -> Option<(f64, f64)> {
        self.bounds
    }

    /// Returns `true` if a bitmap index is currently loaded.
    #[must_use]
    pub fn has_index(&self) -> bool {
        self.index.is_some()
    }

    /// Path of the fixed-width value file.
    #[must_use]
    pub fn value_path(&self, dir: &Path) -> PathBuf {
        if self.kind == ColumnType::Category {
            dir.join(format!("{}{CATEGORY_SUFFIX}", self.name))
        } else {
            dir.join(&self.name)
        }
    }

    /// Path of the TEXT/BLOB payload file.
    #[must_use]
    pub fn payload_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.name)
    }

    /// Path of the 64-bit start-offset side file (TEXT/BLOB).
    #[must_use]
    pub fn offsets_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}{OFFSETS_SUFFIX}", self.name))
    }

    /// Path of the CATEGORY dictionary file.
    #[must_use]
    pub fn dictionary_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}{DICTIONARY_SUFFIX}", self.name))
    }

    /// Path of the bitmap index file.
    #[must_use]
    pub fn index_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}{INDEX_SUFFIX}", self.name))
    }

    /// Path of the null mask file.
    #[must_use]
    pub fn null_mask_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}{NULL_MASK_SUFFIX}", self.name))
    }

    /// Loads the null mask if one is present; errors degrade to "no nulls".
    pub(crate) fn load_null_mask(&mut self, dir: &Path, nrows: usize) {
        let path = self.null_mask_path(dir);

        if !path.exists() {
            self.null_mask = None;
            return;
        }

        match Bitvector::read_from_file(&path) {
            Ok(mut mask) => {
                if mask.len() != nrows {
                    log::warn!(
                        "null mask of column {:?} has {} bits, expected {nrows}; adjusting",
                        self.name,
                        mask.len(),
                    );
                    mask.adjust_size(nrows, true);
                }
                self.null_mask = Some(mask);
            }
            Err(e) => {
                log::warn!("cannot read null mask of column {:?}: {e}", self.name);
                self.null_mask = None;
            }
        }
    }

    /// Loads the persisted dictionary (CATEGORY only).
    pub(crate) fn load_dictionary(&mut self, dir: &Path) -> crate::Result<()> {
        if self.dictionary.is_some() || self.kind != ColumnType::Category {
            return Ok(());
        }

        let bytes = std::fs::read(self.dictionary_path(dir))?;
        let mut reader = &bytes[..];
        self.dictionary = Some(Dictionary::decode_from(&mut reader)?);

        Ok(())
    }

    /// Loads the persisted index; a row-count mismatch discards it.
    pub(crate) fn load_index(&mut self, dir: &Path, nrows: usize) {
        use crate::index::IndexOps;

        if self.index.is_some() || self.index_spec == IndexSpec::NoIndex {
            return;
        }

        let path = self.index_path(dir);
        if !path.exists() {
            return;
        }

        match ColumnIndex::read_from_file(&path) {
            Ok(idx) if idx.row_count() == nrows => self.index = Some(idx),
            Ok(idx) => {
                log::warn!(
                    "index of column {:?} covers {} rows, expected {nrows}; purging",
                    self.name,
                    idx.row_count(),
                );
                if let Err(e) = std::fs::remove_file(&path) {
                    log::warn!("cannot purge stale index file: {e}");
                }
            }
            Err(e) => {
                log::warn!("cannot read index of column {:?}: {e}", self.name);
            }
        }
    }

    /// Drops the in-memory index, keeping any file.
    pub(crate) fn unload_index(&mut self) {
        self.index = None;
    }

    /// Drops the in-memory index and deletes its file.
    pub(crate) fn purge_index(&mut self, dir: &Path) {
        self.index = None;

        let path = self.index_path(dir);
        if path.exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                log::warn!("cannot remove index file of column {:?}: {e}", self.name);
            }
        }
    }
}
