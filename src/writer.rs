// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Partition construction.
//!
//! Lays down a complete partition directory: one value file per column,
//! CATEGORY dictionaries, TEXT/BLOB offset side files, the row mask, the
//! RID file and finally the header. Every column must supply the same row
//! count; shorter inputs are a caller error here, not a data error.

use crate::{
    coding::Encode,
    column::Dictionary,
    file::{CATEGORY_SUFFIX, DICTIONARY_SUFFIX, MASK_FILE, OFFSETS_SUFFIX, RIDS_FILE},
    metadata::{validate_column_name, ColumnSpec, MeshShape, MetaTag, PartitionHeader},
    path::absolute_path,
    scan::Scalar,
    state::PartitionState,
    types::ColumnType,
    Bitvector, Error, Rid,
};
use byteorder::{LittleEndian, WriteBytesExt};
use std::path::{Path, PathBuf};

/// Builder writing a new partition directory
///
/// ```
/// # let folder = tempfile::tempdir()?;
/// let mut writer = bitpart::PartitionWriter::create(&folder, "events")?;
/// writer.column_i32("x", &[1, 2, 3])?;
/// writer.column_f64("weight", &[0.5, 1.5, 2.5])?;
/// writer.finish()?;
/// # Ok::<(), bitpart::Error>(())
/// ```
pub struct PartitionWriter {
    dir: PathBuf,
    header: PartitionHeader,
    nrows: Option<usize>,
}

macro_rules! fixed_width_writers {
    ($(($fn_name:ident, $t:ty)),+ $(,)?) => {
        $(
            /// Writes a fixed-width column.
            pub fn $fn_name(&mut self, name: &str, values: &[$t]) -> crate::Result<&mut Self> {
                self.fixed_column::<$t>(name, values)
            }
        )+
    };
}

impl PartitionWriter {
    /// Starts a partition at `dir`, creating the directory if needed.
    pub fn create<P: AsRef<Path>>(dir: P, name: &str) -> crate::Result<Self> {
        let dir = absolute_path(dir);
        std::fs::create_dir_all(&dir)?;

        let switch_time = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        Ok(Self {
            dir,
            header: PartitionHeader {
                name: name.to_owned(),
                switch_time,
                state: PartitionState::Stable,
                ..PartitionHeader::default()
            },
            nrows: None,
        })
    }

    /// Sets the human description.
    pub fn description(&mut self, text: &str) -> &mut Self {
        self.header.description = text.to_owned();
        self
    }

    /// Appends a meta tag.
    pub fn meta_tag(&mut self, name: &str, value: &str) -> &mut Self {
        self.header.meta_tags.push(MetaTag::new(name, value));
        self
    }

    /// Sets the advisory mesh shape.
    pub fn mesh_shape(&mut self, shape: MeshShape) -> &mut Self {
        self.header.shape = Some(shape);
        self
    }

    /// Sets the partition-wide index specification.
    pub fn index_spec(&mut self, spec: &str) -> &mut Self {
        self.header.index_spec = Some(spec.to_owned());
        self
    }

    /// Sets the lifecycle state written to the header.
    pub fn state(&mut self, state: PartitionState) -> &mut Self {
        self.header.state = state;
        self
    }

    fixed_width_writers!(
        (column_i8, i8),
        (column_u8, u8),
        (column_i16, i16),
        (column_u16, u16),
        (column_i32, i32),
        (column_u32, u32),
        (column_i64, i64),
        (column_u64, u64),
        (column_f32, f32),
        (column_f64, f64),
    );

    /// Writes a CATEGORY column; the dictionary is built in first-appearance
    /// order.
    pub fn category(&mut self, name: &str, values: &[&str]) -> crate::Result<&mut Self> {
        validate_column_name(name)?;
        self.check_rows(name, values.len())?;

        let mut entries: Vec<String> = vec![];
        let mut codes = Vec::with_capacity(values.len());

        for &v in values {
            let code = match entries.iter().position(|e| e == v) {
                Some(i) => i as u32,
                None => {
                    entries.push(v.to_owned());
                    (entries.len() - 1) as u32
                }
            };
            codes.push(code);
        }

        let mut bytes = Vec::with_capacity(codes.len() * 4);
        for code in &codes {
            code.write_host(&mut bytes);
        }
        std::fs::write(self.dir.join(format!("{name}{CATEGORY_SUFFIX}")), bytes)?;

        let dict = Dictionary::new(entries);
        std::fs::write(
            self.dir.join(format!("{name}{DICTIONARY_SUFFIX}")),
            dict.encode_into_vec(),
        )?;

        self.header.columns.push(ColumnSpec {
            name: name.to_owned(),
            kind: ColumnType::Category,
            minimum: Some(0.0),
            maximum: Some(dict.len().saturating_sub(1) as f64),
            index_spec: None,
        });

        Ok(self)
    }

    /// Writes a TEXT column with its `.sp` offset side file.
    pub fn text(&mut self, name: &str, values: &[&str]) -> crate::Result<&mut Self> {
        let payloads: Vec<&[u8]> = values.iter().map(|v| v.as_bytes()).collect();
        self.variable_column(name, ColumnType::Text, &payloads)
    }

    /// Writes a BLOB column with its `.sp` offset side file.
    pub fn blob(&mut self, name: &str, values: &[&[u8]]) -> crate::Result<&mut Self> {
        self.variable_column(name, ColumnType::Blob, values)
    }

    /// Writes the RID file.
    pub fn rids(&mut self, rids: &[Rid]) -> crate::Result<&mut Self> {
        self.check_rows("-rids", rids.len())?;

        let mut bytes = Vec::with_capacity(rids.len() * 8);
        for rid in rids {
            bytes
                .write_u64::<LittleEndian>(rid.0)
                .map_err(crate::EncodeError::from)?;
        }
        std::fs::write(self.dir.join(RIDS_FILE), bytes)?;

        Ok(self)
    }

    /// Writes the active-row mask; an all-ones mask is left implicit.
    pub fn mask(&mut self, active: &[bool]) -> crate::Result<&mut Self> {
        self.check_rows("-part.msk", active.len())?;

        if active.iter().all(|&b| b) {
            return Ok(self);
        }

        let mut mask = Bitvector::new();
        for &bit in active {
            mask.push(bit);
        }

        mask.write_to_file(&self.dir.join(MASK_FILE))?;
        Ok(self)
    }

    /// Writes the header, completing the partition.
    pub fn finish(&mut self) -> crate::Result<()> {
        self.header.nrows = self.nrows.unwrap_or(0) as u32;
        self.header.write_to_dir(&self.dir)
    }

    fn fixed_column<T: Scalar>(&mut self, name: &str, values: &[T]) -> crate::Result<&mut Self> {
        validate_column_name(name)?;
        self.check_rows(name, values.len())?;

        let mut bytes = Vec::with_capacity(values.len() * T::SIZE);
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;

        for &v in values {
            v.write_host(&mut bytes);

            let f = v.to_f64();
            if f.is_finite() {
                min = min.min(f);
                max = max.max(f);
            }
        }

        std::fs::write(self.dir.join(name), bytes)?;

        self.header.columns.push(ColumnSpec {
            name: name.to_owned(),
            kind: T::KIND,
            minimum: (min <= max).then_some(min),
            maximum: (min <= max).then_some(max),
            index_spec: None,
        });

        Ok(self)
    }

    fn variable_column(
        &mut self,
        name: &str,
        kind: ColumnType,
        values: &[&[u8]],
    ) -> crate::Result<&mut Self> {
        validate_column_name(name)?;
        self.check_rows(name, values.len())?;

        let mut payload = vec![];
        let mut offsets = Vec::with_capacity(values.len() + 1);

        offsets.push(0u64);
        for v in values {
            payload.extend_from_slice(v);
            offsets.push(payload.len() as u64);
        }

        std::fs::write(self.dir.join(name), payload)?;

        let mut sp = Vec::with_capacity(offsets.len() * 8);
        for off in &offsets {
            sp.write_u64::<LittleEndian>(*off)
                .map_err(crate::EncodeError::from)?;
        }
        std::fs::write(self.dir.join(format!("{name}{OFFSETS_SUFFIX}")), sp)?;

        self.header.columns.push(ColumnSpec {
            name: name.to_owned(),
            kind,
            minimum: None,
            maximum: None,
            index_spec: None,
        });

        Ok(self)
    }

    fn check_rows(&mut self, what: &str, len: usize) -> crate::Result<()> {
        match self.nrows {
            None => {
                if len > crate::metadata::MAX_ROWS as usize {
                    return Err(Error::RowCountOverflow(len as u64));
                }
                self.nrows = Some(len);
                Ok(())
            }
            Some(n) if n == len => Ok(()),
            Some(n) => Err(Error::ValueBufferMismatch {
                expected_full: n,
                expected_packed: n,
                got: len,
            })
            .inspect_err(|_| log::warn!("{what} supplies {len} rows, partition has {n}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn row_count_must_be_consistent() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut w = PartitionWriter::create(&dir, "p")?;

        w.column_i32("a", &[1, 2, 3])?;
        assert!(w.column_i32("b", &[1, 2]).is_err());

        Ok(())
    }

    #[test]
    fn writes_open_as_partition() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;

        let mut w = PartitionWriter::create(&dir, "roundtrip")?;
        w.description("writer test");
        w.meta_tag("origin", "unit");
        w.column_i32("x", &[5, -3, 12])?;
        w.category("c", &["a", "b", "a"])?;
        w.text("t", &["one", "two", "three"])?;
        w.mask(&[true, false, true])?;
        w.finish()?;

        let part = crate::Config::new(&dir).open()?;

        assert_eq!(3, part.row_count());
        assert_eq!(2, part.active_rows());
        assert_eq!(Some(ColumnType::Category), part.column_type("c"));
        assert_eq!("writer test", part.description());

        Ok(())
    }
}
