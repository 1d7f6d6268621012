// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Plain-text partition header (`-part.txt`).
//!
//! The header is a `BEGIN HEADER` / `END HEADER` block of case-insensitive
//! `keyword = value` lines followed by one `Begin Column` / `End Column`
//! block per column. The legacy file name `table.tdc` is recognized for
//! reading.

use crate::{
    file::{HEADER_FILE, LEGACY_HEADER_FILE},
    state::PartitionState,
    types::ColumnType,
    Error,
};
use std::{
    io::Write,
    path::{Path, PathBuf},
};

/// Hard upper bound on row and column counts
pub const MAX_ROWS: u64 = i32::MAX as u64;

/// A partition-level `(name, value)` label
///
/// Meta tags are set at construction, rewritten with the header, and
/// queryable as if they were single-value CATEGORY columns.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MetaTag {
    /// Tag name
    pub name: String,

    /// Tag value
    pub value: String,
}

impl MetaTag {
    /// Creates a tag.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Optional named-dimension size vector describing a logical n-D grid over
/// rows
///
/// Purely advisory; condition evaluators that understand neighborhoods may
/// consult it.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MeshShape {
    /// Dimension sizes, outermost first, each optionally named
    pub dims: Vec<(Option<String>, u64)>,
}

impl MeshShape {
    fn parse(s: &str) -> Option<Self> {
        let inner = s.trim().strip_prefix('(')?.strip_suffix(')')?;
        let mut dims = vec![];

        for item in inner.split(',') {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }

            if let Some((name, size)) = item.split_once('=') {
                dims.push((Some(name.trim().to_owned()), size.trim().parse().ok()?));
            } else {
                dims.push((None, item.parse().ok()?));
            }
        }

        Some(Self { dims })
    }

    fn format(&self) -> String {
        let items: Vec<String> = self
            .dims
            .iter()
            .map(|(name, size)| match name {
                Some(n) => format!("{n}={size}"),
                None => size.to_string(),
            })
            .collect();

        format!("({})", items.join(", "))
    }
}

/// Per-column block of the header
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnSpec {
    /// Column (and value file) name
    pub name: String,

    /// Element type
    pub kind: ColumnType,

    /// Smallest value, if recorded
    pub minimum: Option<f64>,

    /// Largest value, if recorded
    pub maximum: Option<f64>,

    /// Column-level index specification
    pub index_spec: Option<String>,
}

/// Parsed partition header
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PartitionHeader {
    /// Partition name, unique within a process
    pub name: String,

    /// Human description
    pub description: String,

    /// Total row count (`nEvents`)
    pub nrows: u32,

    /// Monotonic timestamp of the last structural switch
    pub switch_time: u64,

    /// Lifecycle state
    pub state: PartitionState,

    /// Backup directory, if the partition owns one
    pub alternative_directory: Option<PathBuf>,

    /// Partition-wide index specification
    pub index_spec: Option<String>,

    /// Ordered meta tags
    pub meta_tags: Vec<MetaTag>,

    /// Optional mesh shape
    pub shape: Option<MeshShape>,

    /// Column blocks, in file order
    pub columns: Vec<ColumnSpec>,
}

/// Checks a column name against the layout rules.
///
/// Value files are named exactly after the column, so `.`, `-` and path
/// separators are rejected. A leading `_` is reserved for hex-digit
/// positional lookup.
pub fn validate_column_name(name: &str) -> crate::Result<()> {
    let ok = !name.is_empty()
        && !name
            .chars()
            .any(|c| c == '.' || c == '-' || c == '/' || c == '\\');

    if ok {
        Ok(())
    } else {
        Err(Error::InvalidColumnName(name.to_owned()))
    }
}

impl PartitionHeader {
    /// Reads the header from a partition directory.
    ///
    /// Tries `-part.txt` first, then the legacy `table.tdc`. Fails with
    /// [`Error::MetadataMissing`] if neither exists.
    pub fn read_from_dir(dir: &Path) -> crate::Result<Self> {
        for file in [HEADER_FILE, LEGACY_HEADER_FILE] {
            let path = dir.join(file);

            if path.try_exists()? {
                let text = std::fs::read_to_string(&path)?;
                return Self::parse(&text);
            }
        }

        Err(Error::MetadataMissing)
    }

    /// Parses header text.
    pub fn parse(text: &str) -> crate::Result<Self> {
        let mut header = Self::default();
        let mut in_header = false;
        let mut column: Option<ColumnSpec> = None;
        let mut declared_columns: Option<u64> = None;
        let mut selected: Option<Vec<usize>> = None;

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let lower = line.to_ascii_lowercase();

            match lower.as_str() {
                "begin header" => {
                    in_header = true;
                    continue;
                }
                "end header" => {
                    in_header = false;
                    continue;
                }
                "begin column" => {
                    column = Some(ColumnSpec {
                        name: String::new(),
                        kind: ColumnType::Int,
                        minimum: None,
                        maximum: None,
                        index_spec: None,
                    });
                    continue;
                }
                "end column" => {
                    if let Some(col) = column.take() {
                        if col.name.is_empty() {
                            log::warn!("dropping column block without a name");
                        } else {
                            header.columns.push(col);
                        }
                    }
                    continue;
                }
                _ => {}
            }

            let Some((key, value)) = line.split_once('=') else {
                log::warn!("ignoring malformed header line {line:?}");
                continue;
            };

            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();

            if let Some(col) = column.as_mut() {
                Self::apply_column_field(col, &key, value);
                continue;
            }

            if !in_header {
                log::warn!("ignoring stray header line {line:?}");
                continue;
            }

            match key.as_str() {
                "name" | "partition" | "table" => header.name = value.to_owned(),
                "description" => header.description = value.to_owned(),
                "number_of_rows" | "number_of_events" => {
                    let n: u64 = value
                        .parse()
                        .map_err(|_| Error::Decode(crate::DecodeError::InvalidHeader("Number_of_rows")))?;
                    if n > MAX_ROWS {
                        return Err(Error::RowCountOverflow(n));
                    }
                    header.nrows = n as u32;
                }
                "number_of_columns" => declared_columns = value.parse().ok(),
                "timestamp" => header.switch_time = value.parse().unwrap_or(0),
                "state" => {
                    header.state = PartitionState::parse(value).unwrap_or_default();
                }
                "alternative_directory" => {
                    header.alternative_directory = Some(PathBuf::from(value));
                }
                "index" => header.index_spec = Some(value.to_owned()),
                "metatags" => header.meta_tags = parse_meta_tags(value),
                "columnshape" | "meshshape" => header.shape = MeshShape::parse(value),
                "columns_selected" => selected = parse_selection(value),
                _ => log::debug!("ignoring unknown header keyword {key:?}"),
            }
        }

        if let Some(declared) = declared_columns {
            if declared != header.columns.len() as u64 {
                log::warn!(
                    "header declares {declared} columns but {} blocks follow, using the blocks",
                    header.columns.len(),
                );
            }
        }

        if let Some(keep) = selected {
            let mut idx = 0;
            header.columns.retain(|_| {
                let k = keep.contains(&idx);
                idx += 1;
                k
            });
        }

        for col in &header.columns {
            validate_column_name(&col.name)?;
        }

        Ok(header)
    }

    fn apply_column_field(col: &mut ColumnSpec, key: &str, value: &str) {
        match key {
            "name" => col.name = value.to_owned(),
            "data_type" | "type" => {
                if let Some(t) = ColumnType::parse(value) {
                    col.kind = t;
                } else {
                    log::warn!("unknown column type {value:?}, keeping {}", col.kind);
                }
            }
            "minimum" => col.minimum = value.parse().ok(),
            "maximum" => col.maximum = value.parse().ok(),
            "index" => col.index_spec = Some(value.to_owned()),
            _ => log::debug!("ignoring unknown column keyword {key:?}"),
        }
    }

    /// Emits header text.
    pub fn write_into<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writeln!(writer, "BEGIN HEADER")?;
        writeln!(writer, "Name = {}", self.name)?;
        writeln!(writer, "Description = {}", self.description)?;
        writeln!(writer, "Number_of_rows = {}", self.nrows)?;
        writeln!(writer, "Number_of_columns = {}", self.columns.len())?;
        writeln!(writer, "Timestamp = {}", self.switch_time)?;
        writeln!(writer, "State = {}", self.state)?;

        if let Some(dir) = &self.alternative_directory {
            writeln!(writer, "Alternative_Directory = {}", dir.display())?;
        }

        if !self.meta_tags.is_empty() {
            let tags: Vec<String> = self
                .meta_tags
                .iter()
                .map(|t| format!("{}={}", t.name, t.value))
                .collect();
            writeln!(writer, "metaTags = {}", tags.join(", "))?;
        }

        if let Some(shape) = &self.shape {
            writeln!(writer, "columnShape = {}", shape.format())?;
        }

        if let Some(spec) = &self.index_spec {
            writeln!(writer, "index = {spec}")?;
        }

        writeln!(writer, "END HEADER")?;

        for col in &self.columns {
            writeln!(writer)?;
            writeln!(writer, "Begin Column")?;
            writeln!(writer, "name = {}", col.name)?;
            writeln!(writer, "data_type = {}", col.kind)?;

            if let Some(min) = col.minimum {
                writeln!(writer, "minimum = {min}")?;
            }
            if let Some(max) = col.maximum {
                writeln!(writer, "maximum = {max}")?;
            }
            if let Some(spec) = &col.index_spec {
                writeln!(writer, "index = {spec}")?;
            }

            writeln!(writer, "End Column")?;
        }

        Ok(())
    }

    /// Atomically rewrites `-part.txt` in `dir`.
    pub fn write_to_dir(&self, dir: &Path) -> crate::Result<()> {
        let mut buf = vec![];
        self.write_into(&mut buf)?;
        crate::file::rewrite_atomic(&dir.join(HEADER_FILE), &buf)?;
        Ok(())
    }
}

fn parse_meta_tags(value: &str) -> Vec<MetaTag> {
    value
        .split([',', ';'])
        .filter_map(|item| {
            let (name, value) = item.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some(MetaTag::new(name, value.trim()))
        })
        .collect()
}

/// Parses a `Columns_Selected` position list (`0, 2, 4-7`).
fn parse_selection(value: &str) -> Option<Vec<usize>> {
    let mut keep = vec![];

    for item in value.split(',') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }

        if let Some((lo, hi)) = item.split_once('-') {
            let lo: usize = lo.trim().parse().ok()?;
            let hi: usize = hi.trim().parse().ok()?;
            keep.extend(lo..=hi);
        } else {
            keep.push(item.parse().ok()?);
        }
    }

    Some(keep)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn sample() -> PartitionHeader {
        PartitionHeader {
            name: "events".into(),
            description: "test partition".into(),
            nrows: 6,
            switch_time: 1_690_000_000,
            state: PartitionState::Stable,
            alternative_directory: None,
            index_spec: Some("<binning nbins=64/>".into()),
            meta_tags: vec![MetaTag::new("source", "unit"), MetaTag::new("version", "1")],
            shape: Some(MeshShape {
                dims: vec![(Some("x".into()), 2), (Some("y".into()), 3)],
            }),
            columns: vec![
                ColumnSpec {
                    name: "x".into(),
                    kind: ColumnType::Int,
                    minimum: Some(0.0),
                    maximum: Some(5.0),
                    index_spec: None,
                },
                ColumnSpec {
                    name: "label".into(),
                    kind: ColumnType::Category,
                    minimum: None,
                    maximum: None,
                    index_spec: None,
                },
            ],
        }
    }

    #[test]
    fn roundtrip() -> crate::Result<()> {
        let header = sample();

        let mut buf = vec![];
        header.write_into(&mut buf)?;

        #[allow(clippy::expect_used)]
        let text = String::from_utf8(buf).expect("header is UTF-8");
        let back = PartitionHeader::parse(&text)?;

        assert_eq!(header, back);

        Ok(())
    }

    #[test]
    fn keywords_are_case_insensitive() -> crate::Result<()> {
        let text = "BEGIN HEADER\n\
                    NAME = p\n\
                    number_OF_rows = 42\n\
                    state = stable\n\
                    METATAGS = a=1; b=2\n\
                    END HEADER\n";

        let h = PartitionHeader::parse(text)?;

        assert_eq!("p", h.name);
        assert_eq!(42, h.nrows);
        assert_eq!(PartitionState::Stable, h.state);
        assert_eq!(
            vec![MetaTag::new("a", "1"), MetaTag::new("b", "2")],
            h.meta_tags
        );

        Ok(())
    }

    #[test]
    fn row_count_overflow() {
        let text = "BEGIN HEADER\nName = p\nNumber_of_rows = 3000000000\nEND HEADER\n";

        assert!(matches!(
            PartitionHeader::parse(text),
            Err(Error::RowCountOverflow(3_000_000_000)),
        ));
    }

    #[test]
    fn column_count_mismatch_is_soft() -> crate::Result<()> {
        let text = "BEGIN HEADER\n\
                    Name = p\n\
                    Number_of_rows = 1\n\
                    Number_of_columns = 5\n\
                    END HEADER\n\
                    Begin Column\nname = only\ndata_type = INT\nEnd Column\n";

        let h = PartitionHeader::parse(text)?;
        assert_eq!(1, h.columns.len());

        Ok(())
    }

    #[test]
    fn selected_columns_filter() -> crate::Result<()> {
        let text = "BEGIN HEADER\n\
                    Name = p\n\
                    Number_of_rows = 1\n\
                    Columns_Selected = 0, 2-3\n\
                    END HEADER\n\
                    Begin Column\nname = a\ndata_type = INT\nEnd Column\n\
                    Begin Column\nname = b\ndata_type = INT\nEnd Column\n\
                    Begin Column\nname = c\ndata_type = INT\nEnd Column\n\
                    Begin Column\nname = d\ndata_type = INT\nEnd Column\n";

        let h = PartitionHeader::parse(text)?;

        let names: Vec<&str> = h.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(vec!["a", "c", "d"], names);

        Ok(())
    }

    #[test]
    fn mesh_shape_forms() {
        assert_eq!(
            Some(MeshShape {
                dims: vec![(None, 10), (None, 20)]
            }),
            MeshShape::parse("(10, 20)"),
        );
        assert_eq!(
            Some(MeshShape {
                dims: vec![(Some("x".into()), 10), (Some("y".into()), 20)]
            }),
            MeshShape::parse("( x=10 , y=20 )"),
        );
        assert_eq!(None, MeshShape::parse("10, 20"));
    }

    #[test]
    fn invalid_column_names() {
        assert!(validate_column_name("ok_name").is_ok());
        assert!(validate_column_name("_0").is_ok());
        assert!(validate_column_name("a.b").is_err());
        assert!(validate_column_name("a-b").is_err());
        assert!(validate_column_name("a/b").is_err());
        assert!(validate_column_name("").is_err());
    }

    #[test]
    fn missing_header_file() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;

        assert!(matches!(
            PartitionHeader::read_from_dir(dir.path()),
            Err(Error::MetadataMissing),
        ));

        Ok(())
    }

    #[test]
    fn legacy_file_name_is_recognized() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;

        let mut buf = vec![];
        sample().write_into(&mut buf)?;
        std::fs::write(dir.path().join(LEGACY_HEADER_FILE), &buf)?;

        let h = PartitionHeader::read_from_dir(dir.path())?;
        assert_eq!("events", h.name);

        Ok(())
    }
}
