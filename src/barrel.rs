// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Synchronized multi-column cursors for arithmetic expressions.
//!
//! A [`Barrel`] aligns every named column on the same row and materializes
//! each variable as a `f64` for an expression evaluator. The [`Vault`]
//! specialization additionally honors a sort order over one roster
//! column, so rows come back ordered by value while the remaining
//! variables follow the roster's permutation.

use crate::{
    column::Column,
    part::{queries, Partition},
    scan::{decode_f64_at, read_f64_at},
    types::ColumnType,
    Error,
};
use byteview::ByteView;
use std::{fs::File, sync::Arc};

enum Source {
    /// Whole column resident in memory
    Memory(ByteView),

    /// Shared read-only descriptor, positioned reads only
    File(Arc<File>),
}

struct BarrelVar {
    name: String,
    kind: ColumnType,
    source: Source,
}

impl BarrelVar {
    fn value_at(&self, row: usize) -> crate::Result<f64> {
        match &self.source {
            Source::Memory(view) => decode_f64_at(self.kind, view, row).ok_or_else(|| {
                Error::ValueBufferMismatch {
                    expected_full: row + 1,
                    expected_packed: row + 1,
                    got: view.len() / self.kind.element_size().unwrap_or(1),
                }
            }),
            Source::File(file) => read_f64_at(self.kind, file, row),
        }
    }
}

/// Multi-column synchronized random-access reader
///
/// All variables advance in lockstep; [`Barrel::seek`] realigns every
/// descriptor to the same row in O(#columns).
pub struct Barrel {
    vars: Vec<BarrelVar>,
    nrows: usize,
    row: usize,
    buf: Vec<f64>,
}

impl Barrel {
    /// Opens a barrel over the named columns.
    ///
    /// Fails with [`Error::UnknownColumn`] for a missing column and
    /// [`Error::UnsupportedType`] for TEXT and BLOB variables.
    pub fn open(part: &Partition, names: &[&str]) -> crate::Result<Self> {
        let data = part.read_data();
        let inner = &part.inner;

        let mut vars = Vec::with_capacity(names.len());

        for &name in names {
            let col: &Column = data
                .column(name)
                .ok_or_else(|| Error::UnknownColumn(name.to_owned()))?;

            if !col.kind().is_numeric() {
                return Err(Error::UnsupportedType {
                    column: name.to_owned(),
                    kind: col.kind(),
                });
            }

            let path = col.value_path(&inner.active_dir);
            let source = match inner.fm.fetch_array(&path, inner.access)? {
                Some(view) => Source::Memory(view),
                None => Source::File(inner.fm.fetch_descriptor(&path)?),
            };

            vars.push(BarrelVar {
                name: name.to_owned(),
                kind: col.kind(),
                source,
            });
        }

        let nrows = data.nrows;
        let buf = vec![0.0; vars.len()];

        Ok(Self {
            vars,
            nrows,
            row: 0,
            buf,
        })
    }

    /// Names of the variables, in open order.
    #[must_use]
    pub fn variable_names(&self) -> Vec<&str> {
        self.vars.iter().map(|v| v.name.as_str()).collect()
    }

    /// Row the next [`Barrel::read`] will deliver.
    #[must_use]
    pub fn position(&self) -> usize {
        self.row
    }

    /// Total rows.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.nrows
    }

    /// Aligns all variables on `row`.
    pub fn seek(&mut self, row: usize) -> crate::Result<()> {
        if row > self.nrows {
            return Err(Error::ValueBufferMismatch {
                expected_full: self.nrows,
                expected_packed: self.nrows,
                got: row,
            });
        }

        self.row = row;
        Ok(())
    }

    /// Reads the current row into the variable buffer and advances.
    ///
    /// Returns `None` past the last row.
    pub fn read(&mut self) -> crate::Result<Option<&[f64]>> {
        if self.row >= self.nrows {
            return Ok(None);
        }

        for (slot, var) in self.vars.iter().enumerate() {
            let v = var.value_at(self.row)?;
            if let Some(out) = self.buf.get_mut(slot) {
                *out = v;
            }
        }

        self.row += 1;
        Ok(Some(&self.buf))
    }
}

/// A barrel paired with a sorted-column roster
///
/// [`Vault::seek`] binary-searches the roster values; [`Vault::read`]
/// delivers rows in roster order while the remaining variables follow the
/// permutation.
pub struct Vault {
    barrel: Barrel,

    /// Roster values, ascending
    keys: Vec<f64>,

    /// Row numbers in roster order
    order: Vec<u32>,

    pos: usize,
}

impl Vault {
    /// Opens a vault sorted by `roster` over the named columns.
    pub fn open(part: &Partition, roster: &str, names: &[&str]) -> crate::Result<Self> {
        let values = {
            let data = part.read_data();
            let col = data
                .column(roster)
                .ok_or_else(|| Error::UnknownColumn(roster.to_owned()))?;

            if !col.kind().is_numeric() {
                return Err(Error::UnsupportedType {
                    column: roster.to_owned(),
                    kind: col.kind(),
                });
            }

            queries::read_column_f64(&part.inner, col, data.nrows)?
        };

        let mut order: Vec<u32> = (0..values.len() as u32).collect();
        order.sort_by(|&a, &b| {
            let x = values.get(a as usize).copied().unwrap_or(f64::NAN);
            let y = values.get(b as usize).copied().unwrap_or(f64::NAN);
            x.total_cmp(&y)
        });

        let keys: Vec<f64> = order
            .iter()
            .map(|&r| values.get(r as usize).copied().unwrap_or(f64::NAN))
            .collect();

        Ok(Self {
            barrel: Barrel::open(part, names)?,
            keys,
            order,
            pos: 0,
        })
    }

    /// Positions the cursor on the first roster entry `>= value`.
    pub fn seek(&mut self, value: f64) {
        self.pos = self.keys.partition_point(|&k| k < value);
    }

    /// Roster value the next read will deliver.
    #[must_use]
    pub fn key(&self) -> Option<f64> {
        self.keys.get(self.pos).copied()
    }

    /// Reads the next row in roster order.
    pub fn read(&mut self) -> crate::Result<Option<&[f64]>> {
        let Some(&row) = self.order.get(self.pos) else {
            return Ok(None);
        };

        self.pos += 1;
        self.barrel.seek(row as usize)?;
        self.barrel.read()
    }
}
