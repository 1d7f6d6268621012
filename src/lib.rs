// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A columnar data partition with compressed bitmap indexes.
//!
//! ##### NOTE
//!
//! > This crate only provides a single data partition, not a full analytical
//! > database. It owns the on-disk layout of one directory-backed dataset,
//! > the cooperation rules between bitmap indexes and sequential scans, and
//! > the locking discipline that makes read-heavy query evaluation safe
//! > against background reorganization.
//!
//! ##### About
//!
//! A [`Partition`] is a named directory holding a plain-text header, one
//! fixed-width value file per column, an optional compressed row mask, and
//! optional per-column bitmap indexes. Queries are expressed as
//! [`Predicate`]s; the partition answers them either from an index, from a
//! type-specialized scan kernel, or from a combination of both:
//!
//! ```
//! use bitpart::{Config, Predicate};
//! #
//! # let folder = tempfile::tempdir()?;
//! # let mut writer = bitpart::PartitionWriter::create(&folder, "demo")?;
//! # writer.column_i32("x", &[0, 1, 2, 3, 4, 5])?;
//! # writer.finish()?;
//!
//! let part = Config::new(&folder).open()?;
//!
//! // `x < 3.7` over an INT column tightens to `x <= 3`
//! let pred = Predicate::range("x").less_than(3.7);
//!
//! let hits = part.evaluate(&pred)?;
//! assert_eq!(4, hits.count_ones());
//! #
//! # Ok::<(), bitpart::Error>(())
//! ```
//!
//! Every result is intersected with the partition's active-row mask, so
//! logically deleted rows never surface. Index answers and scan answers are
//! interchangeable; the built-in self test cross-checks them against each
//! other.

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]
#![warn(clippy::multiple_crate_versions)]
#![allow(clippy::option_if_let_else)]

mod barrel;

#[doc(hidden)]
pub mod bitvector;

mod checksum;

#[doc(hidden)]
pub mod coding;

mod column;
mod error;

#[doc(hidden)]
pub mod file;

mod file_manager;

#[doc(hidden)]
pub mod index;

mod metadata;
mod part;
mod path;
mod predicate;
mod resource;
mod rids;

#[doc(hidden)]
pub mod scan;

mod state;
mod types;
mod writer;

/// Hash map that uses a fast, non-cryptographic hash function
#[doc(hidden)]
pub type HashMap<K, V> = std::collections::HashMap<K, V, rustc_hash::FxBuildHasher>;

/// Row position inside a partition (0-based)
pub type RowId = u32;

#[doc(hidden)]
pub use {
    checksum::Checksum,
    coding::{DecodeError, EncodeError},
    part::selftest::SelfTest,
};

pub use {
    barrel::{Barrel, Vault},
    bitvector::Bitvector,
    column::Column,
    error::{Error, Result},
    file_manager::{AccessPreference, Cleaner, FileManager},
    index::{Estimate, IndexOptions, IndexSpec},
    metadata::{MeshShape, MetaTag, PartitionHeader},
    part::{Config, Partition},
    predicate::{Predicate, RangeBuilder, RangeOp, RangePredicate},
    resource::ResourceStore,
    rids::Rid,
    state::PartitionState,
    types::ColumnType,
    writer::PartitionWriter,
};
