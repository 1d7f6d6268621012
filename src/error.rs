// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{DecodeError, EncodeError},
    types::ColumnType,
};

/// Represents errors that can occur in the partition
#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(std::io::Error),

    /// Serialization failed
    Encode(EncodeError),

    /// Deserialization failed
    Decode(DecodeError),

    /// Neither a partition header file nor a legacy header file was found
    MetadataMissing,

    /// A row count or file size exceeds the 2^31 - 1 row limit
    RowCountOverflow(u64),

    /// A column name is invalid (contains `.`, `-` or a path separator)
    InvalidColumnName(String),

    /// A predicate or cursor referenced a column that does not exist
    UnknownColumn(String),

    /// The requested operation is not defined for the column's type
    UnsupportedType {
        /// Offending column
        column: String,

        /// The column's type
        kind: ColumnType,
    },

    /// A value buffer length matches neither the full-column nor the
    /// packed representation for the given mask
    ValueBufferMismatch {
        /// Length of the full representation (mask size)
        expected_full: usize,

        /// Length of the packed representation (mask cardinality)
        expected_packed: usize,

        /// Length that was supplied
        got: usize,
    },

    /// Renaming the partition ran out of unique name candidates
    RenameExhausted,

    /// The partition is not in a state that allows querying
    NotQueryable,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PartitionError: {self:?}")
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Encode(e) => Some(e),
            Self::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<EncodeError> for Error {
    fn from(value: EncodeError) -> Self {
        Self::Encode(value)
    }
}

impl From<DecodeError> for Error {
    fn from(value: DecodeError) -> Self {
        Self::Decode(value)
    }
}

/// Partition result
pub type Result<T> = std::result::Result<T, Error>;
