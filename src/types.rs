// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

/// Element type of a column
///
/// Fixed-width numeric types are stored as host-order arrays on disk.
/// `Category` stores `u32` dictionary codes in a `.int` side file, `Text`
/// and `Blob` store concatenated variable-length payloads next to a `.sp`
/// file of 64-bit start offsets.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum ColumnType {
    /// Signed 8-bit integer
    Byte,

    /// Unsigned 8-bit integer
    UByte,

    /// Signed 16-bit integer
    Short,

    /// Unsigned 16-bit integer
    UShort,

    /// Signed 32-bit integer
    Int,

    /// Unsigned 32-bit integer
    UInt,

    /// Signed 64-bit integer
    Long,

    /// Unsigned 64-bit integer
    ULong,

    /// 32-bit IEEE-754 float
    Float,

    /// 64-bit IEEE-754 float
    Double,

    /// Integer-encoded dictionary string
    Category,

    /// Variable-length string
    Text,

    /// Opaque variable-length bytes
    Blob,

    /// 64-bit row identifier pair
    Oid,
}

impl ColumnType {
    /// Returns the on-disk element width in bytes.
    ///
    /// `Text` and `Blob` have no fixed width; their `.sp` offset files are
    /// sized independently.
    #[must_use]
    pub fn element_size(self) -> Option<usize> {
        match self {
            Self::Byte | Self::UByte => Some(1),
            Self::Short | Self::UShort => Some(2),
            Self::Int | Self::UInt | Self::Float | Self::Category => Some(4),
            Self::Long | Self::ULong | Self::Double | Self::Oid => Some(8),
            Self::Text | Self::Blob => None,
        }
    }

    /// Returns `true` for types scan kernels can evaluate numerically.
    #[must_use]
    pub fn is_numeric(self) -> bool {
        self.is_integer() || self.is_float()
    }

    /// Returns `true` for fixed-width integer types (CATEGORY codes included).
    #[must_use]
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            Self::Byte
                | Self::UByte
                | Self::Short
                | Self::UShort
                | Self::Int
                | Self::UInt
                | Self::Long
                | Self::ULong
                | Self::Category
        )
    }

    /// Returns `true` for floating-point types.
    #[must_use]
    pub fn is_float(self) -> bool {
        matches!(self, Self::Float | Self::Double)
    }

    /// Returns `true` if values of this type carry a sign.
    #[must_use]
    pub fn is_signed(self) -> bool {
        matches!(
            self,
            Self::Byte | Self::Short | Self::Int | Self::Long | Self::Float | Self::Double
        )
    }

    /// Parses a header type name, case-insensitively.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s.to_ascii_lowercase().as_str() {
            "byte" => Self::Byte,
            "ubyte" | "unsigned byte" => Self::UByte,
            "short" => Self::Short,
            "ushort" | "unsigned short" => Self::UShort,
            "int" => Self::Int,
            "uint" | "unsigned int" => Self::UInt,
            "long" => Self::Long,
            "ulong" | "unsigned long" => Self::ULong,
            "float" => Self::Float,
            "double" => Self::Double,
            "category" | "key" => Self::Category,
            "text" => Self::Text,
            "blob" => Self::Blob,
            "oid" => Self::Oid,
            _ => return None,
        })
    }

    /// Returns the canonical header name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Byte => "BYTE",
            Self::UByte => "UBYTE",
            Self::Short => "SHORT",
            Self::UShort => "USHORT",
            Self::Int => "INT",
            Self::UInt => "UINT",
            Self::Long => "LONG",
            Self::ULong => "ULONG",
            Self::Float => "FLOAT",
            Self::Double => "DOUBLE",
            Self::Category => "CATEGORY",
            Self::Text => "TEXT",
            Self::Blob => "BLOB",
            Self::Oid => "OID",
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl From<ColumnType> for u8 {
    fn from(val: ColumnType) -> Self {
        match val {
            ColumnType::Byte => 0,
            ColumnType::UByte => 1,
            ColumnType::Short => 2,
            ColumnType::UShort => 3,
            ColumnType::Int => 4,
            ColumnType::UInt => 5,
            ColumnType::Long => 6,
            ColumnType::ULong => 7,
            ColumnType::Float => 8,
            ColumnType::Double => 9,
            ColumnType::Category => 10,
            ColumnType::Text => 11,
            ColumnType::Blob => 12,
            ColumnType::Oid => 13,
        }
    }
}

impl TryFrom<u8> for ColumnType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Byte),
            1 => Ok(Self::UByte),
            2 => Ok(Self::Short),
            3 => Ok(Self::UShort),
            4 => Ok(Self::Int),
            5 => Ok(Self::UInt),
            6 => Ok(Self::Long),
            7 => Ok(Self::ULong),
            8 => Ok(Self::Float),
            9 => Ok(Self::Double),
            10 => Ok(Self::Category),
            11 => Ok(Self::Text),
            12 => Ok(Self::Blob),
            13 => Ok(Self::Oid),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn type_names_roundtrip() {
        for t in [
            ColumnType::Byte,
            ColumnType::UByte,
            ColumnType::Short,
            ColumnType::UShort,
            ColumnType::Int,
            ColumnType::UInt,
            ColumnType::Long,
            ColumnType::ULong,
            ColumnType::Float,
            ColumnType::Double,
            ColumnType::Category,
            ColumnType::Text,
            ColumnType::Blob,
            ColumnType::Oid,
        ] {
            assert_eq!(Some(t), ColumnType::parse(t.name()));
            assert_eq!(Some(t), ColumnType::parse(&t.name().to_lowercase()));
            assert_eq!(Ok(t), ColumnType::try_from(u8::from(t)));
        }
    }

    #[test]
    fn element_sizes() {
        assert_eq!(Some(1), ColumnType::Byte.element_size());
        assert_eq!(Some(2), ColumnType::UShort.element_size());
        assert_eq!(Some(4), ColumnType::Float.element_size());
        assert_eq!(Some(4), ColumnType::Category.element_size());
        assert_eq!(Some(8), ColumnType::Double.element_size());
        assert_eq!(None, ColumnType::Text.element_size());
        assert_eq!(None, ColumnType::Blob.element_size());
    }
}
