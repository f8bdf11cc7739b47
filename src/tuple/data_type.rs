use std::fmt;

/// Column types that can be stored in records and used in index keys.
/// Every column occupies a fixed number of bytes in a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColType {
    /// 32-bit signed integer: 4 bytes, little-endian
    Int,

    /// 64-bit floating point: 8 bytes, IEEE 754
    Float,

    /// Fixed-length byte string, zero-padded to the column length
    String,

    /// 64-bit signed integer: 8 bytes, little-endian
    BigInt,
}

impl ColType {
    /// Type id persisted in index headers.
    pub fn type_id(&self) -> i32 {
        match self {
            ColType::Int => 0,
            ColType::Float => 1,
            ColType::String => 2,
            ColType::BigInt => 3,
        }
    }

    pub fn from_type_id(type_id: i32) -> Option<Self> {
        match type_id {
            0 => Some(ColType::Int),
            1 => Some(ColType::Float),
            2 => Some(ColType::String),
            3 => Some(ColType::BigInt),
            _ => None,
        }
    }

    /// Width of numeric types. Strings take their declared length.
    pub fn fixed_len(&self) -> Option<usize> {
        match self {
            ColType::Int => Some(4),
            ColType::Float | ColType::BigInt => Some(8),
            ColType::String => None,
        }
    }

    /// Returns true if `len` is a valid column width for this type.
    pub fn accepts_len(&self, len: usize) -> bool {
        match self.fixed_len() {
            Some(fixed) => len == fixed,
            None => len > 0,
        }
    }
}

impl fmt::Display for ColType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColType::Int => write!(f, "INT"),
            ColType::Float => write!(f, "FLOAT"),
            ColType::String => write!(f, "CHAR"),
            ColType::BigInt => write!(f, "BIGINT"),
        }
    }
}
