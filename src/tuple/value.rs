use std::fmt;

use bytes::{Buf, BufMut};

use super::ColType;

/// A typed value of one column.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    BigInt(i64),
    Float(f64),
    String(String),
}

impl Value {
    pub fn col_type(&self) -> ColType {
        match self {
            Value::Int(_) => ColType::Int,
            Value::BigInt(_) => ColType::BigInt,
            Value::Float(_) => ColType::Float,
            Value::String(_) => ColType::String,
        }
    }

    /// Encodes the value as a column of `col_type` that is `len` bytes wide.
    /// Returns None if the value is incompatible with the type or does not
    /// fit. An Int widens to a BigInt column.
    pub fn encode(&self, col_type: ColType, len: usize) -> Option<Vec<u8>> {
        if !col_type.accepts_len(len) {
            return None;
        }
        let mut bytes = Vec::with_capacity(len);
        match (self, col_type) {
            (Value::Int(v), ColType::Int) => bytes.put_i32_le(*v),
            (Value::Int(v), ColType::BigInt) => bytes.put_i64_le(*v as i64),
            (Value::BigInt(v), ColType::BigInt) => bytes.put_i64_le(*v),
            // -0.0 is stored as 0.0 so both zeros are one key
            (Value::Float(v), ColType::Float) => {
                bytes.put_f64_le(if *v == 0.0 { 0.0 } else { *v })
            }
            (Value::String(s), ColType::String) => {
                if s.len() > len {
                    return None;
                }
                bytes.put_slice(s.as_bytes());
                bytes.resize(len, 0);
            }
            _ => return None,
        }
        Some(bytes)
    }

    /// Decodes a column of `col_type`. Strings lose their zero padding.
    /// Returns None if `data` is too short for the type.
    pub fn decode(data: &[u8], col_type: ColType) -> Option<Self> {
        if let Some(fixed) = col_type.fixed_len() {
            if data.len() < fixed {
                return None;
            }
        }
        let mut buf = data;
        let value = match col_type {
            ColType::Int => Value::Int(buf.get_i32_le()),
            ColType::BigInt => Value::BigInt(buf.get_i64_le()),
            ColType::Float => Value::Float(buf.get_f64_le()),
            ColType::String => {
                let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
                Value::String(String::from_utf8_lossy(&data[..end]).into_owned())
            }
        };
        Some(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::BigInt(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{:.6}", v),
            Value::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}
