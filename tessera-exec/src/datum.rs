use crate::error::{ExecError, Result};
use derive_more::Display;
use std::cmp::Ordering;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    #[display("bool")]
    Bool,
    #[display("int8")]
    Int8,
    #[display("float8")]
    Float8,
    #[display("text")]
    Text,
}

impl DataType {
    pub fn is_numeric(self) -> bool {
        matches!(self, DataType::Int8 | DataType::Float8)
    }
}

/// One SQL value. `Null` equals `Null` so null keys form one group.
#[derive(Debug, Display, Clone, PartialEq)]
pub enum Datum {
    #[display("NULL")]
    Null,
    Bool(bool),
    Int8(i64),
    Float8(f64),
    Text(String),
}

pub type Tuple = Vec<Datum>;

impl Datum {
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Datum::Null => None,
            Datum::Bool(_) => Some(DataType::Bool),
            Datum::Int8(_) => Some(DataType::Int8),
            Datum::Float8(_) => Some(DataType::Float8),
            Datum::Text(_) => Some(DataType::Text),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Datum::Int8(v) => Some(*v as f64),
            Datum::Float8(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric addition; an int8 meeting a float8 widens to float8.
    pub fn add(&self, other: &Datum) -> Result<Datum> {
        match (self, other) {
            (Datum::Int8(a), Datum::Int8(b)) => a
                .checked_add(*b)
                .map(Datum::Int8)
                .ok_or(ExecError::Overflow("sum")),
            (Datum::Float8(a), Datum::Float8(b)) => Ok(Datum::Float8(a + b)),
            (Datum::Int8(a), Datum::Float8(b)) | (Datum::Float8(b), Datum::Int8(a)) => {
                Ok(Datum::Float8(*a as f64 + b))
            }
            _ => Err(self.mismatch_with("+", other)),
        }
    }

    /// Orders two non-null values of compatible types.
    pub fn compare(&self, other: &Datum) -> Result<Ordering> {
        match (self, other) {
            (Datum::Bool(a), Datum::Bool(b)) => Ok(a.cmp(b)),
            (Datum::Int8(a), Datum::Int8(b)) => Ok(a.cmp(b)),
            (Datum::Text(a), Datum::Text(b)) => Ok(a.cmp(b)),
            (Datum::Float8(_) | Datum::Int8(_), Datum::Float8(_) | Datum::Int8(_)) => {
                match (self.as_f64(), other.as_f64()) {
                    (Some(a), Some(b)) => Ok(a.total_cmp(&b)),
                    _ => Err(self.mismatch_with("compare", other)),
                }
            }
            _ => Err(self.mismatch_with("compare", other)),
        }
    }

    fn mismatch_with(&self, op: &str, other: &Datum) -> ExecError {
        match (self.data_type(), other.data_type()) {
            (Some(left), Some(right)) => ExecError::mismatch_types(op, left, right),
            _ => ExecError::mismatch(op, "NULL"),
        }
    }
}

impl From<bool> for Datum {
    fn from(v: bool) -> Self {
        Datum::Bool(v)
    }
}

impl From<i64> for Datum {
    fn from(v: i64) -> Self {
        Datum::Int8(v)
    }
}

impl From<f64> for Datum {
    fn from(v: f64) -> Self {
        Datum::Float8(v)
    }
}

impl From<&str> for Datum {
    fn from(v: &str) -> Self {
        Datum::Text(v.to_string())
    }
}
