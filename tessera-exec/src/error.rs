use crate::datum::DataType;

pub type Result<T, E = ExecError> = core::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecError {
    #[error("column {index} is out of range for a schema of {len} columns")]
    ColumnOutOfRange { index: usize, len: usize },

    #[error("{op} is not defined for {found}")]
    TypeMismatch { op: String, found: String },

    #[error("column {0} is neither a grouping key nor aggregated")]
    NotGrouped(usize),

    #[error("tuple has {found} columns, schema has {expected}")]
    ArityMismatch { expected: usize, found: usize },

    #[error("integer overflow in {0}")]
    Overflow(&'static str),
}

impl ExecError {
    pub(crate) fn mismatch(op: impl Into<String>, found: impl Into<String>) -> Self {
        Self::TypeMismatch {
            op: op.into(),
            found: found.into(),
        }
    }

    pub(crate) fn mismatch_types(op: impl Into<String>, left: DataType, right: DataType) -> Self {
        Self::mismatch(op, format!("{left} and {right}"))
    }
}
