//! Error types for schema construction, mutations and per-cell derivation failures.
use crate::store::types::{RowId, ValueKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An invalid column set. Fatal to table construction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("duplicate column key '{0}'")]
    DuplicateKey(String),
    #[error("column '{column}' references unknown column '{reference}'")]
    UnknownReference { column: String, reference: String },
    #[error("column '{0}' cannot be both editable and computed")]
    EditableComputed(String),
    #[error("column '{column}': {message}")]
    InvalidDerivation { column: String, message: String },
    #[error("dependency cycle: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },
    #[error("schema has {} problems: {}", .0.len(), join_errors(.0))]
    Multiple(Vec<SchemaError>),
}

impl SchemaError {
    /// Every column named by this error.
    pub fn columns(&self) -> Vec<&str> {
        match self {
            SchemaError::DuplicateKey(c) | SchemaError::EditableComputed(c) => vec![c.as_str()],
            SchemaError::UnknownReference { column, .. } | SchemaError::InvalidDerivation { column, .. } => vec![column.as_str()],
            SchemaError::Cycle { path } => path.iter().map(String::as_str).collect(),
            SchemaError::Multiple(errors) => errors.iter().flat_map(SchemaError::columns).collect(),
        }
    }
}

fn join_errors(errors: &[SchemaError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

/// A rejected write. The table is left unchanged.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("unknown column '{0}'")]
    UnknownColumn(String),
    #[error("column '{0}' is computed and cannot be written")]
    Computed(String),
    #[error("column '{0}' is not editable")]
    NotEditable(String),
    #[error("column '{column}' expects {expected}, got {found}")]
    KindMismatch { column: String, expected: ValueKind, found: ValueKind },
    #[error("column '{column}' expects {expected}, cannot read {input}")]
    Unparsable { column: String, expected: ValueKind, input: String },
    #[error("column '{0}' cannot hold NaN")]
    NotANumber(String),
    #[error("row {0} appears more than once")]
    DuplicateRow(RowId),
    #[error("row id {0} is out of range")]
    RowIdOutOfRange(RowId),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TableError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("row {0} not found")]
    NotFound(RowId),
}

/// Why a computed cell holds an error instead of a value.
///
/// These never propagate as `Err` out of a mutation; they are stored in the cell
/// so the rest of the table keeps valid data.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "error", content = "detail", rename_all = "snake_case")]
pub enum DerivationError {
    #[error("division by zero")]
    DivisionByZero,
    #[error("input '{0}' is not numeric")]
    NotNumeric(String),
    #[error("result of kind {found} does not fit a {expected} column")]
    KindMismatch { expected: ValueKind, found: ValueKind },
    #[error("integer overflow")]
    Overflow,
    #[error("result is not a number")]
    NotANumber,
    #[error("cannot compare {0} with {1}")]
    Incomparable(ValueKind, ValueKind),
    #[error("input '{0}' is in an error state")]
    Upstream(String),
    #[error("{0}")]
    Custom(String),
}
