//! Column definitions, row storage and read-side queries.
pub mod query;
pub mod registry;
pub mod rows;
pub mod types;

// Re-export key types for convenient access
pub use query::{Filter, Page, RowQuery, SortKey, SortOrder};
pub use registry::ColumnRegistry;
pub use rows::{GroupKey, RowStore};
pub use types::{
    CellUpdate, CellValue, Column, ColumnId, ColumnInfo, Derivation, Operation, Reducer, Row, RowExpr, RowFn, RowId,
    RowInputs, Value, ValueKind,
};
