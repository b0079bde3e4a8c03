//! A table engine with derived columns.
//!
//! Raw columns hold edited values; computed columns are either row expressions over other
//! columns of the same row or group aggregates over every row sharing a key. Each mutation
//! re-derives only the computed cells it could have affected.

pub mod analysis;
#[cfg(feature = "python")]
pub mod bindings;
pub mod compute;
pub mod config;
pub mod display;
pub mod error;
pub mod store;
pub mod table;

pub use config::EngineConfig;
pub use error::{DerivationError, SchemaError, TableError, ValidationError};
pub use store::query::{Filter, Page, RowQuery, SortKey, SortOrder};
pub use store::types::{
    CellUpdate, CellValue, Column, ColumnInfo, Derivation, Operation, Reducer, Row, RowId, RowInputs, Value, ValueKind,
};
pub use table::{CellEdit, Table};

#[cfg(feature = "python")]
use pyo3::prelude::*;

/// This function defines the `tally._core` Python module.
#[cfg(feature = "python")]
#[pymodule]
fn _core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<bindings::python::PyTableSchema>()?;
    m.add_class::<bindings::python::PyTable>()?;
    m.add("__version__", env!("CARGO_PKG_VERSION"))?;
    Ok(())
}
