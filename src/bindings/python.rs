use crate::config::EngineConfig;
use crate::error::ValidationError;
use crate::store::query::RowQuery;
use crate::store::types::{Column, Derivation, Operation, Reducer, Row, RowId, Value, ValueKind};
use crate::table::Table;
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

fn value_error(e: impl std::fmt::Display) -> PyErr {
    PyValueError::new_err(e.to_string())
}

fn parse_kind(kind: &str) -> PyResult<ValueKind> {
    serde_json::from_value(serde_json::Value::String(kind.to_string()))
        .map_err(|_| PyValueError::new_err(format!("Invalid kind '{}'", kind)))
}

#[pyclass(name = "_TableSchema")]
#[derive(Debug, Clone, Default)]
pub struct PyTableSchema {
    columns: Vec<Column>,
}

#[pymethods]
impl PyTableSchema {
    #[new]
    pub fn new() -> Self { Self::default() }

    #[pyo3(signature = (key, label, kind, editable = true))]
    pub fn add_raw_column(&mut self, key: String, label: String, kind: &str, editable: bool) -> PyResult<()> {
        let column = Column::raw(key, label, parse_kind(kind)?);
        self.columns.push(if editable { column } else { column.read_only() });
        Ok(())
    }

    pub fn add_row_formula(&mut self, key: String, label: String, kind: &str, op_name: &str, inputs: Vec<String>) -> PyResult<()> {
        let op = match op_name {
            "add" => Operation::Add, "subtract" => Operation::Subtract,
            "multiply" => Operation::Multiply, "divide" => Operation::Divide,
            "concat" => Operation::Concat,
            _ => return Err(PyValueError::new_err("Invalid Op")),
        };
        self.columns.push(Column::computed(key, label, parse_kind(kind)?, Derivation::row(inputs, op)));
        Ok(())
    }

    pub fn add_aggregate(
        &mut self,
        key: String,
        label: String,
        kind: &str,
        reducer_name: &str,
        group_by: String,
        source: String,
    ) -> PyResult<()> {
        let reducer = match reducer_name {
            "sum" => Reducer::Sum, "average" => Reducer::Average, "count" => Reducer::Count,
            "min" => Reducer::Min, "max" => Reducer::Max,
            _ => return Err(PyValueError::new_err("Invalid Reducer")),
        };
        self.columns.push(Column::computed(key, label, parse_kind(kind)?, Derivation::aggregate(group_by, source, reducer)));
        Ok(())
    }

    #[pyo3(signature = (config_json = None))]
    pub fn build(&self, config_json: Option<&str>) -> PyResult<PyTable> {
        let config = match config_json {
            Some(text) => EngineConfig::from_json(text).map_err(value_error)?,
            None => EngineConfig::default(),
        };
        let inner = Table::with_config(self.columns.clone(), config).map_err(value_error)?;
        Ok(PyTable { inner })
    }

    pub fn column_count(&self) -> usize { self.columns.len() }
}

#[pyclass(name = "_Table")]
#[derive(Debug, Clone)]
pub struct PyTable {
    inner: Table,
}

impl PyTable {
    /// Reads a JSON object of plain scalars into typed raw values.
    fn parse_values(&self, json: &str) -> PyResult<Vec<(String, Option<Value>)>> {
        let object: serde_json::Map<String, serde_json::Value> = serde_json::from_str(json).map_err(value_error)?;
        object
            .into_iter()
            .map(|(key, raw)| {
                let id = self.inner.graph().lookup(&key).ok_or_else(|| ValidationError::UnknownColumn(key.clone()));
                let value = id.and_then(|id| self.inner.graph().column(id).kind.parse_json(&key, &raw));
                value.map(|v| (key, v)).map_err(value_error)
            })
            .collect()
    }
}

#[pymethods]
impl PyTable {
    pub fn insert_row(&mut self, values_json: &str) -> PyResult<u64> {
        let values = self.parse_values(values_json)?;
        self.inner.insert_row(values).map(|id| id.0).map_err(value_error)
    }

    pub fn insert_rows(&mut self, rows_json: &str) -> PyResult<Vec<u64>> {
        let rows: Vec<serde_json::Value> = serde_json::from_str(rows_json).map_err(value_error)?;
        let parsed = rows.iter().map(|r| self.parse_values(&r.to_string())).collect::<PyResult<Vec<_>>>()?;
        let ids = self.inner.insert_rows(parsed).map_err(value_error)?;
        Ok(ids.into_iter().map(|id| id.0).collect())
    }

    /// Returns the changed cells as JSON.
    pub fn set_cell(&mut self, row: u64, key: &str, value_json: &str) -> PyResult<String> {
        let raw: serde_json::Value = serde_json::from_str(value_json).map_err(value_error)?;
        let column = self.inner.graph().lookup(key).ok_or_else(|| value_error(ValidationError::UnknownColumn(key.to_string())))?;
        let value = self.inner.graph().column(column).kind.parse_json(key, &raw).map_err(value_error)?;
        let updates = self.inner.set_cell(RowId(row), key, value).map_err(value_error)?;
        serde_json::to_string(&updates).map_err(value_error)
    }

    pub fn delete_row(&mut self, row: u64) -> PyResult<String> {
        let updates = self.inner.delete_row(RowId(row)).map_err(value_error)?;
        serde_json::to_string(&updates).map_err(value_error)
    }

    pub fn snapshot_json(&self) -> PyResult<String> {
        serde_json::to_string(&self.inner.snapshot()).map_err(value_error)
    }

    pub fn load_snapshot_json(&mut self, json: &str) -> PyResult<()> {
        let rows: Vec<Row> = serde_json::from_str(json).map_err(value_error)?;
        self.inner.load_snapshot(rows).map_err(value_error)
    }

    pub fn query(&self, query_json: &str) -> PyResult<String> {
        let query: RowQuery = serde_json::from_str(query_json).map_err(value_error)?;
        let page = self.inner.query(&query).map_err(value_error)?;
        serde_json::to_string(&page).map_err(value_error)
    }

    pub fn trace(&self, row: u64, key: &str) -> PyResult<String> {
        self.inner.trace(RowId(row), key).map_err(value_error)
    }

    pub fn columns_json(&self) -> PyResult<String> {
        serde_json::to_string(&self.inner.columns()).map_err(value_error)
    }

    pub fn recompute(&mut self) -> usize { self.inner.recompute().len() }

    pub fn __len__(&self) -> usize { self.inner.len() }
}
