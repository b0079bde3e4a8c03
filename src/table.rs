//! The public face of the engine: one schema, its rows, and every mutation with its recompute.
use crate::analysis::DependencyGraph;
use crate::compute::{DirtySet, Engine};
use crate::config::EngineConfig;
use crate::display::trace;
use crate::error::{SchemaError, TableError, ValidationError};
use crate::store::query::{Page, RowQuery};
use crate::store::rows::{validate_raw, RowStore};
use crate::store::types::{CellUpdate, CellValue, Column, ColumnId, ColumnInfo, Row, RowId, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// One raw cell edit in a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellEdit {
    pub row: RowId,
    pub column: String,
    #[serde(default)]
    pub value: Option<Value>,
}

impl CellEdit {
    pub fn new(row: RowId, column: impl Into<String>, value: impl Into<Option<Value>>) -> Self {
        Self { row, column: column.into(), value: value.into() }
    }
}

/// A table whose computed columns are kept consistent with its raw cells.
///
/// Every mutation validates first and either applies completely, followed by the minimal
/// recompute, or fails without touching any state. The schema is immutable and shared,
/// so cloning a table is cheap on the schema side.
#[derive(Debug, Clone)]
pub struct Table {
    graph: Arc<DependencyGraph>,
    store: RowStore,
    config: EngineConfig,
}

impl Table {
    pub fn new(columns: Vec<Column>) -> Result<Self, SchemaError> {
        Self::with_config(columns, EngineConfig::default())
    }

    pub fn with_config(columns: Vec<Column>, config: EngineConfig) -> Result<Self, SchemaError> {
        let graph = DependencyGraph::build(columns)?;
        let store = RowStore::new(&graph);
        Ok(Self { graph: Arc::new(graph), store, config })
    }

    pub fn graph(&self) -> &DependencyGraph { &self.graph }
    pub fn config(&self) -> &EngineConfig { &self.config }
    pub fn len(&self) -> usize { self.store.len() }
    pub fn is_empty(&self) -> bool { self.store.is_empty() }

    pub fn columns(&self) -> Vec<ColumnInfo> {
        self.graph.registry().columns.iter().map(Column::info).collect()
    }

    pub fn row(&self, id: RowId) -> Option<Row> { self.store.row(&self.graph, id) }

    pub fn get(&self, id: RowId, key: &str) -> Option<&CellValue> {
        self.store.get(id, self.graph.lookup(key)?)
    }

    /// Row ids in insertion order.
    pub fn row_ids(&self) -> impl Iterator<Item = RowId> + '_ { self.store.ids() }

    /// Adds a row from raw values. Missing raw columns start blank.
    pub fn insert_row<I, K, V>(&mut self, values: I) -> Result<RowId, TableError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Option<Value>>,
    {
        let raw = self.validate_new_row(values)?;
        let (id, dirty) = self.store.insert(&self.graph, raw);
        let updates = self.propagate(dirty);
        debug!(row = %id, updates = updates.len(), "row inserted");
        Ok(id)
    }

    /// Adds several rows with a single recompute. Nothing is inserted if any row is invalid.
    pub fn insert_rows<R, I, K, V>(&mut self, rows: R) -> Result<Vec<RowId>, TableError>
    where
        R: IntoIterator<Item = I>,
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Option<Value>>,
    {
        let validated = rows.into_iter().map(|values| self.validate_new_row(values)).collect::<Result<Vec<_>, _>>()?;

        let mut ids = Vec::with_capacity(validated.len());
        let mut dirty = DirtySet::new();
        for raw in validated {
            let (id, row_dirty) = self.store.insert(&self.graph, raw);
            dirty.merge(row_dirty);
            ids.push(id);
        }
        let updates = self.propagate(dirty);
        debug!(rows = ids.len(), updates = updates.len(), "rows inserted");
        Ok(ids)
    }

    /// Removes a row and re-derives the aggregates of every group it belonged to.
    pub fn delete_row(&mut self, id: RowId) -> Result<Vec<CellUpdate>, TableError> {
        let dirty = self.store.delete(&self.graph, id)?;
        Ok(self.propagate(dirty))
    }

    /// Removes several rows with a single recompute. Fails without deleting anything if any id is unknown.
    pub fn delete_rows(&mut self, ids: &[RowId]) -> Result<Vec<CellUpdate>, TableError> {
        if let Some(&missing) = ids.iter().find(|&&id| !self.store.contains(id)) {
            return Err(TableError::NotFound(missing));
        }
        let mut dirty = DirtySet::new();
        for id in ids.iter().copied().collect::<BTreeSet<_>>() {
            dirty.merge(self.store.delete(&self.graph, id)?);
        }
        Ok(self.propagate(dirty))
    }

    /// Writes one raw cell. The first update returned is the edited cell itself;
    /// writing the value a cell already holds returns no updates.
    pub fn set_cell(
        &mut self,
        id: RowId,
        key: &str,
        value: impl Into<Option<Value>>,
    ) -> Result<Vec<CellUpdate>, TableError> {
        self.apply_edits(vec![CellEdit::new(id, key, value)])
    }

    /// Blanks one raw cell.
    pub fn clear_cell(&mut self, id: RowId, key: &str) -> Result<Vec<CellUpdate>, TableError> {
        self.set_cell(id, key, None::<Value>)
    }

    /// Applies several raw edits with a single recompute. Every edit is validated before any is applied.
    pub fn apply_edits(&mut self, edits: Vec<CellEdit>) -> Result<Vec<CellUpdate>, TableError> {
        let mut validated: Vec<(RowId, ColumnId, CellValue)> = Vec::with_capacity(edits.len());
        for edit in &edits {
            let (column, cell) = validate_raw(&self.graph, &edit.column, edit.value.clone(), false)?;
            if !self.store.contains(edit.row) {
                return Err(TableError::NotFound(edit.row));
            }
            validated.push((edit.row, column, cell));
        }

        let mut updates = Vec::new();
        let mut dirty = DirtySet::new();
        for (row, column, cell) in validated {
            if self.store.get(row, column).is_some_and(|current| current.same(&cell)) {
                continue;
            }
            dirty.merge(self.store.apply_raw(&self.graph, row, column, cell.clone()));
            updates.push(CellUpdate { row, column: self.graph.registry().key(column).to_string(), value: cell });
        }
        updates.extend(self.propagate(dirty));
        debug!(edits = edits.len(), updates = updates.len(), "cells edited");
        Ok(updates)
    }

    /// Copies every row, in insertion order.
    pub fn snapshot(&self) -> Vec<Row> {
        self.store.ids().filter_map(|id| self.store.row(&self.graph, id)).collect()
    }

    /// Replaces all rows with `rows`, keeping their ids, and re-derives every computed cell.
    ///
    /// Computed values in the input are ignored. Ids already handed out by this table are
    /// never issued again. On any error the current rows are kept.
    pub fn load_snapshot(&mut self, rows: Vec<Row>) -> Result<(), TableError> {
        let mut seen = BTreeSet::new();
        let mut validated = Vec::with_capacity(rows.len());
        for row in rows {
            if row.id > RowId::MAX {
                return Err(ValidationError::RowIdOutOfRange(row.id).into());
            }
            if !seen.insert(row.id) {
                return Err(ValidationError::DuplicateRow(row.id).into());
            }
            let mut raw = Vec::new();
            for (key, cell) in row.cells {
                let id = self.graph.lookup(&key).ok_or_else(|| ValidationError::UnknownColumn(key.clone()))?;
                if self.graph.column(id).is_computed() {
                    continue;
                }
                let value = match cell {
                    CellValue::Value(v) => Some(v),
                    _ => None,
                };
                raw.push(validate_raw(&self.graph, &key, value, true)?);
            }
            validated.push((row.id, raw));
        }

        let mut store = RowStore::new(&self.graph);
        store.retire_ids_of(&self.store);
        for (id, raw) in validated {
            store.insert_with_id(&self.graph, id, raw);
        }
        Engine::new(&self.graph, &self.config).recompute_all(&mut store);
        debug!(rows = store.len(), "snapshot loaded");
        self.store = store;
        Ok(())
    }

    pub fn query(&self, query: &RowQuery) -> Result<Page, TableError> {
        Ok(query.run(&self.graph, &self.store, self.config.default_page_size)?)
    }

    /// Explains how one cell got its value, down to the raw inputs.
    pub fn trace(&self, id: RowId, key: &str) -> Result<String, TableError> {
        let column = self.graph.lookup(key).ok_or_else(|| ValidationError::UnknownColumn(key.to_string()))?;
        if !self.store.contains(id) {
            return Err(TableError::NotFound(id));
        }
        Ok(trace::format_trace(&self.graph, &self.store, id, column))
    }

    /// Re-derives every computed cell. Returns the cells that changed, which is none
    /// unless the table was inconsistent.
    pub fn recompute(&mut self) -> Vec<CellUpdate> {
        Engine::new(&self.graph, &self.config).recompute_all(&mut self.store)
    }

    fn propagate(&mut self, dirty: DirtySet) -> Vec<CellUpdate> {
        Engine::new(&self.graph, &self.config).recompute(&mut self.store, dirty)
    }

    fn validate_new_row<I, K, V>(&self, values: I) -> Result<Vec<(ColumnId, CellValue)>, TableError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Option<Value>>,
    {
        values
            .into_iter()
            .map(|(key, value)| validate_raw(&self.graph, key.as_ref(), value.into(), true).map_err(TableError::from))
            .collect()
    }
}
