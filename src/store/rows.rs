//! rows.rs
//! Row storage keyed by stable ids, plus one group index per group-key column.

use super::types::{CellValue, ColumnId, Row, RowId, Value, DATE_FORMAT};
use crate::analysis::DependencyGraph;
use crate::compute::dirty::DirtySet;
use crate::error::{TableError, ValidationError};
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use tracing::debug;

/// Hashable projection of a group-key cell. Blank cells form their own group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GroupKey {
    Empty,
    Integer(i64),
    /// Bit pattern of the number, with `-0.0` folded into `0.0`.
    Number(u64),
    Text(String),
    Date(NaiveDate),
}

impl GroupKey {
    pub fn of(cell: &CellValue) -> GroupKey {
        match cell {
            CellValue::Value(Value::Integer(i)) => GroupKey::Integer(*i),
            CellValue::Value(Value::Number(n)) => GroupKey::Number(if *n == 0.0 { 0.0f64.to_bits() } else { n.to_bits() }),
            CellValue::Value(Value::Text(s)) => GroupKey::Text(s.clone()),
            CellValue::Value(Value::Date(d)) => GroupKey::Date(*d),
            _ => GroupKey::Empty,
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKey::Empty => f.write_str("<empty>"),
            GroupKey::Integer(i) => write!(f, "{}", i),
            GroupKey::Number(bits) => write!(f, "{}", f64::from_bits(*bits)),
            GroupKey::Text(s) => write!(f, "{:?}", s),
            GroupKey::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
        }
    }
}

type GroupIndex = HashMap<GroupKey, BTreeSet<RowId>>;

/// Checks a raw write against the schema and returns the cell to store.
///
/// Read-only raw columns accept values only while a row is being created.
pub fn validate_raw(
    graph: &DependencyGraph,
    key: &str,
    value: Option<Value>,
    creating: bool,
) -> Result<(ColumnId, CellValue), ValidationError> {
    let id = graph.lookup(key).ok_or_else(|| ValidationError::UnknownColumn(key.to_string()))?;
    let column = graph.column(id);
    if column.is_computed() {
        return Err(ValidationError::Computed(key.to_string()));
    }
    if !column.editable && !creating {
        return Err(ValidationError::NotEditable(key.to_string()));
    }
    let cell = match value {
        None => CellValue::Empty,
        Some(Value::Number(n)) if n.is_nan() => return Err(ValidationError::NotANumber(key.to_string())),
        Some(v) => column
            .kind
            .coerce(v)
            .map(CellValue::Value)
            .map_err(|found| ValidationError::KindMismatch { column: key.to_string(), expected: column.kind, found })?,
    };
    Ok((id, cell))
}

/// Exclusive owner of row contents.
///
/// Raw cells change through `insert`, `delete` and `set_raw`; computed cells change only
/// through `write`, which the recompute engine calls.
#[derive(Debug, Clone, Default)]
pub struct RowStore {
    next_id: u64,
    // Ids grow monotonically, so key order is insertion order.
    rows: BTreeMap<RowId, Vec<CellValue>>,
    groups: HashMap<ColumnId, GroupIndex>,
}

impl RowStore {
    pub fn new(graph: &DependencyGraph) -> Self {
        let groups = graph.group_columns().iter().map(|&c| (c, GroupIndex::new())).collect();
        Self { next_id: 1, rows: BTreeMap::new(), groups }
    }

    pub fn len(&self) -> usize { self.rows.len() }
    pub fn is_empty(&self) -> bool { self.rows.is_empty() }
    pub fn contains(&self, id: RowId) -> bool { self.rows.contains_key(&id) }
    pub fn ids(&self) -> impl Iterator<Item = RowId> + '_ { self.rows.keys().copied() }

    pub fn cells(&self, id: RowId) -> Option<&[CellValue]> { self.rows.get(&id).map(Vec::as_slice) }

    pub fn get(&self, id: RowId, column: ColumnId) -> Option<&CellValue> {
        self.rows.get(&id)?.get(column.index())
    }

    /// Materializes a row as a key to cell map.
    pub fn row(&self, graph: &DependencyGraph, id: RowId) -> Option<Row> {
        let stored = self.rows.get(&id)?;
        let registry = graph.registry();
        let cells = registry.ids().map(|c| (registry.key(c).to_string(), stored[c.index()].clone())).collect();
        Some(Row { id, cells })
    }

    pub fn iter(&self) -> impl Iterator<Item = (RowId, &[CellValue])> + '_ {
        self.rows.iter().map(|(&id, cells)| (id, cells.as_slice()))
    }

    /// Members of one group, in row order.
    pub fn members(&self, group_column: ColumnId, key: &GroupKey) -> Option<&BTreeSet<RowId>> {
        self.groups.get(&group_column)?.get(key)
    }

    pub fn group_keys(&self, group_column: ColumnId) -> impl Iterator<Item = &GroupKey> + '_ {
        self.groups.get(&group_column).into_iter().flat_map(|index| index.keys())
    }

    pub fn group_key(&self, id: RowId, group_column: ColumnId) -> Option<GroupKey> {
        self.get(id, group_column).map(GroupKey::of)
    }

    /// Stores a new row from validated raw cells. Computed cells start `Pending`.
    ///
    /// Returns the id and a dirty set covering every computed cell of the row.
    pub fn insert(&mut self, graph: &DependencyGraph, raw: Vec<(ColumnId, CellValue)>) -> (RowId, DirtySet) {
        let id = RowId(self.next_id);
        let dirty = self.insert_with_id(graph, id, raw);
        (id, dirty)
    }

    /// Carries the id counter over from a store this one replaces, so ids it handed out stay retired.
    pub(crate) fn retire_ids_of(&mut self, previous: &RowStore) {
        self.next_id = self.next_id.max(previous.next_id);
    }

    /// Stores a row under a caller-chosen id, as when restoring a snapshot.
    pub(crate) fn insert_with_id(&mut self, graph: &DependencyGraph, id: RowId, raw: Vec<(ColumnId, CellValue)>) -> DirtySet {
        let registry = graph.registry();
        let mut cells: Vec<CellValue> = registry
            .ids()
            .map(|c| if registry.column(c).is_computed() { CellValue::Pending } else { CellValue::Empty })
            .collect();
        for (column, cell) in raw {
            cells[column.index()] = cell;
        }

        for (&group_column, index) in self.groups.iter_mut() {
            let key = GroupKey::of(&cells[group_column.index()]);
            index.entry(key).or_default().insert(id);
        }

        self.rows.insert(id, cells);
        self.next_id = self.next_id.max(id.0.saturating_add(1));

        let mut dirty = DirtySet::new();
        dirty.mark_row(graph, self, id);
        dirty
    }

    /// Removes a row. Every group it belonged to becomes dirty for its aggregates.
    pub fn delete(&mut self, graph: &DependencyGraph, id: RowId) -> Result<DirtySet, TableError> {
        let cells = self.rows.remove(&id).ok_or(TableError::NotFound(id))?;
        let mut dirty = DirtySet::new();

        for (&group_column, index) in self.groups.iter_mut() {
            let key = GroupKey::of(&cells[group_column.index()]);
            if let Some(members) = index.get_mut(&key) {
                members.remove(&id);
                if members.is_empty() {
                    index.remove(&key);
                }
            }
            for &aggregate in graph.aggregates_grouped_by(group_column) {
                dirty.mark_group(aggregate, key.clone());
            }
        }

        debug!(row = %id, remaining = self.rows.len(), "row deleted");
        Ok(dirty)
    }

    /// Validates and records one raw edit, returning what became dirty.
    pub fn set_raw(
        &mut self,
        graph: &DependencyGraph,
        id: RowId,
        key: &str,
        value: Option<Value>,
    ) -> Result<DirtySet, TableError> {
        let (column, cell) = validate_raw(graph, key, value, false)?;
        if !self.contains(id) {
            return Err(TableError::NotFound(id));
        }
        Ok(self.apply_raw(graph, id, column, cell))
    }

    /// Records an already validated raw edit on an existing row.
    ///
    /// When the column keys a group, the row moves between buckets and both the old and
    /// the new group become dirty for every aggregate grouped by it.
    pub(crate) fn apply_raw(&mut self, graph: &DependencyGraph, id: RowId, column: ColumnId, cell: CellValue) -> DirtySet {
        let mut dirty = DirtySet::new();
        let Some(cells) = self.rows.get_mut(&id) else { return dirty };
        if cells[column.index()].same(&cell) {
            return dirty;
        }
        let previous = std::mem::replace(&mut cells[column.index()], cell);
        dirty.mark_edit(column);

        if let Some(index) = self.groups.get_mut(&column) {
            let old_key = GroupKey::of(&previous);
            let new_key = GroupKey::of(&cells[column.index()]);
            if let Some(members) = index.get_mut(&old_key) {
                members.remove(&id);
                if members.is_empty() {
                    index.remove(&old_key);
                }
            }
            index.entry(new_key.clone()).or_default().insert(id);

            for &aggregate in graph.aggregates_grouped_by(column) {
                dirty.mark_group(aggregate, old_key.clone());
                dirty.mark_group(aggregate, new_key.clone());
            }
        }

        dirty.mark_children(graph, self, id, column);
        dirty
    }

    /// Engine-side write of a computed cell. Returns whether the stored value changed.
    pub(crate) fn write(&mut self, id: RowId, column: ColumnId, value: CellValue) -> bool {
        match self.rows.get_mut(&id).and_then(|cells| cells.get_mut(column.index())) {
            Some(slot) if !slot.same(&value) => {
                *slot = value;
                true
            }
            _ => false,
        }
    }
}
