//! The set of computed cells and groups a mutation invalidated.
use crate::analysis::DependencyGraph;
use crate::store::rows::{GroupKey, RowStore};
use crate::store::types::{ColumnId, Derivation, RowId};
use std::collections::{BTreeMap, BTreeSet};

/// Pending re-derivations, keyed by computed column.
///
/// Row-expression columns track rows; aggregate columns track group keys, since one
/// reduction serves every member of the group.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DirtySet {
    cells: BTreeMap<ColumnId, BTreeSet<RowId>>,
    groups: BTreeMap<ColumnId, BTreeSet<GroupKey>>,
    edited: BTreeSet<ColumnId>,
}

impl DirtySet {
    pub fn new() -> Self { Self::default() }

    /// Every computed cell of every row, and every group of every aggregate.
    pub fn everything(graph: &DependencyGraph, store: &RowStore) -> Self {
        let mut dirty = Self::new();
        for &column in graph.order() {
            match &graph.column(column).derivation {
                Some(Derivation::Aggregate { group_by, .. }) => {
                    if let Some(group_column) = graph.lookup(group_by) {
                        let keys = store.group_keys(group_column).cloned().collect();
                        dirty.groups.insert(column, keys);
                    }
                }
                _ => {
                    dirty.cells.insert(column, store.ids().collect());
                }
            }
        }
        dirty
    }

    pub fn is_empty(&self) -> bool {
        self.cells.values().all(BTreeSet::is_empty) && self.groups.values().all(BTreeSet::is_empty)
    }

    /// Number of pending entries (rows plus groups).
    pub fn len(&self) -> usize {
        self.cells.values().map(BTreeSet::len).sum::<usize>() + self.groups.values().map(BTreeSet::len).sum::<usize>()
    }

    pub fn mark_cell(&mut self, column: ColumnId, row: RowId) {
        self.cells.entry(column).or_default().insert(row);
    }

    pub fn mark_group(&mut self, column: ColumnId, key: GroupKey) {
        self.groups.entry(column).or_default().insert(key);
    }

    pub(crate) fn mark_edit(&mut self, column: ColumnId) {
        self.edited.insert(column);
    }

    pub fn has_cell(&self, column: ColumnId, row: RowId) -> bool {
        self.cells.get(&column).is_some_and(|rows| rows.contains(&row))
    }

    pub fn has_group(&self, column: ColumnId, key: &GroupKey) -> bool {
        self.groups.get(&column).is_some_and(|keys| keys.contains(key))
    }

    /// Marks every computed cell of a freshly stored row.
    pub fn mark_row(&mut self, graph: &DependencyGraph, store: &RowStore, row: RowId) {
        for &column in graph.order() {
            self.mark_target(graph, store, row, column);
        }
    }

    /// Marks the direct dependents of `column` in `row` after its value changed.
    pub fn mark_children(&mut self, graph: &DependencyGraph, store: &RowStore, row: RowId, column: ColumnId) {
        for child in graph.registry().children(column) {
            match &graph.column(child).derivation {
                Some(Derivation::Aggregate { source, .. }) if source != graph.registry().key(column) => {
                    // Group-key edits are handled by the row store, which knows the previous key.
                }
                _ => self.mark_target(graph, store, row, child),
            }
        }
    }

    fn mark_target(&mut self, graph: &DependencyGraph, store: &RowStore, row: RowId, column: ColumnId) {
        match &graph.column(column).derivation {
            Some(Derivation::Row { .. }) => self.mark_cell(column, row),
            Some(Derivation::Aggregate { group_by, .. }) => {
                let key = graph
                    .lookup(group_by)
                    .and_then(|group_column| store.group_key(row, group_column))
                    .unwrap_or(GroupKey::Empty);
                self.mark_group(column, key);
            }
            None => {}
        }
    }

    pub fn merge(&mut self, other: DirtySet) {
        for (column, rows) in other.cells {
            self.cells.entry(column).or_default().extend(rows);
        }
        for (column, keys) in other.groups {
            self.groups.entry(column).or_default().extend(keys);
        }
        self.edited.extend(other.edited);
    }

    /// Columns the dirty entries start from: edited raw columns plus marked computed ones.
    pub fn seed_columns(&self) -> impl Iterator<Item = ColumnId> + '_ {
        self.edited.iter().chain(self.cells.keys()).chain(self.groups.keys()).copied()
    }

    pub(crate) fn take_rows(&mut self, column: ColumnId) -> BTreeSet<RowId> {
        self.cells.remove(&column).unwrap_or_default()
    }

    pub(crate) fn take_groups(&mut self, column: ColumnId) -> BTreeSet<GroupKey> {
        self.groups.remove(&column).unwrap_or_default()
    }
}
