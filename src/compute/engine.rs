//! A synchronous, single-writer recompute engine.
use super::dirty::DirtySet;
use super::kernel;
use crate::analysis::DependencyGraph;
use crate::config::EngineConfig;
use crate::error::DerivationError;
use crate::store::rows::RowStore;
use crate::store::types::{CellUpdate, CellValue, Column, ColumnId, Derivation, Reducer, RowExpr, RowId};
use rayon::prelude::*;
use tracing::{debug_span, trace};

pub struct Engine<'a> {
    graph: &'a DependencyGraph,
    config: &'a EngineConfig,
}

impl<'a> Engine<'a> {
    pub fn new(graph: &'a DependencyGraph, config: &'a EngineConfig) -> Self {
        Self { graph, config }
    }

    /// Re-derives everything a mutation invalidated and returns the cells whose value changed.
    ///
    /// Columns are visited in the fixed topological order, restricted to the downstream
    /// closure of the dirty set. Propagation is change-driven: a dependent cell is only
    /// re-derived when one of its inputs actually changed in this pass.
    pub fn recompute(&self, store: &mut RowStore, mut dirty: DirtySet) -> Vec<CellUpdate> {
        let scope = self.graph.scope(dirty.seed_columns());
        let _span = debug_span!("recompute", columns = scope.len(), entries = dirty.len()).entered();
        let mut updates = Vec::new();

        for column_id in scope {
            let column = self.graph.column(column_id);
            match &column.derivation {
                Some(Derivation::Row { inputs, expr }) => {
                    let rows = dirty.take_rows(column_id);
                    if rows.is_empty() {
                        continue;
                    }
                    trace!(column = %column.key, rows = rows.len(), "row expression");
                    for (row, value) in self.evaluate_rows(store, column, inputs, expr, rows) {
                        self.write(store, &mut dirty, &mut updates, row, column_id, value);
                    }
                }
                Some(Derivation::Aggregate { group_by, source, reducer }) => {
                    let keys = dirty.take_groups(column_id);
                    let (Some(group_column), Some(source_column)) = (self.graph.lookup(group_by), self.graph.lookup(source))
                    else {
                        continue;
                    };
                    for key in keys {
                        let members: Vec<RowId> =
                            store.members(group_column, &key).map(|m| m.iter().copied().collect()).unwrap_or_default();
                        trace!(column = %column.key, group = %key, members = members.len(), "aggregate");
                        let value = reduce_group(store, column, source, source_column, *reducer, &members);
                        for row in members {
                            self.write(store, &mut dirty, &mut updates, row, column_id, value.clone());
                        }
                    }
                }
                None => {}
            }
        }

        updates
    }

    /// Re-derives every computed cell. On a consistent table this changes nothing.
    pub fn recompute_all(&self, store: &mut RowStore) -> Vec<CellUpdate> {
        let dirty = DirtySet::everything(self.graph, store);
        self.recompute(store, dirty)
    }

    /// Evaluates one row-expression column for a set of rows. Reads only; large sets fan out on rayon.
    fn evaluate_rows(
        &self,
        store: &RowStore,
        column: &Column,
        inputs: &[String],
        expr: &RowExpr,
        rows: impl IntoIterator<Item = RowId>,
    ) -> Vec<(RowId, CellValue)> {
        let input_ids: Vec<Option<ColumnId>> = inputs.iter().map(|k| self.graph.lookup(k)).collect();
        let rows: Vec<RowId> = rows.into_iter().filter(|&r| store.contains(r)).collect();

        let evaluate = |row: RowId| -> (RowId, CellValue) {
            let cells: Vec<&CellValue> = input_ids
                .iter()
                .map(|id| id.and_then(|c| store.get(row, c)).unwrap_or(&CellValue::Empty))
                .collect();
            (row, kernel::evaluate_row(column, inputs, expr, &cells))
        };

        if rows.len() >= self.config.parallel_threshold {
            rows.par_iter().map(|&row| evaluate(row)).collect()
        } else {
            rows.into_iter().map(evaluate).collect()
        }
    }

    fn write(
        &self,
        store: &mut RowStore,
        dirty: &mut DirtySet,
        updates: &mut Vec<CellUpdate>,
        row: RowId,
        column: ColumnId,
        value: CellValue,
    ) {
        if store.write(row, column, value.clone()) {
            dirty.mark_children(self.graph, store, row, column);
            updates.push(CellUpdate { row, column: self.graph.registry().key(column).to_string(), value });
        }
    }
}

/// Reduces `source` over a group's current members.
///
/// Blank sources are skipped; any errored source turns the whole group's result into an error.
fn reduce_group(
    store: &RowStore,
    column: &Column,
    source: &str,
    source_column: ColumnId,
    reducer: Reducer,
    members: &[RowId],
) -> CellValue {
    let mut values = Vec::with_capacity(members.len());
    for &row in members {
        match store.get(row, source_column) {
            Some(CellValue::Value(v)) => values.push(v.clone()),
            Some(CellValue::Error(_)) => return CellValue::Error(DerivationError::Upstream(source.to_string())),
            Some(CellValue::Pending) => return CellValue::Pending,
            Some(CellValue::Empty) | None => {}
        }
    }
    kernel::fit(column, reducer.reduce(&values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::rows::validate_raw;
    use crate::store::types::{Operation, Value, ValueKind};

    fn sample_graph() -> DependencyGraph {
        DependencyGraph::build(vec![
            Column::raw("a", "A", ValueKind::Number),
            Column::raw("b", "B", ValueKind::Number),
            Column::raw("c", "C", ValueKind::Text),
            Column::computed("d", "D (A+B)", ValueKind::Number, Derivation::row(["a", "b"], Operation::Add)),
            Column::computed("e", "E (Sum of D in group)", ValueKind::Number, Derivation::aggregate("c", "d", Reducer::Sum)),
            Column::computed("ratio", "A / B", ValueKind::Number, Derivation::row(["a", "b"], Operation::Divide)),
            Column::computed("label", "Label", ValueKind::Text, Derivation::row(["c"], Operation::Concat)),
        ])
        .unwrap()
    }

    fn insert(graph: &DependencyGraph, store: &mut RowStore, a: f64, b: f64, c: &str) -> (RowId, DirtySet) {
        let raw = vec![
            validate_raw(graph, "a", Some(Value::Number(a)), true).unwrap(),
            validate_raw(graph, "b", Some(Value::Number(b)), true).unwrap(),
            validate_raw(graph, "c", Some(Value::from(c)), true).unwrap(),
        ];
        store.insert(graph, raw)
    }

    fn num(graph: &DependencyGraph, store: &RowStore, row: RowId, key: &str) -> Option<f64> {
        store.get(row, graph.lookup(key).unwrap()).and_then(CellValue::as_f64)
    }

    #[test]
    fn test_edit_touches_only_dependent_columns() {
        let graph = sample_graph();
        let config = EngineConfig::default();
        let engine = Engine::new(&graph, &config);
        let mut store = RowStore::new(&graph);
        let (r1, dirty) = insert(&graph, &mut store, 1.5, 2.5, "G1");
        engine.recompute(&mut store, dirty);

        let dirty = store.set_raw(&graph, r1, "a", Some(Value::Number(3.5))).unwrap();
        let mut touched: Vec<String> = engine.recompute(&mut store, dirty).into_iter().map(|u| u.column).collect();
        touched.sort();
        assert_eq!(touched, vec!["d", "e", "ratio"]);
        assert_eq!(num(&graph, &store, r1, "e"), Some(6.0));
    }

    #[test]
    fn test_division_error_is_local_to_cell() {
        let graph = sample_graph();
        let config = EngineConfig::default();
        let engine = Engine::new(&graph, &config);
        let mut store = RowStore::new(&graph);
        let (r1, dirty) = insert(&graph, &mut store, 1.0, 0.0, "G1");
        engine.recompute(&mut store, dirty);

        let ratio = store.get(r1, graph.lookup("ratio").unwrap()).unwrap();
        assert_eq!(ratio, &CellValue::Error(DerivationError::DivisionByZero));
        assert_eq!(num(&graph, &store, r1, "d"), Some(1.0));
    }

    #[test]
    fn test_parallel_path_matches_sequential() {
        let graph = sample_graph();
        let sequential = EngineConfig::default();
        let parallel = EngineConfig { parallel_threshold: 1, ..EngineConfig::default() };

        let mut a = RowStore::new(&graph);
        let mut b = RowStore::new(&graph);
        for i in 0..50 {
            let group = if i % 3 == 0 { "G1" } else { "G2" };
            insert(&graph, &mut a, i as f64, 1.0, group);
            insert(&graph, &mut b, i as f64, 1.0, group);
        }
        Engine::new(&graph, &sequential).recompute_all(&mut a);
        Engine::new(&graph, &parallel).recompute_all(&mut b);

        for id in a.ids() {
            assert_eq!(a.cells(id), b.cells(id));
        }
    }

    #[test]
    fn test_recompute_all_is_idempotent() {
        let graph = sample_graph();
        let config = EngineConfig::default();
        let engine = Engine::new(&graph, &config);
        let mut store = RowStore::new(&graph);
        insert(&graph, &mut store, 1.0, 2.0, "G1");
        insert(&graph, &mut store, 3.0, 4.0, "G1");

        assert!(!engine.recompute_all(&mut store).is_empty());
        assert!(engine.recompute_all(&mut store).is_empty());
    }
}
