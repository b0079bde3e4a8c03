use crate::analysis::DependencyGraph;
use crate::store::rows::{GroupKey, RowStore};
use crate::store::types::{CellValue, ColumnId, Derivation, RowExpr, RowId};
use std::collections::HashMap;
use std::fmt::Write;

type CellRef = (RowId, ColumnId);

/// Renders the derivation tree of one cell as an indented audit trace.
///
/// Each line shows a cell's label, row and current value. A cell reached twice is printed
/// once and then referenced by the level it first appeared at.
pub fn format_trace(graph: &DependencyGraph, store: &RowStore, row: RowId, column: ColumnId) -> String {
    let mut tracer = Tracer { graph, store, visited_at_level: HashMap::new(), output: String::new() };

    if store.contains(row) && column.index() < graph.registry().count() {
        let key = graph.registry().key(column);
        let _ = writeln!(tracer.output, "AUDIT TRACE for cell '{}' of row {}:", key, row);
        let _ = writeln!(tracer.output, "--------------------------------------------------");
        tracer.trace_cell((row, column), 1, "");
    } else {
        let _ = writeln!(tracer.output, "Error: no cell {:?} in row {}", column, row);
    }
    tracer.output
}

struct Tracer<'a> {
    graph: &'a DependencyGraph,
    store: &'a RowStore,
    visited_at_level: HashMap<CellRef, usize>,
    output: String,
}

impl<'a> Tracer<'a> {
    fn trace_cell(&mut self, cell: CellRef, level: usize, prefix: &str) {
        if let Some(&first_seen) = self.visited_at_level.get(&cell) {
            let _ = writeln!(self.output, "{}-> (Ref to L{})", prefix, first_seen);
            return;
        }
        self.visited_at_level.insert(cell, level);

        let (row, column_id) = cell;
        let graph = self.graph;
        let column = graph.column(column_id);
        let line_header = format!("[L{}] {} @{}{}", level, column.label, row, self.format_value(cell));

        match &column.derivation {
            None => {
                let _ = writeln!(self.output, "{}{} -> Input", prefix, line_header);
            }
            Some(Derivation::Row { inputs, expr }) => {
                let refs: Vec<String> = inputs.iter().map(|k| self.format_input_ref(row, k)).collect();
                let formula = match expr {
                    RowExpr::Op(op) => refs.join(&format!(" {} ", op.symbol())),
                    RowExpr::Function(_) => format!("fn({})", refs.join(", ")),
                };
                let _ = writeln!(self.output, "{}{} = {}", prefix, line_header, formula);

                let children: Vec<CellRef> =
                    inputs.iter().filter_map(|k| graph.lookup(k)).map(|c| (row, c)).collect();
                self.recurse_children(prefix, &children, level);
            }
            Some(Derivation::Aggregate { group_by, source, reducer }) => {
                let (Some(group_column), Some(source_column)) = (graph.lookup(group_by), graph.lookup(source)) else {
                    let _ = writeln!(self.output, "{}{} = {}(?)", prefix, line_header, reducer);
                    return;
                };
                let key = self.store.group_key(row, group_column).unwrap_or(GroupKey::Empty);
                let members: Vec<CellRef> = self
                    .store
                    .members(group_column, &key)
                    .map(|m| m.iter().map(|&r| (r, source_column)).collect())
                    .unwrap_or_default();
                let _ = writeln!(
                    self.output,
                    "{}{} = {}({}) over {} rows where {} = {}",
                    prefix,
                    line_header,
                    reducer,
                    graph.column(source_column).label,
                    members.len(),
                    graph.column(group_column).label,
                    key
                );
                self.recurse_children(prefix, &members, level);
            }
        }
    }

    fn recurse_children(&mut self, prefix: &str, children: &[CellRef], level: usize) {
        let stem = self.build_child_stem(prefix);
        for (i, &child) in children.iter().enumerate() {
            let connector = if i == children.len() - 1 { "`--" } else { "|--" };
            let full_prefix = format!("{}{}", stem, connector);
            self.trace_cell(child, level + 1, &full_prefix);
        }
    }

    fn format_input_ref(&self, row: RowId, key: &str) -> String {
        match self.graph.lookup(key) {
            Some(id) => format!("{}{}", self.graph.column(id).label, self.format_value((row, id))),
            None => format!("{}[?]", key),
        }
    }

    fn format_value(&self, (row, column): CellRef) -> String {
        match self.store.get(row, column) {
            Some(CellValue::Value(v)) => format!(" [{}]", v),
            Some(CellValue::Empty) => " [ ]".to_string(),
            Some(CellValue::Error(e)) => format!(" [Err: {}]", e),
            Some(CellValue::Pending) | None => " [?]".to_string(),
        }
    }

    fn build_child_stem(&self, current_prefix: &str) -> String {
        current_prefix.replace("`--", "   ").replace("|--", "|  ")
    }
}
