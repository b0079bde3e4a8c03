use super::schema::SchemaChecker;
use crate::error::SchemaError;
use crate::store::registry::ColumnRegistry;
use crate::store::types::{Column, ColumnId, Derivation};
use std::collections::{HashSet, VecDeque};
use tracing::debug;

/// Performs a Topological Sort using Depth-First Search (DFS).
///
/// Returns every column such that each dependency appears before its consumer.
/// A dependency cycle is reported with the columns along it, first column repeated at the end.
pub fn sort(registry: &ColumnRegistry) -> Result<Vec<ColumnId>, SchemaError> {
    let count = registry.count();
    let mut order = Vec::with_capacity(count);
    let mut state = vec![VisitState::None; count];

    // Edges point Child -> Parent here, so post-order yields [Parent, ..., Child].
    for id in registry.ids() {
        if state[id.index()] == VisitState::None {
            visit(id, registry, &mut state, &mut order)?;
        }
    }

    Ok(order)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum VisitState {
    None,
    Visiting, // Used for cycle detection
    Visited,
}

/// Post-order DFS from `root` on an explicit stack. Each frame holds a node and the
/// index of the next parent to follow, so the stack doubles as the current path.
fn visit(
    root: ColumnId,
    registry: &ColumnRegistry,
    state: &mut [VisitState],
    order: &mut Vec<ColumnId>,
) -> Result<(), SchemaError> {
    state[root.index()] = VisitState::Visiting;
    let mut stack: Vec<(ColumnId, usize)> = vec![(root, 0)];

    while let Some(frame) = stack.last_mut() {
        let (node, next) = *frame;
        let Some(&parent) = registry.get_parents(node).get(next) else {
            stack.pop();
            state[node.index()] = VisitState::Visited;
            order.push(node);
            continue;
        };
        frame.1 += 1;

        match state[parent.index()] {
            VisitState::Visited => {}
            VisitState::Visiting => {
                let start = stack.iter().position(|&(n, _)| n == parent).unwrap_or(0);
                let mut cycle: Vec<String> = stack[start..].iter().map(|&(n, _)| registry.key(n).to_string()).collect();
                cycle.push(registry.key(parent).to_string());
                return Err(SchemaError::Cycle { path: cycle });
            }
            VisitState::None => {
                state[parent.index()] = VisitState::Visiting;
                stack.push((parent, 0));
            }
        }
    }
    Ok(())
}

/// Identifies all columns downstream from the given start columns, start columns included.
pub fn downstream_from(registry: &ColumnRegistry, start_nodes: &[ColumnId]) -> HashSet<ColumnId> {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::from(start_nodes.to_vec());

    while let Some(node) = queue.pop_front() {
        if visited.insert(node) {
            queue.extend(registry.children(node));
        }
    }
    visited
}

/// Identifies all columns upstream from the given start columns, start columns included.
pub fn upstream_from(registry: &ColumnRegistry, start_nodes: &[ColumnId]) -> HashSet<ColumnId> {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::from(start_nodes.to_vec());

    while let Some(node) = queue.pop_front() {
        if visited.insert(node) {
            queue.extend(registry.get_parents(node).iter().copied());
        }
    }
    visited
}

/// The validated schema together with its fixed evaluation order.
///
/// Built once per table and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    registry: ColumnRegistry,
    /// Computed columns only, dependencies first.
    order: Vec<ColumnId>,
    /// Position of each computed column in `order`; `u32::MAX` for raw columns.
    rank: Vec<u32>,
    downstream: Vec<Vec<ColumnId>>,
    upstream: Vec<Vec<ColumnId>>,
    /// For each raw column, the aggregates that group by it.
    grouped_by: Vec<Vec<ColumnId>>,
    group_columns: Vec<ColumnId>,
}

impl DependencyGraph {
    pub fn build(columns: Vec<Column>) -> Result<Self, SchemaError> {
        let (registry, mut errors) = ColumnRegistry::build(columns);
        errors.extend(SchemaChecker::new(&registry).check());
        match errors.len() {
            0 => {}
            1 => return Err(errors.remove(0)),
            _ => return Err(SchemaError::Multiple(errors)),
        }

        let full_order = sort(&registry)?;
        let count = registry.count();

        let order: Vec<ColumnId> = full_order.into_iter().filter(|&id| registry.column(id).is_computed()).collect();
        let mut rank = vec![u32::MAX; count];
        for (pos, &id) in order.iter().enumerate() {
            rank[id.index()] = pos as u32;
        }

        let by_rank = |set: HashSet<ColumnId>, own: ColumnId| -> Vec<ColumnId> {
            let mut cols: Vec<ColumnId> =
                set.into_iter().filter(|&c| c != own && rank[c.index()] != u32::MAX).collect();
            cols.sort_by_key(|c| rank[c.index()]);
            cols
        };

        let mut downstream = Vec::with_capacity(count);
        let mut upstream = Vec::with_capacity(count);
        let mut grouped_by = vec![Vec::new(); count];
        let mut group_columns = Vec::new();

        for id in registry.ids() {
            downstream.push(by_rank(downstream_from(&registry, &[id]), id));
            upstream.push(by_rank(upstream_from(&registry, &[id]), id));

            if let Some(Derivation::Aggregate { group_by, .. }) = &registry.column(id).derivation {
                if let Some(key_col) = registry.lookup(group_by) {
                    grouped_by[key_col.index()].push(id);
                    if !group_columns.contains(&key_col) {
                        group_columns.push(key_col);
                    }
                }
            }
        }

        debug!(columns = count, computed = order.len(), groupings = group_columns.len(), "dependency graph built");

        Ok(Self { registry, order, rank, downstream, upstream, grouped_by, group_columns })
    }

    pub fn registry(&self) -> &ColumnRegistry { &self.registry }

    pub fn column(&self, id: ColumnId) -> &Column { self.registry.column(id) }

    pub fn lookup(&self, key: &str) -> Option<ColumnId> { self.registry.lookup(key) }

    /// Evaluation order over computed columns.
    pub fn order(&self) -> &[ColumnId] { &self.order }

    pub fn rank(&self, id: ColumnId) -> Option<usize> {
        match self.rank[id.index()] {
            u32::MAX => None,
            r => Some(r as usize),
        }
    }

    /// Computed columns transitively depending on `id`, in evaluation order.
    pub fn downstream(&self, id: ColumnId) -> &[ColumnId] { &self.downstream[id.index()] }

    /// Computed columns `id` transitively depends on, in evaluation order.
    pub fn upstream(&self, id: ColumnId) -> &[ColumnId] { &self.upstream[id.index()] }

    /// Aggregate columns whose group key is `id`.
    pub fn aggregates_grouped_by(&self, id: ColumnId) -> &[ColumnId] { &self.grouped_by[id.index()] }

    /// Distinct raw columns used as a group key by at least one aggregate.
    pub fn group_columns(&self) -> &[ColumnId] { &self.group_columns }

    /// The evaluation order restricted to the seeds and everything downstream of them.
    pub fn scope(&self, seeds: impl IntoIterator<Item = ColumnId>) -> Vec<ColumnId> {
        let mut in_scope = vec![false; self.order.len()];
        for seed in seeds {
            if let Some(r) = self.rank(seed) {
                in_scope[r] = true;
            }
            for &c in self.downstream(seed) {
                in_scope[self.rank[c.index()] as usize] = true;
            }
        }
        self.order.iter().zip(in_scope).filter_map(|(&c, keep)| keep.then_some(c)).collect()
    }
}
