//! registry.rs
//! Columnar schema storage with a dense dependency topology.

use super::types::{Column, ColumnId};
use crate::error::SchemaError;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct ColumnRegistry {
    // Columnar Arrays
    pub columns: Vec<Column>,
    index: HashMap<String, ColumnId>,

    // Topology (CSR-ish + Adjacency)
    pub parents_flat: Vec<ColumnId>,
    pub parents_ranges: Vec<(u32, u32)>, // (start, count)

    // Downstream traversal helpers
    pub first_child: Vec<u32>,
    pub child_targets: Vec<ColumnId>,
    pub next_child: Vec<u32>,
}

impl ColumnRegistry {
    pub fn count(&self) -> usize { self.columns.len() }

    /// Registers every column, then resolves declared references into edges.
    ///
    /// Columns may reference columns declared after them, so all keys are indexed
    /// before any edge is created. Problems are collected, not returned on the first
    /// hit; an unresolved reference simply contributes no edge.
    pub fn build(columns: Vec<Column>) -> (Self, Vec<SchemaError>) {
        let count = columns.len();
        let mut errors = Vec::new();
        let mut index = HashMap::with_capacity(count);

        // --- Unique Key Enforcement ---
        for (i, column) in columns.iter().enumerate() {
            if index.contains_key(&column.key) {
                errors.push(SchemaError::DuplicateKey(column.key.clone()));
            } else {
                index.insert(column.key.clone(), ColumnId::new(i));
            }
        }

        let mut registry = Self {
            columns: Vec::new(),
            index,
            parents_flat: Vec::new(),
            parents_ranges: Vec::with_capacity(count),
            first_child: vec![u32::MAX; count],
            child_targets: Vec::new(),
            next_child: Vec::new(),
        };

        for (i, column) in columns.iter().enumerate() {
            let id = ColumnId::new(i);
            let mut parents = Vec::new();
            if let Some(derivation) = &column.derivation {
                for reference in derivation.dependencies() {
                    match registry.index.get(reference) {
                        Some(&parent) => parents.push(parent),
                        None => errors.push(SchemaError::UnknownReference {
                            column: column.key.clone(),
                            reference: reference.to_string(),
                        }),
                    }
                }
            }
            registry.link(id, &parents);
        }

        registry.columns = columns;
        (registry, errors)
    }

    fn link(&mut self, id: ColumnId, parents: &[ColumnId]) {
        // 1. Register Parents
        let start = self.parents_flat.len() as u32;
        self.parents_flat.extend_from_slice(parents);
        self.parents_ranges.push((start, parents.len() as u32));

        // 2. Register Children (Adjacency list for downstream lookups)
        for &parent in parents {
            let p_idx = parent.index();
            let head = self.first_child[p_idx];
            let new_edge = self.child_targets.len() as u32;
            self.child_targets.push(id);
            self.next_child.push(head);
            self.first_child[p_idx] = new_edge;
        }
    }

    pub fn lookup(&self, key: &str) -> Option<ColumnId> { self.index.get(key).copied() }

    #[inline(always)]
    pub fn column(&self, id: ColumnId) -> &Column { &self.columns[id.index()] }

    #[inline(always)]
    pub fn key(&self, id: ColumnId) -> &str { &self.columns[id.index()].key }

    #[inline(always)]
    pub fn get_parents(&self, id: ColumnId) -> &[ColumnId] {
        let (start, count) = self.parents_ranges[id.index()];
        &self.parents_flat[start as usize..(start + count) as usize]
    }

    /// Direct dependents of a column. May repeat a child that reads the column twice.
    pub fn children(&self, id: ColumnId) -> Children<'_> {
        Children { registry: self, edge: self.first_child[id.index()] }
    }

    pub fn ids(&self) -> impl Iterator<Item = ColumnId> {
        (0..self.count()).map(ColumnId::new)
    }
}

pub struct Children<'a> {
    registry: &'a ColumnRegistry,
    edge: u32,
}

impl Iterator for Children<'_> {
    type Item = ColumnId;

    fn next(&mut self) -> Option<ColumnId> {
        if self.edge == u32::MAX {
            return None;
        }
        let child = self.registry.child_targets[self.edge as usize];
        self.edge = self.registry.next_child[self.edge as usize];
        Some(child)
    }
}
