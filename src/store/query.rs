//! Read-side filtering, ordering and pagination over the row store.
use super::rows::RowStore;
use super::types::{CellValue, ColumnId, Row, RowId, Value};
use crate::analysis::DependencyGraph;
use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A single row predicate. Blank and errored cells never match `contains` or `between`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Filter {
    /// Case-insensitive substring match on the cell's text form.
    Contains { column: String, needle: String },
    /// Inclusive range. An open bound is unbounded.
    Between {
        column: String,
        #[serde(default)]
        min: Option<Value>,
        #[serde(default)]
        max: Option<Value>,
    },
    /// `None` matches blank cells.
    Equals {
        column: String,
        #[serde(default)]
        value: Option<Value>,
    },
}

impl Filter {
    pub fn contains(column: impl Into<String>, needle: impl Into<String>) -> Self {
        Filter::Contains { column: column.into(), needle: needle.into() }
    }

    pub fn between(column: impl Into<String>, min: Option<Value>, max: Option<Value>) -> Self {
        Filter::Between { column: column.into(), min, max }
    }

    pub fn equals(column: impl Into<String>, value: impl Into<Option<Value>>) -> Self {
        Filter::Equals { column: column.into(), value: value.into() }
    }

    pub fn column(&self) -> &str {
        match self {
            Filter::Contains { column, .. } | Filter::Between { column, .. } | Filter::Equals { column, .. } => column,
        }
    }

    fn matches(&self, cell: &CellValue) -> bool {
        match self {
            Filter::Contains { needle, .. } => cell.as_value().is_some_and(|v| {
                let text = match v {
                    Value::Text(s) => s.to_lowercase(),
                    other => other.to_string().to_lowercase(),
                };
                text.contains(&needle.to_lowercase())
            }),
            Filter::Between { min, max, .. } => cell.as_value().is_some_and(|v| {
                let above = min.as_ref().map_or(true, |m| matches!(v.compare(m), Some(Ordering::Greater | Ordering::Equal)));
                let below = max.as_ref().map_or(true, |m| matches!(v.compare(m), Some(Ordering::Less | Ordering::Equal)));
                above && below
            }),
            Filter::Equals { value: None, .. } => matches!(cell, CellValue::Empty),
            Filter::Equals { value: Some(wanted), .. } => {
                cell.as_value().is_some_and(|v| v.compare(wanted) == Some(Ordering::Equal) || v.same(wanted))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// Column and direction to order results by. Blank and errored cells sort last either way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub column: String,
    #[serde(default)]
    pub order: SortOrder,
}

impl SortKey {
    pub fn ascending(column: impl Into<String>) -> Self {
        SortKey { column: column.into(), order: SortOrder::Ascending }
    }

    pub fn descending(column: impl Into<String>) -> Self {
        SortKey { column: column.into(), order: SortOrder::Descending }
    }
}

/// Filters are combined with AND. Without a sort key rows come back in id order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RowQuery {
    pub filters: Vec<Filter>,
    pub sort: Option<SortKey>,
    /// 1-based; 0 is read as the first page.
    pub page: usize,
    pub per_page: Option<usize>,
}

impl RowQuery {
    pub fn new() -> Self { Self::default() }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn sort_by(mut self, key: SortKey) -> Self {
        self.sort = Some(key);
        self
    }

    pub fn page(mut self, page: usize, per_page: usize) -> Self {
        self.page = page;
        self.per_page = Some(per_page);
        self
    }

    /// Runs the query. Fails only when a filter or the sort key names an unknown column.
    pub fn run(&self, graph: &DependencyGraph, store: &RowStore, default_page_size: usize) -> Result<Page, ValidationError> {
        let resolve = |key: &str| graph.lookup(key).ok_or_else(|| ValidationError::UnknownColumn(key.to_string()));
        let filters = self
            .filters
            .iter()
            .map(|f| Ok((resolve(f.column())?, f)))
            .collect::<Result<Vec<(ColumnId, &Filter)>, ValidationError>>()?;
        let sort = self.sort.as_ref().map(|k| Ok::<_, ValidationError>((resolve(&k.column)?, k.order))).transpose()?;

        let blank = CellValue::Empty;
        let cell = |row: RowId, column: ColumnId| store.get(row, column).unwrap_or(&blank);

        let mut ids: Vec<RowId> =
            store.ids().filter(|&row| filters.iter().all(|(column, f)| f.matches(cell(row, *column)))).collect();

        if let Some((column, order)) = sort {
            ids.sort_by(|&a, &b| {
                match (cell(a, column).as_value(), cell(b, column).as_value()) {
                    (Some(x), Some(y)) => {
                        let ord = x.compare(y).unwrap_or(Ordering::Equal);
                        if order == SortOrder::Descending { ord.reverse() } else { ord }
                    }
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                }
            });
        }

        let per_page = self.per_page.filter(|&n| n > 0).unwrap_or(default_page_size).max(1);
        let page = self.page.max(1);
        let total = ids.len();
        let rows = ids
            .into_iter()
            .skip((page - 1).saturating_mul(per_page))
            .take(per_page)
            .filter_map(|id| store.row(graph, id))
            .collect();

        Ok(Page { rows, total, page, per_page })
    }
}

/// One page of query results. `total` counts every matching row, not just this page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub rows: Vec<Row>,
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
}
