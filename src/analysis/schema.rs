//! Structural checks run over a registered schema before any ordering is attempted.
use crate::error::SchemaError;
use crate::store::registry::ColumnRegistry;
use crate::store::types::{Column, Derivation, Operation, Reducer, RowExpr, ValueKind};

/// Collects every structural problem of a schema: derivation shape, kinds and grouping rules.
///
/// Reference resolution and key uniqueness are handled by the registry; this pass only
/// inspects references that resolved.
pub struct SchemaChecker<'a> {
    registry: &'a ColumnRegistry,
    errors: Vec<SchemaError>,
}

impl<'a> SchemaChecker<'a> {
    pub fn new(registry: &'a ColumnRegistry) -> Self {
        Self { registry, errors: Vec::new() }
    }

    pub fn check(mut self) -> Vec<SchemaError> {
        let registry = self.registry;
        for column in &registry.columns {
            self.check_column(column);
        }
        self.errors
    }

    fn check_column(&mut self, column: &'a Column) {
        let registry = self.registry;
        let Some(derivation) = &column.derivation else { return };

        if column.editable {
            self.errors.push(SchemaError::EditableComputed(column.key.clone()));
        }

        match derivation {
            Derivation::Row { inputs, expr: RowExpr::Op(op) } => {
                let (min, max) = op.arity();
                if inputs.len() < min || max.is_some_and(|m| inputs.len() > m) {
                    let expected = match max {
                        Some(m) if m == min => format!("exactly {}", m),
                        _ => format!("at least {}", min),
                    };
                    self.invalid(column, format!("operation {:?} takes {} inputs, got {}", op, expected, inputs.len()));
                }

                if *op == Operation::Concat {
                    if column.kind != ValueKind::Text {
                        self.invalid(column, format!("concatenation produces text, column is {}", column.kind));
                    }
                } else {
                    if !column.kind.is_numeric() || (*op == Operation::Divide && column.kind != ValueKind::Number) {
                        self.invalid(column, format!("operation {:?} cannot produce a {} value", op, column.kind));
                    }
                    for input in inputs {
                        if let Some(kind) = self.kind_of(input) {
                            if !kind.is_numeric() {
                                self.invalid(column, format!("operation {:?} needs numeric inputs, '{}' is {}", op, input, kind));
                            }
                        }
                    }
                }
            }
            Derivation::Row { expr: RowExpr::Function(_), .. } => {}
            Derivation::Aggregate { group_by, source, reducer } => {
                if let Some(group_col) = registry.lookup(group_by).map(|id| registry.column(id)) {
                    if group_col.is_computed() {
                        self.invalid(column, format!("group key '{}' must be a raw column", group_by));
                    }
                }
                if let Some(source_kind) = self.kind_of(source) {
                    self.check_reducer(column, *reducer, source, source_kind);
                }
            }
        }
    }

    fn check_reducer(&mut self, column: &Column, reducer: Reducer, source: &str, source_kind: ValueKind) {
        match reducer {
            Reducer::Sum | Reducer::Average if !source_kind.is_numeric() => {
                self.invalid(column, format!("{} needs a numeric source, '{}' is {}", reducer, source, source_kind));
            }
            _ => {}
        }

        let fits = match reducer {
            Reducer::Count | Reducer::Sum => column.kind.is_numeric(),
            Reducer::Average => column.kind == ValueKind::Number,
            Reducer::Min | Reducer::Max => {
                column.kind == source_kind || (source_kind.is_numeric() && column.kind == ValueKind::Number)
            }
        };
        if !fits {
            self.invalid(column, format!("{} of '{}' cannot be stored in a {} column", reducer, source, column.kind));
        }
    }

    fn kind_of(&self, key: &str) -> Option<ValueKind> {
        self.registry.lookup(key).map(|id| self.registry.column(id).kind)
    }

    fn invalid(&mut self, column: &Column, message: String) {
        self.errors.push(SchemaError::InvalidDerivation { column: column.key.clone(), message });
    }
}
