//! Column, value and row types shared by every layer of the engine.

use crate::error::{DerivationError, ValidationError};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ColumnId(pub u32);

impl ColumnId {
    #[inline(always)]
    pub fn index(&self) -> usize { self.0 as usize }
    pub fn new(idx: usize) -> Self { Self(idx as u32) }
}

/// Opaque row identity. Assigned on insert and never reused by a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowId(pub u64);

impl RowId {
    /// Largest id a table will store or hand out.
    pub const MAX: RowId = RowId(i64::MAX as u64);
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    #[serde(alias = "float")]
    Number,
    Integer,
    Text,
    Date,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Number => "number",
            ValueKind::Integer => "integer",
            ValueKind::Text => "text",
            ValueKind::Date => "date",
        };
        f.write_str(name)
    }
}

impl ValueKind {
    pub fn is_numeric(self) -> bool {
        matches!(self, ValueKind::Number | ValueKind::Integer)
    }

    /// Fits `value` into this kind. Integers widen into `number`; nothing else converts.
    /// On failure the kind that was actually supplied is returned.
    pub fn coerce(self, value: Value) -> Result<Value, ValueKind> {
        match (self, value) {
            (ValueKind::Number, Value::Integer(i)) => Ok(Value::Number(i as f64)),
            (kind, value) if value.kind() == kind => Ok(value),
            (_, value) => Err(value.kind()),
        }
    }

    /// Reads a plain JSON scalar (as stored by an external persistence layer) as a value of this kind.
    /// `null` is a blank cell.
    pub fn parse_json(self, column: &str, json: &serde_json::Value) -> Result<Option<Value>, ValidationError> {
        use serde_json::Value as Json;

        let unparsable = || ValidationError::Unparsable {
            column: column.to_string(),
            expected: self,
            input: json.to_string(),
        };

        let value = match (self, json) {
            (_, Json::Null) => return Ok(None),
            (ValueKind::Number, Json::Number(n)) => Value::Number(n.as_f64().ok_or_else(unparsable)?),
            (ValueKind::Integer, Json::Number(n)) => Value::Integer(n.as_i64().ok_or_else(unparsable)?),
            (ValueKind::Text, Json::String(s)) => Value::Text(s.clone()),
            (ValueKind::Date, Json::String(s)) => {
                let date = NaiveDate::parse_from_str(s, DATE_FORMAT).map_err(|_| unparsable())?;
                Value::Date(date)
            }
            _ => return Err(unparsable()),
        };
        Ok(Some(value))
    }
}

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// A concrete scalar held by a cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Number(f64),
    Integer(i64),
    Text(String),
    Date(NaiveDate),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Number(_) => ValueKind::Number,
            Value::Integer(_) => ValueKind::Integer,
            Value::Text(_) => ValueKind::Text,
            Value::Date(_) => ValueKind::Date,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Equality used for change detection: NaN equals itself, `0.0` equals `-0.0`.
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b || a.to_bits() == b.to_bits(),
            _ => self == other,
        }
    }

    /// Orders two values of comparable kinds. Numbers and integers compare numerically.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (a, b) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", n),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Text(s) => write!(f, "{:?}", s),
            Value::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self { Value::Number(n) }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self { Value::Integer(i) }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self { Value::Text(s.to_string()) }
}

impl From<String> for Value {
    fn from(s: String) -> Self { Value::Text(s) }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self { Value::Date(d) }
}

/// The state of one cell.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "data", rename_all = "snake_case")]
pub enum CellValue {
    /// Blank raw cell, or a derivation with no value (e.g. the average of an empty group).
    #[default]
    Empty,
    /// A computed cell the engine has not resolved yet.
    Pending,
    Value(Value),
    Error(DerivationError),
}

impl CellValue {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            CellValue::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.as_value().and_then(Value::as_f64)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, CellValue::Error(_))
    }

    pub fn same(&self, other: &CellValue) -> bool {
        match (self, other) {
            (CellValue::Value(a), CellValue::Value(b)) => a.same(b),
            _ => self == other,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => f.write_str("<empty>"),
            CellValue::Pending => f.write_str("<pending>"),
            CellValue::Value(v) => write!(f, "{}", v),
            CellValue::Error(e) => write!(f, "#ERR({})", e),
        }
    }
}

impl From<Value> for CellValue {
    fn from(v: Value) -> Self { CellValue::Value(v) }
}

impl From<Option<Value>> for CellValue {
    fn from(v: Option<Value>) -> Self { v.map_or(CellValue::Empty, CellValue::Value) }
}

/// Built-in row operations over a column's declared inputs, in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Add,
    Subtract,
    Multiply,
    Divide,
    Concat,
}

impl Operation {
    /// (minimum, maximum) number of inputs.
    pub fn arity(self) -> (usize, Option<usize>) {
        match self {
            Operation::Subtract | Operation::Divide => (2, Some(2)),
            Operation::Add | Operation::Multiply | Operation::Concat => (1, None),
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Operation::Add => "+",
            Operation::Subtract => "-",
            Operation::Multiply => "*",
            Operation::Divide => "/",
            Operation::Concat => "&",
        }
    }
}

/// Group-level reduction operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reducer {
    Sum,
    Average,
    Count,
    Min,
    Max,
}

impl fmt::Display for Reducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Reducer::Sum => "SUM",
            Reducer::Average => "AVERAGE",
            Reducer::Count => "COUNT",
            Reducer::Min => "MIN",
            Reducer::Max => "MAX",
        };
        f.write_str(name)
    }
}

/// The declared inputs of a row expression, as seen by a user function.
///
/// Only the columns listed in the derivation are visible. Blank inputs read as `None`;
/// errored inputs never reach the function.
pub struct RowInputs<'a> {
    keys: &'a [String],
    values: &'a [Option<&'a Value>],
}

impl<'a> RowInputs<'a> {
    pub(crate) fn new(keys: &'a [String], values: &'a [Option<&'a Value>]) -> Self {
        Self { keys, values }
    }

    pub fn get(&self, key: &str) -> Option<&'a Value> {
        let pos = self.keys.iter().position(|k| k == key)?;
        self.values[pos]
    }

    /// Numeric read of an input. Blank reads as `None`; a non-numeric value is an error.
    pub fn number(&self, key: &str) -> Result<Option<f64>, DerivationError> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => v.as_f64().map(Some).ok_or_else(|| DerivationError::NotNumeric(key.to_string())),
        }
    }

    pub fn len(&self) -> usize { self.values.len() }
    pub fn is_empty(&self) -> bool { self.values.is_empty() }

    pub fn iter(&self) -> impl Iterator<Item = (&'a str, Option<&'a Value>)> + '_ {
        self.keys.iter().map(String::as_str).zip(self.values.iter().copied())
    }
}

pub type RowFn = Arc<dyn Fn(&RowInputs<'_>) -> Result<Option<Value>, DerivationError> + Send + Sync>;

#[derive(Clone)]
pub enum RowExpr {
    Op(Operation),
    Function(RowFn),
}

impl fmt::Debug for RowExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowExpr::Op(op) => f.debug_tuple("Op").field(op).finish(),
            RowExpr::Function(_) => f.write_str("Function(..)"),
        }
    }
}

/// How a computed column gets its value.
#[derive(Debug, Clone)]
pub enum Derivation {
    /// A pure function of other columns of the same row.
    Row { inputs: SmallVec<[String; 4]>, expr: RowExpr },
    /// A reduction of `source` over every row sharing the `group_by` value, written to each of them.
    Aggregate { group_by: String, source: String, reducer: Reducer },
}

impl Derivation {
    pub fn row<I, S>(inputs: I, op: Operation) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Derivation::Row { inputs: inputs.into_iter().map(Into::into).collect(), expr: RowExpr::Op(op) }
    }

    pub fn function<I, S, F>(inputs: I, f: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&RowInputs<'_>) -> Result<Option<Value>, DerivationError> + Send + Sync + 'static,
    {
        Derivation::Row { inputs: inputs.into_iter().map(Into::into).collect(), expr: RowExpr::Function(Arc::new(f)) }
    }

    pub fn aggregate(group_by: impl Into<String>, source: impl Into<String>, reducer: Reducer) -> Self {
        Derivation::Aggregate { group_by: group_by.into(), source: source.into(), reducer }
    }

    /// Declared reads, in declaration order. Aggregates read `source` then `group_by`.
    pub fn dependencies(&self) -> SmallVec<[&str; 4]> {
        match self {
            Derivation::Row { inputs, .. } => inputs.iter().map(String::as_str).collect(),
            Derivation::Aggregate { group_by, source, .. } => {
                let mut deps = SmallVec::new();
                deps.push(source.as_str());
                if group_by != source {
                    deps.push(group_by.as_str());
                }
                deps
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Column {
    pub key: String,
    pub label: String,
    pub kind: ValueKind,
    pub editable: bool,
    pub derivation: Option<Derivation>,
}

impl Column {
    /// An editable source-of-truth column.
    pub fn raw(key: impl Into<String>, label: impl Into<String>, kind: ValueKind) -> Self {
        Self { key: key.into(), label: label.into(), kind, editable: true, derivation: None }
    }

    pub fn computed(key: impl Into<String>, label: impl Into<String>, kind: ValueKind, derivation: Derivation) -> Self {
        Self { key: key.into(), label: label.into(), kind, editable: false, derivation: Some(derivation) }
    }

    /// A raw column filled on insert or load only.
    pub fn read_only(mut self) -> Self {
        self.editable = false;
        self
    }

    pub fn is_computed(&self) -> bool { self.derivation.is_some() }

    pub fn info(&self) -> ColumnInfo {
        ColumnInfo {
            key: self.key.clone(),
            label: self.label.clone(),
            kind: self.kind,
            editable: self.editable,
            computed: self.is_computed(),
            dependencies: self
                .derivation
                .as_ref()
                .map(|d| d.dependencies().into_iter().map(str::to_string).collect())
                .unwrap_or_default(),
        }
    }
}

/// Serializable description of a column for the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub key: String,
    pub label: String,
    pub kind: ValueKind,
    pub editable: bool,
    pub computed: bool,
    pub dependencies: Vec<String>,
}

/// A materialized row: every column key mapped to its current cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub id: RowId,
    pub cells: BTreeMap<String, CellValue>,
}

impl Row {
    pub fn get(&self, key: &str) -> Option<&CellValue> { self.cells.get(key) }
}

/// One cell whose stored value changed during a mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellUpdate {
    pub row: RowId,
    pub column: String,
    pub value: CellValue,
}
