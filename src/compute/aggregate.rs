//! Group reductions. Pure: the engine owns membership and write-back.
use crate::error::DerivationError;
use crate::store::types::{Reducer, Value, ValueKind};
use std::cmp::Ordering;

impl Reducer {
    /// Reduces the non-blank source values of one group.
    ///
    /// `Ok(None)` is the "no value" result: average, min and max of an empty group.
    pub fn reduce(self, values: &[Value]) -> Result<Option<Value>, DerivationError> {
        match self {
            Reducer::Count => Ok(Some(Value::Integer(values.len() as i64))),
            Reducer::Sum => sum(values).map(Some),
            Reducer::Average => {
                if values.is_empty() {
                    return Ok(None);
                }
                let total = values.iter().map(numeric).sum::<Result<f64, _>>()?;
                Ok(Some(Value::Number(total / values.len() as f64)))
            }
            Reducer::Min => extreme(values, Ordering::Less),
            Reducer::Max => extreme(values, Ordering::Greater),
        }
    }
}

fn numeric(value: &Value) -> Result<f64, DerivationError> {
    value.as_f64().ok_or(DerivationError::KindMismatch { expected: ValueKind::Number, found: value.kind() })
}

/// Integer sums stay integer; any number in the mix makes the sum an f64.
fn sum(values: &[Value]) -> Result<Value, DerivationError> {
    if values.iter().all(|v| matches!(v, Value::Integer(_))) {
        let mut total: i64 = 0;
        for v in values {
            if let Value::Integer(i) = v {
                total = total.checked_add(*i).ok_or(DerivationError::Overflow)?;
            }
        }
        return Ok(Value::Integer(total));
    }
    let total = values.iter().map(numeric).sum::<Result<f64, _>>()?;
    Ok(Value::Number(total))
}

fn is_nan(value: &Value) -> bool {
    matches!(value, Value::Number(n) if n.is_nan())
}

fn extreme(values: &[Value], wanted: Ordering) -> Result<Option<Value>, DerivationError> {
    let mut best: Option<&Value> = None;
    for v in values {
        best = match best {
            None => Some(v),
            Some(current) => match v.compare(current) {
                Some(ord) if ord == wanted => Some(v),
                Some(_) => Some(current),
                None if is_nan(v) || is_nan(current) => return Err(DerivationError::NotANumber),
                None => return Err(DerivationError::Incomparable(v.kind(), current.kind())),
            },
        };
    }
    Ok(best.cloned())
}
