use crate::error::DerivationError;
use crate::store::types::{CellValue, Column, Operation, RowExpr, RowInputs, Value};

/// Evaluates a row expression against the current cells of its declared inputs.
///
/// An errored input short-circuits to `Upstream` without running the expression.
/// The result is fitted into the column's kind.
pub fn evaluate_row(column: &Column, inputs: &[String], expr: &RowExpr, cells: &[&CellValue]) -> CellValue {
    let mut values = Vec::with_capacity(cells.len());
    for (key, cell) in inputs.iter().zip(cells) {
        match cell {
            CellValue::Error(_) => return CellValue::Error(DerivationError::Upstream(key.clone())),
            CellValue::Pending => return CellValue::Pending,
            CellValue::Empty => values.push(None),
            CellValue::Value(v) => values.push(Some(v)),
        }
    }

    let result = match expr {
        RowExpr::Op(op) => execute_operation(*op, &values),
        RowExpr::Function(f) => f(&RowInputs::new(inputs, &values)),
    };
    fit(column, result)
}

/// Stores a derivation result in the column's kind, turning a kind clash into an error cell.
pub fn fit(column: &Column, result: Result<Option<Value>, DerivationError>) -> CellValue {
    match result {
        Ok(None) => CellValue::Empty,
        Ok(Some(Value::Number(n))) if n.is_nan() => CellValue::Error(DerivationError::NotANumber),
        Ok(Some(value)) => match column.kind.coerce(value) {
            Ok(value) => CellValue::Value(value),
            Err(found) => CellValue::Error(DerivationError::KindMismatch { expected: column.kind, found }),
        },
        Err(e) => CellValue::Error(e),
    }
}

/// Executes a built-in operation. A blank numeric input makes the result blank.
#[inline]
pub fn execute_operation(op: Operation, values: &[Option<&Value>]) -> Result<Option<Value>, DerivationError> {
    let mut operands = Vec::with_capacity(values.len());
    let mut blank = false;
    for v in values {
        match v {
            None => blank = true,
            Some(v) => operands.push(*v),
        }
    }
    let all_integer = operands.iter().all(|v| matches!(v, Value::Integer(_)));

    match (op, operands.split_first()) {
        (Operation::Concat, _) => Ok(Some(Value::Text(operands.iter().map(|v| plain(v)).collect()))),
        (_, None) => Ok(None),
        _ if blank => Ok(None),
        (Operation::Add | Operation::Subtract | Operation::Multiply, Some((first, rest))) if all_integer => {
            let mut acc = integer(first);
            for v in rest {
                let rhs = integer(v);
                acc = match op {
                    Operation::Add => acc.checked_add(rhs),
                    Operation::Subtract => acc.checked_sub(rhs),
                    _ => acc.checked_mul(rhs),
                }
                .ok_or(DerivationError::Overflow)?;
            }
            Ok(Some(Value::Integer(acc)))
        }
        (Operation::Add | Operation::Subtract | Operation::Multiply | Operation::Divide, Some((first, rest))) => {
            let mut acc = number(first)?;
            for v in rest {
                let rhs = number(v)?;
                acc = match op {
                    Operation::Add => acc + rhs,
                    Operation::Subtract => acc - rhs,
                    Operation::Multiply => acc * rhs,
                    _ => {
                        if rhs == 0.0 {
                            return Err(DerivationError::DivisionByZero);
                        }
                        acc / rhs
                    }
                };
            }
            Ok(Some(Value::Number(acc)))
        }
    }
}

fn integer(v: &Value) -> i64 {
    match v {
        Value::Integer(i) => *i,
        _ => 0,
    }
}

fn number(v: &Value) -> Result<f64, DerivationError> {
    v.as_f64().ok_or_else(|| DerivationError::NotNumeric(v.kind().to_string()))
}

fn plain(v: &Value) -> String {
    match v {
        Value::Text(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::types::{Derivation, ValueKind};
    use rstest::rstest;

    #[rstest]
    #[case(Operation::Add, vec![Value::Number(1.5), Value::Number(2.5)], Some(Value::Number(4.0)))]
    #[case(Operation::Subtract, vec![Value::Number(1.0), Value::Integer(3)], Some(Value::Number(-2.0)))]
    #[case(Operation::Multiply, vec![Value::Integer(3), Value::Integer(4), Value::Integer(2)], Some(Value::Integer(24)))]
    #[case(Operation::Divide, vec![Value::Integer(7), Value::Integer(2)], Some(Value::Number(3.5)))]
    #[case(Operation::Concat, vec![Value::from("W-"), Value::Integer(12)], Some(Value::from("W-12")))]
    fn test_execute_operation(#[case] op: Operation, #[case] input: Vec<Value>, #[case] expected: Option<Value>) {
        let refs: Vec<Option<&Value>> = input.iter().map(Some).collect();
        assert_eq!(execute_operation(op, &refs).unwrap(), expected);
    }

    #[test]
    fn test_divide_by_zero() {
        let (a, b) = (Value::Number(1.0), Value::Number(0.0));
        assert_eq!(execute_operation(Operation::Divide, &[Some(&a), Some(&b)]), Err(DerivationError::DivisionByZero));
    }

    #[test]
    fn test_blank_input_gives_blank_result() {
        let a = Value::Number(1.0);
        assert_eq!(execute_operation(Operation::Add, &[Some(&a), None]).unwrap(), None);
        assert_eq!(execute_operation(Operation::Concat, &[None, Some(&a)]).unwrap(), Some(Value::from("1")));
    }

    #[test]
    fn test_concat_of_blanks_is_empty_text() {
        assert_eq!(execute_operation(Operation::Concat, &[None, None]).unwrap(), Some(Value::from("")));
    }

    #[test]
    fn test_nan_result_becomes_error_cell() {
        let column = Column::computed("d", "D", ValueKind::Number, Derivation::row(["a", "b"], Operation::Add));
        let inputs = vec!["a".to_string(), "b".to_string()];
        let a = CellValue::Value(Value::Number(f64::INFINITY));
        let b = CellValue::Value(Value::Number(f64::NEG_INFINITY));
        let out = evaluate_row(&column, &inputs, &RowExpr::Op(Operation::Add), &[&a, &b]);
        assert_eq!(out, CellValue::Error(DerivationError::NotANumber));
    }

    #[test]
    fn test_integer_overflow() {
        let (a, b) = (Value::Integer(i64::MAX), Value::Integer(2));
        assert_eq!(execute_operation(Operation::Multiply, &[Some(&a), Some(&b)]), Err(DerivationError::Overflow));
    }

    #[test]
    fn test_evaluate_row_propagates_upstream_error() {
        let column = Column::computed("d", "D", ValueKind::Number, Derivation::row(["a", "b"], Operation::Add));
        let inputs = vec!["a".to_string(), "b".to_string()];
        let a = CellValue::Value(Value::Number(1.0));
        let b = CellValue::Error(DerivationError::DivisionByZero);
        let out = evaluate_row(&column, &inputs, &RowExpr::Op(Operation::Add), &[&a, &b]);
        assert_eq!(out, CellValue::Error(DerivationError::Upstream("b".into())));
    }

    #[test]
    fn test_function_result_is_fitted_to_kind() {
        let column = Column::computed("d", "D", ValueKind::Integer, Derivation::row(["a"], Operation::Add));
        let inputs = vec!["a".to_string()];
        let a = CellValue::Value(Value::Number(1.0));
        let halve = RowExpr::Function(std::sync::Arc::new(
            |r: &RowInputs<'_>| -> Result<Option<Value>, DerivationError> {
                Ok(r.number("a")?.map(|n| Value::Number(n / 2.0)))
            },
        ));
        let out = evaluate_row(&column, &inputs, &halve, &[&a]);
        assert_eq!(
            out,
            CellValue::Error(DerivationError::KindMismatch { expected: ValueKind::Integer, found: ValueKind::Number })
        );
    }
}
