use rstest::{fixture, rstest};
use tally_core::{
    CellValue, Column, Derivation, DerivationError, Operation, Reducer, RowId, RowInputs, SchemaError, Table,
    TableError, ValidationError, Value, ValueKind,
};

fn columns() -> Vec<Column> {
    vec![
        Column::raw("a", "A", ValueKind::Number),
        Column::raw("b", "B", ValueKind::Number),
        Column::raw("c", "C", ValueKind::Text),
        Column::computed("d", "D (A+B)", ValueKind::Number, Derivation::row(["a", "b"], Operation::Add)),
        Column::computed("e", "E (Sum of D in group)", ValueKind::Number, Derivation::aggregate("c", "d", Reducer::Sum)),
    ]
}

struct Sample {
    table: Table,
    rows: [RowId; 3],
}

#[fixture]
fn sample() -> Sample {
    let mut table = Table::new(columns()).unwrap();
    let mut insert = |a: f64, b: f64, c: &str| {
        table.insert_row([("a", Value::Number(a)), ("b", Value::Number(b)), ("c", Value::from(c))]).unwrap()
    };
    let rows = [insert(1.5, 2.5, "G1"), insert(2.5, 3.5, "G1"), insert(1.0, 1.0, "G2")];
    Sample { table, rows }
}

fn num(table: &Table, row: RowId, key: &str) -> Option<f64> {
    table.get(row, key).and_then(CellValue::as_f64)
}

#[rstest]
fn initial_rows_derive_row_and_group_values(sample: Sample) {
    let Sample { table, rows: [r1, r2, r3] } = sample;
    assert_eq!((num(&table, r1, "d"), num(&table, r1, "e")), (Some(4.0), Some(8.0)));
    assert_eq!((num(&table, r2, "d"), num(&table, r2, "e")), (Some(6.0), Some(8.0)));
    assert_eq!((num(&table, r3, "d"), num(&table, r3, "e")), (Some(2.0), Some(2.0)));
}

#[rstest]
fn editing_one_row_leaves_other_groups_alone(sample: Sample) {
    let Sample { mut table, rows: [r1, r2, r3] } = sample;
    let updates = table.set_cell(r3, "a", Value::Number(3.0)).unwrap();

    assert!(updates.iter().all(|u| u.row == r3));
    assert_eq!((num(&table, r3, "d"), num(&table, r3, "e")), (Some(4.0), Some(4.0)));
    assert_eq!(num(&table, r1, "e"), Some(8.0));
    assert_eq!(num(&table, r2, "e"), Some(8.0));
}

#[rstest]
fn moving_a_row_updates_both_groups(sample: Sample) {
    let Sample { mut table, rows: [r1, r2, r3] } = sample;
    table.set_cell(r3, "a", Value::Number(3.0)).unwrap();
    let updates = table.set_cell(r1, "c", Value::from("G2")).unwrap();

    assert_eq!(num(&table, r2, "e"), Some(6.0));
    assert_eq!(num(&table, r1, "e"), Some(8.0));
    assert_eq!(num(&table, r3, "e"), Some(8.0));
    assert_eq!(updates[0].column, "c");
    assert!(updates.iter().any(|u| u.row == r2 && u.column == "e"));
}

#[rstest]
fn deleting_a_row_removes_its_contribution(sample: Sample) {
    let Sample { mut table, rows: [r1, r2, _] } = sample;
    let updates = table.delete_row(r1).unwrap();

    assert_eq!(num(&table, r2, "e"), Some(6.0));
    assert!(updates.iter().all(|u| u.row == r2 && u.column == "e"));
    assert!(table.row(r1).is_none());
    assert_eq!(table.delete_row(r1), Err(TableError::NotFound(r1)));
}

#[rstest]
fn recompute_after_mutations_changes_nothing(sample: Sample) {
    let Sample { mut table, rows: [r1, _, r3] } = sample;
    table.set_cell(r1, "b", Value::Number(-7.0)).unwrap();
    table.delete_row(r3).unwrap();
    table.insert_row([("a", Value::Number(1.0)), ("c", Value::from("G2"))]).unwrap();

    assert!(table.recompute().is_empty());
    assert!(table.recompute().is_empty());
}

#[rstest]
fn rejected_mutations_leave_state_unchanged(sample: Sample) {
    let Sample { mut table, rows: [r1, ..] } = sample;
    let before = table.snapshot();

    assert_eq!(
        table.set_cell(r1, "d", Value::Number(1.0)),
        Err(TableError::Validation(ValidationError::Computed("d".into())))
    );
    assert_eq!(
        table.set_cell(r1, "zzz", Value::Number(1.0)),
        Err(TableError::Validation(ValidationError::UnknownColumn("zzz".into())))
    );
    assert!(matches!(
        table.set_cell(r1, "a", Value::from("ten")),
        Err(TableError::Validation(ValidationError::KindMismatch { .. }))
    ));
    assert_eq!(table.set_cell(RowId(404), "a", Value::Number(1.0)), Err(TableError::NotFound(RowId(404))));
    assert_eq!(table.snapshot(), before);
}

#[test]
fn derivation_errors_stay_in_their_cells() {
    let mut table = Table::new(vec![
        Column::raw("num", "Num", ValueKind::Number),
        Column::raw("den", "Den", ValueKind::Number),
        Column::raw("g", "Group", ValueKind::Text),
        Column::computed("ratio", "Ratio", ValueKind::Number, Derivation::row(["num", "den"], Operation::Divide)),
        Column::computed("total", "Total ratio", ValueKind::Number, Derivation::aggregate("g", "ratio", Reducer::Sum)),
        Column::computed("rows", "Rows", ValueKind::Integer, Derivation::aggregate("g", "num", Reducer::Count)),
    ])
    .unwrap();
    let ok = table.insert_row([("num", Value::Number(1.0)), ("den", Value::Number(4.0)), ("g", Value::from("x"))]).unwrap();
    let bad = table.insert_row([("num", Value::Number(1.0)), ("den", Value::Number(0.0)), ("g", Value::from("x"))]).unwrap();

    assert_eq!(table.get(ok, "ratio").and_then(CellValue::as_f64), Some(0.25));
    assert_eq!(table.get(bad, "ratio"), Some(&CellValue::Error(DerivationError::DivisionByZero)));
    assert_eq!(table.get(ok, "total"), Some(&CellValue::Error(DerivationError::Upstream("ratio".into()))));
    assert_eq!(table.get(ok, "rows"), Some(&CellValue::Value(Value::Integer(2))));

    table.set_cell(bad, "den", Value::Number(2.0)).unwrap();
    assert_eq!(table.get(ok, "total").and_then(CellValue::as_f64), Some(0.75));
}

#[test]
fn chained_aggregates_follow_their_sources() {
    let mut table = Table::new(vec![
        Column::raw("region", "Region", ValueKind::Text),
        Column::raw("amount", "Amount", ValueKind::Integer),
        Column::computed("region_total", "Region total", ValueKind::Integer, Derivation::aggregate("region", "amount", Reducer::Sum)),
        Column::computed("share", "Share", ValueKind::Number, Derivation::row(["amount", "region_total"], Operation::Divide)),
        Column::computed("top_share", "Top share", ValueKind::Number, Derivation::aggregate("region", "share", Reducer::Max)),
    ])
    .unwrap();
    let a = table.insert_row([("region", Value::from("north")), ("amount", Value::Integer(30))]).unwrap();
    let b = table.insert_row([("region", Value::from("north")), ("amount", Value::Integer(10))]).unwrap();

    assert_eq!(table.get(a, "region_total"), Some(&CellValue::Value(Value::Integer(40))));
    assert_eq!(table.get(b, "top_share").and_then(CellValue::as_f64), Some(0.75));

    table.set_cell(b, "amount", Value::Integer(90)).unwrap();
    assert_eq!(table.get(a, "share").and_then(CellValue::as_f64), Some(0.25));
    assert_eq!(table.get(a, "top_share").and_then(CellValue::as_f64), Some(0.75));
}

#[test]
fn function_columns_see_only_declared_inputs() {
    let mut table = Table::new(vec![
        Column::raw("weight", "Weight", ValueKind::Number),
        Column::raw("h2o", "H2O %", ValueKind::Number),
        Column::computed(
            "dry",
            "Dry weight",
            ValueKind::Number,
            Derivation::function(["weight", "h2o"], |r: &RowInputs<'_>| {
                let (Some(w), Some(h)) = (r.number("weight")?, r.number("h2o")?) else { return Ok(None) };
                if !(0.0..=100.0).contains(&h) {
                    return Err(DerivationError::Custom(format!("moisture {} out of range", h)));
                }
                Ok(Some(Value::Number(w * (100.0 - h) / 100.0)))
            }),
        ),
    ])
    .unwrap();
    let id = table.insert_row([("weight", Value::Number(60.0)), ("h2o", Value::Number(5.0))]).unwrap();
    assert_eq!(table.get(id, "dry").and_then(CellValue::as_f64), Some(57.0));

    table.set_cell(id, "h2o", Value::Number(150.0)).unwrap();
    assert!(table.get(id, "dry").is_some_and(CellValue::is_error));

    table.set_cell(id, "h2o", None::<Value>).unwrap();
    assert_eq!(table.get(id, "dry"), Some(&CellValue::Empty));
}

#[test]
fn empty_groups_average_to_blank() {
    let mut table = Table::new(vec![
        Column::raw("k", "K", ValueKind::Text),
        Column::raw("v", "V", ValueKind::Number),
        Column::computed("avg", "Avg", ValueKind::Number, Derivation::aggregate("k", "v", Reducer::Average)),
    ])
    .unwrap();
    let id = table.insert_row([("k", Some(Value::from("a"))), ("v", None)]).unwrap();
    assert_eq!(table.get(id, "avg"), Some(&CellValue::Empty));
}

#[rstest]
#[case::cycle(
    vec![
        Column::computed("x", "X", ValueKind::Number, Derivation::row(["y"], Operation::Add)),
        Column::computed("y", "Y", ValueKind::Number, Derivation::row(["x"], Operation::Add)),
    ],
    "x"
)]
#[case::self_reference(
    vec![Column::computed("x", "X", ValueKind::Number, Derivation::row(["x"], Operation::Add))],
    "x"
)]
fn cyclic_schemas_are_rejected(#[case] columns: Vec<Column>, #[case] member: &str) {
    match Table::new(columns) {
        Err(SchemaError::Cycle { path }) => assert!(path.iter().any(|c| c == member)),
        other => panic!("expected a cycle, got {:?}", other.map(|t| t.len())),
    }
}

#[rstest]
fn nan_is_rejected_as_a_raw_value(sample: Sample) {
    let Sample { mut table, rows: [r1, ..] } = sample;
    assert_eq!(
        table.set_cell(r1, "a", Value::Number(f64::NAN)),
        Err(TableError::Validation(ValidationError::NotANumber("a".into())))
    );
    assert_eq!(num(&table, r1, "e"), Some(8.0));
}
