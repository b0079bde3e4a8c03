//! Incremental recompute must agree with deriving every cell from scratch.
use proptest::prelude::*;
use tally_core::{Column, Derivation, EngineConfig, Operation, Reducer, RowId, Table, Value, ValueKind};

fn columns() -> Vec<Column> {
    vec![
        Column::raw("a", "A", ValueKind::Number),
        Column::raw("b", "B", ValueKind::Number),
        Column::raw("g", "Group", ValueKind::Text),
        Column::computed("d", "A+B", ValueKind::Number, Derivation::row(["a", "b"], Operation::Add)),
        Column::computed("ratio", "A/B", ValueKind::Number, Derivation::row(["a", "b"], Operation::Divide)),
        Column::computed("e", "Sum D", ValueKind::Number, Derivation::aggregate("g", "d", Reducer::Sum)),
        Column::computed("avg", "Avg A", ValueKind::Number, Derivation::aggregate("g", "a", Reducer::Average)),
        Column::computed("top", "Max D", ValueKind::Number, Derivation::aggregate("g", "d", Reducer::Max)),
        Column::computed("n", "Rows", ValueKind::Integer, Derivation::aggregate("g", "a", Reducer::Count)),
        Column::computed("worst", "Min ratio", ValueKind::Number, Derivation::aggregate("g", "ratio", Reducer::Min)),
        Column::computed("spread", "Max D - Sum D", ValueKind::Number, Derivation::row(["top", "e"], Operation::Subtract)),
    ]
}

#[derive(Debug, Clone)]
enum Op {
    Insert { a: Option<i16>, b: Option<i16>, group: u8 },
    SetNumber { pick: usize, column: &'static str, value: Option<i16> },
    Regroup { pick: usize, group: u8 },
    Delete { pick: usize },
}

fn op() -> impl Strategy<Value = Op> {
    let num = proptest::option::weighted(0.85, -20i16..20);
    prop_oneof![
        3 => (num.clone(), num.clone(), 0u8..3).prop_map(|(a, b, group)| Op::Insert { a, b, group }),
        3 => (any::<usize>(), prop_oneof![Just("a"), Just("b")], num).prop_map(|(pick, column, value)| Op::SetNumber { pick, column, value }),
        2 => (any::<usize>(), 0u8..3).prop_map(|(pick, group)| Op::Regroup { pick, group }),
        1 => any::<usize>().prop_map(|pick| Op::Delete { pick }),
    ]
}

fn group(g: u8) -> Value {
    Value::Text(format!("G{}", g))
}

fn nth(table: &Table, pick: usize) -> Option<RowId> {
    let ids: Vec<RowId> = table.row_ids().collect();
    (!ids.is_empty()).then(|| ids[pick % ids.len()])
}

fn apply(table: &mut Table, op: &Op) {
    let num = |v: Option<i16>| v.map(|n| Value::Number(f64::from(n)));
    match *op {
        Op::Insert { a, b, group: g } => {
            table.insert_row([("a", num(a)), ("b", num(b)), ("g", Some(group(g)))]).unwrap();
        }
        Op::SetNumber { pick, column, value } => {
            if let Some(id) = nth(table, pick) {
                table.set_cell(id, column, num(value)).unwrap();
            }
        }
        Op::Regroup { pick, group: g } => {
            if let Some(id) = nth(table, pick) {
                table.set_cell(id, "g", group(g)).unwrap();
            }
        }
        Op::Delete { pick } => {
            if let Some(id) = nth(table, pick) {
                table.delete_row(id).unwrap();
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        failure_persistence: None,
        .. ProptestConfig::default()
    })]

    #[test]
    fn incremental_matches_from_scratch(ops in proptest::collection::vec(op(), 1..40)) {
        let mut table = Table::new(columns()).unwrap();
        for op in &ops {
            apply(&mut table, op);

            let mut fresh = Table::new(columns()).unwrap();
            fresh.load_snapshot(table.snapshot()).unwrap();
            prop_assert_eq!(fresh.snapshot(), table.snapshot(), "diverged after {:?}", op);
        }
        prop_assert!(table.recompute().is_empty());
    }

    #[test]
    fn parallel_evaluation_matches_sequential(ops in proptest::collection::vec(op(), 1..40)) {
        let mut sequential = Table::new(columns()).unwrap();
        let mut parallel =
            Table::with_config(columns(), EngineConfig { parallel_threshold: 1, ..EngineConfig::default() }).unwrap();
        for op in &ops {
            apply(&mut sequential, op);
            apply(&mut parallel, op);
        }
        prop_assert_eq!(sequential.snapshot(), parallel.snapshot());
    }
}
