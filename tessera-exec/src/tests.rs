use crate::{
    AggFunc, Column, DataType, Datum, ExecContext, ExecError, MemScanExec, OutputColumn,
    PhysicalExec, Schema, SortAggregateExec, Tuple, collect,
};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

fn orders_schema() -> Schema {
    Schema::new(vec![
        Column::new("region", DataType::Text),
        Column::new("qty", DataType::Int8),
        Column::new("price", DataType::Float8),
    ])
}

fn row(region: &str, qty: Option<i64>, price: f64) -> Tuple {
    vec![
        Datum::from(region),
        qty.map(Datum::Int8).unwrap_or(Datum::Null),
        Datum::Float8(price),
    ]
}

/// Sorted on `region`.
fn orders() -> Vec<Tuple> {
    vec![
        row("asia", Some(3), 1.5),
        row("asia", None, 2.5),
        row("asia", Some(5), 0.5),
        row("europe", Some(1), 4.0),
        row("us", Some(2), 3.0),
        row("us", Some(7), 1.0),
    ]
}

fn scan(tuples: Vec<Tuple>) -> MemScanExec {
    MemScanExec::new(orders_schema(), tuples).unwrap()
}

fn by_region(ctx: ExecContext, tuples: Vec<Tuple>) -> SortAggregateExec<MemScanExec> {
    SortAggregateExec::new(
        ctx,
        scan(tuples),
        vec![0],
        vec![
            OutputColumn::Key(0),
            OutputColumn::count_star(),
            OutputColumn::agg(AggFunc::Count, 1),
            OutputColumn::agg(AggFunc::Sum, 1),
            OutputColumn::agg(AggFunc::Min, 2),
            OutputColumn::agg(AggFunc::Max, 2),
            OutputColumn::agg(AggFunc::Avg, 1),
        ],
    )
    .unwrap()
}

#[test]
fn one_row_per_run_of_keys() {
    init_tracing();
    let mut exec = by_region(ExecContext::new(), orders());
    let names: Vec<_> = exec.schema().columns().iter().map(|c| c.name.as_str()).collect();
    assert_eq!(
        names,
        ["region", "count(*)", "count(qty)", "sum(qty)", "min(price)", "max(price)", "avg(qty)"]
    );

    let rows = collect(&mut exec).unwrap();
    assert_eq!(
        rows,
        vec![
            vec![
                Datum::from("asia"),
                Datum::Int8(3),
                Datum::Int8(2),
                Datum::Int8(8),
                Datum::Float8(0.5),
                Datum::Float8(2.5),
                Datum::Float8(4.0),
            ],
            vec![
                Datum::from("europe"),
                Datum::Int8(1),
                Datum::Int8(1),
                Datum::Int8(1),
                Datum::Float8(4.0),
                Datum::Float8(4.0),
                Datum::Float8(1.0),
            ],
            vec![
                Datum::from("us"),
                Datum::Int8(2),
                Datum::Int8(2),
                Datum::Int8(9),
                Datum::Float8(1.0),
                Datum::Float8(3.0),
                Datum::Float8(4.5),
            ],
        ]
    );
    assert_eq!(exec.next().unwrap(), None);
}

#[test]
fn empty_input_has_no_rows() {
    init_tracing();
    let mut exec = by_region(ExecContext::new(), Vec::new());
    assert_eq!(exec.next().unwrap(), None);

    let mut global = SortAggregateExec::new(
        ExecContext::new(),
        scan(Vec::new()),
        Vec::new(),
        vec![OutputColumn::count_star()],
    )
    .unwrap();
    assert_eq!(global.next().unwrap(), None);
}

#[test]
fn no_keys_is_one_group() {
    init_tracing();
    let mut exec = SortAggregateExec::new(
        ExecContext::new(),
        scan(orders()),
        Vec::new(),
        vec![
            OutputColumn::count_star(),
            OutputColumn::agg(AggFunc::Sum, 2),
        ],
    )
    .unwrap();
    assert_eq!(
        collect(&mut exec).unwrap(),
        vec![vec![Datum::Int8(6), Datum::Float8(12.5)]]
    );
}

#[test]
fn all_null_group_sums_to_null() {
    init_tracing();
    let mut exec = by_region(ExecContext::new(), vec![row("asia", None, 1.0)]);
    let rows = collect(&mut exec).unwrap();
    assert_eq!(rows[0][2], Datum::Int8(0));
    assert_eq!(rows[0][3], Datum::Null);
    assert_eq!(rows[0][6], Datum::Null);
}

#[test]
fn rescan_starts_over() {
    init_tracing();
    let mut exec = by_region(ExecContext::new(), orders());
    let first = exec.next().unwrap();
    exec.rescan().unwrap();
    assert_eq!(exec.next().unwrap(), first);
    assert_eq!(collect(&mut exec).unwrap().len(), 2);
}

#[test]
fn stop_ends_the_stream() {
    init_tracing();
    let ctx = ExecContext::new();
    let mut exec = by_region(ctx.clone(), orders());
    assert!(exec.next().unwrap().is_some());
    ctx.stop();
    assert_eq!(exec.next().unwrap(), None);
}

#[test]
fn plan_errors() {
    init_tracing();
    let not_grouped = SortAggregateExec::new(
        ExecContext::new(),
        scan(orders()),
        vec![0],
        vec![OutputColumn::Key(1)],
    );
    assert_eq!(not_grouped.err(), Some(ExecError::NotGrouped(1)));

    let out_of_range = SortAggregateExec::new(
        ExecContext::new(),
        scan(orders()),
        vec![0],
        vec![OutputColumn::agg(AggFunc::Max, 9)],
    );
    assert_eq!(
        out_of_range.err(),
        Some(ExecError::ColumnOutOfRange { index: 9, len: 3 })
    );

    let text_sum = SortAggregateExec::new(
        ExecContext::new(),
        scan(orders()),
        Vec::new(),
        vec![OutputColumn::agg(AggFunc::Sum, 0)],
    );
    assert!(matches!(text_sum.err(), Some(ExecError::TypeMismatch { .. })));
}

#[test]
fn mixed_types_fail_at_run_time() {
    init_tracing();
    let schema = Schema::new(vec![Column::new("v", DataType::Int8)]);
    let child = MemScanExec::new(schema, vec![vec![Datum::Int8(1)], vec![Datum::from("x")]]).unwrap();
    let mut exec = SortAggregateExec::new(
        ExecContext::new(),
        child,
        Vec::new(),
        vec![OutputColumn::agg(AggFunc::Max, 0)],
    )
    .unwrap();
    assert!(matches!(exec.next(), Err(ExecError::TypeMismatch { .. })));
}
