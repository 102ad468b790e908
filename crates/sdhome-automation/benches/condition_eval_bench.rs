//! Condition-evaluation hot path benchmarks using Criterion.rs
//!
//! Run with: cargo bench -p sdhome-automation

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sdhome_core::value::{Operator, Value};

fn bench_numeric_comparison(c: &mut Criterion) {
    let new = Value::Number(21.7);
    let target = Value::Number(20.0);

    c.bench_function("operator_greater_than", |b| {
        b.iter(|| black_box(Operator::GreaterThan.evaluate(None, &new, Some(&target), None)));
    });

    c.bench_function("operator_between", |b| {
        let lower = Value::Number(18.0);
        let upper = Value::Number(24.0);
        b.iter(|| black_box(Operator::Between.evaluate(None, &new, Some(&lower), Some(&upper))));
    });
}

fn bench_string_comparison(c: &mut Criterion) {
    let new = Value::String("ON".to_string());
    let target = Value::String("on".to_string());

    c.bench_function("operator_equals_case_insensitive", |b| {
        b.iter(|| black_box(Operator::Equals.evaluate(None, &new, Some(&target), None)));
    });
}

fn bench_change_detection(c: &mut Criterion) {
    let old = Value::Bool(false);
    let new = Value::Bool(true);
    let target = Value::Bool(true);

    c.bench_function("operator_any_change", |b| {
        b.iter(|| black_box(Operator::AnyChange.evaluate(Some(&old), &new, None, None)));
    });

    c.bench_function("operator_changes_to", |b| {
        b.iter(|| black_box(Operator::ChangesTo.evaluate(Some(&old), &new, Some(&target), None)));
    });
}

criterion_group!(
    condition_eval_benches,
    bench_numeric_comparison,
    bench_string_comparison,
    bench_change_detection
);
criterion_main!(condition_eval_benches);
