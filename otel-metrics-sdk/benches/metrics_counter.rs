/*
    Measures the synchronous counter hot path.

    | Test                                                  |
    |-------------------------------------------------------|
    | Counter_Add_Sorted                                    |
    | Counter_Add_Unsorted                                  |
    | Counter_Add_Sorted_With_Non_Static_Values             |
    | Counter_Overflow                                      |
    | Counter_Add_Contended                                 |
*/

use criterion::{criterion_group, criterion_main, Criterion};
use otel_metrics::{
    metrics::{Counter, MeterProvider as _},
    KeyValue,
};
use otel_metrics_sdk::metrics::{ManualReader, SdkMeterProvider};
use std::cell::Cell;
use std::thread;

thread_local! {
    /// Per-thread position in the attribute combinations.
    static CURSOR: Cell<usize> = const { Cell::new(0) };
}

static ATTRIBUTE_VALUES: [&str; 10] = [
    "value1", "value2", "value3", "value4", "value5", "value6", "value7", "value8", "value9",
    "value10",
];

/// Next attribute indices, walking 4*4*10*10 = 1600 time series.
fn next_indices() -> [usize; 4] {
    CURSOR.with(|cursor| {
        let i = cursor.get();
        cursor.set(i.wrapping_add(7919));
        [i % 4, (i / 4) % 4, (i / 16) % 10, (i / 160) % 10]
    })
}

// Run this benchmark with:
// cargo bench --bench metrics_counter
fn create_counter(name: &'static str) -> (SdkMeterProvider, Counter<u64>) {
    let meter_provider: SdkMeterProvider = SdkMeterProvider::builder()
        .with_reader(ManualReader::builder().build())
        .build();
    let counter = meter_provider.meter("benchmarks").u64_counter(name).init();
    (meter_provider, counter)
}

fn criterion_benchmark(c: &mut Criterion) {
    counter_add_sorted(c);
    counter_add_unsorted(c);

    let attribute_values: Vec<String> = (1..=10).map(|i| format!("value{}", i)).collect();
    counter_add_sorted_with_non_static_values(c, &attribute_values);

    counter_overflow(c);
    counter_add_contended(c);
}

fn counter_add_sorted(c: &mut Criterion) {
    let (_provider, counter) = create_counter("Counter_Add_Sorted");
    c.bench_function("Counter_Add_Sorted", |b| {
        b.iter(|| {
            let [a, b, c, d] = next_indices();
            counter.add(
                1,
                &[
                    KeyValue::new("attribute1", ATTRIBUTE_VALUES[a]),
                    KeyValue::new("attribute2", ATTRIBUTE_VALUES[b]),
                    KeyValue::new("attribute3", ATTRIBUTE_VALUES[c]),
                    KeyValue::new("attribute4", ATTRIBUTE_VALUES[d]),
                ],
            );
        });
    });
}

fn counter_add_unsorted(c: &mut Criterion) {
    let (_provider, counter) = create_counter("Counter_Add_Unsorted");
    c.bench_function("Counter_Add_Unsorted", |b| {
        b.iter(|| {
            let [a, b, c, d] = next_indices();
            counter.add(
                1,
                &[
                    KeyValue::new("attribute2", ATTRIBUTE_VALUES[b]),
                    KeyValue::new("attribute3", ATTRIBUTE_VALUES[c]),
                    KeyValue::new("attribute1", ATTRIBUTE_VALUES[a]),
                    KeyValue::new("attribute4", ATTRIBUTE_VALUES[d]),
                ],
            );
        });
    });
}

fn counter_add_sorted_with_non_static_values(c: &mut Criterion, attribute_values: &[String]) {
    let (_provider, counter) = create_counter("Counter_Add_Sorted_With_Non_Static_Values");
    c.bench_function("Counter_Add_Sorted_With_Non_Static_Values", |b| {
        b.iter(|| {
            let [a, b, c, d] = next_indices();
            counter.add(
                1,
                &[
                    KeyValue::new("attribute1", attribute_values[a].clone()),
                    KeyValue::new("attribute2", attribute_values[b].clone()),
                    KeyValue::new("attribute3", attribute_values[c].clone()),
                    KeyValue::new("attribute4", attribute_values[d].clone()),
                ],
            );
        });
    });
}

fn counter_overflow(c: &mut Criterion) {
    let (_provider, counter) = create_counter("Counter_Overflow");
    // Cause overflow.
    for v in 0..2001 {
        counter.add(100, &[KeyValue::new("A", v.to_string())]);
    }

    c.bench_function("Counter_Overflow", |b| {
        b.iter(|| {
            let [a, b, c, d] = next_indices();
            counter.add(
                1,
                &[
                    KeyValue::new("attribute1", ATTRIBUTE_VALUES[a]),
                    KeyValue::new("attribute2", ATTRIBUTE_VALUES[b]),
                    KeyValue::new("attribute3", ATTRIBUTE_VALUES[c]),
                    KeyValue::new("attribute4", ATTRIBUTE_VALUES[d]),
                ],
            );
        });
    });
}

fn counter_add_contended(c: &mut Criterion) {
    let (_provider, counter) = create_counter("Counter_Add_Contended");
    c.bench_function("Counter_Add_Contended", |b| {
        b.iter(|| {
            thread::scope(|s| {
                for t in 0..4 {
                    let counter = &counter;
                    s.spawn(move || {
                        for _ in 0..100 {
                            counter.add(1, &[KeyValue::new("thread", ATTRIBUTE_VALUES[t])]);
                        }
                    });
                }
            });
        });
    });
}

criterion_group!(benches, criterion_benchmark);

criterion_main!(benches);
