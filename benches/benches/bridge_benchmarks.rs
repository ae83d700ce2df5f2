//! Bridge Performance Benchmarks
//!
//! This module benchmarks the cost of crossing the boundary:
//! - Value conversion in both directions
//! - Container element access through bridges
//! - Subroutine and method calls

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use perlbridge::{HostValue, ObjectProxy, Session};
use perlbridge_abi::{PackageDef, ReferenceInterpreter};

fn session() -> Session {
    Session::new(
        ReferenceInterpreter::new()
            .preload(PackageDef::new("Bench").sub("add", |cx| {
                let sum = cx.int_arg(0) + cx.int_arg(1);
                Ok(vec![cx.int(sum)])
            }))
            .preload(
                PackageDef::new("Counter")
                    .sub("new", |cx| {
                        let class = cx.str_arg(0);
                        let zero = cx.int(0);
                        let hash = cx.hash_ref(&[("count", zero)])?;
                        let object = cx.bless(hash, &class)?;
                        Ok(vec![object])
                    })
                    .sub("count", |cx| {
                        let this = cx.arg(0).unwrap_or_else(|| cx.undef());
                        let count = cx.fetch(this, "count")?.unwrap_or_else(|| cx.undef());
                        Ok(vec![count])
                    }),
            ),
    )
}

// ============================================================================
// Conversion Benchmarks
// ============================================================================

fn bench_conversion(c: &mut Criterion) {
    let mut group = c.benchmark_group("conversion");
    let session = session();

    let values = [
        ("int", HostValue::Int(42)),
        ("str", HostValue::from("a moderately sized string value")),
        ("list", HostValue::list(0..64)),
        (
            "mapping",
            HostValue::mapping((0..64).map(|i| (format!("key{}", i), i))),
        ),
    ];

    for (name, value) in values.iter() {
        group.bench_with_input(BenchmarkId::new("to_foreign", name), value, |b, value| {
            b.iter(|| black_box(session.to_foreign(black_box(value)).unwrap()))
        });

        let handle = session.to_foreign(value).unwrap();
        group.bench_with_input(BenchmarkId::new("to_host", name), &handle, |b, handle| {
            b.iter(|| black_box(session.to_host(black_box(handle)).unwrap()))
        });
    }

    group.finish();
}

// ============================================================================
// Container Benchmarks
// ============================================================================

fn bench_containers(c: &mut Criterion) {
    let mut group = c.benchmark_group("containers");
    let session = session();

    for size in [16usize, 256, 4096] {
        let array = session.new_array(0..size as i64).unwrap();
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("iterate", size), &array, |b, array| {
            b.iter(|| {
                let total: i64 = array
                    .iter()
                    .map(|item| item.unwrap().extract::<i64>().unwrap())
                    .sum();
                black_box(total)
            })
        });

        group.bench_with_input(BenchmarkId::new("to_vec", size), &array, |b, array| {
            b.iter(|| black_box(array.to_vec().unwrap()))
        });
    }

    group.finish();
}

// ============================================================================
// Call Benchmarks
// ============================================================================

fn bench_calls(c: &mut Criterion) {
    let mut group = c.benchmark_group("calls");
    let session = session();

    let add = session.function("Bench::add").unwrap();
    let args = [HostValue::Int(2), HostValue::Int(3)];
    group.bench_function("subroutine", |b| {
        b.iter(|| black_box(add.call(black_box(&args)).unwrap()))
    });

    let counter: ObjectProxy = session
        .load("Counter")
        .unwrap()
        .new(&[])
        .unwrap()
        .extract()
        .unwrap();
    group.bench_function("method", |b| {
        b.iter(|| black_box(counter.call_method("count", &[]).unwrap()))
    });

    group.finish();
}

criterion_group!(benches, bench_conversion, bench_containers, bench_calls);
criterion_main!(benches);
