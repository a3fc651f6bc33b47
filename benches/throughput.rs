//! Throughput benchmarks for the reclamation schemes

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use quiesce::{Ebr, GenDump, RetiredNode, Smr, SmrLocal};
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;
use std::thread;

#[repr(C)]
struct Node {
    retired: RetiredNode,
    value: usize,
}

impl Node {
    fn new(value: usize) -> *mut Self {
        Box::into_raw(Box::new(Self {
            retired: RetiredNode::new(),
            value,
        }))
    }
}

unsafe fn reclaim_node(node: *mut RetiredNode, _arg: *mut ()) {
    drop(Box::from_raw(node as *mut Node));
}

fn bench_pin_unpin(c: &mut Criterion) {
    let mut group = c.benchmark_group("pin_unpin");

    let gdump = GenDump::new();
    let local = gdump.register();
    group.bench_function("gdump", |b| {
        b.iter(|| {
            let _guard = local.pin();
            black_box(&_guard);
        });
    });
    drop(local);

    let ebr = Ebr::new();
    let local = ebr.register();
    group.bench_function("ebr", |b| {
        b.iter(|| {
            let _guard = local.pin();
            black_box(&_guard);
        });
    });
    drop(local);

    group.finish();
}

fn bench_retire_recycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("retire_recycle");

    for batch_size in [10usize, 50, 100, 500] {
        group.throughput(Throughput::Elements(batch_size as u64));
        group.bench_with_input(
            BenchmarkId::new("gdump", batch_size),
            &batch_size,
            |b, &size| {
                let scheme = GenDump::new();
                let local = scheme.register();
                b.iter(|| {
                    for i in 0..size {
                        unsafe { local.retire_boxed(Node::new(i)) };
                    }
                    scheme.recycle();
                });
            },
        );
        group.bench_with_input(
            BenchmarkId::new("ebr", batch_size),
            &batch_size,
            |b, &size| {
                let scheme = Ebr::new();
                let local = scheme.register();
                b.iter(|| {
                    for i in 0..size {
                        unsafe { local.retire_boxed(Node::new(i)) };
                    }
                    // Two passes: the batch's bucket is drained by the
                    // second one.
                    scheme.recycle();
                    scheme.recycle();
                });
            },
        );
    }

    group.finish();
}

fn bench_recycle_empty(c: &mut Criterion) {
    let mut group = c.benchmark_group("recycle_empty");

    let gdump = GenDump::new();
    group.bench_function("gdump", |b| b.iter(|| black_box(gdump.recycle())));

    let ebr = Ebr::new();
    group.bench_function("ebr", |b| b.iter(|| black_box(ebr.recycle())));

    group.finish();
}

fn churn<S>(scheme: S, num_threads: usize, ops: usize)
where
    S: Smr + Send + 'static,
    S::Local: SmrLocal + Send + 'static,
{
    let shared = Arc::new(AtomicPtr::new(Node::new(0)));

    let handles: Vec<_> = (0..num_threads)
        .map(|tid| {
            let scheme = scheme.clone();
            let shared = shared.clone();
            thread::spawn(move || {
                let local = scheme.register();
                for i in 0..ops {
                    let new_node = Node::new(tid * ops + i);
                    let guard = local.pin();
                    let old = shared.swap(new_node, Ordering::AcqRel);
                    if !old.is_null() {
                        unsafe {
                            local.retire(
                                old as *mut RetiredNode,
                                reclaim_node,
                                std::ptr::null_mut(),
                            )
                        };
                    }
                    drop(guard);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    // Cleanup
    let last = shared.swap(std::ptr::null_mut(), Ordering::AcqRel);
    unsafe { drop(Box::from_raw(last)) };
    drop(scheme);
}

fn bench_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("contention");
    group.sample_size(20); // Reduce sample size for long-running benchmarks

    for threads in [2usize, 4, 8] {
        group.throughput(Throughput::Elements(1000 * threads as u64));
        group.bench_with_input(
            BenchmarkId::new("gdump", threads),
            &threads,
            |b, &num_threads| {
                b.iter(|| churn(GenDump::new(), num_threads, 1000));
            },
        );
        group.bench_with_input(
            BenchmarkId::new("ebr", threads),
            &threads,
            |b, &num_threads| {
                b.iter(|| churn(Ebr::new(), num_threads, 1000));
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_pin_unpin,
    bench_retire_recycle,
    bench_recycle_empty,
    bench_contention
);
criterion_main!(benches);
