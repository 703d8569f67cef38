//! Mailbox and dispatch throughput
//!
//! Measures the lock-free mailbox queue on its own and the full
//! send -> drain -> execute path through an actor system.

use actor_runtime::{ActorSystem, BoundedMpmcQueue, Message, Task};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

const BATCH: usize = 10_000;

/// Push then pop on one thread: the uncontended fast path
fn bench_single_thread(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_single_thread");
    group.throughput(Throughput::Elements(1));

    for capacity in [16usize, 1024] {
        let queue = BoundedMpmcQueue::new(capacity);
        group.bench_with_input(BenchmarkId::new("push_pop", capacity), &capacity, |b, _| {
            b.iter(|| {
                queue.try_push(black_box(42u64)).unwrap();
                black_box(queue.try_pop());
            });
        });
    }

    group.finish();
}

/// Producers and consumers hammering one small queue
fn bench_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_contended");
    group.throughput(Throughput::Elements(BATCH as u64));
    group.sample_size(20);

    for threads in [1usize, 2, 4] {
        group.bench_with_input(
            BenchmarkId::new("mpmc", format!("{}x{}", threads, threads)),
            &threads,
            |b, &threads| {
                b.iter(|| {
                    let queue = Arc::new(BoundedMpmcQueue::new(64));
                    let per_producer = BATCH / threads;
                    let remaining = Arc::new(AtomicUsize::new(per_producer * threads));

                    let mut handles = Vec::with_capacity(threads * 2);
                    for _ in 0..threads {
                        let queue = queue.clone();
                        handles.push(thread::spawn(move || {
                            for i in 0..per_producer {
                                let mut item = i;
                                while let Err(back) = queue.try_push(item) {
                                    item = back;
                                    std::hint::spin_loop();
                                }
                            }
                        }));
                    }
                    for _ in 0..threads {
                        let queue = queue.clone();
                        let remaining = remaining.clone();
                        handles.push(thread::spawn(move || {
                            while remaining.load(Ordering::Relaxed) > 0 {
                                if queue.try_pop().is_some() {
                                    remaining.fetch_sub(1, Ordering::Relaxed);
                                } else {
                                    std::hint::spin_loop();
                                }
                            }
                        }));
                    }
                    for handle in handles {
                        handle.join().unwrap();
                    }
                });
            },
        );
    }

    group.finish();
}

/// Send a batch of no-op tasks to one actor and wait until all ran
fn bench_actor_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("actor_dispatch");
    group.throughput(Throughput::Elements(BATCH as u64));
    group.sample_size(20);

    let system = ActorSystem::new(4).unwrap();
    system.spawn(1024, "sink").unwrap();
    let executed = Arc::new(AtomicUsize::new(0));

    group.bench_function("send_and_drain", |b| {
        b.iter(|| {
            executed.store(0, Ordering::Relaxed);
            for _ in 0..BATCH {
                let counter = executed.clone();
                let mut message = Message::from_system(Task::from_fn(move || {
                    counter.fetch_add(1, Ordering::Relaxed);
                }));
                loop {
                    match system.send("sink", message) {
                        Ok(()) => break,
                        Err(err) => {
                            message = err.into_message();
                            std::hint::spin_loop();
                        }
                    }
                }
            }
            while executed.load(Ordering::Relaxed) < BATCH {
                std::hint::spin_loop();
            }
        });
    });

    group.finish();
    system.shutdown();
}

criterion_group!(
    benches,
    bench_single_thread,
    bench_contended,
    bench_actor_dispatch
);
criterion_main!(benches);
