//! Bounded MPMC Queue Property Tests
//!
//! Properties that must hold for any capacity and any interleaving of
//! producers and consumers:
//! - every accepted item is popped exactly once
//! - a single producer's items come out in push order
//! - the queue never holds more than its capacity

use actor_runtime::BoundedMpmcQueue;
use proptest::prelude::*;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

#[derive(Debug, Clone)]
enum Op {
    Push(u32),
    Pop,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![any::<u32>().prop_map(Op::Push), Just(Op::Pop)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Single-threaded behaviour matches a bounded VecDeque
    #[test]
    fn prop_matches_bounded_fifo_model(
        requested in 1usize..40,
        ops in prop::collection::vec(op_strategy(), 0..300),
    ) {
        let queue = BoundedMpmcQueue::new(requested);
        let capacity = queue.capacity();
        prop_assert!(capacity >= requested);
        prop_assert!(capacity.is_power_of_two());

        let mut model = VecDeque::new();
        for op in ops {
            match op {
                Op::Push(value) => {
                    let accepted = queue.try_push(value).is_ok();
                    prop_assert_eq!(accepted, model.len() < capacity);
                    if accepted {
                        model.push_back(value);
                    }
                }
                Op::Pop => {
                    prop_assert_eq!(queue.try_pop(), model.pop_front());
                }
            }
            prop_assert_eq!(queue.len(), model.len());
            prop_assert!(queue.len() <= capacity);
        }
    }

    /// Every accepted item is delivered exactly once under contention
    #[test]
    fn prop_concurrent_exactly_once(
        requested in 1usize..16,
        producers in 1usize..4,
        consumers in 1usize..4,
        per_producer in 1usize..300,
    ) {
        let queue = Arc::new(BoundedMpmcQueue::new(requested));
        let total = producers * per_producer;
        let popped = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicBool::new(false));
        let seen = Arc::new(Mutex::new(Vec::with_capacity(total)));

        let producer_handles: Vec<_> = (0..producers)
            .map(|p| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for i in 0..per_producer {
                        let mut item = p * per_producer + i;
                        loop {
                            match queue.try_push(item) {
                                Ok(()) => break,
                                Err(back) => {
                                    item = back;
                                    thread::yield_now();
                                }
                            }
                        }
                    }
                })
            })
            .collect();

        let consumer_handles: Vec<_> = (0..consumers)
            .map(|_| {
                let queue = queue.clone();
                let popped = popped.clone();
                let done = done.clone();
                let seen = seen.clone();
                thread::spawn(move || {
                    let mut local = Vec::new();
                    loop {
                        match queue.try_pop() {
                            Some(item) => {
                                local.push(item);
                                popped.fetch_add(1, Ordering::SeqCst);
                            }
                            None if done.load(Ordering::SeqCst) => break,
                            None => thread::yield_now(),
                        }
                    }
                    seen.lock().unwrap().extend(local);
                })
            })
            .collect();

        for handle in producer_handles {
            handle.join().unwrap();
        }
        while popped.load(Ordering::SeqCst) < total {
            thread::yield_now();
        }
        done.store(true, Ordering::SeqCst);
        for handle in consumer_handles {
            handle.join().unwrap();
        }

        let seen = seen.lock().unwrap();
        prop_assert_eq!(seen.len(), total);
        let unique: HashSet<_> = seen.iter().copied().collect();
        prop_assert_eq!(unique.len(), total);
        prop_assert!(queue.is_empty());
    }
}

#[test]
fn test_single_producer_order_preserved_across_consumers() {
    let queue = Arc::new(BoundedMpmcQueue::new(8));
    let total = 10_000usize;

    let producer = {
        let queue = queue.clone();
        thread::spawn(move || {
            for i in 0..total {
                let mut item = i;
                while let Err(back) = queue.try_push(item) {
                    item = back;
                    thread::yield_now();
                }
            }
        })
    };

    // One consumer sees a subsequence of the push order, so it must be increasing
    let mut last = None;
    let mut received = 0;
    while received < total {
        if let Some(item) = queue.try_pop() {
            if let Some(prev) = last {
                assert!(item > prev, "item {} popped after {}", item, prev);
            }
            last = Some(item);
            received += 1;
        } else {
            thread::yield_now();
        }
    }
    producer.join().unwrap();
    assert!(queue.try_pop().is_none());
}
