//! Bounded MPMC Queue
//!
//! Lock-free ring buffer of fixed power-of-two capacity used as the actor
//! mailbox. Producers and consumers reserve positions by compare-and-swap on
//! the tail and head counters; each cell carries a sequence stamp that tells
//! the reserving thread whether the cell is ready for it.
//!
//! # Sequence protocol
//!
//! For position `p` (cell `p & mask`) a cell cycles through three states:
//!
//! | State | Stamp |
//! |---|---|
//! | ready to produce | `2p` |
//! | ready to consume | `2p + 1` |
//! | reclaimed, ready to produce next lap | `2(p + capacity)` |
//!
//! The low bit separates "full" from "empty", so a queue of capacity one
//! still alternates strictly between one push and one pop. Only the thread
//! that won the CAS for a position moves its cell to the next state:
//! producers publish with `Release`, consumers observe with `Acquire`.

use crossbeam_utils::{Backoff, CachePadded};
use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Largest capacity a queue will allocate; larger requests are clamped
pub const MAX_CAPACITY: usize = 1 << 30;

/// One ring buffer slot
struct Cell<T> {
    stamp: AtomicUsize,
    value: UnsafeCell<Option<T>>,
}

/// Lock-free bounded multi-producer/multi-consumer queue
pub struct BoundedMpmcQueue<T> {
    /// Next position to produce into
    tail: CachePadded<AtomicUsize>,
    /// Next position to consume from
    head: CachePadded<AtomicUsize>,
    buffer: Box<[Cell<T>]>,
    capacity: usize,
    mask: usize,
}

// SAFETY: a cell's value is only touched by the single thread that reserved
// its position through the head/tail CAS, and the stamp's Release/Acquire
// pair orders that access against the next owner.
unsafe impl<T: Send> Send for BoundedMpmcQueue<T> {}
unsafe impl<T: Send> Sync for BoundedMpmcQueue<T> {}

/// Round a requested capacity up to the power of two the queue allocates
pub fn effective_capacity(requested: usize) -> usize {
    requested
        .max(1)
        .min(MAX_CAPACITY)
        .checked_next_power_of_two()
        .unwrap_or(MAX_CAPACITY)
}

#[inline]
fn empty_stamp(position: usize) -> usize {
    position.wrapping_shl(1)
}

#[inline]
fn full_stamp(position: usize) -> usize {
    position.wrapping_shl(1) | 1
}

#[inline]
fn stamp_diff(stamp: usize, expected: usize) -> isize {
    stamp.wrapping_sub(expected) as isize
}

impl<T> BoundedMpmcQueue<T> {
    /// Create a queue holding at least `capacity` items
    pub fn new(capacity: usize) -> Self {
        let capacity = effective_capacity(capacity);
        let buffer = (0..capacity)
            .map(|index| Cell {
                stamp: AtomicUsize::new(empty_stamp(index)),
                value: UnsafeCell::new(None),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            tail: CachePadded::new(AtomicUsize::new(0)),
            head: CachePadded::new(AtomicUsize::new(0)),
            buffer,
            capacity,
            mask: capacity - 1,
        }
    }

    /// Try to enqueue without blocking; hands the item back when full
    pub fn try_push(&self, item: T) -> Result<(), T> {
        let backoff = Backoff::new();
        let mut tail = self.tail.load(Ordering::Relaxed);

        loop {
            let cell = &self.buffer[tail & self.mask];
            let stamp = cell.stamp.load(Ordering::Acquire);
            let diff = stamp_diff(stamp, empty_stamp(tail));

            if diff == 0 {
                match self.tail.compare_exchange_weak(
                    tail,
                    tail.wrapping_add(1),
                    Ordering::SeqCst,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: winning the CAS makes this thread the only
                        // writer of the cell until the stamp is published.
                        unsafe {
                            *cell.value.get() = Some(item);
                        }
                        cell.stamp.store(full_stamp(tail), Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => {
                        tail = current;
                        backoff.snooze();
                    }
                }
            } else if diff < 0 {
                // Previous lap not consumed yet
                return Err(item);
            } else {
                // Another producer already claimed this position
                backoff.snooze();
                tail = self.tail.load(Ordering::Relaxed);
            }
        }
    }

    /// Try to dequeue without blocking
    pub fn try_pop(&self) -> Option<T> {
        let backoff = Backoff::new();
        let mut head = self.head.load(Ordering::Relaxed);

        loop {
            let cell = &self.buffer[head & self.mask];
            let stamp = cell.stamp.load(Ordering::Acquire);
            let diff = stamp_diff(stamp, full_stamp(head));

            if diff == 0 {
                match self.head.compare_exchange_weak(
                    head,
                    head.wrapping_add(1),
                    Ordering::SeqCst,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: winning the CAS makes this thread the only
                        // reader of the cell until the stamp is republished.
                        let item = unsafe { (*cell.value.get()).take() };
                        cell.stamp.store(
                            empty_stamp(head.wrapping_add(self.capacity)),
                            Ordering::Release,
                        );
                        return item;
                    }
                    Err(current) => {
                        head = current;
                        backoff.snooze();
                    }
                }
            } else if diff < 0 {
                // Nothing published at this position yet
                return None;
            } else {
                backoff.snooze();
                head = self.head.load(Ordering::Relaxed);
            }
        }
    }

    /// Number of reserved positions not yet consumed
    ///
    /// Exact when no push or pop is in flight.
    pub fn len(&self) -> usize {
        loop {
            let tail = self.tail.load(Ordering::SeqCst);
            let head = self.head.load(Ordering::SeqCst);

            if self.tail.load(Ordering::SeqCst) == tail {
                return tail.wrapping_sub(head).min(self.capacity);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.capacity
    }

    /// Allocated capacity (a power of two)
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> fmt::Debug for BoundedMpmcQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedMpmcQueue")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}
