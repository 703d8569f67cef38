//! Worker Pool
//!
//! Fixed set of long-lived threads servicing a bounded job queue. Callers
//! outside the actor model use [`WorkerPool::submit`] or
//! [`WorkerPool::submit_with_result`], the latter returning a [`TaskFuture`]
//! for the job's return value.
//!
//! A pool built with [`WorkerPool::with_reserved_lane`] also keeps a second
//! queue that only [`WorkerPool::submit_reserved`] can fill. The actor system
//! sizes it to one slot per actor and sends its drain jobs there, so a flood
//! of ordinary jobs cannot crowd out mailbox draining. Workers take reserved
//! jobs first.
//!
//! Within a lane jobs are taken in submission order, but with several workers
//! there is no global completion order. A panicking job is caught and counted;
//! the worker thread keeps running.

use crate::error::{panic_message, ActorError, Result};
use futures::channel::oneshot;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Default wait for queue space in `submit_with_result`
pub const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_secs(20);

struct JobQueue {
    jobs: VecDeque<Job>,
    reserved: VecDeque<Job>,
    stopped: bool,
}

impl JobQueue {
    fn pop(&mut self) -> Option<Job> {
        self.reserved.pop_front().or_else(|| self.jobs.pop_front())
    }

    fn len(&self) -> usize {
        self.jobs.len() + self.reserved.len()
    }
}

struct PoolShared {
    name: String,
    capacity: usize,
    reserved_capacity: usize,
    queue: Mutex<JobQueue>,
    /// Signalled when a job is queued or the pool stops
    available: Condvar,
    /// Signalled when a worker takes a job off the queue
    space: Condvar,
    completed: AtomicU64,
    panicked: AtomicU64,
}

/// Bounded job queue serviced by a fixed number of worker threads
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
    submit_timeout: Duration,
}

impl WorkerPool {
    /// Start `workers` threads named `{name}-worker-{i}`
    pub fn new(name: impl Into<String>, queue_capacity: usize, workers: usize) -> Result<Self> {
        Self::with_reserved_lane(name, queue_capacity, 0, workers)
    }

    /// Like [`WorkerPool::new`], plus `reserved` queue slots that only
    /// [`WorkerPool::submit_reserved`] may use
    pub fn with_reserved_lane(
        name: impl Into<String>,
        queue_capacity: usize,
        reserved: usize,
        workers: usize,
    ) -> Result<Self> {
        let name = name.into();
        let worker_count = workers.max(1);
        let shared = Arc::new(PoolShared {
            name: name.clone(),
            capacity: queue_capacity.max(1),
            reserved_capacity: reserved,
            queue: Mutex::new(JobQueue {
                jobs: VecDeque::with_capacity(queue_capacity.max(1)),
                reserved: VecDeque::with_capacity(reserved),
                stopped: false,
            }),
            available: Condvar::new(),
            space: Condvar::new(),
            completed: AtomicU64::new(0),
            panicked: AtomicU64::new(0),
        });

        let pool = Self {
            shared,
            workers: Mutex::new(Vec::with_capacity(worker_count)),
            worker_count,
            submit_timeout: DEFAULT_SUBMIT_TIMEOUT,
        };

        for index in 0..worker_count {
            let thread_name = format!("{}-worker-{}", name, index);
            let shared = pool.shared.clone();
            let spawned = thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || worker_loop(shared));

            match spawned {
                Ok(handle) => pool.workers.lock().push(handle),
                Err(source) => {
                    // Dropping `pool` stops and joins the workers already running
                    return Err(ActorError::ThreadSpawn {
                        name: thread_name,
                        source,
                    });
                }
            }
        }

        info!(
            pool = %name,
            workers = worker_count,
            capacity = pool.shared.capacity,
            reserved = reserved,
            "Worker pool started"
        );
        Ok(pool)
    }

    /// Override how long `submit_with_result` waits for queue space
    pub fn with_submit_timeout(mut self, timeout: Duration) -> Self {
        self.submit_timeout = timeout;
        self
    }

    /// Queue a job without blocking
    ///
    /// Returns `false` when the queue is full or the pool is stopped.
    pub fn submit<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let mut queue = self.shared.queue.lock();
        if queue.stopped || queue.jobs.len() >= self.shared.capacity {
            return false;
        }
        queue.jobs.push_back(Box::new(job));
        drop(queue);

        self.shared.available.notify_one();
        true
    }

    /// Queue a job in the reserved lane without blocking
    ///
    /// Overflows into the shared queue when the reserved lane is full.
    /// Returns `false` only when both are full or the pool is stopped.
    pub fn submit_reserved<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let mut queue = self.shared.queue.lock();
        if queue.stopped {
            return false;
        }
        if queue.reserved.len() < self.shared.reserved_capacity {
            queue.reserved.push_back(Box::new(job));
        } else if queue.jobs.len() < self.shared.capacity {
            queue.jobs.push_back(Box::new(job));
        } else {
            return false;
        }
        drop(queue);

        self.shared.available.notify_one();
        true
    }

    /// Queue a job and get a handle to its result
    ///
    /// Waits up to the submit timeout for queue space.
    pub fn submit_with_result<F, R>(&self, job: F) -> Result<TaskFuture<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let wrapped: Job = Box::new(move || {
            match panic::catch_unwind(AssertUnwindSafe(job)) {
                Ok(value) => {
                    let _ = sender.send(Ok(value));
                }
                Err(payload) => {
                    let _ = sender.send(Err(panic_message(payload.as_ref())));
                    // Let the worker count it
                    panic::resume_unwind(payload);
                }
            }
        });

        let deadline = Instant::now() + self.submit_timeout;
        let mut queue = self.shared.queue.lock();
        loop {
            if queue.stopped {
                return Err(ActorError::PoolStopped {
                    pool: self.shared.name.clone(),
                });
            }
            if queue.jobs.len() < self.shared.capacity {
                queue.jobs.push_back(wrapped);
                break;
            }
            if self.shared.space.wait_until(&mut queue, deadline).timed_out()
                && queue.jobs.len() >= self.shared.capacity
            {
                return Err(ActorError::PoolTimeout {
                    pool: self.shared.name.clone(),
                    timeout_ms: self.submit_timeout.as_millis() as u64,
                });
            }
        }
        drop(queue);

        self.shared.available.notify_one();
        Ok(TaskFuture { receiver })
    }

    /// Stop accepting jobs, let workers finish the queue, then join them
    ///
    /// Safe to call more than once and from a worker thread; the calling
    /// thread is never joined.
    pub fn stop(&self) {
        {
            let mut queue = self.shared.queue.lock();
            if !queue.stopped {
                queue.stopped = true;
                debug!(pool = %self.shared.name, pending = queue.len(), "Stopping worker pool");
            }
        }
        self.shared.available.notify_all();
        self.shared.space.notify_all();

        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        if handles.is_empty() {
            return;
        }

        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!(pool = %self.shared.name, "Worker thread exited abnormally");
            }
        }

        info!(
            pool = %self.shared.name,
            completed = self.completed_tasks(),
            panicked = self.panicked_tasks(),
            "Worker pool stopped"
        );
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn completed_tasks(&self) -> u64 {
        self.shared.completed.load(Ordering::Relaxed)
    }

    pub fn panicked_tasks(&self) -> u64 {
        self.shared.panicked.load(Ordering::Relaxed)
    }

    /// Jobs queued in either lane but not yet picked up by a worker
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().len()
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn reserved_capacity(&self) -> usize {
        self.shared.reserved_capacity
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.queue.lock().stopped
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(shared: Arc<PoolShared>) {
    loop {
        let job = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(job) = queue.pop() {
                    break job;
                }
                if queue.stopped {
                    return;
                }
                shared.available.wait(&mut queue);
            }
        };
        shared.space.notify_one();

        match panic::catch_unwind(AssertUnwindSafe(job)) {
            Ok(()) => {
                shared.completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(payload) => {
                shared.panicked.fetch_add(1, Ordering::Relaxed);
                warn!(
                    pool = %shared.name,
                    panic = %panic_message(payload.as_ref()),
                    "Job panicked; worker continues"
                );
            }
        }
    }
}

/// Handle to the result of a job queued with `submit_with_result`
#[must_use = "a TaskFuture does nothing unless awaited or waited on"]
pub struct TaskFuture<R> {
    receiver: oneshot::Receiver<std::result::Result<R, String>>,
}

impl<R> TaskFuture<R> {
    /// Block the current thread until the job finishes
    pub fn wait(self) -> Result<R> {
        futures::executor::block_on(self)
    }
}

impl<R> Future for TaskFuture<R> {
    type Output = Result<R>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(Ok(value))) => Poll::Ready(Ok(value)),
            Poll::Ready(Ok(Err(message))) => Poll::Ready(Err(ActorError::TaskPanicked { message })),
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(ActorError::TaskCanceled)),
        }
    }
}
