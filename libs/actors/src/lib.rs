//! Fixed-Capacity Actor Runtime
//!
//! In-process actors with bounded lock-free mailboxes, drained on demand by a
//! shared worker pool instead of one thread per actor.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 ActorSystem                  │
//! │                                              │
//! │  names ──► slots[0..N] ──► Actor             │
//! │            (generation)    └─ mailbox (MPMC) │
//! │                                              │
//! │  send ──► push ──► drain job ──► WorkerPool  │
//! │                                              │
//! │  task fault ──► cleanup queue ──► cleanup    │
//! │                 thread (restart/stop/...)    │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! - A push into an idle actor's mailbox schedules exactly one drain job.
//! - A task that returns an error or panics fails only its own actor; the
//!   system then applies the actor's [`RecoveryPolicy`].
//! - Slots are reused. Each reuse bumps the slot generation, and sends
//!   through an [`ActorHandle`] of an earlier generation are rejected.
//!
//! # Examples
//!
//! ```rust
//! use actor_runtime::{ActorSystem, Task};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let system = ActorSystem::new(4).unwrap();
//! system.spawn(8, "counter").unwrap();
//!
//! let count = Arc::new(AtomicUsize::new(0));
//! let c = count.clone();
//! system
//!     .send_task("counter", Task::from_fn(move || {
//!         c.fetch_add(1, Ordering::SeqCst);
//!     }))
//!     .unwrap();
//!
//! system.shutdown();
//! assert_eq!(count.load(Ordering::SeqCst), 1);
//! ```

pub mod actor;
pub mod error;
pub mod message;
pub mod metrics;
pub mod pool;
pub mod queue;
pub mod registry;
pub mod system;
pub mod trace;

pub use actor::{Actor, ActorState, ActorStats};
pub use error::{ActorError, Result, SendError, TaskError, TaskResult};
pub use message::{Envelope, Message, Task, SYSTEM_SENDER};
pub use metrics::{SystemMetrics, SystemStats};
pub use pool::{TaskFuture, WorkerPool};
pub use queue::BoundedMpmcQueue;
pub use registry::{ActorHandle, RestartTracker, SlotState};
pub use system::{ActorInfo, ActorOptions, ActorSystem, SystemRef};
pub use trace::{TraceEvent, TraceEventType, Tracer};

pub use actor_config::{RecoveryPolicy, RuntimeConfig};
