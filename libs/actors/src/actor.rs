//! Actor
//!
//! A named unit of state owning one bounded mailbox. Actors have no thread of
//! their own: a successful push claims the actor's `draining` flag and asks
//! the system's worker pool to run one drain job, which executes queued tasks
//! in FIFO order until the mailbox is empty or the actor fails.
//!
//! # Drain claim
//!
//! At most one drain job exists per actor. The claim is taken by CAS on
//! `draining` and released by the drain job when the mailbox looks empty. A
//! push that lands between the last pop and the release is picked up by the
//! re-check after the release, which schedules a fresh job instead of
//! draining inline. If the pool refuses the job the actor keeps the claim and
//! the system's cleanup thread resubmits it; the claim is only dropped when
//! the pool has stopped, since the actor is then being torn down.
//!
//! # States
//!
//! `Created -> Running -> {Stopping -> Stopped | Failed}`. Only `Running`
//! accepts messages. The `Running -> Failed` transition is a CAS, so exactly
//! one thread reports a failure to the system.

use crate::error::{ActorError, SendError, TaskError};
use crate::message::{Envelope, Message, Task};
use crate::metrics::SystemMetrics;
use crate::queue::BoundedMpmcQueue;
use crate::system::SystemRef;
use crate::trace::{payload, TraceEventType, Tracer};
use actor_config::RecoveryPolicy;
use crossbeam_utils::Backoff;
use serde::Serialize;
use std::cell::Cell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Lifecycle state of one actor instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum ActorState {
    Created = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
    Failed = 4,
}

impl ActorState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ActorState::Created,
            1 => ActorState::Running,
            2 => ActorState::Stopping,
            3 => ActorState::Stopped,
            _ => ActorState::Failed,
        }
    }

    /// `Stopped` and `Failed` are final for an instance
    pub fn is_terminal(&self) -> bool {
        matches!(self, ActorState::Stopped | ActorState::Failed)
    }
}

impl fmt::Display for ActorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActorState::Created => "created",
            ActorState::Running => "running",
            ActorState::Stopping => "stopping",
            ActorState::Stopped => "stopped",
            ActorState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Per-actor message counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ActorStats {
    pub enqueued: u64,
    /// Rejected because the mailbox was full or the actor not alive
    pub rejected: u64,
    pub executed: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
struct ActorCounters {
    enqueued: AtomicU64,
    rejected: AtomicU64,
    executed: AtomicU64,
    failed: AtomicU64,
}

thread_local! {
    /// Address of the actor whose drain runs on this thread, or 0
    static CURRENT_DRAIN: Cell<usize> = const { Cell::new(0) };
}

struct DrainScope {
    previous: usize,
}

impl DrainScope {
    fn enter(actor: &Actor) -> Self {
        let previous = CURRENT_DRAIN.with(|current| current.replace(actor.address()));
        Self { previous }
    }

    fn is_current(actor: &Actor) -> bool {
        CURRENT_DRAIN.with(|current| current.get() == actor.address())
    }
}

impl Drop for DrainScope {
    fn drop(&mut self) {
        CURRENT_DRAIN.with(|current| current.set(self.previous));
    }
}

/// Parameters an actor was spawned with, reused by restart and replace
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ActorSpec {
    pub name: String,
    pub mailbox_capacity: usize,
    pub recovery: RecoveryPolicy,
}

pub struct Actor {
    id: usize,
    generation: u64,
    spec: ActorSpec,
    mailbox: BoundedMpmcQueue<Message>,
    state: AtomicU8,
    alive: AtomicBool,
    /// Drain claim: a drain job is scheduled or running
    draining: AtomicBool,
    /// A drain job is past its entry point
    in_drain: AtomicBool,
    counters: ActorCounters,
    system: SystemRef,
    self_ref: Weak<Actor>,
    tracer: Arc<Tracer>,
    metrics: Arc<SystemMetrics>,
}

impl Actor {
    pub(crate) fn new(
        id: usize,
        generation: u64,
        spec: ActorSpec,
        system: SystemRef,
        tracer: Arc<Tracer>,
        metrics: Arc<SystemMetrics>,
    ) -> Arc<Self> {
        let actor = Arc::new_cyclic(|self_ref| Self {
            id,
            generation,
            mailbox: BoundedMpmcQueue::new(spec.mailbox_capacity),
            spec,
            state: AtomicU8::new(ActorState::Created as u8),
            alive: AtomicBool::new(false),
            draining: AtomicBool::new(false),
            in_drain: AtomicBool::new(false),
            counters: ActorCounters::default(),
            system,
            self_ref: self_ref.clone(),
            tracer,
            metrics,
        });

        actor.state.store(ActorState::Running as u8, Ordering::Release);
        actor.alive.store(true, Ordering::SeqCst);
        actor
    }

    /// Slot index; stable for the lifetime of this instance
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn recovery(&self) -> RecoveryPolicy {
        self.spec.recovery
    }

    pub(crate) fn spec(&self) -> &ActorSpec {
        &self.spec
    }

    pub fn state(&self) -> ActorState {
        ActorState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    pub fn mailbox_len(&self) -> usize {
        self.mailbox.len()
    }

    pub fn mailbox_capacity(&self) -> usize {
        self.mailbox.capacity()
    }

    pub fn executed_tasks(&self) -> u64 {
        self.counters.executed.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> ActorStats {
        ActorStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            executed: self.counters.executed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Enqueue a message and make sure a drain is scheduled
    ///
    /// Never waits for space: a full mailbox is backpressure and the message
    /// is handed back inside the error.
    pub fn add_to_mailbox(&self, message: Message) -> Result<(), SendError> {
        if !self.is_alive() {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(SendError::new(ActorError::not_alive(self.name()), message));
        }

        match self.mailbox.try_push(message) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                self.trace(TraceEventType::Enqueue, payload::NONE);
                self.schedule_drain();
                Ok(())
            }
            Err(message) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                self.metrics.record_mailbox_full();
                self.trace(TraceEventType::Fail, payload::MAILBOX_FULL);
                debug!(
                    actor = %self.name(),
                    capacity = self.mailbox.capacity(),
                    "Mailbox full, message rejected"
                );
                // A full mailbox should already have a drain pending
                self.schedule_drain();
                Err(SendError::new(
                    ActorError::mailbox_full(self.name(), self.mailbox.capacity()),
                    message,
                ))
            }
        }
    }

    /// Send a task to another actor by name, tagged with this actor as sender
    ///
    /// A stopped or failed actor cannot send.
    pub fn send(&self, receiver: &str, task: Task, needs_ack: bool) -> Result<(), SendError> {
        let message = Message::new(task, self.spec.name.clone(), needs_ack);
        if !self.is_alive() {
            return Err(SendError::new(ActorError::not_alive(self.name()), message));
        }
        self.system.send(receiver, message)
    }

    /// Execute queued messages until the mailbox is empty or the actor fails
    ///
    /// Runs on a worker thread while holding the drain claim.
    pub fn drain_mailbox(&self) {
        let _scope = DrainScope::enter(self);
        self.in_drain.store(true, Ordering::SeqCst);
        self.trace(TraceEventType::DrainStart, payload::NONE);

        while self.is_alive() {
            let Some(message) = self.mailbox.try_pop() else {
                break;
            };
            self.trace(TraceEventType::Dequeue, payload::NONE);

            let (task, envelope) = message.into_parts();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| task.run()))
                .unwrap_or_else(|cause| Err(TaskError::from_panic(cause)));

            match outcome {
                Ok(()) => {
                    self.counters.executed.fetch_add(1, Ordering::Relaxed);
                    self.metrics.record_message_processed();
                }
                Err(err) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    self.metrics.record_task_failure();
                    self.fail(&envelope, err);
                    break;
                }
            }
        }

        self.trace(TraceEventType::DrainEnd, payload::NONE);
        self.in_drain.store(false, Ordering::SeqCst);
        self.draining.store(false, Ordering::SeqCst);

        // A push may have landed after the last pop but before the release
        if self.is_alive()
            && !self.mailbox.is_empty()
            && self
                .draining
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            self.submit_drain();
        }
    }

    /// Stop accepting messages and wait for an in-flight drain to finish
    ///
    /// Messages still queued are dropped with the actor. Called from one of
    /// this actor's own tasks it returns without waiting.
    pub fn stop(&self) {
        self.alive.store(false, Ordering::SeqCst);
        let stopping = self
            .state
            .compare_exchange(
                ActorState::Running as u8,
                ActorState::Stopping as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();

        if !DrainScope::is_current(self) {
            let backoff = Backoff::new();
            while self.in_drain.load(Ordering::SeqCst) {
                backoff.snooze();
            }
        }

        if stopping {
            self.state.store(ActorState::Stopped as u8, Ordering::Release);
        }
        debug!(
            actor = %self.name(),
            slot = self.id,
            generation = self.generation,
            state = %self.state(),
            "Actor stopped"
        );
    }

    fn schedule_drain(&self) {
        if self
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.submit_drain();
        }
    }

    /// Hand a drain job to the pool; caller holds the drain claim
    fn submit_drain(&self) {
        let accepted = self.system.schedule_drain(self.drain_job());
        self.metrics.record_drain_scheduled(accepted);
        if accepted {
            return;
        }

        self.trace(TraceEventType::Fail, payload::DRAIN_REFUSED);
        if self.system.defer_drain(self.self_ref.clone()) {
            warn!(
                actor = %self.name(),
                pending = self.mailbox.len(),
                "Worker pool refused drain job; cleanup thread will resubmit it"
            );
        } else {
            self.abandon_drain();
        }
    }

    /// Resubmit a refused drain job; caller holds the drain claim
    ///
    /// Returns `false` while the pool keeps refusing. A dead actor has nothing
    /// left to drain and just drops the claim.
    pub(crate) fn retry_drain(&self) -> bool {
        if !self.is_alive() {
            self.draining.store(false, Ordering::SeqCst);
            return true;
        }
        let accepted = self.system.schedule_drain(self.drain_job());
        if accepted {
            self.metrics.record_drain_scheduled(true);
            debug!(actor = %self.name(), "Deferred drain job accepted");
        }
        accepted
    }

    /// Drop the drain claim without draining; only used once the pool is gone
    pub(crate) fn abandon_drain(&self) {
        self.draining.store(false, Ordering::SeqCst);
        warn!(
            actor = %self.name(),
            pending = self.mailbox.len(),
            "Worker pool stopped; queued messages are dropped with the actor"
        );
    }

    fn drain_job(&self) -> impl FnOnce() + Send + 'static {
        let actor = self.self_ref.clone();
        move || {
            if let Some(actor) = actor.upgrade() {
                actor.drain_mailbox();
            }
        }
    }

    fn fail(&self, envelope: &Envelope, err: TaskError) {
        let won = self
            .state
            .compare_exchange(
                ActorState::Running as u8,
                ActorState::Failed as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if !won {
            return;
        }

        self.alive.store(false, Ordering::SeqCst);
        self.trace(TraceEventType::Fail, payload::TASK_FAULT);
        self.system.report_failure(self, envelope, &err);
    }

    fn trace(&self, event: TraceEventType, payload: u32) {
        self.tracer.record(event, self.id, self.generation, payload);
    }

    fn address(&self) -> usize {
        self as *const Actor as usize
    }
}

impl fmt::Debug for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Actor")
            .field("id", &self.id)
            .field("name", &self.spec.name)
            .field("generation", &self.generation)
            .field("state", &self.state())
            .field("mailbox", &self.mailbox)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::ActorSystem;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        condition()
    }

    #[test]
    fn test_state_round_trip() {
        for state in [
            ActorState::Created,
            ActorState::Running,
            ActorState::Stopping,
            ActorState::Stopped,
            ActorState::Failed,
        ] {
            assert_eq!(ActorState::from_u8(state as u8), state);
        }
        assert!(ActorState::Failed.is_terminal());
        assert!(!ActorState::Running.is_terminal());
    }

    #[test]
    fn test_spawned_actor_is_running() {
        let system = ActorSystem::new(4).unwrap();
        let handle = system.spawn(8, "worker").unwrap();
        let actor = system.actor_at(handle.slot()).unwrap();

        assert_eq!(actor.state(), ActorState::Running);
        assert!(actor.is_alive());
        assert_eq!(actor.mailbox_capacity(), 8);
        assert_eq!(actor.name(), "worker");
    }

    #[test]
    fn test_stop_rejects_further_messages() {
        let system = ActorSystem::new(4).unwrap();
        let handle = system.spawn(8, "worker").unwrap();
        let actor = system.actor_at(handle.slot()).unwrap();

        actor.stop();
        assert_eq!(actor.state(), ActorState::Stopped);

        let err = actor
            .add_to_mailbox(Message::from_system(Task::from_fn(|| {})))
            .unwrap_err();
        assert!(matches!(err.error(), ActorError::ActorNotAlive { .. }));
        assert_eq!(actor.stats().rejected, 1);
    }

    #[test]
    fn test_stopped_actor_cannot_send() {
        let system = ActorSystem::new(4).unwrap();
        let sender = system.spawn(8, "sender").unwrap();
        let receiver = system.spawn(8, "receiver").unwrap();
        let actor = system.actor_at(sender.slot()).unwrap();

        actor.stop();
        let err = actor
            .send("receiver", Task::from_fn(|| {}), false)
            .unwrap_err();
        assert!(matches!(err.error(), ActorError::ActorNotAlive { ref actor } if actor == "sender"));
        assert_eq!(err.into_message().sender(), "sender");

        let target = system.actor_at(receiver.slot()).unwrap();
        assert_eq!(target.stats().enqueued, 0);
        assert_eq!(system.metrics().messages_sent, 0);
    }

    #[test]
    fn test_panicking_task_fails_actor() {
        let system = ActorSystem::new(4).unwrap();
        let handle = system.spawn(8, "fragile").unwrap();
        let actor = system.actor_at(handle.slot()).unwrap();

        actor
            .add_to_mailbox(Message::from_system(Task::from_fn(|| panic!("bad state"))))
            .unwrap();

        assert!(wait_until(Duration::from_secs(5), || actor.state() == ActorState::Failed));
        assert!(!actor.is_alive());
        assert_eq!(actor.stats().failed, 1);
    }

    #[test]
    fn test_stop_from_own_task_does_not_wait() {
        let system = ActorSystem::new(4).unwrap();
        let handle = system.spawn(8, "self-stopper").unwrap();
        let actor = system.actor_at(handle.slot()).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));

        let inner = Arc::downgrade(&actor);
        let r = ran.clone();
        actor
            .add_to_mailbox(Message::from_system(Task::from_fn(move || {
                if let Some(actor) = inner.upgrade() {
                    actor.stop();
                }
                r.fetch_add(1, Ordering::SeqCst);
            })))
            .unwrap();

        assert!(wait_until(Duration::from_secs(5), || ran.load(Ordering::SeqCst) == 1));
        assert!(wait_until(Duration::from_secs(5), || !actor.is_draining()));
        assert_eq!(actor.state(), ActorState::Stopped);
    }
}
