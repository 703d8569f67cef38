//! Actor System Core
//!
//! Owns the slot table, the name registry, the worker pool that drains
//! mailboxes, and the cleanup thread that applies recovery policies to failed
//! actors.
//!
//! ## Recovery
//!
//! A failing actor pushes its slot onto the cleanup queue. The cleanup thread
//! applies the actor's [`RecoveryPolicy`]:
//! - **Restart**: same slot, same name, generation + 1, subject to the
//!   slot's restart limit. Past the limit the actor is stopped instead.
//! - **Stop**: unregister permanently.
//! - **Replace**: unregister, then spawn a fresh instance with the same
//!   name and mailbox capacity into any free slot.
//! - **Ignore**: leave the failed instance registered; sends to it are
//!   rejected until it is unregistered.
//!
//! ## Drain jobs
//!
//! Drain jobs go to the pool's reserved lane, which holds one entry per slot,
//! so ordinary jobs submitted through [`ActorSystem::pool`] cannot crowd them
//! out. If the pool still refuses one, the actor keeps its drain claim and
//! the cleanup thread resubmits the job until the pool takes it.
//!
//! ## Teardown
//!
//! [`ActorSystem::shutdown`] (also run on drop) stops new spawns and sends,
//! joins the cleanup thread, stops the worker pool after it finishes queued
//! drains, unregisters every slot and flushes the tracer. It runs once.
//!
//! # Lock Ordering
//!
//! When acquiring multiple locks, ALWAYS follow this order:
//! 1. name registry (read or write)
//! 2. slot actor lock (read or write)
//!
//! The cleanup queue lock is never held together with either.

use crate::actor::{Actor, ActorSpec, ActorState, ActorStats};
use crate::error::{ActorError, Result, SendError, TaskError};
use crate::message::{Envelope, Message, Task, SYSTEM_SENDER};
use crate::metrics::{SystemMetrics, SystemStats};
use crate::pool::WorkerPool;
use crate::registry::{ActorHandle, ActorSlot, NameRegistry, SlotState};
use crate::trace::{payload, TraceEventType, Tracer};
use actor_config::{RecoveryPolicy, RuntimeConfig, SystemSettings};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Spawn parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorOptions {
    name: String,
    mailbox_capacity: Option<usize>,
    recovery: Option<RecoveryPolicy>,
    slot: Option<usize>,
}

impl ActorOptions {
    /// Options with the system's default capacity and recovery policy
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mailbox_capacity: None,
            recovery: None,
            slot: None,
        }
    }

    pub fn mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = Some(capacity);
        self
    }

    pub fn recovery(mut self, policy: RecoveryPolicy) -> Self {
        self.recovery = Some(policy);
        self
    }

    /// Spawn into this slot or fail, instead of taking the first free one
    pub fn slot(mut self, slot: usize) -> Self {
        self.slot = Some(slot);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Snapshot of one registered actor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActorInfo {
    pub slot: usize,
    pub name: String,
    pub generation: u64,
    pub state: ActorState,
    pub alive: bool,
    pub mailbox_len: usize,
    pub mailbox_capacity: usize,
    pub recovery: RecoveryPolicy,
    pub stats: ActorStats,
}

impl ActorInfo {
    fn of(actor: &Actor) -> Self {
        Self {
            slot: actor.id(),
            name: actor.name().to_string(),
            generation: actor.generation(),
            state: actor.state(),
            alive: actor.is_alive(),
            mailbox_len: actor.mailbox_len(),
            mailbox_capacity: actor.mailbox_capacity(),
            recovery: actor.recovery(),
            stats: actor.stats(),
        }
    }
}

/// Pause between attempts to resubmit refused drain jobs
const DRAIN_RETRY_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Default)]
struct CleanupQueue {
    /// Failed slots awaiting recovery; `slots.len()` stops the thread
    failed: VecDeque<usize>,
    /// Actors holding a drain claim whose job the pool refused
    deferred: Vec<Weak<Actor>>,
}

enum CleanupWork {
    Recover(usize),
    RetryDrains(Vec<Weak<Actor>>),
}

/// Shared state behind [`ActorSystem`] and [`SystemRef`]
pub(crate) struct SystemCore {
    system_id: String,
    self_ref: Weak<SystemCore>,
    slots: Box<[ActorSlot]>,
    names: NameRegistry,
    pool: WorkerPool,
    cleanup_queue: Mutex<CleanupQueue>,
    cleanup_ready: Condvar,
    tracer: Arc<Tracer>,
    metrics: Arc<SystemMetrics>,
    settings: SystemSettings,
    shutting_down: AtomicBool,
}

impl SystemCore {
    fn new(config: &RuntimeConfig) -> Result<Arc<Self>> {
        let system_id = format!("system-{}", Uuid::new_v4());
        let settings = config.system.clone();

        let pool = WorkerPool::with_reserved_lane(
            "actor-pool",
            config.pool.effective_queue_capacity(settings.max_actors),
            settings.max_actors,
            config.pool.workers,
        )?
        .with_submit_timeout(config.pool.submit_timeout());
        let tracer = Arc::new(Tracer::new(&config.trace)?);

        let slots = (0..settings.max_actors)
            .map(|_| ActorSlot::new(settings.max_restarts, settings.restart_window()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Ok(Arc::new_cyclic(|self_ref| Self {
            system_id,
            self_ref: self_ref.clone(),
            slots,
            names: NameRegistry::default(),
            pool,
            cleanup_queue: Mutex::new(CleanupQueue::default()),
            cleanup_ready: Condvar::new(),
            tracer,
            metrics: Arc::new(SystemMetrics::default()),
            settings,
            shutting_down: AtomicBool::new(false),
        }))
    }

    fn system_ref(&self) -> SystemRef {
        SystemRef {
            core: self.self_ref.clone(),
        }
    }

    fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    fn shutting_down_error(&self) -> ActorError {
        ActorError::ShuttingDown {
            system_id: self.system_id.clone(),
        }
    }

    fn slot(&self, index: usize) -> Result<&ActorSlot> {
        self.slots.get(index).ok_or(ActorError::SlotOutOfRange {
            slot: index,
            capacity: self.slots.len(),
        })
    }

    fn new_actor(&self, index: usize, generation: u64, spec: ActorSpec) -> Arc<Actor> {
        Actor::new(
            index,
            generation,
            spec,
            self.system_ref(),
            self.tracer.clone(),
            self.metrics.clone(),
        )
    }

    fn spawn_with(&self, options: ActorOptions) -> Result<ActorHandle> {
        if self.is_shutting_down() {
            return Err(self.shutting_down_error());
        }
        if options.name.is_empty() {
            return Err(ActorError::EmptyName);
        }

        let capacity = options
            .mailbox_capacity
            .unwrap_or(self.settings.default_mailbox_capacity);
        if capacity == 0 || capacity > self.settings.max_mailbox_capacity {
            return Err(ActorError::InvalidCapacity {
                requested: capacity,
                max: self.settings.max_mailbox_capacity,
            });
        }

        // Cheap early rejection; the authoritative check happens under the write lock
        if self.names.contains(&options.name) {
            return Err(ActorError::NameTaken { name: options.name });
        }

        let spec = ActorSpec {
            name: options.name,
            mailbox_capacity: capacity,
            recovery: options.recovery.unwrap_or(self.settings.default_recovery),
        };

        let index = match options.slot {
            Some(index) => {
                if !self.slot(index)?.try_reserve() {
                    return Err(ActorError::SlotOccupied { slot: index });
                }
                index
            }
            None => self.reserve_free_slot()?,
        };

        let slot = &self.slots[index];
        let name = spec.name.clone();
        let registered = self.names.register_with(&name, index, || {
            // Checked under the registry lock so teardown cannot miss this actor
            if self.is_shutting_down() {
                return Err(self.shutting_down_error());
            }
            let actor = self.new_actor(index, slot.generation(), spec);
            slot.install(actor.clone());
            Ok(actor)
        });

        let actor = match registered {
            Ok(actor) => actor,
            Err(e) => {
                slot.release_reservation();
                return Err(e);
            }
        };

        slot.restarts().reset();
        self.metrics.record_spawn();
        self.tracer
            .record(TraceEventType::Register, index, actor.generation(), payload::NONE);
        info!(
            system_id = %self.system_id,
            actor = %name,
            slot = index,
            generation = actor.generation(),
            mailbox_capacity = actor.mailbox_capacity(),
            recovery = %actor.recovery(),
            "Actor spawned"
        );

        Ok(ActorHandle::new(index, name, actor.generation()))
    }

    fn reserve_free_slot(&self) -> Result<usize> {
        self.slots
            .iter()
            .position(|slot| slot.try_reserve())
            .ok_or(ActorError::RegistryFull {
                capacity: self.slots.len(),
            })
    }

    fn send_to_slot(&self, index: usize, message: Message) -> std::result::Result<(), SendError> {
        if self.is_shutting_down() {
            return Err(SendError::new(self.shutting_down_error(), message));
        }
        let slot = match self.slot(index) {
            Ok(slot) => slot,
            Err(e) => return Err(SendError::new(e, message)),
        };
        let Some(actor) = slot.actor() else {
            self.metrics.record_send(false);
            return Err(SendError::new(ActorError::EmptySlot { slot: index }, message));
        };

        self.deliver(&actor, message)
    }

    /// Push into this exact instance's mailbox
    fn deliver(&self, actor: &Actor, message: Message) -> std::result::Result<(), SendError> {
        let result = actor.add_to_mailbox(message);
        self.metrics.record_send(result.is_ok());
        result
    }

    fn send(&self, receiver: &str, message: Message) -> std::result::Result<(), SendError> {
        if self.is_shutting_down() {
            return Err(SendError::new(self.shutting_down_error(), message));
        }
        match self.names.lookup(receiver) {
            Some(index) => self.send_to_slot(index, message),
            None => {
                self.metrics.record_send(false);
                warn!(
                    system_id = %self.system_id,
                    receiver = %receiver,
                    sender = %message.sender(),
                    "Send to unregistered actor"
                );
                Err(SendError::new(ActorError::unknown_actor(receiver), message))
            }
        }
    }

    fn send_from(
        &self,
        sender: &str,
        receiver: &str,
        task: Task,
        needs_ack: bool,
    ) -> std::result::Result<(), SendError> {
        let actor = self
            .names
            .lookup(sender)
            .and_then(|index| self.slots[index].actor());

        match actor {
            Some(actor) => actor.send(receiver, task, needs_ack),
            None => Err(SendError::new(
                ActorError::unknown_actor(sender),
                Message::new(task, sender, needs_ack),
            )),
        }
    }

    fn send_to_handle(
        &self,
        handle: &ActorHandle,
        message: Message,
    ) -> std::result::Result<(), SendError> {
        if self.is_shutting_down() {
            return Err(SendError::new(self.shutting_down_error(), message));
        }
        let slot = match self.slot(handle.slot()) {
            Ok(slot) => slot,
            Err(e) => return Err(SendError::new(e, message)),
        };

        let current = match slot.actor() {
            // The slot may be restarted after this read; the message still
            // goes to the instance whose generation matched
            Some(actor) if actor.generation() == handle.generation() => {
                return self.deliver(&actor, message);
            }
            Some(actor) => actor.generation(),
            None => slot.generation(),
        };

        if current == handle.generation() {
            // Occupant is being retired or restarted
            self.metrics.record_send(false);
            return Err(SendError::new(
                ActorError::EmptySlot { slot: handle.slot() },
                message,
            ));
        }

        self.metrics.record_send(false);
        self.metrics.record_stale_handle();
        self.tracer.record(
            TraceEventType::Fail,
            handle.slot(),
            handle.generation(),
            payload::STALE_HANDLE,
        );
        warn!(
            actor = %handle.name(),
            slot = handle.slot(),
            expected = handle.generation(),
            current,
            "Rejected send through stale handle"
        );
        Err(SendError::new(
            ActorError::StaleHandle {
                name: handle.name().to_string(),
                slot: handle.slot(),
                expected: handle.generation(),
                current,
            },
            message,
        ))
    }

    fn schedule_drain<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.pool.submit_reserved(job)
    }

    /// Hand a refused drain to the cleanup thread for resubmission
    ///
    /// Returns `false` once shutdown has started or the pool has stopped.
    fn defer_drain(&self, actor: Weak<Actor>) -> bool {
        if self.is_shutting_down() || self.pool.is_stopped() {
            return false;
        }
        self.cleanup_queue.lock().deferred.push(actor);
        self.cleanup_ready.notify_one();
        true
    }

    /// Resubmit deferred drains; returns the ones the pool still refuses
    fn retry_drains(&self, drains: Vec<Weak<Actor>>) -> Vec<Weak<Actor>> {
        let mut refused = Vec::new();
        for weak in drains {
            let Some(actor) = weak.upgrade() else {
                continue;
            };
            if self.pool.is_stopped() {
                actor.abandon_drain();
            } else if !actor.retry_drain() {
                refused.push(weak);
            }
        }
        refused
    }

    /// Mark the slot invalid and queue it for the cleanup thread
    fn notify_actor_failure(&self, index: usize) {
        let Ok(slot) = self.slot(index) else {
            warn!(slot = index, "Failure reported for slot out of range");
            return;
        };
        slot.invalidate();
        self.push_cleanup(index);
    }

    fn push_cleanup(&self, index: usize) {
        self.cleanup_queue.lock().failed.push_back(index);
        self.cleanup_ready.notify_one();
    }

    /// Log a task failure and send a notice to the sender if it asked for one
    fn log_failure(&self, failed_actor: &str, envelope: &Envelope, err: &TaskError) {
        error!(
            component = %failed_actor,
            sender = %envelope.sender(),
            message_age_ms = envelope.created_at().elapsed().as_millis() as u64,
            error = %err,
            "Terminating actor after task failure"
        );

        if !envelope.needs_ack() || envelope.sender() == SYSTEM_SENDER {
            return;
        }
        if !self.names.contains(envelope.sender()) {
            debug!(
                component = %failed_actor,
                sender = %envelope.sender(),
                "Sender gone, failure notice dropped"
            );
            return;
        }

        let failed = failed_actor.to_string();
        let reason = err.to_string();
        let notice = Task::from_fn(move || {
            warn!(component = %failed, error = %reason, "Task failed in receiving actor");
        });
        if let Err(e) = self.send(envelope.sender(), Message::from_system(notice)) {
            debug!(
                component = %failed_actor,
                sender = %envelope.sender(),
                error = %e,
                "Failure notice not delivered"
            );
        }
    }

    fn unregister_actor(&self, index: usize) -> Result<()> {
        let slot = self.slot(index)?;
        let actor = self
            .names
            .with_write(|names| {
                let actor = slot.take_actor()?;
                if names.get(actor.name()) == Some(&index) {
                    names.remove(actor.name());
                }
                Some(actor)
            })
            .ok_or(ActorError::EmptySlot { slot: index })?;

        self.retire(index, actor);
        Ok(())
    }

    fn unregister(&self, name: &str) -> Result<()> {
        let (index, actor) = self
            .names
            .with_write(|names| {
                let index = names.remove(name)?;
                Some((index, self.slots[index].take_actor_if(|a| a.name() == name)))
            })
            .ok_or_else(|| ActorError::unknown_actor(name))?;

        match actor {
            Some(actor) => self.retire(index, actor),
            // A restart in progress sees the name gone and gives the slot back
            None => debug!(actor = %name, slot = index, "Unregistered actor with no live instance"),
        }
        Ok(())
    }

    /// Stop a taken actor and free its slot
    fn retire(&self, index: usize, actor: Arc<Actor>) {
        actor.stop();
        let generation = self.slots[index].vacate();

        self.metrics.record_unregister();
        self.tracer
            .record(TraceEventType::Unregister, index, actor.generation(), payload::NONE);
        info!(
            system_id = %self.system_id,
            actor = %actor.name(),
            slot = index,
            generation = actor.generation(),
            next_generation = generation,
            dropped_messages = actor.mailbox_len(),
            "Actor unregistered"
        );
    }

    /// Apply the failed actor's recovery policy
    fn recover(&self, index: usize) {
        let slot = &self.slots[index];
        let Some(actor) = slot.actor() else {
            debug!(slot = index, "Nothing to recover, slot already emptied");
            return;
        };
        if actor.state() != ActorState::Failed {
            return;
        }

        let mut policy = actor.recovery();
        if policy == RecoveryPolicy::Restart && !slot.restarts().should_restart() {
            warn!(
                actor = %actor.name(),
                slot = index,
                restarts = slot.restarts().restarts(),
                max_restarts = self.settings.max_restarts,
                "Restart limit reached, stopping actor"
            );
            self.metrics.record_actor_restart(false);
            self.tracer.record(
                TraceEventType::Fail,
                index,
                actor.generation(),
                payload::RESTART_LIMIT,
            );
            policy = RecoveryPolicy::Stop;
        }
        drop(actor);

        match policy {
            RecoveryPolicy::Ignore => {
                info!(slot = index, "Failed actor left registered");
            }
            RecoveryPolicy::Restart => self.restart_in_place(index),
            RecoveryPolicy::Stop => {
                self.remove_failed(index);
            }
            RecoveryPolicy::Replace => {
                if let Some(spec) = self.remove_failed(index) {
                    self.replace(spec);
                }
            }
        }
    }

    /// Unregister the failed occupant of `index`; returns its spawn parameters
    fn remove_failed(&self, index: usize) -> Option<ActorSpec> {
        let slot = &self.slots[index];
        let actor = self.names.with_write(|names| {
            let actor = slot.take_actor_if(|a| a.state() == ActorState::Failed)?;
            if names.get(actor.name()) == Some(&index) {
                names.remove(actor.name());
            }
            Some(actor)
        })?;

        let spec = actor.spec().clone();
        self.retire(index, actor);
        Some(spec)
    }

    fn restart_in_place(&self, index: usize) {
        let slot = &self.slots[index];
        let Some(old) = slot.take_actor_if(|a| a.state() == ActorState::Failed) else {
            return;
        };
        // We own the retirement now; keep spawns off the slot until reinstalled
        slot.try_reclaim();

        old.stop();
        let generation = slot.retire();
        let spec = old.spec().clone();
        let old_generation = old.generation();
        let dropped = old.mailbox_len();
        drop(old);

        let installed = self.names.with_write(|names| {
            if self.is_shutting_down() || names.get(&spec.name) != Some(&index) {
                return None;
            }
            let actor = self.new_actor(index, generation, spec.clone());
            slot.install(actor.clone());
            Some(actor)
        });

        match installed {
            Some(actor) => {
                self.metrics.record_actor_restart(true);
                self.tracer
                    .record(TraceEventType::Restart, index, generation, payload::NONE);
                info!(
                    system_id = %self.system_id,
                    actor = %actor.name(),
                    slot = index,
                    old_generation,
                    generation,
                    dropped_messages = dropped,
                    "Actor restarted"
                );
            }
            None => {
                slot.release_reservation();
                self.metrics.record_actor_restart(false);
                self.metrics.record_unregister();
                self.tracer
                    .record(TraceEventType::Unregister, index, old_generation, payload::NONE);
                info!(actor = %spec.name, slot = index, "Restart abandoned, actor unregistered");
            }
        }
    }

    fn replace(&self, spec: ActorSpec) {
        let options = ActorOptions::new(spec.name.clone())
            .mailbox_capacity(spec.mailbox_capacity)
            .recovery(spec.recovery);

        match self.spawn_with(options) {
            Ok(handle) => {
                self.metrics.record_replace();
                info!(actor = %spec.name, slot = handle.slot(), generation = handle.generation(), "Actor replaced");
            }
            Err(e) => {
                warn!(actor = %spec.name, error = %e, "Replacement spawn failed");
            }
        }
    }

    fn handle_of(&self, name: &str) -> Result<ActorHandle> {
        let index = self
            .names
            .lookup(name)
            .ok_or_else(|| ActorError::unknown_actor(name))?;
        let actor = self.slots[index]
            .actor()
            .ok_or(ActorError::EmptySlot { slot: index })?;
        Ok(ActorHandle::new(index, actor.name(), actor.generation()))
    }
}

fn run_cleanup(core: Arc<SystemCore>) {
    let sentinel = core.slots.len();
    let mut backoff = false;
    loop {
        let work = {
            let mut queue = core.cleanup_queue.lock();
            loop {
                if let Some(index) = queue.failed.pop_front() {
                    break CleanupWork::Recover(index);
                }
                if !queue.deferred.is_empty() {
                    if !backoff {
                        break CleanupWork::RetryDrains(mem::take(&mut queue.deferred));
                    }
                    backoff = false;
                    core.cleanup_ready.wait_for(&mut queue, DRAIN_RETRY_INTERVAL);
                    continue;
                }
                core.cleanup_ready.wait(&mut queue);
            }
        };

        match work {
            CleanupWork::Recover(index) if index == sentinel => {
                // Last chance before the pool stops and runs what it holds
                let deferred = mem::take(&mut core.cleanup_queue.lock().deferred);
                for weak in core.retry_drains(deferred) {
                    if let Some(actor) = weak.upgrade() {
                        actor.abandon_drain();
                    }
                }
                debug!(system_id = %core.system_id, "Cleanup thread exiting");
                break;
            }
            CleanupWork::Recover(index) => {
                if core.is_shutting_down() {
                    // Teardown unregisters every slot
                    continue;
                }
                core.recover(index);
            }
            CleanupWork::RetryDrains(drains) => {
                let refused = core.retry_drains(drains);
                backoff = !refused.is_empty();
                if backoff {
                    core.cleanup_queue.lock().deferred.extend(refused);
                }
            }
        }
    }
}

/// Non-owning reference to an actor system
///
/// Tasks capture this to message other actors without keeping the system
/// alive. Every call fails with `SystemDropped` once the system is gone.
#[derive(Clone)]
pub struct SystemRef {
    core: Weak<SystemCore>,
}

impl SystemRef {
    fn upgrade(&self) -> Option<Arc<SystemCore>> {
        self.core.upgrade()
    }

    /// Whether the system still exists and is not shutting down
    pub fn is_alive(&self) -> bool {
        self.upgrade().is_some_and(|core| !core.is_shutting_down())
    }

    pub fn send(&self, receiver: &str, message: Message) -> std::result::Result<(), SendError> {
        match self.upgrade() {
            Some(core) => core.send(receiver, message),
            None => Err(SendError::new(ActorError::SystemDropped, message)),
        }
    }

    /// Send a system-originated task by receiver name
    pub fn send_task(&self, receiver: &str, task: Task) -> std::result::Result<(), SendError> {
        self.send(receiver, Message::from_system(task))
    }

    pub fn send_from(
        &self,
        sender: &str,
        receiver: &str,
        task: Task,
        needs_ack: bool,
    ) -> std::result::Result<(), SendError> {
        match self.upgrade() {
            Some(core) => core.send_from(sender, receiver, task, needs_ack),
            None => Err(SendError::new(
                ActorError::SystemDropped,
                Message::new(task, sender, needs_ack),
            )),
        }
    }

    pub fn send_to_handle(
        &self,
        handle: &ActorHandle,
        message: Message,
    ) -> std::result::Result<(), SendError> {
        match self.upgrade() {
            Some(core) => core.send_to_handle(handle, message),
            None => Err(SendError::new(ActorError::SystemDropped, message)),
        }
    }

    pub fn spawn_with(&self, options: ActorOptions) -> Result<ActorHandle> {
        self.upgrade()
            .ok_or(ActorError::SystemDropped)?
            .spawn_with(options)
    }

    pub fn unregister(&self, name: &str) -> Result<()> {
        self.upgrade()
            .ok_or(ActorError::SystemDropped)?
            .unregister(name)
    }

    pub fn handle_of(&self, name: &str) -> Result<ActorHandle> {
        self.upgrade()
            .ok_or(ActorError::SystemDropped)?
            .handle_of(name)
    }

    pub(crate) fn schedule_drain<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.upgrade().is_some_and(|core| core.schedule_drain(job))
    }

    pub(crate) fn defer_drain(&self, actor: Weak<Actor>) -> bool {
        self.upgrade().is_some_and(|core| core.defer_drain(actor))
    }

    /// Failure path of a drain: queue the slot for recovery, then log
    pub(crate) fn report_failure(&self, actor: &Actor, envelope: &Envelope, err: &TaskError) {
        if let Some(core) = self.upgrade() {
            core.notify_actor_failure(actor.id());
            core.log_failure(actor.name(), envelope, err);
        }
    }
}

impl fmt::Debug for SystemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(core) => write!(f, "SystemRef({})", core.system_id),
            None => f.write_str("SystemRef(<dropped>)"),
        }
    }
}

/// Fixed-capacity actor runtime
pub struct ActorSystem {
    core: Arc<SystemCore>,
    cleanup: Mutex<Option<JoinHandle<()>>>,
}

impl ActorSystem {
    /// Create a system with `max_actors` slots and default settings
    pub fn new(max_actors: usize) -> Result<Self> {
        let mut config = RuntimeConfig::default();
        config.system.max_actors = max_actors;
        Self::with_config(&config)
    }

    /// Create a system from a full runtime configuration
    pub fn with_config(config: &RuntimeConfig) -> Result<Self> {
        config.validate().map_err(|e| ActorError::InvalidConfig {
            reason: e.to_string(),
        })?;

        let core = SystemCore::new(config)?;
        let cleanup_core = core.clone();
        let cleanup = thread::Builder::new()
            .name("actor-cleanup".to_string())
            .spawn(move || run_cleanup(cleanup_core))
            .map_err(|source| ActorError::ThreadSpawn {
                name: "actor-cleanup".to_string(),
                source,
            })?;

        info!(
            system_id = %core.system_id,
            max_actors = core.slots.len(),
            workers = core.pool.worker_count(),
            pool_capacity = core.pool.capacity(),
            reserved_drains = core.pool.reserved_capacity(),
            tracing = core.tracer.is_enabled(),
            "Actor system started"
        );

        Ok(Self {
            core,
            cleanup: Mutex::new(Some(cleanup)),
        })
    }

    /// Spawn an actor into the first free slot
    pub fn spawn(&self, mailbox_capacity: usize, name: impl Into<String>) -> Result<ActorHandle> {
        self.core
            .spawn_with(ActorOptions::new(name).mailbox_capacity(mailbox_capacity))
    }

    pub fn spawn_with(&self, options: ActorOptions) -> Result<ActorHandle> {
        self.core.spawn_with(options)
    }

    /// Spawn an actor into a specific free slot
    pub fn spawn_at(
        &self,
        slot: usize,
        mailbox_capacity: usize,
        name: impl Into<String>,
    ) -> Result<ActorHandle> {
        self.core.spawn_with(
            ActorOptions::new(name)
                .mailbox_capacity(mailbox_capacity)
                .slot(slot),
        )
    }

    pub fn send_to_slot(&self, slot: usize, message: Message) -> std::result::Result<(), SendError> {
        self.core.send_to_slot(slot, message)
    }

    pub fn send(&self, receiver: &str, message: Message) -> std::result::Result<(), SendError> {
        self.core.send(receiver, message)
    }

    /// Send a task on behalf of the actor named `sender`
    pub fn send_from(
        &self,
        sender: &str,
        receiver: &str,
        task: Task,
        needs_ack: bool,
    ) -> std::result::Result<(), SendError> {
        self.core.send_from(sender, receiver, task, needs_ack)
    }

    /// Send a system-originated task by receiver name
    pub fn send_task(&self, receiver: &str, task: Task) -> std::result::Result<(), SendError> {
        self.core.send(receiver, Message::from_system(task))
    }

    /// Send only if the handle's generation is still the slot's occupant
    pub fn send_to_handle(
        &self,
        handle: &ActorHandle,
        message: Message,
    ) -> std::result::Result<(), SendError> {
        self.core.send_to_handle(handle, message)
    }

    /// Mark a slot failed and queue it for recovery
    pub fn notify_actor_failure(&self, slot: usize) {
        self.core.notify_actor_failure(slot);
    }

    pub fn log_failure(&self, failed_actor: &str, envelope: &Envelope, err: &TaskError) {
        self.core.log_failure(failed_actor, envelope, err);
    }

    /// Remove the actor at `slot`, waiting for its in-flight drain
    pub fn unregister_actor(&self, slot: usize) -> Result<()> {
        self.core.unregister_actor(slot)
    }

    pub fn unregister(&self, name: &str) -> Result<()> {
        self.core.unregister(name)
    }

    pub fn handle_of(&self, name: &str) -> Result<ActorHandle> {
        self.core.handle_of(name)
    }

    pub fn actor_info(&self, name: &str) -> Result<ActorInfo> {
        let index = self
            .core
            .names
            .lookup(name)
            .ok_or_else(|| ActorError::unknown_actor(name))?;
        let actor = self.core.slots[index]
            .actor()
            .ok_or(ActorError::EmptySlot { slot: index })?;
        Ok(ActorInfo::of(&actor))
    }

    /// Current occupant of a slot, if any
    pub fn actor_at(&self, slot: usize) -> Option<Arc<Actor>> {
        self.core.slots.get(slot).and_then(|s| s.actor())
    }

    pub fn slot_state(&self, slot: usize) -> Result<SlotState> {
        Ok(self.core.slot(slot)?.state())
    }

    /// Generation of the slot's current or next occupant
    pub fn generation(&self, slot: usize) -> Result<u64> {
        Ok(self.core.slot(slot)?.generation())
    }

    /// Actors currently accepting messages
    pub fn active_actors(&self) -> usize {
        self.core
            .slots
            .iter()
            .filter(|slot| slot.is_valid() && slot.actor().is_some_and(|a| a.is_alive()))
            .count()
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        self.core.names.names()
    }

    pub fn capacity(&self) -> usize {
        self.core.slots.len()
    }

    pub fn system_id(&self) -> &str {
        &self.core.system_id
    }

    pub fn metrics(&self) -> SystemStats {
        self.core.metrics.snapshot()
    }

    pub fn tracer(&self) -> Arc<Tracer> {
        self.core.tracer.clone()
    }

    /// Worker pool draining mailboxes; also accepts plain jobs
    ///
    /// Plain jobs share the pool's threads but not its reserved drain lane.
    pub fn pool(&self) -> &WorkerPool {
        &self.core.pool
    }

    pub fn system_ref(&self) -> SystemRef {
        self.core.system_ref()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.core.is_shutting_down()
    }

    /// Tear the system down; later calls return immediately
    pub fn shutdown(&self) {
        let core = &self.core;
        if core.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(system_id = %core.system_id, "Shutting down actor system");
        core.tracer
            .record(TraceEventType::StopSystem, 0, 0, payload::NONE);

        // Spawns already holding the registry lock finish before slots are swept
        core.names.with_write(|_| ());

        core.push_cleanup(core.slots.len());
        if let Some(handle) = self.cleanup.lock().take() {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                error!(system_id = %core.system_id, "Cleanup thread panicked");
            }
        }

        core.pool.stop();

        for index in 0..core.slots.len() {
            // Empty slots report EmptySlot
            let _ = core.unregister_actor(index);
        }

        let stats = core.metrics.snapshot();
        info!(
            system_id = %core.system_id,
            actors_spawned = stats.actors_spawned,
            messages_processed = stats.messages_processed,
            task_failures = stats.task_failures,
            actor_restarts = stats.actor_restarts,
            "Actor system stopped"
        );
        core.tracer.shutdown();
    }
}

impl Drop for ActorSystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for ActorSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorSystem")
            .field("system_id", &self.core.system_id)
            .field("capacity", &self.core.slots.len())
            .field("registered", &self.core.names.len())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}
