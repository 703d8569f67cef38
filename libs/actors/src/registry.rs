//! Actor Registry
//!
//! Fixed slot table and name index used by the actor system.
//!
//! Each [`ActorSlot`] is claimed with a CAS on its own state
//! (`Free -> Reserved -> Occupied`), so concurrent spawns never hand out the
//! same slot and a losing spawn only releases the slot it reserved. The
//! generation counter is bumped whenever a slot is vacated; an
//! [`ActorHandle`] records the generation it was issued for.

use crate::actor::Actor;
use crate::error::{ActorError, Result};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Claim state of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SlotState {
    Free = 0,
    /// Claimed by a spawn or restart that has not installed its actor yet
    Reserved = 1,
    Occupied = 2,
}

impl SlotState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SlotState::Free,
            1 => SlotState::Reserved,
            _ => SlotState::Occupied,
        }
    }
}

/// Reference to an actor as spawned: slot, name and generation
///
/// Carries no ownership. Once the slot is vacated the handle is stale and
/// generation-checked sends through it are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ActorHandle {
    slot: usize,
    name: String,
    generation: u64,
}

impl ActorHandle {
    pub(crate) fn new(slot: usize, name: impl Into<String>, generation: u64) -> Self {
        Self {
            slot,
            name: name.into(),
            generation,
        }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl fmt::Display for ActorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}#{}", self.name, self.slot, self.generation)
    }
}

/// Bounds how often a slot may be restarted
///
/// Allows `max_restarts` restarts inside a window that opens at the first
/// restart; once the window expires the count starts over.
#[derive(Debug)]
pub struct RestartTracker {
    max_restarts: u32,
    window: Duration,
    restart_count: AtomicU32,
    window_start: Mutex<Option<Instant>>,
}

impl RestartTracker {
    pub fn new(max_restarts: u32, window: Duration) -> Self {
        Self {
            max_restarts,
            window,
            restart_count: AtomicU32::new(0),
            window_start: Mutex::new(None),
        }
    }

    /// Count a restart attempt; `false` once the limit for the window is spent
    pub fn should_restart(&self) -> bool {
        let now = Instant::now();
        let mut window_start = self.window_start.lock();

        match *window_start {
            Some(start) if now.duration_since(start) <= self.window => {
                let count = self.restart_count.fetch_add(1, Ordering::Relaxed) + 1;
                count <= self.max_restarts
            }
            _ => {
                // First restart, or the previous window expired
                *window_start = Some(now);
                self.restart_count.store(1, Ordering::Relaxed);
                self.max_restarts >= 1
            }
        }
    }

    /// Restarts counted in the current window
    pub fn restarts(&self) -> u32 {
        self.restart_count.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        *self.window_start.lock() = None;
        self.restart_count.store(0, Ordering::Relaxed);
    }
}

/// One entry of the slot table
pub(crate) struct ActorSlot {
    state: AtomicU8,
    valid: AtomicBool,
    generation: AtomicU64,
    actor: RwLock<Option<Arc<Actor>>>,
    restarts: RestartTracker,
}

impl ActorSlot {
    pub(crate) fn new(max_restarts: u32, restart_window: Duration) -> Self {
        Self {
            state: AtomicU8::new(SlotState::Free as u8),
            valid: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            actor: RwLock::new(None),
            restarts: RestartTracker::new(max_restarts, restart_window),
        }
    }

    pub(crate) fn state(&self) -> SlotState {
        SlotState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Claim a free slot for a new actor
    pub(crate) fn try_reserve(&self) -> bool {
        self.state
            .compare_exchange(
                SlotState::Free as u8,
                SlotState::Reserved as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Move an occupied slot back to reserved, keeping it out of reach of spawns
    pub(crate) fn try_reclaim(&self) -> bool {
        self.state
            .compare_exchange(
                SlotState::Occupied as u8,
                SlotState::Reserved as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub(crate) fn release_reservation(&self) {
        let _ = self.state.compare_exchange(
            SlotState::Reserved as u8,
            SlotState::Free as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Place an actor into a reserved slot
    pub(crate) fn install(&self, actor: Arc<Actor>) {
        *self.actor.write() = Some(actor);
        self.valid.store(true, Ordering::Release);
        self.state.store(SlotState::Occupied as u8, Ordering::Release);
    }

    pub(crate) fn actor(&self) -> Option<Arc<Actor>> {
        self.actor.read().clone()
    }

    /// Remove the actor, leaving the slot claimed
    pub(crate) fn take_actor(&self) -> Option<Arc<Actor>> {
        self.actor.write().take()
    }

    /// Take the actor only if `keep` approves of it
    pub(crate) fn take_actor_if(&self, keep: impl FnOnce(&Actor) -> bool) -> Option<Arc<Actor>> {
        let mut guard = self.actor.write();
        match guard.as_deref() {
            Some(actor) if keep(actor) => guard.take(),
            _ => None,
        }
    }

    /// Retire the current occupant: bump the generation and mark invalid
    ///
    /// Returns the new generation.
    pub(crate) fn retire(&self) -> u64 {
        self.valid.store(false, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Retire the occupant and return the slot to the free pool
    pub(crate) fn vacate(&self) -> u64 {
        let generation = self.retire();
        self.state.store(SlotState::Free as u8, Ordering::Release);
        generation
    }

    pub(crate) fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub(crate) fn restarts(&self) -> &RestartTracker {
        &self.restarts
    }
}

/// Name to slot index
///
/// Lock order: take this lock before any slot's actor lock.
#[derive(Debug, Default)]
pub(crate) struct NameRegistry {
    names: RwLock<HashMap<String, usize>>,
}

impl NameRegistry {
    pub(crate) fn lookup(&self, name: &str) -> Option<usize> {
        self.names.read().get(name).copied()
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.names.read().contains_key(name)
    }

    /// Run `register` with the write lock held if `name` is free
    pub(crate) fn register_with<T>(
        &self,
        name: &str,
        slot: usize,
        register: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let mut names = self.names.write();
        if names.contains_key(name) {
            return Err(ActorError::NameTaken {
                name: name.to_string(),
            });
        }
        let value = register()?;
        names.insert(name.to_string(), slot);
        Ok(value)
    }

    /// Run `f` with the write lock held, for updates that must be atomic
    /// with a slot change
    pub(crate) fn with_write<T>(&self, f: impl FnOnce(&mut HashMap<String, usize>) -> T) -> T {
        f(&mut self.names.write())
    }

    pub(crate) fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.names.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub(crate) fn len(&self) -> usize {
        self.names.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_claim_cycle() {
        let slot = ActorSlot::new(5, Duration::from_secs(60));
        assert_eq!(slot.state(), SlotState::Free);
        assert!(slot.try_reserve());
        assert!(!slot.try_reserve());
        assert_eq!(slot.state(), SlotState::Reserved);

        slot.release_reservation();
        assert_eq!(slot.state(), SlotState::Free);
        assert!(slot.try_reserve());
    }

    #[test]
    fn test_vacate_bumps_generation() {
        let slot = ActorSlot::new(5, Duration::from_secs(60));
        assert!(slot.try_reserve());
        assert_eq!(slot.generation(), 0);

        assert_eq!(slot.vacate(), 1);
        assert_eq!(slot.generation(), 1);
        assert_eq!(slot.state(), SlotState::Free);
        assert!(!slot.is_valid());
    }

    #[test]
    fn test_reserve_races_have_one_winner() {
        let slot = Arc::new(ActorSlot::new(5, Duration::from_secs(60)));
        let winners: usize = (0..8)
            .map(|_| {
                let slot = slot.clone();
                std::thread::spawn(move || slot.try_reserve() as usize)
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap())
            .sum();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_restart_tracker_limits_restarts_in_window() {
        let tracker = RestartTracker::new(2, Duration::from_secs(60));
        assert!(tracker.should_restart());
        assert!(tracker.should_restart());
        assert!(!tracker.should_restart());
        assert_eq!(tracker.restarts(), 3);

        tracker.reset();
        assert!(tracker.should_restart());
    }

    #[test]
    fn test_restart_tracker_window_expiry() {
        let tracker = RestartTracker::new(1, Duration::from_millis(10));
        assert!(tracker.should_restart());
        assert!(!tracker.should_restart());
        std::thread::sleep(Duration::from_millis(20));
        assert!(tracker.should_restart());
    }

    #[test]
    fn test_zero_restarts_never_restarts() {
        let tracker = RestartTracker::new(0, Duration::from_secs(60));
        assert!(!tracker.should_restart());
    }

    #[test]
    fn test_name_registry_rejects_duplicates() {
        let registry = NameRegistry::default();
        registry.register_with("alpha", 0, || Ok(())).unwrap();
        let err = registry.register_with("alpha", 1, || Ok(())).unwrap_err();
        assert!(matches!(err, ActorError::NameTaken { .. }));
        assert_eq!(registry.lookup("alpha"), Some(0));

        assert_eq!(registry.with_write(|names| names.remove("alpha")), Some(0));
        assert!(!registry.contains("alpha"));
        registry.register_with("alpha", 1, || Ok(())).unwrap();
        assert_eq!(registry.names(), vec!["alpha".to_string()]);
    }

    #[test]
    fn test_failed_registration_leaves_name_free() {
        let registry = NameRegistry::default();
        let result: Result<()> = registry.register_with("beta", 0, || Err(ActorError::SystemDropped));
        assert!(result.is_err());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_handle_display() {
        let handle = ActorHandle::new(3, "Pinger", 2);
        assert_eq!(handle.to_string(), "Pinger@3#2");
    }
}
