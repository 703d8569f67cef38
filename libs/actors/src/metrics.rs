//! System-wide counters
//!
//! Relaxed atomics bumped on the hot paths; [`SystemMetrics::snapshot`]
//! gives a consistent-enough view for logging and tests.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct SystemMetrics {
    pub actors_spawned: AtomicU64,
    pub actors_unregistered: AtomicU64,
    pub messages_sent: AtomicU64,
    pub messages_rejected: AtomicU64,
    pub messages_processed: AtomicU64,
    pub task_failures: AtomicU64,

    // Recovery
    pub actor_restarts: AtomicU64,
    pub restart_failures: AtomicU64,
    pub actors_replaced: AtomicU64,
    pub stale_handle_sends: AtomicU64,

    // Drain scheduling
    pub drains_scheduled: AtomicU64,
    pub drains_refused: AtomicU64,
    pub mailbox_full_events: AtomicU64,
}

impl SystemMetrics {
    pub fn record_spawn(&self) {
        self.actors_spawned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unregister(&self) {
        self.actors_unregistered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_send(&self, accepted: bool) {
        if accepted {
            self.messages_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.messages_rejected.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_message_processed(&self) {
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_task_failure(&self) {
        self.task_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record actor restart event
    pub fn record_actor_restart(&self, success: bool) {
        self.actor_restarts.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.restart_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_replace(&self) {
        self.actors_replaced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_handle(&self) {
        self.stale_handle_sends.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drain_scheduled(&self, accepted: bool) {
        if accepted {
            self.drains_scheduled.fetch_add(1, Ordering::Relaxed);
        } else {
            self.drains_refused.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record mailbox full event for backpressure monitoring
    pub fn record_mailbox_full(&self) {
        self.mailbox_full_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SystemStats {
        let actor_restarts = self.actor_restarts.load(Ordering::Relaxed);
        let restart_failures = self.restart_failures.load(Ordering::Relaxed);
        let restart_success_rate = if actor_restarts > 0 {
            (actor_restarts.saturating_sub(restart_failures) as f64 / actor_restarts as f64) * 100.0
        } else {
            100.0
        };

        SystemStats {
            actors_spawned: self.actors_spawned.load(Ordering::Relaxed),
            actors_unregistered: self.actors_unregistered.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_rejected: self.messages_rejected.load(Ordering::Relaxed),
            messages_processed: self.messages_processed.load(Ordering::Relaxed),
            task_failures: self.task_failures.load(Ordering::Relaxed),
            actor_restarts,
            restart_failures,
            restart_success_rate,
            actors_replaced: self.actors_replaced.load(Ordering::Relaxed),
            stale_handle_sends: self.stale_handle_sends.load(Ordering::Relaxed),
            drains_scheduled: self.drains_scheduled.load(Ordering::Relaxed),
            drains_refused: self.drains_refused.load(Ordering::Relaxed),
            mailbox_full_events: self.mailbox_full_events.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`SystemMetrics`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemStats {
    pub actors_spawned: u64,
    pub actors_unregistered: u64,
    pub messages_sent: u64,
    pub messages_rejected: u64,
    pub messages_processed: u64,
    pub task_failures: u64,
    pub actor_restarts: u64,
    pub restart_failures: u64,
    /// Percentage of restarts that produced a running actor
    pub restart_success_rate: f64,
    pub actors_replaced: u64,
    pub stale_handle_sends: u64,
    pub drains_scheduled: u64,
    pub drains_refused: u64,
    pub mailbox_full_events: u64,
}
