//! Runtime defaults
//!
//! Default values used when a configuration file leaves a setting out.

/// Actor system defaults
pub mod system {
    /// Number of actor slots
    pub const MAX_ACTORS: usize = 64;

    /// Mailbox capacity used by `ActorSystem::spawn` callers that have no preference
    pub const MAILBOX_CAPACITY: usize = 64;

    /// Largest mailbox a single actor may request
    pub const MAX_MAILBOX_CAPACITY: usize = 65_536;

    /// Restarts allowed inside one restart window
    pub const MAX_RESTARTS: u32 = 5;

    /// Restart window length (seconds)
    pub const RESTART_WINDOW_SECS: u64 = 60;
}

/// Worker pool defaults
pub mod pool {
    /// Worker threads servicing drain jobs
    pub const WORKERS: usize = 10;

    /// Pool queue slots per actor slot when no explicit capacity is configured
    pub const QUEUE_SLOTS_PER_ACTOR: usize = 4;

    /// How long `submit_with_result` waits for queue space (milliseconds)
    pub const SUBMIT_TIMEOUT_MS: u64 = 20_000;
}

/// Trace sink defaults
pub mod trace {
    /// Events buffered between producers and the flusher thread
    pub const BUFFER_CAPACITY: usize = 4_096;

    /// Recent events kept in memory for inspection
    pub const RING_CAPACITY: usize = 1_024;

    /// Flusher wake-up interval (milliseconds)
    pub const FLUSH_INTERVAL_MS: u64 = 100;
}

/// Logging defaults
pub mod logging {
    pub const LEVEL: &str = "info";
}
