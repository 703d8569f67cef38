//! Actor Runtime Error Types
//!
//! Capacity, naming, routing and lifecycle errors for the actor system, the
//! fault type produced by task bodies, and the send error that hands an
//! undelivered message back to its caller.

use crate::message::Message;
use std::fmt;
use thiserror::Error;

/// Main actor runtime error type
#[derive(Error, Debug)]
pub enum ActorError {
    /// Mailbox has no free cell; retry or drop
    #[error("Mailbox of actor '{actor}' is full (capacity {capacity})")]
    MailboxFull { actor: String, capacity: usize },

    /// Worker pool queue has no free slot
    #[error("Worker pool '{pool}' is full (capacity {capacity})")]
    PoolFull { pool: String, capacity: usize },

    /// Worker pool queue stayed full for the whole wait
    #[error("Timed out after {timeout_ms}ms waiting for space in worker pool '{pool}'")]
    PoolTimeout { pool: String, timeout_ms: u64 },

    /// Every actor slot is taken
    #[error("Actor system is full ({capacity} slots)")]
    RegistryFull { capacity: usize },

    /// Mailbox capacity outside the configured bounds
    #[error("Invalid mailbox capacity {requested}: must be between 1 and {max}")]
    InvalidCapacity { requested: usize, max: usize },

    /// Actors must have a name
    #[error("Actor name must not be empty")]
    EmptyName,

    /// Another live actor already uses the name
    #[error("Actor name '{name}' is already registered")]
    NameTaken { name: String },

    /// No actor is registered under the name
    #[error("No actor registered under name '{name}'")]
    UnknownActor { name: String },

    /// Slot holds no actor
    #[error("Slot {slot} holds no actor")]
    EmptySlot { slot: usize },

    /// Slot index past the end of the slot table
    #[error("Slot {slot} out of range (capacity {capacity})")]
    SlotOutOfRange { slot: usize, capacity: usize },

    /// Slot hint points at a slot that is already claimed
    #[error("Slot {slot} is already claimed")]
    SlotOccupied { slot: usize },

    /// Handle refers to an earlier occupant of the slot
    #[error("Stale handle for '{name}' at slot {slot}: generation {expected}, current {current}")]
    StaleHandle {
        name: String,
        slot: usize,
        expected: u64,
        current: u64,
    },

    /// Actor failed or was stopped and rejects new messages
    #[error("Actor '{actor}' is not accepting messages")]
    ActorNotAlive { actor: String },

    /// Worker pool no longer accepts jobs
    #[error("Worker pool '{pool}' is stopped")]
    PoolStopped { pool: String },

    /// Actor system is being torn down
    #[error("Actor system {system_id} is shutting down")]
    ShuttingDown { system_id: String },

    /// The owning actor system no longer exists
    #[error("Actor system has been dropped")]
    SystemDropped,

    /// Result channel closed before the job produced a value
    #[error("Task was dropped before completing")]
    TaskCanceled,

    /// Job submitted with a result handle panicked
    #[error("Task panicked: {message}")]
    TaskPanicked { message: String },

    /// Runtime configuration rejected at construction
    #[error("Invalid runtime configuration: {reason}")]
    InvalidConfig { reason: String },

    /// A runtime thread could not be started
    #[error("Failed to start thread '{name}': {source}")]
    ThreadSpawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// Trace output could not be opened or written
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for actor runtime operations
pub type Result<T> = std::result::Result<T, ActorError>;

impl ActorError {
    /// Create a mailbox full error
    pub fn mailbox_full(actor: impl Into<String>, capacity: usize) -> Self {
        Self::MailboxFull {
            actor: actor.into(),
            capacity,
        }
    }

    /// Create a not-alive error
    pub fn not_alive(actor: impl Into<String>) -> Self {
        Self::ActorNotAlive {
            actor: actor.into(),
        }
    }

    /// Create an unknown actor error
    pub fn unknown_actor(name: impl Into<String>) -> Self {
        Self::UnknownActor { name: name.into() }
    }

    /// Create an I/O error with context
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Get error category for metrics and logging
    pub fn category(&self) -> &'static str {
        match self {
            ActorError::MailboxFull { .. }
            | ActorError::PoolFull { .. }
            | ActorError::PoolTimeout { .. }
            | ActorError::RegistryFull { .. }
            | ActorError::InvalidCapacity { .. } => "capacity",
            ActorError::EmptyName | ActorError::NameTaken { .. } => "naming",
            ActorError::UnknownActor { .. }
            | ActorError::EmptySlot { .. }
            | ActorError::SlotOutOfRange { .. }
            | ActorError::SlotOccupied { .. }
            | ActorError::StaleHandle { .. }
            | ActorError::ActorNotAlive { .. } => "routing",
            ActorError::PoolStopped { .. }
            | ActorError::ShuttingDown { .. }
            | ActorError::SystemDropped
            | ActorError::TaskCanceled
            | ActorError::TaskPanicked { .. } => "lifecycle",
            ActorError::InvalidConfig { .. } => "configuration",
            ActorError::ThreadSpawn { .. } | ActorError::Io { .. } => "io",
        }
    }

    /// Whether retrying the same operation later can succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ActorError::MailboxFull { .. }
                | ActorError::PoolFull { .. }
                | ActorError::PoolTimeout { .. }
                | ActorError::RegistryFull { .. }
                | ActorError::UnknownActor { .. }
                | ActorError::ActorNotAlive { .. }
        )
    }
}

/// Fault raised by a task body
///
/// Any fault is fatal to the actor executing the task and is caught at the
/// drain boundary; it never reaches the worker thread.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("{0}")]
    Failed(String),

    #[error("Task panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TaskError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Convert a caught panic payload into a task fault
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        Self::Panicked(panic_message(payload.as_ref()))
    }
}

/// Result returned by every task body
pub type TaskResult = std::result::Result<(), TaskError>;

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// A message that could not be delivered, together with the reason
///
/// The message is handed back so a caller facing backpressure can retry
/// without rebuilding the task.
pub struct SendError {
    error: ActorError,
    message: Message,
}

impl SendError {
    pub fn new(error: ActorError, message: Message) -> Self {
        Self { error, message }
    }

    /// Why delivery failed
    pub fn error(&self) -> &ActorError {
        &self.error
    }

    /// Whether the receiver's mailbox was full
    pub fn is_full(&self) -> bool {
        matches!(self.error, ActorError::MailboxFull { .. })
    }

    /// Take back the undelivered message
    pub fn into_message(self) -> Message {
        self.message
    }

    pub fn into_parts(self) -> (ActorError, Message) {
        (self.error, self.message)
    }

    pub fn into_error(self) -> ActorError {
        self.error
    }
}

impl fmt::Debug for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendError")
            .field("error", &self.error)
            .field("sender", &self.message.sender())
            .finish()
    }
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "send failed: {}", self.error)
    }
}

impl std::error::Error for SendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl From<SendError> for ActorError {
    fn from(err: SendError) -> Self {
        err.error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(ActorError::mailbox_full("a", 4).category(), "capacity");
        assert_eq!(ActorError::EmptyName.category(), "naming");
        assert_eq!(ActorError::unknown_actor("ghost").category(), "routing");
        assert_eq!(ActorError::SystemDropped.category(), "lifecycle");
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(ActorError::mailbox_full("a", 4).is_recoverable());
        assert!(!ActorError::EmptyName.is_recoverable());
        assert!(!ActorError::NameTaken { name: "a".into() }.is_recoverable());
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(TaskError::from_panic(payload).to_string(), "Task panicked: boom");

        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
    }

    #[test]
    fn test_anyhow_converts_into_task_error() {
        fn read_disk() -> anyhow::Result<()> {
            anyhow::bail!("disk unavailable")
        }
        fn body() -> TaskResult {
            read_disk()?;
            Ok(())
        }
        let err = body().unwrap_err();
        assert!(matches!(err, TaskError::Other(_)));
        assert_eq!(err.to_string(), "disk unavailable");
    }
}
