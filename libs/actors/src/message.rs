//! Messages carried by actor mailboxes
//!
//! A [`Message`] moves a single [`Task`] from a sender to a receiver together
//! with an [`Envelope`] describing who sent it and whether the sender wants a
//! failure notice. Messages are move-only; a task body runs at most once.

use crate::error::{TaskError, TaskResult};
use std::fmt;
use std::time::{Duration, Instant};

/// Sender name used for messages that originate from the system itself
pub const SYSTEM_SENDER: &str = "ADMIN";

type TaskBody = Box<dyn FnOnce() -> TaskResult + Send + 'static>;

/// Unit of work executed by the receiving actor's drain
pub struct Task {
    body: TaskBody,
}

impl Task {
    /// Wrap a fallible body; an `Err` fails the executing actor
    pub fn new<F>(body: F) -> Self
    where
        F: FnOnce() -> TaskResult + Send + 'static,
    {
        Self {
            body: Box::new(body),
        }
    }

    /// Wrap a body that cannot report a fault
    pub fn from_fn<F>(body: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::new(move || {
            body();
            Ok(())
        })
    }

    /// Task that always fails with the given reason
    pub fn failing(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::new(move || Err(TaskError::Failed(reason)))
    }

    /// Consume and execute the body
    pub fn run(self) -> TaskResult {
        (self.body)()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Task(..)")
    }
}

/// Routing metadata attached to every message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    sender: String,
    needs_ack: bool,
    created_at: Instant,
}

impl Envelope {
    pub fn new(sender: impl Into<String>, needs_ack: bool) -> Self {
        let sender = sender.into();
        let sender = if sender.is_empty() {
            SYSTEM_SENDER.to_string()
        } else {
            sender
        };

        Self {
            sender,
            needs_ack,
            created_at: Instant::now(),
        }
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn needs_ack(&self) -> bool {
        self.needs_ack
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }
}

/// Task plus envelope, as stored in a mailbox
#[derive(Debug)]
pub struct Message {
    task: Task,
    envelope: Envelope,
}

impl Message {
    /// Create a message from a named sender
    ///
    /// An empty sender name is recorded as [`SYSTEM_SENDER`].
    pub fn new(task: Task, sender: impl Into<String>, needs_ack: bool) -> Self {
        Self {
            task,
            envelope: Envelope::new(sender, needs_ack),
        }
    }

    /// Create a system-originated message without acknowledgement
    pub fn from_system(task: Task) -> Self {
        Self::new(task, SYSTEM_SENDER, false)
    }

    pub fn sender(&self) -> &str {
        self.envelope.sender()
    }

    pub fn needs_ack(&self) -> bool {
        self.envelope.needs_ack()
    }

    pub fn created_at(&self) -> Instant {
        self.envelope.created_at()
    }

    /// Time since the message was created
    pub fn age(&self) -> Duration {
        self.envelope.created_at().elapsed()
    }

    pub fn is_system(&self) -> bool {
        self.envelope.sender() == SYSTEM_SENDER
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn into_parts(self) -> (Task, Envelope) {
        (self.task, self.envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_task_runs_body_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let task = Task::from_fn(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert!(task.run().is_ok());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failing_task_reports_reason() {
        let err = Task::failing("bad input").run().unwrap_err();
        assert_eq!(err.to_string(), "bad input");
    }

    #[test]
    fn test_empty_sender_becomes_system_sender() {
        let message = Message::new(Task::from_fn(|| {}), "", true);
        assert_eq!(message.sender(), SYSTEM_SENDER);
        assert!(message.is_system());
        assert!(message.needs_ack());
    }

    #[test]
    fn test_message_metadata() {
        let message = Message::new(Task::from_fn(|| {}), "Pinger", false);
        assert_eq!(message.sender(), "Pinger");
        assert!(!message.is_system());
        assert!(!message.needs_ack());
        assert!(message.created_at() <= Instant::now());

        let (task, envelope) = message.into_parts();
        assert_eq!(envelope.sender(), "Pinger");
        assert!(task.run().is_ok());
    }

    #[test]
    fn test_from_system_has_no_ack() {
        let message = Message::from_system(Task::from_fn(|| {}));
        assert!(message.is_system());
        assert!(!message.needs_ack());
    }
}
