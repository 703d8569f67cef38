//! Trace sink
//!
//! Structured lifecycle events (register, enqueue, drain, fail, restart...)
//! recorded from any thread without blocking. Events go through a bounded
//! channel to a flusher thread that keeps the most recent ones in a ring
//! buffer and optionally appends them to a CSV or JSON-lines file.
//!
//! The CSV layout `timestamp,actor_id,gen_id,thread_id,eventType` is the one
//! consumed by the offline trace visualizer.

use crate::error::{ActorError, Result};
use actor_config::{TraceFormat, TraceSettings};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use ringbuffer::{AllocRingBuffer, RingBuffer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Payload codes attached to `Fail` events
pub mod payload {
    /// No additional detail
    pub const NONE: u32 = 0;
    /// Message rejected because the mailbox was full
    pub const MAILBOX_FULL: u32 = 1;
    /// A task returned an error or panicked
    pub const TASK_FAULT: u32 = 2;
    /// Worker pool refused a drain job
    pub const DRAIN_REFUSED: u32 = 3;
    /// Send addressed an earlier occupant of the slot
    pub const STALE_HANDLE: u32 = 4;
    /// Restart limit exhausted; actor stopped instead
    pub const RESTART_LIMIT: u32 = 5;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TraceEventType {
    Register,
    Unregister,
    Restart,
    Fail,
    DrainStart,
    DrainEnd,
    Enqueue,
    Dequeue,
    StopSystem,
}

impl TraceEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceEventType::Register => "Register",
            TraceEventType::Unregister => "Unregister",
            TraceEventType::Restart => "Restart",
            TraceEventType::Fail => "Fail",
            TraceEventType::DrainStart => "DrainStart",
            TraceEventType::DrainEnd => "DrainEnd",
            TraceEventType::Enqueue => "Enqueue",
            TraceEventType::Dequeue => "Dequeue",
            TraceEventType::StopSystem => "StopSystem",
        }
    }
}

impl fmt::Display for TraceEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Milliseconds since the Unix epoch
    pub timestamp_ms: i64,
    pub event_type: TraceEventType,
    pub actor_id: usize,
    pub generation: u64,
    pub thread_id: String,
    pub payload: u32,
}

impl TraceEvent {
    pub fn new(event_type: TraceEventType, actor_id: usize, generation: u64, payload: u32) -> Self {
        Self {
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            event_type,
            actor_id,
            generation,
            thread_id: current_thread_label(),
            payload,
        }
    }

    fn csv_line(&self) -> String {
        format!(
            "{},{},{},{},{}",
            self.timestamp_ms,
            self.actor_id,
            self.generation,
            self.thread_id,
            self.event_type
        )
    }
}

fn current_thread_label() -> String {
    let current = thread::current();
    match current.name() {
        Some(name) => name.to_string(),
        None => format!("{:?}", current.id()),
    }
}

const CSV_HEADER: &str = "timestamp,actor_id,gen_id,thread_id,eventType";

enum TraceCommand {
    Event(TraceEvent),
    Flush(Sender<()>),
    Shutdown,
}

/// Non-blocking trace recorder owned by one actor system
pub struct Tracer {
    enabled: AtomicBool,
    sender: Sender<TraceCommand>,
    recorded: AtomicU64,
    dropped: AtomicU64,
    recent: Arc<RwLock<AllocRingBuffer<TraceEvent>>>,
    flusher: Mutex<Option<JoinHandle<()>>>,
    output: Option<PathBuf>,
}

impl Tracer {
    /// Start the flusher thread and open the output file if one is configured
    pub fn new(settings: &TraceSettings) -> Result<Self> {
        let writer = match &settings.output {
            Some(path) => Some(open_output(path, settings.format)?),
            None => None,
        };

        let (sender, receiver) = bounded(settings.buffer_capacity.max(1));
        let recent = Arc::new(RwLock::new(AllocRingBuffer::new(settings.ring_capacity.max(1))));

        let flusher = Flusher {
            receiver,
            recent: recent.clone(),
            writer,
            format: settings.format,
            pending: Vec::new(),
        };
        let interval = settings.flush_interval();
        let handle = thread::Builder::new()
            .name("actor-trace-flusher".to_string())
            .spawn(move || flusher.run(interval))
            .map_err(|source| ActorError::ThreadSpawn {
                name: "actor-trace-flusher".to_string(),
                source,
            })?;

        Ok(Self {
            enabled: AtomicBool::new(settings.enabled),
            sender,
            recorded: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            recent,
            flusher: Mutex::new(Some(handle)),
            output: settings.output.clone(),
        })
    }

    /// Tracer that records nothing until enabled, with no output file
    pub fn disabled() -> Result<Self> {
        Self::new(&TraceSettings::default())
    }

    /// Record an event without blocking; dropped and counted when the buffer is full
    pub fn record(&self, event_type: TraceEventType, actor_id: usize, generation: u64, payload: u32) {
        if !self.enabled.load(Ordering::Relaxed) {
            return;
        }

        let event = TraceEvent::new(event_type, actor_id, generation, payload);
        match self.sender.try_send(TraceCommand::Event(event)) {
            Ok(()) => {
                self.recorded.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Block until every event recorded so far has been written
    pub fn flush(&self) {
        let (ack_tx, ack_rx) = bounded(1);
        if self.sender.send(TraceCommand::Flush(ack_tx)).is_ok() {
            // Err means the flusher already exited
            let _ = ack_rx.recv();
        }
    }

    /// Most recent events, oldest first
    pub fn recent_events(&self) -> Vec<TraceEvent> {
        self.recent.read().iter().cloned().collect()
    }

    pub fn recorded_events(&self) -> u64 {
        self.recorded.load(Ordering::Relaxed)
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.output.as_deref()
    }

    /// Write out buffered events and stop the flusher thread
    pub fn shutdown(&self) {
        let Some(handle) = self.flusher.lock().take() else {
            return;
        };
        self.enabled.store(false, Ordering::Relaxed);

        if self.sender.send(TraceCommand::Shutdown).is_ok() && handle.join().is_err() {
            warn!("Trace flusher thread panicked");
        }
        debug!(
            recorded = self.recorded_events(),
            dropped = self.dropped_events(),
            "Tracer shut down"
        );
    }
}

impl Drop for Tracer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer")
            .field("enabled", &self.is_enabled())
            .field("recorded", &self.recorded_events())
            .field("dropped", &self.dropped_events())
            .field("output", &self.output)
            .finish()
    }
}

fn open_output(path: &Path, format: TraceFormat) -> Result<BufWriter<File>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| {
            ActorError::io(format!("creating trace directory {}", parent.display()), e)
        })?;
    }

    let file = File::create(path)
        .map_err(|e| ActorError::io(format!("creating trace file {}", path.display()), e))?;
    let mut writer = BufWriter::new(file);

    if format == TraceFormat::Csv {
        writeln!(writer, "{}", CSV_HEADER)
            .map_err(|e| ActorError::io(format!("writing trace header to {}", path.display()), e))?;
    }
    Ok(writer)
}

struct Flusher {
    receiver: Receiver<TraceCommand>,
    recent: Arc<RwLock<AllocRingBuffer<TraceEvent>>>,
    writer: Option<BufWriter<File>>,
    format: TraceFormat,
    pending: Vec<TraceEvent>,
}

impl Flusher {
    fn run(mut self, interval: Duration) {
        loop {
            match self.receiver.recv_timeout(interval) {
                Ok(TraceCommand::Event(event)) => self.accept(event),
                Ok(TraceCommand::Flush(ack)) => {
                    self.write_pending();
                    let _ = ack.send(());
                }
                Ok(TraceCommand::Shutdown) => {
                    // Events recorded before shutdown are still queued behind it
                    while let Ok(command) = self.receiver.try_recv() {
                        if let TraceCommand::Event(event) = command {
                            self.accept(event);
                        }
                    }
                    self.write_pending();
                    break;
                }
                Err(RecvTimeoutError::Timeout) => self.write_pending(),
                Err(RecvTimeoutError::Disconnected) => {
                    self.write_pending();
                    break;
                }
            }
        }
    }

    fn accept(&mut self, event: TraceEvent) {
        if self.writer.is_some() {
            self.pending.push(event.clone());
        }
        self.recent.write().push(event);
    }

    fn write_pending(&mut self) {
        let Some(writer) = self.writer.as_mut() else {
            self.pending.clear();
            return;
        };

        let result = write_events(writer, self.format, &self.pending).and_then(|()| writer.flush());
        self.pending.clear();

        if let Err(e) = result {
            warn!(error = %e, "Trace output failed; further events stay in memory only");
            self.writer = None;
        }
    }
}

fn write_events(writer: &mut impl Write, format: TraceFormat, events: &[TraceEvent]) -> std::io::Result<()> {
    for event in events {
        match format {
            TraceFormat::Csv => writeln!(writer, "{}", event.csv_line())?,
            TraceFormat::Json => {
                serde_json::to_writer(&mut *writer, event)?;
                writeln!(writer)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn enabled_settings() -> TraceSettings {
        TraceSettings {
            enabled: true,
            ..TraceSettings::default()
        }
    }

    #[test]
    fn test_disabled_tracer_records_nothing() {
        let tracer = Tracer::disabled().unwrap();
        tracer.record(TraceEventType::Register, 0, 0, payload::NONE);
        tracer.flush();
        assert!(tracer.recent_events().is_empty());
        assert_eq!(tracer.recorded_events(), 0);
    }

    #[test]
    fn test_recent_events_keep_order() {
        let tracer = Tracer::new(&enabled_settings()).unwrap();
        tracer.record(TraceEventType::Register, 3, 0, payload::NONE);
        tracer.record(TraceEventType::Enqueue, 3, 0, payload::NONE);
        tracer.record(TraceEventType::Fail, 3, 0, payload::TASK_FAULT);
        tracer.flush();

        let events = tracer.recent_events();
        let kinds: Vec<_> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(
            kinds,
            vec![TraceEventType::Register, TraceEventType::Enqueue, TraceEventType::Fail]
        );
        assert_eq!(events[2].payload, payload::TASK_FAULT);
        assert!(events.iter().all(|e| e.actor_id == 3));
    }

    #[test]
    fn test_ring_keeps_only_latest_events() {
        let settings = TraceSettings {
            ring_capacity: 4,
            ..enabled_settings()
        };
        let tracer = Tracer::new(&settings).unwrap();
        for generation in 0..10 {
            tracer.record(TraceEventType::Restart, 1, generation, payload::NONE);
        }
        tracer.flush();

        let generations: Vec<_> = tracer.recent_events().iter().map(|e| e.generation).collect();
        assert_eq!(generations, vec![6, 7, 8, 9]);
    }

    #[test]
    fn test_csv_output() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trace").join("actors.csv");
        let settings = TraceSettings {
            output: Some(path.clone()),
            ..enabled_settings()
        };

        let tracer = Tracer::new(&settings).unwrap();
        tracer.record(TraceEventType::Register, 2, 5, payload::NONE);
        tracer.record(TraceEventType::DrainStart, 2, 5, payload::NONE);
        tracer.flush();

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines[0], CSV_HEADER);
        assert_eq!(lines.len(), 3);

        let fields: Vec<_> = lines[1].split(',').collect();
        assert_eq!(fields.len(), 5);
        assert_eq!(fields[1], "2");
        assert_eq!(fields[2], "5");
        assert_eq!(fields[4], "Register");
        assert!(lines[2].ends_with(",DrainStart"));
    }

    #[test]
    fn test_json_output() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("actors.jsonl");
        let settings = TraceSettings {
            output: Some(path.clone()),
            format: TraceFormat::Json,
            ..enabled_settings()
        };

        let tracer = Tracer::new(&settings).unwrap();
        tracer.record(TraceEventType::StopSystem, 0, 0, payload::NONE);
        tracer.shutdown();

        let contents = fs::read_to_string(&path).unwrap();
        let event: TraceEvent = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
        assert_eq!(event.event_type, TraceEventType::StopSystem);
    }

    #[test]
    fn test_full_buffer_drops_instead_of_blocking() {
        let settings = TraceSettings {
            buffer_capacity: 1,
            ..enabled_settings()
        };
        let tracer = Tracer::new(&settings).unwrap();
        for i in 0..10_000 {
            tracer.record(TraceEventType::Enqueue, 0, i, payload::NONE);
        }
        tracer.flush();

        assert_eq!(tracer.recorded_events() + tracer.dropped_events(), 10_000);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let tracer = Tracer::new(&enabled_settings()).unwrap();
        tracer.shutdown();
        tracer.shutdown();
        tracer.flush();
        tracer.record(TraceEventType::Register, 0, 0, payload::NONE);
        assert_eq!(tracer.recorded_events(), 0);
    }
}
