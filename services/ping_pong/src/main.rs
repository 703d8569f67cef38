//! Ping/pong demo for the actor runtime
//!
//! Pinger sends pings to Responder from its own tasks and Responder answers
//! each with a pong, one exchange in flight at a time. The responder is then
//! made to fail so the system restarts it and notifies the sender.
//!
//! Usage:
//!   ping-pong
//!   ping-pong --config services/ping_pong/config/ping_pong.toml
//!   ping-pong --messages 1000 --trace traces/run.csv --json-logs

use actor_config::{load_config, RuntimeConfig};
use actor_runtime::{ActorSystem, SendError, SystemRef, Task, TaskError};
use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const PINGER: &str = "Pinger";
const RESPONDER: &str = "Responder";

#[derive(Parser, Debug)]
#[command(name = "ping-pong")]
#[command(about = "Actor runtime ping/pong demo")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON logging format
    #[arg(long)]
    json_logs: bool,

    /// Number of pings to send
    #[arg(short, long, default_value_t = 10)]
    messages: usize,

    /// Write a CSV trace of actor events to this file
    #[arg(long)]
    trace: Option<PathBuf>,

    /// How long to wait for each phase to finish, in seconds
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref())?;
    if let Some(path) = &args.trace {
        config.trace.enabled = true;
        config.trace.output = Some(path.clone());
    }

    if args.print_config {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }

    init_logging(&args, &config)?;
    run(&args, &config)
}

fn init_logging(args: &Args, config: &RuntimeConfig) -> Result<()> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(config.logging.level.as_str())
        .to_lowercase();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true);

    if args.json_logs || config.logging.json {
        builder
            .json()
            .try_init()
            .map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;
    } else {
        builder
            .try_init()
            .map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;
    }

    Ok(())
}

fn run(args: &Args, config: &RuntimeConfig) -> Result<()> {
    let timeout = Duration::from_secs(args.timeout_secs);
    let system = ActorSystem::with_config(config).context("Failed to start actor system")?;
    info!(system_id = %system.system_id(), messages = args.messages, "Starting ping/pong demo");

    system.spawn(config.system.default_mailbox_capacity, PINGER)?;
    let responder = system.spawn(config.system.default_mailbox_capacity, RESPONDER)?;

    // Phase 1: request/acknowledge exchange driven by the pinger
    let pings = Arc::new(AtomicUsize::new(0));
    let pongs = Arc::new(AtomicUsize::new(0));
    let system_ref = system.system_ref();

    if args.messages > 0 {
        let first = ping_task(0, args.messages, system_ref.clone(), pings.clone(), pongs.clone());
        system
            .send_task(PINGER, kickoff(system_ref.clone(), first))
            .map_err(SendError::into_error)?;
    }

    if !wait_for(timeout, || pongs.load(Ordering::SeqCst) == args.messages) {
        bail!(
            "Only {} of {} pongs arrived within {:?}",
            pongs.load(Ordering::SeqCst),
            args.messages,
            timeout
        );
    }
    info!(
        pings = pings.load(Ordering::SeqCst),
        pongs = pongs.load(Ordering::SeqCst),
        "Exchange complete"
    );

    // Phase 2: the responder fails; the pinger asked for an acknowledgement
    let before = system.handle_of(RESPONDER)?.generation();
    system
        .send_from(
            PINGER,
            RESPONDER,
            Task::failing("responder rejected malformed ping"),
            true,
        )
        .map_err(SendError::into_error)?;

    let restarted = wait_for(timeout, || {
        system
            .actor_at(responder.slot())
            .is_some_and(|actor| actor.is_alive() && actor.generation() > before)
    });
    if !restarted {
        bail!("{} was not restarted within {:?}", RESPONDER, timeout);
    }
    let after = system.handle_of(RESPONDER)?;
    info!(
        actor = %after,
        old_generation = before,
        generation = after.generation(),
        "Responder recovered"
    );

    // Phase 3: the restarted responder serves again
    let target = pongs.load(Ordering::SeqCst) + 1;
    let ping = ping_task(
        args.messages,
        args.messages + 1,
        system_ref.clone(),
        pings.clone(),
        pongs.clone(),
    );
    system
        .send_task(PINGER, kickoff(system_ref.clone(), ping))
        .map_err(SendError::into_error)?;
    if !wait_for(timeout, || pongs.load(Ordering::SeqCst) >= target) {
        warn!("Restarted responder did not answer in time");
    }

    let stats = system.metrics();
    info!(
        messages_sent = stats.messages_sent,
        messages_processed = stats.messages_processed,
        messages_rejected = stats.messages_rejected,
        mailbox_full_events = stats.mailbox_full_events,
        task_failures = stats.task_failures,
        actor_restarts = stats.actor_restarts,
        "Run statistics"
    );

    let tracer = system.tracer();
    system.shutdown();
    if let Some(path) = tracer.output_path() {
        info!(
            path = %path.display(),
            recorded = tracer.recorded_events(),
            dropped = tracer.dropped_events(),
            "Trace written"
        );
    }

    Ok(())
}

/// Task run by the pinger that sends `ping` to the responder
fn kickoff(system: SystemRef, ping: Task) -> Task {
    Task::new(move || {
        system
            .send_from(PINGER, RESPONDER, ping, true)
            .map_err(|e| TaskError::msg(format!("first ping undeliverable: {}", e)))
    })
}

/// Ping executed by the responder; answers with a pong to the pinger
fn ping_task(
    sequence: usize,
    total: usize,
    system: SystemRef,
    pings: Arc<AtomicUsize>,
    pongs: Arc<AtomicUsize>,
) -> Task {
    Task::new(move || {
        pings.fetch_add(1, Ordering::SeqCst);
        let pong = pong_task(sequence, total, system.clone(), pings, pongs);
        system
            .send_from(RESPONDER, PINGER, pong, false)
            .map_err(|e| TaskError::msg(format!("pong {} undeliverable: {}", sequence, e)))
    })
}

/// Pong executed by the pinger; sends the next ping until `total` is reached
fn pong_task(
    sequence: usize,
    total: usize,
    system: SystemRef,
    pings: Arc<AtomicUsize>,
    pongs: Arc<AtomicUsize>,
) -> Task {
    Task::new(move || {
        pongs.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(sequence, "pong");
        if sequence + 1 >= total {
            return Ok(());
        }
        let next = ping_task(sequence + 1, total, system.clone(), pings, pongs);
        system
            .send_from(PINGER, RESPONDER, next, true)
            .map_err(|e| TaskError::msg(format!("ping {} undeliverable: {}", sequence + 1, e)))
    })
}

fn wait_for(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}
