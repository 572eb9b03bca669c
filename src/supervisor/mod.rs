//! Producer supervision.
//!
//! The [`Supervisor`] owns the lifecycle of the external analysis process. It
//! is started lazily (the hub calls [`Supervisor::ensure_running`] whenever a
//! subscriber connects), every exit is treated as a crash to recover from, and
//! at most one instance is alive at any time.
//!
//! # Actor Pattern
//!
//! [`Supervisor`] is a cheap clonable handle. All state lives in a single
//! actor task that processes, in one `select!` loop:
//!
//! - commands from handles (`ensure_running`, `stop`)
//! - events from the live instance (stdout chunks, exit), in pipe order
//! - restart timer firings
//!
//! The frame extractor belongs to the actor, so no locking is involved.
//! Records leave on a single unbounded channel, in extraction order.
//!
//! # State machine
//!
//! ```text
//! Idle ──ensure_running──► Starting ──spawned──► Running
//!   ▲                         │                    │ exit / overflow
//!   │ stop                    │ launch failed      ▼
//!   └──────────────────────── ◄──── Backoff ◄──────┘
//!                                     │ timer fired
//!                                     └──► Starting
//! ```

// Rust guideline compliant 2026-01

mod restart;
mod spawn;

pub use restart::RestartTimer;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};

use crate::config::ProducerConfig;
use crate::constants::{DEFAULT_MAX_BUFFER_BYTES, DEFAULT_RESTART_DELAY, END_SENTINEL, START_SENTINEL};
use crate::framing::{FrameExtractor, SentinelBuffer};
use crate::record::Record;
use spawn::{Instance, InstanceEvent};

/// Errors raised while managing the producer.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// The producer could not be started.
    #[error("failed to launch producer `{program}`: {source}")]
    Launch {
        /// Program that failed to start.
        program: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },
}

/// Why the previous instance is gone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExitReason {
    /// The process exited on its own (`code` is `None` when signalled).
    Exited {
        /// Exit code, if any.
        code: Option<i32>,
    },
    /// The process could not be started.
    LaunchFailed {
        /// Launch error description.
        message: String,
    },
    /// The process was killed because its output never closed a frame.
    BufferOverflow,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited { code: Some(code) } => write!(f, "exited with code {code}"),
            Self::Exited { code: None } => write!(f, "terminated by signal"),
            Self::LaunchFailed { message } => write!(f, "launch failed: {message}"),
            Self::BufferOverflow => write!(f, "frame buffer overflow"),
        }
    }
}

/// Lifecycle state of the producer, observable through
/// [`Supervisor::subscribe_state`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProducerState {
    /// No instance and no restart pending.
    #[default]
    Idle,
    /// An instance is being launched.
    Starting,
    /// An instance is alive.
    Running {
        /// OS process id, if still known.
        pid: Option<u32>,
        /// Launch counter value of this instance.
        generation: u64,
    },
    /// The last instance is gone; a restart is scheduled.
    Backoff {
        /// What ended the last instance.
        reason: ExitReason,
        /// Delay before the next launch, in milliseconds.
        retry_in_ms: u64,
    },
}

impl ProducerState {
    /// Returns `true` while an instance is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }

    /// Returns `true` while a restart is pending.
    #[must_use]
    pub fn is_backoff(&self) -> bool {
        matches!(self, Self::Backoff { .. })
    }
}

/// Settings for [`Supervisor::spawn`].
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// How to launch the producer.
    pub producer: ProducerConfig,
    /// Flat delay between an exit and the next launch.
    pub restart_delay: Duration,
    /// Frame buffer limit; exceeding it kills and restarts the producer.
    pub max_buffer_bytes: usize,
}

impl SupervisorOptions {
    /// Options with default delay and buffer limit.
    #[must_use]
    pub fn new(producer: ProducerConfig) -> Self {
        Self {
            producer,
            restart_delay: DEFAULT_RESTART_DELAY,
            max_buffer_bytes: DEFAULT_MAX_BUFFER_BYTES,
        }
    }

    /// Override the restart delay.
    #[must_use]
    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    /// Override the frame buffer limit.
    #[must_use]
    pub fn with_max_buffer_bytes(mut self, bytes: usize) -> Self {
        self.max_buffer_bytes = bytes;
        self
    }
}

#[derive(Debug)]
enum SupervisorCommand {
    EnsureRunning,
    Stop { reply: oneshot::Sender<()> },
}

/// Handle to the supervisor actor.
#[derive(Debug, Clone)]
pub struct Supervisor {
    commands: mpsc::UnboundedSender<SupervisorCommand>,
    state: watch::Receiver<ProducerState>,
    launches: Arc<AtomicU64>,
}

impl Supervisor {
    /// Start the actor. Nothing is launched until [`ensure_running`](Self::ensure_running).
    ///
    /// Returns the handle and the ordered channel of extracted records.
    /// Must be called from within a tokio runtime.
    pub fn spawn(options: SupervisorOptions) -> (Self, mpsc::UnboundedReceiver<Record>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (record_tx, record_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ProducerState::Idle);
        let launches = Arc::new(AtomicU64::new(0));

        let buffer = SentinelBuffer::new(START_SENTINEL, END_SENTINEL, options.max_buffer_bytes);
        let actor = Actor {
            producer: options.producer,
            restart_delay: options.restart_delay,
            extractor: FrameExtractor::new(buffer),
            records: record_tx,
            events: event_tx,
            state: state_tx,
            timer: RestartTimer::new(fired_tx),
            instance: None,
            stop_waiters: Vec::new(),
            generation: 0,
            launches: Arc::clone(&launches),
        };
        tokio::spawn(actor.run(command_rx, event_rx, fired_rx));

        let handle = Self {
            commands: command_tx,
            state: state_rx,
            launches,
        };
        (handle, record_rx)
    }

    /// Launch the producer unless an instance is alive or a restart is
    /// already pending. Idempotent.
    pub fn ensure_running(&self) {
        if self.commands.send(SupervisorCommand::EnsureRunning).is_err() {
            log::warn!("[Supervisor] ensure_running after actor shut down");
        }
    }

    /// Cancel any pending restart, kill the live instance and wait until it
    /// has exited. The supervisor is `Idle` afterwards.
    pub async fn stop(&self) {
        let (reply, done) = oneshot::channel();
        if self.commands.send(SupervisorCommand::Stop { reply }).is_err() {
            return;
        }
        let _ = done.await;
    }

    /// Current producer state.
    #[must_use]
    pub fn state(&self) -> ProducerState {
        self.state.borrow().clone()
    }

    /// Watch producer state transitions.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ProducerState> {
        self.state.clone()
    }

    /// Total launch attempts, including failed ones.
    #[must_use]
    pub fn launches(&self) -> u64 {
        self.launches.load(Ordering::Relaxed)
    }
}

struct Actor {
    producer: ProducerConfig,
    restart_delay: Duration,
    extractor: FrameExtractor,
    records: mpsc::UnboundedSender<Record>,
    events: mpsc::UnboundedSender<InstanceEvent>,
    state: watch::Sender<ProducerState>,
    timer: RestartTimer,
    instance: Option<Instance>,
    stop_waiters: Vec<oneshot::Sender<()>>,
    generation: u64,
    launches: Arc<AtomicU64>,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<SupervisorCommand>,
        mut events: mpsc::UnboundedReceiver<InstanceEvent>,
        mut fired: mpsc::UnboundedReceiver<u64>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(SupervisorCommand::EnsureRunning) => self.ensure_running(),
                    Some(SupervisorCommand::Stop { reply }) => self.stop(reply),
                    None => break,
                },
                Some(event) = events.recv() => self.handle_instance_event(event),
                Some(epoch) = fired.recv() => {
                    if self.timer.accept(epoch) {
                        self.launch();
                    }
                }
            }
        }

        // Every handle is gone. kill_on_drop covers an instance we can't reap.
        self.timer.cancel();
        if let Some(instance) = self.instance.take() {
            instance.kill();
        }
        log::debug!("[Supervisor] Actor stopped");
    }

    fn set_state(&self, state: ProducerState) {
        log::debug!("[Supervisor] State -> {state:?}");
        self.state.send_replace(state);
    }

    fn ensure_running(&mut self) {
        if self.instance.is_some() || self.timer.is_pending() || !self.stop_waiters.is_empty() {
            return;
        }
        self.launch();
    }

    fn launch(&mut self) {
        self.generation += 1;
        let generation = self.generation;
        self.launches.fetch_add(1, Ordering::Relaxed);
        self.set_state(ProducerState::Starting);
        log::info!(
            "[Supervisor] Launching producer (generation {generation}): {}",
            self.producer.command_line()
        );

        match spawn::launch(&self.producer, generation, self.events.clone()) {
            Ok(instance) => {
                log::info!("[Supervisor] Producer running, pid {:?}", instance.pid);
                self.set_state(ProducerState::Running {
                    pid: instance.pid,
                    generation,
                });
                self.instance = Some(instance);
            }
            Err(e) => {
                log::error!("[Supervisor] {e}");
                let reason = ExitReason::LaunchFailed {
                    message: e.to_string(),
                };
                self.schedule_restart(reason, self.restart_delay);
            }
        }
    }

    fn schedule_restart(&mut self, reason: ExitReason, delay: Duration) {
        log::info!("[Supervisor] Producer {reason}; restarting in {}ms", delay.as_millis());
        self.timer.schedule(delay);
        self.set_state(ProducerState::Backoff {
            reason,
            retry_in_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
        });
    }

    fn stop(&mut self, reply: oneshot::Sender<()>) {
        self.timer.cancel();
        match &self.instance {
            Some(instance) => {
                log::info!("[Supervisor] Stopping producer generation {}", instance.generation);
                instance.kill();
                self.stop_waiters.push(reply);
            }
            None => {
                self.set_state(ProducerState::Idle);
                let _ = reply.send(());
            }
        }
    }

    fn handle_instance_event(&mut self, event: InstanceEvent) {
        match event {
            InstanceEvent::Output { generation, chunk } => {
                let Some(instance) = self
                    .instance
                    .as_mut()
                    .filter(|instance| instance.generation == generation && !instance.is_killed())
                else {
                    return;
                };

                for record in self.extractor.feed(&chunk) {
                    if self.records.send(record).is_err() {
                        log::debug!("[Supervisor] Record receiver dropped");
                    }
                }

                if let Err(e) = self.extractor.check_limit() {
                    log::error!("[Supervisor] {e}; killing producer generation {generation}");
                    instance.overflowed = true;
                    instance.kill();
                    self.extractor.reset();
                }
            }
            InstanceEvent::Exited { generation, code } => {
                if self.instance.as_ref().map(|instance| instance.generation) != Some(generation) {
                    return;
                }
                let Some(instance) = self.instance.take() else {
                    return;
                };
                // Half-received frames don't survive the process.
                self.extractor.reset();

                if !self.stop_waiters.is_empty() {
                    log::info!("[Supervisor] Producer stopped");
                    self.set_state(ProducerState::Idle);
                    for reply in self.stop_waiters.drain(..) {
                        let _ = reply.send(());
                    }
                    return;
                }

                if instance.overflowed {
                    self.schedule_restart(ExitReason::BufferOverflow, self.restart_delay);
                } else {
                    log::warn!("[Supervisor] Producer exited (code {code:?})");
                    self.schedule_restart(ExitReason::Exited { code }, self.restart_delay);
                }
            }
        }
    }
}
