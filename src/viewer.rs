//! Command-line viewer: subscribes to a relay and renders session deltas.
//!
//! The viewer owns one [`SessionState`] for the lifetime of the process and
//! keeps it across reconnects, like a map page whose socket drops and comes
//! back. Each record update is applied and the resulting [`VisualDelta`] is
//! printed as one line, either as JSON or as the status row.
//!
//! Lines typed on stdin drive the interactive parts of the session:
//!
//! - `focus` - print the anomaly focus (or the "nothing to focus" notice)
//! - `interact` - simulate a manual pan/zoom, suppressing auto-fit

use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::record::RecordUpdate;
use crate::session::{Focus, SessionState, ViewFit, VisualDelta};
use crate::ws::{self, WsMessage};

const INITIAL_BACKOFF_SECS: u64 = 1;
const MAX_BACKOFF_SECS: u64 = 30;

/// How deltas are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Status row plus marker summary.
    Text,
}

/// Settings for [`watch`].
#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Server address (`http://host:port`, `ws://host:port/ws` or `host:port`).
    pub server: String,
    /// Output format.
    pub format: OutputFormat,
    /// Reconnect after the connection drops.
    pub reconnect: bool,
}

/// Stdin command understood by the viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerCommand {
    /// Print the anomaly focus.
    Focus,
    /// Simulate manual view interaction.
    Interact,
}

impl ViewerCommand {
    /// Parse one input line.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim() {
            "focus" | "f" => Some(Self::Focus),
            "interact" | "i" => Some(Self::Interact),
            _ => None,
        }
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Output<'a> {
    Delta(&'a VisualDelta),
    Focus { fit: Option<&'a ViewFit>, notice: Option<&'a str> },
}

/// Session plus output sink; everything but the transport.
#[derive(Debug)]
pub struct Viewer<W> {
    session: SessionState,
    format: OutputFormat,
    out: W,
}

impl<W: Write> Viewer<W> {
    /// New viewer with an empty session.
    pub fn new(format: OutputFormat, out: W) -> Self {
        Self {
            session: SessionState::new(),
            format,
            out,
        }
    }

    /// The session state.
    pub fn session(&self) -> &SessionState {
        &self.session
    }

    /// Consume the viewer, returning its output sink.
    pub fn into_output(self) -> W {
        self.out
    }

    /// Handle one text message from the server.
    ///
    /// Messages that aren't record updates are ignored. Returns the applied
    /// delta, if any.
    pub fn handle_text(&mut self, text: &str) -> Result<Option<VisualDelta>> {
        let update: RecordUpdate = match serde_json::from_str(text) {
            Ok(update) => update,
            Err(e) => {
                log::warn!("[Viewer] Ignoring unparsable message: {e}");
                return Ok(None);
            }
        };
        if !update.is_record() {
            log::debug!("[Viewer] Ignoring event {}", update.event);
            return Ok(None);
        }

        let delta = self.session.apply(&update.data);
        self.emit_delta(&delta)?;
        Ok(Some(delta))
    }

    /// Handle one stdin command.
    pub fn handle_command(&mut self, command: ViewerCommand) -> Result<()> {
        match command {
            ViewerCommand::Interact => {
                self.session.mark_interacted();
                log::info!("[Viewer] Auto-fit suspended until the next loop restart");
                Ok(())
            }
            ViewerCommand::Focus => {
                let focus = self.session.focus_on_anomalies();
                self.emit_focus(&focus)
            }
        }
    }

    fn emit_delta(&mut self, delta: &VisualDelta) -> Result<()> {
        match self.format {
            OutputFormat::Json => self.write_json(&Output::Delta(delta)),
            OutputFormat::Text => {
                if delta.is_reset() {
                    writeln!(self.out, "-- loop restart: view reset --")?;
                }
                let marker = delta
                    .placed_marker()
                    .map_or_else(String::new, |(key, style)| format!(" [{key}: {}]", style.color()));
                writeln!(self.out, "{}{marker}", delta.status)?;
                Ok(())
            }
        }
    }

    fn emit_focus(&mut self, focus: &Focus) -> Result<()> {
        let (fit, notice) = match focus {
            Focus::Fit(fit) => (Some(fit), None),
            Focus::NothingToFocus => (None, focus.notice()),
        };
        match self.format {
            OutputFormat::Json => self.write_json(&Output::Focus { fit, notice }),
            OutputFormat::Text => {
                match (fit, notice) {
                    (Some(fit), _) => writeln!(
                        self.out,
                        "focus: ({}, {}) .. ({}, {})",
                        fit.bounds.south_west.lat,
                        fit.bounds.south_west.lon,
                        fit.bounds.north_east.lat,
                        fit.bounds.north_east.lon
                    )?,
                    (None, notice) => writeln!(self.out, "{}", notice.unwrap_or_default())?,
                }
                Ok(())
            }
        }
    }

    fn write_json(&mut self, output: &Output<'_>) -> Result<()> {
        serde_json::to_writer(&mut self.out, output)?;
        writeln!(self.out)?;
        self.out.flush()?;
        Ok(())
    }
}

/// Subscribe to `options.server` and print deltas until `shutdown` is
/// cancelled, or until the connection drops when reconnecting is off.
pub async fn watch(options: WatchOptions, shutdown: CancellationToken) -> Result<()> {
    let url = ws::subscription_url(&options.server);
    let mut viewer = Viewer::new(options.format, std::io::stdout());
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut backoff_secs = INITIAL_BACKOFF_SECS;

    loop {
        log::info!("[Viewer] Connecting to {url}");
        match ws::connect(&url).await {
            Ok((mut writer, mut reader)) => {
                log::info!("[Viewer] Connected");
                backoff_secs = INITIAL_BACKOFF_SECS;

                loop {
                    tokio::select! {
                        () = shutdown.cancelled() => {
                            let _ = writer.close().await;
                            return Ok(());
                        }
                        line = stdin.next_line(), if stdin_open => match line {
                            Ok(Some(line)) => match ViewerCommand::parse(&line) {
                                Some(command) => viewer.handle_command(command)?,
                                None => log::warn!("[Viewer] Unknown command {line:?} (try: focus, interact)"),
                            },
                            Ok(None) | Err(_) => stdin_open = false,
                        },
                        message = reader.recv() => match message {
                            Some(Ok(WsMessage::Text(text))) => {
                                viewer.handle_text(&text).context("Failed to write output")?;
                            }
                            Some(Ok(WsMessage::Ping(data))) => {
                                if let Err(e) = writer.send_pong(data).await {
                                    log::warn!("[Viewer] {e}");
                                }
                            }
                            Some(Ok(WsMessage::Binary(len))) => {
                                log::debug!("[Viewer] Ignoring {len}-byte binary message");
                            }
                            Some(Ok(WsMessage::Close { code, reason })) => {
                                log::info!("[Viewer] Server closed connection ({code}) {reason}");
                                break;
                            }
                            Some(Err(e)) => {
                                log::warn!("[Viewer] {e}");
                                break;
                            }
                            None => break,
                        },
                    }
                }
            }
            Err(e) => log::warn!("[Viewer] {e:#}"),
        }

        if !options.reconnect {
            anyhow::bail!("Disconnected from {url}");
        }

        let jitter_ms = rand::random::<u64>() % 1000;
        let wait = Duration::from_millis(backoff_secs * 1000 + jitter_ms);
        log::info!("[Viewer] Reconnecting in {:.1}s...", wait.as_secs_f32());
        tokio::select! {
            () = tokio::time::sleep(wait) => {}
            () = shutdown.cancelled() => return Ok(()),
        }
        backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
    }
}
