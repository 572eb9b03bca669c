//! Launching one producer instance and driving its pipes.
//!
//! A single task per instance reads stdout and then waits for the process to
//! exit, reporting both on the same channel. The exit notice is therefore
//! always delivered after the last output chunk. Stderr is drained by its own
//! task and only logged.

use std::io;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::SupervisorError;
use crate::config::ProducerConfig;
use crate::constants::STDOUT_READ_BUFFER;

/// Something that happened to a running instance.
#[derive(Debug)]
pub(super) enum InstanceEvent {
    /// A chunk of stdout, exactly as read from the pipe.
    Output { generation: u64, chunk: Vec<u8> },
    /// The process exited. `code` is `None` when killed by a signal.
    Exited { generation: u64, code: Option<i32> },
}

/// Handle to the live producer process.
#[derive(Debug)]
pub(super) struct Instance {
    pub generation: u64,
    pub pid: Option<u32>,
    /// Set when the instance was killed for overflowing the frame buffer.
    pub overflowed: bool,
    kill: CancellationToken,
}

impl Instance {
    /// Ask the driver task to kill the process. The exit is still reported.
    pub fn kill(&self) {
        self.kill.cancel();
    }

    pub fn is_killed(&self) -> bool {
        self.kill.is_cancelled()
    }
}

/// Start the producer and the tasks that drive its pipes.
pub(super) fn launch(
    producer: &ProducerConfig,
    generation: u64,
    events: mpsc::UnboundedSender<InstanceEvent>,
) -> Result<Instance, SupervisorError> {
    let launch_error = |source: io::Error| SupervisorError::Launch {
        program: producer.program.clone(),
        source,
    };

    let mut child = Command::new(&producer.program)
        .args(&producer.args)
        .current_dir(&producer.working_dir)
        .envs(&producer.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(launch_error)?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| launch_error(io::Error::other("stdout was not captured")))?;
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(log_stderr(stderr, generation));
    }

    let pid = child.id();
    let kill = CancellationToken::new();
    tokio::spawn(drive(child, stdout, generation, events, kill.clone()));

    Ok(Instance {
        generation,
        pid,
        overflowed: false,
        kill,
    })
}

async fn drive(
    mut child: Child,
    mut stdout: ChildStdout,
    generation: u64,
    events: mpsc::UnboundedSender<InstanceEvent>,
    kill: CancellationToken,
) {
    let mut buf = vec![0u8; STDOUT_READ_BUFFER];
    loop {
        tokio::select! {
            () = kill.cancelled() => break,
            read = stdout.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => {
                    let chunk = buf[..n].to_vec();
                    if events.send(InstanceEvent::Output { generation, chunk }).is_err() {
                        // Supervisor is gone; nobody will restart us either.
                        kill.cancel();
                        break;
                    }
                }
                Err(e) => {
                    log::warn!("[Supervisor] Read error on producer stdout: {e}");
                    break;
                }
            },
        }
    }

    // Stdout may close before the process exits, so keep honouring kill.
    let status = if kill.is_cancelled() {
        kill_and_wait(&mut child).await
    } else {
        tokio::select! {
            status = child.wait() => status,
            () = kill.cancelled() => kill_and_wait(&mut child).await,
        }
    };

    let code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            log::warn!("[Supervisor] Failed to reap producer: {e}");
            None
        }
    };
    let _ = events.send(InstanceEvent::Exited { generation, code });
}

async fn kill_and_wait(child: &mut Child) -> io::Result<std::process::ExitStatus> {
    if let Err(e) = child.start_kill() {
        log::debug!("[Supervisor] start_kill: {e}");
    }
    child.wait().await
}

async fn log_stderr(stderr: ChildStderr, generation: u64) {
    let mut reader = BufReader::new(stderr);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&line);
                log::info!("[producer:{generation}] {}", text.trim_end());
            }
            Err(e) => {
                log::debug!("[Supervisor] Stopped reading producer stderr: {e}");
                break;
            }
        }
    }
}
