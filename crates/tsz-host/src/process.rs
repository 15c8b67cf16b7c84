//! Server process abstraction.
//!
//! A server client talks to its process through two halves: a
//! [`TsServerProcess`] it writes requests to, and a channel of
//! [`ProcessEvent`]s it reads from. [`ChildServerProcess`] implements this
//! over a real child's stdio; tests substitute an in-memory double.

use std::io;
use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tsz_host_wire::{Message, Request, WireError, WireReader, encode_line};

const READ_CHUNK_SIZE: usize = 16 * 1024;

pub trait TsServerProcess: Send {
    fn write(&mut self, request: &Request) -> io::Result<()>;
    fn kill(&mut self);
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitStatus {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

/// Failure of the process itself (as opposed to a failed request).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ProcessError(pub String);

#[derive(Debug)]
pub enum ProcessEvent {
    Message(Message),
    ReaderError(WireError),
    Exit(ExitStatus),
    Error(ProcessError),
}

/// What to launch.
#[derive(Debug, Clone, Default)]
pub struct ProcessSpec {
    pub label: String,
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
}

/// A tsserver child process driven by tokio tasks.
pub struct ChildServerProcess {
    label: String,
    stdin: mpsc::UnboundedSender<Vec<u8>>,
    kill: CancellationToken,
    pid: Option<u32>,
}

impl ChildServerProcess {
    /// Launch the child. Must be called from within a tokio runtime.
    pub fn spawn(spec: &ProcessSpec) -> io::Result<(Self, mpsc::UnboundedReceiver<ProcessEvent>)> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn()?;
        let pid = child.id();
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("child stdin is not piped"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("child stdout is not piped"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::other("child stderr is not piped"))?;

        tracing::info!(server = %spec.label, program = %spec.program, ?pid, "spawned server process");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (stdin_tx, stdin_rx) = mpsc::unbounded_channel();
        let kill = CancellationToken::new();

        tokio::spawn(write_stdin(spec.label.clone(), stdin, stdin_rx));
        let reader = tokio::spawn(read_stdout(stdout, events_tx.clone()));
        tokio::spawn(log_stderr(spec.label.clone(), stderr));
        tokio::spawn(wait_for_exit(
            spec.label.clone(),
            child,
            kill.clone(),
            reader,
            events_tx,
        ));

        Ok((
            Self {
                label: spec.label.clone(),
                stdin: stdin_tx,
                kill,
                pid,
            },
            events_rx,
        ))
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }
}

impl TsServerProcess for ChildServerProcess {
    fn write(&mut self, request: &Request) -> io::Result<()> {
        let line = encode_line(request).map_err(io::Error::other)?;
        self.stdin
            .send(line)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "server stdin is closed"))
    }

    fn kill(&mut self) {
        tracing::info!(server = %self.label, pid = ?self.pid, "killing server process");
        self.kill.cancel();
    }
}

async fn write_stdin(label: String, mut stdin: ChildStdin, mut lines: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(line) = lines.recv().await {
        let written = match stdin.write_all(&line).await {
            Ok(()) => stdin.flush().await,
            Err(err) => Err(err),
        };
        if let Err(err) = written {
            // The exit watcher reports the process going away.
            tracing::warn!(server = %label, %err, "failed to write to server stdin");
            break;
        }
    }
}

async fn read_stdout(mut stdout: ChildStdout, events: mpsc::UnboundedSender<ProcessEvent>) {
    let mut reader = WireReader::new();
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];
    loop {
        let read = match stdout.read(&mut chunk).await {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) => {
                tracing::debug!(%err, "server stdout closed with error");
                break;
            }
        };
        reader.push(&chunk[..read]);
        while let Some(item) = reader.next_message() {
            let event = match item {
                Ok(message) => ProcessEvent::Message(message),
                Err(err) => ProcessEvent::ReaderError(err),
            };
            if events.send(event).is_err() {
                return;
            }
        }
    }
}

async fn log_stderr(label: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(target: "tsz_host::server_stderr", server = %label, "{line}");
    }
}

async fn wait_for_exit(
    label: String,
    mut child: Child,
    kill: CancellationToken,
    reader: JoinHandle<()>,
    events: mpsc::UnboundedSender<ProcessEvent>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill.cancelled() => {
            if let Err(err) = child.start_kill() {
                tracing::debug!(server = %label, %err, "kill failed");
            }
            child.wait().await
        }
    };

    // Deliver whatever the server wrote before it went away.
    let _ = reader.await;

    let event = match status {
        Ok(status) => {
            let status = ExitStatus::from(status);
            tracing::info!(server = %label, code = ?status.code, signal = ?status.signal, "server process exited");
            ProcessEvent::Exit(status)
        }
        Err(err) => {
            tracing::error!(server = %label, %err, "failed waiting for server process");
            ProcessEvent::Error(ProcessError(err.to_string()))
        }
    };
    let _ = events.send(event);
}

#[cfg(test)]
#[path = "../tests/process_tests.rs"]
mod process_tests;
