//! The external package-manager seam.
//!
//! [`PackageManager`] runs one argv with a timeout and a cancellation token
//! and reports exactly what happened: exit code, captured output, duration.
//! It does not interpret results. [`SystemPackageManager`] spawns the real
//! process directly (no shell) in a process group of its own, so a timeout
//! or cancellation takes down everything the command started. Tests
//! substitute a scripted fake.

use crate::lock_or_recover;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Maximum output captured per stream
pub const MAX_OUTPUT_BYTES: usize = 64 * 1024;

const TRUNCATION_MARKER: &str = "\n[output truncated at 64 KiB]";

/// How long output readers may keep going once the process has ended
const READER_GRACE: Duration = Duration::from_millis(500);

/// Cooperative cancellation flag shared between a caller and the engine
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How a process run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProcessStatus {
    /// The process exited; `code` is `None` when a signal ended it
    Exited { code: Option<i32> },
    TimedOut,
    Cancelled,
    /// The process could not be started
    SpawnFailed { message: String },
}

/// Everything observed about one process run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessOutcome {
    pub status: ProcessStatus,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ProcessOutcome {
    pub fn exited(code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            status: ProcessStatus::Exited { code: Some(code) },
            stdout: stdout.into(),
            stderr: stderr.into(),
            duration: Duration::ZERO,
        }
    }

    pub fn success(&self) -> bool {
        self.status == ProcessStatus::Exited { code: Some(0) }
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self.status {
            ProcessStatus::Exited { code } => code,
            _ => None,
        }
    }
}

/// Runs package-manager commands
pub trait PackageManager: Send + Sync {
    /// Run `argv` (program first) to completion, timeout or cancellation
    fn run(&self, argv: &[String], timeout: Duration, cancel: &CancelToken) -> ProcessOutcome;
}

/// Spawns real processes
#[derive(Debug, Clone)]
pub struct SystemPackageManager {
    poll_interval: Duration,
}

impl Default for SystemPackageManager {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(20),
        }
    }
}

impl SystemPackageManager {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PackageManager for SystemPackageManager {
    fn run(&self, argv: &[String], timeout: Duration, cancel: &CancelToken) -> ProcessOutcome {
        let start = Instant::now();
        let spawn_failed = |message: String| ProcessOutcome {
            status: ProcessStatus::SpawnFailed { message },
            stdout: String::new(),
            stderr: String::new(),
            duration: start.elapsed(),
        };

        let Some((program, args)) = argv.split_first() else {
            return spawn_failed("empty argv".to_string());
        };

        let mut child = match Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                warn!(program = %program, error = %e, "Failed to spawn package manager");
                return spawn_failed(format!("{}: {}", program, e));
            }
        };

        // Drain both pipes concurrently so a chatty child never blocks
        let stdout_reader = child.stdout.take().map(OutputReader::spawn);
        let stderr_reader = child.stderr.take().map(OutputReader::spawn);

        let status = loop {
            match child.try_wait() {
                Ok(Some(exit)) => break ProcessStatus::Exited { code: exit.code() },
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "Lost track of package manager process");
                    terminate(&mut child);
                    break ProcessStatus::SpawnFailed {
                        message: e.to_string(),
                    };
                }
            }
            if cancel.is_cancelled() {
                debug!(program = %program, "Cancelling package manager");
                terminate(&mut child);
                break ProcessStatus::Cancelled;
            }
            if start.elapsed() >= timeout {
                debug!(program = %program, timeout_ms = timeout.as_millis() as u64, "Package manager timed out");
                terminate(&mut child);
                break ProcessStatus::TimedOut;
            }
            thread::sleep(self.poll_interval);
        };

        let deadline = Instant::now() + READER_GRACE;
        let collect = |reader: Option<OutputReader>| {
            reader.map(|reader| reader.finish(deadline)).unwrap_or_default()
        };

        ProcessOutcome {
            status,
            stdout: collect(stdout_reader),
            stderr: collect(stderr_reader),
            duration: start.elapsed(),
        }
    }
}

/// Kill the child's whole process group, then reap the child
fn terminate(child: &mut Child) {
    if let Ok(pgid) = libc::pid_t::try_from(child.id()) {
        // a negative pid addresses the process group
        unsafe { libc::kill(-pgid, libc::SIGKILL) };
    }
    let _ = child.kill();
    let _ = child.wait();
}

#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

/// A pipe drained on its own thread into a shared buffer
struct OutputReader {
    captured: Arc<Mutex<Captured>>,
    done: Receiver<()>,
}

impl OutputReader {
    fn spawn<R: Read + Send + 'static>(stream: R) -> Self {
        let captured = Arc::new(Mutex::new(Captured::default()));
        let (finished, done) = mpsc::channel();
        let sink = captured.clone();
        thread::spawn(move || {
            drain(stream, &sink);
            let _ = finished.send(());
        });
        Self { captured, done }
    }

    /// Wait for EOF until `deadline`, then take whatever was read. A
    /// descendant that escaped the kill may hold the pipe open; its reader
    /// is abandoned.
    fn finish(self, deadline: Instant) -> String {
        let wait = deadline.saturating_duration_since(Instant::now());
        if self.done.recv_timeout(wait).is_err() {
            debug!("Output pipe still open after exit, keeping what was read");
        }
        let captured = lock_or_recover(&self.captured);
        render_output(&captured.bytes, captured.truncated)
    }
}

/// Read a stream to EOF keeping at most [`MAX_OUTPUT_BYTES`]
fn drain<R: Read>(mut stream: R, sink: &Mutex<Captured>) {
    let mut chunk = [0u8; 8192];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let mut captured = lock_or_recover(sink);
                let room = MAX_OUTPUT_BYTES.saturating_sub(captured.bytes.len());
                if n > room {
                    captured.truncated = true;
                }
                captured.bytes.extend_from_slice(&chunk[..n.min(room)]);
            }
        }
    }
}

fn render_output(bytes: &[u8], truncated: bool) -> String {
    let mut text = String::from_utf8_lossy(bytes).into_owned();
    if truncated {
        text.push_str(TRUNCATION_MARKER);
    }
    text
}
