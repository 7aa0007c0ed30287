//! RAII owner of one external process.
//!
//! A [`ProcessHandle`] owns the child, its pipes and the helper threads
//! that service them:
//! - a supervisor that polls for exit, cancellation and the deadline
//! - a stderr reader that feeds the tail buffer and an optional line sink
//! - a stdin writer when input bytes were supplied
//!
//! Every exit path reaps the child. Dropping the handle without calling
//! [`ProcessHandle::wait`] terminates the process first.

use std::io::{self, Read, Write};
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, ExitStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::cancel::CancelToken;
use super::errors::{ProcessError, ProcessResult};
use super::output::{LineSplitter, OutputTail};
use super::runner::LineSink;

/// How often the supervisor checks the child.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Number of stderr lines quoted in failure diagnostics.
const DIAGNOSTIC_LINES: usize = 3;

/// Successful completion of a process.
#[derive(Debug, Clone)]
pub struct ProcessStatus {
    /// Most recent stderr lines.
    pub stderr_tail: Vec<String>,
    /// Wall-clock run time.
    pub elapsed: Duration,
}

/// How the supervisor saw the process end.
enum Exit {
    Status(ExitStatus),
    Cancelled,
    TimedOut(Duration),
    WaitFailed(io::Error),
}

/// Pieces handed over by the runner after spawning.
pub(crate) struct SpawnedChild {
    pub program: String,
    pub child: Child,
    pub stdin_bytes: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
    pub grace_period: Duration,
    pub tail_lines: usize,
    pub on_stderr: Option<LineSink>,
}

/// A running external process.
pub struct ProcessHandle {
    program: String,
    pid: u32,
    stdout: Option<ChildStdout>,
    supervisor: Option<JoinHandle<Exit>>,
    stderr_reader: Option<JoinHandle<()>>,
    stdin_writer: Option<JoinHandle<()>>,
    tail: Arc<Mutex<OutputTail>>,
    cancel: CancelToken,
    abandon: Arc<AtomicBool>,
    started: Instant,
}

impl ProcessHandle {
    pub(crate) fn start(spawned: SpawnedChild, cancel: &CancelToken) -> Self {
        let SpawnedChild {
            program,
            mut child,
            stdin_bytes,
            timeout,
            grace_period,
            tail_lines,
            on_stderr,
        } = spawned;

        let pid = child.id();
        let started = Instant::now();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdin = child.stdin.take();

        let tail = Arc::new(Mutex::new(OutputTail::new(tail_lines)));
        let stderr_reader = stderr.map(|pipe| spawn_stderr_reader(pipe, Arc::clone(&tail), on_stderr));
        let stdin_writer = match (stdin, stdin_bytes) {
            (Some(pipe), Some(bytes)) => Some(spawn_stdin_writer(pipe, bytes, program.clone())),
            _ => None,
        };

        let abandon = Arc::new(AtomicBool::new(false));
        let supervisor = {
            let child = Arc::new(Mutex::new(child));
            let cancel = cancel.clone();
            let abandon = Arc::clone(&abandon);
            let deadline = timeout.map(|t| (started + t, t));
            thread::spawn(move || supervise(&child, &cancel, &abandon, deadline, grace_period))
        };

        Self {
            program,
            pid,
            stdout,
            supervisor: Some(supervisor),
            stderr_reader,
            stdin_writer,
            tail,
            cancel: cancel.clone(),
            abandon,
            started,
        }
    }

    /// Name of the running program.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// OS process id.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Take the stdout pipe for incremental reading.
    ///
    /// Returns `None` if stdout was not piped or was already taken. The
    /// pipe reaches EOF when the process exits or is terminated.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    /// Request termination through the shared cancel token.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Snapshot of the most recent stderr lines.
    pub fn stderr_tail(&self) -> Vec<String> {
        self.tail.lock().lines()
    }

    /// Wait for the process to finish and classify the result.
    ///
    /// An untaken stdout pipe is closed first.
    pub fn wait(mut self) -> ProcessResult<ProcessStatus> {
        drop(self.stdout.take());

        let exit = match self.supervisor.take() {
            Some(handle) => handle.join().map_err(|_| {
                ProcessError::io(
                    &self.program,
                    "supervise",
                    io::Error::new(io::ErrorKind::Other, "supervisor thread panicked"),
                )
            })?,
            None => {
                return Err(ProcessError::io(
                    &self.program,
                    "wait",
                    io::Error::new(io::ErrorKind::Other, "process already collected"),
                ))
            }
        };

        self.join_pipes();

        let tail = self.tail.lock().clone();
        let elapsed = self.started.elapsed();

        match exit {
            Exit::Status(status) if status.success() => {
                tracing::debug!(
                    "{} finished in {:.2}s",
                    self.program,
                    elapsed.as_secs_f64()
                );
                Ok(ProcessStatus {
                    stderr_tail: tail.lines(),
                    elapsed,
                })
            }
            Exit::Status(status) => {
                let exit_code = status.code().unwrap_or(-1);
                tracing::debug!("{} exited with status {}", self.program, status);
                Err(ProcessError::NonZeroExit {
                    program: self.program.clone(),
                    exit_code,
                    stderr: tail.diagnostic(DIAGNOSTIC_LINES),
                })
            }
            Exit::Cancelled => Err(ProcessError::Cancelled {
                program: self.program.clone(),
            }),
            Exit::TimedOut(after) => {
                tracing::warn!("{} timed out after {:.1}s", self.program, after.as_secs_f64());
                Err(ProcessError::Timeout {
                    program: self.program.clone(),
                    after,
                })
            }
            Exit::WaitFailed(source) => Err(ProcessError::io(&self.program, "wait", source)),
        }
    }

    fn join_pipes(&mut self) {
        if let Some(writer) = self.stdin_writer.take() {
            let _ = writer.join();
        }
        if let Some(reader) = self.stderr_reader.take() {
            let _ = reader.join();
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        let Some(supervisor) = self.supervisor.take() else {
            return;
        };
        tracing::debug!("Abandoning {} (pid {})", self.program, self.pid);
        self.abandon.store(true, Ordering::SeqCst);
        drop(self.stdout.take());
        let _ = supervisor.join();
        self.join_pipes();
    }
}

/// Poll the child until it exits, is cancelled, or passes its deadline.
fn supervise(
    child: &Mutex<Child>,
    cancel: &CancelToken,
    abandon: &AtomicBool,
    deadline: Option<(Instant, Duration)>,
    grace_period: Duration,
) -> Exit {
    loop {
        match child.lock().try_wait() {
            Ok(Some(status)) => return Exit::Status(status),
            Ok(None) => {}
            Err(e) => {
                terminate(child, grace_period);
                return Exit::WaitFailed(e);
            }
        }

        if cancel.is_cancelled() || abandon.load(Ordering::SeqCst) {
            terminate(child, grace_period);
            return Exit::Cancelled;
        }

        if let Some((at, after)) = deadline {
            if Instant::now() >= at {
                terminate(child, grace_period);
                return Exit::TimedOut(after);
            }
        }

        thread::sleep(POLL_INTERVAL);
    }
}

/// Ask the child to stop, then force it after `grace_period`, then reap.
fn terminate(child: &Mutex<Child>, grace_period: Duration) {
    let pid = child.lock().id();
    request_stop(child, pid);

    let give_up_at = Instant::now() + grace_period;
    while Instant::now() < give_up_at {
        match child.lock().try_wait() {
            Ok(Some(_)) => return,
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(_) => break,
        }
    }

    let mut child = child.lock();
    if let Err(e) = child.kill() {
        tracing::debug!("Kill of pid {} returned: {}", pid, e);
    }
    if let Err(e) = child.wait() {
        tracing::warn!("Failed to reap pid {}: {}", pid, e);
    }
}

#[cfg(unix)]
fn request_stop(_child: &Mutex<Child>, pid: u32) {
    // The child is not reaped until the supervisor sees it exit, so the pid is still ours.
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc != 0 {
        tracing::debug!(
            "SIGTERM to pid {} failed: {}",
            pid,
            io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn request_stop(child: &Mutex<Child>, pid: u32) {
    if let Err(e) = child.lock().kill() {
        tracing::debug!("Kill of pid {} returned: {}", pid, e);
    }
}

fn spawn_stderr_reader(
    mut pipe: ChildStderr,
    tail: Arc<Mutex<OutputTail>>,
    mut sink: Option<LineSink>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut splitter = LineSplitter::new();
        let mut buf = [0u8; 8192];
        let mut deliver = |line: String| {
            if let Some(ref mut sink) = sink {
                sink(&line);
            }
            tail.lock().push(line);
        };

        loop {
            match pipe.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    for line in splitter.push(&buf[..n]) {
                        deliver(line);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        if let Some(line) = splitter.finish() {
            deliver(line);
        }
    })
}

fn spawn_stdin_writer(mut pipe: ChildStdin, bytes: Vec<u8>, program: String) -> JoinHandle<()> {
    thread::spawn(move || {
        if let Err(e) = pipe.write_all(&bytes) {
            if e.kind() != io::ErrorKind::BrokenPipe {
                tracing::warn!("Failed writing stdin of {}: {}", program, e);
            }
        }
        // Dropping the pipe signals EOF to the child.
    })
}
