//! Command specification and process spawning.

use std::ffi::{OsStr, OsString};
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use super::cancel::CancelToken;
use super::errors::{ProcessError, ProcessResult};
use super::handle::{ProcessHandle, SpawnedChild};
use super::locate::ToolPaths;
use crate::config::Settings;

/// Callback receiving each stderr line as it arrives.
pub type LineSink = Box<dyn FnMut(&str) + Send>;

/// Default grace period between SIGTERM and a forced kill.
const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// Default number of stderr lines retained.
const DEFAULT_TAIL_LINES: usize = 20;

/// Where the child's stdout goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StdoutMode {
    /// Captured through a pipe.
    #[default]
    Piped,
    /// Discarded.
    Null,
}

/// A program invocation.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub stdin: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
    pub stdout: StdoutMode,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            timeout: None,
            stdout: StdoutMode::Piped,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Bytes written to the child's stdin, which is closed afterwards.
    pub fn stdin(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(bytes.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn stdout(mut self, mode: StdoutMode) -> Self {
        self.stdout = mode;
        self
    }

    fn display_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.display().to_string())
    }
}

/// Captured result of a completed process.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub stdout: Vec<u8>,
    pub stderr_tail: Vec<String>,
    pub elapsed: Duration,
}

impl ProcessOutput {
    /// Stdout decoded as UTF-8 (lossy).
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }
}

/// Runs external programs under supervision.
///
/// Cheap to clone; every component holds its own copy.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    tools: ToolPaths,
    grace_period: Duration,
    tail_lines: usize,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(ToolPaths::default())
    }
}

impl ProcessRunner {
    pub fn new(tools: ToolPaths) -> Self {
        Self {
            tools,
            grace_period: DEFAULT_GRACE_PERIOD,
            tail_lines: DEFAULT_TAIL_LINES,
        }
    }

    /// Build a runner from the `[tools]` and `[logging]` sections.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            tools: settings.tools.tool_paths(),
            grace_period: Duration::from_millis(settings.tools.terminate_grace_ms),
            tail_lines: settings.logging.stderr_tail,
        }
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_tail_lines(mut self, lines: usize) -> Self {
        self.tail_lines = lines;
        self
    }

    /// Configured tool locations.
    pub fn tools(&self) -> &ToolPaths {
        &self.tools
    }

    /// Start a process and return its handle.
    ///
    /// Stderr lines are delivered to `on_stderr` from a reader thread as
    /// they arrive; stdout is left on the handle for the caller to take.
    pub fn spawn(
        &self,
        spec: CommandSpec,
        cancel: &CancelToken,
        on_stderr: Option<LineSink>,
    ) -> ProcessResult<ProcessHandle> {
        let name = spec.display_name();
        if cancel.is_cancelled() {
            return Err(ProcessError::Cancelled { program: name });
        }

        let resolved = self.tools.resolve(&spec.program)?;

        let mut cmd = Command::new(&resolved);
        cmd.args(&spec.args)
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(match spec.stdout {
                StdoutMode::Piped => Stdio::piped(),
                StdoutMode::Null => Stdio::null(),
            })
            .stderr(Stdio::piped());

        tracing::debug!("Running {}: {:?}", name, cmd);

        let child = cmd.spawn().map_err(|e| match e.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
                ProcessError::ExecutableNotFound {
                    program: resolved.display().to_string(),
                    searched: e.to_string(),
                }
            }
            _ => ProcessError::io(&name, "spawn", e),
        })?;

        Ok(ProcessHandle::start(
            SpawnedChild {
                program: name,
                child,
                stdin_bytes: spec.stdin,
                timeout: spec.timeout,
                grace_period: self.grace_period,
                tail_lines: self.tail_lines,
                on_stderr,
            },
            cancel,
        ))
    }

    /// Run a process to completion, collecting its stdout.
    pub fn run(&self, spec: CommandSpec, cancel: &CancelToken) -> ProcessResult<ProcessOutput> {
        let mut handle = self.spawn(spec, cancel, None)?;

        let mut stdout = Vec::new();
        let read_err = match handle.take_stdout() {
            Some(mut pipe) => pipe.read_to_end(&mut stdout).err(),
            None => None,
        };

        let program = handle.program().to_string();
        let status = handle.wait()?;
        if let Some(e) = read_err {
            return Err(ProcessError::io(&program, "read stdout", e));
        }

        Ok(ProcessOutput {
            stdout,
            stderr_tail: status.stderr_tail,
            elapsed: status.elapsed,
        })
    }
}
