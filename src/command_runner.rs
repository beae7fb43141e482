//! External command execution.
//!
//! Every external program (`schroot`, `apt-get`, `dpkg`, `git`, `ffmpeg`,
//! `shellcheck`, `xdg-open`) goes through a [`CommandRunner`]. The
//! [`SystemRunner`] spawns real processes; [`ScriptedRunner`] answers from a
//! table of canned responses and is what the tests drive the tools with.
//!
//! # Process handling
//!
//! Captured commands run in their own process group with a parent-death
//! signal and are registered with [`ChildRegistry::global`], so a timeout or
//! a Ctrl+C takes down the whole tree below `schroot`. Foreground commands
//! (interactive shells, `ffmpeg`) stay in our process group so they keep the
//! terminal.

use crate::process_guard::{send_signal_to_group, ChildRegistry, CommandProcessGroup};
use nix::sys::signal::Signal;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors raised before a command produced an exit status.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("{program} not found")]
    NotFound { program: String },

    #[error("{program} timed out after {} s", timeout.as_secs_f64())]
    Timeout { program: String, timeout: Duration },

    #[error("failed to run {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no scripted response for: {0}")]
    Unscripted(String),
}

/// How the child's standard streams are wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdioMode {
    /// Capture stdout and stderr; own process group.
    Capture,
    /// Inherit the terminal; stays in the foreground process group.
    Foreground,
}

/// A command to run, built up fluently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    cwd: Option<PathBuf>,
    stdin: Option<Vec<u8>>,
    timeout: Option<Duration>,
    mode: StdioMode,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
            stdin: None,
            timeout: None,
            mode: StdioMode::Capture,
        }
    }

    /// Build from a full argv; the first element is the program.
    pub fn from_argv<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut argv = argv.into_iter().map(Into::into);
        let program = argv.next().unwrap_or_default();
        Self::new(program).args(argv)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Feed these bytes to the child's stdin.
    pub fn stdin_bytes(mut self, bytes: Vec<u8>) -> Self {
        self.stdin = Some(bytes);
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn foreground(mut self) -> Self {
        self.mode = StdioMode::Foreground;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Program followed by its arguments.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }

    pub fn env_vars(&self) -> &[(String, String)] {
        &self.env
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    pub fn stdin(&self) -> Option<&[u8]> {
        self.stdin.as_deref()
    }

    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn mode(&self) -> StdioMode {
        self.mode
    }

    /// Shell-like rendering for log messages.
    pub fn display(&self) -> String {
        self.argv().join(" ")
    }
}

/// Result of a command that ran to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code (None if terminated by a signal).
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn new(code: i32, stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            code: Some(code),
            stdout: stdout.into(),
            stderr: Vec::new(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Exit code for propagating to our own exit status; signals map to 1.
    pub fn exit_code(&self) -> i32 {
        self.code.unwrap_or(1)
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Turn a non-zero exit into an error naming `context`.
    pub fn ensure_success(self, context: &str) -> crate::error::Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            let stderr = self.stderr_text();
            Err(crate::error::ToolsError::command_failed(format!(
                "{} failed (exit code {}){}{}",
                context,
                self.code.map_or_else(|| "signal".to_string(), |c| c.to_string()),
                if stderr.trim().is_empty() { "" } else { ": " },
                stderr.trim()
            )))
        }
    }
}

/// Seam between the tools and the operating system.
pub trait CommandRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ExecError>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ExecError> {
        (**self).run(invocation)
    }
}

/// Runs commands as real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ExecError> {
        let program = invocation.program().to_string();
        let io_error = |source: std::io::Error| ExecError::Io {
            program: program.clone(),
            source,
        };

        let mut cmd = Command::new(invocation.program());
        cmd.args(&invocation.args);
        for (key, value) in &invocation.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &invocation.cwd {
            cmd.current_dir(dir);
        }
        cmd.stdin(if invocation.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::inherit()
        });
        if invocation.mode == StdioMode::Capture {
            cmd.stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .in_new_process_group();
        }

        debug!("Spawning: {}", invocation.display());
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ExecError::NotFound {
                    program: program.clone(),
                });
            }
            Err(e) => return Err(io_error(e)),
        };
        let pid = child.id();
        if let Ok(mut registry) = ChildRegistry::global().lock() {
            registry.register(pid);
        }

        let stdin_writer = match (child.stdin.take(), invocation.stdin.clone()) {
            (Some(mut pipe), Some(bytes)) => Some(std::thread::spawn(move || {
                // A child that exits early closes the pipe; that is its answer.
                if let Err(e) = pipe.write_all(&bytes) {
                    if e.kind() != std::io::ErrorKind::BrokenPipe {
                        warn!("Failed to write stdin: {}", e);
                    }
                }
            })),
            _ => None,
        };
        let stdout_reader = child.stdout.take().map(spawn_reader);
        let stderr_reader = child.stderr.take().map(spawn_reader);

        let waited = wait_with_deadline(&mut child, invocation.timeout, invocation.mode);

        if let Ok(mut registry) = ChildRegistry::global().lock() {
            registry.unregister(pid);
        }

        let status = match waited.map_err(io_error)? {
            Some(status) => status,
            None => {
                // Readers are left detached: an escaped grandchild may still
                // hold the pipes open.
                return Err(ExecError::Timeout {
                    program,
                    timeout: invocation.timeout.unwrap_or_default(),
                });
            }
        };

        if let Some(writer) = stdin_writer {
            let _ = writer.join();
        }
        let stdout = stdout_reader.map(join_reader).unwrap_or_default();
        let stderr = stderr_reader.map(join_reader).unwrap_or_default();

        Ok(CommandOutput {
            code: status.code(),
            stdout,
            stderr,
        })
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Err(e) = pipe.read_to_end(&mut buffer) {
            warn!("Failed to read child output: {}", e);
        }
        buffer
    })
}

fn join_reader(handle: JoinHandle<Vec<u8>>) -> Vec<u8> {
    handle.join().unwrap_or_default()
}

/// Wait for the child, killing it once `timeout` elapsed.
///
/// Returns `Ok(None)` on timeout.
fn wait_with_deadline(
    child: &mut Child,
    timeout: Option<Duration>,
    mode: StdioMode,
) -> std::io::Result<Option<ExitStatus>> {
    let Some(timeout) = timeout else {
        return child.wait().map(Some);
    };

    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if start.elapsed() >= timeout {
            warn!("PID {} exceeded timeout of {} s, killing it", child.id(), timeout.as_secs_f64());
            if mode == StdioMode::Capture {
                let _ = send_signal_to_group(child.id(), Signal::SIGKILL);
            }
            let _ = child.kill();
            child.wait()?;
            return Ok(None);
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

#[derive(Debug, Clone)]
enum ScriptedOutcome {
    Output(CommandOutput),
    Timeout,
    NotFound,
}

#[derive(Debug)]
struct ScriptedResponse {
    argv: Vec<String>,
    outcome: ScriptedOutcome,
    call_count: usize,
}

/// Test double answering from canned responses keyed by argv.
///
/// Never spawns anything. Unknown argv yields [`ExecError::Unscripted`]
/// naming the call, so a test fails with the exact command it did not
/// expect. Only reachable as `command_runner::ScriptedRunner`; the crate
/// root re-exports the production runner alone.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    responses: Mutex<Vec<ScriptedResponse>>,
    calls: Mutex<Vec<Invocation>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, argv: Vec<String>, outcome: ScriptedOutcome) -> Self {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push(ScriptedResponse {
                argv,
                outcome,
                call_count: 0,
            });
        }
        self
    }

    /// Answer `argv` with exit code `code` and the given stdout.
    pub fn respond<I, S>(self, argv: I, code: i32, stdout: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let argv = argv.into_iter().map(Into::into).collect();
        self.push(argv, ScriptedOutcome::Output(CommandOutput::new(code, stdout)))
    }

    /// Answer `argv` with raw stdout and stderr bytes.
    pub fn respond_output<I, S>(self, argv: I, output: CommandOutput) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let argv = argv.into_iter().map(Into::into).collect();
        self.push(argv, ScriptedOutcome::Output(output))
    }

    /// Answer `argv` as if it ran past its timeout.
    pub fn respond_timeout<I, S>(self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let argv = argv.into_iter().map(Into::into).collect();
        self.push(argv, ScriptedOutcome::Timeout)
    }

    /// Answer `argv` as if the program is not installed.
    pub fn respond_not_found<I, S>(self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let argv = argv.into_iter().map(Into::into).collect();
        self.push(argv, ScriptedOutcome::NotFound)
    }

    /// All invocations seen so far, in order.
    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Scripted argv that were never requested.
    pub fn uncalled(&self) -> Vec<Vec<String>> {
        self.responses
            .lock()
            .map(|responses| {
                responses
                    .iter()
                    .filter(|r| r.call_count == 0)
                    .map(|r| r.argv.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ExecError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(invocation.clone());
        }
        let argv = invocation.argv();
        let mut responses = self
            .responses
            .lock()
            .map_err(|_| ExecError::Unscripted(argv.join(" ")))?;
        let response = responses
            .iter_mut()
            .find(|r| r.argv == argv)
            .ok_or_else(|| ExecError::Unscripted(format!("{:?}", argv)))?;
        response.call_count += 1;
        match &response.outcome {
            ScriptedOutcome::Output(output) => Ok(output.clone()),
            ScriptedOutcome::Timeout => Err(ExecError::Timeout {
                program: invocation.program().to_string(),
                timeout: invocation.timeout_duration().unwrap_or_default(),
            }),
            ScriptedOutcome::NotFound => Err(ExecError::NotFound {
                program: invocation.program().to_string(),
            }),
        }
    }
}
