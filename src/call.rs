//! Subprocess execution with deterministic shell semantics and observable
//! logging.
//!
//! Shell commands always run under `bash` with errexit, nounset, and
//! pipefail, so behavior does not depend on what `/bin/sh` happens to be on
//! the host and silent pipeline failures cannot slip through. Every
//! invocation is logged before it runs, with an optional secret redacted.

use std::fs::File;
use std::io;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tracing::info;

use crate::bridge::{SharedBuffer, Sink, StreamBridge};
use crate::error::{Result, ShellError};
use crate::signal;

/// Strict-mode prefix for every shell invocation: stop on first error,
/// treat unset variable expansion as an error, fail pipelines when any
/// stage fails.
const BASH_STRICT: &str = "set -o errexit; set -o nounset; set -o pipefail; ";

const WAIT_POLL: Duration = Duration::from_millis(10);

/// A command to execute: a shell line or a direct argument vector.
///
/// The distinction carries the invocation mode, so a vector can never be
/// accidentally handed to the shell and vice versa.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cmd {
    /// Interpreted by bash under the strict-mode prefix.
    Shell(String),
    /// Direct exec of the first element with the rest as arguments.
    Exec(Vec<String>),
}

impl From<&str> for Cmd {
    fn from(line: &str) -> Self {
        Self::Shell(line.to_string())
    }
}

impl From<String> for Cmd {
    fn from(line: String) -> Self {
        Self::Shell(line)
    }
}

impl From<Vec<String>> for Cmd {
    fn from(argv: Vec<String>) -> Self {
        Self::Exec(argv)
    }
}

impl From<&[&str]> for Cmd {
    fn from(argv: &[&str]) -> Self {
        Self::Exec(argv.iter().map(|arg| (*arg).to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Cmd {
    fn from(argv: [&str; N]) -> Self {
        Self::Exec(argv.iter().map(|arg| (*arg).to_string()).collect())
    }
}

impl Cmd {
    /// Copy-pasteable rendering for logs, with the optional secret
    /// replaced by `XXXX`.
    pub(crate) fn loggable(&self, redact: Option<&str>) -> String {
        let mut text = match self {
            Self::Shell(line) => line.clone(),
            Self::Exec(argv) => shell_words::join(argv),
        };
        if let Some(secret) = redact {
            if !secret.is_empty() {
                text = text.replace(secret, "XXXX");
            }
        }
        text
    }

    fn command(&self) -> Command {
        match self {
            Self::Shell(line) => {
                let mut command = Command::new("bash");
                command.arg("-c").arg(format!("{BASH_STRICT}{line}"));
                command
            }
            Self::Exec(argv) => match argv.split_first() {
                Some((program, args)) => {
                    let mut command = Command::new(program);
                    command.args(args);
                    command
                }
                // Rejected in run() before this is reached.
                None => Command::new(""),
            },
        }
    }
}

/// Standard-input wiring for a child process.
#[derive(Debug, Default)]
pub enum Source {
    /// Share the parent's stdin (the subprocess default).
    #[default]
    Inherit,
    /// No input; reads see immediate EOF.
    Null,
    /// Read from an OS-backed file.
    File(File),
}

/// Options shared by the executor entry points.
#[derive(Debug, Default)]
pub struct Exec {
    pub stdin: Source,
    pub stdout: Sink,
    pub stderr: Sink,
    /// Secret substring replaced with `XXXX` in the logged command line.
    pub redact: Option<String>,
    /// Kill and reap the child if it runs longer than this.
    pub timeout: Option<Duration>,
}

/// Run a command and wait for it to terminate; returns the exit code
/// without failing on non-zero exit (signal deaths map to negative codes).
pub fn call(cmd: impl Into<Cmd>, opts: Exec) -> Result<i32> {
    let cmd = cmd.into();
    let (status, _) = run(&cmd, opts)?;
    Ok(signal::exit_code(status))
}

/// Run a command and wait for it to terminate; a non-zero exit becomes
/// [`ShellError::CommandFailed`].
pub fn check_call(cmd: impl Into<Cmd>, opts: Exec) -> Result<()> {
    let cmd = cmd.into();
    let (status, log_cmd) = run(&cmd, opts)?;
    if status.success() {
        Ok(())
    } else {
        Err(ShellError::CommandFailed {
            command: log_cmd,
            status,
        })
    }
}

/// Run a command and return its captured stdout as raw bytes, failing like
/// [`check_call`] on non-zero exit. The `stdout` option is replaced by the
/// capture.
pub fn check_output_bytes(cmd: impl Into<Cmd>, mut opts: Exec) -> Result<Vec<u8>> {
    let capture = SharedBuffer::new();
    opts.stdout = Sink::Writer(Box::new(capture.clone()));
    let cmd = cmd.into();
    let (status, log_cmd) = run(&cmd, opts)?;
    if status.success() {
        Ok(capture.contents())
    } else {
        Err(ShellError::CommandFailed {
            command: log_cmd,
            status,
        })
    }
}

/// Like [`check_output_bytes`], decoded as UTF-8 with invalid sequences
/// replaced by U+FFFD — scripting output is text until proven otherwise.
/// Callers that need strict decoding take the bytes and decode themselves.
pub fn check_output(cmd: impl Into<Cmd>, opts: Exec) -> Result<String> {
    Ok(String::from_utf8_lossy(&check_output_bytes(cmd, opts)?).into_owned())
}

fn run(cmd: &Cmd, opts: Exec) -> Result<(ExitStatus, String)> {
    if let Cmd::Exec(argv) = cmd {
        if argv.is_empty() {
            return Err(ShellError::Usage("empty command vector".to_string()));
        }
    }

    let log_cmd = cmd.loggable(opts.redact.as_deref());
    info!("Executing: {log_cmd}");

    let mut command = cmd.command();
    command.stdin(match opts.stdin {
        Source::Inherit => Stdio::inherit(),
        Source::Null => Stdio::null(),
        Source::File(file) => Stdio::from(file),
    });
    let (stdout, stdout_bridge) = prepare_sink(opts.stdout)?;
    command.stdout(stdout);
    let (stderr, stderr_bridge) = prepare_sink(opts.stderr)?;
    command.stderr(stderr);

    let spawned = command.spawn();
    // The Command retains its copies of any pipe write ends for re-spawning;
    // dropping it here is what lets the drains see EOF when the child exits.
    drop(command);

    let mut child = match spawned {
        Ok(child) => child,
        Err(err) => {
            // Nothing was ever written into the pipes; tear the drains
            // down and report the spawn failure.
            let _ = finish_bridges(stdout_bridge, stderr_bridge);
            return Err(spawn_error(&log_cmd, err));
        }
    };

    let wait_result = wait_with_deadline(&mut child, opts.timeout, &log_cmd);
    let drain_result = finish_bridges(stdout_bridge, stderr_bridge);
    let status = wait_result?;
    drain_result?;
    Ok((status, log_cmd))
}

fn prepare_sink(sink: Sink) -> Result<(Stdio, Option<StreamBridge>)> {
    match sink {
        Sink::Inherit => Ok((Stdio::inherit(), None)),
        Sink::Null => Ok((Stdio::null(), None)),
        Sink::File(file) => Ok((Stdio::from(file), None)),
        Sink::Writer(dest) => {
            let (stdio, bridge) = StreamBridge::for_child(dest)?;
            Ok((stdio, Some(bridge)))
        }
    }
}

fn finish_bridges(stdout: Option<StreamBridge>, stderr: Option<StreamBridge>) -> Result<()> {
    let mut first_err = None;
    for bridge in [stdout, stderr].into_iter().flatten() {
        if let Err(err) = bridge.finish() {
            first_err.get_or_insert(err);
        }
    }
    match first_err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn wait_with_deadline(
    child: &mut Child,
    timeout: Option<Duration>,
    log_cmd: &str,
) -> Result<ExitStatus> {
    let Some(limit) = timeout else {
        return child.wait().map_err(ShellError::Io);
    };

    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait().map_err(ShellError::Io)? {
            return Ok(status);
        }
        if start.elapsed() >= limit {
            // Kill and fully reap before reporting, so the timeout never
            // leaves a zombie behind.
            child.kill().map_err(ShellError::Io)?;
            child.wait().map_err(ShellError::Io)?;
            return Err(ShellError::Timeout {
                operation: format!("running command: {log_cmd}"),
                limit,
            });
        }
        std::thread::sleep(WAIT_POLL);
    }
}

fn spawn_error(command: &str, err: io::Error) -> ShellError {
    if err.kind() == io::ErrorKind::NotFound {
        ShellError::CommandNotFound {
            command: command.to_string(),
            source: err,
        }
    } else {
        ShellError::Io(err)
    }
}
