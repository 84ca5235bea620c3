//! Locate, terminate, and await readiness of OS processes.
//!
//! Termination is a two-tier escalation: SIGTERM, a bounded grace wait,
//! then SIGKILL for whatever survived. The current process and its
//! ancestors are never signaled, and targets that vanish or deny
//! permission are logged and skipped rather than failing the batch.

use std::collections::HashSet;
use std::thread;
use std::time::{Duration, Instant};

use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, info};

use crate::env::resolve_env;
use crate::error::{Result, ShellError};
use crate::signal;
use crate::sockets;

const KILL_POLL: Duration = Duration::from_millis(20);
const SERVER_POLL: Duration = Duration::from_millis(10);

/// Live view onto one OS process.
///
/// The command line is cached at observation time; the process itself can
/// exit at any moment afterwards, at which point operations on the handle
/// surface [`ShellError::NoSuchProcess`] instead of crashing.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pid: u32,
    cmdline: String,
}

impl ProcessHandle {
    /// Wrap a known pid, verifying the process is currently alive.
    pub fn new(pid: u32) -> Result<Self> {
        let mut sys = System::new();
        sys.refresh_processes(ProcessesToUpdate::Some(&[Pid::from_u32(pid)]), true);
        match sys.process(Pid::from_u32(pid)) {
            Some(proc_) => Ok(Self {
                pid,
                cmdline: join_cmdline(proc_),
            }),
            None => Err(ShellError::NoSuchProcess { pid }),
        }
    }

    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Command line as observed when the handle was created.
    #[must_use]
    pub fn cmdline(&self) -> &str {
        &self.cmdline
    }

    /// Probe whether the process is still running; zombies count as gone.
    #[must_use]
    pub fn is_running(&self) -> bool {
        signal::still_running(self.pid)
    }
}

fn join_cmdline(proc_: &sysinfo::Process) -> String {
    proc_
        .cmd()
        .iter()
        .map(|part| part.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Find current-user processes whose command line contains any of the
/// given patterns as a substring, after environment-variable resolution.
///
/// Matching is plain substring search over the space-joined command line,
/// so `find_procs_by_cmdline(["$MYROOT"])` catches both
/// `$MYROOT/bin/service.sh` and `tail -f $MYROOT/log/service.log`.
/// Processes that exit mid-enumeration or whose metadata is unreadable are
/// silently skipped. Beware of short relative patterns: `"foo"` also
/// matches `find_foos.sh`.
pub fn find_procs_by_cmdline<I, S>(cmdlines: I) -> Result<Vec<ProcessHandle>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let matches = cmdlines
        .into_iter()
        .map(|pattern| resolve_env(pattern.as_ref()))
        .collect::<Result<Vec<_>>>()?;

    debug!(
        "Finding processes that match command lines:\n  - {}",
        matches.join("\n  - ")
    );

    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::All, true);

    // Ownership of foreign processes is not always readable; when our own
    // owner is undeterminable the filter is disabled rather than erroring.
    let my_uid = sysinfo::get_current_pid()
        .ok()
        .and_then(|pid| sys.process(pid))
        .and_then(|me| me.user_id())
        .cloned();

    let mut procs = Vec::new();
    for (pid, proc_) in sys.processes() {
        if let Some(mine) = my_uid.as_ref() {
            match proc_.user_id() {
                Some(theirs) if theirs == mine => {}
                _ => continue,
            }
        }
        let cmdline = join_cmdline(proc_);
        if cmdline.is_empty() {
            continue;
        }
        if matches.iter().any(|pattern| cmdline.contains(pattern)) {
            debug!("Process {pid} matches: {cmdline}");
            procs.push(ProcessHandle {
                pid: pid.as_u32(),
                cmdline,
            });
        }
    }
    Ok(procs)
}

/// One entry in a termination batch.
///
/// `From` impls accept pids, handles, and `Option`s of either, so optional
/// parent lookups flow straight in: `None` becomes [`KillTarget::Skip`].
/// Anything else simply does not convert — there is no runtime "bad target
/// type" left to check.
#[derive(Debug, Clone)]
pub enum KillTarget {
    Pid(u32),
    Proc(ProcessHandle),
    /// Placeholder produced by `None` lookups; always skipped.
    Skip,
}

impl From<u32> for KillTarget {
    fn from(pid: u32) -> Self {
        Self::Pid(pid)
    }
}

impl From<ProcessHandle> for KillTarget {
    fn from(handle: ProcessHandle) -> Self {
        Self::Proc(handle)
    }
}

impl From<&ProcessHandle> for KillTarget {
    fn from(handle: &ProcessHandle) -> Self {
        Self::Proc(handle.clone())
    }
}

impl<T: Into<KillTarget>> From<Option<T>> for KillTarget {
    fn from(target: Option<T>) -> Self {
        match target {
            Some(target) => target.into(),
            None => Self::Skip,
        }
    }
}

/// Send SIGTERM to every target, wait up to `grace` for voluntary exit,
/// then SIGKILL the survivors. With `grace` of zero the SIGTERM phase is
/// skipped entirely.
///
/// Returns before `grace` elapses if every signaled process exits early.
/// The current process and its ancestors are excluded; targets that have
/// already exited or are not ours to signal are logged and skipped.
/// Calling this again on an already-terminated set is a logged no-op.
pub fn kill<I>(targets: I, grace: Duration)
where
    I: IntoIterator,
    I::Item: Into<KillTarget>,
{
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::All, true);
    let protected = protected_pids(&sys);
    let my_pid = std::process::id();

    let mut batch: Vec<ProcessHandle> = Vec::new();
    for target in targets {
        let handle = match target.into() {
            KillTarget::Skip => continue,
            KillTarget::Proc(handle) => handle,
            KillTarget::Pid(pid) => match sys.process(Pid::from_u32(pid)) {
                Some(proc_) => ProcessHandle {
                    pid,
                    cmdline: join_cmdline(proc_),
                },
                None => {
                    debug!("PID {pid} does not exist");
                    continue;
                }
            },
        };
        if handle.pid == my_pid {
            debug!(
                "Not terminating PID {} as it is the current process",
                handle.pid
            );
            continue;
        }
        if protected.contains(&handle.pid) {
            debug!(
                "Not terminating PID {} as it is an ancestor of the current process",
                handle.pid
            );
            continue;
        }
        if !signal::process_exists(handle.pid) {
            debug!("PID {} does not exist", handle.pid);
            continue;
        }
        batch.push(handle);
    }

    if batch.is_empty() {
        info!("No processes terminated");
        return;
    }

    let kill_list = if grace.is_zero() {
        batch
    } else {
        info!("Sending SIGTERM to PIDs {}", pid_list(&batch));
        let mut signaled = Vec::new();
        for handle in batch {
            match signal::signal_pid(handle.pid, libc::SIGTERM) {
                Ok(()) => signaled.push(handle),
                Err(err) if signal::is_no_such_process(&err) => {
                    debug!("PID {} already exited", handle.pid);
                }
                Err(err) if signal::is_permission_denied(&err) => {
                    info!("Failed to send SIGTERM to PID {}: access denied", handle.pid);
                }
                Err(err) => {
                    info!("Failed to send SIGTERM to PID {}: {err}", handle.pid);
                }
            }
        }
        await_exits(signaled, grace)
    };

    if !kill_list.is_empty() {
        info!("Sending SIGKILL to PIDs {}", pid_list(&kill_list));
        for handle in &kill_list {
            match signal::signal_pid(handle.pid, libc::SIGKILL) {
                Ok(()) => {}
                Err(err) if signal::is_no_such_process(&err) => {
                    debug!("PID {} already exited", handle.pid);
                }
                Err(err) if signal::is_permission_denied(&err) => {
                    info!("Failed to send SIGKILL to PID {}: access denied", handle.pid);
                }
                Err(err) => {
                    info!("Failed to send SIGKILL to PID {}: {err}", handle.pid);
                }
            }
        }
    }

    info!("All processes terminated");
}

/// Find all processes matching the command-line patterns and terminate
/// them with the usual SIGTERM/SIGKILL escalation.
pub fn killall<I, S>(cmdlines: I, grace: Duration) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    kill(find_procs_by_cmdline(cmdlines)?, grace);
    Ok(())
}

/// The current process and its live ancestor chain.
///
/// Walked fresh on every call on purpose: ancestry is only meaningful at
/// the moment of use, and a cached chain would go stale the moment a
/// parent exits or a pid is reused.
fn protected_pids(sys: &System) -> HashSet<u32> {
    let mut protected = HashSet::new();
    let mut cursor = sysinfo::get_current_pid().ok();
    while let Some(pid) = cursor {
        if !protected.insert(pid.as_u32()) {
            // Defect in the snapshot produced a cycle; stop walking.
            break;
        }
        cursor = sys.process(pid).and_then(|proc_| proc_.parent());
    }
    protected
}

fn pid_list(handles: &[ProcessHandle]) -> String {
    handles
        .iter()
        .map(|handle| handle.pid.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Poll the signaled processes until they are all gone or the grace period
/// runs out; returns the survivors.
fn await_exits(signaled: Vec<ProcessHandle>, grace: Duration) -> Vec<ProcessHandle> {
    let deadline = Instant::now() + grace;
    let mut alive = signaled;
    loop {
        alive.retain(|handle| signal::still_running(handle.pid));
        if alive.is_empty() || Instant::now() >= deadline {
            return alive;
        }
        thread::sleep(KILL_POLL);
    }
}

/// Wait until `proc` starts listening on `port` — or, with `port` of
/// `None`, on any TCP port outside `ignore_ports` — and return the matched
/// port.
///
/// A single bounded poll loop: if the process exits,
/// [`ShellError::NoSuchProcess`] propagates; if `timeout` elapses first,
/// [`ShellError::Timeout`]. Listening on port 0 composes well with this:
/// the OS picks a free port and this call reports which one it was.
pub fn wait_for_server(
    proc_: &ProcessHandle,
    port: Option<u16>,
    ignore_ports: &[u16],
    timeout: Option<Duration>,
) -> Result<u16> {
    let deadline = timeout.map(|limit| Instant::now() + limit);
    loop {
        let mut open_ports = sockets::listening_ports(proc_.pid())?;
        for ignored in ignore_ports {
            open_ports.remove(ignored);
        }
        match port {
            Some(wanted) => {
                if open_ports.contains(&wanted) {
                    return Ok(wanted);
                }
            }
            None => {
                if let Some(first) = open_ports.into_iter().next() {
                    return Ok(first);
                }
            }
        }
        if let (Some(deadline), Some(limit)) = (deadline, timeout) {
            if Instant::now() > deadline {
                return Err(ShellError::Timeout {
                    operation: "waiting for port to open".to_string(),
                    limit,
                });
            }
        }
        thread::sleep(SERVER_POLL);
    }
}
