//! Pid-level signal plumbing shared by the executor and the process controller.

use std::io;
use std::process::ExitStatus;

/// Send a signal to a single pid.
///
/// Unlike process-group delivery there is no fallback here: callers signal
/// exactly the process they observed, and decide per error code whether a
/// missing target is fine.
pub(crate) fn signal_pid(pid: u32, signal: i32) -> io::Result<()> {
    let Some(pid) = checked_pid(pid) else {
        return Err(io::Error::from_raw_os_error(libc::ESRCH));
    };
    // SAFETY: `libc::kill` takes plain integer pid/signal values; errno is
    // read immediately after the call on this thread.
    let ret = unsafe { libc::kill(pid, signal) };
    if ret == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

pub(crate) fn is_no_such_process(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(code) if code == libc::ESRCH)
}

pub(crate) fn is_permission_denied(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(code) if code == libc::EPERM)
}

/// Probe whether a process exists at all.
///
/// EPERM counts as "exists": the process is there, it just is not ours to
/// signal.
pub(crate) fn process_exists(pid: u32) -> bool {
    let Some(pid) = checked_pid(pid) else {
        return false;
    };
    // SAFETY: probe-only signal `0` checks existence/permission without
    // delivering a signal.
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    is_permission_denied(&io::Error::last_os_error())
}

/// A pid beyond `pid_t` range cannot name a live process; refusing the
/// cast keeps a wrapped value from turning into process-group delivery.
fn checked_pid(pid: u32) -> Option<libc::pid_t> {
    libc::pid_t::try_from(pid).ok()
}

/// Whether a process is still running for the purposes of a grace wait.
///
/// A terminated child of the current process would otherwise linger as a
/// zombie and look alive to `kill(pid, 0)`, so own children are reaped with
/// `waitpid(WNOHANG)` here; foreign zombies are read from /proc. Either way
/// a zombie has already exited as far as signal escalation is concerned.
pub(crate) fn still_running(pid: u32) -> bool {
    let Some(checked) = checked_pid(pid) else {
        return false;
    };
    let mut status = 0;
    // SAFETY: WNOHANG only inspects state; reaping a child that already
    // exited is the desired side effect.
    let ret = unsafe { libc::waitpid(checked, &mut status, libc::WNOHANG) };
    if ret > 0 {
        return false;
    }
    if ret == 0 {
        // Our child, not yet exited.
        return true;
    }
    if !process_exists(pid) {
        return false;
    }
    !is_zombie(pid)
}

#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    // The state field follows the parenthesized comm, which may itself
    // contain ')': take everything after the last one.
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => stat
            .rsplit(')')
            .next()
            .map(|rest| rest.trim_start().starts_with('Z'))
            .unwrap_or(false),
        Err(_) => false,
    }
}

#[cfg(not(target_os = "linux"))]
fn is_zombie(_pid: u32) -> bool {
    false
}

/// Exit code of a finished child; signal deaths map to the negated signal
/// number, matching shell conventions.
pub(crate) fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    if let Some(code) = status.code() {
        code
    } else {
        status.signal().map(|sig| -sig).unwrap_or(-1)
    }
}
