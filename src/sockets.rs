//! Listening-socket inspection for a single process, via /proc.
//!
//! The kernel does not index sockets by owning pid, so this works the way
//! `ss`/`lsof` do: collect the `socket:[inode]` targets under
//! `/proc/<pid>/fd`, then match those inodes against the LISTEN rows of
//! `/proc/net/tcp` and `/proc/net/tcp6`.

use std::collections::BTreeSet;

use crate::error::{Result, ShellError};
use crate::signal;

/// TCP state field value for a listening socket.
#[cfg(target_os = "linux")]
const TCP_LISTEN: &str = "0A";

/// Ports the process is currently listening on (TCP, v4 and v6).
///
/// Fails with [`ShellError::NoSuchProcess`]
/// when the process has exited; a zombie counts as exited.
#[cfg(target_os = "linux")]
pub(crate) fn listening_ports(pid: u32) -> Result<BTreeSet<u16>> {
    use std::fs;

    if !signal::still_running(pid) {
        return Err(ShellError::NoSuchProcess { pid });
    }

    let inodes = socket_inodes(pid)?;
    let mut ports = BTreeSet::new();
    if inodes.is_empty() {
        return Ok(ports);
    }
    for table in ["/proc/net/tcp", "/proc/net/tcp6"] {
        let Ok(contents) = fs::read_to_string(table) else {
            continue;
        };
        for line in contents.lines().skip(1) {
            if let Some(port) = listener_port(line, &inodes) {
                ports.insert(port);
            }
        }
    }
    Ok(ports)
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn listening_ports(pid: u32) -> Result<BTreeSet<u16>> {
    if !signal::still_running(pid) {
        return Err(ShellError::NoSuchProcess { pid });
    }
    Err(ShellError::Io(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "listening-socket inspection requires /proc",
    )))
}

#[cfg(target_os = "linux")]
fn socket_inodes(pid: u32) -> Result<BTreeSet<u64>> {
    use std::fs;
    use std::io;

    let entries = match fs::read_dir(format!("/proc/{pid}/fd")) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(ShellError::NoSuchProcess { pid });
        }
        Err(err) => return Err(ShellError::Io(err)),
    };

    let mut inodes = BTreeSet::new();
    for entry in entries.flatten() {
        // Descriptors close concurrently with the scan; a vanished link is
        // not an error.
        let Ok(target) = fs::read_link(entry.path()) else {
            continue;
        };
        if let Some(inode) = parse_socket_inode(&target.to_string_lossy()) {
            inodes.insert(inode);
        }
    }
    Ok(inodes)
}

#[cfg(target_os = "linux")]
fn parse_socket_inode(target: &str) -> Option<u64> {
    target
        .strip_prefix("socket:[")?
        .strip_suffix(']')?
        .parse()
        .ok()
}

/// Decode one `/proc/net/tcp{,6}` row; the local port comes back when the
/// row is a listener owned by one of `inodes`.
///
/// Row layout: `sl local_address rem_address st tx:rx tr:tm retrnsmt uid
/// timeout inode ...`, with addresses as `HEXIP:HEXPORT`.
#[cfg(target_os = "linux")]
fn listener_port(line: &str, inodes: &BTreeSet<u64>) -> Option<u16> {
    let mut fields = line.split_whitespace();
    let _slot = fields.next()?;
    let local = fields.next()?;
    let _remote = fields.next()?;
    if fields.next()? != TCP_LISTEN {
        return None;
    }
    let inode: u64 = fields.nth(5)?.parse().ok()?;
    if !inodes.contains(&inode) {
        return None;
    }
    let (_, port_hex) = local.rsplit_once(':')?;
    u16::from_str_radix(port_hex, 16).ok()
}
