//! Pipe-backed adapter that gives any writer a real file descriptor.
//!
//! Subprocess stdio must be backed by an OS file descriptor, but callers
//! often want output to land in something that has none, like an in-memory
//! buffer. The bridge interposes an OS pipe and a drain thread: the child
//! (or the caller) writes into the pipe, the thread moves every chunk into
//! the destination writer, and scope teardown closes the write end before
//! joining so the drain always observes EOF instead of blocking forever.

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::thread;

use crate::error::Result;
use crate::lock_or_recover;

/// Pipes hold roughly 64 KiB in the kernel; anything past that deadlocks a
/// writer with no concurrent reader, hence the dedicated drain thread.
const DRAIN_CHUNK: usize = 4096;

/// Destination for a child process output stream.
pub enum Sink {
    /// Use the parent's own stream (the subprocess default).
    Inherit,
    /// Discard everything.
    Null,
    /// An OS-backed file, handed to the child untouched: no pipe, no
    /// thread, no copying.
    File(File),
    /// An arbitrary writer, drained through a [`StreamBridge`].
    Writer(Box<dyn Write + Send>),
}

impl Default for Sink {
    fn default() -> Self {
        Self::Inherit
    }
}

impl fmt::Debug for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inherit => f.write_str("Sink::Inherit"),
            Self::Null => f.write_str("Sink::Null"),
            Self::File(file) => write!(f, "Sink::File(fd {})", file.as_raw_fd()),
            Self::Writer(_) => f.write_str("Sink::Writer(..)"),
        }
    }
}

/// Cloneable in-memory capture target for bridged output.
///
/// Clones share the same storage, so a caller can keep one handle and hand
/// another to [`Sink::Writer`].
#[derive(Clone, Default)]
pub struct SharedBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything written so far.
    #[must_use]
    pub fn contents(&self) -> Vec<u8> {
        lock_or_recover(&self.inner, "bridge::SharedBuffer::contents").clone()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        lock_or_recover(&self.inner, "bridge::SharedBuffer::write").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Scoped pairing of an OS pipe with a drain thread feeding a destination
/// writer.
///
/// The drain thread never outlives the bridge: both [`finish`] and `Drop`
/// close the crate-held write end first and then join. Closing first is
/// load-bearing — it is what turns the drain's pending read into EOF.
///
/// [`finish`]: StreamBridge::finish
pub struct StreamBridge {
    write_end: Option<File>,
    drain: Option<thread::JoinHandle<io::Result<()>>>,
}

impl StreamBridge {
    /// Open a bridge whose write end stays inside for direct writes via
    /// [`writer`](StreamBridge::writer).
    pub fn new(dest: Box<dyn Write + Send>) -> Result<Self> {
        let (read_end, write_end) = os_pipe()?;
        Ok(Self {
            write_end: Some(write_end),
            drain: Some(spawn_drain(read_end, dest)?),
        })
    }

    /// Open a bridge whose write end becomes a child's stdio. After spawn
    /// the child owns the only copy, so EOF reaches the drain the moment
    /// the child exits.
    pub(crate) fn for_child(dest: Box<dyn Write + Send>) -> Result<(Stdio, Self)> {
        let (read_end, write_end) = os_pipe()?;
        let bridge = Self {
            write_end: None,
            drain: Some(spawn_drain(read_end, dest)?),
        };
        Ok((Stdio::from(write_end), bridge))
    }

    /// Borrow the pipe's write end for direct writes within the scope.
    /// `None` once the write end has been handed to a child.
    pub fn writer(&mut self) -> Option<&mut File> {
        self.write_end.as_mut()
    }

    /// Close the write end, then block until the drain thread has flushed
    /// every byte into the destination. Any destination-side write failure
    /// surfaces here rather than being lost in the thread.
    pub fn finish(mut self) -> Result<()> {
        self.teardown().map_err(Into::into)
    }

    fn teardown(&mut self) -> io::Result<()> {
        drop(self.write_end.take());
        match self.drain.take() {
            Some(handle) => match handle.join() {
                Ok(result) => result,
                Err(_) => Err(io::Error::other("stream bridge drain thread panicked")),
            },
            None => Ok(()),
        }
    }
}

impl Drop for StreamBridge {
    fn drop(&mut self) {
        if let Err(err) = self.teardown() {
            tracing::warn!("stream bridge drain failed during teardown: {err}");
        }
    }
}

fn spawn_drain(
    mut read_end: File,
    mut dest: Box<dyn Write + Send>,
) -> io::Result<thread::JoinHandle<io::Result<()>>> {
    thread::Builder::new()
        .name("rshell-bridge-drain".to_string())
        .spawn(move || drain_pipe(&mut read_end, dest.as_mut()))
}

fn drain_pipe(read_end: &mut File, dest: &mut dyn Write) -> io::Result<()> {
    let mut chunk = [0_u8; DRAIN_CHUNK];
    let mut dest_err: Option<io::Error> = None;
    loop {
        match read_end.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                if dest_err.is_none() {
                    // After a destination failure keep reading and
                    // discarding so the writer never blocks on a full
                    // pipe; the error surfaces at join time.
                    if let Err(err) = dest.write_all(&chunk[..n]) {
                        dest_err = Some(err);
                    }
                }
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                dest_err.get_or_insert(err);
                break;
            }
        }
    }
    match dest_err {
        Some(err) => Err(err),
        None => dest.flush(),
    }
}

fn os_pipe() -> io::Result<(File, File)> {
    let mut fds = [-1 as RawFd; 2];
    // SAFETY: pipe writes two fresh descriptors into the array on success.
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: both fds were just created and are owned by nobody else;
    // wrapping them in File makes every error path below close them.
    let read_end = unsafe { File::from_raw_fd(fds[0]) };
    let write_end = unsafe { File::from_raw_fd(fds[1]) };
    set_cloexec(read_end.as_raw_fd())?;
    set_cloexec(write_end.as_raw_fd())?;
    Ok((read_end, write_end))
}

/// Mark a descriptor close-on-exec so pipe ends do not leak into children
/// beyond the one being wired up (spawn's dup clears the flag on the copy).
fn set_cloexec(fd: RawFd) -> io::Result<()> {
    // SAFETY: F_GETFD/F_SETFD only touch descriptor flags of a valid fd.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn bridge_moves_large_payload_without_deadlock() {
        // Well past the kernel pipe buffer.
        let payload = vec![0xA5_u8; 1 << 20];
        let capture = SharedBuffer::new();
        let mut bridge =
            StreamBridge::new(Box::new(capture.clone())).expect("open bridge");
        bridge
            .writer()
            .expect("write end present")
            .write_all(&payload)
            .expect("write payload");
        bridge.finish().expect("finish bridge");
        assert_eq!(capture.contents(), payload);
    }

    #[test]
    fn drop_flushes_pending_bytes() {
        let capture = SharedBuffer::new();
        {
            let mut bridge =
                StreamBridge::new(Box::new(capture.clone())).expect("open bridge");
            bridge
                .writer()
                .expect("write end present")
                .write_all(b"pending")
                .expect("write");
        }
        assert_eq!(capture.contents(), b"pending");
    }

    struct FailingWriter;

    impl Write for FailingWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("destination rejected write"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn destination_failure_surfaces_at_finish_without_blocking_writer() {
        let mut bridge = StreamBridge::new(Box::new(FailingWriter)).expect("open bridge");
        // Far more than one pipe buffer: if the drain stopped reading on
        // the first destination error this write would block forever.
        let payload = vec![0_u8; 512 * 1024];
        bridge
            .writer()
            .expect("write end present")
            .write_all(&payload)
            .expect("write payload");
        let err = bridge.finish().expect_err("drain failure must surface");
        assert!(err.to_string().contains("destination rejected write"));
    }

    #[test]
    fn shared_buffer_clones_share_storage() {
        let buffer = SharedBuffer::new();
        let mut clone = buffer.clone();
        clone.write_all(b"shared").expect("write");
        assert_eq!(buffer.contents(), b"shared");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn bridge_preserves_arbitrary_payloads(
            payload in proptest::collection::vec(any::<u8>(), 0..65_536)
        ) {
            let capture = SharedBuffer::new();
            let mut bridge =
                StreamBridge::new(Box::new(capture.clone())).expect("open bridge");
            bridge
                .writer()
                .expect("write end present")
                .write_all(&payload)
                .expect("write payload");
            bridge.finish().expect("finish bridge");
            prop_assert_eq!(capture.contents(), payload);
        }
    }
}
