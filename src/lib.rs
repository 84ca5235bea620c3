//! Scripting conveniences over OS process, filesystem, and environment
//! primitives.
//!
//! Every operation resolves `$VAR` references in path-like arguments, logs
//! what it is about to do through [`tracing`], and normalizes the sharp
//! edges of the underlying primitives: shell invocations always run under
//! strict-mode bash, termination escalates SIGTERM → SIGKILL with a
//! bounded grace period and never targets the current process or its
//! ancestors, captured output works even when the destination has no file
//! descriptor, and compressed files open transparently.
//!
//! The crate is synchronous by design: the only thread it ever spawns is
//! the [`StreamBridge`] drain that keeps subprocess pipes from filling up.
//! Log routing is the host's concern — install whatever `tracing`
//! subscriber fits, or scope one with `tracing::subscriber::with_default`;
//! nothing here configures logging globally.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! fn main() -> rshell::Result<()> {
//!     // $WORKDIR is resolved before matching; bash strict mode guards
//!     // the pipeline.
//!     rshell::check_call("grep -v noise $WORKDIR/input.log > cleaned.log", Default::default())?;
//!     rshell::killall(["$WORKDIR/bin/old-server"], Duration::from_secs(10))?;
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod call;
pub mod env;
pub mod error;
mod lock;
pub mod manipulate;
pub mod open;
pub mod procs;
pub mod search;
mod signal;
mod sockets;

pub use bridge::{SharedBuffer, Sink, StreamBridge};
pub use call::{call, check_call, check_output, check_output_bytes, Cmd, Exec, Source};
pub use env::{chdir, override_env, pushd, putenv, resolve_env, source, EnvOverride, Pushd};
pub use error::{FileMatchError, Result, ShellError};
pub use manipulate::concatenate;
pub use open::{reader, writer, Compression, WriteMode};
pub use procs::{
    find_procs_by_cmdline, kill, killall, wait_for_server, KillTarget, ProcessHandle,
};
pub use search::{glob, iglob, IGlob};

pub(crate) use lock::lock_or_recover;
