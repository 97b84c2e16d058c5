// src/executor/unixio.rs
//
// Small fd-plumbing helpers the executor's fork/exec path needs. Split out
// from `executor::mod` because these are the only spots that touch raw fds
// directly; everything else goes through `nix`'s typed wrappers. Isolation
// between sibling children is achieved by explicit close-everything-except
// (see `executor::spawn_command`/`spawn_tee`), not `FD_CLOEXEC` -- simpler
// to reason about across a fork-everything-then-exec-everything pass where
// the set of fds a given child must keep is known up front.

use std::os::fd::IntoRawFd;
use std::os::unix::io::RawFd;

use nix::fcntl::{self, OFlag};
use nix::sys::stat::Mode;
use nix::unistd::{self, close};

use crate::error::Result;

/// Opens `/dev/null` read-only; the default `TF_CTRL_IN` fallback for
/// children with no inbound control wiring.
pub fn open_devnull_read() -> Result<RawFd> {
    let fd = fcntl::open("/dev/null", OFlag::O_RDONLY, Mode::empty())?;
    Ok(fd.into_raw_fd())
}

/// Opens `/dev/null` write-only; the default `TF_CTRL_OUT` fallback.
pub fn open_devnull_write() -> Result<RawFd> {
    let fd = fcntl::open("/dev/null", OFlag::O_WRONLY, Mode::empty())?;
    Ok(fd.into_raw_fd())
}

/// Best-effort close: an already-closed fd is not an error worth surfacing.
pub fn close_fd(fd: RawFd) {
    let _ = close(fd);
}

pub fn dup2(src: RawFd, dst: RawFd) -> Result<()> {
    unistd::dup2(src, dst)?;
    Ok(())
}
