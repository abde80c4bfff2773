//! Process-wide standard stream singletons.
//!
//! The singletons wrap duplicates of descriptors 0, 1, and 2 so closing a
//! stream handle never closes the process's real standard descriptors.
//! Construction is lazy and idempotent: the first call builds the stream
//! against the given reactor, later calls return clones of the same
//! stream. After swapping reactors, call [`rebind_stdio`].
//!
//! Standard descriptors inherit the process's blocking mode; reads and
//! writes are gated on readiness, which keeps pipe- and terminal-backed
//! stdio from stalling the cooperative loop in practice.

use super::{ReadablePipe, WritablePipe};
use crate::error::{Error, Result};
use crate::reactor::Handle;
use crate::stream::FdStream;
use parking_lot::Mutex;
use std::os::fd::AsFd;

static STDIN: Mutex<Option<ReadablePipe>> = Mutex::new(None);
static STDOUT: Mutex<Option<WritablePipe>> = Mutex::new(None);
static STDERR: Mutex<Option<WritablePipe>> = Mutex::new(None);

/// Returns the process-wide readable stream over descriptor 0.
///
/// # Errors
///
/// Fails `Failure` if the descriptor cannot be duplicated or registered.
pub fn stdin(handle: &Handle) -> Result<ReadablePipe> {
    let mut slot = STDIN.lock();
    if let Some(stream) = &*slot {
        return Ok(stream.clone());
    }
    let fd = std::io::stdin()
        .as_fd()
        .try_clone_to_owned()
        .map_err(Error::failure)?;
    let stream = ReadablePipe::open(handle, fd)?;
    *slot = Some(stream.clone());
    Ok(stream)
}

/// Returns the process-wide writable stream over descriptor 1.
///
/// # Errors
///
/// Fails `Failure` if the descriptor cannot be duplicated or registered.
pub fn stdout(handle: &Handle) -> Result<WritablePipe> {
    let mut slot = STDOUT.lock();
    if let Some(stream) = &*slot {
        return Ok(stream.clone());
    }
    let fd = std::io::stdout()
        .as_fd()
        .try_clone_to_owned()
        .map_err(Error::failure)?;
    let stream = WritablePipe::open(handle, fd)?;
    *slot = Some(stream.clone());
    Ok(stream)
}

/// Returns the process-wide writable stream over descriptor 2.
///
/// # Errors
///
/// Fails `Failure` if the descriptor cannot be duplicated or registered.
pub fn stderr(handle: &Handle) -> Result<WritablePipe> {
    let mut slot = STDERR.lock();
    if let Some(stream) = &*slot {
        return Ok(stream.clone());
    }
    let fd = std::io::stderr()
        .as_fd()
        .try_clone_to_owned()
        .map_err(Error::failure)?;
    let stream = WritablePipe::open(handle, fd)?;
    *slot = Some(stream.clone());
    Ok(stream)
}

/// Re-attaches every constructed stdio singleton to `handle`.
///
/// Call after the process swaps reactors (e.g. following a fork).
///
/// # Errors
///
/// Fails `Failure` if any singleton cannot re-register its descriptor.
pub fn rebind_stdio(handle: &Handle) -> Result<()> {
    if let Some(stream) = &*STDIN.lock() {
        stream.rebind(handle)?;
    }
    if let Some(stream) = &*STDOUT.lock() {
        stream.rebind(handle)?;
    }
    if let Some(stream) = &*STDERR.lock() {
        stream.rebind(handle)?;
    }
    Ok(())
}
