//! Stream capability traits.
//!
//! Streams expose small capability sets rather than one monolithic
//! interface: a type implements [`ReadStream`], [`WriteStream`],
//! [`SeekStream`], and/or [`FdStream`] depending on what it can do, and
//! [`DuplexStream`] names the readable+writable combination. All
//! suspendable operations are async and carry a per-operation timeout;
//! `Duration::ZERO` means "no timeout".
//!
//! # Flag invariants
//!
//! Each stream carries `open`, `readable`, and `writable` flags with
//! `readable ⇒ open` and `writable ⇒ open`. Once a flag drops to false it
//! never returns to true; closing drops all three. A fresh operation on a
//! stream that already lost the relevant capability fails `Unreadable` /
//! `Unwritable`; operations already parked when the stream closes fail
//! `Closed` (or return the close outcome their stream documents).

use crate::error::Result;
use crate::reactor::Handle;
use std::os::unix::io::RawFd;
use std::time::Duration;

pub use std::io::SeekFrom;

/// Common lifecycle surface of every stream.
pub trait Stream {
    /// Returns true until the stream is closed.
    fn is_open(&self) -> bool;

    /// Closes the stream, waking parked operations.
    ///
    /// Idempotent and terminal: the second call is a no-op, and no flag
    /// ever returns to true afterwards.
    fn close(&self);
}

/// A stream bytes can be read from.
#[allow(async_fn_in_trait)]
pub trait ReadStream: Stream {
    /// Reads up to `len` bytes.
    ///
    /// `len == 0` means "any positive amount". If `stop` is given, the read
    /// returns as soon as that byte is observed, with the byte included as
    /// the last byte of the result. An empty result signals end-of-stream.
    ///
    /// `timeout` bounds the suspension; `Duration::ZERO` waits forever.
    async fn read(&self, len: usize, stop: Option<u8>, timeout: Duration) -> Result<Vec<u8>>;

    /// Returns true while reads may be issued.
    fn is_readable(&self) -> bool;
}

/// A readable stream that can take bytes back.
///
/// Unshifted bytes are returned by subsequent reads before anything else
/// the stream has buffered or will fetch. A read already parked on the
/// stream is woken to consume them.
pub trait Unshift {
    /// Prepends `data` to the stream's internal buffer.
    fn unshift(&self, data: &[u8]) -> Result<()>;
}

/// A stream bytes can be written to.
#[allow(async_fn_in_trait)]
pub trait WriteStream: Stream {
    /// Writes `data`, returning the number of bytes written once the
    /// destination has accepted all of them.
    ///
    /// The call may suspend under backpressure; `timeout` bounds the
    /// suspension where the stream supports it (`Duration::ZERO` waits
    /// forever).
    async fn write(&self, data: &[u8], timeout: Duration) -> Result<usize>;

    /// Writes `data`, then marks the stream unwritable.
    ///
    /// The stream rejects further writes immediately; it closes once the
    /// written bytes have drained.
    async fn end(&self, data: &[u8], timeout: Duration) -> Result<usize>;

    /// Returns true while writes may be issued.
    fn is_writable(&self) -> bool;
}

/// A stream that is both readable and writable.
pub trait DuplexStream: ReadStream + WriteStream {}

impl<T: ReadStream + WriteStream> DuplexStream for T {}

/// A stream with a movable read/write position.
#[allow(async_fn_in_trait)]
pub trait SeekStream: Stream {
    /// Moves the cursor to the offset described by `pos`.
    ///
    /// The resolved offset must land in `0..=len`; anything else fails
    /// `OutOfBounds`. Returns the new absolute offset.
    async fn seek(&self, pos: SeekFrom, timeout: Duration) -> Result<usize>;

    /// Returns the current absolute offset.
    fn tell(&self) -> usize;

    /// Returns the total number of retained bytes.
    fn len(&self) -> usize;

    /// Returns true if no bytes are retained.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A stream backed by an OS descriptor.
pub trait FdStream {
    /// Returns the raw descriptor the stream drives.
    fn resource(&self) -> RawFd;

    /// Re-attaches the stream's readiness watchers to `handle`.
    ///
    /// Used after the process swaps reactors (e.g. after fork). A parked
    /// operation re-arms against the new reactor on its next wake.
    fn rebind(&self, handle: &Handle) -> Result<()>;
}
