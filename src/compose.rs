//! Read-composition and transfer helpers.
//!
//! Loop helpers over the stream traits: collect an exact count, read
//! through a delimiter, drain to end-of-stream, or pump bytes from a
//! readable into a writable. Retrying after partial progress is the
//! helpers' job; the streams themselves never retry.

use crate::error::{Error, ErrorKind, Result};
use crate::pipe::DuplexPipe;
use crate::reactor::Handle;
use crate::stream::{ReadStream, WriteStream};
use std::os::fd::OwnedFd;
use std::time::Duration;

/// Reads exactly `n` bytes from `stream`.
///
/// `n == 0` returns empty without touching the stream.
///
/// # Errors
///
/// Whatever the underlying reads fail with; a stream that ends before
/// `n` bytes arrive surfaces as `Unreadable`.
pub async fn read_exact<R: ReadStream>(
    stream: &R,
    n: usize,
    timeout: Duration,
) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(n);
    while out.len() < n {
        let chunk = stream.read(n - out.len(), None, timeout).await?;
        out.extend_from_slice(&chunk);
        // An empty chunk is end-of-stream; the next read reports the
        // closed stream and terminates the loop with its error.
    }
    Ok(out)
}

/// Reads until the accumulated bytes end with `needle`, or until
/// `max_len` bytes (when non-zero) have been collected.
///
/// The needle's last byte narrows each read as a stop byte; the final
/// match is on the full needle.
///
/// # Errors
///
/// `InvalidArgument` for an empty needle; otherwise whatever the
/// underlying reads fail with (a stream ending before the needle appears
/// surfaces as `Unreadable`).
pub async fn read_until<R: ReadStream>(
    stream: &R,
    needle: &[u8],
    max_len: usize,
    timeout: Duration,
) -> Result<Vec<u8>> {
    let Some(&stop) = needle.last() else {
        return Err(Error::new(ErrorKind::InvalidArgument).with_context("empty needle"));
    };
    let mut out = Vec::new();
    loop {
        let want = if max_len == 0 { 0 } else { max_len - out.len() };
        let chunk = stream.read(want, Some(stop), timeout).await?;
        out.extend_from_slice(&chunk);
        if out.len() >= needle.len() && out.ends_with(needle) {
            return Ok(out);
        }
        if max_len != 0 && out.len() >= max_len {
            return Ok(out);
        }
    }
}

/// Reads until end-of-stream, or until `max_len` bytes (when non-zero).
///
/// Returns the accumulated bytes once the stream reports end-of-stream
/// or stops being readable.
///
/// # Errors
///
/// Whatever the underlying reads fail with.
pub async fn read_all<R: ReadStream>(
    stream: &R,
    max_len: usize,
    timeout: Duration,
) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    while stream.is_readable() && (max_len == 0 || out.len() < max_len) {
        let want = if max_len == 0 { 0 } else { max_len - out.len() };
        let chunk = stream.read(want, None, timeout).await?;
        if chunk.is_empty() {
            break;
        }
        out.extend_from_slice(&chunk);
    }
    Ok(out)
}

/// Pumps bytes from `src` into `dst`.
///
/// Reads respect `length` (0 = unbounded) and `stop` (transfer ends after
/// the chunk carrying the stop byte is delivered). The loop runs while
/// the source is readable and the destination writable. On completion —
/// and, when `end` is set, on error with the destination still writable —
/// the destination is ended; the source is never ended.
///
/// Returns the total number of bytes written to `dst`.
///
/// # Errors
///
/// The first read or write error, after the destination end-handling
/// described above.
pub async fn pipe<R: ReadStream, W: WriteStream>(
    src: &R,
    dst: &W,
    end: bool,
    length: usize,
    stop: Option<u8>,
    timeout: Duration,
) -> Result<usize> {
    let mut total = 0usize;
    let mut stopped = false;
    while src.is_readable() && dst.is_writable() && !stopped && (length == 0 || total < length) {
        let want = if length == 0 { 0 } else { length - total };
        let chunk = match src.read(want, stop, timeout).await {
            Ok(chunk) => chunk,
            Err(e) => return end_after_error(dst, end, timeout, e).await,
        };
        if chunk.is_empty() {
            break;
        }
        if let Some(byte) = stop {
            stopped = chunk.last() == Some(&byte);
        }
        match dst.write(&chunk, timeout).await {
            Ok(n) => total += n,
            Err(e) => return end_after_error(dst, end, timeout, e).await,
        }
    }
    if end && dst.is_writable() {
        dst.end(&[], timeout).await?;
    }
    Ok(total)
}

async fn end_after_error<W: WriteStream>(
    dst: &W,
    end: bool,
    timeout: Duration,
    error: Error,
) -> Result<usize> {
    if end && dst.is_writable() {
        let _ = dst.end(&[], timeout).await;
    }
    Err(error)
}

/// Returns a pair of connected non-blocking stream sockets.
///
/// # Errors
///
/// Fails `Failure` carrying the OS error message.
pub fn pair() -> Result<(OwnedFd, OwnedFd)> {
    let (a, b) = std::os::unix::net::UnixStream::pair().map_err(Error::failure)?;
    a.set_nonblocking(true).map_err(Error::failure)?;
    b.set_nonblocking(true).map_err(Error::failure)?;
    Ok((OwnedFd::from(a), OwnedFd::from(b)))
}

/// Returns two connected duplex pipe streams registered with `handle`.
///
/// # Errors
///
/// Fails `Failure` if the pair cannot be created or registered.
pub fn stream_pair(handle: &Handle) -> Result<(DuplexPipe, DuplexPipe)> {
    let (a, b) = pair()?;
    Ok((DuplexPipe::open(handle, a)?, DuplexPipe::open(handle, b)?))
}
