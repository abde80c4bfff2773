//! Duplex stream over one descriptor.

use super::{PipeFd, ReadablePipe, WritablePipe};
use crate::error::Result;
use crate::reactor::Handle;
use crate::stream::{FdStream, ReadStream, Stream, Unshift, WriteStream};
use std::os::fd::OwnedFd;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

/// Readable and writable halves composed over one descriptor.
///
/// The two halves share the descriptor; it is released only once both
/// have closed, so ending the write side never tears the read side's
/// descriptor out from under a parked read.
#[derive(Debug, Clone)]
pub struct DuplexPipe {
    reader: ReadablePipe,
    writer: WritablePipe,
}

impl DuplexPipe {
    /// Takes ownership of `fd` and registers both directions with
    /// `handle`.
    ///
    /// # Errors
    ///
    /// Fails `Failure` if either direction cannot be registered.
    pub fn open(handle: &Handle, fd: OwnedFd) -> Result<Self> {
        Self::build(handle, Arc::new(PipeFd::new(fd, true)))
    }

    /// Like [`open`](Self::open), but `auto_close: false` leaves the OS
    /// descriptor open when the stream goes away.
    pub fn open_with(handle: &Handle, fd: OwnedFd, auto_close: bool) -> Result<Self> {
        Self::build(handle, Arc::new(PipeFd::new(fd, auto_close)))
    }

    fn build(handle: &Handle, fd: Arc<PipeFd>) -> Result<Self> {
        let reader = ReadablePipe::from_shared(handle, fd.clone())?;
        let writer = WritablePipe::from_shared(handle, fd)?;
        Ok(Self { reader, writer })
    }

    /// Returns the readable half.
    #[must_use]
    pub fn reader(&self) -> &ReadablePipe {
        &self.reader
    }

    /// Returns the writable half.
    #[must_use]
    pub fn writer(&self) -> &WritablePipe {
        &self.writer
    }

    /// Waits once for read readiness without consuming bytes.
    ///
    /// # Errors
    ///
    /// See [`ReadablePipe::poll_ready`].
    pub async fn poll_ready(&self, timeout: Duration) -> Result<()> {
        self.reader.poll_ready(timeout).await
    }
}

impl Stream for DuplexPipe {
    /// Open while either half is.
    fn is_open(&self) -> bool {
        self.reader.is_open() || self.writer.is_open()
    }

    /// Closes both halves.
    fn close(&self) {
        self.writer.close();
        self.reader.close();
    }
}

impl ReadStream for DuplexPipe {
    async fn read(&self, len: usize, stop: Option<u8>, timeout: Duration) -> Result<Vec<u8>> {
        self.reader.read(len, stop, timeout).await
    }

    fn is_readable(&self) -> bool {
        self.reader.is_readable()
    }
}

impl Unshift for DuplexPipe {
    fn unshift(&self, data: &[u8]) -> Result<()> {
        self.reader.unshift(data)
    }
}

impl WriteStream for DuplexPipe {
    async fn write(&self, data: &[u8], timeout: Duration) -> Result<usize> {
        self.writer.write(data, timeout).await
    }

    /// Ends the write half, then closes the read half regardless of the
    /// write outcome.
    async fn end(&self, data: &[u8], timeout: Duration) -> Result<usize> {
        let result = self.writer.end(data, timeout).await;
        self.reader.close();
        result
    }

    fn is_writable(&self) -> bool {
        self.writer.is_writable()
    }
}

impl FdStream for DuplexPipe {
    fn resource(&self) -> RawFd {
        self.reader.resource()
    }

    /// Re-attaches both halves' watchers to `handle`.
    fn rebind(&self, handle: &Handle) -> Result<()> {
        self.reader.rebind(handle)?;
        self.writer.rebind(handle)
    }
}
