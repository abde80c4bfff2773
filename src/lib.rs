//! Bytestreams: reactor-driven non-blocking byte streams for cooperative
//! async I/O.
//!
//! # Overview
//!
//! This crate is a building block for asynchronous network and IPC code:
//! callers get handles that read and write like sequential streams, while
//! the library coordinates readiness notifications from a reactor,
//! enforces backpressure, honors per-operation timeouts, and propagates
//! cancellation. All byte operations are strictly octet-based.
//!
//! # Core Guarantees
//!
//! - **FIFO bytes**: consecutive reads on one stream observe exactly the
//!   bytes written, in write order, with no duplication across readers
//! - **Ordered writes**: accepted writes complete in submission order; a
//!   later write never overtakes an earlier one
//! - **Terminal close**: stream flags only ever drop; close is idempotent
//!   and wakes every parked operation with its outcome
//! - **Cancel-correctness**: dropping a suspended operation disarms its
//!   watcher or removes its wake handle; nothing leaks and nothing fires
//!   for a dead task
//!
//! # Module Structure
//!
//! - [`buffer`]: growable FIFO byte buffer and cursor view
//! - [`stream`]: capability traits (readable, writable, duplex, seekable,
//!   descriptor-backed) and their contracts
//! - [`error`]: error kinds and propagation policy
//! - [`reactor`]: readiness-watcher interface, the OS poller backend, and
//!   timer futures
//! - [`mem`]: in-process streams (FIFO duplex with high-water mark,
//!   seekable sink)
//! - [`pipe`]: non-blocking descriptor streams and stdio singletons
//! - [`compose`]: `read_exact` / `read_until` / `read_all` / `pipe`
//!   helpers and descriptor pairs
//! - [`text`]: UTF-8 reader/writer over the byte streams
//! - [`lab`]: deterministic single-threaded executor for tests and demos

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

pub mod buffer;
pub mod compose;
pub mod error;
pub mod lab;
pub mod mem;
pub mod pipe;
pub mod reactor;
pub mod stream;
pub mod test_utils;
pub mod text;
mod wake;

pub use buffer::{BufferCursor, ByteBuffer};
pub use compose::{pair, pipe, read_all, read_exact, read_until, stream_pair};
pub use error::{Error, ErrorKind, Result, ResultExt};
pub use lab::Lab;
pub use mem::{MemorySink, MemoryStream};
pub use pipe::{
    rebind_stdio, stderr, stdin, stdout, DuplexPipe, ReadablePipe, WritablePipe, CHUNK_SIZE,
};
pub use reactor::{
    timeout, Direction, Handle, IntoHandle, PollReactor, Readiness, Reactor, Sleep, Watcher,
};
pub use stream::{
    DuplexStream, FdStream, ReadStream, SeekFrom, SeekStream, Stream, Unshift, WriteStream,
};
pub use text::{TextReader, TextWriter};
