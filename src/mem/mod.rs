//! In-memory streams.
//!
//! Two families build directly on [`ByteBuffer`](crate::buffer::ByteBuffer):
//!
//! - [`MemoryStream`]: a FIFO duplex stream for in-process plumbing, with
//!   high-water-mark flow control parking writers until readers catch up.
//! - [`MemorySink`]: a seekable duplex buffer that retains everything
//!   written and reads through a cursor.

pub mod sink;
pub mod stream;

pub use sink::MemorySink;
pub use stream::MemoryStream;
