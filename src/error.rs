//! Error types for stream operations.
//!
//! Every fallible stream operation returns [`Result`]. Errors are explicit
//! and typed: a [`Error`] carries a [`ErrorKind`] describing which contract
//! was violated, optional deterministic context text, and an optional source
//! error (usually the underlying OS error for [`ErrorKind::Failure`]).

use core::fmt;
use std::sync::Arc;

/// The kind of stream error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// An argument was rejected at operation entry (empty needle, timeout
    /// without a time source). No state was changed.
    InvalidArgument,
    /// The stream is not, or is no longer, readable.
    Unreadable,
    /// The stream is not, or is no longer, writable.
    Unwritable,
    /// The stream does not support seeking, or is no longer open for it.
    Unseekable,
    /// A seek target fell outside the buffer bounds.
    OutOfBounds,
    /// The stream was closed while the operation was parked.
    Closed,
    /// The per-operation timeout elapsed before the operation could complete.
    TimedOut,
    /// The underlying OS I/O operation failed.
    Failure,
}

/// The error type for stream operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    context: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
            source: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns true if this error reports a closed stream.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self.kind, ErrorKind::Closed)
    }

    /// Returns true if this error reports an elapsed timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::TimedOut)
    }

    /// Adds deterministic context text to the error.
    #[must_use]
    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context = Some(ctx.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Shorthand for an [`ErrorKind::Unreadable`] error.
    #[must_use]
    pub fn unreadable() -> Self {
        Self::new(ErrorKind::Unreadable)
    }

    /// Shorthand for an [`ErrorKind::Unwritable`] error.
    #[must_use]
    pub fn unwritable() -> Self {
        Self::new(ErrorKind::Unwritable)
    }

    /// Shorthand for an [`ErrorKind::Closed`] error.
    #[must_use]
    pub fn closed() -> Self {
        Self::new(ErrorKind::Closed)
    }

    /// Shorthand for an [`ErrorKind::TimedOut`] error.
    #[must_use]
    pub fn timed_out() -> Self {
        Self::new(ErrorKind::TimedOut)
    }

    /// Wraps an OS error as an [`ErrorKind::Failure`].
    #[must_use]
    pub fn failure(source: std::io::Error) -> Self {
        let ctx = source.to_string();
        Self::new(ErrorKind::Failure)
            .with_context(ctx)
            .with_source(source)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(ctx) = &self.context {
            write!(f, ": {ctx}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::failure(e)
    }
}

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Attach a context string on error.
    fn context(self, ctx: impl Into<String>) -> Result<T>;
    /// Attach context computed lazily on error.
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for core::result::Result<T, E> {
    fn context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(ctx))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| e.into().with_context(f()))
    }
}

/// A specialized Result type for stream operations.
pub type Result<T> = core::result::Result<T, Error>;
