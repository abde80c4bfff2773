//! UTF-8 text layer over the byte streams.
//!
//! [`TextReader`] returns `String`s from a byte stream without ever
//! splitting a multibyte sequence: a read that ends mid-sequence pushes
//! the incomplete tail back onto the stream (via [`Unshift`]) so the next
//! read completes it. [`TextWriter`] adds line and format helpers on the
//! write side.

use crate::error::{Error, ErrorKind, Result};
use crate::stream::{ReadStream, Unshift, WriteStream};
use std::time::Duration;

/// Decode failure carried as the source of an `ErrorKind::Failure`.
#[derive(Debug, thiserror::Error)]
pub enum TextError {
    /// The stream carried bytes that are not valid UTF-8.
    #[error("stream bytes are not valid UTF-8")]
    InvalidUtf8,
}

fn invalid_utf8() -> Error {
    Error::new(ErrorKind::Failure)
        .with_context("invalid UTF-8 in stream")
        .with_source(TextError::InvalidUtf8)
}

/// UTF-8 reader over a byte stream.
#[derive(Debug)]
pub struct TextReader<R> {
    stream: R,
}

impl<R: ReadStream + Unshift> TextReader<R> {
    /// Wraps `stream`.
    pub fn new(stream: R) -> Self {
        Self { stream }
    }

    /// Returns the wrapped stream.
    pub fn into_inner(self) -> R {
        self.stream
    }

    /// Reads up to `max_bytes` bytes (0 = any amount) as UTF-8 text.
    ///
    /// A multibyte sequence cut off at the end of the read is unshifted
    /// back onto the stream, so the returned text always ends on a
    /// character boundary. An empty string means end-of-stream — or that
    /// the read produced only the start of a multibyte sequence; both
    /// resolve on the next call.
    ///
    /// # Errors
    ///
    /// `Failure` (with a [`TextError`] source) on bytes that are invalid
    /// UTF-8 rather than merely incomplete; otherwise whatever the
    /// underlying read fails with.
    pub async fn read_text(&self, max_bytes: usize, timeout: Duration) -> Result<String> {
        let bytes = self.stream.read(max_bytes, None, timeout).await?;
        if bytes.is_empty() {
            return Ok(String::new());
        }
        match std::str::from_utf8(&bytes) {
            Ok(text) => Ok(text.to_owned()),
            Err(e) if e.error_len().is_none() => {
                let valid = e.valid_up_to();
                self.stream.unshift(&bytes[valid..])?;
                let text = std::str::from_utf8(&bytes[..valid]).expect("validated prefix");
                Ok(text.to_owned())
            }
            Err(_) => Err(invalid_utf8()),
        }
    }

    /// Reads one `\n`-terminated line, stripping `\r\n` or `\n`.
    ///
    /// Returns `None` on a clean end-of-stream with no buffered bytes; a
    /// final unterminated line is returned as-is.
    ///
    /// # Errors
    ///
    /// `Failure` on invalid UTF-8; otherwise whatever the underlying
    /// reads fail with.
    pub async fn read_line(&self, timeout: Duration) -> Result<Option<String>> {
        let mut line = Vec::new();
        loop {
            let chunk = self.stream.read(0, Some(b'\n'), timeout).await?;
            if chunk.is_empty() {
                // End-of-stream.
                if line.is_empty() {
                    return Ok(None);
                }
                break;
            }
            line.extend_from_slice(&chunk);
            if line.last() == Some(&b'\n') {
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                break;
            }
        }
        match String::from_utf8(line) {
            Ok(text) => Ok(Some(text)),
            Err(_) => Err(invalid_utf8()),
        }
    }
}

/// UTF-8 writer over a byte stream.
#[derive(Debug)]
pub struct TextWriter<W> {
    stream: W,
}

impl<W: WriteStream> TextWriter<W> {
    /// Wraps `stream`.
    pub fn new(stream: W) -> Self {
        Self { stream }
    }

    /// Returns the wrapped stream.
    pub fn into_inner(self) -> W {
        self.stream
    }

    /// Writes `text` as UTF-8 bytes.
    ///
    /// # Errors
    ///
    /// Whatever the underlying write fails with.
    pub async fn write_str(&self, text: &str, timeout: Duration) -> Result<usize> {
        self.stream.write(text.as_bytes(), timeout).await
    }

    /// Writes `text` followed by `\n` as one write, preserving line
    /// atomicity against interleaved writers.
    ///
    /// # Errors
    ///
    /// Whatever the underlying write fails with.
    pub async fn write_line(&self, text: &str, timeout: Duration) -> Result<usize> {
        let mut bytes = Vec::with_capacity(text.len() + 1);
        bytes.extend_from_slice(text.as_bytes());
        bytes.push(b'\n');
        self.stream.write(&bytes, timeout).await
    }

    /// Formats into the stream.
    ///
    /// # Errors
    ///
    /// Whatever the underlying write fails with.
    pub async fn write_fmt(&self, args: std::fmt::Arguments<'_>, timeout: Duration) -> Result<usize> {
        let text = std::fmt::format(args);
        self.stream.write(text.as_bytes(), timeout).await
    }

    /// Ends the underlying stream.
    ///
    /// # Errors
    ///
    /// Whatever the underlying end fails with.
    pub async fn end(&self, timeout: Duration) -> Result<usize> {
        self.stream.end(&[], timeout).await
    }
}
