//! Framed byte transport to the bridge process.
//!
//! Records travel over the bridge's byte stream with a simple header framing:
//! ```text
//! Content-Length: <length>\r\n
//! \r\n
//! <payload>
//! ```

use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::sync::Mutex;

use crate::errors::TransportError;

/// Outbound half of the link: transmits one serialised request.
pub trait Transmit: Send + Sync {
    /// Sends `payload` as one frame.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the frame could not be written.
    fn tx(&self, payload: &[u8]) -> Result<(), TransportError>;
}

impl<T: Transmit + ?Sized> Transmit for std::sync::Arc<T> {
    fn tx(&self, payload: &[u8]) -> Result<(), TransportError> {
        (**self).tx(payload)
    }
}

/// Writes framed messages; concurrent senders are serialised.
pub struct FrameWriter<W: Write> {
    writer: Mutex<BufWriter<W>>,
}

impl<W: Write> FrameWriter<W> {
    /// Wraps a byte sink.
    #[must_use]
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
        }
    }

    /// Sends a framed message.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Io` if writing to the sink fails.
    pub fn send(&self, message: &[u8]) -> Result<(), TransportError> {
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        let header = format!("Content-Length: {}\r\n\r\n", message.len());
        writer.write_all(header.as_bytes())?;
        writer.write_all(message)?;
        writer.flush()?;
        Ok(())
    }

    /// Unwraps the sink, flushing buffered bytes.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Io` if the final flush fails.
    pub fn into_inner(self) -> Result<W, TransportError> {
        let writer = self
            .writer
            .into_inner()
            .unwrap_or_else(|poison| poison.into_inner());
        writer
            .into_inner()
            .map_err(|error| TransportError::Io(error.into_error()))
    }
}

impl<W: Write + Send> Transmit for FrameWriter<W> {
    fn tx(&self, payload: &[u8]) -> Result<(), TransportError> {
        self.send(payload)
    }
}

/// Reads framed messages from a byte source.
pub struct FrameReader<R: Read> {
    reader: BufReader<R>,
}

impl<R: Read> FrameReader<R> {
    /// Wraps a byte source.
    #[must_use]
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Receives one framed message (blocks until complete).
    ///
    /// # Errors
    ///
    /// Returns `TransportError::MissingContentLength` if no Content-Length header is found.
    /// Returns `TransportError::Io` if reading fails or the stream ends.
    pub fn receive(&mut self) -> Result<Vec<u8>, TransportError> {
        let content_length = self.read_headers()?;
        let mut content = vec![0u8; content_length];
        self.reader.read_exact(&mut content)?;
        Ok(content)
    }

    /// Reads headers and extracts the Content-Length value.
    fn read_headers(&mut self) -> Result<usize, TransportError> {
        let mut content_length: Option<usize> = None;

        loop {
            let mut line = String::new();
            let bytes_read = self.reader.read_line(&mut line)?;
            if bytes_read == 0 {
                return Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed while reading headers",
                )));
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                break;
            }

            if let Some(value) = trimmed.strip_prefix("Content-Length: ") {
                content_length = Some(value.parse().map_err(|_| TransportError::InvalidHeader)?);
            }
        }

        content_length.ok_or(TransportError::MissingContentLength)
    }
}
