//! `multipart/x-mixed-replace` framing.
//!
//! Browsers render each part of such a response in place of the previous
//! one, which turns a stream of JPEGs into live video in a plain `<img>`.
//!
//! ```text
//! --FRAME\r\n
//! Content-Type: image/jpeg\r\n
//! Content-Length: 4711\r\n
//! \r\n
//! <4711 bytes of JPEG>\r\n
//! ```

use std::io::{self, Write};

pub const DEFAULT_BOUNDARY: &str = "FRAME";

/// `Content-Type` header value for a stream using `boundary`.
pub fn content_type(boundary: &str) -> String {
    format!("multipart/x-mixed-replace; boundary={}", boundary)
}

/// Header block that precedes the payload of one part.
pub fn part_header(boundary: &str, content_type: &str, len: usize) -> String {
    format!(
        "--{}\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n",
        boundary, content_type, len
    )
}

/// Writes consecutive parts to an underlying writer.
pub struct MultipartWriter<W: Write> {
    inner: W,
    boundary: String,
}

impl<W: Write> MultipartWriter<W> {
    pub fn new(inner: W, boundary: &str) -> Self {
        Self {
            inner,
            boundary: boundary.to_string(),
        }
    }

    /// Write one complete part and flush it to the peer.
    ///
    /// Returns the number of bytes put on the wire.
    pub fn write_part(&mut self, content_type: &str, payload: &[u8]) -> io::Result<usize> {
        let header = part_header(&self.boundary, content_type, payload.len());
        self.inner.write_all(header.as_bytes())?;
        self.inner.write_all(payload)?;
        self.inner.write_all(b"\r\n")?;
        self.inner.flush()?;
        Ok(header.len() + payload.len() + 2)
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}
