//! Pull-based multipart reader.
//!
//! ## Framing
//!
//! ```text
//! preamble --B CRLF headers CRLF CRLF body CRLF --B CRLF ... body CRLF --B -- epilogue
//! ```
//!
//! The delimiter searched for inside bodies is `CRLF--B`. The very first
//! delimiter may open the stream without the leading CRLF, so the preamble is
//! scanned for `--B` instead.
//!
//! ## Buffering
//!
//! All reads go through one fixed buffer. While scanning a body the reader
//! emits everything except the last `delimiter.len() - 1` bytes, which are
//! retained in case they are the start of a delimiter split across reads. The
//! buffer therefore has to be strictly larger than the delimiter
//! (`boundary + 4`); [`effective_buffer_size`] guarantees that.

use std::io::{self, Read, Write};

use tracing::trace;

use crate::content_type::validate_boundary;
use crate::error::MultipartError;
use crate::headers::PartHeaders;

/// Bytes added to the boundary length when sizing the read buffer.
pub const BOUNDARY_MARGIN: usize = 5;

/// Read buffer size used when the caller has no preference.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Upper bound on a single part's header block.
pub const MAX_HEADER_BLOCK: usize = 10 * 1024;

const CRLF: &[u8] = b"\r\n";
const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// `max(requested, boundary_len + BOUNDARY_MARGIN)`.
pub fn effective_buffer_size(boundary_len: usize, requested: usize) -> usize {
    requested.max(boundary_len + BOUNDARY_MARGIN)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Preamble,
    Boundary,
    Headers,
    Body,
    Done,
}

/// One fully read part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub headers: PartHeaders,
    pub body: Vec<u8>,
}

/// Forward-only reader over a multipart stream.
///
/// Call [`next_part`](Self::next_part) to advance to the next part's headers
/// and [`read_body`](Self::read_body) to stream its body into a writer. A body
/// that is not read is skipped on the next `next_part` call. After the closing
/// delimiter, or after any error, the reader yields no further parts.
pub struct MultipartReader<R> {
    inner: R,
    delimiter: Vec<u8>,
    buf: Vec<u8>,
    head: usize,
    tail: usize,
    state: State,
}

impl<R: Read> MultipartReader<R> {
    pub fn new(inner: R, boundary: &str, buffer_size: usize) -> Result<Self, MultipartError> {
        validate_boundary(boundary)?;

        let mut delimiter = Vec::with_capacity(boundary.len() + 4);
        delimiter.extend_from_slice(CRLF);
        delimiter.extend_from_slice(b"--");
        delimiter.extend_from_slice(boundary.as_bytes());

        let capacity = effective_buffer_size(boundary.len(), buffer_size);

        Ok(Self {
            inner,
            delimiter,
            buf: vec![0; capacity],
            head: 0,
            tail: 0,
            state: State::Preamble,
        })
    }

    /// Size of the internal read buffer after the boundary margin was applied.
    pub fn buffer_size(&self) -> usize {
        self.buf.len()
    }

    /// Advance to the next part and return its headers, or `None` once the
    /// closing delimiter has been consumed.
    pub fn next_part(&mut self) -> Result<Option<PartHeaders>, MultipartError> {
        let result = self.advance();
        if result.is_err() {
            self.state = State::Done;
        }
        result
    }

    /// Stream the current part's body into `out`, stopping at the next delimiter.
    ///
    /// Returns the number of body bytes written. Returns `Ok(0)` when no part
    /// body is pending.
    pub fn read_body<W: Write>(&mut self, out: &mut W) -> Result<u64, MultipartError> {
        if self.state != State::Body {
            return Ok(0);
        }
        let result = self.scan_to_delimiter(0, "closing boundary", out);
        if result.is_err() {
            self.state = State::Done;
        }
        result
    }

    /// Iterator yielding each part with its body accumulated in memory.
    pub fn parts(self) -> Parts<R> {
        Parts {
            reader: self,
            done: false,
        }
    }

    fn advance(&mut self) -> Result<Option<PartHeaders>, MultipartError> {
        loop {
            match self.state {
                State::Preamble => {
                    let skipped = self.scan_to_delimiter(2, "opening boundary", &mut io::sink())?;
                    trace!(skipped, "skipped multipart preamble");
                }
                State::Body => {
                    self.scan_to_delimiter(0, "closing boundary", &mut io::sink())?;
                }
                State::Boundary => self.read_boundary_suffix()?,
                State::Headers => {
                    let headers = self.read_headers()?;
                    self.state = State::Body;
                    return Ok(Some(headers));
                }
                State::Done => return Ok(None),
            }
        }
    }

    /// Copy bytes to `out` until `delimiter[skip..]` is found; consume the delimiter.
    fn scan_to_delimiter<W: Write>(
        &mut self,
        skip: usize,
        expecting: &'static str,
        out: &mut W,
    ) -> Result<u64, MultipartError> {
        let delim_len = self.delimiter.len() - skip;
        let keep = delim_len - 1;
        let mut written = 0u64;

        loop {
            let window = &self.buf[self.head..self.tail];
            if let Some(pos) = find(window, &self.delimiter[skip..]) {
                out.write_all(&window[..pos])?;
                written += pos as u64;
                self.head += pos + delim_len;
                self.state = State::Boundary;
                return Ok(written);
            }

            let safe = window.len().saturating_sub(keep);
            if safe > 0 {
                out.write_all(&window[..safe])?;
                written += safe as u64;
                self.head += safe;
            }

            if self.fill()? == 0 {
                return Err(MultipartError::UnexpectedEof(expecting));
            }
        }
    }

    /// After a delimiter: `--` closes the stream, CRLF opens another part.
    fn read_boundary_suffix(&mut self) -> Result<(), MultipartError> {
        let mut first = self.read_byte("boundary terminator")?;
        // transport padding
        while first == b' ' || first == b'\t' {
            first = self.read_byte("boundary terminator")?;
        }
        let second = self.read_byte("boundary terminator")?;

        match [first, second] {
            [b'-', b'-'] => {
                self.state = State::Done;
                Ok(())
            }
            [b'\r', b'\n'] => {
                self.state = State::Headers;
                Ok(())
            }
            _ => Err(MultipartError::MalformedBoundary),
        }
    }

    fn read_headers(&mut self) -> Result<PartHeaders, MultipartError> {
        let mut block = Vec::new();
        loop {
            block.push(self.read_byte("end of part headers")?);

            if block.as_slice() == CRLF {
                block.clear();
                break;
            }
            if block.ends_with(HEADER_TERMINATOR) {
                block.truncate(block.len() - HEADER_TERMINATOR.len());
                break;
            }
            if block.len() > MAX_HEADER_BLOCK {
                return Err(MultipartError::HeaderTooLarge(MAX_HEADER_BLOCK));
            }
        }
        Ok(PartHeaders::parse(&block))
    }

    fn read_byte(&mut self, expecting: &'static str) -> Result<u8, MultipartError> {
        if self.head == self.tail && self.fill()? == 0 {
            return Err(MultipartError::UnexpectedEof(expecting));
        }
        let byte = self.buf[self.head];
        self.head += 1;
        Ok(byte)
    }

    /// Compact the buffer and read more input. Returns 0 at end of stream.
    fn fill(&mut self) -> Result<usize, MultipartError> {
        if self.head > 0 {
            self.buf.copy_within(self.head..self.tail, 0);
            self.tail -= self.head;
            self.head = 0;
        }

        loop {
            match self.inner.read(&mut self.buf[self.tail..]) {
                Ok(n) => {
                    self.tail += n;
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Iterator over fully read parts. See [`MultipartReader::parts`].
pub struct Parts<R> {
    reader: MultipartReader<R>,
    done: bool,
}

impl<R: Read> Iterator for Parts<R> {
    type Item = Result<Part, MultipartError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let headers = match self.reader.next_part() {
            Ok(Some(headers)) => headers,
            Ok(None) => {
                self.done = true;
                return None;
            }
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };

        let mut body = Vec::new();
        match self.reader.read_body(&mut body) {
            Ok(_) => Some(Ok(Part { headers, body })),
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl<R: Read> std::iter::FusedIterator for Parts<R> {}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
