//! Binary dialect framing.
//!
//! Every binary-mode message travels as:
//!
//! ```text
//! [u32 LE payload length][payload]
//! ```
//!
//! A length above [`MAX_FRAME_PAYLOAD`](crate::constants::MAX_FRAME_PAYLOAD)
//! is a protocol violation and fatal for the connection. A zero length is a
//! valid empty message. Once a header has been read, the rest of the
//! payload must arrive within
//! [`PAYLOAD_READ_TIMEOUT`](crate::constants::PAYLOAD_READ_TIMEOUT) or the
//! connection is torn down — this guards against a peer that stalls
//! mid-frame after a corrupt (but in-range) header.

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::{timeout_at, Instant};

use crate::constants::{MAX_FRAME_PAYLOAD, PAYLOAD_READ_TIMEOUT};
use crate::wire::Wire;

/// Framing-level failures. All of them are fatal for the connection that
/// produced them.
#[derive(Debug)]
pub enum FrameError {
    /// Declared payload length exceeds the protocol limit.
    PayloadTooLarge(u32),
    /// Payload did not complete within the read deadline.
    PayloadTimeout,
    /// Stream ended mid-frame.
    Truncated,
    /// Underlying I/O failure.
    Io(std::io::Error),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PayloadTooLarge(len) => {
                write!(f, "payload length {len} exceeds limit {MAX_FRAME_PAYLOAD}")
            }
            Self::PayloadTimeout => write!(
                f,
                "payload incomplete after {}s",
                PAYLOAD_READ_TIMEOUT.as_secs()
            ),
            Self::Truncated => write!(f, "stream ended mid-frame"),
            Self::Io(e) => write!(f, "frame read failed: {e}"),
        }
    }
}

impl std::error::Error for FrameError {}

impl From<std::io::Error> for FrameError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Encode one payload into a complete frame.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Encode one schema message into a complete frame.
pub fn encode_message<M: Wire>(msg: &M) -> Vec<u8> {
    encode_frame(&msg.encode_to_vec())
}

/// Incremental frame decoder over an in-memory byte stream.
///
/// Feed bytes via [`FrameDecoder::feed`] and extract complete payloads.
/// Used by the dialect probe and by tests; the live read path is
/// [`StreamReader`].
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    /// Create a decoder with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes and extract all complete frame payloads.
    ///
    /// Incomplete data is buffered for the next call.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::PayloadTooLarge`] on an oversized header;
    /// buffered data is left untouched so the caller can inspect it.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Vec<u8>>, FrameError> {
        self.buf.extend_from_slice(bytes);
        let mut frames = Vec::new();

        loop {
            if self.buf.len() < 4 {
                break;
            }
            let length = u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
            if length > MAX_FRAME_PAYLOAD {
                return Err(FrameError::PayloadTooLarge(length));
            }
            let total = 4 + length as usize;
            if self.buf.len() < total {
                break;
            }
            frames.push(self.buf[4..total].to_vec());
            self.buf.drain(..total);
        }

        Ok(frames)
    }

    /// True when partial frame data is buffered.
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Take whatever is buffered (handing probe leftovers to a committed
    /// reader).
    pub fn into_buffer(self) -> Vec<u8> {
        self.buf
    }
}

/// Buffered reader over a socket half, serving either dialect.
///
/// Both `read_frame` and `read_line` are cancellation safe: bytes pulled
/// from the socket always land in the internal buffer before any await
/// point can observe cancellation, so a `tokio::select!` around them never
/// loses data.
#[derive(Debug)]
pub struct StreamReader<R> {
    inner: R,
    buf: Vec<u8>,
    payload_deadline: Option<Instant>,
}

impl<R: AsyncRead + Unpin> StreamReader<R> {
    /// Wrap a stream, seeding the buffer with bytes already consumed from
    /// it (probe leftovers).
    pub fn new(inner: R, leftover: Vec<u8>) -> Self {
        Self {
            inner,
            buf: leftover,
            payload_deadline: None,
        }
    }

    /// Pull more bytes from the stream into the buffer. Returns the byte
    /// count, 0 at EOF.
    async fn fill(&mut self) -> std::io::Result<usize> {
        let mut chunk = [0u8; 8192];
        let n = self.inner.read(&mut chunk).await?;
        self.buf.extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    /// Read one binary frame payload. Returns `None` on a clean EOF at a
    /// frame boundary.
    ///
    /// # Errors
    ///
    /// All [`FrameError`] variants are fatal for the connection.
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        loop {
            if self.buf.len() >= 4 {
                let length =
                    u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
                if length > MAX_FRAME_PAYLOAD {
                    return Err(FrameError::PayloadTooLarge(length));
                }
                let total = 4 + length as usize;
                if self.buf.len() >= total {
                    self.payload_deadline = None;
                    let payload = self.buf[4..total].to_vec();
                    self.buf.drain(..total);
                    return Ok(Some(payload));
                }
                // Header seen, payload incomplete: arm the deadline once
                let deadline = *self
                    .payload_deadline
                    .get_or_insert_with(|| Instant::now() + PAYLOAD_READ_TIMEOUT);
                match timeout_at(deadline, self.fill()).await {
                    Err(_) => return Err(FrameError::PayloadTimeout),
                    Ok(Ok(0)) => return Err(FrameError::Truncated),
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => return Err(e.into()),
                }
            } else {
                match self.fill().await {
                    Ok(0) => {
                        if self.buf.is_empty() {
                            return Ok(None);
                        }
                        return Err(FrameError::Truncated);
                    }
                    Ok(_) => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
    }

    /// Read one LF-terminated line, without the terminator and with any
    /// trailing CR trimmed. Returns `None` at EOF (a trailing partial line
    /// is discarded).
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    pub async fn read_line(&mut self) -> std::io::Result<Option<String>> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
                line.pop(); // '\n'
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }
            if self.fill().await? == 0 {
                return Ok(None);
            }
        }
    }
}
