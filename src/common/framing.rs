//! # Message Framing
//!
//! Length-prefixed framing over a byte stream:
//!
//! ```text
//! [4 bytes: payload length, big-endian i32] [N bytes: codec-encoded payload]
//! ```
//!
//! The prefix is signed, so the largest frame carries `2^31 - 1` bytes. There is no
//! magic number, version byte or checksum; both ends are assumed to share a codec.
//!
//! Reads are done in two phases (prefix, then payload). Each phase keeps calling the
//! underlying `read` until the requested count is reached, because a stream read may
//! return fewer bytes than asked for. A zero-byte read before that point means the peer
//! closed its write side and is reported as [`TransportError::RemoteClosed`].
//!
//! [`FrameReader`] performs those reads one at a time so that the caller can stop
//! between any two of them.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::error::{Result, TransportError};

/// Size of the length prefix in bytes.
pub const HEADER_LEN: usize = 4;

/// Largest payload the signed 4-byte prefix can describe.
pub const MAX_FRAME_LEN: usize = i32::MAX as usize;

/// Build the length prefix for a payload of `len` bytes.
///
/// Fails with [`TransportError::FrameTooLarge`] when `len` exceeds `max_len` (itself capped
/// at [`MAX_FRAME_LEN`]).
pub fn encode_header(len: usize, max_len: usize) -> Result<[u8; HEADER_LEN]> {
    let max = max_len.min(MAX_FRAME_LEN);
    if len > max {
        return Err(TransportError::FrameTooLarge { len, max });
    }
    Ok((len as i32).to_be_bytes())
}

/// Wrap a payload into a wire frame.
///
/// # Arguments
/// - `payload`: Codec-encoded message bytes
/// - `max_len`: Largest payload allowed (capped at [`MAX_FRAME_LEN`])
///
/// # Returns
/// - `Ok(Bytes)`: Prefix followed by the payload
/// - `Err(TransportError::FrameTooLarge)`: Payload exceeds the limit, nothing was produced
pub fn encode(payload: &[u8], max_len: usize) -> Result<Bytes> {
    let header = encode_header(payload.len(), max_len)?;
    let mut frame = BytesMut::with_capacity(HEADER_LEN + payload.len());
    frame.put_slice(&header);
    frame.put_slice(payload);
    Ok(frame.freeze())
}

/// Interpret a length prefix, rejecting negative or oversized values.
pub fn decode_header(header: [u8; HEADER_LEN], max_len: usize) -> Result<usize> {
    let length = i32::from_be_bytes(header);
    if length < 0 {
        return Err(TransportError::InvalidFrame(format!(
            "negative length prefix {}",
            length
        )));
    }

    let length = length as usize;
    if length > max_len {
        return Err(TransportError::InvalidFrame(format!(
            "message too large: {} bytes (max: {} bytes)",
            length, max_len
        )));
    }
    Ok(length)
}

/// Payload bytes requested per read. The buffer grows by at most this much at a time,
/// so a large length prefix alone never commits memory.
const READ_CHUNK: usize = 64 * 1024;

/// Incremental frame reader.
///
/// Each [`read_some`](Self::read_some) call issues exactly one `read` on the stream and
/// keeps the partial frame across calls. Dropping the future between calls loses no data
/// as long as the stream's own `read` is cancel-safe (it is for tokio sockets), so a caller
/// can bound every read with a timeout.
#[derive(Debug)]
pub struct FrameReader {
    max_len: usize,
    header: [u8; HEADER_LEN],
    header_filled: usize,
    length: Option<usize>,
    payload: Vec<u8>,
    payload_filled: usize,
}

impl FrameReader {
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len,
            header: [0u8; HEADER_LEN],
            header_filled: 0,
            length: None,
            payload: Vec::new(),
            payload_filled: 0,
        }
    }

    /// Whether a frame is partially read.
    pub fn in_frame(&self) -> bool {
        self.header_filled > 0
    }

    /// Issue one read.
    ///
    /// # Returns
    /// - `Ok(Some(payload))`: A frame is complete
    /// - `Ok(None)`: Progress was made, the frame is not complete yet
    /// - `Err(TransportError::RemoteClosed)`: The stream ended (the endpoints are not known
    ///   at this level; the connection fills them in)
    /// - `Err(TransportError::InvalidFrame)`: Negative or oversized length prefix
    pub async fn read_some<R>(&mut self, reader: &mut R) -> Result<Option<Vec<u8>>>
    where
        R: AsyncRead + Unpin,
    {
        let length = match self.length {
            Some(length) => length,
            None => {
                let n = reader.read(&mut self.header[self.header_filled..]).await?;
                if n == 0 {
                    return Err(TransportError::remote_closed(None, None));
                }
                self.header_filled += n;
                if self.header_filled < HEADER_LEN {
                    return Ok(None);
                }
                let length = decode_header(self.header, self.max_len)?;
                self.length = Some(length);
                if length == 0 {
                    return Ok(Some(self.finish()));
                }
                return Ok(None);
            }
        };

        let end = (self.payload_filled + READ_CHUNK).min(length);
        if self.payload.len() < end {
            self.payload.resize(end, 0);
        }
        let n = reader
            .read(&mut self.payload[self.payload_filled..end])
            .await?;
        if n == 0 {
            return Err(TransportError::remote_closed(None, None));
        }
        self.payload_filled += n;

        if self.payload_filled == length {
            Ok(Some(self.finish()))
        } else {
            Ok(None)
        }
    }

    fn finish(&mut self) -> Vec<u8> {
        self.header_filled = 0;
        self.length = None;
        self.payload_filled = 0;
        std::mem::take(&mut self.payload)
    }
}

/// Read one frame and return its payload.
///
/// # Protocol
/// 1. Reads the 4-byte length prefix (big-endian i32)
/// 2. Validates it against `max_len`
/// 3. Reads exactly that many payload bytes
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut frames = FrameReader::new(max_len);
    loop {
        if let Some(payload) = frames.read_some(reader).await? {
            return Ok(payload);
        }
    }
}

/// Write one frame with write-all semantics, then flush.
///
/// The size check happens before the first byte is written, so an oversized payload
/// leaves the stream untouched.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8], max_len: usize) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let header = encode_header(payload.len(), max_len)?;
    writer.write_all(&header).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}
