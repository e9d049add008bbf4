//! Length-prefix framing for the Parley wire protocol.
//!
//! Every frame on the stream is `[u32 length (LE)][payload bytes]`. The
//! payload is a record (see [`crate::record`]). A file header is the one
//! exception to "everything is framed": the raw file bytes follow the header
//! frame directly, and their length is the header's `size` field.
//!
//! Both slice-based helpers (for buffers) and async stream helpers are
//! provided.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size in bytes of the frame length prefix.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Default upper bound on a single frame payload (64 KB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Error type for framing operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Frame is incomplete or has an invalid length prefix.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// A frame or payload announces more bytes than allowed.
    #[error("{size} bytes exceeds maximum {max}")]
    Oversized {
        /// Announced size.
        size: u64,
        /// Configured maximum.
        max: u64,
    },

    /// The stream ended in the middle of a frame or payload.
    #[error("stream ended after {read} of {expected} bytes")]
    Truncated {
        /// Bytes that were expected.
        expected: u64,
        /// Bytes that arrived before end of stream.
        read: u64,
    },

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Prepends the 4-byte little-endian length prefix to `payload`.
///
/// # Errors
///
/// Returns `CodecError::InvalidFrame` if the payload exceeds `u32::MAX` bytes.
pub fn encode_framed(payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    let len = u32::try_from(payload.len()).map_err(|_| {
        CodecError::InvalidFrame(format!(
            "payload too large for framing: {} bytes",
            payload.len()
        ))
    })?;
    let mut frame = Vec::with_capacity(LENGTH_PREFIX_LEN + payload.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Splits one length-prefixed frame off the front of `bytes`.
///
/// Returns the payload and the total number of bytes consumed (prefix
/// included).
///
/// # Errors
///
/// Returns `CodecError::InvalidFrame` if the input is too short for the
/// prefix or for the payload it announces.
pub fn decode_framed(bytes: &[u8]) -> Result<(&[u8], usize), CodecError> {
    let Some((len_bytes, rest)) = bytes.split_first_chunk::<LENGTH_PREFIX_LEN>() else {
        return Err(CodecError::InvalidFrame(format!(
            "need at least {LENGTH_PREFIX_LEN} bytes for length prefix, got {}",
            bytes.len()
        )));
    };
    let payload_len = u32::from_le_bytes(*len_bytes) as usize;

    if rest.len() < payload_len {
        return Err(CodecError::InvalidFrame(format!(
            "frame indicates {payload_len} bytes but only {} available",
            rest.len()
        )));
    }

    Ok((&rest[..payload_len], LENGTH_PREFIX_LEN + payload_len))
}

/// Reads one frame payload from `reader`.
///
/// Returns `Ok(None)` when the stream ends cleanly before the first prefix
/// byte, which is how a peer closing its connection looks on the wire.
///
/// # Errors
///
/// Returns `CodecError::Oversized` if the prefix announces more than
/// `max_size` bytes, `CodecError::Truncated` if the stream ends mid-frame,
/// or `CodecError::Io` on read failure.
pub async fn read_frame<R>(reader: &mut R, max_size: usize) -> Result<Option<Vec<u8>>, CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; LENGTH_PREFIX_LEN];
    let first = reader.read(&mut len_buf).await?;
    if first == 0 {
        return Ok(None);
    }
    if first < LENGTH_PREFIX_LEN {
        read_exact_or_truncated(
            reader,
            &mut len_buf[first..],
            first as u64,
            LENGTH_PREFIX_LEN as u64,
        )
        .await?;
    }

    let size = u32::from_le_bytes(len_buf);
    if size as usize > max_size {
        return Err(CodecError::Oversized {
            size: u64::from(size),
            max: u64::try_from(max_size).unwrap_or(u64::MAX),
        });
    }

    let mut payload = vec![0u8; size as usize];
    read_exact_or_truncated(reader, &mut payload, 0, u64::from(size)).await?;
    Ok(Some(payload))
}

/// Writes `payload` as one length-prefixed frame and flushes.
///
/// # Errors
///
/// Returns `CodecError::InvalidFrame` for payloads over `u32::MAX` bytes or
/// `CodecError::Io` on write failure.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_framed(payload)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads exactly `size` raw bytes that follow a file header.
///
/// # Errors
///
/// Returns `CodecError::Truncated` if fewer than `size` bytes arrive, or
/// `CodecError::Io` on read failure.
pub async fn read_payload<R>(reader: &mut R, size: u64) -> Result<Vec<u8>, CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut payload = Vec::with_capacity(usize::try_from(size).unwrap_or(0));
    let read = (&mut *reader).take(size).read_to_end(&mut payload).await? as u64;
    if read < size {
        return Err(CodecError::Truncated {
            expected: size,
            read,
        });
    }
    Ok(payload)
}

/// Reads and drops exactly `size` raw bytes, keeping the stream aligned.
///
/// # Errors
///
/// Returns `CodecError::Truncated` if fewer than `size` bytes arrive, or
/// `CodecError::Io` on read failure.
pub async fn discard_payload<R>(reader: &mut R, size: u64) -> Result<(), CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut limited = (&mut *reader).take(size);
    let read = tokio::io::copy(&mut limited, &mut tokio::io::sink()).await?;
    if read < size {
        return Err(CodecError::Truncated {
            expected: size,
            read,
        });
    }
    Ok(())
}

/// Fills `buf`. `already` counts the bytes of the same unit read before
/// `buf`, so a short stream reports how much of `expected` actually arrived.
async fn read_exact_or_truncated<R>(
    reader: &mut R,
    buf: &mut [u8],
    already: u64,
    expected: u64,
) -> Result<(), CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(CodecError::Truncated {
                expected,
                read: already + filled as u64,
            });
        }
        filled += n;
    }
    Ok(())
}
