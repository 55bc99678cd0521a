//! Length-prefixed framing for the native-messaging channel.
//!
//! Wire format: 4-byte little-endian byte count, then that many bytes of
//! UTF-8 JSON. An oversize frame is drained from the stream so the next
//! frame stays aligned; the caller replies `message_too_large` and continues.

use {
    thiserror::Error,
    tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
};

/// Upper bound on a single frame, matching the host platform's native
/// messaging limit.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    /// Clean end of stream before a length prefix.
    #[error("end of stream")]
    Eof,

    /// Frame advertised more bytes than the limit. The payload has been
    /// drained; the stream is still aligned.
    #[error("frame of {len} bytes exceeds the {MAX_FRAME_BYTES} byte limit")]
    TooLarge { len: usize },

    /// The frame's bytes were not a JSON object.
    #[error("malformed frame: {0}")]
    Invalid(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// Whether the read loop can keep going after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FrameError::TooLarge { .. } | FrameError::Invalid(_))
    }
}

/// Read one frame. Truncated prefixes and payloads surface as `Invalid`
/// (mid-frame EOF means the peer desynchronized, not that it finished).
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<serde_json::Value, FrameError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {},
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(FrameError::Eof);
        },
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_BYTES {
        drain(reader, len).await?;
        return Err(FrameError::TooLarge { len });
    }

    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => {
                FrameError::Invalid(format!("frame truncated at {len} bytes"))
            },
            _ => FrameError::Io(e),
        })?;

    serde_json::from_slice(&payload).map_err(|e| FrameError::Invalid(e.to_string()))
}

/// Write one frame. Values that serialize past the limit are refused before
/// any bytes hit the wire.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    value: &serde_json::Value,
) -> Result<(), FrameError> {
    let payload = serde_json::to_vec(value).map_err(|e| FrameError::Invalid(e.to_string()))?;
    if payload.len() > MAX_FRAME_BYTES {
        return Err(FrameError::TooLarge {
            len: payload.len(),
        });
    }

    let len = (payload.len() as u32).to_le_bytes();
    writer.write_all(&len).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

async fn drain<R: AsyncRead + Unpin>(reader: &mut R, mut remaining: usize) -> Result<(), FrameError> {
    let mut sink = [0u8; 8192];
    while remaining > 0 {
        let take = remaining.min(sink.len());
        let n = reader.read(&mut sink[..take]).await?;
        if n == 0 {
            return Err(FrameError::Invalid(
                "stream ended while draining oversize frame".into(),
            ));
        }
        remaining -= n;
    }
    Ok(())
}
