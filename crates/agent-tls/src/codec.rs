//! Length-prefixed CBOR framing.

use std::io;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame size (4MB).
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("failed to serialize: {0}")]
    Serialize(String),

    #[error("failed to deserialize: {0}")]
    Deserialize(String),
}

/// Writes `message` as one frame: a big-endian `u32` length followed by the
/// CBOR payload.
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut encoded = Vec::new();
    ciborium::ser::into_writer(message, &mut encoded)
        .map_err(|e| CodecError::Serialize(e.to_string()))?;

    if encoded.len() > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge {
            size: encoded.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    #[allow(clippy::cast_possible_truncation)]
    let length_prefix = (encoded.len() as u32).to_be_bytes();
    writer.write_all(&length_prefix).await?;
    writer.write_all(&encoded).await?;
    writer.flush().await?;

    Ok(())
}

/// Reads one frame written by [`write_frame`].
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T, CodecError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let length = reader.read_u32().await? as usize;
    if length > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge {
            size: length,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut buffer = vec![0u8; length];
    reader.read_exact(&mut buffer).await?;

    ciborium::de::from_reader(&buffer[..]).map_err(|e| CodecError::Deserialize(e.to_string()))
}
