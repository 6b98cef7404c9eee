//! Frame codec — length-prefixed envelopes over the wire.
//!
//! Every frame is `length (u32 BE) || code (1 byte) || payload`, where the
//! length covers the code byte and the payload. The reader returns raw
//! frames so the dispatch layer can observe unknown codes without failing
//! the whole session.

use crate::error::ProtocolError;
use crate::messages::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame size in bytes (code + payload).
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024; // 4 MiB

/// An undecoded frame: message code plus raw payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawFrame {
    pub code: u8,
    pub payload: Vec<u8>,
}

impl RawFrame {
    pub fn decode(&self) -> Result<Message, ProtocolError> {
        Message::decode(self.code, &self.payload)
    }
}

/// Encode a message into a complete frame, envelope included.
pub fn encode_frame(message: &Message) -> Vec<u8> {
    let payload = message.encode_payload();
    let mut out = Vec::with_capacity(5 + payload.len());
    out.extend_from_slice(&((payload.len() + 1) as u32).to_be_bytes());
    out.push(message.code());
    out.extend_from_slice(&payload);
    out
}

/// Decode one complete frame from a buffer.
pub fn decode_frame(input: &[u8]) -> Result<RawFrame, ProtocolError> {
    if input.len() < 5 {
        return Err(ProtocolError::Truncated);
    }
    let len = u32::from_be_bytes(input[..4].try_into().expect("4-byte slice")) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::Oversized {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }
    if len == 0 || input.len() - 4 != len {
        return Err(ProtocolError::Malformed("frame length mismatch".into()));
    }
    Ok(RawFrame {
        code: input[4],
        payload: input[5..].to_vec(),
    })
}

/// Read one frame from an async stream.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<RawFrame, ProtocolError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::Oversized {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }
    if len == 0 {
        return Err(ProtocolError::Malformed("empty frame".into()));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(RawFrame {
        code: body[0],
        payload: body[1..].to_vec(),
    })
}

/// Write one message as a frame to an async stream.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &Message,
) -> Result<(), ProtocolError> {
    let frame = encode_frame(message);
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}
