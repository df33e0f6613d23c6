//! Framing: a fixed 9 byte header (`body_length: u64` little-endian, then the
//! message type byte) followed by the body.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::error::{WireError, WireResult};

pub const HEADER_LEN: usize = 9;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Handshake = 0,
    Sync = 1,
    SyncAck = 2,
    Action = 3,
    ActionAck = 4,
    Undo = 5,
    UndoAck = 6,
    Quit = 7,
    ClockSync = 8,
    ClockSyncRequest = 9,
}

impl TryFrom<u8> for MessageType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => MessageType::Handshake,
            1 => MessageType::Sync,
            2 => MessageType::SyncAck,
            3 => MessageType::Action,
            4 => MessageType::ActionAck,
            5 => MessageType::Undo,
            6 => MessageType::UndoAck,
            7 => MessageType::Quit,
            8 => MessageType::ClockSync,
            9 => MessageType::ClockSyncRequest,
            other => return Err(WireError::UnknownMessageType(other)),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub body_length: u64,
    pub message_type: MessageType,
}

impl FrameHeader {
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u64_le(self.body_length);
        buf.put_u8(self.message_type as u8);
    }

    /// Returns `Ok(None)` if there aren't enough bytes yet.
    pub fn decode(buf: &mut impl Buf) -> WireResult<Option<Self>> {
        if buf.remaining() < HEADER_LEN {
            return Ok(None);
        }

        let body_length = buf.get_u64_le();
        let message_type = MessageType::try_from(buf.get_u8())?;

        Ok(Some(Self {
            body_length,
            message_type,
        }))
    }

    pub fn validate(&self, max_body_size: u64) -> WireResult<()> {
        if self.body_length > max_body_size {
            return Err(WireError::BodyTooLarge {
                size: self.body_length,
                max: max_body_size,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub body: Bytes,
}

impl Frame {
    pub fn new(message_type: MessageType, body: Bytes) -> Self {
        Self {
            header: FrameHeader {
                body_length: body.len() as u64,
                message_type,
            },
            body,
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.header.message_type
    }

    pub fn encode_to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.body.len());
        self.header.encode(&mut buf);
        buf.put_slice(&self.body);
        buf.freeze()
    }
}

pub async fn read_frame<R>(reader: &mut R, max_body_size: u64) -> WireResult<Frame>
where
    R: AsyncRead + Unpin,
{
    let mut raw = [0u8; HEADER_LEN];
    reader.read_exact(&mut raw).await?;

    let header = FrameHeader::decode(&mut &raw[..])?.ok_or_else(|| {
        WireError::Deserialization("frame header truncated".to_string())
    })?;
    header.validate(max_body_size)?;

    let mut body = vec![0u8; header.body_length as usize];
    reader.read_exact(&mut body).await?;

    Ok(Frame {
        header,
        body: Bytes::from(body),
    })
}

pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> WireResult<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&frame.encode_to_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
