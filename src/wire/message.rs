//! Typed messages exchanged between replicas and the sequencer.
//!
//! Bodies are CBOR; see `frame` for the header.

use std::fmt;

use bytes::Bytes;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::{
    error::{WireError, WireResult},
    frame::{Frame, MessageType},
};
use crate::ids::{ClientActionId, ClientId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u16,
}

impl ProtocolVersion {
    pub const CURRENT: ProtocolVersion = ProtocolVersion { major: 1, minor: 0 };

    pub fn compatible(&self, other: &ProtocolVersion) -> bool {
        self.major == other.major
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message<M> {
    /// The sequencer greets without a client id, the replica answers with
    /// its own.
    Handshake {
        version: ProtocolVersion,
        client: Option<ClientId>,
    },
    /// Local wall clock of the requester when the request was sent.
    ClockSyncRequest { timestamp_millis: i64 },
    /// Wall clock of the sequencer when answering.
    ClockSync { timestamp_millis: i64 },
    /// Serialized snapshot plus the replayable tail, in sequenced order.
    Sync {
        snapshot: Vec<u8>,
        actions: Vec<(ClientActionId, M)>,
    },
    SyncAck,
    Action { id: ClientActionId, action: M },
    ActionAck(ClientActionId),
    Undo(ClientActionId),
    UndoAck(ClientActionId),
    Quit,
}

impl<M> Message<M> {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Handshake { .. } => MessageType::Handshake,
            Message::ClockSyncRequest { .. } => MessageType::ClockSyncRequest,
            Message::ClockSync { .. } => MessageType::ClockSync,
            Message::Sync { .. } => MessageType::Sync,
            Message::SyncAck => MessageType::SyncAck,
            Message::Action { .. } => MessageType::Action,
            Message::ActionAck(_) => MessageType::ActionAck,
            Message::Undo(_) => MessageType::Undo,
            Message::UndoAck(_) => MessageType::UndoAck,
            Message::Quit => MessageType::Quit,
        }
    }
}

impl<M> Message<M>
where
    M: Serialize + DeserializeOwned,
{
    pub fn to_frame(&self) -> WireResult<Frame> {
        let body = match self {
            Message::Handshake { version, client } => encode(&(version, client))?,
            Message::ClockSyncRequest { timestamp_millis }
            | Message::ClockSync { timestamp_millis } => encode(timestamp_millis)?,
            Message::Sync { snapshot, actions } => encode(&(snapshot, actions))?,
            Message::Action { id, action } => encode(&(id, action))?,
            Message::ActionAck(id) | Message::Undo(id) | Message::UndoAck(id) => encode(id)?,
            Message::SyncAck | Message::Quit => Bytes::new(),
        };

        Ok(Frame::new(self.message_type(), body))
    }

    pub fn from_frame(frame: &Frame) -> WireResult<Self> {
        let body = &frame.body[..];

        Ok(match frame.message_type() {
            MessageType::Handshake => {
                let (version, client) = decode(body)?;
                Message::Handshake { version, client }
            }
            MessageType::ClockSyncRequest => Message::ClockSyncRequest {
                timestamp_millis: decode(body)?,
            },
            MessageType::ClockSync => Message::ClockSync {
                timestamp_millis: decode(body)?,
            },
            MessageType::Sync => {
                let (snapshot, actions) = decode(body)?;
                Message::Sync { snapshot, actions }
            }
            MessageType::SyncAck => Message::SyncAck,
            MessageType::Action => {
                let (id, action) = decode(body)?;
                Message::Action { id, action }
            }
            MessageType::ActionAck => Message::ActionAck(decode(body)?),
            MessageType::Undo => Message::Undo(decode(body)?),
            MessageType::UndoAck => Message::UndoAck(decode(body)?),
            MessageType::Quit => Message::Quit,
        })
    }
}

fn encode<T: Serialize>(value: &T) -> WireResult<Bytes> {
    serde_cbor::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| WireError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> WireResult<T> {
    serde_cbor::from_slice(body).map_err(|e| WireError::Deserialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::{Message, ProtocolVersion};
    use crate::{
        ids::{ActionId, ClientActionId, ClientId},
        wire::{read_frame, Frame, MessageType, WireError},
    };

    fn id(n: u64) -> ClientActionId {
        ClientActionId::new(ClientId(7), ActionId(n))
    }

    #[tokio::test]
    async fn sync_survives_the_wire() {
        let message: Message<String> = Message::Sync {
            snapshot: vec![1, 2, 3],
            actions: vec![(id(1), "first".to_string()), (id(2), "second".to_string())],
        };

        let bytes = message.to_frame().unwrap().encode_to_bytes();
        let frame = read_frame(&mut &bytes[..], 1 << 20).await.unwrap();

        assert_eq!(frame.message_type(), MessageType::Sync);
        assert_eq!(Message::<String>::from_frame(&frame).unwrap(), message);
    }

    #[test]
    fn acknowledgements_carry_only_the_id() {
        let ack: Message<String> = Message::ActionAck(id(9));
        let frame = ack.to_frame().unwrap();

        assert_eq!(frame.message_type(), MessageType::ActionAck);
        assert_eq!(
            frame.body,
            Bytes::from(serde_cbor::to_vec(&id(9)).unwrap())
        );
    }

    #[test]
    fn quit_has_empty_body() {
        let frame = Message::<String>::Quit.to_frame().unwrap();
        assert_eq!(frame.header.body_length, 0);
        assert_eq!(Message::<String>::from_frame(&frame).unwrap(), Message::Quit);
    }

    #[test]
    fn garbage_body_fails_to_decode() {
        let frame = Frame::new(MessageType::Action, Bytes::from_static(b"\xff\xff"));
        let result = Message::<String>::from_frame(&frame);
        assert!(matches!(result, Err(WireError::Deserialization(_))));
    }

    #[test]
    fn major_version_decides_compatibility() {
        let current = ProtocolVersion::CURRENT;
        assert!(current.compatible(&ProtocolVersion { major: 1, minor: 7 }));
        assert!(!current.compatible(&ProtocolVersion { major: 2, minor: 0 }));
    }
}
