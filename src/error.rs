use std::time::Duration;

use thiserror::Error;

use crate::{
    ids::ClientActionId,
    wire::{MessageType, ProtocolVersion, WireError},
};

/// Misuse of the `Fresh`/`Applied` lifecycle. Always a programming error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error("invalid action state (applied: {applied})")]
    InvalidState { applied: bool },
}

/// Malformed or out-of-order traffic. Fatal to the connection it arrived on.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("acknowledgement for {got} does not match unconfirmed head {expected:?}")]
    UnexpectedAck {
        expected: Option<ClientActionId>,
        got: ClientActionId,
    },
    #[error("undo for {0} which is not a confirmed action")]
    UnknownConfirmedAction(ClientActionId),
    #[error("action {0} was delivered twice")]
    DuplicateAction(ClientActionId),
    #[error("unexpected {0:?} message")]
    UnexpectedMessage(MessageType),
    #[error("malformed snapshot: {0}")]
    MalformedSnapshot(String),
    #[error(transparent)]
    Wire(#[from] WireError),
}

#[derive(Debug, Error)]
pub enum ReplicaError {
    #[error(transparent)]
    Action(#[from] ActionError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// The id is in neither the confirmed nor the unconfirmed list.
    #[error("action {0} is neither confirmed nor unconfirmed")]
    UnknownAction(ClientActionId),
    #[error("action {0} is already undone")]
    AlreadyUndone(ClientActionId),
    #[error("failed to encode snapshot: {0}")]
    Snapshot(String),
}

impl ReplicaError {
    pub fn is_protocol(&self) -> bool {
        matches!(self, ReplicaError::Protocol(_))
    }
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("failed to resolve {0}")]
    Resolve(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection attempt timed out after {0:?}")]
    Timeout(Duration),
    #[error("incompatible protocol version {0}")]
    IncompatibleVersion(ProtocolVersion),
    #[error("expected {expected:?} message, received {got:?}")]
    UnexpectedMessage {
        expected: MessageType,
        got: MessageType,
    },
    #[error("connection closed by peer")]
    Closed,
    #[error("peer did not identify itself")]
    Anonymous,
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Sequencer(#[from] SequencerError),
}

#[derive(Debug, Error)]
pub enum SequencerError {
    #[error(transparent)]
    Action(#[from] ActionError),
    #[error("failed to encode or decode snapshot: {0}")]
    Snapshot(String),
}
