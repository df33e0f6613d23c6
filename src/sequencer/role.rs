use tokio::sync::mpsc::UnboundedSender;

use crate::{action::Mutation, ids::ClientId, wire::Message};

/// A participant is `Syncing` from the moment a `SYNC` is pushed to it until
/// its `SYNC_ACK` comes back. Anything else it sends meanwhile is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantRole {
    Syncing,
    Ready,
}

impl ParticipantRole {
    pub fn is_syncing(&self) -> bool {
        matches!(self, ParticipantRole::Syncing)
    }

    pub fn to_string(&self) -> &'static str {
        match self {
            ParticipantRole::Syncing => "Syncing",
            ParticipantRole::Ready => "Ready",
        }
    }
}

#[derive(Debug)]
pub struct Participant<M: Mutation> {
    pub outbox: UnboundedSender<Message<M>>,
    pub role: ParticipantRole,
    /// At most one participant per client: a rejoin replaces the old seat.
    pub client: ClientId,
    /// Only the master replica may replace the snapshot.
    pub privileged: bool,
}

impl<M: Mutation> Participant<M> {
    pub fn new(outbox: UnboundedSender<Message<M>>, client: ClientId, privileged: bool) -> Self {
        Self {
            outbox,
            role: ParticipantRole::Syncing,
            client,
            privileged,
        }
    }
}
