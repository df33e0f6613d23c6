use log::warn;

use super::{ParticipantId, Sequencer};
use crate::{action::Mutation, wire::Message};

/// Communication part (emit & broadcast)
impl<M: Mutation> Sequencer<M> {
    pub(super) fn emit(&self, id: ParticipantId, message: Message<M>) {
        let participant = match self.participants.get(&id) {
            Some(participant) => participant,
            None => {
                warn!("Sequencer: no participant {id} for {:?}", message.message_type());
                return;
            }
        };

        if let Err(err) = participant.outbox.send(message) {
            warn!("Participant {id}: {err}");
        }
    }

    /// Sends to every participant except `except`.
    pub(super) fn broadcast(&self, except: Option<ParticipantId>, message: Message<M>) {
        for (id, participant) in &self.participants {
            if Some(*id) == except {
                continue;
            }

            if let Err(err) = participant.outbox.send(message.clone()) {
                warn!("Participant {id}: {err}");
            }
        }
    }
}
