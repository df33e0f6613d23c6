//! Server role: the single authority on ordering. Holds a baseline snapshot
//! plus a bounded tail of actions that can still be undone.

mod networking;
mod role;
mod server;

use std::{
    collections::{HashMap, HashSet},
    fmt,
};

use log::{debug, info, warn};
use tokio::sync::mpsc::UnboundedSender;

use crate::{
    action::{Action, Mutation},
    action_list::ActionList,
    clock::local_time_millis,
    error::SequencerError,
    ids::{ClientActionId, ClientId},
    wire::Message,
};

pub use role::{Participant, ParticipantRole};
pub use server::{MasterCommand, MasterHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParticipantId(pub usize);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub struct Sequencer<M: Mutation> {
    /// Everything folded so far. `snapshot + stack` is the current state.
    snapshot: M::State,
    /// Sequenced actions, kept fresh: the sequencer never holds undo caches.
    stack: ActionList<M>,
    max_stack_size: usize,
    /// Ids that left the stack without being undone, either folded into the
    /// snapshot or discarded by a reset. Never forgotten: a late resend or
    /// undo of any of them must be recognised.
    retired: HashSet<ClientActionId>,

    participants: HashMap<ParticipantId, Participant<M>>,
    next_participant: usize,
}

impl<M: Mutation> Sequencer<M> {
    pub fn new(snapshot: M::State, max_stack_size: usize) -> Self {
        Self {
            snapshot,
            stack: ActionList::new(),
            max_stack_size,
            retired: HashSet::new(),
            participants: HashMap::new(),
            next_participant: 0,
        }
    }

    pub fn snapshot(&self) -> &M::State {
        &self.snapshot
    }

    pub fn stack_ids(&self) -> Vec<ClientActionId> {
        self.stack.ids()
    }

    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn participant_ids(&self) -> Vec<ParticipantId> {
        let mut ids: Vec<_> = self.participants.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn is_syncing(&self, id: ParticipantId) -> bool {
        self.participants
            .get(&id)
            .map(|participant| participant.role.is_syncing())
            .unwrap_or(false)
    }

    pub fn was_retired(&self, id: &ClientActionId) -> bool {
        self.retired.contains(id)
    }

    pub fn participant_of(&self, client: ClientId) -> Option<ParticipantId> {
        self.participants
            .iter()
            .find(|(_, participant)| participant.client == client)
            .map(|(id, _)| *id)
    }

    /// The authoritative state: the snapshot with the whole stack replayed.
    pub fn current_state(&self) -> Result<M::State, SequencerError> {
        let mut state = self.snapshot.clone();
        for (_, action) in self.stack.iter() {
            action.fresh_clone().apply(&mut state)?;
        }
        Ok(state)
    }

    /// Registers a participant and pushes the current `SYNC` to it. A
    /// participant already seated for the same client is replaced, and
    /// whatever its old connection still delivers is dropped.
    pub fn join(
        &mut self,
        outbox: UnboundedSender<Message<M>>,
        client: ClientId,
        privileged: bool,
    ) -> Result<ParticipantId, SequencerError> {
        let sync = self.sync_message()?;

        if let Some(previous) = self.participant_of(client) {
            info!(
                "Sequencer: client {} rejoined, replacing participant {}",
                client, previous
            );
            self.leave(previous);
        }

        let id = ParticipantId(self.next_participant);
        self.next_participant += 1;
        self.participants
            .insert(id, Participant::new(outbox, client, privileged));

        info!(
            "Sequencer: participant {} joined (privileged: {}), {} participants",
            id,
            privileged,
            self.participants.len()
        );
        self.emit(id, sync);

        Ok(id)
    }

    pub fn leave(&mut self, id: ParticipantId) -> bool {
        match self.participants.remove(&id) {
            Some(participant) => {
                info!(
                    "Sequencer: participant {} left while {}, {} participants",
                    id,
                    participant.role.to_string(),
                    self.participants.len()
                );
                true
            }
            None => false,
        }
    }

    /// Handles a message received from a participant.
    pub fn handle_message(
        &mut self,
        from: ParticipantId,
        message: Message<M>,
    ) -> Result<(), SequencerError> {
        let (privileged, syncing) = match self.participants.get(&from) {
            Some(participant) => (participant.privileged, participant.role.is_syncing()),
            None => {
                debug!(
                    "Sequencer: dropping {:?} from departed participant {}",
                    message.message_type(),
                    from
                );
                return Ok(());
            }
        };

        match message {
            Message::Quit => {
                self.leave(from);
            }
            Message::SyncAck => {
                if !syncing {
                    warn!("Sequencer: participant {} acked a sync it was not sent", from);
                }
                if let Some(participant) = self.participants.get_mut(&from) {
                    participant.role = ParticipantRole::Ready;
                }
            }
            Message::ClockSyncRequest { .. } => {
                self.emit(
                    from,
                    Message::ClockSync {
                        timestamp_millis: local_time_millis(),
                    },
                );
            }
            Message::Sync { snapshot, .. } if privileged => {
                let state = serde_cbor::from_slice(&snapshot)
                    .map_err(|e| SequencerError::Snapshot(e.to_string()))?;
                self.post_sync(state)?;
            }
            message if syncing => {
                debug!(
                    "Sequencer: ignoring {:?} from syncing participant {}",
                    message.message_type(),
                    from
                );
            }
            Message::Action { id, action } => self.deliver_action(from, id, action)?,
            Message::Undo(id) => self.deliver_undo(from, id)?,
            other => {
                warn!(
                    "Sequencer: ignoring unexpected {:?} from participant {}",
                    other.message_type(),
                    from
                );
            }
        }

        Ok(())
    }

    /// An action sent by `from`: sequence it, ack the sender, relay to others.
    pub fn deliver_action(
        &mut self,
        from: ParticipantId,
        id: ClientActionId,
        params: M,
    ) -> Result<(), SequencerError> {
        if self.stack.contains(&id) || self.retired.contains(&id) {
            // Resent after a reconnect that raced the original delivery
            warn!(
                "Sequencer: action {} from participant {} already sequenced",
                id, from
            );
            self.emit(from, Message::ActionAck(id));
            if self.retired.contains(&id) {
                self.resync(from)?;
            }
            return Ok(());
        }

        self.sequence_action(Some(from), id, params)
    }

    /// Owner-side action: relayed to every participant.
    pub fn post_action(&mut self, id: ClientActionId, params: M) -> Result<bool, SequencerError> {
        if self.stack.contains(&id) || self.retired.contains(&id) {
            warn!("Sequencer: posted action {} already sequenced", id);
            return Ok(false);
        }

        self.sequence_action(None, id, params).map(|_| true)
    }

    /// An undo sent by `from`. Undoing an id that is no longer in the stack is
    /// acknowledged without effect; if the id was retired the sender is
    /// resynced, since its local inversion cannot stand.
    pub fn deliver_undo(
        &mut self,
        from: ParticipantId,
        id: ClientActionId,
    ) -> Result<(), SequencerError> {
        if self.stack.remove(&id).is_some() {
            debug!("Sequencer: participant {} undid {}", from, id);
            self.emit(from, Message::UndoAck(id));
            self.broadcast(Some(from), Message::Undo(id));
            return Ok(());
        }

        self.emit(from, Message::UndoAck(id));

        if self.retired.contains(&id) {
            // The sender inverted an action the snapshot still contains
            info!(
                "Sequencer: participant {} undid retired action {}, resyncing it",
                from, id
            );
            self.resync(from)?;
        } else {
            debug!(
                "Sequencer: stale undo {} from participant {} ignored",
                id, from
            );
        }

        Ok(())
    }

    /// Owner-side undo. Returns false if `id` is no longer undoable.
    pub fn post_undo(&mut self, id: ClientActionId) -> bool {
        if self.stack.remove(&id).is_none() {
            debug!("Sequencer: stale posted undo {} ignored", id);
            return false;
        }

        debug!("Sequencer: owner undid {}", id);
        self.broadcast(None, Message::Undo(id));
        true
    }

    /// Replaces the snapshot and the stack, then pushes `SYNC` to everyone.
    pub fn post_sync(&mut self, state: M::State) -> Result<(), SequencerError> {
        info!(
            "Sequencer: resetting to a new snapshot, resyncing {} participants",
            self.participants.len()
        );

        self.snapshot = state;
        for (id, _) in self.stack.drain() {
            self.retired.insert(id);
        }

        let sync = self.sync_message()?;
        for participant in self.participants.values_mut() {
            participant.role = ParticipantRole::Syncing;
        }
        self.broadcast(None, sync);

        Ok(())
    }

    /// Says goodbye to every participant and forgets them.
    pub fn quit(&mut self) {
        info!(
            "Sequencer: quitting, {} participants",
            self.participants.len()
        );
        self.broadcast(None, Message::Quit);
        self.participants.clear();
    }

    pub fn sync_message(&self) -> Result<Message<M>, SequencerError> {
        let snapshot = serde_cbor::to_vec(&self.snapshot)
            .map_err(|e| SequencerError::Snapshot(e.to_string()))?;

        let actions = self
            .stack
            .iter()
            .map(|(id, action)| (*id, action.params().clone()))
            .collect();

        Ok(Message::Sync { snapshot, actions })
    }

    fn sequence_action(
        &mut self,
        from: Option<ParticipantId>,
        id: ClientActionId,
        params: M,
    ) -> Result<(), SequencerError> {
        debug!(
            "Sequencer: sequencing {} ({}) at position {}",
            id,
            params.describe(),
            self.stack.len()
        );

        self.stack.push_back(id, Action::new(params.clone()));
        self.fold_overflow()?;

        if let Some(from) = from {
            self.emit(from, Message::ActionAck(id));
        }
        self.broadcast(from, Message::Action { id, action: params });

        Ok(())
    }

    /// Each evicted action is applied to the snapshot here, and only here.
    fn fold_overflow(&mut self) -> Result<(), SequencerError> {
        while self.stack.len() > self.max_stack_size {
            let (id, mut action) = match self.stack.pop_front() {
                Some(entry) => entry,
                None => break,
            };

            debug!("Sequencer: folding {} into the snapshot", id);
            action.apply(&mut self.snapshot)?;
            self.retired.insert(id);
        }
        Ok(())
    }

    fn resync(&mut self, id: ParticipantId) -> Result<(), SequencerError> {
        let sync = self.sync_message()?;
        if let Some(participant) = self.participants.get_mut(&id) {
            participant.role = ParticipantRole::Syncing;
        }
        self.emit(id, sync);
        Ok(())
    }
}
