//! Client role: a local copy of the aggregate plus the confirmed/unconfirmed
//! action log, reconciled against what the sequencer ratifies.

mod client;
mod reconcile;
mod sync;

use std::collections::{HashSet, VecDeque};

use log::debug;

use crate::{
    action::{Action, Mutation},
    action_list::ActionList,
    error::{ProtocolError, ReplicaError},
    ids::{ActionId, ClientActionId, ClientId},
    wire::Message,
};

pub use self::client::{ClientCommand, ClientHandle, NetworkEvent};

pub struct Replica<M: Mutation> {
    client_id: ClientId,
    state: M::State,

    /// Server-ratified order.
    confirmed: ActionList<M>,
    /// Our own pending actions, always after `confirmed` in the total order.
    unconfirmed: ActionList<M>,
    /// Locally undone, not yet acknowledged.
    unconfirmed_undos: HashSet<ClientActionId>,

    redo_stack: VecDeque<M>,
    redo_limit: usize,

    last_own_undoable: Option<ClientActionId>,
    /// Set by an owner reset until the matching `SYNC` comes back.
    syncing: bool,

    outbox: VecDeque<Message<M>>,
}

impl<M: Mutation> Replica<M> {
    pub fn new(state: M::State, redo_limit: usize) -> Self {
        Self::with_client_id(ClientId::generate(), state, redo_limit)
    }

    pub fn with_client_id(client_id: ClientId, state: M::State, redo_limit: usize) -> Self {
        Self {
            client_id,
            state,
            confirmed: ActionList::new(),
            unconfirmed: ActionList::new(),
            unconfirmed_undos: HashSet::new(),
            redo_stack: VecDeque::new(),
            redo_limit,
            last_own_undoable: None,
            syncing: false,
            outbox: VecDeque::new(),
        }
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn state(&self) -> &M::State {
        &self.state
    }

    pub fn confirmed_ids(&self) -> Vec<ClientActionId> {
        self.confirmed.ids()
    }

    pub fn unconfirmed_ids(&self) -> Vec<ClientActionId> {
        self.unconfirmed.ids()
    }

    pub fn unconfirmed_undos(&self) -> &HashSet<ClientActionId> {
        &self.unconfirmed_undos
    }

    pub fn contains_confirmed(&self, id: &ClientActionId) -> bool {
        self.confirmed.contains(id)
    }

    pub fn contains_unconfirmed(&self, id: &ClientActionId) -> bool {
        self.unconfirmed.contains(id)
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing
    }

    pub fn last_own_undoable(&self) -> Option<ClientActionId> {
        self.last_own_undoable
    }

    pub fn can_undo(&self) -> bool {
        self.last_own_undoable.is_some()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Currently applied actions in total order, confirmed first.
    pub fn applied_actions(&self) -> impl Iterator<Item = (ClientActionId, &M)> + '_ {
        self.confirmed
            .iter()
            .chain(self.unconfirmed.iter())
            .filter(|(_, action)| action.is_applied())
            .map(|(id, action)| (*id, action.params()))
    }

    /// Messages produced since the last call, in the order they must be sent.
    pub fn take_outbox(&mut self) -> Vec<Message<M>> {
        self.outbox.drain(..).collect()
    }

    pub fn has_outgoing(&self) -> bool {
        !self.outbox.is_empty()
    }

    /// Applies a new local action immediately and queues it for the sequencer.
    pub fn dispatch(&mut self, params: M) -> Result<ClientActionId, ReplicaError> {
        let id = self.generate_action_id();

        let mut action = Action::new(params);
        let clone = action.fresh_clone();
        action.apply(&mut self.state)?;

        debug!(
            "Replica {} dispatching {} ({})",
            self.client_id,
            id,
            action.params().describe()
        );

        self.unconfirmed.push_back(id, action);
        self.last_own_undoable = Some(id);
        self.outbox.push_back(Message::Action {
            id,
            action: clone.into_params(),
        });

        Ok(id)
    }

    /// Routes a message coming from the sequencer.
    pub fn receive(&mut self, message: Message<M>) -> Result<(), ReplicaError> {
        match message {
            Message::Sync { snapshot, actions } => {
                let state = serde_cbor::from_slice(&snapshot)
                    .map_err(|e| ProtocolError::MalformedSnapshot(e.to_string()))?;
                self.receive_sync(state, actions)
            }
            message if self.syncing => {
                debug!(
                    "Replica {} ignoring {:?} while syncing",
                    self.client_id,
                    message.message_type()
                );
                Ok(())
            }
            Message::Action { id, action } => self.receive_action(id, action),
            Message::ActionAck(id) => self.receive_action_ack(id),
            Message::Undo(id) => self.receive_undo(id),
            Message::UndoAck(id) => self.receive_undo_ack(id),
            other => Err(ProtocolError::UnexpectedMessage(other.message_type()).into()),
        }
    }

    fn generate_action_id(&self) -> ClientActionId {
        loop {
            let id = ClientActionId::new(self.client_id, ActionId::generate());
            if !self.confirmed.contains(&id) && !self.unconfirmed.contains(&id) {
                return id;
            }
        }
    }

    /// Nearest still-applied action of ours, walking back from the tail.
    fn recompute_last_own_undoable(&mut self) {
        let client_id = self.client_id;
        self.last_own_undoable = self
            .unconfirmed
            .iter()
            .rev()
            .chain(self.confirmed.iter().rev())
            .find(|(id, action)| action.is_applied() && id.client() == client_id)
            .map(|(id, _)| *id);
    }

    fn push_redo(&mut self, params: M) {
        self.redo_stack.push_back(params);
        while self.redo_stack.len() > self.redo_limit {
            self.redo_stack.pop_front();
        }
    }
}
