use log::{debug, warn};

use super::Replica;
use crate::{
    action::{Action, Mutation},
    error::{ProtocolError, ReplicaError},
    ids::ClientActionId,
    wire::{Message, MessageType},
};

/// Reconciliation of the speculative tail against sequenced traffic.
impl<M: Mutation> Replica<M> {
    /// An action sequenced for another participant. Our pending actions are
    /// rebased on top of it.
    pub fn receive_action(&mut self, id: ClientActionId, params: M) -> Result<(), ReplicaError> {
        if self.confirmed.contains(&id) || self.unconfirmed.contains(&id) {
            return Err(ProtocolError::DuplicateAction(id).into());
        }

        debug!("Replica {} received action {}", self.client_id, id);

        self.unconfirmed.invert_applied_from(0, &mut self.state)?;

        let mut action = Action::new(params);
        action.apply(&mut self.state)?;
        self.confirmed.push_back(id, action);

        self.unconfirmed
            .reapply_from(0, &mut self.state, &self.unconfirmed_undos)?;

        Ok(())
    }

    /// Acknowledgements arrive in dispatch order, so `id` must be our oldest
    /// pending action.
    pub fn receive_action_ack(&mut self, id: ClientActionId) -> Result<(), ReplicaError> {
        let expected = self.unconfirmed.front_id();
        if expected != Some(id) {
            return Err(ProtocolError::UnexpectedAck { expected, got: id }.into());
        }

        debug!("Replica {} received action ack {}", self.client_id, id);

        if let Some((id, action)) = self.unconfirmed.pop_front() {
            self.confirmed.push_back(id, action);
        }

        Ok(())
    }

    /// Undoes our most recent still-applied action, if any.
    pub fn undo(&mut self) -> Result<Option<ClientActionId>, ReplicaError> {
        match self.last_own_undoable {
            Some(id) => self.undo_action(id).map(|_| Some(id)),
            None => Ok(None),
        }
    }

    /// Undoes any applied action, local or remote, confirmed or not.
    pub fn undo_action(&mut self, id: ClientActionId) -> Result<(), ReplicaError> {
        let target = self
            .unconfirmed
            .get(&id)
            .or_else(|| self.confirmed.get(&id))
            .ok_or(ReplicaError::UnknownAction(id))?;

        if !target.is_applied() || self.unconfirmed_undos.contains(&id) {
            return Err(ReplicaError::AlreadyUndone(id));
        }
        let redo = target.params().clone();

        debug!("Replica {} undoing {}", self.client_id, id);
        self.unconfirmed_undos.insert(id);

        match self.unconfirmed.position(&id) {
            Some(position) => {
                self.unconfirmed
                    .invert_applied_from(position, &mut self.state)?;
            }
            None => {
                let position = self
                    .confirmed
                    .position(&id)
                    .ok_or(ReplicaError::UnknownAction(id))?;

                self.unconfirmed.invert_applied_from(0, &mut self.state)?;
                self.confirmed
                    .invert_applied_from(position, &mut self.state)?;
                self.confirmed
                    .reapply_from(position + 1, &mut self.state, &self.unconfirmed_undos)?;
            }
        }

        self.unconfirmed
            .reapply_from(0, &mut self.state, &self.unconfirmed_undos)?;

        self.recompute_last_own_undoable();
        self.push_redo(redo);
        self.outbox.push_back(Message::Undo(id));

        Ok(())
    }

    /// An undo sequenced by the server. The target is always confirmed.
    pub fn receive_undo(&mut self, id: ClientActionId) -> Result<(), ReplicaError> {
        let position = self
            .confirmed
            .position(&id)
            .ok_or(ProtocolError::UnknownConfirmedAction(id))?;

        let already_undone = self
            .confirmed
            .get(&id)
            .map(|action| !action.is_applied())
            .unwrap_or(false);

        // A fresh target is only legal if we raced the same undo ourselves.
        if already_undone && !self.unconfirmed_undos.contains(&id) {
            return Err(ReplicaError::AlreadyUndone(id));
        }

        debug!(
            "Replica {} received undo {} (locally undone: {})",
            self.client_id, id, already_undone
        );

        self.unconfirmed.invert_applied_from(0, &mut self.state)?;
        self.confirmed
            .invert_applied_from(position, &mut self.state)?;

        if already_undone {
            self.unconfirmed_undos.remove(&id);
        }
        self.confirmed.remove(&id);

        self.confirmed
            .reapply_from(position, &mut self.state, &self.unconfirmed_undos)?;
        self.unconfirmed
            .reapply_from(0, &mut self.state, &self.unconfirmed_undos)?;

        self.recompute_last_own_undoable();

        Ok(())
    }

    pub fn receive_undo_ack(&mut self, id: ClientActionId) -> Result<(), ReplicaError> {
        if self.confirmed.get(&id).map(Action::is_applied) == Some(true) {
            return Err(ProtocolError::UnexpectedMessage(MessageType::UndoAck).into());
        }

        debug!("Replica {} received undo ack {}", self.client_id, id);

        self.unconfirmed_undos.remove(&id);

        // Already gone if a racing UNDO for the same id was sequenced first
        if self.confirmed.remove(&id).is_none() && self.unconfirmed.contains(&id) {
            warn!(
                "Replica {} received undo ack for unacknowledged action {}",
                self.client_id, id
            );
        }

        Ok(())
    }

    /// Dispatches the most recently undone action again, under a new id.
    pub fn redo(&mut self) -> Result<Option<ClientActionId>, ReplicaError> {
        match self.redo_stack.pop_back() {
            Some(params) => {
                debug!("Replica {} redoing action", self.client_id);
                self.dispatch(params).map(Some)
            }
            None => Ok(None),
        }
    }
}
