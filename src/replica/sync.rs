use std::collections::HashSet;

use log::{debug, info};

use super::Replica;
use crate::{
    action::{Action, Mutation},
    action_list::ActionList,
    error::{ProtocolError, ReplicaError},
    ids::ClientActionId,
    wire::Message,
};

/// Full resynchronisation.
impl<M: Mutation> Replica<M> {
    /// Owner-side reset: adopt `state` as the new baseline for everyone. Only
    /// honoured by the sequencer when it comes from the master replica.
    pub fn sync(&mut self, state: M::State) -> Result<(), ReplicaError> {
        let snapshot =
            serde_cbor::to_vec(&state).map_err(|e| ReplicaError::Snapshot(e.to_string()))?;

        info!("Replica {} resetting to a new snapshot", self.client_id);

        self.state = state;
        self.confirmed.clear();
        self.unconfirmed.clear();
        self.unconfirmed_undos.clear();
        self.redo_stack.clear();
        self.last_own_undoable = None;
        self.syncing = true;

        self.outbox.clear();
        self.outbox.push_back(Message::Sync {
            snapshot,
            actions: Vec::new(),
        });

        Ok(())
    }

    /// Rebuilds everything from a sequencer snapshot, keeping whatever local
    /// work the sequencer has not seen yet and queueing it again.
    ///
    /// Nothing is modified if the rebuild fails.
    pub fn receive_sync(
        &mut self,
        snapshot: M::State,
        actions: Vec<(ClientActionId, M)>,
    ) -> Result<(), ReplicaError> {
        let mut state = snapshot;
        let mut confirmed = ActionList::new();
        let mut unconfirmed = ActionList::new();
        let mut unconfirmed_undos = HashSet::new();

        for (id, params) in actions {
            let mut action = Action::new(params);

            if self.unconfirmed_undos.contains(&id) {
                unconfirmed_undos.insert(id);
            } else {
                action.apply(&mut state)?;
            }

            if !confirmed.push_back(id, action) {
                return Err(ProtocolError::DuplicateAction(id).into());
            }
        }

        let mut resend = Vec::new();
        for (id, action) in self.unconfirmed.iter() {
            if confirmed.contains(id) || self.unconfirmed_undos.contains(id) {
                continue;
            }

            let mut fresh = action.fresh_clone();
            fresh.apply(&mut state)?;
            resend.push(Message::Action {
                id: *id,
                action: action.params().clone(),
            });
            unconfirmed.push_back(*id, fresh);
        }

        debug!(
            "Replica {} synced: {} confirmed, {} resent, {} pending undos",
            self.client_id,
            confirmed.len(),
            unconfirmed.len(),
            unconfirmed_undos.len()
        );

        let undos: Vec<ClientActionId> = confirmed
            .iter()
            .map(|(id, _)| *id)
            .filter(|id| unconfirmed_undos.contains(id))
            .collect();

        self.state = state;
        self.confirmed = confirmed;
        self.unconfirmed = unconfirmed;
        self.unconfirmed_undos = unconfirmed_undos;
        self.syncing = false;
        self.recompute_last_own_undoable();

        self.outbox.clear();
        self.outbox.push_back(Message::SyncAck);
        self.outbox.extend(resend);
        self.outbox.extend(undos.into_iter().map(Message::Undo));

        Ok(())
    }
}
