use std::collections::{HashSet, VecDeque};

use crate::{
    action::{Action, Mutation},
    error::ActionError,
    ids::ClientActionId,
};

/// Ordered list of actions keyed by id. Positions only change by removal.
#[derive(Debug)]
pub struct ActionList<M: Mutation> {
    entries: VecDeque<(ClientActionId, Action<M>)>,
    ids: HashSet<ClientActionId>,
}

impl<M: Mutation> Default for ActionList<M> {
    fn default() -> Self {
        Self {
            entries: VecDeque::new(),
            ids: HashSet::new(),
        }
    }
}

impl<M: Mutation> ActionList<M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &ClientActionId) -> bool {
        self.ids.contains(id)
    }

    /// Returns false, leaving the list untouched, if the id is already present.
    pub fn push_back(&mut self, id: ClientActionId, action: Action<M>) -> bool {
        if !self.ids.insert(id) {
            return false;
        }
        self.entries.push_back((id, action));
        true
    }

    pub fn front_id(&self) -> Option<ClientActionId> {
        self.entries.front().map(|(id, _)| *id)
    }

    pub fn pop_front(&mut self) -> Option<(ClientActionId, Action<M>)> {
        let entry = self.entries.pop_front()?;
        self.ids.remove(&entry.0);
        Some(entry)
    }

    /// Searches from the back, undo targets are usually recent.
    pub fn position(&self, id: &ClientActionId) -> Option<usize> {
        if !self.ids.contains(id) {
            return None;
        }
        self.entries.iter().rposition(|(entry, _)| entry == id)
    }

    pub fn get(&self, id: &ClientActionId) -> Option<&Action<M>> {
        let position = self.position(id)?;
        self.entries.get(position).map(|(_, action)| action)
    }

    pub fn remove(&mut self, id: &ClientActionId) -> Option<Action<M>> {
        let position = self.position(id)?;
        self.ids.remove(id);
        self.entries.remove(position).map(|(_, action)| action)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &(ClientActionId, Action<M>)> + '_ {
        self.entries.iter()
    }

    pub fn ids(&self) -> Vec<ClientActionId> {
        self.entries.iter().map(|(id, _)| *id).collect()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = (ClientActionId, Action<M>)> + '_ {
        self.ids.clear();
        self.entries.drain(..)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.ids.clear();
    }

    /// Inverts, top down, every applied entry at or above `start`.
    pub fn invert_applied_from(
        &mut self,
        start: usize,
        state: &mut M::State,
    ) -> Result<(), ActionError> {
        for (_, action) in self.entries.iter_mut().skip(start).rev() {
            if action.is_applied() {
                action.invert(state)?;
            }
        }
        Ok(())
    }

    /// Re-applies, bottom up, every fresh entry at or above `start` whose id
    /// is not in `skip`.
    pub fn reapply_from(
        &mut self,
        start: usize,
        state: &mut M::State,
        skip: &HashSet<ClientActionId>,
    ) -> Result<(), ActionError> {
        for (id, action) in self.entries.iter_mut().skip(start) {
            if !action.is_applied() && !skip.contains(id) {
                action.apply(state)?;
            }
        }
        Ok(())
    }
}
