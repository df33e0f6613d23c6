//! Actions are the unit of replication: a serializable set of construction
//! parameters plus an undo cache that only exists while the action is applied.

use std::fmt;

use serde::{de::DeserializeOwned, Serialize};

use crate::error::ActionError;

/// The replicated document. The core never looks inside it, it only moves
/// whole snapshots around in `SYNC` messages.
pub trait Aggregate: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + 'static {}

/// Construction parameters of an action, the form that goes over the wire.
///
/// `redo` must be deterministic given the parameters and the state, and `undo`
/// must restore exactly the state `redo` started from.
pub trait Mutation: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + 'static {
    type State: Aggregate;
    /// Minimal prior state required to invert the mutation.
    type Undo: fmt::Debug + Send + 'static;

    fn redo(&self, state: &mut Self::State) -> Result<Self::Undo, ActionError>;
    fn undo(&self, state: &mut Self::State, undo: Self::Undo) -> Result<(), ActionError>;

    fn describe(&self) -> String {
        format!("{:?}", self)
    }
}

/// An action moving between `Fresh` and `Applied`.
#[derive(Debug)]
pub struct Action<M: Mutation> {
    params: M,
    undo: Option<M::Undo>,
}

impl<M: Mutation> Action<M> {
    pub fn new(params: M) -> Self {
        Self { params, undo: None }
    }

    pub fn apply(&mut self, state: &mut M::State) -> Result<(), ActionError> {
        if self.undo.is_some() {
            return Err(ActionError::InvalidState { applied: true });
        }

        self.undo = Some(self.params.redo(state)?);
        Ok(())
    }

    pub fn invert(&mut self, state: &mut M::State) -> Result<(), ActionError> {
        let undo = self
            .undo
            .take()
            .ok_or(ActionError::InvalidState { applied: false })?;

        self.params.undo(state, undo)
    }

    pub fn is_applied(&self) -> bool {
        self.undo.is_some()
    }

    /// Copies the construction parameters only. This is the form that is
    /// sent, queued and pushed onto redo stacks.
    pub fn fresh_clone(&self) -> Self {
        Self::new(self.params.clone())
    }

    pub fn params(&self) -> &M {
        &self.params
    }

    pub fn into_params(self) -> M {
        self.params
    }
}

/// Child actions owned by a composite action, inverted in LIFO order so that
/// nesting never changes what `invert` restores.
#[derive(Debug)]
pub struct ChildActions<M: Mutation> {
    applied: Vec<Action<M>>,
}

impl<M: Mutation> Default for ChildActions<M> {
    fn default() -> Self {
        Self {
            applied: Vec::new(),
        }
    }
}

impl<M: Mutation> ChildActions<M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, params: M, state: &mut M::State) -> Result<(), ActionError> {
        let mut action = Action::new(params);
        action.apply(state)?;
        self.applied.push(action);
        Ok(())
    }

    pub fn invert_all(self, state: &mut M::State) -> Result<(), ActionError> {
        for mut action in self.applied.into_iter().rev() {
            action.invert(state)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::{Action, Aggregate, ChildActions, Mutation};
    use crate::error::ActionError;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Stack(Vec<i32>);

    impl Aggregate for Stack {}

    #[derive(Debug, Clone, Serialize, Deserialize)]
    enum Op {
        Push(i32),
        /// Pushes every value then doubles the top one through a child action.
        PushAll(Vec<i32>),
        DoubleTop,
    }

    impl Mutation for Op {
        type State = Stack;
        type Undo = OpUndo;

        fn redo(&self, state: &mut Stack) -> Result<OpUndo, ActionError> {
            match self {
                Op::Push(v) => {
                    state.0.push(*v);
                    Ok(OpUndo::Pop)
                }
                Op::PushAll(values) => {
                    let mut children = ChildActions::new();
                    for v in values {
                        children.apply(Op::Push(*v), state)?;
                    }
                    children.apply(Op::DoubleTop, state)?;
                    Ok(OpUndo::Children(children))
                }
                Op::DoubleTop => {
                    let previous = state.0.last().copied();
                    if let Some(top) = state.0.last_mut() {
                        *top *= 2;
                    }
                    Ok(OpUndo::Restore(previous))
                }
            }
        }

        fn undo(&self, state: &mut Stack, undo: OpUndo) -> Result<(), ActionError> {
            match undo {
                OpUndo::Pop => {
                    state.0.pop();
                }
                OpUndo::Children(children) => children.invert_all(state)?,
                OpUndo::Restore(previous) => {
                    if let (Some(top), Some(previous)) = (state.0.last_mut(), previous) {
                        *top = previous;
                    }
                }
            }
            Ok(())
        }
    }

    #[derive(Debug)]
    enum OpUndo {
        Pop,
        Children(ChildActions<Op>),
        Restore(Option<i32>),
    }

    #[test]
    fn apply_twice_is_refused() {
        let mut state = Stack::default();
        let mut action = Action::new(Op::Push(1));

        action.apply(&mut state).unwrap();
        assert_eq!(
            action.apply(&mut state),
            Err(ActionError::InvalidState { applied: true })
        );
        assert_eq!(state, Stack(vec![1]));
    }

    #[test]
    fn invert_fresh_is_refused() {
        let mut state = Stack(vec![4]);
        let mut action = Action::new(Op::Push(1));

        assert_eq!(
            action.invert(&mut state),
            Err(ActionError::InvalidState { applied: false })
        );

        action.apply(&mut state).unwrap();
        action.invert(&mut state).unwrap();
        assert_eq!(
            action.invert(&mut state),
            Err(ActionError::InvalidState { applied: false })
        );
        assert_eq!(state, Stack(vec![4]));
    }

    #[test]
    fn nested_children_invert_in_reverse() {
        let mut state = Stack(vec![7]);
        let mut action = Action::new(Op::PushAll(vec![1, 2, 3]));

        action.apply(&mut state).unwrap();
        assert_eq!(state, Stack(vec![7, 1, 2, 6]));

        action.invert(&mut state).unwrap();
        assert_eq!(state, Stack(vec![7]));

        // A second cycle rebuilds the undo cache from scratch
        action.apply(&mut state).unwrap();
        action.invert(&mut state).unwrap();
        assert_eq!(state, Stack(vec![7]));
    }

    #[test]
    fn fresh_clone_drops_undo_cache() {
        let mut state = Stack::default();
        let mut action = Action::new(Op::Push(3));
        action.apply(&mut state).unwrap();

        let clone = action.fresh_clone();
        assert!(action.is_applied());
        assert!(!clone.is_applied());
        assert!(matches!(clone.params(), Op::Push(3)));
    }
}
