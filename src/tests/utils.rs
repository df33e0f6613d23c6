use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use rand::{seq::SliceRandom, Rng};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver};

use crate::action::{Action, Aggregate, Mutation};
use crate::error::ActionError;
use crate::ids::{ClientActionId, ClientId};
use crate::replica::{NetworkEvent, Replica};
use crate::sequencer::{ParticipantId, Sequencer};
use crate::wire::Message;

/// Aggregate that remembers the order actions were applied in and how many
/// times each tag is currently applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub log: Vec<u32>,
    pub applied: BTreeMap<u32, u32>,
}

impl Aggregate for Tally {}

impl Tally {
    pub fn count(&self, tag: u32) -> u32 {
        self.applied.get(&tag).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record(pub u32);

impl Mutation for Record {
    type State = Tally;
    type Undo = ();

    fn redo(&self, state: &mut Tally) -> Result<(), ActionError> {
        state.log.push(self.0);
        *state.applied.entry(self.0).or_insert(0) += 1;
        Ok(())
    }

    fn undo(&self, state: &mut Tally, _: ()) -> Result<(), ActionError> {
        // Inversion is strictly LIFO, so we are always on top
        assert_eq!(state.log.pop(), Some(self.0), "out of order inversion");

        let count = state.applied.entry(self.0).or_insert(0);
        *count -= 1;
        if *count == 0 {
            state.applied.remove(&self.0);
        }
        Ok(())
    }
}

/// Replays `tags` from an empty tally.
pub fn replay(tags: &[u32]) -> Tally {
    let mut state = Tally::default();
    for tag in tags {
        Action::new(Record(*tag)).apply(&mut state).unwrap();
    }
    state
}

pub struct Link<M> {
    pub participant: ParticipantId,
    downlink: UnboundedReceiver<Message<M>>,
    uplink: VecDeque<Message<M>>,
}

/// One sequencer and N replicas exchanging messages in memory. Nothing moves
/// unless a test delivers it, so interleavings are fully controlled.
pub struct SimNetwork<M: Mutation> {
    pub sequencer: Sequencer<M>,
    pub replicas: Vec<Replica<M>>,
    links: Vec<Option<Link<M>>>,
    initial: M::State,
}

impl<M: Mutation> SimNetwork<M> {
    pub fn new(state: M::State, max_stack_size: usize, count: usize) -> Self {
        let mut network = Self {
            sequencer: Sequencer::new(state.clone(), max_stack_size),
            replicas: Vec::new(),
            links: Vec::new(),
            initial: state,
        };

        for _ in 0..count {
            network.add_replica();
        }
        network
    }

    /// Adds a connected replica and returns its index. It still has to
    /// receive its `SYNC`.
    pub fn add_replica(&mut self) -> usize {
        let index = self.replicas.len();
        self.replicas.push(Replica::with_client_id(
            ClientId(index as u64 + 1),
            self.initial.clone(),
            20,
        ));
        self.links.push(None);
        self.connect(index);
        index
    }

    pub fn connect(&mut self, index: usize) {
        assert!(self.links[index].is_none(), "replica {} already connected", index);

        let (outbox, downlink) = mpsc::unbounded_channel();
        let client = self.replicas[index].client_id();
        let participant = self.sequencer.join(outbox, client, false).unwrap();
        self.links[index] = Some(Link {
            participant,
            downlink,
            uplink: VecDeque::new(),
        });
    }

    /// Cuts the link, losing everything in flight on it in both directions.
    pub fn disconnect(&mut self, index: usize) {
        if let Some(link) = self.links[index].take() {
            self.sequencer.leave(link.participant);
        }
        self.replicas[index].take_outbox();
    }

    pub fn is_connected(&self, index: usize) -> bool {
        self.links[index].is_some()
    }

    pub fn participant(&self, index: usize) -> Option<ParticipantId> {
        self.links[index].as_ref().map(|link| link.participant)
    }

    fn collect(&mut self, index: usize) {
        let outgoing = self.replicas[index].take_outbox();
        // Offline replicas lose what they send
        if let Some(link) = &mut self.links[index] {
            link.uplink.extend(outgoing);
        }
    }

    /// Delivers the next message from replica `index` to the sequencer.
    pub fn deliver_up(&mut self, index: usize) -> bool {
        self.collect(index);

        let link = match &mut self.links[index] {
            Some(link) => link,
            None => return false,
        };
        let message = match link.uplink.pop_front() {
            Some(message) => message,
            None => return false,
        };
        let participant = link.participant;

        self.sequencer
            .handle_message(participant, message)
            .unwrap_or_else(|err| panic!("sequencer rejected replica {}: {}", index, err));
        true
    }

    /// Delivers the next message from the sequencer to replica `index`.
    pub fn deliver_down(&mut self, index: usize) -> bool {
        let message = match &mut self.links[index] {
            Some(link) => match link.downlink.try_recv() {
                Ok(message) => message,
                Err(_) => return false,
            },
            None => return false,
        };

        self.replicas[index]
            .receive(message)
            .unwrap_or_else(|err| panic!("replica {}: {}", index, err));
        self.collect(index);
        true
    }

    /// Delivers everything until the network is quiet.
    pub fn settle(&mut self) {
        loop {
            let mut progressed = false;
            for index in 0..self.replicas.len() {
                while self.deliver_up(index) {
                    progressed = true;
                }
                while self.deliver_down(index) {
                    progressed = true;
                }
            }

            if !progressed {
                break;
            }
        }
    }

    /// Delivers one message on a randomly chosen link. Returns false when
    /// nothing is in flight.
    pub fn step<R: Rng>(&mut self, rng: &mut R) -> bool {
        let mut choices: Vec<(usize, bool)> = (0..self.replicas.len())
            .flat_map(|index| [(index, true), (index, false)])
            .collect();
        choices.shuffle(rng);

        choices.into_iter().any(|(index, up)| {
            if up {
                self.deliver_up(index)
            } else {
                self.deliver_down(index)
            }
        })
    }
}

impl<M: Mutation> SimNetwork<M>
where
    M::State: PartialEq,
{
    /// Every connected replica holds the authoritative state with nothing
    /// pending.
    pub fn assert_converged(&self) {
        let expected = self.sequencer.current_state().unwrap();

        for (index, replica) in self.replicas.iter().enumerate() {
            if !self.is_connected(index) {
                continue;
            }

            assert!(
                replica.unconfirmed_ids().is_empty(),
                "replica {} still has pending actions",
                index
            );
            assert!(
                replica.unconfirmed_undos().is_empty(),
                "replica {} still has pending undos",
                index
            );
            assert_eq!(replica.state(), &expected, "replica {} diverged", index);
        }
    }
}

pub fn applied_tags(replica: &Replica<Record>) -> Vec<u32> {
    replica.applied_actions().map(|(_, action)| action.0).collect()
}

pub fn find_id(replica: &Replica<Record>, tag: u32) -> ClientActionId {
    replica
        .applied_actions()
        .find(|(_, action)| action.0 == tag)
        .map(|(id, _)| id)
        .unwrap_or_else(|| panic!("no applied action tagged {}", tag))
}

pub async fn recv_timeout<T>(receiver: &mut UnboundedReceiver<T>, dur: Duration) -> Option<T> {
    tokio::select! {
        message = receiver.recv() => message,
        _ = tokio::time::sleep(dur) => None,
    }
}

/// Skips events until one matches.
pub async fn wait_event(
    events: &mut UnboundedReceiver<NetworkEvent>,
    wanted: impl Fn(&NetworkEvent) -> bool,
) -> NetworkEvent {
    loop {
        match recv_timeout(events, Duration::from_secs(5)).await {
            Some(event) if wanted(&event) => return event,
            Some(_) => continue,
            None => panic!("expected event never came"),
        }
    }
}
