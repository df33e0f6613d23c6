//! A small tournament document used by the binary and the tests. Replication
//! only ever sees it through `Aggregate` and `TournamentAction`.

mod actions;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::action::Aggregate;

pub use actions::{TournamentAction, TournamentUndo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(pub u64);

impl PlayerId {
    pub fn generate() -> Self {
        Self(rand::random())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CategoryId(pub u64);

impl CategoryId {
    pub fn generate() -> Self {
        Self(rand::random())
    }
}

/// Matches are numbered within their category, so a redraw is deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MatchId {
    pub category: CategoryId,
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub first_name: String,
    pub last_name: String,
    pub club: Option<String>,
}

impl Player {
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
            club: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    pub players: BTreeSet<PlayerId>,
    pub matches: Vec<MatchId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchStatus {
    NotStarted,
    Running,
    Paused,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub white: PlayerId,
    pub blue: PlayerId,
    pub status: MatchStatus,
    /// Elapsed match time accumulated up to the last pause.
    pub clock_millis: i64,
    /// Master-clock time of the last resume while running.
    pub resumed_at: Option<i64>,
}

impl Match {
    pub fn new(white: PlayerId, blue: PlayerId) -> Self {
        Self {
            white,
            blue,
            status: MatchStatus::NotStarted,
            clock_millis: 0,
            resumed_at: None,
        }
    }

    /// Elapsed match time at master-clock time `now_millis`.
    pub fn elapsed_millis(&self, now_millis: i64) -> i64 {
        match (self.status, self.resumed_at) {
            (MatchStatus::Running, Some(resumed_at)) => {
                self.clock_millis + (now_millis - resumed_at).max(0)
            }
            _ => self.clock_millis,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TournamentState {
    pub name: String,
    pub players: BTreeMap<PlayerId, Player>,
    pub categories: BTreeMap<CategoryId, Category>,
    pub matches: BTreeMap<MatchId, Match>,
}

impl Aggregate for TournamentState {}

impl TournamentState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn player(&self, id: &PlayerId) -> Option<&Player> {
        self.players.get(id)
    }

    pub fn category(&self, id: &CategoryId) -> Option<&Category> {
        self.categories.get(id)
    }

    pub fn category_matches(&self, id: &CategoryId) -> Vec<&Match> {
        self.categories
            .get(id)
            .map(|category| {
                category
                    .matches
                    .iter()
                    .filter_map(|match_id| self.matches.get(match_id))
                    .collect()
            })
            .unwrap_or_default()
    }
}
