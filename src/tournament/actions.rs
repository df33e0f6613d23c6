use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::{Category, CategoryId, Match, MatchId, MatchStatus, Player, PlayerId, TournamentState};
use crate::{
    action::{ChildActions, Mutation},
    error::ActionError,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TournamentAction {
    AddPlayers(Vec<(PlayerId, Player)>),
    /// Also removes the players from their categories and redraws them.
    ErasePlayers(Vec<PlayerId>),
    ChangePlayerName {
        player: PlayerId,
        first_name: String,
        last_name: String,
    },
    AddCategory {
        category: CategoryId,
        name: String,
    },
    /// Redraws the category when at least one player was added.
    AddPlayersToCategory {
        category: CategoryId,
        players: Vec<PlayerId>,
    },
    DrawCategory {
        category: CategoryId,
    },
    /// `master_time` is the owner's clock corrected to the sequencer's.
    ResumeMatch {
        match_id: MatchId,
        master_time: i64,
    },
    PauseMatch {
        match_id: MatchId,
        master_time: i64,
    },
}

#[derive(Debug)]
pub enum TournamentUndo {
    Nothing,
    RemovePlayers(Vec<PlayerId>),
    RestorePlayers {
        players: Vec<(PlayerId, Player)>,
        memberships: Vec<(CategoryId, PlayerId)>,
        redraws: ChildActions<TournamentAction>,
    },
    RestoreName {
        first_name: String,
        last_name: String,
    },
    RemoveCategory,
    RemoveFromCategory {
        added: Vec<PlayerId>,
        redraw: ChildActions<TournamentAction>,
    },
    RestoreDraw {
        previous: Vec<(MatchId, Match)>,
    },
    RestoreMatch(Match),
}

impl Mutation for TournamentAction {
    type State = TournamentState;
    type Undo = TournamentUndo;

    fn redo(&self, state: &mut TournamentState) -> Result<TournamentUndo, ActionError> {
        match self {
            TournamentAction::AddPlayers(players) => {
                let mut added = Vec::new();
                for (id, player) in players {
                    if !state.players.contains_key(id) {
                        state.players.insert(*id, player.clone());
                        added.push(*id);
                    }
                }
                Ok(TournamentUndo::RemovePlayers(added))
            }
            TournamentAction::ErasePlayers(ids) => erase_players(state, ids),
            TournamentAction::ChangePlayerName {
                player,
                first_name,
                last_name,
            } => match state.players.get_mut(player) {
                Some(player) => {
                    let undo = TournamentUndo::RestoreName {
                        first_name: std::mem::replace(&mut player.first_name, first_name.clone()),
                        last_name: std::mem::replace(&mut player.last_name, last_name.clone()),
                    };
                    Ok(undo)
                }
                None => Ok(TournamentUndo::Nothing),
            },
            TournamentAction::AddCategory { category, name } => {
                if state.categories.contains_key(category) {
                    return Ok(TournamentUndo::Nothing);
                }
                state.categories.insert(
                    *category,
                    Category {
                        name: name.clone(),
                        players: BTreeSet::new(),
                        matches: Vec::new(),
                    },
                );
                Ok(TournamentUndo::RemoveCategory)
            }
            TournamentAction::AddPlayersToCategory { category, players } => {
                let known: Vec<PlayerId> = players
                    .iter()
                    .filter(|id| state.players.contains_key(*id))
                    .copied()
                    .collect();

                let added = match state.categories.get_mut(category) {
                    Some(entry) => known
                        .into_iter()
                        .filter(|id| entry.players.insert(*id))
                        .collect::<Vec<_>>(),
                    None => return Ok(TournamentUndo::Nothing),
                };

                let mut redraw = ChildActions::new();
                if !added.is_empty() {
                    redraw.apply(
                        TournamentAction::DrawCategory {
                            category: *category,
                        },
                        state,
                    )?;
                }
                Ok(TournamentUndo::RemoveFromCategory { added, redraw })
            }
            TournamentAction::DrawCategory { category } => draw_category(state, *category),
            TournamentAction::ResumeMatch {
                match_id,
                master_time,
            } => match state.matches.get_mut(match_id) {
                Some(entry) if entry.status != MatchStatus::Running => {
                    let previous = entry.clone();
                    entry.status = MatchStatus::Running;
                    entry.resumed_at = Some(*master_time);
                    Ok(TournamentUndo::RestoreMatch(previous))
                }
                _ => Ok(TournamentUndo::Nothing),
            },
            TournamentAction::PauseMatch {
                match_id,
                master_time,
            } => match state.matches.get_mut(match_id) {
                Some(entry) if entry.status == MatchStatus::Running => {
                    let previous = entry.clone();
                    entry.clock_millis = entry.elapsed_millis(*master_time);
                    entry.status = MatchStatus::Paused;
                    entry.resumed_at = None;
                    Ok(TournamentUndo::RestoreMatch(previous))
                }
                _ => Ok(TournamentUndo::Nothing),
            },
        }
    }

    fn undo(&self, state: &mut TournamentState, undo: TournamentUndo) -> Result<(), ActionError> {
        match undo {
            TournamentUndo::Nothing => {}
            TournamentUndo::RemovePlayers(added) => {
                for id in added {
                    state.players.remove(&id);
                }
            }
            TournamentUndo::RestorePlayers {
                players,
                memberships,
                redraws,
            } => {
                state.players.extend(players);
                redraws.invert_all(state)?;
                for (category, player) in memberships {
                    if let Some(entry) = state.categories.get_mut(&category) {
                        entry.players.insert(player);
                    }
                }
            }
            TournamentUndo::RestoreName {
                first_name,
                last_name,
            } => {
                if let TournamentAction::ChangePlayerName { player, .. } = self {
                    if let Some(entry) = state.players.get_mut(player) {
                        entry.first_name = first_name;
                        entry.last_name = last_name;
                    }
                }
            }
            TournamentUndo::RemoveCategory => {
                if let TournamentAction::AddCategory { category, .. } = self {
                    state.categories.remove(category);
                }
            }
            TournamentUndo::RemoveFromCategory { added, redraw } => {
                redraw.invert_all(state)?;
                if let TournamentAction::AddPlayersToCategory { category, .. } = self {
                    if let Some(entry) = state.categories.get_mut(category) {
                        for id in added {
                            entry.players.remove(&id);
                        }
                    }
                }
            }
            TournamentUndo::RestoreDraw { previous } => {
                if let TournamentAction::DrawCategory { category } = self {
                    if let Some(entry) = state.categories.get_mut(category) {
                        for id in entry.matches.drain(..) {
                            state.matches.remove(&id);
                        }
                        entry.matches = previous.iter().map(|(id, _)| *id).collect();
                    }
                    state.matches.extend(previous);
                }
            }
            TournamentUndo::RestoreMatch(previous) => match self {
                TournamentAction::ResumeMatch { match_id, .. }
                | TournamentAction::PauseMatch { match_id, .. } => {
                    state.matches.insert(*match_id, previous);
                }
                _ => {}
            },
        }
        Ok(())
    }

    fn describe(&self) -> String {
        match self {
            TournamentAction::AddPlayers(players) => format!("Add {} players", players.len()),
            TournamentAction::ErasePlayers(players) => format!("Erase {} players", players.len()),
            TournamentAction::ChangePlayerName { .. } => "Change player name".to_string(),
            TournamentAction::AddCategory { name, .. } => format!("Add category {}", name),
            TournamentAction::AddPlayersToCategory { players, .. } => {
                format!("Add {} players to category", players.len())
            }
            TournamentAction::DrawCategory { .. } => "Draw category".to_string(),
            TournamentAction::ResumeMatch { .. } => "Resume match".to_string(),
            TournamentAction::PauseMatch { .. } => "Pause match".to_string(),
        }
    }
}

fn erase_players(
    state: &mut TournamentState,
    ids: &[PlayerId],
) -> Result<TournamentUndo, ActionError> {
    let erased: BTreeSet<PlayerId> = ids
        .iter()
        .filter(|id| state.players.contains_key(*id))
        .copied()
        .collect();

    let mut memberships = Vec::new();
    let mut affected = Vec::new();
    for (category_id, category) in state.categories.iter_mut() {
        let before = memberships.len();
        for id in &erased {
            if category.players.remove(id) {
                memberships.push((*category_id, *id));
            }
        }
        if memberships.len() > before {
            affected.push(*category_id);
        }
    }

    let mut redraws = ChildActions::new();
    for category in affected {
        redraws.apply(TournamentAction::DrawCategory { category }, state)?;
    }

    let players = erased
        .iter()
        .filter_map(|id| state.players.remove(id).map(|player| (*id, player)))
        .collect();

    Ok(TournamentUndo::RestorePlayers {
        players,
        memberships,
        redraws,
    })
}

/// Every player meets every other player of the category once.
fn draw_category(
    state: &mut TournamentState,
    category: CategoryId,
) -> Result<TournamentUndo, ActionError> {
    let entry = match state.categories.get_mut(&category) {
        Some(entry) => entry,
        None => return Ok(TournamentUndo::Nothing),
    };

    let previous = entry
        .matches
        .drain(..)
        .filter_map(|id| state.matches.remove(&id).map(|m| (id, m)))
        .collect();

    let players: Vec<PlayerId> = entry.players.iter().copied().collect();
    let mut index = 0;
    for (i, white) in players.iter().enumerate() {
        for blue in &players[i + 1..] {
            let id = MatchId { category, index };
            state.matches.insert(id, Match::new(*white, *blue));
            entry.matches.push(id);
            index += 1;
        }
    }

    Ok(TournamentUndo::RestoreDraw { previous })
}

#[cfg(test)]
mod tests {
    use super::TournamentAction;
    use crate::{
        action::Action,
        tournament::{CategoryId, MatchId, MatchStatus, Player, PlayerId, TournamentState},
    };

    const JUNIORS: CategoryId = CategoryId(1);

    fn seeded() -> TournamentState {
        let mut state = TournamentState::new("Open");
        for (id, action) in [
            TournamentAction::AddPlayers(vec![
                (PlayerId(1), Player::new("Ana", "Lima")),
                (PlayerId(2), Player::new("Ben", "Okafor")),
                (PlayerId(3), Player::new("Chi", "Watanabe")),
            ]),
            TournamentAction::AddCategory {
                category: JUNIORS,
                name: "Juniors -60".to_string(),
            },
            TournamentAction::AddPlayersToCategory {
                category: JUNIORS,
                players: vec![PlayerId(1), PlayerId(2)],
            },
            TournamentAction::ResumeMatch {
                match_id: MatchId {
                    category: JUNIORS,
                    index: 0,
                },
                master_time: 1_000,
            },
        ]
        .into_iter()
        .enumerate()
        {
            Action::new(action)
                .apply(&mut state)
                .unwrap_or_else(|e| panic!("seed step {} failed: {}", id, e));
        }
        state
    }

    fn assert_round_trip(action: TournamentAction) {
        let original = seeded();
        let mut state = original.clone();
        let mut action = Action::new(action);

        action.apply(&mut state).unwrap();
        action.invert(&mut state).unwrap();
        assert_eq!(state, original, "{:?} did not invert cleanly", action);
    }

    #[test]
    fn every_action_inverts() {
        let first_match = MatchId {
            category: JUNIORS,
            index: 0,
        };

        assert_round_trip(TournamentAction::AddPlayers(vec![
            (PlayerId(4), Player::new("Dan", "Moreau")),
            // Already present, must survive the undo
            (PlayerId(1), Player::new("Other", "Person")),
        ]));
        assert_round_trip(TournamentAction::ErasePlayers(vec![PlayerId(1), PlayerId(9)]));
        assert_round_trip(TournamentAction::ChangePlayerName {
            player: PlayerId(2),
            first_name: "Benjamin".to_string(),
            last_name: "Okafor".to_string(),
        });
        assert_round_trip(TournamentAction::AddCategory {
            category: CategoryId(2),
            name: "Seniors".to_string(),
        });
        assert_round_trip(TournamentAction::AddPlayersToCategory {
            category: JUNIORS,
            players: vec![PlayerId(3), PlayerId(1)],
        });
        assert_round_trip(TournamentAction::DrawCategory { category: JUNIORS });
        assert_round_trip(TournamentAction::PauseMatch {
            match_id: first_match,
            master_time: 4_000,
        });
        assert_round_trip(TournamentAction::ResumeMatch {
            match_id: first_match,
            master_time: 4_000,
        });
    }

    #[test]
    fn adding_players_redraws_the_category() {
        let mut state = seeded();
        assert_eq!(state.category_matches(&JUNIORS).len(), 1);

        Action::new(TournamentAction::AddPlayersToCategory {
            category: JUNIORS,
            players: vec![PlayerId(3)],
        })
        .apply(&mut state)
        .unwrap();

        assert_eq!(state.category_matches(&JUNIORS).len(), 3);
    }

    #[test]
    fn erasing_a_player_shrinks_the_draw() {
        let mut state = seeded();
        let mut erase = Action::new(TournamentAction::ErasePlayers(vec![PlayerId(2)]));

        erase.apply(&mut state).unwrap();
        assert!(state.player(&PlayerId(2)).is_none());
        assert!(state.category_matches(&JUNIORS).is_empty());

        erase.invert(&mut state).unwrap();
        assert_eq!(state, seeded());
    }

    #[test]
    fn pause_accumulates_master_time() {
        let mut state = seeded();
        let match_id = MatchId {
            category: JUNIORS,
            index: 0,
        };

        Action::new(TournamentAction::PauseMatch {
            match_id,
            master_time: 31_000,
        })
        .apply(&mut state)
        .unwrap();

        let paused = &state.matches[&match_id];
        assert_eq!(paused.status, MatchStatus::Paused);
        assert_eq!(paused.clock_millis, 30_000);
        assert_eq!(paused.elapsed_millis(99_000), 30_000);
    }
}
