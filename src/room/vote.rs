//! Captain election bookkeeping and team-name selection.
//!
//! These are the pure parts of the captain-vote and team-naming subflows;
//! phase transitions and timers live in [`crate::room::phases`].

use crate::catalog::TEAM_NAME_POOL;
use crate::protocol::types::{PeerId, Phase, Team};
use crate::protocol::validation::normalize_team_name;
use crate::room::state::RoomState;

/// Total ballots cast within one team.
pub fn team_votes_count(room: &RoomState, team: Team) -> u32 {
    room.captain_votes.get(team).values().sum()
}

/// A team is vote-ready when it is empty or every current member has voted.
pub fn is_captain_vote_ready_for_team(room: &RoomState, team: Team) -> bool {
    let members = room.team_players(team).len();
    if members == 0 {
        return true;
    }
    team_votes_count(room, team) as usize >= members
}

/// Resolve a team's captain from the tally: uniform random over the
/// max-vote candidates still on the team; a team with no ballots gets a
/// random member.
pub fn choose_captain_by_votes(room: &mut RoomState, team: Team) -> Option<PeerId> {
    let members: Vec<PeerId> = room
        .team_players(team)
        .into_iter()
        .map(|player| player.peer_id)
        .collect();
    if members.is_empty() {
        return None;
    }

    let votes = room.captain_votes.get(team);
    if votes.is_empty() {
        return room.pick_random(&members);
    }

    let max_votes = votes.values().copied().max().unwrap_or(0);
    let leaders: Vec<PeerId> = votes
        .iter()
        .filter(|(candidate, count)| **count == max_votes && members.contains(candidate))
        .map(|(candidate, _)| *candidate)
        .collect();

    if leaders.is_empty() {
        return room.pick_random(&members);
    }
    room.pick_random(&leaders)
}

/// Recompute readiness for both teams; a team that becomes ready gets its
/// captain resolved immediately (never overwriting an already-set captain),
/// a team that loses readiness loses its captain again.
pub fn refresh_captain_vote_progress(room: &mut RoomState) {
    for team in Team::ALL {
        let ready = is_captain_vote_ready_for_team(room, team);
        room.captain_vote_ready_teams.set(team, ready);

        if ready {
            if room.captains.get(team).is_none() {
                let chosen = choose_captain_by_votes(room, team);
                room.captains.set(team, chosen);
            }
        } else {
            room.captains.set(team, None);
        }
    }
    room.apply_captain_flags();
}

/// Remove a leaving player's ballot, their tally entry, and any ballots
/// cast for them.
pub fn cleanup_votes_for_player(room: &mut RoomState, peer_id: PeerId) {
    for team in Team::ALL {
        let previous_candidate = room.captain_ballots.get(team).get(&peer_id).copied();
        if let Some(candidate) = previous_candidate {
            let votes = room.captain_votes.get_mut(team);
            if let Some(count) = votes.get_mut(&candidate) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    votes.remove(&candidate);
                }
            }
        }

        room.captain_ballots.get_mut(team).remove(&peer_id);
        room.captain_votes.get_mut(team).remove(&peer_id);
        room.captain_ballots
            .get_mut(team)
            .retain(|_, candidate| *candidate != peer_id);
    }
}

/// Seed team-naming readiness: empty teams are auto-ready, and in classic a
/// team without a captain has nobody who could name it.
pub fn initialize_team_naming_progress(room: &mut RoomState) {
    let classic = room.game_mode == crate::protocol::types::GameMode::Classic;
    for team in Team::ALL {
        let ready = if room.team_players(team).is_empty() {
            true
        } else if classic {
            room.captains.get(team).is_none()
        } else {
            false
        };
        room.team_naming_ready_teams.set(team, ready);
    }
}

/// Appoint a random remaining teammate when the captain slot is empty.
pub fn reassign_captain_if_needed(room: &mut RoomState, team: Team) {
    if room.captains.get(team).is_some() {
        return;
    }
    let members: Vec<PeerId> = room
        .team_players(team)
        .into_iter()
        .map(|player| player.peer_id)
        .collect();
    let chosen = room.pick_random(&members);
    room.captains.set(team, chosen);
    room.apply_captain_flags();
}

/// Draw an unused name from the pool, marking it used; falls back to the
/// default when the pool is exhausted.
pub fn get_random_unique_team_name(room: &mut RoomState, fallback: &str) -> String {
    let available: Vec<&'static str> = TEAM_NAME_POOL
        .iter()
        .copied()
        .filter(|name| !room.used_team_names.contains(&normalize_team_name(name)))
        .collect();

    match room.pick_random(&available) {
        Some(selected) => {
            room.used_team_names.insert(normalize_team_name(selected));
            selected.to_string()
        }
        None => fallback.to_string(),
    }
}

/// Whether every non-empty team has exactly one member (auto-captain
/// fast path at vote start).
pub fn all_non_empty_teams_single_member(room: &RoomState) -> bool {
    let mut any = false;
    for team in Team::ALL {
        let members = room.team_players(team).len();
        if members > 1 {
            return false;
        }
        if members == 1 {
            any = true;
        }
    }
    any
}

/// Teams that currently need the 3-second auto-captain shortcut: exactly one
/// member and not yet ready.
pub fn single_member_pending_teams(room: &RoomState) -> Vec<Team> {
    if room.phase != Phase::CaptainVote {
        return Vec::new();
    }
    Team::ALL
        .into_iter()
        .filter(|&team| {
            room.team_players(team).len() == 1 && !*room.captain_vote_ready_teams.get(team)
        })
        .collect()
}

/// Auto-appoint the sole member of each still-pending single-member team.
pub fn apply_auto_captains(room: &mut RoomState) {
    for team in Team::ALL {
        if *room.captain_vote_ready_teams.get(team) {
            continue;
        }
        let members = room.team_players(team);
        if members.len() != 1 {
            continue;
        }
        let sole = members[0].peer_id;
        room.captains.set(team, Some(sole));
        room.captain_vote_ready_teams.set(team, true);
    }
    room.apply_captain_flags();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::test_support::{add_player, blank_room};
    use crate::protocol::types::GameMode;
    use std::collections::HashMap;

    #[test]
    fn empty_team_is_vote_ready() {
        let room = blank_room(GameMode::Classic);
        assert!(is_captain_vote_ready_for_team(&room, Team::A));
    }

    #[test]
    fn team_ready_once_all_members_voted() {
        let mut room = blank_room(GameMode::Classic);
        let first = add_player(&mut room, "a1", Some(Team::A));
        let second = add_player(&mut room, "a2", Some(Team::A));
        assert!(!is_captain_vote_ready_for_team(&room, Team::A));

        room.captain_ballots.get_mut(Team::A).insert(first, second);
        room.captain_votes.get_mut(Team::A).insert(second, 1);
        assert!(!is_captain_vote_ready_for_team(&room, Team::A));

        room.captain_ballots.get_mut(Team::A).insert(second, first);
        room.captain_votes.get_mut(Team::A).insert(first, 1);
        assert!(is_captain_vote_ready_for_team(&room, Team::A));
    }

    #[test]
    fn captain_resolution_prefers_max_votes() {
        let mut room = blank_room(GameMode::Classic);
        let favorite = add_player(&mut room, "a1", Some(Team::A));
        let other = add_player(&mut room, "a2", Some(Team::A));
        add_player(&mut room, "a3", Some(Team::A));
        room.captain_votes
            .get_mut(Team::A)
            .extend([(favorite, 2), (other, 1)]);

        for _ in 0..20 {
            assert_eq!(choose_captain_by_votes(&mut room, Team::A), Some(favorite));
        }
    }

    #[test]
    fn tie_break_is_roughly_uniform_with_seeded_rng() {
        let mut room = blank_room(GameMode::Classic);
        let first = add_player(&mut room, "a1", Some(Team::A));
        let second = add_player(&mut room, "a2", Some(Team::A));
        room.captain_votes
            .get_mut(Team::A)
            .extend([(first, 1), (second, 1)]);

        let mut tally: HashMap<PeerId, usize> = HashMap::new();
        for _ in 0..400 {
            let chosen = choose_captain_by_votes(&mut room, Team::A).unwrap();
            *tally.entry(chosen).or_default() += 1;
        }
        let first_share = tally.get(&first).copied().unwrap_or(0);
        assert!(
            (120..=280).contains(&first_share),
            "tie-break skewed: {first_share}/400"
        );
    }

    #[test]
    fn departed_candidates_are_excluded() {
        let mut room = blank_room(GameMode::Classic);
        let stayer = add_player(&mut room, "a1", Some(Team::A));
        let departed = uuid::Uuid::new_v4();
        room.captain_votes
            .get_mut(Team::A)
            .extend([(departed, 5), (stayer, 1)]);
        assert_eq!(choose_captain_by_votes(&mut room, Team::A), Some(stayer));
    }

    #[test]
    fn vote_cleanup_removes_ballots_both_ways() {
        let mut room = blank_room(GameMode::Classic);
        let leaver = add_player(&mut room, "a1", Some(Team::A));
        let stayer = add_player(&mut room, "a2", Some(Team::A));

        // leaver voted for stayer; stayer voted for leaver
        room.captain_ballots.get_mut(Team::A).insert(leaver, stayer);
        room.captain_votes.get_mut(Team::A).insert(stayer, 1);
        room.captain_ballots.get_mut(Team::A).insert(stayer, leaver);
        room.captain_votes.get_mut(Team::A).insert(leaver, 1);

        cleanup_votes_for_player(&mut room, leaver);
        assert!(room.captain_votes.get(Team::A).is_empty());
        assert!(room.captain_ballots.get(Team::A).is_empty());
    }

    #[test]
    fn random_team_names_never_repeat() {
        let mut room = blank_room(GameMode::Classic);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..TEAM_NAME_POOL.len() {
            let name = get_random_unique_team_name(&mut room, "Команда A");
            assert!(seen.insert(name));
        }
        // Pool exhausted: falls back.
        assert_eq!(
            get_random_unique_team_name(&mut room, "Команда A"),
            "Команда A"
        );
    }

    #[test]
    fn auto_captain_applies_to_single_member_teams_only() {
        let mut room = blank_room(GameMode::Classic);
        room.phase = Phase::CaptainVote;
        let solo = add_player(&mut room, "solo", Some(Team::A));
        add_player(&mut room, "b1", Some(Team::B));
        add_player(&mut room, "b2", Some(Team::B));

        assert_eq!(single_member_pending_teams(&room), vec![Team::A]);
        apply_auto_captains(&mut room);
        assert_eq!(*room.captains.get(Team::A), Some(solo));
        assert!(*room.captain_vote_ready_teams.get(Team::A));
        assert!(!*room.captain_vote_ready_teams.get(Team::B));
        assert_eq!(*room.captains.get(Team::B), None);
    }
}
