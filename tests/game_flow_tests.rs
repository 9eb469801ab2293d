//! End-to-end game flows driven through the server API.

mod test_helpers;

use std::collections::HashMap;

use quiz_arena_server::protocol::messages::{ClientFrame, ServerFrame, SkipDecision};
use quiz_arena_server::protocol::types::{
    DifficultyMode, GameMode, PeerId, Phase, SkipRequestStatus, Team,
};
use quiz_arena_server::room::now_ms;
use quiz_arena_server::room::timers::TimerKey;
use quiz_arena_server::storage::DurableStore;
use test_helpers::{create_room, harness, join, join_host, sleep_past, with_room, TestClient};

async fn team_assignments(client: &TestClient) -> HashMap<PeerId, Team> {
    with_room(client, |room| {
        room.players
            .values()
            .filter_map(|player| player.team.map(|team| (player.peer_id, team)))
            .collect()
    })
    .await
}

async fn captains(client: &TestClient) -> HashMap<Team, PeerId> {
    with_room(client, |room| {
        let mut out = HashMap::new();
        if let Some(captain) = room.captains.a {
            out.insert(Team::A, captain);
        }
        if let Some(captain) = room.captains.b {
            out.insert(Team::B, captain);
        }
        out
    })
    .await
}

async fn phase(client: &TestClient) -> Phase {
    with_room(client, |room| room.phase).await
}

#[tokio::test]
async fn classic_happy_path_scores_both_team_passes() {
    let h = harness().await;
    let (room_id, host_token) = create_room(&h, GameMode::Classic, 5, DifficultyMode::Easy).await;
    let host = join_host(&h.server, &room_id, "Ведущая", &host_token)
        .await
        .unwrap();
    let mut players = Vec::new();
    for name in ["Аня", "Борис", "Вера", "Глеб"] {
        players.push(join(&h.server, &room_id, name).await.unwrap());
    }
    with_room(&host, |room| room.rng = fastrand::Rng::with_seed(11)).await;

    host.send(&h.server, ClientFrame::StartGame).await;
    assert_eq!(phase(&host).await, Phase::TeamReveal);

    sleep_past(150).await;
    assert_eq!(phase(&host).await, Phase::CaptainVote);

    // Every player votes for a teammate: the phase must advance within the
    // final vote's handler turn.
    let teams = team_assignments(&host).await;
    for player in &players {
        let my_team = teams[&player.peer_id()];
        let teammate = players
            .iter()
            .map(TestClient::peer_id)
            .find(|peer| *peer != player.peer_id() && teams.get(peer) == Some(&my_team))
            .expect("two players per team");
        player
            .send(
                &h.server,
                ClientFrame::VoteCaptain {
                    candidate_peer_id: teammate,
                },
            )
            .await;
    }
    assert_eq!(phase(&host).await, Phase::TeamNaming);

    // Both captains belong to the team they captain.
    let elected = captains(&host).await;
    assert_eq!(teams[&elected[&Team::A]], Team::A);
    assert_eq!(teams[&elected[&Team::B]], Team::B);

    // Captains accept random names; the question opens when both are ready.
    for team in [Team::A, Team::B] {
        let captain = players
            .iter()
            .find(|player| player.peer_id() == elected[&team])
            .unwrap();
        captain.send(&h.server, ClientFrame::RandomTeamName).await;
    }
    assert_eq!(phase(&host).await, Phase::Question);
    let (index, active) =
        with_room(&host, |room| (room.current_question_index, room.active_team)).await;
    assert_eq!(index, 0);
    assert_eq!(active, Team::A);
    let team_names = with_room(&host, |room| room.team_names.clone()).await;
    assert_ne!(team_names.a, "Команда A");
    assert_ne!(team_names.b, "Команда B");

    // Team A captain answers correctly right away: 1 base + 2 speed bonus.
    let correct = with_room(&host, |room| room.questions[0].correct_index as i64).await;
    let captain_a = players
        .iter()
        .find(|player| player.peer_id() == elected[&Team::A])
        .unwrap();
    captain_a
        .send(
            &h.server,
            ClientFrame::SubmitAnswer {
                answer_index: correct,
            },
        )
        .await;

    assert_eq!(phase(&host).await, Phase::Reveal);
    let scores = with_room(&host, |room| room.scores).await;
    assert_eq!(scores.a, 3);
    assert_eq!(scores.b, 0);

    // Same question re-runs for team B.
    sleep_past(150).await;
    let (index, active) =
        with_room(&host, |room| (room.current_question_index, room.active_team)).await;
    assert_eq!(index, 0);
    assert_eq!(active, Team::B);

    let captain_b = players
        .iter()
        .find(|player| player.peer_id() == elected[&Team::B])
        .unwrap();
    captain_b
        .send(
            &h.server,
            ClientFrame::SubmitAnswer {
                answer_index: (correct + 1) % 4,
            },
        )
        .await;
    let scores = with_room(&host, |room| room.scores).await;
    assert_eq!(scores.b, 0, "wrong answer scores nothing");

    // Next question: active team swings back to A.
    sleep_past(150).await;
    let (index, active) =
        with_room(&host, |room| (room.current_question_index, room.active_team)).await;
    assert_eq!(index, 1);
    assert_eq!(active, Team::A);
}

#[tokio::test]
async fn classic_results_include_team_totals_and_captains() {
    let h = harness().await;
    let (room_id, host_token) = create_room(&h, GameMode::Classic, 5, DifficultyMode::Easy).await;
    let mut host = join_host(&h.server, &room_id, "Ведущая", &host_token)
        .await
        .unwrap();
    let mut players = Vec::new();
    for name in ["Аня", "Борис"] {
        players.push(join(&h.server, &room_id, name).await.unwrap());
    }

    host.send(&h.server, ClientFrame::StartGame).await;
    sleep_past(150).await; // team reveal
    sleep_past(200).await; // single-member fast-path captain vote
    assert_eq!(phase(&host).await, Phase::TeamNaming);

    let elected = captains(&host).await;
    for player in &players {
        player.send(&h.server, ClientFrame::RandomTeamName).await;
    }
    assert_eq!(phase(&host).await, Phase::Question);

    // Jump to the last question; both passes then end the game.
    with_room(&host, |room| room.current_question_index = 4).await;
    let correct = with_room(&host, |room| room.questions[4].correct_index as i64).await;
    for team in [Team::A, Team::B] {
        let captain = players
            .iter()
            .find(|player| player.peer_id() == elected[&team])
            .unwrap();
        captain
            .send(
                &h.server,
                ClientFrame::SubmitAnswer {
                    answer_index: correct,
                },
            )
            .await;
        sleep_past(150).await;
    }

    assert_eq!(phase(&host).await, Phase::Results);
    let state = host.last_state().expect("results state for host");
    let summary = state.results_summary.expect("results summary");
    assert!(summary.team_scores.is_some());
    let contribution = summary.captain_contribution.expect("captain stats");
    assert!(contribution.a.is_some());
    assert!(contribution.b.is_some());
    assert!(summary.host_details.is_some(), "host sees full details");

    // The completed game landed in the results log.
    let results = h.durable.game_results().await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].room_id, room_id);

    // Players get the public shape only.
    let state = players[0].last_state().expect("results state for player");
    let summary = state.results_summary.expect("public summary");
    assert!(summary.host_details.is_none());
}

#[tokio::test]
async fn ffa_host_skip_jumps_to_next_question_without_reveal() {
    let h = harness().await;
    let (room_id, host_token) = create_room(&h, GameMode::Ffa, 5, DifficultyMode::Medium).await;
    let host = join_host(&h.server, &room_id, "Ведущая", &host_token)
        .await
        .unwrap();
    let mut players = Vec::new();
    for name in ["Аня", "Борис", "Вера"] {
        players.push(join(&h.server, &room_id, name).await.unwrap());
    }

    host.send(&h.server, ClientFrame::StartGame).await;
    assert_eq!(phase(&host).await, Phase::Question);
    assert_eq!(with_room(&host, |room| room.current_question_index).await, 0);

    // One wrong answer in, two players pending, host skips.
    let correct = with_room(&host, |room| room.questions[0].correct_index as i64).await;
    players[0]
        .send(
            &h.server,
            ClientFrame::SubmitAnswer {
                answer_index: (correct + 1) % 4,
            },
        )
        .await;
    host.send(&h.server, ClientFrame::SkipQuestion).await;

    // Next state is the next question; no reveal phase, no reveal record.
    assert_eq!(phase(&host).await, Phase::Question);
    let (index, reveal) =
        with_room(&host, |room| (room.current_question_index, room.last_reveal.clone())).await;
    assert_eq!(index, 1);
    assert!(reveal.is_none());

    let skipped = with_room(&host, |room| {
        [players[1].peer_id(), players[2].peer_id()]
            .iter()
            .map(|peer| {
                room.player_stats
                    .get(peer)
                    .map(|stat| stat.skipped_answers)
                    .unwrap_or(0)
            })
            .collect::<Vec<_>>()
    })
    .await;
    assert_eq!(skipped, vec![1, 1]);
}

#[tokio::test]
async fn host_reconnect_restores_exact_remaining_time() {
    let h = harness().await;
    let (room_id, host_token) = create_room(&h, GameMode::Classic, 5, DifficultyMode::Easy).await;
    let host = join_host(&h.server, &room_id, "Ведущая", &host_token)
        .await
        .unwrap();
    let mut players = Vec::new();
    for name in ["Аня", "Борис"] {
        players.push(join(&h.server, &room_id, name).await.unwrap());
    }

    host.send(&h.server, ClientFrame::StartGame).await;
    sleep_past(150).await;
    sleep_past(200).await;
    for player in &players {
        player.send(&h.server, ClientFrame::RandomTeamName).await;
    }
    assert_eq!(phase(&host).await, Phase::Question);

    host.disconnect(&h.server).await;
    assert_eq!(phase(&players[0]).await, Phase::HostReconnect);
    let paused = with_room(&players[0], |room| room.paused_state.unwrap()).await;
    assert_eq!(paused.phase, Phase::Question);
    assert!(paused.remaining_ms > 0);

    // Same name reclaims host inside the window; the question resumes with
    // the preserved remaining time (modulo timer quantization).
    let host_again = join_host(&h.server, &room_id, "Ведущая", &host_token)
        .await
        .unwrap();
    assert_eq!(phase(&host_again).await, Phase::Question);
    let restored_remaining = with_room(&host_again, |room| {
        room.question_ends_at.unwrap().saturating_sub(now_ms())
    })
    .await;
    let drift = restored_remaining.abs_diff(paused.remaining_ms);
    assert!(
        drift <= 250,
        "remaining time drifted: paused {} vs restored {}",
        paused.remaining_ms,
        restored_remaining
    );
}

#[tokio::test]
async fn chaos_tie_break_records_random_resolution() {
    let h = harness().await;
    let (room_id, host_token) = create_room(&h, GameMode::Chaos, 5, DifficultyMode::Medium).await;
    let host = join_host(&h.server, &room_id, "Ведущая", &host_token)
        .await
        .unwrap();
    let mut players = Vec::new();
    for name in ["Аня", "Борис", "Вера", "Глеб"] {
        players.push(join(&h.server, &room_id, name).await.unwrap());
    }

    host.send(&h.server, ClientFrame::StartGame).await;
    sleep_past(150).await; // team reveal straight into naming for chaos
    assert_eq!(phase(&host).await, Phase::TeamNaming);
    let teams = team_assignments(&host).await;
    for team in [Team::A, Team::B] {
        let member = players
            .iter()
            .find(|player| teams[&player.peer_id()] == team)
            .unwrap();
        member.send(&h.server, ClientFrame::RandomTeamName).await;
    }
    assert_eq!(phase(&host).await, Phase::Question);

    // Put every player on team A and split their votes 2-2.
    with_room(&host, |room| {
        room.rng = fastrand::Rng::with_seed(99);
        let ids: Vec<PeerId> = room.players.keys().copied().collect();
        for id in ids {
            if let Some(player) = room.players.get_mut(&id) {
                if !player.is_host {
                    player.team = Some(Team::A);
                }
            }
        }
    })
    .await;

    for (index, player) in players.iter().enumerate() {
        player
            .send(
                &h.server,
                ClientFrame::SubmitAnswer {
                    answer_index: if index % 2 == 0 { 1 } else { 2 },
                },
            )
            .await;
    }

    assert_eq!(phase(&host).await, Phase::Reveal);
    let reveal = with_room(&host, |room| room.last_reveal.clone().unwrap()).await;
    let chaos = reveal.chaos_team_results.expect("chaos team results");
    assert!(chaos.a.tie_resolved_randomly);
    assert!(matches!(chaos.a.selected_index, Some(1) | Some(2)));
    assert_eq!(chaos.a.participants_count, 4);
    assert_eq!(chaos.a.answered_count, 4);
    assert_eq!(chaos.b.participants_count, 0);
    assert_eq!(chaos.b.selected_index, None);
}

#[tokio::test]
async fn moderation_three_strikes_disqualifies() {
    // Long naming window: the whole moderation exchange happens inside it.
    let mut cfg = test_helpers::fast_config();
    cfg.game.team_naming_time_ms = 10_000;
    let h = test_helpers::harness_with_config(cfg).await;
    let (room_id, host_token) = create_room(&h, GameMode::Classic, 5, DifficultyMode::Easy).await;
    let host = join_host(&h.server, &room_id, "Ведущая", &host_token)
        .await
        .unwrap();
    let mut players = Vec::new();
    for name in ["Аня", "Борис", "Вера", "Глеб"] {
        players.push(join(&h.server, &room_id, name).await.unwrap());
    }

    host.send(&h.server, ClientFrame::StartGame).await;
    sleep_past(150).await;
    sleep_past(700).await; // let the captain vote time out
    assert_eq!(phase(&host).await, Phase::TeamNaming);

    // Pick an offender who is not a captain so disqualification does not
    // collapse the naming phase.
    let elected = captains(&host).await;
    let offender_index = players
        .iter()
        .position(|player| !elected.values().any(|captain| *captain == player.peer_id()))
        .expect("a non-captain player");

    for round in 0..3 {
        players[offender_index]
            .send(
                &h.server,
                ClientFrame::SendChat {
                    text: format!("спам {round}"),
                },
            )
            .await;
        let message_id = with_room(&host, |room| {
            room.chat
                .iter()
                .rev()
                .find(|message| message.kind.is_none())
                .map(|message| message.id.clone())
                .unwrap()
        })
        .await;
        host.send(
            &h.server,
            ClientFrame::ModerateChatMessage { message_id },
        )
        .await;
    }

    let offender_id = players[offender_index].peer_id();
    let (is_spectator, strikes) = with_room(&host, |room| {
        (
            room.players[&offender_id].is_spectator,
            room.chat_moderation_strikes[&offender_id],
        )
    })
    .await;
    assert!(is_spectator);
    assert_eq!(strikes, 3);

    // The offender alone received the escalating notices.
    let notices: Vec<(u32, bool)> = players[offender_index]
        .drain()
        .into_iter()
        .filter_map(|frame| match frame {
            ServerFrame::ModerationNotice {
                strikes,
                disqualified,
                ..
            } => Some((strikes, disqualified)),
            _ => None,
        })
        .collect();
    assert_eq!(notices, vec![(1, false), (2, false), (3, true)]);
    for (index, player) in players.iter_mut().enumerate() {
        if index == offender_index {
            continue;
        }
        let foreign_notices = player
            .drain()
            .into_iter()
            .filter(|frame| matches!(frame, ServerFrame::ModerationNotice { .. }))
            .count();
        assert_eq!(foreign_notices, 0);
    }

    // A public system message announces the disqualification.
    let announced = with_room(&host, |room| {
        room.chat
            .iter()
            .any(|message| message.text.contains("дисквалифицирован"))
    })
    .await;
    assert!(announced);
}

#[tokio::test]
async fn rejected_skip_request_latches_for_the_question() {
    let h = harness().await;
    let (room_id, host_token) = create_room(&h, GameMode::Ffa, 5, DifficultyMode::Medium).await;
    let host = join_host(&h.server, &room_id, "Ведущая", &host_token)
        .await
        .unwrap();
    let first = join(&h.server, &room_id, "Аня").await.unwrap();
    let second = join(&h.server, &room_id, "Борис").await.unwrap();

    host.send(&h.server, ClientFrame::StartGame).await;
    assert_eq!(phase(&host).await, Phase::Question);

    first.send(&h.server, ClientFrame::RequestSkipQuestion).await;
    let status = with_room(&host, |room| room.skip_request_status).await;
    assert_eq!(status, SkipRequestStatus::Pending);

    host.send(
        &h.server,
        ClientFrame::ResolveSkipRequest {
            decision: SkipDecision::Reject,
        },
    )
    .await;
    let status = with_room(&host, |room| room.skip_request_status).await;
    assert_eq!(status, SkipRequestStatus::Rejected);

    // Further requests this question are no-ops.
    second.send(&h.server, ClientFrame::RequestSkipQuestion).await;
    let (status, requesters) = with_room(&host, |room| {
        (room.skip_request_status, room.skip_requesters.len())
    })
    .await;
    assert_eq!(status, SkipRequestStatus::Rejected);
    assert_eq!(requesters, 1);
}

#[tokio::test]
async fn state_versions_are_monotonic_per_connection() {
    let h = harness().await;
    let (room_id, host_token) = create_room(&h, GameMode::Ffa, 5, DifficultyMode::Medium).await;
    let mut host = join_host(&h.server, &room_id, "Ведущая", &host_token)
        .await
        .unwrap();
    let player = join(&h.server, &room_id, "Аня").await.unwrap();

    host.send(&h.server, ClientFrame::StartGame).await;
    player
        .send(&h.server, ClientFrame::SubmitAnswer { answer_index: 0 })
        .await;
    sleep_past(150).await;
    host.send(&h.server, ClientFrame::SkipQuestion).await;

    let versions: Vec<u64> = host
        .drain()
        .into_iter()
        .filter_map(|frame| match frame {
            ServerFrame::StateSync { room, .. } => Some(room.state_version),
            _ => None,
        })
        .collect();
    assert!(versions.len() >= 3);
    assert!(
        versions.windows(2).all(|pair| pair[0] <= pair[1]),
        "versions regressed: {versions:?}"
    );
}

#[tokio::test]
async fn exactly_one_phase_timer_is_armed() {
    // Default (long) timings: no timer can fire while the test asserts.
    let h = test_helpers::harness_with_config(quiz_arena_server::config::Config::default()).await;
    let (room_id, host_token) = create_room(&h, GameMode::Ffa, 5, DifficultyMode::Medium).await;
    let host = join_host(&h.server, &room_id, "Ведущая", &host_token)
        .await
        .unwrap();
    let player = join(&h.server, &room_id, "Аня").await.unwrap();

    host.send(&h.server, ClientFrame::StartGame).await;
    let (question_armed, reveal_armed, armed_total) = with_room(&host, |room| {
        (
            room.timers.is_armed(TimerKey::Question),
            room.timers.is_armed(TimerKey::Reveal),
            room.timers.armed_count(),
        )
    })
    .await;
    assert!(question_armed);
    assert!(!reveal_armed);
    assert_eq!(armed_total, 1);

    // Sole eligible player answers: the question closes and the reveal
    // timer replaces the question timer.
    player
        .send(&h.server, ClientFrame::SubmitAnswer { answer_index: 0 })
        .await;
    let (question_armed, reveal_armed) = with_room(&host, |room| {
        (
            room.timers.is_armed(TimerKey::Question),
            room.timers.is_armed(TimerKey::Reveal),
        )
    })
    .await;
    assert!(!question_armed);
    assert!(reveal_armed);
}

#[tokio::test]
async fn classic_question_chat_never_leaks_across_teams() {
    let h = harness().await;
    let (room_id, host_token) = create_room(&h, GameMode::Classic, 5, DifficultyMode::Easy).await;
    let mut host = join_host(&h.server, &room_id, "Ведущая", &host_token)
        .await
        .unwrap();
    let mut players = Vec::new();
    for name in ["Аня", "Борис", "Вера", "Глеб"] {
        players.push(join(&h.server, &room_id, name).await.unwrap());
    }

    host.send(&h.server, ClientFrame::StartGame).await;
    sleep_past(150).await;
    sleep_past(700).await; // captain vote times out
    let elected = captains(&host).await;
    for team in [Team::A, Team::B] {
        let captain = players
            .iter()
            .find(|player| player.peer_id() == elected[&team])
            .unwrap();
        captain.send(&h.server, ClientFrame::RandomTeamName).await;
    }
    assert_eq!(phase(&host).await, Phase::Question);

    let teams = team_assignments(&host).await;
    let sender = players
        .iter()
        .position(|player| teams[&player.peer_id()] == Team::A)
        .unwrap();
    players[sender]
        .send(
            &h.server,
            ClientFrame::SendChat {
                text: "ответ точно третий".to_string(),
            },
        )
        .await;

    let peer_ids: Vec<PeerId> = players.iter().map(TestClient::peer_id).collect();
    for (index, player) in players.iter_mut().enumerate() {
        let visible = player
            .last_state()
            .map(|state| {
                state
                    .chat
                    .iter()
                    .any(|message| message.text.contains("третий"))
            })
            .unwrap_or(false);
        let same_team = teams[&peer_ids[index]] == Team::A;
        assert_eq!(visible, same_team, "player {index} visibility mismatch");
    }
    let host_sees = host
        .last_state()
        .map(|state| {
            state
                .chat
                .iter()
                .any(|message| message.text.contains("третий"))
        })
        .unwrap_or(false);
    assert!(host_sees);
}

#[tokio::test]
async fn chaos_question_chat_stays_within_the_senders_team() {
    let h = harness().await;
    let (room_id, host_token) = create_room(&h, GameMode::Chaos, 5, DifficultyMode::Medium).await;
    let mut host = join_host(&h.server, &room_id, "Ведущая", &host_token)
        .await
        .unwrap();
    let mut players = Vec::new();
    for name in ["Аня", "Борис", "Вера", "Глеб"] {
        players.push(join(&h.server, &room_id, name).await.unwrap());
    }

    host.send(&h.server, ClientFrame::StartGame).await;
    sleep_past(150).await;
    assert_eq!(phase(&host).await, Phase::TeamNaming);
    let teams = team_assignments(&host).await;
    for team in [Team::A, Team::B] {
        let member = players
            .iter()
            .find(|player| teams[&player.peer_id()] == team)
            .unwrap();
        member.send(&h.server, ClientFrame::RandomTeamName).await;
    }
    assert_eq!(phase(&host).await, Phase::Question);

    let sender = players
        .iter()
        .position(|player| teams[&player.peer_id()] == Team::A)
        .unwrap();
    players[sender]
        .send(
            &h.server,
            ClientFrame::SendChat {
                text: "голосуем за второй".to_string(),
            },
        )
        .await;

    let peer_ids: Vec<PeerId> = players.iter().map(TestClient::peer_id).collect();
    for (index, player) in players.iter_mut().enumerate() {
        let visible = player
            .last_state()
            .map(|state| {
                state
                    .chat
                    .iter()
                    .any(|message| message.text.contains("второй"))
            })
            .unwrap_or(false);
        let same_team = teams[&peer_ids[index]] == Team::A;
        assert_eq!(visible, same_team, "player {index} visibility mismatch");
    }
    let host_sees = host
        .last_state()
        .map(|state| {
            state
                .chat
                .iter()
                .any(|message| message.text.contains("второй"))
        })
        .unwrap_or(false);
    assert!(host_sees);
}

#[tokio::test]
async fn room_is_evicted_when_last_connection_leaves() {
    let h = harness().await;
    let (room_id, host_token) = create_room(&h, GameMode::Classic, 5, DifficultyMode::Easy).await;
    let host = join_host(&h.server, &room_id, "Ведущая", &host_token)
        .await
        .unwrap();
    let player = join(&h.server, &room_id, "Аня").await.unwrap();
    assert_eq!(h.server.active_rooms_count().await, 1);

    player.disconnect(&h.server).await;
    host.disconnect(&h.server).await;
    assert_eq!(h.server.active_rooms_count().await, 0);

    // The durable record remains and the room loads again on demand.
    assert!(h
        .durable
        .load_room_snapshot(&room_id)
        .await
        .unwrap()
        .is_some());
    let rejoined = join(&h.server, &room_id, "Борис").await;
    assert!(rejoined.is_ok());
}
