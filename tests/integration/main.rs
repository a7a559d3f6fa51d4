use std::sync::Arc;

use tokio::time::Duration;

use quizmaster::command::{ClientCommand, JoinPlayer};
use quizmaster::config::Config;
use quizmaster::event::{AnswerReceived, ServerEvent};
use quizmaster::game::state::{
    GameMode, Question, QuestionKind, QuestionMetadata, ToleranceKind,
};
use quizmaster::game::SessionEngine;
use quizmaster::platform::Platform;
use quizmaster::services::{
    EventSink, LobbyInfo, LobbyMember, LobbySettings, LobbyStatus, MemoryOracle, MemoryStorage,
    ModifierOracle, RecordingSink, Storage,
};

const LOBBY: &str = "ROOM1";

struct Harness {
    platform: Arc<Platform>,
    storage: Arc<MemoryStorage>,
    #[allow(dead_code)]
    oracle: Arc<MemoryOracle>,
    sink: Arc<RecordingSink>,
}

fn test_config() -> Config {
    Config {
        sync_countdown_secs: 0,
        next_question_delay_secs: 0,
        rng_seed: Some(42),
        ..Config::default()
    }
}

/// Builds a platform over in-memory services, with a seeded lobby and
/// question set.
async fn harness(config: Config, mode: GameMode, players: &[&str], questions: Vec<Question>) -> Harness {
    let _ = env_logger::builder().is_test(true).try_init();

    let storage = Arc::new(MemoryStorage::new());
    let oracle = Arc::new(MemoryOracle::new());
    let sink = Arc::new(RecordingSink::new());
    let platform = Platform::new(
        config,
        storage.clone() as Arc<dyn Storage>,
        oracle.clone() as Arc<dyn ModifierOracle>,
        sink.clone() as Arc<dyn EventSink>,
    );

    let count = questions.len();
    storage.seed_questions(1, questions);

    let members: Vec<LobbyMember> = players
        .iter()
        .enumerate()
        .map(|(idx, id)| LobbyMember {
            id: id.to_string(),
            username: id.to_uppercase(),
            character: None,
            character_level: 1,
            is_host: idx == 0,
            connected: true,
            is_ready: true,
        })
        .collect();
    let lobby = LobbyInfo {
        code: LOBBY.to_string(),
        host_id: players[0].to_string(),
        members,
        settings: LobbySettings {
            game_mode: mode,
            question_set_ids: vec![1],
            selected_question_count: Some(count),
        },
        status: LobbyStatus::Waiting,
    };
    storage.upsert_lobby(&lobby).await.unwrap();

    Harness {
        platform,
        storage,
        oracle,
        sink,
    }
}

impl Harness {
    async fn start_game(&self) {
        let replies = self
            .platform
            .handle(ClientCommand::StartGame {
                lobby_code: LOBBY.to_string(),
                host_id: self.host().await,
            })
            .await;
        assert!(replies.is_empty(), "start-game failed: {:?}", replies);
        // `game-started` and the first round start in one transition.
        self.wait_for("game-started", 1).await;
    }

    async fn host(&self) -> String {
        self.storage
            .lobby(LOBBY)
            .await
            .unwrap()
            .map(|l| l.host_id)
            .unwrap_or_else(|| "p1".to_string())
    }

    fn engine(&self) -> Arc<SessionEngine> {
        self.platform.registry().get(LOBBY).expect("engine running")
    }

    async fn submit(&self, player_id: &str, answer: &str) -> Vec<ServerEvent> {
        self.platform
            .handle(ClientCommand::SubmitAnswer {
                lobby_code: LOBBY.to_string(),
                player_id: player_id.to_string(),
                answer: answer.to_string(),
                wager_percent: None,
            })
            .await
    }

    async fn submit_with_wager(
        &self,
        player_id: &str,
        answer: &str,
        wager: i64,
    ) -> Vec<ServerEvent> {
        self.platform
            .handle(ClientCommand::SubmitAnswer {
                lobby_code: LOBBY.to_string(),
                player_id: player_id.to_string(),
                answer: answer.to_string(),
                wager_percent: Some(wager),
            })
            .await
    }

    /// Poll the recording sink until the tag has been emitted `count`
    /// times. Virtual time auto-advances while polling.
    async fn wait_for(&self, tag: &str, count: usize) {
        for _ in 0..5000 {
            if self.sink.count_of(LOBBY, tag) >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "timed out waiting for {} x{}; saw {:?}",
            tag,
            count,
            self.tags()
        );
    }

    fn tags(&self) -> Vec<&'static str> {
        self.sink
            .for_lobby(LOBBY)
            .iter()
            .map(|ev| ev.tag())
            .collect()
    }

    fn answer_payloads(&self) -> Vec<AnswerReceived> {
        self.sink
            .for_lobby(LOBBY)
            .into_iter()
            .filter_map(|ev| match ev {
                ServerEvent::AnswerReceived(payload) => Some(*payload),
                _ => None,
            })
            .collect()
    }
}

async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

async fn advance_secs(secs: u64) {
    tokio::time::advance(Duration::from_secs(secs)).await;
    settle().await;
}

fn mc_question(id: i64, correct: &str, wrong: &str) -> Question {
    Question {
        id,
        prompt: format!("question {}", id),
        options: vec![correct.to_string(), wrong.to_string()],
        correct_answer: correct.to_string(),
        kind: QuestionKind::MultipleChoice,
        hint: None,
        metadata: None,
        category: None,
        difficulty: None,
        set_id: Some(1),
    }
}

fn assert_error(replies: &[ServerEvent], code: &str) {
    match replies.first() {
        Some(ServerEvent::Error { code: actual, .. }) => assert_eq!(actual, code),
        other => panic!("expected {} error, got {:?}", code, other),
    }
}

// ---------------------------------------------------------------------
// S1 — arcade happy path
// ---------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn arcade_happy_path_ranks_faster_player_first() {
    let h = harness(
        test_config(),
        GameMode::Arcade,
        &["p1", "p2"],
        vec![mc_question(1, "red", "blue"), mc_question(2, "cat", "dog")],
    )
    .await;
    h.start_game().await;
    let engine = h.engine();

    advance_secs(10).await;
    assert!(h.submit("p1", "red").await.is_empty());
    advance_secs(5).await;
    assert!(h.submit("p2", "blue").await.is_empty());
    h.wait_for("question-ended", 1).await;
    h.wait_for("question-started", 2).await;

    advance_secs(5).await;
    assert!(h.submit("p1", "cat").await.is_empty());
    advance_secs(2).await;
    assert!(h.submit("p2", "cat").await.is_empty());
    h.wait_for("question-ended", 2).await;
    h.wait_for("game-ended", 1).await;

    // Ordering: round 1 ended before round 2 started.
    let tags = h.tags();
    let first_end = tags.iter().position(|t| *t == "question-ended").unwrap();
    let second_start = tags
        .iter()
        .enumerate()
        .filter(|(_, t)| **t == "question-started")
        .nth(1)
        .unwrap()
        .0;
    assert!(first_end < second_start);

    let leaderboard = h
        .sink
        .for_lobby(LOBBY)
        .into_iter()
        .find_map(|ev| match ev {
            ServerEvent::GameEnded { leaderboard } => Some(leaderboard),
            _ => None,
        })
        .unwrap();
    assert_eq!(leaderboard[0].player_id, "p1");
    assert!(leaderboard[0].score > leaderboard[1].score);

    let state = engine.state_snapshot().await;
    assert_eq!(state.player("p1").unwrap().current_streak, 2);
    assert_eq!(state.player("p2").unwrap().current_streak, 1);

    // Round 1 acknowledged P2's wrong answer with a reset streak.
    let p2_round1 = &h.answer_payloads()[1];
    assert_eq!(p2_round1.player_id, "p2");
    assert_eq!(p2_round1.streak, 0);
    assert!((p2_round1.multiplier - 1.0).abs() < f64::EPSILON);

    assert_eq!(h.platform.registry().active_count(), 0);
}

// ---------------------------------------------------------------------
// S2 — fastest_finger zero-out
// ---------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn fastest_finger_only_first_correct_scores() {
    let h = harness(
        test_config(),
        GameMode::FastestFinger,
        &["p1", "p2", "p3"],
        vec![mc_question(1, "red", "blue")],
    )
    .await;
    h.start_game().await;

    advance_secs(2).await;
    h.submit("p1", "red").await;
    advance_secs(1).await;
    h.submit("p2", "red").await;
    advance_secs(1).await;
    h.submit("p3", "red").await;
    h.wait_for("game-ended", 1).await;

    let payloads = h.answer_payloads();
    assert_eq!(payloads.len(), 3);

    assert_eq!(payloads[0].is_first_correct, Some(true));
    assert!(payloads[0].score_delta > 0);

    for late in &payloads[1..] {
        assert_eq!(late.is_first_correct, Some(false));
        assert_eq!(late.score_delta, 0);
        assert_eq!(late.new_score, 0);
    }
}

// ---------------------------------------------------------------------
// S3 — survival elimination
// ---------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn survival_eliminates_and_crowns_winner() {
    let h = harness(
        test_config(),
        GameMode::Survival,
        &["p1", "p2"],
        vec![
            mc_question(1, "red", "blue"),
            mc_question(2, "cat", "dog"),
            mc_question(3, "sun", "moon"),
        ],
    )
    .await;
    h.start_game().await;
    let engine = h.engine();

    for (round, (correct, wrong)) in [("red", "blue"), ("cat", "dog"), ("sun", "moon")]
        .iter()
        .enumerate()
    {
        h.submit("p1", wrong).await;
        h.submit("p2", correct).await;
        h.wait_for("question-ended", round + 1).await;
    }
    h.wait_for("game-ended", 1).await;

    let state = engine.state_snapshot().await;
    assert_eq!(state.player("p1").unwrap().lives, 0);
    assert!(state.player("p1").unwrap().eliminated);

    assert_eq!(h.sink.count_of(LOBBY, "lives-updated"), 3);
    assert_eq!(h.sink.count_of(LOBBY, "player-eliminated"), 1);

    let winner = h
        .sink
        .for_lobby(LOBBY)
        .into_iter()
        .find_map(|ev| match ev {
            ServerEvent::SurvivalWinner { player_id } => Some(player_id),
            _ => None,
        })
        .unwrap();
    assert_eq!(winner, "p2");
}

#[tokio::test(start_paused = true)]
async fn survival_rejects_answers_from_eliminated_players() {
    let mut config = test_config();
    config.survival_lives = 1;
    let h = harness(
        config,
        GameMode::Survival,
        &["p1", "p2", "p3"],
        vec![mc_question(1, "red", "blue"), mc_question(2, "cat", "dog")],
    )
    .await;
    h.start_game().await;

    h.submit("p1", "blue").await;
    h.submit("p2", "red").await;
    h.submit("p3", "red").await;
    h.wait_for("player-eliminated", 1).await;
    h.wait_for("question-started", 2).await;

    let replies = h.submit("p1", "cat").await;
    assert_error(&replies, "ELIMINATED");
}

// ---------------------------------------------------------------------
// S4 — wager scoring
// ---------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn wager_mode_stakes_percentages_of_score() {
    let h = harness(
        test_config(),
        GameMode::Wager,
        &["p1", "p2"],
        vec![mc_question(1, "red", "blue")],
    )
    .await;
    h.start_game().await;

    h.submit_with_wager("p1", "red", 50).await;
    h.submit_with_wager("p2", "blue", 100).await;
    h.wait_for("game-ended", 1).await;

    let payloads = h.answer_payloads();
    assert_eq!(payloads[0].new_score, 150);
    assert_eq!(payloads[0].score_delta, 50);
    assert_eq!(payloads[0].wager_percent, Some(50));

    assert_eq!(payloads[1].new_score, 0);
    assert_eq!(payloads[1].score_delta, -100);
}

// ---------------------------------------------------------------------
// S5 — duel rotation
// ---------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn duel_winner_stays_and_loser_rotates_out() {
    let h = harness(
        test_config(),
        GameMode::Duel,
        &["p1", "p2", "p3", "p4"],
        vec![mc_question(1, "red", "blue"), mc_question(2, "cat", "dog")],
    )
    .await;
    h.start_game().await;
    h.wait_for("duel-question-started", 1).await;

    let (first, second) = h
        .sink
        .for_lobby(LOBBY)
        .into_iter()
        .find_map(|ev| match ev {
            ServerEvent::DuelQuestionStarted { duelists, .. } => Some(duelists),
            _ => None,
        })
        .unwrap();

    // A spectator may not answer.
    let spectator = ["p1", "p2", "p3", "p4"]
        .iter()
        .find(|id| **id != first && **id != second)
        .unwrap()
        .to_string();
    assert_error(&h.submit(&spectator, "red").await, "NOT_DUELIST");

    // The second duelist answers correct and fast; the first is wrong.
    advance_secs(1).await;
    h.submit(&second, "red").await;
    advance_secs(1).await;
    h.submit(&first, "blue").await;
    h.wait_for("duel-result", 1).await;

    let (winner, loser, next_pair) = h
        .sink
        .for_lobby(LOBBY)
        .into_iter()
        .find_map(|ev| match ev {
            ServerEvent::DuelResult {
                winner_id,
                loser_id,
                next_pair,
                ..
            } => Some((winner_id, loser_id, next_pair)),
            _ => None,
        })
        .unwrap();
    assert_eq!(winner.as_deref(), Some(second.as_str()));
    assert_eq!(loser.as_deref(), Some(first.as_str()));

    // The winner defends in the next round, against a fresh challenger.
    let next_pair = next_pair.unwrap();
    assert_eq!(next_pair.0, second);
    assert_ne!(next_pair.1, first);

    h.wait_for("duel-question-started", 2).await;
    let second_round = h
        .sink
        .for_lobby(LOBBY)
        .into_iter()
        .filter_map(|ev| match ev {
            ServerEvent::DuelQuestionStarted { duelists, .. } => Some(duelists),
            _ => None,
        })
        .nth(1)
        .unwrap();
    assert_eq!(second_round, next_pair);

    // Finish the session; the duel-ended winner holds the most wins.
    h.submit(&second_round.0.clone(), "cat").await;
    h.submit(&second_round.1.clone(), "dog").await;
    h.wait_for("duel-ended", 1).await;
    let duel_winner = h
        .sink
        .for_lobby(LOBBY)
        .into_iter()
        .find_map(|ev| match ev {
            ServerEvent::DuelEnded { winner_id, .. } => Some(winner_id),
            _ => None,
        })
        .unwrap();
    assert_eq!(duel_winner.as_deref(), Some(second.as_str()));
}

// ---------------------------------------------------------------------
// S6 — disconnect grace and reconnect
// ---------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn reconnect_within_grace_cancels_confirmation() {
    let h = harness(
        test_config(),
        GameMode::Arcade,
        &["p1", "p2"],
        vec![mc_question(1, "red", "blue")],
    )
    .await;
    h.start_game().await;

    h.platform.on_client_disconnect(LOBBY, "p1").await;
    settle().await;
    assert_eq!(h.sink.count_of(LOBBY, "player-disconnected"), 1);

    advance_secs(20).await;
    assert_eq!(h.sink.count_of(LOBBY, "player-disconnect-confirmed"), 0);

    let replies = h
        .platform
        .handle(ClientCommand::JoinLobby {
            lobby_code: LOBBY.to_string(),
            player: JoinPlayer {
                id: "p1".to_string(),
                username: "P1".to_string(),
                character: None,
                character_level: None,
            },
        })
        .await;
    assert!(matches!(
        replies.first(),
        Some(ServerEvent::JoinSuccess { .. })
    ));
    assert_eq!(h.sink.count_of(LOBBY, "player-reconnected"), 1);

    // Well past the original grace deadline: no confirmation fires.
    advance_secs(40).await;
    assert_eq!(h.sink.count_of(LOBBY, "player-disconnect-confirmed"), 0);
}

#[tokio::test(start_paused = true)]
async fn expired_grace_confirms_disconnect() {
    let h = harness(
        test_config(),
        GameMode::Arcade,
        &["p1", "p2"],
        vec![mc_question(1, "red", "blue")],
    )
    .await;
    h.start_game().await;

    h.platform.on_client_disconnect(LOBBY, "p1").await;
    advance_secs(31).await;
    assert_eq!(h.sink.count_of(LOBBY, "player-disconnect-confirmed"), 1);

    // The remaining player still finishes the session.
    h.submit("p2", "red").await;
    h.wait_for("game-ended", 1).await;
}

#[tokio::test(start_paused = true)]
async fn all_disconnected_ends_the_session() {
    let h = harness(
        test_config(),
        GameMode::Arcade,
        &["p1", "p2"],
        vec![mc_question(1, "red", "blue")],
    )
    .await;
    h.start_game().await;

    h.platform.on_client_disconnect(LOBBY, "p1").await;
    h.platform.on_client_disconnect(LOBBY, "p2").await;
    advance_secs(31).await;
    h.wait_for("game-ended", 1).await;
    assert_eq!(h.platform.registry().active_count(), 0);
    assert_eq!(h.sink.count_of(LOBBY, "lobby-deleted"), 1);
}

// ---------------------------------------------------------------------
// S7 — estimation partial credit
// ---------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn estimation_grants_partial_credit_and_advances_streak() {
    let estimation = Question {
        id: 1,
        prompt: "How many?".to_string(),
        options: vec![],
        correct_answer: "100".to_string(),
        kind: QuestionKind::Estimation,
        hint: None,
        metadata: Some(QuestionMetadata {
            correct_value: Some(100.0),
            tolerance: Some(10.0),
            tolerance_type: Some(ToleranceKind::Absolute),
            ..Default::default()
        }),
        category: None,
        difficulty: None,
        set_id: Some(1),
    };
    let h = harness(
        test_config(),
        GameMode::Arcade,
        &["p1", "p2"],
        vec![estimation],
    )
    .await;
    h.start_game().await;

    h.submit("p1", "95").await;
    h.submit("p2", "250").await;
    h.wait_for("game-ended", 1).await;

    let payloads = h.answer_payloads();
    assert!(payloads[0].is_correct);
    assert!((payloads[0].partial_score - 0.5).abs() < 1e-9);
    // base(0s of 60s) = 1000, multiplier 1.0, partial 0.5
    assert_eq!(payloads[0].points, 500);
    assert_eq!(payloads[0].streak, 1);

    assert!(!payloads[1].is_correct);
    assert_eq!(payloads[1].points, 0);
}

// ---------------------------------------------------------------------
// Practice mode wait-gate
// ---------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn practice_wrong_answer_waits_for_continue() {
    let h = harness(
        test_config(),
        GameMode::Practice,
        &["p1", "p2"],
        vec![
            Question {
                hint: Some("think again".to_string()),
                ..mc_question(1, "red", "blue")
            },
            mc_question(2, "cat", "dog"),
        ],
    )
    .await;
    h.start_game().await;

    h.submit("p2", "red").await;
    h.submit("p1", "blue").await;
    settle().await;

    let payloads = h.answer_payloads();
    let wrong = payloads.iter().find(|p| p.player_id == "p1").unwrap();
    assert_eq!(wrong.wait_for_continue, Some(true));
    assert_eq!(wrong.correct_answer.as_deref(), Some("red"));
    assert_eq!(wrong.hint.as_deref(), Some("think again"));
    assert_eq!(wrong.score_delta, 0);

    // The round must not advance until p1 continues.
    advance_secs(90).await;
    assert_eq!(h.sink.count_of(LOBBY, "question-ended"), 0);

    let replies = h
        .platform
        .handle(ClientCommand::PracticeContinue {
            lobby_code: LOBBY.to_string(),
            player_id: "p1".to_string(),
        })
        .await;
    assert!(replies.is_empty());
    h.wait_for("question-ended", 1).await;
    h.wait_for("question-started", 2).await;

    // Finish; practice awards no XP.
    h.submit("p1", "cat").await;
    h.submit("p2", "cat").await;
    h.wait_for("game-ended", 1).await;
    let leaderboard = h
        .sink
        .for_lobby(LOBBY)
        .into_iter()
        .find_map(|ev| match ev {
            ServerEvent::GameEnded { leaderboard } => Some(leaderboard),
            _ => None,
        })
        .unwrap();
    assert!(leaderboard.iter().all(|s| s.xp_awarded == 0));
}

// ---------------------------------------------------------------------
// Clock fan-out
// ---------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn clock_emits_one_update_per_second_until_zero() {
    let mut config = test_config();
    config.round_secs = 11;
    let h = harness(
        config,
        GameMode::Arcade,
        &["p1", "p2"],
        vec![mc_question(1, "red", "blue")],
    )
    .await;
    h.start_game().await;

    // Nobody answers; the clock runs the round out.
    h.wait_for("question-ended", 1).await;
    h.wait_for("game-ended", 1).await;

    let events = h.sink.for_lobby(LOBBY);
    let updates: Vec<u32> = events
        .iter()
        .filter_map(|ev| match ev {
            ServerEvent::TimeUpdate { time_remaining } => Some(*time_remaining),
            _ => None,
        })
        .collect();
    assert_eq!(updates.len(), 11);
    assert_eq!(*updates.last().unwrap(), 0);
    let expected: Vec<u32> = (0..11).rev().collect();
    assert_eq!(updates, expected);

    // Warnings at 10 and 5 seconds remaining.
    let warnings: Vec<u32> = events
        .iter()
        .filter_map(|ev| match ev {
            ServerEvent::TimeWarning { time_remaining } => Some(*time_remaining),
            _ => None,
        })
        .collect();
    assert_eq!(warnings, vec![10, 5]);

    // No tick ever lands after the round ended.
    let tags: Vec<&str> = events.iter().map(|ev| ev.tag()).collect();
    let last_update = tags.iter().rposition(|t| *t == "time-update").unwrap();
    let round_end = tags.iter().position(|t| *t == "question-ended").unwrap();
    assert!(last_update < round_end);

    // Non-answerers lose streak and multiplier.
    let state_reset = events.iter().any(|ev| match ev {
        ServerEvent::QuestionResults { results, .. } => results
            .iter()
            .all(|r| r.streak == 0 && (r.multiplier - 1.0).abs() < f64::EPSILON),
        _ => false,
    });
    assert!(state_reset);
}

// ---------------------------------------------------------------------
// Submission protocol violations
// ---------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn double_submission_is_rejected() {
    let h = harness(
        test_config(),
        GameMode::Arcade,
        &["p1", "p2"],
        vec![mc_question(1, "red", "blue")],
    )
    .await;
    h.start_game().await;

    assert!(h.submit("p1", "red").await.is_empty());
    assert_error(&h.submit("p1", "red").await, "ALREADY_ANSWERED");
    assert_error(&h.submit("ghost", "red").await, "UNKNOWN_PLAYER");
}

#[tokio::test(start_paused = true)]
async fn commands_against_missing_sessions_fail_typed() {
    let h = harness(
        test_config(),
        GameMode::Arcade,
        &["p1", "p2"],
        vec![mc_question(1, "red", "blue")],
    )
    .await;

    assert_error(&h.submit("p1", "red").await, "NOT_ACTIVE");

    let replies = h
        .platform
        .handle(ClientCommand::SubmitWager {
            lobby_code: LOBBY.to_string(),
            player_id: "p1".to_string(),
            wager_percent: 50,
        })
        .await;
    assert_error(&replies, "NOT_ACTIVE");
}

#[tokio::test(start_paused = true)]
async fn start_game_enforces_host_and_single_session() {
    let h = harness(
        test_config(),
        GameMode::Arcade,
        &["p1", "p2"],
        vec![mc_question(1, "red", "blue")],
    )
    .await;

    let replies = h
        .platform
        .handle(ClientCommand::StartGame {
            lobby_code: LOBBY.to_string(),
            host_id: "p2".to_string(),
        })
        .await;
    assert_error(&replies, "NOT_HOST");

    h.start_game().await;
    let replies = h
        .platform
        .handle(ClientCommand::StartGame {
            lobby_code: LOBBY.to_string(),
            host_id: "p1".to_string(),
        })
        .await;
    assert_error(&replies, "ALREADY_ACTIVE");
}

// ---------------------------------------------------------------------
// Wager phase
// ---------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn wager_phase_delays_the_question_until_all_wagered() {
    let mut config = test_config();
    config.wager_phase = true;
    let h = harness(
        config,
        GameMode::Wager,
        &["p1", "p2"],
        vec![mc_question(1, "red", "blue")],
    )
    .await;
    h.start_game().await;

    // Phase announcement only; answering is rejected until it closes.
    assert_eq!(h.sink.count_of(LOBBY, "question-started"), 1);
    assert_error(&h.submit("p1", "red").await, "NO_QUESTION");

    let wager = |player_id: &str, pct: i64| {
        let platform = h.platform.clone();
        let player_id = player_id.to_string();
        async move {
            platform
                .handle(ClientCommand::SubmitWager {
                    lobby_code: LOBBY.to_string(),
                    player_id,
                    wager_percent: pct,
                })
                .await
        }
    };
    assert!(wager("p1", 50).await.is_empty());
    assert_eq!(h.sink.count_of(LOBBY, "wager-submitted"), 1);
    assert!(wager("p2", 250).await.is_empty()); // clamped to 100
    h.wait_for("question-started", 2).await;

    h.submit("p1", "red").await;
    h.submit("p2", "blue").await;
    h.wait_for("game-ended", 1).await;

    let payloads = h.answer_payloads();
    assert_eq!(payloads[0].new_score, 150);
    assert_eq!(payloads[1].new_score, 0);
    assert_eq!(payloads[1].wager_percent, Some(100));
}

#[tokio::test(start_paused = true)]
async fn wager_phase_deadline_defaults_missing_wagers_to_zero() {
    let mut config = test_config();
    config.wager_phase = true;
    let h = harness(
        config,
        GameMode::Wager,
        &["p1", "p2"],
        vec![mc_question(1, "red", "blue")],
    )
    .await;
    h.start_game().await;

    // Only p1 wagers; the phase deadline closes it for p2.
    h.platform
        .handle(ClientCommand::SubmitWager {
            lobby_code: LOBBY.to_string(),
            player_id: "p1".to_string(),
            wager_percent: 50,
        })
        .await;
    advance_secs(16).await;
    h.wait_for("question-started", 2).await;

    h.submit("p1", "red").await;
    h.submit("p2", "red").await;
    h.wait_for("game-ended", 1).await;

    let payloads = h.answer_payloads();
    assert_eq!(payloads[0].score_delta, 50);
    // p2 never wagered: stake defaults to 0.
    assert_eq!(payloads[1].score_delta, 0);
    assert_eq!(payloads[1].new_score, 100);
}

// ---------------------------------------------------------------------
// Persistence failures stay non-fatal
// ---------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn session_teardown_survives_persistence_failures() {
    let h = harness(
        test_config(),
        GameMode::Arcade,
        &["p1", "p2"],
        vec![mc_question(1, "red", "blue")],
    )
    .await;
    h.start_game().await;
    h.storage.set_fail_writes(true);

    h.submit("p1", "red").await;
    h.submit("p2", "blue").await;
    h.wait_for("game-ended", 1).await;

    assert_eq!(h.platform.registry().active_count(), 0);
    assert_eq!(h.sink.count_of(LOBBY, "lobby-deleted"), 1);
}

// ---------------------------------------------------------------------
// Fallback questions
// ---------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn empty_question_pool_falls_back_to_builtin_set() {
    let storage = Arc::new(MemoryStorage::new());
    let oracle = Arc::new(MemoryOracle::new());
    let sink = Arc::new(RecordingSink::new());
    let platform = Platform::new(
        test_config(),
        storage.clone() as Arc<dyn Storage>,
        oracle as Arc<dyn ModifierOracle>,
        sink.clone() as Arc<dyn EventSink>,
    );

    let lobby = LobbyInfo {
        code: LOBBY.to_string(),
        host_id: "p1".to_string(),
        members: vec![LobbyMember {
            id: "p1".to_string(),
            username: "P1".to_string(),
            character: None,
            character_level: 1,
            is_host: true,
            connected: true,
            is_ready: true,
        }],
        settings: LobbySettings {
            game_mode: GameMode::Arcade,
            question_set_ids: vec![],
            selected_question_count: None,
        },
        status: LobbyStatus::Waiting,
    };
    storage.upsert_lobby(&lobby).await.unwrap();

    let replies = platform
        .handle(ClientCommand::StartGame {
            lobby_code: LOBBY.to_string(),
            host_id: "p1".to_string(),
        })
        .await;
    assert!(replies.is_empty());

    let engine = platform.registry().get(LOBBY).unwrap();
    let state = engine.state_snapshot().await;
    assert_eq!(state.total_questions, 10);
    assert!(state.questions.iter().all(|q| q.id < 0));

    platform.registry().cleanup_all();
}
