use std::collections::HashMap;

use serde::Serialize;

use crate::game::state::{GameMode, PlayerId, Question, QuestionKind};
use crate::services::LobbyInfo;

/// Every outbound event, addressed to a lobby-broadcast group (or, for
/// join/leave/error responses, to the originating connection only).
///
/// This is the one closed set of event tags; the transport serializer is
/// the only place that renders them.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    Connected {
        motd: String,
    },
    JoinSuccess {
        lobby: LobbyInfo,
    },
    JoinError {
        reason: String,
    },
    LeaveSuccess {
        lobby_code: String,
    },
    LeaveError {
        reason: String,
    },
    LobbyUpdated {
        lobby: LobbyInfo,
    },
    LobbyDeleted {
        lobby_code: String,
    },
    GameSyncing {
        seconds_left: u32,
    },
    GameStarted {
        mode: GameMode,
        total_questions: usize,
    },
    QuestionStarted {
        question: PublicQuestion,
        index: usize,
        total: usize,
        time_limit: Option<u32>,
        wager_phase_active: bool,
    },
    DuelQuestionStarted {
        question: PublicQuestion,
        index: usize,
        total: usize,
        time_limit: u32,
        duelists: (PlayerId, PlayerId),
    },
    TimeUpdate {
        time_remaining: u32,
    },
    TimeWarning {
        time_remaining: u32,
    },
    AnswerReceived(Box<AnswerReceived>),
    WagerSubmitted {
        player_id: PlayerId,
        wager_percent: u32,
    },
    LivesUpdated {
        player_id: PlayerId,
        lives: u32,
    },
    PlayerEliminated {
        player_id: PlayerId,
    },
    SurvivalWinner {
        player_id: PlayerId,
    },
    DuelResult {
        winner_id: Option<PlayerId>,
        loser_id: Option<PlayerId>,
        draw: bool,
        next_pair: Option<(PlayerId, PlayerId)>,
    },
    DuelEnded {
        winner_id: Option<PlayerId>,
        wins: HashMap<PlayerId, u32>,
    },
    QuestionResults {
        correct_answer: String,
        results: Vec<RoundResult>,
    },
    QuestionEnded {
        correct_answer: String,
        scores: HashMap<PlayerId, i64>,
    },
    GameEnded {
        leaderboard: Vec<FinalStanding>,
    },
    /// Legacy flat variant of `game-ended`, kept for older clients.
    GameOver {
        scores: HashMap<PlayerId, i64>,
    },
    PlayerLevelUp {
        player_id: PlayerId,
        old_level: u32,
        new_level: u32,
        newly_unlocked_perks: Vec<String>,
    },
    PlayerDisconnected {
        player_id: PlayerId,
    },
    PlayerDisconnectConfirmed {
        player_id: PlayerId,
    },
    PlayerReconnected {
        player_id: PlayerId,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ServerEvent {
    /// The wire tag of this event.
    pub fn tag(&self) -> &'static str {
        use ServerEvent::*;
        match self {
            Connected { .. } => "connected",
            JoinSuccess { .. } => "join-success",
            JoinError { .. } => "join-error",
            LeaveSuccess { .. } => "leave-success",
            LeaveError { .. } => "leave-error",
            LobbyUpdated { .. } => "lobby-updated",
            LobbyDeleted { .. } => "lobby-deleted",
            GameSyncing { .. } => "game-syncing",
            GameStarted { .. } => "game-started",
            QuestionStarted { .. } => "question-started",
            DuelQuestionStarted { .. } => "duel-question-started",
            TimeUpdate { .. } => "time-update",
            TimeWarning { .. } => "time-warning",
            AnswerReceived(_) => "answer-received",
            WagerSubmitted { .. } => "wager-submitted",
            LivesUpdated { .. } => "lives-updated",
            PlayerEliminated { .. } => "player-eliminated",
            SurvivalWinner { .. } => "survival-winner",
            DuelResult { .. } => "duel-result",
            DuelEnded { .. } => "duel-ended",
            QuestionResults { .. } => "question-results",
            QuestionEnded { .. } => "question-ended",
            GameEnded { .. } => "game-ended",
            GameOver { .. } => "game-over",
            PlayerLevelUp { .. } => "player-level-up",
            PlayerDisconnected { .. } => "player-disconnected",
            PlayerDisconnectConfirmed { .. } => "player-disconnect-confirmed",
            PlayerReconnected { .. } => "player-reconnected",
            Error { .. } => "error",
        }
    }
}

/// The view of a question that clients are allowed to see: no canonical
/// answer, no grading metadata, options in their shuffled round order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublicQuestion {
    pub id: i64,
    pub prompt: String,
    pub options: Vec<String>,
    pub kind: QuestionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<String>,
}

impl PublicQuestion {
    pub fn from_question(question: &Question, options: Vec<String>) -> PublicQuestion {
        PublicQuestion {
            id: question.id,
            prompt: question.prompt.clone(),
            options,
            kind: question.kind,
            category: question.category.clone(),
            difficulty: question.difficulty.clone(),
        }
    }
}

/// Acknowledgement of an accepted answer, with the legacy `points` field
/// alongside the explicit delta/new-score pair and mode add-ons.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerReceived {
    pub player_id: PlayerId,
    pub is_correct: bool,
    pub partial_score: f64,
    /// Legacy field: the raw award before mode adjustments.
    pub points: i64,
    /// The delta actually applied to the player's score.
    pub score_delta: i64,
    pub new_score: i64,
    pub streak: u32,
    pub multiplier: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_first_correct: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lives_remaining: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wager_percent: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_for_continue: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// One player's line in the detailed `question-results` snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundResult {
    pub player_id: PlayerId,
    pub username: String,
    pub answer: Option<String>,
    pub answered: bool,
    pub is_correct: bool,
    pub partial_score: f64,
    pub elapsed_secs: Option<u32>,
    pub score: i64,
    pub streak: u32,
    pub multiplier: f64,
}

/// One player's line in the final `game-ended` leaderboard.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalStanding {
    pub player_id: PlayerId,
    pub username: String,
    pub score: i64,
    pub correct_count: u32,
    pub wrong_count: u32,
    pub xp_awarded: i64,
    pub level_up: bool,
    pub old_level: u32,
    pub new_level: u32,
    pub newly_unlocked_perks: Vec<String>,
}
