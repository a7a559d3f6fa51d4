use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::game::score::GameplayModifiers;

pub type PlayerId = String;

/// The six session modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    Arcade,
    Practice,
    FastestFinger,
    Survival,
    Wager,
    Duel,
}

impl Default for GameMode {
    fn default() -> Self {
        GameMode::Arcade
    }
}

/// The answer kinds a question can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    MultipleChoice,
    TrueFalse,
    FreeText,
    FillInBlank,
    Estimation,
    Ordering,
    Matching,
}

/// Tolerance interpretation for estimation questions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToleranceKind {
    Absolute,
    Percentage,
}

/// One left/right pair of a matching question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchPair {
    pub left: String,
    pub right: String,
}

/// Per-kind metadata for estimation, ordering and matching questions.
///
/// Checking falls back to exact string equality when the metadata a kind
/// requires is missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuestionMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance_type: Option<ToleranceKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_order: Option<Vec<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pairs: Option<Vec<MatchPair>>,
}

/// A quiz question. Immutable once a session has started; fallback
/// questions carry negative ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    pub prompt: String,
    #[serde(default)]
    pub options: Vec<String>,
    pub correct_answer: String,
    pub kind: QuestionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<QuestionMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_id: Option<i64>,
}

/// A session participant and every per-player scoring fact the engine
/// tracks for them.
#[derive(Debug, Clone, Serialize)]
pub struct Player {
    pub id: PlayerId,
    pub username: String,
    pub character: Option<String>,
    pub character_level: u32,
    pub is_host: bool,
    pub connected: bool,

    pub score: i64,
    pub current_streak: u32,
    /// Consecutive wrong answers; feeds phoenix-style recovery modifiers.
    pub wrong_streak: u32,
    pub multiplier: f64,
    pub correct_count: u32,
    pub wrong_count: u32,

    pub has_answered: bool,
    pub current_answer: Option<String>,
    /// Whether the buffered answer for this round was graded correct.
    pub round_answer_correct: bool,
    /// Credit ratio of the buffered answer for this round.
    pub round_partial_score: f64,
    pub answer_elapsed_secs: Option<u32>,
    pub free_wrong_used: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub modifiers: Option<GameplayModifiers>,
    /// Opaque cosmetic effect bag; rendered by clients only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effects: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    // Mode-specific fields.
    pub lives: u32,
    pub eliminated: bool,
    pub wager_percent: Option<u32>,
    pub is_dueling: bool,
    pub is_spectating: bool,
}

impl Player {
    pub fn new(id: impl Into<PlayerId>, username: impl Into<String>) -> Player {
        Player {
            id: id.into(),
            username: username.into(),
            character: None,
            character_level: 1,
            is_host: false,
            connected: true,
            score: 0,
            current_streak: 0,
            wrong_streak: 0,
            multiplier: 1.0,
            correct_count: 0,
            wrong_count: 0,
            has_answered: false,
            current_answer: None,
            round_answer_correct: false,
            round_partial_score: 0.0,
            answer_elapsed_secs: None,
            free_wrong_used: 0,
            modifiers: None,
            effects: None,
            title: None,
            lives: 0,
            eliminated: false,
            wager_percent: None,
            is_dueling: false,
            is_spectating: false,
        }
    }
}

/// Lifecycle of a session.
///
/// `Created -> Syncing -> Playing -> (RoundActive <-> RoundEnding) -> Final
/// -> Destroyed`; `Destroyed` is reached from any state on host abort,
/// all-disconnected timeout, or final round completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Created,
    Syncing,
    Playing,
    RoundActive,
    RoundEnding,
    Final,
    Destroyed,
}

/// The complete per-lobby session state. Exclusively owned by the
/// session's engine and only ever mutated behind its lock.
#[derive(Debug, Clone)]
pub struct GameState {
    pub lobby_code: String,
    pub session_id: Option<i64>,
    pub mode: GameMode,
    pub phase: SessionPhase,

    pub questions: Vec<Question>,
    pub total_questions: usize,
    /// Index of the current question; -1 before the first round.
    pub current_index: isize,
    /// The current question's answer options in emitted (shuffled) order.
    pub current_options: Vec<String>,
    pub question_started_at: Option<Instant>,
    pub time_remaining: u32,
    pub is_active: bool,

    pub players: HashMap<PlayerId, Player>,
    /// Roster in join order, for deterministic iteration.
    pub roster: Vec<PlayerId>,

    // Mode-specific round state.
    pub wager_phase_active: bool,
    pub duel_queue: VecDeque<PlayerId>,
    pub current_duel_pair: Option<(PlayerId, PlayerId)>,
    pub duel_wins: HashMap<PlayerId, u32>,
    pub first_correct_player: Option<PlayerId>,
    /// Practice mode: wrong-answerers that still owe a `practice-continue`.
    pub awaiting_continue: HashSet<PlayerId>,
}

impl GameState {
    pub fn new(lobby_code: impl Into<String>, mode: GameMode, questions: Vec<Question>) -> Self {
        let total_questions = questions.len();
        GameState {
            lobby_code: lobby_code.into(),
            session_id: None,
            mode,
            phase: SessionPhase::Created,
            questions,
            total_questions,
            current_index: -1,
            current_options: Vec::new(),
            question_started_at: None,
            time_remaining: 0,
            is_active: false,
            players: HashMap::new(),
            roster: Vec::new(),
            wager_phase_active: false,
            duel_queue: VecDeque::new(),
            current_duel_pair: None,
            duel_wins: HashMap::new(),
            first_correct_player: None,
            awaiting_continue: HashSet::new(),
        }
    }

    pub fn add_player(&mut self, player: Player) {
        self.roster.push(player.id.clone());
        self.players.insert(player.id.clone(), player);
    }

    pub fn player(&self, id: &str) -> Option<&Player> {
        self.players.get(id)
    }

    pub fn player_mut(&mut self, id: &str) -> Option<&mut Player> {
        self.players.get_mut(id)
    }

    pub fn current_question(&self) -> Option<&Question> {
        if self.current_index < 0 {
            return None;
        }
        self.questions.get(self.current_index as usize)
    }

    /// Roster ids of players that are not eliminated.
    pub fn alive_ids(&self) -> Vec<PlayerId> {
        self.roster
            .iter()
            .filter(|id| self.players.get(*id).map(|p| !p.eliminated).unwrap_or(false))
            .cloned()
            .collect()
    }

    /// Whether every player that this round waits on has answered.
    /// Eliminated players and duel spectators are pre-marked as answered
    /// at round start; disconnected players never block a round.
    pub fn all_answered(&self) -> bool {
        self.roster
            .iter()
            .filter_map(|id| self.players.get(id))
            .all(|p| p.has_answered || !p.connected)
    }

    /// Elapsed whole seconds since the current question started.
    pub fn elapsed_secs(&self) -> u32 {
        self.question_started_at
            .map(|t| t.elapsed().as_secs() as u32)
            .unwrap_or(0)
    }
}
