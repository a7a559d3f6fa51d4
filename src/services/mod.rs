pub use memory::*;

mod memory;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::event::ServerEvent;
use crate::game::score::GameplayModifiers;
use crate::game::state::{GameMode, PlayerId, Question};

pub type Result<T> = anyhow::Result<T>;

/// Lobby lifecycle as seen by the persistence layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LobbyStatus {
    Waiting,
    Starting,
    Playing,
    Finished,
}

/// One roster entry of a lobby.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LobbyMember {
    pub id: PlayerId,
    pub username: String,
    #[serde(default)]
    pub character: Option<String>,
    #[serde(default = "default_character_level")]
    pub character_level: u32,
    pub is_host: bool,
    pub connected: bool,
    #[serde(default)]
    pub is_ready: bool,
}

fn default_character_level() -> u32 {
    1
}

/// Lobby settings relevant to session start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LobbySettings {
    pub game_mode: GameMode,
    #[serde(default)]
    pub question_set_ids: Vec<i64>,
    #[serde(default)]
    pub selected_question_count: Option<usize>,
}

/// A lobby descriptor as returned by the persistence layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LobbyInfo {
    pub code: String,
    pub host_id: PlayerId,
    pub members: Vec<LobbyMember>,
    pub settings: LobbySettings,
    pub status: LobbyStatus,
}

impl LobbyInfo {
    pub fn member(&self, id: &str) -> Option<&LobbyMember> {
        self.members.iter().find(|m| m.id == id)
    }
}

/// One player's final line of a session record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionResult {
    pub player_id: PlayerId,
    pub username: String,
    pub score: i64,
    pub correct_count: u32,
    pub wrong_count: u32,
}

/// Outcome of an XP award.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperienceGain {
    pub xp_awarded: i64,
    pub level_up: bool,
    pub old_level: u32,
    pub new_level: u32,
    pub newly_unlocked_perks: Vec<String>,
}

/// Per-player data served by the modifier oracle: gameplay modifiers,
/// cosmetic effect configs and the active title.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerProfile {
    pub modifiers: Option<GameplayModifiers>,
    pub effects: Option<serde_json::Value>,
    pub title: Option<String>,
}

/// Persistence consumed (not implemented) by the engine. All calls are
/// treated as fallible and non-fatal by the engine; a failure must never
/// corrupt in-memory session state.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Return the lobby with the given code, or `None` if no such
    /// lobby exists.
    async fn lobby(&self, code: &str) -> Result<Option<LobbyInfo>>;

    /// Insert or replace a lobby.
    async fn upsert_lobby(&self, lobby: &LobbyInfo) -> Result<()>;

    /// Delete a lobby. Deleting an unknown code is not an error.
    async fn delete_lobby(&self, code: &str) -> Result<()>;

    /// Update a lobby's lifecycle status.
    async fn set_lobby_status(&self, code: &str, status: LobbyStatus) -> Result<()>;

    /// Update a roster member's connection flag.
    async fn set_member_connected(
        &self,
        code: &str,
        player_id: &str,
        connected: bool,
    ) -> Result<()>;

    /// Fetch up to `count` questions drawn from the given sets.
    async fn random_questions(&self, set_ids: &[i64], count: usize) -> Result<Vec<Question>>;

    /// Create a session record and return its id.
    async fn create_session(&self, lobby_code: &str, mode: GameMode) -> Result<i64>;

    /// Close a session record with the final scores.
    async fn close_session(&self, session_id: i64, scores: &HashMap<PlayerId, i64>) -> Result<()>;

    /// Record one player's result for a session.
    async fn record_result(&self, session_id: i64, result: &SessionResult) -> Result<()>;

    /// Award experience and return the resulting level progression.
    async fn award_experience(&self, player_id: &str, xp: i64) -> Result<ExperienceGain>;
}

/// The perk-catalog service, treated as a modifier oracle: resolved once
/// per player at session start.
#[async_trait]
pub trait ModifierOracle: Send + Sync {
    async fn player_profile(&self, player_id: &str) -> Result<PlayerProfile>;
}

/// Opaque sink for outbound events addressed to a lobby-broadcast group.
///
/// Implementations must be thread-safe, non-blocking, and preserve
/// per-lobby emission order.
pub trait EventSink: Send + Sync {
    fn emit(&self, lobby_code: &str, event: ServerEvent);
}
