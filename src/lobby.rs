use std::sync::Arc;

use thiserror::Error;

use crate::command::JoinPlayer;
use crate::event::ServerEvent;
use crate::game::state::GameMode;
use crate::services::{
    EventSink, LobbyInfo, LobbyMember, LobbySettings, LobbyStatus, Storage,
};

/// Errors for the pre-game lobby operations. These surface as
/// `join-error`/`leave-error` reasons, not as engine error codes.
#[derive(Debug, Error)]
pub enum LobbyError {
    #[error("lobby {0} was not found")]
    UnknownLobby(String),

    #[error("a game is already running in this lobby")]
    AlreadyInGame,

    #[error("a player with this id is already in the lobby")]
    DuplicatePlayer,

    #[error("player is not in this lobby")]
    UnknownPlayer,

    #[error("lobby backend failed: {0}")]
    Backend(String),
}

fn backend(err: anyhow::Error) -> LobbyError {
    LobbyError::Backend(err.to_string())
}

/// Roster management for lobbies that have not started a session yet.
/// The first player to join a code creates the lobby and becomes its
/// host.
pub struct LobbyManager {
    storage: Arc<dyn Storage>,
    sink: Arc<dyn EventSink>,
}

impl LobbyManager {
    pub fn new(storage: Arc<dyn Storage>, sink: Arc<dyn EventSink>) -> LobbyManager {
        LobbyManager { storage, sink }
    }

    /// Add a player to the roster, creating the lobby if it does not
    /// exist yet. Broadcasts `lobby-updated`.
    pub async fn join(
        &self,
        lobby_code: &str,
        player: &JoinPlayer,
    ) -> Result<LobbyInfo, LobbyError> {
        let mut lobby = match self.storage.lobby(lobby_code).await.map_err(backend)? {
            Some(lobby) => lobby,
            None => LobbyInfo {
                code: lobby_code.to_string(),
                host_id: player.id.clone(),
                members: Vec::new(),
                settings: LobbySettings {
                    game_mode: GameMode::Arcade,
                    question_set_ids: Vec::new(),
                    selected_question_count: None,
                },
                status: LobbyStatus::Waiting,
            },
        };

        if lobby.status != LobbyStatus::Waiting {
            return Err(LobbyError::AlreadyInGame);
        }
        if lobby.member(&player.id).is_some() {
            return Err(LobbyError::DuplicatePlayer);
        }

        let is_host = lobby.members.is_empty();
        lobby.members.push(LobbyMember {
            id: player.id.clone(),
            username: player.username.clone(),
            character: player.character.clone(),
            character_level: player.character_level.unwrap_or(1),
            is_host,
            connected: true,
            is_ready: false,
        });
        if is_host {
            lobby.host_id = player.id.clone();
        }

        self.storage.upsert_lobby(&lobby).await.map_err(backend)?;
        log::info!("{} joined lobby {}", player.id, lobby_code);
        self.sink.emit(
            lobby_code,
            ServerEvent::LobbyUpdated {
                lobby: lobby.clone(),
            },
        );
        Ok(lobby)
    }

    /// Remove a player from the roster. Deletes the lobby when it
    /// empties; promotes the next member when the host leaves.
    pub async fn leave(
        &self,
        lobby_code: &str,
        player_id: &str,
    ) -> Result<Option<LobbyInfo>, LobbyError> {
        let mut lobby = self
            .storage
            .lobby(lobby_code)
            .await
            .map_err(backend)?
            .ok_or_else(|| LobbyError::UnknownLobby(lobby_code.to_string()))?;

        let before = lobby.members.len();
        lobby.members.retain(|m| m.id != player_id);
        if lobby.members.len() == before {
            return Err(LobbyError::UnknownPlayer);
        }
        log::info!("{} left lobby {}", player_id, lobby_code);

        if lobby.members.is_empty() {
            self.storage.delete_lobby(lobby_code).await.map_err(backend)?;
            self.sink.emit(
                lobby_code,
                ServerEvent::LobbyDeleted {
                    lobby_code: lobby_code.to_string(),
                },
            );
            return Ok(None);
        }

        if lobby.host_id == player_id {
            let next_host = lobby.members[0].id.clone();
            lobby.host_id = next_host;
            for (idx, member) in lobby.members.iter_mut().enumerate() {
                member.is_host = idx == 0;
            }
        }

        self.storage.upsert_lobby(&lobby).await.map_err(backend)?;
        self.sink.emit(
            lobby_code,
            ServerEvent::LobbyUpdated {
                lobby: lobby.clone(),
            },
        );
        Ok(Some(lobby))
    }

    /// Update a member's readiness flag. Broadcasts `lobby-updated`.
    pub async fn set_ready(
        &self,
        lobby_code: &str,
        player_id: &str,
        is_ready: bool,
    ) -> Result<LobbyInfo, LobbyError> {
        let mut lobby = self
            .storage
            .lobby(lobby_code)
            .await
            .map_err(backend)?
            .ok_or_else(|| LobbyError::UnknownLobby(lobby_code.to_string()))?;

        let member = lobby
            .members
            .iter_mut()
            .find(|m| m.id == player_id)
            .ok_or(LobbyError::UnknownPlayer)?;
        member.is_ready = is_ready;

        self.storage.upsert_lobby(&lobby).await.map_err(backend)?;
        self.sink.emit(
            lobby_code,
            ServerEvent::LobbyUpdated {
                lobby: lobby.clone(),
            },
        );
        Ok(lobby)
    }
}
