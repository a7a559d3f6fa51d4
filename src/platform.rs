use std::sync::Arc;

use crate::command::ClientCommand;
use crate::config::Config;
use crate::constants::DEFAULT_QUESTION_COUNT;
use crate::error::GameError;
use crate::event::ServerEvent;
use crate::game::{EngineRegistry, SessionEngine};
use crate::lobby::LobbyManager;
use crate::services::{EventSink, ModifierOracle, Storage};

/// The command router: one facade that hides the lobby manager, the
/// engine registry and the session engines behind a single entry point
/// for inbound operations.
pub struct Platform {
    config: Config,
    storage: Arc<dyn Storage>,
    oracle: Arc<dyn ModifierOracle>,
    sink: Arc<dyn EventSink>,
    registry: Arc<EngineRegistry>,
    lobbies: LobbyManager,
}

impl Platform {
    pub fn new(
        config: Config,
        storage: Arc<dyn Storage>,
        oracle: Arc<dyn ModifierOracle>,
        sink: Arc<dyn EventSink>,
    ) -> Arc<Platform> {
        let lobbies = LobbyManager::new(storage.clone(), sink.clone());
        Arc::new(Platform {
            config,
            storage,
            oracle,
            sink,
            registry: EngineRegistry::new(),
            lobbies,
        })
    }

    pub fn registry(&self) -> &Arc<EngineRegistry> {
        &self.registry
    }

    /// Dispatch one inbound command. Returned events are replies for
    /// the originating connection only; everything lobby-wide goes out
    /// through the event sink.
    pub async fn handle(&self, command: ClientCommand) -> Vec<ServerEvent> {
        log::debug!("{:?}", &command);
        match command {
            ClientCommand::JoinLobby { lobby_code, player } => {
                // A known player joining a running session is a
                // transport-driven reconnect.
                if let Some(engine) = self.registry.get(&lobby_code) {
                    return match engine.reconnect(&player.id).await {
                        Ok(()) => match self.storage.lobby(&lobby_code).await {
                            Ok(Some(lobby)) => vec![ServerEvent::JoinSuccess { lobby }],
                            _ => Vec::new(),
                        },
                        Err(err) => vec![ServerEvent::JoinError {
                            reason: err.to_string(),
                        }],
                    };
                }
                match self.lobbies.join(&lobby_code, &player).await {
                    Ok(lobby) => vec![ServerEvent::JoinSuccess { lobby }],
                    Err(err) => vec![ServerEvent::JoinError {
                        reason: err.to_string(),
                    }],
                }
            }

            ClientCommand::LeaveLobby {
                lobby_code,
                player_id,
            } => {
                // Leaving mid-session follows the disconnect path: the
                // roster is fixed once a session runs.
                if let Some(engine) = self.registry.get(&lobby_code) {
                    return match engine.disconnect(&player_id).await {
                        Ok(()) => vec![ServerEvent::LeaveSuccess { lobby_code }],
                        Err(err) => vec![ServerEvent::LeaveError {
                            reason: err.to_string(),
                        }],
                    };
                }
                match self.lobbies.leave(&lobby_code, &player_id).await {
                    Ok(_) => vec![ServerEvent::LeaveSuccess { lobby_code }],
                    Err(err) => vec![ServerEvent::LeaveError {
                        reason: err.to_string(),
                    }],
                }
            }

            ClientCommand::PlayerReady {
                lobby_code,
                player_id,
                is_ready,
            } => match self.lobbies.set_ready(&lobby_code, &player_id, is_ready).await {
                Ok(_) => Vec::new(),
                Err(err) => vec![ServerEvent::Error {
                    code: "INTERNAL".to_string(),
                    message: err.to_string(),
                }],
            },

            ClientCommand::StartGame {
                lobby_code,
                host_id,
            } => self.reply(self.start_game(&lobby_code, &host_id).await),

            ClientCommand::SubmitAnswer {
                lobby_code,
                player_id,
                answer,
                wager_percent,
            } => {
                let result = match self.engine(&lobby_code) {
                    Ok(engine) => engine.submit_answer(&player_id, &answer, wager_percent).await,
                    Err(err) => Err(err),
                };
                self.reply(result)
            }

            ClientCommand::SubmitWager {
                lobby_code,
                player_id,
                wager_percent,
            } => {
                let result = match self.engine(&lobby_code) {
                    Ok(engine) => engine.submit_wager(&player_id, wager_percent).await,
                    Err(err) => Err(err),
                };
                self.reply(result)
            }

            ClientCommand::PracticeContinue {
                lobby_code,
                player_id,
            } => {
                let result = match self.engine(&lobby_code) {
                    Ok(engine) => engine.practice_continue(&player_id).await,
                    Err(err) => Err(err),
                };
                self.reply(result)
            }
        }
    }

    /// Transport-driven: the connection for this player dropped.
    pub async fn on_client_disconnect(&self, lobby_code: &str, player_id: &str) {
        match self.registry.get(lobby_code) {
            Some(engine) => {
                if let Err(err) = engine.disconnect(player_id).await {
                    log::debug!("disconnect of {} ignored: {}", player_id, err);
                }
            }
            None => {
                if let Err(err) = self.lobbies.leave(lobby_code, player_id).await {
                    log::debug!("leave of {} ignored: {}", player_id, err);
                }
            }
        }
    }

    fn engine(&self, lobby_code: &str) -> Result<Arc<SessionEngine>, GameError> {
        self.registry.get(lobby_code).ok_or(GameError::NotActive)
    }

    fn reply(&self, result: Result<(), GameError>) -> Vec<ServerEvent> {
        match result {
            Ok(()) => Vec::new(),
            Err(err) => vec![ServerEvent::Error {
                code: err.code().to_string(),
                message: err.to_string(),
            }],
        }
    }

    /// Resolve the lobby, draw its questions and hand off to the
    /// session engine.
    async fn start_game(&self, lobby_code: &str, host_id: &str) -> Result<(), GameError> {
        let lobby = self
            .storage
            .lobby(lobby_code)
            .await
            .map_err(|err| GameError::Internal(err.to_string()))?
            .ok_or_else(|| GameError::Internal(format!("lobby {} not found", lobby_code)))?;

        let mode = lobby.settings.game_mode;
        let set_ids = if lobby.settings.question_set_ids.is_empty() {
            vec![self.config.fallback_question_set_id]
        } else {
            lobby.settings.question_set_ids.clone()
        };
        let count = lobby
            .settings
            .selected_question_count
            .unwrap_or(DEFAULT_QUESTION_COUNT);

        let questions = match self.storage.random_questions(&set_ids, count).await {
            Ok(questions) => questions,
            Err(err) => {
                log::warn!("question fetch failed for lobby {}: {}", lobby_code, err);
                Vec::new()
            }
        };

        SessionEngine::start_session(
            &self.registry,
            self.storage.clone(),
            self.oracle.clone(),
            self.sink.clone(),
            self.config.clone(),
            host_id,
            &lobby,
            questions,
            mode,
        )
        .await?;
        Ok(())
    }
}
