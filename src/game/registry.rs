use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

use crate::error::GameError;
use crate::game::engine::SessionEngine;
use crate::game::state::PlayerId;

/// Process-wide map of active sessions keyed by lobby code, plus the
/// pending disconnect-grace timers keyed by `(lobby, player)`.
///
/// This is the only process-wide mutable component; it is constructed
/// explicitly at program start and handed to the platform.
#[derive(Default)]
pub struct EngineRegistry {
    engines: Mutex<HashMap<String, Arc<SessionEngine>>>,
    grace_timers: Mutex<HashMap<(String, PlayerId), JoinHandle<()>>>,
}

impl EngineRegistry {
    pub fn new() -> Arc<EngineRegistry> {
        Arc::new(EngineRegistry::default())
    }

    /// The engine for the given lobby, if a session is active.
    pub fn get(&self, lobby_code: &str) -> Option<Arc<SessionEngine>> {
        self.engines.lock().unwrap().get(lobby_code).cloned()
    }

    /// Register a freshly built engine. Fails if a session already
    /// exists for that lobby code.
    pub fn create(&self, lobby_code: &str, engine: Arc<SessionEngine>) -> Result<(), GameError> {
        let mut engines = self.engines.lock().unwrap();
        if engines.contains_key(lobby_code) {
            return Err(GameError::AlreadyActive);
        }
        engines.insert(lobby_code.to_string(), engine);
        log::info!("session registered for lobby {}", lobby_code);
        Ok(())
    }

    /// Remove the engine for the given lobby and cancel everything it
    /// owns: its timers and any pending grace timers, in one step.
    pub fn destroy(&self, lobby_code: &str) {
        let engine = self.engines.lock().unwrap().remove(lobby_code);
        if let Some(engine) = engine {
            engine.cancel_all_timers();
            log::info!("session destroyed for lobby {}", lobby_code);
        }

        let mut grace_timers = self.grace_timers.lock().unwrap();
        grace_timers.retain(|(code, _), handle| {
            if code == lobby_code {
                handle.abort();
                false
            } else {
                true
            }
        });
    }

    /// Destroy every active session. For shutdown and tests.
    pub fn cleanup_all(&self) {
        let codes: Vec<String> = self.engines.lock().unwrap().keys().cloned().collect();
        for code in codes {
            self.destroy(&code);
        }
    }

    pub fn active_count(&self) -> usize {
        self.engines.lock().unwrap().len()
    }

    /// Start a disconnect-grace timer for the given player. A timer
    /// already pending for the same `(lobby, player)` is replaced.
    pub fn schedule_grace(
        self: &Arc<Self>,
        engine: &Arc<SessionEngine>,
        player_id: &str,
        grace: Duration,
    ) {
        let key = (engine.lobby_code().to_string(), player_id.to_string());
        let registry = Arc::downgrade(self);
        let weak_engine = Arc::downgrade(engine);
        let task_key = key.clone();

        let handle = tokio::spawn(async move {
            sleep(grace).await;
            if let Some(registry) = registry.upgrade() {
                registry.grace_timers.lock().unwrap().remove(&task_key);
            }
            if let Some(engine) = weak_engine.upgrade() {
                engine.confirm_disconnect(&task_key.1).await;
            }
        });

        if let Some(previous) = self.grace_timers.lock().unwrap().insert(key, handle) {
            previous.abort();
        }
    }

    /// Cancel the grace timer for the given player, if one is pending.
    /// Returns whether a timer was cancelled.
    pub fn cancel_grace(&self, lobby_code: &str, player_id: &str) -> bool {
        let key = (lobby_code.to_string(), player_id.to_string());
        match self.grace_timers.lock().unwrap().remove(&key) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }
}
