use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::game::state::GameMode;

/// Engine config.
///
/// Every timing constant and mode parameter of the session engine is a
/// field here, so that tests can shrink deadlines and deployments can
/// tune them without a rebuild.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// The address the TCP transport binds to, f.e. "127.0.0.1:4123".
    pub bind_address: String,

    /// Round deadline in seconds for arcade, fastest_finger, survival
    /// and wager rounds.
    pub round_secs: u32,

    /// Round deadline in seconds for duel rounds.
    pub duel_round_secs: u32,

    /// Number of 1Hz `game-syncing` ticks before the first question.
    pub sync_countdown_secs: u32,

    /// Delay between `question-ended` and the next `question-started`.
    pub next_question_delay_secs: u64,

    /// Grace window for disconnected players.
    pub disconnect_grace_secs: u64,

    /// Whether wager-mode rounds open with a wager phase before the
    /// question is revealed.
    pub wager_phase: bool,

    /// Deadline of the wager phase. Missing wagers default to 0%.
    pub wager_phase_secs: u64,

    /// Upper bound for the streak multiplier.
    pub max_multiplier: f64,

    /// Base points for an instant correct answer.
    pub max_base_points: i64,

    /// Starting lives per player in survival mode.
    pub survival_lives: u32,

    /// Question-set id to draw from when a lobby has none configured.
    pub fallback_question_set_id: i64,

    /// Seed for the engine RNG (answer-option and duel-queue shuffles).
    /// Leave unset outside of tests.
    pub rng_seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_address: "127.0.0.1:4123".to_string(),
            round_secs: DEFAULT_ROUND_SECS,
            duel_round_secs: DUEL_ROUND_SECS,
            sync_countdown_secs: SYNC_COUNTDOWN_SECS,
            next_question_delay_secs: NEXT_QUESTION_DELAY_SECS,
            disconnect_grace_secs: DISCONNECT_GRACE_SECS,
            wager_phase: false,
            wager_phase_secs: WAGER_PHASE_SECS,
            max_multiplier: MAX_MULTIPLIER,
            max_base_points: MAX_BASE_POINTS,
            survival_lives: SURVIVAL_LIVES,
            fallback_question_set_id: FALLBACK_QUESTION_SET_ID,
            rng_seed: None,
        }
    }
}

impl Config {
    /// The round deadline for the given mode, or `None` if the mode has
    /// no clock.
    pub fn round_deadline(&self, mode: GameMode) -> Option<u32> {
        match mode {
            GameMode::Practice => None,
            GameMode::Duel => Some(self.duel_round_secs),
            _ => Some(self.round_secs),
        }
    }

    /// Read the config file listed in the `QUIZMASTER_CONFIG` environment
    /// variable, or fall back to compiled-in defaults if it is not set.
    ///
    /// # Panics
    /// - when `QUIZMASTER_CONFIG` points to a file that cannot be read
    /// - when the file cannot be parsed
    pub fn load() -> Config {
        let f = match Self::path() {
            Some(f) => f,
            None => {
                log::info!("'{}' not set; using default config", CONFIG_ENV_VAR);
                return Config::default();
            }
        };
        let f_str = std::fs::read_to_string(f).expect("failed to read config file");
        let cfg: Config = toml::from_str(&f_str).expect("failed to parse config file");
        cfg
    }

    fn path() -> Option<PathBuf> {
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(f) => Some(PathBuf::from(f)).filter(|p| p.is_file()),
            Err(_) => None,
        }
    }
}

const CONFIG_ENV_VAR: &str = "QUIZMASTER_CONFIG";
