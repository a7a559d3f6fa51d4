/// The round deadline for every mode except practice (no clock) and duel.
pub const DEFAULT_ROUND_SECS: u32 = 60;

/// The round deadline for duel rounds.
pub const DUEL_ROUND_SECS: u32 = 30;

/// Number of 1Hz `game-syncing` ticks emitted before the first question.
pub const SYNC_COUNTDOWN_SECS: u32 = 5;

/// Delay between `question-ended` and the next `question-started`.
pub const NEXT_QUESTION_DELAY_SECS: u64 = 5;

/// Grace window during which a disconnected player may return
/// before the disconnect is confirmed.
pub const DISCONNECT_GRACE_SECS: u64 = 30;

/// Deadline for the optional wager phase in wager mode. Players that
/// have not wagered when it expires default to 0%.
pub const WAGER_PHASE_SECS: u64 = 15;

/// Upper bound for the streak multiplier.
pub const MAX_MULTIPLIER: f64 = 5.0;

/// Multiplier gained per streak step, up to `MAX_MULTIPLIER`.
pub const MULTIPLIER_STEP: f64 = 0.5;

/// Base points for an instant correct answer. Decays linearly to zero
/// over the round deadline.
pub const MAX_BASE_POINTS: i64 = 1000;

/// Starting lives per player in survival mode.
pub const SURVIVAL_LIVES: u32 = 3;

/// Starting score per player in wager mode.
pub const WAGER_START_SCORE: i64 = 100;

/// `time-warning` is emitted when the remaining time hits one of these.
pub const TIME_WARNING_SECS: [u32; 2] = [10, 5];

/// Question-set id used when a lobby has none configured.
pub const FALLBACK_QUESTION_SET_ID: i64 = 1;

/// Question count used when a lobby has none configured.
pub const DEFAULT_QUESTION_COUNT: usize = 10;

/// Questions in the last third of the list count as "late" for the
/// late-question score bonus.
pub const LATE_QUESTION_RATIO: f64 = 2.0 / 3.0;

/// Accuracy required for the end-game accuracy bonus.
pub const ACCURACY_BONUS_THRESHOLD: f64 = 0.8;

/// Consecutive wrong answers required before a phoenix recovery triggers.
pub const PHOENIX_WRONG_STREAK: u32 = 3;

/// XP awarded per point of final score is `score / XP_SCORE_DIVISOR`.
pub const XP_SCORE_DIVISOR: i64 = 10;

/// Flat XP awarded per correct answer.
pub const XP_PER_CORRECT: i64 = 25;
