use serde::{Deserialize, Serialize};

use crate::constants::{ACCURACY_BONUS_THRESHOLD, LATE_QUESTION_RATIO, PHOENIX_WRONG_STREAK};

/// Per-player gameplay modifiers, resolved once at session start through
/// the modifier oracle. An opaque bag of scalars from the engine's point
/// of view; only the scorer interprets them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameplayModifiers {
    /// Added to the award of every fully correct answer.
    pub bonus_points: i64,
    /// Flat gain on the advanced multiplier, still capped.
    pub multiplier_bonus: f64,
    /// Percentage gain on the advanced multiplier, still capped.
    pub multiplier_gain_percent: f64,
    /// Wrong answers that preserve streak and multiplier.
    pub free_wrong_answers: u32,
    /// Extra points on questions in the final third of the list.
    pub late_question_bonus: i64,
    /// Doubles the first correct answer after a run of wrong ones.
    pub phoenix_recovery: bool,
    /// End-game bonus, granted when accuracy reaches the threshold.
    pub accuracy_bonus: i64,
    /// Scales the XP award at session end.
    pub xp_multiplier: f64,
    /// Added to the XP award at session end.
    pub xp_bonus: i64,
}

impl Default for GameplayModifiers {
    fn default() -> Self {
        GameplayModifiers {
            bonus_points: 0,
            multiplier_bonus: 0.0,
            multiplier_gain_percent: 0.0,
            free_wrong_answers: 0,
            late_question_bonus: 0,
            phoenix_recovery: false,
            accuracy_bonus: 0,
            xp_multiplier: 1.0,
            xp_bonus: 0,
        }
    }
}

/// Per-player tallies handed to the end-of-session scorer helpers.
#[derive(Debug, Clone, Copy)]
pub struct PlayerStats {
    pub correct: u32,
    pub wrong: u32,
    pub total_questions: usize,
}

impl PlayerStats {
    pub fn accuracy(&self) -> f64 {
        let answered = self.correct + self.wrong;
        if answered == 0 {
            return 0.0;
        }
        f64::from(self.correct) / f64::from(answered)
    }
}

/// Modifier-relevant facts about the round being scored.
#[derive(Debug, Clone, Copy)]
pub struct ScoreContext {
    pub question_index: usize,
    pub total_questions: usize,
    /// Free wrong answers the player has not consumed yet.
    pub free_wrong_remaining: u32,
}

impl ScoreContext {
    fn is_late_question(&self) -> bool {
        self.total_questions > 0
            && (self.question_index as f64) >= (self.total_questions as f64) * LATE_QUESTION_RATIO
    }
}

/// Everything the scorer needs to know about one submission.
/// The scorer never mutates player state; the engine applies the result.
#[derive(Debug, Clone, Copy)]
pub struct ScoreInput<'a> {
    pub elapsed_secs: u32,
    pub deadline_secs: u32,
    pub multiplier: f64,
    pub streak: u32,
    pub wrong_streak: u32,
    pub modifiers: Option<&'a GameplayModifiers>,
    pub context: Option<&'a ScoreContext>,
}

/// The scorer's verdict for one submission.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreResult {
    pub points: i64,
    pub new_streak: u32,
    pub new_multiplier: f64,
    /// The wrong answer was absorbed by a free-wrong modifier; the engine
    /// increments the player's consumed counter.
    pub free_wrong_consumed: bool,
}

/// Pure point calculator. Base points decay linearly from
/// `max_base_points` to zero over the round deadline.
#[derive(Debug, Clone, Copy)]
pub struct Scorer {
    pub max_base_points: i64,
    pub max_multiplier: f64,
    pub multiplier_step: f64,
}

impl Scorer {
    pub fn new(max_base_points: i64, max_multiplier: f64, multiplier_step: f64) -> Scorer {
        Scorer {
            max_base_points,
            max_multiplier,
            multiplier_step,
        }
    }

    /// Base points for a correct answer after `elapsed_secs`; zero once
    /// the deadline has fully expired.
    pub fn base_points(&self, elapsed_secs: u32, deadline_secs: u32) -> i64 {
        if deadline_secs == 0 || elapsed_secs >= deadline_secs {
            return 0;
        }
        let ratio = 1.0 - f64::from(elapsed_secs) / f64::from(deadline_secs);
        (self.max_base_points as f64 * ratio).round() as i64
    }

    /// Score a fully correct or fully wrong answer.
    pub fn calculate_score(&self, input: &ScoreInput, correct: bool) -> ScoreResult {
        if !correct {
            return self.score_wrong(input);
        }

        let base = self.base_points(input.elapsed_secs, input.deadline_secs);
        let mut points = (base as f64 * input.multiplier).round() as i64;

        if let Some(mods) = input.modifiers {
            points += mods.bonus_points;
            if input.context.map(|c| c.is_late_question()).unwrap_or(false) {
                points += mods.late_question_bonus;
            }
            if mods.phoenix_recovery && input.wrong_streak >= PHOENIX_WRONG_STREAK {
                points *= 2;
            }
        }

        ScoreResult {
            points,
            new_streak: input.streak + 1,
            new_multiplier: self.advance_multiplier(input, input.streak + 1),
            free_wrong_consumed: false,
        }
    }

    /// Score an answer with partial credit. Ratios at the bounds collapse
    /// into the wrong/correct paths; in between, the streak behaves as
    /// correct and the award is scaled by the ratio.
    pub fn calculate_partial_score(&self, input: &ScoreInput, partial: f64) -> ScoreResult {
        if partial <= 0.0 {
            return self.score_wrong(input);
        }
        if partial >= 1.0 {
            return self.calculate_score(input, true);
        }

        let base = self.base_points(input.elapsed_secs, input.deadline_secs);
        let points = (base as f64 * partial * input.multiplier).round() as i64;

        ScoreResult {
            points,
            new_streak: input.streak + 1,
            new_multiplier: self.advance_multiplier(input, input.streak + 1),
            free_wrong_consumed: false,
        }
    }

    /// End-of-session score transform.
    pub fn apply_end_game_bonuses(
        &self,
        total_score: i64,
        modifiers: Option<&GameplayModifiers>,
        stats: &PlayerStats,
    ) -> i64 {
        let mut total = total_score;
        if let Some(mods) = modifiers {
            if mods.accuracy_bonus > 0 && stats.accuracy() >= ACCURACY_BONUS_THRESHOLD {
                total += mods.accuracy_bonus;
            }
        }
        total.max(0)
    }

    /// End-of-session XP transform.
    pub fn calculate_modified_xp(
        &self,
        base_xp: i64,
        modifiers: Option<&GameplayModifiers>,
        _stats: &PlayerStats,
    ) -> i64 {
        let mut xp = base_xp;
        if let Some(mods) = modifiers {
            xp = (xp as f64 * mods.xp_multiplier).round() as i64;
            xp += mods.xp_bonus;
        }
        xp.max(0)
    }

    fn score_wrong(&self, input: &ScoreInput) -> ScoreResult {
        let free_wrong_remaining = input
            .context
            .map(|c| c.free_wrong_remaining)
            .unwrap_or(0);
        let has_free_wrong = input
            .modifiers
            .map(|m| m.free_wrong_answers > 0)
            .unwrap_or(false);

        if has_free_wrong && free_wrong_remaining > 0 {
            return ScoreResult {
                points: 0,
                new_streak: input.streak,
                new_multiplier: input.multiplier,
                free_wrong_consumed: true,
            };
        }

        ScoreResult {
            points: 0,
            new_streak: 0,
            new_multiplier: 1.0,
            free_wrong_consumed: false,
        }
    }

    fn advance_multiplier(&self, input: &ScoreInput, new_streak: u32) -> f64 {
        let mut multiplier = 1.0 + self.multiplier_step * f64::from(new_streak);
        if let Some(mods) = input.modifiers {
            multiplier += mods.multiplier_bonus;
            multiplier *= 1.0 + mods.multiplier_gain_percent / 100.0;
        }
        multiplier.clamp(1.0, self.max_multiplier)
    }
}
