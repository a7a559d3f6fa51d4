use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::config::Config;
use crate::constants::WAGER_START_SCORE;
use crate::event::ServerEvent;
use crate::game::state::{GameMode, GameState, PlayerId};

/// What the engine's standard scoring path decided for one submission,
/// before mode arbitration.
#[derive(Debug, Clone)]
pub struct AnswerVerdict {
    pub is_correct: bool,
    pub partial_score: f64,
    /// The award the standard scoring path would apply.
    pub standard_delta: i64,
    pub elapsed_secs: u32,
    /// Effective wager percentage for this submission (wager mode).
    pub wager_percent: Option<u32>,
}

/// A mode's final decision for one submission. The engine applies
/// `final_delta` to the player's score and merges the add-ons into the
/// `answer-received` payload.
#[derive(Debug, Clone, Default)]
pub struct AnswerAdjustment {
    pub final_delta: i64,
    pub events: Vec<ServerEvent>,
    pub is_first_correct: Option<bool>,
    pub lives_remaining: Option<u32>,
    pub wager_percent: Option<u32>,
    pub wait_for_continue: Option<bool>,
    pub correct_answer: Option<String>,
    pub hint: Option<String>,
}

impl AnswerAdjustment {
    fn passthrough(verdict: &AnswerVerdict) -> AnswerAdjustment {
        AnswerAdjustment {
            final_delta: verdict.standard_delta,
            ..Default::default()
        }
    }
}

/// Side-events produced by a mode's round resolution.
#[derive(Debug, Clone, Default)]
pub struct RoundResolution {
    pub events: Vec<ServerEvent>,
}

/// Pluggable per-mode rules. All hooks operate on the engine-owned
/// state and return events for the engine to emit; they never call back
/// into the engine.
pub trait ModeRules: Send + Sync {
    fn mode(&self) -> GameMode;

    /// Mutate a freshly built state before the session starts.
    fn init(&self, _state: &mut GameState, _config: &Config, _rng: &mut StdRng) {}

    /// Post-scoring arbitration for one accepted answer.
    fn on_answer(
        &self,
        _state: &mut GameState,
        _player_id: &str,
        verdict: &AnswerVerdict,
    ) -> AnswerAdjustment {
        AnswerAdjustment::passthrough(verdict)
    }

    /// Round resolution, run once all required players have answered or
    /// the clock expired, before results are computed.
    fn on_round_end(&self, _state: &mut GameState) -> RoundResolution {
        RoundResolution::default()
    }

    /// Final emissions at session end.
    fn on_session_end(&self, _state: &mut GameState) -> Vec<ServerEvent> {
        Vec::new()
    }
}

/// The rules for the given mode.
pub fn rules_for(mode: GameMode) -> &'static dyn ModeRules {
    match mode {
        GameMode::Arcade => &ArcadeRules,
        GameMode::Practice => &PracticeRules,
        GameMode::FastestFinger => &FastestFingerRules,
        GameMode::Survival => &SurvivalRules,
        GameMode::Wager => &WagerRules,
        GameMode::Duel => &DuelRules,
    }
}

/// Default mode: standard scoring, no overrides.
struct ArcadeRules;

impl ModeRules for ArcadeRules {
    fn mode(&self) -> GameMode {
        GameMode::Arcade
    }
}

/// No clock, no points. Wrong answers gate the round until every
/// wrong-answerer has sent `practice-continue`.
struct PracticeRules;

impl ModeRules for PracticeRules {
    fn mode(&self) -> GameMode {
        GameMode::Practice
    }

    fn on_answer(
        &self,
        state: &mut GameState,
        player_id: &str,
        verdict: &AnswerVerdict,
    ) -> AnswerAdjustment {
        let mut adj = AnswerAdjustment {
            final_delta: 0,
            ..Default::default()
        };
        if !verdict.is_correct {
            let (correct_answer, hint) = state
                .current_question()
                .map(|q| (q.correct_answer.clone(), q.hint.clone()))
                .unwrap_or_default();
            state.awaiting_continue.insert(player_id.to_string());
            adj.wait_for_continue = Some(true);
            adj.correct_answer = Some(correct_answer);
            adj.hint = hint;
        }
        adj
    }
}

/// First correct answer keeps its points; every later correct answer is
/// reverted to a net delta of zero.
struct FastestFingerRules;

impl ModeRules for FastestFingerRules {
    fn mode(&self) -> GameMode {
        GameMode::FastestFinger
    }

    fn on_answer(
        &self,
        state: &mut GameState,
        player_id: &str,
        verdict: &AnswerVerdict,
    ) -> AnswerAdjustment {
        let mut adj = AnswerAdjustment::passthrough(verdict);
        if !verdict.is_correct {
            return adj;
        }
        if state.first_correct_player.is_none() {
            state.first_correct_player = Some(player_id.to_string());
            adj.is_first_correct = Some(true);
        } else {
            adj.final_delta = 0;
            adj.is_first_correct = Some(false);
        }
        adj
    }
}

/// Three lives; wrong answers cost one, at zero the player is
/// eliminated and locked out of further rounds.
struct SurvivalRules;

impl ModeRules for SurvivalRules {
    fn mode(&self) -> GameMode {
        GameMode::Survival
    }

    fn init(&self, state: &mut GameState, config: &Config, _rng: &mut StdRng) {
        for player in state.players.values_mut() {
            player.lives = config.survival_lives;
        }
    }

    fn on_answer(
        &self,
        state: &mut GameState,
        player_id: &str,
        verdict: &AnswerVerdict,
    ) -> AnswerAdjustment {
        let mut adj = AnswerAdjustment::passthrough(verdict);
        let player = match state.player_mut(player_id) {
            Some(p) => p,
            None => return adj,
        };
        if !verdict.is_correct {
            player.lives = player.lives.saturating_sub(1);
            adj.events.push(ServerEvent::LivesUpdated {
                player_id: player.id.clone(),
                lives: player.lives,
            });
            if player.lives == 0 {
                player.eliminated = true;
                adj.events.push(ServerEvent::PlayerEliminated {
                    player_id: player.id.clone(),
                });
            }
        }
        adj.lives_remaining = Some(state.player(player_id).map(|p| p.lives).unwrap_or(0));
        adj
    }
}

/// Everyone starts at 100 points and stakes a percentage of their score
/// each round; the standard award is discarded.
struct WagerRules;

impl ModeRules for WagerRules {
    fn mode(&self) -> GameMode {
        GameMode::Wager
    }

    fn init(&self, state: &mut GameState, _config: &Config, _rng: &mut StdRng) {
        for player in state.players.values_mut() {
            player.score = WAGER_START_SCORE;
        }
    }

    fn on_answer(
        &self,
        state: &mut GameState,
        player_id: &str,
        verdict: &AnswerVerdict,
    ) -> AnswerAdjustment {
        let mut adj = AnswerAdjustment::default();
        let pct = i64::from(verdict.wager_percent.unwrap_or(0).min(100));
        let score = state.player(player_id).map(|p| p.score).unwrap_or(0);
        let stake = score * pct / 100;

        adj.final_delta = if verdict.is_correct {
            stake
        } else {
            // Clamped so that the reported delta matches the applied one.
            -stake.min(score)
        };
        adj.wager_percent = Some(pct as u32);
        adj
    }
}

/// Two shuffled-queue duelists per round; the winner stays, the loser
/// goes to the back of the queue.
struct DuelRules;

impl ModeRules for DuelRules {
    fn mode(&self) -> GameMode {
        GameMode::Duel
    }

    fn init(&self, state: &mut GameState, _config: &Config, rng: &mut StdRng) {
        let mut queue: Vec<PlayerId> = state.roster.clone();
        queue.shuffle(rng);
        state.duel_queue = queue.into();
        state.duel_wins = state.roster.iter().map(|id| (id.clone(), 0)).collect();
    }

    fn on_round_end(&self, state: &mut GameState) -> RoundResolution {
        let (a, b) = match state.current_duel_pair.clone() {
            Some(pair) => pair,
            None => return RoundResolution::default(),
        };

        let outcome = {
            let pa = state.player(&a);
            let pb = state.player(&b);
            resolve_duel(
                pa.map(|p| (p.round_answer_correct, p.answer_elapsed_secs))
                    .unwrap_or((false, None)),
                pb.map(|p| (p.round_answer_correct, p.answer_elapsed_secs))
                    .unwrap_or((false, None)),
            )
        };

        let (winner_id, loser_id, draw) = match outcome {
            DuelOutcome::FirstWins => (Some(a.clone()), Some(b.clone()), false),
            DuelOutcome::SecondWins => (Some(b.clone()), Some(a.clone()), false),
            DuelOutcome::Draw => (None, None, true),
        };

        if let (Some(winner), Some(loser)) = (&winner_id, &loser_id) {
            *state.duel_wins.entry(winner.clone()).or_insert(0) += 1;
            state.duel_queue.retain(|id| id != loser);
            if let Some(pos) = state.duel_queue.iter().position(|id| id == winner) {
                let id = state.duel_queue.remove(pos).unwrap();
                state.duel_queue.push_front(id);
            }
            state.duel_queue.push_back(loser.clone());
        }

        let next_pair = match (state.duel_queue.front(), state.duel_queue.get(1)) {
            (Some(x), Some(y)) => Some((x.clone(), y.clone())),
            _ => None,
        };

        RoundResolution {
            events: vec![ServerEvent::DuelResult {
                winner_id,
                loser_id,
                draw,
                next_pair,
            }],
        }
    }

    fn on_session_end(&self, state: &mut GameState) -> Vec<ServerEvent> {
        let winner_id = state
            .roster
            .iter()
            .filter_map(|id| state.duel_wins.get(id).map(|wins| (id, *wins)))
            .filter(|(_, wins)| *wins > 0)
            .max_by_key(|(_, wins)| *wins)
            .map(|(id, _)| id.clone());

        vec![ServerEvent::DuelEnded {
            winner_id,
            wins: state.duel_wins.clone(),
        }]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DuelOutcome {
    FirstWins,
    SecondWins,
    Draw,
}

/// Correct beats wrong; two corrects go to the faster answer; two
/// wrongs or an exact tie draw.
fn resolve_duel(
    first: (bool, Option<u32>),
    second: (bool, Option<u32>),
) -> DuelOutcome {
    match (first, second) {
        ((true, _), (false, _)) => DuelOutcome::FirstWins,
        ((false, _), (true, _)) => DuelOutcome::SecondWins,
        ((false, _), (false, _)) => DuelOutcome::Draw,
        ((true, ta), (true, tb)) => {
            let ta = ta.unwrap_or(u32::MAX);
            let tb = tb.unwrap_or(u32::MAX);
            match ta.cmp(&tb) {
                std::cmp::Ordering::Less => DuelOutcome::FirstWins,
                std::cmp::Ordering::Greater => DuelOutcome::SecondWins,
                std::cmp::Ordering::Equal => DuelOutcome::Draw,
            }
        }
    }
}
