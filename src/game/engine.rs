use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};

use futures::future::join_all;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, Instant};

use crate::config::Config;
use crate::constants::{MULTIPLIER_STEP, TIME_WARNING_SECS, XP_PER_CORRECT, XP_SCORE_DIVISOR};
use crate::error::GameError;
use crate::event::{
    AnswerReceived, FinalStanding, PublicQuestion, RoundResult, ServerEvent,
};
use crate::game::answer;
use crate::game::clock::RoundClock;
use crate::game::fallback::fallback_questions;
use crate::game::modes::{rules_for, AnswerVerdict};
use crate::game::registry::EngineRegistry;
use crate::game::score::{PlayerStats, ScoreContext, ScoreInput, ScoreResult, Scorer};
use crate::game::state::{
    GameMode, GameState, Player, PlayerId, Question, SessionPhase,
};
use crate::services::{
    EventSink, LobbyInfo, LobbyStatus, ModifierOracle, SessionResult, Storage,
};

/// What a locked state transition wants to happen once the lock is
/// released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NextStep {
    Continue,
    EndSession,
}

/// Every timer a session owns. All of them are cancelled in one step
/// when the engine is destroyed.
#[derive(Default)]
struct Timers {
    sync_countdown: Option<JoinHandle<()>>,
    round_clock: Option<RoundClock>,
    next_question: Option<JoinHandle<()>>,
    wager_deadline: Option<JoinHandle<()>>,
}

/// The per-lobby session engine: a single logical actor whose state is
/// only ever mutated behind `state`. Timer callbacks are funneled
/// through the same lock; no suspension point is awaited while it is
/// held.
pub struct SessionEngine {
    lobby_code: String,
    mode: GameMode,
    config: Config,
    scorer: Scorer,

    storage: Arc<dyn Storage>,
    oracle: Arc<dyn ModifierOracle>,
    sink: Arc<dyn EventSink>,
    registry: Weak<EngineRegistry>,

    state: Mutex<GameState>,
    timers: StdMutex<Timers>,
    /// Players with a submission currently in flight; contenders fail
    /// immediately with `IN_PROGRESS`.
    submitting: StdMutex<HashSet<PlayerId>>,
    /// Bumped whenever a round ends, so stale clock ticks can never
    /// emit into a later round.
    round_epoch: AtomicU64,
    ended: AtomicBool,
    rng: StdMutex<StdRng>,
}

impl SessionEngine {
    /// Build, register and start a session for the given lobby.
    ///
    /// Fails with `NOT_HOST` if the requester does not own the lobby
    /// and `ALREADY_ACTIVE` if an engine exists for the lobby code.
    /// External failures (status update, session record, modifier
    /// resolution) are logged and non-fatal.
    #[allow(clippy::too_many_arguments)]
    pub async fn start_session(
        registry: &Arc<EngineRegistry>,
        storage: Arc<dyn Storage>,
        oracle: Arc<dyn ModifierOracle>,
        sink: Arc<dyn EventSink>,
        config: Config,
        host_id: &str,
        lobby: &LobbyInfo,
        questions: Vec<Question>,
        mode: GameMode,
    ) -> Result<Arc<SessionEngine>, GameError> {
        if lobby.host_id != host_id {
            return Err(GameError::NotHost);
        }
        if registry.get(&lobby.code).is_some() {
            return Err(GameError::AlreadyActive);
        }

        let questions = if questions.is_empty() {
            log::warn!(
                "no usable questions for lobby {}; using built-in fallback set",
                lobby.code
            );
            fallback_questions()
        } else {
            questions
        };

        let mut rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut state = GameState::new(&lobby.code, mode, questions);
        for member in &lobby.members {
            let mut player = Player::new(&member.id, &member.username);
            player.character = member.character.clone();
            player.character_level = member.character_level;
            player.is_host = member.is_host;
            player.connected = member.connected;
            state.add_player(player);
        }
        rules_for(mode).init(&mut state, &config, &mut rng);

        if let Err(err) = storage
            .set_lobby_status(&lobby.code, LobbyStatus::Starting)
            .await
        {
            log::warn!("failed to mark lobby {} starting: {}", lobby.code, err);
        }

        match storage.create_session(&lobby.code, mode).await {
            Ok(session_id) => state.session_id = Some(session_id),
            Err(err) => log::warn!(
                "failed to create session record for lobby {}: {}",
                lobby.code,
                err
            ),
        }

        // Resolve gameplay modifiers for the whole roster; a failed
        // lookup leaves that player unmodified.
        let ids = state.roster.clone();
        let profiles = join_all(ids.iter().map(|id| oracle.player_profile(id))).await;
        for (id, profile) in ids.iter().zip(profiles) {
            match profile {
                Ok(profile) => {
                    if let Some(player) = state.player_mut(id) {
                        player.modifiers = profile.modifiers;
                        player.effects = profile.effects;
                        player.title = profile.title;
                    }
                }
                Err(err) => log::warn!("failed to resolve modifiers for {}: {}", id, err),
            }
        }

        state.phase = SessionPhase::Syncing;
        state.is_active = true;

        let engine = Arc::new(SessionEngine {
            lobby_code: lobby.code.clone(),
            mode,
            scorer: Scorer::new(config.max_base_points, config.max_multiplier, MULTIPLIER_STEP),
            config,
            storage,
            oracle,
            sink,
            registry: Arc::downgrade(registry),
            state: Mutex::new(state),
            timers: StdMutex::new(Timers::default()),
            submitting: StdMutex::new(HashSet::new()),
            round_epoch: AtomicU64::new(0),
            ended: AtomicBool::new(false),
            rng: StdMutex::new(rng),
        });

        registry.create(&lobby.code, engine.clone())?;
        engine.spawn_sync_countdown();
        Ok(engine)
    }

    pub fn lobby_code(&self) -> &str {
        &self.lobby_code
    }

    pub fn mode(&self) -> GameMode {
        self.mode
    }

    /// A copy of the current session state, for inspection.
    pub async fn state_snapshot(&self) -> GameState {
        self.state.lock().await.clone()
    }

    /// Accept and score one answer.
    ///
    /// Serialized per `(lobby, player)`: a contending submission by the
    /// same player fails immediately with `IN_PROGRESS`.
    pub async fn submit_answer(
        self: &Arc<Self>,
        player_id: &str,
        answer_text: &str,
        wager_percent: Option<i64>,
    ) -> Result<(), GameError> {
        let _guard = SubmitGuard::acquire(&self.submitting, player_id)?;

        let next = {
            let mut st = self.state.lock().await;
            if !st.is_active {
                return Err(GameError::NotActive);
            }
            if st.wager_phase_active || st.phase != SessionPhase::RoundActive {
                return Err(GameError::NoQuestion);
            }
            let question = st.current_question().cloned().ok_or(GameError::NoQuestion)?;

            {
                let player = st.player(player_id).ok_or(GameError::UnknownPlayer)?;
                if st.mode == GameMode::Survival && player.eliminated {
                    return Err(GameError::Eliminated);
                }
                if st.mode == GameMode::Duel && !player.is_dueling {
                    return Err(GameError::NotDuelist);
                }
                if player.has_answered {
                    return Err(GameError::AlreadyAnswered);
                }
            }

            let deadline = self.config.round_deadline(st.mode).unwrap_or(0);
            let mut elapsed = st.elapsed_secs();
            if deadline > 0 {
                elapsed = elapsed.min(deadline);
            }

            let check = answer::check(answer_text, &question);

            let effective_wager = if st.mode == GameMode::Wager {
                let recorded = st.player(player_id).and_then(|p| p.wager_percent);
                let submitted = wager_percent.map(|w| w.clamp(0, 100) as u32);
                Some(recorded.or(submitted).unwrap_or(0))
            } else {
                None
            };

            {
                let player = st.player_mut(player_id).expect("player checked above");
                player.has_answered = true;
                player.current_answer = Some(answer_text.to_string());
                player.round_answer_correct = check.is_correct;
                player.round_partial_score = check.partial_score;
                player.answer_elapsed_secs = Some(elapsed);
                if let Some(wager) = effective_wager {
                    player.wager_percent = Some(wager);
                }
            }

            // Practice rounds are not scored.
            let score_result: Option<ScoreResult> = if st.mode == GameMode::Practice {
                None
            } else {
                let player = st.player(player_id).expect("player checked above");
                let modifiers = player.modifiers.clone();
                let context = ScoreContext {
                    question_index: st.current_index as usize,
                    total_questions: st.total_questions,
                    free_wrong_remaining: modifiers
                        .as_ref()
                        .map(|m| m.free_wrong_answers.saturating_sub(player.free_wrong_used))
                        .unwrap_or(0),
                };
                let input = ScoreInput {
                    elapsed_secs: elapsed,
                    deadline_secs: deadline,
                    multiplier: player.multiplier,
                    streak: player.current_streak,
                    wrong_streak: player.wrong_streak,
                    modifiers: modifiers.as_ref(),
                    context: Some(&context),
                };
                let result = if check.partial_score > 0.0 && check.partial_score < 1.0 {
                    self.scorer.calculate_partial_score(&input, check.partial_score)
                } else {
                    self.scorer.calculate_score(&input, check.is_correct)
                };
                Some(result)
            };
            let standard_delta = score_result.map(|r| r.points).unwrap_or(0);

            let verdict = AnswerVerdict {
                is_correct: check.is_correct,
                partial_score: check.partial_score,
                standard_delta,
                elapsed_secs: elapsed,
                wager_percent: effective_wager,
            };
            let adjustment = rules_for(st.mode).on_answer(&mut st, player_id, &verdict);

            let payload = {
                let player = st.player_mut(player_id).expect("player checked above");
                let old_score = player.score;
                player.score = (player.score + adjustment.final_delta).max(0);
                let applied_delta = player.score - old_score;

                if let Some(result) = score_result {
                    player.current_streak = result.new_streak;
                    player.multiplier = result.new_multiplier;
                    if result.free_wrong_consumed {
                        player.free_wrong_used += 1;
                    }
                }
                if check.is_correct {
                    player.correct_count += 1;
                    player.wrong_streak = 0;
                } else {
                    player.wrong_count += 1;
                    player.wrong_streak += 1;
                }

                AnswerReceived {
                    player_id: player.id.clone(),
                    is_correct: check.is_correct,
                    partial_score: check.partial_score,
                    points: standard_delta,
                    score_delta: applied_delta,
                    new_score: player.score,
                    streak: player.current_streak,
                    multiplier: player.multiplier,
                    is_first_correct: adjustment.is_first_correct,
                    lives_remaining: adjustment.lives_remaining,
                    wager_percent: adjustment.wager_percent,
                    wait_for_continue: adjustment.wait_for_continue,
                    correct_answer: adjustment.correct_answer.clone(),
                    hint: adjustment.hint.clone(),
                }
            };

            self.emit(ServerEvent::AnswerReceived(Box::new(payload)));
            for event in adjustment.events {
                self.emit(event);
            }

            if self.round_complete(&st) {
                self.resolve_round(&mut st)
            } else {
                NextStep::Continue
            }
        };

        self.follow_up(next);
        Ok(())
    }

    /// Record a wager during an active wager phase. Percentages are
    /// clamped to [0, 100]; once every connected player has wagered the
    /// phase closes and the delayed `question-started` goes out.
    pub async fn submit_wager(
        self: &Arc<Self>,
        player_id: &str,
        wager_percent: i64,
    ) -> Result<(), GameError> {
        let mut st = self.state.lock().await;
        if !st.is_active {
            return Err(GameError::NotActive);
        }
        if st.mode != GameMode::Wager {
            return Err(GameError::InvalidWager);
        }
        if !st.wager_phase_active {
            return Err(GameError::NoWagerPhase);
        }
        st.player(player_id).ok_or(GameError::UnknownPlayer)?;

        let pct = wager_percent.clamp(0, 100) as u32;
        st.player_mut(player_id)
            .expect("player checked above")
            .wager_percent = Some(pct);
        self.emit(ServerEvent::WagerSubmitted {
            player_id: player_id.to_string(),
            wager_percent: pct,
        });

        let all_wagered = st
            .roster
            .iter()
            .filter_map(|id| st.players.get(id))
            .all(|p| p.wager_percent.is_some() || !p.connected);
        if all_wagered {
            self.close_wager_phase(&mut st);
        }
        Ok(())
    }

    /// Practice mode: acknowledge a wrong answer's explanation. The
    /// round advances once every player has answered and every
    /// wrong-answerer has continued.
    pub async fn practice_continue(self: &Arc<Self>, player_id: &str) -> Result<(), GameError> {
        let next = {
            let mut st = self.state.lock().await;
            if !st.is_active {
                return Err(GameError::NotActive);
            }
            if st.mode != GameMode::Practice {
                return Err(GameError::Internal(
                    "practice-continue outside practice mode".to_string(),
                ));
            }
            st.player(player_id).ok_or(GameError::UnknownPlayer)?;

            st.awaiting_continue.remove(player_id);
            st.player_mut(player_id)
                .expect("player checked above")
                .has_answered = true;

            if st.phase == SessionPhase::RoundActive && self.round_complete(&st) {
                self.resolve_round(&mut st)
            } else {
                NextStep::Continue
            }
        };
        self.follow_up(next);
        Ok(())
    }

    /// Transport-driven: a player's connection dropped. Emits
    /// `player-disconnected` immediately and starts the grace timer.
    pub async fn disconnect(self: &Arc<Self>, player_id: &str) -> Result<(), GameError> {
        {
            let st = self.state.lock().await;
            if st.player(player_id).is_none() {
                return Err(GameError::UnknownPlayer);
            }
        }
        self.emit(ServerEvent::PlayerDisconnected {
            player_id: player_id.to_string(),
        });
        if let Some(registry) = self.registry.upgrade() {
            registry.schedule_grace(
                self,
                player_id,
                Duration::from_secs(self.config.disconnect_grace_secs),
            );
        }
        Ok(())
    }

    /// Transport-driven: a player returned within the grace window.
    pub async fn reconnect(self: &Arc<Self>, player_id: &str) -> Result<(), GameError> {
        if let Some(registry) = self.registry.upgrade() {
            registry.cancel_grace(&self.lobby_code, player_id);
        }
        {
            let mut st = self.state.lock().await;
            let player = st.player_mut(player_id).ok_or(GameError::UnknownPlayer)?;
            player.connected = true;
        }
        if let Err(err) = self
            .storage
            .set_member_connected(&self.lobby_code, player_id, true)
            .await
        {
            log::warn!("failed to persist reconnect of {}: {}", player_id, err);
        }
        self.emit(ServerEvent::PlayerReconnected {
            player_id: player_id.to_string(),
        });
        Ok(())
    }

    /// Grace timer expiry: the player did not return. Marks them
    /// disconnected and tears the session down if nobody is left.
    pub(crate) async fn confirm_disconnect(self: &Arc<Self>, player_id: &str) {
        let all_disconnected = {
            let mut st = self.state.lock().await;
            let player = match st.player_mut(player_id) {
                Some(player) => player,
                None => return,
            };
            if player.connected {
                player.connected = false;
                self.emit(ServerEvent::PlayerDisconnectConfirmed {
                    player_id: player_id.to_string(),
                });
            }
            st.players.values().all(|p| !p.connected)
        };

        if let Err(err) = self
            .storage
            .set_member_connected(&self.lobby_code, player_id, false)
            .await
        {
            log::warn!("failed to persist disconnect of {}: {}", player_id, err);
        }

        if all_disconnected {
            log::info!(
                "all players disconnected from lobby {}; ending session",
                self.lobby_code
            );
            self.trigger_session_end();
        }
    }

    /// End the session now, regardless of progress. Used by host abort
    /// and the all-disconnected teardown.
    pub fn trigger_session_end(self: &Arc<Self>) {
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        let engine = self.clone();
        tokio::spawn(async move {
            engine.run_session_end().await;
        });
    }

    /// Cancel every engine-owned timer. Idempotent.
    pub fn cancel_all_timers(&self) {
        let mut timers = self.timers.lock().unwrap();
        if let Some(handle) = timers.sync_countdown.take() {
            handle.abort();
        }
        if let Some(clock) = timers.round_clock.take() {
            clock.cancel();
        }
        if let Some(handle) = timers.next_question.take() {
            handle.abort();
        }
        if let Some(handle) = timers.wager_deadline.take() {
            handle.abort();
        }
    }

    // ------------------------------------------------------------------
    // Timer-driven entry points
    // ------------------------------------------------------------------

    /// One 1Hz tick of the round clock. Returns whether the clock
    /// should keep ticking.
    pub(crate) async fn on_clock_tick(self: &Arc<Self>, epoch: u64) -> bool {
        let mut st = self.state.lock().await;
        if self.round_epoch.load(Ordering::SeqCst) != epoch
            || st.phase != SessionPhase::RoundActive
        {
            return false;
        }

        st.time_remaining = st.time_remaining.saturating_sub(1);
        let remaining = st.time_remaining;
        self.emit(ServerEvent::TimeUpdate {
            time_remaining: remaining,
        });
        if TIME_WARNING_SECS.contains(&remaining) {
            self.emit(ServerEvent::TimeWarning {
                time_remaining: remaining,
            });
        }
        if remaining > 0 {
            return true;
        }

        let next = self.resolve_round(&mut st);
        drop(st);
        self.follow_up(next);
        false
    }

    /// The 5-second next-question delay elapsed.
    pub(crate) async fn advance_round(self: &Arc<Self>) {
        let next = {
            let mut st = self.state.lock().await;
            if !st.is_active {
                return;
            }
            self.start_next_question(&mut st)
        };
        self.follow_up(next);
    }

    /// The wager-phase deadline fired; missing wagers default to 0.
    pub(crate) async fn on_wager_deadline(self: &Arc<Self>, epoch: u64) {
        let mut st = self.state.lock().await;
        if self.round_epoch.load(Ordering::SeqCst) != epoch || !st.wager_phase_active {
            return;
        }
        self.close_wager_phase(&mut st);
    }

    // ------------------------------------------------------------------
    // Internal state transitions (run under the engine lock)
    // ------------------------------------------------------------------

    fn spawn_sync_countdown(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let secs = self.config.sync_countdown_secs;
        let handle = tokio::spawn(async move {
            for seconds_left in (1..=secs).rev() {
                match weak.upgrade() {
                    Some(engine) => engine.emit(ServerEvent::GameSyncing { seconds_left }),
                    None => return,
                }
                sleep(Duration::from_secs(1)).await;
            }
            if let Some(engine) = weak.upgrade() {
                engine.begin_play().await;
            }
        });
        self.timers.lock().unwrap().sync_countdown = Some(handle);
    }

    async fn begin_play(self: &Arc<Self>) {
        if let Err(err) = self
            .storage
            .set_lobby_status(&self.lobby_code, LobbyStatus::Playing)
            .await
        {
            log::warn!("failed to mark lobby {} playing: {}", self.lobby_code, err);
        }

        let next = {
            let mut st = self.state.lock().await;
            if !st.is_active {
                return;
            }
            st.phase = SessionPhase::Playing;
            self.emit(ServerEvent::GameStarted {
                mode: st.mode,
                total_questions: st.total_questions,
            });
            self.start_next_question(&mut st)
        };
        self.follow_up(next);
    }

    /// Advance to the next question, or signal the end of the session
    /// when the list is exhausted.
    fn start_next_question(self: &Arc<Self>, st: &mut GameState) -> NextStep {
        if st.current_index >= st.total_questions as isize - 1 {
            return NextStep::EndSession;
        }
        st.current_index += 1;

        if st.mode == GameMode::Survival {
            if let Some(step) = self.survival_liveness(st) {
                return step;
            }
        }

        // Per-round player resets. Eliminated players stay marked as
        // answered so they never block progress.
        let survival = st.mode == GameMode::Survival;
        for player in st.players.values_mut() {
            player.has_answered = survival && player.eliminated;
            player.current_answer = None;
            player.round_answer_correct = false;
            player.round_partial_score = 0.0;
            player.answer_elapsed_secs = None;
            player.wager_percent = None;
            player.is_dueling = false;
        }
        if st.mode == GameMode::FastestFinger {
            st.first_correct_player = None;
        }
        st.awaiting_continue.clear();

        if st.mode == GameMode::Duel {
            if st.duel_queue.len() < 2 {
                return NextStep::EndSession;
            }
            let pair = (st.duel_queue[0].clone(), st.duel_queue[1].clone());
            st.current_duel_pair = Some(pair.clone());
            for player in st.players.values_mut() {
                let dueling = player.id == pair.0 || player.id == pair.1;
                player.is_dueling = dueling;
                player.is_spectating = !dueling;
                if !dueling {
                    player.has_answered = true;
                }
            }
        }

        let question = st
            .current_question()
            .cloned()
            .expect("index advanced within bounds");
        let mut options = question.options.clone();
        if options.len() > 1 {
            options.shuffle(&mut *self.rng.lock().unwrap());
        }
        st.current_options = options;

        st.question_started_at = Some(Instant::now());
        let deadline = self.config.round_deadline(st.mode);
        st.time_remaining = deadline.unwrap_or(0);
        st.phase = SessionPhase::RoundActive;
        let epoch = self.round_epoch.fetch_add(1, Ordering::SeqCst) + 1;

        if st.mode == GameMode::Wager && self.config.wager_phase {
            st.wager_phase_active = true;
            self.emit(ServerEvent::QuestionStarted {
                question: PublicQuestion::from_question(&question, st.current_options.clone()),
                index: st.current_index as usize,
                total: st.total_questions,
                time_limit: None,
                wager_phase_active: true,
            });
            self.spawn_wager_deadline(epoch);
            return NextStep::Continue;
        }

        self.emit_round_start(st, &question, deadline);
        if let Some(deadline) = deadline {
            self.spawn_round_clock(epoch, deadline);
        }
        NextStep::Continue
    }

    fn emit_round_start(&self, st: &GameState, question: &Question, deadline: Option<u32>) {
        let public = PublicQuestion::from_question(question, st.current_options.clone());
        if st.mode == GameMode::Duel {
            let duelists = st
                .current_duel_pair
                .clone()
                .expect("duel pair set at round start");
            self.emit(ServerEvent::DuelQuestionStarted {
                question: public,
                index: st.current_index as usize,
                total: st.total_questions,
                time_limit: deadline.unwrap_or(0),
                duelists,
            });
        } else {
            self.emit(ServerEvent::QuestionStarted {
                question: public,
                index: st.current_index as usize,
                total: st.total_questions,
                time_limit: deadline,
                wager_phase_active: false,
            });
        }
    }

    /// Whether the round can resolve: everyone this round waits on has
    /// answered, and no practice-continue is outstanding.
    fn round_complete(&self, st: &GameState) -> bool {
        st.all_answered() && st.awaiting_continue.is_empty()
    }

    /// Run the mode's round resolution, then end the question.
    fn resolve_round(self: &Arc<Self>, st: &mut GameState) -> NextStep {
        let resolution = rules_for(st.mode).on_round_end(st);
        for event in resolution.events {
            self.emit(event);
        }
        self.end_current_question(st)
    }

    /// Close the current round: stop the clock, emit the results
    /// snapshot, and either schedule the next round, or signal the end
    /// of the session.
    fn end_current_question(self: &Arc<Self>, st: &mut GameState) -> NextStep {
        // Invalidate the round before anything else; a stale clock tick
        // must never emit after `question-ended`.
        self.round_epoch.fetch_add(1, Ordering::SeqCst);
        {
            let mut timers = self.timers.lock().unwrap();
            if let Some(clock) = timers.round_clock.take() {
                clock.cancel();
            }
            if let Some(handle) = timers.wager_deadline.take() {
                handle.abort();
            }
        }
        st.phase = SessionPhase::RoundEnding;
        st.wager_phase_active = false;

        let correct_answer = st
            .current_question()
            .map(|q| q.correct_answer.clone())
            .unwrap_or_default();

        let mut results = Vec::with_capacity(st.roster.len());
        for id in st.roster.clone() {
            let player = st.player_mut(&id).expect("roster ids are players");
            if !player.has_answered {
                player.current_streak = 0;
                player.multiplier = 1.0;
            }
            results.push(RoundResult {
                player_id: player.id.clone(),
                username: player.username.clone(),
                answer: player.current_answer.clone(),
                answered: player.has_answered,
                is_correct: player.round_answer_correct,
                partial_score: player.round_partial_score,
                elapsed_secs: player.answer_elapsed_secs,
                score: player.score,
                streak: player.current_streak,
                multiplier: player.multiplier,
            });
        }

        let scores: HashMap<PlayerId, i64> = st
            .players
            .values()
            .map(|p| (p.id.clone(), p.score))
            .collect();

        self.emit(ServerEvent::QuestionResults {
            correct_answer: correct_answer.clone(),
            results,
        });
        self.emit(ServerEvent::QuestionEnded {
            correct_answer,
            scores,
        });

        if st.mode == GameMode::Survival {
            if let Some(step) = self.survival_liveness(st) {
                return step;
            }
        }
        if st.current_index >= st.total_questions as isize - 1 {
            return NextStep::EndSession;
        }

        self.spawn_next_question_delay();
        NextStep::Continue
    }

    /// Survival: with one or zero players left alive, crown the winner
    /// (if any) and end the session.
    fn survival_liveness(&self, st: &GameState) -> Option<NextStep> {
        let alive = st.alive_ids();
        if alive.len() > 1 {
            return None;
        }
        if let Some(winner) = alive.first() {
            self.emit(ServerEvent::SurvivalWinner {
                player_id: winner.clone(),
            });
        }
        Some(NextStep::EndSession)
    }

    /// Close the wager phase: default missing wagers to 0 and emit the
    /// delayed `question-started` that starts the round proper.
    fn close_wager_phase(self: &Arc<Self>, st: &mut GameState) {
        {
            let mut timers = self.timers.lock().unwrap();
            if let Some(handle) = timers.wager_deadline.take() {
                handle.abort();
            }
        }
        st.wager_phase_active = false;
        for player in st.players.values_mut() {
            if player.wager_percent.is_none() {
                player.wager_percent = Some(0);
            }
        }

        let question = match st.current_question().cloned() {
            Some(question) => question,
            None => return,
        };
        let deadline = self.config.round_deadline(st.mode);
        st.question_started_at = Some(Instant::now());
        st.time_remaining = deadline.unwrap_or(0);

        self.emit_round_start(st, &question, deadline);
        if let Some(deadline) = deadline {
            let epoch = self.round_epoch.load(Ordering::SeqCst);
            self.spawn_round_clock(epoch, deadline);
        }
    }

    fn spawn_round_clock(self: &Arc<Self>, epoch: u64, deadline_secs: u32) {
        let clock = RoundClock::start(Arc::downgrade(self), epoch, deadline_secs);
        let mut timers = self.timers.lock().unwrap();
        if let Some(previous) = timers.round_clock.replace(clock) {
            previous.cancel();
        }
    }

    fn spawn_next_question_delay(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let delay = Duration::from_secs(self.config.next_question_delay_secs);
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            if let Some(engine) = weak.upgrade() {
                engine.advance_round().await;
            }
        });
        let mut timers = self.timers.lock().unwrap();
        if let Some(previous) = timers.next_question.replace(handle) {
            previous.abort();
        }
    }

    fn spawn_wager_deadline(self: &Arc<Self>, epoch: u64) {
        let weak = Arc::downgrade(self);
        let delay = Duration::from_secs(self.config.wager_phase_secs);
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            if let Some(engine) = weak.upgrade() {
                engine.on_wager_deadline(epoch).await;
            }
        });
        let mut timers = self.timers.lock().unwrap();
        if let Some(previous) = timers.wager_deadline.replace(handle) {
            previous.abort();
        }
    }

    fn follow_up(self: &Arc<Self>, step: NextStep) {
        if step == NextStep::EndSession {
            self.trigger_session_end();
        }
    }

    /// The full end-of-session sequence. Every external call is guarded
    /// so that one failure never prevents the later steps; finalization
    /// (timers, registry, lobby deletion) is always attempted.
    async fn run_session_end(self: &Arc<Self>) {
        let (players, session_id, mode_events, total_questions) = {
            let mut st = self.state.lock().await;
            st.is_active = false;
            st.phase = SessionPhase::Final;
            let mode_events = rules_for(st.mode).on_session_end(&mut st);
            let players: Vec<Player> = st
                .roster
                .iter()
                .filter_map(|id| st.players.get(id))
                .cloned()
                .collect();
            (players, st.session_id, mode_events, st.total_questions)
        };

        for event in mode_events {
            self.emit(event);
        }

        let finals: Vec<(Player, i64)> = players
            .into_iter()
            .map(|player| {
                let stats = PlayerStats {
                    correct: player.correct_count,
                    wrong: player.wrong_count,
                    total_questions,
                };
                let total = self.scorer.apply_end_game_bonuses(
                    player.score,
                    player.modifiers.as_ref(),
                    &stats,
                );
                (player, total)
            })
            .collect();

        if let Some(session_id) = session_id {
            let scores: HashMap<PlayerId, i64> = finals
                .iter()
                .map(|(player, total)| (player.id.clone(), *total))
                .collect();
            if let Err(err) = self.storage.close_session(session_id, &scores).await {
                log::warn!("failed to close session record {}: {}", session_id, err);
            }
            for (player, total) in &finals {
                let result = SessionResult {
                    player_id: player.id.clone(),
                    username: player.username.clone(),
                    score: *total,
                    correct_count: player.correct_count,
                    wrong_count: player.wrong_count,
                };
                if let Err(err) = self.storage.record_result(session_id, &result).await {
                    log::warn!("failed to record result for {}: {}", player.id, err);
                }
            }
        }

        let mut standings = Vec::with_capacity(finals.len());
        for (player, total) in &finals {
            let stats = PlayerStats {
                correct: player.correct_count,
                wrong: player.wrong_count,
                total_questions,
            };
            let base_xp = if self.mode == GameMode::Practice {
                0
            } else {
                total / XP_SCORE_DIVISOR + XP_PER_CORRECT * i64::from(player.correct_count)
            };
            let xp = self
                .scorer
                .calculate_modified_xp(base_xp, player.modifiers.as_ref(), &stats);

            let gain = match self.storage.award_experience(&player.id, xp).await {
                Ok(gain) => Some(gain),
                Err(err) => {
                    log::warn!("failed to award XP to {}: {}", player.id, err);
                    None
                }
            };

            standings.push(FinalStanding {
                player_id: player.id.clone(),
                username: player.username.clone(),
                score: *total,
                correct_count: player.correct_count,
                wrong_count: player.wrong_count,
                xp_awarded: xp,
                level_up: gain.as_ref().map(|g| g.level_up).unwrap_or(false),
                old_level: gain
                    .as_ref()
                    .map(|g| g.old_level)
                    .unwrap_or(player.character_level),
                new_level: gain
                    .as_ref()
                    .map(|g| g.new_level)
                    .unwrap_or(player.character_level),
                newly_unlocked_perks: gain
                    .map(|g| g.newly_unlocked_perks)
                    .unwrap_or_default(),
            });
        }
        standings.sort_by(|a, b| b.score.cmp(&a.score));

        self.emit(ServerEvent::GameEnded {
            leaderboard: standings.clone(),
        });
        for standing in standings.iter().filter(|s| s.level_up) {
            self.emit(ServerEvent::PlayerLevelUp {
                player_id: standing.player_id.clone(),
                old_level: standing.old_level,
                new_level: standing.new_level,
                newly_unlocked_perks: standing.newly_unlocked_perks.clone(),
            });
        }
        self.emit(ServerEvent::GameOver {
            scores: standings
                .iter()
                .map(|s| (s.player_id.clone(), s.score))
                .collect(),
        });

        // Finalization: always runs, even after persistence failures.
        self.cancel_all_timers();
        if let Some(registry) = self.registry.upgrade() {
            registry.destroy(&self.lobby_code);
        }
        if let Err(err) = self.storage.delete_lobby(&self.lobby_code).await {
            log::warn!("failed to delete lobby {}: {}", self.lobby_code, err);
        }
        self.emit(ServerEvent::LobbyDeleted {
            lobby_code: self.lobby_code.clone(),
        });

        let mut st = self.state.lock().await;
        st.phase = SessionPhase::Destroyed;
    }

    fn emit(&self, event: ServerEvent) {
        log::debug!("{} -> {}", self.lobby_code, event.tag());
        self.sink.emit(&self.lobby_code, event);
    }
}

/// Releases the per-player submission slot when the submission path
/// unwinds, whichever way it exits.
struct SubmitGuard<'a> {
    slots: &'a StdMutex<HashSet<PlayerId>>,
    player_id: PlayerId,
}

impl<'a> SubmitGuard<'a> {
    fn acquire(
        slots: &'a StdMutex<HashSet<PlayerId>>,
        player_id: &str,
    ) -> Result<SubmitGuard<'a>, GameError> {
        let mut held = slots.lock().unwrap();
        if !held.insert(player_id.to_string()) {
            return Err(GameError::InProgress);
        }
        Ok(SubmitGuard {
            slots,
            player_id: player_id.to_string(),
        })
    }
}

impl Drop for SubmitGuard<'_> {
    fn drop(&mut self) {
        self.slots.lock().unwrap().remove(&self.player_id);
    }
}
