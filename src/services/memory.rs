use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::event::ServerEvent;
use crate::game::state::{GameMode, PlayerId, Question};
use crate::services::*;

/// XP needed per character level.
const XP_PER_LEVEL: i64 = 1000;

/// Perks unlocked at fixed levels by the in-memory progression curve.
const PERK_UNLOCKS: [(u32, &str); 4] = [
    (2, "head_start"),
    (3, "safety_net"),
    (5, "double_or_nothing"),
    (10, "phoenix"),
];

#[derive(Default)]
struct StorageInner {
    lobbies: HashMap<String, LobbyInfo>,
    question_sets: HashMap<i64, Vec<Question>>,
    sessions: HashMap<i64, SessionRecord>,
    next_session_id: i64,
    results: Vec<(i64, SessionResult)>,
    xp: HashMap<PlayerId, i64>,
}

#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub lobby_code: String,
    pub mode: GameMode,
    pub closed: bool,
    pub final_scores: HashMap<PlayerId, i64>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

/// In-memory storage, used by the binary when no backend is wired up
/// and by tests. The `fail_writes` switch makes every write fail, for
/// exercising the engine's non-fatal persistence paths.
#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<StorageInner>,
    fail_writes: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> MemoryStorage {
        MemoryStorage::default()
    }

    pub fn seed_questions(&self, set_id: i64, questions: Vec<Question>) {
        let mut inner = self.inner.lock().unwrap();
        inner.question_sets.insert(set_id, questions);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn session(&self, session_id: i64) -> Option<SessionRecord> {
        self.inner.lock().unwrap().sessions.get(&session_id).cloned()
    }

    pub fn results_for(&self, session_id: i64) -> Vec<SessionResult> {
        self.inner
            .lock()
            .unwrap()
            .results
            .iter()
            .filter(|(id, _)| *id == session_id)
            .map(|(_, r)| r.clone())
            .collect()
    }

    fn write_guard(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("storage writes are failing (test switch)");
        }
        Ok(())
    }
}

fn level_for(xp: i64) -> u32 {
    (1 + xp / XP_PER_LEVEL) as u32
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn lobby(&self, code: &str) -> Result<Option<LobbyInfo>> {
        Ok(self.inner.lock().unwrap().lobbies.get(code).cloned())
    }

    async fn upsert_lobby(&self, lobby: &LobbyInfo) -> Result<()> {
        self.write_guard()?;
        let mut inner = self.inner.lock().unwrap();
        inner.lobbies.insert(lobby.code.clone(), lobby.clone());
        Ok(())
    }

    async fn delete_lobby(&self, code: &str) -> Result<()> {
        self.write_guard()?;
        self.inner.lock().unwrap().lobbies.remove(code);
        Ok(())
    }

    async fn set_lobby_status(&self, code: &str, status: LobbyStatus) -> Result<()> {
        self.write_guard()?;
        let mut inner = self.inner.lock().unwrap();
        if let Some(lobby) = inner.lobbies.get_mut(code) {
            lobby.status = status;
        }
        Ok(())
    }

    async fn set_member_connected(
        &self,
        code: &str,
        player_id: &str,
        connected: bool,
    ) -> Result<()> {
        self.write_guard()?;
        let mut inner = self.inner.lock().unwrap();
        if let Some(member) = inner
            .lobbies
            .get_mut(code)
            .and_then(|l| l.members.iter_mut().find(|m| m.id == player_id))
        {
            member.connected = connected;
        }
        Ok(())
    }

    async fn random_questions(&self, set_ids: &[i64], count: usize) -> Result<Vec<Question>> {
        let inner = self.inner.lock().unwrap();
        let questions: Vec<Question> = set_ids
            .iter()
            .filter_map(|id| inner.question_sets.get(id))
            .flatten()
            .take(count)
            .cloned()
            .collect();
        Ok(questions)
    }

    async fn create_session(&self, lobby_code: &str, mode: GameMode) -> Result<i64> {
        self.write_guard()?;
        let mut inner = self.inner.lock().unwrap();
        inner.next_session_id += 1;
        let id = inner.next_session_id;
        inner.sessions.insert(
            id,
            SessionRecord {
                lobby_code: lobby_code.to_string(),
                mode,
                closed: false,
                final_scores: HashMap::new(),
                started_at: chrono::Utc::now(),
            },
        );
        Ok(id)
    }

    async fn close_session(&self, session_id: i64, scores: &HashMap<PlayerId, i64>) -> Result<()> {
        self.write_guard()?;
        let mut inner = self.inner.lock().unwrap();
        match inner.sessions.get_mut(&session_id) {
            Some(record) => {
                record.closed = true;
                record.final_scores = scores.clone();
                Ok(())
            }
            None => anyhow::bail!("unknown session {}", session_id),
        }
    }

    async fn record_result(&self, session_id: i64, result: &SessionResult) -> Result<()> {
        self.write_guard()?;
        let mut inner = self.inner.lock().unwrap();
        inner.results.push((session_id, result.clone()));
        Ok(())
    }

    async fn award_experience(&self, player_id: &str, xp: i64) -> Result<ExperienceGain> {
        self.write_guard()?;
        let mut inner = self.inner.lock().unwrap();
        let total = inner.xp.entry(player_id.to_string()).or_insert(0);
        let old_level = level_for(*total);
        *total += xp;
        let new_level = level_for(*total);

        let newly_unlocked_perks = PERK_UNLOCKS
            .iter()
            .filter(|(level, _)| *level > old_level && *level <= new_level)
            .map(|(_, perk)| perk.to_string())
            .collect();

        Ok(ExperienceGain {
            xp_awarded: xp,
            level_up: new_level > old_level,
            old_level,
            new_level,
            newly_unlocked_perks,
        })
    }
}

/// In-memory modifier oracle backed by a profile map.
#[derive(Default)]
pub struct MemoryOracle {
    profiles: Mutex<HashMap<PlayerId, PlayerProfile>>,
    fail_lookups: AtomicBool,
}

impl MemoryOracle {
    pub fn new() -> MemoryOracle {
        MemoryOracle::default()
    }

    pub fn set_profile(&self, player_id: impl Into<PlayerId>, profile: PlayerProfile) {
        self.profiles.lock().unwrap().insert(player_id.into(), profile);
    }

    pub fn set_fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ModifierOracle for MemoryOracle {
    async fn player_profile(&self, player_id: &str) -> Result<PlayerProfile> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            anyhow::bail!("oracle lookups are failing (test switch)");
        }
        Ok(self
            .profiles
            .lock()
            .unwrap()
            .get(player_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Event sink that records everything it sees, in emission order.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(String, ServerEvent)>>,
}

impl RecordingSink {
    pub fn new() -> RecordingSink {
        RecordingSink::default()
    }

    pub fn all(&self) -> Vec<(String, ServerEvent)> {
        self.events.lock().unwrap().clone()
    }

    pub fn for_lobby(&self, lobby_code: &str) -> Vec<ServerEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(code, _)| code == lobby_code)
            .map(|(_, ev)| ev.clone())
            .collect()
    }

    pub fn count_of(&self, lobby_code: &str, tag: &str) -> usize {
        self.for_lobby(lobby_code)
            .iter()
            .filter(|ev| ev.tag() == tag)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, lobby_code: &str, event: ServerEvent) {
        self.events
            .lock()
            .unwrap()
            .push((lobby_code.to_string(), event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn experience_awards_track_levels_and_unlocks() {
        let storage = MemoryStorage::new();
        let gain = storage.award_experience("p1", 900).await.unwrap();
        assert!(!gain.level_up);
        assert_eq!(gain.new_level, 1);

        let gain = storage.award_experience("p1", 1200).await.unwrap();
        assert!(gain.level_up);
        assert_eq!(gain.old_level, 1);
        assert_eq!(gain.new_level, 3);
        assert_eq!(
            gain.newly_unlocked_perks,
            vec!["head_start".to_string(), "safety_net".to_string()]
        );
    }

    #[tokio::test]
    async fn failing_writes_surface_as_errors() {
        let storage = MemoryStorage::new();
        storage.set_fail_writes(true);
        assert!(storage.create_session("ROOM1", GameMode::Arcade).await.is_err());
    }
}
