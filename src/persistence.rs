//! Seam to the external datastore. The coordinator only ever calls through
//! this trait; failures are logged and never roll back in-memory room
//! state. The store is expected to be driven at-most-once per game
//! instance by the coordinator's persistence gate.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::room::GameConfig;

pub trait GameStore: Send + Sync {
    /// Record that a game instance started in a room; returns an instance id.
    fn create_game_instance(
        &self,
        room_code: &str,
        config: &GameConfig,
        total_participants: usize,
        creator_id: &str,
    ) -> anyhow::Result<String>;

    /// Record one participant's final score for an instance.
    fn record_score(&self, user_id: &str, instance_id: &str, score: i64) -> anyhow::Result<()>;
}

/// Store used when no real backend is wired up: logs and hands out
/// synthetic instance ids.
#[derive(Default)]
pub struct NoopStore {
    counter: AtomicU64,
}

impl GameStore for NoopStore {
    fn create_game_instance(
        &self,
        room_code: &str,
        config: &GameConfig,
        total_participants: usize,
        _creator_id: &str,
    ) -> anyhow::Result<String> {
        let id = format!("instance-{}", self.counter.fetch_add(1, Ordering::Relaxed));
        log::info!(
            "game instance {id} started in room {room_code}: {} for {}s, {total_participants} players",
            config.game_type,
            config.duration_secs
        );
        Ok(id)
    }

    fn record_score(&self, user_id: &str, instance_id: &str, score: i64) -> anyhow::Result<()> {
        log::info!("score {score} for user {user_id} in {instance_id}");
        Ok(())
    }
}

/// In-memory store that records every call; used by tests and the
/// evaluation harness to observe persistence behavior.
#[derive(Default)]
pub struct MemoryStore {
    counter: AtomicU64,
    pub instances: Mutex<Vec<String>>,
    pub scores: Mutex<Vec<(String, String, i64)>>,
}

impl MemoryStore {
    pub fn instance_count(&self) -> usize {
        self.instances.lock().len()
    }

    pub fn score_count(&self) -> usize {
        self.scores.lock().len()
    }
}

impl GameStore for MemoryStore {
    fn create_game_instance(
        &self,
        room_code: &str,
        _config: &GameConfig,
        _total_participants: usize,
        _creator_id: &str,
    ) -> anyhow::Result<String> {
        let id = format!(
            "{room_code}-{}",
            self.counter.fetch_add(1, Ordering::Relaxed)
        );
        self.instances.lock().push(id.clone());
        Ok(id)
    }

    fn record_score(&self, user_id: &str, instance_id: &str, score: i64) -> anyhow::Result<()> {
        self.scores
            .lock()
            .push((user_id.to_string(), instance_id.to_string(), score));
        Ok(())
    }
}
