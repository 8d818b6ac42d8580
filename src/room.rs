//! Room coordination: membership, the camera-readiness barrier that gates
//! game start, and at-most-once score persistence at game end.
//!
//! All room state lives behind the registry; there are no ambient globals.
//! Every event takes the room lock exactly once, so the readiness barrier
//! and the persistence gate are each evaluated against a single consistent
//! snapshot: two racing start requests cannot both observe the barrier as
//! newly satisfied, and two racing end signals cannot both pass the gate.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::persistence::GameStore;

pub type UserId = String;

pub const ROOM_CODE_LEN: usize = 6;
pub const MAX_PARTICIPANTS: usize = 30;

const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameConfig {
    pub game_type: String,
    #[serde(default = "default_duration")]
    pub duration_secs: u32,
    #[serde(default)]
    pub gamemode_index: Option<u32>,
    #[serde(default = "default_material")]
    pub learning_material: String,
}

fn default_duration() -> u32 {
    30
}

fn default_material() -> String {
    "alphabet".to_string()
}

#[derive(Clone, Debug, Serialize)]
pub struct CameraStatus {
    pub username: String,
    pub ready: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub name: String,
    pub message: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoomError {
    #[error("room {0} does not exist")]
    NotFound(String),
    #[error("room {0} is full (max {MAX_PARTICIPANTS} participants)")]
    Full(String),
    #[error("game already in progress in room {0}")]
    GameInProgress(String),
}

/// Camera-readiness tally broadcast to a room after membership or camera
/// changes.
#[derive(Clone, Debug)]
pub struct ReadinessTally {
    pub ready: usize,
    pub total: usize,
    pub all_ready: bool,
}

#[derive(Clone, Debug)]
pub struct JoinOutcome {
    pub participants: Vec<String>,
    pub tally: ReadinessTally,
    pub game: Option<GameConfig>,
    pub recipients: Vec<UserId>,
}

#[derive(Clone, Debug)]
pub enum LeaveOutcome {
    /// The user was not in this room (or the room is gone); nothing to do.
    NotAMember,
    /// The creator left: the whole room shuts down.
    RoomClosed {
        reason: String,
        recipients: Vec<UserId>,
    },
    /// An ordinary member left.
    Left {
        participants: Vec<String>,
        tally: ReadinessTally,
        recipients: Vec<UserId>,
        room_destroyed: bool,
    },
}

#[derive(Clone, Debug)]
pub enum StartDecision {
    Started { recipients: Vec<UserId> },
    /// Barrier not satisfied; only the requester hears about it.
    NotReady { ready: usize, total: usize },
}

#[derive(Clone, Debug, Default)]
pub struct EndOutcome {
    /// Scores were flushed to the store by this event.
    pub persisted: bool,
    /// Scores accumulated so far (including this event's).
    pub scores_received: usize,
}

struct Room {
    code: String,
    creator_id: UserId,
    creator_participates: bool,
    participants: Vec<String>,
    camera: HashMap<UserId, CameraStatus>,
    game: Option<GameConfig>,
    ongoing: bool,
    scores: HashMap<UserId, i64>,
    scores_saved: bool,
    instance_id: Option<String>,
    messages: Vec<ChatMessage>,
}

impl Room {
    fn new(code: String, creator_id: UserId) -> Self {
        Self {
            code,
            creator_id,
            creator_participates: true,
            participants: Vec::new(),
            camera: HashMap::new(),
            game: None,
            ongoing: false,
            scores: HashMap::new(),
            scores_saved: false,
            instance_id: None,
            messages: Vec::new(),
        }
    }

    fn members(&self) -> usize {
        self.camera.len()
    }

    fn member_ids(&self) -> Vec<UserId> {
        self.camera.keys().cloned().collect()
    }

    fn tally(&self) -> ReadinessTally {
        let total = self.members();
        let ready = self.camera.values().filter(|s| s.ready).count();
        ReadinessTally {
            ready,
            total,
            all_ready: total > 0 && ready == total,
        }
    }
}

pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Arc<Mutex<Room>>>>,
    store: Arc<dyn GameStore>,
}

impl RoomRegistry {
    pub fn new(store: Arc<dyn GameStore>) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            store,
        }
    }

    /// Create a room owned by `creator_id` and return its code. Codes are
    /// unique among currently-live rooms only; a destroyed room's code may
    /// be handed out again.
    pub fn create_room(&self, creator_id: &str) -> String {
        let mut rooms = self.rooms.write();
        let code = loop {
            let candidate = random_code();
            if !rooms.contains_key(&candidate) {
                break candidate;
            }
        };
        rooms.insert(
            code.clone(),
            Arc::new(Mutex::new(Room::new(code.clone(), creator_id.to_string()))),
        );
        log::info!("room {code} created by {creator_id}");
        code
    }

    pub fn room_exists(&self, code: &str) -> bool {
        self.rooms.read().contains_key(code)
    }

    fn get(&self, code: &str) -> Option<Arc<Mutex<Room>>> {
        self.rooms.read().get(code).cloned()
    }

    fn destroy(&self, code: &str) {
        if self.rooms.write().remove(code).is_some() {
            log::info!("room {code} destroyed");
        }
    }

    pub fn join(&self, code: &str, user_id: &str, name: &str) -> Result<JoinOutcome, RoomError> {
        let room = self
            .get(code)
            .ok_or_else(|| RoomError::NotFound(code.to_string()))?;
        let mut room = room.lock();

        if room.ongoing {
            return Err(RoomError::GameInProgress(code.to_string()));
        }
        let already_member = room.camera.contains_key(user_id);
        if !already_member && room.members() >= MAX_PARTICIPANTS {
            return Err(RoomError::Full(code.to_string()));
        }

        if !room.participants.iter().any(|p| p == name) {
            room.participants.push(name.to_string());
        }
        room.camera.insert(
            user_id.to_string(),
            CameraStatus {
                username: name.to_string(),
                ready: false,
            },
        );

        Ok(JoinOutcome {
            participants: room.participants.clone(),
            tally: room.tally(),
            game: room.game.clone(),
            recipients: room.member_ids(),
        })
    }

    /// Handle an explicit leave or a disconnect; the two are equivalent for
    /// room state. The creator leaving tears the room down for everyone.
    pub fn leave(&self, code: &str, user_id: &str) -> LeaveOutcome {
        let Some(room) = self.get(code) else {
            return LeaveOutcome::NotAMember;
        };
        let mut room = room.lock();

        if room.creator_id == user_id {
            let recipients = room.member_ids();
            let reason = "Room has been closed by its creator".to_string();
            drop(room);
            self.destroy(code);
            return LeaveOutcome::RoomClosed { reason, recipients };
        }

        let Some(status) = room.camera.remove(user_id) else {
            return LeaveOutcome::NotAMember;
        };
        room.participants.retain(|p| *p != status.username);

        let destroyed = room.members() == 0;
        let outcome = LeaveOutcome::Left {
            participants: room.participants.clone(),
            tally: room.tally(),
            recipients: room.member_ids(),
            room_destroyed: destroyed,
        };
        drop(room);
        if destroyed {
            self.destroy(code);
        }
        outcome
    }

    /// Flip one member's camera-readiness flag and return the new tally.
    pub fn set_camera_ready(
        &self,
        code: &str,
        user_id: &str,
        ready: bool,
    ) -> Option<(ReadinessTally, Vec<UserId>)> {
        let room = self.get(code)?;
        let mut room = room.lock();
        let status = room.camera.get_mut(user_id)?;
        status.ready = ready;
        Some((room.tally(), room.member_ids()))
    }

    pub fn configure_game(
        &self,
        code: &str,
        config: GameConfig,
    ) -> Option<(GameConfig, Vec<UserId>)> {
        let room = self.get(code)?;
        let mut room = room.lock();
        log::info!(
            "room {code}: game set to {} ({})",
            config.game_type,
            config.learning_material
        );
        room.game = Some(config.clone());
        Some((config, room.member_ids()))
    }

    pub fn set_learning_material(&self, code: &str, material: &str) {
        let Some(room) = self.get(code) else { return };
        let mut room = room.lock();
        if let Some(game) = room.game.as_mut() {
            game.learning_material = material.to_string();
        } else {
            room.game = Some(GameConfig {
                game_type: String::new(),
                duration_secs: default_duration(),
                gamemode_index: None,
                learning_material: material.to_string(),
            });
        }
    }

    pub fn set_creator_participation(&self, code: &str, user_id: &str, participates: bool) {
        let Some(room) = self.get(code) else { return };
        let mut room = room.lock();
        if room.creator_id == user_id {
            room.creator_participates = participates;
        }
    }

    /// Evaluate the readiness barrier and start the game when it holds.
    /// Everything (barrier check, flag flips, instance creation) happens
    /// under one lock acquisition so concurrent requests cannot both start
    /// the same game.
    pub fn start_game(&self, code: &str, user_id: &str) -> Result<StartDecision, RoomError> {
        let room = self
            .get(code)
            .ok_or_else(|| RoomError::NotFound(code.to_string()))?;
        let mut room = room.lock();

        let tally = room.tally();
        if !tally.all_ready {
            return Ok(StartDecision::NotReady {
                ready: tally.ready,
                total: tally.total,
            });
        }

        room.ongoing = true;
        room.scores_saved = false;
        room.scores.clear();

        let config = room.game.clone().unwrap_or_else(|| GameConfig {
            game_type: "Unknown".to_string(),
            duration_secs: default_duration(),
            gamemode_index: None,
            learning_material: default_material(),
        });
        match self.store.create_game_instance(
            &room.code,
            &config,
            room.participants.len(),
            &room.creator_id,
        ) {
            Ok(instance_id) => room.instance_id = Some(instance_id),
            // Best effort: the in-memory game goes ahead regardless.
            Err(err) => log::warn!("failed to persist game instance for {code}: {err:?}"),
        }

        log::info!("game started in room {code} by {user_id}");
        Ok(StartDecision::Started {
            recipients: room.member_ids(),
        })
    }

    /// Record an end-of-game signal. Scores accumulate last-write-wins per
    /// user; persistence fires at most once per instance, once every
    /// current participant has reported.
    pub fn end_game(&self, code: &str, user_id: &str, final_score: Option<i64>) -> EndOutcome {
        let Some(room) = self.get(code) else {
            return EndOutcome::default();
        };
        let mut room = room.lock();
        room.ongoing = false;

        if let Some(score) = final_score {
            room.scores.insert(user_id.to_string(), score);
        }

        let persisted = self.try_persist_scores(&mut room);
        EndOutcome {
            persisted,
            scores_received: room.scores.len(),
        }
    }

    /// The persistence gate. Caller holds the room lock, so the check and
    /// the flag flip are atomic with respect to other end signals.
    fn try_persist_scores(&self, room: &mut Room) -> bool {
        if room.scores_saved {
            return false;
        }
        if room.scores.len() < room.participants.len() || room.scores.is_empty() {
            log::debug!(
                "room {}: waiting for scores ({}/{})",
                room.code,
                room.scores.len(),
                room.participants.len()
            );
            return false;
        }

        let Some(instance_id) = room.instance_id.clone() else {
            log::warn!("room {}: no game instance recorded, dropping scores", room.code);
            room.scores_saved = true;
            room.scores.clear();
            return false;
        };

        for (user_id, score) in &room.scores {
            if *user_id == room.creator_id && !room.creator_participates {
                log::debug!("room {}: creator opted out, skipping score", room.code);
                continue;
            }
            if let Err(err) = self.store.record_score(user_id, &instance_id, *score) {
                log::warn!("failed to persist score for {user_id}: {err:?}");
            }
        }

        room.scores_saved = true;
        room.scores.clear();
        log::info!("room {}: scores persisted for {instance_id}", room.code);
        true
    }

    /// Current member ids of a room, for egress routing.
    pub fn members(&self, code: &str) -> Vec<UserId> {
        self.get(code)
            .map(|room| room.lock().member_ids())
            .unwrap_or_default()
    }

    pub fn append_chat(&self, code: &str, name: &str, message: &str) -> Option<Vec<UserId>> {
        let room = self.get(code)?;
        let mut room = room.lock();
        room.messages.push(ChatMessage {
            name: name.to_string(),
            message: message.to_string(),
        });
        Some(room.member_ids())
    }

    #[cfg(test)]
    fn with_room<T>(&self, code: &str, f: impl FnOnce(&Room) -> T) -> Option<T> {
        let room = self.get(code)?;
        let room = room.lock();
        Some(f(&room))
    }
}

fn random_code() -> String {
    let mut rng = rand::thread_rng();
    (0..ROOM_CODE_LEN)
        .map(|_| ROOM_CODE_ALPHABET[rng.gen_range(0..ROOM_CODE_ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;

    fn registry() -> (RoomRegistry, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::default());
        (RoomRegistry::new(store.clone()), store)
    }

    fn game_config() -> GameConfig {
        GameConfig {
            game_type: "guess-the-sign".to_string(),
            duration_secs: 60,
            gamemode_index: Some(1),
            learning_material: "words".to_string(),
        }
    }

    /// Set up a room with the creator (u1) and two members, all joined.
    fn three_member_room(registry: &RoomRegistry) -> String {
        let code = registry.create_room("u1");
        registry.join(&code, "u1", "alice").unwrap();
        registry.join(&code, "u2", "bob").unwrap();
        registry.join(&code, "u3", "cara").unwrap();
        code
    }

    #[test]
    fn room_codes_use_fixed_alphabet_and_length() {
        for _ in 0..50 {
            let code = random_code();
            assert_eq!(code.len(), ROOM_CODE_LEN);
            assert!(code.bytes().all(|b| b.is_ascii_uppercase()));
        }
    }

    #[test]
    fn codes_unique_among_live_rooms() {
        let (registry, _) = registry();
        let mut codes = std::collections::HashSet::new();
        for _ in 0..20 {
            assert!(codes.insert(registry.create_room("u1")));
        }
    }

    #[test]
    fn join_updates_participants_and_tally() {
        let (registry, _) = registry();
        let code = registry.create_room("u1");
        let outcome = registry.join(&code, "u1", "alice").unwrap();
        assert_eq!(outcome.participants, vec!["alice"]);
        assert_eq!(outcome.tally.total, 1);
        assert_eq!(outcome.tally.ready, 0);

        let outcome = registry.join(&code, "u2", "bob").unwrap();
        assert_eq!(outcome.participants, vec!["alice", "bob"]);
        assert_eq!(outcome.tally.total, 2);
        assert!(!outcome.tally.all_ready);
    }

    #[test]
    fn join_unknown_room_fails() {
        let (registry, _) = registry();
        assert_eq!(
            registry.join("ZZZZZZ", "u1", "alice").unwrap_err(),
            RoomError::NotFound("ZZZZZZ".to_string())
        );
    }

    #[test]
    fn join_rejected_when_full() {
        let (registry, _) = registry();
        let code = registry.create_room("u0");
        for i in 0..MAX_PARTICIPANTS {
            registry
                .join(&code, &format!("u{i}"), &format!("user{i}"))
                .unwrap();
        }
        assert_eq!(
            registry.join(&code, "late", "late").unwrap_err(),
            RoomError::Full(code.clone())
        );
        // An existing member may still re-join.
        assert!(registry.join(&code, "u3", "user3").is_ok());
    }

    #[test]
    fn join_rejected_while_game_ongoing() {
        let (registry, _) = registry();
        let code = three_member_room(&registry);
        for user in ["u1", "u2", "u3"] {
            registry.set_camera_ready(&code, user, true);
        }
        registry.start_game(&code, "u1").unwrap();
        assert_eq!(
            registry.join(&code, "u4", "dave").unwrap_err(),
            RoomError::GameInProgress(code.clone())
        );
    }

    #[test]
    fn barrier_rejects_until_everyone_ready() {
        let (registry, store) = registry();
        let code = three_member_room(&registry);

        registry.set_camera_ready(&code, "u1", true);
        registry.set_camera_ready(&code, "u2", true);

        match registry.start_game(&code, "u1").unwrap() {
            StartDecision::NotReady { ready, total } => {
                assert_eq!((ready, total), (2, 3));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
        assert_eq!(store.instance_count(), 0);

        registry.set_camera_ready(&code, "u3", true);
        match registry.start_game(&code, "u1").unwrap() {
            StartDecision::Started { recipients } => assert_eq!(recipients.len(), 3),
            other => panic!("expected start, got {other:?}"),
        }
        assert_eq!(store.instance_count(), 1);
    }

    #[test]
    fn barrier_requires_at_least_one_member() {
        let (registry, _) = registry();
        let code = registry.create_room("u1");
        match registry.start_game(&code, "u1").unwrap() {
            StartDecision::NotReady { ready, total } => assert_eq!((ready, total), (0, 0)),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn camera_stopped_retracts_readiness() {
        let (registry, _) = registry();
        let code = three_member_room(&registry);
        registry.set_camera_ready(&code, "u2", true);
        let (tally, _) = registry.set_camera_ready(&code, "u2", false).unwrap();
        assert_eq!(tally.ready, 0);
    }

    #[test]
    fn scores_persist_exactly_once_with_overwrites() {
        let (registry, store) = registry();
        let code = three_member_room(&registry);
        registry.configure_game(&code, game_config());
        for user in ["u1", "u2", "u3"] {
            registry.set_camera_ready(&code, user, true);
        }
        registry.start_game(&code, "u1").unwrap();

        let out = registry.end_game(&code, "u1", Some(10));
        assert!(!out.persisted);
        let out = registry.end_game(&code, "u2", Some(20));
        assert!(!out.persisted);
        assert_eq!(out.scores_received, 2);

        // u1 ends again: overwrite, not append, and still no persistence.
        let out = registry.end_game(&code, "u1", Some(15));
        assert!(!out.persisted);
        assert_eq!(out.scores_received, 2);
        assert_eq!(store.score_count(), 0);

        let out = registry.end_game(&code, "u3", Some(5));
        assert!(out.persisted);
        assert_eq!(store.instance_count(), 1);

        let mut scores = store.scores.lock().clone();
        scores.sort();
        let flat: Vec<(String, i64)> = scores.iter().map(|(u, _, s)| (u.clone(), *s)).collect();
        assert_eq!(
            flat,
            vec![
                ("u1".to_string(), 15),
                ("u2".to_string(), 20),
                ("u3".to_string(), 5)
            ]
        );

        // A duplicate end signal after the flush is an idempotent no-op.
        let out = registry.end_game(&code, "u2", Some(99));
        assert!(!out.persisted);
        assert_eq!(store.score_count(), 3);
    }

    #[test]
    fn creator_opt_out_excludes_their_score() {
        let (registry, store) = registry();
        let code = three_member_room(&registry);
        registry.configure_game(&code, game_config());
        registry.set_creator_participation(&code, "u1", false);
        for user in ["u1", "u2", "u3"] {
            registry.set_camera_ready(&code, user, true);
        }
        registry.start_game(&code, "u1").unwrap();

        registry.end_game(&code, "u1", Some(1));
        registry.end_game(&code, "u2", Some(2));
        let out = registry.end_game(&code, "u3", Some(3));
        assert!(out.persisted);
        assert_eq!(store.score_count(), 2);
        assert!(store.scores.lock().iter().all(|(u, _, _)| u != "u1"));
    }

    #[test]
    fn only_creator_can_opt_out() {
        let (registry, _) = registry();
        let code = three_member_room(&registry);
        registry.set_creator_participation(&code, "u2", false);
        assert!(registry
            .with_room(&code, |room| room.creator_participates)
            .unwrap());
    }

    #[test]
    fn restart_resets_the_persistence_gate() {
        let (registry, store) = registry();
        let code = three_member_room(&registry);
        registry.configure_game(&code, game_config());
        for user in ["u1", "u2", "u3"] {
            registry.set_camera_ready(&code, user, true);
        }
        registry.start_game(&code, "u1").unwrap();
        for (user, score) in [("u1", 1), ("u2", 2), ("u3", 3)] {
            registry.end_game(&code, user, Some(score));
        }
        assert_eq!(store.score_count(), 3);

        // Second round in the same room persists again, exactly once.
        registry.start_game(&code, "u1").unwrap();
        for (user, score) in [("u1", 4), ("u2", 5), ("u3", 6)] {
            registry.end_game(&code, user, Some(score));
        }
        assert_eq!(store.instance_count(), 2);
        assert_eq!(store.score_count(), 6);
    }

    #[test]
    fn creator_leave_destroys_room() {
        let (registry, _) = registry();
        let code = three_member_room(&registry);
        match registry.leave(&code, "u1") {
            LeaveOutcome::RoomClosed { recipients, .. } => assert_eq!(recipients.len(), 3),
            other => panic!("expected RoomClosed, got {other:?}"),
        }
        assert!(!registry.room_exists(&code));
    }

    #[test]
    fn member_leave_updates_tally_and_last_out_destroys() {
        let (registry, _) = registry();
        let code = registry.create_room("u1");
        registry.join(&code, "u2", "bob").unwrap();
        registry.join(&code, "u3", "cara").unwrap();
        registry.set_camera_ready(&code, "u2", true);
        registry.set_camera_ready(&code, "u3", true);

        match registry.leave(&code, "u2") {
            LeaveOutcome::Left {
                participants,
                tally,
                room_destroyed,
                ..
            } => {
                assert_eq!(participants, vec!["cara"]);
                assert_eq!(tally.ready, 1);
                assert!(!room_destroyed);
            }
            other => panic!("expected Left, got {other:?}"),
        }

        match registry.leave(&code, "u3") {
            LeaveOutcome::Left { room_destroyed, .. } => assert!(room_destroyed),
            other => panic!("expected Left, got {other:?}"),
        }
        assert!(!registry.room_exists(&code));
    }

    #[test]
    fn leave_twice_is_harmless() {
        let (registry, _) = registry();
        let code = registry.create_room("u1");
        registry.join(&code, "u2", "bob").unwrap();
        registry.leave(&code, "u2");
        assert!(matches!(
            registry.leave(&code, "u2"),
            LeaveOutcome::NotAMember
        ));
    }

    #[test]
    fn joiner_receives_existing_game_config() {
        let (registry, _) = registry();
        let code = registry.create_room("u1");
        registry.join(&code, "u1", "alice").unwrap();
        registry.configure_game(&code, game_config());
        let outcome = registry.join(&code, "u2", "bob").unwrap();
        assert_eq!(outcome.game.unwrap().game_type, "guess-the-sign");
    }

    #[test]
    fn chat_is_logged_and_routed() {
        let (registry, _) = registry();
        let code = three_member_room(&registry);
        let recipients = registry.append_chat(&code, "alice", "hello").unwrap();
        assert_eq!(recipients.len(), 3);
        let count = registry
            .with_room(&code, |room| room.messages.len())
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn persistence_failure_leaves_room_usable() {
        struct FailingStore;
        impl GameStore for FailingStore {
            fn create_game_instance(
                &self,
                _: &str,
                _: &GameConfig,
                _: usize,
                _: &str,
            ) -> anyhow::Result<String> {
                anyhow::bail!("datastore offline")
            }
            fn record_score(&self, _: &str, _: &str, _: i64) -> anyhow::Result<()> {
                anyhow::bail!("datastore offline")
            }
        }

        let registry = RoomRegistry::new(Arc::new(FailingStore));
        let code = registry.create_room("u1");
        registry.join(&code, "u1", "alice").unwrap();
        registry.set_camera_ready(&code, "u1", true);

        // Start succeeds in memory even though the store call failed.
        assert!(matches!(
            registry.start_game(&code, "u1").unwrap(),
            StartDecision::Started { .. }
        ));
        // End-of-game cannot flush without an instance id; the room stays
        // consistent and the gate closes instead of retrying forever.
        let out = registry.end_game(&code, "u1", Some(7));
        assert!(!out.persisted);
        assert!(registry.room_exists(&code));
    }
}
