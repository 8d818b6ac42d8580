//! Transport-agnostic event surface. Whatever delivers these (websocket,
//! local bridge, test harness) is out of scope; the core only sees tagged
//! payloads.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::room::GameConfig;
use crate::types::Frame;

/// Events a connected client may send, one per tick.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    CreateRoom,
    JoinRoom { room: String },
    LeaveRoom,
    CameraReady,
    CameraStopped,
    ConfigureGame { config: GameConfig },
    SetLearningMaterial { material: String },
    CreatorParticipation { participates: bool },
    StartGame,
    Frame { frame: Frame },
    EndGame {
        #[serde(default)]
        final_score: Option<i64>,
    },
    ScoreUpdate { score: i64 },
    Chat { message: String },
    GetSupportedSigns,
    Disconnect,
}

/// Events the core emits back, either to one client or broadcast to a room.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Status {
        message: String,
        model_loaded: bool,
    },
    RoomCreated {
        room: String,
    },
    ParticipantsUpdated {
        participants: Vec<String>,
    },
    CameraTally {
        ready: usize,
        total: usize,
        all_ready: bool,
    },
    GameConfigured {
        config: GameConfig,
    },
    GameStarted,
    CollectingProgress {
        buffer_size: usize,
        target: usize,
    },
    PredictionResult {
        label: String,
        confidence: f32,
        processing_time_ms: f64,
        buffer_size: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        probabilities: Option<HashMap<String, f32>>,
    },
    NoHands,
    LeaderboardUpdate {
        username: String,
        score: i64,
    },
    Chat {
        name: String,
        message: String,
    },
    SupportedSigns {
        signs: Vec<String>,
    },
    RoomClosed {
        reason: String,
    },
    Error {
        message: String,
    },
}
