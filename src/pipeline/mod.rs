//! Event pipeline: one worker thread per connected client, a shared room
//! registry, and the inference pool.
//!
//! Per-user session state is owned by that user's worker thread and never
//! shared, so the hot per-frame path takes no locks. Only room events touch
//! shared state, through the registry's per-room locking.

mod inference;

pub use inference::{InferenceHandle, start_inference_pool};

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::RwLock;

use crate::classifier::{ClassifyError, ModelArtifact};
use crate::config::Config;
use crate::events::{ClientEvent, ServerEvent};
use crate::features::FeatureExtractor;
use crate::persistence::GameStore;
use crate::room::{JoinOutcome, LeaveOutcome, RoomRegistry, StartDecision, UserId};
use crate::session::{FrameStep, StreamingSession};

/// Signs offered when no artifact is loaded, mirroring the trained set.
const FALLBACK_SIGNS: [&str; 12] = [
    "Blue",
    "Green",
    "Hi-Hello",
    "Orange",
    "Red",
    "Yellow",
    "Grandmother",
    "Shy",
    "Sad",
    "Apple",
    "Who",
    "Which",
];

pub struct Hub {
    config: Config,
    registry: Arc<RoomRegistry>,
    inference: Option<InferenceHandle>,
    supported_signs: Vec<String>,
    clients: Arc<RwLock<HashMap<UserId, Sender<ServerEvent>>>>,
}

/// Handle to one connected client's worker. Dropping the event sender (or
/// sending `Disconnect`) tears the session down.
pub struct ClientHandle {
    pub events: Sender<ClientEvent>,
    join: Option<thread::JoinHandle<()>>,
}

impl ClientHandle {
    /// Wait for the worker to finish draining and exit.
    pub fn shutdown(mut self) {
        let _ = self.events.send(ClientEvent::Disconnect);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Hub {
    /// Build the hub. A missing artifact is not fatal: classification
    /// degrades to model-unavailable results while rooms keep working.
    pub fn new(
        config: Config,
        artifact: Option<ModelArtifact>,
        store: Arc<dyn GameStore>,
    ) -> Self {
        let (inference, supported_signs) = match &artifact {
            Some(artifact) => {
                let handle = match start_inference_pool(
                    artifact,
                    config.pipeline.inference_workers,
                    config.pipeline.request_queue,
                ) {
                    Ok(handle) => Some(handle),
                    Err(err) => {
                        log::error!("inference pool unavailable: {err:?}");
                        None
                    }
                };
                (handle, artifact.class_names().to_vec())
            }
            None => {
                log::warn!("no classifier artifact loaded; predictions degrade to unavailable");
                (
                    None,
                    FALLBACK_SIGNS.iter().map(|s| s.to_string()).collect(),
                )
            }
        };

        Self {
            config,
            registry: Arc::new(RoomRegistry::new(store)),
            inference,
            supported_signs,
            clients: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn model_loaded(&self) -> bool {
        self.inference.is_some()
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    /// Register a client and spawn its worker thread. `egress` receives
    /// every event addressed to this user; a full egress queue drops rather
    /// than stalling the pipeline.
    pub fn connect(&self, user_id: &str, username: &str, egress: Sender<ServerEvent>) -> ClientHandle {
        let (event_tx, event_rx) = bounded(self.config.pipeline.event_queue);
        self.clients
            .write()
            .insert(user_id.to_string(), egress.clone());

        let worker = ClientWorker {
            user_id: user_id.to_string(),
            username: username.to_string(),
            registry: Arc::clone(&self.registry),
            inference: self.inference.clone(),
            clients: Arc::clone(&self.clients),
            supported_signs: self.supported_signs.clone(),
            session: StreamingSession::new(self.config.session.clone()),
            extractor: FeatureExtractor::new(),
            room: None,
            model_loaded: self.inference.is_some(),
        };

        let _ = egress.try_send(ServerEvent::Status {
            message: "Connected - server processing available".to_string(),
            model_loaded: self.model_loaded(),
        });

        let join = thread::spawn(move || worker.run(event_rx));

        ClientHandle {
            events: event_tx,
            join: Some(join),
        }
    }
}

struct ClientWorker {
    user_id: UserId,
    username: String,
    registry: Arc<RoomRegistry>,
    inference: Option<InferenceHandle>,
    clients: Arc<RwLock<HashMap<UserId, Sender<ServerEvent>>>>,
    supported_signs: Vec<String>,
    session: StreamingSession,
    extractor: FeatureExtractor,
    room: Option<String>,
    model_loaded: bool,
}

impl ClientWorker {
    fn run(mut self, events: Receiver<ClientEvent>) {
        while let Ok(event) = events.recv() {
            if matches!(event, ClientEvent::Disconnect) {
                break;
            }
            self.handle(event);
        }
        // Channel closed or explicit disconnect: same cleanup either way.
        self.disconnect();
    }

    fn handle(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::CreateRoom => {
                let code = self.registry.create_room(&self.user_id);
                self.send_self(ServerEvent::RoomCreated { room: code });
            }
            ClientEvent::JoinRoom { room } => self.join_room(room),
            ClientEvent::LeaveRoom => self.leave_room(),
            ClientEvent::CameraReady => self.set_camera(true),
            ClientEvent::CameraStopped => self.set_camera(false),
            ClientEvent::ConfigureGame { config } => {
                let Some(code) = self.room.clone() else { return };
                if let Some((config, recipients)) = self.registry.configure_game(&code, config) {
                    self.broadcast(&recipients, ServerEvent::GameConfigured { config });
                }
            }
            ClientEvent::SetLearningMaterial { material } => {
                if let Some(code) = self.room.clone() {
                    self.registry.set_learning_material(&code, &material);
                }
            }
            ClientEvent::CreatorParticipation { participates } => {
                if let Some(code) = self.room.clone() {
                    self.registry
                        .set_creator_participation(&code, &self.user_id, participates);
                }
            }
            ClientEvent::StartGame => self.start_game(),
            ClientEvent::Frame { frame } => self.process_frame(frame),
            ClientEvent::EndGame { final_score } => {
                if let Some(code) = self.room.clone() {
                    self.registry.end_game(&code, &self.user_id, final_score);
                }
            }
            ClientEvent::ScoreUpdate { score } => {
                let Some(code) = self.room.clone() else { return };
                let recipients = self.registry.members(&code);
                self.broadcast(
                    &recipients,
                    ServerEvent::LeaderboardUpdate {
                        username: self.username.clone(),
                        score,
                    },
                );
            }
            ClientEvent::Chat { message } => {
                let Some(code) = self.room.clone() else { return };
                if let Some(recipients) = self.registry.append_chat(&code, &self.username, &message)
                {
                    self.broadcast(
                        &recipients,
                        ServerEvent::Chat {
                            name: self.username.clone(),
                            message,
                        },
                    );
                }
            }
            ClientEvent::GetSupportedSigns => {
                self.send_self(ServerEvent::SupportedSigns {
                    signs: self.supported_signs.clone(),
                });
            }
            // Terminal events are intercepted by run() before dispatch.
            ClientEvent::Disconnect => {}
        }
    }

    fn join_room(&mut self, code: String) {
        match self.registry.join(&code, &self.user_id, &self.username) {
            Ok(JoinOutcome {
                participants,
                tally,
                game,
                recipients,
            }) => {
                self.room = Some(code);
                self.broadcast(&recipients, ServerEvent::ParticipantsUpdated { participants });
                self.broadcast(
                    &recipients,
                    ServerEvent::CameraTally {
                        ready: tally.ready,
                        total: tally.total,
                        all_ready: tally.all_ready,
                    },
                );
                if let Some(config) = game {
                    self.send_self(ServerEvent::GameConfigured { config });
                }
                self.send_self(ServerEvent::Status {
                    message: "Connected - server processing".to_string(),
                    model_loaded: self.model_loaded,
                });
            }
            Err(err) => self.send_self(ServerEvent::Error {
                message: err.to_string(),
            }),
        }
    }

    fn leave_room(&mut self) {
        let Some(code) = self.room.take() else { return };
        match self.registry.leave(&code, &self.user_id) {
            LeaveOutcome::RoomClosed { reason, recipients } => {
                self.broadcast(&recipients, ServerEvent::RoomClosed { reason });
            }
            LeaveOutcome::Left {
                participants,
                tally,
                recipients,
                ..
            } => {
                self.broadcast(&recipients, ServerEvent::ParticipantsUpdated { participants });
                self.broadcast(
                    &recipients,
                    ServerEvent::CameraTally {
                        ready: tally.ready,
                        total: tally.total,
                        all_ready: tally.all_ready,
                    },
                );
            }
            LeaveOutcome::NotAMember => {}
        }
    }

    fn set_camera(&mut self, ready: bool) {
        let Some(code) = self.room.clone() else { return };
        if let Some((tally, recipients)) = self.registry.set_camera_ready(&code, &self.user_id, ready)
        {
            self.broadcast(
                &recipients,
                ServerEvent::CameraTally {
                    ready: tally.ready,
                    total: tally.total,
                    all_ready: tally.all_ready,
                },
            );
        }
    }

    fn start_game(&mut self) {
        let Some(code) = self.room.clone() else { return };
        match self.registry.start_game(&code, &self.user_id) {
            Ok(StartDecision::Started { recipients }) => {
                self.broadcast(&recipients, ServerEvent::GameStarted);
            }
            Ok(StartDecision::NotReady { ready, total }) => {
                self.send_self(ServerEvent::Error {
                    message: format!("Not all cameras ready. {ready}/{total} ready."),
                });
            }
            Err(err) => self.send_self(ServerEvent::Error {
                message: err.to_string(),
            }),
        }
    }

    fn process_frame(&mut self, frame: crate::types::Frame) {
        let started = Instant::now();
        match self.session.push_frame(frame) {
            FrameStep::Idle => {}
            FrameStep::CollectingProgress { buffer_size, target } => {
                self.send_self(ServerEvent::CollectingProgress { buffer_size, target });
            }
            FrameStep::NoHands { notify, .. } => {
                if notify {
                    self.send_self(ServerEvent::NoHands);
                }
            }
            FrameStep::Classify { window } => {
                let buffer_size = window.len();
                let Some(features) = self.extractor.extract(&window) else {
                    return;
                };
                let result = match &self.inference {
                    Some(handle) => handle.classify(features),
                    None => Err(ClassifyError::ModelUnavailable),
                };
                match result {
                    Ok(raw) => {
                        let probabilities = raw.probabilities.clone();
                        let smoothed = self.session.smooth(raw);
                        self.send_self(ServerEvent::PredictionResult {
                            label: smoothed.label,
                            confidence: smoothed.confidence,
                            processing_time_ms: started.elapsed().as_secs_f64() * 1000.0,
                            buffer_size,
                            probabilities,
                        });
                    }
                    Err(err) => {
                        self.send_self(ServerEvent::PredictionResult {
                            label: error_label(&err).to_string(),
                            confidence: 0.0,
                            processing_time_ms: started.elapsed().as_secs_f64() * 1000.0,
                            buffer_size,
                            probabilities: None,
                        });
                    }
                }
            }
        }
    }

    fn disconnect(&mut self) {
        self.leave_room();
        self.clients.write().remove(&self.user_id);
        log::debug!("client {} disconnected", self.user_id);
    }

    fn send_self(&self, event: ServerEvent) {
        self.send_to(&self.user_id, event);
    }

    fn send_to(&self, user_id: &str, event: ServerEvent) {
        if let Some(tx) = self.clients.read().get(user_id) {
            if tx.try_send(event).is_err() {
                log::debug!("egress queue full for {user_id}, dropping event");
            }
        }
    }

    fn broadcast(&self, recipients: &[UserId], event: ServerEvent) {
        for user_id in recipients {
            self.send_to(user_id, event.clone());
        }
    }
}

fn error_label(err: &ClassifyError) -> &'static str {
    match err {
        ClassifyError::ModelUnavailable => "model_unavailable",
        ClassifyError::ModelMismatch { .. } => "model_mismatch",
        ClassifyError::Inference(_) => "prediction_error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::persistence::MemoryStore;
    use crate::types::{Frame, Hand, Landmark};

    const WAIT: Duration = Duration::from_secs(2);

    fn hub_without_model() -> (Hub, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::default());
        (Hub::new(Config::default(), None, store.clone()), store)
    }

    fn connect(hub: &Hub, user: &str) -> (ClientHandle, Receiver<ServerEvent>) {
        let (tx, rx) = bounded(256);
        let handle = hub.connect(user, &format!("{user}-name"), tx);
        (handle, rx)
    }

    /// Drain events until one matches, failing on timeout.
    fn expect_event<F: Fn(&ServerEvent) -> bool>(
        rx: &Receiver<ServerEvent>,
        what: &str,
        matches: F,
    ) -> ServerEvent {
        let deadline = Instant::now() + WAIT;
        loop {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .unwrap_or_else(|| panic!("timed out waiting for {what}"));
            match rx.recv_timeout(remaining) {
                Ok(event) if matches(&event) => return event,
                Ok(_) => continue,
                Err(_) => panic!("timed out waiting for {what}"),
            }
        }
    }

    fn valid_frame(t: usize) -> Frame {
        let mut hand = Hand::absent();
        for (i, lm) in hand.landmarks.iter_mut().enumerate() {
            *lm = Landmark::new(0.2 + t as f32 * 0.01 + i as f32 * 0.005, 0.5, 0.0);
        }
        Frame { hands: vec![hand] }
    }

    #[test]
    fn connect_reports_model_availability() {
        let (hub, _) = hub_without_model();
        let (handle, rx) = connect(&hub, "u1");
        let event = expect_event(&rx, "status", |e| matches!(e, ServerEvent::Status { .. }));
        match event {
            ServerEvent::Status { model_loaded, .. } => assert!(!model_loaded),
            _ => unreachable!(),
        }
        handle.shutdown();
    }

    #[test]
    fn room_lifecycle_over_the_event_surface() {
        let (hub, store) = hub_without_model();
        let (h1, rx1) = connect(&hub, "u1");
        let (h2, rx2) = connect(&hub, "u2");
        let (h3, rx3) = connect(&hub, "u3");

        h1.events.send(ClientEvent::CreateRoom).unwrap();
        let code = match expect_event(&rx1, "room created", |e| {
            matches!(e, ServerEvent::RoomCreated { .. })
        }) {
            ServerEvent::RoomCreated { room } => room,
            _ => unreachable!(),
        };

        for handle in [&h1, &h2, &h3] {
            handle
                .events
                .send(ClientEvent::JoinRoom { room: code.clone() })
                .unwrap();
        }
        // The third join is observed by everyone already in the room.
        expect_event(&rx2, "three participants", |e| {
            matches!(e, ServerEvent::ParticipantsUpdated { participants } if participants.len() == 3)
        });

        // Barrier: two of three ready is not enough.
        h1.events.send(ClientEvent::CameraReady).unwrap();
        h2.events.send(ClientEvent::CameraReady).unwrap();
        expect_event(&rx3, "2/3 tally", |e| {
            matches!(e, ServerEvent::CameraTally { ready: 2, total: 3, .. })
        });
        h1.events.send(ClientEvent::StartGame).unwrap();
        let rejection = expect_event(&rx1, "start rejection", |e| {
            matches!(e, ServerEvent::Error { .. })
        });
        match rejection {
            ServerEvent::Error { message } => assert!(message.contains("2/3"), "{message}"),
            _ => unreachable!(),
        }

        h3.events.send(ClientEvent::CameraReady).unwrap();
        expect_event(&rx1, "all ready", |e| {
            matches!(e, ServerEvent::CameraTally { all_ready: true, .. })
        });
        h1.events.send(ClientEvent::StartGame).unwrap();
        for rx in [&rx1, &rx2, &rx3] {
            expect_event(rx, "game started", |e| matches!(e, ServerEvent::GameStarted));
        }
        assert_eq!(store.instance_count(), 1);

        // Scores flush once, after the last participant reports; an early
        // duplicate from u1 overwrites instead of appending.
        h1.events
            .send(ClientEvent::EndGame { final_score: Some(10) })
            .unwrap();
        h2.events
            .send(ClientEvent::EndGame { final_score: Some(20) })
            .unwrap();
        h1.events
            .send(ClientEvent::EndGame { final_score: Some(15) })
            .unwrap();
        h3.events
            .send(ClientEvent::EndGame { final_score: Some(5) })
            .unwrap();

        let deadline = Instant::now() + WAIT;
        while store.score_count() < 3 {
            assert!(Instant::now() < deadline, "scores never persisted");
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(store.instance_count(), 1);
        let mut scores: Vec<(String, i64)> = store
            .scores
            .lock()
            .iter()
            .map(|(u, _, s)| (u.clone(), *s))
            .collect();
        scores.sort();
        assert_eq!(
            scores,
            vec![
                ("u1".to_string(), 15),
                ("u2".to_string(), 20),
                ("u3".to_string(), 5)
            ]
        );

        h1.shutdown();
        h2.shutdown();
        h3.shutdown();
    }

    #[test]
    fn creator_disconnect_closes_the_room() {
        let (hub, _) = hub_without_model();
        let (h1, rx1) = connect(&hub, "u1");
        let (h2, rx2) = connect(&hub, "u2");

        h1.events.send(ClientEvent::CreateRoom).unwrap();
        let code = match expect_event(&rx1, "room created", |e| {
            matches!(e, ServerEvent::RoomCreated { .. })
        }) {
            ServerEvent::RoomCreated { room } => room,
            _ => unreachable!(),
        };

        h1.events
            .send(ClientEvent::JoinRoom { room: code.clone() })
            .unwrap();
        h2.events
            .send(ClientEvent::JoinRoom { room: code.clone() })
            .unwrap();
        expect_event(&rx2, "joined", |e| {
            matches!(e, ServerEvent::ParticipantsUpdated { .. })
        });

        h1.shutdown();
        expect_event(&rx2, "room closed", |e| {
            matches!(e, ServerEvent::RoomClosed { .. })
        });
        assert!(!hub.registry().room_exists(&code));
        h2.shutdown();
    }

    #[test]
    fn frames_without_model_degrade_to_unavailable_predictions() {
        let (hub, _) = hub_without_model();
        let (handle, rx) = connect(&hub, "u1");

        for t in 0..15 {
            handle
                .events
                .send(ClientEvent::Frame { frame: valid_frame(t) })
                .unwrap();
        }
        expect_event(&rx, "collecting progress", |e| {
            matches!(e, ServerEvent::CollectingProgress { buffer_size: 3, target: 15 })
        });
        let result = expect_event(&rx, "degraded prediction", |e| {
            matches!(e, ServerEvent::PredictionResult { .. })
        });
        match result {
            ServerEvent::PredictionResult {
                label,
                confidence,
                buffer_size,
                ..
            } => {
                assert_eq!(label, "model_unavailable");
                assert_eq!(confidence, 0.0);
                assert_eq!(buffer_size, 15);
            }
            _ => unreachable!(),
        }
        handle.shutdown();
    }

    #[test]
    fn no_hands_notice_is_rate_limited_through_the_pipeline() {
        let (hub, _) = hub_without_model();
        let (handle, rx) = connect(&hub, "u1");

        for _ in 0..12 {
            handle
                .events
                .send(ClientEvent::Frame {
                    frame: Frame { hands: vec![] },
                })
                .unwrap();
        }
        handle.shutdown();

        let notices = rx
            .try_iter()
            .filter(|e| matches!(e, ServerEvent::NoHands))
            .count();
        assert_eq!(notices, 2); // streaks 1 and 11
    }
}
