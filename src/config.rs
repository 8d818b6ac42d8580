//! Runtime configuration with environment overrides.

use std::env;
use std::path::PathBuf;

use crate::classifier::default_model_dir;
use crate::session::SessionConfig;

#[derive(Clone, Debug)]
pub struct Config {
    /// Directory holding `model.onnx` + `metadata.json`.
    pub model_dir: PathBuf,
    pub session: SessionConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Inference sessions serving classification requests concurrently.
    pub inference_workers: usize,
    /// Pending classification requests before callers start failing fast.
    pub request_queue: usize,
    /// Per-client ingress queue depth.
    pub event_queue: usize,
    /// Per-client egress queue depth; full queues drop instead of blocking.
    pub egress_queue: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            inference_workers: 2,
            request_queue: 64,
            event_queue: 64,
            egress_queue: 256,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_dir: default_model_dir(),
            session: SessionConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl Config {
    /// Defaults, with `SIGN_ARENA_MODEL_DIR` and `SIGN_ARENA_WORKERS`
    /// honored when set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(dir) = env::var("SIGN_ARENA_MODEL_DIR") {
            config.model_dir = PathBuf::from(dir);
        }
        if let Ok(workers) = env::var("SIGN_ARENA_WORKERS") {
            match workers.parse::<usize>() {
                Ok(n) if n > 0 => config.pipeline.inference_workers = n,
                _ => log::warn!("ignoring invalid SIGN_ARENA_WORKERS={workers}"),
            }
        }
        config
    }
}
