//! Offline evaluation over a recorded dataset.
//!
//! Replays each labeled sequence through the same session state machine,
//! extractor, classifier and smoothing window as the live pipeline, so the
//! accuracy measured here is directly comparable with what users see.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::Context;
use rayon::prelude::*;
use serde::Deserialize;

use crate::classifier::ModelArtifact;
use crate::features::FeatureExtractor;
use crate::session::{FrameStep, SessionConfig, StreamingSession};
use crate::types::Frame;

/// One recorded performance of a sign.
#[derive(Clone, Debug, Deserialize)]
pub struct RecordedSequence {
    pub frames: Vec<Frame>,
}

/// Dataset layout: sign label -> recorded sequences.
pub type Dataset = HashMap<String, Vec<RecordedSequence>>;

#[derive(Clone, Debug, Default)]
pub struct ClassReport {
    pub total: usize,
    pub correct: usize,
}

#[derive(Clone, Debug, Default)]
pub struct EvalReport {
    pub total: usize,
    pub correct: usize,
    /// Sequences too short or quiet to ever produce a prediction.
    pub skipped: usize,
    pub per_class: HashMap<String, ClassReport>,
}

impl EvalReport {
    pub fn accuracy(&self) -> f32 {
        if self.total == 0 {
            return 0.0;
        }
        self.correct as f32 / self.total as f32
    }
}

pub fn load_dataset(path: &Path) -> anyhow::Result<Dataset> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read dataset {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

/// Evaluate every sequence, fanning out across threads. Each thread builds
/// its own inference session from the shared artifact bytes.
pub fn evaluate(
    dataset: &Dataset,
    artifact: &ModelArtifact,
    session_config: &SessionConfig,
) -> EvalReport {
    let items: Vec<(&str, &RecordedSequence)> = dataset
        .iter()
        .flat_map(|(sign, seqs)| seqs.iter().map(move |s| (sign.as_str(), s)))
        .collect();

    let outcomes: Vec<(&str, Option<bool>)> = items
        .par_iter()
        .map_init(
            || {
                (
                    artifact.build_classifier().ok(),
                    FeatureExtractor::new(),
                )
            },
            |(classifier, extractor), (sign, sequence)| {
                let Some(classifier) = classifier.as_mut() else {
                    return (*sign, None);
                };
                let mut session = StreamingSession::new(session_config.clone());
                let mut last_label: Option<String> = None;

                for frame in &sequence.frames {
                    let FrameStep::Classify { window } = session.push_frame(frame.clone()) else {
                        continue;
                    };
                    let Some(features) = extractor.extract(&window) else {
                        continue;
                    };
                    match classifier.classify(&features) {
                        Ok(raw) => last_label = Some(session.smooth(raw).label),
                        Err(err) => log::warn!("evaluation classify failed: {err}"),
                    }
                }

                (*sign, last_label.map(|label| label == *sign))
            },
        )
        .collect();

    let mut report = EvalReport::default();
    for (sign, outcome) in outcomes {
        let class = report.per_class.entry(sign.to_string()).or_default();
        match outcome {
            Some(correct) => {
                report.total += 1;
                class.total += 1;
                if correct {
                    report.correct += 1;
                    class.correct += 1;
                }
            }
            None => report.skipped += 1,
        }
    }
    report
}
