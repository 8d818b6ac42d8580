//! Adapter over the trained sign-classifier artifact.
//!
//! The artifact is produced offline and consumed here as an opaque bundle:
//! an ONNX graph plus a metadata file carrying the feature-name contract,
//! the class list and the standard-scaler parameters fitted during
//! training. The adapter validates vector dimensionality, applies the
//! scaler and maps the probability output back to class labels. It never
//! trains anything.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use ndarray::Array2;
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::value::Tensor;
use serde::Deserialize;
use thiserror::Error;

use crate::types::Prediction;

const MODEL_FILENAME: &str = "model.onnx";
const METADATA_FILENAME: &str = "metadata.json";

/// StandardScaler parameters from the training run.
#[derive(Clone, Debug, Deserialize)]
pub struct ScalerParams {
    pub mean: Vec<f32>,
    pub scale: Vec<f32>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ArtifactMetadata {
    pub feature_names: Vec<String>,
    pub class_names: Vec<String>,
    pub scaler: ScalerParams,
}

impl ArtifactMetadata {
    pub fn num_features(&self) -> usize {
        self.feature_names.len()
    }

    /// Reject vectors whose length disagrees with the artifact. Truncating
    /// or padding instead would silently misalign every feature with the
    /// column the model was trained on.
    pub fn check_dimensionality(&self, actual: usize) -> Result<(), ClassifyError> {
        let expected = self.num_features();
        if actual != expected {
            return Err(ClassifyError::ModelMismatch { expected, actual });
        }
        Ok(())
    }
}

/// Typed failure modes of a single classification call. None of these are
/// fatal: the session that triggered the call keeps running.
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("model artifact is not available")]
    ModelUnavailable,
    #[error("feature vector has {actual} entries, model expects {expected}")]
    ModelMismatch { expected: usize, actual: usize },
    #[error("inference failed: {0}")]
    Inference(String),
}

/// The raw artifact bytes plus parsed metadata. Loaded from disk exactly
/// once at startup; inference workers each build their own [`SignClassifier`]
/// from the shared bytes so concurrent sessions never contend on one graph.
#[derive(Clone, Debug)]
pub struct ModelArtifact {
    model_bytes: Vec<u8>,
    metadata: ArtifactMetadata,
}

impl ModelArtifact {
    pub fn load(dir: &Path) -> anyhow::Result<Self> {
        let metadata_path = dir.join(METADATA_FILENAME);
        let metadata_raw = fs::read_to_string(&metadata_path)
            .with_context(|| format!("failed to read {}", metadata_path.display()))?;
        let metadata: ArtifactMetadata = serde_json::from_str(&metadata_raw)
            .with_context(|| format!("failed to parse {}", metadata_path.display()))?;

        if metadata.scaler.mean.len() != metadata.num_features()
            || metadata.scaler.scale.len() != metadata.num_features()
        {
            log::warn!(
                "scaler dimensionality ({}/{}) disagrees with {} feature names",
                metadata.scaler.mean.len(),
                metadata.scaler.scale.len(),
                metadata.num_features()
            );
        }

        let model_path = dir.join(MODEL_FILENAME);
        let model_bytes = fs::read(&model_path)
            .with_context(|| format!("failed to read {}", model_path.display()))?;

        log::info!(
            "loaded classifier artifact from {} ({} features, {} classes)",
            dir.display(),
            metadata.num_features(),
            metadata.class_names.len()
        );

        Ok(Self {
            model_bytes,
            metadata,
        })
    }

    pub fn metadata(&self) -> &ArtifactMetadata {
        &self.metadata
    }

    pub fn class_names(&self) -> &[String] {
        &self.metadata.class_names
    }

    pub fn build_classifier(&self) -> anyhow::Result<SignClassifier> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(1)?
            .commit_from_memory(&self.model_bytes)
            .context("failed to build ORT session from artifact bytes")?;

        Ok(SignClassifier {
            session,
            metadata: self.metadata.clone(),
        })
    }
}

pub fn default_model_dir() -> PathBuf {
    PathBuf::from("models").join("sign-classifier")
}

/// One loaded inference session. Deterministic for a fixed artifact: the
/// same vector always yields the same prediction.
pub struct SignClassifier {
    session: Session,
    metadata: ArtifactMetadata,
}

impl SignClassifier {
    pub fn expected_features(&self) -> usize {
        self.metadata.num_features()
    }

    pub fn class_names(&self) -> &[String] {
        &self.metadata.class_names
    }

    pub fn classify(&mut self, features: &[f32]) -> Result<Prediction, ClassifyError> {
        self.metadata.check_dimensionality(features.len())?;
        let expected = self.expected_features();

        let scaled = scale_features(&self.metadata.scaler, features);
        let input = Array2::from_shape_vec((1, expected), scaled)
            .map_err(|e| ClassifyError::Inference(e.to_string()))?;
        let tensor =
            Tensor::from_array(input).map_err(|e| ClassifyError::Inference(e.to_string()))?;

        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .map_err(|e| ClassifyError::Inference(e.to_string()))?;

        // The exported graph may emit a label tensor before the probability
        // tensor; take the first float output with one entry per class.
        let classes = self.metadata.class_names.len();
        let mut probabilities: Option<Vec<f32>> = None;
        for idx in 0..outputs.len() {
            if let Ok(arr) = outputs[idx].try_extract_array::<f32>() {
                if arr.len() == classes {
                    probabilities = Some(arr.iter().copied().collect());
                    break;
                }
            }
        }
        let probabilities = probabilities.ok_or_else(|| {
            ClassifyError::Inference("no per-class probability output".to_string())
        })?;

        let (best_idx, best_prob) = probabilities
            .iter()
            .copied()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            .unwrap_or((0, 0.0));

        let label = self
            .metadata
            .class_names
            .get(best_idx)
            .cloned()
            .unwrap_or_else(|| format!("class_{best_idx}"));

        let probability_map: HashMap<String, f32> = self
            .metadata
            .class_names
            .iter()
            .zip(probabilities.iter())
            .map(|(name, p)| (name.clone(), *p))
            .collect();

        Ok(Prediction {
            label,
            confidence: best_prob.clamp(0.0, 1.0),
            probabilities: Some(probability_map),
        })
    }
}

/// Apply the training-time StandardScaler. A missing or zero scale entry
/// falls back to 1 so a malformed artifact can only distort, not explode.
fn scale_features(scaler: &ScalerParams, features: &[f32]) -> Vec<f32> {
    features
        .iter()
        .enumerate()
        .map(|(i, value)| {
            let mean = scaler.mean.get(i).copied().unwrap_or(0.0);
            let scale = match scaler.scale.get(i).copied() {
                Some(s) if s.abs() > f32::EPSILON => s,
                _ => 1.0,
            };
            (value - mean) / scale
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata_fixture() -> ArtifactMetadata {
        serde_json::from_str(
            r#"{
                "feature_names": ["a", "b", "c"],
                "class_names": ["Hi-Hello", "Thank-You"],
                "scaler": {"mean": [1.0, 2.0, 3.0], "scale": [2.0, 0.0, 1.0]}
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn metadata_parses_and_counts_features() {
        let meta = metadata_fixture();
        assert_eq!(meta.num_features(), 3);
        assert_eq!(meta.class_names.len(), 2);
    }

    #[test]
    fn scaler_guards_zero_scale() {
        let meta = metadata_fixture();
        let scaled = scale_features(&meta.scaler, &[3.0, 2.0, 4.0]);
        assert_eq!(scaled, vec![1.0, 0.0, 1.0]);
    }

    #[test]
    fn scaler_tolerates_short_parameter_vectors() {
        let scaler = ScalerParams {
            mean: vec![1.0],
            scale: vec![2.0],
        };
        let scaled = scale_features(&scaler, &[3.0, 5.0]);
        assert_eq!(scaled, vec![1.0, 5.0]);
    }

    #[test]
    fn dimensionality_mismatch_is_typed_not_truncated() {
        let meta = metadata_fixture();
        assert!(meta.check_dimensionality(3).is_ok());
        match meta.check_dimensionality(99) {
            Err(ClassifyError::ModelMismatch { expected, actual }) => {
                assert_eq!((expected, actual), (3, 99));
            }
            other => panic!("expected ModelMismatch, got {other:?}"),
        }
    }

    #[test]
    fn missing_artifact_is_an_error_not_a_panic() {
        let err = ModelArtifact::load(Path::new("/nonexistent/artifact")).unwrap_err();
        assert!(err.to_string().contains("metadata.json"));
    }
}
