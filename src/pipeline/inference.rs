//! Shared inference worker pool.
//!
//! Classification must never serialize unrelated users behind one slow
//! call, and an ORT session wants exclusive access while it runs. So the
//! artifact is loaded once, each worker thread builds its own session from
//! the shared bytes, and sessions' requests fan out over a bounded channel.
//! A request carries its own reply channel; if the requesting session is
//! torn down mid-flight the reply receiver is gone and the result is
//! silently discarded.

use std::thread;

use crossbeam_channel::{Receiver, Sender, bounded};

use crate::classifier::{ClassifyError, ModelArtifact};
use crate::types::Prediction;

pub struct InferenceRequest {
    features: Vec<f32>,
    reply: Sender<Result<Prediction, ClassifyError>>,
}

#[derive(Clone)]
pub struct InferenceHandle {
    tx: Sender<InferenceRequest>,
}

impl InferenceHandle {
    /// Run one classification, blocking the calling session only. Returns
    /// `ModelUnavailable` when the pool is gone or saturated beyond its
    /// queue.
    pub fn classify(&self, features: Vec<f32>) -> Result<Prediction, ClassifyError> {
        let (reply_tx, reply_rx) = bounded(1);
        self.tx
            .send(InferenceRequest {
                features,
                reply: reply_tx,
            })
            .map_err(|_| ClassifyError::ModelUnavailable)?;
        reply_rx.recv().map_err(|_| ClassifyError::ModelUnavailable)?
    }
}

/// Spawn the worker pool. Fails only when not a single worker could build
/// a session from the artifact.
pub fn start_inference_pool(
    artifact: &ModelArtifact,
    workers: usize,
    queue: usize,
) -> anyhow::Result<InferenceHandle> {
    let (tx, rx) = bounded::<InferenceRequest>(queue);

    let mut started = 0usize;
    for worker in 0..workers.max(1) {
        let mut classifier = match artifact.build_classifier() {
            Ok(classifier) => classifier,
            Err(err) => {
                log::error!("inference worker {worker} failed to build session: {err:?}");
                continue;
            }
        };
        let rx: Receiver<InferenceRequest> = rx.clone();
        thread::Builder::new()
            .name(format!("inference-{worker}"))
            .spawn(move || {
                while let Ok(request) = rx.recv() {
                    let result = classifier.classify(&request.features);
                    if let Err(err) = &result {
                        log::warn!("classification failed: {err}");
                    }
                    // A torn-down session dropped its receiver; the result
                    // must not reach a dead session, so the failed send is
                    // ignored.
                    let _ = request.reply.try_send(result);
                }
            })?;
        started += 1;
    }

    if started == 0 {
        anyhow::bail!("no inference worker could load the model artifact");
    }
    log::info!("inference pool ready with {started} worker(s)");
    Ok(InferenceHandle { tx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_after_pool_shutdown_reports_unavailable() {
        // A handle whose pool never existed behaves like a missing model.
        let (tx, rx) = bounded::<InferenceRequest>(1);
        drop(rx);
        let handle = InferenceHandle { tx };
        assert!(matches!(
            handle.classify(vec![0.0; 4]),
            Err(ClassifyError::ModelUnavailable)
        ));
    }

    #[test]
    fn reply_into_dropped_receiver_does_not_panic() {
        let (reply_tx, reply_rx) = bounded::<Result<Prediction, ClassifyError>>(1);
        drop(reply_rx);
        assert!(reply_tx.try_send(Err(ClassifyError::ModelUnavailable)).is_err());
    }
}
