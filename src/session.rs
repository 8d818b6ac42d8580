//! Per-user streaming session: frame buffering, inference cadence and
//! prediction smoothing.
//!
//! Each connected user owns exactly one `StreamingSession`; the state never
//! crosses user boundaries and dies with the connection, so a later session
//! for the same identity starts clean.

use std::collections::VecDeque;

use crate::types::{Frame, Prediction};

#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Ring buffer capacity; the oldest frame is evicted beyond this.
    pub buffer_capacity: usize,
    /// Buffered frames needed before the first prediction.
    pub ready_threshold: usize,
    /// Classify on every n-th appended frame once ready.
    pub predict_interval: u64,
    /// Emit a collecting-progress notice on every n-th buffered frame.
    pub progress_interval: usize,
    /// Consecutive no-hand frames that reset the buffer.
    pub no_hands_reset: u32,
    /// At most one no-hands notice per this many consecutive no-hand frames.
    pub no_hands_notice_interval: u32,
    /// Majority-vote window for label smoothing.
    pub smoothing_window: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 30,
            ready_threshold: 15,
            predict_interval: 3,
            progress_interval: 3,
            no_hands_reset: 5,
            no_hands_notice_interval: 10,
            smoothing_window: 5,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Empty,
    Collecting,
    Ready,
}

/// What the caller should do after appending one frame.
#[derive(Clone, Debug, PartialEq)]
pub enum FrameStep {
    /// Nothing to report.
    Idle,
    /// Still collecting context; worth telling the user.
    CollectingProgress { buffer_size: usize, target: usize },
    /// Enough context and the cadence gate is open: classify this window.
    Classify { window: Vec<Frame> },
    /// The frame carried no hands.
    NoHands {
        /// Emit a user-facing notice (rate limited).
        notify: bool,
        /// Frames discarded by a streak-triggered buffer reset.
        cleared_frames: usize,
    },
}

/// Smoothed output: majority label over the history window with the
/// confidence averaged over the same window, so live results match what
/// offline evaluation computes for the same stream.
#[derive(Clone, Debug)]
pub struct SmoothedPrediction {
    pub label: String,
    pub confidence: f32,
    pub raw: Prediction,
}

pub struct StreamingSession {
    config: SessionConfig,
    buffer: VecDeque<Frame>,
    frames_appended: u64,
    no_hands_streak: u32,
    label_history: VecDeque<String>,
    confidence_history: VecDeque<f32>,
}

impl StreamingSession {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            buffer: VecDeque::with_capacity(config.buffer_capacity),
            frames_appended: 0,
            no_hands_streak: 0,
            label_history: VecDeque::with_capacity(config.smoothing_window),
            confidence_history: VecDeque::with_capacity(config.smoothing_window),
            config,
        }
    }

    pub fn state(&self) -> SessionState {
        if self.buffer.is_empty() {
            SessionState::Empty
        } else if self.buffer.len() < self.config.ready_threshold {
            SessionState::Collecting
        } else {
            SessionState::Ready
        }
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    /// Append one incoming frame and decide what happens next. A frame with
    /// no detectable hands feeds the no-hands streak instead of the buffer.
    pub fn push_frame(&mut self, frame: Frame) -> FrameStep {
        if !frame.has_hands() {
            return self.push_no_hands();
        }

        self.no_hands_streak = 0;
        self.buffer.push_back(frame);
        if self.buffer.len() > self.config.buffer_capacity {
            self.buffer.pop_front();
        }
        self.frames_appended += 1;

        if self.buffer.len() < self.config.ready_threshold {
            if self.buffer.len() % self.config.progress_interval == 0 {
                return FrameStep::CollectingProgress {
                    buffer_size: self.buffer.len(),
                    target: self.config.ready_threshold,
                };
            }
            return FrameStep::Idle;
        }

        if self.frames_appended % self.config.predict_interval == 0 {
            // The whole buffer goes to the extractor, not just new frames.
            FrameStep::Classify {
                window: self.buffer.iter().cloned().collect(),
            }
        } else {
            FrameStep::Idle
        }
    }

    fn push_no_hands(&mut self) -> FrameStep {
        self.no_hands_streak += 1;

        let mut cleared = 0;
        if self.no_hands_streak >= self.config.no_hands_reset && !self.buffer.is_empty() {
            cleared = self.buffer.len();
            self.buffer.clear();
            self.frames_appended = 0;
            log::debug!("cleared {cleared} buffered frames after no-hands streak");
        }

        FrameStep::NoHands {
            notify: self.no_hands_streak % self.config.no_hands_notice_interval == 1,
            cleared_frames: cleared,
        }
    }

    /// Fold one raw classifier result into the smoothing window.
    pub fn smooth(&mut self, raw: Prediction) -> SmoothedPrediction {
        push_bounded(
            &mut self.label_history,
            raw.label.clone(),
            self.config.smoothing_window,
        );
        push_bounded(
            &mut self.confidence_history,
            raw.confidence,
            self.config.smoothing_window,
        );

        let label = majority_label(&self.label_history).unwrap_or_else(|| raw.label.clone());
        let confidence = self.confidence_history.iter().sum::<f32>()
            / self.confidence_history.len() as f32;

        SmoothedPrediction {
            label,
            confidence,
            raw,
        }
    }
}

fn push_bounded<T>(history: &mut VecDeque<T>, value: T, capacity: usize) {
    history.push_back(value);
    while history.len() > capacity {
        history.pop_front();
    }
}

/// Most frequent label in the history; ties go to the label seen most
/// recently so the output is deterministic.
fn majority_label(history: &VecDeque<String>) -> Option<String> {
    let mut best: Option<(&String, usize, usize)> = None;
    for (idx, label) in history.iter().enumerate() {
        let count = history.iter().filter(|l| *l == label).count();
        match best {
            Some((_, best_count, best_idx)) if (count, idx) <= (best_count, best_idx) => {}
            _ => best = Some((label, count, idx)),
        }
    }
    best.map(|(label, _, _)| label.clone())
}
