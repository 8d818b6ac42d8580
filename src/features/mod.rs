//! Windowed feature extraction.
//!
//! Converts a sliding window of multi-hand landmark frames into the
//! fixed-length numeric vector the classifier was trained against. The
//! layout (six families, each hand independently, concatenated in a fixed
//! order with a parallel name list) is a hard contract: the trained model
//! and this extractor must agree on it bit for bit, so the same code runs
//! under offline evaluation and live streaming.
//!
//! Every sub-computation is total: degenerate input (absent hands, too few
//! points, zero variance) produces 0, never NaN or an error.

mod stats;
mod trajectory;

pub use trajectory::MIN_PATH_POINTS;

use crate::preprocess::{self, FramePoints, NormalizedWindow, is_origin, is_origin2};
use crate::types::{
    FINGER_CHAINS, FINGERTIPS, Frame, HANDS_PER_FRAME, LANDMARKS_PER_HAND, MIDDLE_MCP, MIDDLE_TIP,
    INDEX_TIP, PINKY_TIP, THUMB_TIP, WRIST,
};
use stats::{Point2, dist2, mean, norm2, pearson_floor, std_dev};
use trajectory::{TRAJECTORY_FEATURES, trajectory_features};

pub const SPATIAL_PER_HAND: usize = 15;
pub const TEMPORAL_PER_HAND: usize = 6;
pub const GEOMETRIC_PER_HAND: usize = 2;
pub const STATISTICAL_PER_HAND: usize = 4;
pub const TRAJECTORY_PER_HAND: usize = TRAJECTORY_FEATURES;
pub const GLOBAL_FEATURES: usize = 6;

/// Total contracted vector length: 2 hands x 35 per-hand features + 6 global.
pub const FEATURE_LEN: usize = HANDS_PER_FRAME
    * (SPATIAL_PER_HAND
        + TEMPORAL_PER_HAND
        + GEOMETRIC_PER_HAND
        + STATISTICAL_PER_HAND
        + TRAJECTORY_PER_HAND)
    + GLOBAL_FEATURES;

/// Windows shorter than this carry too little temporal context to describe.
pub const MIN_WINDOW_FRAMES: usize = 5;

const VELOCITY_EPS: f32 = 1e-8;

pub struct FeatureExtractor {
    names: Vec<String>,
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureExtractor {
    pub fn new() -> Self {
        Self {
            names: build_feature_names(),
        }
    }

    /// Ordered names matching [`extract`](Self::extract) output, index for
    /// index. Part of the classifier contract.
    pub fn feature_names(&self) -> &[String] {
        &self.names
    }

    pub fn feature_len(&self) -> usize {
        FEATURE_LEN
    }

    /// Extract the full vector for a window. Returns `None` only when the
    /// window holds fewer than [`MIN_WINDOW_FRAMES`] frames.
    pub fn extract(&self, frames: &[Frame]) -> Option<Vec<f32>> {
        if frames.len() < MIN_WINDOW_FRAMES {
            return None;
        }
        let window = preprocess::preprocess(frames);

        let mut features = Vec::with_capacity(FEATURE_LEN);
        for hand in 0..HANDS_PER_FRAME {
            features.extend_from_slice(&spatial_features(&window, hand));
        }
        for hand in 0..HANDS_PER_FRAME {
            features.extend_from_slice(&temporal_features(&window, hand));
        }
        for hand in 0..HANDS_PER_FRAME {
            features.extend_from_slice(&geometric_features(&window, hand));
        }
        for hand in 0..HANDS_PER_FRAME {
            features.extend_from_slice(&statistical_features(&window, hand));
        }
        for hand in 0..HANDS_PER_FRAME {
            features.extend_from_slice(&trajectory_features(&wrist_path(&window, hand)));
        }
        features.extend_from_slice(&global_features(&window));

        debug_assert_eq!(features.len(), FEATURE_LEN);
        // Belt and braces: the vector must never leak a non-finite value.
        for value in features.iter_mut() {
            if !value.is_finite() {
                *value = 0.0;
            }
        }
        Some(features)
    }
}

fn build_feature_names() -> Vec<String> {
    let mut names = Vec::with_capacity(FEATURE_LEN);
    for hand in 0..HANDS_PER_FRAME {
        let p = format!("hand{hand}_");
        names.extend(
            [
                "avg_span",
                "avg_finger_spread",
                "avg_orientation",
                "std_orientation",
                "palm_center_x",
                "palm_center_y",
                "palm_std_x",
                "palm_std_y",
                "palm_range_x",
                "palm_range_y",
                "thumb_bend",
                "index_bend",
                "middle_bend",
                "ring_bend",
                "pinky_bend",
            ]
            .iter()
            .map(|n| format!("{p}{n}")),
        );
    }
    for hand in 0..HANDS_PER_FRAME {
        let p = format!("hand{hand}_");
        names.extend(
            [
                "avg_velocity",
                "std_velocity",
                "avg_acceleration",
                "max_acceleration",
                "velocity_changes",
                "smooth_ratio",
            ]
            .iter()
            .map(|n| format!("{p}{n}")),
        );
    }
    for hand in 0..HANDS_PER_FRAME {
        let p = format!("hand{hand}_");
        names.extend(
            ["thumb_index_dist", "wrist_middle_dist"]
                .iter()
                .map(|n| format!("{p}{n}")),
        );
    }
    for hand in 0..HANDS_PER_FRAME {
        let p = format!("hand{hand}_");
        names.extend(
            ["mean_x", "mean_y", "std_x", "std_y"]
                .iter()
                .map(|n| format!("{p}{n}")),
        );
    }
    for hand in 0..HANDS_PER_FRAME {
        let p = format!("hand{hand}_");
        names.extend(
            [
                "circularity",
                "angularity",
                "corner_count",
                "path_regularity",
                "direction_changes",
                "straightness",
                "curvature_variance",
                "symmetry_score",
            ]
            .iter()
            .map(|n| format!("{p}{n}")),
        );
    }
    names.extend(
        [
            "avg_hands_detected",
            "hand_separation_change",
            "relative_motion",
            "dominant_hand_activity",
            "synchronization_score",
            "overall_complexity",
        ]
        .iter()
        .map(|n| n.to_string()),
    );
    names
}

fn point2(frame: &FramePoints, hand: usize, lm: usize) -> Point2 {
    [frame[hand][lm][0], frame[hand][lm][1]]
}

/// A hand is treated as present in a frame when its tracker-space wrist is
/// off the origin sentinel. Wrist-relative coordinates cannot answer this
/// (the wrist is zero relative to itself).
fn hand_present(window: &NormalizedWindow, t: usize, hand: usize) -> bool {
    !is_origin(window.absolute[t][hand][WRIST])
}

fn hand_seen_at_all(window: &NormalizedWindow, hand: usize) -> bool {
    window
        .relative
        .iter()
        .any(|f| f[hand].iter().any(|p| !is_origin(*p)))
}

/// Wrist path in tracker space, non-sentinel points only.
fn wrist_path(window: &NormalizedWindow, hand: usize) -> Vec<Point2> {
    window
        .absolute
        .iter()
        .map(|f| point2(f, hand, WRIST))
        .filter(|p| !is_origin2(*p))
        .collect()
}

/// Per-frame wrist displacement magnitudes, skipping any step whose
/// endpoints include a sentinel.
fn wrist_velocities(window: &NormalizedWindow, hand: usize) -> Vec<f32> {
    let mut velocities = Vec::new();
    for t in 1..window.len() {
        let prev = point2(&window.absolute[t - 1], hand, WRIST);
        let curr = point2(&window.absolute[t], hand, WRIST);
        if !is_origin2(prev) && !is_origin2(curr) {
            velocities.push(dist2(prev, curr));
        }
    }
    velocities
}

fn total_motion(window: &NormalizedWindow, hand: usize) -> f32 {
    wrist_velocities(window, hand).iter().sum()
}

fn spatial_features(window: &NormalizedWindow, hand: usize) -> [f32; SPATIAL_PER_HAND] {
    let mut out = [0.0f32; SPATIAL_PER_HAND];
    if !hand_seen_at_all(window, hand) {
        return out;
    }

    // Thumb-pinky span.
    let mut spans = Vec::new();
    for frame in &window.relative {
        let thumb = point2(frame, hand, THUMB_TIP);
        let pinky = point2(frame, hand, PINKY_TIP);
        if !is_origin2(thumb) && !is_origin2(pinky) {
            spans.push(dist2(thumb, pinky));
        }
    }
    out[0] = mean(&spans);

    // Mean spread between adjacent fingertips.
    let mut frame_spreads = Vec::new();
    for frame in &window.relative {
        let mut spreads = Vec::new();
        for pair in FINGERTIPS.windows(2) {
            let a = point2(frame, hand, pair[0]);
            let b = point2(frame, hand, pair[1]);
            if !is_origin2(a) && !is_origin2(b) {
                spreads.push(dist2(a, b));
            }
        }
        if !spreads.is_empty() {
            frame_spreads.push(mean(&spreads));
        }
    }
    out[1] = mean(&frame_spreads);

    // Orientation of the wrist -> middle-MCP vector. In wrist-relative
    // coordinates that vector is the MCP position itself.
    let mut orientations = Vec::new();
    for (t, frame) in window.relative.iter().enumerate() {
        let mcp = point2(frame, hand, MIDDLE_MCP);
        if hand_present(window, t, hand) && !is_origin2(mcp) {
            orientations.push(mcp[1].atan2(mcp[0]));
        }
    }
    out[2] = mean(&orientations);
    out[3] = std_dev(&orientations);

    // Palm-center statistics over frames where the center is resolvable.
    let mut centers_x = Vec::new();
    let mut centers_y = Vec::new();
    for frame in &window.relative {
        let mut cx = 0.0f32;
        let mut cy = 0.0f32;
        for lm in 0..LANDMARKS_PER_HAND {
            let p = point2(frame, hand, lm);
            cx += p[0];
            cy += p[1];
        }
        cx /= LANDMARKS_PER_HAND as f32;
        cy /= LANDMARKS_PER_HAND as f32;
        if !is_origin2([cx, cy]) {
            centers_x.push(cx);
            centers_y.push(cy);
        }
    }
    if !centers_x.is_empty() {
        out[4] = mean(&centers_x);
        out[5] = mean(&centers_y);
        out[6] = std_dev(&centers_x);
        out[7] = std_dev(&centers_y);
        out[8] = range(&centers_x);
        out[9] = range(&centers_y);
    }

    // Per-finger bend proxy: base-to-tip distance averaged over the window.
    for (finger, chain) in FINGER_CHAINS.iter().enumerate() {
        let mut bends = Vec::new();
        for frame in &window.relative {
            let base = point2(frame, hand, chain[0]);
            let tip = point2(frame, hand, chain[3]);
            if !is_origin2(base) && !is_origin2(tip) {
                bends.push(dist2(base, tip));
            }
        }
        out[10 + finger] = mean(&bends);
    }

    out
}

fn range(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let max = values.iter().copied().fold(f32::MIN, f32::max);
    let min = values.iter().copied().fold(f32::MAX, f32::min);
    max - min
}

fn temporal_features(window: &NormalizedWindow, hand: usize) -> [f32; TEMPORAL_PER_HAND] {
    let mut out = [0.0f32; TEMPORAL_PER_HAND];
    if window.len() < 2 {
        return out;
    }
    let velocities = wrist_velocities(window, hand);
    if velocities.is_empty() {
        return out;
    }
    out[0] = mean(&velocities);
    out[1] = std_dev(&velocities);

    let accelerations: Vec<f32> = velocities
        .windows(2)
        .map(|w| (w[1] - w[0]).abs())
        .collect();
    out[2] = mean(&accelerations);
    out[3] = stats::max(&accelerations);

    if velocities.len() > 1 {
        let threshold = std_dev(&velocities) * 0.5;
        out[4] = velocities
            .windows(2)
            .filter(|w| (w[1] - w[0]).abs() > threshold)
            .count() as f32;
    }
    if velocities.len() > 2 {
        out[5] = (1.0 - std_dev(&velocities) / (mean(&velocities) + VELOCITY_EPS)).max(0.0);
    }
    out
}

fn geometric_features(window: &NormalizedWindow, hand: usize) -> [f32; GEOMETRIC_PER_HAND] {
    let mut out = [0.0f32; GEOMETRIC_PER_HAND];
    if !hand_seen_at_all(window, hand) {
        return out;
    }

    let mut thumb_index = Vec::new();
    let mut wrist_middle = Vec::new();
    for (t, frame) in window.relative.iter().enumerate() {
        let thumb = point2(frame, hand, THUMB_TIP);
        let index = point2(frame, hand, INDEX_TIP);
        if !is_origin2(thumb) && !is_origin2(index) {
            thumb_index.push(dist2(thumb, index));
        }
        // The wrist sits at the origin of its own frame, so this distance
        // is just the middle-tip magnitude.
        let middle = point2(frame, hand, MIDDLE_TIP);
        if hand_present(window, t, hand) && !is_origin2(middle) {
            wrist_middle.push(norm2(middle));
        }
    }
    out[0] = mean(&thumb_index);
    out[1] = mean(&wrist_middle);
    out
}

fn statistical_features(window: &NormalizedWindow, hand: usize) -> [f32; STATISTICAL_PER_HAND] {
    let mut xs = Vec::new();
    let mut ys = Vec::new();
    for frame in &window.relative {
        for lm in 0..LANDMARKS_PER_HAND {
            let p = point2(frame, hand, lm);
            if !is_origin2(p) {
                xs.push(p[0]);
                ys.push(p[1]);
            }
        }
    }
    if xs.is_empty() {
        return [0.0; STATISTICAL_PER_HAND];
    }
    [mean(&xs), mean(&ys), std_dev(&xs), std_dev(&ys)]
}

fn global_features(window: &NormalizedWindow) -> [f32; GLOBAL_FEATURES] {
    let mut out = [0.0f32; GLOBAL_FEATURES];
    if window.is_empty() {
        return out;
    }

    // 1. Hands the tracker reported, averaged over raw frames.
    let counts: Vec<f32> = window.hands_reported.iter().map(|c| *c as f32).collect();
    out[0] = mean(&counts);

    // 2. Change in inter-wrist separation between the first and last frame
    // where both wrists were tracked.
    let mut separations = Vec::new();
    for frame in &window.absolute {
        let left = point2(frame, 0, WRIST);
        let right = point2(frame, 1, WRIST);
        if !is_origin2(left) && !is_origin2(right) {
            separations.push(dist2(left, right));
        }
    }
    if separations.len() > 1 {
        out[1] = (separations[separations.len() - 1] - separations[0]).abs();
    }

    // 3/4. Motion asymmetry and dominant-hand share of total path length.
    let left_motion = total_motion(window, 0);
    let right_motion = total_motion(window, 1);
    let total = left_motion + right_motion;
    if total > 0.0 {
        out[2] = (left_motion - right_motion).abs() / total;
        out[3] = left_motion.max(right_motion) / total;
    }

    // 5. Synchronization: correlation of the two velocity series, truncated
    // to a common length.
    let left_vel = wrist_velocities(window, 0);
    let right_vel = wrist_velocities(window, 1);
    let common = left_vel.len().min(right_vel.len());
    if common > 2 {
        out[4] = pearson_floor(&left_vel[..common], &right_vel[..common]);
    }

    // 6. Complexity: landmark-activity density, inter-hand motion spread,
    // and overall positional spread, averaged.
    out[5] = complexity(window, left_motion, right_motion);

    out
}

fn complexity(window: &NormalizedWindow, left_motion: f32, right_motion: f32) -> f32 {
    let mut factors = Vec::with_capacity(3);

    let total_slots = window.len() * HANDS_PER_FRAME * LANDMARKS_PER_HAND;
    if total_slots > 0 {
        let active = window
            .relative
            .iter()
            .flat_map(|f| f.iter().flatten())
            .filter(|p| !is_origin(**p))
            .count();
        factors.push(active as f32 / total_slots as f32);
    }

    factors.push(std_dev(&[left_motion, right_motion]).min(1.0));

    let mut spread_sum = 0.0f32;
    for hand in 0..HANDS_PER_FRAME {
        for lm in 0..LANDMARKS_PER_HAND {
            let mut xs = Vec::new();
            let mut ys = Vec::new();
            for frame in &window.relative {
                let p = point2(frame, hand, lm);
                if !is_origin2(p) {
                    xs.push(p[0]);
                    ys.push(p[1]);
                }
            }
            if xs.len() > 1 {
                spread_sum += (std_dev(&xs) + std_dev(&ys)) / 2.0;
            }
        }
    }
    factors.push((spread_sum / 10.0).min(1.0));

    mean(&factors)
}
