//! Shape descriptors for a 2-D wrist path: how circular, angular, regular,
//! straight or symmetric the traced motion is. These separate signs that
//! share a handshape but differ in the drawn trajectory.

use super::stats::{Point2, dist2, mean, norm2, pearson_floor, std_dev, sub2, turn_angle};

pub const TRAJECTORY_FEATURES: usize = 8;

/// Minimum valid path points before any trajectory metric is attempted.
pub const MIN_PATH_POINTS: usize = 5;

/// Turn angles sharper than this count as "angular" motion (120 deg).
const SHARP_ANGLE: f32 = 2.0 * std::f32::consts::PI / 3.0;
/// Turn angles over a 2-step lag above this count as corners (60 deg).
const CORNER_ANGLE: f32 = std::f32::consts::PI / 3.0;
/// Direction changes above this are significant (30 deg).
const DIRECTION_ANGLE: f32 = std::f32::consts::PI / 6.0;

const MAX_CORNERS: usize = 8;
const MAX_DIRECTION_CHANGES: usize = 20;

/// Compute all eight metrics for one path. Paths shorter than
/// [`MIN_PATH_POINTS`] yield all zeros; individual metrics with stricter
/// requirements zero out independently.
pub fn trajectory_features(path: &[Point2]) -> [f32; TRAJECTORY_FEATURES] {
    if path.len() < MIN_PATH_POINTS {
        return [0.0; TRAJECTORY_FEATURES];
    }
    [
        circularity(path),
        angularity(path),
        corner_count(path),
        path_regularity(path),
        direction_changes(path),
        straightness(path),
        curvature_variance(path),
        symmetry_score(path),
    ]
}

fn centroid(path: &[Point2]) -> Point2 {
    let n = path.len() as f32;
    let (sx, sy) = path
        .iter()
        .fold((0.0f32, 0.0f32), |(sx, sy), p| (sx + p[0], sy + p[1]));
    [sx / n, sy / n]
}

fn centroid_distances(path: &[Point2]) -> Vec<f32> {
    let center = centroid(path);
    path.iter().map(|p| dist2(*p, center)).collect()
}

/// 1 - coefficient of variation of the centroid radii, clamped to [0, 1].
/// A perfect circle scores 1; a degenerate (zero-radius) path scores 0.
fn circularity(path: &[Point2]) -> f32 {
    let radii = centroid_distances(path);
    let m = mean(&radii);
    if m <= 0.0 {
        return 0.0;
    }
    (1.0 - std_dev(&radii) / m).clamp(0.0, 1.0)
}

/// Fraction of consecutive turn angles sharper than 120 degrees.
fn angularity(path: &[Point2]) -> f32 {
    let mut sharp = 0usize;
    for w in path.windows(3) {
        let v1 = sub2(w[1], w[0]);
        let v2 = sub2(w[2], w[1]);
        if let Some(angle) = turn_angle(v1, v2) {
            if angle < SHARP_ANGLE {
                sharp += 1;
            }
        }
    }
    sharp as f32 / (path.len().saturating_sub(2).max(1)) as f32
}

/// Distinct corners, detected over a 2-step lag to ride over jitter,
/// capped at 8. Needs at least 6 points.
fn corner_count(path: &[Point2]) -> f32 {
    if path.len() < 6 {
        return 0.0;
    }
    let mut corners = 0usize;
    for i in 2..path.len() - 2 {
        let v1 = sub2(path[i], path[i - 2]);
        let v2 = sub2(path[i + 2], path[i]);
        if let Some(angle) = turn_angle(v1, v2) {
            if angle > CORNER_ANGLE {
                corners += 1;
            }
        }
    }
    corners.min(MAX_CORNERS) as f32
}

/// 1 - coefficient of variation of step lengths, clamped to [0, 1].
fn path_regularity(path: &[Point2]) -> f32 {
    let steps: Vec<f32> = path.windows(2).map(|w| dist2(w[0], w[1])).collect();
    let m = mean(&steps);
    if steps.is_empty() || m <= 0.0 {
        return 0.0;
    }
    (1.0 - std_dev(&steps) / m).clamp(0.0, 1.0)
}

/// Significant direction changes (> 30 deg), capped at 20 and normalized.
fn direction_changes(path: &[Point2]) -> f32 {
    let mut changes = 0usize;
    for w in path.windows(3) {
        let v1 = sub2(w[1], w[0]);
        let v2 = sub2(w[2], w[1]);
        if let Some(angle) = turn_angle(v1, v2) {
            if angle > DIRECTION_ANGLE {
                changes += 1;
            }
        }
    }
    changes.min(MAX_DIRECTION_CHANGES) as f32 / MAX_DIRECTION_CHANGES as f32
}

/// Straight-line distance over total path length, capped at 1.
fn straightness(path: &[Point2]) -> f32 {
    let total: f32 = path.windows(2).map(|w| dist2(w[0], w[1])).sum();
    if total <= 0.0 {
        return 0.0;
    }
    let direct = dist2(path[path.len() - 1], path[0]);
    (direct / total).min(1.0)
}

/// Spread of a discrete curvature estimate: |cross(v1, v2)| / |v1|^3 per
/// interior point.
fn curvature_variance(path: &[Point2]) -> f32 {
    let mut curvatures = Vec::with_capacity(path.len().saturating_sub(2));
    for w in path.windows(3) {
        let v1 = sub2(w[1], w[0]);
        let v2 = sub2(w[2], w[1]);
        let n1 = norm2(v1);
        if n1 > 0.0 {
            let cross = (v1[0] * v2[1] - v1[1] * v2[0]).abs();
            curvatures.push(cross / (n1 * n1 * n1));
        }
    }
    std_dev(&curvatures)
}

/// Correlation between the first half of the centroid-distance profile and
/// the reversed second half; 1 for a path retraced back on itself.
fn symmetry_score(path: &[Point2]) -> f32 {
    let distances = centroid_distances(path);
    let mid = distances.len() / 2;
    if mid == 0 {
        return 0.0;
    }
    let first: Vec<f32> = distances[..mid].to_vec();
    let second: Vec<f32> = distances[distances.len() - mid..]
        .iter()
        .rev()
        .copied()
        .collect();
    pearson_floor(&first, &second)
}
