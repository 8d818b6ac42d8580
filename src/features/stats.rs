//! Small numeric helpers shared by the feature families. Every function is
//! total: degenerate input (empty slices, zero variance) yields 0 rather
//! than NaN, which is the sentinel contract the classifier relies on.

pub type Point2 = [f32; 2];

pub fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f32>() / values.len() as f32
}

/// Population standard deviation, matching the convention the model was
/// trained against.
pub fn std_dev(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m) * (v - m)).sum::<f32>() / values.len() as f32;
    var.sqrt()
}

pub fn max(values: &[f32]) -> f32 {
    values.iter().copied().fold(0.0f32, f32::max)
}

pub fn dist2(a: Point2, b: Point2) -> f32 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    (dx * dx + dy * dy).sqrt()
}

pub fn norm2(v: Point2) -> f32 {
    (v[0] * v[0] + v[1] * v[1]).sqrt()
}

pub fn sub2(a: Point2, b: Point2) -> Point2 {
    [a[0] - b[0], a[1] - b[1]]
}

/// Angle between two segment vectors, in radians. Returns `None` when
/// either vector is degenerate.
pub fn turn_angle(v1: Point2, v2: Point2) -> Option<f32> {
    let n1 = norm2(v1);
    let n2 = norm2(v2);
    if n1 <= 0.0 || n2 <= 0.0 {
        return None;
    }
    let cos = ((v1[0] * v2[0] + v1[1] * v2[1]) / (n1 * n2)).clamp(-1.0, 1.0);
    Some(cos.acos())
}

/// Pearson correlation floored at 0, with every degenerate case (length
/// mismatch, fewer than 2 samples, zero variance, NaN) mapped to 0.
pub fn pearson_floor(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.len() < 2 {
        return 0.0;
    }
    let (ma, mb) = (mean(a), mean(b));
    let (sa, sb) = (std_dev(a), std_dev(b));
    if sa <= 0.0 || sb <= 0.0 {
        return 0.0;
    }
    let cov = a
        .iter()
        .zip(b)
        .map(|(x, y)| (x - ma) * (y - mb))
        .sum::<f32>()
        / a.len() as f32;
    let r = cov / (sa * sb);
    if r.is_nan() { 0.0 } else { r.max(0.0) }
}
