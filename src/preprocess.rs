//! Landmark preprocessing: shape coercion, temporal smoothing and
//! wrist-relative normalization.
//!
//! All padding lives here so the feature extractor can assume every frame is
//! exactly 2 hands x 21 landmarks. The stage is total: malformed input is
//! padded or truncated, never rejected.

use crate::types::{Frame, HANDS_PER_FRAME, LANDMARKS_PER_HAND, ORIGIN_EPS, WRIST};

pub type Point = [f32; 3];
pub type HandPoints = [Point; LANDMARKS_PER_HAND];
pub type FramePoints = [HandPoints; HANDS_PER_FRAME];

/// Width of the centered moving-average filter. Must be odd.
pub const SMOOTHING_WINDOW: usize = 3;

/// A window coerced to fixed shape, smoothed, and normalized.
///
/// Both coordinate systems are kept: wrist-relative positions describe hand
/// shape, while the smoothed tracker-space positions carry the motion that
/// wrist subtraction would erase (the wrist is identically zero relative to
/// itself, so velocities and trajectories must be read from `absolute`).
#[derive(Clone, Debug)]
pub struct NormalizedWindow {
    /// Smoothed positions in tracker coordinates.
    pub absolute: Vec<FramePoints>,
    /// Smoothed positions with the per-frame wrist subtracted out.
    pub relative: Vec<FramePoints>,
    /// Hands reported per raw frame, before padding.
    pub hands_reported: Vec<usize>,
}

impl NormalizedWindow {
    pub fn len(&self) -> usize {
        self.absolute.len()
    }

    pub fn is_empty(&self) -> bool {
        self.absolute.is_empty()
    }
}

pub fn preprocess(frames: &[Frame]) -> NormalizedWindow {
    let hands_reported = frames.iter().map(|f| f.hands.len()).collect();

    let mut absolute = coerce_shape(frames);
    smooth_in_place(&mut absolute, SMOOTHING_WINDOW);
    let relative = wrist_relative(&absolute);

    NormalizedWindow {
        absolute,
        relative,
        hands_reported,
    }
}

/// Coerce every frame to exactly 2 hands x 21 landmarks, padding missing
/// data with the origin sentinel and dropping extras.
fn coerce_shape(frames: &[Frame]) -> Vec<FramePoints> {
    frames
        .iter()
        .map(|frame| {
            let mut out: FramePoints = [[[0.0; 3]; LANDMARKS_PER_HAND]; HANDS_PER_FRAME];
            for (hand_idx, hand) in frame.hands.iter().take(HANDS_PER_FRAME).enumerate() {
                for (lm_idx, lm) in hand.landmarks.iter().take(LANDMARKS_PER_HAND).enumerate() {
                    out[hand_idx][lm_idx] = [lm.x, lm.y, lm.z];
                }
            }
            out
        })
        .collect()
}

/// Centered moving average over time, applied independently to each
/// (hand, landmark, coordinate) series. Series that are entirely zero are
/// left untouched so an absent hand is never smoothed into fake motion.
/// Boundary frames use a zero-padded same-length convolution, keeping the
/// output window the same length as the input.
fn smooth_in_place(frames: &mut [FramePoints], width: usize) {
    let len = frames.len();
    if len < width || width < 2 {
        return;
    }
    let half = width / 2;

    let mut series = vec![0.0f32; len];
    for hand in 0..HANDS_PER_FRAME {
        for lm in 0..LANDMARKS_PER_HAND {
            for coord in 0..3 {
                for (t, frame) in frames.iter().enumerate() {
                    series[t] = frame[hand][lm][coord];
                }
                if series.iter().all(|v| *v == 0.0) {
                    continue;
                }
                for t in 0..len {
                    let mut acc = 0.0f32;
                    for k in t.saturating_sub(half)..(t + half + 1).min(len) {
                        acc += series[k];
                    }
                    frames[t][hand][lm][coord] = acc / width as f32;
                }
            }
        }
    }
}

/// Subtract the wrist from every landmark of each hand whose wrist is
/// non-sentinel; hands without a wrist detection stay as-is.
fn wrist_relative(frames: &[FramePoints]) -> Vec<FramePoints> {
    frames
        .iter()
        .map(|frame| {
            let mut out = *frame;
            for hand in out.iter_mut() {
                let wrist = hand[WRIST];
                if is_origin(wrist) {
                    continue;
                }
                for point in hand.iter_mut() {
                    point[0] -= wrist[0];
                    point[1] -= wrist[1];
                    point[2] -= wrist[2];
                }
            }
            out
        })
        .collect()
}

pub fn is_origin(p: Point) -> bool {
    p[0].abs() <= ORIGIN_EPS && p[1].abs() <= ORIGIN_EPS && p[2].abs() <= ORIGIN_EPS
}

pub fn is_origin2(p: [f32; 2]) -> bool {
    p[0].abs() <= ORIGIN_EPS && p[1].abs() <= ORIGIN_EPS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Hand, Landmark};

    fn hand_at(x: f32, y: f32) -> Hand {
        Hand {
            landmarks: (0..LANDMARKS_PER_HAND)
                .map(|i| Landmark::new(x + i as f32 * 0.01, y, 0.0))
                .collect(),
            side: None,
        }
    }

    #[test]
    fn pads_missing_hands_and_landmarks() {
        let frames = vec![
            Frame { hands: vec![] },
            Frame {
                hands: vec![Hand {
                    landmarks: vec![Landmark::new(1.0, 2.0, 3.0)],
                    side: None,
                }],
            },
        ];
        let window = preprocess(&frames);
        assert_eq!(window.len(), 2);
        for frame in &window.absolute {
            assert_eq!(frame.len(), HANDS_PER_FRAME);
            for hand in frame {
                assert_eq!(hand.len(), LANDMARKS_PER_HAND);
            }
        }
        // Too few frames to smooth, so the single landmark survives as-is.
        assert_eq!(window.absolute[1][0][0], [1.0, 2.0, 3.0]);
    }

    #[test]
    fn truncates_extra_hands() {
        let frames = vec![Frame {
            hands: vec![hand_at(0.1, 0.1), hand_at(0.5, 0.5), hand_at(0.9, 0.9)],
        }];
        let window = preprocess(&frames);
        assert_eq!(window.absolute[0].len(), 2);
        assert_eq!(window.hands_reported[0], 3);
    }

    #[test]
    fn smoothing_preserves_length_and_constant_interior() {
        let frames: Vec<Frame> = (0..5)
            .map(|_| Frame {
                hands: vec![hand_at(0.5, 0.5)],
            })
            .collect();
        let window = preprocess(&frames);
        assert_eq!(window.len(), 5);
        // Interior frames of a constant series stay constant.
        let x = window.absolute[2][0][5][0];
        assert!((x - 0.55).abs() < 1e-6);
        // Boundary frames see the zero padding of the same-length convolution.
        let edge = window.absolute[0][0][5][0];
        assert!((edge - 0.55 * 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn absent_hand_stays_at_origin_after_smoothing() {
        let frames: Vec<Frame> = (0..6)
            .map(|_| Frame {
                hands: vec![hand_at(0.3, 0.4)],
            })
            .collect();
        // Only one hand present; the second slot pads to the sentinel.
        let window = preprocess(&frames);
        for frame in &window.absolute {
            for point in &frame[1] {
                assert!(is_origin(*point));
            }
        }
        // And the sentinel survives normalization too.
        for frame in &window.relative {
            for point in &frame[1] {
                assert!(is_origin(*point));
            }
        }
    }

    #[test]
    fn wrist_relative_zeroes_the_wrist() {
        let frames: Vec<Frame> = (0..5)
            .map(|i| Frame {
                hands: vec![hand_at(0.2 + i as f32 * 0.05, 0.6)],
            })
            .collect();
        let window = preprocess(&frames);
        for frame in &window.relative {
            assert!(is_origin(frame[0][WRIST]));
        }
        // The wrist still moves in tracker space.
        assert!(window.absolute[0][0][WRIST][0] != window.absolute[4][0][WRIST][0]);
    }

    #[test]
    fn preprocess_is_deterministic() {
        let frames: Vec<Frame> = (0..8)
            .map(|i| Frame {
                hands: vec![hand_at(0.1 * i as f32, 0.3), hand_at(0.9 - 0.1 * i as f32, 0.7)],
            })
            .collect();
        let a = preprocess(&frames);
        let b = preprocess(&frames);
        assert_eq!(a.absolute, b.absolute);
        assert_eq!(a.relative, b.relative);
    }
}
