use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub const LANDMARKS_PER_HAND: usize = 21;
pub const HANDS_PER_FRAME: usize = 2;

// Landmark indices the feature math cares about (MediaPipe hand topology).
pub const WRIST: usize = 0;
pub const THUMB_TIP: usize = 4;
pub const INDEX_TIP: usize = 8;
pub const MIDDLE_MCP: usize = 9;
pub const MIDDLE_TIP: usize = 12;
pub const RING_TIP: usize = 16;
pub const PINKY_TIP: usize = 20;

pub const FINGERTIPS: [usize; 5] = [THUMB_TIP, INDEX_TIP, MIDDLE_TIP, RING_TIP, PINKY_TIP];

/// Base..tip landmark chain per finger, thumb first.
pub const FINGER_CHAINS: [[usize; 4]; 5] = [
    [1, 2, 3, 4],
    [5, 6, 7, 8],
    [9, 10, 11, 12],
    [13, 14, 15, 16],
    [17, 18, 19, 20],
];

/// Tolerance below which a coordinate counts as the origin sentinel.
pub const ORIGIN_EPS: f32 = 1e-8;

/// One tracked point on a hand. Units are whatever the tracker emits;
/// nothing downstream assumes absolute scale.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub z: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn is_origin(&self) -> bool {
        self.x.abs() <= ORIGIN_EPS && self.y.abs() <= ORIGIN_EPS && self.z.abs() <= ORIGIN_EPS
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandSide {
    Left,
    Right,
}

/// One detected hand. The wire form may carry fewer than 21 landmarks;
/// the preprocessor pads to the fixed shape. A hand whose landmarks all
/// sit at the origin is the absent sentinel, not a detection at (0,0,0).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Hand {
    pub landmarks: Vec<Landmark>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side: Option<HandSide>,
}

impl Hand {
    pub fn absent() -> Self {
        Self {
            landmarks: vec![Landmark::default(); LANDMARKS_PER_HAND],
            side: None,
        }
    }

    pub fn is_absent(&self) -> bool {
        self.landmarks.is_empty() || self.landmarks.iter().all(Landmark::is_origin)
    }
}

/// A snapshot of 0..=2 hands at one instant.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(default)]
    pub hands: Vec<Hand>,
}

impl Frame {
    pub fn hands_present(&self) -> usize {
        self.hands.iter().filter(|h| !h.is_absent()).count()
    }

    pub fn has_hands(&self) -> bool {
        self.hands_present() > 0
    }
}

/// Raw classifier output for one inference call.
#[derive(Clone, Debug, Serialize)]
pub struct Prediction {
    pub label: String,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probabilities: Option<HashMap<String, f32>>,
}
