//! Geometry helpers for node placement.
//!
//! Positions are metres in a right-handed frame; `z` is height above ground and
//! is what the two-ray model reads as antenna height.

use serde::{Deserialize, Serialize};

/// A point in 3-D space, in metres.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

impl Position {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Squared Euclidean distance, for comparisons that do not need the root.
    pub fn distance2(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }

    /// Euclidean distance in metres.
    pub fn distance(&self, other: &Position) -> f64 {
        self.distance2(other).sqrt()
    }

    /// Horizontal distance, ignoring height.
    pub fn ground_distance(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}
