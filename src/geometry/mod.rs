//! Coordinate conventions and segment geometry.
//!
//! All geometry works in the landmark producer's normalized image space:
//!
//! - `x` grows to the image right
//! - `y` grows **downward**, so anatomical "up" is `-y`
//! - `z` is relative depth, negative toward the camera; a subject facing the
//!   camera has anterior = `-z`
//!
//! The synthetic generator builds poses in the same space, so every consumer uses
//! [`UP`] and [`ANTERIOR`] instead of assuming a sign.

pub mod cache;
pub mod frame;
pub mod goniometer;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

pub use cache::{Clock, FrameBuilder, FrameCache, ManualClock, SystemClock};
pub use frame::{AnatomicalFrame, Segment, SegmentPoint};
pub use goniometer::{AngleConversion, RawAngle};

/// Anatomical up in image space
pub const UP: Vector3<f32> = Vector3::new(0.0, -1.0, 0.0);

/// Anatomical down in image space
pub const DOWN: Vector3<f32> = Vector3::new(0.0, 1.0, 0.0);

/// Anterior direction for a subject facing the camera
pub const ANTERIOR: Vector3<f32> = Vector3::new(0.0, 0.0, -1.0);

/// Default numerical epsilon for vector lengths
pub const EPSILON: f32 = 1e-6;

/// Anatomical measurement planes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plane {
    Sagittal,
    Frontal,
    Transverse,
}

/// Unit vector, or `None` when the vector is shorter than `epsilon`
pub fn normalize(v: Vector3<f32>, epsilon: f32) -> Option<Vector3<f32>> {
    let n = v.norm();
    if !n.is_finite() || n < epsilon {
        None
    } else {
        Some(v / n)
    }
}
