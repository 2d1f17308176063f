use std::collections::BTreeMap;
use std::fmt;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use super::schema::Schema;

/// Canonical joint names shared by every supported landmark layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JointName {
    Nose,
    LeftEyeInner,
    LeftEye,
    LeftEyeOuter,
    RightEyeInner,
    RightEye,
    RightEyeOuter,
    LeftEar,
    RightEar,
    MouthLeft,
    MouthRight,
    LeftShoulder,
    RightShoulder,
    LeftElbow,
    RightElbow,
    LeftWrist,
    RightWrist,
    LeftPinky,
    RightPinky,
    LeftIndex,
    RightIndex,
    LeftThumb,
    RightThumb,
    LeftHip,
    RightHip,
    LeftKnee,
    RightKnee,
    LeftAnkle,
    RightAnkle,
    LeftHeel,
    RightHeel,
    LeftFootIndex,
    RightFootIndex,
}

impl JointName {
    pub fn as_str(self) -> &'static str {
        use JointName::*;
        match self {
            Nose => "nose",
            LeftEyeInner => "left_eye_inner",
            LeftEye => "left_eye",
            LeftEyeOuter => "left_eye_outer",
            RightEyeInner => "right_eye_inner",
            RightEye => "right_eye",
            RightEyeOuter => "right_eye_outer",
            LeftEar => "left_ear",
            RightEar => "right_ear",
            MouthLeft => "mouth_left",
            MouthRight => "mouth_right",
            LeftShoulder => "left_shoulder",
            RightShoulder => "right_shoulder",
            LeftElbow => "left_elbow",
            RightElbow => "right_elbow",
            LeftWrist => "left_wrist",
            RightWrist => "right_wrist",
            LeftPinky => "left_pinky",
            RightPinky => "right_pinky",
            LeftIndex => "left_index",
            RightIndex => "right_index",
            LeftThumb => "left_thumb",
            RightThumb => "right_thumb",
            LeftHip => "left_hip",
            RightHip => "right_hip",
            LeftKnee => "left_knee",
            RightKnee => "right_knee",
            LeftAnkle => "left_ankle",
            RightAnkle => "right_ankle",
            LeftHeel => "left_heel",
            RightHeel => "right_heel",
            LeftFootIndex => "left_foot_index",
            RightFootIndex => "right_foot_index",
        }
    }
}

impl fmt::Display for JointName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body side. `Bilateral` only appears on compensations and synthetic requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
    Bilateral,
}

impl Side {
    /// Mirror side; `Bilateral` stays bilateral
    pub fn opposite(self) -> Self {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
            Side::Bilateral => Side::Bilateral,
        }
    }

    /// Pick the left or right variant of a paired joint
    pub fn pick(self, left: JointName, right: JointName) -> JointName {
        match self {
            Side::Right => right,
            _ => left,
        }
    }

    /// Concrete sides covered by this value
    pub fn sides(self) -> &'static [Side] {
        match self {
            Side::Left => &[Side::Left],
            Side::Right => &[Side::Right],
            Side::Bilateral => &[Side::Left, Side::Right],
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Left => "left",
            Side::Right => "right",
            Side::Bilateral => "bilateral",
        })
    }
}

/// Single landmark in normalized image coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    /// Grows downward (image convention)
    pub y: f32,
    /// Relative depth, negative toward the camera
    #[serde(default)]
    pub z: f32,
    pub confidence: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32, z: f32, confidence: f32) -> Self {
        Self { x, y, z, confidence }
    }

    /// 信頼度が閾値以上か
    pub fn is_valid(&self, threshold: f32) -> bool {
        self.confidence >= threshold
    }

    pub fn position(&self) -> Vector3<f32> {
        Vector3::new(self.x, self.y, self.z)
    }
}

/// One detection cycle, keyed by canonical joint name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkFrame {
    pub schema: Schema,
    pub timestamp_ms: u64,
    pub landmarks: BTreeMap<JointName, Landmark>,
}

impl LandmarkFrame {
    pub fn new(schema: Schema, timestamp_ms: u64) -> Self {
        Self {
            schema,
            timestamp_ms,
            landmarks: BTreeMap::new(),
        }
    }

    pub fn get(&self, joint: JointName) -> Option<&Landmark> {
        self.landmarks.get(&joint)
    }

    pub fn insert(&mut self, joint: JointName, landmark: Landmark) {
        self.landmarks.insert(joint, landmark);
    }

    /// Position of a joint that is present and at or above `threshold`
    pub fn point(&self, joint: JointName, threshold: f32) -> Option<Vector3<f32>> {
        self.get(joint)
            .filter(|l| l.is_valid(threshold))
            .map(Landmark::position)
    }

    /// Midpoint of two usable joints
    pub fn midpoint(&self, a: JointName, b: JointName, threshold: f32) -> Option<Vector3<f32>> {
        Some((self.point(a, threshold)? + self.point(b, threshold)?) * 0.5)
    }
}
