//! Landmark layouts and the adapter that maps raw arrays onto canonical joints.
//!
//! Each layout owns exactly one index→name table. Adding a layout means adding a
//! `Schema` variant, which makes every `match` below fail to compile until the new
//! table is wired in.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::keypoint::{JointName, Landmark, LandmarkFrame};
use crate::error::{Error, Result};

/// MoveNet / COCO の 17 キーポイント
const MOVENET_17: [JointName; 17] = [
    JointName::Nose,
    JointName::LeftEye,
    JointName::RightEye,
    JointName::LeftEar,
    JointName::RightEar,
    JointName::LeftShoulder,
    JointName::RightShoulder,
    JointName::LeftElbow,
    JointName::RightElbow,
    JointName::LeftWrist,
    JointName::RightWrist,
    JointName::LeftHip,
    JointName::RightHip,
    JointName::LeftKnee,
    JointName::RightKnee,
    JointName::LeftAnkle,
    JointName::RightAnkle,
];

/// BlazePose / MediaPipe Pose の 33 ランドマーク
const BLAZEPOSE_33: [JointName; 33] = [
    JointName::Nose,
    JointName::LeftEyeInner,
    JointName::LeftEye,
    JointName::LeftEyeOuter,
    JointName::RightEyeInner,
    JointName::RightEye,
    JointName::RightEyeOuter,
    JointName::LeftEar,
    JointName::RightEar,
    JointName::MouthLeft,
    JointName::MouthRight,
    JointName::LeftShoulder,
    JointName::RightShoulder,
    JointName::LeftElbow,
    JointName::RightElbow,
    JointName::LeftWrist,
    JointName::RightWrist,
    JointName::LeftPinky,
    JointName::RightPinky,
    JointName::LeftIndex,
    JointName::RightIndex,
    JointName::LeftThumb,
    JointName::RightThumb,
    JointName::LeftHip,
    JointName::RightHip,
    JointName::LeftKnee,
    JointName::RightKnee,
    JointName::LeftAnkle,
    JointName::RightAnkle,
    JointName::LeftHeel,
    JointName::RightHeel,
    JointName::LeftFootIndex,
    JointName::RightFootIndex,
];

/// Registered landmark layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Schema {
    #[serde(rename = "movenet_17")]
    MoveNet17,
    #[serde(rename = "blazepose_33")]
    BlazePose33,
}

impl Schema {
    pub const ALL: [Schema; 2] = [Schema::MoveNet17, Schema::BlazePose33];

    /// Resolve a producer's schema tag. Unknown tags fail fast.
    pub fn from_tag(tag: &str) -> Result<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "movenet_17" | "movenet" | "coco_17" | "coco" => Ok(Schema::MoveNet17),
            "blazepose_33" | "blazepose" | "mediapipe_33" | "mediapipe" => Ok(Schema::BlazePose33),
            _ => Err(Error::SchemaMismatch {
                tag: tag.to_string(),
                expected: None,
                actual: 0,
            }),
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            Schema::MoveNet17 => "movenet_17",
            Schema::BlazePose33 => "blazepose_33",
        }
    }

    pub fn table(self) -> &'static [JointName] {
        match self {
            Schema::MoveNet17 => &MOVENET_17,
            Schema::BlazePose33 => &BLAZEPOSE_33,
        }
    }

    pub fn point_count(self) -> usize {
        self.table().len()
    }

    pub fn name_of(self, index: usize) -> Option<JointName> {
        self.table().get(index).copied()
    }

    pub fn index_of(self, joint: JointName) -> Option<usize> {
        self.table().iter().position(|&j| j == joint)
    }

    pub fn contains(self, joint: JointName) -> bool {
        self.index_of(joint).is_some()
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Raw point as emitted by the pose model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawPoint {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub z: f32,
    pub confidence: f32,
}

impl RawPoint {
    pub fn new(x: f32, y: f32, z: f32, confidence: f32) -> Self {
        Self { x, y, z, confidence }
    }
}

/// Producer-side frame: schema tag plus positional landmark array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFrame {
    pub schema: String,
    pub timestamp_ms: u64,
    pub points: Vec<RawPoint>,
}

/// Maps raw landmark arrays onto canonical joint names
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaAdapter;

impl SchemaAdapter {
    pub fn new() -> Self {
        Self
    }

    /// Tag and length are checked before any point is read
    pub fn adapt(&self, raw: &RawFrame) -> Result<LandmarkFrame> {
        let schema = Schema::from_tag(&raw.schema).map_err(|_| {
            warn!(tag = %raw.schema, "unregistered landmark schema");
            Error::SchemaMismatch {
                tag: raw.schema.clone(),
                expected: None,
                actual: raw.points.len(),
            }
        })?;
        let table = schema.table();
        if raw.points.len() != table.len() {
            warn!(
                schema = %schema,
                expected = table.len(),
                actual = raw.points.len(),
                "landmark count does not match schema"
            );
            return Err(Error::SchemaMismatch {
                tag: raw.schema.clone(),
                expected: Some(table.len()),
                actual: raw.points.len(),
            });
        }

        let mut frame = LandmarkFrame::new(schema, raw.timestamp_ms);
        for (&joint, p) in table.iter().zip(raw.points.iter()) {
            // 範囲外の信頼度は [0, 1] に収め、非有限値は 0 とする
            let confidence = if p.confidence.is_finite() {
                p.confidence.clamp(0.0, 1.0)
            } else {
                0.0
            };
            frame.insert(joint, Landmark::new(p.x, p.y, p.z, confidence));
        }
        Ok(frame)
    }

    /// Inverse of `adapt`. Joints the layout does not carry are dropped; joints the
    /// frame lacks are emitted with zero confidence so the array stays full length.
    pub fn encode(&self, frame: &LandmarkFrame, schema: Schema) -> RawFrame {
        let points = schema
            .table()
            .iter()
            .map(|joint| match frame.get(*joint) {
                Some(l) => RawPoint::new(l.x, l.y, l.z, l.confidence),
                None => RawPoint::new(0.0, 0.0, 0.0, 0.0),
            })
            .collect();
        RawFrame {
            schema: schema.tag().to_string(),
            timestamp_ms: frame.timestamp_ms,
            points,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn raw(schema: &str, n: usize) -> RawFrame {
        RawFrame {
            schema: schema.to_string(),
            timestamp_ms: 10,
            points: (0..n)
                .map(|i| RawPoint::new(i as f32 * 0.01, 0.5, 0.0, 0.9))
                .collect(),
        }
    }

    #[test]
    fn test_tables_are_bijective() {
        for schema in Schema::ALL {
            let table = schema.table();
            let unique: HashSet<_> = table.iter().collect();
            assert_eq!(unique.len(), table.len(), "{} has duplicate names", schema);
            for (i, &joint) in table.iter().enumerate() {
                assert_eq!(schema.index_of(joint), Some(i));
                assert_eq!(schema.name_of(i), Some(joint));
            }
            assert_eq!(schema.name_of(table.len()), None);
        }
    }

    #[test]
    fn test_point_counts() {
        assert_eq!(Schema::MoveNet17.point_count(), 17);
        assert_eq!(Schema::BlazePose33.point_count(), 33);
    }

    #[test]
    fn test_unregistered_tag_is_schema_mismatch() {
        let adapter = SchemaAdapter::new();
        let err = adapter.adapt(&raw("openpose_25", 25)).unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch { expected: None, actual: 25, .. }));
    }

    #[test]
    fn test_length_mismatch_is_schema_mismatch() {
        let adapter = SchemaAdapter::new();
        // 17点レイアウトを33点タグで送ってきたケース
        let err = adapter.adapt(&raw("blazepose_33", 17)).unwrap_err();
        assert_eq!(
            err,
            Error::SchemaMismatch {
                tag: "blazepose_33".to_string(),
                expected: Some(33),
                actual: 17,
            }
        );
    }

    #[test]
    fn test_adapt_maps_indices_to_names() {
        let adapter = SchemaAdapter::new();
        let frame = adapter.adapt(&raw("movenet_17", 17)).unwrap();
        assert_eq!(frame.schema, Schema::MoveNet17);
        assert_eq!(frame.landmarks.len(), 17);
        let knee = frame.get(JointName::LeftKnee).unwrap();
        assert!((knee.x - 0.13).abs() < 1e-6);
        assert!(frame.get(JointName::LeftHeel).is_none());
    }

    #[test]
    fn test_adapt_clamps_confidence() {
        let table = Schema::MoveNet17.table();
        let index = |joint| table.iter().position(|j| *j == joint).unwrap();
        let mut frame = raw("movenet_17", 17);
        frame.points[index(JointName::LeftKnee)].confidence = 1.7;
        frame.points[index(JointName::RightKnee)].confidence = -0.2;
        frame.points[index(JointName::LeftHip)].confidence = f32::NAN;
        frame.points[index(JointName::RightHip)].confidence = f32::INFINITY;

        let adapted = SchemaAdapter::new().adapt(&frame).unwrap();
        let confidence = |joint| adapted.get(joint).unwrap().confidence;
        assert_eq!(confidence(JointName::LeftKnee), 1.0);
        assert_eq!(confidence(JointName::RightKnee), 0.0);
        assert_eq!(confidence(JointName::LeftHip), 0.0);
        assert_eq!(confidence(JointName::RightHip), 0.0);
        assert!(adapted.point(JointName::LeftHip, 0.3).is_none());
    }

    #[test]
    fn test_encode_then_adapt_keeps_names() {
        let adapter = SchemaAdapter::new();
        let frame = adapter.adapt(&raw("blazepose_33", 33)).unwrap();
        let encoded = adapter.encode(&frame, Schema::MoveNet17);
        assert_eq!(encoded.points.len(), 17);
        let back = adapter.adapt(&encoded).unwrap();
        assert_eq!(back.get(JointName::RightAnkle), frame.get(JointName::RightAnkle));
    }

    #[test]
    fn test_tag_aliases() {
        assert_eq!(Schema::from_tag("COCO").unwrap(), Schema::MoveNet17);
        assert_eq!(Schema::from_tag("mediapipe_33").unwrap(), Schema::BlazePose33);
    }
}
