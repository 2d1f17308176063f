use std::fmt;

use serde::{Deserialize, Serialize};

use crate::compensation::CompensationType;
use crate::geometry::{AngleConversion, Plane, SegmentPoint};
use crate::pose::{JointName, Side};

/// Where a movement's raw angle comes from
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AngleSource {
    /// Interior angle at the middle point
    Vertex(SegmentPoint, SegmentPoint, SegmentPoint),
    /// Angle between a reference segment and the moving segment, each (from, to)
    Segments {
        reference: (SegmentPoint, SegmentPoint),
        moving: (SegmentPoint, SegmentPoint),
    },
}

impl AngleSource {
    pub fn points(&self) -> Vec<SegmentPoint> {
        match *self {
            AngleSource::Vertex(a, b, c) => vec![a, b, c],
            AngleSource::Segments { reference, moving } => {
                vec![reference.0, reference.1, moving.0, moving.1]
            }
        }
    }
}

/// Measurable joint movements
///
/// Every per-movement constant (clinical conversion, plane, target, range) lives
/// in this table. The synthetic generator and the measurement service both read
/// it, so the two can never disagree about what "clinical angle" means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Movement {
    ShoulderFlexion,
    ShoulderAbduction,
    ElbowFlexion,
    HipFlexion,
    HipAbduction,
    KneeFlexion,
}

impl Movement {
    pub const ALL: [Movement; 6] = [
        Movement::ShoulderFlexion,
        Movement::ShoulderAbduction,
        Movement::ElbowFlexion,
        Movement::HipFlexion,
        Movement::HipAbduction,
        Movement::KneeFlexion,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Movement::ShoulderFlexion => "shoulder_flexion",
            Movement::ShoulderAbduction => "shoulder_abduction",
            Movement::ElbowFlexion => "elbow_flexion",
            Movement::HipFlexion => "hip_flexion",
            Movement::HipAbduction => "hip_abduction",
            Movement::KneeFlexion => "knee_flexion",
        }
    }

    pub const fn conversion(self) -> AngleConversion {
        match self {
            // 体幹下向きベクトルとの成す角 = 臨床角
            Movement::ShoulderFlexion
            | Movement::ShoulderAbduction
            | Movement::HipFlexion
            | Movement::HipAbduction => AngleConversion::Identity,
            // 伸展位で内角180° = 臨床角0°
            Movement::ElbowFlexion | Movement::KneeFlexion => AngleConversion::Complement,
        }
    }

    /// Projection plane, `None` for hinge angles measured in full 3D
    pub const fn plane(self) -> Option<Plane> {
        match self {
            Movement::ShoulderFlexion | Movement::HipFlexion => Some(Plane::Sagittal),
            Movement::ShoulderAbduction | Movement::HipAbduction => Some(Plane::Frontal),
            Movement::ElbowFlexion | Movement::KneeFlexion => None,
        }
    }

    /// Normal active ROM end point in degrees
    pub const fn default_target(self) -> f32 {
        match self {
            Movement::ShoulderFlexion => 180.0,
            Movement::ShoulderAbduction => 180.0,
            Movement::ElbowFlexion => 150.0,
            Movement::HipFlexion => 120.0,
            Movement::HipAbduction => 45.0,
            Movement::KneeFlexion => 135.0,
        }
    }

    /// Physiological range (min, max) of the clinical angle
    pub const fn range(self) -> (f32, f32) {
        match self {
            Movement::ShoulderFlexion | Movement::ShoulderAbduction => (0.0, 180.0),
            Movement::ElbowFlexion => (0.0, 150.0),
            Movement::HipFlexion => (0.0, 120.0),
            Movement::HipAbduction => (0.0, 45.0),
            Movement::KneeFlexion => (0.0, 150.0),
        }
    }

    pub fn is_shoulder(self) -> bool {
        matches!(self, Movement::ShoulderFlexion | Movement::ShoulderAbduction)
    }

    /// Joint the measurement is reported under
    pub fn vertex(self, side: Side) -> JointName {
        use JointName::*;
        match self {
            Movement::ShoulderFlexion | Movement::ShoulderAbduction => {
                side.pick(LeftShoulder, RightShoulder)
            }
            Movement::ElbowFlexion => side.pick(LeftElbow, RightElbow),
            Movement::HipFlexion | Movement::HipAbduction => side.pick(LeftHip, RightHip),
            Movement::KneeFlexion => side.pick(LeftKnee, RightKnee),
        }
    }

    pub fn source(self, side: Side) -> AngleSource {
        use JointName::*;
        use SegmentPoint::Joint;
        let trunk_down = (SegmentPoint::MID_SHOULDER, SegmentPoint::MID_HIP);
        let shoulder = Joint(side.pick(LeftShoulder, RightShoulder));
        let elbow = Joint(side.pick(LeftElbow, RightElbow));
        let wrist = Joint(side.pick(LeftWrist, RightWrist));
        let hip = Joint(side.pick(LeftHip, RightHip));
        let knee = Joint(side.pick(LeftKnee, RightKnee));
        let ankle = Joint(side.pick(LeftAnkle, RightAnkle));
        match self {
            Movement::ShoulderFlexion | Movement::ShoulderAbduction => AngleSource::Segments {
                reference: trunk_down,
                moving: (shoulder, elbow),
            },
            Movement::HipFlexion | Movement::HipAbduction => AngleSource::Segments {
                reference: trunk_down,
                moving: (hip, knee),
            },
            Movement::ElbowFlexion => AngleSource::Vertex(shoulder, elbow, wrist),
            Movement::KneeFlexion => AngleSource::Vertex(hip, knee, ankle),
        }
    }

    /// Every landmark the primary angle depends on, plane frame included
    pub fn required_joints(self, side: Side) -> Vec<JointName> {
        let mut joints: Vec<JointName> = self
            .source(side)
            .points()
            .into_iter()
            .flat_map(SegmentPoint::joints)
            .collect();
        if self.plane().is_some() {
            joints.extend([
                JointName::LeftShoulder,
                JointName::RightShoulder,
                JointName::LeftHip,
                JointName::RightHip,
            ]);
        }
        joints.sort();
        joints.dedup();
        joints
    }

    /// Secondary angles used for quality scoring: contralateral symmetry and
    /// adjacent joint posture
    pub fn secondary(self, side: Side) -> Vec<(Movement, Side)> {
        let other = side.opposite();
        match self {
            Movement::ShoulderFlexion | Movement::ShoulderAbduction => {
                vec![(self, other), (Movement::ElbowFlexion, side)]
            }
            Movement::ElbowFlexion => vec![(self, other)],
            Movement::HipFlexion => vec![(self, other), (Movement::KneeFlexion, side)],
            Movement::HipAbduction => vec![(self, other)],
            Movement::KneeFlexion => vec![(self, other), (Movement::HipFlexion, side)],
        }
    }

    /// Compensations worth checking while this movement is performed
    pub fn relevant_compensations(self) -> &'static [CompensationType] {
        use CompensationType::*;
        match self {
            Movement::ShoulderFlexion | Movement::ShoulderAbduction => {
                &[ShoulderHiking, TrunkLean, IncompleteRom]
            }
            Movement::ElbowFlexion => {
                &[ShoulderCompensation, WristDeviation, TrunkLean, IncompleteRom]
            }
            Movement::HipFlexion => &[PelvicTilt, TrunkLean, IncompleteRom],
            Movement::HipAbduction => &[PelvicTilt, TrunkLean, IncompleteRom],
            Movement::KneeFlexion => &[KneeValgus, HeelLift, TrunkLean, PelvicTilt, IncompleteRom],
        }
    }
}

impl fmt::Display for Movement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
