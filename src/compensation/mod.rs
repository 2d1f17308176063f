pub mod detectors;
pub mod engine;
pub mod persistence;
pub mod thresholds;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::pose::Side;

pub use detectors::{Candidate, Detection, DetectionInput};
pub use engine::CompensationEngine;
pub use persistence::PersistenceFilter;
pub use thresholds::{LimbLengthAdapter, Threshold, ThresholdConfig, Unit, UnitAdapter};

/// Movement-quality defects the detectors can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompensationType {
    ShoulderHiking,
    TrunkLean,
    KneeValgus,
    HeelLift,
    PelvicTilt,
    IncompleteRom,
    WristDeviation,
    ShoulderCompensation,
}

impl CompensationType {
    pub const ALL: [CompensationType; 8] = [
        CompensationType::ShoulderHiking,
        CompensationType::TrunkLean,
        CompensationType::KneeValgus,
        CompensationType::HeelLift,
        CompensationType::PelvicTilt,
        CompensationType::IncompleteRom,
        CompensationType::WristDeviation,
        CompensationType::ShoulderCompensation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CompensationType::ShoulderHiking => "shoulder_hiking",
            CompensationType::TrunkLean => "trunk_lean",
            CompensationType::KneeValgus => "knee_valgus",
            CompensationType::HeelLift => "heel_lift",
            CompensationType::PelvicTilt => "pelvic_tilt",
            CompensationType::IncompleteRom => "incomplete_rom",
            CompensationType::WristDeviation => "wrist_deviation",
            CompensationType::ShoulderCompensation => "shoulder_compensation",
        }
    }

    /// Static injury-risk weight used by the feedback prioritizer
    pub fn injury_risk_weight(self) -> f32 {
        match self {
            CompensationType::KneeValgus => 1.0,
            CompensationType::TrunkLean => 0.8,
            CompensationType::PelvicTilt => 0.7,
            CompensationType::ShoulderHiking => 0.6,
            CompensationType::ShoulderCompensation => 0.5,
            CompensationType::HeelLift => 0.5,
            CompensationType::WristDeviation => 0.4,
            CompensationType::IncompleteRom => 0.3,
        }
    }

    /// Whether the reported side names the affected limb. Trunk lean and
    /// pelvic tilt report a direction instead.
    pub fn is_limb_specific(self) -> bool {
        !matches!(self, CompensationType::TrunkLean | CompensationType::PelvicTilt)
    }

    /// Units a threshold entry for this type may be expressed in
    pub fn supported_units(self) -> &'static [Unit] {
        match self {
            CompensationType::KneeValgus => &[Unit::Percent, Unit::Normalized],
            CompensationType::IncompleteRom => &[Unit::Percent],
            _ => &[Unit::Degrees],
        }
    }
}

impl fmt::Display for CompensationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Critical,
}

impl Severity {
    pub fn weight(self) -> f32 {
        match self {
            Severity::Warning => 1.0,
            Severity::Critical => 2.0,
        }
    }
}

/// A confirmed compensation episode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Compensation {
    pub kind: CompensationType,
    pub severity: Severity,
    pub side: Side,
    pub magnitude: f32,
    pub unit: Unit,
    pub start_ms: u64,
    pub end_ms: u64,
}

impl Compensation {
    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }
}
