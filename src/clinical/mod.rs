pub mod measurement;
pub mod movement;

pub use measurement::{
    ClinicalGrade, ClinicalJointMeasurement, ClinicalMeasurementService, JointAngleMeasurement,
    RhythmAssessment,
};
pub use movement::{AngleSource, Movement};
