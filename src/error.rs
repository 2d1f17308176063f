use thiserror::Error;

use crate::pose::JointName;

/// Errors raised by the measurement core.
///
/// Per-frame variants (`SchemaMismatch`, `LowConfidence`, `MissingLandmark`,
/// `DegenerateGeometry`) are scoped to one frame or one joint; the session keeps
/// processing. `ConfigValidation` is fatal at load time.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Unregistered schema tag or a landmark array of the wrong length
    #[error("schema mismatch for tag '{tag}': expected {expected:?} points, got {actual}")]
    SchemaMismatch {
        tag: String,
        expected: Option<usize>,
        actual: usize,
    },

    /// A required landmark is below the usable confidence
    #[error("{joint} confidence {confidence:.2} below usable threshold {threshold:.2}")]
    LowConfidence {
        joint: JointName,
        confidence: f32,
        threshold: f32,
    },

    /// A required landmark is absent from the frame
    #[error("{0} missing from frame")]
    MissingLandmark(JointName),

    /// Zero-length or coincident vectors
    #[error("degenerate geometry: {0}")]
    DegenerateGeometry(String),

    /// Threshold ordering or other configuration invariant violated
    #[error("invalid configuration: {0}")]
    ConfigValidation(String),
}

pub type Result<T> = std::result::Result<T, Error>;
