pub mod keypoint;
pub mod schema;

pub use keypoint::{JointName, Landmark, LandmarkFrame, Side};
pub use schema::{RawFrame, RawPoint, Schema, SchemaAdapter};
