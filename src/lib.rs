pub mod clinical;
pub mod compensation;
pub mod config;
pub mod error;
pub mod feedback;
pub mod geometry;
pub mod pipeline;
pub mod pose;
pub mod synthetic;
pub mod tracker;
pub mod validation;

pub use error::{Error, Result};
pub use pipeline::{build_context, build_context_with, FrameReport, ProcessingContext};
