//! # Segment Generation
//!
//! Request model, the remote backend seam, and the single-shot segment generator.

pub mod backend;
pub mod generator;
pub mod request;
pub mod stability;

#[cfg(test)]
pub(crate) mod scripted;

pub use backend::GenerationBackend;
pub use generator::SegmentGenerator;
pub use request::{GenerationParams, GenerationRequest, SeedMode};
pub use stability::StabilityClient;
