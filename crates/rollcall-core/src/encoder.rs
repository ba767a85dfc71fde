//! The face encoding seam.
//!
//! Detection and embedding extraction live behind [`FaceEncoder`]; the rest of
//! the crate only sees boxes and vectors.

use crate::types::DetectedFace;
use image::RgbImage;
use thiserror::Error;

/// Distance at or below which two embeddings count as the same person.
pub const DEFAULT_TOLERANCE: f32 = 0.6;

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("model not available: {0}")]
    ModelUnavailable(String),
    #[error("encoding failed: {0}")]
    Failed(String),
}

/// Turns an RGB image into the faces it contains.
pub trait FaceEncoder {
    /// Detect every face in `image` and compute its embedding.
    ///
    /// Faces come back in detection order with location and embedding paired.
    /// An image with no faces yields an empty vector, not an error.
    fn encode(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, EncoderError>;

    /// Match tolerance appropriate for this encoder's embedding space.
    fn tolerance(&self) -> f32 {
        DEFAULT_TOLERANCE
    }
}
