//! rollcall-vision — Face detection and embedding extraction.
//!
//! Uses SCRFD for face detection and ArcFace for embeddings, both running via
//! ONNX Runtime on the CPU. [`OnnxEncoder`] plugs the pair into
//! `rollcall_core::FaceEncoder`.

pub mod alignment;
pub mod detector;
pub mod recognizer;

pub use detector::{DetectorError, FaceDetector};
pub use recognizer::{FaceRecognizer, RecognizerError};

use image::RgbImage;
use rollcall_core::{DetectedFace, EncoderError, FaceEncoder};
use std::path::Path;

/// File name of the SCRFD detection model inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
/// File name of the ArcFace recognition model inside the model directory.
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

/// Cosine similarity at which two ArcFace embeddings are the same person.
pub const ARCFACE_MIN_SIMILARITY: f32 = 0.40;

/// Euclidean tolerance equivalent to [`ARCFACE_MIN_SIMILARITY`] on unit vectors.
pub fn arcface_tolerance() -> f32 {
    (2.0 - 2.0 * ARCFACE_MIN_SIMILARITY).sqrt()
}

impl From<DetectorError> for EncoderError {
    fn from(e: DetectorError) -> Self {
        match e {
            DetectorError::ModelNotFound(p) => EncoderError::ModelUnavailable(p),
            other => EncoderError::Failed(format!("detector: {other}")),
        }
    }
}

impl From<RecognizerError> for EncoderError {
    fn from(e: RecognizerError) -> Self {
        match e {
            RecognizerError::ModelNotFound(p) => EncoderError::ModelUnavailable(p),
            other => EncoderError::Failed(format!("recognizer: {other}")),
        }
    }
}

/// SCRFD + ArcFace face encoder.
pub struct OnnxEncoder {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxEncoder {
    /// Load both models from `model_dir`. Fails fast if either is missing.
    pub fn load(model_dir: &Path) -> Result<Self, EncoderError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(RECOGNIZER_MODEL_FILE))?;
        Ok(Self { detector, recognizer })
    }
}

impl FaceEncoder for OnnxEncoder {
    fn encode(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, EncoderError> {
        let boxes = self.detector.detect(image)?;

        let mut faces = Vec::with_capacity(boxes.len());
        for location in boxes {
            if location.landmarks.is_none() {
                tracing::debug!(confidence = location.confidence, "skipping face without landmarks");
                continue;
            }
            let embedding = self.recognizer.extract(image, &location)?;
            faces.push(DetectedFace { location, embedding });
        }
        Ok(faces)
    }

    fn tolerance(&self) -> f32 {
        arcface_tolerance()
    }
}
