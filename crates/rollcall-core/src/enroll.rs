//! Adding a person to the gallery.

use crate::types::{Embedding, Gallery, IdentityRecord};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EnrollError {
    #[error("a name is required to add a person")]
    MissingName,
    #[error("no face detected in the enrollment image")]
    NoFaceDetected,
    #[error("embedding has {found} values but the gallery holds {expected}-value embeddings")]
    DimensionMismatch { expected: usize, found: usize },
}

/// Reject a blank name. Anything else is kept exactly as given.
pub fn validate_name(name: &str) -> Result<&str, EnrollError> {
    if name.trim().is_empty() {
        return Err(EnrollError::MissingName);
    }
    Ok(name)
}

/// Append `(name, embedding)` to `gallery`.
///
/// Nothing is appended unless both parts are valid. Persisting the result is
/// the caller's job.
pub fn enroll(
    gallery: &mut Gallery,
    name: &str,
    embedding: Option<Embedding>,
) -> Result<usize, EnrollError> {
    let name = validate_name(name)?;
    let embedding = embedding.ok_or(EnrollError::NoFaceDetected)?;
    if let Some(expected) = gallery.embedding_dim() {
        if embedding.dim() != expected {
            return Err(EnrollError::DimensionMismatch { expected, found: embedding.dim() });
        }
    }

    gallery.push(IdentityRecord { name: name.to_string(), embedding });
    let index = gallery.len() - 1;
    tracing::info!(name, index, "enrolled identity");
    Ok(index)
}
