//! Nearest-neighbour matching of a probe embedding against the gallery.

use crate::types::{Embedding, Gallery};
use serde::Serialize;

/// Distance from `probe` to every known embedding, in gallery order.
pub fn face_distance<'a, I>(known: I, probe: &Embedding) -> Vec<f32>
where
    I: IntoIterator<Item = &'a Embedding>,
{
    known.into_iter().map(|k| k.distance(probe)).collect()
}

/// Whether each known embedding lies within `tolerance` of `probe`.
pub fn compare_faces<'a, I>(known: I, probe: &Embedding, tolerance: f32) -> Vec<bool>
where
    I: IntoIterator<Item = &'a Embedding>,
{
    face_distance(known, probe)
        .into_iter()
        .map(|d| d <= tolerance)
        .collect()
}

/// Result of matching one face against the gallery.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MatchOutcome {
    Recognized {
        name: String,
        /// Gallery index of the winning record.
        index: usize,
        distance: f32,
    },
    Unknown {
        /// Distance to the nearest record, if the gallery was non-empty.
        nearest: Option<f32>,
    },
}

impl MatchOutcome {
    pub fn name(&self) -> Option<&str> {
        match self {
            MatchOutcome::Recognized { name, .. } => Some(name),
            MatchOutcome::Unknown { .. } => None,
        }
    }

    pub fn is_recognized(&self) -> bool {
        matches!(self, MatchOutcome::Recognized { .. })
    }
}

/// Strategy for comparing a probe embedding against a gallery of enrolled faces.
pub trait Matcher {
    fn best_match(&self, probe: &Embedding, gallery: &Gallery, tolerance: f32) -> MatchOutcome;
}

/// Euclidean nearest-neighbour matcher.
///
/// Picks the closest record (lowest index wins ties) and accepts it only if
/// that record is within tolerance.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn best_match(&self, probe: &Embedding, gallery: &Gallery, tolerance: f32) -> MatchOutcome {
        if gallery.is_empty() {
            return MatchOutcome::Unknown { nearest: None };
        }

        let matches = compare_faces(gallery.embeddings(), probe, tolerance);
        let distances = face_distance(gallery.embeddings(), probe);

        // First occurrence wins: only a strictly smaller distance replaces the best.
        let mut best: Option<(usize, f32)> = None;
        let mut mismatched = 0usize;
        for (i, (&d, known)) in distances.iter().zip(gallery.embeddings()).enumerate() {
            if known.dim() != probe.dim() {
                mismatched += 1;
                continue;
            }
            if d.is_nan() {
                continue;
            }
            if best.map_or(true, |(_, best_d)| d < best_d) {
                best = Some((i, d));
            }
        }

        if mismatched > 0 {
            tracing::warn!(
                mismatched,
                probe_dim = probe.dim(),
                "ignoring gallery records with a different embedding length"
            );
        }

        tracing::debug!(?best, candidates = distances.len(), tolerance, "nearest gallery record");

        match best {
            Some((idx, distance)) if matches[idx] => MatchOutcome::Recognized {
                name: gallery.records()[idx].name.clone(),
                index: idx,
                distance,
            },
            Some((_, distance)) => MatchOutcome::Unknown { nearest: Some(distance) },
            None => MatchOutcome::Unknown { nearest: None },
        }
    }
}
