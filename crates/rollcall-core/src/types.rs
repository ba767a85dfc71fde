use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face embedding vector. Its length is fixed by whichever encoder produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Euclidean distance between two embeddings.
    ///
    /// Embeddings of different lengths come from different encoders and are
    /// infinitely far apart.
    pub fn distance(&self, other: &Embedding) -> f32 {
        if self.dim() != other.dim() {
            return f32::INFINITY;
        }
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }
}

/// One face found by an encoder: where it is and what it looks like.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub location: BoundingBox,
    pub embedding: Embedding,
}

/// A known person in the gallery.
///
/// Names are not unique: enrolling the same name twice keeps both records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub name: String,
    pub embedding: Embedding,
}

/// Ordered collection of known identities.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gallery {
    records: Vec<IdentityRecord>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<IdentityRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[IdentityRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<IdentityRecord> {
        self.records
    }

    /// Names in insertion order, duplicates included.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.name.as_str())
    }

    pub fn embeddings(&self) -> impl Iterator<Item = &Embedding> {
        self.records.iter().map(|r| &r.embedding)
    }

    /// Embedding length shared by every record, if there are any.
    pub fn embedding_dim(&self) -> Option<usize> {
        self.records.first().map(|r| r.embedding.dim())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn push(&mut self, record: IdentityRecord) {
        self.records.push(record);
    }
}
