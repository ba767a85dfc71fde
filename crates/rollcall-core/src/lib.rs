//! rollcall-core — Face gallery, matching and attendance ledger.
//!
//! Face detection and embedding extraction sit behind the [`FaceEncoder`]
//! trait. This crate decides who a face belongs to, remembers who has been
//! seen, and keeps both on disk.

pub mod annotate;
pub mod archive;
pub mod encoder;
pub mod enroll;
pub mod gallery;
pub mod ledger;
pub mod matcher;
pub mod session;
pub mod types;

pub use encoder::{EncoderError, FaceEncoder, DEFAULT_TOLERANCE};
pub use enroll::EnrollError;
pub use gallery::{GalleryError, GalleryStore};
pub use ledger::{AttendanceEntry, Ledger, LedgerError, LedgerFile, LedgerSink};
pub use matcher::{EuclideanMatcher, MatchOutcome, Matcher};
pub use session::{AttendanceReport, EnrollReport, Paths, RebuildReport, Session, SessionError};
pub use types::{BoundingBox, DetectedFace, Embedding, Gallery, IdentityRecord};
