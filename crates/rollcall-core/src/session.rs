//! Per-interaction orchestration: take attendance from a photo, add a person,
//! rebuild the gallery from a folder of photos.
//!
//! A [`Session`] owns the encoder, the in-memory gallery and ledger, and the
//! files behind them. Every operation runs to completion synchronously and
//! either commits fully or leaves state as it was.

use crate::annotate::{self, BOX_THICKNESS, RECOGNIZED_COLOR};
use crate::archive::ImageArchive;
use crate::encoder::{EncoderError, FaceEncoder};
use crate::enroll::{self, EnrollError};
use crate::gallery::{GalleryError, GalleryStore};
use crate::ledger::{Ledger, LedgerError, LedgerFile};
use crate::matcher::{EuclideanMatcher, MatchOutcome, Matcher};
use crate::types::{BoundingBox, Gallery};
use image::RgbImage;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Photo extensions picked up when rebuilding from a directory.
const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("no face detected in the image")]
    NoFaceDetected,
    #[error(transparent)]
    Enroll(#[from] EnrollError),
    #[error(transparent)]
    Gallery(#[from] GalleryError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("face encoder: {0}")]
    Encoder(#[from] EncoderError),
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
    #[error("i/o on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SessionError {
    /// Errors caused by what the user submitted rather than by the system.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            SessionError::NoFaceDetected
                | SessionError::Enroll(EnrollError::MissingName | EnrollError::NoFaceDetected)
        )
    }
}

/// Files a session reads and writes.
#[derive(Debug, Clone)]
pub struct Paths {
    pub gallery: PathBuf,
    pub ledger: PathBuf,
    pub images: PathBuf,
}

/// What happened to one face in a submitted photo.
#[derive(Debug, Clone, Serialize)]
pub struct FaceReport {
    pub location: BoundingBox,
    pub outcome: MatchOutcome,
    /// True if this face produced a new ledger row.
    pub newly_marked: bool,
    /// Why a recognized person could not be written to the ledger.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mark_error: Option<String>,
}

/// Result of submitting a photo for attendance.
#[derive(Debug, Clone)]
pub struct AttendanceReport {
    /// One report per detected face, in detection order.
    pub faces: Vec<FaceReport>,
    /// The submitted photo with recognized faces outlined.
    pub annotated: RgbImage,
}

impl AttendanceReport {
    pub fn recognized(&self) -> impl Iterator<Item = &str> {
        self.faces.iter().filter_map(|f| f.outcome.name())
    }

    pub fn newly_marked(&self) -> impl Iterator<Item = &str> {
        self.faces
            .iter()
            .filter(|f| f.newly_marked)
            .filter_map(|f| f.outcome.name())
    }

    pub fn unknown_count(&self) -> usize {
        self.faces.iter().filter(|f| !f.outcome.is_recognized()).count()
    }

    /// Recognized faces whose ledger write failed.
    pub fn unrecorded(&self) -> impl Iterator<Item = &FaceReport> {
        self.faces.iter().filter(|f| f.mark_error.is_some())
    }
}

/// Result of adding a person.
#[derive(Debug, Clone, Serialize)]
pub struct EnrollReport {
    pub name: String,
    pub index: usize,
    pub archived: PathBuf,
    /// Faces found in the photo; only the first was enrolled.
    pub faces_detected: usize,
}

/// Result of rebuilding the gallery from a directory.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RebuildReport {
    pub encoded: Vec<String>,
    pub skipped: Vec<SkippedImage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedImage {
    pub path: PathBuf,
    pub reason: String,
}

pub struct Session<E> {
    encoder: E,
    matcher: EuclideanMatcher,
    tolerance: f32,
    gallery_store: GalleryStore,
    gallery: Gallery,
    ledger_file: LedgerFile,
    ledger: Ledger,
    archive: ImageArchive,
}

impl<E: FaceEncoder> Session<E> {
    /// Load gallery and ledger from `paths`.
    ///
    /// `tolerance` overrides the encoder's own. A corrupt gallery fails here;
    /// a corrupt ledger is replaced with an empty one.
    pub fn open(encoder: E, paths: &Paths, tolerance: Option<f32>) -> Result<Self, SessionError> {
        let gallery_store = GalleryStore::new(&paths.gallery);
        let gallery = gallery_store.load()?;
        let ledger_file = LedgerFile::new(&paths.ledger);
        let ledger = ledger_file.load();
        let tolerance = tolerance.unwrap_or_else(|| encoder.tolerance());

        tracing::info!(
            identities = gallery.len(),
            attendance = ledger.len(),
            tolerance,
            "session opened"
        );

        Ok(Self {
            encoder,
            matcher: EuclideanMatcher,
            tolerance,
            gallery_store,
            gallery,
            ledger_file,
            ledger,
            archive: ImageArchive::new(&paths.images),
        })
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn tolerance(&self) -> f32 {
        self.tolerance
    }

    /// Recognize every face in `image` and mark each recognized person present.
    ///
    /// A failed ledger write is recorded on that face's report and the
    /// remaining faces are still processed, so the report always matches
    /// what reached the ledger file.
    pub fn take_attendance(&mut self, image: &RgbImage) -> Result<AttendanceReport, SessionError> {
        let faces = self.encoder.encode(image)?;
        if faces.is_empty() {
            tracing::warn!("attendance: no face detected");
            return Err(SessionError::NoFaceDetected);
        }
        tracing::debug!(count = faces.len(), "attendance: faces detected");

        let mut annotated = image.clone();
        let mut reports = Vec::with_capacity(faces.len());

        for face in faces {
            let outcome = self
                .matcher
                .best_match(&face.embedding, &self.gallery, self.tolerance);

            let (newly_marked, mark_error) = match &outcome {
                MatchOutcome::Recognized { name, distance, .. } => {
                    tracing::info!(name = %name, distance, "attendance: recognized");
                    annotate::draw_box(&mut annotated, &face.location, RECOGNIZED_COLOR, BOX_THICKNESS);
                    match self.ledger.mark_present(name, &mut self.ledger_file) {
                        Ok(marked) => (marked, None),
                        Err(e) => {
                            tracing::error!(name = %name, error = %e, "attendance: could not record");
                            (false, Some(e.to_string()))
                        }
                    }
                }
                MatchOutcome::Unknown { nearest } => {
                    tracing::info!(?nearest, "attendance: face not recognized");
                    (false, None)
                }
            };

            reports.push(FaceReport { location: face.location, outcome, newly_marked, mark_error });
        }

        Ok(AttendanceReport { faces: reports, annotated })
    }

    /// Enroll the first face in `image` under `name`.
    ///
    /// The gallery is saved before the archived photo replaces any earlier
    /// one for the same name, and before the new record becomes visible to
    /// matching.
    pub fn add_person(&mut self, name: &str, image: &RgbImage) -> Result<EnrollReport, SessionError> {
        let name = enroll::validate_name(name)?.to_string();

        let faces = self.encoder.encode(image)?;
        let faces_detected = faces.len();
        if faces_detected > 1 {
            tracing::warn!(faces = faces_detected, name = %name, "add person: several faces, using the first");
        }
        let embedding = faces.into_iter().next().map(|f| f.embedding);
        if embedding.is_none() {
            return Err(EnrollError::NoFaceDetected.into());
        }

        let mut candidate = self.gallery.clone();
        let index = enroll::enroll(&mut candidate, &name, embedding)?;

        let staged = self.archive.stage(&name, image)?;
        let dest = staged.path().to_path_buf();
        self.gallery_store.save(&candidate)?;
        self.gallery = candidate;

        let archived = staged
            .commit()
            .map_err(|source| SessionError::Io { path: dest, source })?;

        Ok(EnrollReport { name, index, archived, faces_detected })
    }

    /// Replace the gallery with one record per photo in `dir`.
    ///
    /// Each photo's file stem becomes the name and its first face the
    /// embedding. Photos that fail to decode or contain no face are skipped.
    pub fn rebuild_gallery(&mut self, dir: &Path) -> Result<RebuildReport, SessionError> {
        let mut paths: Vec<PathBuf> = fs::read_dir(dir)
            .map_err(|source| SessionError::Io { path: dir.to_path_buf(), source })?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && has_image_extension(p))
            .collect();
        paths.sort();

        let mut rebuilt = Gallery::new();
        let mut report = RebuildReport::default();

        for path in paths {
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();

            let image = match image::open(&path) {
                Ok(img) => img.to_rgb8(),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "rebuild: could not read image");
                    report.skipped.push(SkippedImage { path, reason: e.to_string() });
                    continue;
                }
            };

            let embedding = self.encoder.encode(&image)?.into_iter().next().map(|f| f.embedding);
            match enroll::enroll(&mut rebuilt, &name, embedding) {
                Ok(_) => report.encoded.push(name),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "rebuild: skipped");
                    report.skipped.push(SkippedImage { path, reason: e.to_string() });
                }
            }
        }

        self.gallery_store.save(&rebuilt)?;
        self.gallery = rebuilt;
        tracing::info!(
            encoded = report.encoded.len(),
            skipped = report.skipped.len(),
            "gallery rebuilt"
        );
        Ok(report)
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.iter().any(|x| x.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DetectedFace, Embedding};
    use std::collections::HashMap;
    use std::fs;

    /// Encoder that looks up faces by the red channel of pixel (0, 0).
    #[derive(Default)]
    struct ScriptedEncoder {
        faces: HashMap<u8, Vec<DetectedFace>>,
        calls: usize,
    }

    impl ScriptedEncoder {
        fn with(mut self, key: u8, embeddings: &[&[f32]]) -> Self {
            let faces = embeddings
                .iter()
                .enumerate()
                .map(|(i, values)| DetectedFace {
                    location: BoundingBox {
                        x: 2.0 + 12.0 * i as f32,
                        y: 2.0,
                        width: 8.0,
                        height: 8.0,
                        confidence: 0.9,
                        landmarks: None,
                    },
                    embedding: Embedding::new(values.to_vec()),
                })
                .collect();
            self.faces.insert(key, faces);
            self
        }
    }

    impl FaceEncoder for ScriptedEncoder {
        fn encode(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, EncoderError> {
            self.calls += 1;
            let key = image.get_pixel(0, 0).0[0];
            Ok(self.faces.get(&key).cloned().unwrap_or_default())
        }
    }

    fn photo(key: u8) -> RgbImage {
        RgbImage::from_pixel(32, 16, image::Rgb([key, 0, 0]))
    }

    fn paths(dir: &Path) -> Paths {
        Paths {
            gallery: dir.join("face_encodings.bin"),
            ledger: dir.join("attendance.csv"),
            images: dir.join("images"),
        }
    }

    const CAROL: &[f32] = &[0.9, 0.1, 0.0];
    const STRANGER: &[f32] = &[-5.0, 5.0, 5.0];

    #[test]
    fn test_add_person_then_recognize() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = ScriptedEncoder::default().with(1, &[CAROL]);
        let mut session = Session::open(encoder, &paths(dir.path()), None).unwrap();

        let report = session.add_person("Carol", &photo(1)).unwrap();
        assert_eq!(report.index, 0);
        assert_eq!(report.faces_detected, 1);
        assert!(report.archived.ends_with("images/Carol.jpg"));
        assert!(report.archived.exists());

        let attendance = session.take_attendance(&photo(1)).unwrap();
        assert_eq!(attendance.recognized().collect::<Vec<_>>(), ["Carol"]);
        assert_eq!(session.ledger().len(), 1);
    }

    #[test]
    fn test_added_person_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let p = paths(dir.path());
        {
            let encoder = ScriptedEncoder::default().with(1, &[CAROL]);
            let mut session = Session::open(encoder, &p, None).unwrap();
            session.add_person("Carol", &photo(1)).unwrap();
        }
        let session = Session::open(ScriptedEncoder::default(), &p, None).unwrap();
        assert_eq!(session.gallery().names().collect::<Vec<_>>(), ["Carol"]);
    }

    #[test]
    fn test_one_known_one_unknown_face() {
        for order in [[CAROL, STRANGER], [STRANGER, CAROL]] {
            let dir = tempfile::tempdir().unwrap();
            let encoder = ScriptedEncoder::default().with(1, &[CAROL]).with(2, &order);
            let mut session = Session::open(encoder, &paths(dir.path()), None).unwrap();
            session.add_person("Carol", &photo(1)).unwrap();

            let report = session.take_attendance(&photo(2)).unwrap();

            assert_eq!(report.faces.len(), 2);
            assert_eq!(report.recognized().collect::<Vec<_>>(), ["Carol"]);
            assert_eq!(report.unknown_count(), 1);
            assert_eq!(report.newly_marked().collect::<Vec<_>>(), ["Carol"]);
            assert_eq!(session.ledger().len(), 1);
            assert!(session.ledger().contains("Carol"));
        }
    }

    #[test]
    fn test_unknown_face_is_not_outlined() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = ScriptedEncoder::default().with(1, &[CAROL]).with(2, &[STRANGER, CAROL]);
        let mut session = Session::open(encoder, &paths(dir.path()), None).unwrap();
        session.add_person("Carol", &photo(1)).unwrap();

        let report = session.take_attendance(&photo(2)).unwrap();

        // First face (stranger) at x=2, second (Carol) at x=14.
        assert_eq!(*report.annotated.get_pixel(2, 2), image::Rgb([2, 0, 0]));
        assert_eq!(*report.annotated.get_pixel(14, 2), RECOGNIZED_COLOR);
    }

    #[test]
    fn test_repeat_attendance_marks_once() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = ScriptedEncoder::default().with(1, &[CAROL]);
        let mut session = Session::open(encoder, &paths(dir.path()), None).unwrap();
        session.add_person("Carol", &photo(1)).unwrap();

        let first = session.take_attendance(&photo(1)).unwrap();
        let second = session.take_attendance(&photo(1)).unwrap();

        assert!(first.faces[0].newly_marked);
        assert!(!second.faces[0].newly_marked);
        assert_eq!(second.recognized().count(), 1);
        assert_eq!(session.ledger().len(), 1);

        let on_disk = fs::read_to_string(dir.path().join("attendance.csv")).unwrap();
        assert_eq!(on_disk.lines().count(), 2);
    }

    #[test]
    fn test_empty_gallery_reports_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = ScriptedEncoder::default().with(1, &[CAROL]);
        let mut session = Session::open(encoder, &paths(dir.path()), None).unwrap();

        let report = session.take_attendance(&photo(1)).unwrap();
        assert_eq!(report.faces[0].outcome, MatchOutcome::Unknown { nearest: None });
        assert!(session.ledger().is_empty());
        assert!(!dir.path().join("attendance.csv").exists());
    }

    #[test]
    fn test_no_face_in_attendance_photo() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::open(ScriptedEncoder::default(), &paths(dir.path()), None).unwrap();

        let err = session.take_attendance(&photo(9)).unwrap_err();
        assert!(matches!(err, SessionError::NoFaceDetected));
        assert!(err.is_user_error());
    }

    #[test]
    fn test_add_person_without_name_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = ScriptedEncoder::default().with(1, &[CAROL]);
        let mut session = Session::open(encoder, &paths(dir.path()), None).unwrap();

        let err = session.add_person("   ", &photo(1)).unwrap_err();

        assert!(matches!(err, SessionError::Enroll(EnrollError::MissingName)));
        assert!(err.is_user_error());
        assert!(session.gallery().is_empty());
        assert_eq!(session.encoder.calls, 0);
        assert!(!dir.path().join("face_encodings.bin").exists());
        assert!(!dir.path().join("images").exists());
    }

    #[test]
    fn test_add_person_without_face_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::open(ScriptedEncoder::default(), &paths(dir.path()), None).unwrap();

        let err = session.add_person("Carol", &photo(7)).unwrap_err();

        assert!(matches!(err, SessionError::Enroll(EnrollError::NoFaceDetected)));
        assert!(session.gallery().is_empty());
        assert!(!dir.path().join("face_encodings.bin").exists());
        assert!(!dir.path().join("images").exists());
    }

    #[test]
    fn test_add_person_uses_first_of_several_faces() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = ScriptedEncoder::default().with(1, &[CAROL, STRANGER]);
        let mut session = Session::open(encoder, &paths(dir.path()), None).unwrap();

        let report = session.add_person("Carol", &photo(1)).unwrap();

        assert_eq!(report.faces_detected, 2);
        assert_eq!(session.gallery().records()[0].embedding.values, CAROL);
    }

    #[test]
    fn test_corrupt_gallery_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        let p = paths(dir.path());
        fs::write(&p.gallery, [0xffu8; 16]).unwrap();

        let err = Session::open(ScriptedEncoder::default(), &p, None).err().unwrap();
        assert!(matches!(err, SessionError::Gallery(GalleryError::CorruptGallery { .. })));
        assert!(!err.is_user_error());
    }

    #[test]
    fn test_corrupt_ledger_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let p = paths(dir.path());
        fs::write(&p.ledger, "Who,When\nx,y\n").unwrap();

        let session = Session::open(ScriptedEncoder::default(), &p, None).unwrap();
        assert!(session.ledger().is_empty());
    }

    #[test]
    fn test_tolerance_override() {
        let dir = tempfile::tempdir().unwrap();
        const ORIGIN: &[f32] = &[0.0, 0.0];
        const HALF_AWAY: &[f32] = &[0.0, 0.5];
        let encoder = ScriptedEncoder::default().with(1, &[ORIGIN]).with(2, &[HALF_AWAY]);
        let mut session = Session::open(encoder, &paths(dir.path()), Some(0.3)).unwrap();
        assert_eq!(session.tolerance(), 0.3);

        session.add_person("Dana", &photo(1)).unwrap();
        let report = session.take_attendance(&photo(2)).unwrap();
        assert_eq!(report.unknown_count(), 1);
    }

    #[test]
    fn test_rebuild_gallery_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        let photos = dir.path().join("photos");
        fs::create_dir(&photos).unwrap();
        photo(1).save(photos.join("carol.png")).unwrap();
        photo(2).save(photos.join("bob.png")).unwrap();
        photo(3).save(photos.join("nobody.png")).unwrap();
        fs::write(photos.join("broken.jpg"), b"not a jpeg").unwrap();
        fs::write(photos.join("notes.txt"), b"ignored").unwrap();

        let encoder = ScriptedEncoder::default()
            .with(1, &[CAROL])
            .with(2, &[STRANGER, CAROL]);
        let mut session = Session::open(encoder, &paths(dir.path()), None).unwrap();
        session.add_person("Old", &photo(1)).unwrap();

        let report = session.rebuild_gallery(&photos).unwrap();

        assert_eq!(report.encoded, ["bob", "carol"]);
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(session.gallery().names().collect::<Vec<_>>(), ["bob", "carol"]);
        assert_eq!(session.gallery().records()[0].embedding.values, STRANGER);

        let reopened = Session::open(ScriptedEncoder::default(), &paths(dir.path()), None).unwrap();
        assert_eq!(reopened.gallery(), session.gallery());
    }

    #[test]
    fn test_image_extension_filter() {
        assert!(has_image_extension(Path::new("a/b.JPG")));
        assert!(has_image_extension(Path::new("b.jpeg")));
        assert!(!has_image_extension(Path::new("b.gif")));
        assert!(!has_image_extension(Path::new("jpg")));
    }

    #[test]
    fn test_failed_ledger_write_is_reported_per_face() {
        let dir = tempfile::tempdir().unwrap();
        let p = paths(dir.path());
        const DANA: &[f32] = &[0.0, 0.0, 0.9];
        let encoder = ScriptedEncoder::default()
            .with(1, &[CAROL])
            .with(2, &[DANA])
            .with(3, &[CAROL, STRANGER, DANA]);
        let mut session = Session::open(encoder, &p, None).unwrap();
        session.add_person("Carol", &photo(1)).unwrap();
        session.add_person("Dana", &photo(2)).unwrap();
        fs::create_dir(&p.ledger).unwrap();

        let report = session.take_attendance(&photo(3)).unwrap();

        assert_eq!(report.recognized().collect::<Vec<_>>(), ["Carol", "Dana"]);
        assert_eq!(report.newly_marked().count(), 0);
        assert_eq!(report.unrecorded().count(), 2);
        assert!(report.faces[1].mark_error.is_none());
        assert!(session.ledger().is_empty());
    }

    #[test]
    fn test_failed_gallery_save_keeps_archived_photo() {
        let dir = tempfile::tempdir().unwrap();
        let p = paths(dir.path());
        let retake = RgbImage::from_pixel(8, 8, image::Rgb([2, 0, 0]));
        let encoder = ScriptedEncoder::default().with(1, &[CAROL]).with(2, &[CAROL]);
        let mut session = Session::open(encoder, &p, None).unwrap();
        let first = session.add_person("Carol", &photo(1)).unwrap();

        fs::remove_file(&p.gallery).unwrap();
        fs::create_dir(&p.gallery).unwrap();
        let err = session.add_person("Carol", &retake).unwrap_err();

        assert!(matches!(err, SessionError::Gallery(GalleryError::Io { .. })));
        assert_eq!(session.gallery().len(), 1);
        let archived = image::open(&first.archived).unwrap();
        assert_eq!((archived.width(), archived.height()), (32, 16));
        assert_eq!(fs::read_dir(&p.images).unwrap().count(), 1);
    }

    #[test]
    fn test_add_person_keeps_name_as_given() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = ScriptedEncoder::default().with(1, &[CAROL]);
        let mut session = Session::open(encoder, &paths(dir.path()), None).unwrap();

        let report = session.add_person(" Carol ", &photo(1)).unwrap();

        assert_eq!(report.name, " Carol ");
        assert_eq!(session.gallery().names().collect::<Vec<_>>(), [" Carol "]);
    }
}
