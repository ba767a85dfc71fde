//! Gallery snapshot persistence.
//!
//! The gallery lives in a single binary file: a versioned `postcard` encoding
//! of every identity record in order. Saves go to `<path>.tmp` first and are
//! renamed over the target, so a reader never sees a half-written snapshot.
//!
//! A snapshot that exists but cannot be decoded is an error, never an empty
//! gallery: silently starting over would forget everyone who enrolled.

use crate::types::{Gallery, IdentityRecord};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Current snapshot format version.
const SNAPSHOT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("gallery snapshot {path} is corrupt: {reason}")]
    CorruptGallery { path: PathBuf, reason: String },
    #[error("gallery i/o on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Serialize, Deserialize)]
struct GallerySnapshot {
    version: u32,
    records: Vec<IdentityRecord>,
}

/// File-backed store for the gallery snapshot.
#[derive(Debug, Clone)]
pub struct GalleryStore {
    path: PathBuf,
}

impl GalleryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot. A missing file is an empty gallery.
    pub fn load(&self) -> Result<Gallery, GalleryError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "no gallery snapshot; starting empty");
                return Ok(Gallery::new());
            }
            Err(source) => {
                return Err(GalleryError::Io { path: self.path.clone(), source });
            }
        };

        let snapshot: GallerySnapshot =
            postcard::from_bytes(&bytes).map_err(|e| self.corrupt(e.to_string()))?;

        if snapshot.version != SNAPSHOT_VERSION {
            return Err(self.corrupt(format!(
                "unsupported snapshot version {} (expected {SNAPSHOT_VERSION})",
                snapshot.version
            )));
        }

        if let Some(first) = snapshot.records.first() {
            let dim = first.embedding.dim();
            if let Some(odd) = snapshot.records.iter().find(|r| r.embedding.dim() != dim) {
                return Err(self.corrupt(format!(
                    "record {:?} has a {}-value embedding, expected {dim}",
                    odd.name,
                    odd.embedding.dim()
                )));
            }
        }

        tracing::info!(
            path = %self.path.display(),
            records = snapshot.records.len(),
            "loaded gallery snapshot"
        );
        Ok(Gallery::from_records(snapshot.records))
    }

    /// Replace the snapshot with `gallery`.
    pub fn save(&self, gallery: &Gallery) -> Result<(), GalleryError> {
        let snapshot = GallerySnapshot {
            version: SNAPSHOT_VERSION,
            records: gallery.records().to_vec(),
        };
        let bytes = postcard::to_stdvec(&snapshot).map_err(|e| GalleryError::Io {
            path: self.path.clone(),
            source: io::Error::new(io::ErrorKind::InvalidData, e),
        })?;

        write_atomically(&self.path, &bytes)
            .map_err(|source| GalleryError::Io { path: self.path.clone(), source })?;

        tracing::info!(
            path = %self.path.display(),
            records = gallery.len(),
            bytes = bytes.len(),
            "saved gallery snapshot"
        );
        Ok(())
    }

    fn corrupt(&self, reason: String) -> GalleryError {
        GalleryError::CorruptGallery { path: self.path.clone(), reason }
    }
}

/// Write `bytes` to `<path>.tmp`, fsync, then rename over `path`.
pub(crate) fn write_atomically(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let tmp_path = tmp_path_for(path);
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)
}

pub(crate) fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
