//! Per-person copies of enrollment photos.

use crate::gallery::tmp_path_for;
use image::RgbImage;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Directory of `<name>.jpg` files, one per enrolled name.
///
/// Enrolling a name that already has a photo replaces it.
#[derive(Debug, Clone)]
pub struct ImageArchive {
    dir: PathBuf,
}

impl ImageArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where the photo for `name` lives.
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.jpg", file_safe(name)))
    }

    /// Write `image` as the photo for `name`, creating the directory if needed.
    pub fn store(&self, name: &str, image: &RgbImage) -> image::ImageResult<PathBuf> {
        Ok(self.stage(name, image)?.commit()?)
    }

    /// Write `image` beside its final path without replacing any existing
    /// photo for `name`. Nothing changes until [`StagedImage::commit`].
    pub fn stage(&self, name: &str, image: &RgbImage) -> image::ImageResult<StagedImage> {
        fs::create_dir_all(&self.dir)?;
        let dest = self.path_for(name);
        let tmp = tmp_path_for(&dest);
        image.save_with_format(&tmp, image::ImageFormat::Jpeg)?;
        Ok(StagedImage { tmp: Some(tmp), dest })
    }
}

/// An archived photo waiting to replace its final path.
///
/// Dropping it without committing removes the staged file.
#[derive(Debug)]
pub struct StagedImage {
    tmp: Option<PathBuf>,
    dest: PathBuf,
}

impl StagedImage {
    pub fn path(&self) -> &Path {
        &self.dest
    }

    pub fn commit(mut self) -> io::Result<PathBuf> {
        if let Some(tmp) = self.tmp.take() {
            fs::rename(&tmp, &self.dest)?;
        }
        tracing::info!(path = %self.dest.display(), "archived enrollment image");
        Ok(self.dest.clone())
    }
}

impl Drop for StagedImage {
    fn drop(&mut self) {
        if let Some(tmp) = self.tmp.take() {
            if let Err(e) = fs::remove_file(&tmp) {
                tracing::warn!(path = %tmp.display(), error = %e, "could not remove staged image");
            }
        }
    }
}

/// Keep a name inside the archive directory.
fn file_safe(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => format!("_{cleaned}"),
        _ => cleaned,
    }
}
