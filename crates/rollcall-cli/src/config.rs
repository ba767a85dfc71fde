use anyhow::{Context, Result};
use rollcall_core::Paths;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Optional `rollcall.toml` contents. Every key may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub data_dir: Option<PathBuf>,
    pub gallery_path: Option<PathBuf>,
    pub ledger_path: Option<PathBuf>,
    pub image_dir: Option<PathBuf>,
    pub model_dir: Option<PathBuf>,
    pub tolerance: Option<f32>,
}

impl FileConfig {
    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }
}

/// Resolved configuration: environment over config file over defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Root for every default path below.
    pub data_dir: PathBuf,
    /// Gallery snapshot (default: `<data>/face_encodings.bin`).
    pub gallery_path: PathBuf,
    /// Attendance CSV (default: `<data>/attendance.csv`).
    pub ledger_path: PathBuf,
    /// Archived enrollment photos (default: `<data>/images`).
    pub image_dir: PathBuf,
    /// Directory holding the ONNX models (default: `<data>/models`).
    pub model_dir: PathBuf,
    /// Match tolerance; `None` means use the encoder's.
    pub tolerance: Option<f32>,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables, layered
    /// over the config file named by `file` or `ROLLCALL_CONFIG`.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let file_path = file
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("ROLLCALL_CONFIG").map(PathBuf::from));
        let file_config = match file_path {
            Some(path) => FileConfig::read(&path)?,
            None => FileConfig::default(),
        };
        Ok(Self::resolve(file_config, |key| std::env::var(key).ok()))
    }

    pub fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let env_path = |key: &str| env(key).map(PathBuf::from);

        let data_dir = env_path("ROLLCALL_DATA_DIR")
            .or(file.data_dir)
            .unwrap_or_else(|| default_data_dir(&env));

        let file_tolerance = file.tolerance.filter(|&t| {
            let ok = valid_tolerance(t);
            if !ok {
                tracing::warn!(value = t, "ignoring invalid tolerance in config file");
            }
            ok
        });
        let tolerance = match env("ROLLCALL_TOLERANCE") {
            Some(raw) => match raw.parse::<f32>() {
                Ok(t) if valid_tolerance(t) => Some(t),
                _ => {
                    tracing::warn!(value = %raw, "ignoring invalid ROLLCALL_TOLERANCE");
                    file_tolerance
                }
            },
            None => file_tolerance,
        };

        Self {
            gallery_path: env_path("ROLLCALL_GALLERY_PATH")
                .or(file.gallery_path)
                .unwrap_or_else(|| data_dir.join("face_encodings.bin")),
            ledger_path: env_path("ROLLCALL_LEDGER_PATH")
                .or(file.ledger_path)
                .unwrap_or_else(|| data_dir.join("attendance.csv")),
            image_dir: env_path("ROLLCALL_IMAGE_DIR")
                .or(file.image_dir)
                .unwrap_or_else(|| data_dir.join("images")),
            model_dir: env_path("ROLLCALL_MODEL_DIR")
                .or(file.model_dir)
                .unwrap_or_else(|| data_dir.join("models")),
            tolerance,
            data_dir,
        }
    }

    pub fn paths(&self) -> Paths {
        Paths {
            gallery: self.gallery_path.clone(),
            ledger: self.ledger_path.clone(),
            images: self.image_dir.clone(),
        }
    }
}

fn valid_tolerance(t: f32) -> bool {
    t.is_finite() && t > 0.0
}

fn default_data_dir(env: &impl Fn(&str) -> Option<String>) -> PathBuf {
    env("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}
