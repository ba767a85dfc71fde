use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use image::RgbImage;
use rollcall_core::{FaceEncoder, GalleryStore, LedgerFile, MatchOutcome, Session, SessionError};
use rollcall_vision::OnnxEncoder;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

/// Exit status for rejected input (no name, no face).
const EXIT_USER_ERROR: u8 = 2;

#[derive(Parser)]
#[command(name = "rollcall", about = "Face recognition attendance register")]
struct Cli {
    /// Config file (TOML); ROLLCALL_* environment variables take precedence
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recognize the faces in a photo and mark them present
    Attend {
        /// Photo to check (jpg or png)
        image: PathBuf,
        /// Write the photo with recognized faces outlined to this path
        #[arg(long)]
        annotated: Option<PathBuf>,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add a new person from a photo of their face
    Add {
        /// Name to record attendance under
        #[arg(short, long)]
        name: String,
        /// Photo containing the person's face
        image: PathBuf,
    },
    /// Rebuild the gallery from a directory of photos named after each person
    EncodeDir {
        /// Directory of <name>.jpg / <name>.png photos
        dir: PathBuf,
    },
    /// Show the attendance log
    Log {
        /// Print the log as JSON
        #[arg(long)]
        json: bool,
    },
    /// List enrolled people
    List,
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    tracing::debug!(?config, "configuration resolved");

    let outcome = match cli.command {
        Commands::Attend { image, annotated, json } => {
            attend(&config, &image, annotated.as_deref(), json)
        }
        Commands::Add { name, image } => add(&config, &name, &image),
        Commands::EncodeDir { dir } => encode_dir(&config, &dir),
        Commands::Log { json } => show_log(&config, json),
        Commands::List => list(&config),
    };

    match outcome {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) => match e.downcast_ref::<SessionError>() {
            Some(user) if user.is_user_error() => {
                eprintln!("warning: {user}");
                Ok(ExitCode::from(EXIT_USER_ERROR))
            }
            _ => Err(e),
        },
    }
}

fn open_session(config: &Config) -> Result<Session<OnnxEncoder>> {
    let encoder = OnnxEncoder::load(&config.model_dir)
        .with_context(|| format!("loading face models from {}", config.model_dir.display()))?;
    tracing::info!(tolerance = encoder.tolerance(), "face models loaded");
    Ok(Session::open(encoder, &config.paths(), config.tolerance)?)
}

fn read_image(path: &Path) -> Result<RgbImage> {
    let img = image::open(path).with_context(|| format!("reading image {}", path.display()))?;
    Ok(img.to_rgb8())
}

fn attend(config: &Config, image_path: &Path, annotated_path: Option<&Path>, json: bool) -> Result<()> {
    let image = read_image(image_path)?;
    let mut session = open_session(config)?;
    let report = session.take_attendance(&image)?;

    if let Some(path) = annotated_path {
        report
            .annotated
            .save(path)
            .with_context(|| format!("writing annotated image {}", path.display()))?;
    }

    if json {
        let body = serde_json::json!({
            "faces": report.faces,
            "newly_marked": report.newly_marked().collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        for (i, face) in report.faces.iter().enumerate() {
            match (&face.outcome, &face.mark_error) {
                (MatchOutcome::Recognized { name, distance, .. }, Some(err)) => {
                    println!("face {}: recognized {name} (distance {distance:.3}, not recorded: {err})", i + 1);
                }
                (MatchOutcome::Recognized { name, distance, .. }, None) => {
                    let note = if face.newly_marked { "marked present" } else { "already present" };
                    println!("face {}: recognized {name} (distance {distance:.3}, {note})", i + 1);
                }
                (MatchOutcome::Unknown { .. }, _) => println!("face {}: not recognized", i + 1),
            }
        }
    }

    let unrecorded = report.unrecorded().count();
    if unrecorded > 0 {
        bail!("{unrecorded} recognized face(s) could not be written to {}", config.ledger_path.display());
    }
    Ok(())
}

fn add(config: &Config, name: &str, image_path: &Path) -> Result<()> {
    let image = read_image(image_path)?;
    let mut session = open_session(config)?;
    let report = session.add_person(name, &image)?;

    println!("{} added (photo saved to {})", report.name, report.archived.display());
    if report.faces_detected > 1 {
        println!("note: {} faces in the photo; enrolled the first one", report.faces_detected);
    }
    Ok(())
}

fn encode_dir(config: &Config, dir: &Path) -> Result<()> {
    let mut session = open_session(config)?;
    let report = session
        .rebuild_gallery(dir)
        .with_context(|| format!("rebuilding gallery from {}", dir.display()))?;

    for name in &report.encoded {
        println!("encoded: {name}");
    }
    for skipped in &report.skipped {
        println!("skipped: {} ({})", skipped.path.display(), skipped.reason);
    }
    println!(
        "gallery rebuilt: {} encoded, {} skipped",
        report.encoded.len(),
        report.skipped.len()
    );
    Ok(())
}

fn show_log(config: &Config, json: bool) -> Result<()> {
    let ledger = LedgerFile::new(&config.ledger_path).load();

    if json {
        println!("{}", serde_json::to_string_pretty(ledger.entries())?);
        return Ok(());
    }
    if ledger.is_empty() {
        println!("No attendance recorded");
        return Ok(());
    }
    let width = ledger.entries().iter().map(|e| e.name.len()).max().unwrap_or(4).max(4);
    println!("{:<width$}  Time", "Name");
    for entry in ledger.entries() {
        println!("{:<width$}  {}", entry.name, entry.time);
    }
    Ok(())
}

fn list(config: &Config) -> Result<()> {
    let gallery = GalleryStore::new(&config.gallery_path)
        .load()
        .context("loading gallery")?;

    if gallery.is_empty() {
        println!("No people enrolled");
        return Ok(());
    }
    for (i, name) in gallery.names().enumerate() {
        println!("{:>3}  {name}", i + 1);
    }
    Ok(())
}
