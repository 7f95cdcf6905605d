use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use env_logger::Builder;
use log::{info, LevelFilter};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use idpa_store::config::AppConfig;
use idpa_store::manager::{AnnotationStorageManager, ApplicationStorageManager};
use idpa_store::model::{
    AnnotationValidityReport, Application, ApplicationAnnotation, ApplicationChangeType, VersionOrTimestamp,
};
use idpa_store::store::{DocumentCodec, IdpaStorage};

#[derive(Parser, Debug)]
#[command(name = "idpa-store", version, about = "Versioned application and annotation store")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store an application model, merging it into the version timeline
    SaveApplication {
        tag: String,
        file: PathBuf,
        /// Change types that are detected but not written
        ignored: Vec<ApplicationChangeType>,
    },
    /// Validate and store an annotation
    SaveAnnotation { tag: String, file: PathBuf },
    /// Broken state at a version and the repair proposal, if any
    Broken { tag: String, version: VersionOrTimestamp },
    /// Changes from the application at a version to the latest one
    Delta { tag: String, version: VersionOrTimestamp },
    /// Every version slot of a tag
    History { tag: String },
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct BrokenState {
    version: VersionOrTimestamp,
    broken: bool,
    broken_versions: Vec<VersionOrTimestamp>,
    fixed: Option<ApplicationAnnotation>,
    report: Option<AnnotationValidityReport>,
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct HistoryEntry {
    version: VersionOrTimestamp,
    application: bool,
    annotation: bool,
    broken: bool,
}

fn main() -> Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    let config = AppConfig::load()?;

    let level = config
        .logging
        .level
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::Info);
    // RUST_LOG still wins over the configured level
    Builder::new().filter_level(level).parse_default_env().init();

    let cli = Cli::parse();
    let storage = config.storage()?;
    info!(
        "Using storage at {} ({:?})",
        config.storage.root.display(),
        config.storage.format
    );

    let applications = ApplicationStorageManager::new(storage.clone());
    let annotations = AnnotationStorageManager::new(storage.clone());

    match cli.command {
        Command::SaveApplication { tag, file, ignored } => {
            let application: Application = read_document(&file)?;
            let ignored: BTreeSet<ApplicationChangeType> = ignored.into_iter().collect();
            let report = applications.save_or_update(&tag, application, &ignored)?;
            print_json(&report)?;
        }
        Command::SaveAnnotation { tag, file } => {
            let annotation: ApplicationAnnotation = read_document(&file)?;
            let report = annotations.save_or_update(&tag, annotation)?;
            print_json(&report)?;
        }
        Command::Broken { tag, version } => {
            let (fixed, report) = annotations.read_fixed(&tag, &version)?.unzip();
            print_json(&BrokenState {
                broken: annotations.is_broken(&tag, &version)?,
                broken_versions: annotations.broken_versions(&tag, &version)?,
                version,
                fixed,
                report,
            })?;
        }
        Command::Delta { tag, version } => {
            print_json(&applications.changes_since(&tag, &version)?)?;
        }
        Command::History { tag } => {
            let history: Vec<HistoryEntry> = storage
                .iterate(&tag)?
                .into_iter()
                .map(|entry| HistoryEntry {
                    application: entry.has_own_application(),
                    annotation: entry.annotation.is_some(),
                    broken: entry.broken,
                    version: entry.version,
                })
                .collect();
            print_json(&history)?;
        }
    }

    Ok(())
}

/// Input documents are decoded by file extension, independent of the storage format
fn read_document<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let codec = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => DocumentCodec::json(),
        _ => DocumentCodec::yaml(),
    };
    codec
        .decode(&raw)
        .with_context(|| format!("Failed to decode {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
