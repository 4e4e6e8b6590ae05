//! Command line interface for preparing a TTS dataset from local files

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use clap::Parser;
use log::info;
use uuid::Uuid;

use tts_dataset_prep::notification::LogProgressObserver;
use tts_dataset_prep::storage::{DatasetStore, FileDatasetStore, MemoryDatasetStore};
use tts_dataset_prep::utils::init_logger;
use tts_dataset_prep::{DatasetPipeline, DatasetStatus, NewDataset, PipelineConfig, StorageBackend, TranscriptFormat};

/// Segment source audio by transcript timestamps into a TTS training dataset
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Source audio file (wav, mp3, aac)
    #[arg(short, long)]
    audio: PathBuf,

    /// Transcript file
    #[arg(short, long)]
    transcript: PathBuf,

    /// Transcript format: srt or text
    #[arg(short, long, default_value = "srt")]
    format: String,

    /// Owner of the dataset, a new id is generated when omitted
    #[arg(long)]
    owner: Option<Uuid>,

    /// Dataset name, defaults to the audio file stem
    #[arg(short, long)]
    name: Option<String>,

    #[arg(long)]
    description: Option<String>,

    /// Store objects and records under this directory
    #[arg(long)]
    storage_root: Option<PathBuf>,

    /// JSON configuration file, environment variables are used otherwise
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logger();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => PipelineConfig::from_env().context("Failed to read configuration from the environment")?,
    };
    if let Some(root) = &cli.storage_root {
        config.storage.backend = StorageBackend::Local { root: root.clone() };
    }

    let records: Arc<dyn DatasetStore> = match &config.storage.backend {
        StorageBackend::Local { root } => Arc::new(FileDatasetStore::open(root.join("records"))?),
        StorageBackend::Memory => Arc::new(MemoryDatasetStore::new()),
    };
    let pipeline = DatasetPipeline::from_config(config, records)?;
    let target = pipeline.config().target;
    info!(
        "Segments will be written as {} Hz, {} channel(s), {} bit",
        target.sample_rate, target.channels, target.bits_per_sample
    );

    let transcript_format = TranscriptFormat::from_declared(&cli.format)?;
    let audio = tokio::fs::read(&cli.audio)
        .await
        .with_context(|| format!("Failed to read audio {}", cli.audio.display()))?;
    let transcript = tokio::fs::read(&cli.transcript)
        .await
        .with_context(|| format!("Failed to read transcript {}", cli.transcript.display()))?;

    let name = cli.name.clone().unwrap_or_else(|| {
        cli.audio
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "dataset".to_string())
    });
    pipeline.add_observer(Box::new(LogProgressObserver::with_prefix(format!("{} ", name))));

    let created = pipeline
        .create_dataset(NewDataset {
            owner_id: cli.owner.unwrap_or_else(Uuid::new_v4),
            name,
            description: cli.description.clone(),
            audio: Bytes::from(audio),
            audio_file_name: cli
                .audio
                .file_name()
                .map(|file_name| file_name.to_string_lossy().into_owned()),
            transcript: Bytes::from(transcript),
            transcript_format,
            auto_process: true,
        })
        .await?;

    let dataset = match created.processing {
        Some(handle) => {
            info!("Processing dataset {}", handle.id());
            handle.wait().await?
        }
        None => created.dataset,
    };

    println!("{}", serde_json::to_string_pretty(&dataset)?);

    if !dataset.status.is_terminal() {
        bail!("Dataset {} was left in {} status", dataset.id, dataset.status);
    }
    if dataset.status == DatasetStatus::Failed {
        bail!(
            "Dataset {} failed: {}",
            dataset.id,
            dataset.error_message.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}
