//! mlw-worker - element worker entry point
//!
//! Runs the transcription summary worker: for each element it counts the
//! transcriptions found on the element and its descendants, and publishes the
//! count as numeric metadata.

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use futures::TryStreamExt;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mlw_worker::cli::Args;
use mlw_worker::config::WorkerSettings;
use mlw_worker::publishers::{MetaType, NewMetadata, TranscriptionFilter};
use mlw_worker::{Element, ElementProcessor, ElementsWorker, Publishers, WorkerError};

const DEFAULT_METADATA_NAME: &str = "transcription_count";

/// Publishes the number of transcriptions under each element
struct TranscriptionSummary {
    metadata_name: String,
}

#[async_trait]
impl ElementProcessor for TranscriptionSummary {
    async fn configure(&mut self, settings: &WorkerSettings) -> Result<()> {
        if let Some(name) = settings.configuration.get("metadata_name").and_then(|v| v.as_str()) {
            self.metadata_name = name.to_string();
        }
        Ok(())
    }

    async fn process_element(&mut self, element: &Element, publishers: &Publishers) -> Result<()> {
        let count = publishers
            .transcriptions
            .list_transcriptions(element, &TranscriptionFilter::recursive())
            .await?
            .try_fold(0usize, |count, _| async move { Ok(count + 1) })
            .await?;
        info!(element_id = %element.id, count, "Counted transcriptions");

        publishers
            .metadata
            .create_metadata(
                element,
                NewMetadata::new(MetaType::Numeric, &self.metadata_name, count.to_string()),
            )
            .await?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting mlw-worker {}", env!("CARGO_PKG_VERSION"));

    let worker = match ElementsWorker::from_args(args) {
        Ok(worker) => worker,
        Err(e) => {
            error!("Failed to set up the worker: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut processor = TranscriptionSummary {
        metadata_name: DEFAULT_METADATA_NAME.to_string(),
    };

    match worker.run(&mut processor).await {
        Ok(summary) => {
            info!(
                processed = summary.processed,
                skipped = summary.skipped,
                failed = summary.failed,
                "Worker finished"
            );
            ExitCode::SUCCESS
        }
        Err(WorkerError::NoElements) => {
            warn!("No elements to process, stopping");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
