//! Backfill runner: indexes every image already stored under a bucket prefix.

use anyhow::{Context, Result};
use clap::Parser;
use exif_indexer::config::LogFormat;
use exif_indexer::{
    BackfillDriver, BackfillOptions, CandidateFilter, Config, FolderRepository, Gateway, ImageProcessor, S3Store,
};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "exif-backfill")]
#[command(about = "Index EXIF metadata of images already stored in a bucket")]
struct Args {
    /// Bucket to scan (overrides s3.bucket)
    #[arg(long, env = "INDEXER_BUCKET")]
    bucket: Option<String>,

    /// Only scan keys starting with this prefix
    #[arg(long, env = "INDEXER_PREFIX")]
    prefix: Option<String>,

    /// Images per batch
    #[arg(long, env = "INDEXER_BATCH_SIZE")]
    batch_size: Option<usize>,

    /// Folder groups processed in parallel inside a batch
    #[arg(long, env = "INDEXER_CONCURRENCY")]
    concurrency: Option<usize>,

    /// Read and compute everything, write nothing
    #[arg(long, env = "INDEXER_DRY_RUN")]
    dry_run: bool,

    /// Extra configuration file layered over the defaults
    #[arg(long, env = "INDEXER_CONFIG")]
    config: Option<String>,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(bucket) = &self.bucket {
            config.s3.bucket = bucket.clone();
        }
        if let Some(prefix) = &self.prefix {
            config.backfill.prefix = prefix.clone();
        }
        if let Some(batch_size) = self.batch_size {
            config.backfill.batch_size = batch_size;
        }
        if let Some(concurrency) = self.concurrency {
            config.backfill.concurrency = Some(concurrency);
        }
        if self.dry_run {
            config.backfill.dry_run = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load_from(args.config.as_deref()).context("Failed to load configuration")?;
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    init_tracing(&config.service.log_level, config.service.log_format);

    info!(
        service = %config.service.name,
        bucket = %config.s3.bucket,
        prefix = %config.backfill.prefix,
        batch_size = config.backfill.batch_size,
        concurrency = config.backfill.effective_concurrency(),
        dry_run = config.backfill.dry_run,
        "Starting EXIF backfill"
    );

    let store = Arc::new(
        S3Store::new(&config.s3)
            .await
            .context("Failed to initialize S3 store")?,
    );
    let gateway = Arc::new(Gateway::new(store, config.operation_timeout()));
    let repository = Arc::new(FolderRepository::new(gateway.clone()));
    let processor = Arc::new(ImageProcessor::new(gateway, repository));
    let driver = BackfillDriver::new(processor, CandidateFilter::from_config(&config.backfill));

    let cancel = CancellationToken::new();
    let signal_handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            warn!("Stop requested; finishing the current batch");
            cancel.cancel();
        })
    };

    let options = BackfillOptions::from_config(&config.backfill);
    let result = driver.run(&config.s3.bucket, &options, &cancel).await;
    signal_handle.abort();

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "Backfill aborted");
            return Err(e).context("Backfill failed");
        }
    };

    match serde_json::to_string(&report.summary) {
        Ok(summary) => info!(run_id = %report.run_id, summary = %summary, "Run summary"),
        Err(e) => warn!(error = %e, "Failed to serialize run summary"),
    }

    if report.dry_run {
        warn!(
            would_update = report.updated_keys.len(),
            "Dry run: no aggregates or tags were modified"
        );
    }

    if report.cancelled {
        warn!("Backfill stopped before all batches were processed");
    }

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str, format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).init(),
    }
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let args = Args::parse_from([
            "exif-backfill",
            "--bucket",
            "photos",
            "--prefix",
            "2024/",
            "--batch-size",
            "10",
            "--dry-run",
        ]);
        let mut config = Config::default();
        args.apply(&mut config);

        assert_eq!(config.s3.bucket, "photos");
        assert_eq!(config.backfill.prefix, "2024/");
        assert_eq!(config.backfill.batch_size, 10);
        assert_eq!(config.backfill.concurrency, None);
        assert!(config.backfill.dry_run);
    }

    #[test]
    fn test_absent_flags_keep_config() {
        let args = Args::parse_from(["exif-backfill"]);
        let mut config = Config::default();
        config.s3.bucket = "from-file".to_string();
        args.apply(&mut config);

        assert_eq!(config.s3.bucket, "from-file");
        assert!(!config.backfill.dry_run);
    }
}
