//! Command-line uploader.
//!
//! Uploads one video file to the backend over WebSocket, printing progress
//! as it goes. Ctrl-C cancels the upload and aborts the remote session.

mod config;
mod events;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use reelup_client::{StaticToken, UploadError, UploadOrchestrator};
use reelup_protocol::types::UploadMetadata;
use reelup_transfer::{ByteSource, FileDescriptor, FileSource, content_type_for_path};
use reelup_ws_transport::WsSessionTransport;

use crate::config::{ConfigFile, TOKEN_ENV, default_config_path};

#[derive(Debug, Parser)]
#[command(author, version, about = "Resumable chunked video uploader")]
pub struct Cli {
    /// Video file to upload.
    pub file: PathBuf,

    /// Backend WebSocket URL (overrides the config file).
    #[arg(long)]
    pub url: Option<String>,

    /// Course the video belongs to. Required for session recovery.
    #[arg(long)]
    pub course: Option<String>,

    #[arg(long)]
    pub title: Option<String>,

    #[arg(long)]
    pub description: Option<String>,

    /// Tag to attach; may be repeated.
    #[arg(long = "tag")]
    pub tags: Vec<String>,

    /// MIME type; guessed from the extension when omitted.
    #[arg(long)]
    pub content_type: Option<String>,

    /// Chunk size in bytes.
    #[arg(long)]
    pub chunk_size: Option<u64>,

    /// Parts in flight at once.
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Skip per-part SHA-256 checksums.
    #[arg(long)]
    pub no_checksums: bool,

    /// Config file path.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,reelup=debug")),
        )
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let settings = ConfigFile::load(&config_path)?.resolve(&cli, std::env::var(TOKEN_ENV).ok())?;

    let content_type = match &cli.content_type {
        Some(ct) => ct.clone(),
        None => match content_type_for_path(&cli.file) {
            Some(ct) => ct.to_string(),
            None => bail!(
                "cannot tell the video type of {}; pass --content-type",
                cli.file.display()
            ),
        },
    };

    let source = FileSource::open(&cli.file)
        .await
        .with_context(|| format!("opening {}", cli.file.display()))?;
    let file_name = cli
        .file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .context("file path has no file name")?;
    let descriptor = FileDescriptor {
        file_name,
        file_size: source.len(),
        content_type,
    };
    let metadata = UploadMetadata {
        course_id: cli.course.clone(),
        title: cli.title.clone().unwrap_or_default(),
        description: cli.description.clone().unwrap_or_default(),
        tags: cli.tags.clone(),
    };

    let mut transport = WsSessionTransport::new(settings.url.clone())
        .with_timeouts(
            reelup_protocol::constants::WS_REQUEST_TIMEOUT,
            settings.upload.chunk_timeout(),
        );
    if let Some(token) = &settings.token {
        transport = transport.with_credentials(Arc::new(StaticToken::new(token.clone())));
    }

    info!(
        file = %cli.file.display(),
        size = descriptor.file_size,
        url = %settings.url,
        "starting upload"
    );

    let mut orchestrator = UploadOrchestrator::new(
        Arc::new(transport),
        Arc::new(source),
        descriptor,
        metadata,
        settings.upload,
    )?;
    if let Some(token) = settings.token {
        orchestrator = orchestrator.with_credentials(Arc::new(StaticToken::new(token)));
    }

    let logger = orchestrator
        .take_events()
        .map(|rx| tokio::spawn(events::log_events(rx)));

    let handle = orchestrator.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, cancelling upload");
            handle.cancel();
        }
    });

    let result = orchestrator.upload().await;
    drop(orchestrator);
    if let Some(logger) = logger {
        let _ = logger.await;
    }

    match result {
        Ok(outcome) => {
            println!("Uploaded {} as video {}", cli.file.display(), outcome.video_id);
            if let Some(url) = outcome.playback_url {
                println!("Playback: {url}");
            }
            if outcome.recoveries > 0 {
                println!("Session recovered {} time(s) along the way", outcome.recoveries);
            }
            Ok(())
        }
        Err(e) => {
            report_failure(&e);
            Err(e).context("upload did not complete")
        }
    }
}

fn report_failure(err: &UploadError) {
    eprintln!("Upload failed: {err}");
    if let Some(classified) = err.classified() {
        eprintln!("  kind: {}", classified.kind);
        eprintln!("  {}", classified.explanation());
    }
    eprintln!("  next: {}", err.next_step());
    if err.caller_retryable() {
        eprintln!("  Running the same command again may succeed.");
    }
}
