//! Renders upload events as log lines.

use reelup_client::UploadEvent;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Logs every event until the orchestrator drops its sender.
pub async fn log_events(mut events: mpsc::UnboundedReceiver<UploadEvent>) {
    let mut last_logged = -1.0;
    while let Some(event) = events.recv().await {
        match event {
            UploadEvent::StateChanged { from, to } => {
                info!(?from, ?to, "upload state changed");
            }
            UploadEvent::Progress(p) => {
                // One line per whole percent is plenty for a terminal.
                if p.percent.floor() <= last_logged && p.percent < 100.0 {
                    continue;
                }
                last_logged = p.percent.floor();
                info!(
                    percent = format!("{:.1}", p.percent),
                    chunks = format!("{}/{}", p.uploaded_chunks, p.total_chunks),
                    mib_per_sec = format!("{:.2}", p.bytes_per_second / (1024.0 * 1024.0)),
                    eta_secs = p.eta.map(|d| d.as_secs()),
                    "upload progress"
                );
            }
            UploadEvent::Error {
                part,
                error,
                will_retry,
            } => {
                if will_retry {
                    warn!(?part, kind = %error.kind, delay = ?error.suggested_delay, "{}, retrying", error.message);
                } else {
                    warn!(?part, kind = %error.kind, "{}", error.message);
                }
            }
            UploadEvent::SessionRecovered(info) => {
                info!(
                    previous = %info.previous_video_id,
                    new = %info.new_video_id,
                    "upload session recovered"
                );
            }
            UploadEvent::Warning(message) => warn!("{message}"),
        }
    }
}
