//! Keepalive for the upload socket.
//!
//! Proxies in front of the upload backend drop connections that stay quiet
//! while a large chunk is being prepared or a retry backoff is sleeping, so
//! a ping goes out every `period` regardless of request traffic.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Queues numbered pings until cancelled or the writer goes away.
///
/// The payload is the big-endian ping count, which makes pongs easy to match
/// up in a packet capture. A chunk write that holds the writer past a tick
/// does not cause a burst of catch-up pings afterwards.
pub(crate) async fn ping_pump(
    write_tx: mpsc::Sender<tungstenite::Message>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut sent: u64 = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                sent += 1;
                let ping = tungstenite::Message::Ping(sent.to_be_bytes().to_vec().into());
                if write_tx.send(ping).await.is_err() {
                    debug!(sent, "upload socket writer closed, keepalive stopped");
                    return;
                }
                trace!(sent, "keepalive ping queued");
            }
        }
    }
    debug!(sent, "keepalive cancelled");
}
