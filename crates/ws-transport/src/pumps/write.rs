//! Outbound pump: serializes writes from every request onto the socket.

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use reelup_protocol::constants::WS_WRITE_WAIT;

/// Writes queued messages until cancelled or the queue closes.
pub(crate) async fn write_pump<S>(
    mut write: S,
    mut write_rx: mpsc::Receiver<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = write_rx.recv() => {
                let Some(msg) = msg else { break };
                match tokio::time::timeout(WS_WRITE_WAIT, write.send(msg)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        error!(error = %e, "websocket write failed");
                        cancel.cancel();
                        break;
                    }
                    Err(_) => {
                        warn!(timeout = ?WS_WRITE_WAIT, "websocket write stalled, closing");
                        cancel.cancel();
                        break;
                    }
                }
            }
        }
    }

    let _ = write.send(tungstenite::Message::Close(None)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::sink;

    fn channel_sink(
        tx: mpsc::Sender<tungstenite::Message>,
    ) -> impl SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin {
        Box::pin(sink::unfold(tx, |tx, msg: tungstenite::Message| async move {
            let _ = tx.send(msg).await;
            Ok::<_, tungstenite::Error>(tx)
        }))
    }

    #[tokio::test]
    async fn forwards_queued_messages_then_closes() {
        let (sink_tx, mut sink_rx) = mpsc::channel(16);
        let (write_tx, write_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        write_tx
            .send(tungstenite::Message::Text("hello".to_string().into()))
            .await
            .unwrap();
        drop(write_tx);

        write_pump(channel_sink(sink_tx), write_rx, cancel).await;

        assert!(matches!(
            sink_rx.recv().await,
            Some(tungstenite::Message::Text(t)) if t.as_str() == "hello"
        ));
        assert!(matches!(
            sink_rx.recv().await,
            Some(tungstenite::Message::Close(_))
        ));
    }

    #[tokio::test]
    async fn stops_on_cancel() {
        let (sink_tx, mut sink_rx) = mpsc::channel(16);
        let (_write_tx, write_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let c = cancel.clone();
        let handle = tokio::spawn(async move {
            write_pump(channel_sink(sink_tx), write_rx, c).await;
        });
        cancel.cancel();

        tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .expect("should stop")
            .expect("no panic");
        assert!(matches!(
            sink_rx.recv().await,
            Some(tungstenite::Message::Close(_))
        ));
    }
}
