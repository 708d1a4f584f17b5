//! Inbound pump: routes replies to the requests waiting for them.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use reelup_protocol::constants::{WS_MAX_MESSAGE_SIZE, WS_PONG_WAIT};

/// Requests awaiting a reply, keyed by envelope id.
pub(crate) type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Value>>>>;

/// Reads until the peer goes away, the read deadline passes or `cancel`
/// fires. On exit every waiting request is released and `cancel` is
/// triggered so the client knows the connection is dead.
pub(crate) async fn read_pump<S>(
    mut read: S,
    pending: PendingMap,
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    // Any incoming frame pushes the deadline out.
    let deadline = tokio::time::sleep(WS_PONG_WAIT);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            () = &mut deadline => {
                warn!(timeout = ?WS_PONG_WAIT, "no frames from backend, closing connection");
                break;
            }

            msg = read.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        warn!(error = %e, "websocket read failed");
                        break;
                    }
                    None => {
                        debug!("websocket stream ended");
                        break;
                    }
                };
                deadline.as_mut().reset(tokio::time::Instant::now() + WS_PONG_WAIT);

                match msg {
                    tungstenite::Message::Text(text) => route_reply(text.as_str(), &pending).await,
                    tungstenite::Message::Ping(data) => {
                        let _ = write_tx.send(tungstenite::Message::Pong(data)).await;
                    }
                    tungstenite::Message::Pong(_) => trace!("pong"),
                    tungstenite::Message::Close(frame) => {
                        debug!(?frame, "backend closed the connection");
                        break;
                    }
                    _ => trace!("ignoring binary frame"),
                }
            }
        }
    }

    cancel.cancel();
    // Dropping the senders wakes every waiter with a closed-channel error.
    pending.lock().await.clear();
}

/// Hands a text frame to the request with the matching id.
async fn route_reply(text: &str, pending: &PendingMap) {
    if text.len() > WS_MAX_MESSAGE_SIZE {
        warn!(bytes = text.len(), "reply too large, dropping");
        return;
    }

    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "reply is not JSON, dropping");
            return;
        }
    };
    let Some(id) = value.get("id").and_then(Value::as_str).map(str::to_owned) else {
        warn!("reply without an id, dropping");
        return;
    };

    trace!(%id, msg_type = ?value.get("type"), "reply received");
    match pending.lock().await.remove(&id) {
        Some(tx) => {
            let _ = tx.send(value);
        }
        None => debug!(%id, "no request waiting for reply"),
    }
}
