//! Live subscription to the node's new-block events.

use futures_util::{SinkExt, StreamExt};
use liquidator_core::NewBlockEvent;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::error::{ChainError, ChainResult};
use crate::rpc::{SubscribeRequest, decode_new_block};

/// Blocks buffered between the reader task and the dispatch loop.
pub const BLOCK_CHANNEL_CAPACITY: usize = 16;

/// Receiving side of a subscription.
///
/// `events` closes when the reader stops. `reader` then reports why: `Ok`
/// after a requested shutdown, an error when the stream broke.
pub struct BlockStream {
    pub events: mpsc::Receiver<NewBlockEvent>,
    pub reader: JoinHandle<ChainResult<()>>,
}

/// Subscribes to block commits over the RPC websocket.
#[derive(Debug, Clone)]
pub struct BlockWatcher {
    endpoint: String,
}

impl BlockWatcher {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }

    /// Connect, send the subscribe request and spawn the reader task.
    ///
    /// The stream is not restartable: once it ends the caller is expected
    /// to fail and be restarted.
    pub async fn subscribe(&self, shutdown: watch::Receiver<bool>) -> ChainResult<BlockStream> {
        let (socket, _) = connect_async(self.endpoint.as_str()).await?;
        info!(endpoint = %self.endpoint, "websocket connected");

        let (mut sink, mut source) = socket.split();
        let request = serde_json::to_string(&SubscribeRequest::new_blocks())?;
        sink.send(Message::Text(request)).await?;

        let (tx, events) = mpsc::channel(BLOCK_CHANNEL_CAPACITY);
        let endpoint = self.endpoint.clone();
        let mut shutdown = shutdown;

        let reader = tokio::spawn(async move {
            let result = loop {
                if *shutdown.borrow() {
                    break Ok(());
                }

                let message = tokio::select! {
                    message = source.next() => message,
                    changed = shutdown.changed() => {
                        // A dropped sender also means shutdown.
                        if changed.is_err() {
                            break Ok(());
                        }
                        continue;
                    }
                };

                let text = match message {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => text,
                        Err(e) => break Err(ChainError::Disconnected(e.to_string())),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .unwrap_or_else(|| "closed by peer".to_string());
                        break Err(ChainError::Disconnected(reason));
                    }
                    // Pings are answered by the protocol layer.
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => break Err(e.into()),
                    None => break Err(ChainError::Disconnected("stream ended".to_string())),
                };

                match decode_new_block(&text) {
                    Ok(Some(block)) => {
                        debug!(height = %block.height, timestamp = %block.time, "new block received");
                        if tx.send(block).await.is_err() {
                            // Nobody is listening any more.
                            break Ok(());
                        }
                    }
                    Ok(None) => debug!("ignoring message without block payload"),
                    Err(e) => break Err(e),
                }
            };

            let _ = sink.send(Message::Close(None)).await;
            match &result {
                Ok(()) => info!(%endpoint, "websocket disconnected"),
                Err(e) => warn!(%endpoint, error = %e, "websocket disconnected"),
            }
            result
        });

        Ok(BlockStream { events, reader })
    }
}
