//! Polymarket market data feed task.
//!
//! The market channel is unauthenticated: subscribe with the outcome token
//! asset ids and the server pushes full books. Because every book event is a
//! complete snapshot, a resync request is serviced by resubscribing.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use smol_str::SmolStr;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::normalizer::ResyncRequest;
use crate::polymarket::message::{PolymarketBookEvent, PolymarketMessage};

const BACKOFF_INITIAL: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(60);

/// The Polymarket feed task.
pub struct PolymarketFeed {
    url: String,
    asset_ids: Vec<SmolStr>,
}

impl PolymarketFeed {
    pub fn new(url: impl Into<String>, asset_ids: Vec<SmolStr>) -> Self {
        Self {
            url: url.into(),
            asset_ids,
        }
    }

    /// Run until the consumer drops. Transport errors reconnect forever with
    /// exponential backoff.
    pub async fn run(
        self,
        events: mpsc::Sender<PolymarketBookEvent>,
        mut resyncs: mpsc::Receiver<ResyncRequest>,
    ) {
        let mut backoff = BACKOFF_INITIAL;

        loop {
            let socket = match connect_async(self.url.as_str()).await {
                Ok((socket, _)) => {
                    backoff = BACKOFF_INITIAL;
                    socket
                }
                Err(err) => {
                    warn!(%err, ?backoff, "polymarket feed connect failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(BACKOFF_MAX);
                    continue;
                }
            };

            info!(assets = self.asset_ids.len(), "polymarket feed connected");
            let (mut write, mut read) = socket.split();

            if let Err(err) = write.send(Message::Text(self.subscribe_cmd())).await {
                warn!(%err, "polymarket subscribe failed, reconnecting");
                continue;
            }

            loop {
                tokio::select! {
                    request = resyncs.recv() => {
                        let Some(request) = request else { return };
                        debug!(market = %request.market_id, "resubscribing after resync request");
                        if write.send(Message::Text(self.subscribe_cmd())).await.is_err() {
                            break;
                        }
                    }
                    frame = read.next() => {
                        match frame {
                            Some(Ok(Message::Text(text))) => {
                                match serde_json::from_str::<PolymarketMessage>(&text) {
                                    Ok(msg) => {
                                        for event in msg.into_events() {
                                            if events.send(event).await.is_err() {
                                                return;
                                            }
                                        }
                                    }
                                    Err(err) => debug!(%err, "unhandled polymarket frame"),
                                }
                            }
                            Some(Ok(Message::Ping(payload))) => {
                                let _ = write.send(Message::Pong(payload)).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                warn!("polymarket feed closed, reconnecting");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(err)) => {
                                warn!(%err, "polymarket feed read error, reconnecting");
                                break;
                            }
                        }
                    }
                }
            }
        }
    }

    fn subscribe_cmd(&self) -> String {
        serde_json::json!({
            "type": "market",
            "assets_ids": self.asset_ids,
        })
        .to_string()
    }
}
