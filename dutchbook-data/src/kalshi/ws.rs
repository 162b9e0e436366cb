//! Kalshi market data feed task.
//!
//! Connects to the authenticated WebSocket, subscribes to `orderbook_delta`
//! (which also delivers the initial snapshot per market), and forwards parsed
//! messages to the normalizer's channel. Resync requests are serviced by
//! resubscribing the affected ticker, which makes the server emit a fresh
//! snapshot.
//!
//! Reconnects forever with exponential backoff on transport errors. An
//! authentication rejection is fatal: the task returns and the venue runs
//! degraded.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use smol_str::SmolStr;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, client::IntoClientRequest, http::HeaderValue, Message},
};
use tracing::{debug, error, info, warn};

use crate::kalshi::message::KalshiMessage;
use crate::normalizer::ResyncRequest;

const BACKOFF_INITIAL: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(60);

/// Errors from the feed task. Only auth failures escape the reconnect loop.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("websocket authentication rejected: {0}")]
    Auth(String),
}

/// Supplies signed auth headers for the WebSocket handshake.
///
/// Implemented by the execution crate's Kalshi signer; the feed only needs
/// the header values.
pub trait WsAuth: Send + Sync {
    fn ws_auth_headers(&self) -> Result<Vec<(&'static str, String)>, String>;
}

/// The Kalshi feed task.
pub struct KalshiFeed<A> {
    url: String,
    auth: A,
    tickers: Vec<SmolStr>,
}

impl<A: WsAuth> KalshiFeed<A> {
    pub fn new(url: impl Into<String>, auth: A, tickers: Vec<SmolStr>) -> Self {
        Self {
            url: url.into(),
            auth,
            tickers,
        }
    }

    /// Run until the consumer drops or authentication fails.
    pub async fn run(
        self,
        events: mpsc::Sender<KalshiMessage>,
        mut resyncs: mpsc::Receiver<ResyncRequest>,
    ) -> Result<(), FeedError> {
        let mut backoff = BACKOFF_INITIAL;
        let mut next_cmd_id: u64 = 1;

        loop {
            let socket = match self.connect().await {
                Ok(socket) => {
                    backoff = BACKOFF_INITIAL;
                    socket
                }
                Err(tungstenite::Error::Http(response))
                    if response.status().as_u16() == 401 || response.status().as_u16() == 403 =>
                {
                    error!(status = %response.status(), "kalshi feed auth rejected");
                    return Err(FeedError::Auth(response.status().to_string()));
                }
                Err(err) => {
                    warn!(%err, ?backoff, "kalshi feed connect failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(BACKOFF_MAX);
                    continue;
                }
            };

            info!(tickers = self.tickers.len(), "kalshi feed connected");
            let (mut write, mut read) = socket.split();

            let subscribe = self.subscribe_cmd(next_cmd_id, &self.tickers);
            next_cmd_id += 1;
            if let Err(err) = write.send(Message::Text(subscribe)).await {
                warn!(%err, "kalshi subscribe failed, reconnecting");
                continue;
            }

            loop {
                tokio::select! {
                    request = resyncs.recv() => {
                        let Some(request) = request else { return Ok(()) };
                        debug!(market = %request.market_id, "resubscribing after resync request");
                        let cmd = self.subscribe_cmd(next_cmd_id, &[request.market_id]);
                        next_cmd_id += 1;
                        if write.send(Message::Text(cmd)).await.is_err() {
                            break;
                        }
                    }
                    frame = read.next() => {
                        match frame {
                            Some(Ok(Message::Text(text))) => {
                                match serde_json::from_str::<KalshiMessage>(&text) {
                                    Ok(msg) => {
                                        if events.send(msg).await.is_err() {
                                            return Ok(());
                                        }
                                    }
                                    Err(err) => debug!(%err, "unhandled kalshi frame"),
                                }
                            }
                            Some(Ok(Message::Ping(payload))) => {
                                let _ = write.send(Message::Pong(payload)).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                warn!("kalshi feed closed, reconnecting");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(err)) => {
                                warn!(%err, "kalshi feed read error, reconnecting");
                                break;
                            }
                        }
                    }
                }
            }
        }
    }

    async fn connect(
        &self,
    ) -> Result<
        tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        tungstenite::Error,
    > {
        let mut request = self.url.as_str().into_client_request()?;
        let headers = self
            .auth
            .ws_auth_headers()
            .map_err(|e| tungstenite::Error::Io(std::io::Error::other(e)))?;
        for (name, value) in headers {
            let value = HeaderValue::from_str(&value)
                .map_err(|e| tungstenite::Error::Io(std::io::Error::other(e)))?;
            request.headers_mut().insert(name, value);
        }

        let (socket, _) = connect_async(request).await?;
        Ok(socket)
    }

    fn subscribe_cmd(&self, id: u64, tickers: &[SmolStr]) -> String {
        serde_json::json!({
            "id": id,
            "cmd": "subscribe",
            "params": {
                "channels": ["orderbook_delta", "market_lifecycle_v2"],
                "market_tickers": tickers,
            }
        })
        .to_string()
    }
}
