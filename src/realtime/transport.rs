use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tracing::{debug, warn};

use crate::error::{ClientError, ClientResult};
use crate::realtime::events::Envelope;

/// An open connection. The link is closed once `inbound` yields `None`;
/// dropping every `outbound` sender closes it from our side.
pub struct Link {
    pub outbound: mpsc::UnboundedSender<Envelope>,
    pub inbound: mpsc::UnboundedReceiver<Envelope>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, token: &str) -> ClientResult<Link>;
}

/// JSON envelopes as text frames over a WebSocket, authenticated with the
/// bearer token in the handshake.
#[derive(Debug, Clone)]
pub struct WsTransport {
    url: String,
    connect_timeout: Duration,
}

impl WsTransport {
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self, token: &str) -> ClientResult<Link> {
        let mut request = self.url.as_str().into_client_request()?;
        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|err| ClientError::Internal(format!("invalid bearer token: {err}")))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (stream, _response) = timeout(self.connect_timeout, connect_async(request))
            .await
            .map_err(|_| ClientError::Timeout)??;

        let (mut sink, mut source) = stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Envelope>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<Envelope>();

        tokio::spawn(async move {
            while let Some(envelope) = out_rx.recv().await {
                let json = match serde_json::to_string(&envelope) {
                    Ok(json) => json,
                    Err(err) => {
                        warn!(error = %err, event = %envelope.event, "failed to serialize envelope");
                        continue;
                    }
                };

                if let Err(err) = sink.send(Message::Text(json)).await {
                    debug!(error = %err, "websocket write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(_) => continue,
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(err) => {
                        debug!(error = %err, "websocket read failed");
                        break;
                    }
                };

                match serde_json::from_str::<Envelope>(&text) {
                    Ok(envelope) => {
                        if in_tx.send(envelope).is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!(error = %err, "dropping malformed realtime frame"),
                }
            }
        });

        Ok(Link {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}
