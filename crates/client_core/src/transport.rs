use futures::StreamExt;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};
use url::Url;

use crate::{engine::EngineEvent, error::TransportError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Frame(String),
    Closed { reason: Option<TransportError> },
}

/// Feeds transport events back to the engine, tagged with the connection
/// epoch that produced them so late events from a torn-down link can be
/// told apart from the live one.
#[derive(Debug, Clone)]
pub struct TransportSink {
    epoch: u64,
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl TransportSink {
    pub(crate) fn new(epoch: u64, tx: mpsc::UnboundedSender<EngineEvent>) -> Self {
        Self { epoch, tx }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn opened(&self) {
        self.emit(TransportEvent::Opened);
    }

    pub fn frame(&self, text: impl Into<String>) {
        self.emit(TransportEvent::Frame(text.into()));
    }

    pub fn closed(&self, reason: Option<TransportError>) {
        self.emit(TransportEvent::Closed { reason });
    }

    fn emit(&self, event: TransportEvent) {
        let _ = self.tx.send(EngineEvent::Transport {
            epoch: self.epoch,
            event,
        });
    }
}

/// One live (or pending) push channel.
pub trait TransportLink: Send {
    /// Tears the channel down. No further events are reported for it.
    fn close(&mut self);
}

/// Opens push channels. Implementations report progress through the sink
/// and must not block the caller.
pub trait Transport: Send + Sync {
    fn connect(&self, credential: &str, sink: TransportSink) -> Box<dyn TransportLink>;
}

pub struct WebSocketTransport {
    server_url: String,
}

impl WebSocketTransport {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
        }
    }

    pub fn websocket_url(&self, credential: &str) -> Result<Url, TransportError> {
        websocket_url(&self.server_url, credential)
    }
}

pub fn websocket_url(server_url: &str, credential: &str) -> Result<Url, TransportError> {
    let mut url =
        Url::parse(server_url).map_err(|err| TransportError::InvalidUrl(err.to_string()))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(TransportError::InvalidUrl(format!(
                "unsupported scheme '{other}'"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| TransportError::InvalidUrl(server_url.to_string()))?;

    let path = format!("{}/ws", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.query_pairs_mut().clear().append_pair("token", credential);
    Ok(url)
}

impl Transport for WebSocketTransport {
    fn connect(&self, credential: &str, sink: TransportSink) -> Box<dyn TransportLink> {
        let url = match self.websocket_url(credential) {
            Ok(url) => url,
            Err(err) => {
                sink.closed(Some(err));
                return Box::new(WebSocketLink { task: None });
            }
        };

        let task = tokio::spawn(async move {
            let mut ws_stream = match connect_async(url.as_str()).await {
                Ok((ws_stream, _)) => ws_stream,
                Err(err) => {
                    sink.closed(Some(TransportError::Connect(err.to_string())));
                    return;
                }
            };
            debug!(epoch = sink.epoch(), "transport: websocket open");
            sink.opened();

            let mut reason = None;
            while let Some(msg) = ws_stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => sink.frame(text),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        warn!(epoch = sink.epoch(), "transport: websocket receive failed: {err}");
                        reason = Some(TransportError::Receive(err.to_string()));
                        break;
                    }
                }
            }
            sink.closed(reason);
        });

        Box::new(WebSocketLink { task: Some(task) })
    }
}

struct WebSocketLink {
    task: Option<JoinHandle<()>>,
}

impl TransportLink for WebSocketLink {
    fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for WebSocketLink {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
