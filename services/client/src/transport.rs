//! The relay connection: a message oriented duplex of text and binary frames.

use crate::error::TransportError;
use crate::session::state::ConnectionState;
use async_trait::async_trait;
use futures::future;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use parley_relay_types::ClientEvent;
use reqwest::Url;
use std::pin::Pin;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as WsMessage};
use tracing::{debug, error, info, trace, warn};

/// A single relay frame, independent of the socket implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayFrame {
    Text(String),
    /// Raw PCM16 audio.
    Binary(Vec<u8>),
    Close,
}

pub type FrameSink = Pin<Box<dyn Sink<RelayFrame, Error = TransportError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<RelayFrame, TransportError>> + Send>>;

/// Both halves of an open relay connection.
pub struct RelayLink {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

#[async_trait]
pub trait RelayConnector: Send + Sync {
    /// Opens the connection. Callers apply their own handshake timeout.
    async fn connect(&self, url: &Url) -> Result<RelayLink, TransportError>;
}

/// Connects to the relay over a websocket.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl RelayConnector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<RelayLink, TransportError> {
        let (ws_stream, _) = connect_async(url.as_str()).await?;
        let (ws_tx, ws_rx) = ws_stream.split();
        info!(host = url.host_str().unwrap_or_default(), "Connected to relay.");

        let sink = ws_tx
            .sink_map_err(TransportError::from)
            .with(|frame: RelayFrame| {
                future::ready(Ok::<_, TransportError>(match frame {
                    RelayFrame::Text(text) => WsMessage::Text(text.into()),
                    RelayFrame::Binary(bytes) => WsMessage::Binary(bytes.into()),
                    RelayFrame::Close => WsMessage::Close(None),
                }))
            });

        let stream = ws_rx.filter_map(|msg| {
            future::ready(match msg {
                Ok(WsMessage::Text(text)) => Some(Ok(RelayFrame::Text(text.as_str().to_owned()))),
                Ok(WsMessage::Binary(bytes)) => Some(Ok(RelayFrame::Binary(bytes.to_vec()))),
                Ok(WsMessage::Close(_)) => Some(Ok(RelayFrame::Close)),
                // ping/pong are answered by tungstenite itself
                Ok(_) => None,
                Err(e) => Some(Err(TransportError::from(e))),
            })
        });

        Ok(RelayLink {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

/// What the reader task hands to the dispatcher.
#[derive(Debug)]
pub(crate) enum Inbound {
    Frame(RelayFrame),
    /// The stream ended. `None` for an orderly close.
    Ended(Option<TransportError>),
}

/// Drains the outbound queue onto the socket in FIFO order.
///
/// Audio appends are dropped unless the session is `Connected` at the moment
/// they reach the socket. A close frame is sent once the queue closes.
pub(crate) fn spawn_writer(
    mut sink: FrameSink,
    mut outbound: mpsc::Receiver<ClientEvent>,
    state: watch::Receiver<ConnectionState>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            if event.is_audio() && *state.borrow() != ConnectionState::Connected {
                trace!("Dropping audio append outside Connected state.");
                continue;
            }
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    error!(kind = event.kind(), error = %e, "Failed to serialize outbound event");
                    continue;
                }
            };
            if !event.is_audio() {
                debug!(kind = event.kind(), "Sending control message");
            }
            if let Err(e) = sink.send(RelayFrame::Text(text)).await {
                warn!(error = %e, "Relay write failed; writer stopping.");
                return;
            }
        }
        let _ = sink.send(RelayFrame::Close).await;
        let _ = sink.close().await;
        debug!("Relay writer finished.");
    })
}

/// Forwards socket frames to the dispatcher until the stream ends.
pub(crate) fn spawn_reader(mut stream: FrameStream, inbound: mpsc::Sender<Inbound>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let item = match stream.next().await {
                Some(Ok(RelayFrame::Close)) | None => Inbound::Ended(None),
                Some(Ok(frame)) => Inbound::Frame(frame),
                Some(Err(e)) => Inbound::Ended(Some(e)),
            };
            let ended = matches!(item, Inbound::Ended(_));
            if inbound.send(item).await.is_err() || ended {
                return;
            }
        }
    })
}
