//! The seam between the connection driver and the network.
//!
//! [`Connector`] opens a [`Transport`] to a target URL. The driver owns at most one transport at a
//! time and never shares it. [`TungsteniteConnector`] is the production implementation; tests
//! substitute an in-memory one.

use async_trait::async_trait;
use futures::{SinkExt as _, StreamExt as _};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::error::WsError;
use crate::Result;
use crate::error::Error;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Something a live transport reports to the driver.
#[non_exhaustive]
#[derive(Debug)]
pub enum TransportEvent {
    /// A text payload, exactly as received
    Text(String),
    /// A binary payload, exactly as received
    Binary(Vec<u8>),
    /// The transport failed. A [`TransportEvent::Closed`] follows.
    Error(Error),
    /// The transport is gone, either by a close frame or because the stream ended
    Closed,
}

/// Opens transports to a target.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Transport: Transport;

    async fn connect(&self, target: &Url) -> Result<Self::Transport>;
}

/// A bidirectional message stream.
///
/// [`Transport::next_event`] must be cancel safe: the driver polls it inside `select!` and drops the
/// future whenever another branch completes first.
#[async_trait]
pub trait Transport: Send + 'static {
    async fn send(&mut self, text: String) -> Result<()>;

    async fn next_event(&mut self) -> TransportEvent;

    async fn close(&mut self);
}

/// WebSocket connector backed by `tokio-tungstenite`.
#[expect(
    clippy::exhaustive_structs,
    reason = "Callers pass the unit value to `with_connector`"
)]
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    type Transport = TungsteniteTransport;

    async fn connect(&self, target: &Url) -> Result<Self::Transport> {
        let (stream, _) = connect_async(target.as_str()).await?;
        Ok(TungsteniteTransport {
            stream,
            errored: false,
        })
    }
}

pub struct TungsteniteTransport {
    stream: WsStream,
    /// Set after the first read error; the next read reports the close.
    errored: bool,
}

#[async_trait]
impl Transport for TungsteniteTransport {
    async fn send(&mut self, text: String) -> Result<()> {
        self.stream.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn next_event(&mut self) -> TransportEvent {
        if self.errored {
            return TransportEvent::Closed;
        }

        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return TransportEvent::Text(text.to_string()),
                Some(Ok(Message::Binary(bytes))) => return TransportEvent::Binary(bytes.to_vec()),
                Some(Ok(Message::Close(_))) | None => return TransportEvent::Closed,
                Some(Err(e)) => {
                    self.errored = true;
                    return TransportEvent::Error(Error::from(WsError::Connection(e)));
                }
                Some(Ok(_)) => {
                    // Ping and pong frames are answered by tungstenite itself.
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            #[cfg(feature = "tracing")]
            tracing::debug!(error = %e, "Error while closing WebSocket");
            #[cfg(not(feature = "tracing"))]
            let _ = &e;
        }
    }
}
