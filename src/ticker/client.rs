use std::sync::Arc;

use futures::Stream;
use futures::StreamExt as _;
use tokio::sync::watch;

use super::types::{TickerParser, TickerUpdate, stream_url};
use crate::Result;
use crate::ws::config::Config;
use crate::ws::{ConnectionManager, Connector, Handler, Inbound, Status, TungsteniteConnector};

/// Raw stream endpoint of the exchange.
pub const DEFAULT_ENDPOINT: &str = "wss://stream.binance.com:9443/ws";

/// Ticker stream client for a fixed set of symbols.
///
/// The symbols are part of the stream URL, so changing them means tearing this client down and
/// creating a new one.
///
/// # Examples
///
/// ```rust, no_run
/// use futures::StreamExt as _;
/// use ticker_stream_client::ticker::TickerClient;
/// use ticker_stream_client::ws::config::Config;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let client = TickerClient::new(&["BTCUSDT", "ETHUSDT"], Config::default())?;
///
///     let mut stream = Box::pin(client.subscribe_tickers());
///     while let Some(ticker) = stream.next().await {
///         let ticker = ticker?;
///         println!("{}: {}", ticker.display_symbol(), ticker.display_price());
///     }
///
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct TickerClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    /// Symbols this client is subscribed to, as given
    symbols: Vec<String>,
    /// Connection manager for the WebSocket
    connection: ConnectionManager<TickerUpdate>,
}

impl TickerClient {
    /// Connect to the default endpoint and subscribe to the tickers of `symbols`.
    pub fn new<S: AsRef<str>>(symbols: &[S], config: Config) -> Result<Self> {
        Self::with_endpoint(DEFAULT_ENDPOINT, symbols, config)
    }

    /// Connect to `endpoint` instead of the default one.
    pub fn with_endpoint<S: AsRef<str>>(
        endpoint: &str,
        symbols: &[S],
        config: Config,
    ) -> Result<Self> {
        Self::with_connector(endpoint, symbols, config, TungsteniteConnector, ())
    }

    /// Full control over the transport and lifecycle callbacks.
    pub fn with_connector<S, C, H>(
        endpoint: &str,
        symbols: &[S],
        config: Config,
        connector: C,
        handler: H,
    ) -> Result<Self>
    where
        S: AsRef<str>,
        C: Connector,
        H: Handler,
    {
        let url = stream_url(endpoint, symbols)?;
        let connection =
            ConnectionManager::with_connector(url, config, TickerParser, connector, handler)?;

        Ok(Self {
            inner: Arc::new(ClientInner {
                symbols: symbols.iter().map(|s| s.as_ref().to_owned()).collect(),
                connection,
            }),
        })
    }

    /// Stream of decoded ticker updates. Payloads that are not tickers are skipped.
    pub fn subscribe_tickers(&self) -> impl Stream<Item = Result<TickerUpdate>> + use<> {
        self.inner
            .connection
            .messages()
            .filter_map(|msg_result| async move {
                match msg_result {
                    Ok(msg) => msg.into_decoded().map(Ok),
                    Err(e) => Some(Err(e)),
                }
            })
    }

    /// Stream of every payload, including the ones that failed to decode.
    pub fn messages(&self) -> impl Stream<Item = Result<Inbound<TickerUpdate>>> + use<> {
        self.inner.connection.messages()
    }

    #[must_use]
    pub fn symbols(&self) -> &[String] {
        &self.inner.symbols
    }

    /// Get the current connection status.
    #[must_use]
    pub fn status(&self) -> Status {
        self.inner.connection.status()
    }

    /// Subscribe to connection status changes.
    #[must_use]
    pub fn status_receiver(&self) -> watch::Receiver<Status> {
        self.inner.connection.status_receiver()
    }

    /// Drop the current connection and start over with a fresh attempt counter.
    pub fn force_reconnect(&self) {
        self.inner.connection.force_reconnect();
    }

    /// Stop streaming. Idempotent.
    pub fn teardown(&self) {
        self.inner.connection.teardown();
    }

    /// The underlying connection manager.
    #[must_use]
    pub fn connection(&self) -> &ConnectionManager<TickerUpdate> {
        &self.inner.connection
    }
}
