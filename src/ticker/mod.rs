#![expect(
    clippy::module_name_repetitions,
    reason = "Re-exported names intentionally match their modules for API clarity"
)]

//! Exchange ticker stream client.
//!
//! Subscribes to the 24 hour rolling window ticker of a fixed set of symbols over a single,
//! auto-reconnecting WebSocket connection.
//!
//! # Example
//!
//! ```rust, no_run
//! use futures::StreamExt as _;
//! use ticker_stream_client::ticker::TickerClient;
//! use ticker_stream_client::ws::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = TickerClient::new(&["BTCUSDT"], Config::default())?;
//!     let mut stream = Box::pin(client.subscribe_tickers());
//!
//!     while let Some(ticker) = stream.next().await {
//!         println!("BTC Price: {:?}", ticker?.price);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod types;

// Re-export commonly used types
pub use client::{DEFAULT_ENDPOINT, TickerClient};
pub use types::{
    Direction, TickerBoard, TickerParser, TickerSnapshot, TickerUpdate, parse_tickers, stream_url,
};
