//! Live ticker board for a handful of symbols.
//!
//! Streams the 24 hour ticker of each symbol, keeps the latest update per symbol and logs
//! connection status changes along the way.
//!
//! Run with tracing enabled:
//! ```sh
//! RUST_LOG=info,ticker_stream_client=debug cargo run --example ticker --features tracing
//! ```
//!
//! Optionally limit the number of updates (default 50):
//! ```sh
//! UPDATES=10 RUST_LOG=info cargo run --example ticker --features tracing
//! ```

use std::time::Duration;

use futures::StreamExt as _;
use ticker_stream_client::ticker::{DEFAULT_ENDPOINT, TickerBoard, TickerClient};
use ticker_stream_client::ws::{Callbacks, Status};
use ticker_stream_client::ws::config::Config;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const SYMBOLS: [&str; 5] = ["BTCUSDT", "ETHUSDT", "ADAUSDT", "DOGEUSDT", "BNBUSDT"];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let updates: usize = std::env::var("UPDATES")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(50);

    let callbacks = Callbacks::new()
        .on_open(|| info!(stream = "ticker", "Connected"))
        .on_close(|| warn!(stream = "ticker", "Connection closed, reconnecting"))
        .on_error(|e| warn!(stream = "ticker", error = %e));

    let client = TickerClient::with_connector(
        DEFAULT_ENDPOINT,
        &SYMBOLS,
        Config::default(),
        ticker_stream_client::ws::TungsteniteConnector,
        callbacks,
    )?;
    info!(symbols = ?client.symbols(), "Subscribing");

    let mut status_rx = client.status_receiver();
    tokio::spawn(async move {
        while status_rx.changed().await.is_ok() {
            let status = *status_rx.borrow_and_update();
            info!(%status, "Connection status");
        }
    });

    let mut board = TickerBoard::new();
    let mut messages = Box::pin(client.messages());
    let mut received = 0;
    let mut retries = 3_u32;

    while received < updates {
        let Ok(next) = timeout(Duration::from_secs(30), messages.next()).await else {
            let status = client.status();
            warn!(%status, "No update within 30s");
            if status == Status::Failed {
                if retries == 0 {
                    warn!("Giving up on the stream");
                    break;
                }
                retries -= 1;
                info!(retries, "Reconnect attempts exhausted, starting over");
                client.force_reconnect();
            }
            continue;
        };
        let Some(result) = next else {
            break;
        };

        match result {
            Ok(inbound) => {
                if let Some(raw) = inbound.as_raw() {
                    debug!(%raw, "Undecoded payload");
                }
                if board.apply(&inbound) {
                    received += 1;
                }
                if let Some(ticker) = inbound.as_decoded() {
                    info!(
                        symbol = %ticker.display_symbol(),
                        price = %ticker.display_price(),
                        change = %format!("{}%", ticker.price_change_percent),
                        direction = %ticker.direction(),
                    );
                }
            }
            Err(e) => warn!(error = %e, "Stream error"),
        }
    }

    for snapshot in board.iter() {
        info!(
            symbol = %snapshot.update.display_symbol(),
            price = %snapshot.update.display_price(),
            received_at = %snapshot.received_at,
            "Latest"
        );
    }

    client.teardown();
    info!(status = %client.status(), "Done");

    Ok(())
}
