use std::cmp::Ordering;
use std::collections::BTreeMap;

use bon::Builder;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::Result;
use crate::error::Error;
use crate::ws::{Inbound, MessageParser};

/// Quote assets recognised by [`TickerUpdate::display_symbol`], longest first.
const QUOTE_ASSETS: &[&str] = &[
    "FDUSD", "USDT", "USDC", "BUSD", "TUSD", "BTC", "ETH", "BNB", "EUR",
];

/// Stream name suffix for the 24 hour rolling window ticker.
const TICKER_STREAM_SUFFIX: &str = "@ticker";

/// 24 hour rolling window ticker update for a single symbol.
///
/// Field names follow the exchange's one-letter wire keys. Prices arrive as strings and are kept
/// at their original scale.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Builder)]
pub struct TickerUpdate {
    /// Trading pair symbol, upper case (e.g., "BTCUSDT")
    #[serde(rename = "s")]
    #[builder(into)]
    pub symbol: String,
    /// Last price
    #[serde(rename = "c")]
    pub price: Decimal,
    /// Absolute price change over the window
    #[serde(rename = "p", default)]
    #[builder(default)]
    pub price_change: Decimal,
    /// Price change over the window, in percent
    #[serde(rename = "P", default)]
    #[builder(default)]
    pub price_change_percent: Decimal,
    /// Exchange event time
    #[serde(
        rename = "E",
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub event_time: Option<DateTime<Utc>>,
}

/// Sign of the price change.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum Direction {
    Up,
    Down,
    Flat,
}

impl TickerUpdate {
    /// Symbol split into base and quote, e.g. `BTC/USDT`. Unknown quotes are returned unchanged.
    #[must_use]
    pub fn display_symbol(&self) -> String {
        QUOTE_ASSETS
            .iter()
            .find_map(|quote| {
                self.symbol
                    .strip_suffix(quote)
                    .filter(|base| !base.is_empty())
                    .map(|base| format!("{base}/{quote}"))
            })
            .unwrap_or_else(|| self.symbol.clone())
    }

    /// Price with 2 decimals for USDT pairs and 8 otherwise, zero padded.
    #[must_use]
    pub fn display_price(&self) -> String {
        let scale = if self.symbol.contains("USDT") { 2 } else { 8 };
        let mut price = self.price.round_dp(scale);
        price.rescale(scale);
        price.to_string()
    }

    #[must_use]
    pub fn direction(&self) -> Direction {
        match self.price_change_percent.cmp(&Decimal::ZERO) {
            Ordering::Greater => Direction::Up,
            Ordering::Less => Direction::Down,
            Ordering::Equal => Direction::Flat,
        }
    }
}

/// Combined stream envelope or bare payload.
#[derive(Deserialize)]
#[serde(untagged)]
enum Frame {
    Combined { data: Tickers },
    Bare(Tickers),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Tickers {
    One(TickerUpdate),
    Many(Vec<TickerUpdate>),
}

impl From<Tickers> for Vec<TickerUpdate> {
    fn from(tickers: Tickers) -> Self {
        match tickers {
            Tickers::One(ticker) => vec![ticker],
            Tickers::Many(tickers) => tickers,
        }
    }
}

/// Deserialize ticker updates from one text frame.
///
/// Accepts a single ticker object, an array of them, or either wrapped in the combined stream
/// envelope `{"stream": "...", "data": ...}`. Returns an empty vector for whitespace-only input.
pub fn parse_tickers(text: &str) -> Result<Vec<TickerUpdate>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let frame: Frame = serde_json::from_str(trimmed)?;
    Ok(match frame {
        Frame::Combined { data } | Frame::Bare(data) => data.into(),
    })
}

#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct TickerParser;

impl MessageParser<TickerUpdate> for TickerParser {
    fn parse(&self, text: &str) -> Result<Vec<TickerUpdate>> {
        parse_tickers(text)
    }
}

/// Build the raw stream URL subscribing to the ticker of every symbol.
///
/// `wss://stream.binance.com:9443/ws` with `["BTCUSDT", "ETHUSDT"]` becomes
/// `wss://stream.binance.com:9443/ws/btcusdt@ticker/ethusdt@ticker`.
pub fn stream_url<S: AsRef<str>>(endpoint: &str, symbols: &[S]) -> Result<Url> {
    if symbols.is_empty() {
        return Err(Error::validation(
            "symbols cannot be empty: at least one symbol must be provided",
        ));
    }

    let mut url = Url::parse(endpoint)?;
    let streams = symbols
        .iter()
        .map(|symbol| {
            let symbol = symbol.as_ref();
            if symbol.is_empty() || !symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(Error::validation(format!("invalid symbol: {symbol:?}")));
            }
            Ok(format!("{}{TICKER_STREAM_SUFFIX}", symbol.to_ascii_lowercase()))
        })
        .collect::<Result<Vec<_>>>()?;

    url.path_segments_mut()
        .map_err(|()| Error::validation(format!("endpoint cannot be a base URL: {endpoint}")))?
        .pop_if_empty()
        .extend(streams);

    Ok(url)
}

/// Latest update for a symbol together with when it was received locally.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickerSnapshot {
    pub update: TickerUpdate,
    pub received_at: DateTime<Utc>,
}

/// Latest ticker per symbol.
#[derive(Debug, Clone, Default)]
pub struct TickerBoard {
    entries: BTreeMap<String, TickerSnapshot>,
}

impl TickerBoard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a decoded update. Raw payloads and updates without a symbol are ignored.
    ///
    /// Returns whether the board changed.
    pub fn apply(&mut self, inbound: &Inbound<TickerUpdate>) -> bool {
        match inbound.as_decoded() {
            Some(update) => self.insert(update.clone(), Utc::now()),
            None => false,
        }
    }

    pub fn insert(&mut self, update: TickerUpdate, received_at: DateTime<Utc>) -> bool {
        if update.symbol.is_empty() {
            return false;
        }

        self.entries.insert(
            update.symbol.clone(),
            TickerSnapshot {
                update,
                received_at,
            },
        );
        true
    }

    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<&TickerSnapshot> {
        self.entries.get(symbol)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshots in symbol order.
    pub fn iter(&self) -> impl Iterator<Item = &TickerSnapshot> {
        self.entries.values()
    }
}
