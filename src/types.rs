//! Re-exported types from external crates for convenience.
//!
//! These types are commonly used in this crate and are re-exported here
//! so users don't need to add these dependencies to their `Cargo.toml`.

/// Date and time types for exchange event times and local receive times.
pub use chrono::{DateTime, Utc};
/// Arbitrary precision decimal type for prices and price changes.
pub use rust_decimal::Decimal;
/// Macro for creating [`Decimal`] literals at compile time.
///
/// # Example
/// ```
/// use ticker_stream_client::types::dec;
/// let price = dec!(50000.00);
/// ```
pub use rust_decimal_macros::dec;
/// Parsed endpoint addresses.
pub use url::Url;
