//! Core WebSocket infrastructure.
//!
//! This module provides a generic, auto-reconnecting connection manager that can be
//! specialized for different streams through a [`MessageParser`].
//!
//! # Architecture
//!
//! - [`state::StateMachine`]: Pure transition function for the connection lifecycle
//! - [`ConnectionManager`]: Driver task that executes transitions, owns the transport and timer
//! - [`Connector`]: Seam for opening transports; [`TungsteniteConnector`] in production
//! - [`MessageParser`]: Trait for decoding incoming messages, with raw fallback
//! - [`Handler`]: Lifecycle callbacks
//!
//! # Example
//!
//! ```ignore
//! let connection = ConnectionManager::new(endpoint, Config::default(), SimpleParser)?;
//! let mut messages = Box::pin(connection.messages());
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod state;
pub mod traits;
pub mod transport;

pub use connection::{ConnectionManager, Inbound, WeakConnectionManager};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use state::Status;
pub use traits::*;
pub use transport::{Connector, Transport, TransportEvent, TungsteniteConnector};
