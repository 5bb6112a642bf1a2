//! Core traits for generic WebSocket infrastructure.

use super::state::Status;
use crate::error::Error;

/// Message parser trait for converting raw text frames to messages.
///
/// A parse error is never fatal: the connection driver forwards the original text as
/// [`super::Inbound::Raw`] instead. Binary messages that are valid UTF-8 are parsed the same way;
/// the rest arrive as [`super::Inbound::Binary`].
///
/// # Example
///
/// ```ignore
/// pub struct SimpleParser;
///
/// impl MessageParser<MyMessage> for SimpleParser {
///     fn parse(&self, text: &str) -> crate::Result<Vec<MyMessage>> {
///         let msg: MyMessage = serde_json::from_str(text)?;
///         Ok(vec![msg])
///     }
/// }
/// ```
pub trait MessageParser<M>: Send + Sync + 'static {
    /// Parse one inbound payload.
    ///
    /// May return several messages when the payload is an array. An empty vector is treated the
    /// same way as an error.
    fn parse(&self, text: &str) -> crate::Result<Vec<M>>;
}

/// Lifecycle callbacks invoked by the connection driver.
///
/// Callbacks run on the driver task, in the order the transitions happen. They may call back into
/// the manager, including [`super::ConnectionManager::teardown`], but must not block. Reach the
/// manager through a [`super::WeakConnectionManager`] so the handler does not keep it alive.
pub trait Handler: Send + Sync + 'static {
    /// The transport opened and the status is now [`Status::Connected`]
    fn on_open(&self) {}

    /// A live transport closed without being asked to
    fn on_close(&self) {}

    /// The transport failed to open or reported an error
    fn on_error(&self, _error: &Error) {}

    /// Every status transition, including ones a watch receiver would coalesce
    fn on_status(&self, _status: Status) {}
}

impl Handler for () {}

type Callback = Box<dyn Fn() + Send + Sync>;

/// [`Handler`] assembled from closures.
#[derive(Default)]
pub struct Callbacks {
    on_open: Option<Callback>,
    on_close: Option<Callback>,
    on_error: Option<Box<dyn Fn(&Error) + Send + Sync>>,
}

impl Callbacks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_open<F: Fn() + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.on_open = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_close<F: Fn() + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.on_close = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_error<F: Fn(&Error) + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }
}

impl Handler for Callbacks {
    fn on_open(&self) {
        if let Some(f) = &self.on_open {
            f();
        }
    }

    fn on_close(&self) {
        if let Some(f) = &self.on_close {
            f();
        }
    }

    fn on_error(&self, error: &Error) {
        if let Some(f) = &self.on_error {
            f(error);
        }
    }
}
