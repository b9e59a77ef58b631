//! Duplex transport to the conversation backend.
//!
//! One [`Channel`] per session. Outbound commands are queued to a writer
//! task; inbound frames are parsed into envelopes and delivered in frame
//! order on a receiver. The channel never reconnects: errors and unexpected
//! closure surface as a single [`ChannelEvent`] and the owner decides.

mod channel;
mod memory;

pub use channel::{Channel, WsConnector};
pub use memory::{MemoryConnector, MemoryTransport};

use apollolytics_protocol::Envelope;
use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect to {endpoint}: {reason}")]
    Connection { endpoint: String, reason: String },
    #[error("channel is not open")]
    NotOpen,
    #[error("failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Signals delivered to the channel owner, in delivery order.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Opened,
    Message(Envelope),
    /// Connection failure. No further events follow.
    Error(String),
    /// Remote closure. No further events follow.
    Closed { reason: Option<String> },
}

/// Outbound half used by the session.
pub trait Transport: Send {
    fn send_frame(&self, frame: String) -> Result<()>;

    /// Idempotent.
    fn close(&self);

    fn is_open(&self) -> bool;
}

pub trait TransportExt: Transport {
    fn send<T: Serialize>(&self, message: &T) -> Result<()> {
        let frame = serde_json::to_string(message)?;
        self.send_frame(frame)
    }
}

impl<T: Transport + ?Sized> TransportExt for T {}

/// An opened transport together with its inbound event receiver.
pub struct Connection {
    pub transport: Box<dyn Transport>,
    pub events: mpsc::UnboundedReceiver<ChannelEvent>,
}

/// Opens connections; lets the dialogue runner be driven without a network.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &str) -> Result<Connection>;
}
