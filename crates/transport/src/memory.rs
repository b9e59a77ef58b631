//! In-process transport for tests and offline runs.

use crate::{ChannelEvent, Connection, Connector, Result, Transport, TransportError};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Debug)]
struct MemoryState {
    frames: Vec<String>,
    open: bool,
    closes: usize,
    fail_sends: bool,
}

/// Captures every outbound frame.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                frames: Vec::new(),
                open: true,
                closes: 0,
                fail_sends: false,
            })),
        }
    }

    /// A transport plus the sender used to inject inbound events.
    pub fn connected() -> (Self, mpsc::UnboundedSender<ChannelEvent>, Connection) {
        let transport = Self::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Connection {
            transport: Box::new(transport.clone()),
            events: rx,
        };
        (transport, tx, connection)
    }

    pub fn sent_frames(&self) -> Vec<String> {
        self.state.lock().unwrap().frames.clone()
    }

    pub fn sent_json(&self) -> Vec<serde_json::Value> {
        self.sent_frames()
            .iter()
            .filter_map(|f| serde_json::from_str(f).ok())
            .collect()
    }

    /// Number of `close()` calls that actually closed the transport.
    pub fn close_count(&self) -> usize {
        self.state.lock().unwrap().closes
    }

    /// Make subsequent sends fail as if the socket were gone, without closing.
    pub fn set_fail_sends(&self, fail: bool) {
        self.state.lock().unwrap().fail_sends = fail;
    }
}

impl Transport for MemoryTransport {
    fn send_frame(&self, frame: String) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.open || state.fail_sends {
            return Err(TransportError::NotOpen);
        }
        state.frames.push(frame);
        Ok(())
    }

    fn close(&self) {
        let mut state = self.state.lock().unwrap();
        if state.open {
            state.open = false;
            state.closes += 1;
        }
    }

    fn is_open(&self) -> bool {
        self.state.lock().unwrap().open
    }
}

/// Hands out one prepared connection, or fails like an unreachable endpoint.
pub struct MemoryConnector {
    connection: Mutex<Option<Connection>>,
}

impl MemoryConnector {
    pub fn new(connection: Connection) -> Self {
        Self {
            connection: Mutex::new(Some(connection)),
        }
    }

    pub fn unreachable() -> Self {
        Self {
            connection: Mutex::new(None),
        }
    }
}

#[async_trait::async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, endpoint: &str) -> Result<Connection> {
        self.connection
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| TransportError::Connection {
                endpoint: endpoint.to_string(),
                reason: "connection refused".to_string(),
            })
    }
}
