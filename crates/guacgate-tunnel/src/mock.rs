// In-memory connector for exercising transport adapters without a backend.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::io::{duplex, DuplexStream};
use tokio::sync::mpsc;

use crate::config::{ClientInfo, ConnectionConfig};
use crate::connect::TunnelConnector;
use crate::error::{GuacError, Result};
use crate::socket::GuacamoleSocket;

const MOCK_STREAM_CAPACITY: usize = 64 * 1024;

/// Connector that hands each connection one side of an in-memory duplex
/// stream and delivers the other side to the test through a channel, so the
/// test can script the backend.
pub struct MockConnector {
    backends: mpsc::UnboundedSender<DuplexStream>,
    refusal: Option<String>,
    connect_count: AtomicU64,
}

impl MockConnector {
    /// A connector that accepts every connection. The receiver yields the
    /// backend side of each established stream.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DuplexStream>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                backends: tx,
                refusal: None,
                connect_count: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// A connector that refuses every connection as unauthorized.
    pub fn refusing(message: impl Into<String>) -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self {
            backends: tx,
            refusal: Some(message.into()),
            connect_count: AtomicU64::new(0),
        }
    }

    /// How many connection attempts this connector has seen.
    pub fn connect_count(&self) -> u64 {
        self.connect_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TunnelConnector for MockConnector {
    async fn connect(
        &self,
        _config: ConnectionConfig,
        _info: ClientInfo,
    ) -> Result<GuacamoleSocket> {
        self.connect_count.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.refusal {
            return Err(GuacError::Security(message.clone()));
        }
        let (gateway_side, backend_side) = duplex(MOCK_STREAM_CAPACITY);
        self.backends
            .send(backend_side)
            .map_err(|_| GuacError::Server("mock backend receiver dropped".to_string()))?;
        Ok(GuacamoleSocket::new(gateway_side))
    }
}
