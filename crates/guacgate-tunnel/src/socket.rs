// GuacamoleSocket: one live duplex connection to a backend session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{watch, Mutex};
use tracing::debug;

use crate::config::ConnectionConfig;
use crate::io::{DynRead, DynWrite, InstructionReader, InstructionWriter};

/// Wraps a live connection to a backend remote-desktop session, exposing its
/// instruction reader and writer plus lifecycle state.
///
/// Exclusively owned by the tunnel built around it; the reader and writer
/// halves are shared only through the tunnel's per-direction locks.
pub struct GuacamoleSocket {
    reader: Arc<Mutex<InstructionReader<DynRead>>>,
    writer: Arc<Mutex<InstructionWriter<DynWrite>>>,
    open: AtomicBool,
    closed_tx: watch::Sender<bool>,
    config: Option<ConnectionConfig>,
    connection_id: Option<String>,
}

impl GuacamoleSocket {
    /// Wraps an already-established duplex stream with no negotiated
    /// configuration. Tests and custom connectors use this directly; the
    /// guacd connector goes through the handshake first.
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        Self::from_parts(
            InstructionReader::new(Box::new(read_half) as DynRead),
            InstructionWriter::new(Box::new(write_half) as DynWrite),
            None,
            None,
        )
    }

    /// Assembles a socket from reader/writer halves that may already hold
    /// buffered data (leftovers from the connection handshake).
    pub fn from_parts(
        reader: InstructionReader<DynRead>,
        writer: InstructionWriter<DynWrite>,
        config: Option<ConnectionConfig>,
        connection_id: Option<String>,
    ) -> Self {
        let (closed_tx, _) = watch::channel(false);
        Self {
            reader: Arc::new(Mutex::new(reader)),
            writer: Arc::new(Mutex::new(writer)),
            open: AtomicBool::new(true),
            closed_tx,
            config,
            connection_id,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// The configuration negotiated for this connection, if any.
    pub fn config(&self) -> Option<&ConnectionConfig> {
        self.config.as_ref()
    }

    /// The backend-assigned connection ID (from the `ready` instruction),
    /// if any. Other clients may join the session by selecting this ID.
    pub fn connection_id(&self) -> Option<&str> {
        self.connection_id.as_deref()
    }

    /// A receiver that resolves to `true` once the socket closes. Every
    /// blocking operation on the socket selects on this signal.
    pub fn closed(&self) -> watch::Receiver<bool> {
        self.closed_tx.subscribe()
    }

    pub(crate) fn reader(&self) -> Arc<Mutex<InstructionReader<DynRead>>> {
        Arc::clone(&self.reader)
    }

    pub(crate) fn writer(&self) -> Arc<Mutex<InstructionWriter<DynWrite>>> {
        Arc::clone(&self.writer)
    }

    /// Closes the socket. Idempotent and safe to call concurrently with an
    /// in-progress read or write: in-flight operations observe the closed
    /// signal and fail with `ConnectionClosed` instead of blocking forever.
    pub async fn close(&self) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.closed_tx.send(true);

        // Shut the write half down so the backend sees EOF. If a writer
        // holder is mid-operation it unblocks via the closed signal first,
        // so take the shutdown off this call path rather than wait.
        match self.writer.try_lock() {
            Ok(mut writer) => {
                if let Err(e) = writer.shutdown().await {
                    debug!("error shutting down socket write half: {}", e);
                }
            }
            Err(_) => {
                let writer = Arc::clone(&self.writer);
                tokio::spawn(async move {
                    let mut writer = writer.lock().await;
                    if let Err(e) = writer.shutdown().await {
                        debug!("error shutting down socket write half: {}", e);
                    }
                });
            }
        }
    }
}
