// GuacamoleTunnel: the central concurrency primitive.
//
// One tunnel binds one client session to one backend socket for its whole
// lifetime. Reader and writer access are serialized by two independent
// locks, so HTTP long polling's split read and write requests never block
// each other, while same-direction requests queue. Every blocking operation
// selects on the socket's closed signal, so close() from any task unblocks
// everything deterministically.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use guacgate_protocol::Instruction;
use tokio::sync::{watch, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

use crate::error::{GuacError, Result};
use crate::io::{DynRead, DynWrite, InstructionReader, InstructionWriter};
use crate::socket::GuacamoleSocket;

/// Opcode reserved for instructions exchanged between the transport layer
/// and the client that are never forwarded to the backend (UUID delivery,
/// ping).
pub const INTERNAL_DATA_OPCODE: &str = "";

const STATE_OPEN: u8 = 0;
const STATE_CLOSING: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// Lifecycle state of a tunnel. Transitions only forward:
/// `Open -> Closing -> Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Open,
    Closing,
    Closed,
}

/// The logical, long-lived binding between one client session and one
/// backend socket, independent of how many HTTP requests or WebSocket
/// frames carry its traffic.
pub struct GuacamoleTunnel {
    uuid: Uuid,
    socket: GuacamoleSocket,
    state: AtomicU8,
    queued_readers: Arc<AtomicUsize>,
}

impl GuacamoleTunnel {
    /// Creates a tunnel around an open socket, assigning a fresh UUID.
    pub fn new(socket: GuacamoleSocket) -> Self {
        let uuid = Uuid::new_v4();
        debug!(tunnel = %uuid, "created tunnel");
        Self {
            uuid,
            socket,
            state: AtomicU8::new(STATE_OPEN),
            queued_readers: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn socket(&self) -> &GuacamoleSocket {
        &self.socket
    }

    pub fn state(&self) -> TunnelState {
        match self.state.load(Ordering::SeqCst) {
            STATE_OPEN => TunnelState::Open,
            STATE_CLOSING => TunnelState::Closing,
            _ => TunnelState::Closed,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state() == TunnelState::Open && self.socket.is_open()
    }

    /// Whether other callers are currently waiting for reader access. A
    /// long-poll holder checks this to yield the stream to a newer request.
    pub fn has_queued_readers(&self) -> bool {
        self.queued_readers.load(Ordering::SeqCst) > 0
    }

    /// Grants exclusive reader access, blocking while another caller holds
    /// it. Release is dropping the returned handle, so acquisition and
    /// release may happen in unrelated request lifecycles.
    ///
    /// Fails fast with `ConnectionClosed` if the tunnel is closed, including
    /// while blocked waiting.
    pub async fn acquire_reader(&self) -> Result<TunnelReader> {
        if !self.is_open() {
            return Err(GuacError::ConnectionClosed);
        }
        let mut closed = self.socket.closed();
        let reader = self.socket.reader();

        self.queued_readers.fetch_add(1, Ordering::SeqCst);
        let acquired = tokio::select! {
            guard = reader.lock_owned() => Some(guard),
            _ = closed.wait_for(|c| *c) => None,
        };
        self.queued_readers.fetch_sub(1, Ordering::SeqCst);

        let guard = acquired.ok_or(GuacError::ConnectionClosed)?;
        if !self.is_open() {
            return Err(GuacError::ConnectionClosed);
        }
        Ok(TunnelReader {
            guard,
            closed,
            queued_readers: Arc::clone(&self.queued_readers),
        })
    }

    /// Grants exclusive writer access; independent of the reader lock so a
    /// concurrent read and write proceed simultaneously.
    pub async fn acquire_writer(&self) -> Result<TunnelWriter> {
        if !self.is_open() {
            return Err(GuacError::ConnectionClosed);
        }
        let mut closed = self.socket.closed();
        let writer = self.socket.writer();

        let acquired = tokio::select! {
            guard = writer.lock_owned() => Some(guard),
            _ = closed.wait_for(|c| *c) => None,
        };

        let guard = acquired.ok_or(GuacError::ConnectionClosed)?;
        if !self.is_open() {
            return Err(GuacError::ConnectionClosed);
        }
        Ok(TunnelWriter { guard, closed })
    }

    /// Closes the tunnel and its socket, unblocking every waiter and
    /// in-flight operation. Idempotent; the second and later calls are
    /// no-ops.
    pub async fn close(&self) {
        if self
            .state
            .compare_exchange(STATE_OPEN, STATE_CLOSING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        debug!(tunnel = %self.uuid, "closing tunnel");
        self.socket.close().await;
        self.state.store(STATE_CLOSED, Ordering::SeqCst);
    }
}

/// Exclusive reader access to a tunnel's socket. Dropping the handle
/// releases the reader lock, even if no read ever occurred.
pub struct TunnelReader {
    guard: OwnedMutexGuard<InstructionReader<DynRead>>,
    closed: watch::Receiver<bool>,
    queued_readers: Arc<AtomicUsize>,
}

impl TunnelReader {
    /// Reads one raw instruction, `Ok(None)` on clean backend EOF.
    ///
    /// Unblocks with `ConnectionClosed` if the tunnel is closed from
    /// another task while this read is in flight.
    pub async fn read(&mut self) -> Result<Option<Bytes>> {
        if *self.closed.borrow() {
            return Err(GuacError::ConnectionClosed);
        }
        tokio::select! {
            result = self.guard.read_instruction() => result,
            _ = self.closed.wait_for(|c| *c) => Err(GuacError::ConnectionClosed),
        }
    }

    /// Whether another instruction is already buffered.
    pub fn available(&self) -> bool {
        self.guard.available()
    }

    /// Whether another caller is waiting to take over reading.
    pub fn has_queued_readers(&self) -> bool {
        self.queued_readers.load(Ordering::SeqCst) > 0
    }
}

/// Exclusive writer access to a tunnel's socket. Dropping the handle
/// releases the writer lock; buffered but unflushed output stays in the
/// socket's write buffer.
pub struct TunnelWriter {
    guard: OwnedMutexGuard<InstructionWriter<DynWrite>>,
    closed: watch::Receiver<bool>,
}

impl TunnelWriter {
    /// Buffers already-encoded instruction bytes verbatim.
    pub fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        if *self.closed.borrow() {
            return Err(GuacError::ConnectionClosed);
        }
        self.guard.write_raw(data);
        Ok(())
    }

    /// Buffers one instruction in wire format.
    pub fn write_instruction(&mut self, instruction: &Instruction) -> Result<()> {
        if *self.closed.borrow() {
            return Err(GuacError::ConnectionClosed);
        }
        self.guard.write_instruction(instruction);
        Ok(())
    }

    /// Sends everything buffered to the backend.
    pub async fn flush(&mut self) -> Result<()> {
        if *self.closed.borrow() {
            return Err(GuacError::ConnectionClosed);
        }
        tokio::select! {
            result = self.guard.flush() => result,
            _ = self.closed.wait_for(|c| *c) => Err(GuacError::ConnectionClosed),
        }
    }
}
