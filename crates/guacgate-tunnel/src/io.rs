// Instruction-boundary-aware buffered I/O over any duplex byte stream.
//
// The reader accumulates partial reads across network packets and hands out
// exactly one raw instruction at a time; the writer batches output until an
// explicit flush so related instructions reach the network in one send.

use bytes::{Bytes, BytesMut};
use guacgate_protocol::{peek_instruction, Instruction, PeekError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{GuacError, Result};

/// Maximum size of a whole buffered instruction in bytes. Prevents a
/// misbehaving peer from growing the read buffer without bound.
pub const MAX_INSTRUCTION_SIZE: usize = 256 * 1024;

/// How much to grow the read buffer per read from the transport.
const READ_CHUNK: usize = 8 * 1024;

/// Boxed read half of a socket's stream.
pub type DynRead = Box<dyn AsyncRead + Send + Unpin>;
/// Boxed write half of a socket's stream.
pub type DynWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// Buffered, framing-aware reader for one direction of a connection.
pub struct InstructionReader<R> {
    inner: R,
    buffer: BytesMut,
}

impl<R: AsyncRead + Unpin> InstructionReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buffer: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    /// Whether a complete instruction is already buffered and can be
    /// returned without touching the underlying transport.
    ///
    /// Transport adapters use this to decide between flushing partial
    /// output immediately (low latency) and continuing to batch
    /// (throughput).
    pub fn available(&self) -> bool {
        peek_instruction(&self.buffer).is_ok()
    }

    /// Reads one complete raw instruction, terminator included.
    ///
    /// Returns `Ok(None)` on clean end of stream at an instruction
    /// boundary. EOF mid-instruction and malformed framing are upstream
    /// errors, since this reader only ever faces the backend.
    ///
    /// Cancel-safe: a cancelled read leaves partial data in the buffer for
    /// the next call.
    pub async fn read_instruction(&mut self) -> Result<Option<Bytes>> {
        loop {
            match peek_instruction(&self.buffer) {
                Ok(len) => return Ok(Some(self.buffer.split_to(len).freeze())),
                Err(PeekError::Malformed(e)) => return Err(e.into()),
                Err(PeekError::Incomplete) => {
                    if self.buffer.len() > MAX_INSTRUCTION_SIZE {
                        return Err(GuacError::Upstream(format!(
                            "instruction exceeds maximum size of {} bytes",
                            MAX_INSTRUCTION_SIZE
                        )));
                    }
                }
            }

            self.buffer.reserve(READ_CHUNK);
            let n = self.inner.read_buf(&mut self.buffer).await?;
            if n == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(GuacError::Upstream(
                    "stream ended mid-instruction".to_string(),
                ));
            }
        }
    }
}

/// Buffered writer for one direction of a connection. Nothing reaches the
/// transport until [`InstructionWriter::flush`].
pub struct InstructionWriter<W> {
    inner: W,
    buffer: BytesMut,
}

impl<W: AsyncWrite + Unpin> InstructionWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            buffer: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    /// Appends already-encoded instruction bytes verbatim.
    pub fn write_raw(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Appends one instruction in wire format.
    pub fn write_instruction(&mut self, instruction: &Instruction) {
        self.buffer.extend_from_slice(instruction.encode().as_bytes());
    }

    pub fn has_pending(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Writes all buffered output to the transport and flushes it.
    pub async fn flush(&mut self) -> Result<()> {
        if !self.buffer.is_empty() {
            let data = self.buffer.split().freeze();
            self.inner.write_all(&data).await?;
        }
        self.inner.flush().await?;
        Ok(())
    }

    /// Shuts the write half down, signalling EOF to the peer.
    pub async fn shutdown(&mut self) -> std::io::Result<()> {
        self.inner.shutdown().await
    }
}
