// Backend connection establishment.
//
// The connector abstracts where sockets come from so transport adapters can
// be tested without a live guacd. GuacdConnector implements the guacd
// client-side handshake:
//
//   1. gateway -> guacd: select,<protocol>;   (or select,<connection-id>;)
//   2. guacd -> gateway: args,<version>,<arg1>,<arg2>,...;
//   3. gateway -> guacd: size,<w>,<h>,<dpi>; audio,...; video,...; image,...;
//   4. gateway -> guacd: connect,<version>,<val1>,<val2>,...;
//   5. guacd -> gateway: ready,<connection-id>;

use std::str;
use std::time::Duration;

use async_trait::async_trait;
use guacgate_protocol::{Instruction, Status};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::config::{ClientInfo, ConnectionConfig};
use crate::error::{GuacError, Result};
use crate::io::{DynRead, DynWrite, InstructionReader, InstructionWriter};
use crate::socket::GuacamoleSocket;

/// Protocol version announced in the `connect` instruction when the backend
/// negotiates versions at all.
pub const PROTOCOL_VERSION: &str = "VERSION_1_5_0";

/// Default time allowed for TCP connect plus the whole handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Source of established backend sockets. Implemented over TCP to guacd in
/// production and by in-memory mocks in tests.
#[async_trait]
pub trait TunnelConnector: Send + Sync {
    /// Establishes a backend session for the given configuration, running
    /// any handshake the backend requires.
    async fn connect(&self, config: ConnectionConfig, info: ClientInfo)
        -> Result<GuacamoleSocket>;
}

/// Connects to a guacd proxy daemon over TCP.
pub struct GuacdConnector {
    addr: String,
    timeout: Duration,
}

impl GuacdConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl TunnelConnector for GuacdConnector {
    async fn connect(
        &self,
        config: ConnectionConfig,
        info: ClientInfo,
    ) -> Result<GuacamoleSocket> {
        let handshake = async {
            let stream = TcpStream::connect(&self.addr)
                .await
                .map_err(|e| GuacError::Upstream(format!("connecting to {}: {}", self.addr, e)))?;
            stream.set_nodelay(true)?;
            establish_socket(stream, config, info).await
        };
        match tokio::time::timeout(self.timeout, handshake).await {
            Ok(result) => result,
            Err(_) => Err(GuacError::UpstreamTimeout),
        }
    }
}

/// Runs the client-side handshake over an already-connected stream and
/// returns the resulting socket. Any instructions the backend sent after
/// `ready` stay buffered in the socket's reader.
pub async fn establish_socket<S>(
    stream: S,
    config: ConnectionConfig,
    info: ClientInfo,
) -> Result<GuacamoleSocket>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = InstructionReader::new(Box::new(read_half) as DynRead);
    let mut writer = InstructionWriter::new(Box::new(write_half) as DynWrite);

    // Join an existing session when a connection ID was selected.
    let select_arg = config
        .connection_id
        .clone()
        .unwrap_or_else(|| config.protocol.clone());
    writer.write_instruction(&Instruction::new("select", vec![select_arg]));
    writer.flush().await?;

    let args = expect_instruction(&mut reader, "args").await?;

    // Modern backends lead the args list with their protocol version; older
    // ones start straight with argument names and take a versionless connect.
    let (version, arg_names): (Option<&str>, &[String]) = match args.args.first() {
        Some(first) if first.starts_with("VERSION_") => {
            if first != PROTOCOL_VERSION {
                warn!(
                    backend_version = %first,
                    "backend protocol version differs from {}",
                    PROTOCOL_VERSION
                );
            }
            (Some(first.as_str()), &args.args[1..])
        }
        _ => (None, &args.args[..]),
    };

    writer.write_instruction(&Instruction::new(
        "size",
        vec![
            info.optimal_width.to_string(),
            info.optimal_height.to_string(),
            info.optimal_resolution.to_string(),
        ],
    ));
    writer.write_instruction(&Instruction::new("audio", info.audio_mimetypes.clone()));
    writer.write_instruction(&Instruction::new("video", info.video_mimetypes.clone()));
    writer.write_instruction(&Instruction::new("image", info.image_mimetypes.clone()));

    // Connect values must line up positionally with the declared arg names;
    // unknown names get empty values.
    let mut connect_args = Vec::with_capacity(arg_names.len() + 1);
    if let Some(version) = version {
        connect_args.push(version.to_string());
    }
    for name in arg_names {
        connect_args.push(config.parameters.get(name).cloned().unwrap_or_default());
    }
    writer.write_instruction(&Instruction::new("connect", connect_args));
    writer.flush().await?;

    let ready = expect_instruction(&mut reader, "ready").await?;
    let connection_id = ready.args.first().cloned();
    debug!(
        connection_id = connection_id.as_deref().unwrap_or(""),
        protocol = %config.protocol,
        "backend session established"
    );

    Ok(GuacamoleSocket::from_parts(
        reader,
        writer,
        Some(config),
        connection_id,
    ))
}

/// Reads the next instruction and requires the given opcode. A backend
/// "error" instruction becomes the error its status encodes.
async fn expect_instruction(
    reader: &mut InstructionReader<DynRead>,
    opcode: &str,
) -> Result<Instruction> {
    let raw = reader.read_instruction().await?.ok_or_else(|| {
        GuacError::Upstream(format!("backend closed connection awaiting \"{}\"", opcode))
    })?;
    let text = str::from_utf8(&raw)
        .map_err(|_| GuacError::Upstream("instruction is not valid UTF-8".to_string()))?;
    let instruction = Instruction::parse(text)?;

    if instruction.opcode == "error" {
        return Err(backend_error(&instruction));
    }
    if instruction.opcode != opcode {
        return Err(GuacError::Upstream(format!(
            "expected \"{}\" from backend, got \"{}\"",
            opcode, instruction.opcode
        )));
    }
    Ok(instruction)
}

/// Decodes a backend `error,<message>,<status>` instruction.
fn backend_error(instruction: &Instruction) -> GuacError {
    let message = instruction.args.first().map(String::as_str).unwrap_or("");
    let status = instruction
        .args
        .get(1)
        .and_then(|code| code.parse::<u32>().ok())
        .and_then(Status::from_guac_code);
    GuacError::from_status(status, message)
}
