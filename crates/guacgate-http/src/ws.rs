// WebSocket adapter: one full-duplex connection replaces the long-poll
// read/write request pair.
//
// Connection parameters arrive in the upgrade request's query string. On
// upgrade the backend session is established; failure closes the WebSocket
// immediately with the status's close code. Afterwards a dedicated task
// pumps backend instructions to the client while incoming text frames are
// written to the tunnel as they arrive.

use std::collections::HashMap;
use std::mem;
use std::str;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use guacgate_protocol::{format_instruction, Status};
use guacgate_tunnel::{
    ClientInfo, ConnectionConfig, GuacError, GuacamoleTunnel, Result, INTERNAL_DATA_OPCODE,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{AppState, FLUSH_BUFFER_SIZE};

/// `GET /websocket-tunnel` upgrade handler; negotiates the `guacamole`
/// subprotocol.
pub async fn websocket_request(
    State(state): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.protocols(["guacamole"])
        .on_upgrade(move |socket| handle_session(socket, state, params))
}

async fn handle_session(socket: WebSocket, state: AppState, params: Vec<(String, String)>) {
    let tunnel = match establish_tunnel(&state, params).await {
        Ok(tunnel) => tunnel,
        Err(err) => {
            debug!(error = %err, "websocket connect failed");
            let mut socket = socket;
            let _ = socket.send(close_message(err.status())).await;
            return;
        }
    };
    let uuid = tunnel.uuid();

    let (mut sink, mut inbound) = socket.split();

    // All outgoing frames funnel through one channel so the backend read
    // loop and ping replies share the sink without locking it.
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(16);
    let forward = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            if sink.send(message).await.is_err() {
                return;
            }
        }
    });
    let read_loop = tokio::spawn(run_read_loop(Arc::clone(&tunnel), out_tx.clone()));

    while let Some(message) = inbound.next().await {
        match message {
            Ok(Message::Text(frame)) => {
                match handle_frame(&tunnel, frame.as_str(), &out_tx).await {
                    Ok(()) | Err(GuacError::ConnectionClosed) => {}
                    Err(err) => {
                        warn!(tunnel = %uuid, error = %err, "inbound frame rejected");
                        let _ = out_tx.send(close_message(err.status())).await;
                        break;
                    }
                }
                if !tunnel.is_open() {
                    break;
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            // Binary frames are not part of the protocol; ping/pong are
            // handled by the transport.
            Ok(_) => {}
        }
    }

    state.registry.remove(&uuid);
    tunnel.close().await;
    drop(out_tx);
    let _ = read_loop.await;
    let _ = forward.await;
    debug!(tunnel = %uuid, "websocket session ended");
}

/// Runs the connect collaborator and registers the resulting tunnel.
async fn establish_tunnel(
    state: &AppState,
    params: Vec<(String, String)>,
) -> Result<Arc<GuacamoleTunnel>> {
    let params: HashMap<String, String> = params.into_iter().collect();
    let info = ClientInfo::from_params(&params);
    let config = ConnectionConfig::from_params(params)?;

    let socket = state.connector.connect(config, info).await?;
    let tunnel = Arc::new(GuacamoleTunnel::new(socket));
    state.registry.register(Arc::clone(&tunnel));
    Ok(tunnel)
}

/// Pushes backend instructions to the client as text frames, batching with
/// the same heuristic as the long-poll adapter. The first frame delivers
/// the tunnel UUID as an internal instruction.
async fn run_read_loop(tunnel: Arc<GuacamoleTunnel>, out: mpsc::Sender<Message>) {
    let uuid = tunnel.uuid().to_string();
    let uuid_frame = format_instruction(INTERNAL_DATA_OPCODE, &[uuid.as_str()]);
    if out.send(Message::Text(uuid_frame.into())).await.is_err() {
        return;
    }

    let mut reader = match tunnel.acquire_reader().await {
        Ok(reader) => reader,
        Err(err) => {
            let _ = out.send(close_message(err.status())).await;
            return;
        }
    };

    let mut pending = String::new();
    loop {
        match reader.read().await {
            Ok(Some(raw)) => {
                match str::from_utf8(&raw) {
                    Ok(text) => pending.push_str(text),
                    Err(_) => {
                        let _ = out.send(close_message(Status::ServerError)).await;
                        return;
                    }
                }
                if !reader.available() || pending.len() >= FLUSH_BUFFER_SIZE {
                    let frame = mem::take(&mut pending);
                    if out.send(Message::Text(frame.into())).await.is_err() {
                        return;
                    }
                }
            }
            Ok(None) | Err(GuacError::ConnectionClosed) => {
                let _ = out.send(close_message(Status::Success)).await;
                return;
            }
            Err(err) => {
                warn!(tunnel = %tunnel.uuid(), error = %err, "tunnel read failed");
                let _ = out.send(close_message(err.status())).await;
                return;
            }
        }
    }
}

/// Writes one inbound frame to the tunnel. Internal instructions are
/// filtered out: a ping is answered in-band, nothing internal reaches the
/// backend.
async fn handle_frame(
    tunnel: &GuacamoleTunnel,
    frame: &str,
    out: &mpsc::Sender<Message>,
) -> Result<()> {
    let instructions = guacgate_protocol::parse_instructions(frame)
        .map_err(|e| GuacError::Protocol(e.to_string()))?;

    let internal_count = instructions
        .iter()
        .filter(|i| i.opcode == INTERNAL_DATA_OPCODE)
        .count();

    // Common case: nothing internal, forward the frame byte-for-byte.
    if internal_count == 0 {
        let mut writer = tunnel.acquire_writer().await?;
        writer.write_raw(frame.as_bytes())?;
        return writer.flush().await;
    }

    let mut writer = None;
    for instruction in &instructions {
        if instruction.opcode == INTERNAL_DATA_OPCODE {
            // Ping carries a client timestamp; echo it back unchanged.
            if instruction.args.first().map(String::as_str) == Some("ping") {
                let _ = out.send(Message::Text(instruction.encode().into())).await;
            }
            continue;
        }
        if writer.is_none() {
            writer = Some(tunnel.acquire_writer().await?);
        }
        if let Some(writer) = writer.as_mut() {
            writer.write_instruction(instruction)?;
        }
    }
    if let Some(mut writer) = writer {
        writer.flush().await?;
    }
    Ok(())
}

fn close_message(status: Status) -> Message {
    Message::Close(Some(CloseFrame {
        code: status.websocket_code(),
        reason: status.guac_code().to_string().into(),
    }))
}
