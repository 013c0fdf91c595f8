// HTTP long-polling adapter.
//
// One endpoint, dispatched on the leading query-string token:
//
//   POST /tunnel?connect&<param>=<value>...   establish, respond with UUID
//   GET|POST /tunnel?read:<uuid>              long-poll server-to-client
//   POST /tunnel?write:<uuid>                 client-to-server instruction
//                                             bytes in the request body
//
// Inbound and outbound requests for the same tunnel run on independent
// tasks and never block each other; only same-direction requests serialize,
// via the tunnel's per-direction locks.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::{header, HeaderValue, Response};
use bytes::BytesMut;
use futures::stream;
use guacgate_tunnel::{
    ClientInfo, ConnectionConfig, GuacError, GuacamoleTunnel, Result, TunnelReader,
    TunnelRegistry,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{error_response, AppState, FLUSH_BUFFER_SIZE};

/// Written to the client after the final instruction so it can distinguish
/// a completed stream from a dropped connection.
const END_OF_INSTRUCTIONS: &[u8] = b"0.;";

/// Entry point for every tunnel request; the operation is the first
/// query-string token.
pub async fn tunnel_request(
    State(state): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
    body: Bytes,
) -> Response<Body> {
    let operation = params.first().map(|(key, _)| key.as_str()).unwrap_or("");

    let result = if operation == "connect" {
        connect(&state, &params[1..]).await
    } else if let Some(uuid) = operation.strip_prefix("read:") {
        read(&state, uuid).await
    } else if let Some(uuid) = operation.strip_prefix("write:") {
        write(&state, uuid, body).await
    } else {
        Err(GuacError::BadRequest(format!(
            "invalid tunnel operation: \"{}\"",
            operation
        )))
    };

    result.unwrap_or_else(|err| {
        debug!(%operation, error = %err, "tunnel request failed");
        error_response(&err)
    })
}

/// Establishes a backend session and registers a tunnel for it. The
/// response body is the tunnel UUID the client uses for read/write
/// requests.
async fn connect(state: &AppState, params: &[(String, String)]) -> Result<Response<Body>> {
    let params: HashMap<String, String> = params.iter().cloned().collect();
    let info = ClientInfo::from_params(&params);
    let config = ConnectionConfig::from_params(params)?;

    let socket = state.connector.connect(config, info).await?;
    let tunnel = Arc::new(GuacamoleTunnel::new(socket));
    state.registry.register(Arc::clone(&tunnel));

    Ok(tunnel_response(Body::from(tunnel.uuid().to_string())))
}

/// Long-poll read: holds the response open, streaming instructions until
/// the backend goes quiet, another read request queues up, or the stream
/// ends.
async fn read(state: &AppState, uuid: &str) -> Result<Response<Body>> {
    let uuid = parse_uuid(uuid)?;
    let tunnel = state.registry.get(&uuid)?;
    let mut reader = tunnel.acquire_reader().await?;

    // The first instruction is bounded by the idle timeout: expiry is a
    // liveness mechanism, not an error. The reader is released and the
    // client re-polls.
    let first = match tokio::time::timeout(state.read_timeout, reader.read()).await {
        Err(_) => return Ok(tunnel_response(Body::empty())),
        Ok(result) => result,
    };

    let first = match first {
        Ok(Some(raw)) => raw,
        // Stream over before any data: terminate in-band and tear down.
        Ok(None) | Err(GuacError::ConnectionClosed) => {
            finish_tunnel(&state.registry, &tunnel).await;
            return Ok(tunnel_response(Body::from(END_OF_INSTRUCTIONS)));
        }
        Err(err) => {
            finish_tunnel(&state.registry, &tunnel).await;
            return Err(err);
        }
    };

    // Stream the rest from a task so the response body can flow while we
    // keep reading. The reader handle moves into the task; dropping it
    // there releases reader access whenever the loop ends.
    let (tx, rx) = mpsc::channel::<Bytes>(4);
    let registry = Arc::clone(&state.registry);
    tokio::spawn(stream_instructions(reader, first, tx, registry, tunnel));

    let body = Body::from_stream(stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (Ok::<_, GuacError>(chunk), rx))
    }));
    Ok(tunnel_response(body))
}

/// Body of the long-poll response: batch instructions, flushing whenever
/// nothing more is immediately available or the buffer threshold is hit,
/// and yield the stream once a newer read request is waiting.
async fn stream_instructions(
    mut reader: TunnelReader,
    first: Bytes,
    tx: mpsc::Sender<Bytes>,
    registry: Arc<TunnelRegistry>,
    tunnel: Arc<GuacamoleTunnel>,
) {
    let mut pending = BytesMut::from(&first[..]);

    loop {
        if !reader.available() || pending.len() >= FLUSH_BUFFER_SIZE {
            // A send failure means the client went away; release the
            // reader but leave the tunnel open for the next poll.
            if tx.send(pending.split().freeze()).await.is_err() {
                return;
            }
        }

        // Hand the stream over to a queued, newer read request. Everything
        // already consumed from the socket goes out first, terminated
        // in-band, so no instruction is lost across the handoff.
        if reader.has_queued_readers() {
            pending.extend_from_slice(END_OF_INSTRUCTIONS);
            let _ = tx.send(pending.split().freeze()).await;
            return;
        }

        match reader.read().await {
            Ok(Some(raw)) => pending.extend_from_slice(&raw),
            Ok(None) | Err(GuacError::ConnectionClosed) => {
                pending.extend_from_slice(END_OF_INSTRUCTIONS);
                let _ = tx.send(pending.split().freeze()).await;
                finish_tunnel(&registry, &tunnel).await;
                return;
            }
            Err(err) => {
                // Response already committed; all we can do is tear down.
                warn!(tunnel = %tunnel.uuid(), error = %err, "tunnel read failed");
                finish_tunnel(&registry, &tunnel).await;
                return;
            }
        }
    }
}

/// Inbound write: the body is instruction bytes already encoded by the
/// client, forwarded verbatim.
async fn write(state: &AppState, uuid: &str, body: Bytes) -> Result<Response<Body>> {
    let uuid = parse_uuid(uuid)?;
    let tunnel = state.registry.get(&uuid)?;

    let result = async {
        let mut writer = tunnel.acquire_writer().await?;
        writer.write_raw(&body)?;
        writer.flush().await
    }
    .await;

    match result {
        // Racing a close is normal; the read side reports the closure.
        Ok(()) | Err(GuacError::ConnectionClosed) => Ok(tunnel_response(Body::empty())),
        // A failed write is fatal to the tunnel, same as a failed read.
        Err(err) => {
            finish_tunnel(&state.registry, &tunnel).await;
            Err(err)
        }
    }
}

fn parse_uuid(uuid: &str) -> Result<Uuid> {
    Uuid::parse_str(uuid)
        .map_err(|_| GuacError::BadRequest(format!("malformed tunnel UUID: \"{}\"", uuid)))
}

/// Removes the tunnel from the registry and closes it.
async fn finish_tunnel(registry: &TunnelRegistry, tunnel: &GuacamoleTunnel) {
    registry.remove(&tunnel.uuid());
    tunnel.close().await;
}

/// Successful responses are uncacheable octet streams; instruction text is
/// opaque to intermediaries.
fn tunnel_response(body: Body) -> Response<Body> {
    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}
