use guacgate_protocol::{ParseError, Status};
use thiserror::Error;

/// Error taxonomy for the tunnel core.
///
/// Fatal errors funnel through `GuacamoleTunnel::close()` so blocked readers
/// and writers unblock deterministically; the transport adapters map each
/// kind to a client-visible status via [`GuacError::status`]. Neither the
/// tunnel nor the socket layer ever retries.
#[derive(Debug, Error)]
pub enum GuacError {
    /// Malformed instruction framing from the client. Fatal to the tunnel.
    /// Backend framing errors are [`GuacError::Upstream`] instead, so the
    /// client is never blamed for garbage it did not send.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The stream ended cleanly, or the tunnel was closed. Not a failure;
    /// transports close gracefully.
    #[error("connection closed")]
    ConnectionClosed,

    /// Unknown or already-removed tunnel UUID. A normal, expected condition
    /// (client retried after a server restart).
    #[error("no such tunnel: {0}")]
    ResourceNotFound(String),

    /// The backend rejected credentials or the handshake; no tunnel was
    /// created.
    #[error("authorization refused: {0}")]
    Security(String),

    /// Network or protocol failure talking to the backend. Fatal to the
    /// tunnel.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// The backend stopped responding.
    #[error("upstream timed out")]
    UpstreamTimeout,

    /// A malformed request from the client (invalid tunnel operation,
    /// missing connection parameters).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Internal failure.
    #[error("server error: {0}")]
    Server(String),

    /// I/O failure on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GuacError {
    /// The client-visible status for this error. Exhaustive: every kind has
    /// a defined code, so a client never sees an ambiguous disconnect.
    pub fn status(&self) -> Status {
        match self {
            GuacError::Protocol(_) => Status::ClientBadRequest,
            GuacError::ConnectionClosed => Status::ResourceClosed,
            GuacError::ResourceNotFound(_) => Status::ResourceNotFound,
            GuacError::Security(_) => Status::ClientUnauthorized,
            GuacError::Upstream(_) => Status::UpstreamError,
            GuacError::UpstreamTimeout => Status::UpstreamTimeout,
            GuacError::BadRequest(_) => Status::ClientBadRequest,
            GuacError::Server(_) => Status::ServerError,
            GuacError::Io(_) => Status::ServerError,
        }
    }

    /// Builds the error matching a status decoded from a backend "error"
    /// instruction.
    pub fn from_status(status: Option<Status>, message: &str) -> GuacError {
        match status {
            Some(Status::ClientUnauthorized) | Some(Status::ClientForbidden) => {
                GuacError::Security(message.to_string())
            }
            Some(Status::UpstreamTimeout) => GuacError::UpstreamTimeout,
            Some(Status::ResourceClosed) | Some(Status::SessionClosed) => {
                GuacError::ConnectionClosed
            }
            _ => GuacError::Upstream(message.to_string()),
        }
    }
}

// Parsing happens in this crate only while reading from the backend, so a
// framing error crossing this boundary is an upstream failure. Transports
// validate client frames themselves and raise `Protocol` directly.
impl From<ParseError> for GuacError {
    fn from(err: ParseError) -> Self {
        GuacError::Upstream(format!("malformed instruction from backend: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, GuacError>;
