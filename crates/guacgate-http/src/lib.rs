// Transport adapters: HTTP long polling and WebSocket, both translating
// their request/frame lifecycle into reader/writer acquisition against a
// shared tunnel.

pub mod http;
pub mod ws;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderValue, Response, StatusCode};
use axum::routing::get;
use axum::Router;
use guacgate_tunnel::{GuacError, TunnelConnector, TunnelRegistry};

/// Flush to the client once this much output is buffered, even if more
/// instructions are immediately available.
pub(crate) const FLUSH_BUFFER_SIZE: usize = 8 * 1024;

/// Default idle timeout for a long-poll read before the handler releases
/// the reader and answers with an empty response.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(15);

/// Shared state behind both transport adapters.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<TunnelRegistry>,
    pub connector: Arc<dyn TunnelConnector>,
    pub read_timeout: Duration,
}

impl AppState {
    pub fn new(connector: Arc<dyn TunnelConnector>) -> Self {
        Self {
            registry: Arc::new(TunnelRegistry::new()),
            connector,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }
}

/// Builds the tunnel router: the long-poll endpoint at `/tunnel` and the
/// WebSocket endpoint at `/websocket-tunnel`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/tunnel", get(http::tunnel_request).post(http::tunnel_request))
        .route("/websocket-tunnel", get(ws::websocket_request))
        .with_state(state)
}

/// Maps an error to its client-visible HTTP response: the status table's
/// HTTP code plus `Guacamole-Status-Code` and `Guacamole-Error-Message`
/// headers the JavaScript client inspects.
pub(crate) fn error_response(err: &GuacError) -> Response<Body> {
    let status = err.status();
    let http_status = StatusCode::from_u16(status.http_code())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let message = HeaderValue::from_str(&err.to_string())
        .unwrap_or_else(|_| HeaderValue::from_static("request failed"));

    let mut response = Response::new(Body::empty());
    *response.status_mut() = http_status;
    let headers = response.headers_mut();
    headers.insert(
        "Guacamole-Status-Code",
        HeaderValue::from(status.guac_code()),
    );
    headers.insert("Guacamole-Error-Message", message);
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_carries_status_headers() {
        let response = error_response(&GuacError::ResourceNotFound("u".to_string()));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get("Guacamole-Status-Code").unwrap(),
            "516"
        );
    }
}
