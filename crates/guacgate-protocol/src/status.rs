// Guacamole status codes and their HTTP / WebSocket equivalents.
//
// Every status carries three codes: the Guacamole protocol status code used
// in "error" instructions, the closest HTTP status, and the closest
// WebSocket close code. Transports map errors through this table so a client
// never observes an ambiguous abrupt disconnect.

/// All possible statuses returned by Guacamole operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The operation succeeded.
    Success,
    /// The requested operation is unsupported.
    Unsupported,
    /// The operation failed due to an internal error.
    ServerError,
    /// The server is too busy to service the operation.
    ServerBusy,
    /// The upstream server is not responding.
    UpstreamTimeout,
    /// The upstream server returned an error.
    UpstreamError,
    /// The requested resource does not exist.
    ResourceNotFound,
    /// The requested resource is already in use.
    ResourceConflict,
    /// The requested resource is now closed.
    ResourceClosed,
    /// The upstream server does not appear to exist.
    UpstreamNotFound,
    /// The upstream server is not available.
    UpstreamUnavailable,
    /// The upstream session conflicted with another session.
    SessionConflict,
    /// The upstream session ended due to inactivity.
    SessionTimeout,
    /// The upstream session was forcibly terminated.
    SessionClosed,
    /// Bad parameters were given.
    ClientBadRequest,
    /// The user is not yet authorized.
    ClientUnauthorized,
    /// The operation is forbidden regardless of authorization.
    ClientForbidden,
    /// The client took too long to respond.
    ClientTimeout,
    /// The client sent too much data.
    ClientOverrun,
    /// The client sent data of an unsupported type.
    ClientBadType,
    /// The client is already using too many resources.
    ClientTooMany,
}

impl Status {
    /// (http, websocket, guacamole) code triple for this status.
    const fn codes(self) -> (u16, u16, u32) {
        match self {
            Status::Success => (200, 1000, 0x0000),
            Status::Unsupported => (501, 1011, 0x0100),
            Status::ServerError => (500, 1011, 0x0200),
            Status::ServerBusy => (503, 1008, 0x0201),
            Status::UpstreamTimeout => (504, 1011, 0x0202),
            Status::UpstreamError => (502, 1011, 0x0203),
            Status::ResourceNotFound => (404, 1002, 0x0204),
            Status::ResourceConflict => (409, 1008, 0x0205),
            Status::ResourceClosed => (404, 1002, 0x0206),
            Status::UpstreamNotFound => (502, 1011, 0x0207),
            Status::UpstreamUnavailable => (502, 1011, 0x0208),
            Status::SessionConflict => (409, 1008, 0x0209),
            Status::SessionTimeout => (408, 1002, 0x020A),
            Status::SessionClosed => (404, 1002, 0x020B),
            Status::ClientBadRequest => (400, 1002, 0x0300),
            Status::ClientUnauthorized => (403, 1008, 0x0301),
            Status::ClientForbidden => (403, 1008, 0x0303),
            Status::ClientTimeout => (408, 1002, 0x0308),
            Status::ClientOverrun => (413, 1009, 0x030D),
            Status::ClientBadType => (415, 1003, 0x030F),
            Status::ClientTooMany => (429, 1008, 0x031D),
        }
    }

    /// The most applicable HTTP status code.
    pub const fn http_code(self) -> u16 {
        self.codes().0
    }

    /// The most applicable WebSocket close code.
    pub const fn websocket_code(self) -> u16 {
        self.codes().1
    }

    /// The Guacamole protocol status code.
    pub const fn guac_code(self) -> u32 {
        self.codes().2
    }

    /// Look up the status for a Guacamole protocol status code, as received
    /// in an "error" instruction from the backend.
    pub fn from_guac_code(code: u32) -> Option<Status> {
        const ALL: [Status; 21] = [
            Status::Success,
            Status::Unsupported,
            Status::ServerError,
            Status::ServerBusy,
            Status::UpstreamTimeout,
            Status::UpstreamError,
            Status::ResourceNotFound,
            Status::ResourceConflict,
            Status::ResourceClosed,
            Status::UpstreamNotFound,
            Status::UpstreamUnavailable,
            Status::SessionConflict,
            Status::SessionTimeout,
            Status::SessionClosed,
            Status::ClientBadRequest,
            Status::ClientUnauthorized,
            Status::ClientForbidden,
            Status::ClientTimeout,
            Status::ClientOverrun,
            Status::ClientBadType,
            Status::ClientTooMany,
        ];
        ALL.into_iter().find(|s| s.guac_code() == code)
    }
}
