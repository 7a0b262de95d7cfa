use crate::packet::PacketParseError;

/// Error type for the engine layer.
///
/// Errors raised on the I/O tasks are re-emitted on the serialized scope as
/// `error` events carrying the rendered reason, they never cross the
/// emitter boundary as panics.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The session URI could not be parsed.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// A query string or percent-encoded component is malformed.
    #[error("invalid query string: {0}")]
    InvalidQuery(String),

    /// An HTTP request of the polling transport failed.
    #[error("http error: {0}")]
    Http(String),

    /// The server answered a polling request with a non-success status.
    #[error("unexpected http status: {0}")]
    HttpStatus(u16),

    /// The websocket handshake or session failed.
    #[error("websocket error: {0}")]
    Ws(String),

    /// An inbound frame could not be decoded.
    #[error(transparent)]
    Parse(#[from] PacketParseError),

    /// A transport name that is neither `polling` nor `websocket`.
    #[error("unknown transport: {0}")]
    UnknownTransport(String),

    /// The server did not answer within `pingInterval + pingTimeout`.
    #[error("ping timeout")]
    PingTimeout,
}
