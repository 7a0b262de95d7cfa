use switchio_engine::EngineError;

/// Error type for the Socket.IO packet codec.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// The leading packet type digit is unknown or missing.
    #[error("invalid packet type: {0:?}")]
    InvalidPacketType(Option<char>),

    /// A binary packet announced no or a malformed attachment count.
    #[error("invalid attachment count")]
    InvalidAttachments,

    /// The ack id is not a valid integer.
    #[error("invalid ack id")]
    InvalidAckId,

    /// The JSON payload could not be parsed.
    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    /// The payload shape does not match the packet type, e.g. an event
    /// whose payload is not an array.
    #[error("unexpected payload shape")]
    UnexpectedPayload,
}

/// Error type for the client surface.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The connection URI could not be parsed.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// The engine rejected its configuration.
    #[error(transparent)]
    Engine(#[from] EngineError),
}
