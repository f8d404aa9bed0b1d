/// Errors raised by the message-oriented transport (component C2).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("framing error: {0}")]
    Framing(String),

    #[error("receive timed out")]
    Timeout,

    #[error("connection closed")]
    Closed,

    #[error("unknown peer identity {0:?}")]
    UnknownPeer(String),

    #[error("failed to encode message: {0}")]
    Encode(String),

    #[error("failed to decode message: {0}")]
    Decode(String),

    #[error("no free port available in the configured range {0}..={1}")]
    PortRangeExhausted(u16, u16),
}
