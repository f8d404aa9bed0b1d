/// Errors raised by the codec and framing layer (component C1).
///
/// These are the wire-facing counterparts of the task-level failures in
/// `RemoteErrorKind`: a `CodecError` means the bytes themselves could not be
/// produced or interpreted, as opposed to a user function raising or a
/// worker going away.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("no registered serialization method could encode the value")]
    SerializationFailed,

    #[error("failed to deserialize payload: {0}")]
    DeserializationError(String),

    #[error("payload of {size} bytes exceeds the configured limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("framing error: {0}")]
    FramingError(String),
}
