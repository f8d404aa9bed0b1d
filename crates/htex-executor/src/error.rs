use htex_protocol::RemoteErrorKind;
use htex_provider::ProviderError;
use htex_transport::TransportError;

/// Failures that can occur starting or driving the executor itself, as
/// opposed to failures of an individual task (see [`TaskError`]).
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("failed to spawn interchange process: {0}")]
    InterchangeSpawn(#[source] std::io::Error),

    #[error("interchange did not report its startup handshake within the timeout")]
    InterchangeStartupTimeout,

    #[error("interchange closed its stdout before completing the startup handshake")]
    InterchangeStdoutClosed,

    #[error("malformed interchange startup handshake: {0}")]
    HandshakeDecode(String),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("provider refused a block submission: {0}")]
    ScalingFailed(#[from] ProviderError),

    #[error("executor is in a bad state: {0}")]
    BadState(RemoteErrorKind),

    #[error("executor management task has already shut down")]
    Shutdown,

    #[error("invalid executor configuration: {0}")]
    ConfigurationError(String),
}

/// Failures surfaced through an individual task's result, mirroring the
/// exception path a submitted task can fail through (§7).
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("remote execution failed: {0}")]
    Remote(#[from] RemoteErrorKind),

    #[error("executor shut down before this task completed")]
    ExecutorShutdown,
}
