/// Errors a provider driver may raise. The core wraps these as
/// `ScalingFailed` when they surface through the executor.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("failed to launch block: {0}")]
    Launch(String),

    #[error("failed to cancel block {0:?}")]
    Cancel(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
