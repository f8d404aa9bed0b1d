//! Wire types, buffer framing, and the serialization registry shared by the
//! interchange, executor, and worker pool (component C1 plus the §3 data
//! model).

mod codec;
mod error;
mod framing;
mod types;

pub use codec::{Codec, DEFAULT_BUFFER_THRESHOLD};
pub use error::CodecError;
pub use framing::{pack_buffers, unpack_buffers};
pub use types::{
    BlockId, BlockStatus, Heartbeat, RemoteErrorKind, Task, TaskId, TaskResult, WorkerId,
    WorkerInbound, WorkerOutbound,
};

/// Default worker heartbeat cadence.
pub const HEARTBEAT_PERIOD: std::time::Duration = std::time::Duration::from_secs(30);

/// A worker is declared lost after this many consecutive missed heartbeats.
pub const MAX_BEATS_MISSABLE: u32 = 3;

/// `HEARTBEAT_PERIOD * MAX_BEATS_MISSABLE`.
pub fn liveness_timeout() -> std::time::Duration {
    HEARTBEAT_PERIOD * MAX_BEATS_MISSABLE
}

/// Frames below this size are not worth batching specially; kept as a named
/// constant because `ITEM_THRESHOLD` is a recognized configuration option
/// (§6) even though this core implementation does not itself batch small
/// items differently from large ones.
pub const ITEM_THRESHOLD: usize = 1024;
