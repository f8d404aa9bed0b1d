use std::collections::HashSet;
use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 128-bit identifier assigned to a task at submit time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Stable identity a worker pool advertises at registration and carries on
/// every subsequent message. The transport layer uses this as the
/// connection-table key for a `RouterSocket` (see `htex-transport`).
pub type WorkerId = String;

/// Opaque provider-assigned handle for one block (one batch-scheduler job).
pub type BlockId = String;

/// `Task.payload` is `Codec.pack_apply(func, args, kwargs)`; the core never
/// looks inside it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub payload: Bytes,
}

/// The three messages a worker may send back about one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TaskResult {
    /// `payload` is `Codec.serialize(return_value)`.
    Ok { id: TaskId, payload: Bytes },
    /// `payload` is `Codec.serialize(exception_object)`.
    Err { id: TaskId, payload: Bytes },
    /// Purely informational; the interchange does not add the task to a
    /// worker's `in_flight` set on receipt of this message (it already did
    /// so at dispatch time — see `htex-interchange::registry`).
    Info { id: TaskId, started_at: DateTime<Utc> },
}

impl TaskResult {
    pub fn id(&self) -> TaskId {
        match self {
            TaskResult::Ok { id, .. } | TaskResult::Err { id, .. } | TaskResult::Info { id, .. } => *id,
        }
    }
}

/// Emitted periodically (default every `HEARTBEAT_PERIOD`) by every worker
/// pool on the `workers` socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub worker_id: WorkerId,
    pub active_task_ids: HashSet<TaskId>,
    pub wall_time: DateTime<Utc>,
}

/// Messages the interchange sends on the `workers` socket (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkerInbound {
    /// Run this task.
    Task(Task),
    /// Sentinel meaning "exit" — pushed when the executor shuts down a
    /// `managed` worker block.
    Shutdown,
}

/// Messages a worker pool sends on the `workers` socket (§6). `Register` is
/// the connection's very first application-level message after the
/// transport-level identity frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkerOutbound {
    Register { worker_id: WorkerId, capacity: usize },
    Heartbeat(Heartbeat),
    Result(TaskResult),
}

/// Status of one provisioned block, as reported by the `ExecutionProvider`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockStatus {
    Pending,
    Running,
    Cancelled,
    Completed,
    Failed,
    Unknown,
}

impl BlockStatus {
    /// A block in one of these states will never run another task.
    pub fn is_terminal_failure(self) -> bool {
        matches!(self, BlockStatus::Failed | BlockStatus::Cancelled)
    }

    pub fn is_running(self) -> bool {
        matches!(self, BlockStatus::Running)
    }
}

impl fmt::Display for BlockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BlockStatus::Pending => "PENDING",
            BlockStatus::Running => "RUNNING",
            BlockStatus::Cancelled => "CANCELLED",
            BlockStatus::Completed => "COMPLETED",
            BlockStatus::Failed => "FAILED",
            BlockStatus::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Taxonomy of task-level and structural failures (§7). Carried as the
/// deserialized value of a `TaskResult::Err` payload, or wrapped by
/// `ExecutorError::Bad` when it terminates the whole executor.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum RemoteErrorKind {
    #[error("worker {worker_id} was declared lost (missed heartbeat)")]
    WorkerLost { worker_id: WorkerId },

    #[error("no function registered under the name {name:?}")]
    UnknownFunction { name: String },

    #[error("task panicked: {message}")]
    Panicked { message: String },

    #[error("task function returned an error: {message}")]
    UserError { message: String },

    #[error("failed to deserialize a result or exception payload: {message}")]
    DeserializationError { message: String },

    #[error("every block has terminated while tasks remain uncompleted")]
    NoRunnableBlocks,

    #[error("payload of {size} bytes exceeds the configured limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("protocol violation observed on the results channel: {message}")]
    BadMessage { message: String },
}

impl From<crate::error::CodecError> for RemoteErrorKind {
    fn from(err: crate::error::CodecError) -> Self {
        match err {
            crate::error::CodecError::PayloadTooLarge { size, limit } => {
                RemoteErrorKind::PayloadTooLarge { size, limit }
            }
            other => RemoteErrorKind::DeserializationError { message: other.to_string() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_ids_are_unique() {
        assert_ne!(TaskId::new(), TaskId::new());
    }

    #[test]
    fn block_status_terminal_failure_excludes_completed() {
        assert!(!BlockStatus::Completed.is_terminal_failure());
        assert!(BlockStatus::Failed.is_terminal_failure());
        assert!(BlockStatus::Cancelled.is_terminal_failure());
    }
}
