use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use htex_protocol::{BlockId, BlockStatus};

use crate::error::ProviderError;
use crate::ExecutionProvider;

/// Grace period between SIGTERM and SIGKILL when cancelling a block,
/// mirroring the teacher's two-stage shutdown discipline
/// (`ShutdownController`'s graceful-then-immediate escalation in
/// `crates/client/src/shutdown.rs`).
const CANCEL_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Reference `ExecutionProvider` that runs each block as a plain OS process
/// on the local machine via `tokio::process::Command`, instead of talking to
/// a real batch scheduler. Enough to exercise the full
/// executor/interchange/worker pipeline end to end in tests.
pub struct LocalProvider {
    label: String,
    init_blocks: usize,
    min_blocks: usize,
    max_blocks: usize,
    nodes_per_block: usize,
    tasks_per_node: usize,
    parallelism: f64,
    children: Arc<Mutex<HashMap<BlockId, Child>>>,
}

pub struct LocalProviderConfig {
    pub label: String,
    pub init_blocks: usize,
    pub min_blocks: usize,
    pub max_blocks: usize,
    pub nodes_per_block: usize,
    pub tasks_per_node: usize,
    pub parallelism: f64,
}

impl LocalProvider {
    pub fn new(cfg: LocalProviderConfig) -> Self {
        Self {
            label: cfg.label,
            init_blocks: cfg.init_blocks,
            min_blocks: cfg.min_blocks,
            max_blocks: cfg.max_blocks,
            nodes_per_block: cfg.nodes_per_block,
            tasks_per_node: cfg.tasks_per_node,
            parallelism: cfg.parallelism,
            children: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl ExecutionProvider for LocalProvider {
    fn label(&self) -> &str {
        &self.label
    }
    fn init_blocks(&self) -> usize {
        self.init_blocks
    }
    fn min_blocks(&self) -> usize {
        self.min_blocks
    }
    fn max_blocks(&self) -> usize {
        self.max_blocks
    }
    fn nodes_per_block(&self) -> usize {
        self.nodes_per_block
    }
    fn tasks_per_node(&self) -> usize {
        self.tasks_per_node
    }
    fn parallelism(&self) -> f64 {
        self.parallelism
    }
    fn scaling_enabled(&self) -> bool {
        true
    }

    async fn submit(&self, launch_cmd: &str, nodes: usize) -> Result<Option<BlockId>, ProviderError> {
        let child = Command::new("sh")
            .arg("-c")
            .arg(launch_cmd)
            .env("HTEX_NODES", nodes.to_string())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProviderError::Launch(e.to_string()))?;

        let pid = child
            .id()
            .ok_or_else(|| ProviderError::Launch("child exited before its pid could be read".into()))?;
        let block_id = pid.to_string();

        self.children.lock().await.insert(block_id.clone(), child);
        Ok(Some(block_id))
    }

    async fn cancel(&self, blocks: &[BlockId]) -> Result<Vec<bool>, ProviderError> {
        let mut accepted = Vec::with_capacity(blocks.len());
        let children = self.children.lock().await;
        for block_id in blocks {
            let ok = match children.get(block_id).and_then(|c| c.id()) {
                Some(pid) => {
                    send_signal(pid, libc::SIGTERM);
                    let block_id = block_id.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(CANCEL_GRACE_PERIOD).await;
                        if let Ok(pid) = block_id.parse::<u32>() {
                            send_signal(pid, libc::SIGKILL);
                        }
                    });
                    true
                }
                None => false,
            };
            accepted.push(ok);
        }
        Ok(accepted)
    }

    async fn status(&self, blocks: &[BlockId]) -> Result<Vec<BlockStatus>, ProviderError> {
        let mut children = self.children.lock().await;
        let mut out = Vec::with_capacity(blocks.len());
        for block_id in blocks {
            let status = match children.get_mut(block_id) {
                Some(child) => match child.try_wait() {
                    Ok(Some(exit)) => {
                        if exit.success() {
                            BlockStatus::Completed
                        } else {
                            BlockStatus::Failed
                        }
                    }
                    Ok(None) => BlockStatus::Running,
                    Err(e) => {
                        tracing::warn!(block = %block_id, error = %e, "failed to poll block status");
                        BlockStatus::Unknown
                    }
                },
                None => BlockStatus::Unknown,
            };
            out.push(status);
        }
        Ok(out)
    }
}

fn send_signal(pid: u32, signal: i32) {
    // SAFETY: kill(2) with a pid we observed from our own child handle; a
    // stale pid after reuse would at worst signal an unrelated process,
    // same risk any process supervisor accepts.
    unsafe {
        libc::kill(pid as libc::pid_t, signal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn submit_and_status_track_a_short_lived_process() {
        let provider = LocalProvider::new(LocalProviderConfig {
            label: "local".into(),
            init_blocks: 1,
            min_blocks: 0,
            max_blocks: 4,
            nodes_per_block: 1,
            tasks_per_node: 1,
            parallelism: 1.0,
        });

        let block_id = provider.submit("exit 0", 1).await.unwrap().unwrap();
        // Give the shell a moment to exit.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let statuses = provider.status(&[block_id]).await.unwrap();
        assert_eq!(statuses, vec![BlockStatus::Completed]);
    }

    #[tokio::test]
    async fn cancel_unknown_block_reports_not_accepted() {
        let provider = LocalProvider::new(LocalProviderConfig {
            label: "local".into(),
            init_blocks: 0,
            min_blocks: 0,
            max_blocks: 1,
            nodes_per_block: 1,
            tasks_per_node: 1,
            parallelism: 1.0,
        });
        let accepted = provider.cancel(&["not-a-real-block".to_string()]).await.unwrap();
        assert_eq!(accepted, vec![false]);
    }
}
