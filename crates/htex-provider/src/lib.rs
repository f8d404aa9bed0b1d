//! Batch-scheduler driver contract (component C3) and one reference
//! implementation (`LocalProvider`) good enough to run the test scenarios in
//! §8 on a single machine, without pretending to be a real Slurm/Condor/EC2
//! driver.

mod error;
mod local;

pub use error::ProviderError;
pub use local::LocalProvider;

use async_trait::async_trait;
use htex_protocol::{BlockId, BlockStatus};

/// External capability consumed by the executor and the status poller. The
/// core never looks inside a `BlockId`; it is whatever the provider hands
/// back from `submit`.
#[async_trait]
pub trait ExecutionProvider: Send + Sync {
    fn label(&self) -> &str;
    fn init_blocks(&self) -> usize;
    fn min_blocks(&self) -> usize;
    fn max_blocks(&self) -> usize;
    fn nodes_per_block(&self) -> usize;
    fn tasks_per_node(&self) -> usize;
    fn parallelism(&self) -> f64;
    fn scaling_enabled(&self) -> bool;

    /// Launches one block running `launch_cmd` across `nodes` nodes.
    /// Returns `None` if the provider declines to submit at all (distinct
    /// from an error: the spec treats both as "no block was created", but
    /// an error is also surfaced to the caller for logging).
    async fn submit(&self, launch_cmd: &str, nodes: usize) -> Result<Option<BlockId>, ProviderError>;

    /// Requests cancellation of each listed block; returns one bool per
    /// input block indicating whether cancellation was accepted.
    async fn cancel(&self, blocks: &[BlockId]) -> Result<Vec<bool>, ProviderError>;

    /// Reports current status for each listed block, in the same order.
    async fn status(&self, blocks: &[BlockId]) -> Result<Vec<BlockStatus>, ProviderError>;
}
