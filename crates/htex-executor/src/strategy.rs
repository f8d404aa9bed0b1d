//! Status poller + elasticity strategy (component C7, §4.6): ticks every
//! registered executor on a fixed cadence, fails tasks whose executor has
//! run out of runnable blocks, and grows/shrinks the block count to track
//! `active_tasks`.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use htex_protocol::{BlockId, BlockStatus, RemoteErrorKind};

use crate::executor::Executor;

#[derive(Debug, Clone, Copy)]
pub struct StrategyConfig {
    /// How often this item's executor is polled for block status. An item
    /// with `interval == Duration::ZERO` is registered but never ticks —
    /// matching "one per registered executor with status_polling_interval
    /// > 0".
    pub status_polling_interval: Duration,
    /// How long `active_tasks` must stay at zero before blocks are scaled
    /// in, to avoid thrashing on a bursty submission pattern.
    pub idle_threshold: Duration,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            status_polling_interval: Duration::from_secs(5),
            idle_threshold: Duration::from_secs(30),
        }
    }
}

/// One registered executor's polling state.
pub struct PollItem {
    executor: Executor,
    cfg: StrategyConfig,
    last_poll: Option<Instant>,
    last_status: Vec<(BlockId, BlockStatus)>,
    idle_since: Option<Instant>,
}

impl PollItem {
    fn new(executor: Executor, cfg: StrategyConfig) -> Self {
        Self {
            executor,
            cfg,
            last_poll: None,
            last_status: Vec::new(),
            idle_since: None,
        }
    }

    fn due(&self, now: Instant) -> bool {
        if self.cfg.status_polling_interval.is_zero() {
            return false;
        }
        match self.last_poll {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.cfg.status_polling_interval,
        }
    }
}

/// Drives [`Executor::status`], the job-error handler, and the elasticity
/// strategy across every registered executor. An application either
/// `spawn`s this on its own `tokio::task` or calls `poll_once` manually
/// from its own event loop (§4.6's expansion note).
pub struct TaskStatusPoller {
    items: Mutex<Vec<PollItem>>,
}

impl Default for TaskStatusPoller {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskStatusPoller {
    pub fn new() -> Self {
        Self { items: Mutex::new(Vec::new()) }
    }

    pub fn register(&self, executor: Executor, cfg: StrategyConfig) {
        self.items.lock().unwrap().push(PollItem::new(executor, cfg));
    }

    pub fn registered_count(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    /// Runs exactly one tick: polls every due item's block status, runs the
    /// job-error handler, then runs the scale-out/scale-in strategy.
    pub async fn poll_once(&self) {
        let now = Instant::now();

        // Snapshot the indices due this tick: the item list itself is only
        // ever touched synchronously, but `status()`/`scale_out()`/
        // `scale_in()` are async, so each item is processed one at a time
        // without holding the list's lock across an await.
        let due: Vec<usize> = {
            let items = self.items.lock().unwrap();
            items
                .iter()
                .enumerate()
                .filter(|(_, item)| item.due(now))
                .map(|(i, _)| i)
                .collect()
        };

        for idx in due {
            let executor = {
                let items = self.items.lock().unwrap();
                items[idx].executor.clone()
            };

            let status = executor.status().await;

            let mut items = self.items.lock().unwrap();
            let Some(item) = items.get_mut(idx) else { continue };
            item.last_poll = Some(now);
            if let Ok(status) = status {
                item.last_status = status;
            } else {
                // A provider-side error polling status is logged by the
                // caller of `status()`; leave `last_status` as the prior
                // snapshot rather than wiping it out.
                continue;
            }

            job_error_handler(item);
            run_strategy(item, now).await;
        }
    }

    /// Spawns a `tokio::task` calling [`Self::poll_once`] on `tick`'s
    /// cadence until the returned handle is aborted or dropped.
    pub fn spawn(self: std::sync::Arc<Self>, tick: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                self.poll_once().await;
            }
        })
    }
}

fn job_error_handler(item: &mut PollItem) {
    let active_tasks = item.executor.active_tasks();
    if active_tasks == 0 {
        return;
    }
    let all_terminal_failure = !item.last_status.is_empty()
        && item
            .last_status
            .iter()
            .all(|(_, status)| status.is_terminal_failure());
    if all_terminal_failure {
        item.executor.set_bad_state_and_fail_all(RemoteErrorKind::NoRunnableBlocks);
    }
}

async fn run_strategy(item: &mut PollItem, now: Instant) {
    let provider = item.executor.provider().clone();
    if !provider.scaling_enabled() {
        return;
    }

    let active_tasks = item.executor.active_tasks();
    let current = item.executor.block_count().await;
    let tasks_per_block = (provider.nodes_per_block() * provider.tasks_per_node()).max(1);

    let numerator = active_tasks as f64 * provider.parallelism();
    let desired = (numerator / tasks_per_block as f64)
        .ceil()
        .max(0.0) as usize;
    let desired = desired.clamp(provider.min_blocks(), provider.max_blocks().max(provider.min_blocks()));

    if desired > current {
        let executor = item.executor.clone();
        let delta = desired - current;
        tokio::spawn(async move {
            if let Err(e) = executor.scale_out(delta).await {
                tracing::warn!(error = %e, "scale_out failed");
            }
        });
        item.idle_since = None;
        return;
    }

    if active_tasks == 0 {
        let idle_since = *item.idle_since.get_or_insert(now);
        if desired < current && now.saturating_duration_since(idle_since) >= item.cfg.idle_threshold {
            let executor = item.executor.clone();
            let delta = current - desired;
            tokio::spawn(async move {
                if let Err(e) = executor.scale_in(delta).await {
                    tracing::warn!(error = %e, "scale_in failed");
                }
            });
        }
    } else {
        item.idle_since = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_item_is_due_immediately_then_on_cadence() {
        let cfg = StrategyConfig {
            status_polling_interval: Duration::from_secs(10),
            idle_threshold: Duration::from_secs(30),
        };
        // A freshly constructed item (last_poll = None) is always due.
        let item_due = |last_poll: Option<Instant>, interval: Duration, now: Instant| match last_poll {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= interval,
        };
        let now = Instant::now();
        assert!(item_due(None, cfg.status_polling_interval, now));
    }

    #[test]
    fn zero_interval_item_is_never_due() {
        let cfg = StrategyConfig {
            status_polling_interval: Duration::ZERO,
            idle_threshold: Duration::from_secs(30),
        };
        assert!(cfg.status_polling_interval.is_zero());
    }
}
