use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde_json::json;

use htex_executor::{Executor, ExecutorConfig, StrategyConfig, TaskStatusPoller, DEFAULT_LAUNCH_CMD};
use htex_provider::{LocalProvider, LocalProviderConfig};

/// Reference submitter binary (component C6's façade plus C7's poller)
/// tying the executor, a `LocalProvider`, and the reference `htex-worker`
/// binary together into one runnable pipeline. A real application links
/// `htex-executor` directly instead of shelling out to this binary.
#[derive(Parser, Debug)]
#[command(name = "htex-cli", version, about = "High-throughput task execution core — reference submitter")]
struct Cli {
    #[arg(long, env = "HTEX_LABEL", default_value = "htex")]
    label: String,

    #[arg(long, env = "HTEX_HOST", default_value = "127.0.0.1")]
    host: String,

    /// IP advertised to workers if different from `--host` (e.g. reaching
    /// across a NAT).
    #[arg(long, env = "HTEX_PUBLIC_IP")]
    public_ip: Option<String>,

    #[arg(long, env = "HTEX_INTERCHANGE_BIN", default_value = "htex-interchange")]
    interchange_bin: PathBuf,

    #[arg(long = "worker-port-range", env = "HTEX_WORKER_PORT_RANGE", default_value = "54201-54400", value_parser = parse_port_range)]
    worker_port_range: (u16, u16),

    #[arg(long = "interchange-port-range", env = "HTEX_INTERCHANGE_PORT_RANGE", default_value = "54000-54200", value_parser = parse_port_range)]
    interchange_port_range: (u16, u16),

    /// Oversubscription permitted per worker block (e.g. 0.5 packs two
    /// blocks per core); rounded up to at least one execution slot.
    #[arg(long, env = "HTEX_CORES_PER_WORKER", default_value_t = 1.0)]
    cores_per_worker: f64,

    #[arg(long, env = "HTEX_WORKER_DEBUG", default_value_t = false)]
    worker_debug: bool,

    #[arg(long, env = "HTEX_WORKING_DIR")]
    working_dir: Option<PathBuf>,

    /// Whether this executor owns the worker blocks it launches (cancels
    /// them on shutdown) versus attaching to independently-run workers.
    #[arg(long, env = "HTEX_MANAGED", default_value_t = true)]
    managed: bool,

    #[arg(long, env = "HTEX_INIT_BLOCKS", default_value_t = 1)]
    init_blocks: usize,

    #[arg(long, env = "HTEX_MIN_BLOCKS", default_value_t = 0)]
    min_blocks: usize,

    #[arg(long, env = "HTEX_MAX_BLOCKS", default_value_t = 4)]
    max_blocks: usize,

    /// Fraction in `[0, 1]` of `active_tasks` counted toward the desired
    /// block count (§4.6's elasticity formula).
    #[arg(long, env = "HTEX_PARALLELISM", default_value_t = 1.0)]
    parallelism: f64,

    /// Execution slots provided by one block, used by the elasticity
    /// strategy's `desired = ceil(active_tasks * parallelism / tasks_per_block)`.
    #[arg(long, env = "HTEX_TASKS_PER_BLOCK", default_value_t = 1)]
    tasks_per_block: usize,

    #[arg(long, env = "HTEX_STATUS_POLLING_INTERVAL_SECS", default_value_t = 5)]
    status_polling_interval_secs: u64,

    #[arg(long, env = "HTEX_IDLE_THRESHOLD_SECS", default_value_t = 30)]
    idle_threshold_secs: u64,

    /// Number of demo `double(x)` tasks to submit as a smoke test before
    /// shutting down. `0` starts the pipeline and waits for Ctrl-C instead.
    #[arg(long, env = "HTEX_DEMO_TASKS", default_value_t = 4)]
    demo_tasks: u32,
}

fn parse_port_range(s: &str) -> Result<(u16, u16), String> {
    let (lo, hi) = s
        .split_once('-')
        .ok_or_else(|| format!("expected LO-HI, got {s:?}"))?;
    let lo: u16 = lo.trim().parse().map_err(|_| format!("invalid low port in {s:?}"))?;
    let hi: u16 = hi.trim().parse().map_err(|_| format!("invalid high port in {s:?}"))?;
    if lo > hi {
        return Err(format!("low port {lo} exceeds high port {hi}"));
    }
    Ok((lo, hi))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.worker_debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .init();

    let provider = Arc::new(LocalProvider::new(LocalProviderConfig {
        label: cli.label.clone(),
        init_blocks: cli.init_blocks,
        min_blocks: cli.min_blocks,
        max_blocks: cli.max_blocks,
        nodes_per_block: 1,
        tasks_per_node: cli.tasks_per_block,
        parallelism: cli.parallelism,
    }));

    let executor_cfg = ExecutorConfig {
        label: cli.label.clone(),
        interchange_bin: cli.interchange_bin,
        bind_host: cli.host,
        public_ip: cli.public_ip,
        interchange_port_range: cli.interchange_port_range,
        worker_port_range: cli.worker_port_range,
        cores_per_worker: cli.cores_per_worker,
        worker_debug: cli.worker_debug,
        working_dir: cli.working_dir,
        managed: cli.managed,
        launch_cmd: DEFAULT_LAUNCH_CMD.to_string(),
        init_blocks: cli.init_blocks,
        ..ExecutorConfig::default()
    };

    tracing::info!(label = %executor_cfg.label, "starting executor");
    let executor = Executor::start(executor_cfg, provider).await?;
    let (worker_host, worker_port) = executor.worker_address();
    tracing::info!(host = %worker_host, port = worker_port, "interchange ready for workers");

    let poller = Arc::new(TaskStatusPoller::new());
    poller.register(
        executor.clone(),
        StrategyConfig {
            status_polling_interval: Duration::from_secs(cli.status_polling_interval_secs),
            idle_threshold: Duration::from_secs(cli.idle_threshold_secs),
        },
    );
    let poller_handle = poller.spawn(Duration::from_millis(500));

    let result = if cli.demo_tasks > 0 {
        run_demo_workload(&executor, cli.demo_tasks).await
    } else {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("received ctrl-c, shutting down");
        Ok(())
    };

    poller_handle.abort();
    executor.shutdown().await?;

    result
}

/// Submits `n` `double(x)` calls, awaits every result, and logs a summary.
/// Exercises the full executor↔interchange↔worker pipeline end to end
/// (§8 scenario S1).
async fn run_demo_workload(executor: &Executor, n: u32) -> anyhow::Result<()> {
    let mut handles = Vec::with_capacity(n as usize);
    for i in 0..n {
        let args = json!([i]);
        let kwargs = json!({});
        let handle = executor.submit("double", args, kwargs).await?;
        handles.push((i, handle));
    }

    let mut failures = 0;
    for (i, handle) in handles {
        match handle.await {
            Ok(value) => tracing::info!(input = i, output = %value, "task completed"),
            Err(task_error) => {
                failures += 1;
                tracing::warn!(input = i, error = %task_error, "task failed");
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} of {n} demo tasks failed");
    }
    tracing::info!(count = n, "all demo tasks completed successfully");
    Ok(())
}
