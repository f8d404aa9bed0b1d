use std::time::Duration;

use clap::Parser;
use htex_protocol::Codec;
use htex_worker::{default_candidates, demo_table, probe_addresses, run_worker, WorkerConfig, DEFAULT_PROBE_TIMEOUT};

/// Reference worker pool binary. A real deployment links its own
/// `FunctionTable` in place of `demo_table()`; everything else here is the
/// generic control loop.
#[derive(Parser, Debug)]
#[command(name = "htex-worker")]
struct Cli {
    /// Host the interchange advertised in `launch_cmd`'s `{task_url}` token.
    /// Tried first; if unreachable, every local interface address and the
    /// local hostname are raced against it (component C8).
    #[arg(long, env = "HTEX_INTERCHANGE_HOST")]
    interchange_host: String,

    #[arg(long, env = "HTEX_INTERCHANGE_PORT")]
    interchange_port: u16,

    /// Skip the address probe and connect to `--interchange-host` directly.
    /// Set when the launch command already names the one reachable address
    /// (e.g. the `LocalProvider` reference driver).
    #[arg(long, env = "HTEX_SKIP_PROBE", default_value_t = false)]
    skip_probe: bool,

    #[arg(long, env = "HTEX_WORKER_ID")]
    worker_id: Option<String>,

    /// Oversubscription permitted (e.g. 0.5 packs two workers per core);
    /// rounded up to at least one execution slot.
    #[arg(long, env = "HTEX_CORES_PER_WORKER", default_value_t = 1.0)]
    cores_per_worker: f64,

    #[arg(long, env = "HTEX_WORKER_DEBUG", default_value_t = false)]
    worker_debug: bool,

    #[arg(long, env = "HTEX_HEARTBEAT_PERIOD_SECS", default_value_t = 30)]
    heartbeat_period_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.worker_debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .init();

    let worker_id = cli
        .worker_id
        .unwrap_or_else(|| format!("worker-{}", uuid::Uuid::new_v4()));
    let capacity = cli.cores_per_worker.ceil().max(1.0) as usize;

    let interchange_host = if cli.skip_probe {
        cli.interchange_host.clone()
    } else {
        let candidates = default_candidates(std::slice::from_ref(&cli.interchange_host));
        match probe_addresses(&candidates, cli.interchange_port, DEFAULT_PROBE_TIMEOUT).await {
            Some(reachable) => reachable,
            None => {
                tracing::warn!(
                    host = %cli.interchange_host,
                    "address probe found no reachable candidate, falling back to --interchange-host"
                );
                cli.interchange_host.clone()
            }
        }
    };

    let cfg = WorkerConfig {
        interchange_host,
        interchange_port: cli.interchange_port,
        worker_id,
        capacity,
        heartbeat_period: Duration::from_secs(cli.heartbeat_period_secs),
        recv_timeout: Duration::from_secs(1),
    };

    run_worker(cfg, demo_table(), Codec::default()).await
}
