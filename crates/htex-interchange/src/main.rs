use std::time::Duration;

use clap::Parser;
use htex_interchange::{run, InterchangeConfig};
use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;

/// Interchange broker binary. Spawned as a child process by the executor
/// (component C5); reports its bound ports as one line of JSON on stdout
/// once all three sockets are listening, then runs until the submitter is
/// lost.
#[derive(Parser, Debug)]
#[command(name = "htex-interchange")]
struct Cli {
    #[arg(long, env = "HTEX_HOST", default_value = "127.0.0.1")]
    host: String,

    #[arg(long, env = "HTEX_TASKS_PORT_LO", default_value_t = 54000)]
    tasks_port_lo: u16,
    #[arg(long, env = "HTEX_TASKS_PORT_HI", default_value_t = 54100)]
    tasks_port_hi: u16,

    #[arg(long, env = "HTEX_RESULTS_PORT_LO", default_value_t = 54101)]
    results_port_lo: u16,
    #[arg(long, env = "HTEX_RESULTS_PORT_HI", default_value_t = 54200)]
    results_port_hi: u16,

    #[arg(long, env = "HTEX_WORKER_PORT_LO", default_value_t = 54201)]
    worker_port_lo: u16,
    #[arg(long, env = "HTEX_WORKER_PORT_HI", default_value_t = 54400)]
    worker_port_hi: u16,

    #[arg(long, env = "HTEX_HEARTBEAT_PERIOD_SECS", default_value_t = 30)]
    heartbeat_period_secs: u64,
    #[arg(long, env = "HTEX_MAX_BEATS_MISSABLE", default_value_t = 3)]
    max_beats_missable: u32,
    #[arg(long, env = "HTEX_SUBMITTER_GRACE_SECS", default_value_t = 5)]
    submitter_grace_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = InterchangeConfig {
        host: cli.host,
        tasks_port_range: (cli.tasks_port_lo, cli.tasks_port_hi),
        results_port_range: (cli.results_port_lo, cli.results_port_hi),
        worker_port_range: (cli.worker_port_lo, cli.worker_port_hi),
        heartbeat_period: Duration::from_secs(cli.heartbeat_period_secs),
        max_beats_missable: cli.max_beats_missable,
        poll_interval: Duration::from_millis(100),
        submitter_grace_period: Duration::from_secs(cli.submitter_grace_secs),
    };

    let (handshake_tx, handshake_rx) = oneshot::channel();
    let run_handle = tokio::spawn(run(cfg, handshake_tx));

    let handshake = handshake_rx
        .await
        .map_err(|_| anyhow::anyhow!("interchange main loop exited before completing startup"))?;

    let mut line = serde_json::to_string(&handshake)?;
    line.push('\n');
    tokio::io::stdout().write_all(line.as_bytes()).await?;
    tokio::io::stdout().flush().await?;

    run_handle.await??;
    Ok(())
}
