//! Worker pool process (component C4): connects to the interchange,
//! registers, pulls tasks, runs them against a linked `FunctionTable`,
//! reports results, and heartbeats on a fixed cadence.

mod address_probe;
mod functions;

pub use address_probe::{default_candidates, probe_addresses, DEFAULT_PROBE_TIMEOUT};
pub use functions::{demo_table, FunctionTable, RemoteFn};

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use htex_protocol::{Codec, RemoteErrorKind, Task, TaskId, TaskResult, WorkerId, WorkerInbound, WorkerOutbound};
use htex_transport::{DealerSocket, TransportError};

pub struct WorkerConfig {
    pub interchange_host: String,
    pub interchange_port: u16,
    pub worker_id: WorkerId,
    pub capacity: usize,
    pub heartbeat_period: Duration,
    pub recv_timeout: Duration,
}

async fn execute_task(table: Arc<FunctionTable>, codec: Arc<Codec>, task: Task) -> TaskResult {
    let id = task.id;

    let unpacked = codec.unpack_apply(&task.payload);
    let (func, args, kwargs) = match unpacked {
        Ok(v) => v,
        Err(e) => return err_result(&codec, id, e.into()),
    };

    let outcome = tokio::task::spawn_blocking(move || table.call(&func, &args, &kwargs)).await;
    let outcome = match outcome {
        Ok(result) => result,
        Err(join_err) => Err(RemoteErrorKind::Panicked {
            message: format!("execution task did not complete cleanly: {join_err}"),
        }),
    };

    match outcome {
        Ok(value) => match codec.serialize(&value) {
            Ok(payload) => TaskResult::Ok { id, payload },
            Err(e) => err_result(&codec, id, e.into()),
        },
        Err(kind) => err_result(&codec, id, kind),
    }
}

fn err_result(codec: &Codec, id: TaskId, kind: RemoteErrorKind) -> TaskResult {
    let value = serde_json::to_value(&kind).unwrap_or(serde_json::Value::Null);
    match codec.serialize(&value) {
        Ok(payload) => TaskResult::Err { id, payload },
        Err(_) => {
            // The error value itself failed to serialize (should not happen
            // for plain data); fall back to a minimal string payload so the
            // submitter still receives a terminal result for this task.
            let fallback = serde_json::Value::String(kind.to_string());
            let payload = codec
                .serialize(&fallback)
                .expect("a plain string always serializes");
            TaskResult::Err { id, payload }
        }
    }
}

/// Runs the worker's control loop until a `Shutdown` sentinel is received or
/// the connection to the interchange is lost.
pub async fn run_worker(cfg: WorkerConfig, table: FunctionTable, codec: Codec) -> anyhow::Result<()> {
    let table = Arc::new(table);
    let codec = Arc::new(codec);

    let mut dealer = DealerSocket::connect(
        (cfg.interchange_host.as_str(), cfg.interchange_port),
        cfg.worker_id.clone(),
    )
    .await?;

    dealer
        .send(&WorkerOutbound::Register {
            worker_id: cfg.worker_id.clone(),
            capacity: cfg.capacity,
        })
        .await?;

    let in_flight: Arc<Mutex<HashSet<TaskId>>> = Arc::new(Mutex::new(HashSet::new()));
    let mut running: JoinSet<TaskResult> = JoinSet::new();

    let mut heartbeat = tokio::time::interval(cfg.heartbeat_period);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                let active_task_ids = in_flight.lock().await.clone();
                let hb = htex_protocol::Heartbeat {
                    worker_id: cfg.worker_id.clone(),
                    active_task_ids,
                    wall_time: Utc::now(),
                };
                if let Err(e) = dealer.send(&WorkerOutbound::Heartbeat(hb)).await {
                    tracing::warn!(error = %e, "failed to send heartbeat");
                }
            }
            recv = dealer.recv::<WorkerInbound>(cfg.recv_timeout) => {
                match recv {
                    Ok(WorkerInbound::Shutdown) => {
                        tracing::info!(worker_id = %cfg.worker_id, "received shutdown sentinel");
                        break;
                    }
                    Ok(WorkerInbound::Task(task)) => {
                        in_flight.lock().await.insert(task.id);
                        let table = table.clone();
                        let codec = codec.clone();
                        let in_flight = in_flight.clone();
                        let task_id = task.id;
                        running.spawn(async move {
                            let result = execute_task(table, codec, task).await;
                            in_flight.lock().await.remove(&task_id);
                            result
                        });
                    }
                    Err(TransportError::Timeout) => {}
                    Err(e) => {
                        tracing::error!(error = %e, "lost connection to interchange");
                        return Err(e.into());
                    }
                }
            }
            Some(joined) = running.join_next(), if !running.is_empty() => {
                match joined {
                    Ok(result) => {
                        if let Err(e) = dealer.send(&WorkerOutbound::Result(result)).await {
                            tracing::warn!(error = %e, "failed to send task result");
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "execution task join failed"),
                }
            }
        }
    }

    while let Some(joined) = running.join_next().await {
        if let Ok(result) = joined {
            let _ = dealer.send(&WorkerOutbound::Result(result)).await;
        }
    }

    Ok(())
}
