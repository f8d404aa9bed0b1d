//! Interchange broker process (component C5): a single-threaded cooperative
//! event loop with three identity-addressed sockets — `tasks_in` (from the
//! submitter), `results_out` (to the submitter), and `workers`.

mod registry;

pub use registry::{WorkerHealth, WorkerRecord, WorkerRegistry};

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use htex_protocol::{Codec, RemoteErrorKind, Task, TaskResult, WorkerId, WorkerInbound, WorkerOutbound, HEARTBEAT_PERIOD, MAX_BEATS_MISSABLE};
use htex_transport::{RouterSocket, TransportError};

/// Fixed connection identity the executor's submitter-side sockets use when
/// dialing the interchange. There is exactly one submitter per interchange
/// (§1: no cross-submitter fairness), so a constant is sufficient — a real
/// multi-tenant broker would negotiate this at connect time.
pub const SUBMITTER_IDENTITY: &str = "submitter";

/// Sent back to the parent process once all three sockets are bound (§4.3
/// startup handshake). The parent must receive this within 120s or treat
/// startup as failed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct InterchangeHandshake {
    pub tasks_port: u16,
    pub results_port: u16,
    pub worker_port: u16,
}

#[derive(Debug, Clone)]
pub struct InterchangeConfig {
    pub host: String,
    pub tasks_port_range: (u16, u16),
    pub results_port_range: (u16, u16),
    pub worker_port_range: (u16, u16),
    pub heartbeat_period: Duration,
    pub max_beats_missable: u32,
    /// Cadence of the dispatch + liveness passes, independent of message
    /// arrival (§4.3 step 1's "≤100ms" socket poll).
    pub poll_interval: Duration,
    /// How long to tolerate the submitter's `tasks_in` connection being
    /// absent before treating its loss as fatal (§4.3's "submitter loss is
    /// fatal... after a grace-period drain").
    pub submitter_grace_period: Duration,
}

impl Default for InterchangeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            tasks_port_range: (54000, 54100),
            results_port_range: (54101, 54200),
            worker_port_range: (54201, 54400),
            heartbeat_period: HEARTBEAT_PERIOD,
            max_beats_missable: MAX_BEATS_MISSABLE,
            poll_interval: Duration::from_millis(100),
            submitter_grace_period: Duration::from_secs(5),
        }
    }
}

fn worker_lost_result(codec: &Codec, task_id: htex_protocol::TaskId, worker_id: &WorkerId) -> TaskResult {
    let kind = RemoteErrorKind::WorkerLost {
        worker_id: worker_id.clone(),
    };
    let value = serde_json::to_value(&kind).expect("RemoteErrorKind always serializes to a Value");
    let payload = codec.serialize(&value).expect("a small tagged enum never exceeds the buffer threshold");
    TaskResult::Err { id: task_id, payload }
}

fn handle_worker_message(
    registry: &mut WorkerRegistry,
    results_out: &RouterSocket,
    identity: WorkerId,
    msg: WorkerOutbound,
) {
    match msg {
        WorkerOutbound::Register { capacity, .. } => {
            registry.register(identity, capacity, Instant::now());
        }
        WorkerOutbound::Heartbeat(hb) => {
            registry.heartbeat(&identity, hb.active_task_ids, Instant::now());
        }
        WorkerOutbound::Result(result) => {
            // Info is purely informational: the registry already recorded
            // this task as in-flight at dispatch time, not now.
            match &result {
                TaskResult::Ok { id, .. } | TaskResult::Err { id, .. } => {
                    registry.complete_task(&identity, *id);
                }
                TaskResult::Info { .. } => {}
            }
            if let Err(e) = results_out.send(&SUBMITTER_IDENTITY.to_string(), &result) {
                tracing::warn!(error = %e, "failed to forward result to submitter");
            }
        }
    }
}

fn dispatch_pending(pending: &mut VecDeque<Task>, registry: &mut WorkerRegistry, workers: &RouterSocket) {
    while let Some(worker_id) = registry.pick_for_dispatch() {
        let Some(task) = pending.pop_front() else {
            break;
        };
        registry.record_dispatch(&worker_id, task.id);
        if let Err(e) = workers.send(&worker_id, &WorkerInbound::Task(task)) {
            tracing::warn!(worker_id = %worker_id, error = %e, "failed to dispatch task");
        }
    }
}

/// Runs the interchange until the submitter is lost (fatal) or its result
/// socket is dropped. Binds all three sockets, reports the handshake on
/// `handshake_tx`, then runs the cooperative loop described in §4.3.
pub async fn run(cfg: InterchangeConfig, handshake_tx: oneshot::Sender<InterchangeHandshake>) -> anyhow::Result<()> {
    let mut tasks_in = RouterSocket::bind(&cfg.host, cfg.tasks_port_range).await?;
    let mut results_out = RouterSocket::bind(&cfg.host, cfg.results_port_range).await?;
    let mut workers = RouterSocket::bind(&cfg.host, cfg.worker_port_range).await?;

    let handshake = InterchangeHandshake {
        tasks_port: tasks_in.port(),
        results_port: results_out.port(),
        worker_port: workers.port(),
    };
    if handshake_tx.send(handshake).is_err() {
        anyhow::bail!("parent dropped the startup handshake channel");
    }

    let codec = Codec::default();
    let mut registry = WorkerRegistry::new();
    let mut pending: VecDeque<Task> = VecDeque::new();
    let liveness_timeout = cfg.heartbeat_period * cfg.max_beats_missable;

    let mut tick = tokio::time::interval(cfg.poll_interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut submitter_seen = false;
    let mut submitter_lost_since: Option<Instant> = None;

    loop {
        tokio::select! {
            recv = tasks_in.recv::<Task>(cfg.poll_interval) => {
                match recv {
                    Ok((_identity, task)) => {
                        submitter_seen = true;
                        submitter_lost_since = None;
                        pending.push_back(task);
                    }
                    Err(TransportError::Timeout) => {}
                    Err(e) => tracing::warn!(error = %e, "tasks_in recv error"),
                }
            }
            recv = workers.recv::<WorkerOutbound>(cfg.poll_interval) => {
                match recv {
                    Ok((identity, msg)) => handle_worker_message(&mut registry, &results_out, identity, msg),
                    Err(TransportError::Timeout) => {}
                    Err(e) => tracing::warn!(error = %e, "workers recv error"),
                }
            }
            _ = tick.tick() => {
                dispatch_pending(&mut pending, &mut registry, &workers);

                let now = Instant::now();
                for worker_id in registry.stale_workers(now, cfg.heartbeat_period) {
                    tracing::debug!(worker_id = %worker_id, "worker missed a heartbeat period, now stale");
                }

                let evicted = registry.evict_stale(now, liveness_timeout);
                for (worker_id, in_flight) in evicted {
                    tracing::warn!(worker_id = %worker_id, lost_tasks = in_flight.len(), "evicting worker: heartbeat lost");
                    for task_id in in_flight {
                        let result = worker_lost_result(&codec, task_id, &worker_id);
                        if let Err(e) = results_out.send(&SUBMITTER_IDENTITY.to_string(), &result) {
                            tracing::warn!(error = %e, "failed to surface WorkerLost to submitter");
                        }
                    }
                }

                if submitter_seen {
                    let both_sockets_closed = tasks_in.known_peers().next().is_none()
                        && results_out.known_peers().next().is_none();
                    if both_sockets_closed {
                        let lost_since = submitter_lost_since.get_or_insert_with(Instant::now);
                        if lost_since.elapsed() > cfg.submitter_grace_period {
                            tracing::warn!("submitter connection lost past the grace period, shutting down");
                            break;
                        }
                    } else {
                        submitter_lost_since = None;
                    }
                }
            }
        }
    }

    tasks_in.close();
    results_out.close();
    workers.close();
    Ok(())
}
