use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use htex_interchange::{InterchangeHandshake, SUBMITTER_IDENTITY};
use htex_protocol::{BlockId, BlockStatus, Codec, RemoteErrorKind, Task, TaskId, TaskResult};
use htex_provider::ExecutionProvider;
use htex_transport::{DealerSocket, TransportError};

use crate::error::{ExecutorError, TaskError};

/// Default `launch_cmd` template. `{task_url}`/`{result_url}` carry the
/// worker-facing host and port: this interchange exposes one combined
/// `workers` socket rather than Parsl's separate task-facing and
/// result-facing worker ports, so the two tokens the spec names are reused
/// to carry host and port rather than two distinct URLs (see `DESIGN.md`).
pub const DEFAULT_LAUNCH_CMD: &str =
    "htex-worker --interchange-host {task_url} --interchange-port {result_url} \
     --cores-per-worker {cores_per_worker} --worker-debug {debug}";

/// Outcome a submitted task's [`TaskHandle`] eventually resolves to.
pub type TaskOutcome = Result<Value, TaskError>;

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub label: String,
    /// Path to the `htex-interchange` binary this executor spawns as a
    /// child process.
    pub interchange_bin: std::path::PathBuf,
    /// Host the interchange binds its sockets on, and (absent `public_ip`)
    /// the host advertised to workers in `launch_cmd`.
    pub bind_host: String,
    /// Submitter-side IP advertised to workers, if different from
    /// `bind_host` (e.g. reaching across a NAT).
    pub public_ip: Option<String>,
    pub interchange_port_range: (u16, u16),
    pub worker_port_range: (u16, u16),
    pub cores_per_worker: f64,
    pub worker_debug: bool,
    pub working_dir: Option<std::path::PathBuf>,
    /// Whether this executor owns the worker blocks it launches (and so
    /// pushes `Shutdown` sentinels / cancels the provider on teardown)
    /// versus attaching to workers started independently.
    pub managed: bool,
    pub launch_cmd: String,
    pub init_blocks: usize,
    pub heartbeat_period: Duration,
    pub max_beats_missable: u32,
    pub buffer_threshold: usize,
    pub recv_timeout: Duration,
    pub interchange_startup_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            label: "htex".to_string(),
            interchange_bin: std::path::PathBuf::from("htex-interchange"),
            bind_host: "127.0.0.1".to_string(),
            public_ip: None,
            interchange_port_range: (54000, 54200),
            worker_port_range: (54201, 54400),
            cores_per_worker: 1.0,
            worker_debug: false,
            working_dir: None,
            managed: true,
            launch_cmd: DEFAULT_LAUNCH_CMD.to_string(),
            init_blocks: 1,
            heartbeat_period: htex_protocol::HEARTBEAT_PERIOD,
            max_beats_missable: htex_protocol::MAX_BEATS_MISSABLE,
            buffer_threshold: htex_protocol::DEFAULT_BUFFER_THRESHOLD,
            recv_timeout: Duration::from_secs(1),
            interchange_startup_timeout: Duration::from_secs(120),
        }
    }
}

impl ExecutorConfig {
    fn validate(&self) -> Result<(), ExecutorError> {
        if self.cores_per_worker <= 0.0 {
            return Err(ExecutorError::ConfigurationError(
                "cores_per_worker must be positive".into(),
            ));
        }
        if self.interchange_port_range.0 > self.interchange_port_range.1 {
            return Err(ExecutorError::ConfigurationError(
                "interchange_port_range is empty".into(),
            ));
        }
        if self.worker_port_range.0 > self.worker_port_range.1 {
            return Err(ExecutorError::ConfigurationError(
                "worker_port_range is empty".into(),
            ));
        }
        Ok(())
    }

    /// Splits `interchange_port_range` in half: the lower half is offered to
    /// the submitter's `tasks_in` socket, the upper half to `results_out`.
    fn tasks_results_ranges(&self) -> ((u16, u16), (u16, u16)) {
        let (lo, hi) = self.interchange_port_range;
        let mid = lo + (hi - lo) / 2;
        ((lo, mid), (mid + 1, hi))
    }
}

struct BlockRecord {
    id: BlockId,
    submitted_at: Instant,
    cancel_requested: bool,
}

#[derive(Default, Clone)]
struct BadState {
    is_bad: bool,
    reason: Option<RemoteErrorKind>,
}

/// Per-task bookkeeping the management task owns: the completion channel
/// plus the flags a [`TaskHandle`] polls without consuming it.
struct TaskWaiter {
    tx: oneshot::Sender<TaskOutcome>,
    done: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
}

enum ManagementCommand {
    Register(TaskId, TaskWaiter),
    /// Completes one task directly; used when `submit` itself fails to hand
    /// a task to the interchange, so that failure reaches the caller
    /// through the same channel as every other terminal outcome.
    Complete(TaskId, TaskOutcome),
    Fail(RemoteErrorKind),
    Shutdown,
}

/// Submitter-side handle to one submitted task. The idiomatic-Rust stand-in
/// for `concurrent.futures.Future`: `.await` it for the result, or poll
/// `is_done()`/`is_cancelled()` without consuming it.
pub struct TaskHandle {
    rx: oneshot::Receiver<TaskOutcome>,
    done: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
}

impl TaskHandle {
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Future for TaskHandle {
    type Output = TaskOutcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(TaskError::ExecutorShutdown)),
            Poll::Pending => Poll::Pending,
        }
    }
}

struct ExecutorInner {
    cfg: ExecutorConfig,
    provider: Arc<dyn ExecutionProvider>,
    codec: Codec,
    tasks_out: tokio::sync::Mutex<DealerSocket>,
    mgmt_tx: mpsc::UnboundedSender<ManagementCommand>,
    mgmt_handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    interchange_child: tokio::sync::Mutex<Option<Child>>,
    blocks: tokio::sync::Mutex<Vec<BlockRecord>>,
    bad: Arc<tokio::sync::Mutex<BadState>>,
    active_tasks: Arc<AtomicUsize>,
    alive: AtomicBool,
    worker_host: String,
    worker_port: u16,
}

/// Submitter-side façade (component C6): owns the interchange child process
/// and the sockets dialing it, and fronts the task-id → future map that
/// actually lives inside a dedicated management task. Cheap to clone: every
/// clone shares the same management task, sockets, and block list through
/// an `Arc`.
#[derive(Clone)]
pub struct Executor {
    inner: Arc<ExecutorInner>,
}

impl Executor {
    /// Binds submitter sockets by spawning the interchange binary, waits
    /// for its startup handshake, spawns the management task, then
    /// provisions `init_blocks` initial blocks. Failure of any initial
    /// block submission aborts startup (§4.5: "failure of any initial
    /// submission raises ScalingFailed").
    pub async fn start(
        cfg: ExecutorConfig,
        provider: Arc<dyn ExecutionProvider>,
    ) -> Result<Self, ExecutorError> {
        cfg.validate()?;
        if provider.min_blocks() > provider.max_blocks() {
            return Err(ExecutorError::ConfigurationError(format!(
                "min_blocks ({}) exceeds max_blocks ({})",
                provider.min_blocks(),
                provider.max_blocks()
            )));
        }
        if !(0.0..=1.0).contains(&provider.parallelism()) {
            return Err(ExecutorError::ConfigurationError(format!(
                "parallelism {} is outside [0, 1]",
                provider.parallelism()
            )));
        }

        let mut child = spawn_interchange(&cfg).await?;
        let stdout = child
            .stdout
            .take()
            .ok_or(ExecutorError::InterchangeStdoutClosed)?;
        let handshake = match read_handshake(stdout, cfg.interchange_startup_timeout).await {
            Ok(h) => h,
            Err(e) => {
                let _ = child.start_kill();
                return Err(e);
            }
        };

        let tasks_out = DealerSocket::connect(
            (cfg.bind_host.as_str(), handshake.tasks_port),
            SUBMITTER_IDENTITY.to_string(),
        )
        .await?;
        let results_in = DealerSocket::connect(
            (cfg.bind_host.as_str(), handshake.results_port),
            SUBMITTER_IDENTITY.to_string(),
        )
        .await?;

        let (mgmt_tx, mgmt_rx) = mpsc::unbounded_channel();
        let bad = Arc::new(tokio::sync::Mutex::new(BadState::default()));
        let active_tasks = Arc::new(AtomicUsize::new(0));
        let codec = Codec::new(cfg.buffer_threshold);
        let recv_timeout = cfg.recv_timeout;

        let worker_host = cfg.public_ip.clone().unwrap_or_else(|| cfg.bind_host.clone());
        let worker_port = handshake.worker_port;

        let inner = Arc::new(ExecutorInner {
            cfg,
            provider,
            codec: codec.clone(),
            tasks_out: tokio::sync::Mutex::new(tasks_out),
            mgmt_tx,
            mgmt_handle: tokio::sync::Mutex::new(None),
            interchange_child: tokio::sync::Mutex::new(Some(child)),
            blocks: tokio::sync::Mutex::new(Vec::new()),
            bad: bad.clone(),
            active_tasks: active_tasks.clone(),
            alive: AtomicBool::new(true),
            worker_host,
            worker_port,
        });

        let mgmt_task = tokio::spawn(run_management_task(
            results_in,
            mgmt_rx,
            codec,
            bad,
            active_tasks,
            recv_timeout,
        ));
        *inner.mgmt_handle.lock().await = Some(mgmt_task);

        let executor = Executor { inner };

        let init_blocks = executor.inner.cfg.init_blocks;
        if init_blocks > 0 {
            executor.scale_out(init_blocks).await?;
        }

        Ok(executor)
    }

    /// Submits `func(*args, **kwargs)` for remote execution and returns a
    /// handle to its eventual result. Fails immediately (without touching
    /// the network) if the executor has already entered its bad state.
    pub async fn submit(&self, func: &str, args: Value, kwargs: Value) -> Result<TaskHandle, ExecutorError> {
        {
            let bad = self.inner.bad.lock().await;
            if bad.is_bad {
                return Err(ExecutorError::BadState(
                    bad.reason.clone().unwrap_or(RemoteErrorKind::NoRunnableBlocks),
                ));
            }
        }

        let payload = self
            .inner
            .codec
            .pack_apply(func, &args, &kwargs)
            .map_err(|e| ExecutorError::BadState(e.into()))?;
        let task = Task { id: TaskId::new(), payload };

        let (tx, rx) = oneshot::channel();
        let done = Arc::new(AtomicBool::new(false));
        let cancelled = Arc::new(AtomicBool::new(false));
        let waiter = TaskWaiter { tx, done: done.clone(), cancelled: cancelled.clone() };

        // Registered before the task is sent: a result racing back ahead of
        // the registration would otherwise be dropped as unknown.
        self.inner
            .mgmt_tx
            .send(ManagementCommand::Register(task.id, waiter))
            .map_err(|_| ExecutorError::Shutdown)?;
        self.inner.active_tasks.fetch_add(1, Ordering::AcqRel);

        let send_result = {
            let mut out = self.inner.tasks_out.lock().await;
            out.send(&task).await
        };
        if let Err(e) = send_result {
            let _ = self.inner.mgmt_tx.send(ManagementCommand::Complete(
                task.id,
                Err(TaskError::Remote(RemoteErrorKind::BadMessage { message: e.to_string() })),
            ));
            return Err(ExecutorError::Transport(e));
        }

        Ok(TaskHandle { rx, done, cancelled })
    }

    /// Requests `n` additional blocks from the provider, rendering
    /// `launch_cmd` with this executor's worker-facing address. Returns the
    /// number actually launched (a provider may decline without error).
    pub async fn scale_out(&self, n: usize) -> Result<usize, ExecutorError> {
        let nodes = self.inner.provider.nodes_per_block();
        let cmd = self.render_launch_cmd();
        let mut launched = 0;
        for _ in 0..n {
            match self.inner.provider.submit(&cmd, nodes).await {
                Ok(Some(id)) => {
                    self.inner.blocks.lock().await.push(BlockRecord {
                        id,
                        submitted_at: Instant::now(),
                        cancel_requested: false,
                    });
                    launched += 1;
                }
                Ok(None) => {}
                Err(e) => return Err(ExecutorError::ScalingFailed(e)),
            }
        }
        Ok(launched)
    }

    /// Cancels up to `n` blocks that have not already been asked to cancel.
    /// Returns the number the provider accepted. A no-op for an unmanaged
    /// executor (`cfg.managed == false`): it tracks blocks it did not
    /// launch but does not tear them down.
    pub async fn scale_in(&self, n: usize) -> Result<usize, ExecutorError> {
        if !self.inner.cfg.managed {
            return Ok(0);
        }
        let ids: Vec<BlockId> = {
            let mut blocks = self.inner.blocks.lock().await;
            let mut chosen = Vec::new();
            for b in blocks.iter_mut() {
                if chosen.len() >= n {
                    break;
                }
                if !b.cancel_requested {
                    b.cancel_requested = true;
                    chosen.push(b.id.clone());
                }
            }
            chosen
        };
        if ids.is_empty() {
            return Ok(0);
        }
        let accepted = self.inner.provider.cancel(&ids).await?;
        Ok(accepted.into_iter().filter(|a| *a).count())
    }

    /// Current `(block_id, status)` pairs for every block this executor has
    /// provisioned and not yet reconciled away.
    pub async fn status(&self) -> Result<Vec<(BlockId, BlockStatus)>, ExecutorError> {
        let ids: Vec<BlockId> = self.inner.blocks.lock().await.iter().map(|b| b.id.clone()).collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let statuses = self.inner.provider.status(&ids).await?;
        Ok(ids.into_iter().zip(statuses).collect())
    }

    /// Drops blocks that have reached a terminal state from this executor's
    /// bookkeeping, and — if no block remains while tasks are still
    /// outstanding — fails every pending task with `NoRunnableBlocks` (§7,
    /// §8 invariant 6).
    pub async fn reconcile_blocks(&self) -> Result<(), ExecutorError> {
        let statuses = self.status().await?;
        {
            let mut blocks = self.inner.blocks.lock().await;
            blocks.retain(|b| {
                !statuses
                    .iter()
                    .any(|(id, s)| id == &b.id && (*s == BlockStatus::Completed || s.is_terminal_failure()))
            });
        }
        let remaining = self.inner.blocks.lock().await.len();
        let active = self.inner.active_tasks.load(Ordering::Acquire);
        if remaining == 0 && active > 0 {
            self.set_bad_state_and_fail_all(RemoteErrorKind::NoRunnableBlocks);
        }
        Ok(())
    }

    /// Enters the bad state and fails every outstanding task with `kind`.
    /// Safe to call more than once, including after the executor is already
    /// bad: `run_management_task` keeps only the first reason (§8 invariant
    /// 6: monotone), so a later call is a harmless redundant `Fail`. Kept
    /// synchronous (no `bad` lock read here) so it can be called from
    /// `strategy.rs`'s synchronous job-error handler as well as from here.
    pub fn set_bad_state_and_fail_all(&self, kind: RemoteErrorKind) {
        let _ = self.inner.mgmt_tx.send(ManagementCommand::Fail(kind));
    }

    /// Cancels every provisioned block, stops the management task, and
    /// tears down the interchange child process. Idempotent.
    pub async fn shutdown(&self) -> Result<(), ExecutorError> {
        if !self.inner.alive.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        if self.inner.cfg.managed {
            let ids: Vec<BlockId> = self.inner.blocks.lock().await.iter().map(|b| b.id.clone()).collect();
            if !ids.is_empty() {
                let _ = self.inner.provider.cancel(&ids).await;
            }
        }

        let _ = self.inner.mgmt_tx.send(ManagementCommand::Shutdown);
        let mgmt_handle = self.inner.mgmt_handle.lock().await.take();
        if let Some(handle) = mgmt_handle {
            let _ = handle.await;
        }

        let child = self.inner.interchange_child.lock().await.take();
        if let Some(mut child) = child {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }

        Ok(())
    }

    pub fn label(&self) -> &str {
        &self.inner.cfg.label
    }

    pub fn active_tasks(&self) -> usize {
        self.inner.active_tasks.load(Ordering::Acquire)
    }

    pub async fn block_count(&self) -> usize {
        self.inner.blocks.lock().await.len()
    }

    pub fn provider(&self) -> &Arc<dyn ExecutionProvider> {
        &self.inner.provider
    }

    /// Host/port the interchange advertises to workers, as rendered into
    /// `launch_cmd`'s `{task_url}`/`{result_url}` tokens.
    pub fn worker_address(&self) -> (&str, u16) {
        (&self.inner.worker_host, self.inner.worker_port)
    }

    fn render_launch_cmd(&self) -> String {
        render_launch_cmd(
            &self.inner.cfg.launch_cmd,
            &self.inner.worker_host,
            self.inner.worker_port,
            self.inner.cfg.cores_per_worker,
            self.inner.cfg.worker_debug,
        )
    }
}

fn render_launch_cmd(template: &str, host: &str, port: u16, cores_per_worker: f64, debug: bool) -> String {
    template
        .replace("{task_url}", host)
        .replace("{result_url}", &port.to_string())
        .replace("{cores_per_worker}", &cores_per_worker.to_string())
        .replace("{debug}", &debug.to_string())
}

async fn spawn_interchange(cfg: &ExecutorConfig) -> Result<Child, ExecutorError> {
    let (tasks_range, results_range) = cfg.tasks_results_ranges();

    let mut cmd = Command::new(&cfg.interchange_bin);
    cmd.arg("--host")
        .arg(&cfg.bind_host)
        .arg("--tasks-port-lo")
        .arg(tasks_range.0.to_string())
        .arg("--tasks-port-hi")
        .arg(tasks_range.1.to_string())
        .arg("--results-port-lo")
        .arg(results_range.0.to_string())
        .arg("--results-port-hi")
        .arg(results_range.1.to_string())
        .arg("--worker-port-lo")
        .arg(cfg.worker_port_range.0.to_string())
        .arg("--worker-port-hi")
        .arg(cfg.worker_port_range.1.to_string())
        .arg("--heartbeat-period-secs")
        .arg(cfg.heartbeat_period.as_secs().to_string())
        .arg("--max-beats-missable")
        .arg(cfg.max_beats_missable.to_string())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);
    if let Some(dir) = &cfg.working_dir {
        cmd.current_dir(dir);
    }

    cmd.spawn().map_err(ExecutorError::InterchangeSpawn)
}

async fn read_handshake(
    stdout: tokio::process::ChildStdout,
    timeout: Duration,
) -> Result<InterchangeHandshake, ExecutorError> {
    let mut reader = BufReader::new(stdout);
    let mut line = String::new();
    let read = tokio::time::timeout(timeout, reader.read_line(&mut line)).await;
    match read {
        Ok(Ok(0)) => Err(ExecutorError::InterchangeStdoutClosed),
        Ok(Ok(_)) => serde_json::from_str(line.trim())
            .map_err(|e| ExecutorError::HandshakeDecode(e.to_string())),
        Ok(Err(e)) => Err(ExecutorError::HandshakeDecode(e.to_string())),
        Err(_) => Err(ExecutorError::InterchangeStartupTimeout),
    }
}

fn complete_waiter(
    waiters: &mut HashMap<TaskId, TaskWaiter>,
    active_tasks: &AtomicUsize,
    id: TaskId,
    outcome: TaskOutcome,
) {
    if let Some(w) = waiters.remove(&id) {
        w.done.store(true, Ordering::Release);
        let _ = w.tx.send(outcome);
        active_tasks.fetch_sub(1, Ordering::AcqRel);
    }
}

fn result_to_outcome(codec: &Codec, result: TaskResult) -> Option<(TaskId, TaskOutcome)> {
    match result {
        TaskResult::Info { .. } => None,
        TaskResult::Ok { id, payload } => {
            let outcome = codec
                .deserialize(&payload)
                .map_err(|e| TaskError::Remote(e.into()));
            Some((id, outcome))
        }
        TaskResult::Err { id, payload } => {
            let outcome = match codec.deserialize(&payload) {
                Ok(value) => match serde_json::from_value::<RemoteErrorKind>(value) {
                    Ok(kind) => Err(TaskError::Remote(kind)),
                    Err(e) => Err(TaskError::Remote(RemoteErrorKind::DeserializationError {
                        message: e.to_string(),
                    })),
                },
                Err(e) => Err(TaskError::Remote(e.into())),
            };
            Some((id, outcome))
        }
    }
}

/// Owns the task-id → waiter map exclusively; every mutation flows through
/// either a `ManagementCommand` or a result read off `results_in`, matching
/// the single-mutation-point discipline `htex-interchange::registry` uses
/// for worker liveness.
async fn run_management_task(
    mut results_in: DealerSocket,
    mut mgmt_rx: mpsc::UnboundedReceiver<ManagementCommand>,
    codec: Codec,
    bad: Arc<tokio::sync::Mutex<BadState>>,
    active_tasks: Arc<AtomicUsize>,
    recv_timeout: Duration,
) {
    let mut waiters: HashMap<TaskId, TaskWaiter> = HashMap::new();

    loop {
        tokio::select! {
            cmd = mgmt_rx.recv() => {
                match cmd {
                    Some(ManagementCommand::Register(id, waiter)) => {
                        waiters.insert(id, waiter);
                    }
                    Some(ManagementCommand::Complete(id, outcome)) => {
                        complete_waiter(&mut waiters, &active_tasks, id, outcome);
                    }
                    Some(ManagementCommand::Fail(kind)) => {
                        let first_reason = {
                            let mut guard = bad.lock().await;
                            if guard.is_bad {
                                guard.reason.clone().unwrap_or_else(|| kind.clone())
                            } else {
                                guard.is_bad = true;
                                guard.reason = Some(kind.clone());
                                kind.clone()
                            }
                        };
                        for (_, w) in waiters.drain() {
                            w.done.store(true, Ordering::Release);
                            let _ = w.tx.send(Err(TaskError::Remote(first_reason.clone())));
                        }
                        active_tasks.store(0, Ordering::Release);
                    }
                    Some(ManagementCommand::Shutdown) | None => {
                        for (_, w) in waiters.drain() {
                            w.done.store(true, Ordering::Release);
                            w.cancelled.store(true, Ordering::Release);
                            let _ = w.tx.send(Err(TaskError::ExecutorShutdown));
                        }
                        break;
                    }
                }
            }
            recv = results_in.recv::<TaskResult>(recv_timeout) => {
                match recv {
                    Ok(result) => {
                        if let Some((id, outcome)) = result_to_outcome(&codec, result) {
                            complete_waiter(&mut waiters, &active_tasks, id, outcome);
                        }
                    }
                    Err(TransportError::Timeout) => {}
                    Err(e) => {
                        tracing::error!(error = %e, "lost connection to interchange results socket");
                        {
                            let mut guard = bad.lock().await;
                            guard.is_bad = true;
                            guard.reason = Some(RemoteErrorKind::BadMessage { message: e.to_string() });
                        }
                        for (_, w) in waiters.drain() {
                            w.done.store(true, Ordering::Release);
                            let _ = w.tx.send(Err(TaskError::Remote(RemoteErrorKind::BadMessage {
                                message: e.to_string(),
                            })));
                        }
                        active_tasks.store(0, Ordering::Release);
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_cmd_substitutes_every_token() {
        let rendered = render_launch_cmd(DEFAULT_LAUNCH_CMD, "10.0.0.5", 54210, 2.0, true);
        assert_eq!(
            rendered,
            "htex-worker --interchange-host 10.0.0.5 --interchange-port 54210 \
             --cores-per-worker 2 --worker-debug true"
        );
    }

    #[test]
    fn config_rejects_nonpositive_cores_per_worker() {
        let cfg = ExecutorConfig {
            cores_per_worker: 0.0,
            ..ExecutorConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn interchange_port_range_splits_in_half() {
        let cfg = ExecutorConfig {
            interchange_port_range: (54000, 54200),
            ..ExecutorConfig::default()
        };
        let (tasks, results) = cfg.tasks_results_ranges();
        assert_eq!(tasks, (54000, 54100));
        assert_eq!(results, (54101, 54200));
    }

    #[test]
    fn bad_state_first_reason_wins() {
        // Mirrors `set_bad_state_and_fail_all`'s already-bad guard: once
        // set, a later Fail must never overwrite the recorded reason.
        let mut state = BadState::default();
        let apply = |state: &mut BadState, kind: RemoteErrorKind| {
            if !state.is_bad {
                state.is_bad = true;
                state.reason = Some(kind);
            }
        };
        apply(&mut state, RemoteErrorKind::NoRunnableBlocks);
        apply(&mut state, RemoteErrorKind::WorkerLost { worker_id: "w1".into() });
        assert!(matches!(state.reason, Some(RemoteErrorKind::NoRunnableBlocks)));
    }
}
