use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use htex_protocol::{TaskId, WorkerId};

/// Observable health of one worker, derived on demand from heartbeat
/// recency. `Evicted` workers are not kept in the registry at all — this
/// variant exists only so callers inspecting a snapshot can describe "this
/// worker is gone" without a separate type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerHealth {
    Healthy,
    Stale,
}

#[derive(Debug, Clone)]
pub struct WorkerRecord {
    pub capacity: usize,
    pub last_heartbeat: Instant,
    pub in_flight: HashSet<TaskId>,
    registered_at: Instant,
}

impl WorkerRecord {
    pub fn health(&self, now: Instant, heartbeat_period: Duration) -> WorkerHealth {
        if now.saturating_duration_since(self.last_heartbeat) > heartbeat_period {
            WorkerHealth::Stale
        } else {
            WorkerHealth::Healthy
        }
    }
}

/// Single mutation point for worker liveness and task-ownership tracking
/// (§9's "consolidate heartbeat/ownership tracking in a dedicated
/// WorkerRegistry"). Only the interchange's main loop ever touches this —
/// no internal locking is needed.
#[derive(Default)]
pub struct WorkerRegistry {
    workers: HashMap<WorkerId, WorkerRecord>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, worker_id: WorkerId, capacity: usize, now: Instant) {
        self.workers
            .entry(worker_id)
            .and_modify(|record| {
                record.capacity = capacity;
                record.last_heartbeat = now;
            })
            .or_insert_with(|| WorkerRecord {
                capacity,
                last_heartbeat: now,
                in_flight: HashSet::new(),
                registered_at: now,
            });
    }

    pub fn heartbeat(&mut self, worker_id: &WorkerId, active_task_ids: HashSet<TaskId>, now: Instant) {
        if let Some(record) = self.workers.get_mut(worker_id) {
            record.last_heartbeat = now;
            record.in_flight = active_task_ids;
        }
        // A heartbeat from a worker this registry never saw register is
        // logged and dropped by the caller; the registry itself just no-ops.
    }

    /// Removes `task_id` from `worker_id`'s in-flight set (terminal result
    /// arrived: `Ok` or `Err`).
    pub fn complete_task(&mut self, worker_id: &WorkerId, task_id: TaskId) {
        if let Some(record) = self.workers.get_mut(worker_id) {
            record.in_flight.remove(&task_id);
        }
    }

    /// Picks the least-loaded worker with spare capacity. Ties break on
    /// earliest `last_heartbeat`, then on worker id for a stable order.
    pub fn pick_for_dispatch(&self) -> Option<WorkerId> {
        self.workers
            .iter()
            .filter(|(_, record)| record.in_flight.len() < record.capacity)
            .min_by(|(id_a, a), (id_b, b)| {
                a.in_flight
                    .len()
                    .cmp(&b.in_flight.len())
                    .then(a.last_heartbeat.cmp(&b.last_heartbeat))
                    .then(id_a.cmp(id_b))
            })
            .map(|(id, _)| id.clone())
    }

    pub fn record_dispatch(&mut self, worker_id: &WorkerId, task_id: TaskId) {
        if let Some(record) = self.workers.get_mut(worker_id) {
            record.in_flight.insert(task_id);
        }
    }

    /// Workers currently in the `Stale` state (one missed heartbeat period,
    /// but not yet past `evict_stale`'s longer eviction threshold). Used to
    /// surface the `Healthy ⇄ Stale` transition of the per-worker state
    /// machine (§4.3) before a worker is actually evicted.
    pub fn stale_workers(&self, now: Instant, heartbeat_period: Duration) -> Vec<WorkerId> {
        self.workers
            .iter()
            .filter(|(_, record)| record.health(now, heartbeat_period) == WorkerHealth::Stale)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Evicts every worker whose heartbeat has been missing for longer than
    /// `liveness_timeout`. Returns, for each evicted worker, the set of
    /// `TaskId`s that were in flight on it — the caller is responsible for
    /// surfacing each as a `WorkerLost` result.
    pub fn evict_stale(&mut self, now: Instant, liveness_timeout: Duration) -> Vec<(WorkerId, HashSet<TaskId>)> {
        let stale: Vec<WorkerId> = self
            .workers
            .iter()
            .filter(|(_, record)| now.saturating_duration_since(record.last_heartbeat) > liveness_timeout)
            .map(|(id, _)| id.clone())
            .collect();

        stale
            .into_iter()
            .map(|id| {
                let record = self.workers.remove(&id).expect("id came from this map");
                (id, record.in_flight)
            })
            .collect()
    }

    pub fn registered_since(&self, worker_id: &WorkerId) -> Option<Instant> {
        self.workers.get(worker_id).map(|r| r.registered_at)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_prefers_least_loaded_then_oldest_heartbeat() {
        let mut reg = WorkerRegistry::new();
        let t0 = Instant::now();
        reg.register("a".into(), 2, t0);
        reg.register("b".into(), 2, t0 + Duration::from_millis(1));
        reg.record_dispatch(&"a".to_string(), TaskId::new());

        // a has 1/2 in flight, b has 0/2 -> b should win.
        assert_eq!(reg.pick_for_dispatch(), Some("b".to_string()));
    }

    #[test]
    fn eviction_returns_in_flight_tasks() {
        let mut reg = WorkerRegistry::new();
        let t0 = Instant::now();
        reg.register("a".into(), 4, t0);
        let task = TaskId::new();
        reg.record_dispatch(&"a".to_string(), task);

        let later = t0 + Duration::from_secs(1000);
        let evicted = reg.evict_stale(later, Duration::from_secs(90));
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].0, "a");
        assert!(evicted[0].1.contains(&task));
        assert!(reg.is_empty());
    }

    #[test]
    fn pick_for_dispatch_skips_full_workers() {
        let mut reg = WorkerRegistry::new();
        let t0 = Instant::now();
        reg.register("a".into(), 1, t0);
        reg.record_dispatch(&"a".to_string(), TaskId::new());
        assert_eq!(reg.pick_for_dispatch(), None);
    }

    #[test]
    fn stale_workers_reports_missed_heartbeat_before_eviction() {
        let mut reg = WorkerRegistry::new();
        let t0 = Instant::now();
        reg.register("a".into(), 1, t0);
        reg.register("b".into(), 1, t0);
        reg.heartbeat(&"b".to_string(), HashSet::new(), t0 + Duration::from_secs(5));

        let heartbeat_period = Duration::from_secs(10);
        let liveness_timeout = heartbeat_period * 3;
        let now = t0 + Duration::from_secs(15);

        // "a" missed a heartbeat period but is nowhere near the eviction
        // threshold yet; "b" heartbeated recently enough to stay healthy.
        assert_eq!(reg.stale_workers(now, heartbeat_period), vec!["a".to_string()]);
        assert!(reg.evict_stale(now, liveness_timeout).is_empty());
    }
}
