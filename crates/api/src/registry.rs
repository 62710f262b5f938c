//! In-memory worker registry: liveness, capabilities, and loaded models.
//!
//! Workers announce themselves with heartbeats every 30 s; the registry is
//! the dispatcher's and reaper's view of the fleet. The canonical job state
//! stays in the database — losing this map on restart only costs the next
//! round of heartbeats.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tessera_core::scheduling::WorkerSnapshot;
use tessera_core::types::{Capability, JobId};
use tokio::sync::RwLock;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Heartbeat within this window means the worker is healthy.
pub const HEALTHY_WITHIN: Duration = Duration::from_secs(60);

/// Past this gap the worker is dead and its running work is orphaned.
pub const DEAD_AFTER: Duration = Duration::from_secs(180);

/// Dead entries are kept around this long for forensic visibility.
pub const DEAD_RETENTION: Duration = Duration::from_secs(600);

/// Failures within this window count toward quarantine.
const FAILURE_WINDOW: Duration = Duration::from_secs(600);

/// More than this many recent failures quarantines the worker.
const QUARANTINE_THRESHOLD: usize = 3;

// ---------------------------------------------------------------------------
// Liveness
// ---------------------------------------------------------------------------

/// Heartbeat-derived liveness classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    /// Eligible for new dispatch.
    Healthy,
    /// Kept as a candidate to finish running work, but not dispatched to.
    Stale,
    /// Removed from the pool; running work gets requeued.
    Dead,
}

impl Liveness {
    /// Classify a heartbeat age.
    pub fn classify(age: Duration) -> Liveness {
        if age < HEALTHY_WITHIN {
            Liveness::Healthy
        } else if age <= DEAD_AFTER {
            Liveness::Stale
        } else {
            Liveness::Dead
        }
    }
}

// ---------------------------------------------------------------------------
// Heartbeat report
// ---------------------------------------------------------------------------

/// Body of `POST /api/internal/heartbeat`.
#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatReport {
    pub worker_id: String,
    /// Base URL the control plane should use for `run_job` calls.
    pub url: String,
    /// `idle` or `busy`, from the worker's own point of view.
    #[serde(default = "default_status")]
    pub status: String,
    pub capabilities: Vec<Capability>,
    #[serde(default)]
    pub loaded_models: Vec<String>,
    #[serde(default)]
    pub gpu_memory_used_mb: Option<u64>,
    #[serde(default)]
    pub uptime_seconds: Option<u64>,
    #[serde(default)]
    pub jobs_completed: Option<u64>,
}

fn default_status() -> String {
    "idle".to_string()
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// One known worker.
#[derive(Debug, Clone)]
pub struct WorkerEntry {
    pub worker_id: String,
    pub base_url: String,
    pub reported_busy: bool,
    pub capabilities: Vec<Capability>,
    pub loaded_models: Vec<String>,
    pub gpu_memory_used_mb: Option<u64>,
    pub uptime_seconds: Option<u64>,
    pub jobs_completed: Option<u64>,
    pub last_heartbeat: Instant,
    /// Jobs this control plane has dispatched and not yet settled.
    pub in_flight: Vec<JobId>,
    /// Recent failure instants, for quarantine accounting.
    failures: VecDeque<Instant>,
    pub quarantined: bool,
    /// Set when the sweep first classified this entry dead.
    dead_since: Option<Instant>,
}

impl WorkerEntry {
    pub fn liveness_at(&self, now: Instant) -> Liveness {
        Liveness::classify(now.saturating_duration_since(self.last_heartbeat))
    }

    fn is_dispatchable(&self, now: Instant) -> bool {
        !self.quarantined
            && !self.reported_busy
            && self.in_flight.is_empty()
            && self.liveness_at(now) == Liveness::Healthy
    }
}

/// A dispatchable worker plus the address to reach it.
#[derive(Debug, Clone)]
pub struct DispatchTarget {
    pub snapshot: WorkerSnapshot,
    pub base_url: String,
}

/// Outcome of one reaper sweep.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Workers that crossed into `dead` during this sweep.
    pub newly_dead: Vec<String>,
    /// Dead workers purged after the retention window.
    pub purged: Vec<String>,
}

/// A model currently served by the fleet, for `GET /api/v1/models`.
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub model: String,
    pub capabilities: Vec<Capability>,
    /// Number of live workers reporting the model loaded.
    pub workers: usize,
    /// Whether an idle healthy worker has it resident (no cold start).
    pub resident_on_idle: bool,
}

// ---------------------------------------------------------------------------
// WorkerRegistry
// ---------------------------------------------------------------------------

/// Thread-safe registry of known workers, keyed by worker id.
///
/// Designed to be wrapped in `Arc` and shared across the HTTP surface, the
/// dispatcher, and the reaper. Critical sections are map lookups and field
/// updates only.
pub struct WorkerRegistry {
    workers: RwLock<HashMap<String, WorkerEntry>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self {
            workers: RwLock::new(HashMap::new()),
        }
    }

    // ── Heartbeats ───────────────────────────────────────────────────────

    /// Upsert a worker from its heartbeat. Idempotent: re-delivering an
    /// identical heartbeat leaves the registry equivalent. A heartbeat from
    /// a worker previously marked dead revives it.
    pub async fn heartbeat(&self, report: HeartbeatReport) {
        self.heartbeat_at(report, Instant::now()).await;
    }

    /// [`heartbeat`](Self::heartbeat) with an explicit clock, for tests.
    pub async fn heartbeat_at(&self, report: HeartbeatReport, now: Instant) {
        let mut workers = self.workers.write().await;
        match workers.get_mut(&report.worker_id) {
            Some(entry) => {
                entry.base_url = report.url;
                entry.reported_busy = report.status == "busy";
                entry.capabilities = report.capabilities;
                entry.loaded_models = report.loaded_models;
                entry.gpu_memory_used_mb = report.gpu_memory_used_mb;
                entry.uptime_seconds = report.uptime_seconds;
                entry.jobs_completed = report.jobs_completed;
                entry.last_heartbeat = now;
                entry.dead_since = None;
            }
            None => {
                tracing::info!(worker_id = %report.worker_id, url = %report.url, "Worker registered");
                workers.insert(
                    report.worker_id.clone(),
                    WorkerEntry {
                        worker_id: report.worker_id,
                        base_url: report.url,
                        reported_busy: report.status == "busy",
                        capabilities: report.capabilities,
                        loaded_models: report.loaded_models,
                        gpu_memory_used_mb: report.gpu_memory_used_mb,
                        uptime_seconds: report.uptime_seconds,
                        jobs_completed: report.jobs_completed,
                        last_heartbeat: now,
                        in_flight: Vec::new(),
                        failures: VecDeque::new(),
                        quarantined: false,
                        dead_since: None,
                    },
                );
            }
        }
    }

    // ── Dispatch support ─────────────────────────────────────────────────

    /// Idle, healthy, non-quarantined workers in stable order by worker id.
    pub async fn dispatch_targets(&self) -> Vec<DispatchTarget> {
        self.dispatch_targets_at(Instant::now()).await
    }

    pub async fn dispatch_targets_at(&self, now: Instant) -> Vec<DispatchTarget> {
        let workers = self.workers.read().await;
        let mut targets: Vec<DispatchTarget> = workers
            .values()
            .filter(|entry| entry.is_dispatchable(now))
            .map(|entry| DispatchTarget {
                snapshot: WorkerSnapshot {
                    worker_id: entry.worker_id.clone(),
                    capabilities: entry.capabilities.clone(),
                    loaded_models: entry.loaded_models.clone(),
                },
                base_url: entry.base_url.clone(),
            })
            .collect();
        targets.sort_by(|a, b| a.snapshot.worker_id.cmp(&b.snapshot.worker_id));
        targets
    }

    /// Record jobs as in flight on a worker, taking it out of the idle pool
    /// until [`mark_idle`](Self::mark_idle).
    pub async fn mark_busy(&self, worker_id: &str, jobs: &[JobId]) {
        let mut workers = self.workers.write().await;
        if let Some(entry) = workers.get_mut(worker_id) {
            entry.in_flight.extend_from_slice(jobs);
        }
    }

    /// Settle jobs on a worker, returning it to the idle pool when nothing
    /// else is in flight.
    pub async fn mark_idle(&self, worker_id: &str, jobs: &[JobId]) {
        let mut workers = self.workers.write().await;
        if let Some(entry) = workers.get_mut(worker_id) {
            entry.in_flight.retain(|id| !jobs.contains(id));
        }
    }

    // ── Failure tracking ─────────────────────────────────────────────────

    /// Record a runtime failure against a worker. Returns `true` when this
    /// failure tipped the worker into quarantine.
    pub async fn record_failure(&self, worker_id: &str) -> bool {
        self.record_failure_at(worker_id, Instant::now()).await
    }

    pub async fn record_failure_at(&self, worker_id: &str, now: Instant) -> bool {
        let mut workers = self.workers.write().await;
        let Some(entry) = workers.get_mut(worker_id) else {
            return false;
        };

        entry.failures.push_back(now);
        while entry
            .failures
            .front()
            .is_some_and(|f| now.saturating_duration_since(*f) > FAILURE_WINDOW)
        {
            entry.failures.pop_front();
        }

        if !entry.quarantined && entry.failures.len() > QUARANTINE_THRESHOLD {
            entry.quarantined = true;
            tracing::warn!(worker_id, "Worker quarantined after repeated failures");
            return true;
        }
        false
    }

    /// Clear quarantine after a successful operator-initiated health probe.
    pub async fn clear_quarantine(&self, worker_id: &str) -> bool {
        let mut workers = self.workers.write().await;
        match workers.get_mut(worker_id) {
            Some(entry) => {
                entry.quarantined = false;
                entry.failures.clear();
                true
            }
            None => false,
        }
    }

    // ── Reaper sweep ─────────────────────────────────────────────────────

    /// Classify every entry, reporting workers that just died and purging
    /// dead entries past the retention window.
    pub async fn sweep_at(&self, now: Instant) -> SweepReport {
        let mut workers = self.workers.write().await;
        let mut report = SweepReport::default();

        for entry in workers.values_mut() {
            if entry.liveness_at(now) == Liveness::Dead && entry.dead_since.is_none() {
                entry.dead_since = Some(now);
                entry.in_flight.clear();
                report.newly_dead.push(entry.worker_id.clone());
            }
        }

        workers.retain(|id, entry| {
            let expired = entry
                .dead_since
                .is_some_and(|t| now.saturating_duration_since(t) > DEAD_RETENTION);
            if expired {
                report.purged.push(id.clone());
            }
            !expired
        });

        report
    }

    // ── Model catalog ────────────────────────────────────────────────────

    /// Every model reported loaded by a live (non-dead) worker.
    pub async fn known_models(&self) -> Vec<String> {
        let now = Instant::now();
        let workers = self.workers.read().await;
        let mut models: Vec<String> = workers
            .values()
            .filter(|e| e.liveness_at(now) != Liveness::Dead)
            .flat_map(|e| e.loaded_models.iter().cloned())
            .collect();
        models.sort();
        models.dedup();
        models
    }

    /// Whether any idle healthy worker has `model` resident. Drives the
    /// cold-start adjustment in admission time estimates.
    pub async fn model_resident_on_idle(&self, model: &str) -> bool {
        let now = Instant::now();
        let workers = self.workers.read().await;
        workers
            .values()
            .any(|e| e.is_dispatchable(now) && e.loaded_models.iter().any(|m| m == model))
    }

    /// Fleet-wide model overview for `GET /api/v1/models`.
    pub async fn model_overview(&self) -> Vec<ModelInfo> {
        let now = Instant::now();
        let workers = self.workers.read().await;

        let mut by_model: HashMap<String, ModelInfo> = HashMap::new();
        for entry in workers.values() {
            if entry.liveness_at(now) == Liveness::Dead {
                continue;
            }
            for model in &entry.loaded_models {
                let info = by_model.entry(model.clone()).or_insert_with(|| ModelInfo {
                    model: model.clone(),
                    capabilities: Vec::new(),
                    workers: 0,
                    resident_on_idle: false,
                });
                info.workers += 1;
                info.resident_on_idle |= entry.is_dispatchable(now);
                for cap in &entry.capabilities {
                    if !info.capabilities.contains(cap) {
                        info.capabilities.push(*cap);
                    }
                }
            }
        }

        let mut models: Vec<ModelInfo> = by_model.into_values().collect();
        models.sort_by(|a, b| a.model.cmp(&b.model));
        models
    }

    /// Current number of registered (non-purged) workers.
    pub async fn worker_count(&self) -> usize {
        self.workers.read().await.len()
    }

    /// Look up a worker's callback URL.
    pub async fn base_url_of(&self, worker_id: &str) -> Option<String> {
        self.workers
            .read()
            .await
            .get(worker_id)
            .map(|e| e.base_url.clone())
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn report(worker_id: &str) -> HeartbeatReport {
        HeartbeatReport {
            worker_id: worker_id.to_string(),
            url: format!("http://{worker_id}:9000"),
            status: "idle".to_string(),
            capabilities: vec![Capability::Image],
            loaded_models: vec!["sdxl".to_string()],
            gpu_memory_used_mb: Some(2048),
            uptime_seconds: Some(120),
            jobs_completed: Some(7),
        }
    }

    // -- Liveness classification --------------------------------------------

    #[test]
    fn heartbeat_gap_of_59s_is_healthy() {
        assert_eq!(Liveness::classify(Duration::from_secs(59)), Liveness::Healthy);
    }

    #[test]
    fn heartbeat_gap_of_61s_is_stale() {
        assert_eq!(Liveness::classify(Duration::from_secs(61)), Liveness::Stale);
    }

    #[test]
    fn heartbeat_gap_of_181s_is_dead() {
        assert_eq!(Liveness::classify(Duration::from_secs(181)), Liveness::Dead);
    }

    // -- Heartbeat upsert ---------------------------------------------------

    #[tokio::test]
    async fn heartbeat_registers_a_worker() {
        let registry = WorkerRegistry::new();
        registry.heartbeat(report("worker-gpu-0")).await;
        assert_eq!(registry.worker_count().await, 1);
    }

    #[tokio::test]
    async fn identical_heartbeats_are_idempotent() {
        let registry = WorkerRegistry::new();
        let now = Instant::now();
        registry.heartbeat_at(report("worker-gpu-0"), now).await;
        registry.heartbeat_at(report("worker-gpu-0"), now).await;

        assert_eq!(registry.worker_count().await, 1);
        let targets = registry.dispatch_targets_at(now).await;
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].snapshot.loaded_models, vec!["sdxl"]);
    }

    #[tokio::test]
    async fn targets_are_sorted_by_worker_id() {
        let registry = WorkerRegistry::new();
        let now = Instant::now();
        registry.heartbeat_at(report("worker-b"), now).await;
        registry.heartbeat_at(report("worker-a"), now).await;

        let targets = registry.dispatch_targets_at(now).await;
        let ids: Vec<&str> = targets
            .iter()
            .map(|t| t.snapshot.worker_id.as_str())
            .collect();
        assert_eq!(ids, vec!["worker-a", "worker-b"]);
    }

    // -- Dispatchability ----------------------------------------------------

    #[tokio::test]
    async fn busy_workers_are_not_dispatch_targets() {
        let registry = WorkerRegistry::new();
        let now = Instant::now();
        let mut busy = report("worker-gpu-0");
        busy.status = "busy".to_string();
        registry.heartbeat_at(busy, now).await;

        assert!(registry.dispatch_targets_at(now).await.is_empty());
    }

    #[tokio::test]
    async fn stale_workers_are_not_dispatch_targets() {
        let registry = WorkerRegistry::new();
        let now = Instant::now();
        registry.heartbeat_at(report("worker-gpu-0"), now).await;

        let later = now + Duration::from_secs(90);
        assert!(registry.dispatch_targets_at(later).await.is_empty());
    }

    #[tokio::test]
    async fn in_flight_jobs_remove_worker_from_pool() {
        let registry = WorkerRegistry::new();
        let now = Instant::now();
        registry.heartbeat_at(report("worker-gpu-0"), now).await;

        let job = JobId::new_v4();
        registry.mark_busy("worker-gpu-0", &[job]).await;
        assert!(registry.dispatch_targets_at(now).await.is_empty());

        registry.mark_idle("worker-gpu-0", &[job]).await;
        assert_eq!(registry.dispatch_targets_at(now).await.len(), 1);
    }

    // -- Sweep --------------------------------------------------------------

    #[tokio::test]
    async fn sweep_reports_newly_dead_exactly_once() {
        let registry = WorkerRegistry::new();
        let now = Instant::now();
        registry.heartbeat_at(report("worker-gpu-0"), now).await;

        let after_death = now + Duration::from_secs(181);
        let first = registry.sweep_at(after_death).await;
        assert_eq!(first.newly_dead, vec!["worker-gpu-0"]);

        let second = registry.sweep_at(after_death + Duration::from_secs(10)).await;
        assert!(second.newly_dead.is_empty());
    }

    #[tokio::test]
    async fn dead_entries_are_purged_after_retention() {
        let registry = WorkerRegistry::new();
        let now = Instant::now();
        registry.heartbeat_at(report("worker-gpu-0"), now).await;

        let death = now + Duration::from_secs(181);
        registry.sweep_at(death).await;
        // Still visible for forensics.
        assert_eq!(registry.worker_count().await, 1);

        let past_retention = death + DEAD_RETENTION + Duration::from_secs(1);
        let report = registry.sweep_at(past_retention).await;
        assert_eq!(report.purged, vec!["worker-gpu-0"]);
        assert_eq!(registry.worker_count().await, 0);
    }

    #[tokio::test]
    async fn heartbeat_revives_a_dead_worker() {
        let registry = WorkerRegistry::new();
        let now = Instant::now();
        registry.heartbeat_at(report("worker-gpu-0"), now).await;

        let death = now + Duration::from_secs(181);
        registry.sweep_at(death).await;

        registry.heartbeat_at(report("worker-gpu-0"), death).await;
        assert_eq!(registry.dispatch_targets_at(death).await.len(), 1);

        // And the revived entry is not purged later.
        let report = registry.sweep_at(death + DEAD_RETENTION).await;
        assert!(report.purged.is_empty());
    }

    // -- Quarantine ---------------------------------------------------------

    #[tokio::test]
    async fn fourth_failure_in_window_quarantines() {
        let registry = WorkerRegistry::new();
        let now = Instant::now();
        registry.heartbeat_at(report("worker-gpu-0"), now).await;

        for _ in 0..QUARANTINE_THRESHOLD {
            assert!(!registry.record_failure_at("worker-gpu-0", now).await);
        }
        assert!(registry.record_failure_at("worker-gpu-0", now).await);
        assert!(registry.dispatch_targets_at(now).await.is_empty());
    }

    #[tokio::test]
    async fn old_failures_fall_out_of_the_window() {
        let registry = WorkerRegistry::new();
        let now = Instant::now();
        registry.heartbeat_at(report("worker-gpu-0"), now).await;

        for _ in 0..QUARANTINE_THRESHOLD {
            registry.record_failure_at("worker-gpu-0", now).await;
        }
        let much_later = now + FAILURE_WINDOW + Duration::from_secs(1);
        assert!(!registry.record_failure_at("worker-gpu-0", much_later).await);
    }

    #[tokio::test]
    async fn clear_quarantine_restores_dispatchability() {
        let registry = WorkerRegistry::new();
        let now = Instant::now();
        registry.heartbeat_at(report("worker-gpu-0"), now).await;

        for _ in 0..=QUARANTINE_THRESHOLD {
            registry.record_failure_at("worker-gpu-0", now).await;
        }
        assert!(registry.dispatch_targets_at(now).await.is_empty());

        assert!(registry.clear_quarantine("worker-gpu-0").await);
        // Quarantine cleared, but the worker must heartbeat again to look
        // healthy; it already is within the window here.
        assert_eq!(registry.dispatch_targets_at(now).await.len(), 1);
    }

    // -- Model catalog ------------------------------------------------------

    #[tokio::test]
    async fn known_models_unions_loaded_models() {
        let registry = WorkerRegistry::new();
        let now = Instant::now();
        registry.heartbeat_at(report("worker-a"), now).await;
        let mut b = report("worker-b");
        b.loaded_models = vec!["flux-schnell".to_string(), "sdxl".to_string()];
        registry.heartbeat_at(b, now).await;

        assert_eq!(registry.known_models().await, vec!["flux-schnell", "sdxl"]);
    }

    #[tokio::test]
    async fn model_residency_requires_an_idle_worker() {
        let registry = WorkerRegistry::new();
        let mut busy = report("worker-gpu-0");
        busy.status = "busy".to_string();
        registry.heartbeat(busy).await;

        assert!(!registry.model_resident_on_idle("sdxl").await);
        assert_eq!(registry.known_models().await, vec!["sdxl"]);
    }
}
