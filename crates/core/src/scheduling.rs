//! Dispatch ordering, model affinity, batch assembly, and wait estimation.
//!
//! The dispatcher loop in the API crate feeds snapshots of the queued
//! backlog and one worker into [`select_job`] / [`assemble_batch`] each tick.
//! Keeping the selection rules here, free of I/O, is what makes the ordering
//! guarantees directly testable.

use crate::types::{Capability, JobId, Timestamp};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Plan-tier priorities. Higher dispatches first.
pub const PRIORITY_FREE: i32 = 0;
pub const PRIORITY_STARTER: i32 = 1;
pub const PRIORITY_PRO: i32 = 2;
pub const PRIORITY_ADMIN: i32 = 3;

/// How many times a job may be passed over by an equal-priority affinity
/// match before the affinity rule is suspended for it.
pub const AFFINITY_STARVATION_LIMIT: u32 = 10;

/// Largest number of jobs co-dispatched as one batch.
pub const MAX_BATCH_SIZE: usize = 4;

/// Seconds added to the per-job timeout for the dispatch RPC deadline.
pub const DISPATCH_RPC_GRACE_SECS: u32 = 10;

/// Grace period past a job's deadline before the reaper fails it.
pub const REAPER_GRACE_SECS: u32 = 30;

/// Wait-estimate adjustment when the requested model must be loaded first.
pub const COLD_START_SECS: u32 = 30;

/// Wait-estimate adjustment when the model is already resident somewhere idle.
pub const WARM_START_SECS: u32 = 5;

/// Rough per-job execution time by capability, used for queue estimates.
pub fn capability_avg_seconds(capability: Capability) -> u32 {
    match capability {
        Capability::Image => 20,
        Capability::Video => 30,
        Capability::Text => 5,
        Capability::Audio => 10,
    }
}

/// Estimated seconds until a job at `queue_position` finishes waiting.
pub fn estimate_seconds(queue_position: i64, capability: Capability, model_resident: bool) -> u32 {
    let position = u32::try_from(queue_position.max(0)).unwrap_or(u32::MAX);
    let adjustment = if model_resident {
        WARM_START_SECS
    } else {
        COLD_START_SECS
    };
    position
        .saturating_mul(capability_avg_seconds(capability))
        .saturating_add(adjustment)
}

// ---------------------------------------------------------------------------
// Batch key
// ---------------------------------------------------------------------------

/// Jobs with identical batch keys may be co-executed on one worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchKey {
    pub engine: String,
    pub model: String,
    pub resolution: String,
    pub steps: u32,
    pub precision: String,
}

/// Derive the batch key from a job's raw parameter blob.
///
/// Only image jobs batch; other capabilities return `None` and always
/// dispatch singly. The params have already passed admission validation, so
/// defaults here mirror the validator's.
pub fn batch_key_from_params(
    capability: Capability,
    params: &serde_json::Value,
) -> Option<BatchKey> {
    if capability != Capability::Image {
        return None;
    }
    let model = params.get("model")?.as_str()?;
    Some(BatchKey {
        engine: "comfyui".to_string(),
        model: model.to_string(),
        resolution: params
            .get("resolution")
            .and_then(|v| v.as_str())
            .unwrap_or("1024x1024")
            .to_string(),
        steps: params
            .get("steps")
            .and_then(|v| v.as_u64())
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(20),
        precision: params
            .get("precision")
            .and_then(|v| v.as_str())
            .unwrap_or("fp16")
            .to_string(),
    })
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// The dispatcher's view of one queued job.
#[derive(Debug, Clone)]
pub struct QueuedJobView {
    pub id: JobId,
    pub priority: i32,
    pub queued_at: Timestamp,
    pub capability: Capability,
    /// The model the job requests, when the capability takes one.
    pub model: Option<String>,
    /// Present only for batchable capabilities.
    pub batch_key: Option<BatchKey>,
    /// Times this job has been displaced by an equal-priority affinity match.
    pub passed_over: u32,
}

/// The dispatcher's view of one idle worker.
#[derive(Debug, Clone)]
pub struct WorkerSnapshot {
    pub worker_id: String,
    pub capabilities: Vec<Capability>,
    pub loaded_models: Vec<String>,
}

impl WorkerSnapshot {
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn has_loaded(&self, model: &str) -> bool {
        self.loaded_models.iter().any(|m| m == model)
    }
}

/// The outcome of one selection: the chosen job plus the equal-priority jobs
/// it displaced via affinity (their starvation counters must be bumped).
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub job: JobId,
    pub displaced: Vec<JobId>,
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// Queue order: priority desc, queued_at asc, then id asc so runs are
/// reproducible when timestamps collide.
fn queue_order(a: &QueuedJobView, b: &QueuedJobView) -> std::cmp::Ordering {
    b.priority
        .cmp(&a.priority)
        .then(a.queued_at.cmp(&b.queued_at))
        .then(a.id.cmp(&b.id))
}

/// Pick the job this worker should run next, or `None` if nothing matches.
///
/// Two passes over the backlog:
/// 1. *Affinity*: the best-ordered job whose model the worker already has
///    loaded.
/// 2. *Priority*: the best-ordered job the worker can execute at all.
///
/// The affinity winner is used unless it would displace an equal-priority
/// FIFO candidate that has already been passed over
/// [`AFFINITY_STARVATION_LIMIT`] times.
pub fn select_job(worker: &WorkerSnapshot, backlog: &[QueuedJobView]) -> Option<Selection> {
    let eligible: Vec<&QueuedJobView> = {
        let mut jobs: Vec<&QueuedJobView> = backlog
            .iter()
            .filter(|j| worker.supports(j.capability))
            .collect();
        jobs.sort_by(|a, b| queue_order(a, b));
        jobs
    };

    let fifo = *eligible.first()?;

    let affinity = eligible
        .iter()
        .copied()
        .find(|j| j.model.as_deref().is_some_and(|m| worker.has_loaded(m)));

    // Affinity may reorder work only within the head priority level; a
    // loaded model never outranks a higher-priority job.
    let chosen = match affinity {
        Some(aff)
            if aff.priority == fifo.priority
                && fifo.passed_over < AFFINITY_STARVATION_LIMIT =>
        {
            aff
        }
        _ => fifo,
    };

    // Everything ordered ahead of the chosen job at its priority level was
    // displaced by affinity and accrues a starvation tick.
    let displaced = if chosen.id == fifo.id {
        Vec::new()
    } else {
        eligible
            .iter()
            .take_while(|j| j.id != chosen.id)
            .filter(|j| j.priority == chosen.priority)
            .map(|j| j.id)
            .collect()
    };

    Some(Selection {
        job: chosen.id,
        displaced,
    })
}

/// Gather up to [`MAX_BATCH_SIZE`] queued jobs sharing the primary's batch
/// key, the primary included, ordered by queue position. Returns just the
/// primary when fewer than two jobs share the key.
pub fn assemble_batch(backlog: &[QueuedJobView], primary: JobId) -> Vec<JobId> {
    let Some(primary_job) = backlog.iter().find(|j| j.id == primary) else {
        return vec![primary];
    };
    let Some(key) = &primary_job.batch_key else {
        return vec![primary];
    };

    let mut members: Vec<&QueuedJobView> = backlog
        .iter()
        .filter(|j| j.batch_key.as_ref() == Some(key))
        .collect();
    members.sort_by(|a, b| queue_order(a, b));

    if members.len() < 2 {
        return vec![primary];
    }

    let mut ids: Vec<JobId> = vec![primary];
    ids.extend(
        members
            .iter()
            .map(|j| j.id)
            .filter(|id| *id != primary)
            .take(MAX_BATCH_SIZE - 1),
    );
    ids
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
