/// Shared registry of active jobs.
///
/// An explicit, injectable object passed by `Arc` to the supervisor and the
/// governor rather than process-wide state. The map itself sits behind a
/// short-lived `RwLock`; every job entry carries its own mutex so mutators
/// of different jobs never contend. No lock is held across an await point.
use crate::types::{Job, JobState, Result, RunguardError};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

struct JobSlot {
    job: Job,
    /// Whether this job currently contributes to the active count. Flipped
    /// inside the same critical section as the state transition so the
    /// counter moves exactly once per job.
    counted_active: bool,
}

/// A single registered job. All state/stat mutations go through the inner
/// mutex, which makes drain-task, governor and stop-request writes to the
/// same job atomic with respect to each other.
pub struct JobEntry {
    id: String,
    owner_id: String,
    slot: Mutex<JobSlot>,
    counters: Arc<Counters>,
}

#[derive(Default)]
struct Counters {
    total_started: AtomicU64,
    active: AtomicU64,
}

impl JobEntry {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Consistent point-in-time copy of the job.
    pub fn snapshot(&self) -> Job {
        self.slot.lock().expect("job lock poisoned").job.clone()
    }

    /// Run a closure against the job under its lock. The closure must not
    /// block; state transitions go through `try_transition` instead.
    pub fn with_job<R>(&self, f: impl FnOnce(&mut Job) -> R) -> R {
        let mut slot = self.slot.lock().expect("job lock poisoned");
        f(&mut slot.job)
    }

    /// Attempt a state transition. Returns the previous state on success and
    /// `None` when refused: transitions never leave a terminal state and
    /// never move backwards. Terminal writers race for one slot; the first
    /// one through this gate wins and later writers see `None`.
    ///
    /// Entering `Running` stamps `started_at` and bumps the started/active
    /// counters; entering any terminal state stamps `ended_at` and releases
    /// the active slot exactly once.
    pub fn try_transition(&self, to: JobState) -> Option<JobState> {
        let mut slot = self.slot.lock().expect("job lock poisoned");
        let from = slot.job.state;

        if from.is_terminal() || to.rank() < from.rank() || from == to {
            return None;
        }

        slot.job.state = to;
        if to == JobState::Running {
            slot.job.started_at = Some(Utc::now());
            self.counters.total_started.fetch_add(1, Ordering::SeqCst);
            self.counters.active.fetch_add(1, Ordering::SeqCst);
            slot.counted_active = true;
        }
        if to.is_terminal() {
            slot.job.ended_at = Some(Utc::now());
            slot.job.pid = None;
            if slot.counted_active {
                self.counters.active.fetch_sub(1, Ordering::SeqCst);
                slot.counted_active = false;
            }
        }

        Some(from)
    }

    /// Claim a terminal state and take the live pid in one critical section.
    /// Used by stop and by the governor so that at most one caller ever
    /// holds the pid to signal, and no signal is sent once terminal.
    pub fn claim_terminal(&self, to: JobState) -> Option<Option<u32>> {
        debug_assert!(to.is_terminal());
        let mut slot = self.slot.lock().expect("job lock poisoned");
        if slot.job.state.is_terminal() {
            return None;
        }

        let pid = slot.job.pid.take();
        slot.job.state = to;
        slot.job.ended_at = Some(Utc::now());
        if slot.counted_active {
            self.counters.active.fetch_sub(1, Ordering::SeqCst);
            slot.counted_active = false;
        }
        Some(pid)
    }

    /// Fold a fresh resource observation into the job's peaks. Peaks are
    /// monotone non-decreasing; cumulative CPU time only moves forward.
    pub fn update_resources(&self, rss_bytes: u64, cpu_percent: f64, cpu_time_seconds: f64) {
        let mut slot = self.slot.lock().expect("job lock poisoned");
        let res = &mut slot.job.resources;
        res.peak_memory_bytes = res.peak_memory_bytes.max(rss_bytes);
        res.peak_cpu_percent = res.peak_cpu_percent.max(cpu_percent);
        res.cpu_time_seconds = res.cpu_time_seconds.max(cpu_time_seconds);
    }
}

/// The injectable job registry plus its aggregate counters.
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, Arc<JobEntry>>>,
    counters: Arc<Counters>,
    booted_at: Instant,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            counters: Arc::new(Counters::default()),
            booted_at: Instant::now(),
        }
    }

    pub fn insert(&self, job: Job) -> Result<Arc<JobEntry>> {
        let entry = Arc::new(JobEntry {
            id: job.id.clone(),
            owner_id: job.owner_id.clone(),
            slot: Mutex::new(JobSlot {
                job,
                counted_active: false,
            }),
            counters: Arc::clone(&self.counters),
        });

        let mut jobs = self.jobs.write().expect("registry lock poisoned");
        if jobs.contains_key(entry.id()) {
            return Err(RunguardError::Operator(format!(
                "job id collision: {}",
                entry.id()
            )));
        }
        jobs.insert(entry.id().to_string(), Arc::clone(&entry));
        Ok(entry)
    }

    pub fn get(&self, job_id: &str) -> Option<Arc<JobEntry>> {
        self.jobs
            .read()
            .expect("registry lock poisoned")
            .get(job_id)
            .cloned()
    }

    /// Snapshot of one owner's jobs at a single consistent point in time.
    pub fn list_by_owner(&self, owner_id: &str) -> Vec<Job> {
        let jobs = self.jobs.read().expect("registry lock poisoned");
        let mut out: Vec<Job> = jobs
            .values()
            .filter(|e| e.owner_id() == owner_id)
            .map(|e| e.snapshot())
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out
    }

    /// Entries currently in `running`, for the governor's sampling pass.
    pub fn running_entries(&self) -> Vec<Arc<JobEntry>> {
        let jobs = self.jobs.read().expect("registry lock poisoned");
        jobs.values()
            .filter(|e| e.snapshot().state == JobState::Running)
            .cloned()
            .collect()
    }

    /// Number of non-terminal jobs an owner currently holds.
    pub fn live_count_for(&self, owner_id: &str) -> usize {
        let jobs = self.jobs.read().expect("registry lock poisoned");
        jobs.values()
            .filter(|e| e.owner_id() == owner_id && !e.snapshot().state.is_terminal())
            .count()
    }

    /// Drop terminal jobs from the active map. Permanent history belongs to
    /// the persistence collaborator, not this registry.
    pub fn purge_terminal(&self) -> usize {
        let mut jobs = self.jobs.write().expect("registry lock poisoned");
        let before = jobs.len();
        jobs.retain(|_, e| !e.snapshot().state.is_terminal());
        before - jobs.len()
    }

    /// Total jobs ever started; never decreases.
    pub fn total_started(&self) -> u64 {
        self.counters.total_started.load(Ordering::SeqCst)
    }

    pub fn active_count(&self) -> u64 {
        self.counters.active.load(Ordering::SeqCst)
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.booted_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Language, ResourceSample};
    use std::path::PathBuf;

    fn job(id: &str, owner: &str) -> Job {
        Job {
            id: id.to_string(),
            owner_id: owner.to_string(),
            language: Language::Python,
            source_path: PathBuf::from("/tmp/x.py"),
            command: Some("python3 x.py".to_string()),
            state: JobState::Created,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            log_path: PathBuf::from("/tmp/x.log"),
            resources: ResourceSample::default(),
            pid: None,
            error_message: None,
        }
    }

    #[test]
    fn transitions_are_monotonic() {
        let registry = JobRegistry::new();
        let entry = registry.insert(job("a", "alice")).unwrap();

        assert!(entry.try_transition(JobState::Screening).is_some());
        assert!(entry.try_transition(JobState::Running).is_some());
        // backward move refused
        assert!(entry.try_transition(JobState::Screening).is_none());
        assert!(entry.try_transition(JobState::Completed).is_some());
        // terminal is final
        assert!(entry.try_transition(JobState::Stopped).is_none());
        assert!(entry.try_transition(JobState::Running).is_none());
    }

    #[test]
    fn exactly_one_terminal_writer_wins() {
        let registry = JobRegistry::new();
        let entry = registry.insert(job("a", "alice")).unwrap();
        entry.try_transition(JobState::Running).unwrap();
        entry.with_job(|j| j.pid = Some(4242));

        let stop = entry.claim_terminal(JobState::Stopped);
        let kill = entry.claim_terminal(JobState::KilledMemory);

        // first claim takes the pid, second gets nothing to signal
        assert_eq!(stop, Some(Some(4242)));
        assert!(kill.is_none());
        assert_eq!(entry.snapshot().state, JobState::Stopped);
    }

    #[test]
    fn active_count_decrements_exactly_once() {
        let registry = JobRegistry::new();
        let entry = registry.insert(job("a", "alice")).unwrap();

        entry.try_transition(JobState::Running);
        assert_eq!(registry.active_count(), 1);
        assert_eq!(registry.total_started(), 1);

        entry.claim_terminal(JobState::Stopped);
        entry.claim_terminal(JobState::KilledCpu);
        entry.try_transition(JobState::Completed);
        assert_eq!(registry.active_count(), 0);
        assert_eq!(registry.total_started(), 1);
    }

    #[test]
    fn list_by_owner_is_scoped() {
        let registry = JobRegistry::new();
        registry.insert(job("a", "alice")).unwrap();
        registry.insert(job("b", "bob")).unwrap();
        registry.insert(job("c", "alice")).unwrap();

        let alice = registry.list_by_owner("alice");
        assert_eq!(alice.len(), 2);
        assert!(alice.iter().all(|j| j.owner_id == "alice"));
        assert_eq!(registry.list_by_owner("carol").len(), 0);
    }

    #[test]
    fn duplicate_id_refused() {
        let registry = JobRegistry::new();
        registry.insert(job("a", "alice")).unwrap();
        assert!(registry.insert(job("a", "bob")).is_err());
    }

    #[test]
    fn resource_peaks_are_monotone() {
        let registry = JobRegistry::new();
        let entry = registry.insert(job("a", "alice")).unwrap();

        entry.update_resources(100, 10.0, 1.0);
        entry.update_resources(50, 5.0, 2.0);

        let job = entry.snapshot();
        assert_eq!(job.resources.peak_memory_bytes, 100);
        assert_eq!(job.resources.peak_cpu_percent, 10.0);
        assert_eq!(job.resources.cpu_time_seconds, 2.0);
    }

    #[test]
    fn purge_drops_only_terminal_jobs() {
        let registry = JobRegistry::new();
        let a = registry.insert(job("a", "alice")).unwrap();
        registry.insert(job("b", "alice")).unwrap();

        a.try_transition(JobState::Running);
        a.try_transition(JobState::Completed);

        assert_eq!(registry.purge_terminal(), 1);
        assert!(registry.get("a").is_none());
        assert!(registry.get("b").is_some());
    }
}
