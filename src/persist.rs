/// Persistence collaborator boundary.
///
/// The core calls these for durability but never depends on them succeeding;
/// every call site treats failures as best-effort and logs them. The bundled
/// implementations are a JSON file store (single-host deployments) and an
/// in-memory store for tests.
use crate::types::{Job, JobState, Result, RunguardError};
use chrono::Utc;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait JobStore: Send + Sync {
    /// Record a new job; returns false when the id already exists.
    fn create_job(&self, job: &Job) -> Result<bool>;

    fn update_status(&self, job_id: &str, state: JobState, error_msg: Option<&str>) -> Result<()>;

    fn get_job(&self, job_id: &str) -> Result<Option<Job>>;

    fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Job>>;

    fn record_resource_sample(&self, job_id: &str, cpu_percent: f64, memory_bytes: u64)
        -> Result<()>;

    /// Drop terminal jobs that ended more than `days` days ago; returns the
    /// number removed.
    fn cleanup_older_than(&self, days: u64) -> Result<usize>;
}

/// JSON-file-backed store: the whole job map serialized to one file,
/// rewritten on every mutation. Fine for the handful of jobs a single host
/// governs; anything bigger belongs behind a real database.
pub struct JsonFileStore {
    path: PathBuf,
    jobs: Mutex<HashMap<String, Job>>,
}

impl JsonFileStore {
    pub fn open(path: &Path) -> Result<Self> {
        let jobs = if path.exists() {
            let content = fs::read_to_string(path)?;
            if content.trim().is_empty() {
                HashMap::new()
            } else {
                serde_json::from_str(&content).map_err(|e| {
                    RunguardError::Config(format!("failed to parse {}: {}", path.display(), e))
                })?
            }
        } else {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            HashMap::new()
        };

        Ok(Self {
            path: path.to_path_buf(),
            jobs: Mutex::new(jobs),
        })
    }

    fn flush(&self, jobs: &HashMap<String, Job>) -> Result<()> {
        let content = serde_json::to_string_pretty(jobs)
            .map_err(|e| RunguardError::Config(format!("failed to serialize job store: {}", e)))?;
        fs::write(&self.path, content)?;
        Ok(())
    }
}

impl JobStore for JsonFileStore {
    fn create_job(&self, job: &Job) -> Result<bool> {
        let mut jobs = self.jobs.lock().expect("store lock poisoned");
        if jobs.contains_key(&job.id) {
            return Ok(false);
        }
        jobs.insert(job.id.clone(), job.clone());
        self.flush(&jobs)?;
        Ok(true)
    }

    fn update_status(&self, job_id: &str, state: JobState, error_msg: Option<&str>) -> Result<()> {
        let mut jobs = self.jobs.lock().expect("store lock poisoned");
        if let Some(job) = jobs.get_mut(job_id) {
            job.state = state;
            if let Some(msg) = error_msg {
                job.error_message = Some(msg.to_string());
            }
            if state.is_terminal() && job.ended_at.is_none() {
                job.ended_at = Some(Utc::now());
            }
            self.flush(&jobs)?;
        }
        Ok(())
    }

    fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        Ok(self
            .jobs
            .lock()
            .expect("store lock poisoned")
            .get(job_id)
            .cloned())
    }

    fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Job>> {
        Ok(self
            .jobs
            .lock()
            .expect("store lock poisoned")
            .values()
            .filter(|j| j.owner_id == owner_id)
            .cloned()
            .collect())
    }

    fn record_resource_sample(
        &self,
        job_id: &str,
        cpu_percent: f64,
        memory_bytes: u64,
    ) -> Result<()> {
        let mut jobs = self.jobs.lock().expect("store lock poisoned");
        if let Some(job) = jobs.get_mut(job_id) {
            job.resources.peak_cpu_percent = job.resources.peak_cpu_percent.max(cpu_percent);
            job.resources.peak_memory_bytes = job.resources.peak_memory_bytes.max(memory_bytes);
            self.flush(&jobs)?;
        }
        Ok(())
    }

    fn cleanup_older_than(&self, days: u64) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::days(days as i64);
        let mut jobs = self.jobs.lock().expect("store lock poisoned");
        let before = jobs.len();
        jobs.retain(|_, j| {
            !j.state.is_terminal() || j.ended_at.map(|t| t > cutoff).unwrap_or(true)
        });
        let removed = before - jobs.len();
        if removed > 0 {
            self.flush(&jobs)?;
        }
        Ok(removed)
    }
}

/// In-memory store for tests and for running without durability.
#[derive(Default)]
pub struct MemoryStore {
    jobs: Mutex<HashMap<String, Job>>,
}

impl JobStore for MemoryStore {
    fn create_job(&self, job: &Job) -> Result<bool> {
        let mut jobs = self.jobs.lock().expect("store lock poisoned");
        if jobs.contains_key(&job.id) {
            return Ok(false);
        }
        jobs.insert(job.id.clone(), job.clone());
        Ok(true)
    }

    fn update_status(&self, job_id: &str, state: JobState, error_msg: Option<&str>) -> Result<()> {
        let mut jobs = self.jobs.lock().expect("store lock poisoned");
        if let Some(job) = jobs.get_mut(job_id) {
            job.state = state;
            if let Some(msg) = error_msg {
                job.error_message = Some(msg.to_string());
            }
        }
        Ok(())
    }

    fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        Ok(self
            .jobs
            .lock()
            .expect("store lock poisoned")
            .get(job_id)
            .cloned())
    }

    fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Job>> {
        Ok(self
            .jobs
            .lock()
            .expect("store lock poisoned")
            .values()
            .filter(|j| j.owner_id == owner_id)
            .cloned()
            .collect())
    }

    fn record_resource_sample(
        &self,
        job_id: &str,
        cpu_percent: f64,
        memory_bytes: u64,
    ) -> Result<()> {
        let mut jobs = self.jobs.lock().expect("store lock poisoned");
        if let Some(job) = jobs.get_mut(job_id) {
            job.resources.peak_cpu_percent = job.resources.peak_cpu_percent.max(cpu_percent);
            job.resources.peak_memory_bytes = job.resources.peak_memory_bytes.max(memory_bytes);
        }
        Ok(())
    }

    fn cleanup_older_than(&self, days: u64) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::days(days as i64);
        let mut jobs = self.jobs.lock().expect("store lock poisoned");
        let before = jobs.len();
        jobs.retain(|_, j| {
            !j.state.is_terminal() || j.ended_at.map(|t| t > cutoff).unwrap_or(true)
        });
        Ok(before - jobs.len())
    }
}
