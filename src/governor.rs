/// Periodic resource governance of running jobs.
///
/// One long-lived task samples every running job at a fixed interval,
/// folds the observation into the job's peak statistics and terminates
/// violators. Sampling reads /proc directly; a process that vanishes
/// between passes is a normal completion, not an error.
use crate::persist::JobStore;
use crate::registry::{JobEntry, JobRegistry};
use crate::transport::StatusSink;
use crate::types::{JobState, Limits, Result, RunguardError};
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::System;

/// Which ceiling a job breached, in enforcement precedence order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LimitBreach {
    Memory,
    Timeout,
    Cpu,
}

impl LimitBreach {
    pub fn terminal_state(&self) -> JobState {
        match self {
            LimitBreach::Memory => JobState::KilledMemory,
            LimitBreach::Timeout => JobState::KilledTimeout,
            LimitBreach::Cpu => JobState::KilledCpu,
        }
    }

    fn describe(&self, limits: &Limits) -> String {
        match self {
            LimitBreach::Memory => format!(
                "exceeded memory limit of {} MB",
                limits.memory_bytes / (1024 * 1024)
            ),
            LimitBreach::Timeout => format!(
                "exceeded execution time limit of {}s",
                limits.wall_clock.as_secs()
            ),
            LimitBreach::Cpu => format!("exceeded CPU limit of {}%", limits.cpu_percent),
        }
    }
}

/// One /proc observation of a live process.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcSample {
    pub rss_bytes: u64,
    pub cpu_time_seconds: f64,
}

/// The enforcement decision as a pure function of one observation.
///
/// Memory is checked first, then the wall clock, then CPU percentage; the
/// CPU ceiling only applies once cumulative CPU time has exceeded the grace
/// period, so short bursts are never punished.
pub fn enforcement_decision(
    rss_bytes: u64,
    cpu_percent: f64,
    cpu_time_seconds: f64,
    elapsed_wall: Duration,
    limits: &Limits,
) -> Option<LimitBreach> {
    if rss_bytes > limits.memory_bytes {
        return Some(LimitBreach::Memory);
    }
    if elapsed_wall > limits.wall_clock {
        return Some(LimitBreach::Timeout);
    }
    if cpu_percent > limits.cpu_percent && cpu_time_seconds > limits.cpu_grace.as_secs_f64() {
        return Some(LimitBreach::Cpu);
    }
    None
}

/// Read resident memory and cumulative CPU time for a pid. `None` means the
/// process is gone (or /proc is unreadable for it), which callers treat as
/// process exit.
pub fn sample_process(pid: u32) -> Option<ProcSample> {
    let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    let fields: Vec<&str> = stat.split_whitespace().collect();
    if fields.len() < 15 {
        return None;
    }
    // fields 13 and 14 are utime and stime in clock ticks
    let utime: u64 = fields[13].parse().ok()?;
    let stime: u64 = fields[14].parse().ok()?;
    let clock_ticks_per_sec = 100.0; // sysconf(_SC_CLK_TCK) is usually 100
    let cpu_time_seconds = (utime + stime) as f64 / clock_ticks_per_sec;

    let status = std::fs::read_to_string(format!("/proc/{}/status", pid)).ok()?;
    let mut rss_bytes = 0;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            if let Some(kb) = rest.split_whitespace().next().and_then(|v| v.parse::<u64>().ok()) {
                rss_bytes = kb * 1024;
            }
            break;
        }
    }

    Some(ProcSample {
        rss_bytes,
        cpu_time_seconds,
    })
}

fn process_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Process-wide counters and host snapshot exposed read-only.
#[derive(Clone, Debug)]
pub struct SystemStats {
    pub uptime_seconds: u64,
    pub total_jobs_started: u64,
    pub active_jobs: u64,
    pub system_memory_used_percent: f64,
    pub system_memory_available_mb: u64,
    pub system_cpu_percent: f32,
}

impl SystemStats {
    pub fn to_log_string(&self) -> String {
        format!(
            "uptime={}s started={} active={} sys_mem={:.1}% sys_cpu={:.1}%",
            self.uptime_seconds,
            self.total_jobs_started,
            self.active_jobs,
            self.system_memory_used_percent,
            self.system_cpu_percent
        )
    }
}

pub struct ResourceGovernor {
    registry: Arc<JobRegistry>,
    store: Arc<dyn JobStore>,
    status: Arc<dyn StatusSink>,
    limits: Limits,
    interval: Duration,
    kill_grace: Duration,
}

impl ResourceGovernor {
    pub fn new(
        registry: Arc<JobRegistry>,
        store: Arc<dyn JobStore>,
        status: Arc<dyn StatusSink>,
        limits: Limits,
        interval: Duration,
        kill_grace: Duration,
    ) -> Self {
        Self {
            registry,
            store,
            status,
            limits,
            interval,
            kill_grace,
        }
    }

    /// Spawn the recurring sampling loop. Runs until the returned handle is
    /// aborted or the runtime shuts down.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // the first tick fires immediately; skip it so jobs get one full
            // interval before their first sample
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.pass().await;
            }
        })
    }

    /// One sampling pass over every running job.
    pub async fn pass(&self) {
        for entry in self.registry.running_entries() {
            self.sample_entry(&entry).await;
        }
    }

    async fn sample_entry(&self, entry: &Arc<JobEntry>) {
        let (pid, started_at, prev_cpu_time) = entry.with_job(|job| {
            (
                job.pid,
                job.started_at,
                job.resources.cpu_time_seconds,
            )
        });

        let Some(pid) = pid else {
            return; // drain task hasn't registered the handle yet
        };

        let Some(sample) = sample_process(pid) else {
            // process exited between passes: normal completion
            if entry.try_transition(JobState::Completed).is_some() {
                self.update_store(entry.id(), JobState::Completed, None);
            }
            return;
        };

        let cpu_percent = ((sample.cpu_time_seconds - prev_cpu_time)
            / self.interval.as_secs_f64()
            * 100.0)
            .max(0.0);

        entry.update_resources(sample.rss_bytes, cpu_percent, sample.cpu_time_seconds);
        if let Err(e) = self
            .store
            .record_resource_sample(entry.id(), cpu_percent, sample.rss_bytes)
        {
            log::debug!("resource sample not persisted for {}: {}", entry.id(), e);
        }

        let elapsed_wall = started_at
            .map(|t| (chrono::Utc::now() - t).to_std().unwrap_or_default())
            .unwrap_or_default();

        if let Some(breach) = enforcement_decision(
            sample.rss_bytes,
            cpu_percent,
            sample.cpu_time_seconds,
            elapsed_wall,
            &self.limits,
        ) {
            log::warn!(
                "job {} {} (rss={} cpu={:.1}% cpu_time={:.1}s wall={:?})",
                entry.id(),
                breach.describe(&self.limits),
                sample.rss_bytes,
                cpu_percent,
                sample.cpu_time_seconds,
                elapsed_wall
            );
            let state = breach.terminal_state();
            if self.terminate(entry, state).await {
                self.update_store(entry.id(), state, Some(&breach.describe(&self.limits)));
                self.status.push_status(
                    entry.owner_id(),
                    &format!("Script {} was terminated: {}", entry.id(), breach.describe(&self.limits)),
                );
            }
        }
    }

    /// Force-terminate a job into `stopped`. Graceful first, SIGKILL after
    /// the grace period; the job is guaranteed terminal on return. Safe to
    /// call repeatedly and concurrently with the sampling loop: the per-job
    /// claim means only one caller ever signals the process.
    pub async fn force_kill(&self, job_id: &str) -> Result<()> {
        let entry = self
            .registry
            .get(job_id)
            .ok_or_else(|| RunguardError::Operator(format!("unknown job: {}", job_id)))?;

        if self.terminate(&entry, JobState::Stopped).await {
            self.update_store(job_id, JobState::Stopped, None);
            Ok(())
        } else {
            Err(RunguardError::Operator(format!(
                "job {} is already terminal",
                job_id
            )))
        }
    }

    /// Claim the terminal state, then signal outside the lock. Returns false
    /// when someone else already made the job terminal (no signal is sent).
    async fn terminate(&self, entry: &Arc<JobEntry>, state: JobState) -> bool {
        let Some(pid) = entry.claim_terminal(state) else {
            return false;
        };

        if let Some(pid) = pid {
            // the child leads its own process group; signal the group so the
            // whole tree goes down with it
            let target = Pid::from_raw(pid as i32);
            if let Err(e) = killpg(target, Signal::SIGTERM) {
                log::debug!("SIGTERM to group {} failed: {}", pid, e);
            }

            // bounded wait for graceful exit, then escalate
            let deadline = tokio::time::Instant::now() + self.kill_grace;
            while process_alive(pid) {
                if tokio::time::Instant::now() >= deadline {
                    if let Err(e) = killpg(target, Signal::SIGKILL) {
                        log::debug!("SIGKILL to group {} failed: {}", pid, e);
                    }
                    break;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }

        true
    }

    fn update_store(&self, job_id: &str, state: JobState, msg: Option<&str>) {
        if let Err(e) = self.store.update_status(job_id, state, msg) {
            log::warn!("status not persisted for {}: {}", job_id, e);
        }
    }

    /// Aggregate counters plus a host memory/CPU snapshot.
    pub fn system_stats(&self) -> SystemStats {
        let mut sys = System::new();
        sys.refresh_memory();
        sys.refresh_cpu();

        let total = sys.total_memory();
        let used = sys.used_memory();
        let used_percent = if total > 0 {
            used as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        SystemStats {
            uptime_seconds: self.registry.uptime().as_secs(),
            total_jobs_started: self.registry.total_started(),
            active_jobs: self.registry.active_count(),
            system_memory_used_percent: used_percent,
            system_memory_available_mb: sys.available_memory() / (1024 * 1024),
            system_cpu_percent: sys.global_cpu_info().cpu_usage(),
        }
    }
}
