#![allow(dead_code)] // each test binary uses a different slice of the harness

use runguard::config::RunguardConfig;
use runguard::governor::ResourceGovernor;
use runguard::persist::MemoryStore;
use runguard::registry::JobRegistry;
use runguard::sandbox::NoSandbox;
use runguard::supervisor::ProcessSupervisor;
use runguard::transport::RecordingSink;
use runguard::types::JobState;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Everything a process-spawning test needs, with scratch directories that
/// live as long as the harness.
pub struct Harness {
    pub supervisor: ProcessSupervisor,
    pub governor: Arc<ResourceGovernor>,
    pub registry: Arc<JobRegistry>,
    pub sink: Arc<RecordingSink>,
    _scripts_dir: TempDir,
    _logs_dir: TempDir,
}

pub fn harness(mutate: impl FnOnce(&mut RunguardConfig)) -> Harness {
    let scripts_dir = TempDir::new().expect("scripts dir");
    let logs_dir = TempDir::new().expect("logs dir");

    let mut config = RunguardConfig::default();
    config.scripts_dir = scripts_dir.path().to_path_buf();
    config.logs_dir = logs_dir.path().to_path_buf();
    config.enable_sandbox = false;
    config.enable_auto_install = false;
    config.sampling_interval_secs = 1;
    config.kill_grace_secs = 2;
    mutate(&mut config);

    let registry = Arc::new(JobRegistry::new());
    let store = Arc::new(MemoryStore::default());
    let sink = Arc::new(RecordingSink::default());

    let supervisor = ProcessSupervisor::new(
        config.clone(),
        Arc::clone(&registry),
        store.clone(),
        sink.clone(),
        Arc::new(NoSandbox),
    )
    .expect("supervisor");

    let governor = Arc::new(ResourceGovernor::new(
        Arc::clone(&registry),
        store,
        sink.clone(),
        config.limits(),
        config.sampling_interval(),
        config.kill_grace(),
    ));

    Harness {
        supervisor,
        governor,
        registry,
        sink,
        _scripts_dir: scripts_dir,
        _logs_dir: logs_dir,
    }
}

/// Poll until the job reaches a terminal state or the deadline passes.
pub async fn wait_terminal(registry: &JobRegistry, job_id: &str, deadline: Duration) -> JobState {
    let start = Instant::now();
    loop {
        let state = registry
            .get(job_id)
            .map(|e| e.snapshot().state)
            .expect("job should stay registered");
        if state.is_terminal() {
            return state;
        }
        assert!(
            start.elapsed() < deadline,
            "job {} still {:?} after {:?}",
            job_id,
            state,
            deadline
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
