/// Process supervision: intake, launch, output draining and lifecycle
/// control for user-submitted scripts.
///
/// Each started job gets a dedicated drain task that owns the child's
/// output streams, appends them line-by-line to the job's log sink,
/// awaits process exit and settles the terminal state. Explicit stops and
/// governor kills claim the terminal slot first; the drain task's
/// natural-exit path never overwrites a terminal state someone else set.
use crate::config::RunguardConfig;
use crate::deps;
use crate::language;
use crate::logsink::LogSink;
use crate::persist::JobStore;
use crate::registry::{JobEntry, JobRegistry};
use crate::sandbox::Sandbox;
use crate::screen::ContentScreen;
use crate::store::ScriptStore;
use crate::transport::StatusSink;
use crate::types::{Job, JobState, Language, Result, RunguardError};
use chrono::Utc;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// Who is asking. Owners may only touch their own jobs; administrative
/// callers bypass the ownership check.
#[derive(Clone, Copy, Debug)]
pub enum Caller<'a> {
    Owner(&'a str),
    Admin,
}

impl Caller<'_> {
    fn may_access(&self, job_owner: &str) -> bool {
        match self {
            Caller::Owner(id) => *id == job_owner,
            Caller::Admin => true,
        }
    }
}

pub struct ProcessSupervisor {
    config: RunguardConfig,
    registry: Arc<JobRegistry>,
    screen: ContentScreen,
    scripts: ScriptStore,
    store: Arc<dyn JobStore>,
    status: Arc<dyn StatusSink>,
    sandbox: Arc<dyn Sandbox>,
}

impl ProcessSupervisor {
    pub fn new(
        config: RunguardConfig,
        registry: Arc<JobRegistry>,
        store: Arc<dyn JobStore>,
        status: Arc<dyn StatusSink>,
        sandbox: Arc<dyn Sandbox>,
    ) -> Result<Self> {
        let screen = ContentScreen::new(&config);
        let scripts = ScriptStore::new(&config.scripts_dir)?;
        Ok(Self {
            config,
            registry,
            screen,
            scripts,
            store,
            status,
            sandbox,
        })
    }

    /// Accept a submission: detect the language, screen the content, persist
    /// the source and register a new job. Rejections happen before any job
    /// exists; a rejected submission leaves no trace in the registry.
    pub fn submit(&self, owner_id: &str, source: &str) -> Result<Job> {
        let live = self.registry.live_count_for(owner_id);
        if live >= self.config.max_scripts_per_user {
            return Err(RunguardError::Operator(format!(
                "owner {} already has {} active scripts (limit {})",
                owner_id, live, self.config.max_scripts_per_user
            )));
        }

        let lang = language::detect(source);
        if lang == Language::Unknown {
            return Err(RunguardError::validation(vec![
                "could not detect script language (supported: python, c, cpp, java, shell)"
                    .to_string(),
            ]));
        }

        let verdict = self.screen.scan(source, lang);
        if !verdict.safe {
            return Err(RunguardError::validation(verdict.violations));
        }

        let id = self.scripts.generate_job_id(owner_id, source);
        let source_path = self.scripts.save(&id, source, lang)?;
        let sink = LogSink::for_job(&self.config.logs_dir, &id)?;

        let job = Job {
            id: id.clone(),
            owner_id: owner_id.to_string(),
            language: lang,
            source_path,
            command: None,
            state: JobState::Created,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            log_path: sink.path().to_path_buf(),
            resources: Default::default(),
            pid: None,
            error_message: None,
        };

        let entry = self.registry.insert(job)?;

        // durability is best-effort; the registry is the source of truth
        match self.store.create_job(&entry.snapshot()) {
            Ok(true) => {}
            Ok(false) => log::warn!("job {} already present in store", id),
            Err(e) => log::warn!("job {} not persisted: {}", id, e),
        }

        Ok(entry.snapshot())
    }

    /// Default execution command for a language, if one exists. Compiled
    /// languages need a command chain the command screen refuses, so the
    /// caller must supply their own (screened) build-and-run wrapper.
    pub fn suggested_command(&self, job_id: &str) -> Result<Option<String>> {
        let entry = self.entry(job_id)?;
        let job = entry.snapshot();
        let filename = job
            .source_path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_default();

        Ok(match job.language {
            Language::Python => Some(format!("python3 {}", filename)),
            Language::Shell => Some(format!("bash {}", filename)),
            _ => None,
        })
    }

    /// Attach the execution command to a job. Set-once: re-submission
    /// creates a new job, it never rewrites an old one. The command passes
    /// the same screen as submitted content.
    pub fn confirm_command(&self, job_id: &str, caller: Caller<'_>, command: &str) -> Result<()> {
        let entry = self.entry(job_id)?;
        if !caller.may_access(entry.owner_id()) {
            return Err(RunguardError::Operator(format!(
                "job {} is not owned by the caller",
                job_id
            )));
        }

        let verdict = self.screen.sanitize_command(command);
        if !verdict.safe {
            return Err(RunguardError::validation(verdict.violations));
        }

        entry.with_job(|job| {
            if job.command.is_some() {
                Err(RunguardError::Operator(format!(
                    "job {} already has a command; submit the script again to change it",
                    job_id
                )))
            } else {
                job.command = Some(command.to_string());
                Ok(())
            }
        })
    }

    /// Launch the job's command and hand its output stream to a dedicated
    /// drain task. Returns once the task is spawned; launch failures are
    /// settled asynchronously as the `error` state.
    pub async fn start(&self, job_id: &str) -> Result<()> {
        let entry = self.entry(job_id)?;
        let job = entry.snapshot();

        let Some(command) = job.command.clone() else {
            return Err(RunguardError::Operator(format!(
                "job {} has no execution command yet",
                job_id
            )));
        };

        if entry.try_transition(JobState::Screening).is_none() {
            return Err(RunguardError::Operator(format!(
                "job {} was already started",
                job_id
            )));
        }
        self.update_store(&job.id, JobState::Screening, None);

        let sink = LogSink::for_job(&self.config.logs_dir, &job.id)?;
        // header goes in before any process output
        sink.write_header(&command).await?;

        let packages = if job.language == Language::Python && self.config.enable_auto_install {
            std::fs::read_to_string(&job.source_path)
                .map(|source| deps::declared_packages(&source))
                .unwrap_or_default()
        } else {
            Vec::new()
        };

        let workdir = self.scripts.workdir_for(&job.source_path)?;
        let wrapped = self.sandbox.wrap(&command);

        let ctx = DrainContext {
            entry: Arc::clone(&entry),
            sink,
            store: Arc::clone(&self.store),
            status: Arc::clone(&self.status),
            command: wrapped,
            workdir,
            packages,
        };
        tokio::spawn(ctx.run());

        Ok(())
    }

    /// Signal graceful termination and mark the job `stopped`. Idempotent:
    /// stopping an unknown or already-terminal job is an operator error with
    /// no state change. Does not wait for the OS-level exit; the drain task
    /// observes it and leaves the `stopped` state in place.
    pub fn stop(&self, job_id: &str, caller: Caller<'_>) -> Result<()> {
        let entry = self.entry(job_id)?;
        if !caller.may_access(entry.owner_id()) {
            return Err(RunguardError::Operator(format!(
                "job {} is not owned by the caller",
                job_id
            )));
        }

        let Some(pid) = entry.claim_terminal(JobState::Stopped) else {
            return Err(RunguardError::Operator(format!(
                "job {} is already finished",
                job_id
            )));
        };

        if let Some(pid) = pid {
            // the child is its own group leader; signal the whole group
            if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                log::debug!("SIGTERM to group {} failed: {}", pid, e);
            }
        }

        self.update_store(job_id, JobState::Stopped, None);
        Ok(())
    }

    /// Last `max_lines` lines of the job's log sink. `Ok(None)` means the
    /// sink has not been created yet ("no logs yet"); logs of terminal jobs
    /// remain retrievable.
    pub fn logs(&self, job_id: &str, caller: Caller<'_>, max_lines: usize) -> Result<Option<String>> {
        let entry = self.entry(job_id)?;
        if !caller.may_access(entry.owner_id()) {
            return Err(RunguardError::Operator(format!(
                "job {} is not owned by the caller",
                job_id
            )));
        }

        let sink = LogSink::for_job(&self.config.logs_dir, job_id)?;
        sink.tail(max_lines)
    }

    /// Snapshot of one owner's jobs.
    pub fn list_by_owner(&self, owner_id: &str) -> Vec<Job> {
        self.registry.list_by_owner(owner_id)
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    fn entry(&self, job_id: &str) -> Result<Arc<JobEntry>> {
        self.registry
            .get(job_id)
            .ok_or_else(|| RunguardError::Operator(format!("unknown job: {}", job_id)))
    }

    fn update_store(&self, job_id: &str, state: JobState, msg: Option<&str>) {
        if let Err(e) = self.store.update_status(job_id, state, msg) {
            log::warn!("status not persisted for {}: {}", job_id, e);
        }
    }
}

/// Everything the drain task owns for the lifetime of one run.
struct DrainContext {
    entry: Arc<JobEntry>,
    sink: LogSink,
    store: Arc<dyn JobStore>,
    status: Arc<dyn StatusSink>,
    command: String,
    workdir: std::path::PathBuf,
    packages: Vec<String>,
}

impl DrainContext {
    async fn run(self) {
        if let Err(e) = self.run_inner().await {
            log::error!("job {} drain task failed: {}", self.entry.id(), e);
            if self.entry.try_transition(JobState::Error).is_some() {
                self.entry
                    .with_job(|job| job.error_message = Some(e.to_string()));
                let _ = self.sink.append_line(&format!("Error: {}", e)).await;
                if let Err(e) = self
                    .store
                    .update_status(self.entry.id(), JobState::Error, Some(&e.to_string()))
                {
                    log::warn!("status not persisted for {}: {}", self.entry.id(), e);
                }
                self.status.push_status(
                    self.entry.owner_id(),
                    &format!("Script {} failed to run: {}", self.entry.id(), e),
                );
            }
        }
    }

    async fn run_inner(&self) -> Result<()> {
        // optional language-specific pre-step
        if !self.packages.is_empty() {
            if self.entry.try_transition(JobState::Installing).is_none() {
                return Ok(()); // stopped before we got going
            }
            deps::install_packages(&self.packages, &self.sink, &self.workdir).await?;
        }

        // The command line must stay free of shell syntax of our own: a bare
        // simple command lets the shell exec the workload in place, so the
        // registered pid is the process the governor samples and signals.
        // The child leads its own process group so group signals reach any
        // grandchildren too.
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .current_dir(&self.workdir)
            .process_group(0)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| RunguardError::Launch(format!("failed to start process: {}", e)))?;

        // register the handle before the first byte is read so concurrent
        // stop/monitor calls always see it
        let pid = child.id();
        self.entry.with_job(|job| job.pid = pid);

        if self.entry.try_transition(JobState::Running).is_none() {
            // someone stopped the job between launch and here; the claim
            // took no pid, so reap the child ourselves
            let _ = child.kill().await;
            let _ = child.wait().await;
            return Ok(());
        }
        if let Err(e) = self
            .store
            .update_status(self.entry.id(), JobState::Running, None)
        {
            log::warn!("status not persisted for {}: {}", self.entry.id(), e);
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RunguardError::Process("child stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| RunguardError::Process("child stderr not captured".to_string()))?;

        // both streams feed the same sink; appends are whole lines, so
        // interleaving never splits a line
        let err_sink = self.sink.clone();
        let err_drain = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if err_sink.append_line(&line).await.is_err() {
                    break;
                }
            }
        });

        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => self.sink.append_line(&line).await?,
                Ok(None) => break, // end of stream
                Err(e) => {
                    log::debug!("job {} output stream error: {}", self.entry.id(), e);
                    break;
                }
            }
        }
        let _ = err_drain.await;

        let exit = child
            .wait()
            .await
            .map_err(|e| RunguardError::Process(format!("wait failed: {}", e)))?;

        // non-zero exit is a normal completion, not a system error; but a
        // terminal state set by stop or the governor always takes precedence
        if self.entry.try_transition(JobState::Completed).is_some() {
            let code = exit.code();
            self.sink
                .append_line(&format!("Exited with code: {}", code.unwrap_or(-1)))
                .await?;
            if let Err(e) = self
                .store
                .update_status(self.entry.id(), JobState::Completed, None)
            {
                log::warn!("status not persisted for {}: {}", self.entry.id(), e);
            }
            self.status.push_status(
                self.entry.owner_id(),
                &format!(
                    "Script {} completed (exit code {})",
                    self.entry.id(),
                    code.unwrap_or(-1)
                ),
            );
        } else {
            // governor or stop settled the state; just clear the handle
            self.entry.with_job(|job| job.pid = None);
        }

        Ok(())
    }
}
