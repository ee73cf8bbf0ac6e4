/// runguard: supervised execution of user-submitted scripts
///
/// Accepts a script, identifies its language, screens it against a security
/// deny-list, runs it as a governed child process and streams output to a
/// per-job log. The `run` subcommand drives the whole pipeline; `scan` and
/// `detect` expose the screening stages on their own.
use anyhow::Result;
use clap::Parser;
use runguard::cli::{Cli, Commands};
use runguard::config::RunguardConfig;
use runguard::governor::ResourceGovernor;
use runguard::persist::{JobStore, JsonFileStore};
use runguard::registry::JobRegistry;
use runguard::screen::ContentScreen;
use runguard::supervisor::{Caller, ProcessSupervisor};
use runguard::transport::LogStatusSink;
use runguard::types::JobState;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let mut config = RunguardConfig::load(&cli.config)?;

    match cli.command {
        Commands::Detect { file } => {
            let source = std::fs::read_to_string(&file)?;
            println!("{}", runguard::language::detect(&source).as_str());
            Ok(())
        }

        Commands::Scan { file } => {
            let source = std::fs::read_to_string(&file)?;
            let lang = runguard::language::detect(&source);
            let screen = ContentScreen::new(&config);
            let verdict = screen.scan(&source, lang);

            if verdict.safe {
                println!("safe ({})", lang.as_str());
                Ok(())
            } else {
                println!("unsafe ({})", lang.as_str());
                for violation in &verdict.violations {
                    println!("  - {}", violation);
                }
                std::process::exit(1);
            }
        }

        Commands::Run {
            file,
            command,
            owner,
            mem,
            cpu,
            timeout,
            lines,
        } => {
            if let Some(mem) = mem {
                config.memory_mb = mem;
            }
            if let Some(cpu) = cpu {
                config.cpu_percent = cpu;
            }
            if let Some(timeout) = timeout {
                config.script_timeout_secs = timeout;
            }

            let source = std::fs::read_to_string(&file)?;
            run_supervised(config, &owner, &source, command, lines).await
        }

        Commands::Stats => {
            let registry = Arc::new(JobRegistry::new());
            let store: Arc<dyn JobStore> = Arc::new(JsonFileStore::open(
                &config.scripts_dir.join("jobs.json"),
            )?);
            let governor = Arc::new(ResourceGovernor::new(
                registry,
                store,
                Arc::new(LogStatusSink),
                config.limits(),
                config.sampling_interval(),
                config.kill_grace(),
            ));
            let stats = governor.system_stats();
            println!("{}", stats.to_log_string());
            Ok(())
        }

        Commands::Backup { output } => {
            let source = config.scripts_dir.join("jobs.json");
            if !source.exists() {
                println!("No job store to back up at {}", source.display());
                return Ok(());
            }
            let target = output.unwrap_or_else(|| {
                config.scripts_dir.join(format!(
                    "jobs-backup-{}.json",
                    chrono::Utc::now().format("%Y%m%d-%H%M%S")
                ))
            });
            std::fs::copy(&source, &target)?;
            println!("Backed up job store to {}", target.display());
            Ok(())
        }

        Commands::Cleanup { days } => {
            let store = JsonFileStore::open(&config.scripts_dir.join("jobs.json"))?;
            let removed = store.cleanup_older_than(days)?;
            println!("Removed {} jobs older than {} days", removed, days);
            Ok(())
        }
    }
}

/// Drive one script through the full pipeline and wait for a terminal state.
async fn run_supervised(
    config: RunguardConfig,
    owner: &str,
    source: &str,
    command: Option<String>,
    lines: usize,
) -> Result<()> {
    let registry = Arc::new(JobRegistry::new());
    let store: Arc<dyn JobStore> =
        Arc::new(JsonFileStore::open(&config.scripts_dir.join("jobs.json"))?);
    let status = Arc::new(LogStatusSink);
    let sandbox: Arc<dyn runguard::sandbox::Sandbox> = runguard::sandbox::detect(&config).into();

    let supervisor = ProcessSupervisor::new(
        config.clone(),
        Arc::clone(&registry),
        Arc::clone(&store),
        status.clone(),
        sandbox,
    )?;
    let governor = Arc::new(ResourceGovernor::new(
        Arc::clone(&registry),
        store,
        status,
        config.limits(),
        config.sampling_interval(),
        config.kill_grace(),
    ));

    let job = supervisor.submit(owner, source)?;
    println!("Job {} ({})", job.id, job.language.as_str());

    let command = match command {
        Some(c) => c,
        None => supervisor
            .suggested_command(&job.id)?
            .ok_or_else(|| anyhow::anyhow!(
                "no default command for {}; pass one with --command",
                job.language.as_str()
            ))?,
    };
    supervisor.confirm_command(&job.id, Caller::Owner(owner), &command)?;
    println!("Command: {}", command);

    supervisor.start(&job.id).await?;
    let governor_task = Arc::clone(&governor).spawn();

    // poll until the drain task or the governor settles the job
    let final_state = loop {
        tokio::time::sleep(Duration::from_millis(250)).await;
        let state = registry
            .get(&job.id)
            .map(|e| e.snapshot().state)
            .unwrap_or(JobState::Error);
        if state.is_terminal() {
            break state;
        }
    };
    governor_task.abort();

    println!("Final state: {}", final_state.as_str());
    match supervisor.logs(&job.id, Caller::Owner(owner), lines)? {
        Some(logs) => println!("{}", logs),
        None => println!("(no logs yet)"),
    }

    if final_state == JobState::Completed {
        Ok(())
    } else {
        std::process::exit(1);
    }
}
