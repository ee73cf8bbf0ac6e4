/// Configuration loading for the runguard core.
///
/// Defaults mirror the deployed service; a `config.json` next to the binary
/// (or passed via `--config`) overrides individual fields. Unknown fields are
/// ignored so older config files keep working.
use crate::types::{Limits, Result, RunguardError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RunguardConfig {
    /// Directory where submitted source files are persisted
    pub scripts_dir: PathBuf,
    /// Directory holding per-job log sinks
    pub logs_dir: PathBuf,
    /// Maximum accepted script size in bytes
    pub max_script_size: usize,
    /// Maximum number of non-terminal jobs a single owner may hold
    pub max_scripts_per_user: usize,
    /// Wall-clock execution ceiling in seconds
    pub script_timeout_secs: u64,
    /// Governor sampling interval in seconds
    pub sampling_interval_secs: u64,
    /// Resident memory ceiling in MB
    pub memory_mb: u64,
    /// Instantaneous CPU percentage ceiling
    pub cpu_percent: f64,
    /// Cumulative CPU seconds exempt from the CPU ceiling
    pub cpu_grace_secs: u64,
    /// Seconds to wait for graceful exit before SIGKILL
    pub kill_grace_secs: u64,
    /// Per-language compile timeouts in seconds. The core never compiles
    /// anything itself; the values are passed through for callers building
    /// their own screened build-and-run wrappers for compiled languages.
    pub compile_timeouts: HashMap<String, u64>,
    /// Command substrings refused everywhere (case-insensitive)
    pub blocked_commands: Vec<String>,
    /// Python modules refused at import screening
    pub blocked_imports: Vec<String>,
    /// Wrap execution with an external sandbox tool when available
    pub enable_sandbox: bool,
    /// Resolve allow-listed Python dependencies before first run
    pub enable_auto_install: bool,
    /// Days of terminal-job history kept by the persistence collaborator
    pub log_retention_days: u64,
}

impl Default for RunguardConfig {
    fn default() -> Self {
        Self {
            scripts_dir: PathBuf::from("user_scripts"),
            logs_dir: PathBuf::from("script_logs"),
            max_script_size: 100_000,
            max_scripts_per_user: 10,
            script_timeout_secs: 3600,
            sampling_interval_secs: 5,
            memory_mb: 512,
            cpu_percent: 50.0,
            cpu_grace_secs: 60,
            kill_grace_secs: 5,
            compile_timeouts: HashMap::from([
                ("c".to_string(), 30),
                ("cpp".to_string(), 60),
                ("java".to_string(), 60),
            ]),
            blocked_commands: [
                "rm", "rmdir", "del", "format", "fdisk", "wget", "curl", "nc", "netcat", "ssh",
                "sudo", "su", "chmod", "chown",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            blocked_imports: [
                "subprocess",
                "os.system",
                "eval",
                "exec",
                "input",
                "raw_input",
                "__import__",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            enable_sandbox: true,
            enable_auto_install: true,
            log_retention_days: 7,
        }
    }
}

impl RunguardConfig {
    /// Load configuration from a JSON file, falling back to defaults when the
    /// file does not exist. A present-but-malformed file is an error rather
    /// than a silent fallback.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!("config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| RunguardError::Config(format!("failed to parse {}: {}", path.display(), e)))
    }

    /// Resource ceilings in the form the governor consumes
    pub fn limits(&self) -> Limits {
        Limits {
            memory_bytes: self.memory_mb * 1024 * 1024,
            cpu_percent: self.cpu_percent,
            cpu_grace: Duration::from_secs(self.cpu_grace_secs),
            wall_clock: Duration::from_secs(self.script_timeout_secs),
        }
    }

    pub fn sampling_interval(&self) -> Duration {
        Duration::from_secs(self.sampling_interval_secs.max(1))
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.kill_grace_secs)
    }
}
