/// Core types and structures for the runguard system
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Supported script languages, detected from submitted source text.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    C,
    Cpp,
    Java,
    Shell,
    Unknown,
}

impl Language {
    /// File extension used when persisting source of this language
    pub fn extension(&self) -> &'static str {
        match self {
            Language::Python => "py",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Java => "java",
            Language::Shell => "sh",
            Language::Unknown => "txt",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Java => "java",
            Language::Shell => "shell",
            Language::Unknown => "unknown",
        }
    }
}

/// Lifecycle state of a job.
///
/// Transitions are monotonic: `rank` only ever increases, and a terminal
/// state is never overwritten. The drain task, the governor and explicit
/// stop requests all race for the single terminal slot; first writer wins.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Created,
    Screening,
    Installing,
    Running,
    Completed,
    Stopped,
    KilledMemory,
    KilledCpu,
    KilledTimeout,
    Error,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed
                | JobState::Stopped
                | JobState::KilledMemory
                | JobState::KilledCpu
                | JobState::KilledTimeout
                | JobState::Error
        )
    }

    /// Position along the state machine; transitions must not decrease it.
    pub fn rank(&self) -> u8 {
        match self {
            JobState::Created => 0,
            JobState::Screening => 1,
            JobState::Installing => 2,
            JobState::Running => 3,
            _ => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Created => "created",
            JobState::Screening => "screening",
            JobState::Installing => "installing",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Stopped => "stopped",
            JobState::KilledMemory => "killed_memory",
            JobState::KilledCpu => "killed_cpu",
            JobState::KilledTimeout => "killed_timeout",
            JobState::Error => "error",
        }
    }
}

/// Latest resource observation for a running job. Peaks are monotone
/// non-decreasing while the job is running.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct ResourceSample {
    /// Peak resident memory in bytes
    pub peak_memory_bytes: u64,
    /// Peak instantaneous CPU percentage
    pub peak_cpu_percent: f64,
    /// Cumulative CPU time in seconds (user + system)
    pub cpu_time_seconds: f64,
}

/// One user-submitted script plus its chosen execution command, tracked
/// through its run. The central entity of the registry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    /// Opaque unique identifier, derived from owner + content + submission time
    pub id: String,
    /// Identifier of the submitting principal
    pub owner_id: String,
    pub language: Language,
    /// Location of the persisted source text; immutable once written
    pub source_path: PathBuf,
    /// Shell command line used to build/run the source; set at most once
    pub command: Option<String>,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Append-only output destination for this job
    pub log_path: PathBuf,
    pub resources: ResourceSample,
    /// PID of the live child process while running
    pub pid: Option<u32>,
    /// Captured message for jobs that ended in `error`
    pub error_message: Option<String>,
}

/// Configured resource ceilings enforced by the governor.
#[derive(Clone, Copy, Debug)]
pub struct Limits {
    /// Resident memory ceiling in bytes
    pub memory_bytes: u64,
    /// Instantaneous CPU percentage ceiling
    pub cpu_percent: f64,
    /// Cumulative CPU time a job may burn before the CPU ceiling applies
    pub cpu_grace: Duration,
    /// Wall-clock execution ceiling
    pub wall_clock: Duration,
}

/// Custom error types for runguard
#[derive(Error, Debug)]
pub enum RunguardError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Submitted content or command failed the security screen
    #[error("validation failed: {}", reasons.join("; "))]
    Validation { reasons: Vec<String> },

    /// Child process could not be launched
    #[error("launch error: {0}")]
    Launch(String),

    /// Caller error: unknown job, wrong owner, already-terminal job, ...
    #[error("{0}")]
    Operator(String),

    #[error("Process error: {0}")]
    Process(String),
}

impl RunguardError {
    pub fn validation(reasons: Vec<String>) -> Self {
        RunguardError::Validation { reasons }
    }
}

/// Result type alias for runguard operations
pub type Result<T> = std::result::Result<T, RunguardError>;
