/// Optional delegation to an external sandboxing tool.
///
/// SECURITY CAVEAT: this core performs no OS-level isolation of its own.
/// When firejail is absent the fallback merely caps wall-clock time via
/// `timeout`, and with sandboxing disabled the child runs with the full
/// ambient privileges of the host process. Callers must not assume
/// isolation they did not verify.
use crate::config::RunguardConfig;

/// Capability interface: rewrite an already-screened command into the form
/// actually handed to the shell.
pub trait Sandbox: Send + Sync {
    fn wrap(&self, command: &str) -> String;

    /// Human-readable name for logs and stats.
    fn name(&self) -> &'static str;
}

/// Pass-through used when sandboxing is disabled.
pub struct NoSandbox;

impl Sandbox for NoSandbox {
    fn wrap(&self, command: &str) -> String {
        command.to_string()
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

/// Wraps commands with firejail restrictions when the binary is present.
pub struct FirejailSandbox {
    memory_mb: u64,
    timeout_secs: u64,
}

impl Sandbox for FirejailSandbox {
    fn wrap(&self, command: &str) -> String {
        // firejail wants hh:mm:ss for --timeout
        let (h, m, s) = (
            self.timeout_secs / 3600,
            (self.timeout_secs % 3600) / 60,
            self.timeout_secs % 60,
        );
        format!(
            "firejail --quiet --noprofile --private-tmp --net=none --rlimit-as={}m --timeout={:02}:{:02}:{:02} {}",
            self.memory_mb, h, m, s, command
        )
    }

    fn name(&self) -> &'static str {
        "firejail"
    }
}

/// Last-resort fallback: at least bound wall-clock time with `timeout`.
pub struct TimeoutSandbox {
    timeout_secs: u64,
}

impl Sandbox for TimeoutSandbox {
    fn wrap(&self, command: &str) -> String {
        format!("timeout {} {}", self.timeout_secs, command)
    }

    fn name(&self) -> &'static str {
        "timeout"
    }
}

/// Pick the strongest wrapper available on this host.
pub fn detect(config: &RunguardConfig) -> Box<dyn Sandbox> {
    if !config.enable_sandbox {
        return Box::new(NoSandbox);
    }

    if which::which("firejail").is_ok() {
        log::info!("sandbox: delegating to firejail");
        Box::new(FirejailSandbox {
            memory_mb: config.memory_mb,
            timeout_secs: config.script_timeout_secs,
        })
    } else if which::which("timeout").is_ok() {
        log::warn!("sandbox: firejail not found, falling back to bare `timeout`");
        Box::new(TimeoutSandbox {
            timeout_secs: config.script_timeout_secs,
        })
    } else {
        log::warn!("sandbox: no wrapper available, running with ambient privileges");
        Box::new(NoSandbox)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_sandbox_is_identity() {
        assert_eq!(NoSandbox.wrap("python3 a.py"), "python3 a.py");
    }

    #[test]
    fn timeout_fallback_prefixes_command() {
        let sandbox = TimeoutSandbox { timeout_secs: 3600 };
        assert_eq!(sandbox.wrap("bash run.sh"), "timeout 3600 bash run.sh");
    }

    #[test]
    fn firejail_carries_limits() {
        let sandbox = FirejailSandbox {
            memory_mb: 512,
            timeout_secs: 3600,
        };
        let wrapped = sandbox.wrap("python3 a.py");
        assert!(wrapped.starts_with("firejail "));
        assert!(wrapped.contains("--rlimit-as=512m"));
        assert!(wrapped.ends_with("python3 a.py"));
    }
}
