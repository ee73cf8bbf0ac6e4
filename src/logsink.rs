/// Append-only per-job log sink.
///
/// One sink per job, keyed by job id. The drain task is the only writer and
/// always writes whole lines, so concurrent readers never observe a partial
/// line. Appends survive drain-task restarts within the same run; the header
/// is written once at start and never overwritten.
use crate::types::Result;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

#[derive(Clone, Debug)]
pub struct LogSink {
    path: PathBuf,
}

impl LogSink {
    pub fn for_job(logs_dir: &Path, job_id: &str) -> Result<Self> {
        std::fs::create_dir_all(logs_dir)?;
        Ok(Self {
            path: logs_dir.join(format!("{}.log", job_id)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the run header before any process output.
    pub async fn write_header(&self, command: &str) -> Result<()> {
        let header = format!(
            "Started at: {}\nCommand: {}\n{}\n",
            chrono::Utc::now().to_rfc3339(),
            command,
            "-".repeat(50)
        );
        self.append(&header).await
    }

    /// Append text to the sink, creating it if needed.
    pub async fn append(&self, text: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(text.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Append a single line, adding the trailing newline.
    pub async fn append_line(&self, line: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }

    /// Last `max_lines` lines currently in the sink, in production order.
    /// Returns `None` when the sink has not been created yet, which callers
    /// must surface as "no logs yet" rather than an empty string; a zero-line
    /// request on an existing sink is an empty excerpt, not a missing sink.
    /// Never blocks on a still-running process.
    pub fn tail(&self, max_lines: usize) -> Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        if max_lines == 0 {
            return Ok(Some(String::new()));
        }

        let content = std::fs::read_to_string(&self.path)?;
        let lines: Vec<&str> = content.lines().collect();
        let start = lines.len().saturating_sub(max_lines);
        Ok(Some(lines[start..].join("\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn tail_returns_none_before_first_write() {
        let dir = TempDir::new().unwrap();
        let sink = LogSink::for_job(dir.path(), "job1").unwrap();
        assert!(sink.tail(10).unwrap().is_none());
    }

    #[tokio::test]
    async fn tail_returns_last_k_lines_in_order() {
        let dir = TempDir::new().unwrap();
        let sink = LogSink::for_job(dir.path(), "job1").unwrap();

        for i in 0..5 {
            sink.append_line(&format!("line {}", i)).await.unwrap();
        }

        let all = sink.tail(10).unwrap().unwrap();
        assert_eq!(all, "line 0\nline 1\nline 2\nline 3\nline 4");

        let last_two = sink.tail(2).unwrap().unwrap();
        assert_eq!(last_two, "line 3\nline 4");
    }

    #[tokio::test]
    async fn zero_line_tail_is_empty_excerpt_not_missing_sink() {
        let dir = TempDir::new().unwrap();
        let sink = LogSink::for_job(dir.path(), "job1").unwrap();

        assert!(sink.tail(0).unwrap().is_none());

        sink.append_line("output").await.unwrap();
        assert_eq!(sink.tail(0).unwrap(), Some(String::new()));
    }

    #[tokio::test]
    async fn header_is_appended_not_overwritten() {
        let dir = TempDir::new().unwrap();
        let sink = LogSink::for_job(dir.path(), "job1").unwrap();

        sink.write_header("python3 a.py").await.unwrap();
        sink.append_line("output").await.unwrap();
        sink.write_header("python3 a.py").await.unwrap();

        let content = sink.tail(100).unwrap().unwrap();
        assert!(content.contains("output"));
        assert_eq!(content.matches("Command: python3 a.py").count(), 2);
    }
}
