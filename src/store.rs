/// Persistence of submitted source text: a thin filesystem façade.
///
/// Each accepted script is written once under a content-addressed name and
/// never mutated afterwards. Job ids hash the owner, the content and the
/// submission instant (plus a random salt) so identical resubmissions and
/// identical scripts from different owners always get distinct ids.
use crate::types::{Language, Result, RunguardError};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

pub struct ScriptStore {
    scripts_dir: PathBuf,
}

impl ScriptStore {
    pub fn new(scripts_dir: &Path) -> Result<Self> {
        fs::create_dir_all(scripts_dir)?;
        Ok(Self {
            scripts_dir: scripts_dir.to_path_buf(),
        })
    }

    /// Derive a fresh job id. Ids are never reused: the hash input includes
    /// the submission timestamp in nanoseconds and a random salt.
    pub fn generate_job_id(&self, owner_id: &str, content: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(owner_id.as_bytes());
        hasher.update(content.as_bytes());
        hasher.update(chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0).to_le_bytes());
        hasher.update(fastrand::u64(..).to_le_bytes());
        let digest = hasher.finalize();

        digest
            .iter()
            .take(6)
            .map(|b| format!("{:02x}", b))
            .collect()
    }

    /// Write source to `<scripts_dir>/<job_id>.<ext>`. Shell scripts are made
    /// executable so shebang invocation works.
    pub fn save(&self, job_id: &str, content: &str, language: Language) -> Result<PathBuf> {
        let filename = format!("{}.{}", job_id, language.extension());
        let path = self.scripts_dir.join(filename);

        fs::write(&path, content)?;

        #[cfg(unix)]
        if language == Language::Shell {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
        }

        Ok(path)
    }

    /// Directory the child process runs in: the script's own directory.
    pub fn workdir_for(&self, source_path: &Path) -> Result<PathBuf> {
        source_path
            .parent()
            .map(|p| p.to_path_buf())
            .ok_or_else(|| RunguardError::Config("script path has no parent directory".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn ids_are_unique_for_identical_submissions() {
        let dir = TempDir::new().unwrap();
        let store = ScriptStore::new(dir.path()).unwrap();

        let a = store.generate_job_id("alice", "print(1)");
        let b = store.generate_job_id("alice", "print(1)");
        assert_ne!(a, b);

        let c = store.generate_job_id("bob", "print(1)");
        assert_ne!(a, c);
    }

    #[test]
    fn save_uses_language_extension() {
        let dir = TempDir::new().unwrap();
        let store = ScriptStore::new(dir.path()).unwrap();

        let path = store.save("abc123", "print(1)", Language::Python).unwrap();
        assert!(path.to_string_lossy().ends_with("abc123.py"));
        assert_eq!(fs::read_to_string(&path).unwrap(), "print(1)");
    }

    #[cfg(unix)]
    #[test]
    fn shell_scripts_are_executable() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let store = ScriptStore::new(dir.path()).unwrap();

        let path = store.save("abc123", "echo hi", Language::Shell).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }
}
