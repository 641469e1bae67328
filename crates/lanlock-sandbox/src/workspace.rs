//! Per-job throwaway workspaces

use lanlock_api::Language;
use lanlock_util::JobId;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A job's working directory, removed when dropped.
///
/// Removal runs on every exit path, including panics and timed-out runs, so
/// a busy exam day cannot fill the temp partition with dead workspaces.
pub struct Workspace {
    job_id: JobId,
    dir: PathBuf,
    source_path: PathBuf,
    binary_path: PathBuf,
}

impl Workspace {
    /// Create a workspace under `base` (or the system temp dir) and write
    /// the submitted source into it.
    pub fn create(base: Option<&Path>, language: Language, source: &str) -> io::Result<Self> {
        let job_id = JobId::new();
        let dir = base
            .map(Path::to_path_buf)
            .unwrap_or_else(std::env::temp_dir)
            .join(format!("lanlock-job-{job_id}"));
        fs::create_dir_all(&dir)?;

        let source_path = dir.join(format!("main.{}", language.extension()));
        fs::write(&source_path, source)?;
        let binary_path = dir.join("main.bin");

        debug!(job_id = %job_id, dir = %dir.display(), "Workspace created");
        Ok(Self {
            job_id,
            dir,
            source_path,
            binary_path,
        })
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.dir) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(job_id = %self.job_id, error = %e, "Failed to remove workspace");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_removed_on_drop() {
        let base = tempfile::tempdir().unwrap();
        let dir = {
            let ws = Workspace::create(Some(base.path()), Language::C, "int main(){}").unwrap();
            assert!(ws.source_path().exists());
            ws.dir().to_path_buf()
        };
        assert!(!dir.exists());
    }

    #[test]
    fn source_extension_follows_language() {
        let base = tempfile::tempdir().unwrap();
        let ws = Workspace::create(Some(base.path()), Language::Cpp, "int main(){}").unwrap();
        assert_eq!(
            ws.source_path().extension().and_then(|e| e.to_str()),
            Some("cpp")
        );
    }
}
