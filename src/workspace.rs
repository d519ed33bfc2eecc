//! Per-run workspace management.
//!
//! Every judging run gets a uniquely-named directory holding the
//! submitted source and per-case input. The directory is removed on every
//! exit path: `release` does it eagerly and logs failures without
//! propagating them, and dropping the handle covers panics.

use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tokio::fs;

use crate::types::JudgeRequest;

/// Creates workspaces under a configured root directory.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Create an exclusive directory for the run and write the submitted
    /// source into it, named by the language's file extension.
    pub async fn acquire(&self, request: &JudgeRequest) -> io::Result<Workspace> {
        fs::create_dir_all(&self.root).await?;

        let dir = tempfile::Builder::new()
            .prefix("judge_")
            .tempdir_in(&self.root)?;

        let source_file = request.language.source_file();
        fs::write(dir.path().join(&source_file), &request.source_code).await?;

        tracing::debug!(
            submission_id = %request.submission_id,
            path = %dir.path().display(),
            "Workspace acquired"
        );

        Ok(Workspace { dir, source_file })
    }
}

/// Exclusive on-disk scope for one judging run.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
    source_file: String,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Name of the source file within the workspace.
    pub fn source_file(&self) -> &str {
        &self.source_file
    }

    /// Write a test case's input where the run command reads it.
    pub async fn write_input(&self, input: &str) -> io::Result<()> {
        fs::write(self.path().join("input.txt"), input).await
    }

    /// Remove the workspace. Best-effort: a failed removal is logged and
    /// never surfaces as a judging failure.
    pub fn release(self) {
        let path = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove workspace");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CommandTemplate, LanguageProfile};
    use uuid::Uuid;

    fn request(source: &str) -> JudgeRequest {
        JudgeRequest {
            submission_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            problem_id: Uuid::new_v4(),
            source_code: source.to_string(),
            language: LanguageProfile {
                name: "cpp".into(),
                compile_command: Some(CommandTemplate::new("g++ -o {executable} {source}")),
                compile_timeout_secs: 30,
                run_command: CommandTemplate::new("./{executable}"),
                image: "gcc:14".into(),
                file_extension: ".cpp".into(),
            },
            test_cases: Vec::new(),
            time_limit_ms: 1000,
            memory_limit_mb: 256,
            total_score: 100,
        }
    }

    #[tokio::test]
    async fn acquire_writes_source_with_extension() {
        let root = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(root.path().to_path_buf());

        let ws = manager.acquire(&request("int main() {}")).await.unwrap();
        assert_eq!(ws.source_file(), "main.cpp");

        let written = fs::read_to_string(ws.path().join("main.cpp")).await.unwrap();
        assert_eq!(written, "int main() {}");
        ws.release();
    }

    #[tokio::test]
    async fn release_removes_directory() {
        let root = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(root.path().to_path_buf());

        let ws = manager.acquire(&request("x")).await.unwrap();
        let path = ws.path().to_path_buf();
        assert!(path.exists());

        ws.release();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn drop_removes_directory() {
        let root = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(root.path().to_path_buf());

        let path = {
            let ws = manager.acquire(&request("x")).await.unwrap();
            ws.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn write_input_lands_in_workspace() {
        let root = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(root.path().to_path_buf());

        let ws = manager.acquire(&request("x")).await.unwrap();
        ws.write_input("1 2\n").await.unwrap();

        let input = fs::read_to_string(ws.path().join("input.txt")).await.unwrap();
        assert_eq!(input, "1 2\n");
        ws.release();
    }
}
