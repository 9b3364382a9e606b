//! Workspace file layout and storage backends.
//!
//! Every path is workspace-relative, `/`-separated and may not escape the
//! root. The layout is fixed:
//!
//! ```text
//! artifacts/screenshots/   artifacts/dom/   artifacts/diffs/
//! generated/               reports/
//! ```

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use action_primitives::{ActionError, ArtifactSink, DIFF_DIR, DOM_DIR, SCREENSHOT_DIR};
use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::errors::{TestkitError, TestkitResult};

pub const GENERATED_DIR: &str = "generated";
pub const REPORTS_DIR: &str = "reports";

/// Directories every workspace provides.
pub const LAYOUT: &[&str] = &[SCREENSHOT_DIR, DOM_DIR, DIFF_DIR, GENERATED_DIR, REPORTS_DIR];

#[async_trait]
pub trait Workspace: Send + Sync {
    async fn read(&self, path: &str) -> TestkitResult<Vec<u8>>;

    /// Creates or replaces `path`, creating parent directories.
    async fn write(&self, path: &str, bytes: &[u8]) -> TestkitResult<()>;

    async fn exists(&self, path: &str) -> TestkitResult<bool>;

    /// Appends to `path`, creating it if needed.
    async fn append(&self, path: &str, bytes: &[u8]) -> TestkitResult<()> {
        let mut current = if self.exists(path).await? {
            self.read(path).await?
        } else {
            Vec::new()
        };
        current.extend_from_slice(bytes);
        self.write(path, &current).await
    }
}

/// Checks a workspace-relative path and returns its normalized form.
pub fn normalize(path: &str) -> TestkitResult<String> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(TestkitError::invalid_path(path, "empty path"));
    }
    let mut parts = Vec::new();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => match part.to_str() {
                Some(part) => parts.push(part),
                None => return Err(TestkitError::invalid_path(path, "not valid UTF-8")),
            },
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(TestkitError::invalid_path(path, "parent components are not allowed"))
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(TestkitError::invalid_path(path, "absolute paths are not allowed"))
            }
        }
    }
    if parts.is_empty() {
        return Err(TestkitError::invalid_path(path, "empty path"));
    }
    Ok(parts.join("/"))
}

/// Workspace rooted in a local directory.
#[derive(Debug, Clone)]
pub struct FsWorkspace {
    root: PathBuf,
}

impl FsWorkspace {
    /// Opens `root`, creating it and the fixed layout.
    pub async fn create(root: impl Into<PathBuf>) -> TestkitResult<Self> {
        let root = root.into();
        for dir in LAYOUT {
            let full = root.join(dir);
            tokio::fs::create_dir_all(&full)
                .await
                .map_err(|err| TestkitError::io(full.display().to_string(), err))?;
        }
        debug!(root = %root.display(), "workspace ready");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> TestkitResult<PathBuf> {
        Ok(self.root.join(normalize(path)?))
    }

    async fn ensure_parent(&self, full: &Path) -> TestkitResult<()> {
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| TestkitError::io(parent.display().to_string(), err))?;
        }
        Ok(())
    }
}

#[async_trait]
impl Workspace for FsWorkspace {
    async fn read(&self, path: &str) -> TestkitResult<Vec<u8>> {
        let full = self.resolve(path)?;
        tokio::fs::read(&full)
            .await
            .map_err(|err| TestkitError::io(path, err))
    }

    async fn write(&self, path: &str, bytes: &[u8]) -> TestkitResult<()> {
        let full = self.resolve(path)?;
        self.ensure_parent(&full).await?;
        tokio::fs::write(&full, bytes)
            .await
            .map_err(|err| TestkitError::io(path, err))
    }

    async fn exists(&self, path: &str) -> TestkitResult<bool> {
        let full = self.resolve(path)?;
        tokio::fs::try_exists(&full)
            .await
            .map_err(|err| TestkitError::io(path, err))
    }

    async fn append(&self, path: &str, bytes: &[u8]) -> TestkitResult<()> {
        let full = self.resolve(path)?;
        self.ensure_parent(&full).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&full)
            .await
            .map_err(|err| TestkitError::io(path, err))?;
        file.write_all(bytes)
            .await
            .map_err(|err| TestkitError::io(path, err))?;
        file.flush().await.map_err(|err| TestkitError::io(path, err))
    }
}

/// Process-local workspace.
#[derive(Debug, Default)]
pub struct MemoryWorkspace {
    files: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.files.read().keys().cloned().collect()
    }
}

#[async_trait]
impl Workspace for MemoryWorkspace {
    async fn read(&self, path: &str) -> TestkitResult<Vec<u8>> {
        let key = normalize(path)?;
        self.files.read().get(&key).cloned().ok_or_else(|| {
            TestkitError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            )
        })
    }

    async fn write(&self, path: &str, bytes: &[u8]) -> TestkitResult<()> {
        let key = normalize(path)?;
        self.files.write().insert(key, bytes.to_vec());
        Ok(())
    }

    async fn exists(&self, path: &str) -> TestkitResult<bool> {
        let key = normalize(path)?;
        Ok(self.files.read().contains_key(&key))
    }

    async fn append(&self, path: &str, bytes: &[u8]) -> TestkitResult<()> {
        let key = normalize(path)?;
        self.files
            .write()
            .entry(key)
            .or_default()
            .extend_from_slice(bytes);
        Ok(())
    }
}

fn artifact_error(err: TestkitError) -> ActionError {
    ActionError::Artifact(err.to_string())
}

#[async_trait]
impl ArtifactSink for FsWorkspace {
    async fn store(&self, location: &str, bytes: &[u8]) -> Result<(), ActionError> {
        self.write(location, bytes).await.map_err(artifact_error)
    }

    async fn load(&self, location: &str) -> Result<Vec<u8>, ActionError> {
        self.read(location).await.map_err(artifact_error)
    }
}

#[async_trait]
impl ArtifactSink for MemoryWorkspace {
    async fn store(&self, location: &str, bytes: &[u8]) -> Result<(), ActionError> {
        self.write(location, bytes).await.map_err(artifact_error)
    }

    async fn load(&self, location: &str) -> Result<Vec<u8>, ActionError> {
        self.read(location).await.map_err(artifact_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn normalize_rejects_escapes() {
        assert_eq!(normalize("./reports/a.json").unwrap(), "reports/a.json");
        assert!(normalize("../etc/passwd").is_err());
        assert!(normalize("/etc/passwd").is_err());
        assert!(normalize("  ").is_err());
    }

    #[tokio::test]
    async fn fs_workspace_creates_layout_and_round_trips() {
        let dir = TempDir::new().unwrap();
        let workspace = FsWorkspace::create(dir.path()).await.unwrap();
        for sub in LAYOUT {
            assert!(dir.path().join(sub).is_dir(), "{sub} missing");
        }

        workspace.write("reports/run.json", b"{}").await.unwrap();
        assert!(workspace.exists("reports/run.json").await.unwrap());
        assert_eq!(workspace.read("reports/run.json").await.unwrap(), b"{}");

        workspace.append("generated/log.jsonl", b"a\n").await.unwrap();
        workspace.append("generated/log.jsonl", b"b\n").await.unwrap();
        assert_eq!(
            workspace.read("generated/log.jsonl").await.unwrap(),
            b"a\nb\n"
        );

        let missing = workspace.read("reports/none.json").await.unwrap_err();
        assert!(missing.is_not_found());
    }

    #[tokio::test]
    async fn workspaces_serve_as_artifact_sinks() {
        let memory = MemoryWorkspace::new();
        memory
            .store("artifacts/dom/a-dom.html", b"<p>hi</p>")
            .await
            .unwrap();
        assert_eq!(memory.load("artifacts/dom/a-dom.html").await.unwrap(), b"<p>hi</p>");
        assert!(matches!(
            memory.load("artifacts/dom/missing.html").await,
            Err(ActionError::Artifact(_))
        ));
        assert_eq!(memory.paths(), vec!["artifacts/dom/a-dom.html".to_string()]);
    }
}
