use std::path::{Path, PathBuf};
use std::sync::Arc;

use warden_store::Store;

/// Disposable data directory with a live store, policies/playbooks/agents
/// subtrees and helpers to drop files into them.
pub struct TestWorld {
    root: tempfile::TempDir,
    pub store: Arc<Store>,
}

impl TestWorld {
    pub fn new() -> anyhow::Result<Self> {
        let root = tempfile::TempDir::new()?;
        for dir in ["policies", "playbooks", "agents"] {
            std::fs::create_dir_all(root.path().join(dir))?;
        }
        let store = Arc::new(Store::open(&root.path().join("warden.db"))?);
        Ok(Self { root, store })
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    pub fn policies_dir(&self) -> PathBuf {
        self.root.path().join("policies")
    }

    pub fn playbooks_dir(&self) -> PathBuf {
        self.root.path().join("playbooks")
    }

    pub fn agents_dir(&self) -> PathBuf {
        self.root.path().join("agents")
    }

    /// Write `policies/<name>/policy.yaml`.
    pub fn write_policy(&self, name: &str, yaml: &str) -> anyhow::Result<()> {
        let dir = self.policies_dir().join(name);
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join("policy.yaml"), yaml)?;
        Ok(())
    }

    /// Write `playbooks/<DETECTOR>.md`.
    pub fn write_playbook(&self, detector: &str, content: &str) -> anyhow::Result<()> {
        let path = self
            .playbooks_dir()
            .join(format!("{}.md", detector.to_uppercase()));
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Drop the kill sentinel file.
    pub fn write_kill_sentinel(&self) -> anyhow::Result<()> {
        std::fs::write(self.root.path().join("KILL"), "")?;
        Ok(())
    }
}
