use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::{Error, Result};

/// Extract the leading integer after `v`. Tolerates `-candidate`,
/// `-rolledback` and any future suffix; unknown formats yield 0 and are
/// never selected as active.
pub fn parse_version_number(name: &str) -> u32 {
    let Some(rest) = name.strip_prefix('v') else {
        return 0;
    };
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionKind {
    Released,
    Candidate,
    RolledBack,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct VersionEntry {
    pub name: String,
    pub number: u32,
    pub kind: VersionKind,
}

fn classify(name: &str) -> VersionKind {
    if !name.starts_with('v') || parse_version_number(name) == 0 {
        return VersionKind::Unknown;
    }
    if name.ends_with("-candidate") {
        VersionKind::Candidate
    } else if name.ends_with("-rolledback") {
        VersionKind::RolledBack
    } else if name[1..].chars().all(|c| c.is_ascii_digit()) {
        VersionKind::Released
    } else {
        VersionKind::Unknown
    }
}

/// The on-disk version tree:
/// `agents/<agent_id>/versions/{v1, v2, v3-candidate, v3-rolledback}/PROMPT.md`
/// plus `AGENT.md` and `EVOLVE.md` at the agent root.
pub struct VersionTree {
    agents_dir: PathBuf,
}

impl VersionTree {
    pub fn new(agents_dir: impl Into<PathBuf>) -> Self {
        Self {
            agents_dir: agents_dir.into(),
        }
    }

    pub fn agent_dir(&self, agent_id: &str) -> PathBuf {
        self.agents_dir.join(agent_id)
    }

    fn versions_dir(&self, agent_id: &str) -> PathBuf {
        self.agent_dir(agent_id).join("versions")
    }

    pub fn list(&self, agent_id: &str) -> Result<Vec<VersionEntry>> {
        let dir = self.versions_dir(agent_id);
        let mut entries = Vec::new();
        if !dir.exists() {
            return Ok(entries);
        }
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            entries.push(VersionEntry {
                number: parse_version_number(&name),
                kind: classify(&name),
                name,
            });
        }
        entries.sort_by_key(|e| e.number);
        Ok(entries)
    }

    /// The active version: highest `v<N>` that is neither `-candidate` nor
    /// `-rolledback`.
    pub fn active(&self, agent_id: &str) -> Result<Option<VersionEntry>> {
        Ok(self
            .list(agent_id)?
            .into_iter()
            .filter(|e| e.kind == VersionKind::Released)
            .max_by_key(|e| e.number))
    }

    pub fn candidate(&self, agent_id: &str) -> Result<Option<VersionEntry>> {
        Ok(self
            .list(agent_id)?
            .into_iter()
            .filter(|e| e.kind == VersionKind::Candidate)
            .max_by_key(|e| e.number))
    }

    pub fn read_prompt(&self, agent_id: &str, version_name: &str) -> Result<String> {
        let path = self
            .versions_dir(agent_id)
            .join(version_name)
            .join("PROMPT.md");
        Ok(std::fs::read_to_string(path)?)
    }

    pub fn read_agent_doc(&self, agent_id: &str, file: &str) -> Result<String> {
        Ok(std::fs::read_to_string(self.agent_dir(agent_id).join(file))?)
    }

    /// Write the first released version for a new agent (`v1`).
    pub fn init_agent(&self, agent_id: &str, prompt: &str) -> Result<()> {
        let dir = self.versions_dir(agent_id).join("v1");
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join("PROMPT.md"), prompt)?;
        Ok(())
    }

    /// Write a candidate as `v<active+1>-candidate`. Returns the candidate's
    /// version number.
    pub fn write_candidate(&self, agent_id: &str, prompt: &str) -> Result<u32> {
        let next = self
            .active(agent_id)?
            .map(|e| e.number + 1)
            .unwrap_or(1);
        let dir = self
            .versions_dir(agent_id)
            .join(format!("v{}-candidate", next));
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join("PROMPT.md"), prompt)?;
        Ok(next)
    }

    /// Promote the candidate by atomically renaming `vN-candidate` → `vN`.
    /// Fails when no candidate exists or the target name is already taken.
    pub fn promote(&self, agent_id: &str) -> Result<u32> {
        let candidate = self
            .candidate(agent_id)?
            .ok_or_else(|| Error::Version(format!("no candidate for agent '{}'", agent_id)))?;

        let target_name = format!("v{}", candidate.number);
        let versions = self.versions_dir(agent_id);
        let target = versions.join(&target_name);
        if target.exists() {
            return Err(Error::Version(format!(
                "cannot promote: {} already exists",
                target_name
            )));
        }
        std::fs::rename(versions.join(&candidate.name), &target)?;
        info!(agent = agent_id, version = candidate.number, "candidate promoted");
        Ok(candidate.number)
    }

    /// Roll the active version back: rename `vM` → `vM-rolledback`. The prior
    /// released version becomes active by selection. Fails when there is no
    /// active version or nothing to fall back to.
    pub fn rollback(&self, agent_id: &str) -> Result<(u32, u32)> {
        let versions = self.list(agent_id)?;
        let mut released: Vec<&VersionEntry> = versions
            .iter()
            .filter(|e| e.kind == VersionKind::Released)
            .collect();
        released.sort_by_key(|e| e.number);

        let Some(active) = released.last() else {
            return Err(Error::Version(format!(
                "no active version for agent '{}'",
                agent_id
            )));
        };
        if released.len() < 2 {
            return Err(Error::Version(format!(
                "no prior version to roll back to for agent '{}'",
                agent_id
            )));
        }
        let previous = released[released.len() - 2].number;
        let active_number = active.number;

        let dir = self.versions_dir(agent_id);
        std::fs::rename(
            dir.join(format!("v{}", active_number)),
            dir.join(format!("v{}-rolledback", active_number)),
        )?;
        info!(
            agent = agent_id,
            rolled_back = active_number,
            restored = previous,
            at = %Utc::now(),
            "version rolled back"
        );
        Ok((active_number, previous))
    }

    /// Remove a rejected candidate directory.
    pub fn discard_candidate(&self, agent_id: &str) -> Result<()> {
        if let Some(candidate) = self.candidate(agent_id)? {
            std::fs::remove_dir_all(self.versions_dir(agent_id).join(candidate.name))?;
        }
        Ok(())
    }

    pub fn exists(&self, agent_id: &str, version_name: &str) -> bool {
        self.versions_dir(agent_id).join(version_name).exists()
    }
}

impl VersionTree {
    /// All agent IDs with a directory under the tree.
    pub fn agent_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        if !self.agents_dir.exists() {
            return Ok(ids);
        }
        for entry in std::fs::read_dir(&self.agents_dir)? {
            let entry = entry?;
            if entry.path().is_dir() {
                ids.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Every PROMPT.md under the tree, for diagnostics and backup tooling.
pub fn prompt_files(root: &Path) -> Vec<PathBuf> {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name() == "PROMPT.md")
        .map(|entry| entry.into_path())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> (tempfile::TempDir, VersionTree) {
        let tmp = tempfile::TempDir::new().unwrap();
        let tree = VersionTree::new(tmp.path().join("agents"));
        (tmp, tree)
    }

    #[test]
    fn test_parse_version_numbers() {
        assert_eq!(parse_version_number("v1"), 1);
        assert_eq!(parse_version_number("v12"), 12);
        assert_eq!(parse_version_number("v3-candidate"), 3);
        assert_eq!(parse_version_number("v3-rolledback"), 3);
        assert_eq!(parse_version_number("v3-experimental"), 3);
        assert_eq!(parse_version_number("weird"), 0);
        assert_eq!(parse_version_number("v"), 0);
    }

    #[test]
    fn test_active_skips_suffixed_versions() {
        let (_tmp, tree) = tree();
        tree.init_agent("a1", "v1 prompt").unwrap();
        let versions = tree.versions_dir("a1");
        std::fs::create_dir_all(versions.join("v2")).unwrap();
        std::fs::create_dir_all(versions.join("v3-candidate")).unwrap();
        std::fs::create_dir_all(versions.join("v4-rolledback")).unwrap();

        let active = tree.active("a1").unwrap().unwrap();
        assert_eq!(active.number, 2);
        assert_eq!(active.name, "v2");
    }

    #[test]
    fn test_candidate_write_and_promote() {
        let (_tmp, tree) = tree();
        tree.init_agent("a1", "base prompt").unwrap();
        std::fs::create_dir_all(tree.versions_dir("a1").join("v2")).unwrap();

        let number = tree.write_candidate("a1", "better prompt").unwrap();
        assert_eq!(number, 3);
        assert!(tree.exists("a1", "v3-candidate"));

        let promoted = tree.promote("a1").unwrap();
        assert_eq!(promoted, 3);
        assert!(tree.exists("a1", "v3"));
        assert!(!tree.exists("a1", "v3-candidate"));
        assert_eq!(tree.read_prompt("a1", "v3").unwrap(), "better prompt");
    }

    #[test]
    fn test_promote_without_candidate_fails() {
        let (_tmp, tree) = tree();
        tree.init_agent("a1", "base").unwrap();
        assert!(matches!(tree.promote("a1"), Err(Error::Version(_))));
    }

    #[test]
    fn test_promote_into_existing_target_fails() {
        let (_tmp, tree) = tree();
        tree.init_agent("a1", "base").unwrap();
        let versions = tree.versions_dir("a1");
        std::fs::create_dir_all(versions.join("v2")).unwrap();
        // Stale candidate whose target already exists.
        std::fs::create_dir_all(versions.join("v2-candidate")).unwrap();

        assert!(matches!(tree.promote("a1"), Err(Error::Version(_))));
        assert!(tree.exists("a1", "v2-candidate"));
    }

    #[test]
    fn test_rollback_restores_previous() {
        let (_tmp, tree) = tree();
        tree.init_agent("a1", "v1").unwrap();
        let versions = tree.versions_dir("a1");
        std::fs::create_dir_all(versions.join("v2")).unwrap();
        std::fs::create_dir_all(versions.join("v3")).unwrap();

        let (rolled, restored) = tree.rollback("a1").unwrap();
        assert_eq!(rolled, 3);
        assert_eq!(restored, 2);
        assert!(tree.exists("a1", "v3-rolledback"));

        let active = tree.active("a1").unwrap().unwrap();
        assert_eq!(active.number, 2);
    }

    #[test]
    fn test_rollback_needs_fallback_version() {
        let (_tmp, tree) = tree();
        tree.init_agent("a1", "only one").unwrap();
        assert!(matches!(tree.rollback("a1"), Err(Error::Version(_))));
    }

    #[test]
    fn test_prompt_files_walks_tree() {
        let (tmp, tree) = tree();
        tree.init_agent("a1", "p1").unwrap();
        tree.init_agent("a2", "p2").unwrap();
        tree.write_candidate("a1", "p1b").unwrap();

        let files = prompt_files(&tmp.path().join("agents"));
        assert_eq!(files.len(), 3);
    }
}
