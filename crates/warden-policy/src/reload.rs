use notify::{Event, EventKind, PollWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{info, warn};

use crate::engine::PolicyEngine;
use crate::rules::{PolicyDocument, RuleConfig, RuleType};
use crate::{Error, Result};

/// Load every `policies/<name>/policy.yaml` under the root, in directory
/// name order. A `POLICY.md` next to the yaml becomes judge context for
/// ai-judge rules in that document that declare none inline.
pub fn load_policy_dir(root: &Path) -> Result<Vec<RuleConfig>> {
    let mut rules = Vec::new();
    if !root.exists() {
        return Ok(rules);
    }

    let mut dirs: Vec<PathBuf> = std::fs::read_dir(root)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();

    for dir in dirs {
        let yaml_path = dir.join("policy.yaml");
        if !yaml_path.exists() {
            continue;
        }
        let raw = std::fs::read_to_string(&yaml_path)?;
        let document: PolicyDocument = serde_yaml::from_str(&raw).map_err(|e| {
            Error::Compile(format!("{}: {}", yaml_path.display(), e))
        })?;

        let context = match std::fs::read_to_string(dir.join("POLICY.md")) {
            Ok(content) => Some(content),
            Err(_) => None,
        };

        for mut rule in document.rules {
            if rule.rule_type == RuleType::AiJudge && rule.context.is_none() {
                rule.context = context.clone();
            }
            rules.push(rule);
        }
    }

    Ok(rules)
}

/// Watches the policies directory and hot-reloads the engine on change.
///
/// A failed reload (unparseable yaml, bad expression) leaves the running
/// ruleset untouched; the error is logged and the watcher keeps going.
pub struct PolicyWatcher {
    _watcher: PollWatcher,
    _handle: JoinHandle<()>,
}

impl PolicyWatcher {
    pub fn start(root: PathBuf, engine: Arc<PolicyEngine>) -> Result<Self> {
        let (tx_fs, rx_fs) = channel();

        let config = notify::Config::default().with_poll_interval(Duration::from_millis(1000));
        let mut watcher = PollWatcher::new(
            move |res: std::result::Result<Event, notify::Error>| {
                if let Ok(event) = res {
                    let _ = tx_fs.send(event);
                }
            },
            config,
        )
        .map_err(|e| Error::Io(std::io::Error::other(e)))?;

        if root.exists() {
            watcher
                .watch(&root, RecursiveMode::Recursive)
                .map_err(|e| Error::Io(std::io::Error::other(e)))?;
        }

        let handle = std::thread::Builder::new()
            .name("policy-watcher".to_string())
            .spawn(move || {
                while let Ok(event) = rx_fs.recv() {
                    if !matches!(
                        event.kind,
                        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                    ) {
                        continue;
                    }
                    match load_policy_dir(&root) {
                        Ok(configs) => match engine.reload(&configs) {
                            Ok(count) => info!(rules = count, "policies hot-reloaded"),
                            Err(err) => {
                                warn!(error = %err, "policy reload rejected, keeping old set")
                            }
                        },
                        Err(err) => {
                            warn!(error = %err, "failed to read policies directory")
                        }
                    }
                }
            })?;

        Ok(Self {
            _watcher: watcher,
            _handle: handle,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_policy(root: &Path, name: &str, yaml: &str) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("policy.yaml"), yaml).unwrap();
    }

    #[test]
    fn test_load_policies_in_directory_order() {
        let tmp = tempfile::TempDir::new().unwrap();
        write_policy(
            tmp.path(),
            "10-budget",
            "rules:\n  - name: budget\n    type: budget\n    condition: \"session.cost > 5.0\"\n",
        );
        write_policy(
            tmp.path(),
            "20-shell",
            "rules:\n  - name: no-shell\n    condition: 'action.name == \"shell_exec\"'\n",
        );

        let rules = load_policy_dir(tmp.path()).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].name, "budget");
        assert_eq!(rules[1].name, "no-shell");
    }

    #[test]
    fn test_policy_md_becomes_judge_context() {
        let tmp = tempfile::TempDir::new().unwrap();
        write_policy(
            tmp.path(),
            "judge",
            "rules:\n  - name: risk-judge\n    type: ai-judge\n    prompt: \"Assess risk\"\n",
        );
        std::fs::write(
            tmp.path().join("judge").join("POLICY.md"),
            "# Risk policy\nNever touch payroll.",
        )
        .unwrap();

        let rules = load_policy_dir(tmp.path()).unwrap();
        assert_eq!(rules.len(), 1);
        assert!(rules[0].context.as_deref().unwrap().contains("payroll"));
    }

    #[test]
    fn test_missing_root_is_empty() {
        let tmp = tempfile::TempDir::new().unwrap();
        let rules = load_policy_dir(&tmp.path().join("nope")).unwrap();
        assert!(rules.is_empty());
    }

    #[test]
    fn test_bad_yaml_is_a_compile_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        write_policy(tmp.path(), "bad", "rules: [not: valid");
        assert!(load_policy_dir(tmp.path()).is_err());
    }
}
