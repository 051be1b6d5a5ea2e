use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::event::PullRequestEvent;

/// Identity of a tracked pull request: repository name and number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrKey {
    pub repo: String,
    pub number: u64,
}

impl PrKey {
    pub fn new(repo: &str, number: u64) -> Self {
        Self {
            repo: repo.to_owned(),
            number,
        }
    }
}

impl std::fmt::Display for PrKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.repo, self.number)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// The shadow branch has not been created yet
    #[default]
    Provisioning,
    /// The shadow branch points at the current head
    Synced,
    /// New commits were pushed and the shadow branch waits to follow them
    Outdated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryComment {
    pub sha: String,
    pub id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedPullRequest {
    pub repo: String,
    pub number: u64,
    /// Owner of the upstream repository
    pub owner: String,
    pub id: u64,
    pub head_sha: String,
    #[serde(default)]
    pub title: String,
    pub shadow_branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_commit_sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running_commit_sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported_commit_sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_comment: Option<SummaryComment>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub known_contexts: BTreeSet<String>,
    /// The push countdown was published under the bot's own context and still shows pending
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub countdown_fallback: bool,
    #[serde(default)]
    pub phase: Phase,
}

impl TrackedPullRequest {
    pub fn new(event: &PullRequestEvent, shadow_branch: String) -> Self {
        Self {
            repo: event.repo.clone(),
            number: event.number,
            owner: event.owner.clone(),
            id: event.id,
            head_sha: event.head_sha.clone(),
            title: event.title.clone(),
            shadow_branch,
            config_commit_sha: None,
            running_commit_sha: None,
            reported_commit_sha: None,
            summary_comment: None,
            known_contexts: BTreeSet::new(),
            countdown_fallback: false,
            phase: Phase::Provisioning,
        }
    }

    pub fn key(&self) -> PrKey {
        PrKey::new(&self.repo, self.number)
    }

    /// True when `sha` is the head or the synthesized config commit
    pub fn matches_sha(&self, sha: &str) -> bool {
        self.head_sha == sha || self.config_commit_sha.as_deref() == Some(sha)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snapshot {
    #[serde(default)]
    opened_pull_requests: BTreeMap<String, TrackedPullRequest>,
}

/// Tracked pull requests, mirrored to a JSON file after every mutation.
#[derive(Debug, Default)]
pub struct CorrelationStore {
    path: Option<PathBuf>,
    prs: BTreeMap<PrKey, TrackedPullRequest>,
}

impl CorrelationStore {
    /// A store that is never written to disk
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the snapshot at `path`. A missing or unreadable snapshot starts empty.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();

        let snapshot = match std::fs::read(&path) {
            Ok(data) => match serde_json::from_slice::<Snapshot>(&data) {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    tracing::warn!(path = %path.display(), "ignoring corrupt state file: {err}");
                    Snapshot::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Snapshot::default(),
            Err(err) => {
                tracing::warn!(path = %path.display(), "failed to read state file: {err}");
                Snapshot::default()
            }
        };

        let prs: BTreeMap<_, _> = snapshot
            .opened_pull_requests
            .into_values()
            .map(|pr| (pr.key(), pr))
            .collect();

        tracing::info!(path = %path.display(), count = prs.len(), "loaded tracked pull requests");

        Self { path: Some(path), prs }
    }

    pub fn get(&self, key: &PrKey) -> Option<&TrackedPullRequest> {
        self.prs.get(key)
    }

    pub fn get_mut(&mut self, key: &PrKey) -> Option<&mut TrackedPullRequest> {
        self.prs.get_mut(key)
    }

    pub fn insert(&mut self, pr: TrackedPullRequest) -> Option<TrackedPullRequest> {
        self.prs.insert(pr.key(), pr)
    }

    pub fn remove(&mut self, key: &PrKey) -> Option<TrackedPullRequest> {
        self.prs.remove(key)
    }

    /// The pull request in `repo` whose head or config commit is `sha`
    pub fn find_by_sha(&self, repo: &str, sha: &str) -> Option<&TrackedPullRequest> {
        self.prs.values().find(|pr| pr.repo == repo && pr.matches_sha(sha))
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedPullRequest> {
        self.prs.values()
    }

    pub fn len(&self) -> usize {
        self.prs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prs.is_empty()
    }

    /// Write the snapshot atomically
    pub fn save(&self) -> Result<(), PersistenceError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let snapshot = Snapshot {
            opened_pull_requests: self.prs.iter().map(|(key, pr)| (key.to_string(), pr.clone())).collect(),
        };

        let data = serde_json::to_vec_pretty(&snapshot)?;

        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, path)?;

        Ok(())
    }

    /// Save, logging failures. The in-memory state stays authoritative.
    pub fn persist(&self) {
        if let Err(err) = self.save() {
            tracing::error!(
                path = %self.path.as_deref().map(|p| p.display().to_string()).unwrap_or_default(),
                "failed to persist state: {err}"
            );
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::event::PullRequestAction;

    fn event(repo: &str, number: u64, id: u64, sha: &str) -> PullRequestEvent {
        PullRequestEvent {
            action: PullRequestAction::Opened,
            repo: repo.to_owned(),
            owner: "DevExpress".to_owned(),
            number,
            id,
            head_sha: sha.to_owned(),
            title: "fix".to_owned(),
            base_ref: "master".to_owned(),
        }
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut store = CorrelationStore::load(&path);
        assert!(store.is_empty());

        let mut first = TrackedPullRequest::new(&event("testcafe", 1, 42, "s1"), "rp-42".to_owned());
        first.config_commit_sha = Some("c1".to_owned());
        first.known_contexts.insert("ci-a".to_owned());
        first.phase = Phase::Synced;
        first.countdown_fallback = true;
        store.insert(first.clone());
        store.insert(TrackedPullRequest::new(&event("testcafe-hammerhead", 7, 43, "h1"), "rp-43".to_owned()));
        store.save().unwrap();

        let reloaded = CorrelationStore::load(&path);
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get(&PrKey::new("testcafe", 1)), Some(&first));

        let second = reloaded.get(&PrKey::new("testcafe-hammerhead", 7)).unwrap();
        assert_eq!(second.head_sha, "h1");
        assert_eq!(second.shadow_branch, "rp-43");
        assert_eq!(second.phase, Phase::Provisioning);
    }

    #[test]
    fn test_snapshot_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut store = CorrelationStore::load(&path);
        let mut pr = TrackedPullRequest::new(&event("testcafe", 1, 42, "s1"), "rp-42".to_owned());
        pr.running_commit_sha = Some("s1".to_owned());
        store.insert(pr);
        store.save().unwrap();

        insta::assert_snapshot!(std::fs::read_to_string(&path).unwrap(), @r#"
        {
          "openedPullRequests": {
            "testcafe/1": {
              "repo": "testcafe",
              "number": 1,
              "owner": "DevExpress",
              "id": 42,
              "headSha": "s1",
              "title": "fix",
              "shadowBranch": "rp-42",
              "runningCommitSha": "s1",
              "phase": "provisioning"
            }
          }
        }
        "#);
    }

    #[test]
    fn test_missing_and_corrupt_files_start_empty() {
        let dir = tempfile::tempdir().unwrap();

        let store = CorrelationStore::load(dir.path().join("missing.json"));
        assert!(store.is_empty());

        let corrupt = dir.path().join("corrupt.json");
        std::fs::write(&corrupt, b"{ not json").unwrap();
        let store = CorrelationStore::load(&corrupt);
        assert!(store.is_empty());

        let legacy = dir.path().join("legacy.json");
        std::fs::write(&legacy, b"{}").unwrap();
        assert!(CorrelationStore::load(&legacy).is_empty());
    }

    #[test]
    fn test_save_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CorrelationStore::load(dir.path().join("missing-dir").join("state.json"));
        store.insert(TrackedPullRequest::new(&event("testcafe", 1, 42, "s1"), "rp-42".to_owned()));

        assert!(matches!(store.save(), Err(PersistenceError::Io(_))));
        store.persist();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_find_by_sha() {
        let mut store = CorrelationStore::in_memory();
        let mut pr = TrackedPullRequest::new(&event("testcafe", 1, 42, "s1"), "rp-42".to_owned());
        pr.config_commit_sha = Some("c1".to_owned());
        store.insert(pr);
        store.insert(TrackedPullRequest::new(&event("testcafe", 2, 43, "s2"), "rp-43".to_owned()));

        assert_eq!(store.find_by_sha("testcafe", "s1").map(|pr| pr.number), Some(1));
        assert_eq!(store.find_by_sha("testcafe", "c1").map(|pr| pr.number), Some(1));
        assert_eq!(store.find_by_sha("testcafe", "s2").map(|pr| pr.number), Some(2));
        assert!(store.find_by_sha("other", "s1").is_none());
        assert!(store.find_by_sha("testcafe", "s3").is_none());

        assert!(store.save().is_ok());
    }
}
