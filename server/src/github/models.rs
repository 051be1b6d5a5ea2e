use octocrab::models::UserId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct User {
    pub login: String,
    pub id: UserId,
}

impl Default for User {
    fn default() -> Self {
        Self {
            login: "user".to_string(),
            id: UserId(0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct Repository {
    pub name: String,
    pub owner: User,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct PrBranch {
    #[serde(rename = "ref")]
    pub ref_field: String,
    pub sha: String,
    #[serde(default)]
    pub repo: Option<Repository>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct PullRequest {
    /// Provider-wide id, stable for the lifetime of the pull request
    pub id: u64,
    pub number: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub user: Option<User>,
    pub head: PrBranch,
    pub base: PrBranch,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Branch {
    pub name: String,
    pub sha: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct ShaRef {
    pub sha: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct Commit {
    pub sha: String,
    #[serde(default)]
    pub message: String,
    pub tree: ShaRef,
    #[serde(default)]
    pub parents: Vec<ShaRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    pub path: String,
    /// Blob sha, required by the provider to replace or delete the file
    pub sha: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusState {
    Pending,
    Success,
    Failure,
    Error,
}

impl StatusState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, StatusState::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StatusState::Pending => "pending",
            StatusState::Success => "success",
            StatusState::Failure => "failure",
            StatusState::Error => "error",
        }
    }
}

impl std::fmt::Display for StatusState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommitStatus {
    pub state: StatusState,
    pub context: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub target_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CombinedStatus {
    pub state: StatusState,
    pub sha: String,
    #[serde(default)]
    pub statuses: Vec<CommitStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewStatus {
    pub state: StatusState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub context: String,
}

impl From<&CommitStatus> for NewStatus {
    fn from(value: &CommitStatus) -> Self {
        Self {
            state: value.state,
            target_url: value.target_url.clone(),
            description: value.description.clone(),
            context: value.context.clone(),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_pull_request_from_payload() {
        let pr: PullRequest = serde_json::from_value(serde_json::json!({
            "id": 42,
            "number": 1,
            "title": "[docs] fix typo",
            "state": "open",
            "user": { "login": "octocat", "id": 7 },
            "head": {
                "ref": "feature",
                "sha": "s1",
                "repo": { "name": "r", "owner": { "login": "octocat", "id": 7 } }
            },
            "base": { "ref": "master", "sha": "b1", "repo": null }
        }))
        .expect("pull request");

        assert_eq!(pr.id, 42);
        assert_eq!(pr.head.ref_field, "feature");
        assert_eq!(pr.head.repo.unwrap().owner.login, "octocat");
        assert!(pr.base.repo.is_none());
        assert_eq!(pr.user.unwrap().id, UserId(7));
    }

    #[test]
    fn test_status_state_serde() {
        assert_eq!(serde_json::to_value(StatusState::Failure).unwrap(), "failure");
        assert_eq!(
            serde_json::from_value::<StatusState>(serde_json::json!("error")).unwrap(),
            StatusState::Error
        );
        assert!(!StatusState::Pending.is_terminal());
        assert!(StatusState::Error.is_terminal());
    }

    #[test]
    fn test_new_status_skips_missing_fields() {
        let status = NewStatus {
            state: StatusState::Pending,
            target_url: None,
            description: Some("waiting".to_string()),
            context: "ci".to_string(),
        };

        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            serde_json::json!({ "state": "pending", "description": "waiting", "context": "ci" })
        );
    }
}
