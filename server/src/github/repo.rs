use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::http;
use base64::Engine as _;
use moka::future::Cache;
use octocrab::models::repos::{Object, Ref};
use octocrab::models::CommentId;
use octocrab::params::repos::Reference;
use octocrab::{GitHubError, Octocrab};
use serde::Deserialize;

use super::messages::IssueMessage;
use super::models::{Branch, CombinedStatus, Commit, FileContent, NewStatus, PullRequest, User};
use crate::utils::same_account;

/// A failed call against the hosting provider.
#[derive(Debug, thiserror::Error)]
pub enum RemoteApiError {
    #[error("github responded with {status}: {message}")]
    GitHub { status: http::StatusCode, message: String },
    #[error("github request failed: {0}")]
    Transport(#[source] octocrab::Error),
    #[error("{0} not found")]
    NotFound(String),
    #[error("invalid response: {0}")]
    Decode(String),
    #[error(transparent)]
    Shared(Arc<RemoteApiError>),
}

impl RemoteApiError {
    /// True for a missing resource, including GitHub's 422 for refs that do not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            RemoteApiError::GitHub { status, message } => {
                *status == http::StatusCode::NOT_FOUND
                    || (*status == http::StatusCode::UNPROCESSABLE_ENTITY && message == "Reference does not exist")
            }
            RemoteApiError::NotFound(_) => true,
            RemoteApiError::Shared(inner) => inner.is_not_found(),
            _ => false,
        }
    }
}

impl From<octocrab::Error> for RemoteApiError {
    fn from(value: octocrab::Error) -> Self {
        match value {
            octocrab::Error::GitHub {
                source: GitHubError {
                    status_code, message, ..
                },
                ..
            } => RemoteApiError::GitHub {
                status: status_code,
                message,
            },
            err => RemoteApiError::Transport(err),
        }
    }
}

impl From<Arc<RemoteApiError>> for RemoteApiError {
    fn from(value: Arc<RemoteApiError>) -> Self {
        RemoteApiError::Shared(value)
    }
}

pub type Result<T, E = RemoteApiError> = std::result::Result<T, E>;

/// Operations against one repository with one credential. No method retries.
pub trait GitHubRepoClient: Send + Sync {
    /// The owner of the repository
    fn owner(&self) -> String;

    /// The name of the repository
    fn name(&self) -> String;

    /// The tip of a branch, `None` if the branch does not exist
    fn get_branch(&self, branch: &str) -> impl Future<Output = Result<Option<Branch>>> + Send;

    fn create_branch(&self, branch: &str, sha: &str) -> impl Future<Output = Result<Branch>> + Send;

    /// Delete a branch, a missing branch is not an error
    fn delete_branch(&self, branch: &str) -> impl Future<Output = Result<()>> + Send;

    /// Force the branch tip to `sha`, even when it is not a fast-forward
    fn sync_branch_with_commit(&self, branch: &str, sha: &str) -> impl Future<Output = Result<()>> + Send;

    /// The decoded content of a file at a ref, `None` if the file does not exist
    fn get_file_content(&self, path: &str, git_ref: &str) -> impl Future<Output = Result<Option<FileContent>>> + Send;

    /// Write a file on a branch. `blob_sha` must be set when the file already exists.
    fn update_file_content(
        &self,
        branch: &str,
        path: &str,
        content: &str,
        message: &str,
        blob_sha: Option<&str>,
    ) -> impl Future<Output = Result<Commit>> + Send;

    /// Write a file on a branch, replacing it if it already exists
    fn replace_file_content(
        &self,
        branch: &str,
        path: &str,
        content: &str,
        message: &str,
    ) -> impl Future<Output = Result<Commit>> + Send {
        async move {
            let existing = self.get_file_content(path, branch).await?;
            self.update_file_content(branch, path, content, message, existing.as_ref().map(|f| f.sha.as_str()))
                .await
        }
    }

    fn delete_file_content(&self, branch: &str, path: &str, message: &str) -> impl Future<Output = Result<Commit>> + Send;

    /// A git commit, including its message and tree
    fn get_commit(&self, sha: &str) -> impl Future<Output = Result<Commit>> + Send;

    fn create_commit(&self, message: &str, tree: &str, parents: &[String]) -> impl Future<Output = Result<Commit>> + Send;

    fn create_pull_request(&self, title: &str, head: &str, base: &str) -> impl Future<Output = Result<PullRequest>> + Send;

    fn get_pull_request(&self, number: u64) -> impl Future<Output = Result<PullRequest>> + Send;

    fn get_open_pull_requests(&self) -> impl Future<Output = Result<Vec<PullRequest>>> + Send;

    fn create_status(&self, sha: &str, status: &NewStatus) -> impl Future<Output = Result<()>> + Send;

    fn get_combined_status(&self, git_ref: &str) -> impl Future<Output = Result<CombinedStatus>> + Send;

    /// Comment on an issue or pull request, returning the comment id
    fn create_comment(&self, issue_number: u64, message: &IssueMessage) -> impl Future<Output = Result<u64>> + Send;

    fn edit_comment(&self, comment_id: u64, message: &IssueMessage) -> impl Future<Output = Result<()>> + Send;

    fn delete_comment(&self, comment_id: u64) -> impl Future<Output = Result<()>> + Send;

    fn list_collaborators(&self) -> impl Future<Output = Result<Vec<User>>> + Send;

    /// Check if a user is a collaborator on the repository
    fn is_collaborator(&self, login: &str) -> impl Future<Output = Result<bool>> + Send {
        async move {
            let collaborators = self.list_collaborators().await?;
            Ok(collaborators.iter().any(|user| same_account(&user.login, login)))
        }
    }
}

pub struct RepoClient {
    owner: String,
    name: String,
    client: Octocrab,
    collaborators: Cache<(), Arc<Vec<User>>>,
}

impl RepoClient {
    pub(super) fn new(owner: impl Into<String>, name: impl Into<String>, client: Octocrab) -> Self {
        let owner = owner.into();
        let name = name.into();

        tracing::debug!(owner = %owner, name = %name, "new repo client");

        Self {
            owner,
            name,
            client,
            collaborators: Cache::builder()
                .max_capacity(1)
                .time_to_live(Duration::from_secs(60))
                .build(),
        }
    }

    fn route(&self, path: impl std::fmt::Display) -> String {
        format!("/repos/{owner}/{repo}/{path}", owner = self.owner, repo = self.name)
    }
}

#[derive(Deserialize)]
struct ContentPayload {
    path: String,
    sha: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ContentCommitPayload {
    commit: Commit,
}

#[derive(Deserialize)]
struct CommentPayload {
    id: u64,
}

fn decode_content(payload: ContentPayload) -> Result<FileContent> {
    let encoded: String = payload
        .content
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| RemoteApiError::Decode(format!("{}: {e}", payload.path)))?;

    let content = String::from_utf8(bytes).map_err(|e| RemoteApiError::Decode(format!("{}: {e}", payload.path)))?;

    Ok(FileContent {
        path: payload.path,
        sha: payload.sha,
        content,
    })
}

impl GitHubRepoClient for RepoClient {
    fn owner(&self) -> String {
        self.owner.clone()
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    async fn get_branch(&self, branch: &str) -> Result<Option<Branch>> {
        match self
            .client
            .repos(&self.owner, &self.name)
            .get_ref(&Reference::Branch(branch.to_owned()))
            .await
        {
            Ok(r) => match r.object {
                Object::Commit { sha, .. } | Object::Tag { sha, .. } => Ok(Some(Branch {
                    name: branch.to_owned(),
                    sha,
                })),
                _ => Err(RemoteApiError::Decode(format!("{branch} does not point at a commit"))),
            },
            Err(e) => {
                let e = RemoteApiError::from(e);
                if e.is_not_found() { Ok(None) } else { Err(e) }
            }
        }
    }

    async fn create_branch(&self, branch: &str, sha: &str) -> Result<Branch> {
        self.client
            .repos(&self.owner, &self.name)
            .create_ref(&Reference::Branch(branch.to_owned()), sha)
            .await?;

        Ok(Branch {
            name: branch.to_owned(),
            sha: sha.to_owned(),
        })
    }

    async fn delete_branch(&self, branch: &str) -> Result<()> {
        match self
            .client
            .repos(&self.owner, &self.name)
            .delete_ref(&Reference::Branch(branch.to_owned()))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                let e = RemoteApiError::from(e);
                if e.is_not_found() { Ok(()) } else { Err(e) }
            }
        }
    }

    async fn sync_branch_with_commit(&self, branch: &str, sha: &str) -> Result<()> {
        self.client
            .patch::<Ref, _, _>(
                self.route(format!("git/refs/heads/{branch}")),
                Some(&serde_json::json!({
                    "sha": sha,
                    "force": true,
                })),
            )
            .await?;

        Ok(())
    }

    async fn get_file_content(&self, path: &str, git_ref: &str) -> Result<Option<FileContent>> {
        match self
            .client
            .get::<ContentPayload, _, _>(
                self.route(format!("contents/{path}")),
                Some(&serde_json::json!({ "ref": git_ref })),
            )
            .await
        {
            Ok(payload) => decode_content(payload).map(Some),
            Err(e) => {
                let e = RemoteApiError::from(e);
                if e.is_not_found() { Ok(None) } else { Err(e) }
            }
        }
    }

    async fn update_file_content(
        &self,
        branch: &str,
        path: &str,
        content: &str,
        message: &str,
        blob_sha: Option<&str>,
    ) -> Result<Commit> {
        let mut body = serde_json::json!({
            "message": message,
            "content": base64::engine::general_purpose::STANDARD.encode(content),
            "branch": branch,
        });

        if let Some(blob_sha) = blob_sha {
            body["sha"] = serde_json::Value::from(blob_sha);
        }

        let payload = self
            .client
            .put::<ContentCommitPayload, _, _>(self.route(format!("contents/{path}")), Some(&body))
            .await?;

        Ok(payload.commit)
    }

    async fn delete_file_content(&self, branch: &str, path: &str, message: &str) -> Result<Commit> {
        let Some(existing) = self.get_file_content(path, branch).await? else {
            return Err(RemoteApiError::NotFound(path.to_owned()));
        };

        let payload = self
            .client
            .delete::<ContentCommitPayload, _, _>(
                self.route(format!("contents/{path}")),
                Some(&serde_json::json!({
                    "message": message,
                    "sha": existing.sha,
                    "branch": branch,
                })),
            )
            .await?;

        Ok(payload.commit)
    }

    async fn get_commit(&self, sha: &str) -> Result<Commit> {
        Ok(self
            .client
            .get::<Commit, _, _>(self.route(format!("git/commits/{sha}")), None::<&()>)
            .await?)
    }

    async fn create_commit(&self, message: &str, tree: &str, parents: &[String]) -> Result<Commit> {
        Ok(self
            .client
            .post::<_, Commit>(
                self.route("git/commits"),
                Some(&serde_json::json!({
                    "message": message,
                    "tree": tree,
                    "parents": parents,
                })),
            )
            .await?)
    }

    async fn create_pull_request(&self, title: &str, head: &str, base: &str) -> Result<PullRequest> {
        Ok(self
            .client
            .post::<_, PullRequest>(
                self.route("pulls"),
                Some(&serde_json::json!({
                    "title": title,
                    "head": head,
                    "base": base,
                })),
            )
            .await?)
    }

    async fn get_pull_request(&self, number: u64) -> Result<PullRequest> {
        Ok(self
            .client
            .get::<PullRequest, _, _>(self.route(format!("pulls/{number}")), None::<&()>)
            .await?)
    }

    async fn get_open_pull_requests(&self) -> Result<Vec<PullRequest>> {
        let page = self
            .client
            .get::<octocrab::Page<PullRequest>, _, _>(
                self.route("pulls"),
                Some(&serde_json::json!({
                    "state": "open",
                    "per_page": 100,
                })),
            )
            .await?;

        Ok(self.client.all_pages(page).await?)
    }

    async fn create_status(&self, sha: &str, status: &NewStatus) -> Result<()> {
        self.client
            .post::<_, serde_json::Value>(self.route(format!("statuses/{sha}")), Some(status))
            .await?;

        Ok(())
    }

    async fn get_combined_status(&self, git_ref: &str) -> Result<CombinedStatus> {
        Ok(self
            .client
            .get::<CombinedStatus, _, _>(
                self.route(format!("commits/{git_ref}/status")),
                Some(&serde_json::json!({ "per_page": 100 })),
            )
            .await?)
    }

    async fn create_comment(&self, issue_number: u64, message: &IssueMessage) -> Result<u64> {
        let comment = self
            .client
            .post::<_, CommentPayload>(self.route(format!("issues/{issue_number}/comments")), Some(message))
            .await?;

        Ok(comment.id)
    }

    async fn edit_comment(&self, comment_id: u64, message: &IssueMessage) -> Result<()> {
        self.client
            .patch::<serde_json::Value, _, _>(self.route(format!("issues/comments/{comment_id}")), Some(message))
            .await?;

        Ok(())
    }

    async fn delete_comment(&self, comment_id: u64) -> Result<()> {
        self.client
            .issues(&self.owner, &self.name)
            .delete_comment(CommentId(comment_id))
            .await?;

        Ok(())
    }

    async fn list_collaborators(&self) -> Result<Vec<User>> {
        let users = self
            .collaborators
            .try_get_with::<_, RemoteApiError>((), async {
                let page = self
                    .client
                    .get::<octocrab::Page<User>, _, _>(
                        self.route("collaborators"),
                        Some(&serde_json::json!({ "per_page": 100 })),
                    )
                    .await?;

                Ok(Arc::new(self.client.all_pages(page).await?))
            })
            .await?;

        Ok(users.as_ref().clone())
    }
}
