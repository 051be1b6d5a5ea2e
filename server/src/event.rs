//! Inbound messages, validated at the ingress boundary.

use crate::github::models::{PullRequest, StatusState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullRequestAction {
    Opened,
    Reopened,
    Closed,
    Synchronize,
}

impl PullRequestAction {
    pub fn from_action(action: &str) -> Option<Self> {
        match action {
            "opened" => Some(Self::Opened),
            "reopened" => Some(Self::Reopened),
            "closed" => Some(Self::Closed),
            "synchronize" => Some(Self::Synchronize),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestEvent {
    pub action: PullRequestAction,
    pub repo: String,
    /// Owner of the upstream repository
    pub owner: String,
    pub number: u64,
    pub id: u64,
    pub head_sha: String,
    pub title: String,
    pub base_ref: String,
}

impl PullRequestEvent {
    pub fn new(action: PullRequestAction, owner: &str, repo: &str, pr: &PullRequest) -> Self {
        Self {
            action,
            repo: repo.to_owned(),
            owner: owner.to_owned(),
            number: pr.number,
            id: pr.id,
            head_sha: pr.head.sha.clone(),
            title: pr.title.clone(),
            base_ref: pr.base.ref_field.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub repo: String,
    /// Owner of the repository the status was reported on
    pub owner: String,
    pub sha: String,
    pub state: StatusState,
    pub target_url: Option<String>,
    pub description: Option<String>,
    pub context: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentAction {
    Created,
    Edited,
    Deleted,
}

impl CommentAction {
    pub fn from_action(action: &str) -> Option<Self> {
        match action {
            "created" => Some(Self::Created),
            "edited" => Some(Self::Edited),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueCommentEvent {
    pub action: CommentAction,
    pub repo: String,
    pub owner: String,
    pub issue_number: u64,
    /// Whether the issue is a pull request
    pub is_pull_request: bool,
    pub body: String,
    pub author: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotEvent {
    PullRequest(PullRequestEvent),
    Status(StatusEvent),
    IssueComment(IssueCommentEvent),
}
