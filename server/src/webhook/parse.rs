use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Request, StatusCode};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::event::{
    BotEvent, CommentAction, IssueCommentEvent, PullRequestAction, PullRequestEvent, StatusEvent,
};
use crate::github::models::{PullRequest, StatusState};

fn verify_gh_signature(headers: &HeaderMap<HeaderValue>, body: &[u8], secret: &str) -> bool {
    let Some(signature) = headers.get("x-hub-signature-256").map(|v| v.as_bytes()) else {
        return false;
    };
    let Some(signature) = signature
        .strip_prefix(b"sha256=")
        .and_then(|v| hex::decode(v).ok())
    else {
        return false;
    };

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&signature).is_ok()
}

#[derive(Debug, Deserialize)]
struct Account {
    login: String,
}

#[derive(Debug, Deserialize)]
struct RepositoryPayload {
    name: String,
    owner: Account,
}

#[derive(Debug, Deserialize)]
struct PullRequestPayload {
    action: String,
    pull_request: PullRequest,
    repository: RepositoryPayload,
}

#[derive(Debug, Deserialize)]
struct StatusPayload {
    sha: String,
    state: StatusState,
    #[serde(default)]
    target_url: Option<String>,
    #[serde(default)]
    description: Option<String>,
    context: String,
    repository: RepositoryPayload,
}

#[derive(Debug, Deserialize)]
struct Issue {
    number: u64,
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Comment {
    #[serde(default)]
    body: Option<String>,
    user: Account,
}

#[derive(Debug, Deserialize)]
struct IssueCommentPayload {
    action: String,
    issue: Issue,
    comment: Comment,
    repository: RepositoryPayload,
}

fn from_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, (StatusCode, String)> {
    serde_json::from_slice(body).map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))
}

/// Classify a payload. Event kinds and actions the bot does not act on yield `None`.
fn parse_event(kind: &str, body: &[u8]) -> Result<Option<BotEvent>, (StatusCode, String)> {
    let event = match kind {
        "pull_request" => {
            let payload: PullRequestPayload = from_body(body)?;
            let Some(action) = PullRequestAction::from_action(&payload.action) else {
                return Ok(None);
            };

            BotEvent::PullRequest(PullRequestEvent::new(
                action,
                &payload.repository.owner.login,
                &payload.repository.name,
                &payload.pull_request,
            ))
        }
        "status" => {
            let payload: StatusPayload = from_body(body)?;

            BotEvent::Status(StatusEvent {
                repo: payload.repository.name,
                owner: payload.repository.owner.login,
                sha: payload.sha,
                state: payload.state,
                target_url: payload.target_url,
                description: payload.description,
                context: payload.context,
            })
        }
        "issue_comment" => {
            let payload: IssueCommentPayload = from_body(body)?;
            let Some(action) = CommentAction::from_action(&payload.action) else {
                return Ok(None);
            };

            BotEvent::IssueComment(IssueCommentEvent {
                action,
                repo: payload.repository.name,
                owner: payload.repository.owner.login,
                issue_number: payload.issue.number,
                is_pull_request: payload.issue.pull_request.is_some(),
                body: payload.comment.body.unwrap_or_default(),
                author: payload.comment.user.login,
            })
        }
        _ => return Ok(None),
    };

    Ok(Some(event))
}

pub async fn parse_from_request(
    request: Request<Body>,
    secret: Option<&str>,
) -> Result<Option<BotEvent>, (StatusCode, String)> {
    let (parts, body) = request.into_parts();
    let Some(kind) = parts.headers.get("X-GitHub-Event").and_then(|v| v.to_str().ok()) else {
        return Err((StatusCode::BAD_REQUEST, "Missing X-GitHub-Event header".to_string()));
    };

    let Ok(body) = axum::body::to_bytes(body, 1024 * 1024 * 10).await else {
        return Err((StatusCode::BAD_REQUEST, "Failed to read body".to_string()));
    };

    if let Some(secret) = secret {
        if !verify_gh_signature(&parts.headers, &body, secret) {
            return Err((StatusCode::UNAUTHORIZED, "Invalid signature".to_string()));
        }
    }

    parse_event(kind, &body)
}
