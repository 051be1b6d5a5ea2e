use std::sync::Arc;

use anyhow::Context;

use super::Engine;
use crate::ci::CiRestarter;
use crate::event::StatusEvent;
use crate::github::messages::{outcome_description, IssueMessage, TestReport};
use crate::github::models::{CommitStatus, NewStatus, StatusState};
use crate::github::repo::GitHubRepoClient;
use crate::github::GitHubClients;
use crate::store::{PrKey, SummaryComment, TrackedPullRequest};
use crate::utils::same_account;

fn aggregate_state(statuses: &[CommitStatus]) -> StatusState {
    if statuses.iter().all(|status| status.state == StatusState::Success) {
        StatusState::Success
    } else {
        StatusState::Failure
    }
}

enum Plan {
    Skip,
    Republish(TrackedPullRequest),
    Report(TrackedPullRequest),
}

impl<G: GitHubClients, C: CiRestarter> Engine<G, C> {
    pub(super) fn handle_status(self: &Arc<Self>, event: StatusEvent) {
        if !same_account(&event.owner, &self.config.bot_name) {
            tracing::debug!(owner = %event.owner, repo = %event.repo, "ignoring status outside the bot fork");
            return;
        }

        let key = self
            .store
            .lock()
            .find_by_sha(&event.repo, &event.sha)
            .map(TrackedPullRequest::key);

        let Some(key) = key else {
            tracing::debug!(repo = %event.repo, sha = %event.sha, context = %event.context, "status for untracked commit");
            return;
        };

        let engine = self.clone();
        self.spawn_logged(key.clone(), "reconcile status", async move {
            engine.reconcile_status(key, event).await
        });
    }

    async fn reconcile_status(&self, key: PrKey, event: StatusEvent) -> anyhow::Result<()> {
        let Some(shadow_branch) = self.store.lock().get(&key).map(|pr| pr.shadow_branch.clone()) else {
            return Ok(());
        };

        let combined = self
            .github
            .fork(&event.repo)
            .get_combined_status(&shadow_branch)
            .await
            .context("get combined status")?;

        if combined.sha != event.sha {
            tracing::debug!(pr = %key, sha = %event.sha, current = %combined.sha, "dropping stale status");
            return Ok(());
        }

        let mut statuses = combined.statuses;
        if !statuses.iter().any(|status| status.context == event.context) {
            statuses.push(CommitStatus {
                state: event.state,
                context: event.context.clone(),
                description: event.description.clone(),
                target_url: event.target_url.clone(),
            });
        }

        let plan = {
            let mut store = self.store.lock();
            let Some(pr) = store.get_mut(&key) else {
                return Ok(());
            };

            if !pr.matches_sha(&event.sha) {
                tracing::debug!(pr = %key, sha = %event.sha, "pull request moved on");
                return Ok(());
            }

            let was_known = pr.known_contexts.contains(&event.context);
            pr.known_contexts
                .extend(statuses.iter().map(|status| status.context.clone()));

            let plan = if statuses.iter().any(|status| !status.state.is_terminal()) {
                if event.state == StatusState::Pending
                    && was_known
                    && pr.running_commit_sha.as_deref() == Some(event.sha.as_str())
                {
                    Plan::Skip
                } else {
                    pr.running_commit_sha = Some(event.sha.clone());
                    Plan::Republish(pr.clone())
                }
            } else if pr.reported_commit_sha.as_deref() == Some(event.sha.as_str()) {
                Plan::Skip
            } else {
                if pr.running_commit_sha.as_deref() == Some(event.sha.as_str()) {
                    pr.running_commit_sha = None;
                }
                pr.reported_commit_sha = Some(event.sha.clone());
                let report = pr.clone();
                pr.countdown_fallback = false;
                Plan::Report(report)
            };

            store.persist();
            plan
        };

        match plan {
            Plan::Skip => {
                tracing::debug!(pr = %key, sha = %event.sha, context = %event.context, "status already relayed");
                Ok(())
            }
            Plan::Republish(pr) => {
                self.republish(&pr, &statuses).await;
                Ok(())
            }
            Plan::Report(pr) => {
                let state = aggregate_state(&statuses);
                self.republish(&pr, &statuses).await;
                if pr.countdown_fallback {
                    self.resolve_countdown(&pr, state).await;
                }
                self.post_summary(&key, &pr, state, &statuses).await
            }
        }
    }

    /// Relay every context onto the pull request head in the upstream repository
    async fn republish(&self, pr: &TrackedPullRequest, statuses: &[CommitStatus]) {
        let publisher = self.github.status_publisher(&pr.owner, &pr.repo);

        let results = futures::future::join_all(statuses.iter().map(|status| {
            let publisher = &publisher;
            let status = NewStatus::from(status);
            async move { publisher.create_status(&pr.head_sha, &status).await }
        }))
        .await;

        for (status, result) in statuses.iter().zip(results) {
            match result {
                Ok(()) => {
                    tracing::debug!(pr = %pr.key(), context = %status.context, state = %status.state, "status relayed");
                }
                Err(err) => {
                    tracing::warn!(pr = %pr.key(), context = %status.context, "failed to relay status: {err}");
                }
            }
        }
    }

    /// Settle the pending countdown published under the bot's context, which no CI context overwrites.
    async fn resolve_countdown(&self, pr: &TrackedPullRequest, state: StatusState) {
        let status = NewStatus {
            state,
            target_url: None,
            description: Some(outcome_description(state)),
            context: self.config.bot_name.clone(),
        };

        if let Err(err) = self
            .github
            .status_publisher(&pr.owner, &pr.repo)
            .create_status(&pr.head_sha, &status)
            .await
        {
            tracing::warn!(pr = %pr.key(), "failed to resolve countdown status: {err}");
        }
    }

    async fn post_summary(
        &self,
        key: &PrKey,
        pr: &TrackedPullRequest,
        state: StatusState,
        statuses: &[CommitStatus],
    ) -> anyhow::Result<()> {
        let message = IssueMessage::TestsFinished(TestReport {
            sha: pr.head_sha.clone(),
            state,
            details: statuses
                .iter()
                .map(|status| (status.context.clone(), status.target_url.clone()))
                .collect(),
        });

        let publisher = self.github.status_publisher(&pr.owner, &pr.repo);

        match &pr.summary_comment {
            Some(comment) if comment.sha == pr.head_sha => {
                publisher
                    .edit_comment(comment.id, &message)
                    .await
                    .context("edit summary comment")?;
                tracing::info!(pr = %key, sha = %pr.head_sha, %state, "summary comment updated");
            }
            _ => {
                let id = publisher
                    .create_comment(pr.number, &message)
                    .await
                    .context("post summary comment")?;
                tracing::info!(pr = %key, sha = %pr.head_sha, %state, "summary comment posted");

                let mut store = self.store.lock();
                if let Some(tracked) = store.get_mut(key) {
                    tracked.summary_comment = Some(SummaryComment {
                        sha: pr.head_sha.clone(),
                        id,
                    });
                    store.persist();
                }
            }
        }

        Ok(())
    }
}
