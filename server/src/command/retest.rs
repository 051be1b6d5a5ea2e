use std::sync::Arc;

use anyhow::Context;

use super::{BotCommand, RetestScope};
use crate::ci::{CiBuild, CiRestarter};
use crate::engine::Engine;
use crate::event::{CommentAction, IssueCommentEvent};
use crate::github::models::StatusState;
use crate::github::repo::GitHubRepoClient;
use crate::github::GitHubClients;
use crate::store::{PrKey, TrackedPullRequest};
use crate::utils::same_account;

impl<G: GitHubClients, C: CiRestarter> Engine<G, C> {
    pub(crate) fn handle_comment(self: &Arc<Self>, event: IssueCommentEvent) {
        if event.action != CommentAction::Created || !event.is_pull_request {
            return;
        }

        if same_account(&event.author, &self.config.bot_name) {
            return;
        }

        let Some(command) = BotCommand::parse(&event.body, &self.config.bot_name) else {
            return;
        };

        let key = PrKey::new(&event.repo, event.issue_number);
        if self.store.lock().get(&key).is_none() {
            tracing::debug!(pr = %key, "command on untracked pull request");
            return;
        }

        tracing::info!(pr = %key, author = %event.author, ?command, "received command");

        let engine = self.clone();
        self.spawn_logged(key.clone(), "run command", async move {
            engine.run_command(key, event, command).await
        });
    }

    async fn run_command(&self, key: PrKey, event: IssueCommentEvent, command: BotCommand) -> anyhow::Result<()> {
        let authorized = self
            .github
            .upstream(&event.owner, &event.repo)
            .is_collaborator(&event.author)
            .await
            .context("check collaborator")?;

        if !authorized {
            tracing::info!(pr = %key, author = %event.author, "ignoring command from non-collaborator");
            return Ok(());
        }

        if !command.force && self.timers.lock().has_outstanding(&key) {
            tracing::info!(pr = %key, "sync pending, ignoring retest");
            return Ok(());
        }

        if command.force && command.scope == RetestScope::All {
            self.timers.lock().cancel_all(&key);
        }

        let Some(pr) = self.store.lock().get(&key).cloned() else {
            return Ok(());
        };

        match command.scope {
            RetestScope::All => {
                self.expect_new_report(&key);
                self.rebuild(&key).await
            }
            RetestScope::Failed => self.restart_failed(&key, &pr, command.force).await,
        }
    }

    /// Forget the last reported sha so the rerun's outcome gets published.
    fn expect_new_report(&self, key: &PrKey) {
        let mut store = self.store.lock();
        if let Some(pr) = store.get_mut(key) {
            pr.reported_commit_sha = None;
            store.persist();
        }
    }

    /// Restart non-successful contexts through their provider. Contexts no provider can restart
    /// fall back to a single shadow branch rebuild.
    async fn restart_failed(&self, key: &PrKey, pr: &TrackedPullRequest, force: bool) -> anyhow::Result<()> {
        let combined = self
            .github
            .fork(&pr.repo)
            .get_combined_status(&pr.shadow_branch)
            .await
            .context("get combined status")?;

        let targets: Vec<_> = combined
            .statuses
            .iter()
            .filter(|status| force || status.state != StatusState::Success)
            .collect();

        if targets.is_empty() {
            tracing::info!(pr = %key, "nothing to restart");
            return Ok(());
        }

        self.expect_new_report(key);

        let mut rebuild = false;

        for status in targets {
            let Some(build) = CiBuild::from_status(status) else {
                tracing::debug!(pr = %key, context = %status.context, "no restartable build");
                rebuild = true;
                continue;
            };

            if let Err(err) = self.ci.restart(&build, force).await {
                tracing::warn!(pr = %key, context = %status.context, "failed to restart build: {err}");
                rebuild = true;
            }
        }

        if rebuild {
            self.rebuild(key).await?;
        }

        Ok(())
    }
}
