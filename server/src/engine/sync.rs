use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use super::timers::TimerKind;
use super::Engine;
use crate::ci::CiRestarter;
use crate::event::{PullRequestAction, PullRequestEvent};
use crate::github::config::title_mark;
use crate::github::messages::countdown_description;
use crate::github::models::{NewStatus, StatusState};
use crate::github::repo::GitHubRepoClient;
use crate::github::GitHubClients;
use crate::store::{Phase, PrKey, TrackedPullRequest};

/// Point `branch` at `sha`, creating it when missing and overwriting it otherwise.
async fn point_shadow_branch(fork: &impl GitHubRepoClient, branch: &str, sha: &str) -> anyhow::Result<()> {
    match fork.get_branch(branch).await.context("get shadow branch")? {
        Some(existing) if existing.sha == sha => {
            tracing::debug!(branch, sha, "shadow branch already up to date");
        }
        Some(_) => {
            fork.sync_branch_with_commit(branch, sha)
                .await
                .context("sync shadow branch")?;
            tracing::info!(branch, sha, "shadow branch synced");
        }
        None => {
            fork.create_branch(branch, sha).await.context("create shadow branch")?;
            tracing::info!(branch, sha, "shadow branch created");
        }
    }

    Ok(())
}

impl<G: GitHubClients, C: CiRestarter> Engine<G, C> {
    pub(super) fn handle_pull_request(self: &Arc<Self>, event: PullRequestEvent) {
        if self.config.sync.is_ignored_base(&event.base_ref) {
            tracing::debug!(repo = %event.repo, pr_number = event.number, base = %event.base_ref, "ignoring scaffolding pull request");
            return;
        }

        let key = PrKey::new(&event.repo, event.number);

        match event.action {
            PullRequestAction::Opened | PullRequestAction::Reopened => self.track(key, event),
            PullRequestAction::Synchronize => self.synchronize(key, event),
            PullRequestAction::Closed => self.close(key),
        }
    }

    fn track(self: &Arc<Self>, key: PrKey, event: PullRequestEvent) {
        {
            let mut store = self.store.lock();
            match store.get_mut(&key) {
                Some(pr) => {
                    pr.head_sha = event.head_sha.clone();
                    pr.title = event.title.clone();
                    pr.config_commit_sha = None;
                    if pr.phase == Phase::Synced {
                        pr.phase = Phase::Outdated;
                    }
                    tracing::info!(pr = %key, sha = %event.head_sha, "pull request already tracked");
                }
                None => {
                    let shadow_branch = self.config.sync.shadow_branch(event.id);
                    tracing::info!(pr = %key, sha = %event.head_sha, branch = %shadow_branch, "tracking pull request");
                    store.insert(TrackedPullRequest::new(&event, shadow_branch));
                }
            }
            store.persist();
        }

        self.arm_sync(key, self.config.sync.create_branch_delay());
    }

    fn synchronize(self: &Arc<Self>, key: PrKey, event: PullRequestEvent) {
        let pr = {
            let mut store = self.store.lock();
            let Some(pr) = store.get_mut(&key) else {
                tracing::debug!(pr = %key, "ignoring push to untracked pull request");
                return;
            };

            pr.head_sha = event.head_sha.clone();
            pr.title = event.title.clone();
            pr.running_commit_sha = None;
            // the shadow branch still holds the previous head until the sync timer fires
            pr.config_commit_sha = None;
            if pr.known_contexts.is_empty() {
                pr.countdown_fallback = true;
            }
            if pr.phase == Phase::Synced {
                pr.phase = Phase::Outdated;
            }

            let pr = pr.clone();
            store.persist();
            pr
        };

        tracing::info!(pr = %key, sha = %pr.head_sha, "new commits pushed");

        self.arm_sync(key.clone(), self.config.sync.sync_delay());
        self.arm_countdown(key, pr);
    }

    fn close(self: &Arc<Self>, key: PrKey) {
        let cancelled = self.timers.lock().cancel_all(&key);

        let removed = {
            let mut store = self.store.lock();
            let removed = store.remove(&key);
            if removed.is_some() {
                store.persist();
            }
            removed
        };

        let Some(pr) = removed else {
            tracing::debug!(pr = %key, "closed pull request was not tracked");
            return;
        };

        tracing::info!(pr = %key, cancelled, "pull request closed");

        let temp_branch = pr
            .config_commit_sha
            .is_some()
            .then(|| self.config.sync.temp_branch(&pr.shadow_branch));
        let fork = self.github.fork(&pr.repo);

        self.spawn_logged(key, "tear down shadow branch", async move {
            fork.delete_branch(&pr.shadow_branch)
                .await
                .context("delete shadow branch")?;

            if let Some(temp_branch) = temp_branch {
                fork.delete_branch(&temp_branch).await.context("delete temp branch")?;
            }

            tracing::info!(branch = %pr.shadow_branch, "shadow branch deleted");
            Ok(())
        });
    }

    pub(crate) fn arm_sync(self: &Arc<Self>, key: PrKey, delay: Duration) {
        let engine = self.clone();
        let task_key = key.clone();

        let replaced = self.timers.lock().arm(key.clone(), TimerKind::Sync, move |id| {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;

                if !engine.timers.lock().release(&task_key, TimerKind::Sync, id) {
                    return;
                }

                if let Err(err) = engine.run_sync(&task_key).await {
                    tracing::error!(pr = %task_key, "failed to sync shadow branch: {err:#}");
                }
            })
            .abort_handle()
        });

        tracing::debug!(pr = %key, ?delay, replaced, "sync timer armed");
    }

    fn arm_countdown(self: &Arc<Self>, key: PrKey, pr: TrackedPullRequest) {
        let engine = self.clone();
        let task_key = key.clone();

        self.timers.lock().arm(key, TimerKind::Countdown, move |id| {
            tokio::spawn(async move {
                let sync = &engine.config.sync;
                let interval = sync.countdown_interval();

                for step in (1..=sync.countdown_steps()).rev() {
                    let minutes_left = (step * interval.as_secs()).min(sync.sync_delay_secs).div_ceil(60);
                    engine.publish_countdown(&pr, minutes_left).await;

                    if step > 1 {
                        tokio::time::sleep(interval).await;
                    }
                }

                engine.timers.lock().release(&task_key, TimerKind::Countdown, id);
            })
            .abort_handle()
        });
    }

    async fn publish_countdown(&self, pr: &TrackedPullRequest, minutes_left: u64) {
        let publisher = self.github.status_publisher(&pr.owner, &pr.repo);

        let contexts: Vec<String> = if pr.known_contexts.is_empty() {
            vec![self.config.bot_name.clone()]
        } else {
            pr.known_contexts.iter().cloned().collect()
        };

        let description = countdown_description(minutes_left);

        let results = futures::future::join_all(contexts.iter().map(|context| {
            let status = NewStatus {
                state: StatusState::Pending,
                target_url: None,
                description: Some(description.clone()),
                context: context.clone(),
            };
            let publisher = &publisher;

            async move { publisher.create_status(&pr.head_sha, &status).await }
        }))
        .await;

        for (context, result) in contexts.iter().zip(results) {
            if let Err(err) = result {
                tracing::warn!(pr = %pr.key(), context, "failed to publish countdown: {err}");
            }
        }
    }

    /// Bring the shadow branch to the tracked head, synthesizing a config commit when the title asks for one.
    pub(crate) async fn run_sync(&self, key: &PrKey) -> anyhow::Result<()> {
        let Some(pr) = self.store.lock().get(key).cloned() else {
            return Ok(());
        };

        let fork = self.github.fork(&pr.repo);

        let config_commit = match title_mark(&pr.title) {
            Some(mark) => self
                .synthesize_config_commit(fork.as_ref(), &pr, &mark)
                .await
                .context("synthesize config commit")?,
            None => None,
        };

        let target = config_commit.as_deref().unwrap_or(&pr.head_sha);
        point_shadow_branch(fork.as_ref(), &pr.shadow_branch, target).await?;

        let still_tracked = {
            let mut store = self.store.lock();
            match store.get_mut(key) {
                Some(tracked) => {
                    if tracked.head_sha == pr.head_sha {
                        tracked.config_commit_sha = config_commit;
                        tracked.phase = Phase::Synced;
                    }
                    store.persist();
                    true
                }
                None => false,
            }
        };

        if !still_tracked {
            tracing::info!(pr = %key, "pull request closed during sync");
            fork.delete_branch(&pr.shadow_branch)
                .await
                .context("delete orphaned shadow branch")?;
        }

        Ok(())
    }

    /// Delete the shadow branch and create it again so the CI provider sees a fresh push.
    pub(crate) async fn rebuild(&self, key: &PrKey) -> anyhow::Result<()> {
        let Some(pr) = self.store.lock().get(key).cloned() else {
            return Ok(());
        };

        tracing::info!(pr = %key, branch = %pr.shadow_branch, "rebuilding shadow branch");

        self.github
            .fork(&pr.repo)
            .delete_branch(&pr.shadow_branch)
            .await
            .context("delete shadow branch")?;

        self.run_sync(key).await
    }

    async fn synthesize_config_commit(
        &self,
        fork: &G::Repo,
        pr: &TrackedPullRequest,
        mark: &str,
    ) -> anyhow::Result<Option<String>> {
        let sync = &self.config.sync;
        let variant_path = sync.variant_path(mark);

        let Some(variant) = fork
            .get_file_content(&variant_path, &pr.head_sha)
            .await
            .context("get config variant")?
        else {
            tracing::debug!(pr = %pr.key(), path = %variant_path, "no config variant, using the plain config");
            return Ok(None);
        };

        let temp_branch = sync.temp_branch(&pr.shadow_branch);

        fork.delete_branch(&temp_branch)
            .await
            .context("delete stale temp branch")?;
        fork.create_branch(&temp_branch, &pr.head_sha)
            .await
            .context("create temp branch")?;

        let result = self.commit_config(fork, pr, &temp_branch, &variant.content).await;

        if let Err(err) = fork.delete_branch(&temp_branch).await {
            tracing::warn!(branch = %temp_branch, "failed to delete temp branch: {err}");
        }

        let sha = result?;
        tracing::info!(pr = %pr.key(), sha = %sha, path = %variant_path, "config commit synthesized");

        Ok(Some(sha))
    }

    async fn commit_config(
        &self,
        fork: &G::Repo,
        pr: &TrackedPullRequest,
        temp_branch: &str,
        variant: &str,
    ) -> anyhow::Result<String> {
        let sync = &self.config.sync;

        let content = format!(
            "{}\nbranches:\n  except:\n    - {temp_branch}\n",
            variant.trim_end_matches('\n')
        );

        let mut tip = fork
            .replace_file_content(temp_branch, &sync.ci_config_path, &content, "[ci skip]")
            .await
            .context("replace ci config")?;

        for path in &sync.removed_ci_config_paths {
            match fork.delete_file_content(temp_branch, path, "[ci skip]").await {
                Ok(commit) => tip = commit,
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err).with_context(|| format!("delete {path}")),
            }
        }

        let head = fork.get_commit(&pr.head_sha).await.context("get head commit")?;

        let commit = fork
            .create_commit(&head.message, &tip.tree.sha, &[pr.head_sha.clone()])
            .await
            .context("create config commit")?;

        Ok(commit.sha)
    }

    /// Compare tracked pull requests against the open ones: closed pull requests are torn down
    /// and moved heads are handled as pushes.
    pub async fn reconcile(self: &Arc<Self>) {
        let repos: BTreeSet<(String, String)> = self
            .store
            .lock()
            .iter()
            .map(|pr| (pr.owner.clone(), pr.repo.clone()))
            .collect();

        for (owner, repo) in repos {
            let open = match self.github.upstream(&owner, &repo).get_open_pull_requests().await {
                Ok(open) => open,
                Err(err) => {
                    tracing::warn!(owner = %owner, repo = %repo, "failed to list open pull requests: {err}");
                    continue;
                }
            };

            let open: HashMap<_, _> = open.into_iter().map(|pr| (pr.number, pr)).collect();

            let tracked: Vec<TrackedPullRequest> = self
                .store
                .lock()
                .iter()
                .filter(|pr| pr.owner == owner && pr.repo == repo)
                .cloned()
                .collect();

            for pr in tracked {
                match open.get(&pr.number) {
                    None => {
                        tracing::info!(pr = %pr.key(), "tracked pull request is no longer open");
                        self.close(pr.key());
                    }
                    Some(current) if current.head.sha != pr.head_sha => {
                        tracing::info!(pr = %pr.key(), sha = %current.head.sha, "tracked pull request moved");
                        self.handle_pull_request(PullRequestEvent::new(
                            PullRequestAction::Synchronize,
                            &owner,
                            &repo,
                            current,
                        ));
                    }
                    Some(_) => {}
                }
            }
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::engine::test_utils::{advance, Harness, BOT, REPO, UPSTREAM};
    use crate::github::models::{PrBranch, PullRequest};

    #[tokio::test(start_paused = true)]
    async fn test_opened_then_closed() {
        let harness = Harness::new();

        harness.pull_request(PullRequestAction::Opened, 1, 42, "s1", "fix");
        assert_eq!(harness.tracked(1).unwrap().phase, Phase::Provisioning);

        advance(10).await;
        assert_eq!(harness.calls("create_branch"), vec!["create_branch build-bot/testcafe rp-42 s1"]);
        assert_eq!(harness.fork_branch("rp-42").as_deref(), Some("s1"));

        let tracked = harness.tracked(1).unwrap();
        assert_eq!(tracked.phase, Phase::Synced);
        assert_eq!(tracked.shadow_branch, "rp-42");
        assert_eq!(tracked.owner, UPSTREAM);

        harness.pull_request(PullRequestAction::Closed, 1, 42, "s1", "fix");
        assert!(harness.tracked(1).is_none());

        advance(1).await;
        assert_eq!(harness.calls("create_branch").len(), 1);
        assert_eq!(harness.calls("delete_branch"), vec!["delete_branch build-bot/testcafe rp-42"]);
        assert!(harness.fork_branch("rp-42").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_before_branch_created() {
        let harness = Harness::new();

        harness.pull_request(PullRequestAction::Opened, 1, 42, "s1", "fix");
        harness.pull_request(PullRequestAction::Closed, 1, 42, "s1", "fix");
        assert!(harness.engine.timers.lock().is_empty());

        advance(60).await;
        assert!(harness.calls("create_branch").is_empty());
        assert!(harness.tracked(1).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignores_scaffolding_base() {
        let harness = Harness::new();

        harness.engine.dispatch(crate::event::BotEvent::PullRequest(PullRequestEvent {
            action: PullRequestAction::Opened,
            repo: REPO.to_owned(),
            owner: UPSTREAM.to_owned(),
            number: 9,
            id: 99,
            head_sha: "t1".to_owned(),
            title: "scaffold".to_owned(),
            base_ref: "temp-pr-12".to_owned(),
        }));

        advance(10).await;
        assert!(harness.tracked(9).is_none());
        assert!(harness.fake.lock().calls.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pushes_are_debounced() {
        let harness = Harness::new();

        harness.pull_request(PullRequestAction::Opened, 1, 42, "s1", "fix");
        advance(10).await;

        harness.pull_request(PullRequestAction::Synchronize, 1, 42, "s2", "fix");
        assert_eq!(harness.tracked(1).unwrap().phase, Phase::Outdated);
        advance(120).await;
        harness.pull_request(PullRequestAction::Synchronize, 1, 42, "s3", "fix");

        // 290 seconds after the second push: still waiting
        advance(290).await;
        assert!(harness.calls("sync_branch").is_empty());

        advance(20).await;
        assert_eq!(harness.calls("sync_branch"), vec!["sync_branch build-bot/testcafe rp-42 s3"]);
        assert_eq!(harness.tracked(1).unwrap().phase, Phase::Synced);

        advance(600).await;
        assert_eq!(harness.calls("sync_branch").len(), 1);
        assert!(!harness.engine.timers.lock().has_outstanding(&PrKey::new(REPO, 1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_statuses() {
        let harness = Harness::new();

        harness.pull_request(PullRequestAction::Opened, 1, 42, "s1", "fix");
        advance(10).await;

        harness.pull_request(PullRequestAction::Synchronize, 1, 42, "s2", "fix");
        advance(1).await;
        assert_eq!(
            harness.calls("create_status"),
            vec!["create_status DevExpress/testcafe s2 build-bot pending Tests have been triggered by a modification and will start in 5 minutes."]
        );

        advance(300).await;
        insta::assert_debug_snapshot!(harness.calls("create_status"), @r#"
        [
            "create_status DevExpress/testcafe s2 build-bot pending Tests have been triggered by a modification and will start in 5 minutes.",
            "create_status DevExpress/testcafe s2 build-bot pending Tests have been triggered by a modification and will start in 4 minutes.",
            "create_status DevExpress/testcafe s2 build-bot pending Tests have been triggered by a modification and will start in 3 minutes.",
            "create_status DevExpress/testcafe s2 build-bot pending Tests have been triggered by a modification and will start in 2 minutes.",
            "create_status DevExpress/testcafe s2 build-bot pending Tests have been triggered by a modification and will start in 1 minute.",
        ]
        "#);
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_uses_known_contexts() {
        let harness = Harness::new();

        harness.pull_request(PullRequestAction::Opened, 1, 42, "s1", "fix");
        advance(10).await;
        harness
            .engine
            .store
            .lock()
            .get_mut(&PrKey::new(REPO, 1))
            .unwrap()
            .known_contexts
            .extend(["ci-a".to_owned(), "ci-b".to_owned()]);

        harness.pull_request(PullRequestAction::Synchronize, 1, 42, "s2", "fix");
        advance(1).await;

        let mut calls = harness.calls("create_status");
        calls.sort();
        assert_eq!(
            calls,
            vec![
                "create_status DevExpress/testcafe s2 ci-a pending Tests have been triggered by a modification and will start in 5 minutes.",
                "create_status DevExpress/testcafe s2 ci-b pending Tests have been triggered by a modification and will start in 5 minutes.",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_to_untracked_pull_request() {
        let harness = Harness::new();

        harness.pull_request(PullRequestAction::Synchronize, 3, 7, "s2", "fix");
        advance(600).await;

        assert!(harness.tracked(3).is_none());
        assert!(harness.fake.lock().calls.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reopened_syncs_existing_branch() {
        let harness = Harness::new();
        harness
            .fake
            .lock()
            .branches
            .insert((format!("{BOT}/{REPO}"), "rp-42".to_owned()), "old".to_owned());

        harness.pull_request(PullRequestAction::Reopened, 1, 42, "s1", "fix");
        advance(10).await;

        assert!(harness.calls("create_branch").is_empty());
        assert_eq!(harness.calls("sync_branch"), vec!["sync_branch build-bot/testcafe rp-42 s1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_opened_for_tracked_pull_request_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        {
            let harness = Harness::with_store(crate::store::CorrelationStore::load(&path));
            harness.pull_request(PullRequestAction::Opened, 1, 42, "s1", "fix");
            advance(10).await;

            let mut store = harness.engine.store.lock();
            store
                .get_mut(&PrKey::new(REPO, 1))
                .unwrap()
                .known_contexts
                .insert("ci-a".to_owned());
            store.persist();
        }

        let harness = Harness::with_store(crate::store::CorrelationStore::load(&path));
        harness
            .fake
            .lock()
            .branches
            .insert((format!("{BOT}/{REPO}"), "rp-42".to_owned()), "s1".to_owned());

        harness.pull_request(PullRequestAction::Opened, 1, 42, "s2", "fix");
        let tracked = harness.tracked(1).unwrap();
        assert_eq!(tracked.head_sha, "s2");
        assert_eq!(tracked.phase, Phase::Outdated);
        assert!(tracked.known_contexts.contains("ci-a"));

        advance(10).await;
        assert!(harness.calls("create_branch").is_empty());
        assert_eq!(harness.calls("sync_branch"), vec!["sync_branch build-bot/testcafe rp-42 s2"]);
        assert_eq!(harness.fork_branch("rp-42").as_deref(), Some("s2"));
        assert_eq!(harness.tracked(1).unwrap().phase, Phase::Synced);
        assert_eq!(harness.engine.tracked().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_drops_previous_config_commit() {
        let harness = Harness::new();
        harness.fake.lock().files.insert(
            (format!("{BOT}/{REPO}"), ".travis-docs.yml".to_owned()),
            "script: docs\n".to_owned(),
        );

        harness.pull_request(PullRequestAction::Opened, 1, 42, "s1", "[docs] x");
        advance(10).await;
        assert_eq!(harness.tracked(1).unwrap().config_commit_sha.as_deref(), Some("config2"));

        harness.pull_request(PullRequestAction::Synchronize, 1, 42, "s2", "[docs] x");
        let tracked = harness.tracked(1).unwrap();
        assert!(tracked.config_commit_sha.is_none());
        assert!(!tracked.matches_sha("config2"));

        advance(310).await;
        let tracked = harness.tracked(1).unwrap();
        assert_eq!(tracked.config_commit_sha.as_deref(), Some("config4"));
        assert_eq!(harness.fork_branch("rp-42").as_deref(), Some("config4"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_without_sync_delay() {
        let harness = Harness::with_sync(crate::github::config::SyncConfig {
            sync_delay_secs: 0,
            ..Default::default()
        });

        harness.pull_request(PullRequestAction::Opened, 1, 42, "s1", "fix");
        advance(10).await;

        harness.pull_request(PullRequestAction::Synchronize, 1, 42, "s2", "fix");
        advance(1).await;

        assert_eq!(
            harness.calls("create_status"),
            vec!["create_status DevExpress/testcafe s2 build-bot pending Tests have been triggered by a modification and will start shortly."]
        );
        assert_eq!(harness.calls("sync_branch"), vec!["sync_branch build-bot/testcafe rp-42 s2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_config_commit_synthesis() {
        let harness = Harness::new();
        {
            let mut fake = harness.fake.lock();
            fake.files.insert(
                (format!("{BOT}/{REPO}"), ".travis-docs.yml".to_owned()),
                "script: npm run docs\n".to_owned(),
            );
        }

        harness.pull_request(PullRequestAction::Opened, 1, 42, "s1", "[docs] update readme");
        advance(10).await;

        insta::assert_debug_snapshot!(harness.fake.lock().calls, @r#"
        [
            "delete_branch build-bot/testcafe build-bot-temp-rp-42",
            "create_branch build-bot/testcafe build-bot-temp-rp-42 s1",
            "update_file build-bot/testcafe build-bot-temp-rp-42 .travis.yml [ci skip]",
            "create_commit build-bot/testcafe tree-c1 s1 message for s1",
            "delete_branch build-bot/testcafe build-bot-temp-rp-42",
            "create_branch build-bot/testcafe rp-42 config2",
        ]
        "#);

        assert_eq!(
            harness.fake.lock().files.get(&(format!("{BOT}/{REPO}"), ".travis.yml".to_owned())).map(String::as_str),
            Some("script: npm run docs\nbranches:\n  except:\n    - build-bot-temp-rp-42\n")
        );

        let tracked = harness.tracked(1).unwrap();
        assert_eq!(tracked.config_commit_sha.as_deref(), Some("config2"));
        assert_eq!(tracked.phase, Phase::Synced);

        harness.pull_request(PullRequestAction::Closed, 1, 42, "s1", "fix");
        advance(1).await;
        assert_eq!(
            harness.calls("delete_branch")[2..],
            ["delete_branch build-bot/testcafe rp-42", "delete_branch build-bot/testcafe build-bot-temp-rp-42"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_config_commit_removes_competing_configs() {
        let harness = Harness::with_sync(crate::github::config::SyncConfig {
            removed_ci_config_paths: vec!["appveyor.yml".to_owned(), ".gitlab-ci.yml".to_owned()],
            ..Default::default()
        });

        {
            let mut fake = harness.fake.lock();
            let repo = format!("{BOT}/{REPO}");
            fake.files
                .insert((repo.clone(), ".travis-docs.yml".to_owned()), "script: docs".to_owned());
            fake.files
                .insert((repo, "appveyor.yml".to_owned()), "build: off".to_owned());
        }

        harness.pull_request(PullRequestAction::Opened, 1, 42, "s1", "[docs] x");
        advance(10).await;

        assert_eq!(
            harness.calls("delete_file"),
            vec![
                "delete_file build-bot/testcafe build-bot-temp-rp-42 appveyor.yml",
                "delete_file build-bot/testcafe build-bot-temp-rp-42 .gitlab-ci.yml",
            ]
        );
        assert_eq!(
            harness.calls("create_commit"),
            vec!["create_commit build-bot/testcafe tree-c2 s1 message for s1"]
        );
        assert_eq!(harness.tracked(1).unwrap().config_commit_sha.as_deref(), Some("config3"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_variant_uses_plain_config() {
        let harness = Harness::new();

        harness.pull_request(PullRequestAction::Opened, 1, 42, "s1", "[docs] x");
        advance(10).await;

        assert_eq!(harness.fake.lock().calls, vec!["create_branch build-bot/testcafe rp-42 s1"]);
        assert!(harness.tracked(1).unwrap().config_commit_sha.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_rearms_unsynced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        {
            let harness = Harness::with_store(crate::store::CorrelationStore::load(&path));
            harness.pull_request(PullRequestAction::Opened, 1, 42, "s1", "fix");
            harness.pull_request(PullRequestAction::Opened, 2, 43, "t1", "fix");
            advance(10).await;
            harness.pull_request(PullRequestAction::Synchronize, 2, 43, "t2", "fix");
        }

        let harness = Harness::with_store(crate::store::CorrelationStore::load(&path));
        assert_eq!(harness.tracked(1).unwrap().phase, Phase::Synced);
        assert_eq!(harness.tracked(2).unwrap().phase, Phase::Outdated);

        harness.engine.resume();
        advance(10).await;

        assert_eq!(harness.calls("create_branch"), vec!["create_branch build-bot/testcafe rp-43 t2"]);
        assert_eq!(harness.tracked(2).unwrap().phase, Phase::Synced);
    }

    fn open_pull_request(number: u64, id: u64, sha: &str) -> PullRequest {
        PullRequest {
            id,
            number,
            title: "fix".to_owned(),
            state: "open".to_owned(),
            head: PrBranch {
                ref_field: "feature".to_owned(),
                sha: sha.to_owned(),
                repo: None,
            },
            base: PrBranch {
                ref_field: "master".to_owned(),
                sha: "base".to_owned(),
                repo: None,
            },
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconcile() {
        let harness = Harness::new();

        harness.pull_request(PullRequestAction::Opened, 1, 42, "s1", "fix");
        harness.pull_request(PullRequestAction::Opened, 2, 43, "t1", "fix");
        harness.pull_request(PullRequestAction::Opened, 3, 44, "u1", "fix");
        advance(10).await;

        harness.fake.lock().open_pull_requests.insert(
            format!("{UPSTREAM}/{REPO}"),
            vec![open_pull_request(1, 42, "s1"), open_pull_request(2, 43, "t2")],
        );

        harness.engine.reconcile().await;
        advance(1).await;

        assert!(harness.tracked(3).is_none());
        assert_eq!(harness.calls("delete_branch"), vec!["delete_branch build-bot/testcafe rp-44"]);
        assert_eq!(harness.tracked(2).unwrap().head_sha, "t2");
        assert_eq!(harness.tracked(1).unwrap().phase, Phase::Synced);

        advance(300).await;
        assert_eq!(harness.calls("sync_branch"), vec!["sync_branch build-bot/testcafe rp-43 t2"]);
    }
}
