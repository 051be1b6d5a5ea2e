//! The per pull request state machine behind every webhook.
//!
//! [`Engine::dispatch`] applies the store transition an event implies synchronously and
//! hands provider I/O to spawned tasks. Store and timer locks are never held across an
//! `.await`; tasks re-read the store after every provider call.

use std::future::Future;
use std::sync::Arc;

use crate::ci::CiRestarter;
use crate::event::BotEvent;
use crate::github::config::SyncConfig;
use crate::github::GitHubClients;
use crate::store::{CorrelationStore, PrKey, TrackedPullRequest};

mod status;
mod sync;
pub mod timers;

use timers::TimerTable;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// The bot account, owner of the fork that hosts shadow branches
    pub bot_name: String,
    pub sync: SyncConfig,
}

pub struct Engine<G, C> {
    pub(crate) github: G,
    pub(crate) ci: C,
    pub(crate) config: EngineConfig,
    pub(crate) store: parking_lot::Mutex<CorrelationStore>,
    pub(crate) timers: parking_lot::Mutex<TimerTable>,
}

impl<G: GitHubClients, C: CiRestarter> Engine<G, C> {
    pub fn new(github: G, ci: C, config: EngineConfig, store: CorrelationStore) -> Arc<Self> {
        Arc::new(Self {
            github,
            ci,
            config,
            store: parking_lot::Mutex::new(store),
            timers: parking_lot::Mutex::new(TimerTable::default()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn dispatch(self: &Arc<Self>, event: BotEvent) {
        match event {
            BotEvent::PullRequest(event) => self.handle_pull_request(event),
            BotEvent::Status(event) => self.handle_status(event),
            BotEvent::IssueComment(event) => self.handle_comment(event),
        }
    }

    /// Re-arm sync timers for pull requests whose shadow branch was not in sync when the state was saved.
    pub fn resume(self: &Arc<Self>) {
        let pending: Vec<PrKey> = self
            .store
            .lock()
            .iter()
            .filter(|pr| pr.phase != crate::store::Phase::Synced)
            .map(TrackedPullRequest::key)
            .collect();

        for key in pending {
            tracing::info!(pr = %key, "resuming shadow branch sync");
            self.arm_sync(key, self.config.sync.create_branch_delay());
        }
    }

    /// A snapshot of every tracked pull request
    pub fn tracked(&self) -> Vec<TrackedPullRequest> {
        self.store.lock().iter().cloned().collect()
    }

    pub fn tracked_pull_request(&self, key: &PrKey) -> Option<TrackedPullRequest> {
        self.store.lock().get(key).cloned()
    }

    /// Run provider I/O for `key` in the background. Failures stop at this boundary.
    pub(crate) fn spawn_logged<F>(&self, key: PrKey, action: &'static str, fut: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        tokio::spawn(async move {
            if let Err(err) = fut.await {
                tracing::error!(pr = %key, "failed to {action}: {err:#}");
            }
        });
    }
}
