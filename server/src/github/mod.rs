use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use octocrab::Octocrab;
use repo::{GitHubRepoClient, RepoClient};

pub mod config;
pub mod messages;
pub mod models;
pub mod repo;

/// Hands out repository clients bound to the right credential.
pub trait GitHubClients: Send + Sync + 'static {
    type Repo: GitHubRepoClient + 'static;

    /// The bot's fork of `repo`, where shadow branches live
    fn fork(&self, repo: &str) -> Arc<Self::Repo>;

    /// The upstream repository, authenticated as the bot
    fn upstream(&self, owner: &str, repo: &str) -> Arc<Self::Repo>;

    /// The upstream repository, authenticated as the identity statuses and comments are attributed to
    fn status_publisher(&self, owner: &str, repo: &str) -> Arc<Self::Repo>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Identity {
    Bot,
    Collaborator,
}

pub struct GitHubService {
    bot_name: String,
    bot: Octocrab,
    collaborator: Option<Octocrab>,
    repos: parking_lot::Mutex<HashMap<(Identity, String, String), Arc<RepoClient>>>,
}

impl GitHubService {
    /// Create a new GitHubService authenticated with personal access tokens
    pub fn new(bot_name: &str, bot_token: &str, collaborator_token: Option<&str>) -> anyhow::Result<Self> {
        let bot = Octocrab::builder()
            .personal_token(bot_token.to_owned())
            .build()
            .context("build bot octocrab client")?;

        let collaborator = collaborator_token
            .map(|token| {
                Octocrab::builder()
                    .personal_token(token.to_owned())
                    .build()
                    .context("build collaborator octocrab client")
            })
            .transpose()?;

        Ok(Self::new_with_clients(bot_name, bot, collaborator))
    }

    pub fn new_with_clients(bot_name: &str, bot: Octocrab, collaborator: Option<Octocrab>) -> Self {
        Self {
            bot_name: bot_name.to_owned(),
            bot,
            collaborator,
            repos: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    fn client(&self, identity: Identity, owner: &str, repo: &str) -> Arc<RepoClient> {
        let mut repos = self.repos.lock();

        repos
            .entry((identity, owner.to_owned(), repo.to_owned()))
            .or_insert_with(|| {
                let client = match (identity, &self.collaborator) {
                    (Identity::Collaborator, Some(collaborator)) => collaborator.clone(),
                    _ => self.bot.clone(),
                };

                Arc::new(RepoClient::new(owner, repo, client))
            })
            .clone()
    }
}

impl GitHubClients for GitHubService {
    type Repo = RepoClient;

    fn fork(&self, repo: &str) -> Arc<RepoClient> {
        self.client(Identity::Bot, &self.bot_name, repo)
    }

    fn upstream(&self, owner: &str, repo: &str) -> Arc<RepoClient> {
        self.client(Identity::Bot, owner, repo)
    }

    fn status_publisher(&self, owner: &str, repo: &str) -> Arc<RepoClient> {
        let identity = if self.collaborator.is_some() {
            Identity::Collaborator
        } else {
            Identity::Bot
        };

        self.client(identity, owner, repo)
    }
}
