use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use build_bot::ci::{CiConfig, HttpCiRestarter};
use build_bot::engine::{Engine, EngineConfig};
use build_bot::event::BotEvent;
use build_bot::github::config::SyncConfig;
use build_bot::github::GitHubService;
use build_bot::reconcile::{ReconcileConfig, ReconcileSvc};
use build_bot::store::CorrelationStore;
use build_bot::webhook::{WebhookConfig, WebhookSvc};

#[derive(Debug, Clone, serde::Deserialize, smart_default::SmartDefault)]
#[serde(default)]
pub struct Config {
    #[default("info".to_string())]
    pub level: String,
    pub bot: BotConfig,
    /// Account statuses and comments are attributed to, when it differs from the bot
    pub collaborator: Option<CollaboratorConfig>,
    pub webhook: WebhookServerConfig,
    #[default("state.json".to_string())]
    pub state_path: String,
    /// Seconds between reconcile passes, 0 disables them
    #[default(1800)]
    pub reconcile_interval_secs: u64,
    pub sync: SyncConfig,
    pub ci: CiConfig,
}

#[derive(Debug, Clone, serde::Deserialize, smart_default::SmartDefault)]
#[serde(default)]
pub struct BotConfig {
    #[default("build-bot".to_string())]
    pub name: String,
    pub token: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct CollaboratorConfig {
    pub name: String,
    pub token: String,
}

#[derive(Debug, Clone, serde::Deserialize, smart_default::SmartDefault)]
#[serde(default)]
pub struct WebhookServerConfig {
    #[default(Some(SocketAddr::from(([0, 0, 0, 0], 1800))))]
    pub bind: Option<SocketAddr>,
    pub secret: Option<String>,
}

scuffle_settings::bootstrap!(Config);

struct Global {
    config: Config,
    engine: Arc<Engine<GitHubService, HttpCiRestarter>>,
}

impl scuffle_signal::SignalConfig for Global {}

impl WebhookConfig for Global {
    fn webhook_secret(&self) -> Option<&str> {
        self.config.webhook.secret.as_deref()
    }

    fn bind_address(&self) -> Option<SocketAddr> {
        self.config.webhook.bind
    }

    fn dispatch(&self, event: BotEvent) {
        self.engine.dispatch(event);
    }
}

impl ReconcileConfig for Global {
    fn interval(&self) -> Option<Duration> {
        (self.config.reconcile_interval_secs > 0).then(|| Duration::from_secs(self.config.reconcile_interval_secs))
    }

    async fn reconcile(&self) {
        self.engine.reconcile().await;
    }
}

impl scuffle_bootstrap::Global for Global {
    type Config = Config;

    async fn init(config: Config) -> anyhow::Result<Arc<Self>> {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new(&config.level))
            .init();

        anyhow::ensure!(!config.bot.token.is_empty(), "bot.token is required");

        if config.webhook.secret.is_none() {
            tracing::warn!("webhook.secret is not set, payload signatures will not be verified");
        }

        let github = GitHubService::new(
            &config.bot.name,
            &config.bot.token,
            config.collaborator.as_ref().map(|c| c.token.as_str()),
        )
        .context("github client")?;

        if let Some(collaborator) = &config.collaborator {
            tracing::info!(collaborator = %collaborator.name, "statuses are published as the collaborator");
        }

        let ci = HttpCiRestarter::new(config.ci.clone()).context("ci client")?;
        let store = CorrelationStore::load(&config.state_path);

        let engine = Engine::new(
            github,
            ci,
            EngineConfig {
                bot_name: config.bot.name.clone(),
                sync: config.sync.clone(),
            },
            store,
        );

        engine.resume();

        tracing::info!(bot = %config.bot.name, "build bot initialized");

        Ok(Arc::new(Self { config, engine }))
    }
}

scuffle_bootstrap::main! {
    Global {
        scuffle_signal::SignalSvc,
        WebhookSvc,
        ReconcileSvc,
    }
}
