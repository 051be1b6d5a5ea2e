//! Restart clients for the CI providers that report on shadow branches.

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::github::models::CommitStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CiProvider {
    Travis,
    AppVeyor,
}

impl std::fmt::Display for CiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CiProvider::Travis => f.write_str("travis"),
            CiProvider::AppVeyor => f.write_str("appveyor"),
        }
    }
}

/// A build a provider can be asked to run again, recovered from a status target url.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CiBuild {
    pub provider: CiProvider,
    pub build_id: String,
    /// AppVeyor account name
    pub account: Option<String>,
    /// AppVeyor project slug
    pub slug: Option<String>,
}

impl CiBuild {
    pub fn from_status(status: &CommitStatus) -> Option<Self> {
        let url = status.target_url.as_deref()?;
        let path = url.split(['?', '#']).next()?;
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        if status.context.starts_with("continuous-integration/travis-ci") {
            let position = segments.iter().position(|s| *s == "builds")?;
            let build_id = segments.get(position + 1)?;

            return Some(Self {
                provider: CiProvider::Travis,
                build_id: build_id.to_string(),
                account: None,
                slug: None,
            });
        }

        if status.context.starts_with("continuous-integration/appveyor") {
            let position = segments.iter().position(|s| *s == "project")?;
            match segments.get(position + 1..position + 5)? {
                [account, slug, "builds", build_id] => {
                    return Some(Self {
                        provider: CiProvider::AppVeyor,
                        build_id: build_id.to_string(),
                        account: Some(account.to_string()),
                        slug: Some(slug.to_string()),
                    })
                }
                _ => return None,
            }
        }

        None
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CiRestartError {
    #[error("no token configured for {0}")]
    MissingToken(CiProvider),
    #[error("{0} build is missing its project")]
    MissingProject(CiProvider),
    #[error("{provider} responded with {status}: {message}")]
    Provider {
        provider: CiProvider,
        status: reqwest::StatusCode,
        message: String,
    },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

pub trait CiRestarter: Send + Sync + 'static {
    /// Ask the provider to run `build` again. A forced restart reruns every job.
    fn restart(&self, build: &CiBuild, force: bool) -> impl Future<Output = Result<(), CiRestartError>> + Send;
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, smart_default::SmartDefault)]
#[serde(default)]
pub struct CiConfig {
    /// Travis CI API token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub travis_token: Option<String>,
    #[default("https://api.travis-ci.com")]
    pub travis_api: String,
    /// AppVeyor API token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appveyor_token: Option<String>,
    #[default("https://ci.appveyor.com")]
    pub appveyor_api: String,
}

pub struct HttpCiRestarter {
    client: reqwest::Client,
    config: CiConfig,
}

impl HttpCiRestarter {
    pub fn new(config: CiConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("build-bot/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client, config })
    }

    async fn restart_travis(&self, build: &CiBuild) -> Result<(), CiRestartError> {
        let token = self
            .config
            .travis_token
            .as_deref()
            .ok_or(CiRestartError::MissingToken(CiProvider::Travis))?;

        let response = self
            .client
            .post(format!(
                "{}/build/{}/restart",
                self.config.travis_api.trim_end_matches('/'),
                build.build_id
            ))
            .header("Travis-API-Version", "3")
            .header("Authorization", format!("token {token}"))
            .send()
            .await?;

        check_response(CiProvider::Travis, response).await
    }

    async fn restart_appveyor(&self, build: &CiBuild, force: bool) -> Result<(), CiRestartError> {
        let token = self
            .config
            .appveyor_token
            .as_deref()
            .ok_or(CiRestartError::MissingToken(CiProvider::AppVeyor))?;

        let (Some(account), Some(slug)) = (&build.account, &build.slug) else {
            return Err(CiRestartError::MissingProject(CiProvider::AppVeyor));
        };

        let response = self
            .client
            .put(format!("{}/api/builds", self.config.appveyor_api.trim_end_matches('/')))
            .bearer_auth(token)
            .json(&serde_json::json!({
                "accountName": account,
                "buildId": build.build_id,
                "projectSlug": slug,
                "reRunIncomplete": !force,
            }))
            .send()
            .await?;

        check_response(CiProvider::AppVeyor, response).await
    }
}

async fn check_response(provider: CiProvider, response: reqwest::Response) -> Result<(), CiRestartError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let message = response.text().await.unwrap_or_default();
    Err(CiRestartError::Provider {
        provider,
        status,
        message,
    })
}

impl CiRestarter for HttpCiRestarter {
    async fn restart(&self, build: &CiBuild, force: bool) -> Result<(), CiRestartError> {
        tracing::info!(provider = %build.provider, build_id = %build.build_id, force, "restarting build");

        match build.provider {
            CiProvider::Travis => self.restart_travis(build).await,
            CiProvider::AppVeyor => self.restart_appveyor(build, force).await,
        }
    }
}
