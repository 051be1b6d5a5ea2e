use std::sync::Arc;
use std::time::Duration;

use scuffle_context::ContextFutExt;

/// Periodically compares tracked pull requests with the provider, catching webhooks that never arrived.
pub struct ReconcileSvc;

pub trait ReconcileConfig: Send + Sync + 'static {
    /// Time between passes. `None` disables the service.
    fn interval(&self) -> Option<Duration>;

    fn reconcile(&self) -> impl std::future::Future<Output = ()> + Send;
}

impl<C: ReconcileConfig> scuffle_bootstrap::Service<C> for ReconcileSvc {
    async fn enabled(&self, global: &Arc<C>) -> anyhow::Result<bool> {
        Ok(global.interval().is_some())
    }

    async fn run(self, global: Arc<C>, ctx: scuffle_context::Context) -> anyhow::Result<()> {
        let Some(interval) = global.interval() else {
            return Ok(());
        };

        tracing::info!(?interval, "starting reconcile service");

        while tokio::time::sleep(interval).with_context(&ctx).await.is_some() {
            tracing::debug!("reconciling tracked pull requests");
            global.reconcile().await;
        }

        tracing::info!("reconcile service stopped");

        Ok(())
    }
}
