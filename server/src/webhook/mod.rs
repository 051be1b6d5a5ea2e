use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::State;
use axum::http::StatusCode;
use axum::{Json, RequestExt};
use parse::parse_from_request;
use scuffle_context::ContextFutExt;
use scuffle_http::backend::HttpServer;
use serde::Serialize;

mod parse;

use crate::event::BotEvent;

pub trait WebhookConfig: Send + Sync + 'static {
    /// Secret used to verify `X-Hub-Signature-256`. Unsigned payloads are accepted when unset.
    fn webhook_secret(&self) -> Option<&str>;

    fn bind_address(&self) -> Option<SocketAddr>;

    /// Hand a classified event to the engine. Returns once its store transition is applied.
    fn dispatch(&self, event: BotEvent);
}

fn router<C: WebhookConfig>(global: Arc<C>) -> axum::Router {
    axum::Router::new()
        .route("/github/webhook", axum::routing::post(handle::<C>))
        .route("/payload", axum::routing::post(handle::<C>))
        .with_state(global)
}

#[derive(Debug, Serialize)]
struct Response {
    success: bool,
    message: String,
}

async fn handle<C: WebhookConfig>(
    State(global): State<Arc<C>>,
    request: axum::http::Request<axum::body::Body>,
) -> (StatusCode, Json<Response>) {
    let event = match parse_from_request(request.with_limited_body(), global.webhook_secret()).await {
        Ok(event) => event,
        Err((status, message)) => {
            tracing::debug!("Failed to parse event ({}): {}", status.as_u16(), message);
            return (status, Json(Response { success: false, message }));
        }
    };

    let message = match event {
        Some(event) => {
            tracing::debug!(?event, "dispatching event");
            global.dispatch(event);
            "Event handled successfully"
        }
        None => "Event ignored",
    };

    (
        StatusCode::OK,
        Json(Response {
            success: true,
            message: message.to_string(),
        }),
    )
}

pub struct WebhookSvc;

impl<G> scuffle_bootstrap::Service<G> for WebhookSvc
where
    G: WebhookConfig,
{
    async fn enabled(&self, global: &Arc<G>) -> anyhow::Result<bool> {
        Ok(global.bind_address().is_some())
    }

    async fn run(self, global: Arc<G>, ctx: scuffle_context::Context) -> anyhow::Result<()> {
        let bind = global.bind_address().context("missing bind address")?;

        let server = scuffle_http::backend::tcp::TcpServerConfig::builder()
            .with_bind(bind)
            .build()
            .into_server();

        server
            .start(scuffle_http::svc::axum_service(router(global)), 1)
            .await
            .context("start")?;

        tracing::info!("webhook server started on {}", server.local_addr().context("local address")?);

        server.wait().with_context(&ctx).await.transpose().context("wait")?;

        tracing::info!("shutting down webhook server");

        server.shutdown().await.context("shutdown")?;

        tracing::info!("webhook server shutdown");

        Ok(())
    }
}
