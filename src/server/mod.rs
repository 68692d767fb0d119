pub mod api;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::audit::AuditPipeline;
use crate::config::{Secrets, Settings};
use crate::dispatch::{Dispatcher, GitHubCodeHost, JiraTracker, SlackNotifier};
use crate::ingest::IngestionPipeline;
use crate::reasoning::{GeminiConfig, GeminiEngine, PollPolicy, ReasoningClient, RetryPolicy};
use crate::store::SqliteStore;

pub use api::{AppState, SharedState};

/// Configuration for the HTTP server.
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3141,
            dev_mode: false,
        }
    }
}

impl From<&Settings> for ServerConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            dev_mode: settings.server.dev_mode,
        }
    }
}

/// Build the reasoning client described by `settings`.
pub fn reasoning_client(settings: &Settings, secrets: &Secrets) -> Result<ReasoningClient> {
    let engine = GeminiEngine::new(GeminiConfig::from_section(
        &settings.engine,
        secrets.gemini_api_key.clone(),
    ))?;
    let retry = RetryPolicy::from(settings.engine.retry);
    let poll = PollPolicy::from(settings.engine.poll);
    tracing::debug!(
        model = %settings.engine.model,
        max_attempts = retry.max_attempts,
        media_wait_secs = poll.ceiling().as_secs(),
        "reasoning client configured"
    );
    Ok(ReasoningClient::new(Arc::new(engine)).with_retry(retry).with_poll(poll))
}

/// Wire the pipelines against the real integrations.
pub fn build_state(settings: &Settings, secrets: &Secrets) -> Result<AppState> {
    let store = Arc::new(
        SqliteStore::open(&settings.server.db_path).context("Failed to open continuation store")?,
    );
    let client = reasoning_client(settings, secrets)?;

    let timeout = settings.dispatch.timeout();
    let tracker = Arc::new(JiraTracker::new(&settings.jira, secrets.jira_api_token.clone(), timeout)?);
    let notifier = Arc::new(SlackNotifier::new(settings.slack.webhook_url.clone(), timeout)?);
    let code_host = Arc::new(GitHubCodeHost::new(
        &settings.github,
        secrets.github_token.clone(),
        timeout,
    )?);

    let dispatcher =
        Dispatcher::new(tracker, notifier).with_parallel_tickets(settings.dispatch.parallel_tickets);
    let ingest = IngestionPipeline::new(client.clone(), store.clone(), dispatcher)
        .with_issue_type(settings.dispatch.issue_type);
    let audit = AuditPipeline::new(client, store.clone(), code_host.clone())
        .with_max_diff_chars(settings.max_diff_chars());

    Ok(AppState {
        ingest,
        audit,
        store,
        code_host,
        default_project: settings.project.default_id.clone(),
    })
}

/// Build the full application router.
pub fn build_router(state: SharedState, dev_mode: bool) -> Router {
    let app = api::api_router()
        .with_state(state)
        .layer(TraceLayer::new_for_http());
    if dev_mode {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

/// Serve until Ctrl+C.
pub async fn start_server(config: ServerConfig, state: AppState) -> Result<()> {
    let app = build_router(Arc::new(state), config.dev_mode);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(addr = %local_addr, "Shadow-PM listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn settings_in(dir: &TempDir) -> Settings {
        let mut settings = Settings::default();
        settings.server.db_path = dir.path().join("state.db");
        settings
    }

    #[tokio::test]
    async fn test_health_via_full_router() {
        let dir = TempDir::new().unwrap();
        let state = build_state(&settings_in(&dir), &Secrets::default()).unwrap();
        let app = build_router(Arc::new(state), false);
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_dev_mode_adds_cors_headers() {
        let dir = TempDir::new().unwrap();
        let state = build_state(&settings_in(&dir), &Secrets::default()).unwrap();
        let app = build_router(Arc::new(state), true);
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header("origin", "http://localhost:5173")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(resp.headers().contains_key("access-control-allow-origin"));
    }

    #[tokio::test]
    async fn test_build_state_creates_database() {
        let dir = TempDir::new().unwrap();
        let settings = settings_in(&dir);
        build_state(&settings, &Secrets::default()).unwrap();
        assert!(settings.server.db_path.exists());
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let dir = TempDir::new().unwrap();
        let state = build_state(&settings_in(&dir), &Secrets::default()).unwrap();
        let resp = build_router(Arc::new(state), false)
            .oneshot(Request::builder().uri("/api/nothing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_server_config_from_settings() {
        let mut settings = Settings::default();
        settings.server.port = 8080;
        settings.server.dev_mode = true;
        let config = ServerConfig::from(&settings);
        assert_eq!(config.port, 8080);
        assert!(config.dev_mode);
        assert_eq!(ServerConfig::default().port, 3141);
    }
}
