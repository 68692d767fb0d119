//! HTTP server command: `shadow-pm serve`.

use anyhow::Result;

use shadow_pm::config::{Secrets, Settings};
use shadow_pm::server::{self, ServerConfig};

pub async fn cmd_serve(
    mut settings: Settings,
    secrets: &Secrets,
    port: Option<u16>,
    host: Option<String>,
    dev: bool,
) -> Result<()> {
    if let Some(port) = port {
        settings.server.port = port;
    }
    if let Some(host) = host {
        settings.server.host = host;
    }
    settings.server.dev_mode |= dev;

    if secrets.gemini_api_key.is_none() {
        tracing::warn!("GOOGLE_GEMINI_API_KEY is not set; every reasoning call will fail");
    }

    let state = server::build_state(&settings, secrets)?;
    tracing::info!(
        db = %settings.server.db_path.display(),
        default_project = %settings.project.default_id,
        "state store ready"
    );
    server::start_server(ServerConfig::from(&settings), state).await
}
