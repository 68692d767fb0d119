//! Layered configuration for Shadow-PM.
//!
//! Settings are read from `shadow-pm.toml` and then overlaid with environment
//! variables (a `.env` file is honoured by the binary). Secrets are only ever
//! read from the environment.
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3141
//! db_path = ".shadow-pm/state.db"
//!
//! [project]
//! default_id = "default"
//!
//! [engine]
//! model = "gemini-3-flash-preview"
//! retry = { max_attempts = 3, base_delay_ms = 2000 }
//! poll = { interval_ms = 3000, max_attempts = 100 }
//!
//! [audit]
//! max_diff_chars = 10000
//!
//! [dispatch]
//! parallel_tickets = false
//! issue_type = "Task"
//! timeout_secs = 30
//!
//! [jira]
//! domain = "yourcompany.atlassian.net"
//! email = "bot@yourcompany.com"
//! project_key = "PROJ"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::dispatch::IssueType;

pub const CONFIG_FILE_NAME: &str = "shadow-pm.toml";

/// Lower and upper bound for the diff safety ceiling.
pub const MIN_DIFF_CHARS: usize = 5_000;
pub const MAX_DIFF_CHARS: usize = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Permissive CORS for a locally served dashboard.
    #[serde(default)]
    pub dev_mode: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3141
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".shadow-pm/state.db")
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            db_path: default_db_path(),
            dev_mode: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSection {
    /// Project scope used when a request does not name one.
    #[serde(default = "default_project_id")]
    pub default_id: String,
}

fn default_project_id() -> String {
    "default".to_string()
}

impl Default for ProjectSection {
    fn default() -> Self {
        Self {
            default_id: default_project_id(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    2_000
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PollSection {
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_poll_max_attempts")]
    pub max_attempts: u32,
}

fn default_poll_interval_ms() -> u64 {
    3_000
}

fn default_poll_max_attempts() -> u32 {
    100
}

impl Default for PollSection {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval_ms(),
            max_attempts: default_poll_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_upload_endpoint")]
    pub upload_endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub poll: PollSection,
}

fn default_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_upload_endpoint() -> String {
    "https://generativelanguage.googleapis.com/upload/v1beta".to_string()
}

fn default_model() -> String {
    "gemini-3-flash-preview".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            upload_endpoint: default_upload_endpoint(),
            model: default_model(),
            timeout_secs: default_timeout_secs(),
            retry: RetrySection::default(),
            poll: PollSection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSection {
    #[serde(default = "default_max_diff_chars")]
    pub max_diff_chars: usize,
}

fn default_max_diff_chars() -> usize {
    MAX_DIFF_CHARS
}

impl Default for AuditSection {
    fn default() -> Self {
        Self {
            max_diff_chars: default_max_diff_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchSection {
    #[serde(default)]
    pub parallel_tickets: bool,
    #[serde(default)]
    pub issue_type: IssueType,
    /// Deadline for each Jira, Slack or GitHub call.
    #[serde(default = "default_dispatch_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_dispatch_timeout_secs() -> u64 {
    30
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            parallel_tickets: false,
            issue_type: IssueType::default(),
            timeout_secs: default_dispatch_timeout_secs(),
        }
    }
}

impl DispatchSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JiraSection {
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub project_key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlackSection {
    #[serde(default)]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubSection {
    #[serde(default = "default_github_api")]
    pub api_base: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_github_api() -> String {
    "https://api.github.com".to_string()
}

fn default_user_agent() -> String {
    "Shadow-PM-Agent".to_string()
}

impl Default for GitHubSection {
    fn default() -> Self {
        Self {
            api_base: default_github_api(),
            user_agent: default_user_agent(),
        }
    }
}

/// The complete `shadow-pm.toml` structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub audit: AuditSection,
    #[serde(default)]
    pub dispatch: DispatchSection,
    #[serde(default)]
    pub jira: JiraSection,
    #[serde(default)]
    pub slack: SlackSection,
    #[serde(default)]
    pub github: GitHubSection,
}

impl Settings {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse shadow-pm.toml")
    }

    /// Load from `path`, falling back to defaults when the file is absent.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize shadow-pm.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Overlay non-secret environment overrides onto file values.
    pub fn apply_env(mut self) -> Self {
        if let Ok(domain) = std::env::var("JIRA_DOMAIN") {
            self.jira.domain = Some(domain);
        }
        if let Ok(email) = std::env::var("JIRA_USER_EMAIL") {
            self.jira.email = Some(email);
        }
        if let Ok(key) = std::env::var("JIRA_PROJECT_KEY") {
            self.jira.project_key = Some(key);
        }
        if let Ok(url) = std::env::var("SLACK_WEBHOOK_URL") {
            self.slack.webhook_url = Some(url);
        }
        if let Ok(project) = std::env::var("SHADOW_PM_PROJECT") {
            self.project.default_id = project;
        }
        self
    }

    /// Diff ceiling clamped into the supported range.
    pub fn max_diff_chars(&self) -> usize {
        let clamped = self.audit.max_diff_chars.clamp(MIN_DIFF_CHARS, MAX_DIFF_CHARS);
        if clamped != self.audit.max_diff_chars {
            tracing::warn!(
                configured = self.audit.max_diff_chars,
                effective = clamped,
                "audit.max_diff_chars outside supported range, clamping"
            );
        }
        clamped
    }
}

/// Secrets read from the environment at startup.
#[derive(Clone, Default)]
pub struct Secrets {
    pub gemini_api_key: Option<String>,
    pub jira_api_token: Option<String>,
    pub github_token: Option<String>,
}

impl Secrets {
    pub fn from_env() -> Self {
        Self {
            gemini_api_key: std::env::var("GOOGLE_GEMINI_API_KEY").ok(),
            jira_api_token: std::env::var("JIRA_API_TOKEN").ok(),
            github_token: std::env::var("GITHUB_TOKEN").ok(),
        }
    }
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("gemini_api_key", &self.gemini_api_key.as_ref().map(|_| "<redacted>"))
            .field("jira_api_token", &self.jira_api_token.as_ref().map(|_| "<redacted>"))
            .field("github_token", &self.github_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 3141);
        assert_eq!(settings.project.default_id, "default");
        assert_eq!(settings.engine.retry.max_attempts, 3);
        assert_eq!(settings.engine.retry.base_delay_ms, 2_000);
        assert_eq!(settings.engine.poll.interval_ms, 3_000);
        assert_eq!(settings.audit.max_diff_chars, 10_000);
        assert!(!settings.dispatch.parallel_tickets);
        assert_eq!(settings.dispatch.issue_type, IssueType::Task);
        assert_eq!(settings.dispatch.timeout(), Duration::from_secs(30));
        assert_eq!(settings.engine.model, "gemini-3-flash-preview");
    }

    #[test]
    fn test_parse_partial_file_keeps_defaults() {
        let settings = Settings::parse(
            r#"
            [project]
            default_id = "apollo"

            [engine.retry]
            base_delay_ms = 50

            [dispatch]
            parallel_tickets = true
            issue_type = "Story"
            "#,
        )
        .unwrap();
        assert_eq!(settings.project.default_id, "apollo");
        assert_eq!(settings.engine.retry.base_delay_ms, 50);
        assert_eq!(settings.engine.retry.max_attempts, 3);
        assert!(settings.dispatch.parallel_tickets);
        assert_eq!(settings.dispatch.issue_type, IssueType::Story);
        assert_eq!(settings.dispatch.timeout_secs, 30);
        assert_eq!(settings.server.port, 3141);
    }

    #[test]
    fn test_parse_invalid_toml() {
        assert!(Settings::parse("[server\nport = ").is_err());
    }

    #[test]
    fn test_max_diff_chars_is_clamped() {
        let mut settings = Settings::default();
        settings.audit.max_diff_chars = 50;
        assert_eq!(settings.max_diff_chars(), MIN_DIFF_CHARS);
        settings.audit.max_diff_chars = 1_000_000;
        assert_eq!(settings.max_diff_chars(), MAX_DIFF_CHARS);
        settings.audit.max_diff_chars = 7_500;
        assert_eq!(settings.max_diff_chars(), 7_500);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);
        let mut settings = Settings::default();
        settings.jira.domain = Some("acme.atlassian.net".into());
        settings.save(&path).unwrap();

        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded.jira.domain.as_deref(), Some("acme.atlassian.net"));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings.server.port, 3141);
    }

    #[test]
    fn test_secrets_debug_is_redacted() {
        let secrets = Secrets {
            gemini_api_key: Some("super-secret".into()),
            jira_api_token: None,
            github_token: Some("ghp_abc".into()),
        };
        let rendered = format!("{:?}", secrets);
        assert!(!rendered.contains("super-secret"));
        assert!(!rendered.contains("ghp_abc"));
        assert!(rendered.contains("<redacted>"));
    }
}
