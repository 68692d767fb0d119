//! Fan-out of extracted requirements to downstream systems.
//!
//! Every downstream call is isolated: a failed ticket, notification, or
//! review comment becomes a `DownstreamResult` in the report instead of an
//! error. `Dispatcher::dispatch` therefore never fails.

pub mod github;
pub mod jira;
pub mod slack;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::errors::DownstreamError;
use crate::reasoning::ContinuationToken;

pub use github::GitHubCodeHost;
pub use jira::JiraTracker;
pub use slack::SlackNotifier;

/// HTTP client shared by the integrations; every call carries `timeout`.
fn http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to build downstream HTTP client")
}

/// Ticket summaries longer than this are cut and end in `...`.
pub const SUMMARY_MAX_CHARS: usize = 100;

/// Sent instead of a requirement list when nothing was extracted.
pub const EMPTY_NOTIFICATION: &str = "No specific technical tasks identified.";

/// Rendered in place of a continuation token when the engine issued none.
pub const NEW_SESSION: &str = "NEW_SESSION";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IssueType {
    #[default]
    Task,
    Bug,
    Story,
}

impl IssueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Task => "Task",
            Self::Bug => "Bug",
            Self::Story => "Story",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketRequest {
    pub summary: String,
    pub description: String,
    pub issue_type: IssueType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketHandle {
    pub id: String,
    pub key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub requirements: Vec<String>,
    pub continuation: Option<ContinuationToken>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentHandle {
    pub id: String,
    pub url: Option<String>,
}

/// Per-project settings threaded through a dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectMeta {
    pub project_id: String,
    pub issue_type: IssueType,
}

impl ProjectMeta {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            issue_type: IssueType::default(),
        }
    }

    pub fn with_issue_type(mut self, issue_type: IssueType) -> Self {
        self.issue_type = issue_type;
        self
    }
}

#[async_trait]
pub trait TicketTracker: Send + Sync {
    async fn create_ticket(&self, ticket: &TicketRequest) -> Result<TicketHandle, DownstreamError>;
}

#[async_trait]
pub trait ChatNotifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), DownstreamError>;
}

#[async_trait]
pub trait CodeHost: Send + Sync {
    async fn post_review_comment(
        &self,
        repo: &str,
        change: u64,
        body: &str,
    ) -> Result<CommentHandle, DownstreamError>;

    /// Fetch a unified diff from a URL the code host advertised.
    async fn fetch_diff(&self, url: &str) -> Result<String, DownstreamError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Ticket,
    Notification,
    Comment,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum DownstreamOutcome {
    Delivered { handle: Option<String> },
    Failed { error: String },
}

/// The result of one downstream call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownstreamResult {
    pub target: TargetKind,
    pub subject: String,
    #[serde(flatten)]
    pub outcome: DownstreamOutcome,
}

impl DownstreamResult {
    pub fn delivered(target: TargetKind, subject: impl Into<String>, handle: Option<String>) -> Self {
        Self {
            target,
            subject: subject.into(),
            outcome: DownstreamOutcome::Delivered { handle },
        }
    }

    pub fn failed(target: TargetKind, subject: impl Into<String>, error: &DownstreamError) -> Self {
        Self {
            target,
            subject: subject.into(),
            outcome: DownstreamOutcome::Failed {
                error: error.to_string(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, DownstreamOutcome::Delivered { .. })
    }

    pub fn handle(&self) -> Option<&str> {
        match &self.outcome {
            DownstreamOutcome::Delivered { handle } => handle.as_deref(),
            DownstreamOutcome::Failed { .. } => None,
        }
    }
}

/// Aggregate of one fan-out. Tickets are listed in requirement order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub tickets: Vec<DownstreamResult>,
    pub notification: DownstreamResult,
}

impl DispatchReport {
    pub fn tickets_created(&self) -> usize {
        self.tickets.iter().filter(|t| t.is_success()).count()
    }

    pub fn tickets_failed(&self) -> usize {
        self.tickets.len() - self.tickets_created()
    }

    pub fn notification_sent(&self) -> bool {
        self.notification.is_success()
    }

    pub fn successes(&self) -> usize {
        self.tickets_created() + usize::from(self.notification_sent())
    }

    pub fn failures(&self) -> usize {
        self.tickets_failed() + usize::from(!self.notification_sent())
    }
}

/// Cut `requirement` to `SUMMARY_MAX_CHARS`, counting characters.
pub fn ticket_summary(requirement: &str) -> String {
    if requirement.chars().count() > SUMMARY_MAX_CHARS {
        let head: String = requirement.chars().take(SUMMARY_MAX_CHARS - 3).collect();
        format!("{}...", head)
    } else {
        requirement.to_string()
    }
}

/// Ticket description carrying the continuation token as an audit trail.
pub fn ticket_description(project_id: &str, token: Option<&ContinuationToken>) -> String {
    format!(
        "Source: Shadow-PM Strategic Sync\nProject: {}\nThought Signature: {}",
        project_id,
        token.map(|t| t.as_str()).unwrap_or(NEW_SESSION)
    )
}

/// Creates one ticket per requirement, then sends one notification.
#[derive(Clone)]
pub struct Dispatcher {
    tracker: Arc<dyn TicketTracker>,
    notifier: Arc<dyn ChatNotifier>,
    parallel: bool,
}

impl Dispatcher {
    pub fn new(tracker: Arc<dyn TicketTracker>, notifier: Arc<dyn ChatNotifier>) -> Self {
        Self {
            tracker,
            notifier,
            parallel: false,
        }
    }

    /// Run ticket creation concurrently. Report order is unchanged.
    pub fn with_parallel_tickets(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub async fn dispatch(
        &self,
        requirements: &[String],
        token: Option<&ContinuationToken>,
        meta: &ProjectMeta,
    ) -> DispatchReport {
        let description = ticket_description(&meta.project_id, token);
        let attempts = requirements
            .iter()
            .map(|req| self.create_ticket(req, &description, meta.issue_type));

        let tickets = if self.parallel {
            join_all(attempts).await
        } else {
            let mut results = Vec::with_capacity(requirements.len());
            for attempt in attempts {
                results.push(attempt.await);
            }
            results
        };

        let notification = self.send_notification(requirements, token, meta).await;
        let report = DispatchReport {
            tickets,
            notification,
        };
        tracing::info!(
            project = %meta.project_id,
            tickets_created = report.tickets_created(),
            tickets_failed = report.tickets_failed(),
            notification_sent = report.notification_sent(),
            "dispatch complete"
        );
        report
    }

    async fn create_ticket(&self, requirement: &str, description: &str, issue_type: IssueType) -> DownstreamResult {
        let ticket = TicketRequest {
            summary: ticket_summary(requirement),
            description: description.to_string(),
            issue_type,
        };
        match self.tracker.create_ticket(&ticket).await {
            Ok(handle) => {
                tracing::debug!(ticket = %handle.id, summary = %ticket.summary, "ticket created");
                DownstreamResult::delivered(TargetKind::Ticket, ticket.summary, Some(handle.key.unwrap_or(handle.id)))
            }
            Err(err) => {
                tracing::warn!(summary = %ticket.summary, error = %err, "ticket creation failed");
                DownstreamResult::failed(TargetKind::Ticket, ticket.summary, &err)
            }
        }
    }

    async fn send_notification(
        &self,
        requirements: &[String],
        token: Option<&ContinuationToken>,
        meta: &ProjectMeta,
    ) -> DownstreamResult {
        let requirements = if requirements.is_empty() {
            vec![EMPTY_NOTIFICATION.to_string()]
        } else {
            requirements.to_vec()
        };
        let notification = Notification {
            title: format!("Strategy Sync ({})", meta.project_id),
            requirements,
            continuation: token.cloned(),
        };
        match self.notifier.notify(&notification).await {
            Ok(()) => DownstreamResult::delivered(TargetKind::Notification, notification.title, None),
            Err(err) => {
                tracing::warn!(error = %err, "notification failed");
                DownstreamResult::failed(TargetKind::Notification, notification.title, &err)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory downstream stubs shared by pipeline and router tests.

    use std::sync::Mutex;

    use super::*;

    /// Records tickets; fails any ticket whose summary contains `fail_on`.
    #[derive(Default)]
    pub struct RecordingTracker {
        pub fail_on: Option<String>,
        pub tickets: Mutex<Vec<TicketRequest>>,
    }

    impl RecordingTracker {
        pub fn failing_on(needle: &str) -> Self {
            Self {
                fail_on: Some(needle.to_string()),
                ..Self::default()
            }
        }

        pub fn tickets(&self) -> Vec<TicketRequest> {
            self.tickets.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TicketTracker for RecordingTracker {
        async fn create_ticket(&self, ticket: &TicketRequest) -> Result<TicketHandle, DownstreamError> {
            let mut tickets = self.tickets.lock().unwrap();
            tickets.push(ticket.clone());
            if let Some(needle) = &self.fail_on
                && ticket.summary.contains(needle.as_str())
            {
                return Err(DownstreamError::Http {
                    status: 400,
                    body: "issuetype is invalid".into(),
                });
            }
            Ok(TicketHandle {
                id: format!("{}", 10000 + tickets.len()),
                key: Some(format!("PROJ-{}", tickets.len())),
            })
        }
    }

    #[derive(Default)]
    pub struct RecordingNotifier {
        pub fail: bool,
        pub sent: Mutex<Vec<Notification>>,
    }

    impl RecordingNotifier {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub fn sent(&self) -> Vec<Notification> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatNotifier for RecordingNotifier {
        async fn notify(&self, notification: &Notification) -> Result<(), DownstreamError> {
            self.sent.lock().unwrap().push(notification.clone());
            if self.fail {
                return Err(DownstreamError::Transport("connection refused".into()));
            }
            Ok(())
        }
    }

    /// Records review comments and serves a canned diff.
    #[derive(Default)]
    pub struct RecordingCodeHost {
        pub fail: bool,
        pub diff: Option<String>,
        pub comments: Mutex<Vec<(String, u64, String)>>,
        pub fetched: Mutex<Vec<String>>,
    }

    impl RecordingCodeHost {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub fn serving_diff(diff: &str) -> Self {
            Self {
                diff: Some(diff.to_string()),
                ..Self::default()
            }
        }

        pub fn comments(&self) -> Vec<(String, u64, String)> {
            self.comments.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CodeHost for RecordingCodeHost {
        async fn post_review_comment(
            &self,
            repo: &str,
            change: u64,
            body: &str,
        ) -> Result<CommentHandle, DownstreamError> {
            self.comments
                .lock()
                .unwrap()
                .push((repo.to_string(), change, body.to_string()));
            if self.fail {
                return Err(DownstreamError::Http {
                    status: 403,
                    body: "Resource not accessible by integration".into(),
                });
            }
            Ok(CommentHandle {
                id: "8001".into(),
                url: Some(format!("https://github.com/{}/pull/{}#pullrequestreview-8001", repo, change)),
            })
        }

        async fn fetch_diff(&self, url: &str) -> Result<String, DownstreamError> {
            self.fetched.lock().unwrap().push(url.to_string());
            self.diff.clone().ok_or(DownstreamError::Http {
                status: 404,
                body: "Not Found".into(),
            })
        }
    }
}
