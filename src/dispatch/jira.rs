use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{TicketHandle, TicketRequest, TicketTracker, http_client};
use crate::config::JiraSection;
use crate::errors::DownstreamError;

/// Jira Cloud REST v3 ticket tracker.
#[derive(Clone)]
pub struct JiraTracker {
    client: reqwest::Client,
    base_url: Option<String>,
    email: Option<String>,
    api_token: Option<String>,
    project_key: Option<String>,
}

#[derive(Deserialize)]
struct CreatedIssue {
    id: String,
    key: Option<String>,
}

impl JiraTracker {
    pub fn new(section: &JiraSection, api_token: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: section.domain.as_deref().map(base_url),
            email: section.email.clone(),
            api_token,
            project_key: section.project_key.clone(),
        })
    }
}

/// Bare domains get `https://`; full URLs are used as given.
fn base_url(domain: &str) -> String {
    let domain = domain.trim_end_matches('/');
    if domain.starts_with("http://") || domain.starts_with("https://") {
        domain.to_string()
    } else {
        format!("https://{}", domain)
    }
}

/// Issue payload with the description as a single ADF paragraph.
fn issue_body(project_key: &str, ticket: &TicketRequest) -> Value {
    json!({
        "fields": {
            "project": { "key": project_key },
            "summary": ticket.summary,
            "description": {
                "type": "doc",
                "version": 1,
                "content": [{
                    "type": "paragraph",
                    "content": [{ "type": "text", "text": ticket.description }]
                }]
            },
            "issuetype": { "name": ticket.issue_type.as_str() }
        }
    })
}

#[async_trait]
impl TicketTracker for JiraTracker {
    async fn create_ticket(&self, ticket: &TicketRequest) -> Result<TicketHandle, DownstreamError> {
        let (Some(base), Some(email), Some(token), Some(project_key)) = (
            self.base_url.as_deref(),
            self.email.as_deref(),
            self.api_token.as_deref(),
            self.project_key.as_deref(),
        ) else {
            return Err(DownstreamError::NotConfigured("Jira"));
        };

        let resp = self
            .client
            .post(format!("{}/rest/api/3/issue", base))
            .basic_auth(email, Some(token))
            .header("Accept", "application/json")
            .json(&issue_body(project_key, ticket))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DownstreamError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let created: CreatedIssue = resp.json().await?;
        Ok(TicketHandle {
            id: created.id,
            key: created.key,
        })
    }
}
