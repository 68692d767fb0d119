use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use serde_json::json;

use super::{CodeHost, CommentHandle, http_client};
use crate::config::GitHubSection;
use crate::errors::DownstreamError;

/// GitHub REST client for pull-request reviews and diffs.
#[derive(Clone)]
pub struct GitHubCodeHost {
    client: reqwest::Client,
    api_base: String,
    api_url: Option<Url>,
    user_agent: String,
    token: Option<String>,
}

/// Subset of the review object GitHub returns.
#[derive(Deserialize)]
struct Review {
    id: u64,
    html_url: Option<String>,
}

impl GitHubCodeHost {
    pub fn new(section: &GitHubSection, token: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let api_base = section.api_base.trim_end_matches('/').to_string();
        Ok(Self {
            client: http_client(timeout)?,
            api_url: Url::parse(&api_base).ok(),
            api_base,
            user_agent: section.user_agent.clone(),
            token,
        })
    }

    /// The token only goes to the configured API origin or to github.com over https.
    fn accepts_credentials(&self, target: &Url) -> bool {
        if self.api_url.as_ref().is_some_and(|api| api.origin() == target.origin()) {
            return true;
        }
        target.scheme() == "https"
            && target
                .host_str()
                .is_some_and(|host| host == "github.com" || host.ends_with(".github.com"))
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let req = req.header("User-Agent", &self.user_agent);
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

async fn check(resp: reqwest::Response) -> Result<reqwest::Response, DownstreamError> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        Err(DownstreamError::Http {
            status: status.as_u16(),
            body: resp.text().await.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl CodeHost for GitHubCodeHost {
    async fn post_review_comment(
        &self,
        repo: &str,
        change: u64,
        body: &str,
    ) -> Result<CommentHandle, DownstreamError> {
        if self.token.is_none() {
            return Err(DownstreamError::NotConfigured("GitHub"));
        }
        let url = format!("{}/repos/{}/pulls/{}/reviews", self.api_base, repo, change);
        let resp = self
            .authorized(self.client.post(url))
            .header("Accept", "application/vnd.github+json")
            .json(&json!({ "body": body, "event": "COMMENT" }))
            .send()
            .await?;

        let review: Review = check(resp).await?.json().await?;
        tracing::info!(repo, change, review = review.id, "review comment posted");
        Ok(CommentHandle {
            id: review.id.to_string(),
            url: review.html_url,
        })
    }

    async fn fetch_diff(&self, url: &str) -> Result<String, DownstreamError> {
        let target = Url::parse(url).map_err(|e| DownstreamError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        let req = self.client.get(target.clone());
        let req = if self.accepts_credentials(&target) {
            self.authorized(req)
        } else {
            tracing::warn!(
                host = target.host_str().unwrap_or(""),
                "fetching diff from foreign host without credentials"
            );
            req.header("User-Agent", &self.user_agent)
        };
        let resp = req
            .header("Accept", "application/vnd.github.v3.diff")
            .send()
            .await?;
        Ok(check(resp).await?.text().await?)
    }
}
