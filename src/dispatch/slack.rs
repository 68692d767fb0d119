use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{ChatNotifier, NEW_SESSION, Notification, http_client};
use crate::errors::DownstreamError;

/// Slack incoming-webhook notifier using Block Kit.
#[derive(Clone)]
pub struct SlackNotifier {
    client: reqwest::Client,
    webhook_url: Option<String>,
}

impl SlackNotifier {
    pub fn new(webhook_url: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            webhook_url,
        })
    }
}

fn blocks(notification: &Notification) -> Value {
    let fields: Vec<Value> = notification
        .requirements
        .iter()
        .map(|req| json!({ "type": "mrkdwn", "text": format!("• {}", req) }))
        .collect();
    let token = notification
        .continuation
        .as_ref()
        .map(|t| t.as_str())
        .unwrap_or(NEW_SESSION);

    json!({
        "blocks": [
            {
                "type": "header",
                "text": {
                    "type": "plain_text",
                    "text": format!("🚀 Shadow-PM: {}", notification.title),
                    "emoji": true
                }
            },
            {
                "type": "section",
                "text": { "type": "mrkdwn", "text": "*Requirements Extracted:*" }
            },
            { "type": "section", "fields": fields },
            {
                "type": "context",
                "elements": [{
                    "type": "mrkdwn",
                    "text": format!("🧠 *Thought Signature:* `{}`", token)
                }]
            }
        ]
    })
}

#[async_trait]
impl ChatNotifier for SlackNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), DownstreamError> {
        let Some(url) = self.webhook_url.as_deref() else {
            return Err(DownstreamError::NotConfigured("Slack"));
        };

        let resp = self.client.post(url).json(&blocks(notification)).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(DownstreamError::Http {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::reasoning::ContinuationToken;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn notification(token: Option<&str>) -> Notification {
        Notification {
            title: "Strategy Sync (apollo)".into(),
            requirements: vec!["Build login page".into(), "Add rate limiting".into()],
            continuation: token.and_then(ContinuationToken::new),
        }
    }

    #[test]
    fn test_blocks_list_requirements_and_token() {
        let payload = blocks(&notification(Some("sig-9")));
        let blocks = payload["blocks"].as_array().unwrap();
        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[0]["text"]["text"], "🚀 Shadow-PM: Strategy Sync (apollo)");
        assert_eq!(blocks[2]["fields"][1]["text"], "• Add rate limiting");
        assert!(blocks[3]["elements"][0]["text"].as_str().unwrap().contains("`sig-9`"));
    }

    #[test]
    fn test_blocks_without_token_show_new_session() {
        let payload = blocks(&notification(None));
        let context = payload["blocks"][3]["elements"][0]["text"].as_str().unwrap();
        assert!(context.contains(NEW_SESSION));
    }

    #[tokio::test]
    async fn test_notify_posts_to_webhook() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/services/T000/B000"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = SlackNotifier::new(Some(format!("{}/services/T000/B000", server.uri())), TIMEOUT).unwrap();
        notifier.notify(&notification(None)).await.unwrap();
    }

    #[tokio::test]
    async fn test_webhook_rejection_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no_service"))
            .mount(&server)
            .await;

        let notifier = SlackNotifier::new(Some(server.uri()), TIMEOUT).unwrap();
        let err = notifier.notify(&notification(None)).await.unwrap_err();
        assert!(matches!(err, DownstreamError::Http { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_hanging_webhook_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
            .mount(&server)
            .await;

        let notifier = SlackNotifier::new(Some(server.uri()), Duration::from_millis(200)).unwrap();
        let started = std::time::Instant::now();
        let err = notifier.notify(&notification(None)).await.unwrap_err();
        assert!(matches!(err, DownstreamError::Transport(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_unconfigured_webhook() {
        let err = SlackNotifier::new(None, TIMEOUT).unwrap().notify(&notification(None)).await.unwrap_err();
        assert!(matches!(err, DownstreamError::NotConfigured("Slack")));
    }
}
