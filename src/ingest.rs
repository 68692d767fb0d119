//! Ingestion pipeline: meeting input to stored intent, tickets and a notification.
//!
//! Order within one run is fixed: engine call, then the state write, then
//! extraction and fan-out. Downstream consumers therefore always see the
//! intent that produced their requirements.

use std::sync::Arc;

use serde::Serialize;

use crate::dispatch::{DispatchReport, Dispatcher, IssueType, ProjectMeta};
use crate::errors::PipelineError;
use crate::extract;
use crate::reasoning::{ContinuationToken, EffortLevel, MediaRef, ReasoningClient, ReasoningRequest};
use crate::store::{ContinuationStore, StateUpdate};

const DEFAULT_INPUT: &str = "Analyze this meeting.";

#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub project_id: String,
    pub text: Option<String>,
    pub media: Option<MediaRef>,
    pub continuation: Option<ContinuationToken>,
}

impl IngestRequest {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            text: None,
            media: None,
            continuation: None,
        }
    }

    pub fn with_text(mut self, text: Option<String>) -> Self {
        self.text = text.filter(|t| !t.trim().is_empty());
        self
    }

    pub fn with_media(mut self, media: Option<MediaRef>) -> Self {
        self.media = media.filter(|m| !m.bytes.is_empty());
        self
    }

    pub fn with_continuation(mut self, token: Option<ContinuationToken>) -> Self {
        self.continuation = token;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestOutcome {
    pub project_id: String,
    pub text: String,
    pub continuation_token: Option<ContinuationToken>,
    pub reasoning: Option<String>,
    pub requirements: Vec<String>,
    pub report: DispatchReport,
}

pub fn ingestion_prompt(text: Option<&str>) -> String {
    format!(
        "Extract actionable technical requirements from this input.\n\
         Format each task starting with a \"•\" bullet point.\n\
         Be concise. Do not include intro/outro text.\n\
         INPUT: {}",
        text.unwrap_or(DEFAULT_INPUT)
    )
}

#[derive(Clone)]
pub struct IngestionPipeline {
    client: ReasoningClient,
    store: Arc<dyn ContinuationStore>,
    dispatcher: Dispatcher,
    issue_type: IssueType,
}

impl IngestionPipeline {
    pub fn new(client: ReasoningClient, store: Arc<dyn ContinuationStore>, dispatcher: Dispatcher) -> Self {
        Self {
            client,
            store,
            dispatcher,
            issue_type: IssueType::default(),
        }
    }

    pub fn with_issue_type(mut self, issue_type: IssueType) -> Self {
        self.issue_type = issue_type;
        self
    }

    pub async fn run(&self, request: IngestRequest) -> Result<IngestOutcome, PipelineError> {
        let IngestRequest {
            project_id,
            text,
            media,
            continuation,
        } = request;

        tracing::info!(
            project = %project_id,
            has_media = media.is_some(),
            resumed = continuation.is_some(),
            "ingestion started"
        );

        let reasoning_request = ReasoningRequest::new(ingestion_prompt(text.as_deref()))
            .with_effort(EffortLevel::High)
            .with_continuation(continuation)
            .with_media(media);
        let response = self.client.invoke(&reasoning_request).await?;

        let update = StateUpdate::intent(response.text.clone()).with_token(response.continuation.clone());
        self.store
            .merge(&project_id, update)
            .await
            .map_err(PipelineError::Store)?;

        let requirements = extract::extract(&response.text);
        tracing::info!(project = %project_id, count = requirements.len(), "requirements extracted");

        let meta = ProjectMeta::new(project_id.clone()).with_issue_type(self.issue_type);
        let report = self
            .dispatcher
            .dispatch(&requirements, response.continuation.as_ref(), &meta)
            .await;

        Ok(IngestOutcome {
            project_id,
            text: response.text,
            continuation_token: response.continuation,
            reasoning: response.reasoning,
            requirements,
            report,
        })
    }
}
