//! Reasoning engine seam and the resilient client that wraps it.
//!
//! `ReasoningEngine` performs single raw calls (generate, asset upload,
//! asset status). `ReasoningClient` layers the invocation policy on top:
//! media upload and bounded status polling, exponential backoff on
//! rate-limit/overload failures, and response normalization.
//!
//! Continuation tokens are opaque. The client never inspects them; it only
//! forwards the inbound token and surfaces whatever outbound token the
//! engine attached to the trailing response segment.

pub mod gemini;
pub mod retry;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::EngineError;

pub use gemini::{GeminiConfig, GeminiEngine};
pub use retry::{PollPolicy, RetryPolicy};

/// How much internal deliberation the engine performs before answering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EffortLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl EffortLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }
}

/// Opaque engine-issued handle that lets a later call resume prior context.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContinuationToken(String);

impl ContinuationToken {
    /// Wrap a raw token. Blank input carries no continuation and yields `None`.
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            None
        } else {
            Some(Self(raw))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Debug for ContinuationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix: String = self.0.chars().take(8).collect();
        write!(f, "ContinuationToken({}…, {} chars)", prefix, self.0.chars().count())
    }
}

/// Media attached to a request, uploaded to the engine's asset store before generation.
#[derive(Clone)]
pub struct MediaRef {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub display_name: Option<String>,
}

impl MediaRef {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

impl std::fmt::Debug for MediaRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaRef")
            .field("bytes", &self.bytes.len())
            .field("mime_type", &self.mime_type)
            .field("display_name", &self.display_name)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ReasoningRequest {
    pub prompt: String,
    pub media: Option<MediaRef>,
    pub continuation: Option<ContinuationToken>,
    pub effort: EffortLevel,
}

impl ReasoningRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            media: None,
            continuation: None,
            effort: EffortLevel::default(),
        }
    }

    pub fn with_effort(mut self, effort: EffortLevel) -> Self {
        self.effort = effort;
        self
    }

    pub fn with_continuation(mut self, token: Option<ContinuationToken>) -> Self {
        self.continuation = token;
        self
    }

    pub fn with_media(mut self, media: Option<MediaRef>) -> Self {
        self.media = media;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReasoningResponse {
    pub text: String,
    pub continuation: Option<ContinuationToken>,
    pub reasoning: Option<String>,
}

impl ReasoningResponse {
    /// Drop blank optional annotations so callers only see meaningful values.
    fn normalized(self) -> Self {
        let reasoning = self.reasoning.filter(|r| !r.trim().is_empty());
        let continuation = self.continuation.and_then(|t| ContinuationToken::new(t.into_inner()));
        Self {
            text: self.text,
            continuation,
            reasoning,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetState {
    Processing,
    Active,
    Failed,
}

/// An uploaded asset as known to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetHandle {
    pub name: String,
    pub uri: String,
    pub mime_type: String,
    pub state: AssetState,
}

/// Raw single-call access to a reasoning capability.
/// Real implementation: `GeminiEngine`. Tests provide scripted stubs.
#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    async fn generate(
        &self,
        request: &ReasoningRequest,
        asset: Option<&AssetHandle>,
    ) -> Result<ReasoningResponse, EngineError>;

    async fn upload_asset(&self, media: &MediaRef) -> Result<AssetHandle, EngineError>;

    async fn asset_status(&self, asset: &AssetHandle) -> Result<AssetHandle, EngineError>;
}

/// Invokes a `ReasoningEngine` with retry, polling and normalization.
#[derive(Clone)]
pub struct ReasoningClient {
    engine: Arc<dyn ReasoningEngine>,
    retry: RetryPolicy,
    poll: PollPolicy,
}

impl ReasoningClient {
    pub fn new(engine: Arc<dyn ReasoningEngine>) -> Self {
        Self {
            engine,
            retry: RetryPolicy::default(),
            poll: PollPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_poll(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    /// Run one logical invocation, retrying transient failures with backoff.
    ///
    /// Exhausting the attempt budget yields `EngineError::RetriesExhausted`.
    /// Any other failure is returned immediately.
    pub async fn invoke(&self, request: &ReasoningRequest) -> Result<ReasoningResponse, EngineError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.attempt(request).await {
                Ok(response) => {
                    tracing::debug!(
                        attempt,
                        effort = request.effort.as_str(),
                        continued = response.continuation.is_some(),
                        "reasoning call succeeded"
                    );
                    return Ok(response.normalized());
                }
                Err(err) if err.is_retryable() => {
                    if attempt >= self.retry.max_attempts {
                        tracing::error!(attempts = attempt, error = %err, "reasoning engine retries exhausted");
                        return Err(EngineError::RetriesExhausted {
                            attempts: attempt,
                            last: err.to_string(),
                        });
                    }
                    let delay = self.retry.delay_for(attempt - 1);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "reasoning engine busy, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn attempt(&self, request: &ReasoningRequest) -> Result<ReasoningResponse, EngineError> {
        match &request.media {
            Some(media) => {
                let asset = self.upload_and_wait(media).await?;
                self.engine.generate(request, Some(&asset)).await
            }
            None => self.engine.generate(request, None).await,
        }
    }

    async fn upload_and_wait(&self, media: &MediaRef) -> Result<AssetHandle, EngineError> {
        let mut asset = self.engine.upload_asset(media).await?;
        tracing::info!(asset = %asset.name, bytes = media.bytes.len(), "media uploaded");

        let mut polls = 0u32;
        loop {
            match asset.state {
                AssetState::Active => return Ok(asset),
                AssetState::Failed => return Err(EngineError::AssetFailed { asset: asset.name }),
                AssetState::Processing => {}
            }
            if polls >= self.poll.max_attempts {
                tracing::error!(asset = %asset.name, polls, "asset still processing, giving up");
                return Err(EngineError::AssetTimeout {
                    asset: asset.name,
                    attempts: polls,
                });
            }
            tokio::time::sleep(self.poll.interval).await;
            polls += 1;
            asset = self.engine.asset_status(&asset).await?;
            tracing::debug!(asset = %asset.name, polls, state = ?asset.state, "asset status");
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted engine shared by pipeline tests.

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// One recorded `generate` call.
    #[derive(Debug, Clone)]
    pub struct RecordedCall {
        pub prompt: String,
        pub continuation: Option<ContinuationToken>,
        pub effort: EffortLevel,
        pub asset: Option<String>,
        pub at: tokio::time::Instant,
    }

    /// Replays queued results; once the queue is empty every call succeeds
    /// with `fallback_text`.
    pub struct ScriptedEngine {
        script: Mutex<VecDeque<Result<ReasoningResponse, EngineError>>>,
        asset_states: Mutex<VecDeque<AssetState>>,
        pub calls: Mutex<Vec<RecordedCall>>,
        pub uploads: Mutex<u32>,
        pub status_polls: Mutex<u32>,
        fallback_text: String,
    }

    impl ScriptedEngine {
        pub fn new(script: Vec<Result<ReasoningResponse, EngineError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                asset_states: Mutex::new(VecDeque::new()),
                calls: Mutex::new(Vec::new()),
                uploads: Mutex::new(0),
                status_polls: Mutex::new(0),
                fallback_text: "ok".to_string(),
            }
        }

        pub fn replying(text: &str) -> Self {
            let mut engine = Self::new(vec![]);
            engine.fallback_text = text.to_string();
            engine
        }

        /// States returned by the upload followed by each status read.
        pub fn with_asset_states(self, states: Vec<AssetState>) -> Self {
            *self.asset_states.lock().unwrap() = states.into();
            self
        }

        pub fn calls(&self) -> Vec<RecordedCall> {
            self.calls.lock().unwrap().clone()
        }

        fn next_asset(&self) -> AssetHandle {
            let state = self
                .asset_states
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(AssetState::Active);
            AssetHandle {
                name: "files/meeting".to_string(),
                uri: "https://assets.test/files/meeting".to_string(),
                mime_type: "video/mp4".to_string(),
                state,
            }
        }
    }

    pub fn reply(text: &str, token: Option<&str>) -> ReasoningResponse {
        ReasoningResponse {
            text: text.to_string(),
            continuation: token.and_then(ContinuationToken::new),
            reasoning: None,
        }
    }

    #[async_trait]
    impl ReasoningEngine for ScriptedEngine {
        async fn generate(
            &self,
            request: &ReasoningRequest,
            asset: Option<&AssetHandle>,
        ) -> Result<ReasoningResponse, EngineError> {
            self.calls.lock().unwrap().push(RecordedCall {
                prompt: request.prompt.clone(),
                continuation: request.continuation.clone(),
                effort: request.effort,
                asset: asset.map(|a| a.name.clone()),
                at: tokio::time::Instant::now(),
            });
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Ok(reply(&self.fallback_text, None)))
        }

        async fn upload_asset(&self, _media: &MediaRef) -> Result<AssetHandle, EngineError> {
            *self.uploads.lock().unwrap() += 1;
            Ok(self.next_asset())
        }

        async fn asset_status(&self, _asset: &AssetHandle) -> Result<AssetHandle, EngineError> {
            *self.status_polls.lock().unwrap() += 1;
            Ok(self.next_asset())
        }
    }
}
