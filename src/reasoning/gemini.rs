//! Gemini implementation of `ReasoningEngine`.
//!
//! Talks to the Generative Language API: `models/{model}:generateContent`
//! for generation, the raw upload endpoint for media and `files/{name}`
//! for asset status.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::{AssetHandle, AssetState, ContinuationToken, MediaRef, ReasoningEngine, ReasoningRequest, ReasoningResponse};
use crate::config::EngineSection;
use crate::errors::EngineError;

const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Clone)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub model: String,
    /// Base endpoint, e.g. `https://generativelanguage.googleapis.com/v1beta`.
    pub endpoint: String,
    pub upload_endpoint: String,
    pub timeout_secs: u64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        let engine = EngineSection::default();
        Self {
            api_key: None,
            model: engine.model,
            endpoint: engine.endpoint,
            upload_endpoint: engine.upload_endpoint,
            timeout_secs: engine.timeout_secs,
        }
    }
}

impl GeminiConfig {
    pub fn from_section(section: &EngineSection, api_key: Option<String>) -> Self {
        Self {
            api_key,
            model: section.model.clone(),
            endpoint: section.endpoint.trim_end_matches('/').to_string(),
            upload_endpoint: section.upload_endpoint.trim_end_matches('/').to_string(),
            timeout_secs: section.timeout_secs,
        }
    }
}

pub struct GeminiEngine {
    client: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiEngine {
    pub fn new(config: GeminiConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    fn api_key(&self) -> Result<&str, EngineError> {
        self.config
            .api_key
            .as_deref()
            .ok_or_else(|| EngineError::Permanent("GOOGLE_GEMINI_API_KEY is not set".into()))
    }

    fn generate_url(&self) -> String {
        format!("{}/models/{}:generateContent", self.config.endpoint, self.config.model)
    }
}

// ── Wire types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_data: Option<FileData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thought_signature: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileData {
    file_uri: String,
    mime_type: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    thinking_config: ThinkingConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ThinkingConfig {
    include_thoughts: bool,
    thinking_level: &'static str,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    text: Option<String>,
    #[serde(default)]
    thought: bool,
    thought_signature: Option<String>,
    thought_summary: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: FileResource,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileResource {
    name: String,
    #[serde(default)]
    uri: String,
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    state: Option<String>,
}

impl FileResource {
    fn into_handle(self, fallback_mime: &str) -> AssetHandle {
        let state = match self.state.as_deref() {
            Some("PROCESSING") => AssetState::Processing,
            Some("FAILED") => AssetState::Failed,
            _ => AssetState::Active,
        };
        AssetHandle {
            name: self.name,
            uri: self.uri,
            mime_type: if self.mime_type.is_empty() {
                fallback_mime.to_string()
            } else {
                self.mime_type
            },
            state,
        }
    }
}

// ── Request building / response parsing ───────────────────────────────

fn build_request(request: &ReasoningRequest, asset: Option<&AssetHandle>) -> GenerateContentRequest {
    let mut contents = Vec::with_capacity(2);

    if let Some(token) = &request.continuation {
        contents.push(Content {
            role: "model",
            parts: vec![Part {
                text: Some(String::new()),
                thought_signature: Some(token.as_str().to_string()),
                ..Default::default()
            }],
        });
    }

    let mut parts = Vec::with_capacity(2);
    if let Some(asset) = asset {
        parts.push(Part {
            file_data: Some(FileData {
                file_uri: asset.uri.clone(),
                mime_type: asset.mime_type.clone(),
            }),
            ..Default::default()
        });
    }
    parts.push(Part {
        text: Some(request.prompt.clone()),
        ..Default::default()
    });
    contents.push(Content { role: "user", parts });

    GenerateContentRequest {
        contents,
        generation_config: GenerationConfig {
            thinking_config: ThinkingConfig {
                include_thoughts: true,
                thinking_level: request.effort.as_str(),
            },
        },
    }
}

/// Collapse a generateContent body into text, continuation token and summary.
///
/// The token and summary are read from the trailing part; when the trailing
/// part carries no signature the last signed part is used instead.
fn parse_response(body: GenerateContentResponse) -> ReasoningResponse {
    let parts = body
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts)
        .unwrap_or_default();

    let text = parts
        .iter()
        .filter(|p| !p.thought)
        .filter_map(|p| p.text.as_deref())
        .collect::<Vec<_>>()
        .join("");

    let continuation = parts
        .last()
        .and_then(|p| p.thought_signature.clone())
        .or_else(|| parts.iter().rev().find_map(|p| p.thought_signature.clone()))
        .and_then(ContinuationToken::new);

    let reasoning = parts.last().and_then(|p| p.thought_summary.clone()).or_else(|| {
        let thoughts: Vec<&str> = parts
            .iter()
            .filter(|p| p.thought)
            .filter_map(|p| p.text.as_deref())
            .collect();
        (!thoughts.is_empty()).then(|| thoughts.join("\n"))
    });

    ReasoningResponse {
        text,
        continuation,
        reasoning,
    }
}

/// Map a non-success HTTP response onto the engine error taxonomy.
fn classify_failure(status: StatusCode, body: &str, sent_token: bool) -> EngineError {
    let lowered = body.to_lowercase();
    let detail = format!("HTTP {}: {}", status.as_u16(), body);

    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::SERVICE_UNAVAILABLE
        || lowered.contains("overloaded")
    {
        return EngineError::Transient(detail);
    }
    if sent_token
        && status == StatusCode::BAD_REQUEST
        && (lowered.contains("signature") || lowered.contains("thought"))
    {
        return EngineError::TokenRejected(detail);
    }
    EngineError::Permanent(detail)
}

async fn failure_from(response: reqwest::Response, sent_token: bool) -> EngineError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    classify_failure(status, &body, sent_token)
}

fn transport(err: reqwest::Error) -> EngineError {
    EngineError::Permanent(format!("transport error: {}", err))
}

#[async_trait]
impl ReasoningEngine for GeminiEngine {
    async fn generate(
        &self,
        request: &ReasoningRequest,
        asset: Option<&AssetHandle>,
    ) -> Result<ReasoningResponse, EngineError> {
        let key = self.api_key()?;
        let body = build_request(request, asset);
        let sent_token = request.continuation.is_some();

        let response = self
            .client
            .post(self.generate_url())
            .header(API_KEY_HEADER, key)
            .json(&body)
            .send()
            .await
            .map_err(transport)?;

        if !response.status().is_success() {
            return Err(failure_from(response, sent_token).await);
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Permanent(format!("malformed generateContent response: {}", e)))?;
        Ok(parse_response(parsed))
    }

    async fn upload_asset(&self, media: &MediaRef) -> Result<AssetHandle, EngineError> {
        let key = self.api_key()?;
        let mut builder = self
            .client
            .post(format!("{}/files", self.config.upload_endpoint))
            .header(API_KEY_HEADER, key)
            .header("X-Goog-Upload-Protocol", "raw")
            .header(reqwest::header::CONTENT_TYPE, media.mime_type.as_str());
        if let Some(name) = &media.display_name {
            builder = builder.header("X-Goog-Upload-File-Name", name.as_str());
        }

        let response = builder
            .body(media.bytes.clone())
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(failure_from(response, false).await);
        }

        let uploaded: UploadResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Permanent(format!("malformed upload response: {}", e)))?;
        Ok(uploaded.file.into_handle(&media.mime_type))
    }

    async fn asset_status(&self, asset: &AssetHandle) -> Result<AssetHandle, EngineError> {
        let key = self.api_key()?;
        let response = self
            .client
            .get(format!("{}/{}", self.config.endpoint, asset.name))
            .header(API_KEY_HEADER, key)
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(failure_from(response, false).await);
        }

        let file: FileResource = response
            .json()
            .await
            .map_err(|e| EngineError::Permanent(format!("malformed file response: {}", e)))?;
        Ok(file.into_handle(&asset.mime_type))
    }
}
