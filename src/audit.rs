//! Audit pipeline: evaluate a code change against a project's stored intent.
//!
//! ```text
//! RECEIVED -> STATE_LOOKUP -> EVALUATING_WITH_CONTINUATION
//!          -> [EVALUATING_STATELESS_FALLBACK] -> REPORTED -> DONE
//! ```
//!
//! The fallback runs only when a continuation token was supplied and the
//! engine refused the call permanently. The review comment is best-effort:
//! once an evaluation exists the audit succeeds whether or not posting does.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::MAX_DIFF_CHARS;
use crate::dispatch::{CodeHost, DownstreamResult, TargetKind};
use crate::errors::{EngineError, PipelineError, ValidationError};
use crate::reasoning::{ContinuationToken, EffortLevel, ReasoningClient, ReasoningRequest};
use crate::store::ContinuationStore;

/// Prefixed to reviews produced without memory context.
pub const FALLBACK_NOTE: &str = "⚠️ *Note: Session memory expired, reviewing based on current diff:*\n\n";

const REVIEW_PROMPT: &str = "ROLE: You are Shadow-PM, the strategic guardian of this project.
CONTEXT: You have been provided with a Thought Signature representing our meeting decisions.

TASK:
1. Review the following Code Diff.
2. Cross-reference it with the strategic intent stored in your signature.
3. Identify \"Strategic Drift\" (e.g., using a library we explicitly rejected, or skipping a requirement we prioritized).

FORMAT:
- Start with a \"Strategic Alignment\" score (High/Med/Low).
- List specific concerns as bullet points.
- Keep it brief, professional, and firm.";

const VERDICT_PROMPT: &str = "You are the Shadow-PM Strategic Sentinel.
Your job is to review a GitHub Pull Request against the established STRATEGIC INTENT.

TASK:
1. Analyze the PR DIFF to see what code is being changed.
2. Compare these changes against the STRATEGIC INTENT provided in the Thought Signature.
3. If the code violates a strategic decision (e.g., using a forbidden library, changing a core feature), FLAG IT.

FORMAT:
Return a JSON object:
{
  \"status\": \"APPROVED\" | \"FLAGGED\",
  \"comment\": \"A brief explanation of why this matches or violates the meeting minutes.\"
}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuditMode {
    /// Free-text review with an alignment score.
    #[default]
    Review,
    /// Structured APPROVED/FLAGGED verdict.
    Verdict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditStage {
    Received,
    StateLookup,
    EvaluatingWithContinuation,
    EvaluatingStatelessFallback,
    Reported,
    Done,
}

/// What memory the final evaluation was produced with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryContext {
    Continued,
    NoMemory,
    StatelessFallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VerdictStatus {
    Approved,
    Flagged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub status: VerdictStatus,
    pub comment: String,
}

impl Verdict {
    /// Parse the outermost `{...}` object in `text`; surrounding prose and
    /// code fences are ignored.
    pub fn parse(text: &str) -> Option<Self> {
        let start = text.find('{')?;
        let end = text.rfind('}')?;
        if end < start {
            return None;
        }
        serde_json::from_str(&text[start..=end]).ok()
    }

    fn render(&self) -> String {
        let label = match self.status {
            VerdictStatus::Approved => "✅ APPROVED",
            VerdictStatus::Flagged => "🚩 FLAGGED",
        };
        format!("**{}**: {}", label, self.comment)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AuditRequest {
    pub project_id: String,
    pub diff: Option<String>,
    pub repo: Option<String>,
    pub change_number: Option<u64>,
    pub continuation: Option<ContinuationToken>,
    pub mode: AuditMode,
}

/// An `AuditRequest` with every required field present.
struct ValidatedAudit {
    project_id: String,
    diff: String,
    repo: String,
    change: u64,
    continuation: Option<ContinuationToken>,
    mode: AuditMode,
}

impl AuditRequest {
    /// Names every missing field, not just the first. Blank strings and a
    /// zero change number count as missing.
    fn into_validated(self) -> Result<ValidatedAudit, ValidationError> {
        let diff = self.diff.filter(|d| !d.trim().is_empty());
        let repo = self.repo.filter(|r| !r.trim().is_empty());
        let change = self.change_number.filter(|n| *n != 0);
        match (diff, repo, change) {
            (Some(diff), Some(repo), Some(change)) => Ok(ValidatedAudit {
                project_id: self.project_id,
                diff,
                repo,
                change,
                continuation: self.continuation,
                mode: self.mode,
            }),
            (diff, repo, change) => {
                let mut missing = Vec::new();
                if diff.is_none() {
                    missing.push("diff");
                }
                if repo.is_none() {
                    missing.push("repo");
                }
                if change.is_none() {
                    missing.push("changeNumber");
                }
                Err(ValidationError { missing })
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditOutcome {
    pub project_id: String,
    pub review: String,
    pub verdict: Option<Verdict>,
    pub memory: MemoryContext,
    pub comment: DownstreamResult,
    pub stages: Vec<AuditStage>,
}

impl AuditOutcome {
    pub fn downstream_status(&self) -> &'static str {
        if self.comment.is_success() {
            "Comment Posted"
        } else {
            "Failed to Post"
        }
    }
}

/// Truncate to `max_chars` characters.
pub fn truncate_diff(diff: &str, max_chars: usize) -> &str {
    match diff.char_indices().nth(max_chars) {
        Some((idx, _)) => &diff[..idx],
        None => diff,
    }
}

fn build_prompt(mode: AuditMode, intent: &str, diff: &str) -> String {
    let intent = if intent.trim().is_empty() {
        "(no strategic intent recorded yet)"
    } else {
        intent
    };
    let header = match mode {
        AuditMode::Review => REVIEW_PROMPT,
        AuditMode::Verdict => VERDICT_PROMPT,
    };
    format!("{}\n\nSTRATEGIC INTENT:\n{}\n\nPR DIFF:\n{}", header, intent, diff)
}

/// A permanent refusal of a continued call. Exhausted retries are excluded:
/// the engine was busy, not unwilling.
fn warrants_fallback(err: &EngineError) -> bool {
    matches!(err, EngineError::TokenRejected(_) | EngineError::Permanent(_))
}

#[derive(Clone)]
pub struct AuditPipeline {
    client: ReasoningClient,
    store: Arc<dyn ContinuationStore>,
    code_host: Arc<dyn CodeHost>,
    max_diff_chars: usize,
}

impl AuditPipeline {
    pub fn new(client: ReasoningClient, store: Arc<dyn ContinuationStore>, code_host: Arc<dyn CodeHost>) -> Self {
        Self {
            client,
            store,
            code_host,
            max_diff_chars: MAX_DIFF_CHARS,
        }
    }

    pub fn with_max_diff_chars(mut self, max_diff_chars: usize) -> Self {
        self.max_diff_chars = max_diff_chars;
        self
    }

    pub async fn run(&self, request: AuditRequest) -> Result<AuditOutcome, PipelineError> {
        let mut stages = vec![AuditStage::Received];
        let ValidatedAudit {
            project_id,
            diff,
            repo,
            change,
            continuation,
            mode,
        } = request.into_validated()?;

        stages.push(AuditStage::StateLookup);
        let state = self
            .store
            .get(&project_id)
            .await
            .map_err(PipelineError::Store)?;
        let intent = state.as_ref().map(|s| s.strategic_intent.as_str()).unwrap_or_default();
        let token = continuation.or_else(|| state.as_ref().and_then(|s| s.continuation_token.clone()));
        tracing::info!(
            project = %project_id,
            repo = %repo,
            change,
            state_found = state.is_some(),
            has_token = token.is_some(),
            "audit started"
        );

        let prompt = build_prompt(mode, intent, truncate_diff(&diff, self.max_diff_chars));

        stages.push(AuditStage::EvaluatingWithContinuation);
        let continued = ReasoningRequest::new(prompt.clone())
            .with_effort(EffortLevel::High)
            .with_continuation(token.clone());
        let (text, memory) = match self.client.invoke(&continued).await {
            Ok(response) if token.is_some() => (response.text, MemoryContext::Continued),
            Ok(response) => (response.text, MemoryContext::NoMemory),
            Err(err) if token.is_some() && warrants_fallback(&err) => {
                tracing::warn!(error = %err, "continuation refused, falling back to stateless review");
                stages.push(AuditStage::EvaluatingStatelessFallback);
                let stateless = ReasoningRequest::new(prompt).with_effort(EffortLevel::Medium);
                let response = self.client.invoke(&stateless).await?;
                (response.text, MemoryContext::StatelessFallback)
            }
            Err(err) => return Err(err.into()),
        };

        let verdict = match mode {
            AuditMode::Verdict => {
                let verdict = Verdict::parse(&text);
                if verdict.is_none() {
                    tracing::warn!("verdict response was not valid JSON, posting raw text");
                }
                verdict
            }
            AuditMode::Review => None,
        };

        let body = verdict.as_ref().map(Verdict::render).unwrap_or_else(|| text.clone());
        let review = if memory == MemoryContext::StatelessFallback {
            format!("{}{}", FALLBACK_NOTE, body)
        } else {
            body
        };

        stages.push(AuditStage::Reported);
        let subject = format!("{}#{}", repo, change);
        let comment = match self.code_host.post_review_comment(&repo, change, &review).await {
            Ok(handle) => DownstreamResult::delivered(TargetKind::Comment, subject, Some(handle.id)),
            Err(err) => {
                tracing::warn!(repo = %repo, change, error = %err, "review comment not posted");
                DownstreamResult::failed(TargetKind::Comment, subject, &err)
            }
        };

        stages.push(AuditStage::Done);
        tracing::info!(project = %project_id, memory = ?memory, posted = comment.is_success(), "audit complete");
        Ok(AuditOutcome {
            project_id,
            review,
            verdict,
            memory,
            comment,
            stages,
        })
    }
}
