//! One-shot pipeline runs: `shadow-pm ingest` and `shadow-pm audit`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use shadow_pm::audit::{AuditMode, AuditRequest};
use shadow_pm::config::{Secrets, Settings};
use shadow_pm::ingest::IngestRequest;
use shadow_pm::reasoning::{ContinuationToken, MediaRef};
use shadow_pm::server;

pub struct AuditArgs {
    pub diff_file: PathBuf,
    pub repo: String,
    pub change: u64,
    pub token: Option<String>,
    pub project: Option<String>,
    pub verdict: bool,
}

fn read_media(path: &Path) -> Result<MediaRef> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let mut media = MediaRef::new(bytes, mime.to_string());
    if let Some(name) = path.file_name() {
        media = media.with_display_name(name.to_string_lossy());
    }
    Ok(media)
}

pub async fn cmd_ingest(
    settings: &Settings,
    secrets: &Secrets,
    text: Option<String>,
    video: Option<&Path>,
    project: Option<String>,
    signature: Option<String>,
) -> Result<()> {
    if text.is_none() && video.is_none() {
        anyhow::bail!("Nothing to ingest: pass --text and/or --video");
    }
    let media = video.map(read_media).transpose()?;

    let state = server::build_state(settings, secrets)?;
    let request = IngestRequest::new(project.unwrap_or_else(|| settings.project.default_id.clone()))
        .with_text(text)
        .with_media(media)
        .with_continuation(signature.and_then(ContinuationToken::new));

    let outcome = state.ingest.run(request).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

pub async fn cmd_audit(settings: &Settings, secrets: &Secrets, args: AuditArgs) -> Result<()> {
    let diff = std::fs::read_to_string(&args.diff_file)
        .with_context(|| format!("Failed to read diff file {}", args.diff_file.display()))?;

    let state = server::build_state(settings, secrets)?;
    let request = AuditRequest {
        project_id: args.project.unwrap_or_else(|| settings.project.default_id.clone()),
        diff: Some(diff),
        repo: Some(args.repo),
        change_number: Some(args.change),
        continuation: args.token.and_then(ContinuationToken::new),
        mode: if args.verdict {
            AuditMode::Verdict
        } else {
            AuditMode::Review
        },
    };

    let outcome = state.audit.run(request).await?;
    println!("{}", outcome.review);
    println!();
    println!("Memory: {:?}", outcome.memory);
    println!("Review comment: {}", outcome.downstream_status());
    Ok(())
}
