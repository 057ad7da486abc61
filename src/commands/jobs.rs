//! Job commands: full analysis, reconciliation, push payloads, job lookup
//!
//! The CLI process owns the worker pool, so every command that starts a
//! job waits for it before returning.

use std::path::PathBuf;

use tracing::info;

use crate::context::IndexContext;
use crate::error::{Error, Result};
use crate::jobs::JobStatus;
use crate::meta::JobState;
use crate::progress::start_spinner;
use crate::reconcile::ChangeSet;
use crate::webhook::{verify_signature, PushEvent};

/// Run a full analysis of one repository
pub async fn cmd_analyze(ctx: &IndexContext, reference: &str) -> Result<JobStatus> {
    let repository = ctx.repository(reference).await?;
    let job_id = ctx.start_full_analysis(repository.id).await?;
    info!(job_id = %job_id, repository = %repository.full_name, "Full analysis queued");
    wait_for(ctx, &job_id, &format!("Analyzing {}", repository.full_name)).await
}

/// Apply an explicit change set
pub async fn cmd_reconcile(
    ctx: &IndexContext,
    reference: &str,
    changes: ChangeSet,
) -> Result<JobStatus> {
    if changes.is_empty() {
        return Err(Error::InvalidArgument(
            "nothing to reconcile: pass --added, --modified or --removed".to_string(),
        ));
    }
    let repository = ctx.repository(reference).await?;
    let job_id = ctx.reconcile(repository.id, changes).await?;
    wait_for(ctx, &job_id, &format!("Reconciling {}", repository.full_name)).await
}

/// Options for `push`
#[derive(Debug, Clone, Default)]
pub struct PushOptions {
    /// File holding the raw push payload
    pub payload: PathBuf,
    /// `X-Hub-Signature-256` header value
    pub signature_256: Option<String>,
    /// Legacy `X-Hub-Signature` header value
    pub signature: Option<String>,
    /// Repository to reconcile instead of the payload's `repository.full_name`
    pub repository: Option<String>,
}

/// Outcome of handling a push payload
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PushOutcome {
    Reconciled { job: JobStatus },
    /// Push to a branch other than the default one
    IgnoredBranch { branch: String },
    /// No path changes in the payload
    NoChanges,
}

/// Verify and apply a GitHub push payload. Without a configured secret
/// every payload is rejected.
pub async fn cmd_push(
    ctx: &IndexContext,
    secret: Option<&str>,
    options: PushOptions,
) -> Result<PushOutcome> {
    let body = tokio::fs::read(&options.payload).await?;

    verify_signature(
        secret,
        &body,
        options.signature_256.as_deref(),
        options.signature.as_deref(),
    )?;

    let event = PushEvent::parse(&body)?;
    let reference = options
        .repository
        .as_deref()
        .or_else(|| event.repository_name())
        .ok_or_else(|| {
            Error::InvalidArgument("payload has no repository; pass --repo".to_string())
        })?;
    let repository = ctx.repository(reference).await?;

    if !event.targets_default_branch() {
        let branch = event.branch().unwrap_or_default().to_string();
        info!(repository = %repository.full_name, branch = %branch, "Ignoring push to non-default branch");
        return Ok(PushOutcome::IgnoredBranch { branch });
    }

    let changes = event.change_set();
    if changes.is_empty() {
        return Ok(PushOutcome::NoChanges);
    }

    info!(
        repository = %repository.full_name,
        added = changes.added.len(),
        modified = changes.modified.len(),
        removed = changes.removed.len(),
        "Applying push"
    );
    let job_id = ctx.reconcile(repository.id, changes).await?;
    let job = wait_for(ctx, &job_id, &format!("Reconciling {}", repository.full_name)).await?;
    Ok(PushOutcome::Reconciled { job })
}

pub async fn cmd_job(ctx: &IndexContext, job_id: &str) -> Result<JobStatus> {
    ctx.get_job_status(job_id).await
}

async fn wait_for(ctx: &IndexContext, job_id: &str, message: &str) -> Result<JobStatus> {
    let spinner = start_spinner(message);
    let status = ctx.jobs().wait(job_id).await;
    spinner.finish_and_clear();
    status
}

pub fn print_job_status(status: &JobStatus) {
    let marker = match status.state {
        JobState::Completed => "✓",
        JobState::Failed => "✗",
        JobState::Queued | JobState::Running => "…",
    };
    println!("{} Job {} [{}] {}", marker, status.id, status.kind, status.state);
    println!("  Repository: {}", status.repository_id);
    println!("  Updated: {}", status.updated_at);
    if let Some(error) = &status.error {
        println!("  Error: {}", error);
    }

    let Some(result) = &status.result else {
        return;
    };
    for key in [
        "branch",
        "files_indexed",
        "chunks_indexed",
        "chunks_skipped",
        "chunks_rejected",
    ] {
        if let Some(value) = result.get(key) {
            println!("  {}: {}", key, value);
        }
    }
    for key in ["succeeded", "removed", "ignored", "failed", "removed_paths", "failures"] {
        if let Some(items) = result.get(key).and_then(|v| v.as_array()) {
            if !items.is_empty() {
                println!("  {}: {}", key, items.len());
            }
        }
    }
}

pub fn print_push_outcome(outcome: &PushOutcome) {
    match outcome {
        PushOutcome::Reconciled { job } => print_job_status(job),
        PushOutcome::IgnoredBranch { branch } => {
            println!("Push to '{}' ignored: not the default branch", branch)
        }
        PushOutcome::NoChanges => println!("Push carries no file changes"),
    }
}
