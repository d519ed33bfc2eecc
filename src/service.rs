//! Submission state machine.
//!
//! Lifecycle: `pending → judging → finished | error`, no retries. The
//! `judging` transition is persisted before any sandbox work, so a crash
//! mid-run is observably stuck in `judging` rather than silently lost.
//! Exactly one terminal write happens per run; anything the engine could
//! not classify is downgraded to a system error here so a submission
//! never stays in `judging` forever.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::ExecutionConfig;
use crate::engine::JudgeEngine;
use crate::error::JudgeError;
use crate::metrics;
use crate::sandbox::Sandbox;
use crate::types::JudgeRequest;
use crate::verdict::{truncate_error, SubmissionResult, Verdict};
use crate::workspace::WorkspaceManager;

/// Persistence boundary of the state machine.
///
/// Behind a trait so the machine can be exercised without a database;
/// the production impl lives in [`crate::store::SubmissionStore`].
#[async_trait]
pub trait SubmissionSink: Send + Sync {
    /// `pending → judging`. Returns false when another worker already
    /// owns the submission; the run must then be skipped.
    async fn claim_judging(&self, submission_id: Uuid) -> anyhow::Result<bool>;

    /// `judging → finished` with the full verdict payload.
    async fn record_finished(
        &self,
        submission_id: Uuid,
        result: &SubmissionResult,
    ) -> anyhow::Result<()>;

    /// `judging → error` with a truncated diagnostic.
    async fn record_error(&self, submission_id: Uuid, diagnostic: &str) -> anyhow::Result<()>;

    /// Atomic submit/accept counter increment on the problem.
    async fn bump_problem_stats(&self, problem_id: Uuid, accepted: bool) -> anyhow::Result<()>;

    /// Recompute the user's aggregate statistics.
    async fn refresh_user_stats(&self, user_id: Uuid) -> anyhow::Result<()>;
}

/// Owns one judging run end to end.
pub struct JudgeService {
    sandbox: Arc<dyn Sandbox>,
    sink: Arc<dyn SubmissionSink>,
    workspaces: WorkspaceManager,
    execution: ExecutionConfig,
}

impl JudgeService {
    pub fn new(
        sandbox: Arc<dyn Sandbox>,
        sink: Arc<dyn SubmissionSink>,
        workspaces: WorkspaceManager,
        execution: ExecutionConfig,
    ) -> Self {
        Self {
            sandbox,
            sink,
            workspaces,
            execution,
        }
    }

    /// Judge one submission to a terminal state.
    ///
    /// Returns the terminal verdict, or `None` when the claim was lost
    /// to another worker. `Err` means the terminal write itself failed.
    pub async fn judge(
        &self,
        request: JudgeRequest,
        cancel: CancellationToken,
    ) -> anyhow::Result<Option<Verdict>> {
        if !self.sink.claim_judging(request.submission_id).await? {
            tracing::debug!(
                submission_id = %request.submission_id,
                "Submission already claimed, skipping"
            );
            return Ok(None);
        }

        match self.run(&request, &cancel).await {
            Ok(result) => {
                self.sink
                    .record_finished(request.submission_id, &result)
                    .await?;

                let accepted = result.verdict == Verdict::Accepted;
                self.sink
                    .bump_problem_stats(request.problem_id, accepted)
                    .await?;
                self.sink.refresh_user_stats(request.user_id).await?;

                metrics::record_verdict(result.verdict.code(), result.time_used_ms);
                tracing::info!(
                    submission_id = %request.submission_id,
                    verdict = %result.verdict,
                    score = result.score,
                    passed = result.passed_count,
                    total = result.total_count,
                    "Submission judged"
                );
                Ok(Some(result.verdict))
            }
            Err(err) => {
                // full diagnostic stays server-side; the submitter only
                // ever sees the generic system-error classification
                tracing::error!(
                    submission_id = %request.submission_id,
                    error = %err,
                    "Judging run failed before reaching a verdict"
                );
                let diagnostic = truncate_error(&err.to_string());
                self.sink
                    .record_error(request.submission_id, &diagnostic)
                    .await?;
                metrics::record_verdict(Verdict::SystemError.code(), 0);
                Ok(Some(Verdict::SystemError))
            }
        }
    }

    /// Run the engine inside a scoped workspace. The workspace is
    /// released on both branches; drop handles the panic path.
    async fn run(
        &self,
        request: &JudgeRequest,
        cancel: &CancellationToken,
    ) -> Result<SubmissionResult, JudgeError> {
        let workspace = self.workspaces.acquire(request).await?;
        let engine = JudgeEngine::new(self.sandbox.as_ref(), &self.execution);
        let outcome = engine.judge(request, &workspace, cancel).await;
        workspace.release();
        outcome
    }
}
