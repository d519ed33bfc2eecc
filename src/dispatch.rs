//! Bounded worker pool, admission gate and pending-submission intake.
//!
//! One accepted submission is one run, but runs are capped: a fixed
//! worker ceiling plus a bounded admission queue. When the queue is full
//! new requests are rejected and the intake loop backs off, instead of
//! spawning an unbounded sandbox session per submission.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::config::PoolConfig;
use crate::metrics;
use crate::service::{JudgeService, SubmissionSink};
use crate::store::SubmissionStore;
use crate::types::JudgeRequest;
use crate::verdict::truncate_error;

/// Why a submission was not admitted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdmissionError {
    /// Queue at capacity; retry after the backlog drains.
    #[error("admission queue saturated")]
    Saturated,

    /// The pool has shut down.
    #[error("judge pool closed")]
    Closed,
}

/// Create a judge pool and its runner.
///
/// The runner owns the queue's consuming end; spawn `runner.run(...)` to
/// start draining. Splitting construction from running keeps admission
/// behavior testable without live workers.
pub fn pool(
    service: Arc<JudgeService>,
    workers: usize,
    queue_capacity: usize,
) -> (JudgePool, PoolRunner) {
    let (tx, rx) = mpsc::channel(queue_capacity);
    (
        JudgePool { queue: tx },
        PoolRunner {
            queue: rx,
            service,
            workers,
        },
    )
}

/// Admission handle; cheap to clone.
#[derive(Clone)]
pub struct JudgePool {
    queue: mpsc::Sender<JudgeRequest>,
}

impl JudgePool {
    /// Admit a request, or reject immediately when saturated.
    pub fn submit(&self, request: JudgeRequest) -> Result<(), AdmissionError> {
        self.queue.try_send(request).map_err(|e| match e {
            TrySendError::Full(_) => AdmissionError::Saturated,
            TrySendError::Closed(_) => AdmissionError::Closed,
        })
    }
}

/// Drains the admission queue into at most `workers` concurrent runs.
pub struct PoolRunner {
    queue: mpsc::Receiver<JudgeRequest>,
    service: Arc<JudgeService>,
    workers: usize,
}

impl PoolRunner {
    pub async fn run(mut self, cancel: CancellationToken) {
        let slots = Arc::new(Semaphore::new(self.workers));

        loop {
            let request = tokio::select! {
                _ = cancel.cancelled() => break,
                req = self.queue.recv() => match req {
                    Some(r) => r,
                    None => break,
                },
            };

            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = slots.clone().acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
            };

            let service = self.service.clone();
            let run_cancel = cancel.child_token();
            tokio::spawn(async move {
                metrics::ACTIVE_RUNS.inc();
                match service.judge(request, run_cancel).await {
                    Ok(_) => metrics::RUNS_JUDGED.inc(),
                    Err(e) => {
                        tracing::error!(
                            error = %e,
                            "Terminal write failed; submission may be stuck in judging"
                        );
                        metrics::RUNS_FAILED.inc();
                    }
                }
                metrics::ACTIVE_RUNS.dec();
                drop(permit);
            });
        }

        tracing::info!("Judge pool shutting down");
    }
}

/// Poll for pending submissions and admit them to the pool.
///
/// A submission that cannot even be loaded (unknown language, vanished
/// problem) is terminated as an error here so it cannot poison the queue
/// on every poll.
pub async fn intake_loop(
    store: Arc<SubmissionStore>,
    pool: JudgePool,
    config: PoolConfig,
    cancel: CancellationToken,
) {
    let interval = Duration::from_millis(config.poll_interval_ms);

    while !cancel.is_cancelled() {
        match store.fetch_pending(config.intake_batch).await {
            Ok(ids) => {
                for submission_id in ids {
                    let request = match store.load_request(submission_id).await {
                        Ok(request) => request,
                        Err(e) => {
                            tracing::error!(
                                submission_id = %submission_id,
                                error = %e,
                                "Failed to load judge request"
                            );
                            fail_unloadable(&store, submission_id, &e.to_string()).await;
                            continue;
                        }
                    };

                    match pool.submit(request) {
                        Ok(()) => {}
                        Err(AdmissionError::Saturated) => {
                            metrics::ADMISSIONS_REJECTED.inc();
                            tracing::debug!("Admission queue saturated, backing off");
                            break;
                        }
                        Err(AdmissionError::Closed) => return,
                    }
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to poll pending submissions");
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    tracing::info!("Intake loop stopped");
}

async fn fail_unloadable(store: &SubmissionStore, submission_id: uuid::Uuid, reason: &str) {
    match store.claim_judging(submission_id).await {
        Ok(true) => {
            let diagnostic = truncate_error(reason);
            if let Err(e) = store.record_error(submission_id, &diagnostic).await {
                tracing::error!(
                    submission_id = %submission_id,
                    error = %e,
                    "Failed to record load failure"
                );
            }
        }
        Ok(false) => {}
        Err(e) => {
            tracing::error!(
                submission_id = %submission_id,
                error = %e,
                "Failed to claim unloadable submission"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionConfig;
    use crate::sandbox::fake::FakeSandbox;
    use crate::service::fake::FakeSink;
    use crate::types::{CommandTemplate, LanguageProfile, TestCase};
    use crate::workspace::WorkspaceManager;
    use uuid::Uuid;

    fn request() -> JudgeRequest {
        JudgeRequest {
            submission_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            problem_id: Uuid::new_v4(),
            source_code: "print(3)".into(),
            language: LanguageProfile {
                name: "python".into(),
                compile_command: None,
                compile_timeout_secs: 30,
                run_command: CommandTemplate::new("python3 {source}"),
                image: "python:3.12-bookworm".into(),
                file_extension: ".py".into(),
            },
            test_cases: vec![TestCase {
                order: 1,
                input: "1 2".into(),
                expected_output: "3".into(),
                score: 10,
                time_limit_ms: None,
                memory_limit_mb: None,
            }],
            time_limit_ms: 1000,
            memory_limit_mb: 256,
            total_score: 100,
        }
    }

    fn service(sandbox: Arc<FakeSandbox>, sink: Arc<FakeSink>, root: &std::path::Path) -> Arc<JudgeService> {
        Arc::new(JudgeService::new(
            sandbox,
            sink,
            WorkspaceManager::new(root.to_path_buf()),
            ExecutionConfig::default(),
        ))
    }

    #[tokio::test]
    async fn saturated_queue_rejects_admission() {
        let root = tempfile::tempdir().unwrap();
        let svc = service(Arc::new(FakeSandbox::new()), Arc::new(FakeSink::new()), root.path());

        // runner never started: the queue alone bounds admission
        let (pool, _runner) = pool(svc, 1, 2);

        assert_eq!(pool.submit(request()), Ok(()));
        assert_eq!(pool.submit(request()), Ok(()));
        assert_eq!(pool.submit(request()), Err(AdmissionError::Saturated));
    }

    #[tokio::test]
    async fn runner_drains_admitted_requests() {
        let root = tempfile::tempdir().unwrap();
        let sandbox = Arc::new(FakeSandbox::new());
        sandbox.push_ok(FakeSandbox::ok_report("3\n"));
        let sink = Arc::new(FakeSink::new());
        let svc = service(sandbox, sink.clone(), root.path());

        let (pool, runner) = pool(svc, 2, 8);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(runner.run(cancel.clone()));

        pool.submit(request()).unwrap();
        sink.wait_for_terminal(1).await;
        assert_eq!(sink.terminal_count(), 1);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn pool_never_exceeds_worker_ceiling() {
        let root = tempfile::tempdir().unwrap();
        let sandbox = Arc::new(FakeSandbox::with_hold(Duration::from_millis(50)));
        let sink = Arc::new(FakeSink::new());
        let svc = service(sandbox.clone(), sink.clone(), root.path());

        let (pool, runner) = pool(svc, 2, 16);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(runner.run(cancel.clone()));

        for _ in 0..6 {
            pool.submit(request()).unwrap();
        }
        sink.wait_for_terminal(6).await;

        assert!(
            sandbox.max_active() <= 2,
            "observed {} concurrent runs",
            sandbox.max_active()
        );

        cancel.cancel();
        handle.await.unwrap();
    }
}
