//! Verdict engine: drives compile, per-case execution and classification.
//!
//! A run is strictly sequential: one compile step (when the language
//! needs one), then test cases in order, stopping at the first case that
//! is not accepted. Per-command budgets are independent; a slow compile
//! never eats into a test case's time.

use tokio_util::sync::CancellationToken;

use crate::config::ExecutionConfig;
use crate::error::{JudgeError, SandboxError};
use crate::output::{normalize, outputs_match};
use crate::sandbox::{ExecLimits, ExecReport, ExecSpec, Sandbox};
use crate::types::{JudgeRequest, TemplateVars, TestCase};
use crate::verdict::{SubmissionResult, TestCaseResult};
use crate::workspace::Workspace;

/// Name the compiled executable is written to inside the workspace.
const EXECUTABLE_NAME: &str = "main";

/// Drives one judging run against an injected sandbox.
pub struct JudgeEngine<'a> {
    sandbox: &'a dyn Sandbox,
    settings: &'a ExecutionConfig,
}

impl<'a> JudgeEngine<'a> {
    pub fn new(sandbox: &'a dyn Sandbox, settings: &'a ExecutionConfig) -> Self {
        Self { sandbox, settings }
    }

    /// Judge a request inside its workspace and return the aggregate.
    ///
    /// Classified outcomes (including compile errors and sandbox
    /// infrastructure failures) come back as `Ok`; `Err` means the run
    /// did not reach a verdict and the caller owns the downgrade.
    pub async fn judge(
        &self,
        request: &JudgeRequest,
        workspace: &Workspace,
        cancel: &CancellationToken,
    ) -> Result<SubmissionResult, JudgeError> {
        let total_count = request.test_cases.len() as i32;
        if total_count == 0 {
            return Ok(SubmissionResult::system_error(
                "problem has no test cases",
                0,
            ));
        }

        let source = workspace.source_file().to_string();
        let vars = TemplateVars {
            source: &source,
            executable: EXECUTABLE_NAME,
        };

        if let Some(compile_command) = &request.language.compile_command {
            let spec = ExecSpec {
                image: request.language.image.clone(),
                command: compile_command.render(&vars),
                workdir: workspace.path().to_path_buf(),
                limits: ExecLimits {
                    wall_time_ms: request.language.compile_timeout_secs * 1000,
                    memory_mb: self.settings.compile_memory_limit_mb,
                    max_pids: self.settings.max_pids,
                },
            };

            tracing::debug!(submission_id = %request.submission_id, "Compiling submission");

            match self.sandbox.run(&spec, cancel).await {
                Err(SandboxError::Cancelled) => return Err(JudgeError::Cancelled),
                Err(e) => {
                    tracing::error!(
                        submission_id = %request.submission_id,
                        error = %e,
                        "Sandbox failure during compilation"
                    );
                    return Ok(SubmissionResult::system_error(&e.to_string(), total_count));
                }
                Ok(report) if report.timed_out => {
                    let message = format!(
                        "compilation timed out after {}s",
                        request.language.compile_timeout_secs
                    );
                    return Ok(SubmissionResult::compile_error(&message, total_count));
                }
                Ok(report) if report.exit_code != Some(0) => {
                    let log = if report.stderr.is_empty() {
                        &report.stdout
                    } else {
                        &report.stderr
                    };
                    return Ok(SubmissionResult::compile_error(log, total_count));
                }
                Ok(_) => {}
            }
        }

        let run_command = request.language.run_command.render(&vars);
        let mut results = Vec::with_capacity(request.test_cases.len());

        for (idx, case) in request.test_cases.iter().enumerate() {
            let case_number = idx as i32 + 1;
            if cancel.is_cancelled() {
                return Err(JudgeError::Cancelled);
            }

            workspace.write_input(&case.input).await?;

            let result = match self.run_case(request, case, &run_command, workspace, cancel).await {
                Err(SandboxError::Cancelled) => return Err(JudgeError::Cancelled),
                Err(e) => {
                    tracing::error!(
                        submission_id = %request.submission_id,
                        case = case_number,
                        error = %e,
                        "Sandbox failure during test case"
                    );
                    TestCaseResult::system_error(case_number, e.to_string())
                }
                Ok(report) => classify_case(case_number, case, request, &report),
            };

            let failed = result.verdict.is_failure();
            results.push(result);
            if failed {
                break;
            }
        }

        Ok(SubmissionResult::from_testcases(
            results,
            total_count,
            request.total_score,
        ))
    }

    async fn run_case(
        &self,
        request: &JudgeRequest,
        case: &TestCase,
        run_command: &str,
        workspace: &Workspace,
        cancel: &CancellationToken,
    ) -> Result<ExecReport, SandboxError> {
        let spec = ExecSpec {
            image: request.language.image.clone(),
            command: format!("{run_command} < input.txt"),
            workdir: workspace.path().to_path_buf(),
            limits: ExecLimits {
                wall_time_ms: case.effective_time_limit_ms(request.time_limit_ms),
                memory_mb: case.effective_memory_limit_mb(request.memory_limit_mb),
                max_pids: self.settings.max_pids,
            },
        };

        self.sandbox.run(&spec, cancel).await
    }
}

/// 128 + SIGKILL, produced when the memory ceiling kills the command.
const OOM_EXIT_CODE: i32 = 137;

fn classify_case(
    case_number: i32,
    case: &TestCase,
    request: &JudgeRequest,
    report: &ExecReport,
) -> TestCaseResult {
    let time_limit_ms = case.effective_time_limit_ms(request.time_limit_ms);
    let memory_limit_mb = case.effective_memory_limit_mb(request.memory_limit_mb);

    if report.timed_out {
        // recorded time is the limit, not the measured overshoot
        return TestCaseResult::time_limit_exceeded(case_number, time_limit_ms);
    }

    if report.exit_code == Some(OOM_EXIT_CODE) {
        return TestCaseResult::memory_limit_exceeded(
            case_number,
            report.wall_time_ms,
            memory_limit_mb * 1024,
        );
    }

    if report.exit_code != Some(0) {
        let message = if report.stderr.is_empty() {
            match report.exit_code {
                Some(code) => format!("process exited with code {code}"),
                None => "process killed".to_string(),
            }
        } else {
            report.stderr.clone()
        };
        return TestCaseResult::runtime_error(case_number, report.wall_time_ms, report.exit_code, message);
    }

    if report.stdout_truncated {
        return TestCaseResult::output_limit_exceeded(case_number, report.wall_time_ms);
    }

    if report.stdout.is_empty() && !normalize(&case.expected_output).is_empty() {
        return TestCaseResult::runtime_error(
            case_number,
            report.wall_time_ms,
            report.exit_code,
            "no output produced".to_string(),
        );
    }

    if outputs_match(&report.stdout, &case.expected_output) {
        TestCaseResult::accepted(case_number, report.wall_time_ms)
    } else {
        TestCaseResult::wrong_answer(case_number, report.wall_time_ms)
    }
}
