//! PostgreSQL persistence for the judge worker.
//!
//! Owns the submission rows during judging and the aggregate counters
//! updated at run completion. Counter updates are single atomic UPDATE
//! expressions; nothing here does read-modify-write on a stale snapshot.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::service::SubmissionSink;
use crate::types::{CommandTemplate, JudgeRequest, LanguageProfile, SubmissionStatus, TestCase};
use crate::verdict::SubmissionResult;

/// Store backed by the shared PostgreSQL pool.
pub struct SubmissionStore {
    pool: PgPool,
}

#[derive(Debug, sqlx::FromRow)]
struct SubmissionRow {
    user_id: Uuid,
    problem_id: Uuid,
    language: String,
    source_code: String,
    total_score: i32,
}

#[derive(Debug, sqlx::FromRow)]
struct ProblemRow {
    time_limit_ms: i32,
    memory_limit_mb: i32,
}

#[derive(Debug, sqlx::FromRow)]
struct LanguageRow {
    name: String,
    compile_command: Option<String>,
    compile_timeout_secs: i32,
    run_command: String,
    image: String,
    file_extension: String,
}

#[derive(Debug, sqlx::FromRow)]
struct TestCaseRow {
    case_order: i32,
    input: String,
    expected_output: String,
    score: i32,
    time_limit_ms: Option<i32>,
    memory_limit_mb: Option<i32>,
}

impl SubmissionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Oldest pending submissions, for the intake loop.
    pub async fn fetch_pending(&self, limit: i64) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id FROM submissions
            WHERE status = $1
            ORDER BY created_at
            LIMIT $2
            "#,
        )
        .bind(SubmissionStatus::Pending.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    /// Assemble everything one judging run consumes: submission row,
    /// language profile, problem limits and the ordered test cases.
    pub async fn load_request(&self, submission_id: Uuid) -> Result<JudgeRequest> {
        let submission = sqlx::query_as::<_, SubmissionRow>(
            r#"
            SELECT user_id, problem_id, language, source_code, total_score
            FROM submissions
            WHERE id = $1
            "#,
        )
        .bind(submission_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| anyhow!("submission {submission_id} not found"))?;

        let problem = sqlx::query_as::<_, ProblemRow>(
            r#"SELECT time_limit_ms, memory_limit_mb FROM problems WHERE id = $1"#,
        )
        .bind(submission.problem_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| anyhow!("problem {} not found", submission.problem_id))?;

        let language = sqlx::query_as::<_, LanguageRow>(
            r#"
            SELECT name, compile_command, compile_timeout_secs,
                   run_command, image, file_extension
            FROM languages
            WHERE name = $1 AND is_active
            "#,
        )
        .bind(&submission.language)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| anyhow!("unknown or disabled language '{}'", submission.language))?;

        let cases = sqlx::query_as::<_, TestCaseRow>(
            r#"
            SELECT "order" AS case_order, input, expected_output, score,
                   time_limit_ms, memory_limit_mb
            FROM test_cases
            WHERE problem_id = $1
            ORDER BY "order", id
            "#,
        )
        .bind(submission.problem_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(JudgeRequest {
            submission_id,
            user_id: submission.user_id,
            problem_id: submission.problem_id,
            source_code: submission.source_code,
            language: LanguageProfile {
                name: language.name,
                compile_command: compile_template(language.compile_command),
                compile_timeout_secs: language.compile_timeout_secs.max(0) as u64,
                run_command: CommandTemplate::new(language.run_command),
                image: language.image,
                file_extension: language.file_extension,
            },
            test_cases: cases
                .into_iter()
                .map(|row| TestCase {
                    order: row.case_order,
                    input: row.input,
                    expected_output: row.expected_output,
                    score: row.score,
                    time_limit_ms: row.time_limit_ms.map(|v| v.max(0) as u64),
                    memory_limit_mb: row.memory_limit_mb.map(|v| v.max(0) as u64),
                })
                .collect(),
            time_limit_ms: problem.time_limit_ms.max(0) as u64,
            memory_limit_mb: problem.memory_limit_mb.max(0) as u64,
            total_score: submission.total_score,
        })
    }
}

/// A blank compile command means the language is interpreted.
fn compile_template(raw: Option<String>) -> Option<CommandTemplate> {
    raw.filter(|cmd| !cmd.trim().is_empty())
        .map(CommandTemplate::new)
}

#[async_trait]
impl SubmissionSink for SubmissionStore {
    async fn claim_judging(&self, submission_id: Uuid) -> Result<bool> {
        let updated = sqlx::query(
            r#"UPDATE submissions SET status = $1 WHERE id = $2 AND status = $3"#,
        )
        .bind(SubmissionStatus::Judging.as_str())
        .bind(submission_id)
        .bind(SubmissionStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;

        Ok(updated.rows_affected() == 1)
    }

    async fn record_finished(
        &self,
        submission_id: Uuid,
        result: &SubmissionResult,
    ) -> Result<()> {
        let detail = serde_json::json!({
            "test_cases": result.testcase_results,
            "judged_at": chrono::Utc::now(),
        });

        sqlx::query(
            r#"
            UPDATE submissions
            SET status = $1,
                result = $2,
                score = $3,
                pass_rate = $4,
                time_used_ms = $5,
                memory_used_kb = $6,
                passed_cases = $7,
                total_cases = $8,
                error_testcase = $9,
                compile_error = $10,
                runtime_error = $11,
                judge_detail = $12,
                judged_at = NOW()
            WHERE id = $13
            "#,
        )
        .bind(SubmissionStatus::Finished.as_str())
        .bind(result.verdict.code())
        .bind(result.score)
        .bind(result.pass_rate())
        .bind(result.time_used_ms as i64)
        .bind(result.memory_used_kb as i64)
        .bind(result.passed_count)
        .bind(result.total_count)
        .bind(result.first_failure)
        .bind(result.compile_error.as_deref())
        .bind(
            result
                .system_error
                .as_deref()
                .or_else(|| result.runtime_error_text()),
        )
        .bind(detail)
        .bind(submission_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_error(&self, submission_id: Uuid, diagnostic: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE submissions
            SET status = $1, runtime_error = $2, judged_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(SubmissionStatus::Error.as_str())
        .bind(diagnostic)
        .bind(submission_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn bump_problem_stats(&self, problem_id: Uuid, accepted: bool) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE problems
            SET total_submitted = total_submitted + 1,
                total_accepted = total_accepted + CASE WHEN $2 THEN 1 ELSE 0 END
            WHERE id = $1
            "#,
        )
        .bind(problem_id)
        .bind(accepted)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn refresh_user_stats(&self, user_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE user_profiles
            SET total_submitted = (
                    SELECT COUNT(*) FROM submissions
                    WHERE user_id = $1 AND status = 'finished'
                ),
                total_accepted = (
                    SELECT COUNT(DISTINCT problem_id) FROM submissions
                    WHERE user_id = $1 AND result = 'AC'
                )
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_compile_command_means_interpreted() {
        assert!(compile_template(None).is_none());
        assert!(compile_template(Some(String::new())).is_none());
        assert!(compile_template(Some("   ".into())).is_none());

        let tpl = compile_template(Some("g++ -o {executable} {source}".into())).unwrap();
        assert_eq!(tpl.as_str(), "g++ -o {executable} {source}");
    }
}
