//! Verdict types and aggregation logic.

use serde::{Deserialize, Serialize};

/// Character budget for stored compile/runtime error text.
pub const ERROR_TEXT_LIMIT: usize = 5000;

/// Truncate diagnostic text to the persistence budget.
pub fn truncate_error(text: &str) -> String {
    text.chars().take(ERROR_TEXT_LIMIT).collect()
}

/// Classification of a test case or an entire submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    /// Output matched on every evaluated case
    Accepted,
    /// Output differs from expected after normalization
    WrongAnswer,
    /// Exceeded wall-time limit
    TimeLimitExceeded,
    /// Killed by the memory ceiling
    MemoryLimitExceeded,
    /// Non-zero exit or no output produced
    RuntimeError,
    /// Compile step exited non-zero
    CompileError,
    /// Infrastructure failure, not the submitter's fault
    SystemError,
    /// Reserved; exact comparison never produces it
    PresentationError,
    /// Output exceeded the byte cap
    OutputLimitExceeded,
}

impl Verdict {
    /// Short code for display and metrics.
    pub fn code(&self) -> &'static str {
        match self {
            Verdict::Accepted => "AC",
            Verdict::WrongAnswer => "WA",
            Verdict::TimeLimitExceeded => "TLE",
            Verdict::MemoryLimitExceeded => "MLE",
            Verdict::RuntimeError => "RE",
            Verdict::CompileError => "CE",
            Verdict::SystemError => "SE",
            Verdict::PresentationError => "PE",
            Verdict::OutputLimitExceeded => "OLE",
        }
    }

    pub fn is_failure(&self) -> bool {
        !matches!(self, Verdict::Accepted)
    }

    /// Whether the cause lies in the judging infrastructure rather than
    /// the submitted program.
    pub fn is_system(&self) -> bool {
        matches!(self, Verdict::SystemError)
    }

    /// Parse a short code back from its database string form.
    pub fn from_code(s: &str) -> Option<Self> {
        match s {
            "AC" => Some(Verdict::Accepted),
            "WA" => Some(Verdict::WrongAnswer),
            "TLE" => Some(Verdict::TimeLimitExceeded),
            "MLE" => Some(Verdict::MemoryLimitExceeded),
            "RE" => Some(Verdict::RuntimeError),
            "CE" => Some(Verdict::CompileError),
            "SE" => Some(Verdict::SystemError),
            "PE" => Some(Verdict::PresentationError),
            "OLE" => Some(Verdict::OutputLimitExceeded),
            _ => None,
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Outcome of a single evaluated test case. Write-once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCaseResult {
    /// 1-indexed evaluation position.
    pub case_number: i32,
    pub verdict: Verdict,
    /// Elapsed wall time in milliseconds. For TLE this is the configured
    /// limit, not the measured overshoot.
    pub time_ms: u64,
    /// Best-effort peak memory in KB (currently always 0, see DESIGN.md).
    pub memory_kb: u64,
    pub exit_code: Option<i32>,
    /// Truncated captured error text, when applicable.
    pub error_message: Option<String>,
}

impl TestCaseResult {
    pub fn accepted(case_number: i32, time_ms: u64) -> Self {
        Self {
            case_number,
            verdict: Verdict::Accepted,
            time_ms,
            memory_kb: 0,
            exit_code: Some(0),
            error_message: None,
        }
    }

    pub fn wrong_answer(case_number: i32, time_ms: u64) -> Self {
        Self {
            case_number,
            verdict: Verdict::WrongAnswer,
            time_ms,
            memory_kb: 0,
            exit_code: Some(0),
            error_message: None,
        }
    }

    pub fn time_limit_exceeded(case_number: i32, time_limit_ms: u64) -> Self {
        Self {
            case_number,
            verdict: Verdict::TimeLimitExceeded,
            time_ms: time_limit_ms,
            memory_kb: 0,
            exit_code: None,
            error_message: Some("Time limit exceeded".to_string()),
        }
    }

    pub fn memory_limit_exceeded(case_number: i32, time_ms: u64, memory_limit_kb: u64) -> Self {
        Self {
            case_number,
            verdict: Verdict::MemoryLimitExceeded,
            time_ms,
            memory_kb: memory_limit_kb,
            exit_code: None,
            error_message: Some("Memory limit exceeded".to_string()),
        }
    }

    pub fn runtime_error(case_number: i32, time_ms: u64, exit_code: Option<i32>, message: String) -> Self {
        Self {
            case_number,
            verdict: Verdict::RuntimeError,
            time_ms,
            memory_kb: 0,
            exit_code,
            error_message: Some(truncate_error(&message)),
        }
    }

    pub fn output_limit_exceeded(case_number: i32, time_ms: u64) -> Self {
        Self {
            case_number,
            verdict: Verdict::OutputLimitExceeded,
            time_ms,
            memory_kb: 0,
            exit_code: None,
            error_message: Some("Output limit exceeded".to_string()),
        }
    }

    pub fn system_error(case_number: i32, message: String) -> Self {
        Self {
            case_number,
            verdict: Verdict::SystemError,
            time_ms: 0,
            memory_kb: 0,
            exit_code: None,
            error_message: Some(truncate_error(&message)),
        }
    }
}

/// Aggregate of one judging run. Created once, handed to the state
/// machine exactly once at run completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub verdict: Verdict,
    /// Evaluated cases only; cases after the first failure never appear.
    pub testcase_results: Vec<TestCaseResult>,
    pub passed_count: i32,
    pub total_count: i32,
    /// Sum of elapsed time across evaluated cases (ms).
    pub time_used_ms: u64,
    /// Max memory across evaluated cases (KB).
    pub memory_used_kb: u64,
    /// 1-indexed number of the first failing case, if any.
    pub first_failure: Option<i32>,
    pub score: i32,
    pub compile_error: Option<String>,
    pub system_error: Option<String>,
}

impl SubmissionResult {
    /// Aggregate evaluated case results.
    ///
    /// `total_count` is the full test case count for the problem, which
    /// may exceed `results.len()` when the run stopped early.
    pub fn from_testcases(results: Vec<TestCaseResult>, total_count: i32, total_score: i32) -> Self {
        let passed_count = results
            .iter()
            .filter(|r| r.verdict == Verdict::Accepted)
            .count() as i32;

        let time_used_ms = results.iter().map(|r| r.time_ms).sum();
        let memory_used_kb = results.iter().map(|r| r.memory_kb).max().unwrap_or(0);

        let first_fail = results.iter().find(|r| r.verdict.is_failure());
        let first_failure = first_fail.map(|r| r.case_number);

        let verdict = match first_fail {
            Some(fail) => fail.verdict,
            None if passed_count == total_count && total_count > 0 => Verdict::Accepted,
            None => Verdict::SystemError,
        };

        let score = if total_count > 0 {
            // floor(passed / total * total_score); uniform weighting by
            // count, the per-case weight field is not consulted
            (passed_count as i64 * total_score as i64 / total_count as i64) as i32
        } else {
            0
        };

        let system_error = results
            .iter()
            .find(|r| r.verdict.is_system())
            .and_then(|r| r.error_message.clone());

        Self {
            verdict,
            testcase_results: results,
            passed_count,
            total_count,
            time_used_ms,
            memory_used_kb,
            first_failure,
            score,
            compile_error: None,
            system_error,
        }
    }

    /// Terminal result for a failed compile. No cases were evaluated.
    pub fn compile_error(message: &str, total_count: i32) -> Self {
        Self {
            verdict: Verdict::CompileError,
            testcase_results: Vec::new(),
            passed_count: 0,
            total_count,
            time_used_ms: 0,
            memory_used_kb: 0,
            first_failure: None,
            score: 0,
            compile_error: Some(truncate_error(message)),
            system_error: None,
        }
    }

    /// Terminal result for an infrastructure failure before any case ran.
    pub fn system_error(message: &str, total_count: i32) -> Self {
        Self {
            verdict: Verdict::SystemError,
            testcase_results: Vec::new(),
            passed_count: 0,
            total_count,
            time_used_ms: 0,
            memory_used_kb: 0,
            first_failure: None,
            score: 0,
            compile_error: None,
            system_error: Some(truncate_error(message)),
        }
    }

    /// Error text of the first failing case, for persistence.
    pub fn runtime_error_text(&self) -> Option<&str> {
        self.testcase_results
            .iter()
            .find(|r| r.verdict.is_failure())
            .and_then(|r| r.error_message.as_deref())
    }

    /// Fraction of cases passed, as a percentage.
    pub fn pass_rate(&self) -> f64 {
        if self.total_count > 0 {
            self.passed_count as f64 / self.total_count as f64 * 100.0
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_accepted_yields_full_score() {
        let results = vec![
            TestCaseResult::accepted(1, 12),
            TestCaseResult::accepted(2, 30),
            TestCaseResult::accepted(3, 8),
        ];
        let agg = SubmissionResult::from_testcases(results, 3, 100);
        assert_eq!(agg.verdict, Verdict::Accepted);
        assert_eq!(agg.score, 100);
        assert_eq!(agg.passed_count, 3);
        assert_eq!(agg.time_used_ms, 50);
        assert_eq!(agg.first_failure, None);
    }

    #[test]
    fn score_is_floored_by_passed_fraction() {
        let results = vec![
            TestCaseResult::accepted(1, 10),
            TestCaseResult::accepted(2, 10),
            TestCaseResult::wrong_answer(3, 10),
        ];
        // 2/3 of 100 floors to 66
        let agg = SubmissionResult::from_testcases(results, 3, 100);
        assert_eq!(agg.verdict, Verdict::WrongAnswer);
        assert_eq!(agg.score, 66);
        assert_eq!(agg.first_failure, Some(3));
    }

    #[test]
    fn early_stop_keeps_total_from_problem() {
        // run stopped at case 1 of 5
        let results = vec![TestCaseResult::wrong_answer(1, 5)];
        let agg = SubmissionResult::from_testcases(results, 5, 50);
        assert_eq!(agg.verdict, Verdict::WrongAnswer);
        assert_eq!(agg.score, 0);
        assert_eq!(agg.total_count, 5);
        assert_eq!(agg.testcase_results.len(), 1);
    }

    #[test]
    fn first_failure_classification_wins() {
        let results = vec![
            TestCaseResult::accepted(1, 10),
            TestCaseResult::time_limit_exceeded(2, 1000),
        ];
        let agg = SubmissionResult::from_testcases(results, 4, 100);
        assert_eq!(agg.verdict, Verdict::TimeLimitExceeded);
        assert_eq!(agg.first_failure, Some(2));
        // TLE case records the limit, and the sum includes it
        assert_eq!(agg.time_used_ms, 1010);
        assert_eq!(agg.score, 25);
    }

    #[test]
    fn compile_error_scores_zero_with_no_cases() {
        let agg = SubmissionResult::compile_error("error: syntax", 3);
        assert_eq!(agg.verdict, Verdict::CompileError);
        assert_eq!(agg.score, 0);
        assert!(agg.testcase_results.is_empty());
        assert!(agg.compile_error.as_deref().unwrap().contains("syntax"));
    }

    #[test]
    fn memory_peak_is_max_across_cases() {
        let results = vec![
            TestCaseResult::accepted(1, 10),
            TestCaseResult::memory_limit_exceeded(2, 20, 262144),
        ];
        let agg = SubmissionResult::from_testcases(results, 2, 100);
        assert_eq!(agg.memory_used_kb, 262144);
        assert_eq!(agg.verdict, Verdict::MemoryLimitExceeded);
    }

    #[test]
    fn error_text_is_truncated_to_budget() {
        let long = "x".repeat(ERROR_TEXT_LIMIT + 1000);
        let agg = SubmissionResult::compile_error(&long, 1);
        assert_eq!(agg.compile_error.unwrap().chars().count(), ERROR_TEXT_LIMIT);
    }

    #[test]
    fn verdict_codes_round_trip() {
        for v in [
            Verdict::Accepted,
            Verdict::WrongAnswer,
            Verdict::TimeLimitExceeded,
            Verdict::MemoryLimitExceeded,
            Verdict::RuntimeError,
            Verdict::CompileError,
            Verdict::SystemError,
            Verdict::PresentationError,
            Verdict::OutputLimitExceeded,
        ] {
            assert_eq!(Verdict::from_code(v.code()), Some(v));
        }
    }
}
