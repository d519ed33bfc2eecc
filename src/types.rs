//! Domain types consumed and produced by the judging core.
//!
//! A [`JudgeRequest`] is assembled by the surrounding system (submission
//! row, language profile, ordered test cases) and is read-only for the
//! duration of a run.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Values available to language command templates.
#[derive(Debug, Clone, Copy)]
pub struct TemplateVars<'a> {
    /// Path of the submitted source file inside the sandbox.
    pub source: &'a str,
    /// Path the compiled executable is written to / run from.
    pub executable: &'a str,
}

/// Compile/run command line with a fixed set of named placeholders.
///
/// Only `{source}` and `{executable}` are substituted; any other brace
/// sequence is passed through verbatim. Language profiles are
/// admin-editable, so templates never gain expansion points beyond these
/// two.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandTemplate(String);

impl CommandTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Render the template against the run's substitution points.
    pub fn render(&self, vars: &TemplateVars<'_>) -> String {
        self.0
            .replace("{source}", vars.source)
            .replace("{executable}", vars.executable)
    }
}

/// Immutable per-language judging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageProfile {
    /// Unique language name, e.g. `cpp`, `python`.
    pub name: String,
    /// Compile command; absent for interpreted languages, which run the
    /// raw source directly.
    pub compile_command: Option<CommandTemplate>,
    /// Compile budget in whole seconds.
    pub compile_timeout_secs: u64,
    /// Run command executed once per test case.
    pub run_command: CommandTemplate,
    /// Sandbox runtime image, e.g. `gcc:14`.
    pub image: String,
    /// Source file extension including the leading dot, e.g. `.cpp`.
    pub file_extension: String,
}

impl LanguageProfile {
    /// Name of the source file written into the workspace.
    pub fn source_file(&self) -> String {
        format!("main{}", self.file_extension)
    }

    pub fn is_interpreted(&self) -> bool {
        self.compile_command.is_none()
    }
}

/// One input/expected-output pair.
///
/// `order` defines both execution order and early-stop semantics: a case
/// with a lower order always runs before one with a higher order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub order: i32,
    pub input: String,
    pub expected_output: String,
    /// Per-case score weight. Carried for audit; overall scoring is
    /// uniform by count (see `SubmissionResult::from_testcases`).
    pub score: i32,
    /// Overrides the problem default when set (milliseconds).
    pub time_limit_ms: Option<u64>,
    /// Overrides the problem default when set (megabytes).
    pub memory_limit_mb: Option<u64>,
}

impl TestCase {
    pub fn effective_time_limit_ms(&self, default_ms: u64) -> u64 {
        self.time_limit_ms.unwrap_or(default_ms)
    }

    pub fn effective_memory_limit_mb(&self, default_mb: u64) -> u64 {
        self.memory_limit_mb.unwrap_or(default_mb)
    }
}

/// Everything one judging run consumes.
#[derive(Debug, Clone)]
pub struct JudgeRequest {
    pub submission_id: Uuid,
    pub user_id: Uuid,
    pub problem_id: Uuid,
    pub source_code: String,
    pub language: LanguageProfile,
    /// Sorted ascending by `order` before the run starts.
    pub test_cases: Vec<TestCase>,
    /// Problem-level default time limit (milliseconds).
    pub time_limit_ms: u64,
    /// Problem-level default memory limit (megabytes).
    pub memory_limit_mb: u64,
    /// Maximum attainable score for the problem.
    pub total_score: i32,
}

/// Submission lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    /// Waiting for a worker slot.
    Pending,
    /// A run owns the submission; persisted before any sandbox work.
    Judging,
    /// A verdict was reached (any classification, including CE).
    Finished,
    /// An unclassified failure terminated the run.
    Error,
}

impl SubmissionStatus {
    /// Database string form (matches the submissions status column).
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Judging => "judging",
            SubmissionStatus::Finished => "finished",
            SubmissionStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_substitutes_named_points() {
        let tpl = CommandTemplate::new("g++ -O2 -o {executable} {source}");
        let cmd = tpl.render(&TemplateVars {
            source: "main.cpp",
            executable: "main",
        });
        assert_eq!(cmd, "g++ -O2 -o main main.cpp");
    }

    #[test]
    fn template_ignores_unknown_placeholders() {
        let tpl = CommandTemplate::new("run {source} {extra} {}");
        let cmd = tpl.render(&TemplateVars {
            source: "main.py",
            executable: "main",
        });
        assert_eq!(cmd, "run main.py {extra} {}");
    }

    #[test]
    fn testcase_limits_fall_back_to_problem_defaults() {
        let case = TestCase {
            order: 1,
            input: String::new(),
            expected_output: String::new(),
            score: 10,
            time_limit_ms: Some(500),
            memory_limit_mb: None,
        };
        assert_eq!(case.effective_time_limit_ms(1000), 500);
        assert_eq!(case.effective_memory_limit_mb(256), 256);
    }

    #[test]
    fn interpreted_language_has_no_compile_step() {
        let lang = LanguageProfile {
            name: "python".into(),
            compile_command: None,
            compile_timeout_secs: 30,
            run_command: CommandTemplate::new("python3 {source}"),
            image: "python:3.12-bookworm".into(),
            file_extension: ".py".into(),
        };
        assert!(lang.is_interpreted());
        assert_eq!(lang.source_file(), "main.py");
    }
}
