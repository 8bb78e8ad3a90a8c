//! Quality Gate: runs lint then test inside a worker's workspace via the
//! Process Supervisor, parses their output, and recommends a next action
//! based on a ticket's consecutive-failure streak. Adapts
//! `verifier::pipeline`'s sequential skip-on-fail gate shape from
//! `cargo`-specific commands to project-configurable lint/test commands.

mod parsers;

pub use parsers::{has_recognized_tests, parse_lint_output, parse_test_output, LintParse, TestParse};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::supervisor::{ExecOptions, ProcessSupervisor, SupervisorError};

const LINT_FAIL_SKIP_REASON: &str = "Lintが失敗したためスキップ";
const FIX_LINT_ERRORS_INSTRUCTION: &str = "Lintエラーを修正してください";

#[derive(Debug, Error)]
pub enum QualityGateError {
    #[error("process supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),
}

pub type QualityGateResult<T> = Result<T, QualityGateError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LintOutcome {
    pub executed: bool,
    pub passed: bool,
    pub output: String,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    pub error_count: u32,
    pub warning_count: u32,
    pub parsed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestOutcome {
    pub executed: bool,
    pub passed: bool,
    pub output: String,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    pub total: u32,
    pub passed_count: u32,
    pub failed: u32,
    pub skipped: u32,
    pub coverage: i64,
    pub parsed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityGateOutcome {
    pub success: bool,
    pub lint: LintOutcome,
    pub test: TestOutcome,
    pub duration_ms: u64,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct QualityGateConfig {
    pub lint_command: Vec<String>,
    pub test_command: Vec<String>,
    pub timeout_seconds: u64,
}

impl Default for QualityGateConfig {
    fn default() -> Self {
        Self {
            lint_command: vec!["npm".into(), "run".into(), "lint".into()],
            test_command: vec!["npm".into(), "test".into()],
            timeout_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum GateDecision {
    Retry { instructions: String },
    Reassign,
    Escalate { role: String },
}

pub struct QualityGate {
    supervisor: Arc<ProcessSupervisor>,
    run_dir: Option<PathBuf>,
}

impl QualityGate {
    pub fn new(supervisor: Arc<ProcessSupervisor>) -> Self {
        Self { supervisor, run_dir: None }
    }

    pub fn with_run_dir(mut self, run_dir: impl Into<PathBuf>) -> Self {
        self.run_dir = Some(run_dir.into());
        self
    }

    pub async fn run(&self, workspace: &Path, config: &QualityGateConfig) -> QualityGateResult<QualityGateOutcome> {
        let start = Instant::now();
        self.log("start").await;

        let lint = self.run_lint(workspace, config).await?;

        let test = if !lint.passed {
            TestOutcome {
                executed: false,
                passed: false,
                output: String::new(),
                duration_ms: 0,
                skip_reason: Some(LINT_FAIL_SKIP_REASON.to_string()),
                total: 0,
                passed_count: 0,
                failed: 0,
                skipped: 0,
                coverage: -1,
                parsed: false,
            }
        } else if !has_recognized_tests(workspace) {
            TestOutcome {
                executed: false,
                passed: true,
                output: String::new(),
                duration_ms: 0,
                skip_reason: Some("no recognized test files".to_string()),
                total: 0,
                passed_count: 0,
                failed: 0,
                skipped: 0,
                coverage: -1,
                parsed: false,
            }
        } else {
            self.run_test(workspace, config).await?
        };

        let mut errors = Vec::new();
        if !lint.passed {
            errors.extend(extract_lint_error_lines(&lint.output));
        }
        if test.executed && !test.passed {
            errors.push(format!("{} test(s) failed", test.failed));
        }

        let outcome = QualityGateOutcome {
            success: lint.passed && test.passed,
            lint,
            test,
            duration_ms: start.elapsed().as_millis() as u64,
            errors,
        };

        self.log(if outcome.success { "complete" } else { "error" }).await;
        Ok(outcome)
    }

    async fn run_lint(&self, workspace: &Path, config: &QualityGateConfig) -> QualityGateResult<LintOutcome> {
        let start = Instant::now();
        let result = self.exec(workspace, &config.lint_command, config.timeout_seconds).await?;
        let combined = format!("{}{}", result.stdout, result.stderr);
        let parsed = parse_lint_output(&combined);

        Ok(LintOutcome {
            executed: true,
            passed: !result.timed_out && !result.rejected.unwrap_or(false) && parsed.passed,
            output: combined,
            duration_ms: start.elapsed().as_millis() as u64,
            skip_reason: result.rejection_reason.clone(),
            error_count: parsed.error_count,
            warning_count: parsed.warning_count,
            parsed: parsed.parsed,
        })
    }

    async fn run_test(&self, workspace: &Path, config: &QualityGateConfig) -> QualityGateResult<TestOutcome> {
        let start = Instant::now();
        let result = self.exec(workspace, &config.test_command, config.timeout_seconds).await?;
        let combined = format!("{}{}", result.stdout, result.stderr);
        let parsed = parse_test_output(&combined);

        Ok(TestOutcome {
            executed: true,
            passed: !result.timed_out && !result.rejected.unwrap_or(false) && parsed.all_passed(),
            output: combined,
            duration_ms: start.elapsed().as_millis() as u64,
            skip_reason: result.rejection_reason.clone(),
            total: parsed.total,
            passed_count: parsed.passed,
            failed: parsed.failed,
            skipped: parsed.skipped,
            coverage: parsed.coverage,
            parsed: parsed.parsed,
        })
    }

    async fn exec(
        &self,
        workspace: &Path,
        command: &[String],
        timeout_seconds: u64,
    ) -> QualityGateResult<crate::supervisor::CommandResult> {
        let opts = ExecOptions {
            cwd: Some(workspace.to_path_buf()),
            timeout_seconds: Some(timeout_seconds),
            run_dir: self.run_dir.clone(),
            ..Default::default()
        };
        Ok(self.supervisor.execute(command, opts).await?)
    }

    async fn log(&self, event: &str) {
        let Some(run_dir) = &self.run_dir else { return };
        let line = format!("{} [{event}]\n", Utc::now().to_rfc3339());
        if let Err(e) = tokio::fs::create_dir_all(run_dir).await {
            warn!(error = %e, "failed to create run dir for quality_gates.log");
            return;
        }
        use tokio::io::AsyncWriteExt;
        match tokio::fs::OpenOptions::new().create(true).append(true).open(run_dir.join("quality_gates.log")).await {
            Ok(mut file) => {
                if let Err(e) = file.write_all(line.as_bytes()).await {
                    warn!(error = %e, "failed to append to quality_gates.log");
                }
            }
            Err(e) => warn!(error = %e, "failed to open quality_gates.log"),
        }
    }
}

fn extract_lint_error_lines(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('✖'))
        .map(str::to_string)
        .collect()
}

/// 1st fail -> retry with itemized instructions; 2nd -> reassign; 3rd+ ->
/// escalate to `quality_authority`. The engine may override this.
pub fn recommend_decision(outcome: &QualityGateOutcome, failure_streak: u32) -> GateDecision {
    match failure_streak {
        0 | 1 => GateDecision::Retry { instructions: build_retry_instructions(outcome) },
        2 => GateDecision::Reassign,
        _ => GateDecision::Escalate { role: "quality_authority".to_string() },
    }
}

fn build_retry_instructions(outcome: &QualityGateOutcome) -> String {
    if !outcome.lint.passed {
        let mut instructions = vec![FIX_LINT_ERRORS_INSTRUCTION.to_string()];
        instructions.extend(extract_lint_error_lines(&outcome.lint.output));
        instructions.join("\n")
    } else {
        let mut instructions = vec!["Fix the following quality gate failures:".to_string()];
        instructions.extend(outcome.errors.iter().cloned());
        instructions.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_outcome(lint_passed: bool, lint_output: &str) -> QualityGateOutcome {
        QualityGateOutcome {
            success: lint_passed,
            lint: LintOutcome {
                executed: true,
                passed: lint_passed,
                output: lint_output.to_string(),
                duration_ms: 0,
                skip_reason: None,
                error_count: if lint_passed { 0 } else { 3 },
                warning_count: if lint_passed { 0 } else { 2 },
                parsed: true,
            },
            test: TestOutcome {
                executed: false,
                passed: !lint_passed,
                output: String::new(),
                duration_ms: 0,
                skip_reason: if lint_passed { None } else { Some(LINT_FAIL_SKIP_REASON.to_string()) },
                total: 0,
                passed_count: 0,
                failed: 0,
                skipped: 0,
                coverage: -1,
                parsed: false,
            },
            duration_ms: 0,
            errors: Vec::new(),
        }
    }

    #[test]
    fn first_failure_recommends_retry_with_lint_instructions() {
        let outcome = sample_outcome(false, "file.ts:1 error\nfile.ts:2 error\nfile.ts:3 error\n✖ 5 problems (3 errors, 2 warnings)");
        let decision = recommend_decision(&outcome, 1);
        match decision {
            GateDecision::Retry { instructions } => {
                assert!(instructions.contains(FIX_LINT_ERRORS_INSTRUCTION));
                assert!(instructions.contains("file.ts:1 error"));
            }
            other => panic!("expected retry, got {other:?}"),
        }
    }

    #[test]
    fn second_failure_recommends_reassign() {
        let outcome = sample_outcome(false, "✖ 1 problems (1 errors, 0 warnings)");
        assert_eq!(recommend_decision(&outcome, 2), GateDecision::Reassign);
    }

    #[test]
    fn third_failure_recommends_escalate_to_quality_authority() {
        let outcome = sample_outcome(false, "✖ 1 problems (1 errors, 0 warnings)");
        let decision = recommend_decision(&outcome, 3);
        assert_eq!(decision, GateDecision::Escalate { role: "quality_authority".to_string() });
    }

    #[test]
    fn lint_failure_produces_skip_reason_for_test_stage() {
        let outcome = sample_outcome(false, "✖ 5 problems (3 errors, 2 warnings)");
        assert_eq!(outcome.test.skip_reason.as_deref(), Some(LINT_FAIL_SKIP_REASON));
        assert!(!outcome.test.executed);
    }
}
