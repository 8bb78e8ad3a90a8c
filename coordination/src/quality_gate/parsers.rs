//! Lint and test output parsers. Mirrors `verifier::pipeline`'s gate-output
//! handling but speaks ESLint/vitest-style text instead of `cargo`'s, since
//! the Quality Gate runs whatever lint/test command a project configures.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static LINT_PROBLEMS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)✖\s*(\d+)\s*problems?\s*\((\d+)\s*errors?,\s*(\d+)\s*warnings?\)").unwrap()
});

static TEST_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Tests\s+(\d+)\s+passed(?:\s*\|\s*(\d+)\s+failed)?(?:\s*\|\s*(\d+)\s+skipped)?\s*\((\d+)\)").unwrap()
});

static TEST_FILES_FALLBACK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Test Files\s+(\d+)\s+passed(?:\s*\|\s*(\d+)\s+failed)?\s*\((\d+)\)").unwrap()
});

static COVERAGE_ALL_FILES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)All files\s*\|\s*([\d.]+)").unwrap()
});

static COVERAGE_STATEMENTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Statements:\s*([\d.]+)%").unwrap()
});

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LintParse {
    pub error_count: u32,
    pub warning_count: u32,
    pub passed: bool,
    pub parsed: bool,
}

/// Empty output means passed. Unparseable non-empty output conservatively
/// passes with `parsed=false` rather than blocking on a format we don't
/// recognize.
pub fn parse_lint_output(output: &str) -> LintParse {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return LintParse { error_count: 0, warning_count: 0, passed: true, parsed: true };
    }

    if let Some(caps) = LINT_PROBLEMS.captures(trimmed) {
        let error_count: u32 = caps[2].parse().unwrap_or(0);
        let warning_count: u32 = caps[3].parse().unwrap_or(0);
        return LintParse { error_count, warning_count, passed: error_count == 0, parsed: true };
    }

    LintParse { error_count: 0, warning_count: 0, passed: true, parsed: false }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestParse {
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    /// -1 when no coverage summary was found.
    pub coverage: i64,
    pub parsed: bool,
}

impl TestParse {
    pub fn all_passed(&self) -> bool {
        self.parsed && self.failed == 0
    }
}

pub fn parse_test_output(output: &str) -> TestParse {
    let coverage = COVERAGE_ALL_FILES
        .captures(output)
        .or_else(|| COVERAGE_STATEMENTS.captures(output))
        .and_then(|c| c[1].parse::<f64>().ok())
        .map(|v| v as i64)
        .unwrap_or(-1);

    if let Some(caps) = TEST_SUMMARY.captures(output) {
        let passed: u32 = caps[1].parse().unwrap_or(0);
        let failed: u32 = caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        let skipped: u32 = caps.get(3).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        let total: u32 = caps[4].parse().unwrap_or(passed + failed + skipped);
        return TestParse { total, passed, failed, skipped, coverage, parsed: true };
    }

    if let Some(caps) = TEST_FILES_FALLBACK.captures(output) {
        let passed: u32 = caps[1].parse().unwrap_or(0);
        let failed: u32 = caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        let total: u32 = caps[3].parse().unwrap_or(passed + failed);
        return TestParse { total, passed, failed, skipped: 0, coverage, parsed: true };
    }

    TestParse { total: 0, passed: 0, failed: 0, skipped: 0, coverage, parsed: false }
}

/// Whether `dir` looks like it has recognizable test files, used to decide
/// whether to skip the test stage entirely rather than run a command with
/// nothing to execute.
pub fn has_recognized_tests(dir: &std::path::Path) -> bool {
    for name in ["tests", "test", "__tests__"] {
        if dir.join(name).is_dir() {
            return true;
        }
    }
    glob_has_test_file(dir)
}

fn glob_has_test_file(dir: &std::path::Path) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else { return false };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if glob_has_test_file(&path) {
                return true;
            }
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
        if name.ends_with(".test.ts")
            || name.ends_with(".test.js")
            || name.ends_with(".spec.ts")
            || name.ends_with(".spec.js")
        {
            return true;
        }
    }
    false
}
