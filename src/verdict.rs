use std::fmt;

use crate::compare::Snapshot;

pub const GRANTED: &str = "ALL TESTS PASSED! ACCESS GRANTED.";
pub const DENIED: &str = "TESTS FAILED. ACCESS DENIED.";

/// What a test invocation produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Actual {
    Value(Snapshot),
    /// Thrown, rejected, over budget or never settled.
    Error(String),
}

impl fmt::Display for Actual {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actual::Value(snapshot) => write!(f, "{}", snapshot),
            Actual::Error(message) => write!(f, "ERROR: {}", message),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TestResult {
    /// 1-based.
    pub number: usize,
    pub passed: bool,
    pub input: String,
    pub expected: serde_json::Value,
    pub actual: Actual,
    /// Console lines written by the candidate during this test.
    pub console: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub results: Vec<TestResult>,
    /// Set when the source never produced a callable; no tests ran.
    pub compile_error: Option<String>,
    pub all_passed: bool,
}

impl Verdict {
    pub fn from_results(results: Vec<TestResult>) -> Self {
        let all_passed = !results.is_empty() && results.iter().all(|r| r.passed);
        Self {
            results,
            compile_error: None,
            all_passed,
        }
    }

    pub fn compile_failure(message: impl Into<String>) -> Self {
        Self {
            results: Vec::new(),
            compile_error: Some(message.into()),
            all_passed: false,
        }
    }

    pub fn passed_count(&self) -> usize {
        self.results.iter().filter(|r| r.passed).count()
    }
}

/// Renders the user-facing transcript. Actual values and console output are
/// only shown for failing tests.
pub fn format(verdict: &Verdict) -> String {
    if let Some(error) = &verdict.compile_error {
        return format!("SYNTAX ERROR: {}\n\nACCESS DENIED.", error);
    }

    let mut out = format!("RUNNING {} TESTS...\n\n", verdict.results.len());
    for result in &verdict.results {
        out.push_str(&format!(
            "TEST {}: {}\n",
            result.number,
            if result.passed { "PASS" } else { "FAIL" }
        ));
        out.push_str(&format!("  Input: {}\n", result.input));
        out.push_str(&format!("  Expected: {}\n", result.expected));
        if !result.passed {
            out.push_str(&format!("  Actual: {}\n", result.actual));
            for line in &result.console {
                out.push_str(&format!("  Log: {}\n", line));
            }
        }
        out.push('\n');
    }
    out.push('\n');
    out.push_str(if verdict.all_passed { GRANTED } else { DENIED });
    out
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(number: usize, passed: bool, actual: Actual) -> TestResult {
        TestResult {
            number,
            passed,
            input: "[[1,2],2]".into(),
            expected: json!(1),
            actual,
            console: vec!["checking".into()],
        }
    }

    #[test]
    fn test_all_passed_requires_every_result() {
        let pass = result(1, true, Actual::Value(Snapshot::Number(1.0)));
        let fail = result(2, false, Actual::Value(Snapshot::Undefined));
        assert!(Verdict::from_results(vec![pass.clone()]).all_passed);
        assert!(!Verdict::from_results(vec![pass, fail]).all_passed);
        assert!(!Verdict::from_results(Vec::new()).all_passed);
    }

    #[test]
    fn test_transcript_shows_actual_only_on_failure() {
        let verdict = Verdict::from_results(vec![
            result(1, true, Actual::Value(Snapshot::Number(1.0))),
            result(2, false, Actual::Error("TypeError: x is not a function (3:12)".into())),
        ]);
        let text = format(&verdict);
        let expected = "RUNNING 2 TESTS...\n\n\
            TEST 1: PASS\n  Input: [[1,2],2]\n  Expected: 1\n\n\
            TEST 2: FAIL\n  Input: [[1,2],2]\n  Expected: 1\n  Actual: ERROR: TypeError: x is not a function (3:12)\n  Log: checking\n\n\
            \nTESTS FAILED. ACCESS DENIED.";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_compile_failure_has_no_results() {
        let verdict = Verdict::compile_failure("Unexpected token '}' (2:1)");
        assert!(verdict.results.is_empty());
        assert!(!verdict.all_passed);
        assert_eq!(verdict.to_string(), "SYNTAX ERROR: Unexpected token '}' (2:1)\n\nACCESS DENIED.");
    }

    #[test]
    fn test_granted_footer() {
        let verdict = Verdict::from_results(vec![result(1, true, Actual::Value(Snapshot::Number(1.0)))]);
        assert!(format(&verdict).ends_with("\n\nALL TESTS PASSED! ACCESS GRANTED."));
        assert_eq!(verdict.passed_count(), 1);
    }
}
