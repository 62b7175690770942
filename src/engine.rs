//! Compiles candidate source and runs it against a challenge's tests.
//!
//! All script work happens on a dedicated worker thread with a large stack;
//! the interpreter is single-threaded and never leaves that thread.

use std::io;
use std::rc::Rc;
use std::thread::{self, JoinHandle};

use chrono::Utc;
use log::{debug, warn};

use crate::compare::{json_equal, Snapshot};
use crate::models::{TestCase, TestInput};
use crate::script::lexer::Span;
use crate::script::parser::{parse_candidate, parse_expression_source};
use crate::script::{is_promise, promise_outcome, Abrupt, Interp, Limits, LoopError, Value};
use crate::verdict::{Actual, TestResult, Verdict};

const WORKER_STACK_BYTES: usize = 256 * 1024 * 1024;

pub const NOT_A_FUNCTION: &str = "candidate source did not evaluate to a function";

/// A run executing on the engine thread.
pub struct PendingRun {
    handle: JoinHandle<Verdict>,
}

impl PendingRun {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Blocks until the verdict is ready.
    pub fn wait(self) -> Verdict {
        match self.handle.join() {
            Ok(verdict) => verdict,
            Err(_) => {
                warn!("engine thread panicked");
                Verdict::compile_failure("internal error: the engine stopped unexpectedly")
            }
        }
    }
}

/// Starts `source` against `tests` on a fresh engine thread.
pub fn spawn_run(source: String, tests: Vec<TestCase>, limits: Limits) -> io::Result<PendingRun> {
    let handle = thread::Builder::new()
        .name("codegate-engine".into())
        .stack_size(WORKER_STACK_BYTES)
        .spawn(move || run_in_place(&source, &tests, limits))?;
    Ok(PendingRun { handle })
}

/// Runs on an engine thread and waits for the verdict.
pub fn run(source: &str, tests: &[TestCase], limits: Limits) -> io::Result<Verdict> {
    Ok(spawn_run(source.to_string(), tests.to_vec(), limits)?.wait())
}

/// Runs on the calling thread, which needs a large stack.
pub fn run_in_place(source: &str, tests: &[TestCase], limits: Limits) -> Verdict {
    let interp = Interp::new(limits, Utc::now().timestamp_millis() as f64);
    let verdict = match compile(&interp, source) {
        Ok(candidate) => {
            let results = tests
                .iter()
                .enumerate()
                .map(|(i, test)| run_test(&interp, &candidate, i + 1, test))
                .collect();
            Verdict::from_results(results)
        }
        Err(message) => {
            debug!("compilation failed: {}", message);
            Verdict::compile_failure(message)
        }
    };
    interp.shutdown();
    debug!(
        "run finished: {}/{} passed",
        verdict.passed_count(),
        verdict.results.len()
    );
    verdict
}

/// Evaluates the source as an async function body and returns the callable it yields.
fn compile(interp: &Rc<Interp>, source: &str) -> Result<Value, String> {
    let body = parse_candidate(source).map_err(|e| e.to_string())?;
    let started = interp.start_body(body, Span::default()).map_err(|e| abrupt_message(interp, e))?;
    let candidate = settle(interp, started)?;
    if let Err(e) = interp.drain() {
        return Err(e.to_string());
    }
    interp.take_console();
    if !candidate.is_callable() {
        return Err(NOT_A_FUNCTION.into());
    }
    debug!("candidate compiled in {} steps", interp.steps_used());
    Ok(candidate)
}

/// Resolves a returned value: promises are driven until they settle.
fn settle(interp: &Interp, value: Value) -> Result<Value, String> {
    if !is_promise(&value) {
        return Ok(value);
    }
    let Value::Object(promise) = &value else {
        return Ok(value);
    };
    match interp.run_until_settled(promise) {
        Ok(()) => {}
        Err(LoopError::NeverSettled) => return Err(LoopError::NeverSettled.to_string()),
        Err(LoopError::Fatal(e)) => return Err(e.to_string()),
    }
    match promise_outcome(promise) {
        Some(Ok(resolved)) => Ok(resolved),
        Some(Err(reason)) => Err(interp.describe_error(&reason)),
        None => Err(LoopError::NeverSettled.to_string()),
    }
}

fn abrupt_message(interp: &Interp, abrupt: Abrupt) -> String {
    match abrupt {
        Abrupt::Throw(value) => interp.describe_error(&value),
        Abrupt::Fatal(e) => e.to_string(),
        Abrupt::ShortCircuit => "undefined".into(),
    }
}

fn build_args(interp: &Interp, inputs: &[TestInput]) -> Result<Vec<Value>, String> {
    inputs
        .iter()
        .map(|input| match input {
            TestInput::Json(json) => Ok(interp.from_json(json)),
            TestInput::Script { script } => {
                let expr = parse_expression_source(script).map_err(|e| format!("invalid test input: {}", e))?;
                interp
                    .eval_standalone(&expr)
                    .map_err(|e| format!("invalid test input: {}", abrupt_message(interp, e)))
            }
        })
        .collect()
}

fn run_test(interp: &Interp, candidate: &Value, number: usize, test: &TestCase) -> TestResult {
    interp.reset_budget();
    let actual = match build_args(interp, &test.input) {
        Ok(args) => match interp.call(candidate, Value::Undefined, &args) {
            Ok(returned) => match settle(interp, returned) {
                Ok(resolved) => Actual::Value(Snapshot::capture(interp, &resolved)),
                Err(message) => Actual::Error(message),
            },
            Err(abrupt) => Actual::Error(abrupt_message(interp, abrupt)),
        },
        Err(message) => Actual::Error(message),
    };

    // tasks the candidate abandoned still run to completion before the next test
    if let Err(e) = interp.drain() {
        debug!("test {} left work behind: {}", number, e);
        interp.shutdown();
    }

    let passed = matches!(&actual, Actual::Value(snapshot) if json_equal(snapshot, &test.expected));
    debug!(
        "test {}: {} after {} steps",
        number,
        if passed { "pass" } else { "fail" },
        interp.steps_used()
    );
    TestResult {
        number,
        passed,
        input: test.render_input(),
        expected: test.expected.clone(),
        actual,
        console: interp.take_console(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::challenge;
    use crate::strip::strip;
    use serde_json::json;

    fn case(input: Vec<serde_json::Value>, expected: serde_json::Value) -> TestCase {
        TestCase {
            input: input.into_iter().map(TestInput::Json).collect(),
            expected,
        }
    }

    fn run_challenge(index: usize, source: &str) -> Verdict {
        let challenge = challenge::get(index).unwrap();
        run(&strip(source), &challenge.tests, Limits::default()).unwrap()
    }

    #[test]
    fn test_dedupe_scenario() {
        let verdict = run_challenge(
            0,
            "function dedupe(arr: number[]): number[] {\n  return [...new Set(arr)];\n}",
        );
        assert!(verdict.all_passed, "{}", verdict);
        assert_eq!(verdict.results[4].input, "[[7,3,7,3,1,3,7]]");
    }

    #[test]
    fn test_binary_search_miss_reports_actual() {
        let source = "function binarySearch(arr: number[], target: number): number {\n  const i = arr.indexOf(target);\n  if (i >= 0) return i;\n}";
        let verdict = run_challenge(1, source);
        assert!(!verdict.all_passed);
        let miss = &verdict.results[3];
        assert!(!miss.passed);
        assert_eq!(miss.actual, Actual::Value(Snapshot::Undefined));
        assert!(verdict.to_string().contains("TEST 4: FAIL\n  Input: [[1,2,3,4,5],6]\n  Expected: -1\n  Actual: undefined\n"));
    }

    #[test]
    fn test_binary_search_solution_passes() {
        let source = "function binarySearch(arr: number[], target: number): number {
  let lo = 0, hi = arr.length - 1;
  while (lo <= hi) {
    const mid = (lo + hi) >>> 1;
    if (arr[mid] === target) return mid;
    if (arr[mid] < target) lo = mid + 1; else hi = mid - 1;
  }
  return -1;
}";
        assert!(run_challenge(1, source).all_passed);
    }

    const RACE_SOLUTION: &str = "async function raceWithTimeout(tasks: (() => Promise<any>)[], timeout: number): Promise<any[]> {
  const results: any[] = [];
  const runs = tasks.map(task => task().then((value: any) => { results.push(value); }));
  await Promise.race([Promise.all(runs), new Promise(resolve => setTimeout(resolve, timeout))]);
  return [...results];
}";

    #[test]
    fn test_settlement_order_scenario() {
        let verdict = run_challenge(2, RACE_SOLUTION);
        assert!(verdict.all_passed, "{}", verdict);
    }

    #[test]
    fn test_out_of_order_results_fail() {
        let source = "async function raceWithTimeout(tasks, timeout) {
  const results = [];
  const runs = tasks.map(task => task().then(value => { results.unshift(value); }));
  await Promise.race([Promise.all(runs), new Promise(resolve => setTimeout(resolve, timeout))]);
  return results;
}";
        let verdict = run_challenge(2, source);
        assert!(!verdict.results[1].passed);
        assert_eq!(verdict.results[1].actual.to_string(), "[3,2,1]");
    }

    #[test]
    fn test_syntax_error_fails_fast() {
        let tests = vec![case(vec![json!(1)], json!(1))];
        let verdict = run("function f(x) { return x +; }", &tests, Limits::default()).unwrap();
        assert!(verdict.results.is_empty());
        assert!(verdict.compile_error.as_deref().unwrap().contains("(1:"));
        assert!(verdict.to_string().starts_with("SYNTAX ERROR: "));
    }

    #[test]
    fn test_non_function_source_is_a_compile_error() {
        let tests = vec![case(vec![], json!(1))];
        let verdict = run("42", &tests, Limits::default()).unwrap();
        assert_eq!(verdict.compile_error.as_deref(), Some(NOT_A_FUNCTION));
    }

    #[test]
    fn test_throwing_test_does_not_stop_the_rest() {
        let tests = vec![
            case(vec![json!(0)], json!(0)),
            case(vec![json!(1)], json!(2)),
            case(vec![json!(2)], json!(4)),
        ];
        let source = "function double(n) {\n  if (n === 1) null.boom();\n  return n * 2;\n}";
        let verdict = run(source, &tests, Limits::default()).unwrap();
        assert_eq!(verdict.results.len(), 3);
        assert!(verdict.results[0].passed && verdict.results[2].passed);
        assert_eq!(
            verdict.results[1].actual,
            Actual::Error("TypeError: Cannot read properties of null (reading 'boom') (2:16)".into())
        );
    }

    #[test]
    fn test_rejection_is_a_test_failure() {
        let tests = vec![case(vec![], json!(1)), case(vec![], json!(1))];
        let source = "async function once() {\n  once.calls = (once.calls || 0) + 1;\n  if (once.calls === 1) throw new RangeError('first');\n  return 1;\n}";
        let verdict = run(source, &tests, Limits::default()).unwrap();
        assert!(matches!(&verdict.results[0].actual, Actual::Error(m) if m.starts_with("RangeError: first")));
        assert!(verdict.results[1].passed);
    }

    #[test]
    fn test_infinite_loop_exhausts_budget() {
        let tests = vec![case(vec![], json!(1)), case(vec![], json!(1))];
        let limits = Limits {
            step_budget: 20_000,
            ..Limits::default()
        };
        let source = "function spin() {\n  if (!spin.ran) {\n    spin.ran = true;\n    try { while (true) {} } catch (e) { return 1; }\n  }\n  return 1;\n}";
        let verdict = run(source, &tests, limits).unwrap();
        assert!(matches!(&verdict.results[0].actual, Actual::Error(m) if m.contains("budget exhausted")));
        assert!(verdict.results[1].passed, "budget is refilled per test");
    }

    #[test]
    fn test_never_settling_promise_fails_instead_of_hanging() {
        let tests = vec![case(vec![], json!(1))];
        let verdict = run("() => new Promise(() => {})", &tests, Limits::default()).unwrap();
        assert_eq!(verdict.results[0].actual, Actual::Error("promise never settled".into()));
    }

    #[test]
    fn test_deeply_nested_result_fails_only_its_test() {
        let tests = vec![case(vec![], json!(1)), case(vec![], json!(1))];
        let source = "function deep() {\n  if (deep.ran) return 1;\n  deep.ran = true;\n  let a = [];\n  for (let i = 0; i < 100000; i++) a = [a];\n  return a;\n}";
        // the verdict itself is deep, so inspect and drop it on a large stack
        let outcome = std::thread::Builder::new()
            .stack_size(WORKER_STACK_BYTES)
            .spawn(move || {
                let verdict = run(source, &tests, Limits::default()).unwrap();
                let first = &verdict.results[0];
                let truncated = first.actual.to_string().contains("[Too deep]");
                (first.passed, truncated, verdict.results[1].passed)
            })
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(outcome, (false, true, true));
    }

    #[test]
    fn test_recursion_well_below_the_limit_succeeds() {
        let tests = vec![case(vec![json!(1000)], json!(1000))];
        let source = "function depth(n) {\n  return n === 0 ? 0 : 1 + depth(n - 1);\n}";
        let verdict = run(source, &tests, Limits::default()).unwrap();
        assert!(verdict.all_passed, "{}", verdict);
    }

    #[test]
    fn test_oversized_allocations_throw_range_errors() {
        let source = "(kind) => {
  try {
    if (kind === 0) new Array(2 ** 31);
    if (kind === 1) 'abc'.padEnd(2 ** 31);
    if (kind === 2) 'abcdefgh'.repeat(2 ** 27);
    if (kind === 3) [][2 ** 25] = 1;
    if (kind === 4) [].length = 2 ** 25;
    return 'allocated';
  } catch (e) {
    return e instanceof RangeError && e.message;
  }
}";
        let array = json!("Invalid array length");
        let string = json!("Invalid string length");
        let tests = vec![
            case(vec![json!(0)], array.clone()),
            case(vec![json!(1)], string.clone()),
            case(vec![json!(2)], string),
            case(vec![json!(3)], array.clone()),
            case(vec![json!(4)], array),
        ];
        let verdict = run(source, &tests, Limits::default()).unwrap();
        assert!(verdict.all_passed, "{}", verdict);
    }

    #[test]
    fn test_console_output_is_captured_per_test() {
        let tests = vec![case(vec![json!("a")], json!(0))];
        let source = "(x) => { console.log('got', x, [1, 2]); return 1; }\nconsole.log('unreachable');";
        let verdict = run(source, &tests, Limits::default()).unwrap();
        assert_eq!(verdict.results[0].console, vec!["got a [ 1, 2 ]".to_string()]);
        assert!(verdict.to_string().contains("  Log: got a [ 1, 2 ]\n"));
    }
}
