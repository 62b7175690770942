use log::debug;

use crate::script::parser::parse_program;

/// Blanks out type-only syntax so the result runs as plain script.
///
/// Every erased character becomes a space (newlines are kept), so line and
/// column positions of the remaining code are unchanged. Source that does not
/// parse is returned untouched and fails later at compile time.
pub fn strip(source: &str) -> String {
    let program = match parse_program(source) {
        Ok(program) => program,
        Err(e) => {
            debug!("strip skipped, source does not parse: {}", e);
            return source.to_string();
        }
    };
    if program.erased.is_empty() {
        return source.to_string();
    }

    let mut ranges = program.erased;
    ranges.sort_unstable();
    let mut out = String::with_capacity(source.len());
    let mut cursor = 0;
    for (start, end) in ranges {
        let start = start.max(cursor);
        if start >= end {
            continue;
        }
        out.push_str(&source[cursor..start]);
        out.extend(source[start..end].chars().map(|c| if c == '\n' || c == '\r' { c } else { ' ' }));
        cursor = end;
    }
    out.push_str(&source[cursor..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_source_is_unchanged() {
        let src = "function dedupe(arr) {\n  return [...new Set(arr)];\n}";
        assert_eq!(strip(src), src);
    }

    #[test]
    fn test_annotations_become_spaces() {
        let src = "function dedupe(arr: number[]): number[] {\n  return arr;\n}";
        let out = strip(src);
        assert_eq!(out, "function dedupe(arr          )           {\n  return arr;\n}");
        assert_eq!(out.len(), src.len());
    }

    #[test]
    fn test_line_count_is_preserved() {
        let src = "interface Point {\n  x: number;\n  y: number;\n}\nconst p: Point = { x: 1, y: 2 };\n";
        let out = strip(src);
        assert_eq!(out.lines().count(), src.lines().count());
        assert!(out.trim_start().starts_with("const p"));
        assert!(!out.contains("number"));
    }

    #[test]
    fn test_async_signature_with_function_types() {
        let src = "async function raceWithTimeout(tasks: (() => Promise<any>)[], timeout: number): Promise<any[]> {\n  return [];\n}";
        let out = strip(src);
        assert!(out.starts_with("async function raceWithTimeout(tasks"));
        assert!(!out.contains("Promise"));
        assert!(out.contains("timeout"));
    }

    #[test]
    fn test_generic_call_and_comparison() {
        let out = strip("const m = new Map<string, number>();\nconst ok = a < b && c > d;");
        assert!(out.starts_with("const m = new Map                ();"));
        assert!(out.ends_with("const ok = a < b && c > d;"));
    }

    #[test]
    fn test_deep_nesting_is_returned_unchanged() {
        let src = format!("(x: number) => {}x{}", "(".repeat(10_000), ")".repeat(10_000));
        assert_eq!(strip(&src), src);
    }

    #[test]
    fn test_unparsable_source_is_returned_unchanged() {
        let src = "function broken(a: number { return a; ";
        assert_eq!(strip(src), src);
    }
}
