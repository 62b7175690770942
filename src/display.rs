use std::io::Cursor;

use ariadne::{Config, Label, Report, ReportKind, Source};

use crate::models::config::UserConfig;
use crate::models::Challenge;
use crate::script::SyntaxError;
use crate::stats::Histogram;

const BAR_WIDTH: usize = 40;

pub fn display_challenge(challenge: &Challenge, index: usize, count: usize) {
    println!("\n{}", "=".repeat(60));
    println!("  CHALLENGE {} OF {}", index + 1, count);
    println!("{}\n", "=".repeat(60));

    println!("{}\n", challenge.title);

    println!("{}", "-".repeat(60));
    println!("{}", challenge.description);
    println!("{}", "-".repeat(60));

    println!("\nFunction Signature:");
    println!("  {}\n", challenge.signature);

    println!("Test Cases: {} total", challenge.tests.len());

    println!("\n{}", "=".repeat(60));
    println!("Run `codegate init` to start an attempt");
    println!("Run `codegate test` to check your solution");
    println!("{}\n", "=".repeat(60));
}

/// `[x]` completed, `[>]` current, `[ ]` pending.
pub fn progress_marker(config: &UserConfig, index: usize) -> &'static str {
    if config.is_completed(index) {
        "[x]"
    } else if index == config.current_challenge {
        "[>]"
    } else {
        "[ ]"
    }
}

pub fn progress_line(config: &UserConfig, count: usize) -> String {
    (0..count)
        .map(|i| progress_marker(config, i))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn display_progress(config: &UserConfig, count: usize) {
    println!("PROGRESS: {}", progress_line(config, count));
}

pub fn display_end_of_sequence(completed: usize, count: usize) {
    println!("\n{}", "=".repeat(60));
    println!("  ALL CHALLENGES ATTEMPTED");
    println!("  {} of {} completed", completed, count);
    println!("{}\n", "=".repeat(60));
}

pub fn render_histogram(histogram: &Histogram, user_time: Option<f64>) -> String {
    let mut out = format!("COMPLETION TIME DISTRIBUTION (n={})\n", histogram.samples);
    let peak = histogram.peak().max(1);
    for (i, &count) in histogram.counts.iter().enumerate() {
        let (lo, hi) = histogram.range(i);
        let width = (count * BAR_WIDTH).div_ceil(peak);
        let marker = if histogram.user_bucket == Some(i) { "  <- YOU" } else { "" };
        out.push_str(&format!(
            "{:>6.0}s - {:>6.0}s | {:<width$} {}{}\n",
            lo,
            hi,
            "#".repeat(width),
            count,
            marker,
            width = BAR_WIDTH
        ));
    }
    out.push_str(&format!("{:.0}s .. {:.0}s", histogram.min, histogram.max));
    if let Some(time) = user_time {
        out.push_str(&format!("\nYOUR TIME: {}s", time));
    }
    out
}

pub fn display_histogram(histogram: Option<&Histogram>, user_time: Option<f64>) {
    match histogram {
        Some(h) => println!("{}", render_histogram(h, user_time)),
        None => println!("NO DATA AVAILABLE"),
    }
}

fn char_offset(source: &str, byte: usize) -> usize {
    let byte = byte.min(source.len());
    source
        .char_indices()
        .take_while(|(i, _)| *i < byte)
        .count()
}

/// Source excerpt with the failing span underlined.
pub fn render_syntax_error(filename: &str, source: &str, error: &SyntaxError) -> String {
    let total = source.chars().count();
    let start = char_offset(source, error.span.start);
    let mut end = char_offset(source, error.span.end);
    if end <= start {
        end = (start + 1).min(total);
    }
    let range = start..end.max(start);

    let mut bytes = Cursor::new(Vec::new());
    let written = Report::build(ReportKind::Error, (filename, range.clone()))
        .with_config(Config::default().with_color(false))
        .with_message("SYNTAX ERROR")
        .with_label(Label::new((filename, range)).with_message(&error.message))
        .finish()
        .write((filename, Source::from(source)), &mut bytes);
    match written {
        Ok(()) => String::from_utf8_lossy(&bytes.into_inner()).into_owned(),
        Err(_) => error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parser::parse_program;

    #[test]
    fn test_progress_markers() {
        let mut config = UserConfig::default();
        config.mark_completed(0);
        config.current_challenge = 1;
        assert_eq!(progress_line(&config, 3), "[x] [>] [ ]");
    }

    #[test]
    fn test_histogram_marks_user_bucket() {
        let h = Histogram::build(&[10.0, 20.0, 30.0, 40.0], Some(25.0)).unwrap();
        let text = render_histogram(&h, Some(25.0));
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "COMPLETION TIME DISTRIBUTION (n=4)");
        assert!(lines[3].ends_with("<- YOU"));
        assert!(!lines[2].contains("YOU"));
        assert_eq!(lines.last().copied(), Some("YOUR TIME: 25s"));
    }

    #[test]
    fn test_syntax_report_names_file_and_reason() {
        let source = "function f(a) {\n  return a +;\n}";
        let error = parse_program(source).unwrap_err();
        let report = render_syntax_error("f.ts", source, &error);
        assert!(report.contains("SYNTAX ERROR"));
        assert!(report.contains("f.ts"));
        assert!(report.contains(&error.message));
    }
}
