use colored::{Color, ColoredString, Colorize};
use crossterm::terminal;
use strum::IntoEnumIterator;

use crate::testing::{
    CaseResult, Divergence, ExecutionResult, GenerationReport, JudgeReport, QaReport,
    StageOutcome, StressSession, Testcase, ValidationReport, Verdict,
};

#[macro_export]
macro_rules! print_success {
    ($fmt:literal, $($e:tt)*) => {
        use ::colored::Colorize as _;
        println!("{}", format!($fmt, $($e)*).green())
    }
}

/// Peak memory above this is always shown.
pub const MEMORY_PRINT_THRESHOLD_MB: u64 = 100;
/// Peak memory above this is warned about.
pub const MEMORY_WARN_THRESHOLD_MB: u64 = 500;

pub fn is_truecolor_supported() -> bool {
    let Ok(v) = std::env::var("COLORTERM") else {
        return false
    };
    matches!(v.as_str(), "truecolor" | "24bit")
}

pub trait ColorTheme {
    fn color(&self) -> Color;
}

impl ColorTheme for log::Level {
    fn color(&self) -> Color {
        use log::Level::*;
        match self {
            Error => Color::BrightRed,
            Warn => Color::BrightYellow,
            Info => Color::Cyan,
            Debug => Color::Magenta,
            Trace => Color::Blue,
        }
    }
}

impl ColorTheme for Verdict {
    fn color(&self) -> Color {
        use Verdict::*;
        if !self::is_truecolor_supported() {
            return match self {
                AC => Color::Green,
                WA => Color::Yellow,
                TLE => Color::Red,
                MLE => Color::Blue,
                RE => Color::Magenta,
                IE => Color::BrightBlack,
            };
        }

        let (r, g, b) = match self {
            AC => (30, 180, 40),
            WA => (210, 138, 4),
            TLE => (220, 42, 42),
            MLE => (40, 110, 210),
            RE => (171, 40, 200),
            IE => (110, 110, 110),
        };
        Color::TrueColor { r, g, b }
    }
}

pub fn judge_icon(verdict: Verdict) -> ColoredString {
    let fg = if is_truecolor_supported() {
        Color::TrueColor {
            r: 255,
            g: 255,
            b: 255,
        }
    } else {
        Color::BrightBlack
    };
    format!(" {} ", verdict)
        .on_color(verdict.color())
        .bold()
        .color(fg)
}

/// `"AC "`, `"TLE"`: the icon padded to the widest verdict.
pub fn padded_judge_icon(verdict: Verdict) -> String {
    format!(
        "{}{}",
        judge_icon(verdict),
        " ".repeat(3 - verdict.to_string().len())
    )
}

/// One progress line for a finished case.
pub fn case_line(res: &CaseResult, print_memory: bool) -> String {
    let mut line = format!("Testcase {} ... {}", res.name, padded_judge_icon(res.verdict));
    if let Some(exec) = &res.execution {
        line += &format!(" [{}ms]", exec.wall_time.as_millis());
        if let Some(mem) = memory_label(exec, print_memory) {
            line += &format!(" [{}]", mem);
        }
    }
    line
}

fn memory_label(exec: &ExecutionResult, always: bool) -> Option<String> {
    let kb = exec.peak_memory_kb?;
    let mb = kb / 1024;
    if mb > MEMORY_WARN_THRESHOLD_MB {
        log::warn!("Peak memory is {}MB, which is unusually large", mb);
    }
    (always || mb > MEMORY_PRINT_THRESHOLD_MB).then(|| format!("{}MB", mb))
}

pub fn print_report_summary(report: &JudgeReport) {
    let bar = "-".repeat(5);
    print!("{} ", bar);

    let count = report.summary();
    let num_total_test = report.cases.len() + report.skipped.len();
    let num_passed = report.count(Verdict::AC);
    let num_failed = report.cases.len() - num_passed;

    if report.all_accepted() {
        let msg = format!("All {} tests passed ✨", num_total_test);
        print!("{}", msg.green());
    } else {
        let summary_msg = if num_passed > 0 {
            format!("{}/{} tests failed 💣", num_failed, num_total_test)
        } else {
            format!("All {} tests failed 💀", num_total_test)
        };

        let mut details: Vec<String> = Verdict::iter()
            .filter(|v| !v.is_accepted())
            .filter_map(|v| count.get(&v).map(|&cnt| (v, cnt)))
            .map(|(v, cnt)| {
                format!(
                    "{}{}{}",
                    self::judge_icon(v),
                    "x".dimmed(),
                    cnt.to_string().bold().bright_white(),
                )
            })
            .collect();
        if !report.skipped.is_empty() {
            details.push(format!("{} skipped", report.skipped.len()));
        }

        print!("{} ({})", summary_msg.bright_red(), details.join(", "));
    }
    println!(" {}", bar);

    if let Some(slowest) = report.slowest().and_then(|c| Some((c, c.execution.as_ref()?))) {
        println!(
            "{} {} [{}ms]",
            "Slowest:".dimmed(),
            slowest.0.name,
            slowest.1.wall_time.as_millis()
        );
    }
    if let Some(abort) = &report.aborted {
        println!("{} {}", "Aborted:".bright_red().bold(), abort.reason);
    }
}

const BOLD_LINE: &str = "━";
const THIN_LINE: &str = "─";

fn terminal_cols() -> usize {
    let (cols, _) = terminal::size().unwrap_or((40, 40));
    cols as usize
}

fn print_sub_title(s: &str, cols: usize) {
    println!(
        "{}{}",
        s.cyan().bold(),
        THIN_LINE.repeat(cols.saturating_sub(s.len() + 1)).bright_black(),
    )
}

fn print_lines(text: &str) {
    let lines: Vec<_> = text.lines().collect();
    if lines.is_empty() {
        println!("{}", "<EMPTY>".magenta().dimmed());
        return;
    }
    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim_end();
        print!("{}", trimmed);

        let num_trailling_whitespace = line.len() - trimmed.len();
        if num_trailling_whitespace > 0 {
            print!(
                "{}{}",
                " ".repeat(num_trailling_whitespace).on_red(),
                "(Trailling whitespace)".bright_red().bold()
            );
        }

        let is_last_line = i + 1 == lines.len();
        if is_last_line && !text.ends_with('\n') {
            print!("{}", " Missing new line ".on_yellow().black().bold());
        }
        println!();
    }
}

/// Input, expected output, stdout and stderr of a failed case.
pub fn print_case_detail(res: &CaseResult, case: Option<&Testcase>, print_input: bool) {
    let cols = terminal_cols();
    let bold_bar = BOLD_LINE.repeat(cols).blue().bold();

    let time = res
        .execution
        .as_ref()
        .map(|e| format!(" [{}ms]", e.wall_time.as_millis()))
        .unwrap_or_default();
    println!(
        "\n{}: {}{}\n{}",
        res.name.color(Color::BrightYellow).bold(),
        self::judge_icon(res.verdict),
        time,
        bold_bar,
    );

    if let Some(detail) = &res.detail {
        println!("{}", detail.bright_white());
    }
    if let (true, Some(case)) = (print_input, case) {
        print_sub_title("[input]", cols);
        print_lines(&String::from_utf8_lossy(&case.input));
    }
    if let Some(expected) = case.and_then(|c| c.expected.as_ref()) {
        print_sub_title("[expected]", cols);
        print_lines(&String::from_utf8_lossy(expected));
    }
    if let Some(exec) = &res.execution {
        print_sub_title("[stdout]", cols);
        print_lines(&exec.stdout_lossy());
        if exec.stdout_truncated {
            println!("{}", "... (truncated)".dimmed());
        }

        if !exec.stderr.is_empty() {
            print_sub_title("[stderr]", cols);
            print!("{}", exec.stderr_lossy());
            if exec.stderr_truncated {
                println!("{}", "... (truncated)".dimmed());
            }
        }
    }
    println!("{}", bold_bar);
}

pub fn print_divergence(d: &Divergence) {
    let cols = terminal_cols();
    let bold_bar = BOLD_LINE.repeat(cols).blue().bold();
    println!(
        "\n{}: {}\n{}",
        format!("seed {}", d.seed).color(Color::BrightYellow).bold(),
        self::judge_icon(d.verdict),
        bold_bar
    );
    if let Some(detail) = &d.detail {
        println!("{}", detail.bright_white());
    }
    print_sub_title("[input]", cols);
    print_lines(&String::from_utf8_lossy(&d.input));
    if let Some(r) = &d.reference {
        print_sub_title("[reference]", cols);
        print_lines(&r.stdout_lossy());
    }
    print_sub_title("[candidate]", cols);
    print_lines(&d.candidate.stdout_lossy());
    println!("{}", bold_bar);
}

pub fn print_stress_summary(s: &StressSession) {
    let bar = "-".repeat(5);
    let msg = if s.passed() {
        format!("{} iterations passed ✨", s.iterations_run).green()
    } else if let Some(abort) = &s.aborted {
        format!("Aborted after {} iterations: {}", s.iterations_run, abort.reason).bright_red()
    } else {
        format!(
            "{} divergences, {} internal errors in {} iterations 💣",
            s.divergences.len(),
            s.internal_errors.len(),
            s.iterations_run
        )
        .bright_red()
    };
    println!("{} {} {}", bar, msg, bar);
    println!("{} {}", "Base seed:".dimmed(), s.base_seed);
}

pub fn print_validation_report(report: &ValidationReport) {
    for r in report.invalid() {
        println!(
            "{} {} {} {}",
            "[FAILURE]".bright_red().bold(),
            r.case,
            "rejected by".dimmed(),
            r.validator
        );
        if let Some(detail) = &r.detail {
            println!("  {}", detail);
        }
    }
    let failed = report.invalid().count();
    let msg = format!(
        "{} validations passed, {} failed",
        report.results.len() - failed,
        failed
    );
    if report.all_valid() {
        println!("{}", msg.green());
    } else {
        println!("{}", msg.bright_red());
    }
    if let Some(abort) = &report.aborted {
        println!("{} {}", "Aborted:".bright_red().bold(), abort.reason);
    }
}

pub fn print_generation_report(report: &GenerationReport) {
    for c in &report.written {
        println!("{} {}", "Generated".green(), c.input.display());
    }
    for f in &report.failed {
        println!("{} {}: {}", "Failed".bright_red(), f.name, f.detail);
    }
}

pub fn print_qa_report(report: &QaReport) {
    println!("\n{}", "Quality Assurance Summary".bold().underline());
    for stage in &report.stages {
        let outcome = match &stage.outcome {
            StageOutcome::Passed => "passed".green(),
            StageOutcome::Failed => "failed".bright_red().bold(),
            StageOutcome::Skipped(why) => format!("skipped ({})", why).dimmed(),
            StageOutcome::Aborted(why) => format!("aborted ({})", why).bright_red(),
        };
        println!("  {:<10}{}", stage.kind.to_string(), outcome);
    }
    for h in &report.hacks {
        println!("{} {}", "Saved".cyan(), h.input.display());
    }
    for h in &report.unsaved_hacks {
        println!("{} seed {}: {}", "Not saved".bright_red(), h.seed, h.detail);
    }
    if report.passed() {
        println!("{}", "All checks passed!".green().bold());
    } else {
        println!("{}", "Some checks failed".bright_red().bold());
    }
}
