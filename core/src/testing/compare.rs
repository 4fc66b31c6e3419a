//! Output comparison. Everything here is a pure function of its arguments.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Default)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum CompareMode {
    /// Lines compared exactly, ignoring trailing whitespace of each line,
    /// trailing blank lines and CRLF.
    #[default]
    Exact,
    /// Lines compared as whitespace-separated token lists.
    IgnoreSpaces,
    /// Whole outputs compared as token streams.
    IgnoreSpacesAndNewlines,
    /// Token streams where numeric tokens may differ by `tolerance`
    /// (absolute or relative).
    Float { tolerance: f64 },
}

impl CompareMode {
    pub const DEFAULT_TOLERANCE: f64 = 1e-6;

    pub fn float() -> Self {
        Self::Float {
            tolerance: Self::DEFAULT_TOLERANCE,
        }
    }
}

impl fmt::Display for CompareMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact => write!(f, "exact"),
            Self::IgnoreSpaces => write!(f, "ignore-spaces"),
            Self::IgnoreSpacesAndNewlines => write!(f, "ignore-spaces-and-newlines"),
            Self::Float { tolerance } => write!(f, "float (tolerance {:e})", tolerance),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparison {
    pub matched: bool,
    /// Where the outputs first differ.
    pub detail: Option<String>,
}

impl Comparison {
    fn ok() -> Self {
        Self {
            matched: true,
            detail: None,
        }
    }

    fn mismatch(detail: String) -> Self {
        Self {
            matched: false,
            detail: Some(detail),
        }
    }
}

pub fn compare(actual: &[u8], expected: &[u8], mode: &CompareMode) -> Comparison {
    match mode {
        CompareMode::Exact => compare_exact(actual, expected),
        CompareMode::IgnoreSpaces => compare_line_tokens(actual, expected),
        CompareMode::IgnoreSpacesAndNewlines => compare_tokens(actual, expected, None),
        CompareMode::Float { tolerance } => compare_tokens(actual, expected, Some(*tolerance)),
    }
}

fn compare_exact(actual: &[u8], expected: &[u8]) -> Comparison {
    let a = normalized_lines(actual);
    let e = normalized_lines(expected);

    let Some(line) = first_difference(&a, &e, |x, y| x == y) else {
        return Comparison::ok();
    };
    let mut detail = format!(
        "line {}: expected {}, got {}",
        line + 1,
        show(e.get(line).copied()),
        show(a.get(line).copied()),
    );
    if compare_tokens(actual, expected, None).matched {
        detail += " (outputs differ only in spacing or line breaks)";
    }
    Comparison::mismatch(detail)
}

fn compare_line_tokens(actual: &[u8], expected: &[u8]) -> Comparison {
    let a = line_tokens(actual);
    let e = line_tokens(expected);

    match first_difference(&a, &e, |x, y| x == y) {
        None => Comparison::ok(),
        Some(line) => Comparison::mismatch(format!(
            "line {}: expected {}, got {}",
            line + 1,
            show(e.get(line).map(|t| t.join(&b' ')).as_deref()),
            show(a.get(line).map(|t| t.join(&b' ')).as_deref()),
        )),
    }
}

fn line_tokens(out: &[u8]) -> Vec<Vec<&[u8]>> {
    let mut lines: Vec<Vec<&[u8]>> = split_lines(out).map(|l| tokens(l).collect()).collect();
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines
}

fn compare_tokens(actual: &[u8], expected: &[u8], tolerance: Option<f64>) -> Comparison {
    let a: Vec<_> = tokens(actual).collect();
    let e: Vec<_> = tokens(expected).collect();

    let same = |x: &&[u8], y: &&[u8]| {
        x == y || tolerance.is_some_and(|tol| numbers_close(x, y, tol))
    };
    match first_difference(&a, &e, same) {
        None => Comparison::ok(),
        Some(i) if i >= a.len() || i >= e.len() => Comparison::mismatch(format!(
            "expected {} tokens, got {}",
            e.len(),
            a.len()
        )),
        Some(i) => Comparison::mismatch(format!(
            "token {}: expected {}, got {}",
            i + 1,
            show(Some(e[i])),
            show(Some(a[i])),
        )),
    }
}

fn numbers_close(a: &[u8], b: &[u8], tolerance: f64) -> bool {
    let (Some(a), Some(b)) = (parse_number(a), parse_number(b)) else {
        return false;
    };
    let diff = (a - b).abs();
    diff <= tolerance || diff <= tolerance * a.abs().max(b.abs())
}

fn parse_number(token: &[u8]) -> Option<f64> {
    let s = std::str::from_utf8(token).ok()?;
    if !lazy_regex::regex_is_match!(r"^[+-]?(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?$", s) {
        return None;
    }
    s.parse().ok()
}

fn first_difference<T>(a: &[T], b: &[T], eq: impl Fn(&T, &T) -> bool) -> Option<usize> {
    let common = a.len().min(b.len());
    (0..common)
        .find(|&i| !eq(&a[i], &b[i]))
        .or((a.len() != b.len()).then_some(common))
}

fn split_lines(out: &[u8]) -> impl Iterator<Item = &[u8]> {
    out.split(|&b| b == b'\n')
}

fn tokens(out: &[u8]) -> impl Iterator<Item = &[u8]> {
    out.split(|b| b.is_ascii_whitespace()).filter(|t| !t.is_empty())
}

fn normalized_lines(out: &[u8]) -> Vec<&[u8]> {
    let mut lines: Vec<&[u8]> = split_lines(out).map(trim_end).collect();
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines
}

fn trim_end(line: &[u8]) -> &[u8] {
    let end = line
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(0, |i| i + 1);
    &line[..end]
}

fn show(part: Option<&[u8]>) -> String {
    const MAX_CHARS: usize = 60;
    let Some(part) = part else {
        return "<EOF>".to_owned();
    };
    let s = String::from_utf8_lossy(part);
    if s.chars().count() > MAX_CHARS {
        format!("`{}...`", s.chars().take(MAX_CHARS).collect::<String>())
    } else {
        format!("`{}`", s)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn is_match(actual: &str, expected: &str, mode: CompareMode) -> bool {
        compare(actual.as_bytes(), expected.as_bytes(), &mode).matched
    }

    #[test]
    fn exact_is_reflexive_and_ignores_line_ends() {
        for s in ["", "6\n", "a b\nc\n", "  leading\n"] {
            assert!(is_match(s, s, CompareMode::Exact), "{:?}", s);
        }
        assert!(is_match("6", "6\n", CompareMode::Exact));
        assert!(is_match("6\n\n\n", "6\n", CompareMode::Exact));
        assert!(is_match("1 2  \r\n3\t\r\n", "1 2\n3\n", CompareMode::Exact));
        assert!(is_match("\n", "", CompareMode::Exact));
    }

    #[test]
    fn exact_keeps_internal_whitespace() {
        assert!(!is_match("1  2\n", "1 2\n", CompareMode::Exact));
        assert!(!is_match(" 1\n", "1\n", CompareMode::Exact));
        assert!(!is_match("1\n\n2\n", "1\n2\n", CompareMode::Exact));
        assert!(!is_match("x\n", "", CompareMode::Exact));
    }

    #[test]
    fn exact_detail_names_first_difference() {
        let c = compare(b"6\n", b"7\n", &CompareMode::Exact);
        assert!(!c.matched);
        assert_eq!(c.detail.unwrap(), "line 1: expected `7`, got `6`");

        let c = compare(b"1\n", b"1\n2\n", &CompareMode::Exact);
        assert_eq!(c.detail.unwrap(), "line 2: expected `2`, got <EOF>");

        let c = compare(b"1 2\n", b"1\n2\n", &CompareMode::Exact);
        assert!(c.detail.unwrap().contains("differ only in spacing"));
    }

    #[test]
    fn ignore_spaces_keeps_lines() {
        let m = CompareMode::IgnoreSpaces;
        assert!(is_match("1   2\t3 \n4\n\n", "1 2 3\n4\n", m));
        assert!(!is_match("1 2 3 4\n", "1 2 3\n4\n", m));
    }

    #[test]
    fn ignore_spaces_and_newlines() {
        let m = CompareMode::IgnoreSpacesAndNewlines;
        assert!(is_match("1 2 3 4", "1\n2\n3\n4\n", m));
        let c = compare(b"1 2", b"1 2 3", &m);
        assert_eq!(c.detail.unwrap(), "expected 3 tokens, got 2");
    }

    #[test]
    fn float_tolerance() {
        let m = CompareMode::float();
        assert!(is_match("1.0\n", "1.00000\n", m));
        assert!(is_match("0.3333333\n", "0.333333333\n", m));
        assert!(is_match("1000000.5\n", "1000000.0\n", CompareMode::Float { tolerance: 1e-6 }));
        assert!(is_match("1e3 YES\n", "1000 YES\n", m));
        assert!(!is_match("0.34\n", "0.33\n", m));
        assert!(!is_match("1.0 yes\n", "1.0 YES\n", m));
        assert!(!is_match("nan\n", "nan0\n", m));

        let c = compare(b"1 2.5", b"1 2.4", &m);
        assert_eq!(c.detail.unwrap(), "token 2: expected `2.4`, got `2.5`");
    }

    #[test]
    fn non_numeric_tokens_need_exact_match_under_float() {
        assert!(!is_match("inf", "1e400", CompareMode::float()));
        assert!(is_match("inf", "inf", CompareMode::float()));
    }
}
