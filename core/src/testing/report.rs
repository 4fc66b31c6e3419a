use std::collections::BTreeMap;

use chrono::{DateTime, Local};
use serde::Serialize;

use super::{
    error::{Error, ErrorKind},
    verdict::{CaseResult, Verdict},
};

/// Why a run stopped before every case was judged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Abort {
    pub kind: ErrorKind,
    pub reason: String,
}

impl From<&Error> for Abort {
    fn from(e: &Error) -> Self {
        Self {
            kind: e.kind(),
            reason: e.to_string(),
        }
    }
}

/// Results of one run over a case list, in case order.
#[derive(Debug, Clone, Serialize)]
pub struct JudgeReport {
    pub started_at: DateTime<Local>,
    pub cases: Vec<CaseResult>,
    /// Cases never started because of stop-on-failure or an abort.
    pub skipped: Vec<String>,
    pub aborted: Option<Abort>,
}

impl JudgeReport {
    pub fn new(started_at: DateTime<Local>) -> Self {
        Self {
            started_at,
            cases: Vec::new(),
            skipped: Vec::new(),
            aborted: None,
        }
    }

    /// Every case ran and was accepted.
    pub fn all_accepted(&self) -> bool {
        self.aborted.is_none()
            && self.skipped.is_empty()
            && self.cases.iter().all(|c| c.verdict.is_accepted())
    }

    pub fn worst(&self) -> Option<Verdict> {
        self.cases.iter().map(|c| c.verdict).max()
    }

    pub fn summary(&self) -> BTreeMap<Verdict, usize> {
        self.cases.iter().fold(BTreeMap::new(), |mut count, c| {
            *count.entry(c.verdict).or_default() += 1;
            count
        })
    }

    pub fn count(&self, verdict: Verdict) -> usize {
        self.cases.iter().filter(|c| c.verdict == verdict).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &CaseResult> {
        self.cases.iter().filter(|c| !c.verdict.is_accepted())
    }

    pub fn slowest(&self) -> Option<&CaseResult> {
        self.cases
            .iter()
            .filter_map(|c| c.execution.as_ref().map(|e| (c, e.wall_time)))
            .max_by_key(|(_, t)| *t)
            .map(|(c, _)| c)
    }

    pub fn max_memory(&self) -> Option<&CaseResult> {
        self.cases
            .iter()
            .filter_map(|c| {
                let kb = c.execution.as_ref()?.peak_memory_kb?;
                Some((c, kb))
            })
            .max_by_key(|(_, kb)| *kb)
            .map(|(c, _)| c)
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;
    use crate::testing::{ExecutionResult, Termination};

    fn case(name: &str, verdict: Verdict, ms: u64, kb: Option<u64>) -> CaseResult {
        CaseResult::new(
            name,
            verdict,
            ExecutionResult {
                termination: Termination::Exited(0),
                stdout: Vec::new(),
                stderr: Vec::new(),
                stdout_truncated: false,
                stderr_truncated: false,
                wall_time: Duration::from_millis(ms),
                peak_memory_kb: kb,
            },
        )
    }

    #[test]
    fn aggregates() {
        let mut r = JudgeReport::new(Local::now());
        r.cases = vec![
            case("a", Verdict::AC, 10, Some(300)),
            case("b", Verdict::WA, 30, None),
            case("c", Verdict::AC, 20, Some(900)),
            CaseResult::internal_error("d", "checker crashed"),
        ];
        assert!(!r.all_accepted());
        assert_eq!(r.worst(), Some(Verdict::IE));
        assert_eq!(r.slowest().unwrap().name, "b");
        assert_eq!(r.max_memory().unwrap().name, "c");
        assert_eq!(
            r.summary().into_iter().collect::<Vec<_>>(),
            [(Verdict::AC, 2), (Verdict::WA, 1), (Verdict::IE, 1)]
        );
        assert_eq!(r.failed().map(|c| c.name.as_str()).collect::<Vec<_>>(), ["b", "d"]);
    }

    #[test]
    fn skipped_cases_are_not_a_pass() {
        let mut r = JudgeReport::new(Local::now());
        r.cases = vec![case("a", Verdict::AC, 1, None)];
        assert!(r.all_accepted());
        r.skipped.push("b".into());
        assert!(!r.all_accepted());
    }
}
