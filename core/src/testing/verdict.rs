use serde::{Deserialize, Serialize};

use super::process::ExecutionResult;

/// Outcome of judging one case.
///
/// Variants are declared from least to most severe, so the derived `Ord`
/// picks the worst verdict with `max`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    strum::Display,
    strum::EnumIter,
    strum::EnumString,
    Serialize,
    Deserialize,
)]
pub enum Verdict {
    AC,
    WA,
    TLE,
    MLE,
    RE,
    /// The judging side (checker, interactor, generator, reference) failed.
    IE,
}

impl Verdict {
    pub fn is_accepted(self) -> bool {
        self == Self::AC
    }

    pub fn description(self) -> &'static str {
        use Verdict::*;
        match self {
            AC => "Accepted",
            WA => "Wrong Answer",
            TLE => "Time Limit Exceeded",
            MLE => "Memory Limit Exceeded",
            RE => "Runtime Error",
            IE => "Internal Error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaseResult {
    pub name: String,
    pub verdict: Verdict,
    /// `None` when the candidate never ran, e.g. it could not be launched.
    pub execution: Option<ExecutionResult>,
    pub detail: Option<String>,
}

impl CaseResult {
    pub fn new(name: impl Into<String>, verdict: Verdict, execution: ExecutionResult) -> Self {
        Self {
            name: name.into(),
            verdict,
            execution: Some(execution),
            detail: None,
        }
    }

    /// IE without any execution.
    pub fn internal_error(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            verdict: Verdict::IE,
            execution: None,
            detail: Some(detail.into()),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_opt_detail(mut self, detail: Option<String>) -> Self {
        self.detail = detail;
        self
    }
}
