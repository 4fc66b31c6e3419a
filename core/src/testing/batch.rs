use async_trait::async_trait;

use super::{
    cancel::CancelToken,
    case::Testcase,
    checker::{describe, Matcher},
    command::CommandLine,
    error::Result,
    process::{Limits, ProcessRunner, Termination},
    verdict::{CaseResult, Verdict},
};

/// Judges one case.
///
/// `Err` is reserved for failures that are not the candidate's fault; the
/// pool decides from [`Error::is_fatal`](super::Error::is_fatal) whether the
/// run can go on.
#[async_trait]
pub trait Judge: Send + Sync {
    async fn judge(&self, case: &Testcase, cancel: &CancelToken) -> Result<CaseResult>;
}

/// Verdict implied by how the candidate ended, if that alone decides it.
///
/// `None` means a clean exit whose output still has to be judged.
pub(crate) fn termination_verdict(t: Termination) -> Option<(Verdict, String)> {
    let verdict = match t {
        Termination::Exited(0) => return None,
        Termination::TimedOut => Verdict::TLE,
        Termination::OutOfMemory => Verdict::MLE,
        Termination::Exited(_) | Termination::Signaled(_) | Termination::OutputLimitExceeded => {
            Verdict::RE
        }
    };
    Some((verdict, describe(t)))
}

/// One program, one input, a known expected output.
#[derive(Debug, Clone)]
pub struct BatchJudge {
    solution: CommandLine,
    runner: ProcessRunner,
    matcher: Matcher,
}

impl BatchJudge {
    pub fn new(solution: CommandLine, limits: Limits, matcher: Matcher) -> Self {
        Self {
            solution,
            runner: ProcessRunner::new(limits),
            matcher,
        }
    }

    pub fn solution(&self) -> &CommandLine {
        &self.solution
    }

    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }
}

#[async_trait]
impl Judge for BatchJudge {
    async fn judge(&self, case: &Testcase, cancel: &CancelToken) -> Result<CaseResult> {
        let res = self.runner.run(&self.solution, &case.input, cancel).await?;

        if let Some((verdict, detail)) = termination_verdict(res.termination) {
            return Ok(CaseResult::new(&case.name, verdict, res).with_detail(detail));
        }

        let j = self
            .matcher
            .judge(&case.input, &res.stdout, case.expected.as_deref(), cancel)
            .await?;
        Ok(CaseResult::new(&case.name, j.verdict, res).with_opt_detail(j.detail))
    }
}
