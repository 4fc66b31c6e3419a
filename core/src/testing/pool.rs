use std::{num::NonZeroUsize, sync::Arc};

use chrono::Local;
use tokio::sync::{mpsc, Semaphore};

use super::{
    batch::Judge,
    cancel::CancelToken,
    case::Testcase,
    error::{Error, ErrorKind, Result},
    report::{Abort, JudgeReport},
    verdict::CaseResult,
};

/// Progress notifications, delivered in completion order.
#[derive(Debug)]
pub enum PoolEvent<'a> {
    Started { index: usize, name: &'a str },
    Finished { index: usize, result: &'a CaseResult },
}

enum Msg {
    Started(usize),
    Finished(usize, Result<CaseResult>),
    NotStarted(usize),
}

/// Runs a [`Judge`] over many cases with a bounded number of workers.
#[derive(Debug, Clone)]
pub struct CaseRunnerPool {
    jobs: usize,
    stop_on_failure: bool,
}

impl Default for CaseRunnerPool {
    fn default() -> Self {
        Self::new(0)
    }
}

impl CaseRunnerPool {
    /// `jobs == 0` means one worker per host core.
    pub fn new(jobs: usize) -> Self {
        let jobs = if jobs == 0 { Self::host_cores() } else { jobs };
        Self {
            jobs,
            stop_on_failure: false,
        }
    }

    pub fn host_cores() -> usize {
        std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1)
    }

    pub fn stop_on_failure(mut self, yes: bool) -> Self {
        self.stop_on_failure = yes;
        self
    }

    /// Judges every case and returns the results in case order.
    ///
    /// A case whose judge fails with a non-fatal error is recorded as IE. A
    /// fatal error or `cancel` kills in-flight executions and stops the run;
    /// the report then carries the reason and whatever was collected.
    /// With stop-on-failure, cases not started yet are skipped while running
    /// ones are allowed to finish.
    pub async fn run(
        &self,
        judge: Arc<dyn Judge>,
        cases: Vec<Testcase>,
        cancel: &CancelToken,
        mut on_event: impl FnMut(PoolEvent<'_>),
    ) -> JudgeReport {
        let mut report = JudgeReport::new(Local::now());
        let names: Vec<String> = cases.iter().map(|c| c.name.clone()).collect();

        let abort = CancelToken::new();
        let forwarder = {
            let (outer, abort) = (cancel.clone(), abort.clone());
            tokio::spawn(async move {
                outer.cancelled().await;
                abort.cancel();
            })
        };

        let sem = Arc::new(Semaphore::new(self.jobs));
        let (tx, mut rx) = mpsc::unbounded_channel();
        for (index, case) in cases.into_iter().enumerate() {
            let (sem, tx, judge, abort) = (
                Arc::clone(&sem),
                tx.clone(),
                Arc::clone(&judge),
                abort.clone(),
            );
            let stop_on_failure = self.stop_on_failure;
            tokio::spawn(async move {
                let Ok(_permit) = Arc::clone(&sem).acquire_owned().await else {
                    let _ = tx.send(Msg::NotStarted(index));
                    return;
                };
                if abort.is_cancelled() || sem.is_closed() {
                    let _ = tx.send(Msg::NotStarted(index));
                    return;
                }
                let _ = tx.send(Msg::Started(index));
                let res = judge.judge(&case, &abort).await;
                // The stop must be in effect before `_permit` frees a slot.
                match &res {
                    Err(e) if e.is_fatal() => {
                        sem.close();
                        abort.cancel();
                    }
                    Ok(r) if stop_on_failure && !r.verdict.is_accepted() => sem.close(),
                    _ => {}
                }
                let _ = tx.send(Msg::Finished(index, res));
            });
        }
        drop(tx);

        let mut results: Vec<Option<CaseResult>> = vec![None; names.len()];
        let mut fatal: Option<Error> = None;
        let mut stopped = false;

        while let Some(msg) = rx.recv().await {
            match msg {
                Msg::Started(index) => on_event(PoolEvent::Started {
                    index,
                    name: &names[index],
                }),
                Msg::NotStarted(_) => {}
                Msg::Finished(index, res) => {
                    let result = match res {
                        Ok(r) => r,
                        Err(e) if !e.is_fatal() => {
                            log::warn!("{}: {}", names[index], e);
                            CaseResult::internal_error(&names[index], e.to_string())
                        }
                        Err(e) => {
                            // a case killed by the abort reports Cancelled; keep the cause
                            let replace = match &fatal {
                                None => true,
                                Some(prev) => {
                                    prev.kind() == ErrorKind::Cancelled
                                        && e.kind() != ErrorKind::Cancelled
                                }
                            };
                            if replace {
                                log::debug!("Aborting the run: {}", e);
                                fatal = Some(e);
                            }
                            continue;
                        }
                    };
                    if self.stop_on_failure && !result.verdict.is_accepted() && !stopped {
                        log::info!("Stopping after the first failure ({})", result.name);
                        stopped = true;
                    }
                    on_event(PoolEvent::Finished {
                        index,
                        result: &result,
                    });
                    results[index] = Some(result);
                }
            }
        }
        forwarder.abort();

        for (name, result) in names.into_iter().zip(results) {
            match result {
                Some(r) => report.cases.push(r),
                None => report.skipped.push(name),
            }
        }
        report.aborted = fatal.as_ref().map(Abort::from);
        report
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::testing::{ErrorKind, Verdict};

    /// Sleeps for the number of milliseconds given as input, then answers
    /// the verdict named by the expected output.
    struct FakeJudge;

    #[async_trait]
    impl Judge for FakeJudge {
        async fn judge(&self, case: &Testcase, cancel: &CancelToken) -> Result<CaseResult> {
            let ms: u64 = String::from_utf8_lossy(&case.input).trim().parse().unwrap();
            if ms > 0 {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(ms)) => {}
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                }
            }
            let verdict = String::from_utf8_lossy(case.expected.as_deref().unwrap());
            match verdict.as_ref() {
                "SPAWN" => Err(Error::Spawn {
                    program: "fake".into(),
                    source: std::io::Error::from(std::io::ErrorKind::OutOfMemory),
                }),
                "LAUNCH" => Err(Error::launch(
                    "fake",
                    std::io::Error::from(std::io::ErrorKind::NotFound),
                )),
                v => Ok(CaseResult {
                    name: case.name.clone(),
                    verdict: v.parse().unwrap(),
                    execution: None,
                    detail: None,
                }),
            }
        }
    }

    fn cases(plan: &[(u64, &str)]) -> Vec<Testcase> {
        plan.iter()
            .enumerate()
            .map(|(i, (ms, v))| Testcase::new(format!("case{}", i), ms.to_string(), Some(*v)))
            .collect()
    }

    fn names(results: &[CaseResult]) -> Vec<&str> {
        results.iter().map(|r| r.name.as_str()).collect()
    }

    #[tokio::test]
    async fn report_is_in_case_order() {
        let plan = [(120, "AC"), (10, "WA"), (60, "AC"), (0, "TLE"), (30, "AC")];
        for jobs in [1, 2, 5] {
            let mut finished = Vec::new();
            let report = CaseRunnerPool::new(jobs)
                .run(
                    Arc::new(FakeJudge),
                    cases(&plan),
                    &CancelToken::new(),
                    |ev| {
                        if let PoolEvent::Finished { index, .. } = ev {
                            finished.push(index)
                        }
                    },
                )
                .await;
            assert_eq!(names(&report.cases), ["case0", "case1", "case2", "case3", "case4"]);
            let verdicts: Vec<_> = report.cases.iter().map(|c| c.verdict).collect();
            assert_eq!(
                verdicts,
                [Verdict::AC, Verdict::WA, Verdict::AC, Verdict::TLE, Verdict::AC]
            );
            assert_eq!(finished.len(), plan.len());
            if jobs == 5 {
                assert_ne!(finished, [0, 1, 2, 3, 4], "completion order differs");
            }
        }
    }

    #[tokio::test]
    async fn stop_on_failure_skips_unstarted_cases() {
        let plan = [(0, "AC"), (10, "WA"), (100, "AC"), (0, "AC"), (0, "AC")];
        let report = CaseRunnerPool::new(2)
            .stop_on_failure(true)
            .run(Arc::new(FakeJudge), cases(&plan), &CancelToken::new(), |_| {})
            .await;
        // case2 was already running when case1 failed
        assert_eq!(names(&report.cases), ["case0", "case1", "case2"]);
        assert_eq!(report.skipped, ["case3", "case4"]);
        assert!(report.aborted.is_none());
        assert!(!report.all_accepted());
    }

    #[tokio::test]
    async fn single_worker_stops_right_after_a_failure() {
        let plan = [(0, "WA"), (0, "AC"), (0, "AC")];
        for _ in 0..20 {
            let report = CaseRunnerPool::new(1)
                .stop_on_failure(true)
                .run(Arc::new(FakeJudge), cases(&plan), &CancelToken::new(), |_| {})
                .await;
            assert_eq!(names(&report.cases), ["case0"]);
            assert_eq!(report.skipped, ["case1", "case2"]);
        }
    }

    #[tokio::test]
    async fn user_errors_are_isolated_to_the_case() {
        let plan = [(0, "AC"), (0, "LAUNCH"), (0, "AC")];
        let report = CaseRunnerPool::new(1)
            .run(Arc::new(FakeJudge), cases(&plan), &CancelToken::new(), |_| {})
            .await;
        assert_eq!(report.cases.len(), 3);
        assert_eq!(report.cases[1].verdict, Verdict::IE);
        assert!(report.aborted.is_none());
    }

    #[tokio::test]
    async fn environment_errors_abort_the_run() {
        let plan = [(0, "AC"), (0, "SPAWN"), (5000, "AC"), (0, "AC")];
        let start = std::time::Instant::now();
        let report = CaseRunnerPool::new(2)
            .run(Arc::new(FakeJudge), cases(&plan), &CancelToken::new(), |_| {})
            .await;
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(names(&report.cases), ["case0"]);
        assert_eq!(report.aborted.unwrap().kind, ErrorKind::Environment);
        assert_eq!(report.skipped, ["case1", "case2", "case3"]);
    }

    #[tokio::test]
    async fn cancellation_stops_in_flight_cases() {
        let cancel = CancelToken::new();
        let plan = [(5000, "AC"), (5000, "AC"), (0, "AC")];
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                CaseRunnerPool::new(2)
                    .run(Arc::new(FakeJudge), cases(&plan), &cancel, |_| {})
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        let report = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.aborted.unwrap().kind, ErrorKind::Cancelled);
        assert!(report.cases.is_empty());
    }
}
