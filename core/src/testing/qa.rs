use std::{path::PathBuf, sync::Arc};

use serde::Serialize;

use super::{
    batch::BatchJudge,
    cancel::CancelToken,
    case::{CaseFormat, CaseRepository},
    checker::Matcher,
    command::CommandLine,
    error::Result,
    pool::{CaseRunnerPool, PoolEvent},
    process::Limits,
    report::JudgeReport,
    stress::{materialize, IterationError, Materialized, Oracle, StressSession, StressTester},
    validator::{InputValidator, ValidationReport},
};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumIter, Serialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Validate,
    Test,
    Stress,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum StageOutcome {
    Passed,
    Failed,
    Skipped(String),
    Aborted(String),
}

impl StageOutcome {
    /// Whether later stages may run.
    pub fn allows_next(&self) -> bool {
        matches!(self, Self::Passed | Self::Skipped(_))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub kind: StageKind,
    pub outcome: StageOutcome,
}

/// Inputs of one QA run. The solution is the trusted one; the brute force is
/// a slow but obviously correct alternative used as the stress oracle.
#[derive(Debug, Clone)]
pub struct QaPlan {
    pub case_dir: PathBuf,
    pub format: CaseFormat,
    pub validators: Vec<CommandLine>,
    pub solution: CommandLine,
    pub brute_force: Option<CommandLine>,
    pub generator: Option<CommandLine>,
    pub limits: Limits,
    pub matcher: Matcher,
    pub jobs: usize,
    pub stress_count: u64,
    pub max_input_bytes: usize,
    pub seed: u64,
    pub hack_dir: PathBuf,
    pub skip: Vec<StageKind>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QaReport {
    pub stages: Vec<StageReport>,
    pub validation: Option<ValidationReport>,
    pub test: Option<JudgeReport>,
    pub stress: Option<StressSession>,
    pub hacks: Vec<Materialized>,
    /// Divergences that could not be written to `hack_dir`.
    pub unsaved_hacks: Vec<IterationError>,
}

impl QaReport {
    pub fn passed(&self) -> bool {
        self.stages.iter().all(|s| s.outcome.allows_next())
    }

    pub fn stage(&self, kind: StageKind) -> Option<&StageOutcome> {
        self.stages.iter().find(|s| s.kind == kind).map(|s| &s.outcome)
    }
}

/// Per-stage progress callbacks.
pub trait QaObserver {
    fn stage_started(&mut self, _kind: StageKind) {}
    fn stage_finished(&mut self, _report: &StageReport) {}
    fn case_event(&mut self, _event: PoolEvent<'_>) {}
    fn stress_iteration(&mut self, _seed: u64, _diverged: bool) {}
}

impl QaObserver for () {}

/// Runs validate, test and stress in order. A stage runs only when every
/// earlier stage passed or was skipped.
///
/// `Err` means the pipeline could not start: the case directory is locked by
/// another run or its cases cannot be loaded.
pub async fn run_qa(
    plan: &QaPlan,
    cancel: &CancelToken,
    observer: &mut impl QaObserver,
) -> Result<QaReport> {
    let _lock = fsutil::DirLock::acquire(&plan.case_dir)?;
    let repo = CaseRepository::load(&plan.case_dir, &plan.format)?;

    let mut report = QaReport {
        stages: Vec::new(),
        validation: None,
        test: None,
        stress: None,
        hacks: Vec::new(),
        unsaved_hacks: Vec::new(),
    };
    let mut blocked = false;

    // validate
    let kind = StageKind::Validate;
    if let Some(reason) = skip_reason(plan, kind, blocked) {
        finish(&mut report, observer, kind, StageOutcome::Skipped(reason));
    } else if plan.validators.is_empty() {
        finish(&mut report, observer, kind, StageOutcome::Skipped("no validators".into()));
    } else {
        observer.stage_started(kind);
        let validation = InputValidator::new(plan.validators.clone(), plan.limits.clone())
            .run(repo.cases(), cancel, |_| {})
            .await;
        let outcome = match &validation.aborted {
            Some(a) => StageOutcome::Aborted(a.reason.clone()),
            None if validation.all_valid() => StageOutcome::Passed,
            None => StageOutcome::Failed,
        };
        blocked |= !outcome.allows_next();
        report.validation = Some(validation);
        finish(&mut report, observer, kind, outcome);
    }

    // test
    let kind = StageKind::Test;
    let with_expected: Vec<_> = repo
        .iter()
        .filter(|c| c.expected.is_some())
        .cloned()
        .collect();
    if let Some(reason) = skip_reason(plan, kind, blocked) {
        finish(&mut report, observer, kind, StageOutcome::Skipped(reason));
    } else if with_expected.is_empty() {
        finish(
            &mut report,
            observer,
            kind,
            StageOutcome::Skipped("no cases with expected output".into()),
        );
    } else {
        observer.stage_started(kind);
        let judge = BatchJudge::new(
            plan.solution.clone(),
            plan.limits.clone(),
            plan.matcher.clone(),
        );
        let judged = CaseRunnerPool::new(plan.jobs)
            .run(Arc::new(judge), with_expected, cancel, |ev| {
                observer.case_event(ev)
            })
            .await;
        let outcome = match &judged.aborted {
            Some(a) => StageOutcome::Aborted(a.reason.clone()),
            None if judged.all_accepted() => StageOutcome::Passed,
            None => StageOutcome::Failed,
        };
        blocked |= !outcome.allows_next();
        report.test = Some(judged);
        finish(&mut report, observer, kind, outcome);
    }

    // stress
    let kind = StageKind::Stress;
    if let Some(reason) = skip_reason(plan, kind, blocked) {
        finish(&mut report, observer, kind, StageOutcome::Skipped(reason));
    } else if let (Some(brute_force), Some(generator)) = (&plan.brute_force, &plan.generator) {
        observer.stage_started(kind);
        let tester = StressTester::new(
            generator.clone(),
            plan.solution.clone(),
            Oracle::Reference {
                command: brute_force.clone(),
                matcher: plan.matcher.clone(),
            },
        )
        .limits(plan.limits.clone())
        .count(plan.stress_count)
        .max_input_bytes(plan.max_input_bytes)
        .collect_all(true);
        let session = tester
            .run(plan.seed, cancel, |seed, d| {
                observer.stress_iteration(seed, d.is_some())
            })
            .await;
        let outcome = match &session.aborted {
            Some(a) => StageOutcome::Aborted(a.reason.clone()),
            None if session.passed() => StageOutcome::Passed,
            None => StageOutcome::Failed,
        };
        if session.aborted.is_none() {
            for d in &session.divergences {
                match materialize(&plan.hack_dir, &plan.format, d) {
                    Ok(m) => report.hacks.push(m),
                    Err(e) => {
                        log::warn!("Cannot save the divergence at seed {}: {}", d.seed, e);
                        report.unsaved_hacks.push(IterationError {
                            seed: d.seed,
                            detail: e.to_string(),
                        });
                    }
                }
            }
        }
        report.stress = Some(session);
        finish(&mut report, observer, kind, outcome);
    } else {
        finish(
            &mut report,
            observer,
            kind,
            StageOutcome::Skipped("no brute force or generator".into()),
        );
    }

    Ok(report)
}

fn finish(
    report: &mut QaReport,
    observer: &mut impl QaObserver,
    kind: StageKind,
    outcome: StageOutcome,
) {
    log::info!("QA stage {}: {:?}", kind, outcome);
    let stage = StageReport { kind, outcome };
    observer.stage_finished(&stage);
    report.stages.push(stage);
}

fn skip_reason(plan: &QaPlan, kind: StageKind, blocked: bool) -> Option<String> {
    if plan.skip.contains(&kind) {
        Some("skipped by request".to_owned())
    } else if blocked {
        Some("an earlier stage did not pass".to_owned())
    } else {
        None
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;

    const SOLUTION: &str = "awk 'NR==2 { print $1 + 1 }'";
    const BUGGY: &str = "awk 'NR==2 { if ($1 >= 5) print $1; else print $1 + 1 }'";

    fn plan(dir: &std::path::Path, solution: &str) -> QaPlan {
        QaPlan {
            case_dir: dir.join("cases"),
            format: CaseFormat::parse(CaseFormat::DEFAULT).unwrap(),
            validators: vec![CommandLine::sh("read t; read n; [ \"$n\" -ge 0 ]")],
            solution: CommandLine::sh(solution),
            brute_force: Some(CommandLine::sh(SOLUTION)),
            generator: Some(CommandLine::sh(r#"sh -c 'echo 1; echo $(($1 % 10))' gen"#)),
            limits: Limits::default().time(Duration::from_secs(2)),
            matcher: Matcher::default(),
            jobs: 2,
            stress_count: 10,
            max_input_bytes: 1 << 20,
            seed: 0,
            hack_dir: dir.join("hacks"),
            skip: Vec::new(),
        }
    }

    fn write_case(dir: &std::path::Path, name: &str, input: &str, output: &str) {
        fsutil::write_with_mkdir(dir.join(format!("cases/{}.in", name)), input).unwrap();
        fsutil::write_with_mkdir(dir.join(format!("cases/{}.out", name)), output).unwrap();
    }

    #[tokio::test]
    async fn all_stages_pass() {
        let dir = tempfile::tempdir().unwrap();
        write_case(dir.path(), "1", "1\n3\n", "4\n");
        let report = run_qa(&plan(dir.path(), SOLUTION), &CancelToken::new(), &mut ())
            .await
            .unwrap();
        assert!(report.passed(), "{:?}", report.stages);
        assert_eq!(report.stress.unwrap().iterations_run, 10);
        assert!(report.hacks.is_empty());
    }

    #[tokio::test]
    async fn stress_divergences_are_saved_after_the_stage() {
        let dir = tempfile::tempdir().unwrap();
        write_case(dir.path(), "1", "1\n3\n", "4\n");
        let report = run_qa(&plan(dir.path(), BUGGY), &CancelToken::new(), &mut ())
            .await
            .unwrap();
        assert_eq!(report.stage(StageKind::Test), Some(&StageOutcome::Passed));
        assert_eq!(report.stage(StageKind::Stress), Some(&StageOutcome::Failed));
        let names: Vec<_> = report.hacks.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, ["hack-5", "hack-6", "hack-7", "hack-8", "hack-9"]);
        assert!(dir.path().join("hacks/hack-5.in").exists());
    }

    #[tokio::test]
    async fn unsavable_divergences_keep_the_report() {
        let dir = tempfile::tempdir().unwrap();
        write_case(dir.path(), "1", "1\n3\n", "4\n");
        // a file where the hack directory should be
        fsutil::write_with_mkdir(dir.path().join("hacks"), "").unwrap();
        let report = run_qa(&plan(dir.path(), BUGGY), &CancelToken::new(), &mut ())
            .await
            .unwrap();
        assert_eq!(report.stage(StageKind::Stress), Some(&StageOutcome::Failed));
        assert!(report.hacks.is_empty());
        let seeds: Vec<_> = report.unsaved_hacks.iter().map(|h| h.seed).collect();
        assert_eq!(seeds, [5, 6, 7, 8, 9]);
        assert_eq!(report.stress.unwrap().divergences.len(), 5);
    }

    #[tokio::test]
    async fn failed_stage_blocks_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        write_case(dir.path(), "1", "1\n-3\n", "-2\n");
        let report = run_qa(&plan(dir.path(), SOLUTION), &CancelToken::new(), &mut ())
            .await
            .unwrap();
        assert_eq!(report.stage(StageKind::Validate), Some(&StageOutcome::Failed));
        assert!(matches!(
            report.stage(StageKind::Test),
            Some(StageOutcome::Skipped(_))
        ));
        assert!(matches!(
            report.stage(StageKind::Stress),
            Some(StageOutcome::Skipped(_))
        ));
        assert!(!report.passed());
        assert!(!dir.path().join("hacks").exists());
    }

    #[tokio::test]
    async fn missing_prerequisites_are_skips() {
        let dir = tempfile::tempdir().unwrap();
        write_case(dir.path(), "1", "1\n3\n", "4\n");
        let mut plan = plan(dir.path(), SOLUTION);
        plan.validators.clear();
        plan.brute_force = None;
        plan.skip.push(StageKind::Test);
        let report = run_qa(&plan, &CancelToken::new(), &mut ()).await.unwrap();
        assert!(report.passed());
        assert!(report
            .stages
            .iter()
            .all(|s| matches!(s.outcome, StageOutcome::Skipped(_))));
    }

    #[tokio::test]
    async fn locked_case_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_case(dir.path(), "1", "1\n3\n", "4\n");
        let _held = fsutil::DirLock::acquire(dir.path().join("cases")).unwrap();
        let err = run_qa(&plan(dir.path(), SOLUTION), &CancelToken::new(), &mut ())
            .await
            .unwrap_err();
        assert!(!err.is_fatal(), "{}", err);
    }
}
