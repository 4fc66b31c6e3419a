use std::path::{Path, PathBuf};

use pjudge_core::action::{self, Output, QaOptions, StressPrograms};
use pjudge_core::testing::{CancelToken, StageKind, StageOutcome, Verdict};
use pjudge_core::Config;

const QUIET: Output = Output {
    json: true,
    print_input: false,
    print_memory: false,
};

struct Project {
    dir: tempfile::TempDir,
    cfg: Config,
}

impl Project {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = Config::from_toml(&Config::example_toml()).unwrap();
        let root = dir.path();
        cfg.test.case_dir = root.join("test");
        cfg.test.time_limit_ms = 500;
        cfg.test.jobs = 2;
        cfg.stress.hack_dir = root.join("test");
        cfg.qa.solution_dir = root.join("solution/accepted");
        cfg.qa.brute_force_dir = root.join("solution/brute_force");
        cfg.qa.generator = Some(root.join("generator/gen.sh"));
        cfg.qa.validator_dir = root.join("input_validators");
        Self { dir, cfg }
    }

    fn file(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(rel);
        fsutil::write_with_mkdir(&path, content).unwrap();
        path
    }

    fn case_dir(&self) -> &Path {
        &self.cfg.test.case_dir
    }
}

const ADD: &str = "read a b\necho $((a + b))\n";

// one past the input; the buggy one forgets the increment from 5 up
const GEN: &str = "echo $(($1 % 10))\n";
const REFERENCE: &str = "read n\necho $((n + 1))\n";
const BUGGY: &str = "read n\nif [ \"$n\" -ge 5 ]; then echo \"$n\"; else echo $((n + 1)); fi\n";

#[tokio::test]
async fn test_command_judges_every_case_in_order() {
    let p = Project::new();
    p.file("test/1.in", "1 2\n");
    p.file("test/1.out", "3\n");
    p.file("test/2.in", "5 5\n");
    p.file("test/2.out", "11\n");
    p.file("test/3.in", "0 0\n");
    p.file("test/3.out", "0\n");
    let src = p.file(
        "main.sh",
        "read a b\nif [ \"$a\" = 0 ]; then while :; do :; done; fi\necho $((a + b))\n",
    );

    let program = action::prepare_program(src, &p.cfg).await.unwrap();
    let report = action::do_test(&program, p.case_dir(), &p.cfg, QUIET, &CancelToken::new())
        .await
        .unwrap();

    let verdicts: Vec<_> = report.cases.iter().map(|c| (c.name.as_str(), c.verdict)).collect();
    assert_eq!(
        verdicts,
        [("1", Verdict::AC), ("2", Verdict::WA), ("3", Verdict::TLE)]
    );
    assert!(!report.all_accepted());
    assert!(report.aborted.is_none());
}

#[tokio::test]
async fn test_command_fails_without_cases() {
    let p = Project::new();
    let src = p.file("main.sh", ADD);
    let program = action::prepare_program(src, &p.cfg).await.unwrap();
    fsutil::mkdir_all(p.case_dir()).unwrap();
    let res = action::do_test(&program, p.case_dir(), &p.cfg, QUIET, &CancelToken::new()).await;
    assert!(res.is_err());
}

#[tokio::test]
async fn reactive_runs_once_without_cases() {
    let p = Project::new();
    let src = p.file("main.sh", "read n\necho $((n * 2))\n");
    let interactor = p.file(
        "interactor.sh",
        "echo 21\nread ans\n[ \"$ans\" = 42 ]\n",
    );
    let program = action::prepare_program(src, &p.cfg).await.unwrap();
    let interactor = action::prepare_program(interactor, &p.cfg).await.unwrap();

    let report = action::do_test_reactive(
        &program,
        &interactor,
        p.case_dir(),
        &p.cfg,
        QUIET,
        &CancelToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(report.cases.len(), 1);
    assert_eq!(report.cases[0].name, "interactive");
    assert_eq!(report.cases[0].verdict, Verdict::AC);
}

#[tokio::test]
async fn stress_divergence_becomes_a_failing_case() {
    let mut p = Project::new();
    p.cfg.stress.count = 20;
    let candidate = p.file("main.sh", BUGGY);
    let generator = p.file("gen.sh", GEN);
    let reference = p.file("ref.sh", REFERENCE);

    let candidate = action::prepare_program(candidate, &p.cfg).await.unwrap();
    let generator = action::prepare_program(generator, &p.cfg).await.unwrap();
    let reference = action::prepare_program(reference, &p.cfg).await.unwrap();

    let outcome = action::do_stress(
        StressPrograms {
            candidate: &candidate,
            generator: &generator,
            reference: Some(&reference),
        },
        &p.cfg,
        Some(0),
        true,
        QUIET,
        &CancelToken::new(),
    )
    .await
    .unwrap();

    assert!(!outcome.session.passed());
    assert_eq!(outcome.session.first_divergence().unwrap().seed, 5);
    assert_eq!(outcome.saved.len(), 1);
    assert_eq!(outcome.saved[0].name, "hack-5");

    let report = action::do_test(&candidate, p.case_dir(), &p.cfg, QUIET, &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(report.cases.len(), 1);
    assert_eq!(report.cases[0].name, "hack-5");
    assert_eq!(report.cases[0].verdict, Verdict::WA);

    let fixed = action::prepare_program(p.file("fixed.sh", REFERENCE), &p.cfg)
        .await
        .unwrap();
    let report = action::do_test(&fixed, p.case_dir(), &p.cfg, QUIET, &CancelToken::new())
        .await
        .unwrap();
    assert!(report.all_accepted());
}

#[tokio::test]
async fn generated_cases_feed_the_test_command() {
    let p = Project::new();
    let generator = action::prepare_program(p.file("gen.sh", "echo \"$1 $1\"\n"), &p.cfg)
        .await
        .unwrap();
    let reference = action::prepare_program(p.file("ref.sh", ADD), &p.cfg)
        .await
        .unwrap();

    let report = action::do_generate(
        &generator,
        Some(&reference),
        p.case_dir(),
        3,
        Some(10),
        &p.cfg,
        &CancelToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(report.written.len(), 3);
    assert!(report.failed.is_empty());
    assert_eq!(
        fsutil::read_to_string(p.case_dir().join("random-001.out")).unwrap(),
        "22\n"
    );

    let report = action::do_test(&reference, p.case_dir(), &p.cfg, QUIET, &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(report.cases.len(), 3);
    assert!(report.all_accepted());
}

#[tokio::test]
async fn qa_runs_all_stages_on_a_project_layout() {
    let p = Project::new();
    p.file("test/sample.in", "3\n");
    p.file("test/sample.out", "4\n");
    p.file("solution/accepted/sol.sh", REFERENCE);
    p.file("solution/brute_force/brute.sh", REFERENCE);
    p.file("generator/gen.sh", GEN);
    let validator = p.file("input_validators/range", "#!/bin/sh\nread n\n[ \"$n\" -lt 100 ]\n");
    make_executable(&validator);

    let report = action::do_qa(
        QaOptions {
            case_dir: p.case_dir().to_owned(),
            seed: Some(1),
            skip: Vec::new(),
        },
        &p.cfg,
        QUIET,
        &CancelToken::new(),
    )
    .await
    .unwrap();

    for kind in [StageKind::Validate, StageKind::Test, StageKind::Stress] {
        assert_eq!(
            report.stage(kind),
            Some(&StageOutcome::Passed),
            "{}",
            kind
        );
    }
    assert!(report.passed());
    assert!(report.hacks.is_empty());
}

#[tokio::test]
async fn qa_stops_after_invalid_input() {
    let mut p = Project::new();
    p.cfg.qa.generator = None;
    p.file("test/big.in", "1000\n");
    p.file("test/big.out", "1001\n");
    p.file("solution/accepted/sol.sh", REFERENCE);
    let validator = p.file("input_validators/range", "#!/bin/sh\nread n\n[ \"$n\" -lt 100 ]\n");
    make_executable(&validator);

    let report = action::do_qa(
        QaOptions {
            case_dir: p.case_dir().to_owned(),
            seed: Some(1),
            skip: Vec::new(),
        },
        &p.cfg,
        QUIET,
        &CancelToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(
        report.stage(StageKind::Validate),
        Some(&StageOutcome::Failed)
    );
    assert!(matches!(
        report.stage(StageKind::Test),
        Some(StageOutcome::Skipped(_))
    ));
    assert!(!report.passed());
}

#[cfg(unix)]
fn make_executable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}
