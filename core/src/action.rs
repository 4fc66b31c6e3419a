pub mod error {
    #[allow(unused_imports)]
    pub(crate) use anyhow::{anyhow, bail, ensure, Context as _};
    pub use anyhow::{Error, Result};
}
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use error::*;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use serde::Serialize;

use crate::config::Config;
use crate::program::{find_program_in, Program};
use crate::style;
use crate::testing::{
    discover_validators, materialize, run_qa, BatchJudge, CancelToken, CaseGenerator,
    CaseRepository, CaseRunnerPool, CommandLine, GenerationReport, InputValidator, Judge,
    JudgeReport, Matcher, Materialized, Oracle, PoolEvent, QaObserver, QaPlan, QaReport,
    ReactiveJudge, StageKind, StageReport, StressSession, StressTester, Testcase,
    ValidationReport, Verdict,
};

/// How results are shown.
#[derive(Debug, Clone, Copy, Default)]
pub struct Output {
    pub json: bool,
    pub print_input: bool,
    pub print_memory: bool,
}

impl Output {
    fn print_json(&self, value: &impl Serialize) -> Result<()> {
        let json = serde_json::to_string_pretty(value).context("Failed to serialize the report")?;
        println!("{}", json);
        Ok(())
    }
}

pub fn init_config(dir: impl AsRef<Path>) -> Result<PathBuf> {
    Config::init(dir).context("Failed to init pjudge config")
}

/// Resolves and compiles a program file.
pub async fn prepare_program(file: impl Into<PathBuf>, cfg: &Config) -> Result<Program> {
    let program = Program::resolve(file, cfg)?;
    program.prepare(&cfg.test).await?;
    Ok(program)
}

fn load_cases(cfg: &Config, dir: &Path) -> Result<CaseRepository> {
    let format = cfg.test.case_format()?;
    CaseRepository::load(dir, &format)
        .with_context(|| format!("Failed to load testcases from {:?}", dir))
}

fn pool(cfg: &Config) -> CaseRunnerPool {
    CaseRunnerPool::new(cfg.test.jobs).stop_on_failure(cfg.test.stop_on_failure)
}

pub async fn do_test(
    program: &Program,
    case_dir: &Path,
    cfg: &Config,
    out: Output,
    cancel: &CancelToken,
) -> Result<JudgeReport> {
    let repo = load_cases(cfg, case_dir)?;
    if repo.is_empty() {
        bail!("No testcases is saved in {}", case_dir.to_string_lossy());
    }

    let judge = BatchJudge::new(
        program.command_line(),
        cfg.test.limits(),
        cfg.test.matcher(),
    );
    log::info!("Running: {}", judge.solution());
    log::debug!("Judging with {}", judge.matcher().describe());

    let cases = repo.into_cases();
    let report = run_cases(Arc::new(judge), &cases, &pool(cfg), out, cancel).await;
    finish_report(&report, &cases, out)?;
    Ok(report)
}

pub async fn do_test_reactive(
    program: &Program,
    interactor: &Program,
    case_dir: &Path,
    cfg: &Config,
    out: Output,
    cancel: &CancelToken,
) -> Result<JudgeReport> {
    let cases = if case_dir.is_dir() {
        load_cases(cfg, case_dir)?.into_cases()
    } else {
        Vec::new()
    };
    let cases = if cases.is_empty() {
        log::info!("No testcases found; running once with an empty input");
        vec![Testcase::new("interactive", Vec::new(), None::<Vec<u8>>)]
    } else {
        cases
    };

    let judge = ReactiveJudge::new(
        program.command_line(),
        interactor.command_line(),
        cfg.test.limits(),
    );
    log::info!("Running: {}", program.command_line());
    log::info!("Interactor: {}", interactor.command_line());

    let report = run_cases(Arc::new(judge), &cases, &pool(cfg), out, cancel).await;
    finish_report(&report, &cases, out)?;
    Ok(report)
}

fn finish_report(report: &JudgeReport, cases: &[Testcase], out: Output) -> Result<()> {
    if out.json {
        return out.print_json(report);
    }
    println!();
    for res in report.failed() {
        let case = cases.iter().find(|c| c.name == res.name);
        style::print_case_detail(res, case, out.print_input);
    }
    style::print_report_summary(report);
    Ok(())
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Runs `cases` through the pool with one spinner per case.
pub async fn run_cases(
    judge: Arc<dyn Judge>,
    cases: &[Testcase],
    pool: &CaseRunnerPool,
    out: Output,
    cancel: &CancelToken,
) -> JudgeReport {
    let container = MultiProgress::new();
    if out.json {
        container.set_draw_target(ProgressDrawTarget::hidden());
    }
    let bars: Vec<_> = cases
        .iter()
        .map(|t| {
            container
                .add(ProgressBar::new(100))
                .with_style(bar_style())
                .with_message(format!("Testcase {} ...", t.name))
        })
        .collect();

    let report = pool
        .run(judge, cases.to_vec(), cancel, |ev| match ev {
            PoolEvent::Started { index, .. } => {
                bars[index].enable_steady_tick(Duration::from_millis(50));
            }
            PoolEvent::Finished { index, result } => {
                bars[index].finish_with_message(
                    style::case_line(result, out.print_memory).cyan().to_string(),
                );
            }
        })
        .await;

    for (bar, case) in bars.iter().zip(cases) {
        if !bar.is_finished() {
            bar.finish_with_message(format!("Testcase {} ... {}", case.name, "skipped".dimmed()));
        }
    }
    report
}

/// Outcome of `do_stress`, with the files written for its divergences.
#[derive(Debug, Serialize)]
pub struct StressOutcome {
    pub session: StressSession,
    pub saved: Vec<Materialized>,
}

pub struct StressPrograms<'a> {
    pub candidate: &'a Program,
    pub generator: &'a Program,
    pub reference: Option<&'a Program>,
}

pub async fn do_stress(
    programs: StressPrograms<'_>,
    cfg: &Config,
    seed: Option<u64>,
    save: bool,
    out: Output,
    cancel: &CancelToken,
) -> Result<StressOutcome> {
    let oracle = match (programs.reference, &cfg.test.compare.checker) {
        (Some(reference), _) => Oracle::Reference {
            command: reference.command_line(),
            matcher: cfg.test.matcher(),
        },
        (None, Some(_)) => match cfg.test.matcher() {
            Matcher::Checker(c) => Oracle::Checker(c),
            Matcher::Text(_) => Oracle::None,
        },
        (None, None) => {
            log::warn!("No reference or checker; only crashes and limit violations are detected");
            Oracle::None
        }
    };
    let tester = StressTester::new(
        programs.generator.command_line(),
        programs.candidate.command_line(),
        oracle,
    )
    .limits(cfg.test.limits())
    .count(cfg.stress.count)
    .max_input_bytes(cfg.stress.max_input_bytes)
    .collect_all(cfg.stress.collect_all);

    let bar = ProgressBar::new(cfg.stress.count).with_style(
        ProgressStyle::default_bar()
            .template("{spinner} [{pos}/{len}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    if out.json {
        bar.set_draw_target(ProgressDrawTarget::hidden());
    }
    bar.enable_steady_tick(Duration::from_millis(50));

    let base_seed = seed.unwrap_or_else(StressTester::random_seed);
    let session = tester
        .run(base_seed, cancel, |seed, d| {
            bar.inc(1);
            bar.set_message(format!("seed {}", seed));
            if let Some(d) = d {
                bar.println(format!("seed {} ... {}", seed, style::judge_icon(d.verdict)));
            }
        })
        .await;
    bar.finish_and_clear();

    let mut saved = Vec::new();
    if save && session.aborted.is_none() {
        let format = cfg.test.case_format()?;
        for d in &session.divergences {
            let m = materialize(&cfg.stress.hack_dir, &format, d)
                .context("Failed to save a divergence")?;
            saved.push(m);
        }
    }

    let outcome = StressOutcome { session, saved };
    if out.json {
        out.print_json(&outcome)?;
        return Ok(outcome);
    }
    for d in &outcome.session.divergences {
        style::print_divergence(d);
    }
    for e in &outcome.session.internal_errors {
        println!("{} seed {}: {}", style::judge_icon(Verdict::IE), e.seed, e.detail);
    }
    for m in &outcome.saved {
        println!("{} {}", "Saved".cyan(), m.input.display());
    }
    style::print_stress_summary(&outcome.session);
    Ok(outcome)
}

pub async fn do_generate(
    generator: &Program,
    reference: Option<&Program>,
    case_dir: &Path,
    count: usize,
    seed: Option<u64>,
    cfg: &Config,
    cancel: &CancelToken,
) -> Result<GenerationReport> {
    let format = cfg.test.case_format()?;
    let report = CaseGenerator::new(generator.command_line(), cfg.test.limits())
        .reference(reference.map(Program::command_line))
        .run(
            case_dir,
            &format,
            count,
            seed.unwrap_or_else(StressTester::random_seed),
            cancel,
        )
        .await
        .context("Failed to generate testcases")?;
    style::print_generation_report(&report);
    Ok(report)
}

pub async fn do_validate(
    validators: Vec<CommandLine>,
    case_dir: &Path,
    cfg: &Config,
    cancel: &CancelToken,
) -> Result<ValidationReport> {
    ensure!(!validators.is_empty(), "No validators found");
    let repo = load_cases(cfg, case_dir)?;
    let report = InputValidator::new(validators, cfg.test.limits())
        .run(repo.cases(), cancel, |r| {
            if r.valid {
                log::info!("[SUCCESS] {} is valid", r.case);
            }
        })
        .await;
    style::print_validation_report(&report);
    Ok(report)
}

/// Validators named on the command line, or the executables of
/// `qa.validator_dir`.
pub fn find_validators(given: &[PathBuf], cfg: &Config) -> Result<Vec<CommandLine>> {
    if !given.is_empty() {
        return given
            .iter()
            .map(|p| Program::resolve(p, cfg).map(|prog| prog.command_line()))
            .collect();
    }
    if !cfg.qa.validator_dir.is_dir() {
        return Ok(Vec::new());
    }
    discover_validators(&cfg.qa.validator_dir)
        .with_context(|| format!("Failed to list validators in {:?}", cfg.qa.validator_dir))
}

struct QaProgress {
    out: Output,
}

impl QaObserver for QaProgress {
    fn stage_started(&mut self, kind: StageKind) {
        if !self.out.json {
            println!("\n{}", format!("== {} ==", kind).bold());
        }
    }

    fn stage_finished(&mut self, report: &StageReport) {
        log::debug!("{} finished", report.kind);
    }

    fn case_event(&mut self, event: PoolEvent<'_>) {
        if let (false, PoolEvent::Finished { result, .. }) = (self.out.json, event) {
            println!("{}", style::case_line(result, self.out.print_memory));
        }
    }

    fn stress_iteration(&mut self, seed: u64, diverged: bool) {
        if diverged && !self.out.json {
            println!("seed {} ... {}", seed, "diverged".bright_red());
        }
    }
}

pub struct QaOptions {
    pub case_dir: PathBuf,
    pub seed: Option<u64>,
    pub skip: Vec<StageKind>,
}

pub async fn do_qa(
    opts: QaOptions,
    cfg: &Config,
    out: Output,
    cancel: &CancelToken,
) -> Result<QaReport> {
    let solution_file = find_program_in(&cfg.qa.solution_dir, cfg)?
        .with_context(|| format!("No solution found in {:?}", cfg.qa.solution_dir))?;
    let solution = prepare_program(solution_file, cfg).await?;

    let brute_force = match find_program_in(&cfg.qa.brute_force_dir, cfg)? {
        Some(file) => Some(prepare_program(file, cfg).await?),
        None => None,
    };
    let generator = match cfg.qa.generator.as_ref().filter(|p| p.is_file()) {
        Some(file) => Some(prepare_program(file, cfg).await?),
        None => None,
    };

    let plan = QaPlan {
        case_dir: opts.case_dir,
        format: cfg.test.case_format()?,
        validators: find_validators(&[], cfg)?,
        solution: solution.command_line(),
        brute_force: brute_force.as_ref().map(Program::command_line),
        generator: generator.as_ref().map(Program::command_line),
        limits: cfg.test.limits(),
        matcher: cfg.test.matcher(),
        jobs: cfg.test.jobs,
        stress_count: cfg.qa.stress_count,
        max_input_bytes: cfg.stress.max_input_bytes,
        seed: opts.seed.unwrap_or_else(StressTester::random_seed),
        hack_dir: cfg.stress.hack_dir.clone(),
        skip: opts.skip,
    };

    let report = run_qa(&plan, cancel, &mut QaProgress { out })
        .await
        .context("Failed to run quality assurance")?;

    if out.json {
        out.print_json(&report)?;
    } else {
        if let Some(test) = &report.test {
            for res in test.failed() {
                style::print_case_detail(res, None, false);
            }
        }
        if let Some(stress) = &report.stress {
            if let Some(d) = stress.first_divergence() {
                style::print_divergence(d);
            }
        }
        style::print_qa_report(&report);
    }
    Ok(report)
}
