use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
};

use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};

use super::{
    batch::termination_verdict,
    cancel::CancelToken,
    case::CaseFormat,
    checker::{describe, Checker, Matcher},
    command::CommandLine,
    error::Result,
    process::{ExecutionResult, Limits, ProcessRunner},
    report::Abort,
    verdict::Verdict,
};

/// What the candidate's output is checked against.
#[derive(Debug, Clone)]
pub enum Oracle {
    /// A trusted solution; its output is the expected side of `matcher`.
    Reference {
        command: CommandLine,
        matcher: Matcher,
    },
    /// A checker called without an expected output.
    Checker(Checker),
    /// Only crashes and limit violations count as divergences.
    None,
}

impl Oracle {
    fn describe(&self) -> String {
        match self {
            Self::Reference { command, .. } => command.to_string(),
            Self::Checker(c) => format!("checker {}", c.command()),
            Self::None => "none".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Divergence {
    pub seed: u64,
    #[serde(serialize_with = "lossy_utf8")]
    pub input: Vec<u8>,
    pub verdict: Verdict,
    pub detail: Option<String>,
    pub candidate: ExecutionResult,
    pub reference: Option<ExecutionResult>,
}

/// An iteration that could not be judged because the judging side failed.
#[derive(Debug, Clone, Serialize)]
pub struct IterationError {
    pub seed: u64,
    pub detail: String,
}

/// Everything one stress run found. Nothing is written to disk; see
/// [`materialize`].
#[derive(Debug, Clone, Serialize)]
pub struct StressSession {
    pub generator: String,
    pub candidate: String,
    pub oracle: String,
    pub base_seed: u64,
    pub iterations_requested: u64,
    pub iterations_run: u64,
    pub divergences: Vec<Divergence>,
    pub internal_errors: Vec<IterationError>,
    pub aborted: Option<Abort>,
}

impl StressSession {
    pub fn first_divergence(&self) -> Option<&Divergence> {
        self.divergences.first()
    }

    pub fn passed(&self) -> bool {
        self.divergences.is_empty() && self.internal_errors.is_empty() && self.aborted.is_none()
    }
}

/// Remembers digests of the first [`Self::LIMIT`] generated inputs to catch
/// generators that ignore their seed.
#[derive(Debug, Default)]
pub(crate) struct InputDigests<K> {
    seen: HashMap<[u8; 32], K>,
}

impl<K: Clone> InputDigests<K> {
    const LIMIT: usize = 1000;

    /// Returns the key of an earlier identical input.
    pub fn check(&mut self, input: &[u8], key: K) -> Option<K> {
        if self.seen.len() >= Self::LIMIT {
            return None;
        }
        let digest: [u8; 32] = Sha256::digest(input).into();
        log::trace!("input sha256 {}", hex::encode(digest));
        if let Some(prev) = self.seen.get(&digest) {
            return Some(prev.clone());
        }
        self.seen.insert(digest, key);
        if self.seen.len() == Self::LIMIT {
            log::info!(
                "Duplicate input detection is disabled from now on; the generator looks random enough"
            );
        }
        None
    }
}

#[derive(Debug, Clone)]
pub struct StressTester {
    generator: CommandLine,
    candidate: CommandLine,
    oracle: Oracle,
    limits: Limits,
    count: u64,
    max_input_bytes: usize,
    collect_all: bool,
}

impl StressTester {
    pub const DEFAULT_COUNT: u64 = 100;
    pub const DEFAULT_MAX_INPUT_BYTES: usize = 16 << 20;

    pub fn new(generator: CommandLine, candidate: CommandLine, oracle: Oracle) -> Self {
        Self {
            generator,
            candidate,
            oracle,
            limits: Limits::default(),
            count: Self::DEFAULT_COUNT,
            max_input_bytes: Self::DEFAULT_MAX_INPUT_BYTES,
            collect_all: false,
        }
    }

    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn count(mut self, count: u64) -> Self {
        self.count = count;
        self
    }

    pub fn max_input_bytes(mut self, bytes: usize) -> Self {
        self.max_input_bytes = bytes;
        self
    }

    /// Keep going after the first divergence.
    pub fn collect_all(mut self, yes: bool) -> Self {
        self.collect_all = yes;
        self
    }

    pub fn random_seed() -> u64 {
        rand::random::<u32>() as u64
    }

    /// Runs up to `count` iterations; iteration `i` feeds the generator the
    /// seed `base_seed + i`.
    ///
    /// `on_iteration` is called after every iteration with its seed and
    /// whether it diverged.
    pub async fn run(
        &self,
        base_seed: u64,
        cancel: &CancelToken,
        mut on_iteration: impl FnMut(u64, Option<&Divergence>),
    ) -> StressSession {
        log::info!("Stress testing with base seed {}", base_seed);
        let mut session = StressSession {
            generator: self.generator.to_string(),
            candidate: self.candidate.to_string(),
            oracle: self.oracle.describe(),
            base_seed,
            iterations_requested: self.count,
            iterations_run: 0,
            divergences: Vec::new(),
            internal_errors: Vec::new(),
            aborted: None,
        };
        let mut digests = InputDigests::default();

        for i in 0..self.count {
            let seed = base_seed.wrapping_add(i);
            let outcome = self.iterate(seed, &mut digests, cancel).await;
            session.iterations_run += 1;
            match outcome {
                Ok(Step::Agreed) => on_iteration(seed, None),
                Ok(Step::Diverged(d)) => {
                    log::info!("Divergence at seed {}: {}", seed, d.verdict);
                    on_iteration(seed, Some(&d));
                    session.divergences.push(d);
                    if !self.collect_all {
                        break;
                    }
                }
                Ok(Step::JudgeFailed(detail)) => {
                    log::warn!("Seed {}: {}", seed, detail);
                    on_iteration(seed, None);
                    session.internal_errors.push(IterationError { seed, detail });
                }
                Err(e) => {
                    session.iterations_run -= 1;
                    session.aborted = Some(Abort::from(&e));
                    break;
                }
            }
        }
        session
    }

    async fn iterate(
        &self,
        seed: u64,
        digests: &mut InputDigests<u64>,
        cancel: &CancelToken,
    ) -> Result<Step> {
        let gen_runner = ProcessRunner::new(Limits {
            memory_mb: None,
            ..self.limits.clone()
        });
        let gen = gen_runner
            .run(&self.generator.with_args([seed.to_string()]), b"", cancel)
            .await?;
        if !gen.success() {
            return Ok(Step::JudgeFailed(format!(
                "generator failed ({})",
                describe(gen.termination)
            )));
        }
        if gen.stdout.len() > self.max_input_bytes {
            return Ok(Step::JudgeFailed(format!(
                "generated input is {} bytes, more than {}",
                gen.stdout.len(),
                self.max_input_bytes
            )));
        }
        if let Some(prev) = digests.check(&gen.stdout, seed) {
            log::warn!(
                "Seed {} generated the same input as seed {}; the generator may ignore its seed",
                seed,
                prev
            );
        }
        let input = gen.stdout;

        let runner = ProcessRunner::new(self.limits.clone());
        let candidate = runner.run(&self.candidate, &input, cancel).await?;

        let reference = match &self.oracle {
            Oracle::Reference { command, .. } => {
                let r = runner.run(command, &input, cancel).await?;
                if !r.success() {
                    return Ok(Step::JudgeFailed(format!(
                        "reference failed ({})",
                        describe(r.termination)
                    )));
                }
                Some(r)
            }
            _ => None,
        };

        let diverged = |verdict, detail, candidate, reference| {
            Step::Diverged(Divergence {
                seed,
                input: input.clone(),
                verdict,
                detail,
                candidate,
                reference,
            })
        };

        if let Some((verdict, why)) = termination_verdict(candidate.termination) {
            return Ok(diverged(verdict, Some(why), candidate, reference));
        }
        let judgement = match &self.oracle {
            Oracle::Reference { matcher, .. } => {
                let expected = reference.as_ref().map(|r| r.stdout.as_slice());
                matcher.judge(&input, &candidate.stdout, expected, cancel).await?
            }
            Oracle::Checker(c) => c.check(&input, &candidate.stdout, None, cancel).await?,
            Oracle::None => return Ok(Step::Agreed),
        };
        match judgement.verdict {
            Verdict::AC => Ok(Step::Agreed),
            Verdict::IE => Ok(Step::JudgeFailed(
                judgement.detail.unwrap_or_else(|| "checker failed".to_owned()),
            )),
            v => Ok(diverged(v, judgement.detail, candidate, reference)),
        }
    }
}

enum Step {
    Agreed,
    Diverged(Divergence),
    JudgeFailed(String),
}

/// Files written for one divergence.
#[derive(Debug, Clone, Serialize)]
pub struct Materialized {
    pub name: String,
    pub input: PathBuf,
    pub expected: Option<PathBuf>,
    pub actual: PathBuf,
}

/// Writes a divergence as a regular case named `hack-<seed>` (or
/// `hack-<seed>-1`, `-2`, ... if taken) plus the candidate's output as
/// `.actual`.
///
/// A name is taken when any of its files exists. Nothing is left behind on
/// failure.
pub fn materialize(dir: &Path, format: &CaseFormat, d: &Divergence) -> Result<Materialized> {
    const ACTUAL_EXT: &str = "actual";
    fsutil::mkdir_all(dir)?;
    let base = format!("hack-{}", d.seed);
    let mut attempt = 0u32;
    loop {
        let name = match attempt {
            0 => base.clone(),
            n => format!("{}-{}", base, n),
        };
        attempt += 1;

        let taken = [CaseFormat::INPUT_EXT, CaseFormat::OUTPUT_EXT, "ans", ACTUAL_EXT]
            .iter()
            .any(|ext| format.path(dir, &name, ext).exists());
        if taken {
            continue;
        }

        let input = format.path(dir, &name, CaseFormat::INPUT_EXT);
        let expected = d
            .reference
            .as_ref()
            .map(|r| (format.path(dir, &name, CaseFormat::OUTPUT_EXT), &r.stdout));
        let actual = format.path(dir, &name, ACTUAL_EXT);

        let files = [
            Some((input.clone(), &d.input)),
            expected.clone(),
            Some((actual.clone(), &d.candidate.stdout)),
        ];
        let mut written = Vec::new();
        let mut failure = None;
        for (path, content) in files.into_iter().flatten() {
            match fsutil::write_new(&path, content) {
                Ok(()) => written.push(path),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        let Some(e) = failure else {
            log::info!("Saved a divergence to {}", input.display());
            return Ok(Materialized {
                name,
                input,
                expected: expected.map(|(path, _)| path),
                actual,
            });
        };

        for path in written {
            if let Err(e) = fsutil::remove_file(&path) {
                log::warn!("{}", e);
            }
        }
        // lost a race for this name
        if e.io_kind() != Some(io::ErrorKind::AlreadyExists) {
            return Err(e.into());
        }
    }
}

fn lossy_utf8<S: Serializer>(bytes: &[u8], s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&String::from_utf8_lossy(bytes))
}
