use std::path::{Path, PathBuf};

use serde::Serialize;

use super::{
    cancel::CancelToken,
    case::CaseFormat,
    checker::describe,
    command::CommandLine,
    error::Result,
    process::{Limits, ProcessRunner},
    stress::InputDigests,
};

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedCase {
    pub name: String,
    pub input: PathBuf,
    pub expected: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationFailure {
    pub name: String,
    pub detail: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GenerationReport {
    pub written: Vec<GeneratedCase>,
    pub failed: Vec<GenerationFailure>,
}

/// Fills a case directory with generated inputs, optionally paired with the
/// outputs of a reference solution.
#[derive(Debug, Clone)]
pub struct CaseGenerator {
    generator: CommandLine,
    reference: Option<CommandLine>,
    runner: ProcessRunner,
    basename: String,
    width: usize,
}

impl CaseGenerator {
    pub const DEFAULT_BASENAME: &str = "random";
    pub const DEFAULT_WIDTH: usize = 3;

    pub fn new(generator: CommandLine, limits: Limits) -> Self {
        Self {
            generator,
            reference: None,
            runner: ProcessRunner::new(limits),
            basename: Self::DEFAULT_BASENAME.to_owned(),
            width: Self::DEFAULT_WIDTH,
        }
    }

    pub fn reference(mut self, reference: Option<CommandLine>) -> Self {
        self.reference = reference;
        self
    }

    pub fn basename(mut self, basename: impl Into<String>) -> Self {
        self.basename = basename.into();
        self
    }

    pub fn width(mut self, width: usize) -> Self {
        self.width = width;
        self
    }

    /// Picks `count` names `<basename>-<index>` whose files do not exist yet.
    fn fresh_names(&self, dir: &Path, format: &CaseFormat, count: usize) -> Vec<String> {
        (0..)
            .map(|i| format!("{}-{:0width$}", self.basename, i, width = self.width))
            .filter(|name| {
                !format.path(dir, name, CaseFormat::INPUT_EXT).exists()
                    && !format.path(dir, name, CaseFormat::OUTPUT_EXT).exists()
            })
            .take(count)
            .collect()
    }

    /// Generates `count` cases into `dir`. The generator of the `i`-th case
    /// receives `base_seed + i` as its only argument.
    ///
    /// A failed generator or reference run is recorded and its case skipped.
    pub async fn run(
        &self,
        dir: &Path,
        format: &CaseFormat,
        count: usize,
        base_seed: u64,
        cancel: &CancelToken,
    ) -> Result<GenerationReport> {
        fsutil::mkdir_all(dir)?;
        let mut report = GenerationReport::default();
        let mut digests = InputDigests::default();

        for (i, name) in self.fresh_names(dir, format, count).into_iter().enumerate() {
            let seed = base_seed.wrapping_add(i as u64);
            let fail = |report: &mut GenerationReport, detail: String| {
                log::warn!("{}: {}", name, detail);
                report.failed.push(GenerationFailure {
                    name: name.clone(),
                    detail,
                });
            };

            let gen = self
                .runner
                .run(&self.generator.with_args([seed.to_string()]), b"", cancel)
                .await?;
            if !gen.success() {
                fail(&mut report, format!("generator failed ({})", describe(gen.termination)));
                continue;
            }
            if let Some(prev) = digests.check(&gen.stdout, name.clone()) {
                log::warn!(
                    "The same input is already generated at {}. Please use a random input generator.",
                    prev
                );
            }

            let output = match &self.reference {
                Some(reference) => {
                    let out = self.runner.run(reference, &gen.stdout, cancel).await?;
                    if !out.success() {
                        fail(&mut report, format!("reference failed ({})", describe(out.termination)));
                        continue;
                    }
                    Some(out.stdout)
                }
                None => None,
            };

            let input = format.path(dir, &name, CaseFormat::INPUT_EXT);
            fsutil::write_new(&input, &gen.stdout)?;
            let expected = match output {
                Some(out) => {
                    let path = format.path(dir, &name, CaseFormat::OUTPUT_EXT);
                    fsutil::write_new(&path, out)?;
                    Some(path)
                }
                None => None,
            };
            log::info!("Generated {}", input.display());
            report.written.push(GeneratedCase {
                name,
                input,
                expected,
            });
        }
        Ok(report)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::CaseRepository;

    fn format() -> CaseFormat {
        CaseFormat::parse(CaseFormat::DEFAULT).unwrap()
    }

    #[tokio::test]
    async fn writes_numbered_cases_with_outputs() {
        let dir = tempfile::tempdir().unwrap();
        fsutil::write_with_mkdir(dir.path().join("random-001.in"), "taken\n").unwrap();

        let report = CaseGenerator::new(
            CommandLine::sh(r#"sh -c 'echo $1' gen"#),
            Limits::default(),
        )
        .reference(Some(CommandLine::sh("awk '{ print $1 * 2 }'")))
        .run(dir.path(), &format(), 2, 10, &CancelToken::new())
        .await
        .unwrap();

        let names: Vec<_> = report.written.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["random-000", "random-002"]);
        assert!(report.failed.is_empty());

        let repo = CaseRepository::load(dir.path(), &format()).unwrap();
        let case = repo.get("random-002").unwrap();
        assert_eq!(case.input, b"11\n");
        assert_eq!(case.expected.as_deref(), Some(&b"22\n"[..]));
        assert_eq!(repo.get("random-001").unwrap().input, b"taken\n");
    }

    #[tokio::test]
    async fn failed_runs_are_reported_and_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let report = CaseGenerator::new(
            CommandLine::sh(r#"sh -c '[ $(($1 % 2)) = 0 ] || exit 3; echo $1' gen"#),
            Limits::default(),
        )
        .basename("gen")
        .width(2)
        .run(dir.path(), &format(), 3, 0, &CancelToken::new())
        .await
        .unwrap();

        let written: Vec<_> = report.written.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(written, ["gen-00", "gen-02"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].name, "gen-01");
        assert_eq!(report.failed[0].detail, "generator failed (exit code 3)");
        assert!(!dir.path().join("gen-01.in").exists());
        assert!(report.written[0].expected.is_none());
    }
}
