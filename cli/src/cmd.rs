pub mod generate;
pub mod init;
pub mod qa;
pub mod stress;
pub mod test;
pub mod test_reactive;
pub mod validate;

use std::path::PathBuf;

use pjudge_core::{action::Output, config::CompareModeName, testing::CancelToken};

#[derive(Debug, clap::Parser)]
#[command(author, version, about, long_about = None)]
pub struct GlobalArgs {
    #[command(subcommand)]
    pub subcmd: Subcommand,

    /// Config file to use instead of searching for pjudge.toml
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Debug, clap::Subcommand)]
pub enum Subcommand {
    Init(init::Args),

    #[command(alias("t"))]
    Test(test::Args),

    #[command(alias("tr"))]
    TestReactive(test_reactive::Args),

    #[command(alias("s"))]
    Stress(stress::Args),

    #[command(alias("g"))]
    Generate(generate::Args),

    #[command(alias("v"))]
    Validate(validate::Args),

    Qa(qa::Args),
}

/// `Ok(false)`: everything ran, but some check did not pass.
pub type SubcmdResult = anyhow::Result<bool>;

impl GlobalArgs {
    pub fn log_level(&self) -> log::LevelFilter {
        match (self.verbose, self.quiet) {
            (true, _) => log::LevelFilter::Debug,
            (_, true) => log::LevelFilter::Warn,
            _ => log::LevelFilter::Info,
        }
    }

    pub async fn exec_subcmd(&self, cancel: &CancelToken) -> SubcmdResult {
        use Subcommand::*;
        match &self.subcmd {
            Init(args) => init::exec(args, self),
            Test(args) => test::exec(args, self, cancel).await,
            TestReactive(args) => test_reactive::exec(args, self, cancel).await,
            Stress(args) => stress::exec(args, self, cancel).await,
            Generate(args) => generate::exec(args, self, cancel).await,
            Validate(args) => validate::exec(args, self, cancel).await,
            Qa(args) => qa::exec(args, self, cancel).await,
        }
    }
}

/// Flags overriding the `[test]` section.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct JudgeArgs {
    /// Directory of testcases
    #[arg(short = 'd', long)]
    pub case_dir: Option<PathBuf>,

    /// Case file name format, e.g. "%s.%e"
    #[arg(short = 'f', long)]
    pub format: Option<String>,

    /// Time limit in milliseconds
    #[arg(long, value_name = "MS")]
    pub tle: Option<u64>,

    /// Memory limit in megabytes
    #[arg(long, value_name = "MB")]
    pub mle: Option<u64>,

    /// Parallel jobs (0 = one per core)
    #[arg(short, long)]
    pub jobs: Option<usize>,

    #[arg(short = 'm', long, value_enum)]
    pub compare_mode: Option<ArgCompareMode>,

    /// Tolerance of the float comparison
    #[arg(long)]
    pub tolerance: Option<f64>,

    /// Checker command, called as `<checker> <input> <actual> <expected>`
    #[arg(long)]
    pub checker: Option<String>,

    /// Do not run the compile command
    #[arg(long)]
    pub no_compile: bool,

    /// Skip cases not started yet after the first failure
    #[arg(short = 'x', long)]
    pub stop_on_failure: bool,
}

#[derive(Debug, Clone, Copy, Default, clap::Args)]
pub struct OutputArgs {
    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,

    /// Show the input of failed cases
    #[arg(long)]
    pub print_input: bool,

    /// Always show peak memory
    #[arg(long)]
    pub print_memory: bool,
}

impl From<OutputArgs> for Output {
    fn from(a: OutputArgs) -> Self {
        Output {
            json: a.json,
            print_input: a.print_input,
            print_memory: a.print_memory,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ArgCompareMode {
    Exact,
    IgnoreSpaces,
    IgnoreSpacesAndNewlines,
    Float,
}

impl From<ArgCompareMode> for CompareModeName {
    fn from(value: ArgCompareMode) -> Self {
        use ArgCompareMode::*;
        match value {
            Exact => CompareModeName::Exact,
            IgnoreSpaces => CompareModeName::IgnoreSpaces,
            IgnoreSpacesAndNewlines => CompareModeName::IgnoreSpacesAndNewlines,
            Float => CompareModeName::Float,
        }
    }
}
