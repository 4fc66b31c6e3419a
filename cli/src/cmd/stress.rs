use std::path::PathBuf;

use pjudge_core::{
    action::{self, StressPrograms},
    program::determine_program_file,
    testing::CancelToken,
};

use crate::config;

use super::{GlobalArgs, JudgeArgs, OutputArgs, SubcmdResult};

#[derive(Debug, clap::Args)]
pub struct Args {
    /// Generator source file, called as `<generator> <seed>`
    pub generator: PathBuf,

    /// Program under test (default: latest `test.include` match)
    pub program_file_or_dir: Option<PathBuf>,

    /// Trusted solution whose output is the expected one
    #[arg(short, long)]
    pub reference: Option<PathBuf>,

    /// Number of iterations
    #[arg(short = 'n', long)]
    pub count: Option<u64>,

    /// Base seed; iteration i uses seed + i
    #[arg(short, long)]
    pub seed: Option<u64>,

    /// Keep going after the first divergence
    #[arg(long)]
    pub collect_all: bool,

    #[arg(long, value_name = "BYTES")]
    pub max_input_bytes: Option<usize>,

    /// Where divergences are saved as cases
    #[arg(long)]
    pub hack_dir: Option<PathBuf>,

    /// Do not save divergences
    #[arg(long)]
    pub no_save: bool,

    #[command(flatten)]
    pub judge: JudgeArgs,

    #[command(flatten)]
    pub output: OutputArgs,
}

pub async fn exec(args: &Args, global_args: &GlobalArgs, cancel: &CancelToken) -> SubcmdResult {
    let mut cfg = config::load(global_args, &args.judge)?;
    if let Some(n) = args.count {
        cfg.stress.count = n;
    }
    if let Some(bytes) = args.max_input_bytes {
        cfg.stress.max_input_bytes = bytes;
    }
    if let Some(dir) = &args.hack_dir {
        cfg.stress.hack_dir = dir.clone();
    }
    cfg.stress.collect_all |= args.collect_all;

    let program_file =
        determine_program_file(args.program_file_or_dir.as_deref(), &cfg.test.include)?;
    let candidate = action::prepare_program(program_file, &cfg).await?;
    let generator = action::prepare_program(&args.generator, &cfg).await?;
    let reference = match &args.reference {
        Some(file) => Some(action::prepare_program(file, &cfg).await?),
        None => None,
    };

    let outcome = action::do_stress(
        StressPrograms {
            candidate: &candidate,
            generator: &generator,
            reference: reference.as_ref(),
        },
        &cfg,
        args.seed,
        !args.no_save,
        args.output.into(),
        cancel,
    )
    .await?;
    Ok(outcome.session.passed())
}
