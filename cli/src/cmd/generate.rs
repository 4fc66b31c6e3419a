use std::path::PathBuf;

use pjudge_core::{action, testing::CancelToken};

use crate::config;

use super::{GlobalArgs, JudgeArgs, SubcmdResult};

#[derive(Debug, clap::Args)]
pub struct Args {
    /// Generator source file, called as `<generator> <seed>`
    pub generator: PathBuf,

    /// Number of cases to generate
    #[arg(default_value_t = 100)]
    pub count: usize,

    /// Solution whose output is saved as the expected output
    #[arg(short, long)]
    pub reference: Option<PathBuf>,

    #[arg(short, long)]
    pub seed: Option<u64>,

    #[command(flatten)]
    pub judge: JudgeArgs,
}

pub async fn exec(args: &Args, global_args: &GlobalArgs, cancel: &CancelToken) -> SubcmdResult {
    let cfg = config::load(global_args, &args.judge)?;

    let generator = action::prepare_program(&args.generator, &cfg).await?;
    let reference = match &args.reference {
        Some(file) => Some(action::prepare_program(file, &cfg).await?),
        None => None,
    };

    let report = action::do_generate(
        &generator,
        reference.as_ref(),
        &cfg.test.case_dir,
        args.count,
        args.seed,
        &cfg,
        cancel,
    )
    .await?;
    Ok(report.failed.is_empty())
}
