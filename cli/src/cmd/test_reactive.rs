use std::path::PathBuf;

use pjudge_core::{action, program::determine_program_file, testing::CancelToken};

use crate::config;

use super::{GlobalArgs, JudgeArgs, OutputArgs, SubcmdResult};

#[derive(Debug, clap::Args)]
pub struct Args {
    /// Interactor source file, called as `<interactor> <input> <verdict-file>`
    pub interactor: PathBuf,

    pub program_file_or_dir: Option<PathBuf>,

    #[command(flatten)]
    pub judge: JudgeArgs,

    #[command(flatten)]
    pub output: OutputArgs,
}

pub async fn exec(args: &Args, global_args: &GlobalArgs, cancel: &CancelToken) -> SubcmdResult {
    let cfg = config::load(global_args, &args.judge)?;

    let program_file =
        determine_program_file(args.program_file_or_dir.as_deref(), &cfg.test.include)?;
    let program = action::prepare_program(program_file, &cfg).await?;
    let interactor = action::prepare_program(&args.interactor, &cfg).await?;

    let report = action::do_test_reactive(
        &program,
        &interactor,
        &cfg.test.case_dir,
        &cfg,
        args.output.into(),
        cancel,
    )
    .await?;
    Ok(report.all_accepted())
}
