use std::path::PathBuf;

use pjudge_core::{action, testing::CancelToken};

use crate::config;

use super::{GlobalArgs, JudgeArgs, SubcmdResult};

#[derive(Debug, clap::Args)]
pub struct Args {
    /// Validator source files (default: executables in `qa.validator_dir`)
    #[arg(short = 'V', long = "validator")]
    pub validators: Vec<PathBuf>,

    #[command(flatten)]
    pub judge: JudgeArgs,
}

pub async fn exec(args: &Args, global_args: &GlobalArgs, cancel: &CancelToken) -> SubcmdResult {
    let cfg = config::load(global_args, &args.judge)?;
    for file in &args.validators {
        action::prepare_program(file, &cfg).await?;
    }
    let validators = action::find_validators(&args.validators, &cfg)?;

    let report = action::do_validate(validators, &cfg.test.case_dir, &cfg, cancel).await?;
    Ok(report.all_valid())
}
