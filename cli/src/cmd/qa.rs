use pjudge_core::{
    action::{self, QaOptions},
    testing::{CancelToken, StageKind},
};

use crate::config;

use super::{GlobalArgs, JudgeArgs, OutputArgs, SubcmdResult};

#[derive(Debug, clap::Args)]
pub struct Args {
    #[arg(long)]
    pub skip_validator: bool,

    #[arg(long)]
    pub skip_test: bool,

    #[arg(long)]
    pub skip_stress: bool,

    /// Base seed of the stress stage
    #[arg(short, long)]
    pub seed: Option<u64>,

    /// Iterations of the stress stage
    #[arg(short = 'n', long)]
    pub stress_count: Option<u64>,

    #[command(flatten)]
    pub judge: JudgeArgs,

    #[command(flatten)]
    pub output: OutputArgs,
}

pub async fn exec(args: &Args, global_args: &GlobalArgs, cancel: &CancelToken) -> SubcmdResult {
    let mut cfg = config::load(global_args, &args.judge)?;
    if let Some(n) = args.stress_count {
        cfg.qa.stress_count = n;
    }

    let skip = [
        (args.skip_validator, StageKind::Validate),
        (args.skip_test, StageKind::Test),
        (args.skip_stress, StageKind::Stress),
    ]
    .into_iter()
    .filter_map(|(yes, kind)| yes.then_some(kind))
    .collect();

    let report = action::do_qa(
        QaOptions {
            case_dir: cfg.test.case_dir.clone(),
            seed: args.seed,
            skip,
        },
        &cfg,
        args.output.into(),
        cancel,
    )
    .await?;
    Ok(report.passed())
}
