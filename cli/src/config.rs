use anyhow::Context as _;
use pjudge_core::config::Config;

use crate::{
    cmd::{GlobalArgs, JudgeArgs},
    util,
};

/// The config file in effect with command-line overrides applied.
pub fn load(global: &GlobalArgs, args: &JudgeArgs) -> anyhow::Result<Config> {
    let cfg = match &global.config {
        Some(path) => Config::from_toml_file(path.clone())
            .with_context(|| format!("Cannot load {:?}", util::replace_homedir_to_tilde(path)))?,
        None => Config::discover(util::current_dir())?,
    };
    if let Some(path) = &cfg.source_config_file {
        log::debug!("Config: {}", util::replace_homedir_to_tilde(path).display());
    }
    Ok(with_args(cfg, args))
}

pub fn with_args(mut cfg: Config, args: &JudgeArgs) -> Config {
    let JudgeArgs {
        case_dir,
        format,
        tle,
        mle,
        jobs,
        compare_mode,
        tolerance,
        checker,
        no_compile,
        stop_on_failure,
    } = args;

    let t = &mut cfg.test;
    if let Some(dir) = case_dir {
        t.case_dir = dir.clone();
    }
    if let Some(fmt) = format {
        t.case_format = fmt.clone();
    }
    if let Some(ms) = tle {
        t.time_limit_ms = *ms;
    }
    if mle.is_some() {
        t.memory_limit_mb = *mle;
    }
    if let Some(n) = jobs {
        t.jobs = *n;
    }
    if let Some(mode) = compare_mode {
        t.compare.mode = (*mode).into();
    }
    if let Some(tol) = tolerance {
        t.compare.tolerance = *tol;
    }
    if checker.is_some() {
        t.compare.checker = checker.clone();
    }
    t.compile_before_run &= !no_compile;
    t.stop_on_failure |= stop_on_failure;
    cfg
}

#[cfg(test)]
mod test {
    use pjudge_core::config::CompareModeName;

    use super::*;
    use crate::cmd::ArgCompareMode;

    #[test]
    fn flags_override_file_values() {
        let base = Config::from_toml(&Config::example_toml()).unwrap();
        let cfg = with_args(
            base.clone(),
            &JudgeArgs {
                tle: Some(500),
                mle: Some(128),
                compare_mode: Some(ArgCompareMode::Float),
                no_compile: true,
                ..Default::default()
            },
        );
        assert_eq!(cfg.test.time_limit_ms, 500);
        assert_eq!(cfg.test.memory_limit_mb, Some(128));
        assert_eq!(cfg.test.compare.mode, CompareModeName::Float);
        assert!(!cfg.test.compile_before_run);
        assert_eq!(cfg.test.case_dir, base.test.case_dir);
        assert_eq!(cfg.test.jobs, base.test.jobs);
    }
}
