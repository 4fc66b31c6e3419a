use std::{
    io::Write as _,
    path::{Path, PathBuf},
    process::exit,
};

use colored::Colorize;
use pjudge_core::style::ColorTheme;

pub fn current_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|e| {
        eprintln!("Failed to get current dir: {}", e);
        exit(1);
    })
}

pub fn replace_homedir_to_tilde(path: impl Into<PathBuf>) -> PathBuf {
    let path = path.into();
    let Some(home_dir) = ::dirs::home_dir() else {
        return path
    };
    path.strip_prefix(home_dir)
        .map(|path| Path::new("~").join(path))
        .unwrap_or(path)
}

/// `[LEVEL] message` records; `RUST_LOG` takes precedence over `level`.
pub fn init_logger(level: log::LevelFilter) {
    env_logger::Builder::new()
        .filter_level(level)
        .parse_env("RUST_LOG")
        .format(|buf, record| {
            let label = format!("[{}]", record.level())
                .color(record.level().color())
                .bold();
            writeln!(buf, "{} {}", label, record.args())
        })
        .init();
}
