//! Source files and the commands that build and run them.

use std::{
    collections::HashMap,
    ffi::OsStr,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context as _};
use tokio::process::Command;

use crate::config::{Config, TestConfig};
use crate::serdable::GlobPattern;
use crate::str_interp::{interp, InterpError};
use crate::testing::CommandLine;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramCommand {
    pub compile: Option<String>,
    pub run: String,
}

/// A source file bound to its interpolated `[[command]]` entry.
#[derive(Debug, Clone)]
pub struct Program {
    file: PathBuf,
    cmd: ProgramCommand,
    shell: PathBuf,
}

impl Program {
    pub fn new(
        file: impl Into<PathBuf>,
        cmd: ProgramCommand,
        shell: impl Into<PathBuf>,
    ) -> Result<Self, InterpError> {
        let file = file.into();
        let cmd = Self::interpolate_command_with_program_file(&file, cmd)?;
        Ok(Self {
            file,
            cmd,
            shell: shell.into(),
        })
    }

    /// Looks up the command for `file` in `cfg`.
    pub fn resolve(file: impl Into<PathBuf>, cfg: &Config) -> anyhow::Result<Self> {
        let file = file.into();
        let filename = file
            .file_name()
            .with_context(|| format!("Not a file: {:?}", file))?
            .to_string_lossy()
            .into_owned();
        let cmd = cfg.find_command_for_filename(&filename).with_context(|| {
            format!(
                "Unconfigured command for filename '{}' (No entry matched glob in `command[]`)",
                filename
            )
        })?;
        Self::new(file, cmd, &cfg.test.shell)
            .with_context(|| format!("Invalid command template for '{}'", filename))
    }

    #[must_use]
    pub fn interpolate_command_with_program_file(
        filepath: impl AsRef<Path>,
        mut cmd: ProgramCommand,
    ) -> Result<ProgramCommand, InterpError> {
        let vars = Self::make_cmd_interp_vars(filepath.as_ref());
        cmd.compile = cmd.compile.map(|fmt| interp(&fmt, &vars)).transpose()?;
        cmd.run = interp(&cmd.run, &vars)?;
        Ok(cmd)
    }

    fn make_cmd_interp_vars(filepath: &Path) -> HashMap<&'static str, &OsStr> {
        let mut m: HashMap<_, &OsStr> = HashMap::new();
        m.insert("filePath", filepath.as_ref());
        m.insert("fileName", filepath.file_name().unwrap_or_default());
        m.insert(
            "fileDir",
            match filepath.parent() {
                Some(dir) if !dir.as_os_str().is_empty() => dir.as_os_str(),
                _ => OsStr::new("."),
            },
        );
        m.insert(
            "fileStem",
            filepath
                .file_stem()
                .unwrap_or(OsStr::new("UNDEFINED_FILE_STEM")),
        );
        m.insert(
            "fileExt",
            filepath
                .extension()
                .unwrap_or(OsStr::new("UNDEFINED_FILE_EXTENSION")),
        );
        m
    }

    pub fn get_command(&self) -> &ProgramCommand {
        &self.cmd
    }

    pub fn command_line(&self) -> CommandLine {
        CommandLine::shell(&self.shell, &self.cmd.run)
    }

    pub fn is_compile_cmd_defined(&self) -> bool {
        self.cmd.compile.is_some()
    }

    pub async fn compile(&self) -> anyhow::Result<()> {
        let Some(cmd) = &self.cmd.compile else {
            bail!("Undefined compile command")
        };

        let status = Command::new(&self.shell)
            .args(["-c", cmd])
            .status()
            .await
            .with_context(|| {
                format!(
                    "Failed to spawn '{} -c {}'",
                    self.shell.to_string_lossy(),
                    cmd
                )
            })?;

        match status.code() {
            Some(0) => Ok(()),
            Some(code) => bail!("Compile error: exitcode={}", code),
            None => bail!("Failed to compile: process terminated by signal"),
        }
    }

    /// Compiles when configured to and a compile step exists.
    pub async fn prepare(&self, cfg: &TestConfig) -> anyhow::Result<()> {
        if cfg.compile_before_run && self.is_compile_cmd_defined() {
            let filename = self.file.file_name().unwrap_or_default().to_string_lossy();
            log::info!("Compiling {}", filename);
            if let Some(cmd) = &self.cmd.compile {
                log::info!("{}", cmd);
            }
            self.compile()
                .await
                .with_context(|| format!("Failed to compile {:?}", self.file))?;
        }
        Ok(())
    }
}

/// `path` itself when it is a file; otherwise the most recently modified
/// file under `path` (or the current dir) matching `include`.
pub fn determine_program_file(
    path: Option<&Path>,
    include: &GlobPattern,
) -> anyhow::Result<PathBuf> {
    let dir = match path {
        Some(p) if p.is_file() => return Ok(p.to_owned()),
        Some(p) => p,
        None => Path::new("."),
    };
    fsutil::find_most_recently_modified_file(dir, include)
        .with_context(|| format!("Cannot determine the program file in {:?}", dir))
}

/// First file of `dir` in name order that has a configured command.
pub fn find_program_in(dir: impl AsRef<Path>, cfg: &Config) -> anyhow::Result<Option<PathBuf>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Ok(None);
    }
    let found = fsutil::list_files_sorted(dir)?.into_iter().find(|p| {
        let name = p.file_name().unwrap_or_default().to_string_lossy();
        !fsutil::is_backup_or_hidden(&name) && cfg.find_command_for_filename(&name).is_some()
    });
    Ok(found)
}
