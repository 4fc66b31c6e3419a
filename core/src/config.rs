use std::path::{Path, PathBuf};
use std::result::Result as StdResult;
use std::time::Duration;

use anyhow::Context as _;
use rust_embed::RustEmbed;
use serde::Deserialize;

use crate::program::ProgramCommand;
use crate::serdable::GlobPattern;
use crate::testing::{CaseFormat, Checker, CommandLine, CompareMode, Limits, Matcher};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    #[serde(skip)]
    pub source_config_file: Option<PathBuf>,
    pub test: TestConfig,
    #[serde(default)]
    pub stress: StressConfig,
    #[serde(default)]
    pub qa: QaConfig,
    #[serde(default)]
    pub command: Vec<CommandConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TestConfig {
    pub shell: PathBuf,
    pub case_dir: PathBuf,
    pub case_format: String,
    pub include: GlobPattern,
    pub compile_before_run: bool,
    pub time_limit_ms: u64,
    pub memory_limit_mb: Option<u64>,
    pub jobs: usize,
    pub stop_on_failure: bool,
    pub stdout_capture_max_bytes: usize,
    pub stderr_capture_max_bytes: usize,
    #[serde(default)]
    pub compare: CompareConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompareModeName {
    #[default]
    Exact,
    IgnoreSpaces,
    IgnoreSpacesAndNewlines,
    Float,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CompareConfig {
    #[serde(default)]
    pub mode: CompareModeName,
    #[serde(default = "CompareConfig::default_tolerance")]
    pub tolerance: f64,
    pub checker: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StressConfig {
    pub count: u64,
    pub max_input_bytes: usize,
    pub collect_all: bool,
    pub hack_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QaConfig {
    pub solution_dir: PathBuf,
    pub brute_force_dir: PathBuf,
    pub generator: Option<PathBuf>,
    pub validator_dir: PathBuf,
    pub stress_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommandConfig {
    pub pattern: GlobPattern,
    pub compile: Option<String>,
    pub run: String,
}

#[derive(RustEmbed)]
#[folder = "assets/"]
struct Asset;

impl Config {
    pub const FILENAME: &str = "pjudge.toml";
    pub const APP_DIR: &str = "pjudge";

    pub fn example_toml() -> String {
        Asset::get(Self::FILENAME)
            .map(|file| String::from_utf8_lossy(file.data.as_ref()).into_owned())
            .unwrap_or_default()
    }

    pub fn from_toml(s: &str) -> StdResult<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn from_toml_file(filepath: PathBuf) -> anyhow::Result<Self> {
        let toml = fsutil::read_to_string(&filepath).context("Cannot read a file")?;
        let mut cfg = Self::from_toml(&toml)
            .with_context(|| format!("Invalid config TOML: {:?}", filepath))?;
        cfg.source_config_file = Some(filepath);
        Ok(cfg)
    }

    /// Find config file ancestor dirs, including current dir.
    pub fn find_file_in_ancestors(cur_dir: impl AsRef<Path>) -> Option<PathBuf> {
        cur_dir
            .as_ref()
            .ancestors()
            .map(|dir| dir.join(Self::FILENAME))
            .find(|path| path.is_file())
    }

    pub fn user_config_file() -> Option<PathBuf> {
        let path = dirs::config_dir()?.join(Self::APP_DIR).join(Self::FILENAME);
        path.is_file().then_some(path)
    }

    /// Project file, then user file, then the built-in defaults.
    pub fn discover(cur_dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        match Self::find_file_in_ancestors(cur_dir).or_else(Self::user_config_file) {
            Some(path) => {
                log::debug!("Using config {}", path.display());
                Self::from_toml_file(path)
            }
            None => {
                log::debug!("No {} found; using defaults", Self::FILENAME);
                Self::from_toml(&Self::example_toml()).context("Broken built-in config")
            }
        }
    }

    /// Writes the example config into `dir`. Fails if one is already there.
    pub fn init(dir: impl AsRef<Path>) -> anyhow::Result<PathBuf> {
        let path = dir.as_ref().join(Self::FILENAME);
        fsutil::mkdir_all(dir.as_ref())?;
        fsutil::write_new(&path, Self::example_toml())
            .with_context(|| format!("Cannot create {:?}", path))?;
        Ok(path)
    }

    pub fn find_command_for_filename(&self, filename: impl AsRef<str>) -> Option<ProgramCommand> {
        self.command
            .iter()
            .find(|entry| entry.pattern.matches(filename.as_ref()))
            .map(|entry| ProgramCommand {
                compile: entry.compile.to_owned(),
                run: entry.run.to_owned(),
            })
    }
}

impl TestConfig {
    pub fn limits(&self) -> Limits {
        Limits {
            time: Duration::from_millis(self.time_limit_ms),
            memory_mb: self.memory_limit_mb,
            stdout_max_bytes: self.stdout_capture_max_bytes,
            stderr_max_bytes: self.stderr_capture_max_bytes,
        }
    }

    pub fn case_format(&self) -> anyhow::Result<CaseFormat> {
        CaseFormat::parse(&self.case_format).context("Invalid `test.case_format`")
    }

    pub fn shell_command(&self, line: impl Into<String>) -> CommandLine {
        CommandLine::shell(&self.shell, line)
    }

    pub fn matcher(&self) -> Matcher {
        match &self.compare.checker {
            Some(checker) => Matcher::Checker(Checker::new(
                self.shell_command(checker),
                self.limits().memory_mb(None),
            )),
            None => Matcher::Text(self.compare.compare_mode()),
        }
    }
}

impl CompareConfig {
    fn default_tolerance() -> f64 {
        CompareMode::DEFAULT_TOLERANCE
    }

    pub fn compare_mode(&self) -> CompareMode {
        match self.mode {
            CompareModeName::Exact => CompareMode::Exact,
            CompareModeName::IgnoreSpaces => CompareMode::IgnoreSpaces,
            CompareModeName::IgnoreSpacesAndNewlines => CompareMode::IgnoreSpacesAndNewlines,
            CompareModeName::Float => CompareMode::Float {
                tolerance: self.tolerance,
            },
        }
    }
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            mode: CompareModeName::Exact,
            tolerance: CompareMode::DEFAULT_TOLERANCE,
            checker: None,
        }
    }
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            count: 100,
            max_input_bytes: 16 << 20,
            collect_all: false,
            hack_dir: PathBuf::from("./test"),
        }
    }
}

impl Default for QaConfig {
    fn default() -> Self {
        Self {
            solution_dir: PathBuf::from("./solution/accepted"),
            brute_force_dir: PathBuf::from("./solution/brute_force"),
            generator: None,
            validator_dir: PathBuf::from("./input_validators"),
            stress_count: 100,
        }
    }
}
