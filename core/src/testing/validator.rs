use std::path::Path;

use serde::Serialize;

use super::{
    cancel::CancelToken,
    case::Testcase,
    checker::describe,
    command::CommandLine,
    error::Result,
    process::{Limits, ProcessRunner},
    report::Abort,
};

#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub validator: String,
    pub case: String,
    pub valid: bool,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub results: Vec<ValidationResult>,
    pub aborted: Option<Abort>,
}

impl ValidationReport {
    pub fn all_valid(&self) -> bool {
        self.aborted.is_none() && self.results.iter().all(|r| r.valid)
    }

    pub fn invalid(&self) -> impl Iterator<Item = &ValidationResult> {
        self.results.iter().filter(|r| !r.valid)
    }
}

/// Executable files directly under `dir`, in name order.
pub fn discover_validators(dir: impl AsRef<Path>) -> Result<Vec<CommandLine>> {
    let found = fsutil::list_files_sorted(dir)?
        .into_iter()
        .filter(|p| {
            let name = p.file_name().unwrap_or_default().to_string_lossy();
            !fsutil::is_backup_or_hidden(&name) && fsutil::is_executable(p)
        })
        .map(CommandLine::exec)
        .collect();
    Ok(found)
}

/// Checks stored inputs against their constraints. A validator reads one
/// input on stdin and exits 0 when it is valid.
#[derive(Debug, Clone)]
pub struct InputValidator {
    validators: Vec<CommandLine>,
    runner: ProcessRunner,
}

impl InputValidator {
    pub fn new(validators: Vec<CommandLine>, limits: Limits) -> Self {
        Self {
            validators,
            runner: ProcessRunner::new(limits),
        }
    }

    /// Runs every validator over every case, validator by validator.
    pub async fn run(
        &self,
        cases: &[Testcase],
        cancel: &CancelToken,
        mut on_result: impl FnMut(&ValidationResult),
    ) -> ValidationReport {
        let mut report = ValidationReport::default();
        for validator in &self.validators {
            log::info!("Using validator: {}", validator);
            for case in cases {
                let (valid, detail) = match self.runner.run(validator, &case.input, cancel).await {
                    Ok(res) if res.success() => (true, None),
                    Ok(res) => {
                        let stderr = res.stderr_lossy().trim().to_owned();
                        let why = describe(res.termination);
                        let detail = if stderr.is_empty() {
                            why
                        } else {
                            format!("{}\n{}", why, stderr)
                        };
                        (false, Some(detail))
                    }
                    Err(e) if !e.is_fatal() => (false, Some(e.to_string())),
                    Err(e) => {
                        report.aborted = Some(Abort::from(&e));
                        return report;
                    }
                };
                let result = ValidationResult {
                    validator: validator.to_string(),
                    case: case.name.clone(),
                    valid,
                    detail,
                };
                if !result.valid {
                    log::debug!("{} is rejected by {}", case.name, validator);
                }
                on_result(&result);
                report.results.push(result);
            }
        }
        report
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn cases() -> Vec<Testcase> {
        vec![
            Testcase::new("ok", "3\n", None::<Vec<u8>>),
            Testcase::new("too_big", "300\n", None::<Vec<u8>>),
        ]
    }

    #[tokio::test]
    async fn reports_each_validator_and_case() {
        let bound = CommandLine::sh(
            r#"read n; [ "$n" -le 100 ] || { echo "n = $n is out of range" >&2; exit 1; }"#,
        );
        let report = InputValidator::new(vec![bound, CommandLine::sh("cat >/dev/null")], Limits::default())
            .run(&cases(), &CancelToken::new(), |_| {})
            .await;

        assert_eq!(report.results.len(), 4);
        assert!(!report.all_valid());
        let invalid: Vec<_> = report.invalid().collect();
        assert_eq!(invalid.len(), 1);
        assert_eq!(invalid[0].case, "too_big");
        assert_eq!(
            invalid[0].detail.as_deref(),
            Some("exit code 1\nn = 300 is out of range")
        );
    }

    #[tokio::test]
    async fn missing_validator_marks_cases_invalid() {
        let report = InputValidator::new(
            vec![CommandLine::exec("/nonexistent/validator")],
            Limits::default(),
        )
        .run(&cases(), &CancelToken::new(), |_| {})
        .await;
        assert!(report.aborted.is_none());
        assert!(report.results.iter().all(|r| !r.valid));
    }

    #[test]
    fn discovers_only_executables() {
        let dir = tempfile::tempdir().unwrap();
        let write = |name: &str, mode: u32| {
            let path = dir.path().join(name);
            fsutil::write_with_mkdir(&path, "#!/bin/sh\nexit 0\n").unwrap();
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).unwrap();
            }
        };
        write("b_range", 0o755);
        write("a_format", 0o755);
        write("README", 0o644);
        write("a_format~", 0o755);

        let found: Vec<_> = discover_validators(dir.path())
            .unwrap()
            .iter()
            .map(|c| c.program_name())
            .collect();
        assert_eq!(found.len(), 2);
        assert!(found[0].ends_with("/a_format"));
        assert!(found[1].ends_with("/b_range"));
    }
}
