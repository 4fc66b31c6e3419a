use super::{
    cancel::CancelToken,
    command::CommandLine,
    compare::{compare, CompareMode},
    error::{Error, Result},
    process::{Limits, ProcessRunner, Termination},
    verdict::Verdict,
};

/// Verdict on a candidate's output, with an explanation for humans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Judgement {
    pub verdict: Verdict,
    pub detail: Option<String>,
}

impl Judgement {
    fn new(verdict: Verdict, detail: Option<String>) -> Self {
        Self { verdict, detail }
    }
}

/// An external program deciding whether an output is correct.
///
/// It is invoked as `<checker> <input> <actual> <expected>`. Exit 0 accepts,
/// 1 or 2 rejects, anything else means the checker itself failed.
#[derive(Debug, Clone)]
pub struct Checker {
    command: CommandLine,
    runner: ProcessRunner,
}

impl Checker {
    pub fn new(command: CommandLine, limits: Limits) -> Self {
        Self {
            command,
            runner: ProcessRunner::new(limits),
        }
    }

    pub fn command(&self) -> &CommandLine {
        &self.command
    }

    pub async fn check(
        &self,
        input: &[u8],
        actual: &[u8],
        expected: Option<&[u8]>,
        cancel: &CancelToken,
    ) -> Result<Judgement> {
        let dir = tempfile::Builder::new()
            .prefix("pjudge-checker-")
            .tempdir()
            .map_err(Error::TempFile)?;
        let files = [
            ("input", input),
            ("actual", actual),
            ("expected", expected.unwrap_or_default()),
        ];
        let mut paths = Vec::with_capacity(files.len());
        for (name, content) in files {
            let path = dir.path().join(name);
            tokio::fs::write(&path, content)
                .await
                .map_err(Error::TempFile)?;
            paths.push(path);
        }

        let cmd = self.command.with_args(paths.iter().map(|p| p.as_os_str()));
        let res = match self.runner.run(&cmd, b"", cancel).await {
            Ok(res) => res,
            Err(e) if !e.is_fatal() => {
                return Ok(Judgement::new(Verdict::IE, Some(format!("checker: {}", e))))
            }
            Err(e) => return Err(e),
        };

        let mut message = String::new();
        message += res.stdout_lossy().trim_end();
        if !message.is_empty() && !res.stderr.is_empty() {
            message.push('\n');
        }
        message += res.stderr_lossy().trim_end();
        let message = (!message.is_empty()).then_some(message);

        let verdict = match res.termination {
            Termination::Exited(0) => Verdict::AC,
            Termination::Exited(1 | 2) => Verdict::WA,
            t => {
                let why = format!("checker failed ({})", describe(t));
                let detail = match message {
                    Some(m) => format!("{}\n{}", why, m),
                    None => why,
                };
                return Ok(Judgement::new(Verdict::IE, Some(detail)));
            }
        };
        Ok(Judgement::new(verdict, message))
    }
}

pub(crate) fn describe(t: Termination) -> String {
    match t {
        Termination::Exited(code) => format!("exit code {}", code),
        Termination::Signaled(sig) => format!("killed by signal {}", sig),
        Termination::TimedOut => "time limit exceeded".to_owned(),
        Termination::OutOfMemory => "memory limit exceeded".to_owned(),
        Termination::OutputLimitExceeded => "output limit exceeded".to_owned(),
    }
}

/// How a finished run's output is judged.
#[derive(Debug, Clone)]
pub enum Matcher {
    Text(CompareMode),
    Checker(Checker),
}

impl Default for Matcher {
    fn default() -> Self {
        Self::Text(CompareMode::default())
    }
}

impl Matcher {
    pub const NO_EXPECTED_OUTPUT: &str = "no expected output";

    /// Judges `actual`. Without an expected output a text comparison cannot
    /// fail; the result is marked so the caller can tell.
    pub async fn judge(
        &self,
        input: &[u8],
        actual: &[u8],
        expected: Option<&[u8]>,
        cancel: &CancelToken,
    ) -> Result<Judgement> {
        match (self, expected) {
            (Self::Checker(checker), _) => checker.check(input, actual, expected, cancel).await,
            (Self::Text(_), None) => Ok(Judgement::new(
                Verdict::AC,
                Some(Self::NO_EXPECTED_OUTPUT.to_owned()),
            )),
            (Self::Text(mode), Some(expected)) => {
                let c = compare(actual, expected, mode);
                let verdict = if c.matched { Verdict::AC } else { Verdict::WA };
                Ok(Judgement::new(verdict, c.detail))
            }
        }
    }

    /// Describes the matcher for logs.
    pub fn describe(&self) -> String {
        match self {
            Self::Text(mode) => mode.to_string(),
            Self::Checker(c) => format!("checker `{}`", c.command()),
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;

    fn checker(script: &str) -> Checker {
        Checker::new(
            CommandLine::sh(script),
            Limits::default().time(Duration::from_millis(500)),
        )
    }

    async fn check(script: &str, actual: &str, expected: &str) -> Judgement {
        checker(script)
            .check(
                b"2\n",
                actual.as_bytes(),
                Some(expected.as_bytes()),
                &CancelToken::new(),
            )
            .await
            .unwrap()
    }

    // file arguments are appended to the command line, so scripts read them
    // through a nested shell
    const CMP: &str = r#"sh -c 'cmp -s "$2" "$3" || { echo "differs"; exit 1; }' checker"#;

    #[tokio::test]
    async fn accepts_on_exit_zero() {
        let j = check(CMP, "4\n", "4\n").await;
        assert_eq!(j, Judgement::new(Verdict::AC, None));
    }

    #[tokio::test]
    async fn rejects_on_exit_one() {
        let j = check(CMP, "5\n", "4\n").await;
        assert_eq!(j, Judgement::new(Verdict::WA, Some("differs".into())));
    }

    #[tokio::test]
    async fn receives_the_input_file() {
        let script = r#"sh -c 'test "$(cat "$1")" = 2 || exit 1' checker"#;
        assert_eq!(check(script, "", "").await.verdict, Verdict::AC);
    }

    #[tokio::test]
    async fn crash_is_internal_error() {
        let j = check("sh -c 'echo boom >&2; exit 3' checker", "4\n", "4\n").await;
        assert_eq!(j.verdict, Verdict::IE);
        assert_eq!(j.detail.unwrap(), "checker failed (exit code 3)\nboom");

        let j = check("sh -c 'kill -9 $$' checker", "4\n", "4\n").await;
        assert_eq!(j.verdict, Verdict::IE);

        let j = check("sh -c 'sleep 5' checker", "4\n", "4\n").await;
        assert_eq!(j.verdict, Verdict::IE);
    }

    #[tokio::test]
    async fn missing_checker_is_internal_error() {
        let j = Checker::new(CommandLine::exec("./no-such-checker"), Limits::default())
            .check(b"", b"", None, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(j.verdict, Verdict::IE);
    }

    #[tokio::test]
    async fn text_matcher_without_expected_output() {
        let j = Matcher::default()
            .judge(b"", b"anything", None, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(j.verdict, Verdict::AC);
        assert_eq!(j.detail.as_deref(), Some(Matcher::NO_EXPECTED_OUTPUT));
    }
}
