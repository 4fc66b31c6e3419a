use std::{io, sync::Arc};

use async_trait::async_trait;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::Notify,
};

use super::{
    batch::{termination_verdict, Judge},
    cancel::CancelToken,
    case::Testcase,
    checker::describe,
    command::CommandLine,
    error::{Error, Result},
    process::{drain, read_capped, Capture, ExecutionResult, Limits, ProcessRunner, Termination},
    verdict::{CaseResult, Verdict},
};

/// Judges interactive problems.
///
/// The interactor is invoked as `<interactor> <input> <verdict-file>` with
/// its stdio cross-wired to the solution's. Its verdict is the first token
/// of `<verdict-file>` (`AC`, `WA`, `PE` or `FAIL`) if it wrote one, else
/// its exit code (0 accepts, 1 or 2 rejects, anything else is a failure of
/// the interactor).
#[derive(Debug, Clone)]
pub struct ReactiveJudge {
    solution: CommandLine,
    interactor: CommandLine,
    limits: Limits,
}

impl ReactiveJudge {
    pub fn new(solution: CommandLine, interactor: CommandLine, limits: Limits) -> Self {
        Self {
            solution,
            interactor,
            limits,
        }
    }

    /// The interactor runs unlimited in memory and gets the solution's time
    /// limit again as a grace period to deliver its verdict.
    fn interactor_limits(&self) -> Limits {
        Limits {
            time: self.limits.time * 2,
            memory_mb: None,
            ..self.limits.clone()
        }
    }
}

#[async_trait]
impl Judge for ReactiveJudge {
    async fn judge(&self, case: &Testcase, cancel: &CancelToken) -> Result<CaseResult> {
        let dir = tempfile::Builder::new()
            .prefix("pjudge-reactive-")
            .tempdir()
            .map_err(Error::TempFile)?;
        let input_path = dir.path().join("input");
        let verdict_path = dir.path().join("verdict");
        for (path, content) in [(&input_path, &case.input[..]), (&verdict_path, &b""[..])] {
            tokio::fs::write(path, content)
                .await
                .map_err(Error::TempFile)?;
        }

        let mut sol = ProcessRunner::new(self.limits.clone()).spawn(&self.solution)?;
        let interactor_cmd = self.interactor.with_args([&input_path, &verdict_path]);
        let mut inter = match ProcessRunner::new(self.interactor_limits()).spawn(&interactor_cmd)
        {
            Ok(r) => r,
            Err(e) if !e.is_fatal() => {
                return Ok(CaseResult::internal_error(
                    &case.name,
                    format!("interactor: {}", e),
                ))
            }
            Err(e) => return Err(e),
        };

        let (sol_in, sol_out, sol_err) = sol.take_stdio()?;
        let (inter_in, inter_out, inter_err) = inter.take_stdio()?;
        let (sol_name, inter_name) = (sol.program.clone(), inter.program.clone());

        let overflow = Arc::new(Notify::new());
        let sol_out_capture = Capture::new(self.limits.stdout_max_bytes);
        let inter_out_capture = Capture::new(self.limits.stdout_max_bytes);
        let sol_err_capture = Capture::new(self.limits.stderr_max_bytes);
        let inter_err_capture = Capture::new(self.limits.stderr_max_bytes);
        let to_interactor = tokio::spawn(relay(
            sol_out,
            inter_in,
            sol_out_capture.clone(),
            Some(Arc::clone(&overflow)),
        ));
        let to_solution = tokio::spawn(relay(inter_out, sol_in, inter_out_capture.clone(), None));
        let sol_err = tokio::spawn(read_capped(sol_err, sol_err_capture.clone(), None));
        let inter_err = tokio::spawn(read_capped(inter_err, inter_err_capture.clone(), None));

        let (sol_kill, inter_kill) = (sol.killer(), inter.killer());
        let no_overflow = Notify::new();
        let sol_sup = sol.supervise(&overflow, cancel);
        let inter_sup = inter.supervise(&no_overflow, cancel);
        tokio::pin!(sol_sup, inter_sup);

        let mut rejected_early = false;
        let (sol_sup, inter_sup) = tokio::select! {
            biased;
            s = &mut sol_sup => {
                let s = s?;
                if termination_verdict(s.termination).is_some() {
                    // the interactor may be blocked on a solution that is gone
                    inter_kill.kill();
                }
                (s, inter_sup.await?)
            }
            i = &mut inter_sup => {
                let i = i?;
                let token = read_token(&verdict_path).await;
                // A solution that already ended made the interactor give up,
                // not the other way round.
                if interactor_verdict(i.termination, token.as_deref()).0 != Verdict::AC
                    && !sol_kill.has_exited()
                {
                    sol_kill.kill();
                    rejected_early = true;
                }
                (sol_sup.await?, i)
            }
        };

        let (transcript, stdout_truncated) =
            drain(to_interactor, &sol_out_capture, &sol_name).await?;
        drain(to_solution, &inter_out_capture, &inter_name).await?;
        let (stderr, stderr_truncated) = drain(sol_err, &sol_err_capture, &sol_name).await?;
        let (inter_stderr, _) = drain(inter_err, &inter_err_capture, &inter_name).await?;

        let execution = ExecutionResult {
            termination: sol_sup.termination,
            stdout: transcript,
            stderr,
            stdout_truncated,
            stderr_truncated,
            wall_time: sol_sup.wall_time,
            peak_memory_kb: sol_sup.peak_memory_kb,
        };

        let token = read_token(&verdict_path).await;
        let (verdict, why) = interactor_verdict(inter_sup.termination, token.as_deref());
        let inter_stderr = String::from_utf8_lossy(&inter_stderr).trim_end().to_owned();
        let inter_stderr = (!inter_stderr.is_empty()).then_some(inter_stderr);
        let join = |parts: [Option<String>; 2]| {
            let parts: Vec<_> = parts.into_iter().flatten().collect();
            (!parts.is_empty()).then(|| parts.join("\n"))
        };

        // a rejection that made us kill the solution stands; otherwise the
        // solution's own failure takes precedence
        let result = match termination_verdict(execution.termination) {
            Some((v, sol_why)) if !rejected_early => CaseResult::new(&case.name, v, execution)
                .with_opt_detail(join([Some(sol_why), inter_stderr])),
            _ => CaseResult::new(&case.name, verdict, execution)
                .with_opt_detail(join([why, inter_stderr])),
        };
        Ok(result)
    }
}

async fn read_token(path: &std::path::Path) -> Option<String> {
    let content = tokio::fs::read(path).await.ok()?;
    String::from_utf8_lossy(&content)
        .split_whitespace()
        .next()
        .map(str::to_owned)
}

fn interactor_verdict(t: Termination, token: Option<&str>) -> (Verdict, Option<String>) {
    if t.is_limit_exceeded() {
        return (Verdict::IE, Some(format!("interactor: {}", describe(t))));
    }
    match token {
        Some("AC") => return (Verdict::AC, None),
        Some("WA") => return (Verdict::WA, None),
        Some("PE") => return (Verdict::WA, Some("presentation error".to_owned())),
        Some("FAIL") => return (Verdict::IE, Some("interactor reported FAIL".to_owned())),
        Some(other) => log::warn!("Unknown verdict '{}' from interactor; using its exit code", other),
        None => {}
    }
    match t {
        Termination::Exited(0) => (Verdict::AC, None),
        Termination::Exited(1 | 2) => (Verdict::WA, None),
        t => (Verdict::IE, Some(format!("interactor failed ({})", describe(t)))),
    }
}

/// Forwards bytes from `from` to `to` as soon as they arrive, keeping a
/// transcript in `transcript`.
///
/// When `to` goes away the rest of `from` is still drained, so the writer
/// side never blocks. `to` is closed once `from` reaches EOF.
async fn relay(
    mut from: impl AsyncRead + Unpin,
    mut to: impl AsyncWrite + Unpin,
    transcript: Capture,
    overflow: Option<Arc<Notify>>,
) -> io::Result<()> {
    let mut chunk = vec![0u8; 8192];
    let mut peer_alive = true;
    loop {
        let n = from.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        if transcript.push(&chunk[..n]) {
            if let Some(o) = &overflow {
                o.notify_one();
            }
        }
        if peer_alive {
            let res = async {
                to.write_all(&chunk[..n]).await?;
                to.flush().await
            }
            .await;
            match res {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => peer_alive = false,
                Err(e) => return Err(e),
            }
        }
    }
    if peer_alive {
        let _ = to.shutdown().await;
    }
    Ok(())
}
