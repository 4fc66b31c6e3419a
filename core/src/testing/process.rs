use std::{
    io,
    process::ExitStatus,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use serde::{Serialize, Serializer};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    process::Child,
    sync::Notify,
    task::JoinHandle,
    time::Instant,
};

use super::{
    cancel::CancelToken,
    command::CommandLine,
    error::{Error, Result},
    memory::{self, MemoryTracker},
};

/// Resource limits applied to one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    pub time: Duration,
    pub memory_mb: Option<u64>,
    /// Exceeding this kills the process with [`Termination::OutputLimitExceeded`].
    pub stdout_max_bytes: usize,
    /// Exceeding this only truncates the capture.
    pub stderr_max_bytes: usize,
}

impl Limits {
    pub const DEFAULT_TIME: Duration = Duration::from_millis(2000);
    pub const DEFAULT_STDOUT_MAX_BYTES: usize = 64 << 20;
    pub const DEFAULT_STDERR_MAX_BYTES: usize = 1 << 20;

    pub fn time(mut self, time: Duration) -> Self {
        self.time = time;
        self
    }

    pub fn memory_mb(mut self, mb: Option<u64>) -> Self {
        self.memory_mb = mb;
        self
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            time: Self::DEFAULT_TIME,
            memory_mb: None,
            stdout_max_bytes: Self::DEFAULT_STDOUT_MAX_BYTES,
            stderr_max_bytes: Self::DEFAULT_STDERR_MAX_BYTES,
        }
    }
}

/// How an execution ended. Exactly one applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Termination {
    Exited(i32),
    Signaled(i32),
    TimedOut,
    OutOfMemory,
    OutputLimitExceeded,
}

impl Termination {
    pub fn is_limit_exceeded(self) -> bool {
        matches!(
            self,
            Self::TimedOut | Self::OutOfMemory | Self::OutputLimitExceeded
        )
    }

    fn from_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::Exited(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(sig) = status.signal() {
                return Self::Signaled(sig);
            }
        }
        Self::Signaled(-1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    pub termination: Termination,
    #[serde(serialize_with = "lossy_utf8")]
    pub stdout: Vec<u8>,
    #[serde(serialize_with = "lossy_utf8")]
    pub stderr: Vec<u8>,
    /// Output past the cap, or left unread because a pipe stayed open, was dropped.
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    #[serde(rename = "wall_time_ms", serialize_with = "as_millis")]
    pub wall_time: Duration,
    pub peak_memory_kb: Option<u64>,
}

impl ExecutionResult {
    pub fn exit_code(&self) -> Option<i32> {
        match self.termination {
            Termination::Exited(code) => Some(code),
            _ => None,
        }
    }

    pub fn timed_out(&self) -> bool {
        self.termination == Termination::TimedOut
    }

    pub fn out_of_memory(&self) -> bool {
        self.termination == Termination::OutOfMemory
    }

    /// Exited with status 0 within every limit.
    pub fn success(&self) -> bool {
        self.termination == Termination::Exited(0)
    }

    pub fn stdout_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    pub fn stderr_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }
}

fn lossy_utf8<S: Serializer>(bytes: &[u8], s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&String::from_utf8_lossy(bytes))
}

fn as_millis<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Runs one command at a time under [`Limits`].
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    limits: Limits,
}

impl ProcessRunner {
    /// Grace period for draining pipes after the process group was reaped.
    const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

    pub fn new(limits: Limits) -> Self {
        Self { limits }
    }

    /// Runs `cmd` with `input` on stdin.
    ///
    /// Only launch failures, pipe failures and cancellation are errors;
    /// everything the process itself does ends up in the returned result.
    pub async fn run(
        &self,
        cmd: &CommandLine,
        input: &[u8],
        cancel: &CancelToken,
    ) -> Result<ExecutionResult> {
        let mut running = self.spawn(cmd)?;
        let (stdin, stdout, stderr) = running.take_stdio()?;

        let feeder = tokio::spawn(feed(stdin, input.to_vec()));
        let overflow = Arc::new(Notify::new());
        let out_capture = Capture::new(self.limits.stdout_max_bytes);
        let err_capture = Capture::new(self.limits.stderr_max_bytes);
        let out_reader = tokio::spawn(read_capped(
            stdout,
            out_capture.clone(),
            Some(Arc::clone(&overflow)),
        ));
        let err_reader = tokio::spawn(read_capped(stderr, err_capture.clone(), None));

        let sup = running.supervise(&overflow, cancel).await;
        feeder.abort();
        let sup = sup?;

        let (stdout, stdout_truncated) = drain(out_reader, &out_capture, &running.program).await?;
        let (stderr, stderr_truncated) = drain(err_reader, &err_capture, &running.program).await?;

        Ok(ExecutionResult {
            termination: sup.termination,
            stdout,
            stderr,
            stdout_truncated,
            stderr_truncated,
            wall_time: sup.wall_time,
            peak_memory_kb: sup.peak_memory_kb,
        })
    }

    /// Launches `cmd` and starts its limit clocks without touching its pipes.
    pub(crate) fn spawn(&self, cmd: &CommandLine) -> Result<Running> {
        let memory_limit_kb = self.limits.memory_mb.map(|mb| mb * 1024);
        if memory_limit_kb.is_some() && !memory::is_supported() {
            return Err(Error::MemoryAccountingUnsupported);
        }

        let program = cmd.program_name();
        log::debug!("Launching: {}", cmd);
        let child = cmd
            .to_command()
            .spawn()
            .map_err(|e| Error::launch(program.clone(), e))?;
        let started = Instant::now();

        let pid = child.id();
        let breach = Arc::new(Notify::new());
        let tracker = match pid {
            Some(pid) if memory::is_supported() => Some(MemoryTracker::start(
                pid,
                memory_limit_kb,
                Arc::clone(&breach),
            )),
            _ => None,
        };

        Ok(Running {
            child,
            pgid: pid,
            program,
            started,
            time_limit: self.limits.time,
            tracker,
            breach,
            reaped: false,
        })
    }
}

pub(crate) struct Supervision {
    pub termination: Termination,
    pub wall_time: Duration,
    pub peak_memory_kb: Option<u64>,
}

/// A launched child whose limits are being watched.
pub(crate) struct Running {
    child: Child,
    pgid: Option<u32>,
    pub program: String,
    started: Instant,
    time_limit: Duration,
    tracker: Option<MemoryTracker>,
    breach: Arc<Notify>,
    reaped: bool,
}

impl Running {
    pub fn take_stdio(
        &mut self,
    ) -> Result<(
        tokio::process::ChildStdin,
        tokio::process::ChildStdout,
        tokio::process::ChildStderr,
    )> {
        let pipe_err = |what: &str| Error::Pipe {
            program: self.program.clone(),
            source: io::Error::new(io::ErrorKind::BrokenPipe, format!("{} is not piped", what)),
        };
        let stdin = self.child.stdin.take().ok_or_else(|| pipe_err("stdin"))?;
        let stdout = self.child.stdout.take().ok_or_else(|| pipe_err("stdout"))?;
        let stderr = self.child.stderr.take().ok_or_else(|| pipe_err("stderr"))?;
        Ok((stdin, stdout, stderr))
    }

    /// Waits for the process to end or for a limit to be hit, then reaps the
    /// whole process group.
    ///
    /// Limit violations win over the exit status when both are observed.
    pub async fn supervise(
        &mut self,
        overflow: &Notify,
        cancel: &CancelToken,
    ) -> Result<Supervision> {
        let deadline = self.started + self.time_limit;

        let termination = tokio::select! {
            status = self.child.wait() => {
                let status = status.map_err(|source| Error::Pipe {
                    program: self.program.clone(),
                    source,
                })?;
                self.reaped = true;
                Termination::from_status(status)
            }
            _ = tokio::time::sleep_until(deadline) => {
                log::info!("Time limit exceeded: {}", self.program);
                Termination::TimedOut
            }
            _ = self.breach.notified() => {
                log::info!("Memory limit exceeded: {}", self.program);
                Termination::OutOfMemory
            }
            _ = overflow.notified() => {
                log::info!("Output limit exceeded: {}", self.program);
                Termination::OutputLimitExceeded
            }
            _ = cancel.cancelled() => {
                self.kill_and_reap().await;
                return Err(Error::Cancelled);
            }
        };
        let wall_time = self.started.elapsed();

        // stragglers left in the group would keep our pipes open
        self.kill_and_reap().await;

        let breached = self.tracker.as_ref().is_some_and(|t| t.breached());
        let peak_memory_kb = self.tracker.take().and_then(MemoryTracker::stop_and_take);

        let termination = match termination {
            Termination::Exited(_) | Termination::Signaled(_) if breached => {
                Termination::OutOfMemory
            }
            Termination::Exited(_) | Termination::Signaled(_) if wall_time > self.time_limit => {
                Termination::TimedOut
            }
            t => t,
        };

        Ok(Supervision {
            termination,
            wall_time,
            peak_memory_kb,
        })
    }

    /// Handle that kills the process group while `self` is borrowed elsewhere,
    /// e.g. by a pending [`supervise`](Self::supervise).
    pub fn killer(&self) -> Killer {
        Killer { pgid: self.pgid }
    }

    /// Kills the process group. Safe to call more than once.
    pub fn kill(&mut self) {
        self.killer().kill();
        if !self.reaped {
            if let Err(e) = self.child.start_kill() {
                if e.kind() != io::ErrorKind::InvalidInput {
                    log::warn!("Failed to kill '{}': {}", self.program, e);
                }
            }
        }
    }

    pub async fn kill_and_reap(&mut self) {
        self.kill();
        if !self.reaped {
            if let Err(e) = self.child.wait().await {
                log::warn!("Failed to reap '{}': {}", self.program, e);
            }
            self.reaped = true;
        }
        self.pgid = None;
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Killer {
    pgid: Option<u32>,
}

impl Killer {
    /// Whether the process is gone or a zombie. Unknown counts as running.
    pub fn has_exited(self) -> bool {
        match self.pgid {
            Some(pid) => memory::has_exited(pid),
            None => true,
        }
    }

    pub fn kill(self) {
        let Some(pgid) = self.pgid else {
            return;
        };
        #[cfg(unix)]
        {
            use nix::{
                errno::Errno,
                sys::signal::{killpg, Signal},
                unistd::Pid,
            };
            match killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => log::warn!("Failed to kill process group {}: {}", pgid, e),
            }
        }
        #[cfg(not(unix))]
        log::debug!("Process groups are not supported; {} is reaped via its handle", pgid);
    }
}

impl Drop for Running {
    fn drop(&mut self) {
        if self.pgid.is_some() {
            self.kill();
        }
    }
}

async fn feed(mut stdin: impl AsyncWrite + Unpin, input: Vec<u8>) {
    let res = async {
        stdin.write_all(&input).await?;
        stdin.shutdown().await
    }
    .await;
    match res {
        // the process is allowed to exit without reading everything
        Err(e) if e.kind() != io::ErrorKind::BrokenPipe => {
            log::debug!("Failed to write stdin: {}", e)
        }
        _ => {}
    }
}

/// Bytes read from a pipe so far, at most `cap` of them.
///
/// Shared with the reader task so a reader that never finishes still leaves
/// what it got.
#[derive(Debug, Clone)]
pub(crate) struct Capture {
    inner: Arc<Mutex<(Vec<u8>, bool)>>,
    cap: usize,
}

impl Capture {
    pub fn new(cap: usize) -> Self {
        Self {
            inner: Arc::default(),
            cap,
        }
    }

    /// Keeps what fits. Returns true only for the chunk that first overflows.
    pub fn push(&self, chunk: &[u8]) -> bool {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let (buf, truncated) = &mut *guard;
        let room = self.cap.saturating_sub(buf.len());
        buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
        if chunk.len() > room && !*truncated {
            *truncated = true;
            return true;
        }
        false
    }

    fn mark_truncated(&self) {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).1 = true;
    }

    pub fn take(&self) -> (Vec<u8>, bool) {
        std::mem::take(&mut *self.inner.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Reads `r` to the end into `capture`.
///
/// On overflow `overflow` is notified once and the rest is discarded, so the
/// writer never blocks on a full pipe.
pub(crate) async fn read_capped(
    mut r: impl AsyncRead + Unpin,
    capture: Capture,
    overflow: Option<Arc<Notify>>,
) -> io::Result<()> {
    let mut chunk = vec![0u8; 8192];
    loop {
        let n = r.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        if capture.push(&chunk[..n]) {
            if let Some(o) = &overflow {
                o.notify_one();
            }
        }
    }
}

/// Waits briefly for `reader` to hit EOF and returns what `capture` holds.
///
/// A pipe still open after the grace period (held by a process that left the
/// group) is abandoned; the bytes read until then are kept and marked as
/// truncated.
pub(crate) async fn drain(
    mut reader: JoinHandle<io::Result<()>>,
    capture: &Capture,
    program: &str,
) -> Result<(Vec<u8>, bool)> {
    let pipe_err = |source| Error::Pipe {
        program: program.to_owned(),
        source,
    };
    match tokio::time::timeout(ProcessRunner::DRAIN_TIMEOUT, &mut reader).await {
        Ok(Ok(res)) => res.map_err(pipe_err)?,
        Ok(Err(join_err)) => {
            return Err(pipe_err(io::Error::new(io::ErrorKind::Other, join_err)))
        }
        Err(_) => {
            log::warn!("Output of '{}' is still open after it exited", program);
            reader.abort();
            capture.mark_truncated();
        }
    }
    Ok(capture.take())
}
