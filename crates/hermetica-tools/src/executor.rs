//! Single-shot subprocess execution with streamed stdout.
//!
//! [`ProcessExecutor::execute`] spawns one external command, hands every
//! stdout line to a [`LineHandler`] as soon as it is read, drains stderr on a
//! side task, and enforces an optional deadline. There are no retries here.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use hermetica_types::{HermeticaError, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// LineHandler
// ---------------------------------------------------------------------------

/// Consumer of subprocess output, one line at a time.
///
/// Lines arrive without their trailing `\n` (or `\r\n`). The bytes are opaque:
/// deciding whether a line is valid is the handler's business.
#[async_trait]
pub trait LineHandler: Send {
    async fn handle_line(&mut self, line: &[u8]) -> Result<()>;
}

/// Keeps every line in memory.
#[derive(Debug, Default)]
pub struct LineCollector {
    pub lines: Vec<Vec<u8>>,
}

impl LineCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines decoded lossily as UTF-8.
    pub fn to_strings(&self) -> Vec<String> {
        self.lines
            .iter()
            .map(|l| String::from_utf8_lossy(l).into_owned())
            .collect()
    }
}

#[async_trait]
impl LineHandler for LineCollector {
    async fn handle_line(&mut self, line: &[u8]) -> Result<()> {
        self.lines.push(line.to_vec());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ProcessSpec
// ---------------------------------------------------------------------------

/// Everything needed to launch one external command.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
    /// `None` or zero means no deadline.
    pub timeout: Option<Duration>,
    /// Name used in logs and errors. Defaults to the program's file name.
    pub label: Option<String>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
            timeout: None,
            label: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout.filter(|d| !d.is_zero());
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn tool_name(&self) -> String {
        if let Some(ref label) = self.label {
            return label.clone();
        }
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.to_string_lossy().into_owned())
    }
}

/// What a successful execution produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionSummary {
    pub lines: u64,
    pub duration_ms: u64,
}

// ---------------------------------------------------------------------------
// ProcessExecutor
// ---------------------------------------------------------------------------

/// Spawns external processes and streams their output.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    grace_period: Duration,
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessExecutor {
    pub fn new() -> Self {
        Self {
            grace_period: Duration::from_secs(2),
        }
    }

    /// How long a timed-out process gets between SIGTERM and SIGKILL.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Run `spec` to completion, feeding each stdout line to `handler`.
    ///
    /// Errors:
    /// - `ToolSpawn` when the process cannot be started
    /// - `LineHandler` when `handler` rejects a line; streaming stops at once
    /// - `ToolOutput` when stdout cannot be read
    /// - `ToolTimeout` when the deadline passes; the process group is terminated
    /// - `ToolFailed` when the process exits unsuccessfully
    ///
    /// If this future is dropped before the child is reaped (an enclosing
    /// timeout, Ctrl-C), the child's whole process group is killed.
    pub async fn execute(
        &self,
        spec: ProcessSpec,
        handler: &mut dyn LineHandler,
    ) -> Result<ExecutionSummary> {
        let tool = spec.tool_name();
        let timeout_ms = spec.timeout.map(|d| d.as_millis() as u64);

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref dir) = spec.cwd {
            cmd.current_dir(dir);
        }
        // Own process group, so termination reaches the tool's children too.
        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        tracing::info!(
            tool = %tool,
            program = %spec.program.display(),
            args = ?spec.args,
            timeout_ms = ?timeout_ms,
            "Starting tool"
        );

        let start = Instant::now();
        let deadline = spec.timeout.map(|d| start + d);

        let mut child = cmd.spawn().map_err(|e| HermeticaError::ToolSpawn {
            tool: tool.clone(),
            message: e.to_string(),
        })?;
        // Declared after `child` so it drops first.
        let mut group = GroupGuard::new(&child);
        let stdout = child.stdout.take().ok_or_else(|| HermeticaError::ToolSpawn {
            tool: tool.clone(),
            message: "stdout was not captured".into(),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| HermeticaError::ToolSpawn {
            tool: tool.clone(),
            message: "stderr was not captured".into(),
        })?;
        let mut drain = tokio::spawn(drain_stderr(tool.clone(), stderr));

        let timed_out = || HermeticaError::ToolTimeout {
            tool: tool.clone(),
            timeout_ms: timeout_ms.unwrap_or_default(),
        };

        let lines = match within(deadline, stream_lines(&tool, stdout, handler)).await {
            Some(Ok(lines)) => lines,
            Some(Err(e)) => {
                drain.abort();
                if matches!(e, HermeticaError::LineHandler { .. }) {
                    tracing::warn!(tool = %tool, error = %e, "Tool output rejected");
                } else {
                    tracing::warn!(tool = %tool, error = %e, "Reading tool output failed");
                }
                return Err(e);
            }
            None => {
                self.terminate(&tool, &mut child).await;
                drain.abort();
                return Err(timed_out());
            }
        };

        let status = match within(deadline, child.wait()).await {
            Some(status) => status?,
            None => {
                self.terminate(&tool, &mut child).await;
                drain.abort();
                return Err(timed_out());
            }
        };
        group.disarm();
        // A descendant may still hold stderr open.
        if tokio::time::timeout(self.grace_period, &mut drain).await.is_err() {
            drain.abort();
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        if !status.success() {
            let described = describe_status(status);
            tracing::warn!(tool = %tool, status = %described, duration_ms, "Tool failed");
            return Err(HermeticaError::ToolFailed {
                tool,
                status: described,
                exit_code: status.code(),
            });
        }

        tracing::info!(tool = %tool, lines, duration_ms, "Tool completed");
        Ok(ExecutionSummary { lines, duration_ms })
    }

    /// SIGTERM the process group, then SIGKILL once the grace period lapses.
    async fn terminate(&self, tool: &str, child: &mut Child) {
        tracing::warn!(tool = %tool, "Deadline exceeded, terminating tool");
        #[cfg(unix)]
        {
            if let Some(pid) = child.id() {
                unsafe {
                    libc::kill(-(pid as i32), libc::SIGTERM);
                }
            }
            tokio::select! {
                _ = child.wait() => {}
                _ = tokio::time::sleep(self.grace_period) => {
                    if let Some(pid) = child.id() {
                        unsafe {
                            libc::kill(-(pid as i32), libc::SIGKILL);
                        }
                    }
                    let _ = child.kill().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = child.kill().await;
        }
    }
}

/// Kills a child's process group on drop unless the child has been reaped.
///
/// `kill_on_drop` only reaches the direct child; tools that fork workers
/// would otherwise leave them running when an execution is cancelled.
struct GroupGuard {
    pgid: Option<u32>,
}

impl GroupGuard {
    fn new(child: &Child) -> Self {
        Self { pgid: child.id() }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            if let Some(pgid) = self.pgid.take() {
                unsafe {
                    libc::kill(-(pgid as i32), libc::SIGKILL);
                }
            }
        }
    }
}

/// Await `fut`, giving up at `deadline`. `None` means the deadline passed.
async fn within<F: Future>(deadline: Option<Instant>, fut: F) -> Option<F::Output> {
    match deadline {
        Some(at) => tokio::time::timeout_at(at, fut).await.ok(),
        None => Some(fut.await),
    }
}

async fn stream_lines<R: AsyncRead + Unpin>(
    tool: &str,
    stdout: R,
    handler: &mut dyn LineHandler,
) -> Result<u64> {
    let mut segments = BufReader::new(stdout).split(b'\n');
    let mut count = 0u64;
    loop {
        let next = segments
            .next_segment()
            .await
            .map_err(|e| HermeticaError::ToolOutput {
                tool: tool.to_string(),
                message: e.to_string(),
            })?;
        let Some(mut line) = next else {
            break;
        };
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        handler
            .handle_line(&line)
            .await
            .map_err(|e| HermeticaError::LineHandler {
                tool: tool.to_string(),
                message: e.to_string(),
            })?;
        count += 1;
    }
    Ok(count)
}

async fn drain_stderr(tool: String, stderr: ChildStderr) {
    let mut segments = BufReader::new(stderr).split(b'\n');
    while let Ok(Some(line)) = segments.next_segment().await {
        if !line.is_empty() {
            tracing::debug!(tool = %tool, line = %String::from_utf8_lossy(&line), "stderr");
        }
    }
}

fn describe_status(status: ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exit code {}", code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("signal {}", signal);
        }
    }
    "unknown status".into()
}
