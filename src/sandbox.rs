//! Sandboxed execution of a single bounded command.
//!
//! Each command runs in a fresh Docker container with the run's workspace
//! bind-mounted at `/workspace`: no network, capped pids, a hard memory
//! ceiling (plus equal swap ceiling), dropped capabilities and a
//! read-only root filesystem. The wall clock is enforced twice: `timeout`
//! inside the container, and a host-side kill at the limit plus a grace
//! buffer in case the inner timeout never fires.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::SandboxError;

/// Resource bounds for one sandboxed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecLimits {
    pub wall_time_ms: u64,
    pub memory_mb: u64,
    pub max_pids: u32,
}

/// One command to run inside an isolated container.
#[derive(Debug, Clone)]
pub struct ExecSpec {
    /// Runtime image, e.g. `gcc:14`.
    pub image: String,
    /// Shell command line, run via `sh -c` with `/workspace` as cwd.
    pub command: String,
    /// Host directory bind-mounted read-write at `/workspace`.
    pub workdir: PathBuf,
    pub limits: ExecLimits,
}

/// Captured outcome of a sandboxed command.
#[derive(Debug, Clone)]
pub struct ExecReport {
    /// Exit code; `None` when the host-side supervisor killed the run.
    pub exit_code: Option<i32>,
    /// Measured wall time in milliseconds.
    pub wall_time_ms: u64,
    pub stdout: String,
    pub stderr: String,
    /// stdout exceeded the capture cap; the remainder was discarded.
    pub stdout_truncated: bool,
    /// Terminated on the time budget, by either the inner `timeout` or
    /// the host-side kill.
    pub timed_out: bool,
}

impl Default for ExecReport {
    fn default() -> Self {
        Self {
            exit_code: Some(0),
            wall_time_ms: 0,
            stdout: String::new(),
            stderr: String::new(),
            stdout_truncated: false,
            timed_out: false,
        }
    }
}

/// Isolation backend running one bounded command per invocation.
///
/// Injected into the engine so tests can script outcomes and alternative
/// backends can slot in without touching judging logic.
#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn run(&self, spec: &ExecSpec, cancel: &CancellationToken) -> Result<ExecReport, SandboxError>;
}

/// `timeout` exit code when the inner time budget fires.
const TIMEOUT_EXIT_CODE: i32 = 124;
/// Docker CLI exit code for daemon-level failures (image missing, daemon
/// unreachable), as opposed to the containerized command failing.
const DOCKER_DAEMON_EXIT_CODE: i32 = 125;

/// Sandbox backed by the Docker CLI.
pub struct DockerSandbox {
    output_cap: usize,
    kill_grace: Duration,
    cpus: f64,
}

impl DockerSandbox {
    pub fn new(output_cap: usize, kill_grace: Duration, cpus: f64) -> Self {
        Self {
            output_cap,
            kill_grace,
            cpus,
        }
    }

    /// Verify the Docker daemon is reachable before accepting work.
    pub async fn probe(&self) -> Result<(), SandboxError> {
        let output = Command::new("docker")
            .args(["version", "--format", "{{.Server.Version}}"])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| SandboxError::Unavailable(format!("docker CLI not runnable: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SandboxError::Unavailable(stderr.trim().to_string()));
        }

        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        tracing::info!(server_version = %version, "Sandbox runtime available");
        Ok(())
    }

    fn build_args(&self, spec: &ExecSpec, workdir: &Path) -> Vec<String> {
        let limits = &spec.limits;
        let inner = format!(
            "timeout {:.3}s {}",
            limits.wall_time_ms as f64 / 1000.0,
            spec.command
        );

        let mut args: Vec<String> = vec!["run".into(), "--rm".into()];

        // Resource constraints
        args.push(format!("--memory={}m", limits.memory_mb));
        args.push(format!("--memory-swap={}m", limits.memory_mb));
        args.push(format!("--cpus={}", self.cpus));
        args.push(format!("--pids-limit={}", limits.max_pids));

        // Isolation: no network, no capabilities, immutable rootfs
        args.push("--network=none".into());
        args.push("--cap-drop=ALL".into());
        args.push("--read-only".into());
        args.push("--tmpfs=/tmp:rw,noexec,nosuid,size=256m".into());

        // Workspace mount
        args.push("-v".into());
        args.push(format!("{}:/workspace", workdir.display()));
        args.push("-w".into());
        args.push("/workspace".into());

        args.push(spec.image.clone());
        args.push("sh".into());
        args.push("-c".into());
        args.push(inner);

        args
    }
}

#[async_trait]
impl Sandbox for DockerSandbox {
    async fn run(&self, spec: &ExecSpec, cancel: &CancellationToken) -> Result<ExecReport, SandboxError> {
        let workdir = spec.workdir.canonicalize()?;
        let args = self.build_args(spec, &workdir);

        tracing::debug!(
            image = %spec.image,
            workdir = %workdir.display(),
            wall_time_ms = spec.limits.wall_time_ms,
            memory_mb = spec.limits.memory_mb,
            "Spawning sandbox container"
        );

        let mut child = Command::new("docker")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SandboxError::Unavailable(format!("failed to spawn docker: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::Unavailable("stdout pipe not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SandboxError::Unavailable("stderr pipe not captured".into()))?;

        let out_task = tokio::spawn(read_capped(stdout, self.output_cap));
        let err_task = tokio::spawn(read_capped(stderr, self.output_cap));

        let start = Instant::now();
        let outer = Duration::from_millis(spec.limits.wall_time_ms) + self.kill_grace;

        let waited = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            res = tokio::time::timeout(outer, child.wait()) => Some(res),
        };

        let Some(waited) = waited else {
            let _ = child.kill().await;
            out_task.abort();
            err_task.abort();
            return Err(SandboxError::Cancelled);
        };

        let (status, outer_killed) = match waited {
            Ok(Ok(status)) => (Some(status), false),
            Ok(Err(e)) => {
                let _ = child.kill().await;
                return Err(SandboxError::Io(e));
            }
            // The inner timeout should have fired already; this is the
            // hard backstop distinguishing a supervisor kill.
            Err(_elapsed) => {
                let _ = child.kill().await;
                (None, true)
            }
        };

        let wall_time_ms = start.elapsed().as_millis() as u64;
        let (stdout, stdout_truncated) = out_task.await.unwrap_or_default();
        let (stderr, _) = err_task.await.unwrap_or_default();

        let exit_code = status.and_then(|s| s.code());
        let timed_out = outer_killed || exit_code == Some(TIMEOUT_EXIT_CODE);

        if !timed_out && exit_code == Some(DOCKER_DAEMON_EXIT_CODE) {
            return Err(classify_daemon_failure(&spec.image, &stderr));
        }

        tracing::debug!(
            exit_code = ?exit_code,
            wall_time_ms,
            timed_out,
            "Sandbox container finished"
        );

        Ok(ExecReport {
            exit_code,
            wall_time_ms,
            stdout,
            stderr,
            stdout_truncated,
            timed_out,
        })
    }
}

fn classify_daemon_failure(image: &str, stderr: &str) -> SandboxError {
    let lowered = stderr.to_lowercase();
    if lowered.contains("unable to find image")
        || lowered.contains("no such image")
        || lowered.contains("pull access denied")
        || lowered.contains("manifest unknown")
    {
        SandboxError::ImageMissing(image.to_string())
    } else {
        SandboxError::Unavailable(stderr.trim().to_string())
    }
}

/// Read a stream up to `cap` bytes; the remainder is drained and
/// discarded so the child never blocks on a full pipe.
async fn read_capped<R: AsyncRead + Unpin>(mut reader: R, cap: usize) -> (String, bool) {
    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 8 * 1024];
    let mut truncated = false;

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if buf.len() < cap {
                    let keep = n.min(cap - buf.len());
                    buf.extend_from_slice(&chunk[..keep]);
                    if keep < n {
                        truncated = true;
                    }
                } else {
                    truncated = true;
                }
            }
            Err(_) => break,
        }
    }

    (String::from_utf8_lossy(&buf).into_owned(), truncated)
}

#[cfg(test)]
pub(crate) mod fake {
    //! Scripted sandbox for exercising the engine and state machine.

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    pub(crate) struct FakeSandbox {
        script: Mutex<VecDeque<Result<ExecReport, SandboxError>>>,
        calls: Mutex<Vec<ExecSpec>>,
        hold: Duration,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    impl FakeSandbox {
        pub fn new() -> Self {
            Self {
                script: Mutex::new(VecDeque::new()),
                calls: Mutex::new(Vec::new()),
                hold: Duration::ZERO,
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
            }
        }

        /// Keep each run in flight for `hold`, for concurrency assertions.
        pub fn with_hold(hold: Duration) -> Self {
            Self {
                hold,
                ..Self::new()
            }
        }

        pub fn push_ok(&self, report: ExecReport) {
            self.script.lock().unwrap().push_back(Ok(report));
        }

        pub fn push_err(&self, err: SandboxError) {
            self.script.lock().unwrap().push_back(Err(err));
        }

        pub fn calls(&self) -> Vec<ExecSpec> {
            self.calls.lock().unwrap().clone()
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        pub fn max_active(&self) -> usize {
            self.max_active.load(Ordering::SeqCst)
        }

        /// Report with the given stdout and a clean exit.
        pub fn ok_report(stdout: &str) -> ExecReport {
            ExecReport {
                stdout: stdout.to_string(),
                wall_time_ms: 5,
                ..ExecReport::default()
            }
        }
    }

    #[async_trait]
    impl Sandbox for FakeSandbox {
        async fn run(&self, spec: &ExecSpec, _cancel: &CancellationToken) -> Result<ExecReport, SandboxError> {
            self.calls.lock().unwrap().push(spec.clone());

            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            if !self.hold.is_zero() {
                tokio::time::sleep(self.hold).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);

            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ExecReport::default()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_capped_keeps_everything_under_cap() {
        let data = b"hello world".as_slice();
        let (text, truncated) = read_capped(data, 64).await;
        assert_eq!(text, "hello world");
        assert!(!truncated);
    }

    #[tokio::test]
    async fn read_capped_discards_beyond_cap() {
        let data = vec![b'a'; 100 * 1024];
        let (text, truncated) = read_capped(data.as_slice(), 64 * 1024).await;
        assert_eq!(text.len(), 64 * 1024);
        assert!(truncated);
    }

    #[tokio::test]
    async fn read_capped_exact_cap_is_not_truncated() {
        let data = vec![b'x'; 4096];
        let (text, truncated) = read_capped(data.as_slice(), 4096).await;
        assert_eq!(text.len(), 4096);
        assert!(!truncated);
    }

    #[test]
    fn daemon_failure_classification() {
        let err = classify_daemon_failure("gcc:14", "Unable to find image 'gcc:14' locally");
        assert!(matches!(err, SandboxError::ImageMissing(_)));

        let err = classify_daemon_failure("gcc:14", "Cannot connect to the Docker daemon");
        assert!(matches!(err, SandboxError::Unavailable(_)));
    }

    #[test]
    fn run_args_enforce_isolation() {
        let sandbox = DockerSandbox::new(64 * 1024, Duration::from_millis(1000), 1.0);
        let spec = ExecSpec {
            image: "gcc:14".into(),
            command: "./main < input.txt".into(),
            workdir: PathBuf::from("/tmp/ws"),
            limits: ExecLimits {
                wall_time_ms: 2000,
                memory_mb: 256,
                max_pids: 64,
            },
        };
        let args = sandbox.build_args(&spec, &spec.workdir);

        assert!(args.contains(&"--network=none".to_string()));
        assert!(args.contains(&"--pids-limit=64".to_string()));
        assert!(args.contains(&"--memory=256m".to_string()));
        assert!(args.contains(&"--memory-swap=256m".to_string()));
        assert!(args.contains(&"--cap-drop=ALL".to_string()));
        assert!(args.contains(&"-w".to_string()));
        // inner timeout wraps the command
        let inner = args.last().unwrap();
        assert!(inner.starts_with("timeout 2.000s "));
        assert!(inner.ends_with("./main < input.txt"));
    }
}
