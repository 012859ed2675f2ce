//! Bounded subprocess execution.
//!
//! The child runs with no shell, a cleaned environment, best-effort kernel
//! resource limits, and its own session so that a group kill reaps any
//! grandchildren. Stdout and stderr are drained concurrently with hard byte
//! caps; the pipes are always read to EOF so a chatty child never blocks on
//! a full pipe after its cap is reached.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::errors::ToolError;

/// Grace between the polite and the forced kill on timeout.
const TERM_GRACE: Duration = Duration::from_secs(2);

/// Address-space cap for children, bytes.
const CHILD_ADDRESS_SPACE_BYTES: u64 = 512 * 1024 * 1024;

/// File-descriptor cap for children.
const CHILD_MAX_FDS: u64 = 256;

/// Headroom added to the CPU-time soft limit over the wall-clock timeout.
const CPU_LIMIT_HEADROOM_SEC: u64 = 5;

/// One fully-shaped spawn request.
#[derive(Debug)]
pub struct ExecutionRequest {
    /// Binary name to resolve against PATH.
    pub command: String,
    /// Shaped argument vector (target not included).
    pub args: Vec<String>,
    /// Target, appended as the final argument.
    pub target: String,
    /// Wall-clock timeout enforced by the watchdog.
    pub timeout: Duration,
    /// Stdout byte cap.
    pub max_stdout_bytes: usize,
    /// Stderr byte cap.
    pub max_stderr_bytes: usize,
}

/// Captured output of a child that exited (on its own).
#[derive(Debug)]
pub struct CapturedOutput {
    /// Decoded stdout, cut at the byte cap.
    pub stdout: String,
    /// Decoded stderr, cut at the byte cap.
    pub stderr: String,
    /// Whether stdout exceeded its cap.
    pub truncated_stdout: bool,
    /// Whether stderr exceeded its cap.
    pub truncated_stderr: bool,
    /// Child exit code.
    pub returncode: i32,
    /// Wall-clock seconds from spawn to termination.
    pub elapsed_sec: f64,
}

/// Resolve `command` to an absolute path, once per call.
pub fn resolve_command(command: &str) -> Result<PathBuf, ToolError> {
    which::which(command).map_err(|_| ToolError::CommandNotFound {
        command: command.to_string(),
    })
}

/// Spawn the child and capture its bounded output.
///
/// Timeout escalation: SIGTERM to the process group, a short grace, then
/// SIGKILL to the group. Partial output is preserved in the error.
pub async fn execute(request: ExecutionRequest) -> Result<CapturedOutput, ToolError> {
    let resolved = resolve_command(&request.command)?;

    let mut command = Command::new(&resolved);
    command
        .args(&request.args)
        .arg(&request.target)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .env_clear()
        .env("LANG", "C.UTF-8")
        .env("LC_ALL", "C.UTF-8")
        .kill_on_drop(true);
    if let Some(path) = std::env::var_os("PATH") {
        command.env("PATH", path);
    }
    apply_child_limits(&mut command, request.timeout);

    let started = Instant::now();
    let mut child = command.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ToolError::CommandNotFound {
                command: request.command.clone(),
            }
        } else {
            ToolError::SpawnFailed {
                command: request.command.clone(),
                reason: e.to_string(),
            }
        }
    })?;
    let pid = child.id();
    let mut group_guard = GroupKillGuard { pid };

    let stdout = child.stdout.take().ok_or_else(|| ToolError::Internal {
        reason: "child stdout pipe missing".to_string(),
    })?;
    let stderr = child.stderr.take().ok_or_else(|| ToolError::Internal {
        reason: "child stderr pipe missing".to_string(),
    })?;
    let stdout_task = tokio::spawn(drain_capped(stdout, request.max_stdout_bytes));
    let stderr_task = tokio::spawn(drain_capped(stderr, request.max_stderr_bytes));

    let waited = tokio::select! {
        status = child.wait() => Some(status),
        _ = tokio::time::sleep(request.timeout) => None,
    };

    match waited {
        Some(Ok(status)) => {
            let (stdout, truncated_stdout) = join_drain(stdout_task).await;
            let (stderr, truncated_stderr) = join_drain(stderr_task).await;
            group_guard.disarm();
            let elapsed_sec = started.elapsed().as_secs_f64();
            debug!(
                command = %request.command,
                returncode = exit_code(&status),
                elapsed_sec,
                "subprocess exited"
            );
            Ok(CapturedOutput {
                stdout: String::from_utf8_lossy(&stdout).into_owned(),
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
                truncated_stdout,
                truncated_stderr,
                returncode: exit_code(&status),
                elapsed_sec,
            })
        }
        Some(Err(e)) => {
            // wait() itself failed; make sure nothing lingers.
            terminate_group(pid, &mut child).await;
            group_guard.disarm();
            Err(ToolError::Internal {
                reason: format!("failed to wait for child: {e}"),
            })
        }
        None => {
            warn!(
                command = %request.command,
                timeout_sec = request.timeout.as_secs_f64(),
                "subprocess timed out, terminating process group"
            );
            terminate_group(pid, &mut child).await;
            group_guard.disarm();
            let (stdout, truncated_stdout) = join_drain(stdout_task).await;
            let (stderr, truncated_stderr) = join_drain(stderr_task).await;
            Err(ToolError::Timeout {
                timeout_sec: request.timeout.as_secs_f64(),
                stdout: String::from_utf8_lossy(&stdout).into_owned(),
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
                truncated_stdout,
                truncated_stderr,
                elapsed_sec: started.elapsed().as_secs_f64(),
            })
        }
    }
}

/// Read a pipe to EOF, keeping at most `cap` bytes.
///
/// Bytes past the cap are consumed and discarded so the child never stalls
/// on a full pipe; the flag records that the cap was exceeded.
async fn drain_capped<R>(mut reader: R, cap: usize) -> (Vec<u8>, bool)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; 8192];
    let mut out = Vec::new();
    let mut truncated = false;
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if out.len() < cap {
                    let take = n.min(cap - out.len());
                    out.extend_from_slice(&chunk[..take]);
                    if take < n {
                        truncated = true;
                    }
                } else {
                    truncated = true;
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
    (out, truncated)
}

async fn join_drain(task: JoinHandle<(Vec<u8>, bool)>) -> (Vec<u8>, bool) {
    task.await.unwrap_or_else(|e| {
        warn!(error = %e, "output drain task failed");
        (Vec::new(), false)
    })
}

fn exit_code(status: &std::process::ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status
            .code()
            .or_else(|| status.signal().map(|sig| 128 + sig))
            .unwrap_or(-1)
    }
    #[cfg(not(unix))]
    {
        status.code().unwrap_or(-1)
    }
}

/// Start the child in its own session with kernel resource caps.
///
/// All limits are best-effort: a kernel that rejects one of them must not
/// prevent the spawn.
#[cfg(unix)]
fn apply_child_limits(command: &mut Command, timeout: Duration) {
    use std::os::unix::process::CommandExt;

    let cpu_limit = timeout.as_secs().saturating_add(CPU_LIMIT_HEADROOM_SEC).max(1);
    unsafe {
        command.pre_exec(move || {
            if libc::setsid() == -1 {
                // Already a session leader; fall back to a fresh group.
                libc::setpgid(0, 0);
            }
            let limit = |value: u64| libc::rlimit {
                rlim_cur: value as libc::rlim_t,
                rlim_max: value as libc::rlim_t,
            };
            // Best-effort: ignore rejections, the spawn must proceed.
            libc::setrlimit(libc::RLIMIT_CPU, &limit(cpu_limit));
            libc::setrlimit(libc::RLIMIT_AS, &limit(CHILD_ADDRESS_SPACE_BYTES));
            libc::setrlimit(libc::RLIMIT_NOFILE, &limit(CHILD_MAX_FDS));
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn apply_child_limits(_command: &mut Command, _timeout: Duration) {}

/// SIGTERM the group, wait the grace period, then SIGKILL the group.
async fn terminate_group(pid: Option<u32>, child: &mut Child) {
    signal_group(pid, Signal::Term);
    match tokio::time::timeout(TERM_GRACE, child.wait()).await {
        Ok(_) => return,
        Err(_) => {
            debug!("child ignored SIGTERM, escalating to SIGKILL");
        }
    }
    signal_group(pid, Signal::Kill);
    let _ = child.wait().await;
}

enum Signal {
    Term,
    Kill,
}

/// Best-effort signal to the child's whole process group.
#[cfg(unix)]
fn signal_group(pid: Option<u32>, signal: Signal) {
    let Some(pid) = pid else { return };
    let signum = match signal {
        Signal::Term => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    unsafe {
        let pgid = libc::getpgid(pid as libc::pid_t);
        if pgid > 0 {
            libc::killpg(pgid, signum);
        } else {
            libc::kill(pid as libc::pid_t, signum);
        }
    }
}

#[cfg(not(unix))]
fn signal_group(_pid: Option<u32>, _signal: Signal) {}

/// SIGKILLs the group if execution is cancelled mid-flight.
///
/// `kill_on_drop` only reaps the direct child; a tool that forked helpers
/// would leave them running when the caller disappears at an await point.
struct GroupKillGuard {
    pid: Option<u32>,
}

impl GroupKillGuard {
    fn disarm(&mut self) {
        self.pid = None;
    }
}

impl Drop for GroupKillGuard {
    fn drop(&mut self) {
        if self.pid.is_some() {
            signal_group(self.pid, Signal::Kill);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(command: &str, args: &[&str], target: &str) -> ExecutionRequest {
        ExecutionRequest {
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            target: target.to_string(),
            timeout: Duration::from_secs(10),
            max_stdout_bytes: 64 * 1024,
            max_stderr_bytes: 64 * 1024,
        }
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        // `sh -c 'echo hi' target` binds the target to $0 and runs the script.
        let output = execute(request("sh", &["-c", "echo hi"], "target"))
            .await
            .expect("execute");
        assert_eq!(output.stdout.trim(), "hi");
        assert_eq!(output.returncode, 0);
        assert!(!output.truncated_stdout);
        assert!(output.elapsed_sec >= 0.0);
    }

    #[tokio::test]
    async fn reports_child_exit_code() {
        let output = execute(request("sh", &["-c", "echo err >&2; exit 3"], "x"))
            .await
            .expect("execute");
        assert_eq!(output.returncode, 3);
        assert_eq!(output.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn missing_binary_is_not_found() {
        let err = execute(request("warden-no-such-binary", &[], "x")).await.unwrap_err();
        assert!(matches!(err, ToolError::CommandNotFound { .. }));
    }

    #[tokio::test]
    async fn timeout_preserves_partial_output() {
        let mut req = request("sh", &["-c", "echo partial; sleep 30"], "x");
        req.timeout = Duration::from_millis(300);
        let started = Instant::now();
        let err = execute(req).await.unwrap_err();
        match err {
            ToolError::Timeout { stdout, elapsed_sec, .. } => {
                assert_eq!(stdout.trim(), "partial");
                assert!(elapsed_sec >= 0.3);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        // SIGTERM kills the sleep immediately; no 2s grace should be needed,
        // but allow for slow CI.
        assert!(started.elapsed() < Duration::from_secs(8));
    }

    #[tokio::test]
    async fn output_is_truncated_at_the_cap() {
        let mut req = request("sh", &["-c", "head -c 100000 /dev/zero | tr '\\0' 'a'"], "x");
        req.max_stdout_bytes = 1000;
        let output = execute(req).await.expect("execute");
        assert!(output.truncated_stdout);
        assert_eq!(output.stdout.len(), 1000);
        assert_eq!(output.returncode, 0);
    }

    #[tokio::test]
    async fn environment_is_cleaned() {
        std::env::set_var("WARDEN_EXEC_TEST_LEAK", "leaked");
        let output = execute(request(
            "sh",
            &["-c", "echo \"[${WARDEN_EXEC_TEST_LEAK}][${LANG}]\""],
            "x",
        ))
        .await
        .expect("execute");
        std::env::remove_var("WARDEN_EXEC_TEST_LEAK");
        assert_eq!(output.stdout.trim(), "[][C.UTF-8]");
    }

    #[tokio::test]
    async fn group_kill_reaps_grandchildren() {
        // The child forks a grandchild that would outlive a plain kill; the
        // group SIGTERM reaches it too, so the whole call stays fast.
        let mut req = request("sh", &["-c", "sleep 30 & wait"], "x");
        req.timeout = Duration::from_millis(200);
        let started = Instant::now();
        let err = execute(req).await.unwrap_err();
        assert!(matches!(err, ToolError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(8));
    }
}
