//! Shell execution for forwarded commands.
//!
//! The agent trusts its caller completely; the control panel is the only gate.
//! What this module adds is containment of the child process: a fixed working
//! directory, an allow-listed environment, an optional uid/gid drop, a hard
//! deadline after which the child is killed, and a cap on captured output.

use std::{
    path::PathBuf,
    process::{ExitStatus, Stdio},
    sync::Arc,
    time::Duration,
};

use thiserror::Error;
use tokio::{
    io::AsyncReadExt,
    process::{Child, ChildStderr, ChildStdout, Command},
    time::timeout,
};
use tracing::{debug, warn};

const MAX_STDERR_BYTES: u64 = 64 * 1024;
const STDERR_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ExecPolicy {
    pub shell: PathBuf,
    pub workdir: PathBuf,
    pub timeout: Duration,
    pub env_allow: Vec<String>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub max_output_bytes: usize,
}

impl Default for ExecPolicy {
    fn default() -> Self {
        Self {
            shell: PathBuf::from("sh"),
            workdir: PathBuf::from("/"),
            timeout: Duration::from_secs(60),
            env_allow: vec!["PATH".into(), "HOME".into(), "LANG".into()],
            uid: None,
            gid: None,
            max_output_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to spawn shell: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("failed to collect command output: {0}")]
    Io(#[source] std::io::Error),
    #[error("{status}{}", stderr_suffix(.stderr))]
    Failed { status: ExitStatus, stderr: String },
    #[error("command timed out after {0:?}")]
    TimedOut(Duration),
    #[error("command output exceeded {limit} bytes")]
    OutputTooLarge { limit: usize },
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}

#[derive(Debug, Clone)]
pub struct Executor {
    policy: Arc<ExecPolicy>,
}

impl Executor {
    pub fn new(policy: ExecPolicy) -> Self {
        Self {
            policy: Arc::new(policy),
        }
    }

    pub fn policy(&self) -> &ExecPolicy {
        &self.policy
    }

    /// Runs `command` through `sh -c` and returns its standard output.
    ///
    /// Output is only returned for a zero exit status; a failing command
    /// reports its status and standard error instead of partial output.
    pub async fn run(&self, command: &str) -> Result<Vec<u8>, ExecError> {
        let policy = &self.policy;
        let mut cmd = Command::new(&policy.shell);
        cmd.arg("-c")
            .arg(command)
            .current_dir(&policy.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .env_clear();
        for key in &policy.env_allow {
            if let Some(value) = std::env::var_os(key) {
                cmd.env(key, value);
            }
        }
        #[cfg(unix)]
        {
            if let Some(gid) = policy.gid {
                cmd.gid(gid);
            }
            if let Some(uid) = policy.uid {
                cmd.uid(uid);
            }
        }

        debug!(command, workdir = %policy.workdir.display(), "spawning shell");
        let mut child = cmd.spawn().map_err(ExecError::Spawn)?;
        let stdout = child.stdout.take();
        let mut stderr = tokio::spawn(drain_stderr(child.stderr.take()));

        // Dropping the collector on timeout drops the child, which kills it.
        let collected = timeout(
            policy.timeout,
            collect_stdout(child, stdout, policy.max_output_bytes),
        )
        .await;
        let (status, output) = match collected {
            Ok(Ok(collected)) => collected,
            Ok(Err(err)) => {
                stderr.abort();
                return Err(err);
            }
            Err(_) => {
                stderr.abort();
                warn!(command, timeout = ?policy.timeout, "command timed out");
                return Err(ExecError::TimedOut(policy.timeout));
            }
        };

        if !status.success() {
            // A background grandchild may hold stderr open past the exit.
            let stderr = match timeout(STDERR_GRACE, &mut stderr).await {
                Ok(Ok(captured)) => captured.map_err(ExecError::Io)?,
                Ok(Err(err)) => {
                    debug!(error = %err, "stderr reader stopped");
                    Vec::new()
                }
                Err(_) => {
                    stderr.abort();
                    Vec::new()
                }
            };
            return Err(ExecError::Failed {
                status,
                stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
            });
        }
        stderr.abort();
        Ok(output)
    }
}

/// Reads at most `limit` bytes of stdout. One byte more kills the child.
async fn collect_stdout(
    mut child: Child,
    stdout: Option<ChildStdout>,
    limit: usize,
) -> Result<(ExitStatus, Vec<u8>), ExecError> {
    let mut output = Vec::new();
    if let Some(stdout) = stdout {
        stdout
            .take(limit as u64 + 1)
            .read_to_end(&mut output)
            .await
            .map_err(ExecError::Io)?;
    }
    if output.len() > limit {
        if let Err(err) = child.kill().await {
            debug!(error = %err, "failed to kill command after output overflow");
        }
        warn!(limit, "command output over limit");
        return Err(ExecError::OutputTooLarge { limit });
    }
    let status = child.wait().await.map_err(ExecError::Io)?;
    Ok((status, output))
}

/// Keeps the first bytes of stderr for the failure message and discards the
/// rest so a chatty child never blocks on a full pipe.
async fn drain_stderr(stderr: Option<ChildStderr>) -> std::io::Result<Vec<u8>> {
    let mut captured = Vec::new();
    if let Some(mut stderr) = stderr {
        (&mut stderr)
            .take(MAX_STDERR_BYTES)
            .read_to_end(&mut captured)
            .await?;
        tokio::io::copy(&mut stderr, &mut tokio::io::sink()).await?;
    }
    Ok(captured)
}
