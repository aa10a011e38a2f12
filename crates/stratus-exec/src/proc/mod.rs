//! Child-process helpers for the local invocation backend.
use std::{path::PathBuf, process::Stdio, time::Duration};

use tokio::process::{Child, Command};
use tracing::{debug, trace};

use crate::error::{ExecError, ExecResult};

/// Program spawned for every local invocation.
///
/// The serialized payload is appended as the last argument.
#[derive(Clone, Debug)]
pub struct ProcConfig {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
    /// Disable core dumps in the child (`RLIMIT_CORE = 0`).
    pub disable_core_dumps: bool,
    /// How long [`kill_graceful`] waits after SIGTERM before killing.
    pub kill_grace: Duration,
}

impl Default for ProcConfig {
    fn default() -> Self {
        Self {
            program: String::new(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
            disable_core_dumps: false,
            kill_grace: Duration::from_secs(5),
        }
    }
}

impl ProcConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

pub fn cmd_program(program: &str, args: &[String]) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args.iter().map(|s| s.as_str()));
    cmd
}

/// Spawns `cfg.program` with `payload` as its final argument.
pub fn spawn(cfg: &ProcConfig, payload: &str) -> ExecResult<Child> {
    if cfg.program.trim().is_empty() {
        return Err(ExecError::MissingProgram);
    }

    let mut cmd = cmd_program(&cfg.program, &cfg.args);
    cmd.arg(payload);
    if let Some(cwd) = &cfg.cwd {
        cmd.current_dir(cwd);
    }
    for (k, v) in &cfg.env {
        cmd.env(k, v);
    }
    cmd.stdin(Stdio::null());
    cmd.kill_on_drop(true);

    if cfg.disable_core_dumps {
        no_core_dumps(&mut cmd);
    }

    trace!(program = %cfg.program, args = ?cfg.args, "spawn");
    cmd.spawn()
        .map_err(|e| ExecError::Spawn(format!("{}: {e}", cfg.program)))
}

/// SIGTERM first where supported; a child still alive after `grace` is killed.
pub async fn kill_graceful(child: &mut Child, grace: Duration) -> std::io::Result<()> {
    cfg_if::cfg_if! {
        if #[cfg(unix)] {
            if let Some(id) = child.id()
                && let Ok(pid) = libc::pid_t::try_from(id)
            {
                // SAFETY: plain signal delivery to a pid we own.
                let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
                debug!(pid, rc, "sent SIGTERM");
                if rc == 0 {
                    match tokio::time::timeout(grace, child.wait()).await {
                        Ok(Ok(status)) => {
                            debug!(pid, %status, "exited after SIGTERM");
                            return Ok(());
                        }
                        Ok(Err(e)) => return Err(e),
                        Err(_) => debug!(pid, ?grace, "still running after grace period"),
                    }
                }
            }
        } else {
            let _ = grace;
        }
    }
    match child.kill().await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
        Err(e) => Err(e),
    }
}

fn no_core_dumps(cmd: &mut Command) {
    cfg_if::cfg_if! {
        if #[cfg(unix)] {
            // SAFETY: only async-signal-safe calls between fork and exec.
            unsafe {
                cmd.pre_exec(|| {
                    let rlim = libc::rlimit { rlim_cur: 0, rlim_max: 0 };
                    if libc::setrlimit(libc::RLIMIT_CORE, &rlim) != 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        } else {
            let _ = cmd;
            tracing::warn!("core dump limits are not supported on this platform");
        }
    }
}
