// Subprocess spawner - starts `courier worker --target=<queue>` children
// reason: tokio::process for non-blocking wait, nix for SIGTERM/SIGKILL
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use courier_core::domain::QueueName;
use courier_core::port::{ProcessError, ProcessSpawner, ProcessStatus, WorkerProcess};

/// Environment passed to workers unless configured otherwise
///
/// A trailing `*` matches by prefix.
pub const DEFAULT_ENV_ALLOWLIST: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "LANG",
    "XDG_CONFIG_HOME",
    "RUST_LOG",
    "COURIER_*",
    "OTEL_*",
];

/// Spawns worker runtimes as child processes with an allowlisted environment
pub struct SubprocessSpawner {
    program: PathBuf,
    args: Vec<String>,
    env_allowlist: Vec<String>,
}

impl SubprocessSpawner {
    /// Create a spawner
    ///
    /// # Arguments
    /// * `program` - Executable to run (usually the current `courier` binary)
    /// * `args` - Arguments placed before `--target=<queue>`
    ///
    /// # Example
    /// ```ignore
    /// let spawner = SubprocessSpawner::new(std::env::current_exe()?, vec!["worker".into()]);
    /// ```
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env_allowlist: DEFAULT_ENV_ALLOWLIST.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_env_allowlist(mut self, allowlist: Vec<String>) -> Self {
        self.env_allowlist = allowlist;
        self
    }

    fn is_allowed(&self, key: &str) -> bool {
        self.env_allowlist.iter().any(|entry| match entry.strip_suffix('*') {
            Some(prefix) => key.starts_with(prefix),
            None => entry == key,
        })
    }

    /// Filter environment variables to the allowlist
    fn filter_env<I>(&self, vars: I) -> Vec<(String, String)>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        vars.into_iter().filter(|(k, _)| self.is_allowed(k)).collect()
    }
}

#[async_trait]
impl ProcessSpawner for SubprocessSpawner {
    async fn spawn(&self, target: &QueueName) -> Result<Box<dyn WorkerProcess>, ProcessError> {
        let env = self.filter_env(std::env::vars());

        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(format!("--target={}", target))
            .env_clear()
            .envs(env)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| {
                ProcessError::SpawnFailed(format!("{}: {}", self.program.display(), e))
            })?;

        let pid = child.id();
        info!(queue = %target, pid = ?pid, "Worker process started");

        Ok(Box::new(SubprocessHandle { child, pid }))
    }
}

/// Handle to a spawned worker
pub struct SubprocessHandle {
    child: Child,
    pid: Option<u32>,
}

impl SubprocessHandle {
    #[cfg(unix)]
    fn signal(&self, signal: nix::sys::signal::Signal) -> Result<bool, ProcessError> {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        let Some(pid) = self.pid else {
            return Ok(false);
        };
        match kill(Pid::from_raw(pid as i32), signal) {
            Ok(()) => Ok(true),
            Err(Errno::ESRCH) => Ok(false),
            Err(e) => Err(ProcessError::Signal(format!("{:?} to {}: {}", signal, pid, e))),
        }
    }
}

#[async_trait]
impl WorkerProcess for SubprocessHandle {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn poll_status(&mut self) -> ProcessStatus {
        match self.child.try_wait() {
            Ok(Some(status)) => ProcessStatus::Exited(status.code()),
            Ok(None) => ProcessStatus::Running,
            Err(e) if is_no_child(&e) => ProcessStatus::Vanished,
            Err(e) => ProcessStatus::Undetermined(e.to_string()),
        }
    }

    async fn reap(&mut self) -> Result<Option<i32>, ProcessError> {
        match self.child.wait().await {
            Ok(status) => Ok(status.code()),
            Err(e) if is_no_child(&e) => {
                Err(ProcessError::NoSuchProcess(self.pid.unwrap_or_default()))
            }
            Err(e) => Err(ProcessError::Wait(e.to_string())),
        }
    }

    /// Kill with SIGTERM first, then SIGKILL if still running after `grace`
    async fn terminate(&mut self, grace: Duration) -> Result<(), ProcessError> {
        if !matches!(self.poll_status(), ProcessStatus::Running) {
            return Ok(());
        }

        #[cfg(unix)]
        {
            use nix::sys::signal::Signal;

            debug!(pid = ?self.pid, "Sending SIGTERM");
            if !self.signal(Signal::SIGTERM)? {
                return Ok(());
            }

            match tokio::time::timeout(grace, self.child.wait()).await {
                Ok(Ok(status)) => {
                    info!(pid = ?self.pid, exit_code = ?status.code(), "Worker exited after SIGTERM");
                    return Ok(());
                }
                Ok(Err(e)) => return Err(ProcessError::Wait(e.to_string())),
                Err(_) => {
                    warn!(pid = ?self.pid, "Worker did not exit after SIGTERM, sending SIGKILL");
                }
            }
        }

        #[cfg(not(unix))]
        let _ = grace;

        self.child
            .kill()
            .await
            .map_err(|e| ProcessError::Signal(format!("SIGKILL failed: {}", e)))
    }
}

fn is_no_child(err: &std::io::Error) -> bool {
    #[cfg(unix)]
    {
        err.raw_os_error() == Some(nix::errno::Errno::ECHILD as i32)
    }
    #[cfg(not(unix))]
    {
        err.kind() == std::io::ErrorKind::NotFound
    }
}
