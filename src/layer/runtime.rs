//! The execution capability: the one place fetched payload text becomes live code.
//!
//! Nothing here isolates a payload. Whoever controls a layer's URL controls what
//! runs; that trust boundary is accepted rather than enforced.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};

use crate::model::config::RuntimeConfig;
use crate::model::layer::LayerId;

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("payload exited with {0}")]
    Exited(ExitStatus),

    #[error("payload I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Failed(String),
}

/// What a payload is told about itself when it runs.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub layer: LayerId,
    pub version: String,
}

/// Optional hook a running layer exposes so it can be torn down again.
pub trait Unload: Send {
    fn unload(&mut self) -> anyhow::Result<()>;
}

#[async_trait]
pub trait Executor: Send + Sync {
    /// Run `payload`. Returns once the payload finished starting up, with an
    /// unload handle if it left something resident behind.
    async fn execute(
        &self,
        payload: &str,
        context: &ExecutionContext,
    ) -> Result<Option<Box<dyn Unload>>, ExecutionError>;
}

/// Pipes payloads into an interpreter process (`node -` by default).
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    program: String,
    args: Vec<String>,
    startup_grace: Duration,
}

impl ProcessExecutor {
    pub fn new(program: impl Into<String>, args: Vec<String>, startup_grace: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            startup_grace,
        }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(
            config.interpreter.clone(),
            config.args.clone(),
            Duration::from_millis(config.startup_grace_ms),
        )
    }
}

#[async_trait]
impl Executor for ProcessExecutor {
    async fn execute(
        &self,
        payload: &str,
        context: &ExecutionContext,
    ) -> Result<Option<Box<dyn Unload>>, ExecutionError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env("COMPAT_LAYER", context.layer.as_str())
            .env("COMPAT_LAYER_VERSION", &context.version)
            .stdin(Stdio::piped());
        // Own process group, so unloading also reaches whatever the payload spawned.
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|source| ExecutionError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        let Some(mut stdin) = child.stdin.take() else {
            let _ = child.start_kill();
            return Err(ExecutionError::Failed(format!(
                "{} has no stdin to receive the payload",
                self.program
            )));
        };

        // The write runs beside the grace period: a payload that stops reading
        // must not hold up the caller.
        let layer = context.layer;
        let payload = payload.to_owned();
        tokio::spawn(async move {
            // A payload that exits early closes its end; the exit status says why.
            if let Err(err) = stdin.write_all(payload.as_bytes()).await {
                tracing::debug!("{layer} stopped reading its payload: {err}");
            }
        });

        let group = child.id();
        let waited = tokio::time::timeout(self.startup_grace, child.wait()).await;
        match waited {
            Ok(Ok(status)) if status.success() => Ok(None),
            Ok(Ok(status)) => Err(ExecutionError::Exited(status)),
            Ok(Err(err)) => Err(ExecutionError::Io(err)),
            Err(_) => {
                tracing::info!("{layer} is resident (pid {group:?})");
                Ok(Some(Box::new(ResidentProcess {
                    layer,
                    child,
                    group,
                })))
            }
        }
    }
}

/// A payload process that outlived its startup grace period.
#[derive(Debug)]
struct ResidentProcess {
    layer: LayerId,
    child: Child,
    /// Process group led by the payload; its id equals the leader's pid.
    #[cfg_attr(not(unix), allow(dead_code))]
    group: Option<u32>,
}

impl Unload for ResidentProcess {
    fn unload(&mut self) -> anyhow::Result<()> {
        #[cfg(unix)]
        if let Some(group) = self.group {
            kill_group(group)?;
        }

        if let Some(status) = self.child.try_wait()? {
            tracing::debug!("{} exited with {status}", self.layer);
            return Ok(());
        }

        self.child.start_kill()?;
        Ok(())
    }
}

#[cfg(unix)]
fn kill_group(group: u32) -> std::io::Result<()> {
    let pgid = libc::pid_t::try_from(group)
        .map_err(|_| std::io::Error::other(format!("process group {group} out of range")))?;

    // SAFETY: killpg only sends a signal; `pgid` is a group this process created.
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } == 0 {
        return Ok(());
    }

    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        // Every member already exited.
        return Ok(());
    }
    Err(err)
}
