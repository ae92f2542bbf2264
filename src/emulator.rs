//! Sandboxed replay of gameplay logs

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::VerificationError;

/// Everything the replay needs, exchanged through the filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayInvocation {
    pub cartridge: PathBuf,
    pub replay_log: PathBuf,
    pub outcard: PathBuf,
    pub outhash: PathBuf,
    pub entropy: String,
}

/// How a replay ended. Only `Completed` means the artifacts can be trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayExit {
    Completed,
    Failed { code: Option<i32> },
    TimedOut(Duration),
}

impl From<ExitStatus> for ReplayExit {
    fn from(status: ExitStatus) -> Self {
        if status.success() {
            ReplayExit::Completed
        } else {
            ReplayExit::Failed { code: status.code() }
        }
    }
}

#[async_trait]
pub trait Emulator: Send + Sync {
    /// Run the replay to completion.
    ///
    /// Errors are reserved for the process boundary itself (spawn or wait
    /// failures); an unsuccessful replay is a [`ReplayExit`].
    async fn run(&self, invocation: &ReplayInvocation) -> Result<ReplayExit, VerificationError>;
}

/// Runs `riv-run` inside the RIVOS chroot
pub struct RivEmulator {
    chroot_bin: PathBuf,
    rivos_root: PathBuf,
    timeout: Option<Duration>,
}

impl RivEmulator {
    pub fn new(chroot_bin: impl Into<PathBuf>, rivos_root: impl Into<PathBuf>, timeout: Option<Duration>) -> Self {
        Self {
            chroot_bin: chroot_bin.into(),
            rivos_root: rivos_root.into(),
            timeout,
        }
    }

    fn command(&self, invocation: &ReplayInvocation) -> Command {
        let mut command = Command::new(&self.chroot_bin);
        command
            .arg(&self.rivos_root)
            .args(["--setenv", "RIV_CARTRIDGE"])
            .arg(&invocation.cartridge)
            .args(["--setenv", "RIV_REPLAYLOG"])
            .arg(&invocation.replay_log)
            .args(["--setenv", "RIV_OUTCARD"])
            .arg(&invocation.outcard)
            .args(["--setenv", "RIV_OUTHASH"])
            .arg(&invocation.outhash)
            .args(["--setenv", "RIV_NO_YIELD", "y"])
            .args(["--setenv", "RIV_ENTROPY"])
            .arg(&invocation.entropy)
            .arg("riv-run")
            .stdin(Stdio::null())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl Emulator for RivEmulator {
    async fn run(&self, invocation: &ReplayInvocation) -> Result<ReplayExit, VerificationError> {
        let mut command = self.command(invocation);
        info!("Running replay: {:?}", command.as_std());

        let mut child = command.spawn().map_err(|source| VerificationError::Fork {
            program: self.chroot_bin.clone(),
            source,
        })?;

        let status = match self.timeout {
            None => child.wait().await,
            Some(limit) => match timeout(limit, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    warn!("Replay exceeded {:?}, killing it", limit);
                    if let Err(e) = child.kill().await {
                        warn!("Failed to kill replay: {}", e);
                    }
                    return Ok(ReplayExit::TimedOut(limit));
                }
            },
        }
        .map_err(|e| VerificationError::Runtime(format!("failed waiting for replay: {}", e)))?;

        debug!("Replay wait status: {}", status);
        Ok(status.into())
    }
}
