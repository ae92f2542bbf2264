//! In-memory collaborators for tests

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::emulator::{Emulator, ReplayExit, ReplayInvocation};
use crate::error::{DeviceError, Result, VerificationError};
use crate::rollup_client::RollupDevice;
use crate::types::{FinishStatus, RawRequest};

/// Writes canned artifacts to the requested paths instead of replaying
pub struct ScriptedEmulator {
    pub exit: ReplayExit,
    pub outhash: Option<String>,
    pub outcard: Option<String>,
    pub invocations: Mutex<Vec<ReplayInvocation>>,
}

impl ScriptedEmulator {
    pub fn completing(outhash: &str, outcard: &str) -> Self {
        Self {
            exit: ReplayExit::Completed,
            outhash: Some(outhash.to_string()),
            outcard: Some(outcard.to_string()),
            invocations: Mutex::new(Vec::new()),
        }
    }

    pub fn exiting(exit: ReplayExit) -> Self {
        Self {
            exit,
            outhash: None,
            outcard: None,
            invocations: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Emulator for ScriptedEmulator {
    async fn run(&self, invocation: &ReplayInvocation) -> std::result::Result<ReplayExit, VerificationError> {
        assert!(invocation.replay_log.exists());
        if let Some(outhash) = &self.outhash {
            fs::write(&invocation.outhash, outhash).unwrap();
        }
        if let Some(outcard) = &self.outcard {
            fs::write(&invocation.outcard, outcard).unwrap();
        }
        self.invocations.lock().unwrap().push(invocation.clone());
        Ok(self.exit.clone())
    }
}

/// Device that serves queued requests and records every output.
///
/// `finish` fails once the queue is drained, which ends a request loop.
pub struct MockRollup {
    pub requests: VecDeque<RawRequest>,
    pub finishes: Vec<FinishStatus>,
    pub notices: Vec<Vec<u8>>,
    pub reports: Vec<Vec<u8>>,
    pub saved: Mutex<Vec<PathBuf>>,
    pub loaded: Vec<PathBuf>,
    pub max_payload_size: usize,
    pub fail_notices: bool,
    pub fail_checkpoint: bool,
}

impl MockRollup {
    pub fn new(requests: impl IntoIterator<Item = RawRequest>) -> Self {
        Self {
            requests: requests.into_iter().collect(),
            finishes: Vec::new(),
            notices: Vec::new(),
            reports: Vec::new(),
            saved: Mutex::new(Vec::new()),
            loaded: Vec::new(),
            max_payload_size: 2 * 1024 * 1024,
            fail_notices: false,
            fail_checkpoint: false,
        }
    }

    pub fn idle() -> Self {
        Self::new(Vec::new())
    }

    pub fn outputs(&self) -> usize {
        self.notices.len() + self.reports.len()
    }

    pub fn saves(&self) -> usize {
        self.saved.lock().unwrap().len()
    }
}

#[async_trait]
impl RollupDevice for MockRollup {
    async fn finish(&mut self, status: FinishStatus) -> Result<RawRequest> {
        self.finishes.push(status);
        self.requests
            .pop_front()
            .ok_or_else(|| DeviceError::Protocol("no more requests".to_string()))
    }

    async fn emit_notice(&mut self, payload: &[u8]) -> Result<u64> {
        if self.fail_notices {
            return Err(DeviceError::Http {
                endpoint: "notice".to_string(),
                status: 400,
                body: "notice rejected".to_string(),
            });
        }
        self.notices.push(payload.to_vec());
        Ok(self.notices.len() as u64 - 1)
    }

    async fn emit_report(&mut self, payload: &[u8]) -> Result<()> {
        self.reports.push(payload.to_vec());
        Ok(())
    }

    fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }

    fn save_checkpoint(&self, path: &Path) -> Result<()> {
        if self.fail_checkpoint {
            return Err(DeviceError::Checkpoint {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            });
        }
        self.saved.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }

    fn load_checkpoint(&mut self, path: &Path) -> Result<bool> {
        self.loaded.push(path.to_path_buf());
        Ok(false)
    }
}
