//! Persisted record of committed outputs

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use tracing::{debug, info};

use crate::error::{DeviceError, Result};

/// Counters and notice hash chain of everything committed so far.
///
/// Only accepted requests are folded in; outputs of a rejected request
/// never reach the checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputsCheckpoint {
    pub notice_count: u64,
    pub report_count: u64,
    pub last_input_index: Option<u64>,
    #[serde(with = "hex::serde")]
    pub notices_root: [u8; 32],
}

impl OutputsCheckpoint {
    /// `root = keccak(root || keccak(notice))`
    pub fn record_notice(&mut self, notice: &[u8]) {
        let leaf = Keccak256::digest(notice);
        let mut hasher = Keccak256::new();
        hasher.update(self.notices_root);
        hasher.update(leaf);
        self.notices_root = hasher.finalize().into();
        self.notice_count += 1;
    }

    pub fn record_report(&mut self) {
        self.report_count += 1;
    }

    /// Load a checkpoint, `None` if none was saved yet
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let json = fs::read_to_string(path).map_err(checkpoint_error(path))?;
        let checkpoint: Self = serde_json::from_str(&json)?;

        info!(
            "Loaded checkpoint {} with {} notices and {} reports",
            path.display(),
            checkpoint.notice_count,
            checkpoint.report_count
        );
        Ok(Some(checkpoint))
    }

    /// Durably replace the checkpoint at `path`
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let temp_path = path.with_extension("tmp");

        write_synced(&temp_path, json.as_bytes()).map_err(checkpoint_error(&temp_path))?;
        fs::rename(&temp_path, path).map_err(checkpoint_error(path))?;

        debug!("Saved checkpoint: {}", path.display());
        Ok(())
    }
}

fn write_synced(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = File::create(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

fn checkpoint_error(path: &Path) -> impl FnOnce(io::Error) -> DeviceError + '_ {
    move |source| DeviceError::Checkpoint {
        path: path.to_path_buf(),
        source,
    }
}
