//! Configuration management for the verifier service

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Rollup HTTP server the requests are read from
    pub rollup_http_server_url: String,

    /// Where the outputs checkpoint is persisted
    pub checkpoint_path: PathBuf,

    /// Directory for the replay scratch files
    pub scratch_dir: PathBuf,

    /// Cartridge replayed for every submission
    pub cartridge_path: PathBuf,

    /// Chroot launcher for the replay
    pub chroot_bin: PathBuf,

    /// RIVOS root filesystem
    pub rivos_root: PathBuf,

    /// Replay time limit in seconds, unlimited when unset
    pub replay_timeout_secs: Option<u64>,

    /// Device buffer size; larger payloads are fatal
    pub max_payload_size: usize,

    /// Attempts for requests that cannot reach the rollup server
    pub max_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rollup_http_server_url: "http://127.0.0.1:5004".to_string(),
            checkpoint_path: PathBuf::from("/mnt/merkle/merkle"),
            scratch_dir: PathBuf::from("/run"),
            cartridge_path: PathBuf::from("/cartridges/freedoom.sqfs"),
            chroot_bin: PathBuf::from("/rivos/usr/sbin/riv-chroot"),
            rivos_root: PathBuf::from("/rivos"),
            replay_timeout_secs: None,
            max_payload_size: 2 * 1024 * 1024, // 2 MB
            max_retries: 3,
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    pub fn load(path: &str) -> Result<Self> {
        let config = if std::path::Path::new(path).exists() {
            let contents = fs::read_to_string(path)?;
            toml::from_str(&contents)?
        } else {
            Config::default()
        };

        let config = config.with_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Result<Self> {
        let config = Config::default().with_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(url) = env::var("ROLLUP_HTTP_SERVER_URL") {
            self.rollup_http_server_url = url;
        }

        if let Ok(path) = env::var("CHECKPOINT_PATH") {
            self.checkpoint_path = path.into();
        }

        if let Ok(dir) = env::var("SCRATCH_DIR") {
            self.scratch_dir = dir.into();
        }

        if let Ok(path) = env::var("CARTRIDGE_PATH") {
            self.cartridge_path = path.into();
        }

        if let Ok(path) = env::var("RIV_CHROOT_BIN") {
            self.chroot_bin = path.into();
        }

        if let Ok(path) = env::var("RIVOS_ROOT") {
            self.rivos_root = path.into();
        }

        if let Ok(secs) = env::var("REPLAY_TIMEOUT_SECS") {
            self.replay_timeout_secs = Some(
                secs.parse()
                    .map_err(|e| anyhow::anyhow!("Invalid REPLAY_TIMEOUT_SECS {:?}: {}", secs, e))?,
            );
        }

        if let Ok(size) = env::var("MAX_PAYLOAD_SIZE") {
            self.max_payload_size = size
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid MAX_PAYLOAD_SIZE {:?}: {}", size, e))?;
        }

        if let Ok(retries) = env::var("MAX_RETRIES") {
            if let Ok(retries) = retries.parse() {
                self.max_retries = retries;
            }
        }

        Ok(self)
    }

    pub fn replay_timeout(&self) -> Option<Duration> {
        self.replay_timeout_secs.map(Duration::from_secs)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.rollup_http_server_url.is_empty() {
            return Err(anyhow::anyhow!("Rollup HTTP server URL is required"));
        }

        for (name, path) in [
            ("checkpoint_path", &self.checkpoint_path),
            ("scratch_dir", &self.scratch_dir),
            ("cartridge_path", &self.cartridge_path),
            ("chroot_bin", &self.chroot_bin),
            ("rivos_root", &self.rivos_root),
        ] {
            if path.as_os_str().is_empty() {
                return Err(anyhow::anyhow!("{} must not be empty", name));
            }
        }

        if self.max_payload_size == 0 {
            return Err(anyhow::anyhow!("max_payload_size must be positive"));
        }

        if self.replay_timeout_secs == Some(0) {
            return Err(anyhow::anyhow!("replay_timeout_secs must be positive when set"));
        }

        Ok(())
    }
}
