//! Rollup request loop

use std::path::PathBuf;

use tracing::{error, info};

use crate::emulator::Emulator;
use crate::error::Result;
use crate::gameplay_verifier::GameplayVerifier;
use crate::handlers::{handle_advance, handle_inspect};
use crate::rollup_client::RollupDevice;
use crate::types::{FinishStatus, RawRequest};

pub struct Application<D, E> {
    device: D,
    verifier: GameplayVerifier<E>,
    checkpoint_path: PathBuf,
}

impl<D: RollupDevice, E: Emulator> Application<D, E> {
    pub fn new(device: D, verifier: GameplayVerifier<E>, checkpoint_path: impl Into<PathBuf>) -> Self {
        Self {
            device,
            verifier,
            checkpoint_path: checkpoint_path.into(),
        }
    }

    /// Load the checkpoint left by a previous run, if any
    pub fn restore(&mut self) -> Result<()> {
        if self.device.load_checkpoint(&self.checkpoint_path)? {
            info!("Checkpoint restored from {}", self.checkpoint_path.display());
        }
        Ok(())
    }

    /// Process requests until the device fails.
    ///
    /// Each iteration maps the previous status to the next one; only fatal
    /// errors end the loop.
    pub async fn run(mut self) -> Result<()> {
        self.restore()?;

        info!("Processing rollup requests...");
        let mut status = FinishStatus::Accept;
        loop {
            status = self.step(status).await?;
        }
    }

    /// Persist the checkpoint if the previous request was accepted, finish it
    /// and handle the next request.
    pub async fn step(&mut self, previous: FinishStatus) -> Result<FinishStatus> {
        if previous.is_accept() {
            self.device.save_checkpoint(&self.checkpoint_path)?;
        }

        info!("Finishing previous request with status {}", previous.as_str());
        let request = self.device.finish(previous).await?;
        info!("Received {} request", request.kind());
        self.dispatch(request).await
    }

    async fn dispatch(&mut self, request: RawRequest) -> Result<FinishStatus> {
        match request {
            RawRequest::Advance(data) => handle_advance(&mut self.device, &self.verifier, &data).await,
            RawRequest::Inspect(data) => handle_inspect(&mut self.device, &data).await,
            RawRequest::Invalid { request_type } => {
                error!("Invalid request type {:?}", request_type);
                Ok(FinishStatus::Reject)
            }
        }
    }
}
