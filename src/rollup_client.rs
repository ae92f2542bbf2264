//! Client for the rollup HTTP server

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::checkpoint::OutputsCheckpoint;
use crate::error::{DeviceError, Result};
use crate::types::{FinishStatus, RawRequest};

/// The rollup device: delivers requests, takes outputs and owns the
/// committed checkpoint. Every error it returns is fatal.
#[async_trait]
pub trait RollupDevice: Send {
    /// Finish the previous request and block until the next one arrives
    async fn finish(&mut self, status: FinishStatus) -> Result<RawRequest>;

    /// Emit a notice for the current request, returning its index
    async fn emit_notice(&mut self, payload: &[u8]) -> Result<u64>;

    async fn emit_report(&mut self, payload: &[u8]) -> Result<()>;

    /// Largest request payload the device can materialize
    fn max_payload_size(&self) -> usize;

    fn save_checkpoint(&self, path: &Path) -> Result<()>;

    /// Restore the checkpoint at `path`, `false` if there is none
    fn load_checkpoint(&mut self, path: &Path) -> Result<bool>;
}

#[derive(Serialize)]
struct FinishRequest {
    status: &'static str,
}

#[derive(Deserialize)]
struct FinishResponse {
    request_type: String,
    data: serde_json::Value,
}

#[derive(Serialize)]
struct OutputRequest {
    payload: String,
}

#[derive(Deserialize)]
struct IndexResponse {
    index: u64,
}

/// Outputs of the request in flight, not yet accepted
#[derive(Debug, Default)]
struct PendingOutputs {
    input_index: Option<u64>,
    notices: Vec<Vec<u8>>,
    reports: u64,
}

impl PendingOutputs {
    fn fold_into(&self, checkpoint: &mut OutputsCheckpoint) {
        for notice in &self.notices {
            checkpoint.record_notice(notice);
        }
        for _ in 0..self.reports {
            checkpoint.record_report();
        }
        if self.input_index.is_some() {
            checkpoint.last_input_index = self.input_index;
        }
    }
}

pub struct HttpRollup {
    endpoint: String,
    client: Client,
    max_retries: u32,
    retry_delay: Duration,
    max_payload_size: usize,
    committed: OutputsCheckpoint,
    pending: PendingOutputs,
}

impl HttpRollup {
    pub fn new(endpoint: &str, max_payload_size: usize, max_retries: u32) -> Result<Self> {
        // No request timeout: finish long-polls until the next input arrives
        let client = Client::builder().build()?;

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
            max_retries: max_retries.max(1),
            retry_delay: Duration::from_secs(1),
            max_payload_size,
            committed: OutputsCheckpoint::default(),
            pending: PendingOutputs::default(),
        })
    }

    #[cfg(test)]
    pub fn checkpoint(&self) -> &OutputsCheckpoint {
        &self.committed
    }

    /// POST with retries on connection failures only; anything that may have
    /// reached the server is not retried.
    async fn post<T: Serialize + Sync>(&self, path: &str, body: &T) -> Result<Response> {
        let url = format!("{}/{}", self.endpoint, path);

        let mut attempt = 1;
        loop {
            match self.client.post(&url).json(body).send().await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_connect() && attempt < self.max_retries => {
                    warn!("Rollup server unreachable on attempt {}: {}", attempt, e);
                    let delay = self.retry_delay * attempt;
                    debug!("Waiting {:?} before retry...", delay);
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn post_output(&self, path: &str, payload: &[u8]) -> Result<Response> {
        let body = OutputRequest {
            payload: format!("0x{}", hex::encode(payload)),
        };
        let response = self.post(path, &body).await?;
        ensure_success(path, response).await
    }

    fn settle(&mut self, status: FinishStatus) {
        let pending = std::mem::take(&mut self.pending);
        if status.is_accept() {
            pending.fold_into(&mut self.committed);
        } else if !pending.notices.is_empty() || pending.reports > 0 {
            debug!(
                "Discarding {} notices and {} reports of rejected request",
                pending.notices.len(),
                pending.reports
            );
        }
    }
}

async fn ensure_success(endpoint: &str, response: Response) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
    Err(DeviceError::Http {
        endpoint: endpoint.to_string(),
        status,
        body,
    })
}

#[async_trait]
impl RollupDevice for HttpRollup {
    async fn finish(&mut self, status: FinishStatus) -> Result<RawRequest> {
        self.settle(status);
        let body = FinishRequest { status: status.as_str() };

        loop {
            let response = self.post("finish", &body).await?;
            if response.status() == StatusCode::ACCEPTED {
                debug!("No pending rollup request, trying again");
                continue;
            }

            let response = ensure_success("finish", response).await?;
            let text = response.text().await?;
            let next: FinishResponse = serde_json::from_str(&text)?;

            let request = match next.request_type.as_str() {
                "advance_state" => {
                    self.pending.input_index = next.data["metadata"]["input_index"].as_u64();
                    RawRequest::Advance(next.data)
                }
                "inspect_state" => RawRequest::Inspect(next.data),
                _ => RawRequest::Invalid {
                    request_type: next.request_type,
                },
            };
            return Ok(request);
        }
    }

    async fn emit_notice(&mut self, payload: &[u8]) -> Result<u64> {
        debug!("Notice payload bytes length {}", payload.len());
        let response = self.post_output("notice", payload).await?;
        let text = response.text().await?;
        let IndexResponse { index } = serde_json::from_str(&text)
            .map_err(|e| DeviceError::Protocol(format!("notice response {:?}: {}", text, e)))?;

        self.pending.notices.push(payload.to_vec());
        Ok(index)
    }

    async fn emit_report(&mut self, payload: &[u8]) -> Result<()> {
        self.post_output("report", payload).await?;
        self.pending.reports += 1;
        Ok(())
    }

    fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }

    /// Saved right before the request in flight is accepted, so its
    /// outputs are part of the saved state.
    fn save_checkpoint(&self, path: &Path) -> Result<()> {
        let mut checkpoint = self.committed.clone();
        self.pending.fold_into(&mut checkpoint);
        checkpoint.save(path)
    }

    fn load_checkpoint(&mut self, path: &Path) -> Result<bool> {
        match OutputsCheckpoint::load(path)? {
            Some(checkpoint) => {
                info!(
                    "Resuming after input {:?} with {} committed notices",
                    checkpoint.last_input_index, checkpoint.notice_count
                );
                self.committed = checkpoint;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
