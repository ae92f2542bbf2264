//! Advance and inspect request handlers

use chrono::DateTime;
use tracing::{error, info, warn};

use crate::emulator::Emulator;
use crate::error::{RequestError, Result, StatusCode};
use crate::gameplay_verifier::GameplayVerifier;
use crate::response::{encode_notice, encode_report};
use crate::rollup_client::RollupDevice;
use crate::types::{decode_advance, decode_inspect, AdvanceMetadata, FinishStatus};

/// Handle an advance request.
///
/// Every decodable request is accepted: a failed verification is answered
/// with a report, a successful one with a notice, and exactly one of the two
/// is sent. Only device failures and a payload overflowing the device buffer
/// are returned as errors.
pub async fn handle_advance<D, E>(
    device: &mut D,
    verifier: &GameplayVerifier<E>,
    data: &serde_json::Value,
) -> Result<FinishStatus>
where
    D: RollupDevice,
    E: Emulator,
{
    let request = match decode_advance(data, device.max_payload_size()) {
        Ok(request) => request,
        Err(e @ RequestError::PayloadOverflow { .. }) => {
            error!("Unable to read advance state, forcing exit: {}", e);
            return Err(e.into());
        }
        Err(e) => {
            warn!("Invalid advance state: {}", e);
            send_report(device, StatusCode::InvalidRequest, &format!("invalid advance state: {}", e)).await?;
            return Ok(FinishStatus::Accept);
        }
    };

    log_metadata(&request.metadata, request.payload.len());

    match verifier.verify(&request).await {
        Ok(score) => {
            let metadata = &request.metadata;
            let notice = encode_notice(&metadata.msg_sender, metadata.timestamp, score, metadata.input_index);

            info!("Sending notice for input {} with score {}", metadata.input_index, score);
            match device.emit_notice(&notice).await {
                Ok(index) => info!("Notice {} emitted", index),
                Err(e) => {
                    error!("Unable to emit notice: {}", e);
                    send_report(device, StatusCode::NoticeError, &format!("error emitting notice: {}", e)).await?;
                }
            }
        }
        Err(e) => {
            warn!("Gameplay rejected ({}): {}", e.status().as_u8(), e);
            send_report(device, e.status(), &e.to_string()).await?;
        }
    }

    Ok(FinishStatus::Accept)
}

/// Inspect queries are not supported: the request is decoded for logging
/// and always answered with a reject.
pub async fn handle_inspect<D: RollupDevice>(device: &mut D, data: &serde_json::Value) -> Result<FinishStatus> {
    match decode_inspect(data, device.max_payload_size()) {
        Ok(request) => info!("Inspect request with size {}", request.payload.len()),
        Err(e) => {
            warn!("Unable to read inspect state: {}", e);
            send_report(device, StatusCode::InvalidRequest, &format!("invalid inspect state: {}", e)).await?;
        }
    }

    info!("Inspect ignored");
    Ok(FinishStatus::Reject)
}

async fn send_report<D: RollupDevice>(device: &mut D, status: StatusCode, message: &str) -> Result<()> {
    let report = encode_report(status, Some(message));
    device.emit_report(&report).await
}

fn log_metadata(metadata: &AdvanceMetadata, payload_len: usize) {
    let block_time = i64::try_from(metadata.timestamp)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|time| time.to_rfc3339())
        .unwrap_or_else(|| metadata.timestamp.to_string());

    info!(
        "Advance request {} of epoch {} from {} at block {} ({}) with size {}",
        metadata.input_index,
        metadata.epoch_index,
        metadata.msg_sender,
        metadata.block_number,
        block_time,
        payload_len
    );
}
