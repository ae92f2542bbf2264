//! Type definitions for the verifier service

use std::str::FromStr;

use alloy_primitives::Address;
use serde::Deserialize;

use crate::error::{RequestError, VerificationError};

/// Size of the claimed output digest at the head of an advance payload
pub const OUTHASH_SIZE: usize = 32;

/// Smallest gameplay log the replay accepts
pub const MIN_GAMEPLAY_LOG_SIZE: usize = 16;

/// Largest advance payload (digest + log) accepted for verification
pub const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Verdict handed to the device when finishing a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishStatus {
    Accept,
    Reject,
}

impl FinishStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FinishStatus::Accept => "accept",
            FinishStatus::Reject => "reject",
        }
    }

    pub fn is_accept(self) -> bool {
        self == FinishStatus::Accept
    }
}

/// Request as delivered by the device, not yet decoded
#[derive(Debug, Clone, PartialEq)]
pub enum RawRequest {
    Advance(serde_json::Value),
    Inspect(serde_json::Value),
    Invalid { request_type: String },
}

impl RawRequest {
    pub fn kind(&self) -> &str {
        match self {
            RawRequest::Advance(_) => "advance_state",
            RawRequest::Inspect(_) => "inspect_state",
            RawRequest::Invalid { request_type } => request_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvanceMetadata {
    pub msg_sender: Address,
    pub epoch_index: u64,
    pub input_index: u64,
    pub block_number: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvanceRequest {
    pub metadata: AdvanceMetadata,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectRequest {
    pub payload: Vec<u8>,
}

#[derive(Deserialize)]
struct AdvanceData {
    metadata: MetadataData,
    payload: String,
}

#[derive(Deserialize)]
struct MetadataData {
    msg_sender: String,
    epoch_index: u64,
    input_index: u64,
    block_number: u64,
    timestamp: u64,
}

#[derive(Deserialize)]
struct InspectData {
    payload: String,
}

/// Decode the data of an advance request.
///
/// `max_payload` is the device buffer size; anything larger is a
/// [`RequestError::PayloadOverflow`].
pub fn decode_advance(data: &serde_json::Value, max_payload: usize) -> Result<AdvanceRequest, RequestError> {
    let data = AdvanceData::deserialize(data)?;

    let msg_sender = Address::from_str(&data.metadata.msg_sender)
        .map_err(|e| RequestError::Malformed(format!("invalid msg_sender {}: {}", data.metadata.msg_sender, e)))?;

    let payload = decode_payload(&data.payload, max_payload)?;

    Ok(AdvanceRequest {
        metadata: AdvanceMetadata {
            msg_sender,
            epoch_index: data.metadata.epoch_index,
            input_index: data.metadata.input_index,
            block_number: data.metadata.block_number,
            timestamp: data.metadata.timestamp,
        },
        payload,
    })
}

/// Decode the data of an inspect request
pub fn decode_inspect(data: &serde_json::Value, max_payload: usize) -> Result<InspectRequest, RequestError> {
    let data = InspectData::deserialize(data)?;
    Ok(InspectRequest {
        payload: decode_payload(&data.payload, max_payload)?,
    })
}

fn decode_payload(payload_hex: &str, max_payload: usize) -> Result<Vec<u8>, RequestError> {
    let payload_hex = payload_hex.strip_prefix("0x").unwrap_or(payload_hex);

    // Checked before decoding so an oversized payload is never allocated
    let size = payload_hex.len() / 2;
    if size > max_payload {
        return Err(RequestError::PayloadOverflow { size, max: max_payload });
    }

    Ok(hex::decode(payload_hex)?)
}

/// Advance payload reinterpreted as a gameplay submission: the claimed
/// output digest followed by the replay log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameplayClaim<'a> {
    pub outhash: [u8; OUTHASH_SIZE],
    pub gameplay_log: &'a [u8],
}

impl<'a> GameplayClaim<'a> {
    /// Validate the payload size and split it into digest and log
    pub fn parse(payload: &'a [u8]) -> Result<Self, VerificationError> {
        let min = OUTHASH_SIZE + MIN_GAMEPLAY_LOG_SIZE;
        if payload.len() < min {
            return Err(VerificationError::PayloadTooSmall { size: payload.len(), min });
        }
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(VerificationError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let (outhash, gameplay_log) = payload.split_at(OUTHASH_SIZE);
        let mut digest = [0u8; OUTHASH_SIZE];
        digest.copy_from_slice(outhash);

        Ok(Self {
            outhash: digest,
            gameplay_log,
        })
    }
}
