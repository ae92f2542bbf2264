//! Error types for the verifier service

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Status code carried in every report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StatusCode {
    Success = 0,
    InvalidRequest = 1,
    InputError = 2,
    NoticeError = 3,
    FileError = 4,
    ForkError = 5,
    VerificationError = 6,
    OutHashError = 7,
    OutcardError = 8,
    RuntimeException = 9,
}

impl StatusCode {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Per-request failures of the verification pipeline.
///
/// None of these are fatal: each one degrades into a report and the loop
/// moves on to the next request.
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("payload size too small: {size} bytes, minimum {min}")]
    PayloadTooSmall { size: usize, min: usize },

    #[error("payload size too large: {size} bytes, maximum {max}")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("{context}: {source}")]
    File {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("malformed outhash file: {0}")]
    MalformedOutHash(String),

    #[error("failed to spawn verifier {}: {source}", .program.display())]
    Fork {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("error running verification: {0}")]
    Replay(String),

    #[error("error outhash mismatch, received {received}")]
    OutHashMismatch { received: String },

    #[error("error getting score from outcard file")]
    ScoreNotFound,

    #[error("invalid score in outcard file: {0}")]
    InvalidScore(String),

    #[error("runtime error: {0}")]
    Runtime(String),
}

impl VerificationError {
    /// Status code reported for this failure
    pub fn status(&self) -> StatusCode {
        match self {
            Self::PayloadTooSmall { .. } | Self::PayloadTooLarge { .. } => StatusCode::InputError,
            Self::File { .. } | Self::MalformedOutHash(_) => StatusCode::FileError,
            Self::Fork { .. } => StatusCode::ForkError,
            Self::Replay(_) => StatusCode::VerificationError,
            Self::OutHashMismatch { .. } => StatusCode::OutHashError,
            Self::ScoreNotFound | Self::InvalidScore(_) => StatusCode::OutcardError,
            Self::Runtime(_) => StatusCode::RuntimeException,
        }
    }

    pub(crate) fn file(context: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| Self::File { context, source }
    }
}

/// Failures to materialize a request delivered by the device
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("malformed request: {0}")]
    Malformed(String),

    /// The payload does not fit the device buffer. Treated as transport
    /// corruption, so the process must exit.
    #[error("payload of {size} bytes exceeds device buffer of {max} bytes")]
    PayloadOverflow { size: usize, max: usize },
}

impl From<hex::FromHexError> for RequestError {
    fn from(e: hex::FromHexError) -> Self {
        RequestError::Malformed(format!("invalid hex: {}", e))
    }
}

impl From<serde_json::Error> for RequestError {
    fn from(e: serde_json::Error) -> Self {
        RequestError::Malformed(e.to_string())
    }
}

/// Transport and persistence failures. Always fatal.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Rollup server returned {status} on {endpoint}: {body}")]
    Http {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Invalid rollup server response: {0}")]
    Protocol(String),

    #[error("Checkpoint I/O error on {}: {source}", .path.display())]
    Checkpoint {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Request(#[from] RequestError),
}

pub type Result<T> = std::result::Result<T, DeviceError>;
