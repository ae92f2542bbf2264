//! Report and notice payload encoding.
//!
//! Notices are part of the verifiable record, so they are written by hand as
//! fixed-width big-endian fields instead of going through a serializer.

use alloy_primitives::Address;

use crate::error::StatusCode;

/// Width of every notice field
pub const WORD_SIZE: usize = 32;

const ADDRESS_SIZE: usize = 20;

/// Notice layout: user, timestamp, score, input index
pub const NOTICE_SIZE: usize = 4 * WORD_SIZE;

/// Messages longer than this are cut before being embedded in a report
pub const MAX_ERROR_MESSAGE_LENGTH: usize = 256;

/// Encode a report.
///
/// Without a message the report is the single status byte. With one it is
/// `{"error":{"code":<status>,"message":"<message>"}}`, the message cut to
/// [`MAX_ERROR_MESSAGE_LENGTH`] bytes on a character boundary.
pub fn encode_report(status: StatusCode, message: Option<&str>) -> Vec<u8> {
    match message {
        None => vec![status.as_u8()],
        Some(message) => {
            let report = serde_json::json!({
                "error": {
                    "code": status.as_u8(),
                    "message": truncate(message, MAX_ERROR_MESSAGE_LENGTH),
                }
            });
            report.to_string().into_bytes()
        }
    }
}

fn truncate(message: &str, max: usize) -> &str {
    if message.len() <= max {
        return message;
    }
    let mut end = max;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    &message[..end]
}

/// Encode a score notice as four 32-byte big-endian words.
///
/// The score is sign-extended: negative values fill the high bytes with 0xff.
pub fn encode_notice(user: &Address, timestamp: u64, score: i64, input_index: u64) -> [u8; NOTICE_SIZE] {
    let mut notice = [0u8; NOTICE_SIZE];
    let (user_word, rest) = notice.split_at_mut(WORD_SIZE);
    let (timestamp_word, rest) = rest.split_at_mut(WORD_SIZE);
    let (score_word, index_word) = rest.split_at_mut(WORD_SIZE);

    user_word[WORD_SIZE - ADDRESS_SIZE..].copy_from_slice(user.as_slice());
    write_word(timestamp_word, &timestamp.to_be_bytes(), 0x00);
    let fill = if score < 0 { 0xff } else { 0x00 };
    write_word(score_word, &score.to_be_bytes(), fill);
    write_word(index_word, &input_index.to_be_bytes(), 0x00);

    notice
}

fn write_word(word: &mut [u8], value: &[u8], fill: u8) {
    let split = WORD_SIZE - value.len();
    word[..split].fill(fill);
    word[split..].copy_from_slice(value);
}
