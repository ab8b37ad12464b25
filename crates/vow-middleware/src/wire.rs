//! Frame format shared by every publisher and subscriber.
//!
//! A frame is UTF-8 text: the topic, a single space, then a compact JSON
//! payload.  Subscribers match on the raw topic prefix and receivers discard
//! everything up to and including the first space.

use serde::Serialize;
use serde::de::DeserializeOwned;
use vow_types::VowError;

/// Separator between the topic prefix and the JSON payload.
pub const TOPIC_SEPARATOR: char = ' ';

/// Build a `<topic> <json>` frame.
///
/// # Errors
///
/// Returns [`VowError::Decode`] if `payload` cannot be serialised.
pub fn encode_frame<T: Serialize>(topic: &str, payload: &T) -> Result<Vec<u8>, VowError> {
    let json = serde_json::to_string(payload)
        .map_err(|e| VowError::Decode(format!("cannot encode payload for '{topic}': {e}")))?;
    Ok(format!("{topic}{TOPIC_SEPARATOR}{json}").into_bytes())
}

/// Return the payload part of `frame`.
///
/// A frame without a separator is treated as payload-only.
///
/// # Errors
///
/// Returns [`VowError::Decode`] if the frame is not valid UTF-8.
pub fn strip_topic(frame: &[u8]) -> Result<&str, VowError> {
    let text = std::str::from_utf8(frame)
        .map_err(|e| VowError::Decode(format!("frame is not valid UTF-8: {e}")))?;
    Ok(text
        .split_once(TOPIC_SEPARATOR)
        .map_or(text, |(_, payload)| payload))
}

/// Strip the topic and decode the JSON payload.
///
/// # Errors
///
/// Returns [`VowError::Decode`] for invalid UTF-8 or invalid JSON.
pub fn decode_payload<T: DeserializeOwned>(frame: &[u8]) -> Result<T, VowError> {
    let payload = strip_topic(frame)?;
    serde_json::from_str(payload)
        .map_err(|e| VowError::Decode(format!("invalid JSON payload: {e}")))
}
