//! `subscribeRepos` frame encoding (§4.G). Each frame is
//! `4-byte big-endian total-length || dag-cbor(header) || dag-cbor(body)` —
//! a length-prefixed variant of the unprefixed two-part framing, chosen so a
//! reader never has to buffer an entire WebSocket message to find the frame
//! boundary.

use pds_core::{PdsError, PdsResult};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct FrameHeader {
    /// `1` for an event frame, `-1` for an error frame.
    pub op: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl FrameHeader {
    pub fn event(tag: &str) -> Self {
        FrameHeader {
            op: 1,
            t: Some(tag.to_string()),
        }
    }

    pub fn error() -> Self {
        FrameHeader { op: -1, t: None }
    }
}

fn dagcbor_encode<T: Serialize>(value: &T) -> PdsResult<Vec<u8>> {
    serde_ipld_dagcbor::to_vec(value).map_err(|e| PdsError::IntegrityError(format!("frame encode failed: {e}")))
}

/// Encode a length-prefixed frame from a header and a body.
pub fn encode_frame<T: Serialize>(header: &FrameHeader, body: &T) -> PdsResult<Vec<u8>> {
    let header_bytes = dagcbor_encode(header)?;
    let body_bytes = dagcbor_encode(body)?;
    let total_len = u32::try_from(header_bytes.len() + body_bytes.len())
        .map_err(|_| PdsError::IntegrityError("frame too large for a u32 length prefix".into()))?;

    let mut frame = Vec::with_capacity(4 + header_bytes.len() + body_bytes.len());
    frame.extend_from_slice(&total_len.to_be_bytes());
    frame.extend_from_slice(&header_bytes);
    frame.extend_from_slice(&body_bytes);
    Ok(frame)
}

pub fn encode_commit_frame<T: Serialize>(body: &T) -> PdsResult<Vec<u8>> {
    encode_frame(&FrameHeader::event("#commit"), body)
}

pub fn encode_info_frame<T: Serialize>(body: &T) -> PdsResult<Vec<u8>> {
    encode_frame(&FrameHeader::event("#info"), body)
}

pub fn encode_error_frame<T: Serialize>(body: &T) -> PdsResult<Vec<u8>> {
    encode_frame(&FrameHeader::error(), body)
}

/// Splits the 4-byte length prefix off a buffered frame and returns the
/// `header || body` bytes it announces, along with how many bytes of
/// `buf` the frame consumed.
pub fn split_length_prefix(buf: &[u8]) -> PdsResult<Option<(&[u8], usize)>> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if buf.len() < 4 + len {
        return Ok(None);
    }
    Ok(Some((&buf[4..4 + len], 4 + len)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ErrorPayload;

    #[test]
    fn frame_starts_with_big_endian_length() {
        let body = ErrorPayload::future_cursor();
        let frame = encode_error_frame(&body).unwrap();
        let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(len, frame.len() - 4);
    }

    #[test]
    fn split_length_prefix_round_trips() {
        let body = ErrorPayload::outdated_cursor();
        let frame = encode_error_frame(&body).unwrap();
        let (payload, consumed) = split_length_prefix(&frame).unwrap().unwrap();
        assert_eq!(consumed, frame.len());
        assert_eq!(payload, &frame[4..]);
    }

    #[test]
    fn split_length_prefix_reports_incomplete_buffer() {
        let body = ErrorPayload::outdated_cursor();
        let frame = encode_error_frame(&body).unwrap();
        assert!(split_length_prefix(&frame[..frame.len() - 1]).unwrap().is_none());
    }
}
