//! Codec for encoding and decoding signaling frames.
//!
//! Binary messages use MessagePack with length-prefixed framing. Text messages
//! carry a single JSON-encoded frame, which is what browser clients send.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::frames::Frame;

/// Maximum frame size (1 MiB). Signaling frames are small; SDP-sized at most.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Not enough data to decode frame.
    #[error("Incomplete frame: need {0} more bytes")]
    Incomplete(usize),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode a frame to bytes.
///
/// The encoded format is:
/// - 4 bytes: Big-endian length prefix
/// - N bytes: MessagePack-encoded frame
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode(frame: &Frame) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    encode_into(frame, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a frame into an existing buffer.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode_into(frame: &Frame, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    let payload = rmp_serde::to_vec_named(frame)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    buf.reserve(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);

    Ok(())
}

/// Try to decode a frame from a buffer, advancing it if successful.
///
/// Returns `Ok(Some(frame))` if a complete frame was decoded,
/// `Ok(None)` if more data is needed, or `Err` on protocol error.
///
/// # Errors
///
/// Returns an error if the frame is too large or invalid.
pub fn decode_from(buf: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if buf.len() < total_size {
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_SIZE);
    let payload = buf.split_to(length);
    let frame = rmp_serde::from_slice(&payload)?;

    Ok(Some(frame))
}

/// Decode a single complete binary frame.
///
/// # Errors
///
/// Returns an error if the data is incomplete, too large, or invalid.
pub fn decode(data: &[u8]) -> Result<Frame, ProtocolError> {
    let mut buf = BytesMut::from(data);
    match decode_from(&mut buf)? {
        Some(frame) => Ok(frame),
        None => {
            let needed = if data.len() < LENGTH_PREFIX_SIZE {
                LENGTH_PREFIX_SIZE - data.len()
            } else {
                let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
                LENGTH_PREFIX_SIZE + length - data.len()
            };
            Err(ProtocolError::Incomplete(needed))
        }
    }
}

/// Encode a frame as a JSON text message.
///
/// # Errors
///
/// Returns an error if serialization fails or the text is too large.
pub fn encode_text(frame: &Frame) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(frame)?;
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }
    Ok(text)
}

/// Decode a JSON text message.
///
/// # Errors
///
/// Returns an error if the text is too large or not a valid frame.
pub fn decode_text(text: &str) -> Result<Frame, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::{Request, Response, ServerEvent};
    use crate::media::MediaKind;
    use crate::RtpParameters;

    #[test]
    fn test_binary_roundtrip() {
        let frames = vec![
            Frame::request(
                1,
                Request::JoinRoom {
                    room_name: "r1".into(),
                },
            ),
            Frame::request(
                2,
                Request::TransportProduce {
                    kind: MediaKind::Video,
                    rtp_parameters: RtpParameters::default(),
                    app_data: Some(serde_json::json!({"source": "camera"})),
                },
            ),
            Frame::response(2, Response::TransportConnect),
            Frame::error(3, 1004, "Transport not found"),
            Frame::event(ServerEvent::NewProducer {
                producer_id: "p-1".into(),
            }),
        ];

        for frame in frames {
            let encoded = encode(&frame).unwrap();
            let decoded = decode(&encoded).unwrap();
            assert_eq!(frame, decoded);
        }
    }

    #[test]
    fn test_decode_incomplete() {
        let frame = Frame::request(1, Request::GetProducers);
        let encoded = encode(&frame).unwrap();

        match decode(&encoded[..5]) {
            Err(ProtocolError::Incomplete(_)) => {}
            other => panic!("Expected Incomplete error, got {:?}", other),
        }
    }

    #[test]
    fn test_streaming_decode() {
        let frame1 = Frame::request(1, Request::GetProducers);
        let frame2 = Frame::request(
            2,
            Request::ConsumerResume {
                server_consumer_id: "c-1".into(),
            },
        );

        let mut buf = BytesMut::new();
        encode_into(&frame1, &mut buf).unwrap();
        encode_into(&frame2, &mut buf).unwrap();

        assert_eq!(decode_from(&mut buf).unwrap().unwrap(), frame1);
        assert_eq!(decode_from(&mut buf).unwrap().unwrap(), frame2);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_oversized_length_prefix() {
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_FRAME_SIZE + 1) as u32);
        match decode_from(&mut buf) {
            Err(ProtocolError::FrameTooLarge(_)) => {}
            other => panic!("Expected FrameTooLarge error, got {:?}", other),
        }
    }

    #[test]
    fn test_text_frames() {
        let frame = decode_text(
            r#"{"type":"request","id":4,"request":{"event":"joinRoom","roomName":"lobby"}}"#,
        )
        .unwrap();
        assert_eq!(
            frame,
            Frame::request(
                4,
                Request::JoinRoom {
                    room_name: "lobby".into()
                }
            )
        );

        let text = encode_text(&Frame::pong(Some(10))).unwrap();
        assert_eq!(text, r#"{"type":"pong","timestamp":10}"#);
        assert!(decode_text("{not json").is_err());
    }
}
